//! Wire framing: newline-terminated records and the `SEEKTO` control command.

use memchr::{memchr, memrchr};
use ringlog_buffer::{RECORD_DELIMITER, SeekTo};
use ringlog_error::{Result, RinglogError};

/// Prefix that marks a record as a seek command.
pub const SEEKTO_PREFIX: &[u8] = b"SEEKTO:";

/// What a received record asks the server to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request<'a> {
    /// Append the record bytes, delimiter included.
    Append(&'a [u8]),
    /// Reposition this connection's read cursor.
    SeekTo(SeekTo),
}

impl<'a> Request<'a> {
    /// Classify the first record of `received`.
    ///
    /// `SEEKTO:` is a command only when the log is device-backed; otherwise
    /// everything received is ordinary data. The command ends at the first
    /// delimiter; records after it are not part of it (see
    /// [`split_first_record`]). A command without two unsigned integers is
    /// rejected.
    pub fn parse(received: &'a [u8], device_backed: bool) -> Result<Self> {
        if !device_backed {
            return Ok(Self::Append(received));
        }
        let Some(args) = received.strip_prefix(SEEKTO_PREFIX) else {
            return Ok(Self::Append(received));
        };
        let (args, _) = split_first_record(args);

        let args = std::str::from_utf8(args)
            .map_err(|_| RinglogError::invalid_command("SEEKTO arguments are not UTF-8"))?
            .trim_end_matches(['\n', '\r']);
        let (index, offset) = args.split_once(',').ok_or_else(|| {
            RinglogError::invalid_command(format!("SEEKTO expects <index>,<offset>, got {args:?}"))
        })?;
        let record_index = parse_u32(index, "index")?;
        let record_offset = parse_u32(offset, "offset")?;
        Ok(Self::SeekTo(SeekTo::new(record_index, record_offset)))
    }
}

fn parse_u32(field: &str, name: &str) -> Result<u32> {
    field.trim().parse().map_err(|_| {
        RinglogError::invalid_command(format!("SEEKTO {name} {field:?} is not an unsigned integer"))
    })
}

/// Position of the first delimiter in `chunk`.
#[must_use]
pub fn find_delimiter(chunk: &[u8]) -> Option<usize> {
    memchr(RECORD_DELIMITER, chunk)
}

/// Split `buf` after its first delimiter. Without one, everything is the
/// first record.
#[must_use]
pub fn split_first_record(buf: &[u8]) -> (&[u8], &[u8]) {
    match find_delimiter(buf) {
        Some(pos) => buf.split_at(pos + 1),
        None => (buf, &buf[buf.len()..]),
    }
}

/// Length of `buf` up to and including its last delimiter.
#[must_use]
pub fn complete_len(buf: &[u8]) -> Option<usize> {
    memrchr(RECORD_DELIMITER, buf).map(|pos| pos + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seekto_is_parsed_in_device_mode() {
        assert_eq!(
            Request::parse(b"SEEKTO:1,3\n", true).unwrap(),
            Request::SeekTo(SeekTo::new(1, 3))
        );
        assert_eq!(
            Request::parse(b"SEEKTO:12, 40\r\n", true).unwrap(),
            Request::SeekTo(SeekTo::new(12, 40))
        );
    }

    #[test]
    fn seekto_is_data_in_log_mode() {
        let record = b"SEEKTO:1,3\n";
        assert_eq!(
            Request::parse(record, false).unwrap(),
            Request::Append(record)
        );
    }

    #[test]
    fn ordinary_records_append() {
        let record = b"hello\n";
        assert_eq!(Request::parse(record, true).unwrap(), Request::Append(record));
        // The prefix is case-sensitive and must start the record.
        let record = b"seekto:1,2\n";
        assert_eq!(Request::parse(record, true).unwrap(), Request::Append(record));
        let record = b" SEEKTO:1,2\n";
        assert_eq!(Request::parse(record, true).unwrap(), Request::Append(record));
    }

    #[test]
    fn malformed_seekto_is_invalid() {
        for record in [
            &b"SEEKTO:\n"[..],
            b"SEEKTO:1\n",
            b"SEEKTO:a,2\n",
            b"SEEKTO:1,-2\n",
            b"SEEKTO:1,2,3\n",
            b"SEEKTO:4294967296,0\n",
            b"SEEKTO:\xff,0\n",
        ] {
            let err = Request::parse(record, true).unwrap_err();
            assert!(err.is_invalid(), "{record:?} should be rejected");
        }
    }

    #[test]
    fn command_covers_only_first_record() {
        let received = b"SEEKTO:1,3\nhello\n";
        assert_eq!(
            Request::parse(received, true).unwrap(),
            Request::SeekTo(SeekTo::new(1, 3))
        );
        assert_eq!(
            split_first_record(received),
            (&b"SEEKTO:1,3\n"[..], &b"hello\n"[..])
        );

        // Later lines are never commands, and the first line still decides.
        let received = b"hello\nSEEKTO:0,0\n";
        assert_eq!(Request::parse(received, true).unwrap(), Request::Append(received));
        assert!(Request::parse(b"SEEKTO:x\nSEEKTO:0,0\n", true).unwrap_err().is_invalid());
    }

    #[test]
    fn delimiter_helpers() {
        assert_eq!(split_first_record(b"abc"), (&b"abc"[..], &b""[..]));
        assert_eq!(find_delimiter(b"ab\ncd\n"), Some(2));
        assert_eq!(find_delimiter(b"abcd"), None);
        assert_eq!(complete_len(b"ab\ncd\nef"), Some(6));
        assert_eq!(complete_len(b"ef"), None);
    }
}
