//! Concurrent writers and readers against one shared device.

use std::io::Read;
use std::sync::{Arc, Barrier};
use std::thread;

use ringlog_buffer::CharDevice;

// ─── Helpers ───────────────────────────────────────────────────────────

fn records(snapshot: &[u8]) -> Vec<String> {
    String::from_utf8(snapshot.to_vec())
        .unwrap()
        .split_inclusive('\n')
        .map(str::to_owned)
        .collect()
}

fn is_well_formed(record: &str) -> bool {
    let Some(body) = record.strip_suffix('\n') else {
        return false;
    };
    let Some((writer, seq)) = body.split_once('-') else {
        return false;
    };
    writer.starts_with('w') && seq.parse::<u32>().is_ok()
}

// ─── Tests ─────────────────────────────────────────────────────────────

#[test]
fn concurrent_whole_record_writes_never_interleave() {
    let n_threads = 8;
    let per_thread = 50;
    let dev = Arc::new(CharDevice::new(n_threads * per_thread).unwrap());
    let barrier = Arc::new(Barrier::new(n_threads));

    let handles: Vec<_> = (0..n_threads)
        .map(|tid| {
            let dev = Arc::clone(&dev);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for seq in 0..per_thread {
                    dev.write(format!("w{tid}-{seq}\n").as_bytes()).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("writer thread should complete");
    }

    let all = records(&dev.snapshot());
    assert_eq!(all.len(), n_threads * per_thread);
    assert!(all.iter().all(|r| is_well_formed(r)));

    // Per-writer order is preserved.
    for tid in 0..n_threads {
        let prefix = format!("w{tid}-");
        let seqs: Vec<u32> = all
            .iter()
            .filter_map(|r| r.strip_prefix(&prefix))
            .map(|r| r.trim_end().parse().unwrap())
            .collect();
        assert_eq!(seqs, (0..per_thread as u32).collect::<Vec<_>>());
    }
}

#[test]
fn readers_only_see_complete_records_while_ring_wraps() {
    let dev = Arc::new(CharDevice::new(4).unwrap());
    let barrier = Arc::new(Barrier::new(2));

    let writer = {
        let dev = Arc::clone(&dev);
        let barrier = Arc::clone(&barrier);
        thread::spawn(move || {
            barrier.wait();
            for seq in 0..500 {
                dev.write(format!("w0-{seq}\n").as_bytes()).unwrap();
            }
        })
    };

    barrier.wait();
    for _ in 0..200 {
        // Every snapshot is taken under the device lock.
        let snapshot = dev.snapshot();
        let all = records(&snapshot);
        assert!(all.len() <= 4);
        assert!(all.iter().all(|r| is_well_formed(r)));
    }
    writer.join().expect("writer thread should complete");

    let mut out = String::new();
    dev.open().read_to_string(&mut out).unwrap();
    assert_eq!(out, "w0-496\nw0-497\nw0-498\nw0-499\n");
}
