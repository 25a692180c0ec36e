use std::env;
use std::fs::OpenOptions;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Mutex;

use ringlog_server::{Server, ServerConfig, SignalWatcher, StoreMode};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Default)]
struct CliArgs {
    config_path: Option<PathBuf>,
    daemon: bool,
    port: Option<u16>,
    bind: Option<IpAddr>,
    device: bool,
    capacity: Option<usize>,
    data_file: Option<PathBuf>,
    timestamp_interval_secs: Option<u64>,
    log_file: Option<PathBuf>,
}

fn print_help() {
    let help = "\
ringlogd - newline-delimited record log server

USAGE:
    ringlogd [OPTIONS]

OPTIONS:
    -d                              Run as a daemon after binding
    --config <PATH>                 TOML configuration file
    --port <N>                      Listening port (default 9000)
    --bind <ADDR>                   Listening address (default 0.0.0.0)
    --device                        Keep the log in the bounded ring device
    --capacity <N>                  Ring slots in device mode (default 10)
    --data-file <PATH>              Log file (default /var/tmp/aesdsocketdata)
    --timestamp-interval <SECS>     Timestamp period in log mode, 0 disables (default 10)
    --log-file <PATH>               Write diagnostics here instead of stderr
    -h, --help                      Show this help

Diagnostics are filtered with RUST_LOG (default info).
";
    println!("{help}");
}

fn take_value<'a>(args: &'a [String], index: &mut usize, flag: &str) -> Result<&'a str, String> {
    *index += 1;
    args.get(*index)
        .map(String::as_str)
        .ok_or_else(|| format!("{flag} requires a value"))
}

fn parse_number<T: std::str::FromStr>(value: &str, flag: &str) -> Result<T, String> {
    value
        .parse::<T>()
        .map_err(|_| format!("invalid {flag} value: {value}"))
}

fn parse_args(args: &[String]) -> Result<CliArgs, String> {
    let mut cli = CliArgs::default();
    let mut index = 0;
    while index < args.len() {
        match args[index].as_str() {
            "-d" => cli.daemon = true,
            "--device" => cli.device = true,
            "--config" => {
                cli.config_path = Some(PathBuf::from(take_value(args, &mut index, "--config")?));
            }
            "--port" => {
                let value = take_value(args, &mut index, "--port")?;
                cli.port = Some(parse_number(value, "--port")?);
            }
            "--bind" => {
                let value = take_value(args, &mut index, "--bind")?;
                cli.bind = Some(parse_number(value, "--bind")?);
            }
            "--capacity" => {
                let value = take_value(args, &mut index, "--capacity")?;
                cli.capacity = Some(parse_number(value, "--capacity")?);
            }
            "--data-file" => {
                cli.data_file = Some(PathBuf::from(take_value(args, &mut index, "--data-file")?));
            }
            "--timestamp-interval" => {
                let value = take_value(args, &mut index, "--timestamp-interval")?;
                cli.timestamp_interval_secs = Some(parse_number(value, "--timestamp-interval")?);
            }
            "--log-file" => {
                cli.log_file = Some(PathBuf::from(take_value(args, &mut index, "--log-file")?));
            }
            "-h" | "--help" => {
                print_help();
                return Err(String::new());
            }
            unknown => return Err(format!("unknown option: {unknown}")),
        }
        index += 1;
    }
    Ok(cli)
}

/// File values first, then flags on top.
fn resolve_config(cli: &CliArgs) -> Result<ServerConfig, String> {
    let mut config = match &cli.config_path {
        Some(path) => ServerConfig::load(path).map_err(|err| err.to_string())?,
        None => ServerConfig::default(),
    };
    if let Some(ip) = cli.bind {
        config.bind_addr = SocketAddr::new(ip, config.bind_addr.port());
    }
    if let Some(port) = cli.port {
        config.bind_addr.set_port(port);
    }
    if cli.device {
        config.mode = StoreMode::Device;
    }
    if let Some(capacity) = cli.capacity {
        config.device_capacity = capacity;
    }
    if let Some(path) = &cli.data_file {
        config.data_file.clone_from(path);
    }
    if let Some(secs) = cli.timestamp_interval_secs {
        config.timestamp_interval_secs = secs;
    }
    if cli.log_file.is_some() {
        config.log_file.clone_from(&cli.log_file);
    }
    config.daemon |= cli.daemon;
    config.validate().map_err(|err| err.to_string())?;
    Ok(config)
}

fn init_tracing(log_file: Option<&Path>) -> Result<(), String> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_thread_names(true);
    let result = match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|err| format!("cannot open log file {}: {err}", path.display()))?;
            builder
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init()
        }
        None => builder.with_writer(std::io::stderr).try_init(),
    };
    result.map_err(|err| format!("tracing init failed: {err}"))
}

fn serve(config: ServerConfig) -> ExitCode {
    let mut server = match Server::bind(config.clone()) {
        Ok(server) => server,
        Err(err) => {
            tracing::error!(error = %err, "startup failed");
            return ExitCode::from(1);
        }
    };
    if config.daemon {
        if let Err(err) = server.detach() {
            tracing::error!(error = %err, "daemonize failed");
            return ExitCode::from(1);
        }
    }
    let watcher = match SignalWatcher::install(server.shutdown_trigger()) {
        Ok(watcher) => watcher,
        Err(err) => {
            tracing::error!(error = %err, "cannot install signal watcher");
            return ExitCode::from(1);
        }
    };

    let report = server.run();
    if let Err(err) = watcher.stop() {
        tracing::warn!(error = %err, "signal watcher stop failed");
    }
    if report.is_success() {
        ExitCode::SUCCESS
    } else {
        for failure in &report.step_failures {
            tracing::error!(step = %failure, "shutdown incomplete");
        }
        ExitCode::from(1)
    }
}

fn main() -> ExitCode {
    let args: Vec<String> = env::args().skip(1).collect();
    let config = match parse_args(&args).and_then(|cli| resolve_config(&cli)) {
        Ok(config) => config,
        Err(error) if error.is_empty() => return ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("ERROR ringlogd: {error}");
            return ExitCode::from(2);
        }
    };
    if let Err(error) = init_tracing(config.log_file.as_deref()) {
        eprintln!("ERROR ringlogd: {error}");
        return ExitCode::from(2);
    }
    serve(config)
}
