//! Atlink CLI - AT-command modem terminal
//!
//! Sends AT commands and SMS through a serial modem and prints everything the
//! modem reports, including incoming messages.

use anyhow::Context;
use atlink_core::config;
use atlink_core::core::transport::list_ports;
use atlink_core::{
    AppConfig, AtSession, CliResult, ConfigError, ExitCodes, SerialTransport, SessionError, SessionEvent,
};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

type Session = AtSession<SerialTransport>;

/// CLI output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    /// Human-readable text
    Text,
    /// JSON lines for scripting
    Json,
}

/// Atlink CLI
#[derive(Parser, Debug)]
#[command(
    name = "atlink",
    version,
    about = "AT-command modem terminal with SMS support",
    long_about = None
)]
struct Cli {
    /// Configuration file
    #[arg(short, long, env = "ATLINK_CONFIG")]
    config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Quiet mode (modem responses and errors only)
    #[arg(short, long)]
    quiet: bool,

    /// Also write a daily log file (configured directory, or the platform log directory)
    #[arg(long)]
    log_file: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug, Clone)]
struct PortArgs {
    /// Serial port name (e.g., COM3, /dev/ttyUSB0); defaults to the configured port
    #[arg(short, long)]
    port: Option<String>,

    /// Baud rate; defaults to the configured rate
    #[arg(short, long)]
    baud: Option<u32>,
}

impl PortArgs {
    fn resolve(&self, config: &AppConfig) -> (String, u32) {
        (
            self.port.clone().unwrap_or_else(|| config.serial.port.clone()),
            self.baud.unwrap_or(config.serial.baud_rate),
        )
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List available serial ports
    ListPorts,

    /// Interactive session: stdin lines are sent as commands
    ///
    /// `:N` sends preset N, `:sms TEXT` sends an SMS to the configured number.
    Monitor {
        #[command(flatten)]
        port: PortArgs,
    },

    /// Send one command and print the responses
    Send {
        #[command(flatten)]
        port: PortArgs,

        /// How long to collect responses (ms)
        #[arg(short, long, default_value = "1000")]
        wait: u64,

        /// Command text, e.g. AT+CSQ
        text: String,
    },

    /// Send an SMS
    Sms {
        #[command(flatten)]
        port: PortArgs,

        /// Destination number (overrides the configured one)
        #[arg(long)]
        to: Option<String>,

        /// Service center address (overrides the configured one)
        #[arg(long)]
        sca: Option<String>,

        /// How long to collect responses after sending (ms)
        #[arg(short, long, default_value = "3000")]
        wait: u64,

        /// Message text
        body: String,
    },

    /// List configured command presets
    Presets,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the configuration file path
    Path,
    /// Print the effective configuration
    Show,
    /// Create the configuration file with defaults if missing
    Init,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let (config, config_path) = match load_config(&cli) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("Error: {}", e);
            return CliResult::from(&e).to_exit_code();
        }
    };

    let _log_guard = init_tracing(&cli, &config);
    tracing::debug!("Starting atlink v{}", atlink_core::VERSION);

    let result = match &cli.command {
        Commands::ListPorts => list(&cli),
        Commands::Monitor { port } => monitor(&cli, &config, port).await,
        Commands::Send { port, wait, text } => send(&cli, &config, port, *wait, text).await,
        Commands::Sms { port, to, sca, wait, body } => {
            sms(&cli, &config, port, to.as_deref(), sca.as_deref(), *wait, body).await
        }
        Commands::Presets => presets(&cli, &config),
        Commands::Config { action } => config_command(action, &config, &config_path),
    };

    match &result {
        CliResult::Success(Some(msg)) if !cli.quiet => println!("{}", msg),
        CliResult::Error(_, msg) => eprintln!("Error: {}", msg),
        _ => {}
    }
    result.to_exit_code()
}

fn load_config(cli: &Cli) -> Result<(AppConfig, PathBuf), ConfigError> {
    let path = match &cli.config {
        Some(path) => path.clone(),
        None => config::config_path().ok_or(ConfigError::NoConfigDir)?,
    };
    let config = AppConfig::load_or_init(&path)?;
    Ok((config, path))
}

fn init_tracing(cli: &Cli, config: &AppConfig) -> Option<WorkerGuard> {
    let level = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        config.logging.level.as_str()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let stderr = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let directory = match &config.logging.directory {
        Some(dir) => Some(dir.clone()),
        None if cli.log_file => config::log_dir(),
        None => None,
    };

    match directory {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "atlink.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr)
                .with(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(writer))
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry().with(filter).with(stderr).init();
            None
        }
    }
}

fn build_session(config: &AppConfig) -> (Arc<Session>, mpsc::UnboundedReceiver<SessionEvent>) {
    let session = AtSession::with_transport(SerialTransport::new(config.serial.line_config()));
    session.set_sms_profile(config.sms.clone());

    let (tx, rx) = mpsc::unbounded_channel();
    session.set_log_callback(move |event| {
        let _ = tx.send(event.clone());
    });

    (Arc::new(session), rx)
}

async fn run_blocking<R, F>(f: F) -> anyhow::Result<R>
where
    R: Send + 'static,
    F: FnOnce() -> R + Send + 'static,
{
    tokio::task::spawn_blocking(f).await.context("session worker failed")
}

async fn connect(session: &Arc<Session>, port: String, baud: u32) -> Result<(), CliResult> {
    let worker = session.clone();
    match run_blocking(move || worker.connect(&port, baud)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(CliResult::from(&e)),
        Err(e) => Err(CliResult::error(ExitCodes::INTERNAL_ERROR, e.to_string())),
    }
}

fn report_stats(cli: &Cli, session: &Session) {
    if !cli.verbose {
        return;
    }
    let stats = session.transport().stats();
    eprintln!(
        "Sent {} bytes in {} writes, received {} bytes in {} chunks",
        stats.bytes_sent, stats.packets_sent, stats.bytes_received, stats.packets_received
    );
}

fn is_response(event: &SessionEvent) -> bool {
    matches!(
        event,
        SessionEvent::LineReceived { .. } | SessionEvent::SmsReceived(_)
    )
}

fn print_event(cli: &Cli, event: &SessionEvent) {
    if cli.quiet && !is_response(event) {
        return;
    }
    let now = chrono::Local::now();

    match cli.format {
        OutputFormat::Json => {
            let mut value = serde_json::to_value(event).unwrap_or_default();
            if let Some(map) = value.as_object_mut() {
                map.insert("timestamp".to_string(), now.to_rfc3339().into());
            }
            println!("{}", value);
        }
        OutputFormat::Text => {
            let stamp = now.format("%H:%M:%S%.3f");
            match event {
                SessionEvent::SmsReceived(sms) => {
                    println!("[{}] SMS {}", stamp, sms.header);
                    println!("             {}", sms.body);
                }
                other => println!("[{}] {}", stamp, other),
            }
        }
    }
}

async fn print_for(cli: &Cli, events: &mut mpsc::UnboundedReceiver<SessionEvent>, window: Duration) {
    let deadline = tokio::time::Instant::now() + window;
    while let Ok(Some(event)) = tokio::time::timeout_at(deadline, events.recv()).await {
        print_event(cli, &event);
    }
}

fn drain(cli: &Cli, events: &mut mpsc::UnboundedReceiver<SessionEvent>) {
    while let Ok(event) = events.try_recv() {
        print_event(cli, &event);
    }
}

fn list(cli: &Cli) -> CliResult {
    let ports = match list_ports() {
        Ok(ports) => ports,
        Err(e) => return CliResult::from(&e),
    };

    if ports.is_empty() {
        return CliResult::success_with_message("No serial ports found.");
    }

    match cli.format {
        OutputFormat::Json => {
            let json: Vec<serde_json::Value> = ports
                .iter()
                .map(|p| {
                    serde_json::json!({
                        "name": p.port_name,
                        "type": format!("{:?}", p.port_type)
                    })
                })
                .collect();
            println!("{}", serde_json::Value::Array(json));
        }
        OutputFormat::Text => {
            for port in &ports {
                println!("{}", port.port_name);
            }
        }
    }
    CliResult::success()
}

enum MonitorInput<'a> {
    Command(&'a str),
    Preset(usize),
    Sms(&'a str),
}

fn parse_monitor_input(line: &str) -> Option<MonitorInput<'_>> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    match line.strip_prefix(':') {
        Some(rest) => {
            if let Some(body) = rest.strip_prefix("sms ") {
                Some(MonitorInput::Sms(body))
            } else {
                rest.trim().parse().ok().map(MonitorInput::Preset)
            }
        }
        None => Some(MonitorInput::Command(line)),
    }
}

async fn monitor(cli: &Cli, config: &AppConfig, port: &PortArgs) -> CliResult {
    let (port, baud) = port.resolve(config);
    let (session, mut events) = build_session(config);
    if let Err(result) = connect(&session, port.clone(), baud).await {
        return result;
    }
    if !cli.quiet {
        eprintln!("Connected to {} @ {} baud. Ctrl-C to exit.", port, baud);
    }

    let presets: Vec<String> = config.presets().map(|p| p.text.clone()).collect();
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            Some(event) = events.recv() => print_event(cli, &event),
            line = stdin.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        tracing::error!("stdin: {}", e);
                        break;
                    }
                };

                let worker = session.clone();
                let outcome = match parse_monitor_input(&line) {
                    None => continue,
                    Some(MonitorInput::Command(text)) => {
                        let text = text.to_string();
                        run_blocking(move || worker.send_command(&text)).await
                    }
                    Some(MonitorInput::Sms(body)) => {
                        let body = body.to_string();
                        run_blocking(move || worker.send_sms(&body)).await
                    }
                    Some(MonitorInput::Preset(n)) => match n.checked_sub(1).and_then(|i| presets.get(i)) {
                        Some(text) => {
                            let text = text.clone();
                            run_blocking(move || worker.send_command(&text)).await
                        }
                        None => {
                            eprintln!("No preset #{}", n);
                            continue;
                        }
                    },
                };

                match outcome {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => eprintln!("Error: {}", e),
                    Err(e) => return CliResult::error(ExitCodes::INTERNAL_ERROR, e.to_string()),
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    session.disconnect();
    drain(cli, &mut events);
    report_stats(cli, &session);
    CliResult::success()
}

async fn send(cli: &Cli, config: &AppConfig, port: &PortArgs, wait: u64, text: &str) -> CliResult {
    let (port, baud) = port.resolve(config);
    let (session, mut events) = build_session(config);
    if let Err(result) = connect(&session, port, baud).await {
        return result;
    }
    drain(cli, &mut events);

    let worker = session.clone();
    let text = text.to_string();
    let result = match run_blocking(move || worker.send_command(&text)).await {
        Ok(Ok(())) => {
            print_for(cli, &mut events, Duration::from_millis(wait)).await;
            CliResult::success()
        }
        Ok(Err(e)) => CliResult::from(&e),
        Err(e) => CliResult::error(ExitCodes::INTERNAL_ERROR, e.to_string()),
    };

    session.disconnect();
    drain(cli, &mut events);
    report_stats(cli, &session);
    result
}

async fn sms(
    cli: &Cli,
    config: &AppConfig,
    port: &PortArgs,
    to: Option<&str>,
    sca: Option<&str>,
    wait: u64,
    body: &str,
) -> CliResult {
    let (port, baud) = port.resolve(config);
    let (session, mut events) = build_session(config);

    let mut profile = config.sms.clone();
    if let Some(to) = to {
        profile.target_number = to.to_string();
    }
    if let Some(sca) = sca {
        profile.service_center = sca.to_string();
    }
    if profile.target_number.is_empty() {
        return CliResult::from(&SessionError::NoDestination);
    }
    session.set_sms_profile(profile);

    if let Err(result) = connect(&session, port, baud).await {
        return result;
    }
    drain(cli, &mut events);

    let worker = session.clone();
    let body = body.to_string();
    let result = match run_blocking(move || worker.send_sms(&body)).await {
        Ok(Ok(())) => {
            print_for(cli, &mut events, Duration::from_millis(wait)).await;
            CliResult::success()
        }
        Ok(Err(e)) => CliResult::from(&e),
        Err(e) => CliResult::error(ExitCodes::INTERNAL_ERROR, e.to_string()),
    };

    session.disconnect();
    drain(cli, &mut events);
    report_stats(cli, &session);
    result
}

fn presets(cli: &Cli, config: &AppConfig) -> CliResult {
    match cli.format {
        OutputFormat::Json => {
            let items: Vec<serde_json::Value> = config
                .presets()
                .enumerate()
                .map(|(i, item)| {
                    serde_json::json!({
                        "index": i + 1,
                        "text": item.text,
                        "summary": item.summary,
                    })
                })
                .collect();
            println!("{}", serde_json::Value::Array(items));
        }
        OutputFormat::Text => {
            let mut index = 0;
            for item in &config.commands {
                if item.is_separator() {
                    println!();
                    continue;
                }
                index += 1;
                println!("{:>3}  {:<24} {}", index, item.text, item.summary);
            }
        }
    }
    CliResult::success()
}

fn config_command(action: &ConfigAction, config: &AppConfig, path: &Path) -> CliResult {
    match action {
        ConfigAction::Path => CliResult::success_with_message(path.display().to_string()),
        ConfigAction::Show => match toml::to_string_pretty(config) {
            Ok(text) => {
                print!("{}", text);
                CliResult::success()
            }
            Err(e) => CliResult::error(ExitCodes::CONFIG_ERROR, e.to_string()),
        },
        ConfigAction::Init => CliResult::success_with_message(format!("Configuration at {}", path.display())),
    }
}
