// src/cli.rs
//
// Command-line front end: monitor, relay, replay, send, list-ports.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};

use crate::display::{
    format_message, format_message_json, format_summary_json, format_totals,
};
use crate::io::file::FileConnector;
use crate::io::serial::{list_serial_ports, Parity, SerialConnector};
use crate::io::{
    decode, encode, Connector, ConsumerSummary, LinkEvent, LinkSummary, Monitor, Relay,
    Termination,
};
use crate::logging::{init_file_logging, stop_file_logging};
use crate::settings::TapSettings;

#[derive(Parser, Debug)]
#[command(name = "ttytap", version, about = "Capture, deduplicate and relay 0x55-framed serial traffic")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// TOML settings file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Baud rate (overrides settings)
    #[arg(long, global = true)]
    pub baud: Option<u32>,

    /// Parity: none, odd, even (overrides settings)
    #[arg(long, global = true)]
    pub parity: Option<Parity>,

    /// Write a log file into this directory
    #[arg(long, global = true)]
    pub log_dir: Option<PathBuf>,

    /// Emit one JSON object per line instead of text
    #[arg(long, global = true)]
    pub json: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print novel frames seen on one port
    Monitor {
        port: String,
        /// Dedup window in seconds (0 disables)
        #[arg(long)]
        dedup: Option<f64>,
    },
    /// Relay frames between two ports, passing everything else through raw
    Relay { port_a: String, port_b: String },
    /// Decode a captured byte dump
    Replay {
        file: PathBuf,
        /// Dedup window in seconds (0 disables)
        #[arg(long)]
        dedup: Option<f64>,
    },
    /// Send one frame with the given hex payload
    Send { port: String, payload: String },
    /// List serial ports
    ListPorts,
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    let result = execute(cli);
    stop_file_logging();
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("ttytap: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn execute(cli: Cli) -> Result<(), String> {
    let mut settings = match cli.config {
        Some(ref path) => TapSettings::load(path).map_err(|e| e.to_string())?,
        None => TapSettings::default(),
    };
    if let Some(baud) = cli.baud {
        settings.baud_rate = baud;
    }
    if let Some(parity) = cli.parity {
        settings.parity = parity;
    }
    if let Some(ref dir) = cli.log_dir {
        settings.log_dir = Some(dir.clone());
    }
    match cli.command {
        Command::Monitor { dedup: Some(secs), .. } | Command::Replay { dedup: Some(secs), .. } => {
            settings.dedup_lifetime_secs = secs;
        }
        _ => {}
    }
    settings.validate().map_err(|e| e.to_string())?;

    if let Some(ref dir) = settings.log_dir {
        init_file_logging(dir)
            .map_err(|e| format!("cannot log to {}: {}", dir.display(), e))?;
    }

    let output = Output { json: cli.json };
    match cli.command {
        Command::Monitor { port, .. } => {
            let connector = Arc::new(SerialConnector::new(settings.serial_config()));
            monitor(&port, settings.dedup_lifetime(), connector, output, LinkEnd::Closed)
        }
        Command::Replay { file, .. } => {
            let name = file.display().to_string();
            let connector = Arc::new(FileConnector);
            // Running off the end of the file is how a replay finishes
            monitor(&name, settings.dedup_lifetime(), connector, output, LinkEnd::EndOfStream)
        }
        Command::Relay { port_a, port_b } => {
            let connector = Arc::new(SerialConnector::new(settings.serial_config()));
            relay(&port_a, &port_b, connector, output)
        }
        Command::Send { port, payload } => {
            let connector = SerialConnector::new(settings.serial_config());
            send(&port, &payload, &connector)
        }
        Command::ListPorts => list_ports(output),
    }
}

#[derive(Clone, Copy)]
struct Output {
    json: bool,
}

impl Output {
    fn event(&self, event: &LinkEvent) {
        if let LinkEvent::Message(message) = event {
            if self.json {
                println!("{}", format_message_json(message));
            } else {
                println!("{}", format_message(message));
            }
        }
    }

    fn summary(&self, links: &[LinkSummary], consumer: &ConsumerSummary) {
        if self.json {
            println!("{}", format_summary_json(links, consumer));
        } else {
            println!("{}", format_totals(links));
        }
    }
}

/// How a link is expected to end when nothing went wrong.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum LinkEnd {
    /// Only a caller-initiated close is clean
    Closed,
    /// End of stream is the normal finish (replay files)
    EndOfStream,
}

/// Fail with the links whose sessions ended in error.
fn check_links(links: &[LinkSummary], expected: LinkEnd) -> Result<(), String> {
    let failed: Vec<String> = links
        .iter()
        .filter_map(|l| match l.termination {
            Some(Termination::Disconnected) if expected == LinkEnd::EndOfStream => None,
            Some(ref t) if t.is_error() => Some(format!("{} {}", l.link, t)),
            _ => None,
        })
        .collect();
    if failed.is_empty() {
        Ok(())
    } else {
        Err(failed.join(", "))
    }
}

fn monitor(
    link: &str,
    lifetime: Duration,
    connector: Arc<dyn Connector>,
    output: Output,
    expected: LinkEnd,
) -> Result<(), String> {
    let mut monitor = Monitor::new(link, lifetime, connector);
    monitor.start().map_err(|e| e.to_string())?;

    let consumer = monitor.run(|event| output.event(event));
    let summary = monitor.close();
    let links = std::slice::from_ref(&summary);
    output.summary(links, &consumer);
    check_links(links, expected)
}

fn relay(
    port_a: &str,
    port_b: &str,
    connector: Arc<dyn Connector>,
    output: Output,
) -> Result<(), String> {
    let mut relay = Relay::new(port_a, port_b, connector);
    if let Err(e) = relay.start() {
        // Close whichever side did open
        relay.close();
        return Err(e.to_string());
    }

    let consumer = relay.run(|event| output.event(event));
    let links = relay.close();
    output.summary(&links, &consumer);
    check_links(&links, LinkEnd::Closed)
}

fn send(port: &str, payload_hex: &str, connector: &dyn Connector) -> Result<(), String> {
    let payload = hex::decode(payload_hex.trim().replace(' ', ""))
        .map_err(|e| format!("Invalid hex payload: {}", e))?;
    let frame = encode(&payload).map_err(|e| e.to_string())?;

    let transport = connector.open(port).map_err(|e| e.to_string())?;
    let result = transport.write_all(&frame);
    transport.close();
    result.map_err(|e| e.to_string())?;

    if let Some(decoded) = decode(&frame) {
        println!(
            "sent {} byte frame to {}: {} ({:?})",
            frame.len(),
            transport.name(),
            hex::encode(&frame),
            decoded
        );
    }
    Ok(())
}

fn list_ports(output: Output) -> Result<(), String> {
    let ports = list_serial_ports().map_err(|e| e.to_string())?;
    if ports.is_empty() && !output.json {
        println!("no serial ports found");
    }
    for port in ports {
        if output.json {
            println!("{}", serde_json::to_string(&port).map_err(|e| e.to_string())?);
        } else {
            println!("{}", port.summary());
        }
    }
    Ok(())
}
