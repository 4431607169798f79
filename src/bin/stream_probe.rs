use anyhow::{Context, Result};
use clap::Parser;
use std::io::Write;
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

use packetwatch::models::config::DEFAULT_ENDPOINT;
use packetwatch::models::event::{NetworkEvent, Severity};
use packetwatch::stream::transport::{Connector, WebSocketConnector};
use packetwatch::telemetry::{classifier, normalizer};
use packetwatch::utils::error::AppError;
use packetwatch::utils::logging;

/// Connects to a telemetry stream and prints classified events as they arrive
#[derive(Parser, Debug)]
#[clap(author, version, about = "Print classified events from a telemetry stream")]
struct Args {
    /// Telemetry stream URL
    #[clap(default_value = DEFAULT_ENDPOINT)]
    endpoint: String,

    /// Stop after this many frames
    #[clap(short, long)]
    count: Option<usize>,

    /// Only print anomalous events
    #[clap(short, long)]
    anomalies_only: bool,

    /// Log level (trace, debug, info, warn, error, off)
    #[clap(long, default_value = "warn")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    logging::init_logger(logging::get_log_level(&args.log_level));

    let mut source = WebSocketConnector
        .open(&args.endpoint)
        .await
        .with_context(|| format!("could not connect to {}", args.endpoint))?;
    println!("Connected to {}", args.endpoint);

    let mut stdout = StandardStream::stdout(ColorChoice::Auto);
    let mut seen = 0usize;
    let mut dropped = 0usize;

    while let Some(frame) = source.next_frame().await {
        let text = match frame {
            Ok(text) => text,
            Err(AppError::FrameParse(reason)) => {
                dropped += 1;
                eprintln!("dropped frame: {}", reason);
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        let event = match normalizer::parse_record(&text) {
            Ok(record) => classifier::annotate(normalizer::normalize(&record)),
            Err(e) => {
                dropped += 1;
                eprintln!("dropped frame: {}", e);
                continue;
            }
        };
        seen += 1;

        if !args.anomalies_only || event.anomaly {
            print_event(&mut stdout, &event)?;
        }
        if args.count.map_or(false, |limit| seen >= limit) {
            break;
        }
    }

    source.close().await.ok();
    println!("{} events, {} dropped frames", seen, dropped);
    Ok(())
}

fn severity_color(severity: Option<Severity>) -> Option<Color> {
    match severity {
        Some(Severity::High) => Some(Color::Red),
        Some(Severity::Medium) => Some(Color::Yellow),
        Some(Severity::Low) => Some(Color::Cyan),
        None => None,
    }
}

fn print_event(out: &mut StandardStream, event: &NetworkEvent) -> std::io::Result<()> {
    out.set_color(ColorSpec::new().set_fg(severity_color(event.severity)).set_bold(event.anomaly))?;
    write!(
        out,
        "{} {:<8} {} -> {} {}B",
        event.timestamp.format("%H:%M:%S%.3f"),
        event.protocol,
        event.source,
        event.destination,
        event.byte_size
    )?;
    if event.size_inferred {
        write!(out, " (inferred)")?;
    }
    if let Some(severity) = event.severity {
        let rules: Vec<&str> = classifier::triggered_rules(event)
            .iter()
            .map(|rule| rule.description())
            .collect();
        write!(out, " [{}] {}", severity, rules.join(", "))?;
    }
    out.reset()?;
    writeln!(out)
}
