//! peerpad CLI
//!
//! Thin wrapper around peerpad-core: start one side of a peer pair, then
//! type lines to update the shared text.
//!
//! ## Usage
//!
//! ```bash
//! # Wait for a peer on the default port (5000)
//! peerpad serve
//!
//! # Connect to a waiting peer
//! peerpad connect 192.168.1.101
//!
//! # Talk to a peer running the older untagged protocol on port 8080
//! peerpad --legacy connect 192.168.1.101
//!
//! # Emit events as JSON lines for another program
//! peerpad --json serve
//! ```
//!
//! While connected, every input line becomes the new full text. Lines
//! starting with `/` are commands:
//!
//! - `/loc <lat> <lon>` sends a location reading
//! - `/raw <text>` sends an untyped payload
//! - `/status` prints the connection state and shared text
//! - `/quit` closes the connection

use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use peerpad_core::{
    ConnectionEvent, ConnectionState, Coordinates, FixedLocation, Peer, PeerConfig, PeerRole,
    Scheme, TextSync,
};
use tokio::io::AsyncBufReadExt;
use tokio::sync::broadcast;

/// peerpad - live text and location sharing between two peers
#[derive(Parser)]
#[command(name = "peerpad")]
#[command(version = "0.1.0")]
#[command(about = "peerpad - live text and location sharing between two peers")]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Print connection events as JSON lines
    #[arg(long, global = true)]
    json: bool,

    /// Start from the legacy preset (port 8080, untagged, full replace)
    #[arg(long, global = true)]
    legacy: bool,

    /// TCP port to listen on or connect to
    #[arg(short, long, global = true)]
    port: Option<u16>,

    /// Payload scheme
    #[arg(long, value_enum, global = true)]
    scheme: Option<SchemeArg>,

    /// How local edits are mirrored
    #[arg(long, value_enum, global = true)]
    text_sync: Option<TextSyncArg>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Wait for a peer to connect
    Serve,

    /// Connect to a waiting peer
    Connect {
        /// Host name or IP address of the serving peer
        host: String,

        /// Give up connecting after this many seconds
        #[arg(long)]
        timeout_secs: Option<u64>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum SchemeArg {
    Tagged,
    Untagged,
}

impl From<SchemeArg> for Scheme {
    fn from(arg: SchemeArg) -> Self {
        match arg {
            SchemeArg::Tagged => Scheme::Tagged,
            SchemeArg::Untagged => Scheme::Untagged,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum TextSyncArg {
    Diff,
    Replace,
}

impl From<TextSyncArg> for TextSync {
    fn from(arg: TextSyncArg) -> Self {
        match arg {
            TextSyncArg::Diff => TextSync::Diff,
            TextSyncArg::Replace => TextSync::Replace,
        }
    }
}

fn setup_logging(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    // stdout carries session output
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .init();
}

/// Build the peer configuration: preset first, then explicit overrides
fn build_config(cli: &Cli) -> PeerConfig {
    let mut config = if cli.legacy {
        PeerConfig::legacy()
    } else {
        PeerConfig::default()
    };

    if let Some(port) = cli.port {
        config = config.with_port(port);
    }
    if let Some(scheme) = cli.scheme {
        config = config.with_scheme(scheme.into());
    }
    if let Some(text_sync) = cli.text_sync {
        config = config.with_text_sync(text_sync.into());
    }
    if let Commands::Connect {
        timeout_secs: Some(secs),
        ..
    } = cli.command
    {
        config = config.with_connect_timeout(Duration::from_secs(secs));
    }

    config
}

/// Parse the arguments of `/loc <lat> <lon>`
fn parse_coordinates(args: &str) -> Result<Coordinates> {
    let mut parts = args.split_whitespace();
    let (Some(lat), Some(lon), None) = (parts.next(), parts.next(), parts.next()) else {
        anyhow::bail!("Usage: /loc <lat> <lon>");
    };

    let lat: f64 = lat
        .parse()
        .with_context(|| format!("Invalid latitude '{}'", lat))?;
    let lon: f64 = lon
        .parse()
        .with_context(|| format!("Invalid longitude '{}'", lon))?;
    Ok(Coordinates::new(lat, lon)?)
}

fn print_status(peer: &Peer) {
    let connection = peer.connection();
    println!("Role: {}", peer.role());
    println!("State: {}", peer.state());
    if let Some(addr) = connection.local_addr() {
        println!("Local: {}", addr);
    }
    if let Some(addr) = connection.remote_addr() {
        println!("Remote: {}", addr);
    }
    if let Some(location) = peer.location() {
        println!("Location: {}", location);
    }
    if let Some(error) = peer.last_error() {
        println!("Last error: {}", error);
    }
    println!("Text: {:?}", peer.text());
}

/// Handle one input line; returns false when the user asked to quit
async fn handle_line(peer: &Peer, line: &str) -> bool {
    let (command, args) = match line.split_once(' ') {
        Some((command, args)) => (command, args),
        None => (line, ""),
    };

    match command {
        "/quit" => return false,
        "/status" => print_status(peer),
        "/loc" => match parse_coordinates(args) {
            Ok(coords) => match peer.send_location(&FixedLocation(coords)).await {
                Ok(sent) => println!("Sent location {}", sent),
                Err(e) => eprintln!("Failed to send location: {}", e),
            },
            Err(e) => eprintln!("{:#}", e),
        },
        "/raw" => {
            if let Err(e) = peer.send_raw(args) {
                eprintln!("Failed to send: {}", e);
            }
        }
        _ => {
            if let Err(e) = peer.send_text(line) {
                eprintln!("Failed to send: {}", e);
            }
        }
    }
    true
}

fn print_event(event: &ConnectionEvent, json: bool) {
    if json {
        match serde_json::to_string(event) {
            Ok(line) => println!("{}", line),
            Err(e) => tracing::warn!(error = %e, "Failed to serialize event"),
        }
        return;
    }

    match event {
        ConnectionEvent::StateChanged { state } => println!("[{}]", state),
        ConnectionEvent::PeerConnected { addr } => println!("Peer connected: {}", addr),
        ConnectionEvent::PeerRejected { addr } => println!("Rejected extra peer: {}", addr),
        ConnectionEvent::TextChanged { content } => println!("Text: {}", content),
        ConnectionEvent::LocationReceived { location } => println!("Location: {}", location),
        ConnectionEvent::RawReceived { content } => println!("Peer: {}", content),
        ConnectionEvent::DecodeFailed { error } => eprintln!("Dropped frame: {}", error),
        ConnectionEvent::Failed { error } => eprintln!("Connection failed: {}", error),
    }
}

/// Pump stdin into the peer and events onto stdout until the session ends
async fn run_session(
    peer: &Peer,
    mut events: broadcast::Receiver<ConnectionEvent>,
    json: bool,
) -> Result<()> {
    let stdin = tokio::io::stdin();
    let reader = tokio::io::BufReader::new(stdin);
    let mut lines = reader.lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            line = lines.next_line(), if stdin_open => {
                match line {
                    Ok(Some(line)) => {
                        if !handle_line(peer, &line).await {
                            break;
                        }
                    }
                    Ok(None) => {
                        // keep mirroring the peer after input ends
                        stdin_open = false;
                    }
                    Err(e) => {
                        eprintln!("Read error: {}", e);
                        stdin_open = false;
                    }
                }
            }
            event = events.recv() => {
                match event {
                    Ok(event) => {
                        print_event(&event, json);
                        if matches!(
                            event,
                            ConnectionEvent::StateChanged { state: ConnectionState::Closed }
                        ) {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "Event output fell behind");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!();
                println!("Exiting...");
                break;
            }
        }
    }

    peer.shutdown().await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    let config = build_config(&cli);

    match &cli.command {
        Commands::Serve => {
            let peer = Peer::new(PeerRole::Server, config)?;
            let events = peer.subscribe();

            let addr = peer.listen().await?;
            if !cli.json {
                println!("Listening on {}", addr);
                println!("Waiting for a peer. Press Ctrl+C to stop.");
            }

            run_session(&peer, events, cli.json).await
        }

        Commands::Connect { host, .. } => {
            let port = config.port;
            let peer = Peer::new(PeerRole::Client, config)?;
            let events = peer.subscribe();

            let addr = peer.connect(host, port).await?;
            if !cli.json {
                println!("Connected to {}", addr);
                println!("Type to update the shared text. /quit to exit.");
            }

            run_session(&peer, events, cli.json).await
        }
    }
}
