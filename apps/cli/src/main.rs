use std::net::TcpListener;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hdp_core::protocol::hex::{from_hex, to_hex};
use hdp_core::{
    Action, ChannelDriver, DriverConfig, HdpEvent, HdpObserver, InvokeId, OutboundFrame,
    SessionState, SocketChannel, SystemIdentifier, TracingObserver, decode, handle,
};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about = "HDP Blood-Pressure Monitor Manager", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Accept device connections and run one session per connection
    Listen {
        /// Address the device bridge connects to
        #[arg(long, default_value = "127.0.0.1:6024")]
        bind: String,

        /// 16 hex digit system id sent in the association response
        #[arg(long)]
        system_id: SystemIdentifier,

        /// Driver configuration (TOML)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Exit after the first session
        #[arg(long)]
        once: bool,
    },
    /// Decode a hex frame dump and show how the engine would answer it
    Decode {
        /// Frame bytes as hex, e.g. "e2000000"
        hex: String,

        /// System id used for an association response
        #[arg(long, default_value = "0000000000000000")]
        system_id: SystemIdentifier,
    },
    /// Print the outbound frame templates
    Templates {
        #[arg(long)]
        system_id: SystemIdentifier,

        /// Invoke id for the data response, as 4 hex digits
        #[arg(long, default_value = "0000")]
        invoke_id: String,
    },
}

/// Prints readings on stdout and logs everything else.
struct ConsoleObserver;

impl HdpObserver for ConsoleObserver {
    fn on_event(&self, event: &HdpEvent) {
        if let HdpEvent::MeasurementReceived(m) = event {
            println!("{}", m);
        }
        TracingObserver.on_event(event);
    }
}

fn main() {
    let args = Args::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(if args.verbose {
                    tracing::Level::DEBUG.into()
                } else {
                    tracing::Level::INFO.into()
                })
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let result = match args.command {
        Command::Listen {
            bind,
            system_id,
            config,
            once,
        } => listen(&bind, system_id, config, once),
        Command::Decode { hex, system_id } => decode_frame(&hex, system_id),
        Command::Templates {
            system_id,
            invoke_id,
        } => print_templates(system_id, &invoke_id),
    };

    if let Err(e) = result {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn listen(
    bind: &str,
    system_id: SystemIdentifier,
    config: Option<PathBuf>,
    once: bool,
) -> Result<()> {
    let config = match config {
        Some(path) => DriverConfig::load_from_file(&path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => DriverConfig::default(),
    };

    let listener = TcpListener::bind(bind).with_context(|| format!("binding {}", bind))?;
    info!(addr = %bind, system_id = %system_id, "Waiting for devices...");

    for stream in listener.incoming() {
        let stream = match stream {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "Accept failed");
                continue;
            }
        };
        let channel = Arc::new(SocketChannel::from_stream(stream)?);
        info!(peer = ?channel.peer_addr(), "Device connected");

        let summary = ChannelDriver::with_observer(channel, system_id, Arc::new(ConsoleObserver))
            .with_config(config.clone())
            .run()?;
        info!(
            state = %summary.state,
            reason = %summary.reason,
            measurements = summary.measurements.len(),
            "Session finished"
        );

        if once {
            break;
        }
    }
    Ok(())
}

fn decode_frame(hex: &str, system_id: SystemIdentifier) -> Result<()> {
    let bytes = from_hex(hex)?;
    let frame = decode(&bytes)?;
    println!("Frame:      {}", frame);
    if bytes.len() > frame.encoded_len() {
        println!("Trailing:   {} bytes", bytes.len() - frame.encoded_len());
    }

    let transition = handle(SessionState::Idle, &frame, &system_id);
    println!("Next state: {}", transition.state);
    match transition.action {
        Action::None => println!("Action:     none"),
        Action::Reply(out) => println!("Reply:      {} {}", out, to_hex(&out.encode())),
        Action::Defer(out) => println!("Deferred:   {} {}", out, to_hex(&out.encode())),
    }
    if let Some(m) = transition.measurement {
        println!("Reading:    {}", m);
    }
    Ok(())
}

fn print_templates(system_id: SystemIdentifier, invoke_id: &str) -> Result<()> {
    let invoke = from_hex(invoke_id)?;
    let invoke: [u8; 2] = invoke
        .as_slice()
        .try_into()
        .context("invoke id must be 4 hex digits")?;

    for frame in [
        OutboundFrame::AssociationResponse(system_id),
        OutboundFrame::DataResponse(InvokeId::new(invoke)),
        OutboundFrame::GetMdsAttributes,
        OutboundFrame::ReleaseRequest,
        OutboundFrame::ReleaseResponse,
        OutboundFrame::Abort,
    ] {
        println!("{:<40} {}", frame.to_string(), to_hex(&frame.encode()));
    }
    Ok(())
}
