use std::net::SocketAddr;

use clap::{Args, Parser, Subcommand};
use frames::{SensorReading, decode_request, encode_response};
use sensorlink::{SensorSession, SessionConfig, SessionEvent};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("invalid configuration: {0}")]
    Config(#[from] sensorlink::ConfigError),
    #[error("session command failed: {0}")]
    Session(#[from] sensorlink::SessionError),
    #[error("device did not complete the handshake in time")]
    HandshakeTimeout,
    #[error("session closed before any reading arrived")]
    ClosedEarly,
    #[error("invalid --reading: {0}")]
    InvalidReading(#[from] frames::CodecError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

#[derive(Parser, Debug)]
#[command(name = "sensorctl", about = "Sensor device session CLI")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Connect to a device and print readings as they arrive.
    Monitor(MonitorArgs),
    /// Run a local device that answers the sensor protocol.
    Simulate(SimulateArgs),
}

#[derive(Args, Debug)]
struct MonitorArgs {
    #[arg(long, env = "SENSOR_ADDR")]
    addr: Option<String>,

    #[arg(long, default_value_t = false, help = "Print every event as one JSON line")]
    json: bool,

    #[arg(long, help = "Exit after this many readings")]
    count: Option<usize>,

    #[arg(long, default_value_t = false, help = "Poll from connect instead of after the settling delay")]
    no_auto_poll: bool,
}

#[derive(Args, Debug)]
struct SimulateArgs {
    #[arg(long, default_value = "127.0.0.1:8080")]
    listen: SocketAddr,

    #[arg(long, default_value_t = false, help = "Never send the handshake token")]
    silent: bool,

    #[arg(long, default_value = "1.5,20.0,55.0,300.0,4500,80", help = "Six comma-separated values")]
    reading: String,
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    match cli.command {
        Command::Monitor(args) => run_monitor(args).await,
        Command::Simulate(args) => run_simulate(args).await,
    }
}

// =============================================================================
// MONITOR
// =============================================================================

async fn run_monitor(args: MonitorArgs) -> Result<(), CliError> {
    let mut config = SessionConfig::from_env()?;
    if let Some(addr) = args.addr {
        config = config.with_addr(addr);
    }
    config.auto_poll = !args.no_auto_poll;

    let (session, mut events) = SensorSession::new(config);
    session.connect()?;

    let mut readings = 0_usize;
    loop {
        let event = tokio::select! {
            event = events.recv() => event,
            _ = tokio::signal::ctrl_c() => {
                session.disconnect();
                return Ok(());
            }
        };
        let Some(event) = event else {
            return Ok(());
        };

        if args.json {
            println!("{}", serde_json::to_string(&event)?);
        } else {
            print_event(&event);
        }

        match event {
            SessionEvent::ConnectionStatusChanged { connected: true } if args.no_auto_poll => {
                session.start_polling()?;
            }
            SessionEvent::ReadingReceived { .. } => {
                readings += 1;
                if args.count.is_some_and(|limit| readings >= limit) {
                    session.stop_polling();
                    session.disconnect();
                    return Ok(());
                }
            }
            SessionEvent::ConnectionTimeout => return Err(CliError::HandshakeTimeout),
            SessionEvent::ConnectionStatusChanged { connected: false } => {
                return if readings == 0 { Err(CliError::ClosedEarly) } else { Ok(()) };
            }
            _ => {}
        }
    }
}

fn print_event(event: &SessionEvent) {
    match event {
        SessionEvent::ReadingReceived { reading } => println!("{}", render_reading(reading)),
        SessionEvent::ConnectionStatusChanged { connected } => {
            println!("{}", if *connected { "connected" } else { "disconnected" });
        }
        SessionEvent::PollingStatusChanged { polling } => {
            println!("{}", if *polling { "polling started" } else { "polling stopped" });
        }
        SessionEvent::Error { message } => eprintln!("error: {message}"),
        SessionEvent::ConnectionTimeout => eprintln!("error: handshake timed out"),
    }
}

fn render_reading(reading: &SensorReading) -> String {
    format!(
        "distance={:.2} temperature={:.2} humidity={:.2} illuminance={:.2} color_temperature={:.0} battery={:.0}",
        reading.distance(),
        reading.temperature(),
        reading.humidity(),
        reading.illuminance(),
        reading.color_temperature(),
        reading.battery(),
    )
}

// =============================================================================
// SIMULATE
// =============================================================================

async fn run_simulate(args: SimulateArgs) -> Result<(), CliError> {
    let reading = frames::parse_body(args.reading.as_bytes())?;
    let listener = TcpListener::bind(args.listen).await?;
    tracing::info!(addr = %listener.local_addr()?, silent = args.silent, "simulate: listening");

    loop {
        let (stream, peer) = listener.accept().await?;
        tracing::info!(%peer, "simulate: client connected");
        let silent = args.silent;
        tokio::spawn(async move {
            if let Err(e) = serve_client(stream, reading, silent).await {
                tracing::warn!(%peer, error = %e, "simulate: client ended");
            }
        });
    }
}

async fn serve_client(mut stream: TcpStream, reading: SensorReading, silent: bool) -> Result<(), CliError> {
    if !silent {
        stream.write_all(frames::HANDSHAKE_TOKEN).await?;
    }

    let mut request = [0_u8; frames::REQUEST_LEN];
    loop {
        stream.read_exact(&mut request).await?;
        match decode_request(&request) {
            Some(command) => {
                tracing::debug!(?command, "simulate: request");
                stream.write_all(&encode_response(&reading)).await?;
            }
            None => tracing::warn!(bytes = ?request, "simulate: unrecognized request"),
        }
    }
}
