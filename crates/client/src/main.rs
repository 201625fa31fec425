mod dump;
pub mod net;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Result, bail};
use clap::{Args as ClapArgs, Parser, Subcommand};

use bzwire::{LinkConfig, Settings, TeamColor};
use net::{ClientConfig, NetworkClient};

#[derive(Parser)]
#[command(name = "bzwire-client")]
#[command(about = "Headless BZFlag wire protocol client")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Join a server and drive a scripted tank.
    Connect(ConnectArgs),
    /// Print the messages stored in a capture file.
    Dump {
        path: PathBuf,

        #[arg(long, help = "Also print payload bytes")]
        payload: bool,
    },
}

#[derive(ClapArgs)]
struct ConnectArgs {
    #[arg(help = "Server address, host or host:port")]
    server: String,

    #[arg(short, long, default_value = "bzwire")]
    callsign: String,

    #[arg(short, long, default_value = "auto", help = "auto, rogue, red, green, blue or purple")]
    team: String,

    #[arg(long, default_value = "")]
    motto: String,

    #[arg(long, help = "Keep all traffic on TCP")]
    no_udp: bool,

    #[arg(long, default_value_t = 10.0, help = "State updates per second")]
    rate: f32,

    #[arg(long, help = "Leave after this many seconds")]
    seconds: Option<u64>,

    #[arg(long, help = "Settings file with key=value lines")]
    config: Option<PathBuf>,

    #[arg(long, help = "Record received messages to this file")]
    capture: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match Args::parse().command {
        Command::Connect(args) => connect(args),
        Command::Dump { path, payload } => dump::dump_capture(&path, payload),
    }
}

fn connect(args: ConnectArgs) -> Result<()> {
    let settings = match &args.config {
        Some(path) => Settings::parse(&std::fs::read_to_string(path)?),
        None => Settings::new(),
    };
    let mut link = LinkConfig::from_settings(&settings).with_capture_from_env();
    if args.capture.is_some() {
        link.capture_path = args.capture;
    }

    let config = ClientConfig {
        callsign: args.callsign,
        motto: args.motto,
        team: parse_team(&args.team)?,
        use_udp: !args.no_udp,
        update_rate: args.rate,
        run_for: args.seconds.map(Duration::from_secs),
        link,
    };

    let addr = if args.server.contains(':') {
        args.server
    } else {
        format!("{}:{}", args.server, bzwire::DEFAULT_PORT)
    };

    let mut client = NetworkClient::connect(addr.as_str(), config)?;
    log::info!("connected to {addr} as player {}", client.player_id());
    client.join()?;
    client.run()
}

fn parse_team(name: &str) -> Result<TeamColor> {
    Ok(match name.to_ascii_lowercase().as_str() {
        "auto" | "automatic" => TeamColor::Automatic,
        "rogue" => TeamColor::Rogue,
        "red" => TeamColor::Red,
        "green" => TeamColor::Green,
        "blue" => TeamColor::Blue,
        "purple" => TeamColor::Purple,
        other => bail!("unknown team {other:?}"),
    })
}
