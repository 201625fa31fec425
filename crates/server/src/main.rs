use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use bzwire::{LatencySimulation, Settings};
use bzwire_server::{RelayServer, ServerConfig};

#[derive(Parser)]
#[command(name = "bzwire-server")]
#[command(about = "Relay server speaking the BZFlag wire protocol")]
struct Args {
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: String,

    #[arg(short, long, default_value_t = bzwire::DEFAULT_PORT)]
    port: u16,

    #[arg(short, long, help = "Settings file with key=value lines")]
    config: Option<PathBuf>,

    #[arg(short, long)]
    max_players: Option<u8>,

    #[arg(long, help = "Enable latency and loss simulation on outgoing traffic")]
    simulate_latency: bool,

    #[arg(long, default_value_t = 0.0, help = "Packet loss percentage (0-100)")]
    loss_percent: f32,

    #[arg(long, default_value_t = 0, help = "Minimum latency in ms")]
    min_latency: u32,

    #[arg(long, default_value_t = 0, help = "Maximum latency in ms")]
    max_latency: u32,

    #[arg(long, default_value_t = 0, help = "Jitter in ms")]
    jitter: u32,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let bind_addr = format!("{}:{}", args.bind, args.port);

    let settings = match &args.config {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("cannot read settings from {}", path.display()))?;
            Settings::parse(&text)
        }
        None => Settings::new(),
    };

    let mut config = ServerConfig::from_settings(&settings);
    if let Some(max) = args.max_players {
        config.max_players = max.clamp(1, bzwire_server::config::MAX_PLAYERS);
    }
    if args.simulate_latency {
        config.latency = Some(LatencySimulation {
            enabled: true,
            loss_percent: args.loss_percent,
            min_latency_ms: args.min_latency,
            max_latency_ms: args.max_latency,
            jitter_ms: args.jitter,
        });
    }

    let mut server = RelayServer::new(&bind_addr, config)
        .with_context(|| format!("cannot listen on {bind_addr}"))?;
    log::info!("Server started on {}", server.local_addr()?);
    server.run();
    log::info!("Server shutting down");

    Ok(())
}
