//! Headless movement bot
//!
//! Connects to a server, walks a slow circle at a fixed input rate and logs
//! how far prediction sits from the last acknowledged server state.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use axiom_sync::config::MovementConfig;
use axiom_sync::game::movement::{Arena, CharacterClass, MovementFlags};
use axiom_sync::net::{ClientEvent, NetworkClient};

#[derive(Parser)]
#[command(name = "sync-client")]
#[command(about = "Scripted movement client for an axiom-sync server")]
struct Args {
    #[arg(short, long, default_value = "127.0.0.1:7777")]
    server: SocketAddr,

    #[arg(short, long)]
    identity: Option<String>,

    #[arg(short, long, default_value_t = CharacterClass::Brawler)]
    class: CharacterClass,

    #[arg(short, long, default_value_t = 60, help = "Inputs per second")]
    rate: u32,

    #[arg(long, default_value_t = 0, help = "Stop after this many seconds (0 runs until Ctrl+C)")]
    duration: u64,

    #[arg(long, default_value_t = 5, help = "Seconds between heartbeats")]
    heartbeat_secs: u64,

    #[arg(long, default_value_t = 0.5, help = "Yaw change per second while walking")]
    turn_rate: f32,

    #[arg(long, default_value_t = 5.0)]
    base_speed: f32,

    #[arg(long, default_value_t = 50.0)]
    arena_size: f32,

    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    init_tracing(&args.log_level);

    let identity = args
        .identity
        .clone()
        .unwrap_or_else(|| format!("bot-{}", std::process::id()));

    let movement = MovementConfig {
        base_speed: args.base_speed,
        arena: Arena::square(args.arena_size),
        ..Default::default()
    };

    let mut client = NetworkClient::bind(args.server, &identity, args.class, movement).await?;
    client.connect(Duration::from_secs(5)).await?;

    let rate = args.rate.max(1);
    let dt = 1.0 / rate as f32;
    let mut ticker = interval(Duration::from_secs_f32(dt));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let started = Instant::now();
    let heartbeat_every = Duration::from_secs(args.heartbeat_secs.max(1));
    let mut last_heartbeat = Instant::now();
    let mut last_report = Instant::now();
    let mut yaw = 0.0f32;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C");
                break;
            }
            _ = ticker.tick() => {}
        }

        if args.duration > 0 && started.elapsed() >= Duration::from_secs(args.duration) {
            break;
        }

        for event in client.poll()? {
            if let ClientEvent::Disconnected { reason } = event {
                warn!(reason = ?reason, "Server ended the session");
                return Ok(());
            }
        }

        yaw = (yaw + args.turn_rate * dt) % std::f32::consts::TAU;
        client.submit(MovementFlags::FORWARD, yaw, 0.0, dt).await?;

        if last_heartbeat.elapsed() >= heartbeat_every {
            client.heartbeat().await?;
            last_heartbeat = Instant::now();
        }

        if last_report.elapsed() >= Duration::from_secs(1) {
            let prediction = client.prediction();
            let prediction = prediction.lock();
            let server = prediction.server_state();
            let predicted = prediction.predicted_state();
            info!(
                acked = prediction.last_acknowledged(),
                pending = prediction.pending_len(),
                server = ?server.position,
                predicted = ?predicted.position,
                lead = server.position.distance(predicted.position),
                "Status"
            );
            last_report = Instant::now();
        }
    }

    client.disconnect().await?;
    Ok(())
}

fn init_tracing(log_level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}
