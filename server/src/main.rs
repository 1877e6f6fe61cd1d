use clap::Parser;
use log::{error, info};
use server::sessions::SessionServer;
use shared::{game, ListenConfig, DEFAULT_PORT, DEFAULT_TICK_RATE};
use std::sync::Arc;
use std::thread::sleep;
use std::time::{Duration, Instant};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Accept connections on the loopback interface only
    #[arg(short, long)]
    local_only: bool,

    /// Ticks per second
    #[arg(short, long, default_value_t = DEFAULT_TICK_RATE)]
    tick_rate: u32,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let config = ListenConfig {
        port: args.port,
        local_only: args.local_only,
    };

    let registry = Arc::new(game::registry()?);
    let mut server = SessionServer::new(&config, registry)?;
    info!("Server listening on {}", server.local_addr()?);

    let tick_duration = Duration::from_secs_f32(1.0 / args.tick_rate.max(1) as f32);
    let mut tick: u64 = 0;

    loop {
        let started = Instant::now();

        server.tick()?;
        for (peer, fault) in server.take_faults() {
            error!("Peer {} was disconnected: {}", peer, fault);
        }

        tick += 1;
        if tick % (args.tick_rate.max(1) as u64 * 10) == 0 {
            info!(
                "Tick {}: {} peers, {} objects",
                tick,
                server.len(),
                server.manager().len()
            );
        }

        if let Some(remaining) = tick_duration.checked_sub(started.elapsed()) {
            sleep(remaining);
        }
    }
}
