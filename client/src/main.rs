use clap::Parser;
use client::session::ClientSession;
use log::{error, info};
use rand::Rng;
use shared::game::{self, Guitar, Player};
use shared::{ObjectId, Replicated, DEFAULT_PORT, DEFAULT_TICK_RATE};
use std::sync::Arc;
use std::thread::sleep;
use std::time::{Duration, Instant};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server host to connect to
    #[arg(short, long, default_value = "127.0.0.1")]
    server: String,

    /// Server port
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Ticks per second
    #[arg(short, long, default_value_t = DEFAULT_TICK_RATE)]
    tick_rate: u32,

    /// Player name shown to the other peers
    #[arg(short, long, default_value = "guest")]
    name: String,
}

/// Chance per tick that a note comes up
const NOTE_CHANCE: f64 = 0.1;
/// Chance that a note that came up is hit
const HIT_CHANCE: f64 = 0.85;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    info!("Connecting to: {}:{}", args.server, args.port);

    let registry = Arc::new(game::registry()?);
    let mut session = ClientSession::new(&args.server, args.port, registry)?;

    let tick_rate = args.tick_rate.max(1);
    let tick_duration = Duration::from_secs_f32(1.0 / tick_rate as f32);
    let mut rng = rand::thread_rng();
    let mut player: Option<ObjectId> = None;
    let mut tick: u64 = 0;

    while session.is_open() {
        let started = Instant::now();

        if let Err(e) = session.tick() {
            error!("Session failed: {}", e);
            break;
        }

        if session.is_connected() {
            let id = match player {
                Some(id) => id,
                None => {
                    let id = join_band(&mut session, &args.name)?;
                    player = Some(id);
                    id
                }
            };

            if rng.gen_bool(NOTE_CHANCE) {
                if let Some(object) = session.manager_mut().get_mut(id) {
                    let fret = rng.gen_range(0..5);
                    if rng.gen_bool(HIT_CHANCE) {
                        game::record_hit(object, fret)?;
                    } else {
                        game::record_miss(object, fret)?;
                    }
                }
            }
        }

        tick += 1;
        if tick % (tick_rate as u64 * 5) == 0 {
            log_scores(&session);
        }

        if let Some(remaining) = tick_duration.checked_sub(started.elapsed()) {
            sleep(remaining);
        }
    }

    info!("Disconnected from server");
    Ok(())
}

/// Creates our player and guitar once the server has assigned our id
fn join_band(
    session: &mut ClientSession,
    name: &str,
) -> Result<ObjectId, Box<dyn std::error::Error>> {
    let manager = session.manager_mut();
    let guitar = manager.create::<Guitar>()?;
    let id = manager.create::<Player>()?;
    if let Some(player) = manager.get_mut(id) {
        player.set("name", name)?;
        player.set("guitar", guitar)?;
    }
    info!("Joined as {} ({})", name, id);
    Ok(id)
}

fn log_scores(session: &ClientSession) {
    for object in session.manager().objects() {
        if object.tag() != Player::TAG {
            continue;
        }
        let name = object.get("name").and_then(|v| v.as_text()).unwrap_or("?");
        let score = object.get("score").and_then(|v| v.as_int()).unwrap_or(0);
        info!("{}: {} points, {} hits seen", name, score, game::hits(object));
    }
}
