//! Mentor terminal host.
//!
//! ## Runtime note
//!
//! One tokio task owns the engine. It multiplexes three sources with
//! `select!`: stdin lines (commands), the tick interval (scheduler and call
//! pumping) and the engine's event broadcast (terminal output). No arm
//! awaits slow work: provider requests and call starts run as spawned tasks
//! and come back through `tick()`.

mod commands;
mod display;
mod settings;
mod state;

use commands::{Flow, HELP};
use settings::{default_settings_path, load_settings, save_settings};
use state::AppState;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

fn main() -> anyhow::Result<()> {
    // ── Tracing ───────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("mentor=info,mentor_core=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("mentor-rt")
        .build()?;
    runtime.block_on(run())
}

async fn run() -> anyhow::Result<()> {
    info!("Mentor starting");

    let settings_path = default_settings_path();
    let settings = load_settings(&settings_path);
    if !settings_path.exists() {
        if let Err(e) = save_settings(&settings_path, &settings) {
            warn!("could not write default settings: {e}");
        }
    }
    info!(
        settings_path = ?settings_path,
        voice = %settings.voice,
        text_model = %settings.text_model,
        live_model = %settings.live_model,
        hosted = settings.api_key.is_some(),
        "settings loaded"
    );

    let mut state = AppState::build(&settings)?;
    info!(
        provider = state.engine.tutor().provider_name(),
        audio_device = state.has_audio_device(),
        "engine ready"
    );

    for message in state.engine.tutor().history() {
        println!("{}", display::message_text(&message));
    }
    println!("(type /help for commands)");

    let mut events = state.engine.subscribe();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut ticker = tokio::time::interval(state.engine.config().tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => state.engine.tick(),
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match commands::parse(&line) {
                    Ok(Some(command)) => {
                        if commands::execute(&mut state, command) == Flow::Quit {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(usage) => println!("{usage}\n{HELP}"),
                }
            }
            event = events.recv() => match event {
                Ok(event) => {
                    if let Some(text) = display::render(&event) {
                        println!("{text}");
                    }
                }
                Err(RecvError::Lagged(n)) => warn!("terminal fell behind; {n} events skipped"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    state.shutdown();
    info!("Mentor stopped");
    Ok(())
}
