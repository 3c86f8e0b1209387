//! Talon host: simulated host process for the Talon runtime.
//!
//! Builds a small in-process "game" with a virtual-dispatch table, patches its
//! dispatch slot, loads the linked damage-scaler extension plus anything found
//! in the configured extension directory, and runs a fixed number of ticks
//! while damage flows through the hooked dispatch function.

mod game;
mod linked;

use std::path::Path;
use std::thread;

use tracing::{error, info, warn};

use talon_core::config::RuntimeConfig;
use talon_core::error::AppError;
use talon_intercept::function::NulTerminatedNameResolver;
use talon_intercept::site::vtable::VTablePatcher;
use talon_runtime::{Runtime, init_logging};

use game::Game;
use linked::LinkedOpener;

const FRAMES: u64 = 180;
const FRAME_SECONDS: f32 = 1.0 / 60.0;
const HIT: f32 = 4.0;

fn main() {
    let config = match RuntimeConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    init_logging(&config.logging);

    if let Err(e) = run(config) {
        error!("Host error: {}", e);
        std::process::exit(1);
    }
}

fn run(config: RuntimeConfig) -> Result<(), AppError> {
    info!("Starting talon-host v{}", env!("CARGO_PKG_VERSION"));

    let mut game = Game::new(config.interception.dispatch_index, 1_000.0)?;
    let patcher = VTablePatcher::with_table(game.dispatch_table());
    // SAFETY: the game passes NUL-terminated names as function handles.
    let resolver = unsafe { NulTerminatedNameResolver::new() };

    let mut runtime = Runtime::builder(config, Box::new(patcher), resolver)
        .opener(LinkedOpener::default())
        .build();

    match runtime.start() {
        Ok(registered) => info!(registered, "Runtime started"),
        Err(e) => warn!(error = %e, "Continuing without function hooks"),
    }
    if !runtime.load_extension(Path::new(linked::DAMAGE_SCALER)) {
        warn!("Linked damage-scaler did not register");
    }
    for extension in runtime.loaded_extensions() {
        info!(
            extension = %extension.info,
            state = %extension.state,
            path = %extension.path.display(),
            "Extension ready"
        );
    }

    let sender = runtime.action_sender();
    let reporter = thread::spawn(move || {
        for batch in 1..=3u32 {
            sender.enqueue(move || info!(batch, "Report from worker thread"));
        }
    });
    if reporter.join().is_err() {
        warn!("Worker thread panicked");
    }

    for frame in 1..=FRAMES {
        let health = game.take_damage(HIT);
        if frame % 60 == 0 {
            let health = game.heal(25.0);
            info!(frame, health, "Healed");
        } else if frame % 30 == 0 {
            info!(frame, health, "Took damage");
        }
        runtime.tick(FRAME_SECONDS);
    }

    let unhooked_health = game.health();
    runtime.shutdown();
    let after_shutdown = game.take_damage(HIT);
    info!(
        health = unhooked_health,
        after_shutdown,
        frames = FRAMES,
        "Simulation finished"
    );
    Ok(())
}
