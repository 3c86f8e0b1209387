//! The extension itself.

use std::cell::Cell;
use std::rc::Rc;

use talon_plugin_sdk::prelude::*;

use crate::params::DamageParams;
use crate::settings::ScalerSettings;

/// Hooked function name.
pub const TAKE_DAMAGE: &str = "TakeDamage";

/// Counters shared between the hook and the event handlers.
#[derive(Debug, Default)]
pub struct ScalerStats {
    hits: Cell<u64>,
    blocked: Cell<u64>,
    absorbed: Cell<f64>,
}

impl ScalerStats {
    pub fn hits(&self) -> u64 {
        self.hits.get()
    }

    pub fn blocked(&self) -> u64 {
        self.blocked.get()
    }

    /// Total damage removed by scaling and blocking.
    pub fn absorbed(&self) -> f64 {
        self.absorbed.get()
    }

    fn record(&self, before: f32, after: f32) {
        self.hits.set(self.hits.get() + 1);
        self.absorbed.set(self.absorbed.get() + f64::from(before - after));
    }

    fn record_block(&self, amount: f32) {
        self.blocked.set(self.blocked.get() + 1);
        self.absorbed.set(self.absorbed.get() + f64::from(amount));
    }

    fn summary(&self) -> String {
        format!(
            "{} hits scaled, {} blocked, {:.1} damage absorbed",
            self.hits(),
            self.blocked(),
            self.absorbed()
        )
    }
}

/// Scales the damage passed to `TakeDamage`.
#[derive(Debug, Default)]
pub struct DamageScaler {
    settings: ScalerSettings,
    stats: Rc<ScalerStats>,
    log: Option<ExtensionLogger>,
}

impl DamageScaler {
    pub fn settings(&self) -> ScalerSettings {
        self.settings
    }

    pub fn stats(&self) -> Rc<ScalerStats> {
        self.stats.clone()
    }
}

impl Extension for DamageScaler {
    fn info(&self) -> ExtensionInfo {
        extension_info!(
            name: "damage-scaler",
            version: env!("CARGO_PKG_VERSION"),
            author: "Talon Team",
            description: "Scales damage passed to TakeDamage"
        )
    }

    fn on_register(&mut self, ctx: &ExtensionContext) -> AppResult<()> {
        self.settings = ScalerSettings::load(ctx.config())?;
        let settings = self.settings;

        let stats = self.stats.clone();
        ctx.add_hook(TAKE_DAMAGE, move |call| {
            // SAFETY: the host passes a `DamageParams` block to TakeDamage.
            let Some(params) = (unsafe { call.params_mut::<DamageParams>() }) else {
                return true;
            };
            if settings.suppresses() {
                stats.record_block(params.amount);
                return false;
            }
            let before = params.amount;
            params.amount = settings.apply(before);
            stats.record(before, params.amount);
            true
        });

        if settings.report_every > 0 {
            let stats = self.stats.clone();
            let log = ctx.log().clone();
            ctx.subscribe(move |tick: &mut TickEvent| {
                if tick.frame_number % settings.report_every == 0 {
                    log.info(&stats.summary());
                }
            });
        }

        let stats = self.stats.clone();
        let log = ctx.log().clone();
        ctx.subscribe(move |_: &mut ShutdownEvent| log.info(&format!("final: {}", stats.summary())));

        let factor = settings.factor;
        let log = ctx.log().clone();
        ctx.enqueue(move || log.debug(&format!("active with factor {factor}")));

        ctx.log().info(&format!("scaling {TAKE_DAMAGE} by {factor}"));
        self.log = Some(ctx.log().clone());
        Ok(())
    }

    fn on_unregister(&mut self) -> AppResult<()> {
        if let Some(log) = self.log.take() {
            log.debug(&format!("unregistering after {} hits", self.stats.hits()));
        }
        Ok(())
    }
}
