//! # ext-damage-scaler
//!
//! Sample extension. Hooks `TakeDamage`, scales the damage amount by a
//! configured factor (or suppresses the call entirely when the factor is
//! zero) and reports what it did on ticks and at shutdown.
//!
//! Configuration lives under the `damage-scaler` section:
//!
//! ```toml
//! factor = 0.5         # multiplier applied to every hit
//! cap = 40.0           # optional upper bound after scaling
//! report_every = 600   # ticks between summaries, 0 disables
//! ```

pub mod params;
pub mod plugin;
pub mod settings;

pub use params::DamageParams;
pub use plugin::DamageScaler;
pub use settings::ScalerSettings;

talon_plugin_sdk::export_extension!(DamageScaler::default());
