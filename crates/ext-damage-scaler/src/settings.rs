//! Extension settings.

use talon_plugin_sdk::prelude::*;

/// Tunables read from the extension's configuration section.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScalerSettings {
    pub factor: f32,
    pub cap: Option<f32>,
    pub report_every: u64,
}

impl Default for ScalerSettings {
    fn default() -> Self {
        Self {
            factor: 0.5,
            cap: None,
            report_every: 0,
        }
    }
}

impl ScalerSettings {
    /// Reads settings from `section`, falling back to defaults per key.
    ///
    /// A negative or non-finite factor is a `Configuration` error.
    pub fn load(section: &ConfigSection) -> AppResult<Self> {
        let defaults = Self::default();
        let settings = Self {
            factor: section.get_or("factor", defaults.factor),
            cap: section.get_or("cap", defaults.cap),
            report_every: section.get_or("report_every", defaults.report_every),
        };
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> AppResult<()> {
        if !self.factor.is_finite() || self.factor < 0.0 {
            return Err(AppError::configuration(format!(
                "damage-scaler.factor must be a finite, non-negative number, got {}",
                self.factor
            )));
        }
        if let Some(cap) = self.cap {
            if !cap.is_finite() || cap < 0.0 {
                return Err(AppError::configuration(format!(
                    "damage-scaler.cap must be a finite, non-negative number, got {cap}"
                )));
            }
        }
        Ok(())
    }

    /// Whether hits are blocked outright instead of scaled.
    pub fn suppresses(&self) -> bool {
        self.factor == 0.0
    }

    /// Applies the factor and the cap to `amount`.
    pub fn apply(&self, amount: f32) -> f32 {
        let scaled = amount * self.factor;
        match self.cap {
            Some(cap) => scaled.min(cap),
            None => scaled,
        }
    }
}
