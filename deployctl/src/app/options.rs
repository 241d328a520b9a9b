//! Controller runtime options

use std::time::Duration;

use crate::logs::LogOptions;
use crate::storage::settings::Settings;
use crate::utils::CooldownOptions;

/// Options for the informational health probe
#[derive(Debug, Clone)]
pub struct ProbeOptions {
    /// Skip probing entirely
    pub enabled: bool,

    /// Attempts before reporting the service as unreachable
    pub attempts: u32,

    /// Per-request timeout
    pub timeout: Duration,

    /// Delay between attempts
    pub cooldown: CooldownOptions,
}

impl Default for ProbeOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            attempts: 6,
            timeout: Duration::from_secs(3),
            cooldown: CooldownOptions::default(),
        }
    }
}

/// Everything a controller invocation needs besides the container runtime
#[derive(Debug, Clone)]
pub struct ControllerOptions {
    pub settings: Settings,
    pub logging: LogOptions,
    pub probe: ProbeOptions,
}

impl ControllerOptions {
    pub fn from_settings(settings: Settings) -> Self {
        let logging = LogOptions {
            log_level: settings.log_level.clone(),
            json_format: settings.json_logs,
        };
        Self {
            settings,
            logging,
            probe: ProbeOptions::default(),
        }
    }
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self::from_settings(Settings::default())
    }
}
