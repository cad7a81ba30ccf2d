//! Layered simulator configuration.
//!
//! Sources, lowest to highest priority: built-in defaults, an optional TOML
//! file, then `EVSIM_*` environment variables. Nested keys are separated by
//! a double underscore, so `EVSIM_TICKS__MOTOR_MS=100` sets `ticks.motor_ms`.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::error::SimError;
use crate::motor::MotorParams;

pub const ENV_PREFIX: &str = "EVSIM_";

/// Data directory the firmware's simulator build reads and writes.
pub const DEFAULT_DATA_DIR: &str = "BSP/Simulator/Hardware/Data";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Directory holding one file per medium.
    pub data_dir: PathBuf,
    /// Default filter when `RUST_LOG` is unset.
    pub log_level: String,
    pub ticks: TickConfig,
    pub motor: MotorParams,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            log_level: "info".to_owned(),
            ticks: TickConfig::default(),
            motor: MotorParams::default(),
        }
    }
}

/// Polling interval of each consumer, in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TickConfig {
    pub motor_ms: u64,
    pub spi_ms: u64,
    pub status_ms: u64,
    pub timer_ms: u64,
}

impl Default for TickConfig {
    fn default() -> Self {
        Self {
            motor_ms: 250,
            spi_ms: 50,
            status_ms: 500,
            timer_ms: 1,
        }
    }
}

impl TickConfig {
    pub fn motor(&self) -> Duration {
        Duration::from_millis(self.motor_ms.max(1))
    }

    pub fn spi(&self) -> Duration {
        Duration::from_millis(self.spi_ms.max(1))
    }

    pub fn status(&self) -> Duration {
        Duration::from_millis(self.status_ms.max(1))
    }

    pub fn timer(&self) -> Duration {
        Duration::from_millis(self.timer_ms.max(1))
    }
}

impl SimConfig {
    /// Builds the provider chain without the environment layer.
    fn figment(file: Option<&Path>) -> Figment {
        let figment = Figment::from(Serialized::defaults(SimConfig::default()));
        match file {
            Some(path) => figment.merge(Toml::file(path)),
            None => figment,
        }
    }

    /// Loads defaults, then `file` if given, then the environment.
    pub fn load(file: Option<&Path>) -> Result<Self, SimError> {
        if let Some(path) = file {
            require(path)?;
        }
        Self::figment(file)
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(|e| SimError::Config(Box::new(e)))
    }

    /// Loads defaults and `file`, ignoring the environment.
    #[cfg(test)]
    fn from_file(file: &Path) -> Result<Self, SimError> {
        require(file)?;
        Self::figment(Some(file))
            .extract()
            .map_err(|e| SimError::Config(Box::new(e)))
    }
}

// A missing file is silently empty to figment; an explicit one must exist.
fn require(path: &Path) -> Result<(), SimError> {
    if path.is_file() {
        Ok(())
    } else {
        Err(SimError::Io(io::Error::new(
            io::ErrorKind::NotFound,
            format!("config file {} not found", path.display()),
        )))
    }
}
