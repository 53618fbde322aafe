//! Simulation configuration.
//!
//! Everything has a default; a TOML file can override any subset, and a few
//! settings can be overridden from the environment (`NETSIM_SEED`,
//! `NETSIM_SPEED`).

use crate::error::ConfigError;
use crate::simulator::{Duration, SpeedMode, SpeedProfiles};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub initial_speed: SpeedMode,
    pub profiles: SpeedProfiles,
    /// Wall-clock period of clock-string notifications in the realtime driver.
    pub clock_tick_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            initial_speed: SpeedMode::RealTime,
            profiles: SpeedProfiles::default(),
            clock_tick_ms: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SwitchingConfig {
    pub mac_aging_secs: u64,
    pub aging_sweep_secs: u64,
}

impl Default for SwitchingConfig {
    fn default() -> Self {
        SwitchingConfig {
            mac_aging_secs: 300,
            aging_sweep_secs: 15,
        }
    }
}

impl SwitchingConfig {
    pub fn aging_time(&self) -> Duration {
        Duration::from_secs(self.mac_aging_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.aging_sweep_secs.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StpConfig {
    /// Whether spanning tree starts enabled on new switches.
    pub enabled_by_default: bool,
    pub bridge_priority: u16,
    pub hello_secs: u16,
    pub max_age_secs: u16,
    pub forward_delay_secs: u16,
}

impl Default for StpConfig {
    fn default() -> Self {
        StpConfig {
            enabled_by_default: true,
            bridge_priority: 32768,
            hello_secs: 2,
            max_age_secs: 20,
            forward_delay_secs: 15,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArpConfig {
    pub timeout_secs: u64,
    pub retries: u32,
    pub retry_interval_ms: u64,
    pub sweep_secs: u64,
}

impl Default for ArpConfig {
    fn default() -> Self {
        ArpConfig {
            timeout_secs: 300,
            retries: 3,
            retry_interval_ms: 1_000,
            sweep_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HsrpConfig {
    pub priority: u8,
    pub hello_secs: u8,
    pub hold_secs: u8,
}

impl Default for HsrpConfig {
    fn default() -> Self {
        HsrpConfig {
            priority: 100,
            hello_secs: 3,
            hold_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OspfConfig {
    pub hello_secs: u16,
    pub dead_secs: u32,
}

impl Default for OspfConfig {
    fn default() -> Self {
        OspfConfig {
            hello_secs: 10,
            dead_secs: 40,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IcmpConfig {
    pub timeout_ms: u64,
    pub data_len: usize,
}

impl Default for IcmpConfig {
    fn default() -> Self {
        IcmpConfig {
            timeout_ms: 2_000,
            data_len: 56,
        }
    }
}

impl IcmpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub seed: u64,
    /// Capacity of the engine event broadcast channel.
    pub event_capacity: usize,
    pub scheduler: SchedulerConfig,
    pub switching: SwitchingConfig,
    pub stp: StpConfig,
    pub arp: ArpConfig,
    pub hsrp: HsrpConfig,
    pub ospf: OspfConfig,
    pub icmp: IcmpConfig,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        SimulationConfig {
            seed: 42,
            event_capacity: 1024,
            scheduler: SchedulerConfig::default(),
            switching: SwitchingConfig::default(),
            stp: StpConfig::default(),
            arp: ArpConfig::default(),
            hsrp: HsrpConfig::default(),
            ospf: OspfConfig::default(),
            icmp: IcmpConfig::default(),
        }
    }
}

impl SimulationConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: SimulationConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Apply `NETSIM_SEED` / `NETSIM_SPEED` overrides.
    pub fn with_env_overrides(mut self) -> Result<Self, ConfigError> {
        if let Ok(seed) = std::env::var("NETSIM_SEED") {
            self.seed = seed.parse().map_err(|_| ConfigError::Invalid {
                field: "NETSIM_SEED",
                reason: format!("'{}' is not an integer", seed),
            })?;
        }
        if let Ok(speed) = std::env::var("NETSIM_SPEED") {
            self.scheduler.initial_speed = speed
                .parse()
                .map_err(|reason| ConfigError::Invalid {
                    field: "NETSIM_SPEED",
                    reason,
                })?;
        }
        Ok(self)
    }

    /// Short protocol timers so tests converge in little virtual time.
    pub fn test() -> Self {
        let mut config = SimulationConfig::default();
        config.stp.hello_secs = 1;
        config.stp.max_age_secs = 4;
        config.stp.forward_delay_secs = 3;
        config
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let profiles = [
            ("scheduler.profiles.faster", self.scheduler.profiles.faster),
            ("scheduler.profiles.realtime", self.scheduler.profiles.realtime),
            ("scheduler.profiles.slower", self.scheduler.profiles.slower),
        ];
        for (field, profile) in profiles {
            if profile.rate <= 0.0
                || profile.propagation_multiplier <= 0.0
                || profile.transmission_multiplier <= 0.0
            {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "running speed profiles need positive rate and multipliers".to_string(),
                });
            }
        }
        if self.hsrp.hold_secs <= self.hsrp.hello_secs {
            return Err(ConfigError::Invalid {
                field: "hsrp.hold_secs",
                reason: "hold time must exceed hello time".to_string(),
            });
        }
        if self.stp.hello_secs == 0 || self.stp.forward_delay_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "stp",
                reason: "hello and forward delay must be non-zero".to_string(),
            });
        }
        if self.event_capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "event_capacity",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = SimulationConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.switching.mac_aging_secs, 300);
        assert_eq!(config.hsrp.priority, 100);
    }

    #[test]
    fn test_partial_toml_overrides() {
        let config = SimulationConfig::from_toml_str(
            r#"
            seed = 7

            [switching]
            mac_aging_secs = 30

            [hsrp]
            hello_secs = 1
            hold_secs = 4
            "#,
        )
        .unwrap();
        assert_eq!(config.seed, 7);
        assert_eq!(config.switching.mac_aging_secs, 30);
        assert_eq!(config.switching.aging_sweep_secs, 15);
        assert_eq!(config.hsrp.hold_secs, 4);
        assert_eq!(config.hsrp.priority, 100);
    }

    #[test]
    fn test_invalid_hold_rejected() {
        let err = SimulationConfig::from_toml_str("[hsrp]\nhello_secs = 5\nhold_secs = 5\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "hsrp.hold_secs", .. }));
    }

    #[test]
    fn test_round_trip_through_file() {
        let mut config = SimulationConfig::default();
        config.seed = 99;
        config.scheduler.initial_speed = SpeedMode::Slower;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(config.to_toml_string().unwrap().as_bytes()).unwrap();
        let loaded = SimulationConfig::load(file.path()).unwrap();
        assert_eq!(loaded.seed, 99);
        assert_eq!(loaded.scheduler.initial_speed, SpeedMode::Slower);
    }
}
