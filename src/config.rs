//! Runtime configuration read from `FANBUS_*` environment variables.

use crate::access::ThresholdLimits;
use crate::auth::{AccessPolicy, PolicyPreset, RoleAuthenticator};
use crate::state::StateDefaults;
use std::env;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {0}: {1}")]
    Invalid(String, String),
    #[error("inconsistent thresholds: {0}")]
    Thresholds(String),
}

/// Where the controller gets its temperature from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SensorSource {
    Simulated,
    ThermalZone(PathBuf),
}

impl FromStr for SensorSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" => Err("empty sensor source".to_string()),
            "simulated" | "sim" => Ok(SensorSource::Simulated),
            path => Ok(SensorSource::ThermalZone(PathBuf::from(path))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub modbus_addr: SocketAddr,
    pub node_addr: SocketAddr,
    pub defaults: StateDefaults,
    pub tick: Duration,
    pub modbus_limits: ThresholdLimits,
    pub node_limits: ThresholdLimits,
    pub users: Vec<Credentials>,
    pub policy: PolicyPreset,
    pub trusted_peers: Vec<IpAddr>,
    pub sensor: SensorSource,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            modbus_addr: SocketAddr::from(([0, 0, 0, 0], 5020)),
            node_addr: SocketAddr::from(([0, 0, 0, 0], 4840)),
            defaults: StateDefaults::default(),
            tick: Duration::from_millis(1000),
            modbus_limits: ThresholdLimits::default(),
            node_limits: ThresholdLimits::default(),
            users: vec![Credentials {
                username: "manager".to_string(),
                password: "admin456".to_string(),
            }],
            policy: PolicyPreset::Strict,
            trusted_peers: vec![IpAddr::from([127, 0, 0, 1])],
            sensor: SensorSource::Simulated,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup; unset or empty keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let base = Self::default();
        let read = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let config = Self {
            modbus_addr: parse_or(&read, "FANBUS_MODBUS_ADDR", base.modbus_addr)?,
            node_addr: parse_or(&read, "FANBUS_NODE_ADDR", base.node_addr)?,
            defaults: StateDefaults {
                high_threshold_c: parse_or(&read, "FANBUS_HIGH_THRESHOLD", base.defaults.high_threshold_c)?,
                low_threshold_c: parse_or(&read, "FANBUS_LOW_THRESHOLD", base.defaults.low_threshold_c)?,
                manual_override: base.defaults.manual_override,
            },
            tick: Duration::from_millis(parse_or(&read, "FANBUS_TICK_MS", base.tick.as_millis() as u64)?),
            modbus_limits: ThresholdLimits {
                high_ceiling_c: parse_or(
                    &read,
                    "FANBUS_MODBUS_HIGH_CEILING",
                    base.modbus_limits.high_ceiling_c,
                )?,
                low_ceiling_c: parse_or(&read, "FANBUS_MODBUS_LOW_CEILING", base.modbus_limits.low_ceiling_c)?,
            },
            node_limits: ThresholdLimits {
                high_ceiling_c: parse_or(&read, "FANBUS_NODE_HIGH_CEILING", base.node_limits.high_ceiling_c)?,
                low_ceiling_c: parse_or(&read, "FANBUS_NODE_LOW_CEILING", base.node_limits.low_ceiling_c)?,
            },
            users: match read("FANBUS_USERS") {
                Some(value) => parse_users(&value)?,
                None => base.users,
            },
            policy: parse_or(&read, "FANBUS_POLICY", base.policy)?,
            trusted_peers: match read("FANBUS_TRUSTED_PEERS") {
                Some(value) => parse_list(&value, "FANBUS_TRUSTED_PEERS")?,
                None => base.trusted_peers,
            },
            sensor: parse_or(&read, "FANBUS_SENSOR", base.sensor)?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Defaults must satisfy the same ordering and ceilings external writes do.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let high = self.defaults.high_threshold_c;
        let low = self.defaults.low_threshold_c;
        if !(0.0 <= low && low < high) {
            return Err(ConfigError::Thresholds(format!(
                "need 0 <= low < high, got low={low} high={high}"
            )));
        }
        for (name, limits) in [("modbus", self.modbus_limits), ("node", self.node_limits)] {
            if high > limits.high_ceiling_c || low > limits.low_ceiling_c {
                return Err(ConfigError::Thresholds(format!(
                    "defaults high={high} low={low} exceed {name} ceilings {}/{}",
                    limits.high_ceiling_c, limits.low_ceiling_c
                )));
            }
        }
        if self.tick.is_zero() {
            return Err(ConfigError::Invalid("FANBUS_TICK_MS".to_string(), "0".to_string()));
        }
        Ok(())
    }

    pub fn authenticator(&self) -> RoleAuthenticator {
        let mut authenticator = RoleAuthenticator::new(AccessPolicy::from_preset(self.policy));
        for user in &self.users {
            authenticator = authenticator.with_user(user.username.clone(), user.password.clone());
        }
        for peer in &self.trusted_peers {
            authenticator = authenticator.with_trusted_peer(*peer);
        }
        authenticator
    }
}

fn parse_or<T, F>(read: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match read(key) {
        Some(value) => value
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::Invalid(key.to_string(), value)),
        None => Ok(default),
    }
}

fn parse_list<T: FromStr>(value: &str, key: &str) -> Result<Vec<T>, ConfigError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| {
            item.parse::<T>()
                .map_err(|_| ConfigError::Invalid(key.to_string(), item.to_string()))
        })
        .collect()
}

/// `user:password[,user:password...]`
fn parse_users(value: &str) -> Result<Vec<Credentials>, ConfigError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .enumerate()
        .map(|(position, item)| match item.split_once(':') {
            Some((username, password)) if !username.is_empty() => Ok(Credentials {
                username: username.to_string(),
                password: password.to_string(),
            }),
            _ => Err(ConfigError::Invalid(
                "FANBUS_USERS".to_string(),
                format!("entry {position} is not user:password"),
            )),
        })
        .collect()
}
