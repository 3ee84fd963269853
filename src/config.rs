//! Configuration types and the property store abstraction.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use parking_lot::RwLock;

/// Property holding the control policy selector (`0`/`normal`,
/// `1`/`legacy`, `2`/`bypass`).
pub const CONTROL_MODE_KEY: &str = "amp_hal_control";

/// Property holding routing table overrides (`dev,config;dev,config;...`).
pub const DEVICE_MAP_KEY: &str = "amp_hal_device_map";

/// Which control policy drives the hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ControlMode {
    /// Full off/reconfigure/on with retried power-on.
    #[default]
    Normal,
    /// Call-aware sequence using the lower-level stereo routines.
    Legacy,
    /// Degraded bypass mode; no retries.
    Bypass,
}

impl ControlMode {
    /// Parses a property value.
    ///
    /// Accepts the numeric selector or the mode name. Unknown numbers select
    /// [`ControlMode::Normal`]; unparseable text returns `None`.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        if let Ok(raw) = value.parse::<i32>() {
            return Some(match raw {
                1 => Self::Legacy,
                2 => Self::Bypass,
                _ => Self::Normal,
            });
        }
        match value.to_ascii_lowercase().as_str() {
            "normal" => Some(Self::Normal),
            "legacy" => Some(Self::Legacy),
            "bypass" => Some(Self::Bypass),
            _ => None,
        }
    }

    /// Reads the selector from the property store, defaulting to
    /// [`ControlMode::Normal`].
    #[must_use]
    pub fn from_properties(properties: &dyn PropertySource) -> Self {
        let Some(value) = properties.get(CONTROL_MODE_KEY) else {
            return Self::default();
        };
        Self::parse(&value).unwrap_or_else(|| {
            tracing::warn!(value = %value, "Unrecognized amplifier control mode, using normal");
            Self::default()
        })
    }
}

impl fmt::Display for ControlMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Normal => f.write_str("normal"),
            Self::Legacy => f.write_str("legacy"),
            Self::Bypass => f.write_str("bypass"),
        }
    }
}

/// Tunables for the reconciliation worker.
///
/// Use [`AmpConfig::default()`] for the values the amplifier was tuned with.
///
/// # Example
///
/// ```
/// use speaker_amp::AmpConfig;
/// use std::time::Duration;
///
/// let config = AmpConfig {
///     retry_interval: Duration::from_millis(2),
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone)]
pub struct AmpConfig {
    /// Sleep between power-on attempts for the normal policy.
    ///
    /// Default: 5ms
    pub retry_interval: Duration,

    /// Sleep between power-on attempts while waiting for the modem clock in
    /// a call (legacy policy).
    ///
    /// Default: 10ms
    pub call_retry_interval: Duration,

    /// Run the one-time calibration when the amplifier goes idle.
    ///
    /// Default: true
    pub calibrate_when_idle: bool,

    /// Name of the worker thread.
    ///
    /// Default: `amp-reconcile`
    pub thread_name: String,
}

impl Default for AmpConfig {
    fn default() -> Self {
        Self {
            retry_interval: Duration::from_millis(5),
            call_retry_interval: Duration::from_millis(10),
            calibrate_when_idle: true,
            thread_name: "amp-reconcile".to_string(),
        }
    }
}

/// Source of string properties (system properties, environment, tests).
///
/// Read at open and again whenever the worker goes idle, so implementations
/// may change values at runtime.
pub trait PropertySource: Send + Sync {
    /// Returns the value for `key`, or `None` if unset.
    fn get(&self, key: &str) -> Option<String>;
}

/// Reads properties from environment variables.
///
/// The key is upper-cased with `.` replaced by `_`: `amp_hal_control` is read
/// from `AMP_HAL_CONTROL`.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvProperties;

impl EnvProperties {
    fn var_name(key: &str) -> String {
        key.replace('.', "_").to_ascii_uppercase()
    }
}

impl PropertySource for EnvProperties {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(Self::var_name(key)).ok()
    }
}

/// In-memory property store that can be changed while the amplifier runs.
#[derive(Debug, Default)]
pub struct MapProperties {
    values: RwLock<HashMap<String, String>>,
}

impl MapProperties {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a value, replacing any previous one.
    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        self.values.write().insert(key.into(), value.into());
    }

    /// Removes a value.
    pub fn remove(&self, key: &str) {
        self.values.write().remove(key);
    }
}

impl PropertySource for MapProperties {
    fn get(&self, key: &str) -> Option<String> {
        self.values.read().get(key).cloned()
    }
}

impl<K, V> FromIterator<(K, V)> for MapProperties
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let values = iter
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self {
            values: RwLock::new(values),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_mode_parse_numbers() {
        assert_eq!(ControlMode::parse("0"), Some(ControlMode::Normal));
        assert_eq!(ControlMode::parse("1"), Some(ControlMode::Legacy));
        assert_eq!(ControlMode::parse(" 2 "), Some(ControlMode::Bypass));
        assert_eq!(ControlMode::parse("7"), Some(ControlMode::Normal));
    }

    #[test]
    fn test_control_mode_parse_names() {
        assert_eq!(ControlMode::parse("Legacy"), Some(ControlMode::Legacy));
        assert_eq!(ControlMode::parse("bypass"), Some(ControlMode::Bypass));
        assert_eq!(ControlMode::parse("turbo"), None);
    }

    #[test]
    fn test_control_mode_from_properties() {
        let props = MapProperties::new();
        assert_eq!(ControlMode::from_properties(&props), ControlMode::Normal);

        props.set(CONTROL_MODE_KEY, "1");
        assert_eq!(ControlMode::from_properties(&props), ControlMode::Legacy);

        props.set(CONTROL_MODE_KEY, "garbage");
        assert_eq!(ControlMode::from_properties(&props), ControlMode::Normal);
    }

    #[test]
    fn test_amp_config_defaults() {
        let config = AmpConfig::default();
        assert_eq!(config.retry_interval, Duration::from_millis(5));
        assert_eq!(config.call_retry_interval, Duration::from_millis(10));
        assert!(config.calibrate_when_idle);
        assert_eq!(config.thread_name, "amp-reconcile");
    }

    #[test]
    fn test_map_properties_set_and_remove() {
        let props: MapProperties = [(DEVICE_MAP_KEY, "5,2")].into_iter().collect();
        assert_eq!(props.get(DEVICE_MAP_KEY).as_deref(), Some("5,2"));
        props.remove(DEVICE_MAP_KEY);
        assert_eq!(props.get(DEVICE_MAP_KEY), None);
    }

    #[test]
    fn test_env_var_name() {
        assert_eq!(EnvProperties::var_name(CONTROL_MODE_KEY), "AMP_HAL_CONTROL");
        assert_eq!(EnvProperties::var_name("persist.amp.mode"), "PERSIST_AMP_MODE");
    }
}
