//! Logical output device to amplifier topology routing.
//!
//! The audio framework reports output routes as logical device ids. The
//! [`RoutingTable`] maps each id to the physical configuration the amplifier
//! should drive. It is built once from a compiled-in default table, optionally
//! patched by an override string of the form `dev,config;dev,config;...`, and
//! is read-only afterwards.

use std::fmt;

use crate::config::{PropertySource, DEVICE_MAP_KEY};
use crate::state::SpeakerLayout;

/// Logical output device identifier reported by the audio framework.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(pub u32);

#[allow(missing_docs)]
impl DeviceId {
    pub const NONE: Self = Self(0);
    pub const HANDSET: Self = Self(1);
    pub const SPEAKER: Self = Self(2);
    pub const SPEAKER_EXTERNAL_1: Self = Self(3);
    pub const SPEAKER_EXTERNAL_2: Self = Self(4);
    pub const SPEAKER_REVERSE: Self = Self(5);
    pub const SPEAKER_VBAT: Self = Self(6);
    pub const LINE: Self = Self(7);
    pub const HEADPHONES: Self = Self(8);
    pub const SPEAKER_AND_HEADPHONES: Self = Self(11);
    pub const SPEAKER_AND_LINE: Self = Self(12);
    pub const VOICE_HANDSET: Self = Self(15);
    pub const VOICE_SPEAKER: Self = Self(16);
    pub const VOICE_SPEAKER_VBAT: Self = Self(17);
    pub const VOICE_SPEAKER_2: Self = Self(18);
    pub const VOICE_SPEAKER_2_VBAT: Self = Self(19);
    pub const VOICE_HEADPHONES: Self = Self(20);
    pub const SPEAKER_AND_HDMI: Self = Self(23);
    pub const SPEAKER_AND_DISPLAY_PORT: Self = Self(25);
    pub const SPEAKER_AND_BT_A2DP: Self = Self(29);
    pub const SPEAKER_AND_BT_SCO: Self = Self(30);
    pub const SPEAKER_AND_BT_SCO_WB: Self = Self(31);
    pub const SPEAKER_AND_USB_HEADSET: Self = Self(39);
    pub const SPEAKER_AND_ANC_HEADSET: Self = Self(45);
    pub const SPEAKER_AND_ANC_FB_HEADSET: Self = Self(46);
    pub const SPEAKER_PROTECTED: Self = Self(48);
    pub const VOICE_SPEAKER_PROTECTED: Self = Self(49);
    pub const VOICE_SPEAKER_2_PROTECTED: Self = Self(50);
    pub const SPEAKER_PROTECTED_VBAT: Self = Self(51);
    pub const VOICE_SPEAKER_PROTECTED_VBAT: Self = Self(52);
    pub const VOICE_SPEAKER_2_PROTECTED_VBAT: Self = Self(53);
    pub const SPEAKER_WSA: Self = Self(54);
    pub const VOICE_SPEAKER_WSA: Self = Self(55);
    pub const VOICE_SPEAKER_2_WSA: Self = Self(56);
    pub const SPEAKER_PROTECTED_RAS: Self = Self(57);
    pub const SPEAKER_PROTECTED_VBAT_RAS: Self = Self(58);
    pub const VOICE_SPEAKER_AND_VOICE_HEADPHONES: Self = Self(59);
    pub const VOICE_SPEAKER_AND_VOICE_ANC_HEADSET: Self = Self(60);
    pub const VOICE_SPEAKER_AND_VOICE_ANC_FB_HEADSET: Self = Self(61);
}

impl DeviceId {
    /// Highest device id the table knows about.
    pub const LAST: Self = Self::VOICE_SPEAKER_AND_VOICE_ANC_FB_HEADSET;

    /// Returns `true` if the id is inside the routing table.
    #[must_use]
    pub fn in_range(self) -> bool {
        self <= Self::LAST
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for DeviceId {
    fn from(raw: u32) -> Self {
        Self(raw)
    }
}

/// Physical amplifier configuration for a logical device.
///
/// The numeric values match the override string format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PhysicalConfig {
    /// The device does not route through the amplifier.
    #[default]
    Unrouted,
    /// Drive both speakers.
    Stereo,
    /// Drive a single speaker.
    Mono,
}

impl PhysicalConfig {
    /// Parses the numeric override value.
    #[must_use]
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Self::Unrouted),
            1 => Some(Self::Stereo),
            2 => Some(Self::Mono),
            _ => None,
        }
    }

    /// Hardware topology, or `None` if unrouted.
    #[must_use]
    pub fn layout(self) -> Option<SpeakerLayout> {
        match self {
            Self::Unrouted => None,
            Self::Stereo => Some(SpeakerLayout::Stereo),
            Self::Mono => Some(SpeakerLayout::Mono),
        }
    }
}

const DEFAULT_ROUTES: &[(DeviceId, PhysicalConfig)] = &[
    (DeviceId::HANDSET, PhysicalConfig::Mono),
    (DeviceId::SPEAKER, PhysicalConfig::Stereo),
    (DeviceId::SPEAKER_REVERSE, PhysicalConfig::Stereo),
    (DeviceId::SPEAKER_VBAT, PhysicalConfig::Stereo),
    (DeviceId::SPEAKER_AND_HEADPHONES, PhysicalConfig::Stereo),
    (DeviceId::SPEAKER_AND_LINE, PhysicalConfig::Stereo),
    (DeviceId::VOICE_HANDSET, PhysicalConfig::Mono),
    // "16,2;17,2;18,2;19,2" moves these four voice routes to mono.
    (DeviceId::VOICE_SPEAKER, PhysicalConfig::Stereo),
    (DeviceId::VOICE_SPEAKER_VBAT, PhysicalConfig::Stereo),
    (DeviceId::VOICE_SPEAKER_2, PhysicalConfig::Stereo),
    (DeviceId::VOICE_SPEAKER_2_VBAT, PhysicalConfig::Stereo),
    (DeviceId::SPEAKER_AND_HDMI, PhysicalConfig::Stereo),
    (DeviceId::SPEAKER_AND_DISPLAY_PORT, PhysicalConfig::Stereo),
    (DeviceId::SPEAKER_AND_BT_A2DP, PhysicalConfig::Stereo),
    (DeviceId::SPEAKER_AND_BT_SCO, PhysicalConfig::Stereo),
    (DeviceId::SPEAKER_AND_BT_SCO_WB, PhysicalConfig::Stereo),
    (DeviceId::SPEAKER_AND_USB_HEADSET, PhysicalConfig::Stereo),
    (DeviceId::SPEAKER_AND_ANC_HEADSET, PhysicalConfig::Stereo),
    (DeviceId::SPEAKER_AND_ANC_FB_HEADSET, PhysicalConfig::Stereo),
    (DeviceId::SPEAKER_PROTECTED, PhysicalConfig::Stereo),
    (DeviceId::VOICE_SPEAKER_PROTECTED, PhysicalConfig::Stereo),
    (DeviceId::VOICE_SPEAKER_2_PROTECTED, PhysicalConfig::Stereo),
    (DeviceId::SPEAKER_PROTECTED_VBAT, PhysicalConfig::Stereo),
    (DeviceId::VOICE_SPEAKER_PROTECTED_VBAT, PhysicalConfig::Stereo),
    (DeviceId::VOICE_SPEAKER_2_PROTECTED_VBAT, PhysicalConfig::Stereo),
    (DeviceId::SPEAKER_WSA, PhysicalConfig::Stereo),
    (DeviceId::VOICE_SPEAKER_WSA, PhysicalConfig::Mono),
    (DeviceId::VOICE_SPEAKER_2_WSA, PhysicalConfig::Mono),
    (DeviceId::SPEAKER_PROTECTED_RAS, PhysicalConfig::Stereo),
    (DeviceId::SPEAKER_PROTECTED_VBAT_RAS, PhysicalConfig::Stereo),
    (DeviceId::VOICE_SPEAKER_AND_VOICE_HEADPHONES, PhysicalConfig::Mono),
    (DeviceId::VOICE_SPEAKER_AND_VOICE_ANC_HEADSET, PhysicalConfig::Mono),
    (DeviceId::VOICE_SPEAKER_AND_VOICE_ANC_FB_HEADSET, PhysicalConfig::Mono),
];

/// Why an override entry was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
enum OverrideError {
    MissingComma,
    BadDevice,
    BadConfig,
    DeviceOutOfRange(u32),
}

impl fmt::Display for OverrideError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingComma => f.write_str("expected `device,config`"),
            Self::BadDevice => f.write_str("device is not a number"),
            Self::BadConfig => f.write_str("config must be 0, 1 or 2"),
            Self::DeviceOutOfRange(dev) => write!(f, "device {dev} is beyond the routing table"),
        }
    }
}

fn parse_override(entry: &str) -> Result<(DeviceId, PhysicalConfig), OverrideError> {
    let (device, config) = entry.split_once(',').ok_or(OverrideError::MissingComma)?;
    let device: u32 = device
        .trim()
        .parse()
        .map_err(|_| OverrideError::BadDevice)?;
    let config = config
        .trim()
        .parse()
        .ok()
        .and_then(PhysicalConfig::from_raw)
        .ok_or(OverrideError::BadConfig)?;
    let device = DeviceId(device);
    if !device.in_range() {
        return Err(OverrideError::DeviceOutOfRange(device.0));
    }
    Ok((device, config))
}

/// Lookup table from [`DeviceId`] to [`PhysicalConfig`].
///
/// Built once at startup and never mutated afterwards, so it can be shared
/// across threads without locking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingTable {
    routes: Vec<PhysicalConfig>,
}

impl Default for RoutingTable {
    fn default() -> Self {
        Self::new()
    }
}

impl RoutingTable {
    /// Creates the compiled-in default table.
    #[must_use]
    pub fn new() -> Self {
        let mut routes = vec![PhysicalConfig::Unrouted; DeviceId::LAST.0 as usize + 1];
        for &(device, config) in DEFAULT_ROUTES {
            routes[device.0 as usize] = config;
        }
        Self { routes }
    }

    /// Creates the default table patched by an override string.
    ///
    /// Entries are `device,config` pairs separated by `;`. Empty segments are
    /// skipped. The first malformed entry is logged and ends parsing; entries
    /// before it stay applied.
    #[must_use]
    pub fn with_overrides(overrides: &str) -> Self {
        let mut table = Self::new();
        for entry in overrides.split(';') {
            if entry.trim().is_empty() {
                continue;
            }
            match parse_override(entry) {
                Ok((device, config)) => {
                    tracing::debug!(
                        %device,
                        from = ?table.routes[device.0 as usize],
                        to = ?config,
                        "Overriding device route"
                    );
                    table.routes[device.0 as usize] = config;
                }
                Err(e) => {
                    tracing::error!(entry, error = %e, "Error parsing device map override, ignoring the rest");
                    break;
                }
            }
        }
        table
    }

    /// Creates the table using the override string stored under
    /// [`DEVICE_MAP_KEY`], if any.
    #[must_use]
    pub fn from_properties(properties: &dyn PropertySource) -> Self {
        match properties.get(DEVICE_MAP_KEY) {
            Some(overrides) => Self::with_overrides(&overrides),
            None => Self::new(),
        }
    }

    /// Raw table entry, `None` if the id is out of range.
    #[must_use]
    pub fn config_for(&self, device: DeviceId) -> Option<PhysicalConfig> {
        self.routes.get(device.0 as usize).copied()
    }

    /// Resolves a logical device to the topology the amplifier drives.
    ///
    /// Never fails: out-of-range and unrouted devices are logged and driven
    /// as stereo.
    #[must_use]
    pub fn resolve(&self, device: DeviceId) -> SpeakerLayout {
        self.try_resolve(device).unwrap_or(SpeakerLayout::Stereo)
    }

    /// Like [`resolve`](Self::resolve) but reports whether the stereo
    /// fallback was taken (`None`).
    pub(crate) fn try_resolve(&self, device: DeviceId) -> Option<SpeakerLayout> {
        match self.config_for(device) {
            None => {
                tracing::warn!(%device, "Device out of range, mapping needs updating; routing as stereo");
                None
            }
            Some(config) => {
                let layout = config.layout();
                if layout.is_none() {
                    tracing::warn!(%device, "Device not routed; routing as stereo");
                }
                layout
            }
        }
    }
}
