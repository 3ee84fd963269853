//! Amplifier state model shared by the store, the worker and the policies.

use std::fmt;

/// Physical speaker topology driven by the amplifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SpeakerLayout {
    /// Both amplifier channels drive speakers.
    #[default]
    Stereo,
    /// A single channel drives the earpiece/speaker.
    Mono,
}

impl SpeakerLayout {
    /// Index passed to the vendor `set_device` routine.
    #[must_use]
    pub fn index(self) -> i32 {
        match self {
            Self::Stereo => 0,
            Self::Mono => 1,
        }
    }
}

impl fmt::Display for SpeakerLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stereo => f.write_str("stereo"),
            Self::Mono => f.write_str("mono"),
        }
    }
}

/// Amplifier tuning profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AmpMode {
    /// Media playback profile.
    #[default]
    Music,
    /// Voice call profile.
    Voice,
}

impl AmpMode {
    /// Index passed to the vendor `speaker_on`/`set_mode` routines.
    #[must_use]
    pub fn index(self) -> i32 {
        match self {
            Self::Music => 0,
            Self::Voice => 1,
        }
    }
}

/// Audio mode as reported by the audio framework.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioMode {
    /// Regular playback.
    Normal,
    /// A ringtone is playing.
    Ringtone,
    /// A cellular call is active.
    InCall,
    /// A VoIP/communication session is active.
    InCommunication,
    /// A mode value this crate does not know about.
    Other(i32),
}

impl AudioMode {
    /// Maps a raw framework mode value.
    #[must_use]
    pub fn from_raw(raw: i32) -> Self {
        match raw {
            0 => Self::Normal,
            1 => Self::Ringtone,
            2 => Self::InCall,
            3 => Self::InCommunication,
            other => Self::Other(other),
        }
    }

    /// Maps the framework mode onto the amplifier profile.
    ///
    /// Returns `None` for unrecognized modes; callers fall back to
    /// [`AmpMode::Music`].
    #[must_use]
    pub fn amp_mode(self) -> Option<AmpMode> {
        match self {
            Self::Normal | Self::Ringtone => Some(AmpMode::Music),
            Self::InCall | Self::InCommunication => Some(AmpMode::Voice),
            Self::Other(_) => None,
        }
    }
}

/// The amplifier's configuration, either desired (written by producers) or
/// applied (last sent to hardware by the worker).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AmpState {
    /// Number of active output streams.
    pub streams: u32,
    /// A voice call is routed through the amplifier.
    pub in_call: bool,
    /// Selected speaker topology.
    pub device: SpeakerLayout,
    /// Selected tuning profile.
    pub mode: AmpMode,
    /// An amplified output device is enabled.
    pub enabled: bool,
    /// Left and right channels are swapped.
    pub reversed: bool,
    /// One-time calibration has completed.
    pub calibration_done: bool,
}

impl AmpState {
    /// Whether the amplifier should be powered: `enabled && (streams > 0 || in_call)`.
    #[must_use]
    pub fn is_on(&self) -> bool {
        self.enabled && (self.streams > 0 || self.in_call)
    }
}

/// What changed between the applied and the desired state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StateDiff {
    /// Speaker topology differs.
    pub device_changed: bool,
    /// Orientation differs.
    pub reversed_changed: bool,
    /// The derived on-condition differs.
    pub power_changed: bool,
    /// Tuning profile differs.
    pub mode_changed: bool,
    /// `in_call` or `enabled` differs without flipping the on-condition.
    pub call_changed: bool,
}

impl StateDiff {
    /// Compares the last applied state with a fresh desired snapshot.
    #[must_use]
    pub fn between(applied: &AmpState, desired: &AmpState) -> Self {
        Self {
            device_changed: applied.device != desired.device,
            reversed_changed: applied.reversed != desired.reversed,
            power_changed: applied.is_on() != desired.is_on(),
            mode_changed: applied.mode != desired.mode,
            call_changed: applied.in_call != desired.in_call
                || applied.enabled != desired.enabled,
        }
    }

    /// A device or orientation change needs the full off/reconfigure/on cycle.
    #[must_use]
    pub fn requires_reinit(&self) -> bool {
        self.device_changed || self.reversed_changed
    }

    /// Nothing material differs; hardware must not be touched.
    ///
    /// A stream count change that keeps the on-condition is not material.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        !(self.device_changed
            || self.reversed_changed
            || self.power_changed
            || self.mode_changed
            || self.call_changed)
    }
}

/// Logs both states side by side at debug level.
pub(crate) fn log_transition(label: &str, previous: &AmpState, current: &AmpState) {
    tracing::debug!(
        label,
        enabled = %format_args!("{}({})", current.enabled, previous.enabled),
        device = %format_args!("{}({})", current.device, previous.device),
        streams = %format_args!("{}({})", current.streams, previous.streams),
        in_call = %format_args!("{}({})", current.in_call, previous.in_call),
        mode = %format_args!("{:?}({:?})", current.mode, previous.mode),
        reversed = %format_args!("{}({})", current.reversed, previous.reversed),
        "amplifier state new(applied)"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn on_state() -> AmpState {
        AmpState {
            streams: 1,
            enabled: true,
            ..AmpState::default()
        }
    }

    #[test]
    fn test_default_state_is_off() {
        let state = AmpState::default();
        assert!(!state.is_on());
        assert_eq!(state.device, SpeakerLayout::Stereo);
        assert_eq!(state.mode, AmpMode::Music);
    }

    #[test]
    fn test_is_on_requires_enabled() {
        let mut state = on_state();
        assert!(state.is_on());
        state.enabled = false;
        assert!(!state.is_on());
    }

    #[test]
    fn test_is_on_with_call_and_no_streams() {
        let state = AmpState {
            in_call: true,
            enabled: true,
            ..AmpState::default()
        };
        assert!(state.is_on());
    }

    #[test]
    fn test_diff_identical_is_noop() {
        let diff = StateDiff::between(&on_state(), &on_state());
        assert!(diff.is_noop());
        assert!(!diff.requires_reinit());
    }

    #[test]
    fn test_diff_device_requires_reinit() {
        let applied = on_state();
        let desired = AmpState {
            device: SpeakerLayout::Mono,
            ..applied
        };
        let diff = StateDiff::between(&applied, &desired);
        assert!(diff.requires_reinit());
        assert!(!diff.power_changed);
    }

    #[test]
    fn test_diff_mode_only() {
        let applied = on_state();
        let desired = AmpState {
            mode: AmpMode::Voice,
            ..applied
        };
        let diff = StateDiff::between(&applied, &desired);
        assert!(diff.mode_changed);
        assert!(!diff.requires_reinit());
        assert!(!diff.power_changed);
        assert!(!diff.is_noop());
    }

    #[test]
    fn test_diff_extra_stream_is_noop() {
        let applied = on_state();
        let desired = AmpState {
            streams: 2,
            ..applied
        };
        assert!(StateDiff::between(&applied, &desired).is_noop());
    }

    #[test]
    fn test_diff_call_flag_is_material() {
        let applied = on_state();
        let desired = AmpState {
            in_call: true,
            ..applied
        };
        let diff = StateDiff::between(&applied, &desired);
        assert!(diff.call_changed);
        assert!(!diff.is_noop());
    }

    #[test]
    fn test_audio_mode_mapping() {
        assert_eq!(AudioMode::from_raw(0).amp_mode(), Some(AmpMode::Music));
        assert_eq!(AudioMode::from_raw(1).amp_mode(), Some(AmpMode::Music));
        assert_eq!(AudioMode::from_raw(2).amp_mode(), Some(AmpMode::Voice));
        assert_eq!(AudioMode::from_raw(3).amp_mode(), Some(AmpMode::Voice));
        assert_eq!(AudioMode::from_raw(9), AudioMode::Other(9));
        assert_eq!(AudioMode::Other(9).amp_mode(), None);
    }

    #[test]
    fn test_layout_index() {
        assert_eq!(SpeakerLayout::Stereo.index(), 0);
        assert_eq!(SpeakerLayout::Mono.index(), 1);
    }
}
