//! Control policies: how a desired state becomes hardware calls.
//!
//! Three interchangeable strategies implement [`ControlPolicy`]. The active one
//! is picked by [`ControlMode::policy()`], a plain match over the selector.
//!
//! | Policy | Reconfigure | Power on | Retries |
//! |--------|-------------|----------|---------|
//! | [`NormalPolicy`] | `speaker_off`, `set_device` | `speaker_on(mode)` | yes |
//! | [`LegacyPolicy`] | `speaker_needed(0)`, `stereo_speaker_off`, `set_device` | in call: clock request + `speaker_on(mode)`; otherwise `stereo_speaker_on` | in call only |
//! | [`BypassPolicy`] | none | `bypass_speaker_on` whenever enabled | never |

use std::time::Duration;

use crate::config::{AmpConfig, ControlMode};
use crate::error::HardwareError;
use crate::hardware::AmplifierHardware;
use crate::state::AmpState;

/// Outcome of a policy step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyResult {
    /// The hardware now reflects the desired state.
    Applied,
    /// Power-on was refused; the caller should retry with
    /// [`ControlPolicy::retry_power_on`].
    PowerOnFailed(HardwareError),
}

/// A state-transition strategy.
///
/// Policies are stateless; everything they need arrives as arguments. They
/// never sleep or retry themselves: the worker owns the retry loop so it can
/// abandon stale attempts.
pub trait ControlPolicy: Send + Sync {
    /// Selector value for this policy.
    fn mode(&self) -> ControlMode;

    /// Drives the hardware from `previous` to `desired`.
    ///
    /// `reinitialize` requests the full off/reconfigure sequence because the
    /// topology or orientation changed (or the last pass did not complete).
    fn apply(
        &self,
        hw: &mut dyn AmplifierHardware,
        desired: &AmpState,
        previous: &AmpState,
        reinitialize: bool,
    ) -> PolicyResult;

    /// Repeats the step that failed with [`PolicyResult::PowerOnFailed`].
    fn retry_power_on(&self, hw: &mut dyn AmplifierHardware, desired: &AmpState)
        -> PolicyResult;

    /// Sleep between power-on attempts.
    fn retry_interval(&self, config: &AmpConfig) -> Duration;

    /// Whether this policy leaves the chip powered for `state`.
    fn is_powered(&self, state: &AmpState) -> bool {
        state.is_on()
    }
}

fn power_on(hw: &mut dyn AmplifierHardware, desired: &AmpState) -> PolicyResult {
    match hw.speaker_on(desired.mode) {
        Ok(()) => PolicyResult::Applied,
        Err(e) => PolicyResult::PowerOnFailed(e),
    }
}

/// Full power cycle on reconfiguration; retried `speaker_on`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NormalPolicy;

impl ControlPolicy for NormalPolicy {
    fn mode(&self) -> ControlMode {
        ControlMode::Normal
    }

    fn apply(
        &self,
        hw: &mut dyn AmplifierHardware,
        desired: &AmpState,
        previous: &AmpState,
        reinitialize: bool,
    ) -> PolicyResult {
        if reinitialize {
            hw.speaker_off();
            hw.set_device(desired.device);
            hw.set_reversed(desired.reversed);
        }
        if desired.is_on() {
            return power_on(hw, desired);
        }
        if previous.is_on() && !reinitialize {
            hw.speaker_off();
        }
        PolicyResult::Applied
    }

    fn retry_power_on(
        &self,
        hw: &mut dyn AmplifierHardware,
        desired: &AmpState,
    ) -> PolicyResult {
        power_on(hw, desired)
    }

    fn retry_interval(&self, config: &AmpConfig) -> Duration {
        config.retry_interval
    }
}

/// Call-aware sequence over the low-level stereo routines.
///
/// In a call the amplifier needs the modem clock, so the speaker path is
/// requested first and power-on is retried until the clock shows up. Outside
/// a call the direct stereo enable is used and cannot fail.
#[derive(Debug, Clone, Copy, Default)]
pub struct LegacyPolicy;

impl ControlPolicy for LegacyPolicy {
    fn mode(&self) -> ControlMode {
        ControlMode::Legacy
    }

    fn apply(
        &self,
        hw: &mut dyn AmplifierHardware,
        desired: &AmpState,
        previous: &AmpState,
        reinitialize: bool,
    ) -> PolicyResult {
        if reinitialize {
            hw.set_speaker_needed(false);
            hw.stereo_speaker_off();
            hw.set_device(desired.device);
            hw.set_reversed(desired.reversed);
        }
        if desired.is_on() {
            if desired.in_call {
                hw.set_speaker_needed(true);
                return power_on(hw, desired);
            }
            hw.set_mode(desired.mode);
            hw.set_speaker_needed(true);
            hw.stereo_speaker_on();
            return PolicyResult::Applied;
        }
        if previous.is_on() && !reinitialize {
            hw.set_speaker_needed(false);
            hw.stereo_speaker_off();
        }
        PolicyResult::Applied
    }

    fn retry_power_on(
        &self,
        hw: &mut dyn AmplifierHardware,
        desired: &AmpState,
    ) -> PolicyResult {
        power_on(hw, desired)
    }

    fn retry_interval(&self, config: &AmpConfig) -> Duration {
        config.call_retry_interval
    }
}

/// Degraded mode: bypass enable whenever the output is enabled.
///
/// Streams, mode and topology are ignored. In a call only the left channel is
/// requested.
#[derive(Debug, Clone, Copy, Default)]
pub struct BypassPolicy;

impl BypassPolicy {
    fn drive(hw: &mut dyn AmplifierHardware, desired: &AmpState) {
        if desired.enabled {
            hw.set_stereo_speaker_needed(true, !desired.in_call);
            hw.bypass_speaker_on();
        } else {
            hw.set_stereo_speaker_needed(false, false);
            hw.bypass_speaker_off();
        }
    }
}

impl ControlPolicy for BypassPolicy {
    fn mode(&self) -> ControlMode {
        ControlMode::Bypass
    }

    fn is_powered(&self, state: &AmpState) -> bool {
        state.enabled
    }

    fn apply(
        &self,
        hw: &mut dyn AmplifierHardware,
        desired: &AmpState,
        _previous: &AmpState,
        _reinitialize: bool,
    ) -> PolicyResult {
        Self::drive(hw, desired);
        PolicyResult::Applied
    }

    fn retry_power_on(
        &self,
        hw: &mut dyn AmplifierHardware,
        desired: &AmpState,
    ) -> PolicyResult {
        Self::drive(hw, desired);
        PolicyResult::Applied
    }

    fn retry_interval(&self, config: &AmpConfig) -> Duration {
        config.retry_interval
    }
}

static NORMAL: NormalPolicy = NormalPolicy;
static LEGACY: LegacyPolicy = LegacyPolicy;
static BYPASS: BypassPolicy = BypassPolicy;

impl ControlMode {
    /// The policy implementing this selector.
    #[must_use]
    pub fn policy(self) -> &'static dyn ControlPolicy {
        match self {
            Self::Normal => &NORMAL,
            Self::Legacy => &LEGACY,
            Self::Bypass => &BYPASS,
        }
    }
}
