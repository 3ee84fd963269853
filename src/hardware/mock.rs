//! Mock amplifier hardware for testing without a vendor library.

use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::AmplifierHardware;
use crate::error::HardwareError;
use crate::state::{AmpMode, SpeakerLayout};

/// Status returned by scripted power-on refusals.
const REFUSED_STATUS: i32 = -2;

/// A call made on [`MockHardware`], in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HardwareCall {
    /// `speaker_on` succeeded.
    SpeakerOn(AmpMode),
    /// `speaker_on` was refused.
    SpeakerOnRefused(AmpMode),
    /// `speaker_off`.
    SpeakerOff,
    /// `set_device`.
    SetDevice(SpeakerLayout),
    /// `set_mode`.
    SetMode(AmpMode),
    /// `set_speaker_needed`.
    SpeakerNeeded(bool),
    /// `set_stereo_speaker_needed`.
    StereoSpeakerNeeded(bool, bool),
    /// `stereo_speaker_on`.
    StereoSpeakerOn,
    /// `stereo_speaker_off`.
    StereoSpeakerOff,
    /// `bypass_speaker_on`.
    BypassOn,
    /// `bypass_speaker_off`.
    BypassOff,
    /// `calibrate`.
    Calibrate(i32),
    /// `set_reversed`.
    SetReversed(bool),
}

type CallHook = Box<dyn FnMut(&HardwareCall) + Send>;

#[derive(Default)]
struct Physical {
    powered: bool,
    layout: Option<SpeakerLayout>,
}

struct MockShared {
    calls: Mutex<Vec<HardwareCall>>,
    physical: Mutex<Physical>,
    power_on_failures: AtomicU32,
    calibration_status: AtomicI32,
    hook: Mutex<Option<CallHook>>,
}

/// Mock amplifier that records every call and simulates the chip's power
/// state.
///
/// Power-on refusals and calibration results can be scripted, and a hook can
/// react to calls (for example to change desired state mid-retry).
///
/// # Example
///
/// ```
/// use speaker_amp::{AmpMode, AmplifierHardware, HardwareCall, MockHardware};
///
/// let mut hw = MockHardware::new().with_power_on_failures(1);
/// let probe = hw.probe();
///
/// assert!(hw.speaker_on(AmpMode::Music).is_err());
/// assert!(hw.speaker_on(AmpMode::Music).is_ok());
/// assert!(probe.is_powered());
/// assert_eq!(probe.calls().last(), Some(&HardwareCall::SpeakerOn(AmpMode::Music)));
/// ```
pub struct MockHardware {
    shared: Arc<MockShared>,
}

impl Default for MockHardware {
    fn default() -> Self {
        Self::new()
    }
}

impl MockHardware {
    /// Creates a mock that accepts every call.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(MockShared {
                calls: Mutex::new(Vec::new()),
                physical: Mutex::new(Physical::default()),
                power_on_failures: AtomicU32::new(0),
                calibration_status: AtomicI32::new(0),
                hook: Mutex::new(None),
            }),
        }
    }

    /// Refuses the next `count` power-on attempts.
    #[must_use]
    pub fn with_power_on_failures(self, count: u32) -> Self {
        self.shared.power_on_failures.store(count, Ordering::SeqCst);
        self
    }

    /// Returns `status` from every calibration attempt.
    #[must_use]
    pub fn with_calibration_status(self, status: i32) -> Self {
        self.shared.calibration_status.store(status, Ordering::SeqCst);
        self
    }

    /// Runs `hook` after each recorded call, on the calling thread.
    #[must_use]
    pub fn on_call<F>(self, hook: F) -> Self
    where
        F: FnMut(&HardwareCall) + Send + 'static,
    {
        *self.shared.hook.lock() = Some(Box::new(hook));
        self
    }

    /// Returns a probe for inspecting the mock after it has been moved into
    /// the amplifier.
    pub fn probe(&self) -> MockProbe {
        MockProbe {
            shared: Arc::clone(&self.shared),
        }
    }

    fn record(&self, call: HardwareCall) {
        {
            let mut physical = self.shared.physical.lock();
            match call {
                HardwareCall::SpeakerOn(_)
                | HardwareCall::StereoSpeakerOn
                | HardwareCall::BypassOn => physical.powered = true,
                HardwareCall::SpeakerOff
                | HardwareCall::StereoSpeakerOff
                | HardwareCall::BypassOff => physical.powered = false,
                HardwareCall::SetDevice(layout) => physical.layout = Some(layout),
                _ => {}
            }
        }
        self.shared.calls.lock().push(call);
        if let Some(hook) = self.shared.hook.lock().as_mut() {
            hook(&call);
        }
    }

    fn take_failure(&self) -> bool {
        self.shared
            .power_on_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl AmplifierHardware for MockHardware {
    fn speaker_on(&mut self, mode: AmpMode) -> Result<(), HardwareError> {
        if self.take_failure() {
            self.record(HardwareCall::SpeakerOnRefused(mode));
            return Err(HardwareError::new(REFUSED_STATUS));
        }
        self.record(HardwareCall::SpeakerOn(mode));
        Ok(())
    }

    fn speaker_off(&mut self) {
        self.record(HardwareCall::SpeakerOff);
    }

    fn set_device(&mut self, layout: SpeakerLayout) {
        self.record(HardwareCall::SetDevice(layout));
    }

    fn set_mode(&mut self, mode: AmpMode) {
        self.record(HardwareCall::SetMode(mode));
    }

    fn set_speaker_needed(&mut self, needed: bool) {
        self.record(HardwareCall::SpeakerNeeded(needed));
    }

    fn set_stereo_speaker_needed(&mut self, left: bool, right: bool) {
        self.record(HardwareCall::StereoSpeakerNeeded(left, right));
    }

    fn stereo_speaker_on(&mut self) {
        self.record(HardwareCall::StereoSpeakerOn);
    }

    fn stereo_speaker_off(&mut self) {
        self.record(HardwareCall::StereoSpeakerOff);
    }

    fn bypass_speaker_on(&mut self) {
        self.record(HardwareCall::BypassOn);
    }

    fn bypass_speaker_off(&mut self) {
        self.record(HardwareCall::BypassOff);
    }

    fn calibrate(&mut self, param: i32) -> Result<(), HardwareError> {
        self.record(HardwareCall::Calibrate(param));
        HardwareError::check(self.shared.calibration_status.load(Ordering::SeqCst))
    }

    fn set_reversed(&mut self, reversed: bool) {
        self.record(HardwareCall::SetReversed(reversed));
    }

    fn name(&self) -> &'static str {
        "MockHardware"
    }
}

/// Inspection handle for a [`MockHardware`].
#[derive(Clone)]
pub struct MockProbe {
    shared: Arc<MockShared>,
}

impl MockProbe {
    /// All calls recorded so far.
    pub fn calls(&self) -> Vec<HardwareCall> {
        self.shared.calls.lock().clone()
    }

    /// Takes the recorded calls, clearing the log.
    pub fn take_calls(&self) -> Vec<HardwareCall> {
        std::mem::take(&mut *self.shared.calls.lock())
    }

    /// Whether the simulated chip is powered.
    pub fn is_powered(&self) -> bool {
        self.shared.physical.lock().powered
    }

    /// Last topology passed to `set_device`.
    pub fn layout(&self) -> Option<SpeakerLayout> {
        self.shared.physical.lock().layout
    }

    /// Changes how many upcoming power-on attempts are refused.
    pub fn set_power_on_failures(&self, count: u32) {
        self.shared.power_on_failures.store(count, Ordering::SeqCst);
    }

    /// Changes the status returned by calibration.
    pub fn set_calibration_status(&self, status: i32) {
        self.shared.calibration_status.store(status, Ordering::SeqCst);
    }

    /// Number of recorded calls matching `predicate`.
    pub fn count(&self, predicate: impl Fn(&HardwareCall) -> bool) -> usize {
        self.shared.calls.lock().iter().filter(|c| predicate(c)).count()
    }
}
