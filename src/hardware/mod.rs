//! Hardware binding abstraction.
//!
//! [`AmplifierHardware`] is the set of vendor routines the control policies
//! drive. The reconciliation worker owns the binding, so only the worker
//! thread ever calls into hardware.

mod mock;
#[cfg(feature = "vendor-lib")]
mod vendor;

pub use mock::{HardwareCall, MockHardware, MockProbe};
#[cfg(feature = "vendor-lib")]
pub use vendor::{VendorLibrary, DEFAULT_VENDOR_LIBRARY};

use crate::error::HardwareError;
use crate::state::{AmpMode, SpeakerLayout};

/// Vendor amplifier routines.
///
/// Calls may block for milliseconds. They are only ever made from the
/// reconciliation worker, never while the desired-state lock is held.
pub trait AmplifierHardware: Send {
    /// Powers the amplifier on with the given profile.
    ///
    /// Returns an error when the chip is not ready (e.g. waiting on a clock);
    /// the caller retries.
    fn speaker_on(&mut self, mode: AmpMode) -> Result<(), HardwareError>;

    /// Powers the amplifier off.
    fn speaker_off(&mut self);

    /// Selects the speaker topology.
    fn set_device(&mut self, layout: SpeakerLayout);

    /// Selects the tuning profile without powering on.
    fn set_mode(&mut self, mode: AmpMode);

    /// Declares whether the speaker path (and its clock) is needed.
    fn set_speaker_needed(&mut self, needed: bool);

    /// Declares per-channel speaker need.
    fn set_stereo_speaker_needed(&mut self, left: bool, right: bool);

    /// Powers both channels on via the low-level routine.
    fn stereo_speaker_on(&mut self);

    /// Powers both channels off via the low-level routine.
    fn stereo_speaker_off(&mut self);

    /// Powers on in bypass mode (no DSP).
    fn bypass_speaker_on(&mut self);

    /// Powers off from bypass mode.
    fn bypass_speaker_off(&mut self);

    /// Runs speaker calibration.
    fn calibrate(&mut self, param: i32) -> Result<(), HardwareError>;

    /// Swaps left and right channels. Optional; the default does nothing.
    fn set_reversed(&mut self, reversed: bool) {
        if reversed {
            tracing::debug!("Channel reversal not supported by this binding");
        }
    }

    /// Binding name for logging.
    fn name(&self) -> &'static str;
}
