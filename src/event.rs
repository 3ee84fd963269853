//! Runtime events for monitoring the reconciliation worker.
//!
//! Events are non-fatal notifications. Producers never see hardware failures
//! directly; the worker keeps retrying and reports what happened here. They
//! are for logging/metrics and tests, not error handling.

use std::sync::Arc;

use crate::config::ControlMode;
use crate::routing::DeviceId;
use crate::state::AmpState;

/// Runtime events emitted by the amplifier.
///
/// # Example
///
/// ```
/// use speaker_amp::AmpEvent;
///
/// fn handle_event(event: AmpEvent) {
///     match event {
///         AmpEvent::PassApplied { current, .. } => {
///             eprintln!("amplifier now on={}", current.is_on());
///         }
///         AmpEvent::PowerOnFailed { attempt, status } => {
///             eprintln!("power-on attempt {} refused ({})", attempt, status);
///         }
///         other => eprintln!("{:?}", other),
///     }
/// }
/// ```
#[derive(Debug, Clone)]
pub enum AmpEvent {
    /// A reconciliation pass finished and the hardware now reflects `current`.
    PassApplied {
        /// State applied before this pass.
        previous: AmpState,
        /// State applied by this pass.
        current: AmpState,
        /// The pass ran the full off/reconfigure/on sequence.
        reinitialized: bool,
    },

    /// The hardware refused to power on. The worker will retry.
    PowerOnFailed {
        /// Attempt number within the current pass, starting at 1.
        attempt: u32,
        /// Vendor status code.
        status: i32,
    },

    /// A retrying pass was abandoned because newer intent arrived.
    RetryAbandoned {
        /// Number of failed attempts before abandoning.
        attempts: u32,
    },

    /// The control policy changed at an idle point.
    PolicySwitched {
        /// Previous policy.
        from: ControlMode,
        /// New policy.
        to: ControlMode,
    },

    /// One-time calibration completed.
    CalibrationCompleted,

    /// Calibration failed and will be retried on a later idle transition.
    CalibrationFailed {
        /// Vendor status code.
        status: i32,
    },

    /// A device had no usable route and was driven as stereo.
    RoutingFallback {
        /// Device that fell back.
        device: DeviceId,
    },

    /// `stream_standby` was called with no active streams.
    StreamUnderflow,
}

/// Callback type for receiving runtime events.
///
/// Register it with [`AmplifierBuilder::on_event()`]. The callback runs on the
/// thread that produced the event (the worker, or a producer for routing and
/// stream events), so it must be quick and must not call back into the
/// amplifier.
///
/// [`AmplifierBuilder::on_event()`]: crate::AmplifierBuilder::on_event
pub type EventCallback = Arc<dyn Fn(AmpEvent) + Send + Sync>;

/// Creates an [`EventCallback`] from a closure.
///
/// # Example
///
/// ```
/// use speaker_amp::{event_callback, AmpEvent};
///
/// let callback = event_callback(|event: AmpEvent| {
///     println!("Got event: {:?}", event);
/// });
/// ```
pub fn event_callback<F>(f: F) -> EventCallback
where
    F: Fn(AmpEvent) + Send + Sync + 'static,
{
    Arc::new(f)
}
