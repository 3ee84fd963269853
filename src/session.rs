//! Open amplifier handle and its shutdown.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;

use crate::builder::ModuleClaim;
use crate::config::ControlMode;
use crate::routing::DeviceId;
use crate::state::{AmpState, AudioMode};
use crate::store::DesiredStore;
use crate::AmpError;

/// Counters describing what the reconciliation worker has done.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AmpStats {
    /// Passes that drove the hardware to a new state.
    pub passes_applied: u64,
    /// Wake-ups that found nothing material to change.
    pub passes_skipped: u64,
    /// Power-on attempts refused by the hardware.
    pub power_on_failures: u64,
    /// Retrying passes abandoned for newer intent.
    pub retries_abandoned: u64,
    /// `stream_standby` calls with no active stream.
    pub stream_underflows: u64,
    /// Control policy changes.
    pub policy_switches: u64,
}

/// Internal state shared between the handle, the store and the worker.
pub(crate) struct SharedState {
    pub exit_requested: AtomicBool,
    pub running: AtomicBool,
    pub control_mode: Mutex<ControlMode>,
    pub passes_applied: AtomicU64,
    pub passes_skipped: AtomicU64,
    pub power_on_failures: AtomicU64,
    pub retries_abandoned: AtomicU64,
    pub stream_underflows: AtomicU64,
    pub policy_switches: AtomicU64,
}

impl SharedState {
    pub fn new(mode: ControlMode) -> Self {
        Self {
            exit_requested: AtomicBool::new(false),
            running: AtomicBool::new(true),
            control_mode: Mutex::new(mode),
            passes_applied: AtomicU64::new(0),
            passes_skipped: AtomicU64::new(0),
            power_on_failures: AtomicU64::new(0),
            retries_abandoned: AtomicU64::new(0),
            stream_underflows: AtomicU64::new(0),
            policy_switches: AtomicU64::new(0),
        }
    }

    pub fn stats(&self) -> AmpStats {
        AmpStats {
            passes_applied: self.passes_applied.load(Ordering::Relaxed),
            passes_skipped: self.passes_skipped.load(Ordering::Relaxed),
            power_on_failures: self.power_on_failures.load(Ordering::Relaxed),
            retries_abandoned: self.retries_abandoned.load(Ordering::Relaxed),
            stream_underflows: self.stream_underflows.load(Ordering::Relaxed),
            policy_switches: self.policy_switches.load(Ordering::Relaxed),
        }
    }

    pub fn exit_requested(&self) -> bool {
        self.exit_requested.load(Ordering::SeqCst)
    }
}

/// Handle to an open amplifier.
///
/// Returned by [`AmplifierBuilder::open()`]. All producer methods take `&self`
/// and may be called from any thread; they only record intent and return
/// immediately. The reconciliation worker applies the intent to the hardware
/// in the background.
///
/// # Lifecycle
///
/// 1. Created by [`AmplifierBuilder::open()`], which claims the module
/// 2. Producers call the setters; the worker reconciles
/// 3. Call [`close()`](Amplifier::close) for an orderly shutdown
/// 4. Dropping the `Amplifier` also shuts down (but prefer explicit `close()`)
///
/// # Example
///
/// ```
/// use speaker_amp::{AmplifierModule, AudioMode, DeviceId, MockHardware};
///
/// let module = AmplifierModule::new();
/// let amp = module.builder().hardware(MockHardware::new()).open()?;
///
/// amp.set_output_device(DeviceId::SPEAKER);
/// amp.set_enabled(DeviceId::SPEAKER, true);
/// amp.set_mode(AudioMode::Normal);
/// amp.stream_start();
///
/// amp.close()?;
/// # Ok::<(), speaker_amp::AmpError>(())
/// ```
///
/// [`AmplifierBuilder::open()`]: crate::AmplifierBuilder::open
pub struct Amplifier {
    shared: Arc<SharedState>,
    store: Arc<DesiredStore>,
    worker_handle: Option<JoinHandle<()>>,
    // Released last, after the worker (and with it the hardware) is gone.
    _claim: ModuleClaim,
}

impl Amplifier {
    pub(crate) fn new(
        shared: Arc<SharedState>,
        store: Arc<DesiredStore>,
        worker_handle: JoinHandle<()>,
        claim: ModuleClaim,
    ) -> Self {
        Self {
            shared,
            store,
            worker_handle: Some(worker_handle),
            _claim: claim,
        }
    }

    /// Routes output to `device`.
    ///
    /// [`DeviceId::NONE`] is ignored. Unknown devices are routed as
    /// [`DeviceId::SPEAKER`].
    pub fn set_output_device(&self, device: DeviceId) {
        self.store.set_output_device(device);
    }

    /// Enables or disables the amplified output for `device`.
    ///
    /// Voice devices ([`DeviceId::VOICE_SPEAKER`], [`DeviceId::HANDSET`],
    /// [`DeviceId::VOICE_HANDSET`]) also mark a call as active while enabled.
    pub fn set_enabled(&self, device: DeviceId, enable: bool) {
        self.store.set_enabled(device, enable);
    }

    /// Selects the tuning profile from the framework's audio mode.
    pub fn set_mode(&self, mode: AudioMode) {
        self.store.set_mode(mode);
    }

    /// An output stream started.
    pub fn stream_start(&self) {
        self.store.stream_start();
    }

    /// An output stream went to standby.
    ///
    /// Calls without a matching [`stream_start`](Self::stream_start) are
    /// logged and ignored.
    pub fn stream_standby(&self) {
        self.store.stream_standby();
    }

    /// Accepts `key=value;key=value` parameters. They are logged only.
    pub fn set_parameters(&self, params: &str) {
        self.store.set_parameters(params);
    }

    /// Current desired state.
    pub fn desired_state(&self) -> AmpState {
        self.store.snapshot()
    }

    /// Policy currently used by the worker.
    pub fn control_mode(&self) -> ControlMode {
        *self.shared.control_mode.lock()
    }

    /// Returns `true` while the worker is running.
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Returns current worker statistics.
    pub fn stats(&self) -> AmpStats {
        self.shared.stats()
    }

    /// Shuts the amplifier down.
    ///
    /// The worker finishes its current pass (including any pending update),
    /// exits, and drops the hardware binding. The module can then be opened
    /// again.
    ///
    /// # Errors
    ///
    /// Returns [`AmpError::WorkerPanicked`] if the worker thread panicked.
    pub fn close(mut self) -> Result<(), AmpError> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<(), AmpError> {
        let Some(handle) = self.worker_handle.take() else {
            return Ok(());
        };

        self.shared.exit_requested.store(true, Ordering::SeqCst);
        self.store.wake().notify();

        let result = handle.join().map_err(|_| AmpError::WorkerPanicked);
        tracing::info!(stats = ?self.shared.stats(), "Amplifier closed");
        result
    }
}

impl Drop for Amplifier {
    fn drop(&mut self) {
        if self.worker_handle.is_some() {
            // Dropped without explicit close()
            if let Err(e) = self.shutdown() {
                tracing::error!(error = %e, "Amplifier shutdown failed");
            }
        }
    }
}

impl std::fmt::Debug for Amplifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Amplifier")
            .field("control_mode", &self.control_mode())
            .field("running", &self.is_running())
            .field("desired", &self.desired_state())
            .finish_non_exhaustive()
    }
}
