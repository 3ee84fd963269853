//! Reconciliation worker: drives the hardware toward the desired state.
//!
//! A single worker thread owns the hardware binding. Each wake-up it takes a
//! snapshot of the desired state, compares it with what it last applied and
//! runs the active policy. Refused power-ons are retried until they succeed
//! or newer intent arrives, in which case the pass starts over from a fresh
//! snapshot.
//!
//! ```text
//! Idle --wake--> Diffing --material--> Applying --ok--> Idle
//!                   |                     |
//!                 no-op               power-on refused
//!                   v                     v
//!                  Idle               Retrying --newer intent--> Diffing
//! ```

use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::config::{AmpConfig, ControlMode, PropertySource};
use crate::event::AmpEvent;
use crate::hardware::AmplifierHardware;
use crate::policy::{ControlPolicy, PolicyResult};
use crate::session::SharedState;
use crate::state::{log_transition, AmpState, StateDiff};
use crate::store::DesiredStore;

/// Where the worker is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    Idle,
    Diffing,
    Applying,
    Retrying,
    Exiting,
}

/// How a single pass ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PassOutcome {
    Applied,
    Abandoned,
}

/// Clears the running flag when the worker thread ends, including by panic.
struct RunningGuard<'a>(&'a SharedState);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.running.store(false, Ordering::SeqCst);
    }
}

pub(crate) struct Worker {
    hardware: Box<dyn AmplifierHardware>,
    store: Arc<DesiredStore>,
    shared: Arc<SharedState>,
    properties: Arc<dyn PropertySource>,
    config: AmpConfig,
    policy: &'static dyn ControlPolicy,
    applied: AmpState,
    reinit_pending: bool,
    phase: Phase,
}

impl Worker {
    pub fn new(
        hardware: Box<dyn AmplifierHardware>,
        store: Arc<DesiredStore>,
        shared: Arc<SharedState>,
        properties: Arc<dyn PropertySource>,
        config: AmpConfig,
        mode: ControlMode,
    ) -> Self {
        Self {
            hardware,
            store,
            shared,
            properties,
            config,
            policy: mode.policy(),
            applied: AmpState::default(),
            reinit_pending: true,
            phase: Phase::Idle,
        }
    }

    fn enter(&mut self, phase: Phase) {
        if self.phase != phase {
            tracing::trace!(from = ?self.phase, to = ?phase, "Worker phase");
            self.phase = phase;
        }
    }

    /// Runs until exit is requested. The hardware binding is dropped on return.
    pub fn run(mut self) {
        let shared = Arc::clone(&self.shared);
        let _running = RunningGuard(&shared);

        tracing::info!(
            hardware = self.hardware.name(),
            policy = %self.policy.mode(),
            "Reconciliation worker started"
        );

        loop {
            self.enter(Phase::Idle);
            self.store.wake().wait();
            self.reconcile();
            if self.shared.exit_requested() {
                // Updates that raced with the exit request still get applied.
                while self.store.wake().try_take() {
                    self.reconcile();
                }
                break;
            }
        }

        self.enter(Phase::Exiting);
        tracing::info!(hardware = self.hardware.name(), "Reconciliation worker exiting");
    }

    /// One wake cycle: reconcile with the latest snapshot, then do idle work.
    fn reconcile(&mut self) {
        loop {
            self.enter(Phase::Diffing);
            let desired = self.store.snapshot();
            let diff = StateDiff::between(&self.applied, &desired);
            let reinitialize = self.reinit_pending || diff.requires_reinit();

            if diff.is_noop() && !reinitialize {
                tracing::trace!(streams = desired.streams, "No material change");
                self.applied = desired;
                self.shared.passes_skipped.fetch_add(1, Ordering::Relaxed);
                break;
            }

            log_transition("new(applied)", &self.applied, &desired);

            match self.apply(&desired, reinitialize) {
                PassOutcome::Applied => {
                    let previous = std::mem::replace(&mut self.applied, desired);
                    self.reinit_pending = false;
                    self.shared.passes_applied.fetch_add(1, Ordering::Relaxed);
                    self.store.emit(AmpEvent::PassApplied {
                        previous,
                        current: desired,
                        reinitialized: reinitialize,
                    });
                    break;
                }
                PassOutcome::Abandoned => {
                    // Power-on may have left side effects (clock request,
                    // partial enable); the next pass starts from a full reset.
                    self.reinit_pending = true;
                    if self.shared.exit_requested() {
                        break;
                    }
                }
            }
        }

        if !self.policy.is_powered(&self.applied) {
            self.on_idle();
        }
    }

    fn apply(&mut self, desired: &AmpState, reinitialize: bool) -> PassOutcome {
        self.enter(Phase::Applying);
        let mut result =
            self.policy
                .apply(self.hardware.as_mut(), desired, &self.applied, reinitialize);

        let mut attempts: u32 = 0;
        while let PolicyResult::PowerOnFailed(err) = result {
            self.enter(Phase::Retrying);
            attempts += 1;
            self.shared.power_on_failures.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(attempts, status = err.status, "Failed turning amp on");
            self.store.emit(AmpEvent::PowerOnFailed {
                attempt: attempts,
                status: err.status,
            });

            std::thread::sleep(self.policy.retry_interval(&self.config));

            if self.store.wake().try_take() || self.shared.exit_requested() {
                tracing::debug!(attempts, "Amp state was changed, abandoning power-on");
                self.shared.retries_abandoned.fetch_add(1, Ordering::Relaxed);
                self.store.emit(AmpEvent::RetryAbandoned { attempts });
                return PassOutcome::Abandoned;
            }

            result = self.policy.retry_power_on(self.hardware.as_mut(), desired);
        }

        PassOutcome::Applied
    }

    /// Policy switch and calibration, only while the active policy has the
    /// chip powered off.
    fn on_idle(&mut self) {
        let mode = ControlMode::from_properties(self.properties.as_ref());
        if mode != self.policy.mode() {
            let from = self.policy.mode();
            tracing::info!(%from, to = %mode, "Switching amplifier control policy");
            self.policy = mode.policy();
            self.reinit_pending = true;
            *self.shared.control_mode.lock() = mode;
            self.shared.policy_switches.fetch_add(1, Ordering::Relaxed);
            self.store.emit(AmpEvent::PolicySwitched { from, to: mode });
        }

        if self.config.calibrate_when_idle && !self.applied.calibration_done {
            self.calibrate();
        }
    }

    fn calibrate(&mut self) {
        match self.hardware.calibrate(0) {
            Err(e) if !e.is_already_calibrated() => {
                tracing::error!(status = e.status, "Speaker calibration failed");
                self.store.emit(AmpEvent::CalibrationFailed { status: e.status });
            }
            _ => {
                tracing::info!("Speaker calibration done");
                self.store.mark_calibrated();
                self.applied.calibration_done = true;
                self.store.emit(AmpEvent::CalibrationCompleted);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MapProperties;
    use crate::config::CONTROL_MODE_KEY;
    use crate::event::event_callback;
    use crate::hardware::{HardwareCall, MockHardware, MockProbe};
    use crate::routing::{DeviceId, RoutingTable};
    use crate::state::{AmpMode, AudioMode, SpeakerLayout};
    use parking_lot::Mutex;
    use std::time::Duration;

    struct Harness {
        store: Arc<DesiredStore>,
        shared: Arc<SharedState>,
        properties: Arc<MapProperties>,
        events: Arc<Mutex<Vec<AmpEvent>>>,
    }

    impl Harness {
        fn new() -> Self {
            let shared = Arc::new(SharedState::new(ControlMode::Normal));
            let events = Arc::new(Mutex::new(Vec::new()));
            let sink = Arc::clone(&events);
            let store = Arc::new(DesiredStore::new(
                RoutingTable::new(),
                Arc::clone(&shared),
                Some(event_callback(move |e| sink.lock().push(e))),
            ));
            Self {
                store,
                shared,
                properties: Arc::new(MapProperties::new()),
                events,
            }
        }

        fn worker(&self, hardware: MockHardware, config: AmpConfig) -> Worker {
            let mode = ControlMode::from_properties(self.properties.as_ref());
            Worker::new(
                Box::new(hardware),
                Arc::clone(&self.store),
                Arc::clone(&self.shared),
                self.properties.clone(),
                config,
                mode,
            )
        }

        fn count(&self, predicate: impl Fn(&AmpEvent) -> bool) -> usize {
            self.events.lock().iter().filter(|e| predicate(e)).count()
        }
    }

    fn quiet_config() -> AmpConfig {
        AmpConfig {
            retry_interval: Duration::from_millis(1),
            call_retry_interval: Duration::from_millis(1),
            calibrate_when_idle: false,
            ..AmpConfig::default()
        }
    }

    /// Stands in for a wake-up in `run()`.
    fn wake_cycle(worker: &mut Worker) {
        worker.store.wake().try_take();
        worker.reconcile();
    }

    fn speaker_on(store: &DesiredStore) {
        store.set_output_device(DeviceId::SPEAKER);
        store.set_enabled(DeviceId::SPEAKER, true);
        store.stream_start();
    }

    fn power_ons(probe: &MockProbe) -> usize {
        probe.count(|c| matches!(c, HardwareCall::SpeakerOn(_)))
    }

    #[test]
    fn test_first_pass_reinitializes() {
        let harness = Harness::new();
        let hw = MockHardware::new();
        let probe = hw.probe();
        let mut worker = harness.worker(hw, quiet_config());

        harness.store.set_parameters("noop=1");
        harness.store.wake().notify();
        wake_cycle(&mut worker);

        assert_eq!(
            probe.calls(),
            vec![
                HardwareCall::SpeakerOff,
                HardwareCall::SetDevice(SpeakerLayout::Stereo),
                HardwareCall::SetReversed(false),
            ]
        );
        assert!(!worker.reinit_pending);
        assert_eq!(harness.shared.stats().passes_applied, 1);
    }

    #[test]
    fn test_coalesced_setters_produce_one_pass() {
        let harness = Harness::new();
        let hw = MockHardware::new();
        let probe = hw.probe();
        let mut worker = harness.worker(hw, quiet_config());

        speaker_on(&harness.store);
        harness.store.set_mode(AudioMode::Normal);
        harness.store.stream_start();
        wake_cycle(&mut worker);

        assert_eq!(power_ons(&probe), 1);
        assert_eq!(harness.shared.stats().passes_applied, 1);
        assert_eq!(worker.applied, harness.store.snapshot());
        assert!(probe.is_powered());
    }

    #[test]
    fn test_repeated_setter_is_idempotent() {
        let harness = Harness::new();
        let hw = MockHardware::new();
        let probe = hw.probe();
        let mut worker = harness.worker(hw, quiet_config());

        speaker_on(&harness.store);
        wake_cycle(&mut worker);
        let calls = probe.take_calls().len();
        assert!(calls > 0);

        harness.store.set_enabled(DeviceId::SPEAKER, true);
        wake_cycle(&mut worker);
        harness.store.set_output_device(DeviceId::SPEAKER);
        wake_cycle(&mut worker);

        assert!(probe.calls().is_empty());
        assert_eq!(harness.shared.stats().passes_skipped, 2);
    }

    #[test]
    fn test_stream_count_change_keeps_hardware_untouched() {
        let harness = Harness::new();
        let hw = MockHardware::new();
        let probe = hw.probe();
        let mut worker = harness.worker(hw, quiet_config());

        speaker_on(&harness.store);
        wake_cycle(&mut worker);
        probe.take_calls();

        harness.store.stream_start();
        wake_cycle(&mut worker);

        assert!(probe.calls().is_empty());
        assert_eq!(worker.applied.streams, 2);
    }

    #[test]
    fn test_device_change_reinitializes() {
        let harness = Harness::new();
        let hw = MockHardware::new();
        let probe = hw.probe();
        let mut worker = harness.worker(hw, quiet_config());

        speaker_on(&harness.store);
        wake_cycle(&mut worker);
        probe.take_calls();

        harness.store.set_output_device(DeviceId::HANDSET);
        wake_cycle(&mut worker);

        assert_eq!(
            probe.calls(),
            vec![
                HardwareCall::SpeakerOff,
                HardwareCall::SetDevice(SpeakerLayout::Mono),
                HardwareCall::SetReversed(false),
                HardwareCall::SpeakerOn(AmpMode::Music),
            ]
        );
    }

    #[test]
    fn test_retries_until_power_on_succeeds() {
        let harness = Harness::new();
        let hw = MockHardware::new().with_power_on_failures(3);
        let probe = hw.probe();
        let mut worker = harness.worker(hw, quiet_config());

        speaker_on(&harness.store);
        wake_cycle(&mut worker);

        assert_eq!(probe.count(|c| matches!(c, HardwareCall::SpeakerOnRefused(_))), 3);
        assert_eq!(power_ons(&probe), 1);
        let stats = harness.shared.stats();
        assert_eq!(stats.power_on_failures, 3);
        assert_eq!(stats.retries_abandoned, 0);
        assert_eq!(harness.count(|e| matches!(e, AmpEvent::PowerOnFailed { .. })), 3);
    }

    #[test]
    fn test_newer_intent_abandons_retry() {
        let harness = Harness::new();
        let store = Arc::clone(&harness.store);
        let mut changed = false;
        let hw = MockHardware::new()
            .with_power_on_failures(u32::MAX)
            .on_call(move |call| {
                if matches!(call, HardwareCall::SpeakerOnRefused(_)) && !changed {
                    changed = true;
                    store.stream_standby();
                }
            });
        let probe = hw.probe();
        let mut worker = harness.worker(hw, quiet_config());

        speaker_on(&harness.store);
        wake_cycle(&mut worker);

        // The retry saw the standby and reconciled to off instead.
        assert_eq!(probe.count(|c| matches!(c, HardwareCall::SpeakerOnRefused(_))), 1);
        assert_eq!(power_ons(&probe), 0);
        assert!(!probe.is_powered());
        assert!(!worker.applied.is_on());
        assert_eq!(harness.shared.stats().retries_abandoned, 1);
        assert_eq!(harness.count(|e| matches!(e, AmpEvent::RetryAbandoned { attempts: 1 })), 1);
    }

    #[test]
    fn test_abandoned_reinit_stays_pending() {
        let harness = Harness::new();
        let store = Arc::clone(&harness.store);
        let mut changed = false;
        let hw = MockHardware::new()
            .with_power_on_failures(1)
            .on_call(move |call| {
                if matches!(call, HardwareCall::SpeakerOnRefused(_)) && !changed {
                    changed = true;
                    store.set_mode(AudioMode::InCall);
                }
            });
        let probe = hw.probe();
        let mut worker = harness.worker(hw, quiet_config());

        speaker_on(&harness.store);
        wake_cycle(&mut worker);

        // Restarted pass repeats the full reconfigure before powering on.
        assert_eq!(
            probe.count(|c| matches!(c, HardwareCall::SetDevice(_))),
            2
        );
        assert_eq!(
            probe.calls().last(),
            Some(&HardwareCall::SpeakerOn(AmpMode::Voice))
        );
        assert!(!worker.reinit_pending);
    }

    #[test]
    fn test_abandoned_call_power_on_releases_speaker_path() {
        let harness = Harness::new();
        harness.properties.set(CONTROL_MODE_KEY, "1");
        let store = Arc::clone(&harness.store);
        let mut changed = false;
        let hw = MockHardware::new()
            .with_power_on_failures(u32::MAX)
            .on_call(move |call| {
                if matches!(call, HardwareCall::SpeakerOnRefused(_)) && !changed {
                    changed = true;
                    store.set_enabled(DeviceId::VOICE_SPEAKER, false);
                }
            });
        let probe = hw.probe();
        let mut worker = harness.worker(hw, quiet_config());

        harness.store.set_output_device(DeviceId::VOICE_SPEAKER);
        wake_cycle(&mut worker);
        probe.take_calls();

        harness.store.set_enabled(DeviceId::VOICE_SPEAKER, true);
        wake_cycle(&mut worker);

        // The clock request from the abandoned attempt is withdrawn.
        let calls = probe.calls();
        assert_eq!(calls.first(), Some(&HardwareCall::SpeakerNeeded(true)));
        assert!(calls.ends_with(&[
            HardwareCall::SpeakerNeeded(false),
            HardwareCall::StereoSpeakerOff,
            HardwareCall::SetDevice(SpeakerLayout::Stereo),
            HardwareCall::SetReversed(false),
        ]));
        assert!(!probe.is_powered());
        assert!(!worker.reinit_pending);
    }

    #[test]
    fn test_device_change_during_retry_restarts_on_new_layout() {
        let harness = Harness::new();
        let store = Arc::clone(&harness.store);
        let mut changed = false;
        let hw = MockHardware::new()
            .with_power_on_failures(1)
            .on_call(move |call| {
                if matches!(call, HardwareCall::SpeakerOnRefused(_)) && !changed {
                    changed = true;
                    store.set_output_device(DeviceId::HANDSET);
                }
            });
        let probe = hw.probe();
        let mut worker = harness.worker(hw, quiet_config());

        speaker_on(&harness.store);
        wake_cycle(&mut worker);

        assert!(probe.calls().ends_with(&[
            HardwareCall::SpeakerOff,
            HardwareCall::SetDevice(SpeakerLayout::Mono),
            HardwareCall::SetReversed(false),
            HardwareCall::SpeakerOn(AmpMode::Music),
        ]));
        assert_eq!(power_ons(&probe), 1);
        assert_eq!(probe.layout(), Some(SpeakerLayout::Mono));
        assert_eq!(worker.applied.device, SpeakerLayout::Mono);
        assert_eq!(harness.shared.stats().retries_abandoned, 1);
    }

    #[test]
    fn test_bypass_enabled_is_not_idle() {
        let harness = Harness::new();
        harness.properties.set(CONTROL_MODE_KEY, "2");
        let hw = MockHardware::new();
        let probe = hw.probe();
        let config = AmpConfig {
            calibrate_when_idle: true,
            ..quiet_config()
        };
        let mut worker = harness.worker(hw, config);

        harness.store.set_output_device(DeviceId::SPEAKER);
        harness.store.set_enabled(DeviceId::SPEAKER, true);
        wake_cycle(&mut worker);
        assert!(probe.is_powered());
        assert_eq!(probe.count(|c| matches!(c, HardwareCall::Calibrate(_))), 0);

        // Bypass holds the chip on with no streams; the selector waits.
        harness.properties.set(CONTROL_MODE_KEY, "0");
        harness.store.set_mode(AudioMode::InCall);
        wake_cycle(&mut worker);
        assert_eq!(worker.policy.mode(), ControlMode::Bypass);
        assert_eq!(probe.count(|c| matches!(c, HardwareCall::Calibrate(_))), 0);
        assert!(probe.is_powered());

        probe.take_calls();
        harness.store.set_enabled(DeviceId::SPEAKER, false);
        wake_cycle(&mut worker);
        assert_eq!(
            probe.calls(),
            vec![
                HardwareCall::StereoSpeakerNeeded(false, false),
                HardwareCall::BypassOff,
                HardwareCall::Calibrate(0),
            ]
        );
        assert_eq!(worker.policy.mode(), ControlMode::Normal);
        assert_eq!(harness.shared.stats().policy_switches, 1);
    }

    #[test]
    fn test_policy_switches_only_when_idle() {
        let harness = Harness::new();
        let hw = MockHardware::new();
        let probe = hw.probe();
        let mut worker = harness.worker(hw, quiet_config());

        speaker_on(&harness.store);
        wake_cycle(&mut worker);
        harness.properties.set(CONTROL_MODE_KEY, "2");

        harness.store.set_mode(AudioMode::InCall);
        wake_cycle(&mut worker);
        assert_eq!(worker.policy.mode(), ControlMode::Normal);

        harness.store.stream_standby();
        wake_cycle(&mut worker);
        assert_eq!(worker.policy.mode(), ControlMode::Bypass);
        assert_eq!(*harness.shared.control_mode.lock(), ControlMode::Bypass);
        assert_eq!(harness.shared.stats().policy_switches, 1);

        probe.take_calls();
        harness.store.stream_start();
        wake_cycle(&mut worker);
        assert_eq!(
            probe.calls(),
            vec![
                HardwareCall::StereoSpeakerNeeded(true, true),
                HardwareCall::BypassOn,
            ]
        );
    }

    #[test]
    fn test_idle_calibration_runs_once() {
        let harness = Harness::new();
        let hw = MockHardware::new();
        let probe = hw.probe();
        let config = AmpConfig {
            calibrate_when_idle: true,
            ..quiet_config()
        };
        let mut worker = harness.worker(hw, config);

        harness.store.set_output_device(DeviceId::SPEAKER);
        wake_cycle(&mut worker);
        harness.store.set_enabled(DeviceId::SPEAKER, false);
        wake_cycle(&mut worker);

        assert_eq!(probe.count(|c| matches!(c, HardwareCall::Calibrate(0))), 1);
        assert!(harness.store.snapshot().calibration_done);
        assert_eq!(harness.count(|e| matches!(e, AmpEvent::CalibrationCompleted)), 1);
    }

    #[test]
    fn test_already_calibrated_counts_as_done() {
        let harness = Harness::new();
        let hw = MockHardware::new().with_calibration_status(-1);
        let config = AmpConfig {
            calibrate_when_idle: true,
            ..quiet_config()
        };
        let mut worker = harness.worker(hw, config);

        harness.store.set_output_device(DeviceId::SPEAKER);
        wake_cycle(&mut worker);

        assert!(harness.store.snapshot().calibration_done);
    }

    #[test]
    fn test_failed_calibration_retried_later() {
        let harness = Harness::new();
        let hw = MockHardware::new().with_calibration_status(7);
        let probe = hw.probe();
        let config = AmpConfig {
            calibrate_when_idle: true,
            ..quiet_config()
        };
        let mut worker = harness.worker(hw, config);

        harness.store.set_output_device(DeviceId::SPEAKER);
        wake_cycle(&mut worker);
        assert!(!harness.store.snapshot().calibration_done);
        assert_eq!(harness.count(|e| matches!(e, AmpEvent::CalibrationFailed { status: 7 })), 1);

        probe.set_calibration_status(0);
        harness.store.set_enabled(DeviceId::SPEAKER, true);
        wake_cycle(&mut worker);

        assert_eq!(probe.count(|c| matches!(c, HardwareCall::Calibrate(_))), 2);
        assert!(harness.store.snapshot().calibration_done);
    }

    #[test]
    fn test_no_calibration_while_on() {
        let harness = Harness::new();
        let hw = MockHardware::new();
        let probe = hw.probe();
        let config = AmpConfig {
            calibrate_when_idle: true,
            ..quiet_config()
        };
        let mut worker = harness.worker(hw, config);

        speaker_on(&harness.store);
        wake_cycle(&mut worker);

        assert_eq!(probe.count(|c| matches!(c, HardwareCall::Calibrate(_))), 0);
    }

    #[test]
    fn test_stream_and_speaker_scenario() {
        let harness = Harness::new();
        let hw = MockHardware::new();
        let probe = hw.probe();
        let mut worker = harness.worker(hw, quiet_config());

        harness.store.set_output_device(DeviceId::SPEAKER);
        wake_cycle(&mut worker);
        harness.store.set_enabled(DeviceId::SPEAKER, true);
        wake_cycle(&mut worker);
        assert!(!probe.is_powered());

        harness.store.stream_start();
        wake_cycle(&mut worker);
        assert!(probe.is_powered());

        harness.store.stream_standby();
        wake_cycle(&mut worker);
        assert!(!probe.is_powered());
        assert_eq!(power_ons(&probe), 1);
    }

    #[test]
    fn test_run_exits_on_request() {
        let harness = Harness::new();
        let worker = harness.worker(MockHardware::new(), quiet_config());
        let shared = Arc::clone(&harness.shared);
        let store = Arc::clone(&harness.store);

        let handle = std::thread::spawn(move || worker.run());
        store.stream_start();
        shared.exit_requested.store(true, Ordering::SeqCst);
        store.wake().notify();
        handle.join().unwrap();

        assert!(!shared.running.load(Ordering::SeqCst));
    }
}
