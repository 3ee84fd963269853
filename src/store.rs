//! Shared desired-state store and the wake signal that drives the worker.
//!
//! Producers mutate the desired state through the setters here; each setter
//! holds the lock only for the field writes and then raises the wake signal.
//! The worker never sees the lock itself: it reads copies via
//! [`DesiredStore::snapshot`].

use std::sync::atomic::Ordering;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::event::{AmpEvent, EventCallback};
use crate::routing::{DeviceId, RoutingTable};
use crate::session::SharedState;
use crate::state::{AmpMode, AmpState, AudioMode, SpeakerLayout};

/// Level-triggered, coalescing wake-up.
///
/// Any number of [`notify`](Self::notify) calls between two waits produce a
/// single wake-up.
#[derive(Debug, Default)]
pub(crate) struct WakeSignal {
    pending: Mutex<bool>,
    cond: Condvar,
}

impl WakeSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raises the signal and wakes the waiter, if any.
    pub fn notify(&self) {
        *self.pending.lock() = true;
        self.cond.notify_one();
    }

    /// Blocks until the signal is raised, then consumes it.
    pub fn wait(&self) {
        let mut pending = self.pending.lock();
        while !*pending {
            self.cond.wait(&mut pending);
        }
        *pending = false;
    }

    /// Consumes the signal without blocking. Returns whether it was raised.
    pub fn try_take(&self) -> bool {
        std::mem::replace(&mut *self.pending.lock(), false)
    }
}

/// Desired amplifier state shared between producers and the worker.
pub(crate) struct DesiredStore {
    state: Mutex<AmpState>,
    wake: WakeSignal,
    routing: RoutingTable,
    shared: Arc<SharedState>,
    event_callback: Option<EventCallback>,
}

impl DesiredStore {
    pub fn new(
        routing: RoutingTable,
        shared: Arc<SharedState>,
        event_callback: Option<EventCallback>,
    ) -> Self {
        Self {
            state: Mutex::new(AmpState::default()),
            wake: WakeSignal::new(),
            routing,
            shared,
            event_callback,
        }
    }

    pub fn wake(&self) -> &WakeSignal {
        &self.wake
    }

    /// Copy of the current desired state.
    pub fn snapshot(&self) -> AmpState {
        *self.state.lock()
    }

    /// Applies `f` under the lock, then signals the worker.
    fn update<R>(&self, f: impl FnOnce(&mut AmpState) -> R) -> R {
        let result = {
            let mut state = self.state.lock();
            f(&mut state)
        };
        self.wake.notify();
        result
    }

    /// Records completed calibration. Not material to reconciliation, so the
    /// worker is not signalled.
    pub fn mark_calibrated(&self) {
        self.state.lock().calibration_done = true;
    }

    pub fn emit(&self, event: AmpEvent) {
        if let Some(ref callback) = self.event_callback {
            callback(event);
        }
    }

    pub fn set_output_device(&self, device: DeviceId) {
        if device == DeviceId::NONE {
            return;
        }
        let routed = if device.in_range() {
            device
        } else {
            tracing::warn!(%device, "Output device out of range, routing as speaker");
            self.emit(AmpEvent::RoutingFallback { device });
            DeviceId::SPEAKER
        };
        let layout = self.routing.try_resolve(routed).unwrap_or_else(|| {
            self.emit(AmpEvent::RoutingFallback { device: routed });
            SpeakerLayout::Stereo
        });
        let reversed = routed == DeviceId::SPEAKER_REVERSE;

        self.update(|state| {
            state.device = layout;
            state.reversed = reversed;
        });
    }

    pub fn set_enabled(&self, device: DeviceId, enable: bool) {
        let in_call = match device {
            DeviceId::SPEAKER | DeviceId::SPEAKER_REVERSE => false,
            DeviceId::VOICE_SPEAKER | DeviceId::HANDSET | DeviceId::VOICE_HANDSET => enable,
            other => {
                tracing::warn!(device = %other, enable, "Unexpected device, treating as speaker");
                false
            }
        };
        self.update(|state| {
            state.in_call = in_call;
            state.enabled = enable;
        });
    }

    pub fn set_mode(&self, mode: AudioMode) {
        let amp_mode = mode.amp_mode().unwrap_or_else(|| {
            tracing::warn!(?mode, "Unknown audio mode, using music profile");
            AmpMode::Music
        });
        self.update(|state| state.mode = amp_mode);
    }

    pub fn stream_start(&self) {
        self.update(|state| state.streams = state.streams.saturating_add(1));
    }

    pub fn stream_standby(&self) {
        let underflow = self.update(|state| match state.streams.checked_sub(1) {
            Some(streams) => {
                state.streams = streams;
                false
            }
            None => true,
        });
        if underflow {
            tracing::error!("stream_standby called with no active streams");
            self.shared.stream_underflows.fetch_add(1, Ordering::Relaxed);
            self.emit(AmpEvent::StreamUnderflow);
        }
    }

    pub fn set_parameters(&self, params: &str) {
        for pair in params.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            match pair.split_once('=') {
                Some((key, value)) => {
                    tracing::debug!(key = key.trim(), value = value.trim(), "Amplifier parameter");
                }
                None => tracing::debug!(pair, "Amplifier parameter without value"),
            }
        }
    }
}
