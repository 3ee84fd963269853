//! # speaker-amp
//!
//! Control core for a smart speaker amplifier.
//!
//! Audio framework threads report what they want (output device, enabled
//! outputs, audio mode, active streams) and return immediately. A single
//! background worker reconciles that intent with the hardware, retrying
//! power-on while the chip waits for its clock and abandoning stale retries
//! as soon as newer intent arrives.
//!
//! ## Quick Start
//!
//! ```rust
//! use speaker_amp::{AmplifierModule, AudioMode, DeviceId, MockHardware};
//!
//! let module = AmplifierModule::new();
//! let amp = module
//!     .builder()
//!     .hardware(MockHardware::new())
//!     .on_event(|e| tracing::debug!(?e, "amp event"))
//!     .open()?;
//!
//! amp.set_output_device(DeviceId::SPEAKER);
//! amp.set_enabled(DeviceId::SPEAKER, true);
//! amp.set_mode(AudioMode::Normal);
//! amp.stream_start();   // worker powers the amplifier on
//! amp.stream_standby(); // and off again
//!
//! amp.close()?;
//! # Ok::<(), speaker_amp::AmpError>(())
//! ```
//!
//! ## Architecture
//!
//! - **Producers**: any thread; setters lock the desired state only for the
//!   field writes and raise a coalescing wake signal
//! - **Worker**: one thread owning the hardware binding; diffs desired against
//!   applied state and runs the active [`ControlPolicy`]
//! - **Hardware**: the [`AmplifierHardware`] trait, implemented by
//!   [`MockHardware`] and (with the `vendor-lib` feature) `VendorLibrary`
//!
//! Hardware calls never happen under the desired-state lock, so producers
//! are never blocked behind a slow or retrying amplifier.

// unsafe_code lint is configured in Cargo.toml as "deny" to allow the vendor module override
#![warn(missing_docs)]
// Vendor status codes and selector indices are C ints
#![allow(clippy::cast_possible_wrap, clippy::cast_possible_truncation)]
// unwrap/expect allowed in tests only
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]
// These doc lints are too strict for internal implementation details
#![allow(clippy::missing_panics_doc, clippy::missing_errors_doc)]

mod builder;
mod config;
mod error;
mod event;
mod hardware;
mod policy;
mod routing;
mod session;
mod state;
mod store;
mod worker;

pub use builder::{AmplifierBuilder, AmplifierModule};
pub use config::{
    AmpConfig, ControlMode, EnvProperties, MapProperties, PropertySource, CONTROL_MODE_KEY,
    DEVICE_MAP_KEY,
};
pub use error::{AmpError, HardwareError};
pub use event::{event_callback, AmpEvent, EventCallback};
pub use hardware::{AmplifierHardware, HardwareCall, MockHardware, MockProbe};
pub use policy::{BypassPolicy, ControlPolicy, LegacyPolicy, NormalPolicy, PolicyResult};
pub use routing::{DeviceId, PhysicalConfig, RoutingTable};
pub use session::{AmpStats, Amplifier};
pub use state::{AmpMode, AmpState, AudioMode, SpeakerLayout, StateDiff};

#[cfg(feature = "vendor-lib")]
pub use hardware::{VendorLibrary, DEFAULT_VENDOR_LIBRARY};
