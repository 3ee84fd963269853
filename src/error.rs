//! Error types for speaker-amp.
//!
//! Errors are split into two categories:
//! - **Fatal errors** ([`AmpError`]): Prevent the amplifier from opening
//! - **Recoverable hardware failures** ([`HardwareError`]): Retried by the
//!   reconciliation worker and surfaced only via [`EventCallback`](crate::EventCallback)
//!   and logging. Producers never see them.

use std::path::PathBuf;

/// Fatal errors returned from [`AmplifierBuilder::open()`] and
/// [`Amplifier::close()`].
///
/// Degraded configuration (bad routing overrides, unknown devices or modes)
/// is never an error; it is logged and a safe default is used instead.
///
/// [`AmplifierBuilder::open()`]: crate::AmplifierBuilder::open
/// [`Amplifier::close()`]: crate::Amplifier::close
#[derive(Debug, thiserror::Error)]
pub enum AmpError {
    /// Another amplifier instance is already open on this module.
    #[error("amplifier already open; only one instance is permitted")]
    Busy,

    /// No hardware binding was supplied to the builder.
    #[error("no amplifier hardware binding configured")]
    NoHardware,

    /// The vendor amplifier library could not be loaded.
    #[error("unable to open vendor library {path}: {reason}")]
    LibraryUnavailable {
        /// Path or name the loader was given.
        path: PathBuf,
        /// Loader error message.
        reason: String,
    },

    /// A required symbol is missing from the vendor library.
    #[error("vendor library is missing required symbol `{symbol}`")]
    MissingSymbol {
        /// Name of the missing symbol.
        symbol: String,
    },

    /// The reconciliation worker thread could not be started.
    #[error("failed to spawn reconciliation worker: {0}")]
    WorkerSpawn(#[source] std::io::Error),

    /// The reconciliation worker panicked before shutdown completed.
    #[error("reconciliation worker panicked")]
    WorkerPanicked,
}

impl AmpError {
    /// Creates a library-unavailable error for the given path.
    pub fn library_unavailable(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::LibraryUnavailable {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Creates a missing-symbol error.
    pub fn missing_symbol(symbol: impl Into<String>) -> Self {
        Self::MissingSymbol {
            symbol: symbol.into(),
        }
    }
}

/// A non-zero status returned by the amplifier hardware.
///
/// Power-on refusals are expected (the chip may be waiting for a shared clock)
/// and are retried by the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("amplifier hardware returned status {status}")]
pub struct HardwareError {
    /// Raw vendor status code.
    pub status: i32,
}

impl HardwareError {
    /// Vendor status meaning calibration was already performed.
    pub const ALREADY_CALIBRATED: i32 = -1;

    /// Wraps a raw vendor status code.
    pub fn new(status: i32) -> Self {
        Self { status }
    }

    /// Converts a vendor status code into a result (`0` is success).
    pub fn check(status: i32) -> Result<(), Self> {
        if status == 0 {
            Ok(())
        } else {
            Err(Self::new(status))
        }
    }

    /// Returns `true` if the status reports that calibration already happened.
    pub fn is_already_calibrated(&self) -> bool {
        self.status == Self::ALREADY_CALIBRATED
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_amp_error_display() {
        let err = AmpError::missing_symbol("exTfa98xx_speakeron");
        assert_eq!(
            err.to_string(),
            "vendor library is missing required symbol `exTfa98xx_speakeron`"
        );
    }

    #[test]
    fn test_library_unavailable_mentions_path() {
        let err = AmpError::library_unavailable("libtfa9890.so", "not found");
        assert!(err.to_string().contains("libtfa9890.so"));
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_hardware_error_check() {
        assert!(HardwareError::check(0).is_ok());
        assert_eq!(HardwareError::check(3), Err(HardwareError::new(3)));
    }

    #[test]
    fn test_already_calibrated_status() {
        assert!(HardwareError::new(-1).is_already_calibrated());
        assert!(!HardwareError::new(2).is_already_calibrated());
    }
}
