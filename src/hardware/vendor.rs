//! Binding to the vendor amplifier library, resolved once with `dlopen`.
//!
//! All routines are looked up when the library is opened; a missing symbol is
//! an open failure and the library is released before returning.

// FFI boundary: the only module allowed to use unsafe code.
#![allow(unsafe_code)]

use std::ffi::{c_int, OsStr};
use std::path::Path;

use libloading::{Library, Symbol};

use super::AmplifierHardware;
use crate::error::{AmpError, HardwareError};
use crate::state::{AmpMode, SpeakerLayout};

/// Library name used when no path is given.
pub const DEFAULT_VENDOR_LIBRARY: &str = "libtfa9890.so";

type IntToInt = unsafe extern "C" fn(c_int) -> c_int;
type IntToVoid = unsafe extern "C" fn(c_int);
type IntIntToInt = unsafe extern "C" fn(c_int, c_int) -> c_int;
type VoidToVoid = unsafe extern "C" fn();

/// Resolves `name` and copies the function pointer out of the symbol.
///
/// # Safety
///
/// `T` must match the symbol's real signature.
unsafe fn resolve<T: Copy>(library: &Library, name: &str) -> Result<T, AmpError> {
    let symbol: Symbol<T> = library
        .get(name.as_bytes())
        .map_err(|_| AmpError::missing_symbol(name))?;
    Ok(*symbol)
}

/// Vendor library routines behind the [`AmplifierHardware`] trait.
///
/// Function pointers stay valid for as long as `_library` is loaded, and the
/// library is only unloaded when this struct is dropped.
pub struct VendorLibrary {
    speaker_on: IntToInt,
    speaker_off: VoidToVoid,
    calibration: IntToInt,
    speaker_needed: IntToInt,
    stereo_speaker_on: VoidToVoid,
    stereo_speaker_off: VoidToVoid,
    stereo_speaker_needed: IntIntToInt,
    bypass_speaker_on: VoidToVoid,
    bypass_speaker_off: VoidToVoid,
    set_mode: IntToVoid,
    set_device: IntToVoid,
    _library: Library,
}

impl VendorLibrary {
    /// Opens [`DEFAULT_VENDOR_LIBRARY`].
    ///
    /// # Errors
    ///
    /// See [`open`](Self::open).
    pub fn open_default() -> Result<Self, AmpError> {
        Self::open(DEFAULT_VENDOR_LIBRARY)
    }

    /// Opens the vendor library at `path` and resolves every routine.
    ///
    /// # Errors
    ///
    /// Returns `LibraryUnavailable` if the library cannot be loaded and
    /// `MissingSymbol` if any required routine is absent.
    pub fn open(path: impl AsRef<OsStr>) -> Result<Self, AmpError> {
        let path = path.as_ref();
        // SAFETY: loading runs the library's initializers; the vendor library
        // is trusted platform code.
        let library = unsafe { Library::new(path) }
            .map_err(|e| AmpError::library_unavailable(Path::new(path), e.to_string()))?;

        // SAFETY: signatures match the vendor headers. On error `library` is
        // dropped, which unloads it.
        let binding = unsafe {
            Self {
                speaker_on: resolve(&library, "exTfa98xx_speakeron")?,
                speaker_off: resolve(&library, "exTfa98xx_speakeroff")?,
                calibration: resolve(&library, "exTfa98xx_calibration")?,
                speaker_needed: resolve(&library, "tfa9890_Set_SpeakerNeeded")?,
                stereo_speaker_on: resolve(&library, "tfa9890_Stereo_SpeakerOn")?,
                stereo_speaker_off: resolve(&library, "tfa9890_Stereo_SpeakerOff")?,
                stereo_speaker_needed: resolve(&library, "tfa9890_Set_Stereo_SpeakerNeeded")?,
                bypass_speaker_on: resolve(&library, "tfa9890_Stereo_SpeakerOn_bypass")?,
                bypass_speaker_off: resolve(&library, "tfa9890_Stereo_SpeakerOff_bypass")?,
                set_mode: resolve(&library, "tfa9890_set_mode")?,
                set_device: resolve(&library, "tfa9890_set_device")?,
                _library: library,
            }
        };

        tracing::info!(path = %path.to_string_lossy(), "Vendor amplifier library loaded");
        Ok(binding)
    }
}

impl AmplifierHardware for VendorLibrary {
    fn speaker_on(&mut self, mode: AmpMode) -> Result<(), HardwareError> {
        // SAFETY: resolved from the loaded library (see `open`).
        HardwareError::check(unsafe { (self.speaker_on)(mode.index()) })
    }

    fn speaker_off(&mut self) {
        // SAFETY: as above.
        unsafe { (self.speaker_off)() }
    }

    fn set_device(&mut self, layout: SpeakerLayout) {
        // SAFETY: as above.
        unsafe { (self.set_device)(layout.index()) }
    }

    fn set_mode(&mut self, mode: AmpMode) {
        // SAFETY: as above.
        unsafe { (self.set_mode)(mode.index()) }
    }

    fn set_speaker_needed(&mut self, needed: bool) {
        // SAFETY: as above.
        let status = unsafe { (self.speaker_needed)(c_int::from(needed)) };
        if status != 0 {
            tracing::debug!(status, needed, "set_speaker_needed returned non-zero");
        }
    }

    fn set_stereo_speaker_needed(&mut self, left: bool, right: bool) {
        // SAFETY: as above.
        let status =
            unsafe { (self.stereo_speaker_needed)(c_int::from(left), c_int::from(right)) };
        if status != 0 {
            tracing::debug!(status, left, right, "set_stereo_speaker_needed returned non-zero");
        }
    }

    fn stereo_speaker_on(&mut self) {
        // SAFETY: as above.
        unsafe { (self.stereo_speaker_on)() }
    }

    fn stereo_speaker_off(&mut self) {
        // SAFETY: as above.
        unsafe { (self.stereo_speaker_off)() }
    }

    fn bypass_speaker_on(&mut self) {
        // SAFETY: as above.
        unsafe { (self.bypass_speaker_on)() }
    }

    fn bypass_speaker_off(&mut self) {
        // SAFETY: as above.
        unsafe { (self.bypass_speaker_off)() }
    }

    fn calibrate(&mut self, param: i32) -> Result<(), HardwareError> {
        // SAFETY: as above.
        HardwareError::check(unsafe { (self.calibration)(param) })
    }

    fn name(&self) -> &'static str {
        "VendorLibrary"
    }
}
