//! Module lifecycle and the builder that opens an [`Amplifier`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

#[cfg(feature = "vendor-lib")]
use std::path::PathBuf;

use crate::config::{AmpConfig, ControlMode, EnvProperties, PropertySource};
use crate::hardware::AmplifierHardware;
use crate::routing::RoutingTable;
use crate::session::{Amplifier, SharedState};
use crate::store::DesiredStore;
use crate::worker::Worker;
use crate::{event_callback, AmpError, AmpEvent, EventCallback};

/// Owner of the single-instance claim.
///
/// At most one [`Amplifier`] can be open per module at a time. The platform
/// normally uses [`AmplifierModule::global()`]; tests create independent
/// modules with [`AmplifierModule::new()`].
#[derive(Debug, Default)]
pub struct AmplifierModule {
    in_use: AtomicBool,
}

impl AmplifierModule {
    /// Creates an independent module.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The process-wide module.
    pub fn global() -> Arc<Self> {
        static GLOBAL: OnceLock<Arc<AmplifierModule>> = OnceLock::new();
        Arc::clone(GLOBAL.get_or_init(Self::new))
    }

    /// Returns a builder that opens an amplifier on this module.
    pub fn builder(self: &Arc<Self>) -> AmplifierBuilder {
        AmplifierBuilder::new(Arc::clone(self))
    }

    /// Returns `true` while an amplifier is open on this module.
    pub fn is_open(&self) -> bool {
        self.in_use.load(Ordering::SeqCst)
    }

    fn claim(self: &Arc<Self>) -> Result<ModuleClaim, AmpError> {
        self.in_use
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| AmpError::Busy)?;
        Ok(ModuleClaim {
            module: Arc::clone(self),
        })
    }
}

/// Held by an open [`Amplifier`]; releases the module when dropped.
#[derive(Debug)]
pub(crate) struct ModuleClaim {
    module: Arc<AmplifierModule>,
}

impl Drop for ModuleClaim {
    fn drop(&mut self) {
        self.module.in_use.store(false, Ordering::SeqCst);
    }
}

/// Builder for configuring and opening an amplifier.
///
/// Use [`AmplifierModule::builder()`] to create one.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use speaker_amp::{AmpConfig, AmplifierModule, MapProperties, MockHardware};
///
/// let properties = Arc::new(MapProperties::new());
/// properties.set("amp_hal_control", "legacy");
///
/// let amp = AmplifierModule::new()
///     .builder()
///     .hardware(MockHardware::new())
///     .properties(properties)
///     .config(AmpConfig::default())
///     .on_event(|e| eprintln!("{e:?}"))
///     .open()?;
///
/// assert_eq!(amp.control_mode(), speaker_amp::ControlMode::Legacy);
/// amp.close()?;
/// # Ok::<(), speaker_amp::AmpError>(())
/// ```
#[must_use]
pub struct AmplifierBuilder {
    module: Arc<AmplifierModule>,
    hardware: Option<Box<dyn AmplifierHardware>>,
    #[cfg(feature = "vendor-lib")]
    vendor_library: Option<PathBuf>,
    properties: Arc<dyn PropertySource>,
    config: AmpConfig,
    event_callback: Option<EventCallback>,
}

impl AmplifierBuilder {
    fn new(module: Arc<AmplifierModule>) -> Self {
        Self {
            module,
            hardware: None,
            #[cfg(feature = "vendor-lib")]
            vendor_library: None,
            properties: Arc::new(EnvProperties),
            config: AmpConfig::default(),
            event_callback: None,
        }
    }

    /// Use `hardware` as the amplifier binding.
    pub fn hardware<H: AmplifierHardware + 'static>(mut self, hardware: H) -> Self {
        self.hardware = Some(Box::new(hardware));
        self
    }

    /// Load the vendor library from `path` when opening.
    ///
    /// Ignored if [`hardware()`](Self::hardware) was also called.
    #[cfg(feature = "vendor-lib")]
    pub fn vendor_library(mut self, path: impl Into<PathBuf>) -> Self {
        self.vendor_library = Some(path.into());
        self
    }

    /// Read the control mode and device map overrides from `properties`.
    ///
    /// Default: [`EnvProperties`]
    pub fn properties(mut self, properties: Arc<dyn PropertySource>) -> Self {
        self.properties = properties;
        self
    }

    /// Set custom worker configuration.
    pub fn config(mut self, config: AmpConfig) -> Self {
        self.config = config;
        self
    }

    /// Set a callback to receive runtime events.
    pub fn on_event<F>(mut self, callback: F) -> Self
    where
        F: Fn(AmpEvent) + Send + Sync + 'static,
    {
        self.event_callback = Some(event_callback(callback));
        self
    }

    #[cfg(feature = "vendor-lib")]
    fn take_hardware(&mut self) -> Result<Box<dyn AmplifierHardware>, AmpError> {
        if let Some(hardware) = self.hardware.take() {
            return Ok(hardware);
        }
        let library = match self.vendor_library.take() {
            Some(path) => crate::hardware::VendorLibrary::open(path)?,
            None => crate::hardware::VendorLibrary::open_default()?,
        };
        Ok(Box::new(library))
    }

    #[cfg(not(feature = "vendor-lib"))]
    fn take_hardware(&mut self) -> Result<Box<dyn AmplifierHardware>, AmpError> {
        self.hardware.take().ok_or(AmpError::NoHardware)
    }

    /// Opens the amplifier and starts the reconciliation worker.
    ///
    /// Returns an [`Amplifier`] handle for producers.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - An amplifier is already open on this module (`Busy`)
    /// - No hardware binding is available (`NoHardware`, or a vendor library
    ///   load failure)
    /// - The worker thread cannot be spawned
    ///
    /// Everything acquired before the failure is released, including the
    /// module claim.
    pub fn open(mut self) -> Result<Amplifier, AmpError> {
        let claim = self.module.claim()?;
        let hardware = self.take_hardware()?;
        let hardware_name = hardware.name();

        let mode = ControlMode::from_properties(self.properties.as_ref());
        let routing = RoutingTable::from_properties(self.properties.as_ref());

        let shared = Arc::new(SharedState::new(mode));
        let store = Arc::new(DesiredStore::new(
            routing,
            Arc::clone(&shared),
            self.event_callback.clone(),
        ));
        let worker = Worker::new(
            hardware,
            Arc::clone(&store),
            Arc::clone(&shared),
            Arc::clone(&self.properties),
            self.config.clone(),
            mode,
        );

        let worker_handle = std::thread::Builder::new()
            .name(self.config.thread_name.clone())
            .spawn(move || worker.run())
            .map_err(AmpError::WorkerSpawn)?;

        tracing::info!(hardware = hardware_name, policy = %mode, "Amplifier opened");
        Ok(Amplifier::new(shared, store, worker_handle, claim))
    }
}
