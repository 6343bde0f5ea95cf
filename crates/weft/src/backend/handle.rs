//! The per-device runtime handle.

use std::sync::Arc;

use log::info;

use crate::backend::Backend;
use crate::runtime::{DeviceRuntime, RuntimeInstance};
use crate::types::Result;

/// Owns a share of the process-wide runtime instance plus one logical
/// device for the chosen backend.
///
/// Handles may be shared by multiple graphs targeting the same
/// physical device; distinct physical devices get their own handles.
/// The instance is released when the last handle drops; the device is
/// released with its handle. Handles are movable but not clonable.
pub struct Handle {
    backend: Backend,
    instance: Arc<RuntimeInstance>,
    device: Arc<dyn DeviceRuntime>,
}

impl Handle {
    /// Acquires the shared runtime instance and creates a device for
    /// `backend`'s HAL driver.
    pub fn create(backend: Backend) -> Result<Handle> {
        info!("creating handle for backend {backend}");
        let instance = RuntimeInstance::shared();
        let device = instance.device_for(backend.hal_driver())?;
        Ok(Handle {
            backend,
            instance,
            device,
        })
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    /// The underlying device. Valid only as long as this handle lives.
    pub(crate) fn device(&self) -> &Arc<dyn DeviceRuntime> {
        &self.device
    }

    /// The shared runtime instance. Valid while any handle lives.
    #[allow(dead_code)]
    pub(crate) fn instance(&self) -> &Arc<RuntimeInstance> {
        &self.instance
    }
}
