//! The device-runtime contract consumed by handles, buffers, and
//! per-graph sessions, plus the driver registry.
//!
//! The real accelerator runtime is an external collaborator; this
//! module pins down the interface the library needs from it: a
//! reference-counted instance, a device factory keyed by a HAL driver
//! string, per-graph sessions with FIFO argument push/pop, and buffer
//! views with blocking host readback. The `"local-task"` driver is
//! served by the in-crate host runtime; embedders may register
//! additional drivers (e.g. `"hip"`).

pub mod host;
pub mod plan;

use std::any::Any;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, OnceLock, RwLock, Weak};

use log::{debug, info};

use crate::types::{DataType, Error, Result};

pub use plan::{ConvDesc, ExecutionPlan, PlannedOp, TensorDesc};

/// A device-side tensor view: shape, element type, and byte storage
/// owned by the runtime. Shared by reference counting; dropping the
/// last reference releases the underlying storage.
pub trait BufferView: Send + Sync {
    fn shape(&self) -> &[i64];

    fn element_type(&self) -> DataType;

    fn byte_length(&self) -> usize;

    /// Schedules a device-to-host transfer and blocks until complete.
    fn read_bytes(&self) -> Result<Vec<u8>>;

    fn as_any(&self) -> &dyn Any;
}

/// A per-graph session holding the loaded module. Sessions are not
/// shared across threads.
pub trait Session: Send {
    /// Runs the module entry point. Arguments are pushed in FIFO
    /// order: graph outputs first (a `None` view is the
    /// destination-passing placeholder), then graph inputs. Output
    /// views are popped in the same output order.
    fn execute(
        &self,
        args: &[Option<Arc<dyn BufferView>>],
    ) -> Result<Vec<Arc<dyn BufferView>>>;
}

/// A logical device created from a HAL driver.
pub trait DeviceRuntime: Send + Sync {
    fn driver_name(&self) -> &str;

    /// Allocates a device-local view and copies `data` into it
    /// (row-major dense encoding).
    fn allocate_view(
        &self,
        shape: &[i64],
        element_type: DataType,
        data: &[u8],
    ) -> Result<Arc<dyn BufferView>>;

    /// Creates a session bound to this device, loading the compiled
    /// module at `module_path`. The execution plan mirrors the
    /// compiled program; hardware runtimes load the module and may
    /// ignore the plan, the host runtime interprets the plan.
    fn create_session(
        &self,
        plan: ExecutionPlan,
        module_path: &Path,
    ) -> Result<Box<dyn Session>>;
}

/// Creates devices for one HAL driver string.
pub trait DriverFactory: Send + Sync {
    fn create_device(&self) -> Result<Arc<dyn DeviceRuntime>>;
}

fn drivers() -> &'static RwLock<HashMap<String, Arc<dyn DriverFactory>>> {
    static DRIVERS: OnceLock<RwLock<HashMap<String, Arc<dyn DriverFactory>>>> = OnceLock::new();
    DRIVERS.get_or_init(|| {
        let mut map: HashMap<String, Arc<dyn DriverFactory>> = HashMap::new();
        map.insert(
            "local-task".to_string(),
            Arc::new(host::HostDriverFactory),
        );
        RwLock::new(map)
    })
}

/// Registers a driver factory under a HAL driver string, replacing any
/// previous registration for the same name.
pub fn register_driver(name: impl Into<String>, factory: Arc<dyn DriverFactory>) {
    let name = name.into();
    info!("registering runtime driver '{name}'");
    drivers()
        .write()
        .expect("driver registry poisoned")
        .insert(name, factory);
}

/// The process-wide runtime instance. The first handle constructs it;
/// it is released when the last strong reference (usually the last
/// handle) is dropped.
pub struct RuntimeInstance {
    _private: (),
}

impl RuntimeInstance {
    /// Returns the shared instance, creating it if no handle currently
    /// holds one.
    pub fn shared() -> Arc<RuntimeInstance> {
        static SHARED: OnceLock<Mutex<Weak<RuntimeInstance>>> = OnceLock::new();
        let slot = SHARED.get_or_init(|| Mutex::new(Weak::new()));
        let mut weak = slot.lock().expect("runtime instance slot poisoned");
        if let Some(instance) = weak.upgrade() {
            return instance;
        }
        debug!("creating shared runtime instance");
        let instance = Arc::new(RuntimeInstance { _private: () });
        *weak = Arc::downgrade(&instance);
        instance
    }

    /// Creates a device for the given HAL driver string.
    pub fn device_for(&self, driver: &str) -> Result<Arc<dyn DeviceRuntime>> {
        let factory = drivers()
            .read()
            .expect("driver registry poisoned")
            .get(driver)
            .cloned()
            .ok_or_else(|| {
                Error::RuntimeFailure(format!("no runtime driver registered for '{driver}'"))
            })?;
        factory.create_device()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_task_driver_is_built_in() {
        let instance = RuntimeInstance::shared();
        let device = instance.device_for("local-task").unwrap();
        assert_eq!(device.driver_name(), "local-task");
    }

    #[test]
    fn unknown_driver_is_a_runtime_failure() {
        let instance = RuntimeInstance::shared();
        assert!(matches!(
            instance.device_for("does-not-exist"),
            Err(Error::RuntimeFailure(_))
        ));
    }

    #[test]
    fn instance_is_shared_while_alive() {
        let a = RuntimeInstance::shared();
        let b = RuntimeInstance::shared();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
