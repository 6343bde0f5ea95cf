//! Device buffer wrappers and the host element-type mapping.

use std::sync::{Arc, RwLock};

use half::{bf16, f16};
use log::debug;

use crate::backend::handle::Handle;
use crate::runtime::BufferView;
use crate::types::{DataType, Error, Result};

/// Maps a host scalar type to its on-device element type and
/// little-endian byte encoding.
pub trait Element: Copy {
    const DATA_TYPE: DataType;

    fn write_le(self, out: &mut Vec<u8>);

    fn read_le(bytes: &[u8]) -> Self;
}

macro_rules! element {
    ($ty:ty, $dtype:expr) => {
        impl Element for $ty {
            const DATA_TYPE: DataType = $dtype;

            fn write_le(self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_le_bytes());
            }

            fn read_le(bytes: &[u8]) -> Self {
                Self::from_le_bytes(bytes.try_into().expect("exact-width slice"))
            }
        }
    };
}

element!(f16, DataType::Half);
element!(bf16, DataType::BFloat16);
element!(f32, DataType::Float);
element!(f64, DataType::Double);
element!(u8, DataType::Uint8);
element!(i8, DataType::Int8);
element!(i16, DataType::Int16);
element!(i32, DataType::Int32);
element!(i64, DataType::Int64);

/// Owns (a share of) at most one device tensor view.
///
/// A default-constructed buffer holds no view: it is the
/// destination-passing placeholder which `Graph::execute` fills with
/// the output view popped from the session. Clones share the same view
/// slot, so the caller's handle observes the reset.
#[derive(Clone, Default)]
pub struct Buffer {
    view: Arc<RwLock<Option<Arc<dyn BufferView>>>>,
}

impl Buffer {
    /// An empty placeholder buffer.
    pub fn new() -> Buffer {
        Buffer::default()
    }

    /// Allocates a device-local view of `shape` and copies `data` into
    /// it (row-major dense).
    pub fn allocate<T: Element>(handle: &Handle, shape: &[i64], data: &[T]) -> Result<Buffer> {
        debug!("allocating device buffer of shape {shape:?}");
        let elements = shape.iter().product::<i64>();
        if elements < 0 || data.len() != elements as usize {
            return Err(Error::RuntimeFailure(format!(
                "{} data elements do not fill shape {shape:?}",
                data.len()
            )));
        }
        let mut bytes = Vec::with_capacity(data.len() * T::DATA_TYPE.size_in_bytes());
        for &value in data {
            value.write_le(&mut bytes);
        }
        let view = handle
            .device()
            .allocate_view(shape, T::DATA_TYPE, &bytes)?;
        Ok(Buffer::import(view))
    }

    /// Wraps an externally provided view, retaining a shared
    /// reference.
    pub fn import(view: Arc<dyn BufferView>) -> Buffer {
        Buffer {
            view: Arc::new(RwLock::new(Some(view))),
        }
    }

    /// Takes ownership of a fresh view, releasing any previous one.
    pub fn reset(&self, view: Arc<dyn BufferView>) {
        *self.view.write().expect("buffer view slot poisoned") = Some(view);
    }

    /// The current view, if any.
    pub fn view(&self) -> Option<Arc<dyn BufferView>> {
        self.view.read().expect("buffer view slot poisoned").clone()
    }

    /// True for a placeholder that has not been filled yet.
    pub fn is_null(&self) -> bool {
        self.view().is_none()
    }

    /// Reads the view back to host memory, blocking until the
    /// transfer completes. The output length is the view's byte
    /// length over the element size.
    pub fn read<T: Element>(&self, _handle: &Handle) -> Result<Vec<T>> {
        let view = self.view().ok_or_else(|| {
            Error::RuntimeFailure("cannot read from a buffer with no view".to_string())
        })?;
        if view.element_type().size_in_bytes() != T::DATA_TYPE.size_in_bytes() {
            return Err(Error::RuntimeFailure(format!(
                "element size mismatch reading {:?} buffer",
                view.element_type()
            )));
        }
        let bytes = view.read_bytes()?;
        let size = T::DATA_TYPE.size_in_bytes();
        Ok(bytes.chunks_exact(size).map(T::read_le).collect())
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.view() {
            Some(view) => f
                .debug_struct("Buffer")
                .field("shape", &view.shape())
                .field("element_type", &view.element_type())
                .finish(),
            None => f.write_str("Buffer(null)"),
        }
    }
}
