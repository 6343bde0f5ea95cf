//! Logical tensor descriptions and the shared handle used to reference
//! them from multiple nodes and the variant pack.

use std::hash::{Hash, Hasher};
use std::sync::{Arc, RwLock};

use crate::types::{DataType, Error, Result, ScalarValue};

/// Describes a logical tensor: name, dimensions, strides (in element
/// counts), element type, and role flags.
///
/// Dimensions are logical; strides uniquely identify the memory
/// permutation (e.g. NHWC data carried under NCHW logical dims).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TensorAttr {
    name: String,
    dim: Vec<i64>,
    stride: Vec<i64>,
    data_type: Option<DataType>,
    is_virtual: bool,
    is_output: bool,
    is_scalar: bool,
    scalar_value: Option<ScalarValue>,
    uid: Option<i64>,
}

impl TensorAttr {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a 1-element scalar literal tensor.
    pub fn from_scalar(value: ScalarValue, data_type: DataType) -> Self {
        Self {
            dim: vec![1],
            stride: vec![1],
            data_type: Some(data_type),
            is_scalar: true,
            scalar_value: Some(value),
            ..Self::default()
        }
    }

    pub fn set_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn set_dim(mut self, dim: impl Into<Vec<i64>>) -> Self {
        self.dim = dim.into();
        self
    }

    pub fn set_stride(mut self, stride: impl Into<Vec<i64>>) -> Self {
        self.stride = stride.into();
        self
    }

    pub fn set_data_type(mut self, data_type: DataType) -> Self {
        self.data_type = Some(data_type);
        self
    }

    pub fn set_is_virtual(mut self, is_virtual: bool) -> Self {
        self.is_virtual = is_virtual;
        self
    }

    /// Marks the tensor as a terminal graph output. An output is never
    /// virtual, so the virtual flag is cleared (and set when demoted).
    pub fn set_output(mut self, is_output: bool) -> Self {
        self.is_output = is_output;
        self.is_virtual = !is_output;
        self
    }

    pub fn set_uid(mut self, uid: i64) -> Self {
        self.uid = Some(uid);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dim(&self) -> &[i64] {
        &self.dim
    }

    pub fn stride(&self) -> &[i64] {
        &self.stride
    }

    pub fn data_type(&self) -> Option<DataType> {
        self.data_type
    }

    pub fn is_virtual(&self) -> bool {
        self.is_virtual
    }

    pub fn is_output(&self) -> bool {
        self.is_output
    }

    pub fn is_scalar(&self) -> bool {
        self.is_scalar
    }

    pub fn scalar_value(&self) -> Option<ScalarValue> {
        self.scalar_value
    }

    pub fn uid(&self) -> Option<i64> {
        self.uid
    }

    pub(crate) fn set_stride_mut(&mut self, stride: Vec<i64>) {
        self.stride = stride;
    }

    pub(crate) fn set_data_type_mut(&mut self, data_type: DataType) {
        self.data_type = Some(data_type);
    }

    /// Checks that the tensor is fully specified. Runs after property
    /// inference, so nothing may be left unset.
    pub(crate) fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::AttributeNotSet("tensor name not set".into()));
        }
        if self.dim.is_empty() {
            return Err(Error::AttributeNotSet(format!(
                "tensor '{}' has no dimensions",
                self.name
            )));
        }
        if self.stride.len() != self.dim.len() {
            return Err(Error::InvalidAttribute(format!(
                "tensor '{}' has {} dims but {} strides",
                self.name,
                self.dim.len(),
                self.stride.len()
            )));
        }
        if self.dim.iter().any(|&d| d <= 0) {
            return Err(Error::InvalidAttribute(format!(
                "tensor '{}' has a non-positive dimension",
                self.name
            )));
        }
        if self.stride.iter().any(|&s| s <= 0) {
            return Err(Error::InvalidAttribute(format!(
                "tensor '{}' has a non-positive stride",
                self.name
            )));
        }
        if self.data_type.is_none() {
            return Err(Error::AttributeNotSet(format!(
                "tensor '{}' has no data type",
                self.name
            )));
        }
        if self.is_scalar && self.scalar_value.is_none() {
            return Err(Error::AttributeNotSet(format!(
                "scalar tensor '{}' has no value",
                self.name
            )));
        }
        Ok(())
    }
}

/// Shared handle to a [`TensorAttr`].
///
/// Tensors are referenced by identity: the same handle may appear in
/// several nodes, the graph I/O sets, and the variant pack. Hashing
/// and equality use the allocation pointer, so renaming a tensor after
/// insertion is safe.
#[derive(Clone)]
pub struct TensorRef(Arc<RwLock<TensorAttr>>);

impl TensorRef {
    pub fn new(attr: TensorAttr) -> Self {
        Self(Arc::new(RwLock::new(attr)))
    }

    pub fn set_name(&self, name: impl Into<String>) -> &Self {
        self.update(|t| t.name = name.into());
        self
    }

    pub fn set_dim(&self, dim: impl Into<Vec<i64>>) -> &Self {
        self.update(|t| t.dim = dim.into());
        self
    }

    pub fn set_stride(&self, stride: impl Into<Vec<i64>>) -> &Self {
        self.update(|t| t.stride = stride.into());
        self
    }

    pub fn set_data_type(&self, data_type: DataType) -> &Self {
        self.update(|t| t.data_type = Some(data_type));
        self
    }

    pub fn set_output(&self, is_output: bool) -> &Self {
        self.update(|t| {
            t.is_output = is_output;
            t.is_virtual = !is_output;
        });
        self
    }

    pub fn name(&self) -> String {
        self.with(|t| t.name.clone())
    }

    pub fn dim(&self) -> Vec<i64> {
        self.with(|t| t.dim.clone())
    }

    pub fn stride(&self) -> Vec<i64> {
        self.with(|t| t.stride.clone())
    }

    pub fn data_type(&self) -> Option<DataType> {
        self.with(|t| t.data_type)
    }

    pub fn is_virtual(&self) -> bool {
        self.with(|t| t.is_virtual)
    }

    pub fn is_output(&self) -> bool {
        self.with(|t| t.is_output)
    }

    pub fn is_scalar(&self) -> bool {
        self.with(|t| t.is_scalar)
    }

    pub fn scalar_value(&self) -> Option<ScalarValue> {
        self.with(|t| t.scalar_value)
    }

    pub(crate) fn with<R>(&self, f: impl FnOnce(&TensorAttr) -> R) -> R {
        let guard = self.0.read().unwrap_or_else(|e| e.into_inner());
        f(&guard)
    }

    pub(crate) fn update<R>(&self, f: impl FnOnce(&mut TensorAttr) -> R) -> R {
        let mut guard = self.0.write().unwrap_or_else(|e| e.into_inner());
        f(&mut guard)
    }

    pub(crate) fn validate(&self) -> Result<()> {
        self.with(|t| t.validate())
    }
}

impl PartialEq for TensorRef {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for TensorRef {}

impl Hash for TensorRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Arc::as_ptr(&self.0) as usize).hash(state);
    }
}

impl std::fmt::Debug for TensorRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.with(|t| write!(f, "TensorRef({:?})", t.name))
    }
}

/// Computes the row-major contiguous strides for `dim`.
pub fn contiguous_stride(dim: &[i64]) -> Vec<i64> {
    let mut stride = vec![1i64; dim.len()];
    for i in (0..dim.len().saturating_sub(1)).rev() {
        stride[i] = stride[i + 1] * dim[i + 1];
    }
    stride
}

/// Returns the permutation that sorts `stride` descending, breaking
/// ties by larger dimension first and then by original axis index.
///
/// This is the logical-to-physical axis map: `permute(dim, order)`
/// yields the dimensions in physical (row-major) order.
pub fn stride_order(stride: &[i64], dim: &[i64]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..stride.len()).collect();
    order.sort_by(|&a, &b| {
        stride[b]
            .cmp(&stride[a])
            .then(dim[b].cmp(&dim[a]))
            .then(a.cmp(&b))
    });
    order
}

/// Inverts a permutation.
pub fn inverse_permutation(perm: &[usize]) -> Vec<usize> {
    let mut inv = vec![0usize; perm.len()];
    for (i, &p) in perm.iter().enumerate() {
        inv[p] = i;
    }
    inv
}

/// Applies a permutation to a slice.
pub fn permute<T: Copy>(values: &[T], perm: &[usize]) -> Vec<T> {
    perm.iter().map(|&p| values[p]).collect()
}

/// The identity stride order for tensors laid out contiguously.
pub fn contiguous_stride_order(rank: usize) -> Vec<usize> {
    (0..rank).collect()
}

/// The channels-last (NHWC / NDHWC) stride order: the channel axis is
/// innermost, spatial axes keep their relative order.
pub fn channels_last_stride_order(rank: usize) -> Vec<usize> {
    let mut order = Vec::with_capacity(rank);
    order.push(0);
    order.extend(2..rank);
    order.push(1);
    order
}

/// Builds strides for `dim` so the physical layout follows `order`
/// (outermost first).
pub fn stride_from_dim_and_order(dim: &[i64], order: &[usize]) -> Vec<i64> {
    let mut stride = vec![0i64; dim.len()];
    let mut running = 1i64;
    for &axis in order.iter().rev() {
        stride[axis] = running;
        running *= dim[axis];
    }
    stride
}
