//! Attributes for element-wise binary operations.

use serde::{Deserialize, Serialize};

use crate::attributes::tensor::TensorRef;
use crate::types::{DataType, Error, Result};

/// Element-wise binary operation selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PointwiseMode {
    Add,
    Sub,
    Mul,
    Div,
}

/// Attributes for a pointwise node: two inputs IN_0 and IN_1 and one
/// output OUT_0. IN_1 may broadcast against IN_0 following the usual
/// right-aligned rules.
#[derive(Debug, Clone, Default)]
pub struct PointwiseAttr {
    name: String,
    compute_data_type: Option<DataType>,
    mode: Option<PointwiseMode>,
    in0: Option<TensorRef>,
    in1: Option<TensorRef>,
    out0: Option<TensorRef>,
}

impl PointwiseAttr {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn set_compute_data_type(mut self, data_type: DataType) -> Self {
        self.compute_data_type = Some(data_type);
        self
    }

    pub fn set_mode(mut self, mode: PointwiseMode) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn set_in0(mut self, tensor: &TensorRef) -> Self {
        self.in0 = Some(tensor.clone());
        self
    }

    pub fn set_in1(mut self, tensor: &TensorRef) -> Self {
        self.in1 = Some(tensor.clone());
        self
    }

    pub fn set_out0(mut self, tensor: &TensorRef) -> Self {
        self.out0 = Some(tensor.clone());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn compute_data_type(&self) -> Option<DataType> {
        self.compute_data_type
    }

    pub fn mode(&self) -> Option<PointwiseMode> {
        self.mode
    }

    pub fn in0(&self) -> Option<&TensorRef> {
        self.in0.as_ref()
    }

    pub fn in1(&self) -> Option<&TensorRef> {
        self.in1.as_ref()
    }

    pub fn out0(&self) -> Option<&TensorRef> {
        self.out0.as_ref()
    }

    pub(crate) fn set_name_mut(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub(crate) fn set_compute_data_type_mut(&mut self, data_type: DataType) {
        self.compute_data_type = Some(data_type);
    }

    pub(crate) fn require_mode(&self) -> Result<PointwiseMode> {
        self.mode.ok_or_else(|| {
            Error::AttributeNotSet(format!("pointwise node '{}' has no mode", self.name))
        })
    }
}
