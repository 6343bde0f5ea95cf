//! Attributes for the convolution family: forward, data gradient, and
//! weight gradient.

use crate::attributes::tensor::TensorRef;
use crate::types::{DataType, Error, Result};

/// Computes the forward convolution output dimensions from input and
/// filter dimensions: `out = floor((in + 2p - d(k - 1) - 1) / s) + 1`
/// per spatial axis, with batch from the input and channels from the
/// filter.
pub fn conv_inferred_output_dims(
    x_dim: &[i64],
    w_dim: &[i64],
    stride: &[i64],
    padding: &[i64],
    dilation: &[i64],
) -> Vec<i64> {
    let mut out = Vec::with_capacity(x_dim.len());
    out.push(x_dim[0]);
    out.push(w_dim[0]);
    for i in 0..stride.len() {
        let input = x_dim[2 + i];
        let kernel = w_dim[2 + i];
        out.push((input + 2 * padding[i] - dilation[i] * (kernel - 1) - 1) / stride[i] + 1);
    }
    out
}

/// Inverse of [`conv_inferred_output_dims`] for the input:
/// `in = (out - 1)s - 2p + d(k - 1) + 1`.
pub fn conv_inferred_input_dims(
    dy_dim: &[i64],
    w_dim: &[i64],
    stride: &[i64],
    padding: &[i64],
    dilation: &[i64],
) -> Vec<i64> {
    let mut dx = Vec::with_capacity(dy_dim.len());
    dx.push(dy_dim[0]);
    dx.push(w_dim[1]);
    for i in 0..stride.len() {
        let output = dy_dim[2 + i];
        let kernel = w_dim[2 + i];
        dx.push((output - 1) * stride[i] - 2 * padding[i] + dilation[i] * (kernel - 1) + 1);
    }
    dx
}

/// Inverse of [`conv_inferred_output_dims`] for the filter, assuming a
/// single group: `k = (in + 2p - 1 - (out - 1)s) / d + 1`. Grouped
/// callers set the filter dimensions explicitly.
pub fn conv_inferred_filter_dims(
    dy_dim: &[i64],
    x_dim: &[i64],
    stride: &[i64],
    padding: &[i64],
    dilation: &[i64],
) -> Vec<i64> {
    let mut dw = Vec::with_capacity(x_dim.len());
    dw.push(dy_dim[1]);
    dw.push(x_dim[1]);
    for i in 0..stride.len() {
        let input = x_dim[2 + i];
        let output = dy_dim[2 + i];
        dw.push((input + 2 * padding[i] - 1 - (output - 1) * stride[i]) / dilation[i] + 1);
    }
    dw
}

/// Shared validation for the conv parameter triple.
fn validate_conv_params(
    name: &str,
    stride: &[i64],
    padding: &[i64],
    dilation: &[i64],
) -> Result<()> {
    if stride.is_empty() || padding.is_empty() || dilation.is_empty() {
        return Err(Error::AttributeNotSet(format!(
            "conv node '{name}' is missing stride, padding, or dilation"
        )));
    }
    if stride.len() != padding.len() || stride.len() != dilation.len() {
        return Err(Error::InvalidAttribute(format!(
            "conv node '{name}' has mismatched stride/padding/dilation ranks"
        )));
    }
    if !matches!(stride.len(), 2 | 3) {
        return Err(Error::InvalidAttribute(format!(
            "conv node '{name}' supports 2 or 3 spatial dims, got {}",
            stride.len()
        )));
    }
    Ok(())
}

macro_rules! conv_attr {
    ($(#[$doc:meta])* $name:ident { $($slot:ident => $setter:ident),+ $(,)? }) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Default)]
        pub struct $name {
            name: String,
            compute_data_type: Option<DataType>,
            stride: Vec<i64>,
            padding: Vec<i64>,
            dilation: Vec<i64>,
            $($slot: Option<TensorRef>,)+
        }

        impl $name {
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

            pub fn set_stride(mut self, stride: impl Into<Vec<i64>>) -> Self {
                self.stride = stride.into();
                self
            }

            pub fn set_padding(mut self, padding: impl Into<Vec<i64>>) -> Self {
                self.padding = padding.into();
                self
            }

            pub fn set_dilation(mut self, dilation: impl Into<Vec<i64>>) -> Self {
                self.dilation = dilation.into();
                self
            }

            $(
                pub fn $setter(mut self, tensor: &TensorRef) -> Self {
                    self.$slot = Some(tensor.clone());
                    self
                }

                pub fn $slot(&self) -> Option<&TensorRef> {
                    self.$slot.as_ref()
                }
            )+

            pub fn name(&self) -> &str {
                &self.name
            }

            pub fn compute_data_type(&self) -> Option<DataType> {
                self.compute_data_type
            }

            pub fn stride(&self) -> &[i64] {
                &self.stride
            }

            pub fn padding(&self) -> &[i64] {
                &self.padding
            }

            pub fn dilation(&self) -> &[i64] {
                &self.dilation
            }

            pub(crate) fn set_name_mut(&mut self, name: impl Into<String>) {
                self.name = name.into();
            }

            pub(crate) fn set_compute_data_type_mut(&mut self, data_type: DataType) {
                self.compute_data_type = Some(data_type);
            }

            pub(crate) fn validate_params(&self) -> Result<()> {
                validate_conv_params(&self.name, &self.stride, &self.padding, &self.dilation)
            }
        }
    };
}

conv_attr! {
    /// Forward convolution: image X and filter W produce response Y.
    ConvFPropAttr { x => set_x, w => set_w, y => set_y }
}

conv_attr! {
    /// Data gradient: incoming gradient DY and filter W produce the
    /// image gradient DX.
    ConvDGradAttr { dy => set_dy, w => set_w, dx => set_dx }
}

conv_attr! {
    /// Weight gradient: incoming gradient DY and image X produce the
    /// filter gradient DW.
    ConvWGradAttr { dy => set_dy, x => set_x, dw => set_dw }
}
