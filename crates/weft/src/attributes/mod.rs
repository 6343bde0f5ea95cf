//! Attribute records: per-tensor metadata and per-operator parameters.

pub mod conv;
pub mod matmul;
pub mod pointwise;
pub mod tensor;

pub use conv::{
    conv_inferred_filter_dims, conv_inferred_input_dims, conv_inferred_output_dims, ConvDGradAttr,
    ConvFPropAttr, ConvWGradAttr,
};
pub use matmul::MatmulAttr;
pub use pointwise::{PointwiseAttr, PointwiseMode};
pub use tensor::{
    channels_last_stride_order, contiguous_stride, contiguous_stride_order, inverse_permutation,
    permute, stride_from_dim_and_order, stride_order, TensorAttr, TensorRef,
};
