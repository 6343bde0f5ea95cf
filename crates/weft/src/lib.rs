//! weft: a graph front-end for tensor operations.
//!
//! Applications describe a small dataflow graph of tensor ops
//! (convolution forward / data-gradient / weight-gradient, pointwise,
//! matmul), validate it, lower it to byte-stable torch-dialect MLIR,
//! compile that assembly with an external `iree-compile`, and execute
//! the compiled module on a device through the runtime contract in
//! [`runtime`].
//!
//! # Example
//!
//! ```no_run
//! use weft::{Backend, Buffer, ConvFPropAttr, DataType, Graph, Handle, TensorAttr};
//!
//! # fn main() -> weft::Result<()> {
//! let handle = Handle::create(Backend::Cpu)?;
//!
//! let mut graph = Graph::new();
//! graph
//!     .set_name("fprop_sample")
//!     .set_io_data_type(DataType::Half)
//!     .set_compute_data_type(DataType::Float);
//!
//! let x = graph.tensor(
//!     TensorAttr::new()
//!         .set_name("image")
//!         .set_dim([16, 128, 64, 64])
//!         .set_stride([524288, 4096, 64, 1]),
//! );
//! let w = graph.tensor(
//!     TensorAttr::new()
//!         .set_name("filter")
//!         .set_dim([256, 128, 1, 1])
//!         .set_stride([128, 1, 1, 1]),
//! );
//! let y = graph.conv_fprop(
//!     &x,
//!     &w,
//!     ConvFPropAttr::new()
//!         .set_stride([1, 1])
//!         .set_padding([0, 0])
//!         .set_dilation([1, 1]),
//! );
//! y.set_name("response").set_output(true);
//!
//! graph.validate()?;
//! graph.compile(&handle, /*remove=*/ true)?;
//!
//! let x_buf = Buffer::allocate(&handle, &[16, 128, 64, 64], &vec![1.0f32; 16 * 128 * 64 * 64])?;
//! # Ok(())
//! # }
//! ```

mod asm;
pub mod attributes;
pub mod backend;
pub mod cache;
pub mod compile;
pub mod graph;
pub mod runtime;
pub mod types;

pub use attributes::{
    ConvDGradAttr, ConvFPropAttr, ConvWGradAttr, MatmulAttr, PointwiseAttr, PointwiseMode,
    TensorAttr, TensorRef,
};
pub use backend::{Backend, Buffer, Element, Handle};
pub use cache::CachedAssetKind;
pub use graph::{CompiledArtifact, Graph, VariantPack};
pub use types::{DataType, Error, Result, ScalarValue};
