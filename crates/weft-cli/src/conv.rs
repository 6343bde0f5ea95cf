//! Convolution benchmark: builds the requested graph, compiles it,
//! and executes it for the requested number of iterations.
//!
//! Flag names and semantics are kept in sync with MIOpen's ConvDriver
//! so existing benchmark invocations translate directly.

use anyhow::{bail, Context as _, Result};
use clap::Args;
use half::{bf16, f16};
use log::info;

use weft::attributes::{
    channels_last_stride_order, contiguous_stride_order, conv_inferred_output_dims,
    stride_from_dim_and_order,
};
use weft::{
    Backend, Buffer, CachedAssetKind, ConvDGradAttr, ConvFPropAttr, ConvWGradAttr, DataType,
    Graph, Handle, PointwiseAttr, PointwiseMode, TensorAttr, TensorRef, VariantPack,
};

const LAYOUTS: [&str; 4] = ["NCHW", "NHWC", "NCDHW", "NDHWC"];

#[derive(Args, Debug)]
pub struct ConvArgs {
    /// Conv mode: 1=forward, 2=data_grad, 4=weight_grad
    #[arg(short = 'F', long = "mode")]
    pub mode: i64,

    /// Input batch size
    #[arg(short = 'n', long = "batchsize", value_parser = clap::value_parser!(i64).range(1..))]
    pub batchsize: i64,

    /// Input channels
    #[arg(short = 'c', long = "in_channels", value_parser = clap::value_parser!(i64).range(1..))]
    pub in_channels: i64,

    /// Input depth (3D only)
    #[arg(long = "in_d", default_value_t = -1)]
    pub in_d: i64,

    /// Input height
    #[arg(short = 'H', long = "in_h", value_parser = clap::value_parser!(i64).range(1..))]
    pub in_h: i64,

    /// Input width
    #[arg(short = 'W', long = "in_w", value_parser = clap::value_parser!(i64).range(1..))]
    pub in_w: i64,

    /// Number of groups
    #[arg(short = 'g', long = "group_count", default_value_t = 1, value_parser = clap::value_parser!(i64).range(1..))]
    pub group_count: i64,

    /// Output channels
    #[arg(short = 'k', long = "out_channels", value_parser = clap::value_parser!(i64).range(1..))]
    pub out_channels: i64,

    /// Filter depth (3D only)
    #[arg(long = "fil_d", default_value_t = -1)]
    pub fil_d: i64,

    /// Filter height
    #[arg(short = 'y', long = "fil_h", value_parser = clap::value_parser!(i64).range(1..))]
    pub fil_h: i64,

    /// Filter width
    #[arg(short = 'x', long = "fil_w", value_parser = clap::value_parser!(i64).range(1..))]
    pub fil_w: i64,

    /// Conv stride depth (3D only)
    #[arg(long = "conv_stride_d", default_value_t = -1)]
    pub conv_stride_d: i64,

    /// Conv stride height
    #[arg(short = 'u', long = "conv_stride_h", value_parser = clap::value_parser!(i64).range(1..))]
    pub conv_stride_h: i64,

    /// Conv stride width
    #[arg(short = 'v', long = "conv_stride_w", value_parser = clap::value_parser!(i64).range(1..))]
    pub conv_stride_w: i64,

    /// Conv padding depth (3D only)
    #[arg(long = "pad_d", default_value_t = -1)]
    pub pad_d: i64,

    /// Conv padding height
    #[arg(short = 'p', long = "pad_h", value_parser = clap::value_parser!(i64).range(0..))]
    pub pad_h: i64,

    /// Conv padding width
    #[arg(short = 'q', long = "pad_w", value_parser = clap::value_parser!(i64).range(0..))]
    pub pad_w: i64,

    /// Conv dilation depth (3D only)
    #[arg(long = "dilation_d", default_value_t = -1)]
    pub dilation_d: i64,

    /// Conv dilation height
    #[arg(short = 'l', long = "dilation_h", value_parser = clap::value_parser!(i64).range(1..))]
    pub dilation_h: i64,

    /// Conv dilation width
    #[arg(short = 'j', long = "dilation_w", value_parser = clap::value_parser!(i64).range(1..))]
    pub dilation_w: i64,

    /// Input layout
    #[arg(long = "in_layout", value_parser = LAYOUTS)]
    pub in_layout: String,

    /// Filter layout
    #[arg(long = "fil_layout", value_parser = LAYOUTS)]
    pub fil_layout: String,

    /// Output layout
    #[arg(long = "out_layout", value_parser = LAYOUTS)]
    pub out_layout: String,

    /// Number of spatial dimensions (2 for conv2d, 3 for conv3d)
    #[arg(long = "spatial_dim", value_parser = clap::value_parser!(i64).range(2..=3))]
    pub spatial_dim: i64,

    /// Run fp16 convolution
    #[arg(long = "fp16", conflicts_with = "bf16")]
    pub fp16: bool,

    /// Run bf16 convolution
    #[arg(long = "bf16")]
    pub bf16: bool,

    /// Run with bias (only for mode=1)
    #[arg(short = 'b', long = "bias")]
    pub bias: bool,
}

impl ConvArgs {
    /// Validation beyond what clap's per-flag checks cover.
    pub fn validate(&self) -> Result<()> {
        if !matches!(self.mode, 1 | 2 | 4) {
            bail!("invalid conv mode {} (expected 1, 2, or 4)", self.mode);
        }
        let expected_layout_len = if self.spatial_dim == 2 { 4 } else { 5 };
        for (flag, layout) in [
            ("--in_layout", &self.in_layout),
            ("--fil_layout", &self.fil_layout),
            ("--out_layout", &self.out_layout),
        ] {
            if layout.len() != expected_layout_len {
                bail!(
                    "{flag} {layout} is invalid for a {}D convolution",
                    self.spatial_dim
                );
            }
        }
        if self.spatial_dim == 3
            && [
                self.in_d,
                self.fil_d,
                self.conv_stride_d,
                self.pad_d,
                self.dilation_d,
            ]
            .contains(&-1)
        {
            bail!(
                "3D convolution requires in_d, fil_d, conv_stride_d, pad_d, and dilation_d to \
                 be set"
            );
        }
        if self.in_channels % self.group_count != 0 || self.out_channels % self.group_count != 0 {
            bail!("invalid group count {}", self.group_count);
        }
        if self.bias && self.mode != 1 {
            bail!("--bias is only supported for forward convolution (mode=1)");
        }
        Ok(())
    }

    fn io_data_type(&self) -> DataType {
        if self.fp16 {
            DataType::Half
        } else if self.bf16 {
            DataType::BFloat16
        } else {
            DataType::Float
        }
    }

    fn x_dims(&self) -> Vec<i64> {
        let (n, c) = (self.batchsize, self.in_channels);
        if self.spatial_dim == 2 {
            vec![n, c, self.in_h, self.in_w]
        } else {
            vec![n, c, self.in_d, self.in_h, self.in_w]
        }
    }

    fn w_dims(&self) -> Vec<i64> {
        let (k, fc) = (self.out_channels, self.in_channels / self.group_count);
        if self.spatial_dim == 2 {
            vec![k, fc, self.fil_h, self.fil_w]
        } else {
            vec![k, fc, self.fil_d, self.fil_h, self.fil_w]
        }
    }

    fn conv_stride(&self) -> Vec<i64> {
        if self.spatial_dim == 2 {
            vec![self.conv_stride_h, self.conv_stride_w]
        } else {
            vec![self.conv_stride_d, self.conv_stride_h, self.conv_stride_w]
        }
    }

    fn conv_padding(&self) -> Vec<i64> {
        if self.spatial_dim == 2 {
            vec![self.pad_h, self.pad_w]
        } else {
            vec![self.pad_d, self.pad_h, self.pad_w]
        }
    }

    fn conv_dilation(&self) -> Vec<i64> {
        if self.spatial_dim == 2 {
            vec![self.dilation_h, self.dilation_w]
        } else {
            vec![self.dilation_d, self.dilation_h, self.dilation_w]
        }
    }

    /// Bakes every parameter into the graph name so concurrent driver
    /// invocations never collide on cache paths.
    fn graph_name(&self, kind: &str) -> String {
        let mut name = format!(
            "benchmark_conv_{kind}_n{}_c{}_d{}_h{}_w{}_g{}_k{}_z{}_y{}_x{}_t{}_u{}_v{}_o{}_p{}_q{}_m{}_l{}_j{}_S{}_I{}_O{}_F{}",
            self.batchsize,
            self.in_channels,
            self.in_d,
            self.in_h,
            self.in_w,
            self.group_count,
            self.out_channels,
            self.fil_d,
            self.fil_h,
            self.fil_w,
            self.conv_stride_d,
            self.conv_stride_h,
            self.conv_stride_w,
            self.pad_d,
            self.pad_h,
            self.pad_w,
            self.dilation_d,
            self.dilation_h,
            self.dilation_w,
            self.spatial_dim,
            self.in_layout,
            self.out_layout,
            self.fil_layout,
        );
        if kind == "fprop" {
            name.push_str(&format!("_bias{}", self.bias));
        }
        name
    }
}

pub fn execute(args: &ConvArgs, iter: i64) -> Result<()> {
    args.validate()?;
    let handle = create_handle()?;
    match args.mode {
        1 => benchmark_fprop(args, iter, &handle),
        2 => benchmark_dgrad(args, iter, &handle),
        4 => benchmark_wgrad(args, iter, &handle),
        _ => unreachable!("mode validated above"),
    }
}

#[cfg(feature = "amdgpu")]
fn create_handle() -> Result<Handle> {
    Handle::create(Backend::Amdgpu).context("creating AMDGPU handle")
}

#[cfg(not(feature = "amdgpu"))]
fn create_handle() -> Result<Handle> {
    Handle::create(Backend::Cpu).context("creating CPU handle")
}

/// Builds strides for `dim` following a layout flag: `NC*` layouts are
/// contiguous, the rest are channels-last.
fn layout_stride(dim: &[i64], layout: &str) -> Vec<i64> {
    let order = if layout.starts_with("NC") {
        contiguous_stride_order(dim.len())
    } else {
        channels_last_stride_order(dim.len())
    };
    stride_from_dim_and_order(dim, &order)
}

fn allocate_filled(handle: &Handle, dim: &[i64], data_type: DataType, value: f32) -> Result<Buffer> {
    let count = dim.iter().product::<i64>() as usize;
    let buffer = match data_type {
        DataType::Half => Buffer::allocate(handle, dim, &vec![f16::from_f32(value); count])?,
        DataType::BFloat16 => Buffer::allocate(handle, dim, &vec![bf16::from_f32(value); count])?,
        _ => Buffer::allocate(handle, dim, &vec![value; count])?,
    };
    Ok(buffer)
}

/// Graph-level types stay fp32; the per-tensor types below carry the
/// requested precision, so the graph types only fill gaps.
fn set_graph_defaults(graph: &mut Graph, name: &str) {
    graph
        .set_name(name)
        .set_io_data_type(DataType::Float)
        .set_compute_data_type(DataType::Float)
        .set_intermediate_data_type(DataType::Float);
}

fn run_iterations(
    graph: &Graph,
    handle: &Handle,
    variant_pack: &VariantPack,
    iter: i64,
) -> Result<()> {
    for i in 0..iter {
        info!("iteration {}/{iter}", i + 1);
        graph.execute(handle, variant_pack)?;
    }
    if let Ok(json) = graph.read_compilation_cache_file(CachedAssetKind::Statistics) {
        if let Ok(stats) = weft::compile::CompileStatistics::parse(&json) {
            if let Some(count) = stats.dispatch_count {
                info!("dispatch count: {count}");
            }
        }
    }
    Ok(())
}

fn benchmark_fprop(args: &ConvArgs, iter: i64, handle: &Handle) -> Result<()> {
    let io_type = args.io_data_type();
    let x_dims = args.x_dims();
    let w_dims = args.w_dims();

    let mut graph = Graph::new();
    set_graph_defaults(&mut graph, &args.graph_name("fprop"));

    let x = graph.tensor(
        TensorAttr::new()
            .set_name("input")
            .set_dim(x_dims.clone())
            .set_stride(layout_stride(&x_dims, &args.in_layout))
            .set_data_type(io_type),
    );
    let w = graph.tensor(
        TensorAttr::new()
            .set_name("filter")
            .set_dim(w_dims.clone())
            .set_stride(layout_stride(&w_dims, &args.fil_layout))
            .set_data_type(io_type),
    );
    let conv_attr = ConvFPropAttr::new()
        .set_stride(args.conv_stride())
        .set_padding(args.conv_padding())
        .set_dilation(args.conv_dilation())
        .set_name("conv_fprop");
    let mut y = graph.conv_fprop(&x, &w, conv_attr);
    y.set_data_type(io_type);

    let mut bias_tensor: Option<TensorRef> = None;
    if args.bias {
        let mut bias_dims = vec![1, args.out_channels];
        bias_dims.extend(std::iter::repeat(1).take(args.spatial_dim as usize));
        let b = graph.tensor(
            TensorAttr::new()
                .set_name("bias")
                .set_dim(bias_dims.clone())
                .set_stride(layout_stride(&bias_dims, &args.in_layout))
                .set_data_type(io_type),
        );
        let bias_attr = PointwiseAttr::new().set_mode(PointwiseMode::Add);
        y = graph.pointwise(&y, &b, bias_attr);
        y.set_data_type(io_type);
        bias_tensor = Some(b);
    }
    y.set_output(true).set_data_type(io_type);

    graph.validate()?;
    graph.compile(handle, /*remove=*/ true)?;

    let x_buf = allocate_filled(handle, &x_dims, io_type, 1.0)?;
    let w_buf = allocate_filled(handle, &w_dims, io_type, 1.0)?;
    let y_buf = allocate_filled(handle, &y.dim(), io_type, 0.0)?;

    let mut variant_pack = VariantPack::new();
    variant_pack.insert(x, x_buf);
    variant_pack.insert(w, w_buf);
    variant_pack.insert(y, y_buf);
    if let Some(b) = bias_tensor {
        let b_buf = allocate_filled(handle, &b.dim(), io_type, 1.0)?;
        variant_pack.insert(b, b_buf);
    }

    run_iterations(&graph, handle, &variant_pack, iter)
}

fn benchmark_dgrad(args: &ConvArgs, iter: i64, handle: &Handle) -> Result<()> {
    let io_type = args.io_data_type();
    let x_dims = args.x_dims();
    let w_dims = args.w_dims();
    let dy_dims = conv_inferred_output_dims(
        &x_dims,
        &w_dims,
        &args.conv_stride(),
        &args.conv_padding(),
        &args.conv_dilation(),
    );

    let mut graph = Graph::new();
    set_graph_defaults(&mut graph, &args.graph_name("dgrad"));

    let dy = graph.tensor(
        TensorAttr::new()
            .set_name("dy")
            .set_dim(dy_dims.clone())
            .set_stride(layout_stride(&dy_dims, &args.out_layout))
            .set_data_type(io_type),
    );
    let w = graph.tensor(
        TensorAttr::new()
            .set_name("filter")
            .set_dim(w_dims.clone())
            .set_stride(layout_stride(&w_dims, &args.fil_layout))
            .set_data_type(io_type),
    );
    let conv_attr = ConvDGradAttr::new()
        .set_stride(args.conv_stride())
        .set_padding(args.conv_padding())
        .set_dilation(args.conv_dilation())
        .set_name("conv_dgrad");
    let dx = graph.conv_dgrad(&dy, &w, conv_attr);
    dx.set_dim(x_dims.clone())
        .set_output(true)
        .set_data_type(io_type);

    graph.validate()?;
    graph.compile(handle, /*remove=*/ true)?;

    let dy_buf = allocate_filled(handle, &dy_dims, io_type, 1.0)?;
    let w_buf = allocate_filled(handle, &w_dims, io_type, 1.0)?;
    let dx_buf = allocate_filled(handle, &x_dims, io_type, 0.0)?;

    let mut variant_pack = VariantPack::new();
    variant_pack.insert(dy, dy_buf);
    variant_pack.insert(w, w_buf);
    variant_pack.insert(dx, dx_buf);

    run_iterations(&graph, handle, &variant_pack, iter)
}

fn benchmark_wgrad(args: &ConvArgs, iter: i64, handle: &Handle) -> Result<()> {
    let io_type = args.io_data_type();
    let x_dims = args.x_dims();
    let w_dims = args.w_dims();
    let dy_dims = conv_inferred_output_dims(
        &x_dims,
        &w_dims,
        &args.conv_stride(),
        &args.conv_padding(),
        &args.conv_dilation(),
    );

    let mut graph = Graph::new();
    set_graph_defaults(&mut graph, &args.graph_name("wgrad"));

    let dy = graph.tensor(
        TensorAttr::new()
            .set_name("dy")
            .set_dim(dy_dims.clone())
            .set_stride(layout_stride(&dy_dims, &args.out_layout))
            .set_data_type(io_type),
    );
    let x = graph.tensor(
        TensorAttr::new()
            .set_name("input")
            .set_dim(x_dims.clone())
            .set_stride(layout_stride(&x_dims, &args.in_layout))
            .set_data_type(io_type),
    );
    let conv_attr = ConvWGradAttr::new()
        .set_stride(args.conv_stride())
        .set_padding(args.conv_padding())
        .set_dilation(args.conv_dilation())
        .set_name("conv_wgrad");
    let dw = graph.conv_wgrad(&dy, &x, conv_attr);
    dw.set_dim(w_dims.clone())
        .set_output(true)
        .set_data_type(io_type);

    graph.validate()?;
    graph.compile(handle, /*remove=*/ true)?;

    let dy_buf = allocate_filled(handle, &dy_dims, io_type, 1.0)?;
    let x_buf = allocate_filled(handle, &x_dims, io_type, 1.0)?;
    let dw_buf = allocate_filled(handle, &w_dims, io_type, 0.0)?;

    let mut variant_pack = VariantPack::new();
    variant_pack.insert(dy, dy_buf);
    variant_pack.insert(x, x_buf);
    variant_pack.insert(dw, dw_buf);

    run_iterations(&graph, handle, &variant_pack, iter)
}
