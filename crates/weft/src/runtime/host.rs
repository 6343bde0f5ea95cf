//! Host reference runtime serving the `"local-task"` driver.
//!
//! Executes an [`ExecutionPlan`] directly on host memory with
//! stride-aware indexing, so permuted layouts (NHWC, transposed
//! operands) need no data movement. Arithmetic accumulates in `f64`,
//! which is exact for every supported integer width in practice and
//! for the float test domains; integer division truncates toward
//! zero.

use std::any::Any;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};

use half::{bf16, f16};
use log::debug;

use crate::attributes::PointwiseMode;
use crate::runtime::plan::{ConvDesc, ExecutionPlan, PlannedOp, TensorDesc};
use crate::runtime::{BufferView, DeviceRuntime, DriverFactory, Session};
use crate::types::{DataType, Error, Result, ScalarValue};

pub struct HostDriverFactory;

impl DriverFactory for HostDriverFactory {
    fn create_device(&self) -> Result<Arc<dyn DeviceRuntime>> {
        Ok(Arc::new(HostDevice))
    }
}

pub struct HostDevice;

impl DeviceRuntime for HostDevice {
    fn driver_name(&self) -> &str {
        "local-task"
    }

    fn allocate_view(
        &self,
        shape: &[i64],
        element_type: DataType,
        data: &[u8],
    ) -> Result<Arc<dyn BufferView>> {
        let expected = shape.iter().product::<i64>() as usize * element_type.size_in_bytes();
        if data.len() != expected {
            return Err(Error::RuntimeFailure(format!(
                "buffer of {} bytes does not match shape {shape:?} ({expected} bytes)",
                data.len()
            )));
        }
        Ok(Arc::new(HostBufferView {
            shape: shape.to_vec(),
            element_type,
            data: RwLock::new(data.to_vec()),
        }))
    }

    fn create_session(
        &self,
        plan: ExecutionPlan,
        module_path: &Path,
    ) -> Result<Box<dyn Session>> {
        // The compiled module is loaded by hardware runtimes; the host
        // runtime only checks it exists and interprets the plan.
        if !module_path.exists() {
            return Err(Error::RuntimeFailure(format!(
                "compiled module {} does not exist",
                module_path.display()
            )));
        }
        debug!(
            "host session created with {} ops, {} inputs, {} outputs",
            plan.ops.len(),
            plan.inputs.len(),
            plan.outputs.len()
        );
        Ok(Box::new(HostSession { plan }))
    }
}

/// Host-memory buffer view.
pub struct HostBufferView {
    shape: Vec<i64>,
    element_type: DataType,
    data: RwLock<Vec<u8>>,
}

impl HostBufferView {
    fn write_bytes(&self, bytes: &[u8]) -> Result<()> {
        let mut data = self.data.write().expect("host buffer poisoned");
        if data.len() != bytes.len() {
            return Err(Error::RuntimeFailure(format!(
                "cannot overwrite {}-byte buffer with {} bytes",
                data.len(),
                bytes.len()
            )));
        }
        data.copy_from_slice(bytes);
        Ok(())
    }
}

impl BufferView for HostBufferView {
    fn shape(&self) -> &[i64] {
        &self.shape
    }

    fn element_type(&self) -> DataType {
        self.element_type
    }

    fn byte_length(&self) -> usize {
        self.data.read().expect("host buffer poisoned").len()
    }

    fn read_bytes(&self) -> Result<Vec<u8>> {
        Ok(self.data.read().expect("host buffer poisoned").clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct HostSession {
    plan: ExecutionPlan,
}

/// An in-flight tensor value: resolved metadata plus host bytes.
struct HostTensor {
    dim: Vec<i64>,
    stride: Vec<i64>,
    data_type: DataType,
    bytes: Vec<u8>,
}

impl HostTensor {
    fn from_desc(desc: &TensorDesc, bytes: Vec<u8>) -> HostTensor {
        HostTensor {
            dim: desc.dim.clone(),
            stride: desc.stride.clone(),
            data_type: desc.data_type,
            bytes,
        }
    }
}

impl Session for HostSession {
    fn execute(
        &self,
        args: &[Option<Arc<dyn BufferView>>],
    ) -> Result<Vec<Arc<dyn BufferView>>> {
        let n_out = self.plan.outputs.len();
        if args.len() != n_out + self.plan.inputs.len() {
            return Err(Error::RuntimeFailure(format!(
                "expected {} call arguments, got {}",
                n_out + self.plan.inputs.len(),
                args.len()
            )));
        }

        let mut values: HashMap<String, HostTensor> = HashMap::new();
        for (desc, arg) in self.plan.inputs.iter().zip(&args[n_out..]) {
            let view = arg.as_ref().ok_or_else(|| {
                Error::RuntimeFailure(format!("input '{}' has no buffer view", desc.name))
            })?;
            let bytes = view.read_bytes()?;
            if bytes.len() != desc.byte_length() {
                return Err(Error::RuntimeFailure(format!(
                    "input '{}' is {} bytes, expected {}",
                    desc.name,
                    bytes.len(),
                    desc.byte_length()
                )));
            }
            values.insert(desc.name.clone(), HostTensor::from_desc(desc, bytes));
        }

        for op in &self.plan.ops {
            run_op(op, &mut values)?;
        }

        let mut outputs = Vec::with_capacity(n_out);
        for (desc, arg) in self.plan.outputs.iter().zip(&args[..n_out]) {
            let tensor = values.get(&desc.name).ok_or_else(|| {
                Error::RuntimeFailure(format!("output '{}' was never produced", desc.name))
            })?;
            match arg {
                Some(view) => {
                    let host = view
                        .as_any()
                        .downcast_ref::<HostBufferView>()
                        .ok_or_else(|| {
                            Error::RuntimeFailure(
                                "foreign buffer view passed to host session".to_string(),
                            )
                        })?;
                    host.write_bytes(&tensor.bytes)?;
                    outputs.push(Arc::clone(view));
                }
                None => {
                    outputs.push(Arc::new(HostBufferView {
                        shape: tensor.dim.clone(),
                        element_type: tensor.data_type,
                        data: RwLock::new(tensor.bytes.clone()),
                    }) as Arc<dyn BufferView>);
                }
            }
        }
        Ok(outputs)
    }
}

fn run_op(op: &PlannedOp, values: &mut HashMap<String, HostTensor>) -> Result<()> {
    match op {
        PlannedOp::ConvFProp { x, w, y, conv } => {
            let bytes = {
                let xt = operand(values, x)?;
                let wt = operand(values, w)?;
                conv_fprop(xt, wt, y, conv)
            };
            values.insert(y.name.clone(), HostTensor::from_desc(y, bytes));
        }
        PlannedOp::ConvDGrad { dy, w, dx, conv } => {
            let bytes = {
                let dyt = operand(values, dy)?;
                let wt = operand(values, w)?;
                conv_dgrad(dyt, wt, dx, conv)
            };
            values.insert(dx.name.clone(), HostTensor::from_desc(dx, bytes));
        }
        PlannedOp::ConvWGrad { dy, x, dw, conv } => {
            let bytes = {
                let dyt = operand(values, dy)?;
                let xt = operand(values, x)?;
                conv_wgrad(dyt, xt, dw, conv)
            };
            values.insert(dw.name.clone(), HostTensor::from_desc(dw, bytes));
        }
        PlannedOp::Pointwise { mode, a, b, out } => {
            materialize_scalar(values, a)?;
            materialize_scalar(values, b)?;
            let bytes = {
                let at = operand(values, a)?;
                let bt = operand(values, b)?;
                pointwise(*mode, at, bt, out)
            };
            values.insert(out.name.clone(), HostTensor::from_desc(out, bytes));
        }
        PlannedOp::Matmul { a, b, out } => {
            let bytes = {
                let at = operand(values, a)?;
                let bt = operand(values, b)?;
                matmul(at, bt, out)
            };
            values.insert(out.name.clone(), HostTensor::from_desc(out, bytes));
        }
    }
    Ok(())
}

fn operand<'a>(
    values: &'a HashMap<String, HostTensor>,
    desc: &TensorDesc,
) -> Result<&'a HostTensor> {
    values.get(&desc.name).ok_or_else(|| {
        Error::RuntimeFailure(format!("operand '{}' has no bound value", desc.name))
    })
}

/// Scalar literals carry their value on the descriptor instead of a
/// buffer; bind them on first use.
fn materialize_scalar(
    values: &mut HashMap<String, HostTensor>,
    desc: &TensorDesc,
) -> Result<()> {
    if values.contains_key(&desc.name) {
        return Ok(());
    }
    let Some(scalar) = desc.scalar else {
        return Ok(());
    };
    let value = match scalar {
        ScalarValue::Float(v) => v,
        ScalarValue::Int(v) => v as f64,
    };
    let mut bytes = vec![0u8; desc.byte_length()];
    store(desc.data_type, &mut bytes, 0, value);
    values.insert(desc.name.clone(), HostTensor::from_desc(desc, bytes));
    Ok(())
}

fn unravel(mut linear: usize, dim: &[i64], idx: &mut [i64]) {
    for axis in (0..dim.len()).rev() {
        idx[axis] = (linear % dim[axis] as usize) as i64;
        linear /= dim[axis] as usize;
    }
}

fn advance(idx: &mut [i64], dim: &[i64]) -> bool {
    for axis in (0..dim.len()).rev() {
        idx[axis] += 1;
        if idx[axis] < dim[axis] {
            return true;
        }
        idx[axis] = 0;
    }
    false
}

fn elem_offset(idx: &[i64], stride: &[i64]) -> usize {
    idx.iter().zip(stride).map(|(i, s)| i * s).sum::<i64>() as usize
}

fn conv_fprop(x: &HostTensor, w: &HostTensor, y: &TensorDesc, conv: &ConvDesc) -> Vec<u8> {
    let spatial = conv.stride.len();
    let mut out = vec![0u8; y.byte_length()];
    let filters_per_group = y.dim[1] / conv.groups;
    let filter_channels = w.dim[1];
    let kernel = &w.dim[2..];
    let mut idx = vec![0i64; y.dim.len()];
    let mut kidx = vec![0i64; spatial];
    for linear in 0..y.element_count() {
        unravel(linear, &y.dim, &mut idx);
        let (n, k) = (idx[0], idx[1]);
        let group = k / filters_per_group;
        let mut acc = 0.0f64;
        for cf in 0..filter_channels {
            let ci = group * filter_channels + cf;
            kidx.fill(0);
            loop {
                let mut x_off = n * x.stride[0] + ci * x.stride[1];
                let mut in_bounds = true;
                for s in 0..spatial {
                    let pos =
                        idx[2 + s] * conv.stride[s] - conv.padding[s] + kidx[s] * conv.dilation[s];
                    if pos < 0 || pos >= x.dim[2 + s] {
                        in_bounds = false;
                        break;
                    }
                    x_off += pos * x.stride[2 + s];
                }
                if in_bounds {
                    let w_off = k * w.stride[0]
                        + cf * w.stride[1]
                        + elem_offset(&kidx, &w.stride[2..]) as i64;
                    acc += load(x.data_type, &x.bytes, x_off as usize)
                        * load(w.data_type, &w.bytes, w_off as usize);
                }
                if !advance(&mut kidx, kernel) {
                    break;
                }
            }
        }
        store(y.data_type, &mut out, elem_offset(&idx, &y.stride), acc);
    }
    out
}

fn conv_dgrad(dy: &HostTensor, w: &HostTensor, dx: &TensorDesc, conv: &ConvDesc) -> Vec<u8> {
    let spatial = conv.stride.len();
    let mut out = vec![0u8; dx.byte_length()];
    let filter_channels = w.dim[1];
    let filters_per_group = w.dim[0] / conv.groups;
    let kernel = &w.dim[2..];
    let mut idx = vec![0i64; dx.dim.len()];
    let mut kidx = vec![0i64; spatial];
    let mut oidx = vec![0i64; spatial];
    for linear in 0..dx.element_count() {
        unravel(linear, &dx.dim, &mut idx);
        let (n, ci) = (idx[0], idx[1]);
        let group = ci / filter_channels;
        let cf = ci % filter_channels;
        let mut acc = 0.0f64;
        for kk in 0..filters_per_group {
            let k = group * filters_per_group + kk;
            kidx.fill(0);
            loop {
                let mut in_bounds = true;
                for s in 0..spatial {
                    let numerator = idx[2 + s] + conv.padding[s] - kidx[s] * conv.dilation[s];
                    if numerator < 0 || numerator % conv.stride[s] != 0 {
                        in_bounds = false;
                        break;
                    }
                    let o = numerator / conv.stride[s];
                    if o >= dy.dim[2 + s] {
                        in_bounds = false;
                        break;
                    }
                    oidx[s] = o;
                }
                if in_bounds {
                    let dy_off = n * dy.stride[0]
                        + k * dy.stride[1]
                        + elem_offset(&oidx, &dy.stride[2..]) as i64;
                    let w_off = k * w.stride[0]
                        + cf * w.stride[1]
                        + elem_offset(&kidx, &w.stride[2..]) as i64;
                    acc += load(dy.data_type, &dy.bytes, dy_off as usize)
                        * load(w.data_type, &w.bytes, w_off as usize);
                }
                if !advance(&mut kidx, kernel) {
                    break;
                }
            }
        }
        store(dx.data_type, &mut out, elem_offset(&idx, &dx.stride), acc);
    }
    out
}

fn conv_wgrad(dy: &HostTensor, x: &HostTensor, dw: &TensorDesc, conv: &ConvDesc) -> Vec<u8> {
    let spatial = conv.stride.len();
    let mut out = vec![0u8; dw.byte_length()];
    let filter_channels = dw.dim[1];
    let filters_per_group = dw.dim[0] / conv.groups;
    let out_spatial = &dy.dim[2..];
    let mut idx = vec![0i64; dw.dim.len()];
    let mut oidx = vec![0i64; spatial];
    for linear in 0..dw.element_count() {
        unravel(linear, &dw.dim, &mut idx);
        let (k, cf) = (idx[0], idx[1]);
        let group = k / filters_per_group;
        let ci = group * filter_channels + cf;
        let mut acc = 0.0f64;
        for n in 0..dy.dim[0] {
            oidx.fill(0);
            loop {
                let mut in_bounds = true;
                let mut x_off = n * x.stride[0] + ci * x.stride[1];
                for s in 0..spatial {
                    let pos = oidx[s] * conv.stride[s] - conv.padding[s]
                        + idx[2 + s] * conv.dilation[s];
                    if pos < 0 || pos >= x.dim[2 + s] {
                        in_bounds = false;
                        break;
                    }
                    x_off += pos * x.stride[2 + s];
                }
                if in_bounds {
                    let dy_off = n * dy.stride[0]
                        + k * dy.stride[1]
                        + elem_offset(&oidx, &dy.stride[2..]) as i64;
                    acc += load(dy.data_type, &dy.bytes, dy_off as usize)
                        * load(x.data_type, &x.bytes, x_off as usize);
                }
                if !advance(&mut oidx, out_spatial) {
                    break;
                }
            }
        }
        store(dw.data_type, &mut out, elem_offset(&idx, &dw.stride), acc);
    }
    out
}

fn pointwise(mode: PointwiseMode, a: &HostTensor, b: &HostTensor, out: &TensorDesc) -> Vec<u8> {
    let mut bytes = vec![0u8; out.byte_length()];
    let rank_gap = out.dim.len() - b.dim.len();
    let mut idx = vec![0i64; out.dim.len()];
    let mut bidx = vec![0i64; b.dim.len()];
    for linear in 0..out.element_count() {
        unravel(linear, &out.dim, &mut idx);
        let av = load(a.data_type, &a.bytes, elem_offset(&idx, &a.stride));
        for (axis, bi) in bidx.iter_mut().enumerate() {
            *bi = if b.dim[axis] == 1 {
                0
            } else {
                idx[rank_gap + axis]
            };
        }
        let bv = load(b.data_type, &b.bytes, elem_offset(&bidx, &b.stride));
        let mut value = match mode {
            PointwiseMode::Add => av + bv,
            PointwiseMode::Sub => av - bv,
            PointwiseMode::Mul => av * bv,
            PointwiseMode::Div => av / bv,
        };
        if out.data_type.is_integer() {
            value = value.trunc();
        }
        store(out.data_type, &mut bytes, elem_offset(&idx, &out.stride), value);
    }
    bytes
}

fn matmul(a: &HostTensor, b: &HostTensor, out: &TensorDesc) -> Vec<u8> {
    let rank = out.dim.len();
    let contraction = a.dim[a.dim.len() - 1];
    let mut bytes = vec![0u8; out.byte_length()];
    let mut idx = vec![0i64; rank];
    for linear in 0..out.element_count() {
        unravel(linear, &out.dim, &mut idx);
        let (m, n) = (idx[rank - 2], idx[rank - 1]);
        let batch_a: i64 = idx[..rank - 2]
            .iter()
            .zip(&a.stride[..rank - 2])
            .map(|(i, s)| i * s)
            .sum();
        let batch_b: i64 = if b.dim.len() == rank {
            idx[..rank - 2]
                .iter()
                .zip(&b.stride[..rank - 2])
                .map(|(i, s)| i * s)
                .sum()
        } else {
            0
        };
        let b_rank = b.dim.len();
        let mut acc = 0.0f64;
        for k in 0..contraction {
            let a_off = batch_a + m * a.stride[a.dim.len() - 2] + k * a.stride[a.dim.len() - 1];
            let b_off = batch_b + k * b.stride[b_rank - 2] + n * b.stride[b_rank - 1];
            acc += load(a.data_type, &a.bytes, a_off as usize)
                * load(b.data_type, &b.bytes, b_off as usize);
        }
        store(out.data_type, &mut bytes, elem_offset(&idx, &out.stride), acc);
    }
    bytes
}

fn load(data_type: DataType, bytes: &[u8], index: usize) -> f64 {
    let size = data_type.size_in_bytes();
    let at = &bytes[index * size..(index + 1) * size];
    match data_type {
        DataType::Half => f16::from_le_bytes([at[0], at[1]]).to_f64(),
        DataType::BFloat16 => bf16::from_le_bytes([at[0], at[1]]).to_f64(),
        DataType::Float => f32::from_le_bytes(at.try_into().expect("4-byte slice")) as f64,
        DataType::Double => f64::from_le_bytes(at.try_into().expect("8-byte slice")),
        DataType::Uint8 => at[0] as f64,
        DataType::Int8 => at[0] as i8 as f64,
        DataType::Int16 => i16::from_le_bytes([at[0], at[1]]) as f64,
        DataType::Int32 => i32::from_le_bytes(at.try_into().expect("4-byte slice")) as f64,
        DataType::Int64 => i64::from_le_bytes(at.try_into().expect("8-byte slice")) as f64,
        DataType::Boolean => (at[0] != 0) as u8 as f64,
    }
}

fn store(data_type: DataType, bytes: &mut [u8], index: usize, value: f64) {
    let size = data_type.size_in_bytes();
    let at = &mut bytes[index * size..(index + 1) * size];
    match data_type {
        DataType::Half => at.copy_from_slice(&f16::from_f64(value).to_le_bytes()),
        DataType::BFloat16 => at.copy_from_slice(&bf16::from_f64(value).to_le_bytes()),
        DataType::Float => at.copy_from_slice(&(value as f32).to_le_bytes()),
        DataType::Double => at.copy_from_slice(&value.to_le_bytes()),
        DataType::Uint8 => at[0] = value as i64 as u8,
        DataType::Int8 => at[0] = (value as i64 as i8) as u8,
        DataType::Int16 => at.copy_from_slice(&(value as i64 as i16).to_le_bytes()),
        DataType::Int32 => at.copy_from_slice(&(value as i64 as i32).to_le_bytes()),
        DataType::Int64 => at.copy_from_slice(&(value as i64).to_le_bytes()),
        DataType::Boolean => at[0] = (value != 0.0) as u8,
    }
}
