//! Operator nodes and their validation / property-inference hooks.

use log::debug;

use crate::attributes::conv::{
    conv_inferred_filter_dims, conv_inferred_input_dims, conv_inferred_output_dims,
};
use crate::attributes::tensor::contiguous_stride;
use crate::attributes::{
    ConvDGradAttr, ConvFPropAttr, ConvWGradAttr, MatmulAttr, PointwiseAttr, TensorRef,
};
use crate::graph::context::Context;
use crate::types::{Error, Result};

/// A single operator in the graph. Hooks (`pre_validate`,
/// `infer_properties`, `post_validate`, and assembly emission) are
/// dispatched by matching on the variant.
#[derive(Debug)]
pub(crate) enum Node {
    ConvFProp(ConvFPropNode),
    ConvDGrad(ConvDGradNode),
    ConvWGrad(ConvWGradNode),
    Pointwise(PointwiseNode),
    Matmul(MatmulNode),
}

#[derive(Debug)]
pub(crate) struct ConvFPropNode {
    pub attr: ConvFPropAttr,
    pub context: Context,
}

#[derive(Debug)]
pub(crate) struct ConvDGradNode {
    pub attr: ConvDGradAttr,
    pub context: Context,
}

#[derive(Debug)]
pub(crate) struct ConvWGradNode {
    pub attr: ConvWGradAttr,
    pub context: Context,
}

#[derive(Debug)]
pub(crate) struct PointwiseNode {
    pub attr: PointwiseAttr,
    pub context: Context,
}

#[derive(Debug)]
pub(crate) struct MatmulNode {
    pub attr: MatmulAttr,
    pub context: Context,
}

impl Node {
    pub fn name(&self) -> String {
        match self {
            Node::ConvFProp(n) => n.attr.name().to_string(),
            Node::ConvDGrad(n) => n.attr.name().to_string(),
            Node::ConvWGrad(n) => n.attr.name().to_string(),
            Node::Pointwise(n) => n.attr.name().to_string(),
            Node::Matmul(n) => n.attr.name().to_string(),
        }
    }

    /// Input tensors in slot order.
    pub fn inputs(&self) -> Vec<TensorRef> {
        match self {
            Node::ConvFProp(n) => collect(&[n.attr.x(), n.attr.w()]),
            Node::ConvDGrad(n) => collect(&[n.attr.dy(), n.attr.w()]),
            Node::ConvWGrad(n) => collect(&[n.attr.dy(), n.attr.x()]),
            Node::Pointwise(n) => collect(&[n.attr.in0(), n.attr.in1()]),
            Node::Matmul(n) => collect(&[n.attr.a(), n.attr.b()]),
        }
    }

    /// Output tensors in slot order.
    pub fn outputs(&self) -> Vec<TensorRef> {
        match self {
            Node::ConvFProp(n) => collect(&[n.attr.y()]),
            Node::ConvDGrad(n) => collect(&[n.attr.dx()]),
            Node::ConvWGrad(n) => collect(&[n.attr.dw()]),
            Node::Pointwise(n) => collect(&[n.attr.out0()]),
            Node::Matmul(n) => collect(&[n.attr.c()]),
        }
    }

    pub fn pre_validate(&self) -> Result<()> {
        debug!("pre-validating node '{}'", self.name());
        match self {
            Node::ConvFProp(n) => {
                n.attr.validate_params()?;
                let (x, w) = (
                    require_slot(n.attr.x(), n.attr.name(), "X")?,
                    require_slot(n.attr.w(), n.attr.name(), "W")?,
                );
                require_slot(n.attr.y(), n.attr.name(), "Y")?;
                check_conv_operand_rank(&x, n.attr.stride().len(), n.attr.name())?;
                check_conv_operand_rank(&w, n.attr.stride().len(), n.attr.name())?;
            }
            Node::ConvDGrad(n) => {
                n.attr.validate_params()?;
                let (dy, w) = (
                    require_slot(n.attr.dy(), n.attr.name(), "DY")?,
                    require_slot(n.attr.w(), n.attr.name(), "W")?,
                );
                require_slot(n.attr.dx(), n.attr.name(), "DX")?;
                check_conv_operand_rank(&dy, n.attr.stride().len(), n.attr.name())?;
                check_conv_operand_rank(&w, n.attr.stride().len(), n.attr.name())?;
            }
            Node::ConvWGrad(n) => {
                n.attr.validate_params()?;
                let (dy, x) = (
                    require_slot(n.attr.dy(), n.attr.name(), "DY")?,
                    require_slot(n.attr.x(), n.attr.name(), "X")?,
                );
                require_slot(n.attr.dw(), n.attr.name(), "DW")?;
                check_conv_operand_rank(&dy, n.attr.stride().len(), n.attr.name())?;
                check_conv_operand_rank(&x, n.attr.stride().len(), n.attr.name())?;
            }
            Node::Pointwise(n) => {
                n.attr.require_mode()?;
                let in0 = require_slot(n.attr.in0(), n.attr.name(), "IN_0")?;
                let in1 = require_slot(n.attr.in1(), n.attr.name(), "IN_1")?;
                require_slot(n.attr.out0(), n.attr.name(), "OUT_0")?;
                check_dims_known(&in0, n.attr.name())?;
                check_dims_known(&in1, n.attr.name())?;
            }
            Node::Matmul(n) => {
                let a = require_slot(n.attr.a(), n.attr.name(), "A")?;
                let b = require_slot(n.attr.b(), n.attr.name(), "B")?;
                require_slot(n.attr.c(), n.attr.name(), "C")?;
                check_dims_known(&a, n.attr.name())?;
                check_dims_known(&b, n.attr.name())?;
                if a.dim().len() < 2 || b.dim().len() < 2 {
                    return Err(Error::InvalidAttribute(format!(
                        "matmul node '{}' requires rank >= 2 operands",
                        n.attr.name()
                    )));
                }
            }
        }
        Ok(())
    }

    /// Fills unset tensor dimensions, strides, and data types based on
    /// the node semantics and the graph context.
    pub fn infer_properties(&mut self) -> Result<()> {
        debug!("inferring properties for node '{}'", self.name());
        match self {
            Node::ConvFProp(n) => {
                let (x, w, y) = (slot(n.attr.x()), slot(n.attr.w()), slot(n.attr.y()));
                if y.dim().is_empty() {
                    y.set_dim(conv_inferred_output_dims(
                        &x.dim(),
                        &w.dim(),
                        n.attr.stride(),
                        n.attr.padding(),
                        n.attr.dilation(),
                    ));
                }
                finish_tensor_inference(&[x, w, y], &n.context);
                if n.attr.compute_data_type().is_none() {
                    if let Some(dt) = n.context.compute_data_type() {
                        n.attr.set_compute_data_type_mut(dt);
                    }
                }
            }
            Node::ConvDGrad(n) => {
                let (dy, w, dx) = (slot(n.attr.dy()), slot(n.attr.w()), slot(n.attr.dx()));
                if dx.dim().is_empty() {
                    dx.set_dim(conv_inferred_input_dims(
                        &dy.dim(),
                        &w.dim(),
                        n.attr.stride(),
                        n.attr.padding(),
                        n.attr.dilation(),
                    ));
                }
                finish_tensor_inference(&[dy, w, dx], &n.context);
                if n.attr.compute_data_type().is_none() {
                    if let Some(dt) = n.context.compute_data_type() {
                        n.attr.set_compute_data_type_mut(dt);
                    }
                }
            }
            Node::ConvWGrad(n) => {
                let (dy, x, dw) = (slot(n.attr.dy()), slot(n.attr.x()), slot(n.attr.dw()));
                if dw.dim().is_empty() {
                    dw.set_dim(conv_inferred_filter_dims(
                        &dy.dim(),
                        &x.dim(),
                        n.attr.stride(),
                        n.attr.padding(),
                        n.attr.dilation(),
                    ));
                }
                finish_tensor_inference(&[dy, x, dw], &n.context);
                if n.attr.compute_data_type().is_none() {
                    if let Some(dt) = n.context.compute_data_type() {
                        n.attr.set_compute_data_type_mut(dt);
                    }
                }
            }
            Node::Pointwise(n) => {
                let (a, b, out) = (slot(n.attr.in0()), slot(n.attr.in1()), slot(n.attr.out0()));
                if out.dim().is_empty() {
                    out.set_dim(a.dim());
                }
                finish_tensor_inference(&[a, b, out], &n.context);
                if n.attr.compute_data_type().is_none() {
                    if let Some(dt) = n.context.compute_data_type() {
                        n.attr.set_compute_data_type_mut(dt);
                    }
                }
            }
            Node::Matmul(n) => {
                let (a, b, c) = (slot(n.attr.a()), slot(n.attr.b()), slot(n.attr.c()));
                if c.dim().is_empty() {
                    let a_dim = a.dim();
                    let b_dim = b.dim();
                    let mut out = a_dim[..a_dim.len() - 1].to_vec();
                    out.push(b_dim[b_dim.len() - 1]);
                    c.set_dim(out);
                }
                finish_tensor_inference(&[a, b, c], &n.context);
                if n.attr.compute_data_type().is_none() {
                    if let Some(dt) = n.context.compute_data_type() {
                        n.attr.set_compute_data_type_mut(dt);
                    }
                }
            }
        }
        Ok(())
    }

    pub fn post_validate(&self) -> Result<()> {
        debug!("post-validating node '{}'", self.name());
        for t in self.inputs().iter().chain(self.outputs().iter()) {
            t.validate()?;
        }
        match self {
            Node::ConvFProp(n) => {
                let (x, w, y) = (slot(n.attr.x()), slot(n.attr.w()), slot(n.attr.y()));
                check_conv_operand_rank(&y, n.attr.stride().len(), n.attr.name())?;
                check_group_count(&x.dim(), &w.dim(), &y.dim(), n.attr.name())?;
            }
            Node::ConvDGrad(n) => {
                let (dy, w, dx) = (slot(n.attr.dy()), slot(n.attr.w()), slot(n.attr.dx()));
                check_conv_operand_rank(&dx, n.attr.stride().len(), n.attr.name())?;
                check_group_count(&dx.dim(), &w.dim(), &dy.dim(), n.attr.name())?;
            }
            Node::ConvWGrad(n) => {
                let (dy, x, dw) = (slot(n.attr.dy()), slot(n.attr.x()), slot(n.attr.dw()));
                check_conv_operand_rank(&dw, n.attr.stride().len(), n.attr.name())?;
                check_group_count(&x.dim(), &dw.dim(), &dy.dim(), n.attr.name())?;
            }
            Node::Pointwise(n) => {
                let (a, b, out) = (slot(n.attr.in0()), slot(n.attr.in1()), slot(n.attr.out0()));
                if out.dim() != a.dim() {
                    return Err(Error::InvalidAttribute(format!(
                        "pointwise node '{}' output dims {:?} do not match IN_0 dims {:?}",
                        n.attr.name(),
                        out.dim(),
                        a.dim()
                    )));
                }
                check_broadcastable(&b.dim(), &a.dim(), n.attr.name())?;
            }
            Node::Matmul(n) => {
                let (a, b) = (slot(n.attr.a()), slot(n.attr.b()));
                let a_dim = a.dim();
                let b_dim = b.dim();
                if a_dim[a_dim.len() - 1] != b_dim[b_dim.len() - 2] {
                    return Err(Error::InvalidAttribute(format!(
                        "matmul node '{}' contraction dims disagree: {:?} x {:?}",
                        n.attr.name(),
                        a_dim,
                        b_dim
                    )));
                }
            }
        }
        Ok(())
    }

    /// The convolution group count, `x_channels / filter_channels`.
    pub fn conv_group_count(&self) -> Option<i64> {
        match self {
            Node::ConvFProp(n) => {
                Some(slot(n.attr.x()).dim()[1] / slot(n.attr.w()).dim()[1])
            }
            Node::ConvDGrad(n) => {
                Some(slot(n.attr.dx()).dim()[1] / slot(n.attr.w()).dim()[1])
            }
            Node::ConvWGrad(n) => {
                Some(slot(n.attr.x()).dim()[1] / slot(n.attr.dw()).dim()[1])
            }
            Node::Pointwise(_) | Node::Matmul(_) => None,
        }
    }
}

fn collect(slots: &[Option<&TensorRef>]) -> Vec<TensorRef> {
    slots.iter().filter_map(|t| t.cloned()).collect()
}

/// Fetches a slot that pre-validation has already proven bound.
fn slot(t: Option<&TensorRef>) -> TensorRef {
    t.cloned().expect("slot bound during pre-validation")
}

fn require_slot(t: Option<&TensorRef>, node: &str, role: &str) -> Result<TensorRef> {
    t.cloned().ok_or_else(|| {
        Error::AttributeNotSet(format!("node '{node}' has no tensor bound for {role}"))
    })
}

fn check_dims_known(t: &TensorRef, node: &str) -> Result<()> {
    if t.dim().is_empty() {
        return Err(Error::AttributeNotSet(format!(
            "node '{}' input '{}' has no dimensions",
            node,
            t.name()
        )));
    }
    Ok(())
}

fn check_conv_operand_rank(t: &TensorRef, spatial_rank: usize, node: &str) -> Result<()> {
    let dim = t.dim();
    if dim.is_empty() {
        return Err(Error::AttributeNotSet(format!(
            "node '{}' operand '{}' has no dimensions",
            node,
            t.name()
        )));
    }
    if dim.len() != spatial_rank + 2 {
        return Err(Error::InvalidAttribute(format!(
            "node '{}' operand '{}' has rank {} but the conv has {} spatial dims",
            node,
            t.name(),
            dim.len(),
            spatial_rank
        )));
    }
    Ok(())
}

/// Fills contiguous strides and context-derived dtypes on tensors that
/// still lack them.
fn finish_tensor_inference(tensors: &[TensorRef], context: &Context) {
    for t in tensors {
        t.update(|attr| {
            if attr.stride().is_empty() && !attr.dim().is_empty() {
                attr.set_stride_mut(contiguous_stride(attr.dim()));
            }
            if attr.data_type().is_none() {
                if let Some(dt) = context.default_data_type_for(attr.is_virtual()) {
                    attr.set_data_type_mut(dt);
                }
            }
        });
    }
}

/// The group count must evenly divide both input and output channels.
fn check_group_count(x_dim: &[i64], w_dim: &[i64], y_dim: &[i64], node: &str) -> Result<()> {
    let channels = x_dim[1];
    let filter_channels = w_dim[1];
    if filter_channels <= 0 || channels % filter_channels != 0 {
        return Err(Error::InvalidAttribute(format!(
            "node '{node}' group count is not integral: {channels} input channels over \
             {filter_channels} filter channels"
        )));
    }
    let groups = channels / filter_channels;
    if w_dim[0] % groups != 0 {
        return Err(Error::InvalidAttribute(format!(
            "node '{node}' output channels {} are not divisible by group count {groups}",
            w_dim[0]
        )));
    }
    if y_dim[1] != w_dim[0] {
        return Err(Error::InvalidAttribute(format!(
            "node '{node}' output channels {} disagree with filter count {}",
            y_dim[1], w_dim[0]
        )));
    }
    Ok(())
}

/// Right-aligned broadcast compatibility of `from` into `to`.
fn check_broadcastable(from: &[i64], to: &[i64], node: &str) -> Result<()> {
    if from.len() > to.len() {
        return Err(Error::InvalidAttribute(format!(
            "pointwise node '{node}' IN_1 rank {} exceeds IN_0 rank {}",
            from.len(),
            to.len()
        )));
    }
    let offset = to.len() - from.len();
    for (i, &d) in from.iter().enumerate() {
        if d != 1 && d != to[offset + i] {
            return Err(Error::InvalidAttribute(format!(
                "pointwise node '{node}' IN_1 dims {from:?} do not broadcast to {to:?}"
            )));
        }
    }
    Ok(())
}
