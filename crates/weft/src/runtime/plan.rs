//! Resolved per-graph execution plans handed to runtime sessions.

use crate::attributes::{PointwiseMode, TensorRef};
use crate::graph::node::Node;
use crate::graph::Graph;
use crate::types::{DataType, Error, Result, ScalarValue};

/// A fully resolved tensor: everything a runtime needs to bind and
/// index it, detached from the builder's shared handles.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorDesc {
    pub name: String,
    pub dim: Vec<i64>,
    pub stride: Vec<i64>,
    pub data_type: DataType,
    pub scalar: Option<ScalarValue>,
}

impl TensorDesc {
    pub(crate) fn from_ref(t: &TensorRef) -> Result<TensorDesc> {
        let data_type = t.data_type().ok_or_else(|| {
            Error::AttributeNotSet(format!("tensor '{}' has no data type", t.name()))
        })?;
        Ok(TensorDesc {
            name: t.name(),
            dim: t.dim(),
            stride: t.stride(),
            data_type,
            scalar: t.scalar_value(),
        })
    }

    pub fn element_count(&self) -> usize {
        self.dim.iter().product::<i64>() as usize
    }

    pub fn byte_length(&self) -> usize {
        self.element_count() * self.data_type.size_in_bytes()
    }
}

/// Convolution parameters shared by the three conv op kinds.
#[derive(Debug, Clone, PartialEq)]
pub struct ConvDesc {
    pub stride: Vec<i64>,
    pub padding: Vec<i64>,
    pub dilation: Vec<i64>,
    pub groups: i64,
}

/// One operator with resolved operand descriptors, in graph insertion
/// order.
#[derive(Debug, Clone)]
pub enum PlannedOp {
    ConvFProp {
        x: TensorDesc,
        w: TensorDesc,
        y: TensorDesc,
        conv: ConvDesc,
    },
    ConvDGrad {
        dy: TensorDesc,
        w: TensorDesc,
        dx: TensorDesc,
        conv: ConvDesc,
    },
    ConvWGrad {
        dy: TensorDesc,
        x: TensorDesc,
        dw: TensorDesc,
        conv: ConvDesc,
    },
    Pointwise {
        mode: PointwiseMode,
        a: TensorDesc,
        b: TensorDesc,
        out: TensorDesc,
    },
    Matmul {
        a: TensorDesc,
        b: TensorDesc,
        out: TensorDesc,
    },
}

/// The program a session executes: ops in insertion order plus the
/// graph I/O in the same name-sorted order the emitter used for the
/// function parameters.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    pub ops: Vec<PlannedOp>,
    pub inputs: Vec<TensorDesc>,
    pub outputs: Vec<TensorDesc>,
}

impl ExecutionPlan {
    pub(crate) fn from_graph(graph: &Graph) -> Result<ExecutionPlan> {
        let mut ops = Vec::with_capacity(graph.nodes().len());
        for node in graph.nodes() {
            ops.push(plan_node(node)?);
        }
        let inputs = graph
            .graph_inputs_sorted()
            .iter()
            .map(TensorDesc::from_ref)
            .collect::<Result<Vec<_>>>()?;
        let outputs = graph
            .graph_outputs_sorted()
            .iter()
            .map(TensorDesc::from_ref)
            .collect::<Result<Vec<_>>>()?;
        Ok(ExecutionPlan {
            ops,
            inputs,
            outputs,
        })
    }
}

fn plan_node(node: &Node) -> Result<PlannedOp> {
    let conv_desc = |stride: &[i64], padding: &[i64], dilation: &[i64]| -> ConvDesc {
        ConvDesc {
            stride: stride.to_vec(),
            padding: padding.to_vec(),
            dilation: dilation.to_vec(),
            groups: node.conv_group_count().unwrap_or(1),
        }
    };
    let desc = |t: Option<&TensorRef>| -> Result<TensorDesc> {
        TensorDesc::from_ref(t.expect("slot bound during validation"))
    };
    Ok(match node {
        Node::ConvFProp(n) => PlannedOp::ConvFProp {
            x: desc(n.attr.x())?,
            w: desc(n.attr.w())?,
            y: desc(n.attr.y())?,
            conv: conv_desc(n.attr.stride(), n.attr.padding(), n.attr.dilation()),
        },
        Node::ConvDGrad(n) => PlannedOp::ConvDGrad {
            dy: desc(n.attr.dy())?,
            w: desc(n.attr.w())?,
            dx: desc(n.attr.dx())?,
            conv: conv_desc(n.attr.stride(), n.attr.padding(), n.attr.dilation()),
        },
        Node::ConvWGrad(n) => PlannedOp::ConvWGrad {
            dy: desc(n.attr.dy())?,
            x: desc(n.attr.x())?,
            dw: desc(n.attr.dw())?,
            conv: conv_desc(n.attr.stride(), n.attr.padding(), n.attr.dilation()),
        },
        Node::Pointwise(n) => PlannedOp::Pointwise {
            mode: n.attr.require_mode()?,
            a: desc(n.attr.in0())?,
            b: desc(n.attr.in1())?,
            out: desc(n.attr.out0())?,
        },
        Node::Matmul(n) => PlannedOp::Matmul {
            a: desc(n.attr.a())?,
            b: desc(n.attr.b())?,
            out: desc(n.attr.c())?,
        },
    })
}
