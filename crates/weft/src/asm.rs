//! Deterministic torch-dialect assembly emission.
//!
//! The emitted text is the compilation cache key, so emission must be
//! byte-stable: parameter order is outputs-then-inputs sorted by name,
//! node order is builder insertion order, and every constant name is
//! derived from the node name. Nothing here iterates an unordered
//! container.
//!
//! The module wraps a single `main` function in destination-passing
//! style: the leading parameters are the graph outputs as mutable
//! tensors, written at the end through
//! `torch.overwrite.tensor.contents`. Non-contiguous operands are
//! permuted to contiguous layout on entry and back on exit, so every
//! compute op sees logical dimensions.

use crate::attributes::tensor::{inverse_permutation, stride_order};
use crate::attributes::{PointwiseMode, TensorRef};
use crate::graph::node::{Node, PointwiseNode};
use crate::graph::Graph;
use crate::types::{DataType, ScalarValue};

const INDENT: &str = "    ";

pub(crate) fn emit_graph(graph: &Graph) -> String {
    let mut out = String::new();
    out.push_str("module @module {\n");

    let mut params = Vec::new();
    for tensor in graph.graph_outputs_sorted() {
        params.push(format!("%{}_: {}", tensor.name(), dest_type(tensor)));
    }
    for tensor in graph.graph_inputs_sorted() {
        params.push(format!("%{}: {}", tensor.name(), physical_type(tensor)));
    }
    out.push_str(&format!(
        "  func.func @main({}) attributes {{torch.assume_strict_symbolic_shapes}} {{\n",
        params.join(", ")
    ));

    for node in graph.nodes() {
        emit_node(&mut out, node);
    }

    for tensor in graph.graph_outputs_sorted() {
        out.push_str(&format!(
            "{INDENT}torch.overwrite.tensor.contents %{name} overwrites %{name}_ : {vty}, {dty}\n",
            name = tensor.name(),
            vty = physical_type(tensor),
            dty = dest_type(tensor),
        ));
    }
    out.push_str(&format!("{INDENT}return\n"));
    out.push_str("  }\n");
    out.push_str("}\n");
    out
}

fn emit_node(out: &mut String, node: &Node) {
    match node {
        Node::ConvFProp(n) => {
            let op = n.attr.name();
            let x = n.attr.x().expect("X bound during validation");
            let w = n.attr.w().expect("W bound during validation");
            let y = n.attr.y().expect("Y bound during validation");
            let groups = node.conv_group_count().expect("conv node has groups");

            emit_conv_prologue(
                out,
                op,
                groups,
                n.attr.stride(),
                n.attr.padding(),
                n.attr.dilation(),
            );
            let x_ssa = emit_inbound_permute(out, "permute_X", op, "_perm", x);
            let w_ssa = emit_inbound_permute(out, "permute_W", op, "_perm", w);

            let result = result_ssa(y);
            out.push_str(&format!(
                "{INDENT}{result} = torch.aten.convolution {x_ssa}, {w_ssa}, %bias_{op}, \
                 %stride_{op}, %padding_{op}, %dilation_{op}, %transposed_{op}, \
                 %output_padding_{op}, %groups_{op} : {xty}, {wty}, !torch.none, \
                 !torch.list<int>, !torch.list<int>, !torch.list<int>, !torch.bool, \
                 !torch.list<int>, !torch.int -> {yty}\n",
                xty = logical_type(x),
                wty = logical_type(w),
                yty = logical_type(y),
            ));
            emit_outbound_permute(out, "permute_Y", op, y);
        }
        Node::ConvDGrad(n) => {
            let op = n.attr.name();
            let dy = n.attr.dy().expect("DY bound during validation");
            let w = n.attr.w().expect("W bound during validation");
            let dx = n.attr.dx().expect("DX bound during validation");
            let groups = node.conv_group_count().expect("conv node has groups");

            emit_conv_prologue(
                out,
                op,
                groups,
                n.attr.stride(),
                n.attr.padding(),
                n.attr.dilation(),
            );
            let dy_ssa = emit_inbound_permute(out, "permute_DY", op, "_perm", dy);
            let w_ssa = emit_inbound_permute(out, "permute_W", op, "_perm", w);
            let empty_ssa = emit_empty(out, "DX", "x", op, dx);
            emit_output_mask(out, op, [true, false, false]);

            let result = result_ssa(dx);
            out.push_str(&format!(
                "{INDENT}{result}, %grad_weight_{op}, %grad_bias_{op} = \
                 torch.aten.convolution_backward {dy_ssa}, {empty_ssa}, {w_ssa}, %bias_{op}, \
                 %stride_{op}, %padding_{op}, %dilation_{op}, %transposed_{op}, \
                 %output_padding_{op}, %groups_{op}, %output_mask_{op} : {dyty}, {dxty}, {wty}, \
                 !torch.none, !torch.list<int>, !torch.list<int>, !torch.list<int>, !torch.bool, \
                 !torch.list<int>, !torch.int, !torch.list<bool> -> {dxty}, !torch.none, \
                 !torch.none\n",
                dyty = logical_type(dy),
                dxty = logical_type(dx),
                wty = logical_type(w),
            ));
            emit_outbound_permute(out, "permute_DX", op, dx);
        }
        Node::ConvWGrad(n) => {
            let op = n.attr.name();
            let dy = n.attr.dy().expect("DY bound during validation");
            let x = n.attr.x().expect("X bound during validation");
            let dw = n.attr.dw().expect("DW bound during validation");
            let groups = node.conv_group_count().expect("conv node has groups");

            emit_conv_prologue(
                out,
                op,
                groups,
                n.attr.stride(),
                n.attr.padding(),
                n.attr.dilation(),
            );
            let dy_ssa = emit_inbound_permute(out, "permute_DY", op, "_perm", dy);
            let x_ssa = emit_inbound_permute(out, "permute_X", op, "_perm", x);
            let empty_ssa = emit_empty(out, "DW", "w", op, dw);
            emit_output_mask(out, op, [false, true, false]);

            let result = result_ssa(dw);
            out.push_str(&format!(
                "{INDENT}%grad_input_{op}, {result}, %grad_bias_{op} = \
                 torch.aten.convolution_backward {dy_ssa}, {x_ssa}, {empty_ssa}, %bias_{op}, \
                 %stride_{op}, %padding_{op}, %dilation_{op}, %transposed_{op}, \
                 %output_padding_{op}, %groups_{op}, %output_mask_{op} : {dyty}, {xty}, {dwty}, \
                 !torch.none, !torch.list<int>, !torch.list<int>, !torch.list<int>, !torch.bool, \
                 !torch.list<int>, !torch.int, !torch.list<bool> -> !torch.none, {dwty}, \
                 !torch.none\n",
                dyty = logical_type(dy),
                xty = logical_type(x),
                dwty = logical_type(dw),
            ));
            emit_outbound_permute(out, "permute_DW", op, dw);
        }
        Node::Pointwise(n) => emit_pointwise(out, n),
        Node::Matmul(n) => {
            let op = n.attr.name();
            let a = n.attr.a().expect("A bound during validation");
            let b = n.attr.b().expect("B bound during validation");
            let c = n.attr.c().expect("C bound during validation");

            let a_ssa = emit_inbound_permute(out, "permute_A", op, "_perm", a);
            let b_ssa = emit_inbound_permute(out, "permute_B", op, "_perm", b);
            let result = result_ssa(c);
            out.push_str(&format!(
                "{INDENT}{result} = torch.aten.matmul {a_ssa}, {b_ssa} : {aty}, {bty} -> {cty}\n",
                aty = logical_type(a),
                bty = logical_type(b),
                cty = logical_type(c),
            ));
            emit_outbound_permute(out, "permute_C", op, c);
        }
    }
}

fn emit_conv_prologue(
    out: &mut String,
    op: &str,
    groups: i64,
    stride: &[i64],
    padding: &[i64],
    dilation: &[i64],
) {
    out.push_str(&format!("{INDENT}%bias_{op} = torch.constant.none\n"));
    out.push_str(&format!(
        "{INDENT}%transposed_{op} = torch.constant.bool false\n"
    ));
    emit_int_list(out, "output_padding", op, &[]);
    out.push_str(&format!(
        "{INDENT}%groups_{op} = torch.constant.int {groups}\n"
    ));
    emit_int_list(out, "stride", op, stride);
    emit_int_list(out, "padding", op, padding);
    emit_int_list(out, "dilation", op, dilation);
}

fn emit_pointwise(out: &mut String, n: &PointwiseNode) {
    let op = n.attr.name();
    let a = n.attr.in0().expect("IN_0 bound during validation");
    let b = n.attr.in1().expect("IN_1 bound during validation");
    let result_tensor = n.attr.out0().expect("OUT_0 bound during validation");
    let mode = n.attr.mode().expect("mode set during validation");

    let a_ssa = emit_pointwise_operand(out, op, 0, a);
    let b_ssa = emit_pointwise_operand(out, op, 1, b);

    let result = result_ssa(result_tensor);
    match mode {
        PointwiseMode::Add | PointwiseMode::Sub => {
            let aten = if mode == PointwiseMode::Add {
                "torch.aten.add.Tensor"
            } else {
                "torch.aten.sub.Tensor"
            };
            out.push_str(&format!("{INDENT}%alpha_{op} = torch.constant.int 1\n"));
            out.push_str(&format!(
                "{INDENT}{result} = {aten} {a_ssa}, {b_ssa}, %alpha_{op} : {aty}, {bty}, \
                 !torch.int -> {oty}\n",
                aty = logical_type(a),
                bty = logical_type(b),
                oty = logical_type(result_tensor),
            ));
        }
        PointwiseMode::Mul | PointwiseMode::Div => {
            let aten = if mode == PointwiseMode::Mul {
                "torch.aten.mul.Tensor"
            } else {
                "torch.aten.div.Tensor"
            };
            out.push_str(&format!(
                "{INDENT}{result} = {aten} {a_ssa}, {b_ssa} : {aty}, {bty} -> {oty}\n",
                aty = logical_type(a),
                bty = logical_type(b),
                oty = logical_type(result_tensor),
            ));
        }
    }
    emit_outbound_permute(out, "permute_OUT_0", op, result_tensor);
}

/// Pointwise operands get per-role permute names so the same tensor
/// can feed several pointwise nodes; scalar literals are materialized
/// inline instead of permuted.
fn emit_pointwise_operand(out: &mut String, op: &str, index: usize, t: &TensorRef) -> String {
    if t.is_scalar() {
        return emit_scalar_literal(out, t);
    }
    emit_inbound_permute(
        out,
        &format!("permute_IN_{index}"),
        op,
        &format!("_in{index}_{op}_perm"),
        t,
    )
}

/// Emits the integer constants and list for `<role>_<op>`. The empty
/// list collapses to a bare `ListConstruct`.
fn emit_int_list(out: &mut String, role: &str, op: &str, values: &[i64]) {
    for (i, value) in values.iter().enumerate() {
        out.push_str(&format!(
            "{INDENT}%{role}_val_{i}_{op} = torch.constant.int {value}\n"
        ));
    }
    let operands = (0..values.len())
        .map(|i| format!("%{role}_val_{i}_{op}"))
        .collect::<Vec<_>>()
        .join(", ");
    let signature = vec!["!torch.int"; values.len()].join(", ");
    out.push_str(&format!(
        "{INDENT}%{role}_{op} = torch.prim.ListConstruct {operands} : ({signature}) -> \
         !torch.list<int>\n"
    ));
}

/// Permutes an operand from its physical layout to logical order.
/// Identity permutes are emitted too: emission stays layout-oblivious
/// and byte-stable.
fn emit_inbound_permute(
    out: &mut String,
    role: &str,
    op: &str,
    ssa_suffix: &str,
    t: &TensorRef,
) -> String {
    let (dim, stride) = (t.dim(), t.stride());
    let order = stride_order(&stride, &dim);
    let perm: Vec<i64> = inverse_permutation(&order)
        .iter()
        .map(|&v| v as i64)
        .collect();
    emit_int_list(out, role, op, &perm);
    let dst = format!("%{}{}", t.name(), ssa_suffix);
    out.push_str(&format!(
        "{INDENT}{dst} = torch.aten.permute %{src}, %{role}_{op} : {src_ty}, !torch.list<int> -> \
         {dst_ty}\n",
        src = t.name(),
        src_ty = physical_type(t),
        dst_ty = logical_type(t),
    ));
    dst
}

/// Permutes a graph output back to its physical layout. Virtual
/// outputs stay logical and need no permute (their result SSA name is
/// already the tensor name).
fn emit_outbound_permute(out: &mut String, role: &str, op: &str, t: &TensorRef) {
    if t.is_virtual() {
        return;
    }
    let (dim, stride) = (t.dim(), t.stride());
    let perm: Vec<i64> = stride_order(&stride, &dim)
        .iter()
        .map(|&v| v as i64)
        .collect();
    emit_int_list(out, role, op, &perm);
    out.push_str(&format!(
        "{INDENT}%{name} = torch.aten.permute %{name}_perm, %{role}_{op} : {src_ty}, \
         !torch.list<int> -> {dst_ty}\n",
        name = t.name(),
        src_ty = logical_type(t),
        dst_ty = physical_type(t),
    ));
}

/// Materializes the `aten.empty` placeholder operand of a backward
/// convolution (logical dims of the gradient result).
fn emit_empty(out: &mut String, role: &str, slot: &str, op: &str, t: &TensorRef) -> String {
    emit_int_list(out, &format!("empty_{role}"), op, &t.dim());
    out.push_str(&format!("{INDENT}%none_{role}_{op} = torch.constant.none\n"));
    let code = t
        .data_type()
        .expect("dtype resolved during validation")
        .torch_dtype_code();
    out.push_str(&format!(
        "{INDENT}%dtype_{role}_{op} = torch.constant.int {code}\n"
    ));
    let ssa = format!("%empty_{slot}_{op}");
    out.push_str(&format!(
        "{INDENT}{ssa} = torch.aten.empty.memory_format %empty_{role}_{op}, %dtype_{role}_{op}, \
         %none_{role}_{op}, %none_{role}_{op}, %none_{role}_{op}, %none_{role}_{op} : \
         !torch.list<int>, !torch.int, !torch.none, !torch.none, !torch.none, !torch.none -> \
         {ty}\n",
        ty = logical_type(t),
    ));
    ssa
}

fn emit_output_mask(out: &mut String, op: &str, mask: [bool; 3]) {
    out.push_str(&format!("{INDENT}%true_{op} = torch.constant.bool true\n"));
    out.push_str(&format!("{INDENT}%false_{op} = torch.constant.bool false\n"));
    let operands = mask
        .iter()
        .map(|&m| {
            if m {
                format!("%true_{op}")
            } else {
                format!("%false_{op}")
            }
        })
        .collect::<Vec<_>>()
        .join(", ");
    out.push_str(&format!(
        "{INDENT}%output_mask_{op} = torch.prim.ListConstruct {operands} : (!torch.bool, \
         !torch.bool, !torch.bool) -> !torch.list<bool>\n"
    ));
}

fn emit_scalar_literal(out: &mut String, t: &TensorRef) -> String {
    let dtype = t.data_type().expect("dtype resolved during validation");
    let value = match t.scalar_value().expect("scalar carries a value") {
        ScalarValue::Float(v) => format!("{v:.6e}"),
        ScalarValue::Int(v) => format!("{v}"),
    };
    let ssa = format!("%{}", t.name());
    out.push_str(&format!(
        "{INDENT}{ssa} = torch.vtensor.literal(dense<{value}> : tensor<1x{suffix}>) : \
         !torch.vtensor<[1],{suffix}>\n",
        suffix = dtype.mlir_suffix(),
    ));
    ssa
}

/// The SSA name an op binds its result to: graph outputs get a
/// `_perm` value that the outbound permute rewrites into the tensor
/// name, virtual outputs bind the name directly.
fn result_ssa(t: &TensorRef) -> String {
    if t.is_virtual() {
        format!("%{}", t.name())
    } else {
        format!("%{}_perm", t.name())
    }
}

/// `!torch.vtensor<...>` with logical (builder-order) dimensions.
fn logical_type(t: &TensorRef) -> String {
    tensor_type("vtensor", &t.dim(), t.data_type().expect("dtype resolved"))
}

/// `!torch.vtensor<...>` with physical (stride-order) dimensions, as
/// seen by function parameters.
fn physical_type(t: &TensorRef) -> String {
    tensor_type(
        "vtensor",
        &physical_dims(t),
        t.data_type().expect("dtype resolved"),
    )
}

/// `!torch.tensor<...>` for the mutable destination parameter.
fn dest_type(t: &TensorRef) -> String {
    tensor_type(
        "tensor",
        &physical_dims(t),
        t.data_type().expect("dtype resolved"),
    )
}

fn physical_dims(t: &TensorRef) -> Vec<i64> {
    let (dim, stride) = (t.dim(), t.stride());
    let order = stride_order(&stride, &dim);
    order.iter().map(|&axis| dim[axis]).collect()
}

fn tensor_type(kind: &str, dims: &[i64], dtype: DataType) -> String {
    let dims = dims
        .iter()
        .map(|d| d.to_string())
        .collect::<Vec<_>>()
        .join(",");
    format!("!torch.{kind}<[{dims}],{}>", dtype.mlir_suffix())
}
