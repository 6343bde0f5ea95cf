//! Golden tests for the torch-dialect emitter. The expected lines pin
//! the emission grammar byte for byte: the assembly doubles as the
//! compilation cache key, so any drift here invalidates caches in the
//! field.

use weft::{
    ConvDGradAttr, ConvFPropAttr, ConvWGradAttr, DataType, Error, Graph, PointwiseAttr,
    PointwiseMode, TensorAttr,
};

fn nhwc_stride(n: i64, c: i64, h: i64, w: i64) -> Vec<i64> {
    let _ = n;
    vec![c * h * w, 1, c * w, c]
}

#[test]
fn conv_fprop_nchw() {
    let mut graph = Graph::new();
    graph
        .set_name("fprop_asm_nchw")
        .set_io_data_type(DataType::Float)
        .set_compute_data_type(DataType::Float);

    let x = graph.tensor(
        TensorAttr::new()
            .set_name("x")
            .set_dim([2, 8, 8, 8])
            .set_stride([512, 64, 8, 1]),
    );
    let w = graph.tensor(
        TensorAttr::new()
            .set_name("w")
            .set_dim([4, 8, 1, 1])
            .set_stride([8, 1, 1, 1]),
    );
    let y = graph.conv_fprop(
        &x,
        &w,
        ConvFPropAttr::new()
            .set_stride([1, 1])
            .set_padding([0, 0])
            .set_dilation([1, 1])
            .set_name("conv_fprop"),
    );
    y.set_name("y").set_output(true);

    graph.validate().unwrap();
    let asm = graph.emit_asm().unwrap();

    assert!(asm.starts_with("module @module {\n"));
    assert!(asm.contains(
        "  func.func @main(%y_: !torch.tensor<[2,4,8,8],f32>, \
         %w: !torch.vtensor<[4,8,1,1],f32>, %x: !torch.vtensor<[2,8,8,8],f32>) \
         attributes {torch.assume_strict_symbolic_shapes} {\n"
    ));
    assert!(asm.contains("    %bias_conv_fprop = torch.constant.none\n"));
    assert!(asm.contains("    %transposed_conv_fprop = torch.constant.bool false\n"));
    assert!(asm.contains(
        "    %output_padding_conv_fprop = torch.prim.ListConstruct  : () -> !torch.list<int>\n"
    ));
    assert!(asm.contains("    %groups_conv_fprop = torch.constant.int 1\n"));
    assert!(asm.contains("    %stride_val_0_conv_fprop = torch.constant.int 1\n"));
    assert!(asm.contains(
        "    %stride_conv_fprop = torch.prim.ListConstruct %stride_val_0_conv_fprop, \
         %stride_val_1_conv_fprop : (!torch.int, !torch.int) -> !torch.list<int>\n"
    ));
    assert!(asm.contains(
        "    %x_perm = torch.aten.permute %x, %permute_X_conv_fprop : \
         !torch.vtensor<[2,8,8,8],f32>, !torch.list<int> -> !torch.vtensor<[2,8,8,8],f32>\n"
    ));
    assert!(asm.contains(
        "    %y_perm = torch.aten.convolution %x_perm, %w_perm, %bias_conv_fprop, \
         %stride_conv_fprop, %padding_conv_fprop, %dilation_conv_fprop, %transposed_conv_fprop, \
         %output_padding_conv_fprop, %groups_conv_fprop : !torch.vtensor<[2,8,8,8],f32>, \
         !torch.vtensor<[4,8,1,1],f32>, !torch.none, !torch.list<int>, !torch.list<int>, \
         !torch.list<int>, !torch.bool, !torch.list<int>, !torch.int -> \
         !torch.vtensor<[2,4,8,8],f32>\n"
    ));
    assert!(asm.contains(
        "    %y = torch.aten.permute %y_perm, %permute_Y_conv_fprop : \
         !torch.vtensor<[2,4,8,8],f32>, !torch.list<int> -> !torch.vtensor<[2,4,8,8],f32>\n"
    ));
    assert!(asm.contains(
        "    torch.overwrite.tensor.contents %y overwrites %y_ : !torch.vtensor<[2,4,8,8],f32>, \
         !torch.tensor<[2,4,8,8],f32>\n"
    ));
    assert!(asm.ends_with("    return\n  }\n}\n"));
}

#[test]
fn conv_dgrad_dy_nhwc_w_kcrs_grouped() {
    let (n, c, h, w, k, fc) = (16i64, 128, 64, 32, 256, 16);
    let mut graph = Graph::new();
    graph
        .set_name("conv_dgrad_asm_emitter_dy_nhwc_w_kcrs_grouped")
        .set_io_data_type(DataType::Float)
        .set_compute_data_type(DataType::Float);

    let dy = graph.tensor(
        TensorAttr::new()
            .set_name("arg0_dy")
            .set_dim([n, k, h, w])
            .set_stride(nhwc_stride(n, k, h, w)),
    );
    let wt = graph.tensor(
        TensorAttr::new()
            .set_name("arg1_w")
            .set_dim([k, fc, 1, 1])
            .set_stride([fc, 1, 1, 1]),
    );
    let dx = graph.conv_dgrad(
        &dy,
        &wt,
        ConvDGradAttr::new()
            .set_padding([0, 0])
            .set_stride([1, 1])
            .set_dilation([1, 1])
            .set_name("conv_dgrad"),
    );
    dx.set_name("result")
        .set_output(true)
        .set_dim([n, c, h, w])
        .set_stride(nhwc_stride(n, c, h, w));

    graph.validate().unwrap();
    let asm = graph.emit_asm().unwrap();

    assert!(asm.contains(
        "  func.func @main(%result_: !torch.tensor<[16,64,32,128],f32>, \
         %arg0_dy: !torch.vtensor<[16,64,32,256],f32>, \
         %arg1_w: !torch.vtensor<[256,16,1,1],f32>) \
         attributes {torch.assume_strict_symbolic_shapes} {\n"
    ));
    assert!(asm.contains("    %groups_conv_dgrad = torch.constant.int 8\n"));
    // DY comes in NHWC: permute [0, 3, 1, 2] restores logical order.
    assert!(asm.contains("    %permute_DY_val_1_conv_dgrad = torch.constant.int 3\n"));
    assert!(asm.contains(
        "    %arg0_dy_perm = torch.aten.permute %arg0_dy, %permute_DY_conv_dgrad : \
         !torch.vtensor<[16,64,32,256],f32>, !torch.list<int> -> \
         !torch.vtensor<[16,256,64,32],f32>\n"
    ));
    // W is already contiguous: identity permute.
    assert!(asm.contains(
        "    %arg1_w_perm = torch.aten.permute %arg1_w, %permute_W_conv_dgrad : \
         !torch.vtensor<[256,16,1,1],f32>, !torch.list<int> -> \
         !torch.vtensor<[256,16,1,1],f32>\n"
    ));
    assert!(asm.contains("    %empty_DX_val_0_conv_dgrad = torch.constant.int 16\n"));
    assert!(asm.contains("    %empty_DX_val_1_conv_dgrad = torch.constant.int 128\n"));
    assert!(asm.contains("    %dtype_DX_conv_dgrad = torch.constant.int 6\n"));
    assert!(asm.contains(
        "    %empty_x_conv_dgrad = torch.aten.empty.memory_format %empty_DX_conv_dgrad, \
         %dtype_DX_conv_dgrad, %none_DX_conv_dgrad, %none_DX_conv_dgrad, %none_DX_conv_dgrad, \
         %none_DX_conv_dgrad : !torch.list<int>, !torch.int, !torch.none, !torch.none, \
         !torch.none, !torch.none -> !torch.vtensor<[16,128,64,32],f32>\n"
    ));
    assert!(asm.contains(
        "    %output_mask_conv_dgrad = torch.prim.ListConstruct %true_conv_dgrad, \
         %false_conv_dgrad, %false_conv_dgrad : (!torch.bool, !torch.bool, !torch.bool) -> \
         !torch.list<bool>\n"
    ));
    assert!(asm.contains(
        "    %result_perm, %grad_weight_conv_dgrad, %grad_bias_conv_dgrad = \
         torch.aten.convolution_backward %arg0_dy_perm, %empty_x_conv_dgrad, %arg1_w_perm, \
         %bias_conv_dgrad, %stride_conv_dgrad, %padding_conv_dgrad, %dilation_conv_dgrad, \
         %transposed_conv_dgrad, %output_padding_conv_dgrad, %groups_conv_dgrad, \
         %output_mask_conv_dgrad : !torch.vtensor<[16,256,64,32],f32>, \
         !torch.vtensor<[16,128,64,32],f32>, !torch.vtensor<[256,16,1,1],f32>, !torch.none, \
         !torch.list<int>, !torch.list<int>, !torch.list<int>, !torch.bool, !torch.list<int>, \
         !torch.int, !torch.list<bool> -> !torch.vtensor<[16,128,64,32],f32>, !torch.none, \
         !torch.none\n"
    ));
    assert!(asm.contains(
        "    %result = torch.aten.permute %result_perm, %permute_DX_conv_dgrad : \
         !torch.vtensor<[16,128,64,32],f32>, !torch.list<int> -> \
         !torch.vtensor<[16,64,32,128],f32>\n"
    ));
    assert!(asm.contains(
        "    torch.overwrite.tensor.contents %result overwrites %result_ : \
         !torch.vtensor<[16,64,32,128],f32>, !torch.tensor<[16,64,32,128],f32>\n"
    ));
}

#[test]
fn conv_wgrad_dy_nhwc_x_nhwc_grouped() {
    let (n, c, h, w, k, fc) = (16i64, 128, 64, 32, 256, 16);
    let mut graph = Graph::new();
    graph
        .set_name("conv_wgrad_asm_emitter_dy_nhwc_x_nhwc_grouped")
        .set_io_data_type(DataType::Float)
        .set_compute_data_type(DataType::Float);

    let dy = graph.tensor(
        TensorAttr::new()
            .set_name("arg0_dy")
            .set_dim([n, k, h, w])
            .set_stride(nhwc_stride(n, k, h, w)),
    );
    let x = graph.tensor(
        TensorAttr::new()
            .set_name("arg1_x")
            .set_dim([n, c, h, w])
            .set_stride(nhwc_stride(n, c, h, w)),
    );
    let dw = graph.conv_wgrad(
        &dy,
        &x,
        ConvWGradAttr::new()
            .set_padding([0, 0])
            .set_stride([1, 1])
            .set_dilation([1, 1])
            .set_name("conv_wgrad"),
    );
    // KRSC filter gradient layout.
    dw.set_name("result")
        .set_output(true)
        .set_dim([k, fc, 1, 1])
        .set_stride([fc, 1, fc, fc]);

    graph.validate().unwrap();
    let asm = graph.emit_asm().unwrap();

    assert!(asm.contains(
        "  func.func @main(%result_: !torch.tensor<[256,1,1,16],f32>, \
         %arg0_dy: !torch.vtensor<[16,64,32,256],f32>, \
         %arg1_x: !torch.vtensor<[16,64,32,128],f32>) \
         attributes {torch.assume_strict_symbolic_shapes} {\n"
    ));
    assert!(asm.contains("    %groups_conv_wgrad = torch.constant.int 8\n"));
    assert!(asm.contains(
        "    %arg1_x_perm = torch.aten.permute %arg1_x, %permute_X_conv_wgrad : \
         !torch.vtensor<[16,64,32,128],f32>, !torch.list<int> -> \
         !torch.vtensor<[16,128,64,32],f32>\n"
    ));
    assert!(asm.contains("    %empty_DW_val_0_conv_wgrad = torch.constant.int 256\n"));
    assert!(asm.contains(
        "    %output_mask_conv_wgrad = torch.prim.ListConstruct %false_conv_wgrad, \
         %true_conv_wgrad, %false_conv_wgrad : (!torch.bool, !torch.bool, !torch.bool) -> \
         !torch.list<bool>\n"
    ));
    assert!(asm.contains(
        "    %grad_input_conv_wgrad, %result_perm, %grad_bias_conv_wgrad = \
         torch.aten.convolution_backward %arg0_dy_perm, %arg1_x_perm, %empty_w_conv_wgrad, \
         %bias_conv_wgrad, %stride_conv_wgrad, %padding_conv_wgrad, %dilation_conv_wgrad, \
         %transposed_conv_wgrad, %output_padding_conv_wgrad, %groups_conv_wgrad, \
         %output_mask_conv_wgrad : !torch.vtensor<[16,256,64,32],f32>, \
         !torch.vtensor<[16,128,64,32],f32>, !torch.vtensor<[256,16,1,1],f32>, !torch.none, \
         !torch.list<int>, !torch.list<int>, !torch.list<int>, !torch.bool, !torch.list<int>, \
         !torch.int, !torch.list<bool> -> !torch.none, !torch.vtensor<[256,16,1,1],f32>, \
         !torch.none\n"
    ));
    assert!(asm.contains(
        "    %result = torch.aten.permute %result_perm, %permute_DW_conv_wgrad : \
         !torch.vtensor<[256,16,1,1],f32>, !torch.list<int> -> \
         !torch.vtensor<[256,1,1,16],f32>\n"
    ));
}

#[test]
fn pointwise_add_with_transposed_operand() {
    let (n, c) = (128i64, 256);
    let mut graph = Graph::new();
    graph
        .set_name("pointwise_asm_emitter_add_transposed")
        .set_io_data_type(DataType::Float)
        .set_compute_data_type(DataType::Float);

    let a = graph.tensor(
        TensorAttr::new()
            .set_name("arg0_input")
            .set_dim([n, c])
            .set_stride([c, 1]),
    );
    let b = graph.tensor(
        TensorAttr::new()
            .set_name("arg1_add_transposed")
            .set_dim([n, c])
            .set_stride([1, n]),
    );
    let out = graph.pointwise(
        &a,
        &b,
        PointwiseAttr::new()
            .set_mode(PointwiseMode::Add)
            .set_name("pointwise_add_transposed"),
    );
    out.set_name("result").set_output(true);

    graph.validate().unwrap();
    let asm = graph.emit_asm().unwrap();

    assert!(asm.contains(
        "  func.func @main(%result_: !torch.tensor<[128,256],f32>, \
         %arg0_input: !torch.vtensor<[128,256],f32>, \
         %arg1_add_transposed: !torch.vtensor<[256,128],f32>) \
         attributes {torch.assume_strict_symbolic_shapes} {\n"
    ));
    // The transposed operand needs a [1, 0] permute.
    assert!(asm.contains(
        "    %permute_IN_1_val_0_pointwise_add_transposed = torch.constant.int 1\n"
    ));
    assert!(asm.contains(
        "    %permute_IN_1_val_1_pointwise_add_transposed = torch.constant.int 0\n"
    ));
    assert!(asm.contains(
        "    %arg1_add_transposed_in1_pointwise_add_transposed_perm = torch.aten.permute \
         %arg1_add_transposed, %permute_IN_1_pointwise_add_transposed : \
         !torch.vtensor<[256,128],f32>, !torch.list<int> -> !torch.vtensor<[128,256],f32>\n"
    ));
    assert!(asm.contains(
        "    %alpha_pointwise_add_transposed = torch.constant.int 1\n"
    ));
    assert!(asm.contains(
        "    %result_perm = torch.aten.add.Tensor \
         %arg0_input_in0_pointwise_add_transposed_perm, \
         %arg1_add_transposed_in1_pointwise_add_transposed_perm, \
         %alpha_pointwise_add_transposed : !torch.vtensor<[128,256],f32>, \
         !torch.vtensor<[128,256],f32>, !torch.int -> !torch.vtensor<[128,256],f32>\n"
    ));
}

#[test]
fn pointwise_mul_broadcast_1d() {
    let mut graph = Graph::new();
    graph
        .set_name("pointwise_asm_emitter_mul")
        .set_io_data_type(DataType::Float)
        .set_compute_data_type(DataType::Float);

    let a = graph.tensor(
        TensorAttr::new()
            .set_name("arg0_input")
            .set_dim([2, 3, 4, 4])
            .set_stride([48, 16, 4, 1]),
    );
    let b = graph.tensor(
        TensorAttr::new()
            .set_name("arg1_mul")
            .set_dim([4])
            .set_stride([1]),
    );
    let out = graph.pointwise(
        &a,
        &b,
        PointwiseAttr::new()
            .set_mode(PointwiseMode::Mul)
            .set_name("pointwise_mul"),
    );
    out.set_name("result").set_output(true);

    graph.validate().unwrap();
    let asm = graph.emit_asm().unwrap();

    assert!(asm.contains(
        "    %permute_IN_1_pointwise_mul = torch.prim.ListConstruct \
         %permute_IN_1_val_0_pointwise_mul : (!torch.int) -> !torch.list<int>\n"
    ));
    // No alpha on mul.
    assert!(!asm.contains("%alpha_pointwise_mul"));
    assert!(asm.contains(
        "    %result_perm = torch.aten.mul.Tensor %arg0_input_in0_pointwise_mul_perm, \
         %arg1_mul_in1_pointwise_mul_perm : !torch.vtensor<[2,3,4,4],f32>, \
         !torch.vtensor<[4],f32> -> !torch.vtensor<[2,3,4,4],f32>\n"
    ));
}

#[test]
fn pointwise_div_channel_vector() {
    let mut graph = Graph::new();
    graph
        .set_name("pointwise_asm_emitter_div")
        .set_io_data_type(DataType::Float)
        .set_compute_data_type(DataType::Float);

    let a = graph.tensor(
        TensorAttr::new()
            .set_name("arg0_input")
            .set_dim([2, 3, 8, 8])
            .set_stride([192, 64, 8, 1]),
    );
    let b = graph.tensor(
        TensorAttr::new()
            .set_name("arg1_div")
            .set_dim([1, 3, 1, 1])
            .set_stride([3, 1, 1, 1]),
    );
    let out = graph.pointwise(
        &a,
        &b,
        PointwiseAttr::new()
            .set_mode(PointwiseMode::Div)
            .set_name("pointwise_div"),
    );
    out.set_name("result").set_output(true);

    graph.validate().unwrap();
    let asm = graph.emit_asm().unwrap();

    assert!(asm.contains(
        "    %result_perm = torch.aten.div.Tensor %arg0_input_in0_pointwise_div_perm, \
         %arg1_div_in1_pointwise_div_perm : !torch.vtensor<[2,3,8,8],f32>, \
         !torch.vtensor<[1,3,1,1],f32> -> !torch.vtensor<[2,3,8,8],f32>\n"
    ));
}

fn build_reference_graph() -> Graph {
    let mut graph = Graph::new();
    graph
        .set_name("determinism_probe")
        .set_io_data_type(DataType::Half)
        .set_compute_data_type(DataType::Float);
    let x = graph.tensor(
        TensorAttr::new()
            .set_name("image")
            .set_dim([4, 16, 8, 8])
            .set_stride([1024, 1, 128, 16]),
    );
    let w = graph.tensor(
        TensorAttr::new()
            .set_name("filter")
            .set_dim([32, 16, 1, 1])
            .set_stride([16, 1, 1, 1]),
    );
    let y = graph.conv_fprop(
        &x,
        &w,
        ConvFPropAttr::new()
            .set_stride([1, 1])
            .set_padding([0, 0])
            .set_dilation([1, 1])
            .set_name("conv"),
    );
    y.set_name("result").set_output(true);
    graph
}

#[test]
fn emission_is_deterministic() {
    let mut first = build_reference_graph();
    let mut second = build_reference_graph();
    first.validate().unwrap();
    second.validate().unwrap();
    let asm_a = first.emit_asm().unwrap();
    let asm_b = second.emit_asm().unwrap();
    assert_eq!(asm_a, asm_b);
    // And re-emission of the same graph is stable too.
    assert_eq!(asm_a, first.emit_asm().unwrap());
}

#[test]
fn emit_requires_validation() {
    let graph = build_reference_graph();
    assert!(matches!(graph.emit_asm(), Err(Error::NotValidated(_))));
}
