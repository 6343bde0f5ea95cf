//! Validation and property-inference behavior.

use weft::{
    Backend, ConvDGradAttr, ConvFPropAttr, ConvWGradAttr, DataType, Error, Graph, Handle,
    MatmulAttr, PointwiseAttr, PointwiseMode, TensorAttr, VariantPack,
};

fn simple_fprop_graph(name: &str) -> Graph {
    let mut graph = Graph::new();
    graph
        .set_name(name)
        .set_io_data_type(DataType::Float)
        .set_compute_data_type(DataType::Float);
    let x = graph.tensor(
        TensorAttr::new()
            .set_name("x")
            .set_dim([2, 8, 6, 6])
            .set_stride([288, 36, 6, 1]),
    );
    let w = graph.tensor(
        TensorAttr::new()
            .set_name("w")
            .set_dim([4, 8, 3, 3])
            .set_stride([72, 9, 3, 1]),
    );
    let y = graph.conv_fprop(
        &x,
        &w,
        ConvFPropAttr::new()
            .set_stride([1, 1])
            .set_padding([1, 1])
            .set_dilation([1, 1]),
    );
    y.set_name("y").set_output(true);
    graph
}

#[test]
fn graph_without_a_name_is_rejected() {
    let mut graph = Graph::new();
    graph.set_io_data_type(DataType::Float);
    assert!(matches!(
        graph.validate(),
        Err(Error::AttributeNotSet(_))
    ));
}

#[test]
fn duplicate_tensor_names_are_rejected() {
    let mut graph = simple_fprop_graph("dup_names");
    let dup = graph.tensor(
        TensorAttr::new()
            .set_name("x")
            .set_dim([4])
            .set_stride([1]),
    );
    let _ = dup;
    let err = graph.validate().unwrap_err();
    assert!(matches!(err, Error::InvalidAttribute(_)));
    assert!(err.to_string().contains("'x'"));
}

#[test]
fn fprop_output_shape_is_inferred() {
    let mut graph = simple_fprop_graph("fprop_inference");
    graph.validate().unwrap();
    // The output tensor was promoted and its shape inferred:
    // (6 + 2*1 - 3) / 1 + 1 = 6 per spatial axis.
    let asm = graph.emit_asm().unwrap();
    assert!(asm.contains("%y_: !torch.tensor<[2,4,6,6],f32>"));
}

#[test]
fn fprop_strided_output_shape_is_inferred() {
    let mut graph = Graph::new();
    graph
        .set_name("fprop_strided_inference")
        .set_io_data_type(DataType::Float)
        .set_compute_data_type(DataType::Float);
    let x = graph.tensor(
        TensorAttr::new()
            .set_name("x")
            .set_dim([1, 4, 9, 9])
            .set_stride([324, 81, 9, 1]),
    );
    let w = graph.tensor(
        TensorAttr::new()
            .set_name("w")
            .set_dim([8, 4, 3, 3])
            .set_stride([36, 9, 3, 1]),
    );
    let y = graph.conv_fprop(
        &x,
        &w,
        ConvFPropAttr::new()
            .set_stride([2, 2])
            .set_padding([0, 0])
            .set_dilation([2, 2]),
    );
    y.set_name("y").set_output(true);
    graph.validate().unwrap();
    // (9 - 2*(3-1) - 1) / 2 + 1 = 3.
    assert_eq!(y.dim(), vec![1, 8, 3, 3]);
    assert_eq!(y.stride(), vec![72, 9, 3, 1]);
}

#[test]
fn dgrad_input_shape_is_inferred() {
    let mut graph = Graph::new();
    graph
        .set_name("dgrad_inference")
        .set_io_data_type(DataType::Float)
        .set_compute_data_type(DataType::Float);
    let dy = graph.tensor(
        TensorAttr::new()
            .set_name("dy")
            .set_dim([2, 8, 4, 4])
            .set_stride([128, 16, 4, 1]),
    );
    let w = graph.tensor(
        TensorAttr::new()
            .set_name("w")
            .set_dim([8, 4, 3, 3])
            .set_stride([36, 9, 3, 1]),
    );
    let dx = graph.conv_dgrad(
        &dy,
        &w,
        ConvDGradAttr::new()
            .set_stride([2, 2])
            .set_padding([1, 1])
            .set_dilation([1, 1]),
    );
    dx.set_name("dx").set_output(true);
    graph.validate().unwrap();
    // (4 - 1)*2 - 2*1 + (3 - 1) + 1 = 7.
    assert_eq!(dx.dim(), vec![2, 4, 7, 7]);
}

#[test]
fn wgrad_filter_shape_is_inferred() {
    let mut graph = Graph::new();
    graph
        .set_name("wgrad_inference")
        .set_io_data_type(DataType::Float)
        .set_compute_data_type(DataType::Float);
    let dy = graph.tensor(
        TensorAttr::new()
            .set_name("dy")
            .set_dim([2, 8, 6, 6])
            .set_stride([288, 36, 6, 1]),
    );
    let x = graph.tensor(
        TensorAttr::new()
            .set_name("x")
            .set_dim([2, 4, 6, 6])
            .set_stride([144, 36, 6, 1]),
    );
    let dw = graph.conv_wgrad(
        &dy,
        &x,
        ConvWGradAttr::new()
            .set_stride([1, 1])
            .set_padding([1, 1])
            .set_dilation([1, 1]),
    );
    dw.set_name("dw").set_output(true);
    graph.validate().unwrap();
    // (6 + 2 - 1 - 5) / 1 + 1 = 3 per spatial axis; groups default 1.
    assert_eq!(dw.dim(), vec![8, 4, 3, 3]);
}

#[test]
fn conv_rank_mismatch_is_rejected() {
    let mut graph = Graph::new();
    graph
        .set_name("rank_mismatch")
        .set_io_data_type(DataType::Float);
    let x = graph.tensor(
        TensorAttr::new()
            .set_name("x")
            .set_dim([2, 8, 6, 6])
            .set_stride([288, 36, 6, 1]),
    );
    let w = graph.tensor(
        TensorAttr::new()
            .set_name("w")
            .set_dim([4, 8, 3, 3])
            .set_stride([72, 9, 3, 1]),
    );
    // 3 spatial dims against rank-4 operands.
    let y = graph.conv_fprop(
        &x,
        &w,
        ConvFPropAttr::new()
            .set_stride([1, 1, 1])
            .set_padding([0, 0, 0])
            .set_dilation([1, 1, 1]),
    );
    y.set_name("y").set_output(true);
    assert!(matches!(
        graph.validate(),
        Err(Error::InvalidAttribute(_))
    ));
}

#[test]
fn fractional_group_count_is_rejected() {
    let mut graph = Graph::new();
    graph
        .set_name("bad_groups")
        .set_io_data_type(DataType::Float);
    let x = graph.tensor(
        TensorAttr::new()
            .set_name("x")
            .set_dim([2, 10, 6, 6])
            .set_stride([360, 36, 6, 1]),
    );
    // 10 input channels over 4 filter channels is not integral.
    let w = graph.tensor(
        TensorAttr::new()
            .set_name("w")
            .set_dim([4, 4, 1, 1])
            .set_stride([4, 1, 1, 1]),
    );
    let y = graph.conv_fprop(
        &x,
        &w,
        ConvFPropAttr::new()
            .set_stride([1, 1])
            .set_padding([0, 0])
            .set_dilation([1, 1]),
    );
    y.set_name("y").set_output(true);
    let err = graph.validate().unwrap_err();
    assert!(err.to_string().contains("group"));
}

#[test]
fn pointwise_without_mode_is_rejected() {
    let mut graph = Graph::new();
    graph
        .set_name("no_mode")
        .set_io_data_type(DataType::Float);
    let a = graph.tensor(
        TensorAttr::new()
            .set_name("a")
            .set_dim([4])
            .set_stride([1]),
    );
    let b = graph.tensor(
        TensorAttr::new()
            .set_name("b")
            .set_dim([4])
            .set_stride([1]),
    );
    let out = graph.pointwise(&a, &b, PointwiseAttr::new());
    out.set_output(true);
    assert!(matches!(
        graph.validate(),
        Err(Error::AttributeNotSet(_))
    ));
}

#[test]
fn pointwise_incompatible_broadcast_is_rejected() {
    let mut graph = Graph::new();
    graph
        .set_name("bad_broadcast")
        .set_io_data_type(DataType::Float);
    let a = graph.tensor(
        TensorAttr::new()
            .set_name("a")
            .set_dim([2, 4])
            .set_stride([4, 1]),
    );
    let b = graph.tensor(
        TensorAttr::new()
            .set_name("b")
            .set_dim([3])
            .set_stride([1]),
    );
    let out = graph.pointwise(
        &a,
        &b,
        PointwiseAttr::new().set_mode(PointwiseMode::Add),
    );
    out.set_output(true);
    assert!(matches!(
        graph.validate(),
        Err(Error::InvalidAttribute(_))
    ));
}

#[test]
fn matmul_shape_is_inferred() {
    let mut graph = Graph::new();
    graph
        .set_name("matmul_inference")
        .set_io_data_type(DataType::Float)
        .set_compute_data_type(DataType::Float);
    let a = graph.tensor(
        TensorAttr::new()
            .set_name("a")
            .set_dim([3, 2, 5])
            .set_stride([10, 5, 1]),
    );
    let b = graph.tensor(
        TensorAttr::new()
            .set_name("b")
            .set_dim([3, 5, 4])
            .set_stride([20, 4, 1]),
    );
    let c = graph.matmul(&a, &b, MatmulAttr::new());
    c.set_name("c").set_output(true);
    graph.validate().unwrap();
    assert_eq!(c.dim(), vec![3, 2, 4]);
}

#[test]
fn matmul_contraction_mismatch_is_rejected() {
    let mut graph = Graph::new();
    graph
        .set_name("matmul_mismatch")
        .set_io_data_type(DataType::Float);
    let a = graph.tensor(
        TensorAttr::new()
            .set_name("a")
            .set_dim([2, 5])
            .set_stride([5, 1]),
    );
    let b = graph.tensor(
        TensorAttr::new()
            .set_name("b")
            .set_dim([4, 3])
            .set_stride([3, 1]),
    );
    let c = graph.matmul(&a, &b, MatmulAttr::new());
    c.set_output(true);
    assert!(matches!(
        graph.validate(),
        Err(Error::InvalidAttribute(_))
    ));
}

#[test]
fn compile_requires_validation() {
    let handle = Handle::create(Backend::Cpu).unwrap();
    let mut graph = simple_fprop_graph("not_validated_compile");
    assert!(matches!(
        graph.compile(&handle, false),
        Err(Error::NotValidated(_))
    ));
}

#[test]
fn execute_requires_compilation() {
    let handle = Handle::create(Backend::Cpu).unwrap();
    let mut graph = simple_fprop_graph("not_compiled_execute");
    graph.validate().unwrap();
    let variant_pack = VariantPack::new();
    assert!(matches!(
        graph.execute(&handle, &variant_pack),
        Err(Error::NotValidated(_))
    ));
}

#[test]
fn intermediate_tensors_inherit_the_intermediate_type() {
    let mut graph = Graph::new();
    graph
        .set_name("intermediate_types")
        .set_io_data_type(DataType::Half)
        .set_compute_data_type(DataType::Float)
        .set_intermediate_data_type(DataType::Float);
    let x = graph.tensor(
        TensorAttr::new()
            .set_name("x")
            .set_dim([1, 4, 4, 4])
            .set_stride([64, 16, 4, 1]),
    );
    let w = graph.tensor(
        TensorAttr::new()
            .set_name("w")
            .set_dim([4, 4, 1, 1])
            .set_stride([4, 1, 1, 1]),
    );
    let y = graph.conv_fprop(
        &x,
        &w,
        ConvFPropAttr::new()
            .set_stride([1, 1])
            .set_padding([0, 0])
            .set_dilation([1, 1]),
    );
    let bias = graph.tensor(
        TensorAttr::new()
            .set_name("bias")
            .set_dim([1, 4, 1, 1])
            .set_stride([4, 1, 1, 1]),
    );
    let out = graph.pointwise(
        &y,
        &bias,
        PointwiseAttr::new().set_mode(PointwiseMode::Add),
    );
    out.set_name("out").set_output(true);
    graph.validate().unwrap();
    // The conv response stays virtual and picks up the intermediate
    // type; graph I/O picks up the IO type.
    assert_eq!(y.data_type(), Some(DataType::Float));
    assert!(y.is_virtual());
    assert_eq!(x.data_type(), Some(DataType::Half));
    assert_eq!(out.data_type(), Some(DataType::Half));
}
