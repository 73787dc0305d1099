use proptest::prelude::*;
use proptest::test_runner::TestCaseResult;
use strata_convert::internal::*;
use strata_convert::pb::tensor_proto::DataType;
use strata_convert::pb::{AttributeProto, GraphProto, NodeProto, TensorProto, ValueInfoProto};

fn setup_test_logger() {
    let _ = env_logger::Builder::from_env("STRATA_LOG").try_init();
}

fn graph(inputs: &[(&str, &[usize])], nodes: Vec<NodeProto>, outputs: &[&str]) -> GraphProto {
    GraphProto {
        name: "props".into(),
        node: nodes,
        input: inputs.iter().map(|(n, s)| ValueInfoProto::new(n, DataType::Float, s)).collect(),
        output: outputs.iter().map(|n| ValueInfoProto::new(n, DataType::Float, &[])).collect(),
        ..GraphProto::default()
    }
}

fn psroi(node_name: &str) -> NodeProto {
    NodeProto::new("PSROIMaskPooling", &["features", "rois"], &["pooled"])
        .named(node_name)
        .with_attribute(AttributeProto::float("spatial_scale", 0.0625))
        .with_attribute(AttributeProto::int("output_dim", 8))
        .with_attribute(AttributeProto::int("group_size", 7))
        .with_attribute(AttributeProto::float("roi_scale", 1.0))
        .with_attribute(AttributeProto::float("bin_scale", 1.0))
}

fn kind(err: &anyhow::Error) -> &'static str {
    err.downcast_ref::<ConvertError>().map(|e| e.kind()).unwrap_or("<untyped>")
}

#[test]
fn psroi_shape_follows_rois() {
    setup_test_logger();
    let g = graph(
        &[("features", &[1, 256, 14, 14]), ("rois", &[300, 5])],
        vec![psroi("psroi")],
        &["pooled"],
    );
    let net = strata_convert::strata().translate_graph(&g).unwrap();
    assert_eq!(&**net.shapes.get("pooled").unwrap(), &[300, 8, 7, 7]);
    let layer = net.layer("psroi").unwrap();
    assert_eq!(layer.layer_type(), "PSROIMaskPooling");
    assert_eq!(&*layer.bottom, &["features".to_string(), "rois".to_string()]);
    let LayerParam::PsroiMaskPooling(p) = &layer.param else { panic!() };
    assert_eq!((p.output_dim, p.group_size, p.spatial_scale), (8, 7, 0.0625));
}

#[test]
fn dropout_passthrough() {
    let g = graph(
        &[("x", &[4, 64, 32, 32])],
        vec![
            NodeProto::new("Dropout", &["x"], &["y", "mask"])
                .named("drop")
                .with_attribute(AttributeProto::float("ratio", 0.5)),
        ],
        &["y"],
    );
    let net = strata_convert::strata().translate_graph(&g).unwrap();
    assert_eq!(&**net.shapes.get("y").unwrap(), &[4, 64, 32, 32]);
    assert!(!net.shapes.contains("mask"));
    let layer = net.layer("drop").unwrap();
    assert_eq!(&*layer.top, &["y".to_string()]);
    assert_eq!(layer.to_proto().dropout_param.unwrap().dropout_ratio, 0.5);
}

#[test]
fn dropout_keeps_every_input() {
    let g = GraphProto {
        initializer: vec![TensorProto::from_f32("r", &[], &[0.5])],
        ..graph(
            &[("x", &[2, 16])],
            vec![
                NodeProto::new("Dropout", &["x", "r"], &["y"])
                    .named("drop")
                    .with_attribute(AttributeProto::float("ratio", 0.5)),
            ],
            &["y"],
        )
    };
    let net = strata_convert::strata().translate_graph(&g).unwrap();
    let layer = net.layer("drop").unwrap();
    assert_eq!(&*layer.bottom, &["x".to_string(), "r".to_string()]);
    assert_eq!(&**net.shapes.get("y").unwrap(), &[2, 16]);
}

#[test]
fn required_attributes_are_required() {
    let required = ["spatial_scale", "output_dim", "group_size", "roi_scale", "bin_scale"];
    for name in required {
        let mut node = psroi("psroi");
        node.attribute.retain(|a| a.name != name);
        let g = graph(&[("features", &[1, 16, 8, 8]), ("rois", &[4, 5])], vec![node], &["pooled"]);
        let err = strata_convert::strata().translate_graph(&g).unwrap_err();
        assert_eq!(kind(&err), "MissingAttribute", "omitting {name}");

        let mut node = psroi("psroi");
        for attr in node.attribute.iter_mut().filter(|a| a.name == name) {
            *attr = AttributeProto::string(name, "7");
        }
        let g = graph(&[("features", &[1, 16, 8, 8]), ("rois", &[4, 5])], vec![node], &["pooled"]);
        let err = strata_convert::strata().translate_graph(&g).unwrap_err();
        assert_eq!(kind(&err), "AttributeTypeMismatch", "mistyping {name}");
    }
}

#[test]
fn int_for_float_is_a_mismatch() {
    let node = NodeProto::new("Dropout", &["x"], &["y"]).with_attribute(AttributeProto::int("ratio", 0));
    let g = graph(&[("x", &[1, 2])], vec![node], &["y"]);
    let err = strata_convert::strata().translate_graph(&g).unwrap_err();
    assert_eq!(kind(&err), "AttributeTypeMismatch");
}

#[test]
fn unsupported_operator_aborts() {
    let g = graph(
        &[("x", &[1, 3, 8, 8])],
        vec![
            NodeProto::new("Relu", &["x"], &["a"]),
            NodeProto::new("Frobnicate", &["a"], &["b"]).named("frob"),
            NodeProto::new("Sigmoid", &["b"], &["c"]),
        ],
        &["c"],
    );
    let result = strata_convert::strata().translate_graph(&g);
    let err = result.unwrap_err();
    match err.downcast_ref::<ConvertError>() {
        Some(ConvertError::UnsupportedOperator { node, op_type }) => {
            assert_eq!(node, "frob");
            assert_eq!(op_type, "Frobnicate");
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn weights_become_blobs() {
    let w: Vec<f32> = (0..16 * 3 * 3 * 3).map(|i| i as f32 * 0.01).collect();
    let mut g = graph(
        &[("x", &[1, 3, 16, 16])],
        vec![
            NodeProto::new("Conv", &["x", "w", "b"], &["y"])
                .with_attribute(AttributeProto::ints("kernel_shape", &[3, 3]))
                .with_attribute(AttributeProto::ints("strides", &[1, 1]))
                .with_attribute(AttributeProto::ints("pads", &[2, 2, 2, 2]))
                .with_attribute(AttributeProto::ints("dilations", &[2, 2]))
                .with_attribute(AttributeProto::int("group", 1)),
        ],
        &["y"],
    );
    g.initializer.push(TensorProto::from_f32("w", &[16, 3, 3, 3], &w));
    g.initializer.push(TensorProto::from_f32("b", &[16], &[0.5; 16]));
    let net = strata_convert::strata().translate_graph(&g).unwrap();
    assert_eq!(&**net.shapes.get("y").unwrap(), &[1, 16, 16, 16]);
    let layer = &net.layers[0];
    assert_eq!(&*layer.bottom, &["x".to_string()]);
    assert_eq!(layer.blobs.len(), 2);
    assert_eq!(layer.blobs[0].shape.as_ref().unwrap().dim, vec![16, 3, 3, 3]);
    let proto = layer.to_proto();
    let conv = proto.convolution_param.unwrap();
    assert_eq!((conv.num_output, conv.dilation.as_slice(), conv.bias_term), (16, &[2u32, 2][..], true));
}

fn translate_err(e: anyhow::Error) -> TestCaseError {
    TestCaseError::fail(format!("{e:?}"))
}

fn unary_chain(shape: Vec<usize>, ops: Vec<&'static str>) -> TestCaseResult {
    let mut nodes = vec![];
    let mut prev = "x".to_string();
    for (ix, op) in ops.iter().enumerate() {
        let out = format!("t{ix}");
        let mut node = NodeProto::new(*op, &[&prev], &[&out]);
        match *op {
            "LeakyRelu" => node = node.with_attribute(AttributeProto::float("alpha", 0.1)),
            "Dropout" => node = node.with_attribute(AttributeProto::float("ratio", 0.3)),
            "Softmax" => node = node.with_attribute(AttributeProto::int("axis", -1)),
            _ => (),
        }
        nodes.push(node);
        prev = out;
    }
    let g = graph(&[("x", &shape[..])], nodes, &[&prev]);
    let net = strata_convert::strata().translate_graph(&g).map_err(translate_err)?;
    // each layer adds exactly its one output
    prop_assert_eq!(net.shapes.len(), ops.len() + 1);
    for (name, s) in net.shapes.iter() {
        prop_assert_eq!(&**s, &*shape, "{}", name);
    }
    Ok(())
}

fn shape_and_perm() -> BoxedStrategy<(Vec<usize>, Vec<i64>)> {
    (1usize..5)
        .prop_flat_map(|rank| {
            (
                proptest::collection::vec(1usize..6, rank),
                Just((0..rank as i64).collect::<Vec<_>>()).prop_shuffle(),
            )
        })
        .boxed()
}

proptest! {
    #[test]
    fn passthrough_layers_keep_shapes(
        shape in proptest::collection::vec(1usize..6, 1..5),
        ops in proptest::collection::vec(
            prop_oneof![
                Just("Relu"), Just("LeakyRelu"), Just("Sigmoid"), Just("Tanh"),
                Just("HardSwish"), Just("Dropout"), Just("Softmax"),
            ],
            1..6,
        ),
    ) {
        unary_chain(shape, ops)?
    }

    #[test]
    fn transpose_permutes((shape, perm) in shape_and_perm()) {
        let node = NodeProto::new("Transpose", &["x"], &["y"])
            .with_attribute(AttributeProto::ints("perm", &perm));
        let g = graph(&[("x", &shape[..])], vec![node], &["y"]);
        let net = strata_convert::strata().translate_graph(&g).map_err(translate_err)?;
        let y = net.shapes.get("y").map_err(translate_err)?;
        for (ix, &p) in perm.iter().enumerate() {
            prop_assert_eq!(y[ix], shape[p as usize]);
        }
    }

    #[test]
    fn flatten_keeps_volume(shape in proptest::collection::vec(1usize..6, 1..5), axis in 0usize..5) {
        let axis = axis.min(shape.len());
        let node = NodeProto::new("Flatten", &["x"], &["y"])
            .with_attribute(AttributeProto::int("axis", axis as i64));
        let g = graph(&[("x", &shape[..])], vec![node], &["y"]);
        let net = strata_convert::strata().translate_graph(&g).map_err(translate_err)?;
        let y = net.shapes.get("y").map_err(translate_err)?;
        prop_assert_eq!(y.len(), 2);
        prop_assert_eq!(y[0] * y[1], shape.iter().product::<usize>());
        prop_assert_eq!(y[0], shape[..axis].iter().product::<usize>());
    }
}
