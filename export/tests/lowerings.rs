use strata_export::prelude::*;
use strata_export::strata_convert::pb::TensorProto;

fn setup_test_logger() {
    let _ = env_logger::Builder::from_env("STRATA_LOG").is_test(true).try_init();
}

fn zeros(name: &str, shape: &[usize]) -> TensorProto {
    TensorProto::from_f32(name, shape, &vec![0.0; shape.iter().product()])
}

fn translate(exported: &Exported) -> StrataResult<Network> {
    strata_export::strata_convert::strata().translate(&exported.model)
}

fn only_layer<'n>(network: &'n Network, layer_type: &str) -> &'n LayerDescriptor {
    let found: Vec<_> = network.layers.iter().filter(|l| l.layer_type() == layer_type).collect();
    assert_eq!(found.len(), 1, "expected one {layer_type} layer in {:?}", network.layers);
    found[0]
}

fn shape<'n>(network: &'n Network, blob: &str) -> &'n [usize] {
    network.shapes.get(blob).unwrap()
}

fn is_export_failure(err: &anyhow::Error) -> bool {
    matches!(err.downcast_ref::<ExportError>(), Some(ExportError::ExportFailed { .. }))
}

/// One step of an LSTM on `[batch, input]`, with explicit states.
struct Cell {
    hidden: usize,
    input: usize,
}

impl Exportable for Cell {
    fn trace(&self, t: &mut Tracer, inputs: &[Traced]) -> StrataResult<TVec<Traced>> {
        let (gates, hidden) = (4 * self.hidden, self.hidden);
        t.op(Call::op("lstm_cell")
            .input(&inputs[0])
            .input(&inputs[1])
            .input(&inputs[2])
            .int("hidden_size", hidden as i64)
            .weight(zeros("W", &[1, gates, self.input]))
            .weight(zeros("R", &[1, gates, hidden]))
            .weight(zeros("B", &[1, 2 * gates])))
    }
}

#[test]
fn lstm_cell_becomes_an_lstm_layer() {
    setup_test_logger();
    let mut ctx = ExportContext::native();
    let cell = Cell { hidden: 16, input: 8 };
    let declared: &[(&str, &[usize])] = &[("x", &[2, 8]), ("h0", &[2, 16]), ("c0", &[2, 16])];
    let exported = export(&mut ctx, &PatchSet::default(), &cell, declared, &["h1", "c1"]).unwrap();
    let graph = exported.model.graph.as_ref().unwrap();
    let lstm = graph.node.iter().find(|n| n.op_type == "LSTM").unwrap();
    assert_eq!(lstm.input.len(), 7);
    assert!(lstm.input[4].is_empty());

    let network = translate(&exported).unwrap();
    let layer = only_layer(&network, "LSTM");
    assert_eq!(layer.bottom.len(), 3);
    assert_eq!(layer.top.len(), 3);
    assert_eq!(layer.blobs.len(), 3);
    assert_eq!(shape(&network, &layer.bottom[0]), &[1, 2, 8]);
    assert_eq!(shape(&network, &layer.top[1]), &[1, 2, 16]);
    assert_eq!(shape(&network, &layer.top[2]), &[1, 2, 16]);
    let LayerParam::Lstm(param) = &layer.param else { panic!("{:?}", layer.param) };
    assert_eq!(param.num_output, 16);
    assert!(param.expose_hidden);
    assert_eq!(shape(&network, "h1"), &[2, 16]);
    assert_eq!(shape(&network, "c1"), &[2, 16]);
}

#[test]
fn lstm_cell_without_patch_fails() {
    let mut ctx = ExportContext::native();
    let cell = Cell { hidden: 4, input: 3 };
    let declared: &[(&str, &[usize])] = &[("x", &[1, 3]), ("h0", &[1, 4]), ("c0", &[1, 4])];
    let err = export(&mut ctx, &PatchSet::none(), &cell, declared, &["h1", "c1"]).unwrap_err();
    assert!(is_export_failure(&err));
}

/// A whole-sequence recurrent layer, `op` being `lstm` or `gru`.
struct Recurrent {
    op: &'static str,
    gates: usize,
    hidden: usize,
}

impl Exportable for Recurrent {
    fn trace(&self, t: &mut Tracer, inputs: &[Traced]) -> StrataResult<TVec<Traced>> {
        let x = &inputs[0];
        let (seq, batch, input) = (x.shape[0], x.shape[1], x.shape[2]);
        let rows = self.gates * self.hidden;
        let state = Shape::from_slice(&[1, batch, self.hidden]);
        let mut call = Call::op(self.op)
            .input(x)
            .int("hidden_size", self.hidden as i64)
            .weight(zeros("W", &[1, rows, input]))
            .weight(zeros("R", &[1, rows, self.hidden]))
            .weight(zeros("B", &[1, 2 * rows]))
            .output(Shape::from_slice(&[seq, batch, self.hidden]))
            .output(state.clone());
        for initial in &inputs[1..] {
            call = call.input(initial);
        }
        if self.op == "lstm" {
            call = call.output(state);
        }
        t.op(call)
    }
}

#[test]
fn patched_lstm_over_a_sequence() {
    setup_test_logger();
    let mut ctx = ExportContext::native();
    let module = Recurrent { op: "lstm", gates: 4, hidden: 16 };
    let exported =
        export(&mut ctx, &PatchSet::default(), &module, &[("x", &[5, 2, 8])], &["y", "y_h", "y_c"])
            .unwrap();
    let network = translate(&exported).unwrap();
    assert_eq!(network.layers.len(), 1);
    let layer = only_layer(&network, "LSTM");
    assert_eq!(&*layer.bottom, &["x".to_string()]);
    assert_eq!(&*layer.top, &["y".to_string(), "y_h".to_string(), "y_c".to_string()]);
    assert_eq!(layer.blobs.len(), 3);
    assert_eq!(shape(&network, "y"), &[5, 2, 16]);
    assert_eq!(shape(&network, "y_c"), &[1, 2, 16]);
    let LayerParam::Lstm(param) = &layer.param else { panic!("{:?}", layer.param) };
    assert!(!param.expose_hidden);
}

#[test]
fn patched_gru_resets_after_the_linear_transform() {
    setup_test_logger();
    let mut ctx = ExportContext::native();
    let module = Recurrent { op: "gru", gates: 3, hidden: 16 };
    let declared: &[(&str, &[usize])] = &[("x", &[5, 2, 8]), ("h0", &[1, 2, 16])];
    let exported = export(&mut ctx, &PatchSet::default(), &module, declared, &["y", "y_h"]).unwrap();
    let network = translate(&exported).unwrap();
    let layer = only_layer(&network, "GRU");
    assert_eq!(&*layer.bottom, &["x".to_string(), "h0".to_string()]);
    assert_eq!(&*layer.top, &["y".to_string(), "y_h".to_string()]);
    assert_eq!(shape(&network, "y"), &[5, 2, 16]);
    assert_eq!(shape(&network, "y_h"), &[1, 2, 16]);
    let LayerParam::Gru(param) = &layer.param else { panic!("{:?}", layer.param) };
    assert!(param.linear_before_reset);
    assert!(param.expose_hidden);
}

#[test]
fn native_gru_is_not_translatable() {
    let mut ctx = ExportContext::native();
    let module = Recurrent { op: "gru", gates: 3, hidden: 4 };
    let exported = export(&mut ctx, &PatchSet::none(), &module, &[("x", &[3, 1, 2])], &["y", "y_h"]).unwrap();
    let err = translate(&exported).unwrap_err();
    assert!(err.downcast_ref::<ConvertError>().is_some());
}

struct Deform;

impl Exportable for Deform {
    fn trace(&self, t: &mut Tracer, inputs: &[Traced]) -> StrataResult<TVec<Traced>> {
        t.op(Call::op("deform_conv2d")
            .input(&inputs[0])
            .input(&inputs[1])
            .ints("stride", &[1, 1])
            .ints("padding", &[1, 1])
            .ints("dilation", &[1, 1])
            .int("groups", 1)
            .int("deformable_groups", 2)
            .weight(zeros("W", &[6, 4, 3, 3]))
            .output(Shape::from_slice(&[1, 6, 10, 10])))
    }
}

#[test]
fn deform_conv_keeps_offsets_as_bottom() {
    setup_test_logger();
    let declared: &[(&str, &[usize])] = &[("x", &[1, 4, 10, 10]), ("offset", &[1, 36, 10, 10])];
    let mut ctx = ExportContext::native();
    let err = export(&mut ctx, &PatchSet::default(), &Deform, declared, &["y"]).unwrap_err();
    assert!(is_export_failure(&err));

    ctx.load_extension("deform_conv").unwrap();
    let exported = export(&mut ctx, &PatchSet::default(), &Deform, declared, &["y"]).unwrap();
    let graph = exported.model.graph.as_ref().unwrap();
    assert_eq!(graph.node[0].input[2], "W");
    let network = translate(&exported).unwrap();
    let layer = only_layer(&network, "DeformableConvolution");
    assert_eq!(&*layer.bottom, &["x".to_string(), "offset".to_string()]);
    assert_eq!(layer.blobs.len(), 1);
    let LayerParam::DeformableConvolution(conv, deform) = &layer.param else { panic!("{:?}", layer.param) };
    assert_eq!(conv.num_output, 6);
    assert_eq!(deform.deformable_group, 2);
    assert_eq!(shape(&network, "y"), &[1, 6, 10, 10]);
}

struct MaskPooling;

impl Exportable for MaskPooling {
    fn trace(&self, t: &mut Tracer, inputs: &[Traced]) -> StrataResult<TVec<Traced>> {
        let rois = &inputs[1];
        t.op(Call::op("psroi_mask_pooling")
            .input(&inputs[0])
            .input(rois)
            .float("spatial_scale", 0.0625)
            .int("output_dim", 8)
            .int("group_size", 7)
            .float("roi_scale", 1.2)
            .float("bin_scale", 1.0)
            .output(Shape::from_slice(&[rois.shape[0], 8, 7, 7])))
    }
}

#[test]
fn psroi_mask_pooling_needs_the_patched_registry() {
    setup_test_logger();
    let declared: &[(&str, &[usize])] = &[("features", &[1, 392, 14, 14]), ("rois", &[300, 5])];
    let mut ctx = ExportContext::native();
    let err = export(&mut ctx, &PatchSet::none(), &MaskPooling, declared, &["pooled"]).unwrap_err();
    assert!(is_export_failure(&err));

    let exported = export(&mut ctx, &PatchSet::default(), &MaskPooling, declared, &["pooled"]).unwrap();
    let network = translate(&exported).unwrap();
    let layer = only_layer(&network, "PSROIMaskPooling");
    assert_eq!(&*layer.bottom, &["features".to_string(), "rois".to_string()]);
    let LayerParam::PsroiMaskPooling(param) = &layer.param else { panic!("{:?}", layer.param) };
    assert_eq!((param.output_dim, param.group_size), (8, 7));
    assert_eq!(param.roi_scale, 1.2);
    assert_eq!(shape(&network, "pooled"), &[300, 8, 7, 7]);
}

struct HardSwish;

impl Exportable for HardSwish {
    fn trace(&self, t: &mut Tracer, inputs: &[Traced]) -> StrataResult<TVec<Traced>> {
        let x = &inputs[0];
        t.op(Call::op("hardswish").input(x).output(x.shape.clone()))
    }
}

#[test]
fn hardswish_translates() {
    let mut ctx = ExportContext::native();
    assert!(export(&mut ctx, &PatchSet::none(), &HardSwish, &[("x", &[1, 3, 4, 4])], &["y"]).is_err());
    let exported = export(&mut ctx, &PatchSet::default(), &HardSwish, &[("x", &[1, 3, 4, 4])], &["y"]).unwrap();
    let network = translate(&exported).unwrap();
    let layer = only_layer(&network, "HSwish");
    assert_eq!(&*layer.bottom, &["x".to_string()]);
    assert_eq!(shape(&network, "y"), &[1, 3, 4, 4]);
}

struct Grouped(i64);

impl Exportable for Grouped {
    fn trace(&self, t: &mut Tracer, inputs: &[Traced]) -> StrataResult<TVec<Traced>> {
        let x = &inputs[0];
        t.op(Call::op("group_norm").input(x).int("num_groups", self.0).float("eps", 1e-5).output(x.shape.clone()))
    }
}

#[test]
fn native_group_norm_refuses_bad_group_counts() {
    for groups in [0, -2, 3] {
        let mut ctx = ExportContext::native();
        let result = export(&mut ctx, &PatchSet::none(), &Grouped(groups), &[("x", &[1, 4, 3, 3])], &["y"]);
        assert!(result.is_err(), "{groups} groups accepted");
    }
    let mut ctx = ExportContext::native();
    let result = export(&mut ctx, &PatchSet::none(), &Grouped(2), &[("x", &[0, 4, 3, 3])], &["y"]);
    assert!(result.is_err());
    assert!(export(&mut ctx, &PatchSet::none(), &Grouped(2), &[("x", &[1, 4, 3, 3])], &["y"]).is_ok());
}
