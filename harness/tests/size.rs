use strata_export::prelude::*;
use strata_harness::modules::{Activation, FlattenBySize, Sequential};
use strata_harness::*;

fn module() -> Sequential {
    Sequential::default().push(Activation::Relu).push(FlattenBySize)
}

#[test]
fn patched_size_is_static() {
    setup_test_logger();
    let net = compare(&module(), &[&[3, 4, 4]], "size", &["data"], &["output"]).unwrap();
    assert_eq!(net.layers.iter().map(|l| l.layer_type()).collect::<Vec<_>>(), ["ReLU", "Reshape"]);
    assert_eq!(&**net.shapes.get("output").unwrap(), &[1, 48]);
}

#[test]
fn unpatched_size_is_not_translatable() {
    let mut ctx = ExportContext::native();
    let patches = PatchSet::only(&[Subsystem::SymbolicRegistry]);
    let exported =
        export(&mut ctx, &patches, &module(), &[("data", &[1, 3, 4, 4])], &["output"]).unwrap();
    assert!(exported.model.graph.as_ref().unwrap().node.iter().any(|n| n.op_type == "Shape"));
    let err = strata_export::strata_convert::strata().translate(&exported.model).unwrap_err();
    match err.downcast_ref::<ConvertError>() {
        Some(ConvertError::UnsupportedOperator { op_type, .. }) => assert_eq!(op_type, "Shape"),
        other => panic!("unexpected {other:?}"),
    }
}
