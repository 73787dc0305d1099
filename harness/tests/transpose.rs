use strata_harness::modules::Transpose;
use strata_harness::*;

#[test]
fn transpose() {
    setup_test_logger();
    let module = Transpose::new(vec![0, 2, 3, 1]);
    let net = compare(&module, &[&[3, 16, 8]], "transpose", &["data"], &["output"]).unwrap();
    assert_eq!(net.layers[0].layer_type(), "Permute");
    assert_eq!(&**net.shapes.get("output").unwrap(), &[1, 16, 8, 3]);
}
