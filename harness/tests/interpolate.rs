use strata_harness::modules::{Interpolate, InterpolateMode};
use strata_harness::*;

#[test]
fn nearest_upsample() {
    setup_test_logger();
    let module = Interpolate::new([16, 24], InterpolateMode::Nearest);
    let net = compare(&module, &[&[3, 8, 12]], "nearest", &["data"], &["output"]).unwrap();
    assert_eq!(net.layers[0].layer_type(), "Interp");
}

#[test]
fn bilinear_upsample() {
    let module = Interpolate::new([14, 10], InterpolateMode::Bilinear);
    compare(&module, &[&[2, 7, 5]], "bilinear", &["data"], &["output"]).unwrap();
}
