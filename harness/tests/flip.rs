use strata_harness::modules::Flip;
use strata_harness::*;

#[test]
fn flip() {
    setup_test_logger();
    let net = compare(&Flip::new(vec![2, 3]), &[&[3, 5, 6]], "flip", &["data"], &["output"]).unwrap();
    assert_eq!(net.layers[0].layer_type(), "Reverse");
}
