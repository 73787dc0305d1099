use rand::SeedableRng;
use rand::rngs::SmallRng;
use strata_harness::modules::Conv2d;
use strata_harness::*;

#[test]
fn dilated_convolution() {
    setup_test_logger();
    let mut rng = SmallRng::seed_from_u64(42);
    let conv = Conv2d::random(&mut rng, 3, 3, 3, 1).unwrap().padding(1).dilation(2);
    let net = compare(&conv, &[&[3, 224, 224]], "holeconvolution", &["data"], &["output"]).unwrap();
    let layer = &net.layers[0];
    assert_eq!(layer.layer_type(), "Convolution");
    assert_eq!(layer.blobs.len(), 2);
    assert_eq!(&**net.shapes.get("output").unwrap(), &[1, 3, 222, 222]);
}

#[test]
fn strided_grouped_convolution() {
    let mut rng = SmallRng::seed_from_u64(7);
    let conv = Conv2d::random(&mut rng, 4, 8, 3, 2).unwrap().stride(2).padding(1).without_bias();
    compare(&conv, &[&[4, 15, 15]], "grouped", &["data"], &["output"]).unwrap();
}
