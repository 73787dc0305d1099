use strata_harness::modules::Activation;
use strata_harness::*;

#[test]
fn relu() {
    setup_test_logger();
    let net = compare(&Activation::Relu, &[&[3, 224, 224]], "relu", &["data"], &["output"]).unwrap();
    assert_eq!(net.layers[0].layer_type(), "ReLU");
}

#[test]
fn leaky_relu() {
    compare(&Activation::LeakyRelu(0.1), &[&[8, 7, 7]], "leaky_relu", &["data"], &["output"]).unwrap();
}

#[test]
fn sigmoid_tanh_hardswish() {
    for act in [Activation::Sigmoid, Activation::Tanh, Activation::HardSwish] {
        compare(&act, &[&[4, 5, 5]], "activation", &["data"], &["output"]).unwrap();
    }
}
