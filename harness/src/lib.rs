//! Equivalence checks: a reference module is run directly and through
//! export, translation and the reference executor, and both results must
//! agree within tolerance.

#[macro_use]
extern crate derive_new;
#[macro_use]
extern crate log;

pub mod modules;
pub mod runtime;

use anyhow::Context;
use ndarray::{ArrayD, Dimension, IxDyn};
use rand::SeedableRng;
use rand::rngs::SmallRng;
use rand_distr::{Distribution, StandardNormal};
use strata_export::prelude::*;

pub use modules::Module;

pub use ndarray;

pub fn setup_test_logger() {
    let _ = env_logger::Builder::from_env("STRATA_LOG").is_test(true).try_init();
}

/// Compares two arrays, allowing for rounding errors.
pub fn close_enough(found: &ArrayD<f32>, expected: &ArrayD<f32>) -> StrataResult<()> {
    anyhow::ensure!(
        found.shape() == expected.shape(),
        "Shape mismatch {:?} != {:?}",
        found.shape(),
        expected.shape()
    );
    let atol = 5e-4;
    let rtol = 1e-4;
    for ((ix, &a), &b) in found.indexed_iter().zip(expected.iter()) {
        if !((a.is_nan() && b.is_nan()) || (a - b).abs() <= atol + rtol * b.abs()) {
            anyhow::bail!("Mismatch at {:?}: {} != {}", ix.slice(), a, b)
        }
    }
    Ok(())
}

/// Deterministic standard normal input.
pub fn random_input(shape: &[usize], seed: u64) -> ArrayD<f32> {
    let mut rng = SmallRng::seed_from_u64(seed);
    ArrayD::from_shape_simple_fn(IxDyn(shape), || StandardNormal.sample(&mut rng))
}

/// Exports `module` with all patches, translates it, runs the network on
/// random input and checks it against the module forward pass. Input shapes
/// are given without the batch axis.
pub fn compare(
    module: &dyn Module,
    input_shapes: &[&[usize]],
    name: &str,
    input_names: &[&str],
    output_names: &[&str],
) -> StrataResult<Network> {
    anyhow::ensure!(input_shapes.len() == input_names.len(), "{}: one name per input", name);
    let shapes: Vec<Vec<usize>> =
        input_shapes.iter().map(|s| std::iter::once(1).chain(s.iter().copied()).collect()).collect();
    let inputs: Vec<ArrayD<f32>> =
        shapes.iter().enumerate().map(|(ix, s)| random_input(s, ix as u64)).collect();

    let mut ctx = ExportContext::native();
    let declared: Vec<(&str, &[usize])> =
        input_names.iter().copied().zip(shapes.iter().map(|s| s.as_slice())).collect();
    let exported = export(&mut ctx, &PatchSet::default(), module, &declared, output_names)
        .with_context(|| format!("Exporting {name}"))?;
    for (subsystem, capability) in &exported.capabilities {
        trace!("{name}: {subsystem} {capability:?}");
    }
    let network = strata_export::strata_convert::strata()
        .translate(&exported.model)
        .with_context(|| format!("Translating {name}"))?;
    debug!("{name}: {} layers", network.layers.len());

    let expected = module.forward(&inputs)?;
    let fed: Vec<(&str, ArrayD<f32>)> = input_names.iter().copied().zip(inputs).collect();
    let mut found = runtime::run(&network, fed).with_context(|| format!("Running {name}"))?;
    anyhow::ensure!(
        expected.len() == output_names.len(),
        "{}: module produced {} outputs for {} names",
        name,
        expected.len(),
        output_names.len()
    );
    for (output, expected) in output_names.iter().zip(&expected) {
        let Some(found) = found.remove(*output) else {
            anyhow::bail!("{}: network did not compute {}", name, output)
        };
        close_enough(&found, expected).with_context(|| format!("{name}: comparing {output}"))?;
    }
    Ok(network)
}
