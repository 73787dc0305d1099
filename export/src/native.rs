//! The exporter as the framework ships it.
//!
//! Common operators lower to plain ONNX nodes. The subsystems the patch layer
//! replaces either refuse to export or produce nodes the translator has no
//! rule for: dynamic `Shape`/`Gather` size queries, `Resize` with runtime
//! scales, `InstanceNormalization` based group normalization and gate
//! reordering `Slice`s in front of recurrent layers.

use crate::errors::ExportError;
use crate::internal::*;
use crate::symbolic::{Symbolic, SymbolicTable};
use crate::trace::Tracer;

/// Native implementation of a subsystem, `None` for the symbolic registry,
/// which is not a strategy slot.
pub fn lowering(subsystem: Subsystem) -> Option<Arc<dyn Lowering>> {
    Some(match subsystem {
        Subsystem::SizeAccessor => Symbolic::arc("size", size),
        Subsystem::Flip => Symbolic::arc("flip", unexportable),
        Subsystem::LstmCell => Symbolic::arc("lstm_cell", unexportable),
        Subsystem::Lstm => Symbolic::arc("lstm", lstm),
        Subsystem::Gru => Symbolic::arc("gru", gru),
        Subsystem::Interpolate => Symbolic::arc("interpolate", interpolate),
        Subsystem::GroupNorm => Symbolic::arc("group_norm", group_norm),
        Subsystem::DeformConv => Symbolic::arc("deform_conv2d", unexportable),
        Subsystem::SymbolicRegistry => return None,
    })
}

/// The registry holding the shipped opset 9 table.
pub fn symbolic_registry() -> SymbolicRegistry {
    let mut registry = SymbolicRegistry::default();
    registry.set_table(9, Some(Arc::new(opset9())));
    registry
}

pub fn opset9() -> SymbolicTable {
    SymbolicTable::new(9)
        .with_fn("relu", relu)
        .with_fn("leaky_relu", leaky_relu)
        .with_fn("sigmoid", sigmoid)
        .with_fn("tanh", tanh)
        .with_fn("permute", permute)
        .with_fn("conv2d", conv2d)
        .with_fn("max_pool2d", max_pool2d)
        .with_fn("avg_pool2d", avg_pool2d)
        .with_fn("global_max_pool2d", global_max_pool2d)
        .with_fn("global_avg_pool2d", global_avg_pool2d)
        .with_fn("batch_norm", batch_norm)
        .with_fn("add", add)
        .with_fn("mul", mul)
        .with_fn("cat", cat)
        .with_fn("flatten", flatten)
        .with_fn("linear", linear)
        .with_fn("softmax", softmax)
        .with_fn("reshape", reshape)
        .with_fn("view", reshape)
        .with_fn("dropout", dropout)
}

fn unexportable(_: &mut Tracer, call: &Call) -> StrataResult<TVec<Traced>> {
    Err(ExportError::failed(&call.op, "operator is not exportable to ONNX").into())
}

/// `[p0, p1]` as begin and end pads.
pub(crate) fn pads(padding: &[i64]) -> Vec<i64> {
    padding.iter().chain(padding).copied().collect()
}

pub(crate) fn kernel_of(call: &Call) -> StrataResult<Vec<i64>> {
    let Some(w) = call.weights.first() else { bail!("{} call has no weights", call.op) };
    ensure!(w.dims.len() == 4, "{} weights are not 4D: {:?}", call.op, w.dims);
    Ok(w.dims[2..].to_vec())
}

fn size(t: &mut Tracer, call: &Call) -> StrataResult<TVec<Traced>> {
    let x = call.input_at(0)?;
    let dim = call.get_int("dim")?;
    let shape = t.graph.emit("Shape", &[x], vec![], &[tvec!(x.rank())]);
    let index = t.graph.constant_i64("index", &[dim]);
    Ok(t.graph.emit("Gather", &[&shape[0], &index], vec![AttributeProto::int("axis", 0)], &[tvec!()]))
}

fn reorder_gates(t: &mut Tracer, call: &Call, weights: &[Traced]) -> TVec<Traced> {
    weights
        .iter()
        .map(|w| {
            let mut out = t.graph.emit(
                "Slice",
                &[w],
                vec![AttributeProto::ints("axes", &[1])],
                &[w.shape.clone()],
            );
            trace!("{}: reordering gates of {}", call.op, w.name);
            out.remove(0)
        })
        .collect()
}

fn recurrent(t: &mut Tracer, call: &Call, op_type: &str) -> StrataResult<TVec<Traced>> {
    let x = call.input_at(0)?;
    let weights = t.weights(call)?;
    let reordered = reorder_gates(t, call, &weights);
    let mut inputs: Vec<&Traced> = vec![x];
    inputs.extend(reordered.iter());
    let hidden = call.attributes(&["hidden_size"])?;
    t.emit(call, op_type, &inputs, hidden)
}

fn lstm(t: &mut Tracer, call: &Call) -> StrataResult<TVec<Traced>> {
    recurrent(t, call, "LSTM")
}

fn gru(t: &mut Tracer, call: &Call) -> StrataResult<TVec<Traced>> {
    recurrent(t, call, "GRU")
}

fn interpolate(t: &mut Tracer, call: &Call) -> StrataResult<TVec<Traced>> {
    let x = call.input_at(0)?;
    let size = call.get_ints("size")?;
    ensure!(x.rank() == 4 && size.len() == 2, "interpolate expects NCHW input and a 2D size");
    let mut scales = vec![1.0f32, 1.0];
    scales.extend(size.iter().zip(&x.shape[2..]).map(|(&s, &d)| s as f32 / d as f32));
    let scales = t.graph.initializer("scales", TensorProto::from_f32("scales", &[4], &scales))?;
    let mode = call.attributes(&["mode"])?;
    t.emit(call, "Resize", &[x, &scales], mode)
}

fn group_norm(t: &mut Tracer, call: &Call) -> StrataResult<TVec<Traced>> {
    let x = call.input_at(0)?;
    let groups = call.get_int("num_groups")?;
    let eps = call.get_float("eps")?;
    let output = call.output_shape(0)?.clone();
    let Ok(g) = usize::try_from(groups) else { bail!("group_norm: negative num_groups {groups}") };
    ensure!(x.rank() >= 2, "group_norm expects a channel axis, got {:?}", x.shape);
    let (n, channels) = (x.shape[0], x.shape[1]);
    ensure!(
        g > 0 && n > 0 && channels % g == 0,
        "group_norm: {} channels of batch {} can not be split in {} groups",
        channels,
        n,
        g
    );
    let grouped: Shape = tvec!(n, g, x.shape.iter().product::<usize>() / n / g);
    let target = t.graph.constant_i64("shape", &[n as i64, groups, -1]);
    let reshaped = t.graph.emit("Reshape", &[x, &target], vec![], &[grouped.clone()]);
    let ones = TensorProto::from_f32("ones", &[g], &vec![1.0; g]);
    let zeros = TensorProto::from_f32("zeros", &[g], &vec![0.0; g]);
    let ones = t.graph.initializer("ones", ones)?;
    let zeros = t.graph.initializer("zeros", zeros)?;
    let normed = t.graph.emit(
        "InstanceNormalization",
        &[&reshaped[0], &ones, &zeros],
        vec![AttributeProto::float("epsilon", eps)],
        &[grouped],
    );
    let back: Vec<i64> = x.shape.iter().map(|&d| d as i64).collect();
    let back = t.graph.constant_i64("shape", &back);
    let mut y = t.graph.emit("Reshape", &[&normed[0], &back], vec![], &[output.clone()]);
    let weights = t.weights(call)?;
    if let [scale, bias] = &weights[..] {
        y = t.graph.emit("Mul", &[&y[0], scale], vec![], &[output.clone()]);
        y = t.graph.emit("Add", &[&y[0], bias], vec![], &[output]);
    }
    Ok(y)
}

fn relu(t: &mut Tracer, call: &Call) -> StrataResult<TVec<Traced>> {
    t.unary(call, "Relu", vec![])
}

fn leaky_relu(t: &mut Tracer, call: &Call) -> StrataResult<TVec<Traced>> {
    let alpha = call.get_float("negative_slope")?;
    t.unary(call, "LeakyRelu", vec![AttributeProto::float("alpha", alpha)])
}

fn sigmoid(t: &mut Tracer, call: &Call) -> StrataResult<TVec<Traced>> {
    t.unary(call, "Sigmoid", vec![])
}

fn tanh(t: &mut Tracer, call: &Call) -> StrataResult<TVec<Traced>> {
    t.unary(call, "Tanh", vec![])
}

fn permute(t: &mut Tracer, call: &Call) -> StrataResult<TVec<Traced>> {
    let perm = call.get_ints("dims")?;
    t.unary(call, "Transpose", vec![AttributeProto::ints("perm", perm)])
}

pub(crate) fn conv_attributes(call: &Call) -> StrataResult<Vec<AttributeProto>> {
    Ok(vec![
        AttributeProto::ints("kernel_shape", &kernel_of(call)?),
        AttributeProto::ints("strides", call.get_ints("stride")?),
        AttributeProto::ints("pads", &pads(call.get_ints("padding")?)),
        AttributeProto::ints("dilations", call.get_ints("dilation")?),
        AttributeProto::int("group", call.get_int("groups")?),
    ])
}

fn conv2d(t: &mut Tracer, call: &Call) -> StrataResult<TVec<Traced>> {
    let attributes = conv_attributes(call)?;
    let x = call.input_at(0)?;
    let weights = t.weights(call)?;
    let mut inputs = vec![x];
    inputs.extend(weights.iter());
    t.emit(call, "Conv", &inputs, attributes)
}

fn pool(t: &mut Tracer, call: &Call, op_type: &str) -> StrataResult<TVec<Traced>> {
    let kernel = call.get_ints("kernel_size")?;
    let strides = if call.has("stride") { call.get_ints("stride")? } else { kernel };
    let mut attributes = vec![
        AttributeProto::ints("kernel_shape", kernel),
        AttributeProto::ints("strides", strides),
        AttributeProto::ints("pads", &pads(call.get_ints("padding")?)),
    ];
    if call.has("ceil_mode") {
        attributes.push(AttributeProto::int("ceil_mode", call.get_int("ceil_mode")?));
    }
    t.unary(call, op_type, attributes)
}

fn max_pool2d(t: &mut Tracer, call: &Call) -> StrataResult<TVec<Traced>> {
    pool(t, call, "MaxPool")
}

fn avg_pool2d(t: &mut Tracer, call: &Call) -> StrataResult<TVec<Traced>> {
    pool(t, call, "AveragePool")
}

fn global_max_pool2d(t: &mut Tracer, call: &Call) -> StrataResult<TVec<Traced>> {
    t.unary(call, "GlobalMaxPool", vec![])
}

fn global_avg_pool2d(t: &mut Tracer, call: &Call) -> StrataResult<TVec<Traced>> {
    t.unary(call, "GlobalAveragePool", vec![])
}

fn batch_norm(t: &mut Tracer, call: &Call) -> StrataResult<TVec<Traced>> {
    let eps = call.get_float("eps")?;
    let x = call.input_at(0)?;
    let weights = t.weights(call)?;
    ensure!(weights.len() == 4, "batch_norm expects scale, bias, mean and var");
    let mut inputs = vec![x];
    inputs.extend(weights.iter());
    t.emit(call, "BatchNormalization", &inputs, vec![AttributeProto::float("epsilon", eps)])
}

fn binary(t: &mut Tracer, call: &Call, op_type: &str) -> StrataResult<TVec<Traced>> {
    let inputs = [call.input_at(0)?, call.input_at(1)?];
    t.emit(call, op_type, &inputs, vec![])
}

fn add(t: &mut Tracer, call: &Call) -> StrataResult<TVec<Traced>> {
    binary(t, call, "Add")
}

fn mul(t: &mut Tracer, call: &Call) -> StrataResult<TVec<Traced>> {
    binary(t, call, "Mul")
}

fn cat(t: &mut Tracer, call: &Call) -> StrataResult<TVec<Traced>> {
    let axis = call.get_int("dim")?;
    let inputs: Vec<&Traced> = call.inputs.iter().collect();
    t.emit(call, "Concat", &inputs, vec![AttributeProto::int("axis", axis)])
}

fn flatten(t: &mut Tracer, call: &Call) -> StrataResult<TVec<Traced>> {
    let axis = call.get_int("start_dim")?;
    t.unary(call, "Flatten", vec![AttributeProto::int("axis", axis)])
}

fn linear(t: &mut Tracer, call: &Call) -> StrataResult<TVec<Traced>> {
    let x = call.input_at(0)?;
    let weights = t.weights(call)?;
    let mut inputs = vec![x];
    inputs.extend(weights.iter());
    let attributes = vec![
        AttributeProto::float("alpha", 1.0),
        AttributeProto::float("beta", 1.0),
        AttributeProto::int("transB", 1),
    ];
    t.emit(call, "Gemm", &inputs, attributes)
}

fn softmax(t: &mut Tracer, call: &Call) -> StrataResult<TVec<Traced>> {
    let axis = call.get_int("dim")?;
    t.unary(call, "Softmax", vec![AttributeProto::int("axis", axis)])
}

fn reshape(t: &mut Tracer, call: &Call) -> StrataResult<TVec<Traced>> {
    let inputs = [call.input_at(0)?, call.input_at(1)?];
    t.emit(call, "Reshape", &inputs, vec![])
}

/// Evaluation mode dropout is the identity and leaves no node.
fn dropout(_: &mut Tracer, call: &Call) -> StrataResult<TVec<Traced>> {
    Ok(tvec!(call.input_at(0)?.clone()))
}

