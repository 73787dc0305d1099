//! Single-direction recurrent layers.
//!
//! Inputs follow the ONNX positional layout, where absent optional inputs
//! are empty names: `X, W, R, B, sequence_lens, initial_h[, initial_c, P]`.
//! W, R and B become the layer blobs, X and the initial states its bottoms.

use crate::caffe::RecurrentParameter;
use crate::internal::*;
use crate::ops::to_u32;
use crate::shape::display_shape;

pub fn register_all_ops(reg: &mut ConverterRegistry) {
    reg.register("LSTM", Lstm);
    reg.register("GRU", Gru);
}

fn positional<'n>(node: &'n pb::NodeProto, positions: &[usize]) -> impl Iterator<Item = &'n String> {
    positions.iter().filter_map(|&ix| node.input.get(ix)).filter(|s| !s.is_empty())
}

fn is_set(node: &pb::NodeProto, ix: usize) -> bool {
    node.input.get(ix).is_some_and(|s| !s.is_empty())
}

/// Outputs must be a prefix: an absent output can not be followed by a
/// present one, as the layer produces its tops positionally.
fn prefix_outputs(node: &pb::NodeProto, max: usize) -> StrataResult<TVec<String>> {
    let used = node.output.iter().rposition(|s| !s.is_empty()).map(|p| p + 1).unwrap_or(0);
    node.expect((1..=max).contains(&used), || format!("between 1 and {max} outputs"))?;
    node.expect(node.output[..used].iter().all(|s| !s.is_empty()), "outputs without gaps")?;
    Ok(node.output[..used].iter().cloned().collect())
}

fn check_common(
    ctx: &NodeContext,
    shapes: &BlobShapeTable,
    attrs: &AttributeTable,
    gates: usize,
) -> StrataResult<usize> {
    let node = ctx.node;
    let hidden = attrs.usize("hidden_size")?;
    if let Some(direction) = attrs.opt_string("direction")? {
        node.expect(direction == "forward", || format!("forward direction, got {direction}"))?;
    }
    node.expect(is_set(node, 0) && is_set(node, 1) && is_set(node, 2), "X, W and R inputs")?;
    node.expect(!is_set(node, 4), "no sequence_lens input")?;
    let x = shapes.get(&node.input[0])?;
    node.expect(x.len() == 3, || format!("X of rank 3, got {}", display_shape(x)))?;
    let w = shapes.get(&node.input[1])?;
    node.expect(**w == [1, gates * hidden, x[2]], || {
        format!("W of shape [1,{},{}], got {}", gates * hidden, x[2], display_shape(w))
    })?;
    let r = shapes.get(&node.input[2])?;
    node.expect(**r == [1, gates * hidden, hidden], || {
        format!("R of shape [1,{},{}], got {}", gates * hidden, hidden, display_shape(r))
    })?;
    Ok(hidden)
}

fn recurrent_shapes(
    shapes: &BlobShapeTable,
    binding: &Binding,
    param: &RecurrentParameter,
) -> StrataResult<TVec<Shape>> {
    let x = binding.input_shape(shapes, 0)?;
    let hidden = param.num_output as usize;
    let y: Shape = tvec!(x[0], x[1], hidden);
    let state: Shape = tvec!(1, x[1], hidden);
    Ok([y, state.clone(), state].into_iter().take(binding.top.len()).collect())
}

#[derive(Clone, Copy, Debug, Default)]
pub struct Lstm;

impl LayerConverter for Lstm {
    type Param = RecurrentParameter;

    fn schema(&self) -> &'static [AttrSpec] {
        const { &[
            AttrSpec::required("hidden_size", AttrType::Int),
            AttrSpec::optional("direction", AttrType::String),
        ] }
    }

    fn bind_outputs(&self, node: &pb::NodeProto) -> StrataResult<TVec<String>> {
        prefix_outputs(node, 3)
    }

    fn weight_inputs(&self, node: &pb::NodeProto) -> StrataResult<TVec<String>> {
        node.expect(!is_set(node, 7), "no peephole input")?;
        Ok(positional(node, &[1, 2, 3]).cloned().collect())
    }

    fn bind_inputs(&self, node: &pb::NodeProto) -> StrataResult<TVec<String>> {
        node.expect(is_set(node, 5) == is_set(node, 6), "both initial_h and initial_c, or neither")?;
        Ok(positional(node, &[0, 5, 6]).cloned().collect())
    }

    fn extract_params(
        &self,
        ctx: &NodeContext,
        shapes: &BlobShapeTable,
        attrs: &AttributeTable,
    ) -> StrataResult<RecurrentParameter> {
        let hidden = check_common(ctx, shapes, attrs, 4)?;
        Ok(RecurrentParameter {
            num_output: to_u32(ctx.node, "hidden_size", hidden)?,
            expose_hidden: is_set(ctx.node, 5),
            linear_before_reset: false,
        })
    }

    fn derive_shapes(
        &self,
        shapes: &BlobShapeTable,
        binding: &Binding,
        param: &RecurrentParameter,
    ) -> StrataResult<TVec<Shape>> {
        recurrent_shapes(shapes, binding, param)
    }

    fn into_layer(&self, param: RecurrentParameter) -> LayerParam {
        LayerParam::Lstm(param)
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct Gru;

impl LayerConverter for Gru {
    type Param = RecurrentParameter;

    fn schema(&self) -> &'static [AttrSpec] {
        const { &[
            AttrSpec::required("hidden_size", AttrType::Int),
            AttrSpec::required("linear_before_reset", AttrType::Int),
            AttrSpec::optional("direction", AttrType::String),
        ] }
    }

    fn bind_outputs(&self, node: &pb::NodeProto) -> StrataResult<TVec<String>> {
        prefix_outputs(node, 2)
    }

    fn weight_inputs(&self, node: &pb::NodeProto) -> StrataResult<TVec<String>> {
        Ok(positional(node, &[1, 2, 3]).cloned().collect())
    }

    fn bind_inputs(&self, node: &pb::NodeProto) -> StrataResult<TVec<String>> {
        Ok(positional(node, &[0, 5]).cloned().collect())
    }

    fn extract_params(
        &self,
        ctx: &NodeContext,
        shapes: &BlobShapeTable,
        attrs: &AttributeTable,
    ) -> StrataResult<RecurrentParameter> {
        let hidden = check_common(ctx, shapes, attrs, 3)?;
        let linear_before_reset = attrs.int("linear_before_reset")?;
        ctx.node.expect(linear_before_reset == 0 || linear_before_reset == 1, || {
            format!("linear_before_reset 0 or 1, got {linear_before_reset}")
        })?;
        Ok(RecurrentParameter {
            num_output: to_u32(ctx.node, "hidden_size", hidden)?,
            expose_hidden: is_set(ctx.node, 5),
            linear_before_reset: linear_before_reset == 1,
        })
    }

    fn derive_shapes(
        &self,
        shapes: &BlobShapeTable,
        binding: &Binding,
        param: &RecurrentParameter,
    ) -> StrataResult<TVec<Shape>> {
        recurrent_shapes(shapes, binding, param)
    }

    fn into_layer(&self, param: RecurrentParameter) -> LayerParam {
        LayerParam::Gru(param)
    }
}
