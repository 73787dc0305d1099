use crate::caffe::{BlobShape, ConcatParameter, FlattenParameter, PermuteParameter, ReshapeParameter, ReverseParameter};
use crate::internal::*;
use crate::ops::{passthrough, resolve_axis, to_u32};
use crate::shape::display_shape;

use itertools::Itertools;

pub fn register_all_ops(reg: &mut ConverterRegistry) {
    reg.register("Transpose", Transpose);
    reg.register("Concat", Concat);
    reg.register("Flatten", Flatten);
    reg.register("Reshape", Reshape);
    reg.register("Unsqueeze", Unsqueeze);
    reg.register("Squeeze", Squeeze);
    reg.register("Flip", Flip);
}

#[derive(Clone, Copy, Debug, Default)]
pub struct Transpose;

impl LayerConverter for Transpose {
    type Param = PermuteParameter;

    fn schema(&self) -> &'static [AttrSpec] {
        const { &[AttrSpec::required("perm", AttrType::Ints)] }
    }

    fn extract_params(
        &self,
        ctx: &NodeContext,
        shapes: &BlobShapeTable,
        attrs: &AttributeTable,
    ) -> StrataResult<PermuteParameter> {
        ctx.node.expect_inputs(1..=1)?;
        let rank = shapes.get(&ctx.node.input[0])?.len();
        let perm = attrs.usizes("perm")?;
        ctx.node.expect(perm.iter().copied().sorted().eq(0..rank), || {
            format!("perm {perm:?} to be a permutation of the {rank} input axes")
        })?;
        Ok(PermuteParameter {
            order: perm.iter().map(|&a| to_u32(ctx.node, "axis", a)).collect::<StrataResult<_>>()?,
        })
    }

    fn derive_shapes(
        &self,
        shapes: &BlobShapeTable,
        binding: &Binding,
        param: &PermuteParameter,
    ) -> StrataResult<TVec<Shape>> {
        let input = binding.input_shape(shapes, 0)?;
        Ok(tvec!(param.order.iter().map(|&a| input[a as usize]).collect()))
    }

    fn into_layer(&self, param: PermuteParameter) -> LayerParam {
        LayerParam::Permute(param)
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct Concat;

impl LayerConverter for Concat {
    type Param = ConcatParameter;

    fn schema(&self) -> &'static [AttrSpec] {
        const { &[AttrSpec::required("axis", AttrType::Int)] }
    }

    fn extract_params(
        &self,
        ctx: &NodeContext,
        shapes: &BlobShapeTable,
        attrs: &AttributeTable,
    ) -> StrataResult<ConcatParameter> {
        ctx.node.expect_inputs(1..=usize::MAX)?;
        let rank = shapes.get(&ctx.node.inputs()[0])?.len();
        let axis = resolve_axis(ctx.node, attrs.int("axis")?, rank)?;
        Ok(ConcatParameter { axis: axis as i32 })
    }

    fn derive_shapes(
        &self,
        shapes: &BlobShapeTable,
        binding: &Binding,
        param: &ConcatParameter,
    ) -> StrataResult<TVec<Shape>> {
        let axis = param.axis as usize;
        let mut output = binding.input_shape(shapes, 0)?.clone();
        for input in binding.bottom.iter().skip(1) {
            let shape = shapes.get(input)?;
            let compatible = shape.len() == output.len()
                && shape.iter().zip(&output).enumerate().all(|(ix, (a, b))| ix == axis || a == b);
            binding.node.expect(compatible, || {
                format!(
                    "{input} {} to match {} outside axis {axis}",
                    display_shape(shape),
                    display_shape(&output)
                )
            })?;
            output[axis] += shape[axis];
        }
        Ok(tvec!(output))
    }

    fn into_layer(&self, param: ConcatParameter) -> LayerParam {
        LayerParam::Concat(param)
    }
}

/// Flattens to 2D: the axes before `axis` and the axes from `axis` on.
#[derive(Clone, Copy, Debug, Default)]
pub struct Flatten;

impl LayerConverter for Flatten {
    type Param = FlattenParameter;

    fn schema(&self) -> &'static [AttrSpec] {
        const { &[AttrSpec::required("axis", AttrType::Int)] }
    }

    fn extract_params(
        &self,
        ctx: &NodeContext,
        shapes: &BlobShapeTable,
        attrs: &AttributeTable,
    ) -> StrataResult<FlattenParameter> {
        ctx.node.expect_inputs(1..=1)?;
        let rank = shapes.get(&ctx.node.input[0])?.len();
        let axis = attrs.int("axis")?;
        // axis == rank is legal here and flattens everything into the first dimension
        let axis = if axis == rank as i64 { rank } else { resolve_axis(ctx.node, axis, rank)? };
        Ok(FlattenParameter { axis: axis as i32 })
    }

    fn derive_shapes(
        &self,
        shapes: &BlobShapeTable,
        binding: &Binding,
        param: &FlattenParameter,
    ) -> StrataResult<TVec<Shape>> {
        let input = binding.input_shape(shapes, 0)?;
        let (head, tail) = input.split_at(param.axis as usize);
        let rows: usize = head.iter().product();
        let cols: usize = tail.iter().product();
        Ok(tvec!(tvec!(rows, cols)))
    }

    fn into_layer(&self, param: FlattenParameter) -> LayerParam {
        LayerParam::Flatten(param)
    }
}

/// Applies a reshape description to a concrete shape.
///
/// The target replaces the axes `[axis, axis + num_axes)` of the input
/// (all remaining axes when `num_axes` is -1). In the target, 0 copies the
/// input dimension at the same position and a single -1 is inferred from the
/// element count.
pub fn reshape_output_shape(
    node: &pb::NodeProto,
    input: &[usize],
    param: &ReshapeParameter,
) -> StrataResult<Shape> {
    let rank = input.len() as i64;
    let start = if param.axis >= 0 { param.axis as i64 } else { rank + param.axis as i64 + 1 };
    let end = if param.num_axes == -1 { rank } else { start + param.num_axes as i64 };
    node.expect(0 <= start && start <= end && end <= rank, || {
        format!("reshape of axes {start}..{end} to fit input {}", display_shape(input))
    })?;
    let (start, end) = (start as usize, end as usize);
    let target = param.shape.as_ref().map(|s| &*s.dim).unwrap_or(&[]);
    let mut output: Shape = input[..start].iter().copied().collect();
    let mut inferred = None;
    for (ix, &d) in target.iter().enumerate() {
        match d {
            0 => {
                node.expect(start + ix < input.len(), || {
                    format!("a dimension to copy at position {}", start + ix)
                })?;
                output.push(input[start + ix]);
            }
            -1 => {
                node.expect(inferred.is_none(), "at most one inferred dimension")?;
                inferred = Some(output.len());
                output.push(1);
            }
            d if d > 0 => output.push(d as usize),
            d => return Err(node.schema_mismatch(|| format!("invalid target dimension {d}")).into()),
        }
    }
    output.extend(input[end..].iter().copied());
    let volume: usize = input.iter().product();
    let known: usize = output.iter().product();
    if let Some(ix) = inferred {
        node.expect(known > 0 && volume % known == 0, || {
            format!("{} to be reshapable into {:?}", display_shape(input), target)
        })?;
        output[ix] = volume / known;
    } else {
        node.expect(known == volume, || {
            format!("{} and {} to have the same volume", display_shape(input), display_shape(&output))
        })?;
    }
    Ok(output)
}

fn full_reshape(dims: &[usize]) -> ReshapeParameter {
    ReshapeParameter {
        shape: Some(BlobShape { dim: dims.iter().map(|&d| d as i64).collect() }),
        axis: 0,
        num_axes: -1,
    }
}

fn reshape_shapes(
    shapes: &BlobShapeTable,
    binding: &Binding,
    param: &ReshapeParameter,
) -> StrataResult<TVec<Shape>> {
    let input = binding.input_shape(shapes, 0)?;
    Ok(tvec!(reshape_output_shape(binding.node, input, param)?))
}

/// Reshape with its target given by a constant second input.
#[derive(Clone, Copy, Debug, Default)]
pub struct Reshape;

impl LayerConverter for Reshape {
    type Param = ReshapeParameter;

    fn bind_inputs(&self, node: &pb::NodeProto) -> StrataResult<TVec<String>> {
        node.expect_inputs(2..=2)?;
        Ok(node.inputs().into_iter().take(1).collect())
    }

    fn extract_params(
        &self,
        ctx: &NodeContext,
        _: &BlobShapeTable,
        _: &AttributeTable,
    ) -> StrataResult<ReshapeParameter> {
        let target = ctx.initializer(&ctx.node.input[1])?.i64_values()?;
        Ok(ReshapeParameter { shape: Some(BlobShape { dim: target }), axis: 0, num_axes: -1 })
    }

    fn derive_shapes(
        &self,
        shapes: &BlobShapeTable,
        binding: &Binding,
        param: &ReshapeParameter,
    ) -> StrataResult<TVec<Shape>> {
        reshape_shapes(shapes, binding, param)
    }

    fn into_layer(&self, param: ReshapeParameter) -> LayerParam {
        LayerParam::Reshape(param)
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct Unsqueeze;

impl LayerConverter for Unsqueeze {
    type Param = ReshapeParameter;

    fn schema(&self) -> &'static [AttrSpec] {
        const { &[AttrSpec::required("axes", AttrType::Ints)] }
    }

    fn extract_params(
        &self,
        ctx: &NodeContext,
        shapes: &BlobShapeTable,
        attrs: &AttributeTable,
    ) -> StrataResult<ReshapeParameter> {
        ctx.node.expect_inputs(1..=1)?;
        let input = shapes.get(&ctx.node.input[0])?;
        let rank = input.len() + attrs.ints("axes")?.len();
        let axes: Vec<usize> = attrs
            .ints("axes")?
            .iter()
            .map(|&a| resolve_axis(ctx.node, a, rank))
            .collect::<StrataResult<_>>()?;
        ctx.node.expect(axes.iter().all_unique(), || format!("distinct axes, got {axes:?}"))?;
        let mut dims = input.iter().copied();
        let output: Vec<usize> = (0..rank)
            .map(|ix| if axes.contains(&ix) { 1 } else { dims.next().unwrap_or(1) })
            .collect();
        Ok(full_reshape(&output))
    }

    fn derive_shapes(
        &self,
        shapes: &BlobShapeTable,
        binding: &Binding,
        param: &ReshapeParameter,
    ) -> StrataResult<TVec<Shape>> {
        reshape_shapes(shapes, binding, param)
    }

    fn into_layer(&self, param: ReshapeParameter) -> LayerParam {
        LayerParam::Reshape(param)
    }
}

/// Drops the listed unit axes, or all of them when `axes` is absent.
#[derive(Clone, Copy, Debug, Default)]
pub struct Squeeze;

impl LayerConverter for Squeeze {
    type Param = ReshapeParameter;

    fn schema(&self) -> &'static [AttrSpec] {
        const { &[AttrSpec::optional("axes", AttrType::Ints)] }
    }

    fn extract_params(
        &self,
        ctx: &NodeContext,
        shapes: &BlobShapeTable,
        attrs: &AttributeTable,
    ) -> StrataResult<ReshapeParameter> {
        ctx.node.expect_inputs(1..=1)?;
        let input = shapes.get(&ctx.node.input[0])?;
        let axes: Vec<usize> = match attrs.opt_ints("axes")? {
            Some(axes) => axes
                .iter()
                .map(|&a| resolve_axis(ctx.node, a, input.len()))
                .collect::<StrataResult<_>>()?,
            None => (0..input.len()).filter(|&ix| input[ix] == 1).collect(),
        };
        for &ax in &axes {
            ctx.node.expect(input[ax] == 1, || {
                format!("axis {ax} of {} to be of size 1", display_shape(input))
            })?;
        }
        let output: Vec<usize> =
            input.iter().enumerate().filter(|(ix, _)| !axes.contains(ix)).map(|(_, &d)| d).collect();
        Ok(full_reshape(&output))
    }

    fn derive_shapes(
        &self,
        shapes: &BlobShapeTable,
        binding: &Binding,
        param: &ReshapeParameter,
    ) -> StrataResult<TVec<Shape>> {
        reshape_shapes(shapes, binding, param)
    }

    fn into_layer(&self, param: ReshapeParameter) -> LayerParam {
        LayerParam::Reshape(param)
    }
}

/// Reverses the listed axes, emitted by the patched tensor flip.
#[derive(Clone, Copy, Debug, Default)]
pub struct Flip;

impl LayerConverter for Flip {
    type Param = ReverseParameter;

    fn schema(&self) -> &'static [AttrSpec] {
        const { &[AttrSpec::required("dims", AttrType::Ints)] }
    }

    fn extract_params(
        &self,
        ctx: &NodeContext,
        shapes: &BlobShapeTable,
        attrs: &AttributeTable,
    ) -> StrataResult<ReverseParameter> {
        ctx.node.expect_inputs(1..=1)?;
        let rank = shapes.get(&ctx.node.input[0])?.len();
        let axis = attrs
            .ints("dims")?
            .iter()
            .map(|&a| resolve_axis(ctx.node, a, rank).map(|a| a as i32))
            .collect::<StrataResult<Vec<_>>>()?;
        Ok(ReverseParameter { axis })
    }

    fn derive_shapes(
        &self,
        shapes: &BlobShapeTable,
        binding: &Binding,
        _: &ReverseParameter,
    ) -> StrataResult<TVec<Shape>> {
        passthrough(shapes, binding)
    }

    fn into_layer(&self, param: ReverseParameter) -> LayerParam {
        LayerParam::Reverse(param)
    }
}
