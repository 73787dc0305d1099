use crate::caffe::pooling_parameter::PoolMethod;
use crate::caffe::{
    BatchNormParameter, ConvolutionParameter, DeformableConvolutionParameter, GroupNormParameter,
    InnerProductParameter, PoolingParameter, SoftmaxParameter,
};
use crate::internal::*;
use crate::ops::{passthrough, to_u32};
use crate::shape::display_shape;

pub fn register_all_ops(reg: &mut ConverterRegistry) {
    reg.register("Conv", Conv { deformable: false });
    reg.register("DeformConv", Conv { deformable: true });
    reg.register("MaxPool", Pool(PoolMethod::Max));
    reg.register("AveragePool", Pool(PoolMethod::Ave));
    reg.register("GlobalMaxPool", GlobalPool(PoolMethod::Max));
    reg.register("GlobalAveragePool", GlobalPool(PoolMethod::Ave));
    reg.register("BatchNormalization", BatchNorm);
    reg.register("GroupNorm", GroupNorm);
    reg.register("Gemm", Gemm);
    reg.register("Softmax", Softmax);
}

/// Spatial geometry shared by convolution and pooling, for two spatial axes.
#[derive(Clone, Debug, PartialEq, Eq)]
struct Geometry {
    kernel: [usize; 2],
    strides: [usize; 2],
    pads: [usize; 2],
    dilations: [usize; 2],
}

impl Geometry {
    fn extract(node: &pb::NodeProto, attrs: &AttributeTable, dilated: bool) -> StrataResult<Geometry> {
        let pair = |name: &str| -> StrataResult<[usize; 2]> {
            let v = attrs.usizes(name)?;
            node.expect(v.len() == 2, || format!("{name} for two spatial axes, got {v:?}"))?;
            Ok([v[0], v[1]])
        };
        let kernel = pair("kernel_shape")?;
        let strides = pair("strides")?;
        let dilations = if dilated { pair("dilations")? } else { [1, 1] };
        let pads = attrs.usizes("pads")?;
        node.expect(pads.len() == 4, || format!("four pads values, got {pads:?}"))?;
        node.expect(pads[0] == pads[2] && pads[1] == pads[3], || {
            format!("symmetric pads (begin == end per axis), got {pads:?}")
        })?;
        node.expect(strides.iter().chain(&kernel).chain(&dilations).all(|&x| x > 0), || {
            format!(
                "positive kernel, strides and dilations, got {kernel:?}, {strides:?}, {dilations:?}"
            )
        })?;
        Ok(Geometry { kernel, strides, pads: [pads[0], pads[1]], dilations })
    }

    /// Output extent along spatial axis `ax`.
    fn output(&self, node: &pb::NodeProto, input: usize, ax: usize, ceil: bool) -> StrataResult<usize> {
        let effective = self.dilations[ax] * (self.kernel[ax] - 1) + 1;
        let padded = input + 2 * self.pads[ax];
        node.expect(padded >= effective, || {
            format!("padded input extent {padded} to cover the kernel extent {effective}")
        })?;
        let stride = self.strides[ax];
        let mut out = if ceil {
            (padded - effective).div_ceil(stride) + 1
        } else {
            (padded - effective) / stride + 1
        };
        // the last window must start inside the input or its leading padding
        if ceil && self.pads[ax] > 0 && (out - 1) * stride >= input + self.pads[ax] {
            out -= 1;
        }
        Ok(out)
    }

    fn spatial_shape(
        &self,
        node: &pb::NodeProto,
        input: &[usize],
        channels: usize,
        ceil: bool,
    ) -> StrataResult<Shape> {
        node.expect(input.len() == 4, || format!("a 4D NCHW input, got {}", display_shape(input)))?;
        Ok(tvec!(
            input[0],
            channels,
            self.output(node, input[2], 0, ceil)?,
            self.output(node, input[3], 1, ceil)?
        ))
    }
}

fn rank4(node: &pb::NodeProto, what: &str, shape: &[usize]) -> StrataResult<()> {
    node.expect(shape.len() == 4, || format!("{what} of rank 4, got {}", display_shape(shape)))
}

/// Convolution, optionally deformable. The deformable flavour reads
/// (data, offsets, weights[, bias]), the plain one (data, weights[, bias]).
#[derive(Clone, Copy, Debug, Default)]
pub struct Conv {
    pub deformable: bool,
}

impl Conv {
    fn weight_index(&self) -> usize {
        if self.deformable { 2 } else { 1 }
    }
}

impl LayerConverter for Conv {
    type Param = (ConvolutionParameter, Option<DeformableConvolutionParameter>);

    fn schema(&self) -> &'static [AttrSpec] {
        const CONV: &[AttrSpec] = &[
            AttrSpec::required("kernel_shape", AttrType::Ints),
            AttrSpec::required("strides", AttrType::Ints),
            AttrSpec::required("pads", AttrType::Ints),
            AttrSpec::required("dilations", AttrType::Ints),
            AttrSpec::required("group", AttrType::Int),
        ];
        const DEFORM: &[AttrSpec] = &[
            AttrSpec::required("kernel_shape", AttrType::Ints),
            AttrSpec::required("strides", AttrType::Ints),
            AttrSpec::required("pads", AttrType::Ints),
            AttrSpec::required("dilations", AttrType::Ints),
            AttrSpec::required("group", AttrType::Int),
            AttrSpec::required("deformable_group", AttrType::Int),
        ];
        if self.deformable { DEFORM } else { CONV }
    }

    fn weight_inputs(&self, node: &pb::NodeProto) -> StrataResult<TVec<String>> {
        let w = self.weight_index();
        node.expect_inputs(w + 1..=w + 2)?;
        Ok(node.inputs().into_iter().skip(w).collect())
    }

    fn extract_params(
        &self,
        ctx: &NodeContext,
        shapes: &BlobShapeTable,
        attrs: &AttributeTable,
    ) -> StrataResult<Self::Param> {
        let node = ctx.node;
        let geo = Geometry::extract(node, attrs, true)?;
        let inputs = node.inputs();
        let weights = shapes.get(&inputs[self.weight_index()])?;
        rank4(node, "weights", weights)?;
        node.expect(weights[2..] == geo.kernel, || {
            format!("kernel_shape {:?} to match weights {}", geo.kernel, display_shape(weights))
        })?;
        let group = attrs.usize("group")?;
        node.expect(group > 0, "a positive group count")?;
        let conv = ConvolutionParameter {
            num_output: to_u32(node, "output channels", weights[0])?,
            bias_term: inputs.len() > self.weight_index() + 1,
            pad_h: to_u32(node, "pad", geo.pads[0])?,
            pad_w: to_u32(node, "pad", geo.pads[1])?,
            kernel_h: to_u32(node, "kernel", geo.kernel[0])?,
            kernel_w: to_u32(node, "kernel", geo.kernel[1])?,
            stride_h: to_u32(node, "stride", geo.strides[0])?,
            stride_w: to_u32(node, "stride", geo.strides[1])?,
            group: to_u32(node, "group", group)?,
            dilation: vec![
                to_u32(node, "dilation", geo.dilations[0])?,
                to_u32(node, "dilation", geo.dilations[1])?,
            ],
        };
        let deform = if self.deformable {
            let deformable_group = attrs.usize("deformable_group")?;
            Some(DeformableConvolutionParameter {
                deformable_group: to_u32(node, "deformable_group", deformable_group)?,
            })
        } else {
            None
        };
        Ok((conv, deform))
    }

    fn derive_shapes(
        &self,
        shapes: &BlobShapeTable,
        binding: &Binding,
        (conv, _): &Self::Param,
    ) -> StrataResult<TVec<Shape>> {
        let input = binding.input_shape(shapes, 0)?;
        let geo = Geometry {
            kernel: [conv.kernel_h as usize, conv.kernel_w as usize],
            strides: [conv.stride_h as usize, conv.stride_w as usize],
            pads: [conv.pad_h as usize, conv.pad_w as usize],
            dilations: [conv.dilation[0] as usize, conv.dilation[1] as usize],
        };
        let weights = binding.input_shape(shapes, self.weight_index())?;
        binding.node.expect(input.len() == 4 && input[1] == weights[1] * conv.group as usize, || {
            format!(
                "input channels of {} to be weights {} times group {}",
                display_shape(input),
                display_shape(weights),
                conv.group
            )
        })?;
        Ok(tvec!(geo.spatial_shape(binding.node, input, conv.num_output as usize, false)?))
    }

    fn into_layer(&self, (conv, deform): Self::Param) -> LayerParam {
        match deform {
            Some(deform) => LayerParam::DeformableConvolution(conv, deform),
            None => LayerParam::Convolution(conv),
        }
    }
}

/// Windowed max or average pooling.
#[derive(Clone, Copy, Debug)]
pub struct Pool(pub PoolMethod);

impl LayerConverter for Pool {
    type Param = PoolingParameter;

    fn schema(&self) -> &'static [AttrSpec] {
        const { &[
            AttrSpec::required("kernel_shape", AttrType::Ints),
            AttrSpec::required("strides", AttrType::Ints),
            AttrSpec::required("pads", AttrType::Ints),
            AttrSpec::optional("ceil_mode", AttrType::Int),
        ] }
    }

    fn bind_outputs(&self, node: &pb::NodeProto) -> StrataResult<TVec<String>> {
        // MaxPool may also export argmax indices, which the layer does not produce.
        node.expect_outputs(1..=2)?;
        Ok(node.outputs().into_iter().take(1).collect())
    }

    fn extract_params(
        &self,
        ctx: &NodeContext,
        _: &BlobShapeTable,
        attrs: &AttributeTable,
    ) -> StrataResult<PoolingParameter> {
        let node = ctx.node;
        node.expect_inputs(1..=1)?;
        let geo = Geometry::extract(node, attrs, false)?;
        Ok(PoolingParameter {
            pool: self.0 as i32,
            pad_h: to_u32(node, "pad", geo.pads[0])?,
            pad_w: to_u32(node, "pad", geo.pads[1])?,
            kernel_h: to_u32(node, "kernel", geo.kernel[0])?,
            kernel_w: to_u32(node, "kernel", geo.kernel[1])?,
            stride_h: to_u32(node, "stride", geo.strides[0])?,
            stride_w: to_u32(node, "stride", geo.strides[1])?,
            global_pooling: false,
            ceil_mode: attrs.opt_bool("ceil_mode")?.unwrap_or(false),
        })
    }

    fn derive_shapes(
        &self,
        shapes: &BlobShapeTable,
        binding: &Binding,
        p: &PoolingParameter,
    ) -> StrataResult<TVec<Shape>> {
        let input = binding.input_shape(shapes, 0)?;
        rank4(binding.node, "input", input)?;
        let geo = Geometry {
            kernel: [p.kernel_h as usize, p.kernel_w as usize],
            strides: [p.stride_h as usize, p.stride_w as usize],
            pads: [p.pad_h as usize, p.pad_w as usize],
            dilations: [1, 1],
        };
        Ok(tvec!(geo.spatial_shape(binding.node, input, input[1], p.ceil_mode)?))
    }

    fn into_layer(&self, param: PoolingParameter) -> LayerParam {
        LayerParam::Pooling(param)
    }
}

#[derive(Clone, Copy, Debug)]
pub struct GlobalPool(pub PoolMethod);

impl LayerConverter for GlobalPool {
    type Param = PoolingParameter;

    fn extract_params(
        &self,
        ctx: &NodeContext,
        _: &BlobShapeTable,
        _: &AttributeTable,
    ) -> StrataResult<PoolingParameter> {
        ctx.node.expect_inputs(1..=1)?;
        Ok(PoolingParameter { pool: self.0 as i32, global_pooling: true, ..PoolingParameter::default() })
    }

    fn derive_shapes(
        &self,
        shapes: &BlobShapeTable,
        binding: &Binding,
        _: &PoolingParameter,
    ) -> StrataResult<TVec<Shape>> {
        let input = binding.input_shape(shapes, 0)?;
        rank4(binding.node, "input", input)?;
        Ok(tvec!(tvec!(input[0], input[1], 1, 1)))
    }

    fn into_layer(&self, param: PoolingParameter) -> LayerParam {
        LayerParam::Pooling(param)
    }
}

/// Inference batch normalization over (data, scale, bias, mean, var).
#[derive(Clone, Copy, Debug, Default)]
pub struct BatchNorm;

impl LayerConverter for BatchNorm {
    type Param = BatchNormParameter;

    fn schema(&self) -> &'static [AttrSpec] {
        const { &[AttrSpec::required("epsilon", AttrType::Float)] }
    }

    fn weight_inputs(&self, node: &pb::NodeProto) -> StrataResult<TVec<String>> {
        node.expect_inputs(5..=5)?;
        Ok(node.inputs().into_iter().skip(1).collect())
    }

    fn extract_params(
        &self,
        ctx: &NodeContext,
        shapes: &BlobShapeTable,
        attrs: &AttributeTable,
    ) -> StrataResult<BatchNormParameter> {
        let inputs = ctx.node.inputs();
        let channels = shapes.get(&inputs[0])?.get(1).copied();
        for stat in &inputs[1..] {
            let shape = shapes.get(stat)?;
            ctx.node.expect(channels.is_some() && **shape == [channels.unwrap_or(0)], || {
                format!("{stat} to hold one value per channel, got {}", display_shape(shape))
            })?;
        }
        Ok(BatchNormParameter { use_global_stats: true, eps: attrs.float("epsilon")? })
    }

    fn derive_shapes(
        &self,
        shapes: &BlobShapeTable,
        binding: &Binding,
        _: &BatchNormParameter,
    ) -> StrataResult<TVec<Shape>> {
        passthrough(shapes, binding)
    }

    fn into_layer(&self, param: BatchNormParameter) -> LayerParam {
        LayerParam::BatchNorm(param)
    }
}

/// Group normalization, as emitted by the patched exporter: (data[, scale, bias]).
#[derive(Clone, Copy, Debug, Default)]
pub struct GroupNorm;

impl LayerConverter for GroupNorm {
    type Param = GroupNormParameter;

    fn schema(&self) -> &'static [AttrSpec] {
        const { &[AttrSpec::required("num_groups", AttrType::Int), AttrSpec::required("eps", AttrType::Float)] }
    }

    fn weight_inputs(&self, node: &pb::NodeProto) -> StrataResult<TVec<String>> {
        node.expect_inputs(1..=3)?;
        Ok(node.inputs().into_iter().skip(1).collect())
    }

    fn extract_params(
        &self,
        ctx: &NodeContext,
        _: &BlobShapeTable,
        attrs: &AttributeTable,
    ) -> StrataResult<GroupNormParameter> {
        let num_groups = attrs.usize("num_groups")?;
        ctx.node.expect(num_groups > 0, "a positive num_groups")?;
        Ok(GroupNormParameter {
            num_groups: to_u32(ctx.node, "num_groups", num_groups)?,
            eps: attrs.float("eps")?,
        })
    }

    fn derive_shapes(
        &self,
        shapes: &BlobShapeTable,
        binding: &Binding,
        param: &GroupNormParameter,
    ) -> StrataResult<TVec<Shape>> {
        let input = binding.input_shape(shapes, 0)?;
        binding.node.expect(
            input.len() >= 2 && input[1] % param.num_groups as usize == 0,
            || format!("channels of {} divisible by {} groups", display_shape(input), param.num_groups),
        )?;
        passthrough(shapes, binding)
    }

    fn into_layer(&self, param: GroupNormParameter) -> LayerParam {
        LayerParam::GroupNorm(param)
    }
}

/// Fully connected layer, from the `x * W^T + b` form of Gemm.
#[derive(Clone, Copy, Debug, Default)]
pub struct Gemm;

impl LayerConverter for Gemm {
    type Param = InnerProductParameter;

    fn schema(&self) -> &'static [AttrSpec] {
        const { &[
            AttrSpec::required("transB", AttrType::Int),
            AttrSpec::optional("transA", AttrType::Int),
            AttrSpec::optional("alpha", AttrType::Float),
            AttrSpec::optional("beta", AttrType::Float),
        ] }
    }

    fn weight_inputs(&self, node: &pb::NodeProto) -> StrataResult<TVec<String>> {
        node.expect_inputs(2..=3)?;
        Ok(node.inputs().into_iter().skip(1).collect())
    }

    fn extract_params(
        &self,
        ctx: &NodeContext,
        shapes: &BlobShapeTable,
        attrs: &AttributeTable,
    ) -> StrataResult<InnerProductParameter> {
        let node = ctx.node;
        node.expect(attrs.int("transB")? == 1, "transB = 1")?;
        node.expect(attrs.opt_int("transA")?.unwrap_or(0) == 0, "transA = 0")?;
        node.expect(attrs.opt_float("alpha")?.unwrap_or(1.0) == 1.0, "alpha = 1")?;
        node.expect(attrs.opt_float("beta")?.unwrap_or(1.0) == 1.0, "beta = 1")?;
        let inputs = node.inputs();
        let weights = shapes.get(&inputs[1])?;
        node.expect(weights.len() == 2, || format!("2D weights, got {}", display_shape(weights)))?;
        Ok(InnerProductParameter {
            num_output: to_u32(node, "num_output", weights[0])?,
            bias_term: inputs.len() == 3,
        })
    }

    fn derive_shapes(
        &self,
        shapes: &BlobShapeTable,
        binding: &Binding,
        param: &InnerProductParameter,
    ) -> StrataResult<TVec<Shape>> {
        let input = binding.input_shape(shapes, 0)?;
        let weights = binding.input_shape(shapes, 1)?;
        binding.node.expect(input.len() == 2 && input[1] == weights[1], || {
            format!("2D input matching weights {}, got {}", display_shape(weights), display_shape(input))
        })?;
        Ok(tvec!(tvec!(input[0], param.num_output as usize)))
    }

    fn into_layer(&self, param: InnerProductParameter) -> LayerParam {
        LayerParam::InnerProduct(param)
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct Softmax;

impl LayerConverter for Softmax {
    type Param = SoftmaxParameter;

    fn schema(&self) -> &'static [AttrSpec] {
        const { &[AttrSpec::required("axis", AttrType::Int)] }
    }

    fn extract_params(
        &self,
        ctx: &NodeContext,
        shapes: &BlobShapeTable,
        attrs: &AttributeTable,
    ) -> StrataResult<SoftmaxParameter> {
        ctx.node.expect_inputs(1..=1)?;
        let rank = shapes.get(&ctx.node.input[0])?.len();
        let axis = crate::ops::resolve_axis(ctx.node, attrs.int("axis")?, rank)?;
        Ok(SoftmaxParameter { axis: axis as i32 })
    }

    fn derive_shapes(
        &self,
        shapes: &BlobShapeTable,
        binding: &Binding,
        _: &SoftmaxParameter,
    ) -> StrataResult<TVec<Shape>> {
        passthrough(shapes, binding)
    }

    fn into_layer(&self, param: SoftmaxParameter) -> LayerParam {
        LayerParam::Softmax(param)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn geo(k: usize, s: usize, p: usize, d: usize) -> Geometry {
        Geometry { kernel: [k, k], strides: [s, s], pads: [p, p], dilations: [d, d] }
    }

    #[test]
    fn dilated_extent() {
        let node = pb::NodeProto::new("Conv", &["x", "w"], &["y"]);
        // effective kernel 5, (32 + 4 - 5) / 1 + 1
        assert_eq!(geo(3, 1, 2, 2).output(&node, 32, 0, false).unwrap(), 32);
        assert_eq!(geo(3, 2, 1, 1).output(&node, 224, 0, false).unwrap(), 112);
    }

    #[test]
    fn ceil_pooling() {
        let node = pb::NodeProto::new("MaxPool", &["x"], &["y"]);
        assert_eq!(geo(3, 2, 0, 1).output(&node, 112, 0, false).unwrap(), 55);
        assert_eq!(geo(3, 2, 0, 1).output(&node, 112, 0, true).unwrap(), 56);
        assert_eq!(geo(2, 2, 1, 1).output(&node, 4, 0, true).unwrap(), 3);
        // clipped: the extra window would start in the trailing padding
        assert_eq!(geo(2, 2, 1, 1).output(&node, 3, 0, true).unwrap(), 2);
    }

    #[test]
    fn kernel_larger_than_input() {
        let node = pb::NodeProto::new("Conv", &["x", "w"], &["y"]);
        assert!(geo(5, 1, 0, 1).output(&node, 3, 0, false).is_err());
    }
}
