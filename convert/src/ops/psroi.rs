use crate::caffe::PsroiMaskPoolingParameter;
use crate::internal::*;
use crate::ops::to_u32;

pub fn register_all_ops(reg: &mut ConverterRegistry) {
    reg.register("PSROIMaskPooling", PsroiMaskPooling);
}

/// Position-sensitive ROI pooling with a mask, over (features, rois).
///
/// The output has one entry per region of interest: its leading dimension is
/// taken from the rois input, not from the feature map.
#[derive(Clone, Copy, Debug, Default)]
pub struct PsroiMaskPooling;

impl LayerConverter for PsroiMaskPooling {
    type Param = PsroiMaskPoolingParameter;

    fn schema(&self) -> &'static [AttrSpec] {
        const { &[
            AttrSpec::required("spatial_scale", AttrType::Float),
            AttrSpec::required("output_dim", AttrType::Int),
            AttrSpec::required("group_size", AttrType::Int),
            AttrSpec::required("roi_scale", AttrType::Float),
            AttrSpec::required("bin_scale", AttrType::Float),
        ] }
    }

    fn extract_params(
        &self,
        ctx: &NodeContext,
        _: &BlobShapeTable,
        attrs: &AttributeTable,
    ) -> StrataResult<PsroiMaskPoolingParameter> {
        ctx.node.expect_inputs(2..=2)?;
        Ok(PsroiMaskPoolingParameter {
            spatial_scale: attrs.float("spatial_scale")?,
            roi_scale: attrs.float("roi_scale")?,
            bin_scale: attrs.float("bin_scale")?,
            output_dim: to_u32(ctx.node, "output_dim", attrs.usize("output_dim")?)?,
            group_size: to_u32(ctx.node, "group_size", attrs.usize("group_size")?)?,
        })
    }

    fn derive_shapes(
        &self,
        shapes: &BlobShapeTable,
        binding: &Binding,
        param: &PsroiMaskPoolingParameter,
    ) -> StrataResult<TVec<Shape>> {
        let rois = binding.input_shape(shapes, 1)?;
        let Some(&count) = rois.first() else {
            return Err(binding.node.schema_mismatch("rois input of rank 2, got a scalar").into());
        };
        let gs = param.group_size as usize;
        Ok(tvec!(tvec!(count, param.output_dim as usize, gs, gs)))
    }

    fn into_layer(&self, param: PsroiMaskPoolingParameter) -> LayerParam {
        LayerParam::PsroiMaskPooling(param)
    }
}
