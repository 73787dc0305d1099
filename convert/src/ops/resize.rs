use crate::caffe::InterpParameter;
use crate::caffe::interp_parameter::Mode;
use crate::internal::*;
use crate::shape::display_shape;

pub fn register_all_ops(reg: &mut ConverterRegistry) {
    reg.register("Upsample", Upsample);
}

/// Resize to a fixed spatial size, as emitted by the patched interpolation.
#[derive(Clone, Copy, Debug, Default)]
pub struct Upsample;

fn to_i32(node: &pb::NodeProto, what: &str, v: usize) -> StrataResult<i32> {
    i32::try_from(v).map_err(|_| {
        ConvertError::shape_inference(node.display_name(), format!("output {what} {v} does not fit in 32 bits"))
            .into()
    })
}

impl LayerConverter for Upsample {
    type Param = InterpParameter;

    fn schema(&self) -> &'static [AttrSpec] {
        const { &[
            AttrSpec::required("mode", AttrType::String),
            AttrSpec::required("height", AttrType::Int),
            AttrSpec::required("width", AttrType::Int),
        ] }
    }

    fn bind_inputs(&self, node: &pb::NodeProto) -> StrataResult<TVec<String>> {
        node.expect_inputs(1..=2)?;
        Ok(node.inputs().into_iter().take(1).collect())
    }

    fn extract_params(
        &self,
        ctx: &NodeContext,
        _: &BlobShapeTable,
        attrs: &AttributeTable,
    ) -> StrataResult<InterpParameter> {
        let node = ctx.node;
        let mode = match attrs.string("mode")? {
            "nearest" => Mode::Nearest,
            "bilinear" | "linear" => Mode::Bilinear,
            other => {
                return Err(node
                    .schema_mismatch(|| format!("mode nearest or bilinear, got {other}"))
                    .into());
            }
        };
        let height = attrs.usize("height")?;
        let width = attrs.usize("width")?;
        node.expect(height > 0 && width > 0, || format!("a non-empty output size, got {height}x{width}"))?;
        Ok(InterpParameter {
            height: to_i32(node, "height", height)?,
            width: to_i32(node, "width", width)?,
            mode: mode as i32,
            align_corners: false,
        })
    }

    fn derive_shapes(
        &self,
        shapes: &BlobShapeTable,
        binding: &Binding,
        param: &InterpParameter,
    ) -> StrataResult<TVec<Shape>> {
        let input = binding.input_shape(shapes, 0)?;
        binding.node.expect(input.len() == 4, || format!("a 4D NCHW input, got {}", display_shape(input)))?;
        Ok(tvec!(tvec!(input[0], input[1], param.height as usize, param.width as usize)))
    }

    fn into_layer(&self, param: InterpParameter) -> LayerParam {
        LayerParam::Interp(param)
    }
}
