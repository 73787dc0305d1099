use crate::caffe::DropoutParameter;
use crate::internal::*;
use crate::ops::passthrough;

pub fn register_all_ops(reg: &mut ConverterRegistry) {
    reg.register("Dropout", Dropout);
}

/// Inference-time dropout. The optional mask output has no layer
/// counterpart and is left unbound.
#[derive(Clone, Copy, Debug, Default)]
pub struct Dropout;

impl LayerConverter for Dropout {
    type Param = DropoutParameter;

    fn schema(&self) -> &'static [AttrSpec] {
        const { &[AttrSpec::required("ratio", AttrType::Float)] }
    }

    fn bind_outputs(&self, node: &pb::NodeProto) -> StrataResult<TVec<String>> {
        node.expect_outputs(1..=2)?;
        match node.output.first() {
            Some(first) if !first.is_empty() => Ok(tvec!(first.clone())),
            _ => Err(node.schema_mismatch("a named primary output").into()),
        }
    }

    /// Every named input, in order. The data input comes first, followed by
    /// the ratio and training mode inputs when the exporter emits them.
    fn bind_inputs(&self, node: &pb::NodeProto) -> StrataResult<TVec<String>> {
        node.expect_inputs(1..=3)?;
        match node.input.first() {
            Some(first) if !first.is_empty() => Ok(node.inputs()),
            _ => Err(node.schema_mismatch("a named data input").into()),
        }
    }

    fn extract_params(
        &self,
        _ctx: &NodeContext,
        _: &BlobShapeTable,
        attrs: &AttributeTable,
    ) -> StrataResult<DropoutParameter> {
        Ok(DropoutParameter { dropout_ratio: attrs.float("ratio")? })
    }

    fn derive_shapes(
        &self,
        shapes: &BlobShapeTable,
        binding: &Binding,
        _: &DropoutParameter,
    ) -> StrataResult<TVec<Shape>> {
        passthrough(shapes, binding)
    }

    fn into_layer(&self, param: DropoutParameter) -> LayerParam {
        LayerParam::Dropout(param)
    }
}
