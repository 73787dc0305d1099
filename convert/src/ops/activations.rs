use crate::caffe::ReluParameter;
use crate::internal::*;
use crate::layer::Activation;
use crate::ops::passthrough;

pub fn register_all_ops(reg: &mut ConverterRegistry) {
    reg.register("Relu", Relu);
    reg.register("LeakyRelu", LeakyRelu);
    reg.register("Sigmoid", ActivationConverter(Activation::Sigmoid));
    reg.register("Tanh", ActivationConverter(Activation::TanH));
    reg.register("HardSwish", ActivationConverter(Activation::HSwish));
}

#[derive(Clone, Copy, Debug, Default)]
pub struct Relu;

impl LayerConverter for Relu {
    type Param = ();

    fn extract_params(&self, ctx: &NodeContext, _: &BlobShapeTable, _: &AttributeTable) -> StrataResult<()> {
        ctx.node.expect_inputs(1..=1)
    }

    fn derive_shapes(&self, shapes: &BlobShapeTable, binding: &Binding, _: &()) -> StrataResult<TVec<Shape>> {
        passthrough(shapes, binding)
    }

    fn into_layer(&self, _: ()) -> LayerParam {
        LayerParam::Relu(ReluParameter { negative_slope: 0.0 })
    }
}

/// Leaky ReLU, expressed as a ReLU layer with a negative slope.
#[derive(Clone, Copy, Debug, Default)]
pub struct LeakyRelu;

impl LayerConverter for LeakyRelu {
    type Param = f32;

    fn schema(&self) -> &'static [AttrSpec] {
        const { &[AttrSpec::required("alpha", AttrType::Float)] }
    }

    fn extract_params(&self, ctx: &NodeContext, _: &BlobShapeTable, attrs: &AttributeTable) -> StrataResult<f32> {
        ctx.node.expect_inputs(1..=1)?;
        attrs.float("alpha")
    }

    fn derive_shapes(&self, shapes: &BlobShapeTable, binding: &Binding, _: &f32) -> StrataResult<TVec<Shape>> {
        passthrough(shapes, binding)
    }

    fn into_layer(&self, alpha: f32) -> LayerParam {
        LayerParam::Relu(ReluParameter { negative_slope: alpha })
    }
}

/// Parameterless element-wise activations.
#[derive(Clone, Copy, Debug)]
pub struct ActivationConverter(pub Activation);

impl LayerConverter for ActivationConverter {
    type Param = ();

    fn extract_params(&self, ctx: &NodeContext, _: &BlobShapeTable, _: &AttributeTable) -> StrataResult<()> {
        ctx.node.expect_inputs(1..=1)
    }

    fn derive_shapes(&self, shapes: &BlobShapeTable, binding: &Binding, _: &()) -> StrataResult<TVec<Shape>> {
        passthrough(shapes, binding)
    }

    fn into_layer(&self, _: ()) -> LayerParam {
        LayerParam::Activation(self.0)
    }
}
