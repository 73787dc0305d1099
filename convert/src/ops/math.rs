use crate::caffe::EltwiseParameter;
use crate::caffe::eltwise_parameter::EltwiseOp;
use crate::internal::*;
use crate::shape::display_shape;

pub fn register_all_ops(reg: &mut ConverterRegistry) {
    reg.register("Add", Eltwise(EltwiseOp::Sum));
    reg.register("Mul", Eltwise(EltwiseOp::Prod));
    reg.register("Max", Eltwise(EltwiseOp::Max));
}

/// Element-wise combination of same-shaped inputs. No broadcasting.
#[derive(Clone, Copy, Debug)]
pub struct Eltwise(pub EltwiseOp);

impl LayerConverter for Eltwise {
    type Param = EltwiseParameter;

    fn extract_params(
        &self,
        ctx: &NodeContext,
        _: &BlobShapeTable,
        _: &AttributeTable,
    ) -> StrataResult<EltwiseParameter> {
        let max = if self.0 == EltwiseOp::Max { usize::MAX } else { 2 };
        ctx.node.expect_inputs(2..=max)?;
        Ok(EltwiseParameter { operation: self.0 as i32 })
    }

    fn derive_shapes(
        &self,
        shapes: &BlobShapeTable,
        binding: &Binding,
        _: &EltwiseParameter,
    ) -> StrataResult<TVec<Shape>> {
        let first = binding.input_shape(shapes, 0)?;
        for (ix, input) in binding.bottom.iter().enumerate().skip(1) {
            let shape = shapes.get(input)?;
            binding.node.expect(shape == first, || {
                format!(
                    "input #{ix} {} to have the shape of input #0 {}",
                    display_shape(shape),
                    display_shape(first)
                )
            })?;
        }
        Ok(tvec!(first.clone()))
    }

    fn into_layer(&self, param: EltwiseParameter) -> LayerParam {
        LayerParam::Eltwise(param)
    }
}
