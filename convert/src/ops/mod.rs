use crate::internal::*;

mod activations;
mod array;
mod dropout;
mod math;
mod nn;
mod psroi;
mod rec;
mod resize;

pub use activations::{ActivationConverter, LeakyRelu, Relu};
pub use array::{Concat, Flatten, Flip, Reshape, Squeeze, Transpose, Unsqueeze};
pub use dropout::Dropout;
pub use math::Eltwise;
pub use nn::{BatchNorm, Conv, Gemm, GlobalPool, GroupNorm, Pool, Softmax};
pub use psroi::PsroiMaskPooling;
pub use rec::{Gru, Lstm};
pub use resize::Upsample;

pub fn register_all_ops(reg: &mut ConverterRegistry) {
    activations::register_all_ops(reg);
    array::register_all_ops(reg);
    dropout::register_all_ops(reg);
    math::register_all_ops(reg);
    nn::register_all_ops(reg);
    psroi::register_all_ops(reg);
    rec::register_all_ops(reg);
    resize::register_all_ops(reg);
}

/// The single output shape of a layer that does not change its input shape.
pub(crate) fn passthrough(shapes: &BlobShapeTable, binding: &Binding) -> StrataResult<TVec<Shape>> {
    Ok(tvec!(binding.input_shape(shapes, 0)?.clone()))
}

/// Resolves a possibly negative axis against a rank.
pub(crate) fn resolve_axis(node: &pb::NodeProto, axis: i64, rank: usize) -> StrataResult<usize> {
    let resolved = if axis < 0 { axis + rank as i64 } else { axis };
    node.expect(resolved >= 0 && (resolved as usize) < rank, || {
        format!("axis {axis} to be valid for rank {rank}")
    })?;
    Ok(resolved as usize)
}

pub(crate) fn to_u32(node: &pb::NodeProto, what: &str, v: usize) -> StrataResult<u32> {
    u32::try_from(v).map_err(|_| node.schema_mismatch(|| format!("{what} {v} does not fit in 32 bits")).into())
}
