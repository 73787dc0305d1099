//! Layer descriptors and the converter contract.

use std::collections::HashMap;
use std::fmt;

use crate::attr::{AttrSpec, AttributeTable};
use crate::caffe::{self, BlobProto, BlobShape, LayerParameter};
use crate::pb::{NodeProto, TensorProto};
use crate::shape::{BlobShapeTable, Shape};
use crate::translator::TranslateOptions;
use crate::{StrataResult, TVec};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Activation {
    Sigmoid,
    TanH,
    HSwish,
}

/// The typed parameters of a layer. The variant decides the layer type tag,
/// so a descriptor can not carry a tag that disagrees with its parameters.
#[derive(Clone, Debug, PartialEq)]
pub enum LayerParam {
    Dropout(caffe::DropoutParameter),
    PsroiMaskPooling(caffe::PsroiMaskPoolingParameter),
    Relu(caffe::ReluParameter),
    Activation(Activation),
    Permute(caffe::PermuteParameter),
    Convolution(caffe::ConvolutionParameter),
    DeformableConvolution(caffe::ConvolutionParameter, caffe::DeformableConvolutionParameter),
    Pooling(caffe::PoolingParameter),
    BatchNorm(caffe::BatchNormParameter),
    GroupNorm(caffe::GroupNormParameter),
    Eltwise(caffe::EltwiseParameter),
    Concat(caffe::ConcatParameter),
    Flatten(caffe::FlattenParameter),
    Reshape(caffe::ReshapeParameter),
    InnerProduct(caffe::InnerProductParameter),
    Softmax(caffe::SoftmaxParameter),
    Interp(caffe::InterpParameter),
    Reverse(caffe::ReverseParameter),
    Lstm(caffe::RecurrentParameter),
    Gru(caffe::RecurrentParameter),
}

impl LayerParam {
    pub fn layer_type(&self) -> &'static str {
        match self {
            LayerParam::Dropout(_) => "Dropout",
            LayerParam::PsroiMaskPooling(_) => "PSROIMaskPooling",
            LayerParam::Relu(_) => "ReLU",
            LayerParam::Activation(Activation::Sigmoid) => "Sigmoid",
            LayerParam::Activation(Activation::TanH) => "TanH",
            LayerParam::Activation(Activation::HSwish) => "HSwish",
            LayerParam::Permute(_) => "Permute",
            LayerParam::Convolution(_) => "Convolution",
            LayerParam::DeformableConvolution(..) => "DeformableConvolution",
            LayerParam::Pooling(_) => "Pooling",
            LayerParam::BatchNorm(_) => "BatchNorm",
            LayerParam::GroupNorm(_) => "GroupNorm",
            LayerParam::Eltwise(_) => "Eltwise",
            LayerParam::Concat(_) => "Concat",
            LayerParam::Flatten(_) => "Flatten",
            LayerParam::Reshape(_) => "Reshape",
            LayerParam::InnerProduct(_) => "InnerProduct",
            LayerParam::Softmax(_) => "Softmax",
            LayerParam::Interp(_) => "Interp",
            LayerParam::Reverse(_) => "Reverse",
            LayerParam::Lstm(_) => "LSTM",
            LayerParam::Gru(_) => "GRU",
        }
    }

    fn fill(&self, layer: &mut LayerParameter) {
        match self.clone() {
            LayerParam::Dropout(p) => layer.dropout_param = Some(p),
            LayerParam::PsroiMaskPooling(p) => layer.psroi_mask_pooling_param = Some(p),
            LayerParam::Relu(p) => layer.relu_param = Some(p),
            LayerParam::Activation(_) => (),
            LayerParam::Permute(p) => layer.permute_param = Some(p),
            LayerParam::Convolution(p) => layer.convolution_param = Some(p),
            LayerParam::DeformableConvolution(conv, deform) => {
                layer.convolution_param = Some(conv);
                layer.deformable_convolution_param = Some(deform);
            }
            LayerParam::Pooling(p) => layer.pooling_param = Some(p),
            LayerParam::BatchNorm(p) => layer.batch_norm_param = Some(p),
            LayerParam::GroupNorm(p) => layer.group_norm_param = Some(p),
            LayerParam::Eltwise(p) => layer.eltwise_param = Some(p),
            LayerParam::Concat(p) => layer.concat_param = Some(p),
            LayerParam::Flatten(p) => layer.flatten_param = Some(p),
            LayerParam::Reshape(p) => layer.reshape_param = Some(p),
            LayerParam::InnerProduct(p) => layer.inner_product_param = Some(p),
            LayerParam::Softmax(p) => layer.softmax_param = Some(p),
            LayerParam::Interp(p) => layer.interp_param = Some(p),
            LayerParam::Reverse(p) => layer.reverse_param = Some(p),
            LayerParam::Lstm(p) | LayerParam::Gru(p) => layer.recurrent_param = Some(p),
        }
    }
}

/// One layer of the produced network.
#[derive(Clone, Debug, PartialEq, new)]
pub struct LayerDescriptor {
    pub name: String,
    pub bottom: TVec<String>,
    pub top: TVec<String>,
    pub param: LayerParam,
    #[new(default)]
    pub blobs: Vec<BlobProto>,
}

impl LayerDescriptor {
    pub fn layer_type(&self) -> &'static str {
        self.param.layer_type()
    }

    pub fn to_proto(&self) -> LayerParameter {
        let mut layer = LayerParameter {
            name: self.name.clone(),
            r#type: self.layer_type().to_string(),
            bottom: self.bottom.to_vec(),
            top: self.top.to_vec(),
            blobs: self.blobs.clone(),
            ..LayerParameter::default()
        };
        self.param.fill(&mut layer);
        layer
    }
}

impl fmt::Display for LayerDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} ({}) [{}] -> [{}]",
            self.name,
            self.layer_type(),
            self.bottom.join(","),
            self.top.join(",")
        )
    }
}

/// What a converter gets to see of the graph while converting one node.
#[derive(Clone, Debug)]
pub struct NodeContext<'a> {
    pub node: &'a NodeProto,
    pub name: &'a str,
    pub initializers: &'a HashMap<String, &'a TensorProto>,
    pub options: &'a TranslateOptions,
}

impl<'a> NodeContext<'a> {
    pub fn initializer(&self, blob: &str) -> StrataResult<&'a TensorProto> {
        self.initializers.get(blob).copied().ok_or_else(|| {
            self.node
                .schema_mismatch(|| format!("input {blob} to be a constant initializer"))
                .into()
        })
    }
}

/// Blob names a node reads and writes, once bound.
///
/// `inputs` keeps every non-empty node input in position, weights included,
/// while `bottom` only holds the inputs the layer reads at run time.
#[derive(Clone, Debug)]
pub struct Binding<'a> {
    pub node: &'a NodeProto,
    pub inputs: TVec<String>,
    pub bottom: TVec<String>,
    pub top: TVec<String>,
}

impl Binding<'_> {
    pub fn input_shape<'t>(&self, shapes: &'t BlobShapeTable, ix: usize) -> StrataResult<&'t Shape> {
        let Some(blob) = self.inputs.get(ix) else {
            anyhow::bail!("Node has {} inputs, wanted #{}", self.inputs.len(), ix)
        };
        shapes.get(blob)
    }
}

/// The conversion of one operator type, split in phases run in order:
/// output binding, input binding, attribute extraction, shape derivation.
pub trait LayerConverter: fmt::Debug + Send + Sync + 'static {
    type Param: Clone + fmt::Debug;

    /// Attributes read by `extract_params`, validated before it runs.
    fn schema(&self) -> &'static [AttrSpec] {
        &[]
    }

    fn bind_outputs(&self, node: &NodeProto) -> StrataResult<TVec<String>> {
        Ok(node.outputs())
    }

    /// Inputs carried as learned blobs of the layer instead of bottoms.
    fn weight_inputs(&self, _node: &NodeProto) -> StrataResult<TVec<String>> {
        Ok(TVec::new())
    }

    fn bind_inputs(&self, node: &NodeProto) -> StrataResult<TVec<String>> {
        let weights = self.weight_inputs(node)?;
        Ok(node.inputs().into_iter().filter(|i| !weights.contains(i)).collect())
    }

    fn extract_params(
        &self,
        ctx: &NodeContext,
        shapes: &BlobShapeTable,
        attrs: &AttributeTable,
    ) -> StrataResult<Self::Param>;

    /// Shapes of the tops, in order. May be shorter than the tops when
    /// trailing outputs have no static shape.
    fn derive_shapes(
        &self,
        shapes: &BlobShapeTable,
        binding: &Binding,
        param: &Self::Param,
    ) -> StrataResult<TVec<Shape>>;

    fn into_layer(&self, param: Self::Param) -> LayerParam;
}

/// Object-safe face of `LayerConverter`, as stored in the registry.
pub trait Converter: fmt::Debug + Send + Sync {
    fn convert(
        &self,
        ctx: &NodeContext,
        shapes: &mut BlobShapeTable,
    ) -> StrataResult<LayerDescriptor>;
}

impl<C: LayerConverter> Converter for C {
    fn convert(
        &self,
        ctx: &NodeContext,
        shapes: &mut BlobShapeTable,
    ) -> StrataResult<LayerDescriptor> {
        let top = self.bind_outputs(ctx.node)?;
        let bottom = self.bind_inputs(ctx.node)?;
        for b in &bottom {
            shapes.get(b)?;
        }
        let binding = Binding { node: ctx.node, inputs: ctx.node.inputs(), bottom, top };
        trace!("  binding {:?}", binding);
        let attrs = AttributeTable::extract(ctx.node, self.schema())?;
        if ctx.options.strict_attributes {
            if let Some(extra) = attrs.undeclared().next() {
                return Err(ctx
                    .node
                    .schema_mismatch(|| format!("no attribute named '{extra}' for this operator"))
                    .into());
            }
        }
        let param = self.extract_params(ctx, shapes, &attrs)?;
        debug!("  params {:?}", param);
        let derived = self.derive_shapes(shapes, &binding, &param)?;
        if derived.len() > binding.top.len() {
            anyhow::bail!(
                "{} converter derived {} shapes for {} tops",
                ctx.node.op_type,
                derived.len(),
                binding.top.len()
            )
        }
        let blobs = self
            .weight_inputs(ctx.node)?
            .iter()
            .map(|w| blob_proto(ctx.initializer(w)?))
            .collect::<StrataResult<Vec<_>>>()?;
        for (top, shape) in binding.top.iter().zip(derived) {
            shapes.insert(top.clone(), shape)?;
        }
        let Binding { bottom, top, .. } = binding;
        let mut layer = LayerDescriptor::new(ctx.name.to_string(), bottom, top, self.into_layer(param));
        layer.blobs = blobs;
        Ok(layer)
    }
}

pub fn blob_proto(tensor: &TensorProto) -> StrataResult<BlobProto> {
    Ok(BlobProto {
        shape: Some(BlobShape { dim: tensor.dims.clone() }),
        data: tensor.f32_values()?,
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::caffe::EltwiseParameter;
    use crate::caffe::eltwise_parameter::EltwiseOp;

    #[test]
    fn proto_carries_type_and_param() {
        let param = EltwiseParameter { operation: EltwiseOp::Max as i32 };
        let layer = LayerDescriptor::new(
            "max".into(),
            smallvec::smallvec!["a".into(), "b".into()],
            smallvec::smallvec!["c".into()],
            LayerParam::Eltwise(param.clone()),
        );
        let proto = layer.to_proto();
        assert_eq!(proto.r#type, "Eltwise");
        assert_eq!(proto.bottom, vec!["a", "b"]);
        assert_eq!(proto.eltwise_param, Some(param));
        assert!(proto.convolution_param.is_none());
    }

    #[test]
    fn activation_tags() {
        assert_eq!(LayerParam::Activation(Activation::TanH).layer_type(), "TanH");
        assert_eq!(LayerParam::Activation(Activation::HSwish).layer_type(), "HSwish");
    }
}
