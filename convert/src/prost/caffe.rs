/// Specifies the shape (dimensions) of a Blob.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BlobShape {
    #[prost(int64, repeated, tag="1")]
    pub dim: ::prost::alloc::vec::Vec<i64>,
}
/// A learned parameter tensor attached to a layer.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BlobProto {
    #[prost(message, optional, tag="7")]
    pub shape: ::core::option::Option<BlobShape>,
    #[prost(float, repeated, tag="5")]
    pub data: ::prost::alloc::vec::Vec<f32>,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct NetParameter {
    /// consider giving the network a name
    #[prost(string, tag="1")]
    pub name: ::prost::alloc::string::String,
    /// The input blobs to the network.
    #[prost(string, repeated, tag="3")]
    pub input: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
    /// The shape of the input blobs, one per input.
    #[prost(message, repeated, tag="8")]
    pub input_shape: ::prost::alloc::vec::Vec<BlobShape>,
    /// The layers that make up the net.
    #[prost(message, repeated, tag="100")]
    pub layer: ::prost::alloc::vec::Vec<LayerParameter>,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct LayerParameter {
    /// the layer name
    #[prost(string, tag="1")]
    pub name: ::prost::alloc::string::String,
    /// the layer type
    #[prost(string, tag="2")]
    pub r#type: ::prost::alloc::string::String,
    /// the name of each bottom blob
    #[prost(string, repeated, tag="3")]
    pub bottom: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
    /// the name of each top blob
    #[prost(string, repeated, tag="4")]
    pub top: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
    /// The blobs containing the numeric parameters of the layer.
    #[prost(message, repeated, tag="7")]
    pub blobs: ::prost::alloc::vec::Vec<BlobProto>,
    #[prost(message, optional, tag="104")]
    pub concat_param: ::core::option::Option<ConcatParameter>,
    #[prost(message, optional, tag="106")]
    pub convolution_param: ::core::option::Option<ConvolutionParameter>,
    #[prost(message, optional, tag="108")]
    pub dropout_param: ::core::option::Option<DropoutParameter>,
    #[prost(message, optional, tag="110")]
    pub eltwise_param: ::core::option::Option<EltwiseParameter>,
    #[prost(message, optional, tag="117")]
    pub inner_product_param: ::core::option::Option<InnerProductParameter>,
    #[prost(message, optional, tag="121")]
    pub pooling_param: ::core::option::Option<PoolingParameter>,
    #[prost(message, optional, tag="123")]
    pub relu_param: ::core::option::Option<ReluParameter>,
    #[prost(message, optional, tag="125")]
    pub softmax_param: ::core::option::Option<SoftmaxParameter>,
    #[prost(message, optional, tag="133")]
    pub reshape_param: ::core::option::Option<ReshapeParameter>,
    #[prost(message, optional, tag="135")]
    pub flatten_param: ::core::option::Option<FlattenParameter>,
    #[prost(message, optional, tag="139")]
    pub batch_norm_param: ::core::option::Option<BatchNormParameter>,
    #[prost(message, optional, tag="146")]
    pub recurrent_param: ::core::option::Option<RecurrentParameter>,
    #[prost(message, optional, tag="202")]
    pub permute_param: ::core::option::Option<PermuteParameter>,
    #[prost(message, optional, tag="203")]
    pub interp_param: ::core::option::Option<InterpParameter>,
    #[prost(message, optional, tag="204")]
    pub psroi_mask_pooling_param: ::core::option::Option<PsroiMaskPoolingParameter>,
    #[prost(message, optional, tag="205")]
    pub group_norm_param: ::core::option::Option<GroupNormParameter>,
    #[prost(message, optional, tag="206")]
    pub reverse_param: ::core::option::Option<ReverseParameter>,
    #[prost(message, optional, tag="207")]
    pub deformable_convolution_param: ::core::option::Option<DeformableConvolutionParameter>,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ConcatParameter {
    /// The axis along which to concatenate
    #[prost(int32, tag="2")]
    pub axis: i32,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ConvolutionParameter {
    /// The number of outputs for the layer
    #[prost(uint32, tag="1")]
    pub num_output: u32,
    /// whether to have bias terms
    #[prost(bool, tag="2")]
    pub bias_term: bool,
    #[prost(uint32, tag="9")]
    pub pad_h: u32,
    #[prost(uint32, tag="10")]
    pub pad_w: u32,
    #[prost(uint32, tag="11")]
    pub kernel_h: u32,
    #[prost(uint32, tag="12")]
    pub kernel_w: u32,
    #[prost(uint32, tag="13")]
    pub stride_h: u32,
    #[prost(uint32, tag="14")]
    pub stride_w: u32,
    /// The group size for group conv
    #[prost(uint32, tag="5")]
    pub group: u32,
    /// The dilation, height then width
    #[prost(uint32, repeated, tag="18")]
    pub dilation: ::prost::alloc::vec::Vec<u32>,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeformableConvolutionParameter {
    #[prost(uint32, tag="1")]
    pub deformable_group: u32,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DropoutParameter {
    /// dropout ratio
    #[prost(float, tag="1")]
    pub dropout_ratio: f32,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct EltwiseParameter {
    /// element-wise operation
    #[prost(enumeration="eltwise_parameter::EltwiseOp", tag="1")]
    pub operation: i32,
}
/// Nested message and enum types in `EltwiseParameter`.
pub mod eltwise_parameter {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum EltwiseOp {
        Prod = 0,
        Sum = 1,
        Max = 2,
    }
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FlattenParameter {
    /// The first axis to flatten: all preceding axes are retained in the output.
    #[prost(int32, tag="1")]
    pub axis: i32,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct InnerProductParameter {
    /// The number of outputs for the layer
    #[prost(uint32, tag="1")]
    pub num_output: u32,
    /// whether to have bias terms
    #[prost(bool, tag="2")]
    pub bias_term: bool,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PoolingParameter {
    /// The pooling method
    #[prost(enumeration="pooling_parameter::PoolMethod", tag="1")]
    pub pool: i32,
    #[prost(uint32, tag="9")]
    pub pad_h: u32,
    #[prost(uint32, tag="10")]
    pub pad_w: u32,
    #[prost(uint32, tag="5")]
    pub kernel_h: u32,
    #[prost(uint32, tag="6")]
    pub kernel_w: u32,
    #[prost(uint32, tag="7")]
    pub stride_h: u32,
    #[prost(uint32, tag="8")]
    pub stride_w: u32,
    /// If global_pooling then it will pool over the size of the bottom.
    #[prost(bool, tag="12")]
    pub global_pooling: bool,
    /// Round output sizes up instead of down.
    #[prost(bool, tag="13")]
    pub ceil_mode: bool,
}
/// Nested message and enum types in `PoolingParameter`.
pub mod pooling_parameter {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum PoolMethod {
        Max = 0,
        Ave = 1,
    }
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ReluParameter {
    /// Leaky slope applied to negative inputs.
    #[prost(float, tag="1")]
    pub negative_slope: f32,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SoftmaxParameter {
    /// The axis along which to perform the softmax
    #[prost(int32, tag="2")]
    pub axis: i32,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ReshapeParameter {
    /// Specify the output dimensions. 0 copies the matching bottom dimension,
    /// -1 is inferred from the remaining dimensions.
    #[prost(message, optional, tag="1")]
    pub shape: ::core::option::Option<BlobShape>,
    /// First bottom axis replaced by `shape`.
    #[prost(int32, tag="2")]
    pub axis: i32,
    /// Number of bottom axes replaced by `shape`, -1 for all remaining.
    #[prost(int32, tag="3")]
    pub num_axes: i32,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BatchNormParameter {
    /// Use the stored mean and variance estimates.
    #[prost(bool, tag="1")]
    pub use_global_stats: bool,
    /// Small value to add to the variance estimate.
    #[prost(float, tag="3")]
    pub eps: f32,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RecurrentParameter {
    /// The dimension of the output (and usually hidden state) representation.
    #[prost(uint32, tag="1")]
    pub num_output: u32,
    /// Initial hidden (and cell) states are provided as extra bottoms.
    #[prost(bool, tag="5")]
    pub expose_hidden: bool,
    /// GRU only: apply the reset gate after the recurrent linear transform.
    #[prost(bool, tag="10")]
    pub linear_before_reset: bool,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PermuteParameter {
    /// The new orders of the axes of data.
    #[prost(uint32, repeated, tag="1")]
    pub order: ::prost::alloc::vec::Vec<u32>,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct InterpParameter {
    #[prost(int32, tag="3")]
    pub height: i32,
    #[prost(int32, tag="4")]
    pub width: i32,
    #[prost(enumeration="interp_parameter::Mode", tag="5")]
    pub mode: i32,
    #[prost(bool, tag="6")]
    pub align_corners: bool,
}
/// Nested message and enum types in `InterpParameter`.
pub mod interp_parameter {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum Mode {
        Nearest = 0,
        Bilinear = 1,
    }
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PsroiMaskPoolingParameter {
    #[prost(float, tag="1")]
    pub spatial_scale: f32,
    #[prost(float, tag="2")]
    pub roi_scale: f32,
    #[prost(float, tag="3")]
    pub bin_scale: f32,
    #[prost(uint32, tag="4")]
    pub output_dim: u32,
    #[prost(uint32, tag="5")]
    pub group_size: u32,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GroupNormParameter {
    #[prost(uint32, tag="1")]
    pub num_groups: u32,
    #[prost(float, tag="2")]
    pub eps: f32,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ReverseParameter {
    /// The axes to reverse.
    #[prost(int32, repeated, tag="1")]
    pub axis: ::prost::alloc::vec::Vec<i32>,
}
