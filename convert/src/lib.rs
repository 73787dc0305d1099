#[macro_use]
extern crate derive_new;
#[macro_use]
extern crate log;

pub mod attr;
pub mod errors;
pub mod layer;
pub mod ops;
pub mod pb_helpers;
pub mod registry;
pub mod shape;
pub mod translator;

/// ONNX messages, the exchange format read by the translator.
pub mod pb {
    include!("prost/onnx.rs");
}

/// Caffe-style network description, the format produced by the translator.
pub mod caffe {
    include!("prost/caffe.rs");
}

pub use anyhow;
pub use itertools;
pub use smallvec;

/// A Smallvec instantiation with 4 embeddable values.
///
/// Used for node inputs and outputs, and for tensor dimensions.
pub type TVec<T> = smallvec::SmallVec<[T; 4]>;

pub type StrataResult<T> = anyhow::Result<T>;

pub use self::translator::GraphTranslator;

/// A translator with the full converter table and default options.
pub fn strata() -> GraphTranslator {
    GraphTranslator::default()
}

pub mod prelude {
    pub use crate::errors::ConvertError;
    pub use crate::layer::{LayerDescriptor, LayerParam};
    pub use crate::registry::ConverterRegistry;
    pub use crate::shape::{BlobShapeTable, Shape};
    pub use crate::translator::{GraphTranslator, Network, TranslateOptions};
    pub use crate::{StrataResult, TVec};
    pub use crate::{caffe, pb};
    pub use smallvec::smallvec as tvec;
}

pub mod internal {
    pub use crate::attr::{AttrSpec, AttrType, AttributeTable};
    pub use crate::layer::{Binding, Converter, LayerConverter, NodeContext};
    pub use crate::pb_helpers::*;
    pub use crate::prelude::*;
    pub use anyhow::{Context, anyhow, bail, ensure, format_err};
    pub use std::collections::HashMap;
    pub use std::fmt;
    pub use std::sync::Arc;
}

#[cfg(test)]
fn setup_test_logger() {
    let _ = env_logger::Builder::from_env("STRATA_LOG").try_init();
}
