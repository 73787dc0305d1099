//! Typed failures of the translation.
//!
//! They travel inside `anyhow::Error` like everything else and can be recovered
//! with `downcast_ref::<ConvertError>()`, even after context has been attached.

use std::fmt;

use crate::attr::AttrType;

#[derive(Clone, Debug, PartialEq)]
pub enum ConvertError {
    /// No converter is registered for this operator type.
    UnsupportedOperator { node: String, op_type: String },
    /// The node does not have the inputs, outputs or values its converter expects.
    SchemaMismatch { node: String, op_type: String, reason: String },
    /// A required attribute is absent.
    MissingAttribute { node: String, op_type: String, attribute: String },
    /// An attribute is present with another type than the declared one.
    AttributeTypeMismatch {
        node: String,
        op_type: String,
        attribute: String,
        expected: AttrType,
        found: String,
    },
    /// A shape could not be derived. Indicates a traversal order problem or an
    /// upstream bug, never something the user can fix.
    ShapeInference { blob: String, reason: String },
}

impl ConvertError {
    pub fn kind(&self) -> &'static str {
        match self {
            ConvertError::UnsupportedOperator { .. } => "UnsupportedOperator",
            ConvertError::SchemaMismatch { .. } => "SchemaMismatch",
            ConvertError::MissingAttribute { .. } => "MissingAttribute",
            ConvertError::AttributeTypeMismatch { .. } => "AttributeTypeMismatch",
            ConvertError::ShapeInference { .. } => "ShapeInferenceError",
        }
    }

    pub fn shape_inference(blob: impl Into<String>, reason: impl Into<String>) -> ConvertError {
        ConvertError::ShapeInference { blob: blob.into(), reason: reason.into() }
    }
}

impl fmt::Display for ConvertError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConvertError::UnsupportedOperator { node, op_type } => {
                write!(f, "Node {node}: no converter for operator {op_type}")
            }
            ConvertError::SchemaMismatch { node, op_type, reason } => {
                write!(f, "Node {node} ({op_type}): {reason}")
            }
            ConvertError::MissingAttribute { node, op_type, attribute } => {
                write!(f, "Node {node} ({op_type}): missing required attribute '{attribute}'")
            }
            ConvertError::AttributeTypeMismatch { node, op_type, attribute, expected, found } => {
                write!(
                    f,
                    "Node {node} ({op_type}), attribute '{attribute}': expected {expected}, got {found}"
                )
            }
            ConvertError::ShapeInference { blob, reason } => {
                write!(f, "Shape inference failed for blob {blob}: {reason}")
            }
        }
    }
}

impl std::error::Error for ConvertError {}
