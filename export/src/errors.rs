use std::fmt;

use crate::context::Subsystem;

#[derive(Clone, Debug, PartialEq)]
pub enum ExportError {
    /// A subsystem the caller depends on could not be patched in this
    /// environment.
    PatchUnavailable { subsystem: Subsystem, reason: String },
    /// The exporter could not lower an operator.
    ExportFailed { op: String, reason: String },
}

impl ExportError {
    pub fn failed(op: impl Into<String>, reason: impl Into<String>) -> ExportError {
        ExportError::ExportFailed { op: op.into(), reason: reason.into() }
    }
}

impl fmt::Display for ExportError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ExportError::PatchUnavailable { subsystem, reason } => {
                write!(f, "Patch for {subsystem} is unavailable: {reason}")
            }
            ExportError::ExportFailed { op, reason } => write!(f, "Failed to export {op}: {reason}"),
        }
    }
}

impl std::error::Error for ExportError {}
