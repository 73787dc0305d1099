//! Export-compatibility patch layer.
//!
//! Modules are exported by tracing them through an [`ExportContext`]: a set of
//! strategy slots, one per patchable subsystem, and a registry of symbolic
//! hooks turning framework operators into ONNX nodes. A [`PatchSession`]
//! swaps replacement strategies in for the duration of one export and puts the
//! originals back when it is dropped, whatever way the export ends.

#[macro_use]
extern crate derive_new;
#[macro_use]
extern crate log;

pub mod builder;
pub mod call;
pub mod context;
pub mod errors;
pub mod native;
pub mod patches;
pub mod session;
pub mod symbolic;
pub mod trace;

pub use strata_convert;

pub mod prelude {
    pub use crate::builder::{GraphBuilder, Traced};
    pub use crate::call::{Arg, Call};
    pub use crate::context::{ExportContext, Lowering, Subsystem};
    pub use crate::errors::ExportError;
    pub use crate::patches::PatchSet;
    pub use crate::session::{Capability, PatchSession};
    pub use crate::symbolic::{Symbolic, SymbolicRegistry, SymbolicTable};
    pub use crate::trace::{Exportable, Exported, Tracer, export};
    pub use strata_convert::prelude::*;
}

pub mod internal {
    pub use crate::prelude::*;
    pub use anyhow::{Context, bail, ensure, format_err};
    pub use std::collections::HashMap;
    pub use std::fmt;
    pub use std::sync::Arc;
    pub use strata_convert::pb::{self, AttributeProto, NodeProto, TensorProto};
}

#[cfg(test)]
fn setup_test_logger() {
    let _ = env_logger::Builder::from_env("STRATA_LOG").try_init();
}
