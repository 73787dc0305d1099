use std::collections::HashSet;

use crate::internal::*;
use crate::trace::Tracer;

/// The independently patchable parts of the exporter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Subsystem {
    SizeAccessor,
    Flip,
    LstmCell,
    Lstm,
    Gru,
    Interpolate,
    GroupNorm,
    DeformConv,
    SymbolicRegistry,
}

impl Subsystem {
    pub const ALL: [Subsystem; 9] = [
        Subsystem::SymbolicRegistry,
        Subsystem::SizeAccessor,
        Subsystem::Flip,
        Subsystem::LstmCell,
        Subsystem::Lstm,
        Subsystem::Gru,
        Subsystem::Interpolate,
        Subsystem::GroupNorm,
        Subsystem::DeformConv,
    ];

    /// The subsystem lowering calls to `op`, for the operators the exporter
    /// does not handle through symbolic hooks.
    pub fn for_op(op: &str) -> Option<Subsystem> {
        Some(match op {
            "size" => Subsystem::SizeAccessor,
            "flip" => Subsystem::Flip,
            "lstm_cell" => Subsystem::LstmCell,
            "lstm" => Subsystem::Lstm,
            "gru" => Subsystem::Gru,
            "interpolate" => Subsystem::Interpolate,
            "group_norm" => Subsystem::GroupNorm,
            "deform_conv2d" => Subsystem::DeformConv,
            _ => return None,
        })
    }

    /// Native extension that must be loaded for the subsystem to exist at all.
    pub fn extension(&self) -> Option<&'static str> {
        match self {
            Subsystem::DeformConv => Some("deform_conv"),
            _ => None,
        }
    }
}

impl fmt::Display for Subsystem {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Subsystem::SizeAccessor => "size accessor",
            Subsystem::Flip => "flip",
            Subsystem::LstmCell => "LSTM cell",
            Subsystem::Lstm => "LSTM",
            Subsystem::Gru => "GRU",
            Subsystem::Interpolate => "interpolate",
            Subsystem::GroupNorm => "group norm",
            Subsystem::DeformConv => "deformable convolution",
            Subsystem::SymbolicRegistry => "symbolic registry",
        })
    }
}

/// A strategy turning one traced call into graph nodes.
pub trait Lowering: fmt::Debug + Send + Sync {
    fn lower(&self, tracer: &mut Tracer, call: &Call) -> StrataResult<TVec<Traced>>;
}

/// Everything an export reads: the implementation currently installed for
/// each subsystem, the symbolic hooks, and the loaded native extensions.
#[derive(Clone, Debug, Default)]
pub struct ExportContext {
    slots: HashMap<Subsystem, Arc<dyn Lowering>>,
    pub symbolic: SymbolicRegistry,
    extensions: HashSet<String>,
}

impl ExportContext {
    /// A context with nothing installed.
    pub fn empty() -> ExportContext {
        ExportContext::default()
    }

    /// The unpatched exporter, as the framework ships it.
    pub fn native() -> ExportContext {
        let mut ctx = ExportContext::empty();
        for s in Subsystem::ALL {
            if s.extension().is_none() {
                if let Some(lowering) = crate::native::lowering(s) {
                    ctx.slots.insert(s, lowering);
                }
            }
        }
        ctx.symbolic = crate::native::symbolic_registry();
        ctx
    }

    /// Drops the native implementation of a subsystem, as in an environment
    /// where the framework lacks it.
    pub fn without(mut self, subsystem: Subsystem) -> ExportContext {
        self.slots.remove(&subsystem);
        self
    }

    pub fn slot(&self, subsystem: Subsystem) -> Option<&Arc<dyn Lowering>> {
        self.slots.get(&subsystem)
    }

    /// Installs (or clears) the implementation of a subsystem, returning the
    /// previous one.
    pub fn set_slot(
        &mut self,
        subsystem: Subsystem,
        lowering: Option<Arc<dyn Lowering>>,
    ) -> Option<Arc<dyn Lowering>> {
        match lowering {
            Some(l) => self.slots.insert(subsystem, l),
            None => self.slots.remove(&subsystem),
        }
    }

    pub fn has_extension(&self, name: &str) -> bool {
        self.extensions.contains(name)
    }

    /// Loads a native extension, making the subsystems it provides available.
    pub fn load_extension(&mut self, name: &str) -> StrataResult<()> {
        let provided: Vec<Subsystem> =
            Subsystem::ALL.into_iter().filter(|s| s.extension() == Some(name)).collect();
        ensure!(!provided.is_empty(), "Unknown native extension {}", name);
        if self.extensions.insert(name.to_string()) {
            debug!("Loaded native extension {name}");
            for s in provided {
                if let Some(lowering) = crate::native::lowering(s) {
                    self.slots.insert(s, lowering);
                }
            }
        }
        Ok(())
    }

    /// Why a subsystem has nothing installed, if it has nothing installed.
    pub fn missing_reason(&self, subsystem: Subsystem) -> Option<String> {
        if self.slots.contains_key(&subsystem) {
            return None;
        }
        Some(match subsystem.extension() {
            Some(ext) if !self.has_extension(ext) => format!("native extension {ext} is not loaded"),
            _ => format!("the framework provides no {subsystem} implementation"),
        })
    }
}
