//! Symbolic export hooks.
//!
//! A hook tells the exporter how to emit ONNX nodes for one framework
//! operator. Hooks come from two places: the opset tables shipped with the
//! exporter, one per opset version, and hooks registered individually by user
//! code for a `(domain, version)` pair. Individually registered hooks win.

use crate::context::Lowering;
use crate::internal::*;
use crate::trace::Tracer;

pub type LowerFn = fn(&mut Tracer, &Call) -> StrataResult<TVec<Traced>>;

/// A named function hook.
#[derive(Clone)]
pub struct Symbolic(pub &'static str, pub LowerFn);

impl Symbolic {
    pub fn arc(name: &'static str, f: LowerFn) -> Arc<dyn Lowering> {
        Arc::new(Symbolic(name, f))
    }
}

impl fmt::Debug for Symbolic {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Symbolic({})", self.0)
    }
}

impl Lowering for Symbolic {
    fn lower(&self, tracer: &mut Tracer, call: &Call) -> StrataResult<TVec<Traced>> {
        (self.1)(tracer, call)
    }
}

/// The hooks of one opset version.
#[derive(Clone, Debug, Default)]
pub struct SymbolicTable {
    pub version: u32,
    pub hooks: HashMap<String, Arc<dyn Lowering>>,
}

impl SymbolicTable {
    pub fn new(version: u32) -> SymbolicTable {
        SymbolicTable { version, hooks: HashMap::new() }
    }

    pub fn with(mut self, op: &str, hook: Arc<dyn Lowering>) -> SymbolicTable {
        self.hooks.insert(op.to_string(), hook);
        self
    }

    pub fn with_fn(self, op: &'static str, f: LowerFn) -> SymbolicTable {
        self.with(op, Symbolic::arc(op, f))
    }

    pub fn get(&self, op: &str) -> Option<&Arc<dyn Lowering>> {
        self.hooks.get(op)
    }

    pub fn ops(&self) -> impl Iterator<Item = &str> {
        self.hooks.keys().map(|s| s.as_str())
    }
}

#[derive(Clone, Debug, Default)]
pub struct SymbolicRegistry {
    tables: HashMap<u32, Arc<SymbolicTable>>,
    registered: HashMap<(String, u32), HashMap<String, Arc<dyn Lowering>>>,
}

impl SymbolicRegistry {
    pub fn table(&self, version: u32) -> Option<&Arc<SymbolicTable>> {
        self.tables.get(&version)
    }

    /// Swaps the opset table for `version`, returning the previous one.
    pub fn set_table(
        &mut self,
        version: u32,
        table: Option<Arc<SymbolicTable>>,
    ) -> Option<Arc<SymbolicTable>> {
        match table {
            Some(t) => self.tables.insert(version, t),
            None => self.tables.remove(&version),
        }
    }

    /// Registers a hook for `op`, returning the one it replaces.
    pub fn register_op(
        &mut self,
        op: &str,
        hook: Arc<dyn Lowering>,
        domain: &str,
        version: u32,
    ) -> Option<Arc<dyn Lowering>> {
        trace!("register symbolic {domain}::{op} for opset {version}");
        self.registered.entry((domain.to_string(), version)).or_default().insert(op.to_string(), hook)
    }

    pub fn unregister_op(&mut self, op: &str, domain: &str, version: u32) -> Option<Arc<dyn Lowering>> {
        let key = (domain.to_string(), version);
        let hooks = self.registered.get_mut(&key)?;
        let removed = hooks.remove(op);
        if hooks.is_empty() {
            self.registered.remove(&key);
        }
        removed
    }

    pub fn get_registered(&self, op: &str, domain: &str, version: u32) -> Option<&Arc<dyn Lowering>> {
        self.registered.get(&(domain.to_string(), version))?.get(op)
    }

    pub fn is_registered(&self, op: &str, domain: &str, version: u32) -> bool {
        self.get_registered(op, domain, version).is_some()
    }

    /// Ops individually registered in the default domain for `version`.
    pub fn registered_ops(&self, version: u32) -> Vec<String> {
        let mut ops: Vec<String> = self
            .registered
            .get(&(String::new(), version))
            .map(|hooks| hooks.keys().cloned().collect())
            .unwrap_or_default();
        ops.sort();
        ops
    }

    /// The hook the exporter uses for `op` at `version`.
    pub fn lookup(&self, op: &str, version: u32) -> Option<Arc<dyn Lowering>> {
        self.get_registered(op, "", version)
            .or_else(|| self.tables.get(&version).and_then(|t| t.get(op)))
            .cloned()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn nop(_: &mut Tracer, _: &Call) -> StrataResult<TVec<Traced>> {
        Ok(tvec!())
    }

    #[test]
    fn registered_hook_wins() {
        crate::setup_test_logger();
        let mut reg = SymbolicRegistry::default();
        let from_table = Symbolic::arc("relu", nop);
        let custom = Symbolic::arc("my_relu", nop);
        reg.set_table(9, Some(Arc::new(SymbolicTable::new(9).with("relu", from_table.clone()))));
        assert!(Arc::ptr_eq(&reg.lookup("relu", 9).unwrap(), &from_table));
        reg.register_op("relu", custom.clone(), "", 9);
        assert!(Arc::ptr_eq(&reg.lookup("relu", 9).unwrap(), &custom));
        assert!(reg.lookup("relu", 10).is_none());
        reg.unregister_op("relu", "", 9);
        assert!(Arc::ptr_eq(&reg.lookup("relu", 9).unwrap(), &from_table));
        assert!(reg.registered_ops(9).is_empty());
    }
}
