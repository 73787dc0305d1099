//! Scoped installation of export patches.

use std::ops::{Deref, DerefMut};

use itertools::Itertools;

use crate::errors::ExportError;
use crate::internal::*;
use crate::symbolic::SymbolicTable;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Capability {
    Enabled,
    Unavailable { reason: String },
}

impl Capability {
    pub fn is_enabled(&self) -> bool {
        matches!(self, Capability::Enabled)
    }
}

#[derive(Debug)]
enum Saved {
    Slot { subsystem: Subsystem, original: Option<Arc<dyn Lowering>> },
    Table { version: u32, original: Option<Arc<SymbolicTable>> },
    Hook { op: String, version: u32, original: Option<Arc<dyn Lowering>> },
}

/// Patches installed in an [`ExportContext`] for as long as the session lives.
///
/// Everything the session replaces is pushed on a stack together with its
/// original value, and put back in reverse order when the session is dropped.
/// Dropping happens on every exit path: normal return, early `?` return and
/// unwinding.
#[derive(Debug)]
pub struct PatchSession<'a> {
    ctx: &'a mut ExportContext,
    saved: Vec<Saved>,
    capabilities: Vec<(Subsystem, Capability)>,
    opset: u32,
}

impl<'a> PatchSession<'a> {
    pub fn open(ctx: &'a mut ExportContext, patches: &PatchSet) -> StrataResult<PatchSession<'a>> {
        ensure!(
            patches.subsystems.iter().all_unique(),
            "Patch set lists a subsystem twice: {:?}",
            patches.subsystems
        );
        let mut session =
            PatchSession { ctx, saved: vec![], capabilities: vec![], opset: patches.opset };
        for &subsystem in &patches.subsystems {
            let capability = if subsystem == Subsystem::SymbolicRegistry {
                session.patch_registry(patches.symbolic_table());
                Capability::Enabled
            } else {
                session.patch_slot(subsystem, patches.replacement(subsystem))
            };
            session.capabilities.push((subsystem, capability));
        }
        Ok(session)
    }

    fn patch_slot(&mut self, subsystem: Subsystem, replacement: Option<Arc<dyn Lowering>>) -> Capability {
        if let Some(reason) = self.ctx.missing_reason(subsystem) {
            warn!("Not patching {subsystem}: {reason}");
            return Capability::Unavailable { reason };
        }
        let Some(replacement) = replacement else {
            let reason = format!("no replacement for {subsystem}");
            warn!("Not patching {subsystem}: {reason}");
            return Capability::Unavailable { reason };
        };
        debug!("Patching {subsystem} with {replacement:?}");
        let original = self.ctx.set_slot(subsystem, Some(replacement));
        self.saved.push(Saved::Slot { subsystem, original });
        Capability::Enabled
    }

    /// Swaps the opset table, then overrides individually registered hooks
    /// one by one so hooks registered meanwhile by others are left alone on
    /// restore.
    fn patch_registry(&mut self, table: SymbolicTable) {
        let version = table.version;
        let table = Arc::new(table);
        let original = self.ctx.symbolic.set_table(version, Some(table.clone()));
        self.saved.push(Saved::Table { version, original });
        for op in self.ctx.symbolic.registered_ops(version) {
            let Some(hook) = table.get(&op) else { continue };
            debug!("Patching registered symbolic {op} for opset {version}");
            let original = self.ctx.symbolic.register_op(&op, hook.clone(), "", version);
            self.saved.push(Saved::Hook { op, version, original });
        }
    }

    pub fn opset(&self) -> u32 {
        self.opset
    }

    pub fn capabilities(&self) -> &[(Subsystem, Capability)] {
        &self.capabilities
    }

    /// Capability of a subsystem, `None` when the session was not asked to
    /// patch it.
    pub fn capability(&self, subsystem: Subsystem) -> Option<&Capability> {
        self.capabilities.iter().find(|(s, _)| *s == subsystem).map(|(_, c)| c)
    }

    /// Fails unless the subsystem got patched.
    pub fn require(&self, subsystem: Subsystem) -> StrataResult<()> {
        match self.capability(subsystem) {
            Some(Capability::Enabled) => Ok(()),
            Some(Capability::Unavailable { reason }) => {
                Err(ExportError::PatchUnavailable { subsystem, reason: reason.clone() }.into())
            }
            None => Err(ExportError::PatchUnavailable {
                subsystem,
                reason: "not part of the patch set".to_string(),
            }
            .into()),
        }
    }
}

impl Deref for PatchSession<'_> {
    type Target = ExportContext;
    fn deref(&self) -> &ExportContext {
        self.ctx
    }
}

impl DerefMut for PatchSession<'_> {
    fn deref_mut(&mut self) -> &mut ExportContext {
        self.ctx
    }
}

impl Drop for PatchSession<'_> {
    fn drop(&mut self) {
        while let Some(saved) = self.saved.pop() {
            match saved {
                Saved::Slot { subsystem, original } => {
                    debug!("Restoring {subsystem}");
                    self.ctx.set_slot(subsystem, original);
                }
                Saved::Table { version, original } => {
                    debug!("Restoring symbolic table for opset {version}");
                    self.ctx.symbolic.set_table(version, original);
                }
                Saved::Hook { op, version, original: Some(hook) } => {
                    self.ctx.symbolic.register_op(&op, hook, "", version);
                }
                Saved::Hook { op, version, original: None } => {
                    self.ctx.symbolic.unregister_op(&op, "", version);
                }
            }
        }
    }
}
