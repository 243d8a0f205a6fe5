//! Assembler state shared by the fragment emitters.

use dynasmrt::x64::Assembler;
use dynasmrt::{AssemblyOffset, DynamicLabel, DynasmApi};

use crate::fragments::{EMITTERS, FragmentId};
use crate::global::JitError;
use crate::hooks::{HookKind, RuntimeHooks};
use crate::labels::FragmentLabels;

/// Code generator for the global fragments.
///
/// Owns the assembler and the fragment labels; borrows the hook table for
/// the duration of emission.
pub struct GlobalAssembler<'h> {
    pub(crate) ops: Assembler,
    labels: FragmentLabels,
    hooks: &'h RuntimeHooks,
}

impl<'h> GlobalAssembler<'h> {
    /// Fresh assembler with every fragment label declared.
    pub fn new(hooks: &'h RuntimeHooks) -> Result<Self, JitError> {
        let mut ops = Assembler::new()?;
        let labels = FragmentLabels::declare(&mut ops);
        Ok(Self { ops, labels, hooks })
    }

    /// Label of a fragment, bound or not.
    pub fn label(&self, id: FragmentId) -> DynamicLabel {
        self.labels.resolve(id)
    }

    /// Address of a runtime hook.
    pub fn hook(&self, kind: HookKind) -> Result<*const u8, JitError> {
        self.hooks.require(kind)
    }

    /// Current offset in the code buffer.
    pub fn offset(&self) -> AssemblyOffset {
        self.ops.offset()
    }

    /// Run every emitter in table order, binding each fragment's label
    /// immediately before its body.
    pub fn emit_all(&mut self) -> Result<(), JitError> {
        let _span = tracing::trace_span!("emit_global_fragments").entered();
        for &(id, emit) in EMITTERS {
            let start = self.labels.bind(&mut self.ops, id)?;
            emit(self)?;
            tracing::debug!(
                fragment = id.name(),
                offset = start.0,
                size = self.ops.offset().0 - start.0,
                "emitted global fragment"
            );
        }
        Ok(())
    }

    /// Release the assembler and labels for finalization.
    pub(crate) fn into_parts(self) -> (Assembler, FragmentLabels) {
        (self.ops, self.labels)
    }
}
