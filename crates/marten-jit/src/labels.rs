//! One forward-declared label per global fragment.

use dynasmrt::x64::{Assembler, X64Relocation};
use dynasmrt::{AssemblyOffset, DynamicLabel, DynasmLabelApi, VecAssembler};

use crate::fragments::{FRAGMENT_COUNT, FragmentId};
use crate::global::JitError;

/// Assemblers that can allocate fresh dynamic labels.
///
/// `dynasmrt` only offers `new_dynamic_label` as an inherent method, so
/// code generic over the assembler goes through this trait.
pub trait LabelAlloc: DynasmLabelApi<Relocation = X64Relocation> {
    /// A new, unbound dynamic label.
    fn new_label(&mut self) -> DynamicLabel;
}

impl LabelAlloc for Assembler {
    fn new_label(&mut self) -> DynamicLabel {
        self.new_dynamic_label()
    }
}

impl LabelAlloc for VecAssembler<X64Relocation> {
    fn new_label(&mut self) -> DynamicLabel {
        self.new_dynamic_label()
    }
}

/// Labels for every [`FragmentId`], declared before any emitter runs so
/// that fragments can jump to each other regardless of emission order.
#[derive(Debug)]
pub struct FragmentLabels {
    labels: [DynamicLabel; FRAGMENT_COUNT],
    starts: [Option<AssemblyOffset>; FRAGMENT_COUNT],
}

impl FragmentLabels {
    /// Declare one label per fragment on `ops`.
    pub fn declare<A: LabelAlloc>(ops: &mut A) -> Self {
        Self {
            labels: std::array::from_fn(|_| ops.new_label()),
            starts: [None; FRAGMENT_COUNT],
        }
    }

    /// Label of `id`. Valid before and after the fragment is bound.
    pub fn resolve(&self, id: FragmentId) -> DynamicLabel {
        self.labels[id as usize]
    }

    /// Bind the label of `id` at the current offset of `ops`.
    pub fn bind<A>(&mut self, ops: &mut A, id: FragmentId) -> Result<AssemblyOffset, JitError>
    where
        A: DynasmLabelApi<Relocation = X64Relocation>,
    {
        let slot = &mut self.starts[id as usize];
        if slot.is_some() {
            return Err(JitError::LabelRebound(id));
        }
        let offset = ops.offset();
        ops.dynamic_label(self.labels[id as usize]);
        *slot = Some(offset);
        Ok(offset)
    }

    /// Start offset of `id`, if bound.
    pub fn start(&self, id: FragmentId) -> Option<AssemblyOffset> {
        self.starts[id as usize]
    }

    /// Start offsets of every fragment, failing on the first unbound one.
    pub fn bound_offsets(&self) -> Result<[AssemblyOffset; FRAGMENT_COUNT], JitError> {
        let mut offsets = [AssemblyOffset(0); FRAGMENT_COUNT];
        for &id in FragmentId::ALL {
            offsets[id as usize] = self.start(id).ok_or(JitError::UnboundFragment(id))?;
        }
        Ok(offsets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dynasmrt::{DynasmApi, dynasm};

    #[test]
    fn every_fragment_gets_a_distinct_label() {
        let mut ops = VecAssembler::<X64Relocation>::new(0);
        let labels = FragmentLabels::declare(&mut ops);
        for (i, &a) in FragmentId::ALL.iter().enumerate() {
            for &b in &FragmentId::ALL[i + 1..] {
                assert_ne!(labels.resolve(a), labels.resolve(b));
            }
        }
    }

    #[test]
    fn both_assemblers_allocate_labels() {
        let mut ops = Assembler::new().unwrap();
        let a = ops.new_label();
        let b = ops.new_label();
        assert_ne!(a, b);

        let mut ops = VecAssembler::<X64Relocation>::new(0);
        let labels = FragmentLabels::declare(&mut ops);
        let extra = ops.new_label();
        for &id in FragmentId::ALL {
            assert_ne!(labels.resolve(id), extra);
        }
    }

    #[test]
    fn bind_records_current_offset() {
        let mut ops = VecAssembler::<X64Relocation>::new(0);
        let mut labels = FragmentLabels::declare(&mut ops);
        dynasm!(ops ; .arch x64 ; nop ; nop);
        let offset = labels.bind(&mut ops, FragmentId::HandleError).unwrap();
        assert_eq!(offset, AssemblyOffset(2));
        assert_eq!(labels.start(FragmentId::HandleError), Some(AssemblyOffset(2)));
    }

    #[test]
    fn rebinding_is_rejected() {
        let mut ops = VecAssembler::<X64Relocation>::new(0);
        let mut labels = FragmentLabels::declare(&mut ops);
        labels.bind(&mut ops, FragmentId::DoSchedule).unwrap();
        assert!(matches!(
            labels.bind(&mut ops, FragmentId::DoSchedule),
            Err(JitError::LabelRebound(FragmentId::DoSchedule))
        ));
    }

    #[test]
    fn unbound_fragment_blocks_offsets() {
        let mut ops = VecAssembler::<X64Relocation>::new(0);
        let mut labels = FragmentLabels::declare(&mut ops);
        for &id in FragmentId::ALL {
            if id != FragmentId::GarbageCollect {
                labels.bind(&mut ops, id).unwrap();
            }
        }
        assert!(matches!(
            labels.bound_offsets(),
            Err(JitError::UnboundFragment(FragmentId::GarbageCollect))
        ));
    }

    #[test]
    fn forward_jump_resolves_after_bind() {
        let mut ops = VecAssembler::<X64Relocation>::new(0);
        let mut labels = FragmentLabels::declare(&mut ops);
        let target = labels.resolve(FragmentId::ErrorActionCode);
        dynasm!(ops ; .arch x64 ; jmp =>target);
        labels.bind(&mut ops, FragmentId::ErrorActionCode).unwrap();
        dynasm!(ops ; .arch x64 ; ret);

        let code = ops.finalize().unwrap();
        // jmp rel32 with displacement 0: straight into the next instruction.
        assert_eq!(code, vec![0xE9, 0, 0, 0, 0, 0xC3]);
    }
}
