use dynasmrt::DynasmApi;

use crate::assembler::GlobalAssembler;
use crate::global::JitError;
use crate::hooks::HookKind;
use crate::process::I_OFFSET;
use crate::registers::{ArgReg, emit};
use crate::runtime_call::Update;

/// Called (not jumped to) by module code that ran out of heap.
///
/// In: `ARG3` = desired heap top, `ARG4` = number of live X registers.
/// The return address is saved in `Process::i` so the collector can find
/// the live stack map for the call site.
pub(super) fn emit_garbage_collect(asm: &mut GlobalAssembler<'_>) -> Result<(), JitError> {
    emit!(asm.ops
        ; sub rdx, htop
        ; shr rdx, 3
        ; mov r8, rcx
        ; mov rax, [rsp]
        ; mov [c_p + I_OFFSET], rax
    );

    asm.in_runtime(Update::STACK | Update::HEAP, |asm| {
        emit!(asm.ops
            ; mov rdi, c_p
            ; mov rcx, fcalls
        );
        asm.load_x_reg_array(ArgReg::Arg2);
        asm.runtime_call::<5>(HookKind::GarbageCollect)?;
        emit!(asm.ops
            ; sub fcalls, rax
        );
        Ok(())
    })?;

    emit!(asm.ops
        ; ret
    );
    Ok(())
}
