//! Dispatch for call sites that cannot jump straight to their target.
//!
//! A module-side stub (see [`crate::call_site::emit_call_error_handler`])
//! enters `call_error_handler_shared` with `ARG1` pointing at its operand
//! block and `ARG2` at its own entry address.

use dynasmrt::{DynasmApi, DynasmLabelApi};

use super::FragmentId;
use crate::assembler::GlobalAssembler;
use crate::global::JitError;
use crate::hooks::HookKind;
use crate::markers::{CALL_ERROR_HANDLER, GENERIC_BREAKPOINT};
use crate::process::{FREASON_OFFSET, UNDEFINED_FUNCTION};
use crate::registers::{ArgReg, emit};
use crate::runtime_call::Update;

pub(super) fn emit_call_error_handler_shared(
    asm: &mut GlobalAssembler<'_>,
) -> Result<(), JitError> {
    let breakpoint = asm.label(FragmentId::GenericBpGlobal);
    let error_action = asm.label(FragmentId::ErrorActionCode);
    let bp_marker = GENERIC_BREAKPOINT as i32;
    let undef_marker = CALL_ERROR_HANDLER as i32;
    let reason = UNDEFINED_FUNCTION as i32;

    emit!(asm.ops
        ; mov rdx, [rdi]
        ; cmp rdx, bp_marker
        ; je =>breakpoint
        ; cmp rdx, undef_marker
        ; je >undefined
        // Redirected call site: the target is in the second word.
        ; mov rax, [rdi + 8]
        ; jmp rax
        ; undefined:
    );

    asm.in_runtime(Update::REDUCTIONS | Update::STACK | Update::HEAP, |asm| {
        emit!(asm.ops
            ; mov rcx, rsi
            ; mov rdi, c_p
        );
        asm.load_x_reg_array(ArgReg::Arg2);
        emit!(asm.ops
            ; mov edx, reason
        );
        asm.runtime_call::<4>(HookKind::ResolveUndefined)
    })?;

    emit!(asm.ops
        ; test rax, rax
        ; jz >missing
        ; jmp rax
        ; missing:
        ; mov QWORD [c_p + FREASON_OFFSET], reason
        ; jmp =>error_action
    );
    Ok(())
}

/// `ARG1` points at the operand block of the instrumented call site.
pub(super) fn emit_generic_bp_global(asm: &mut GlobalAssembler<'_>) -> Result<(), JitError> {
    let error_action = asm.label(FragmentId::ErrorActionCode);

    asm.in_runtime(Update::REDUCTIONS | Update::STACK | Update::HEAP, |asm| {
        emit!(asm.ops
            ; mov rsi, rdi
            ; mov rdi, c_p
        );
        asm.load_x_reg_array(ArgReg::Arg3);
        asm.runtime_call::<3>(HookKind::GenericBreakpoint)
    })?;

    emit!(asm.ops
        ; test rax, rax
        ; jz =>error_action
        ; jmp rax
    );
    Ok(())
}
