//! The `handle_error` family.
//!
//! ```text
//! handle_error ────────────────┐
//! handle_error_shared_prologue ┼──> handle_error_shared ──> ud2 (bad address)
//! error_action_code ───────────┘            │
//!                                           ├──> do_schedule (no continuation)
//!                                           └──> continuation
//! ```
//!
//! On entry to `handle_error_shared`, `ARG2` holds the error address and
//! `ARG4` the function identity pointer (both may be null).

use dynasmrt::{DynasmApi, DynasmLabelApi};

use super::FragmentId;
use crate::assembler::GlobalAssembler;
use crate::global::JitError;
use crate::hooks::HookKind;
use crate::registers::{ArgReg, STACK_MODE, StackMode, emit};
use crate::runtime_call::Update;

pub(super) fn emit_handle_error(asm: &mut GlobalAssembler<'_>) -> Result<(), JitError> {
    let shared = asm.label(FragmentId::HandleErrorShared);
    match STACK_MODE {
        StackMode::Shared => emit!(asm.ops ; pop rsi),
        StackMode::Dedicated => emit!(asm.ops ; mov rsi, [rsp]),
    }
    emit!(asm.ops
        ; jmp =>shared
    );
    Ok(())
}

/// Entered by `call` from module code; the return address may carry tag
/// bits and is cleaned before use.
pub(super) fn emit_handle_error_shared_prologue(
    asm: &mut GlobalAssembler<'_>,
) -> Result<(), JitError> {
    let shared = asm.label(FragmentId::HandleErrorShared);
    emit!(asm.ops
        ; pop rsi
        ; and rsi, -8
    );
    if STACK_MODE == StackMode::Dedicated {
        emit!(asm.ops ; push rsi);
    }
    emit!(asm.ops
        ; jmp =>shared
    );
    Ok(())
}

pub(super) fn emit_handle_error_shared(asm: &mut GlobalAssembler<'_>) -> Result<(), JitError> {
    let do_schedule = asm.label(FragmentId::DoSchedule);

    // A misaligned error address means the caller is corrupt.
    emit!(asm.ops
        ; test esi, 7
        ; jnz >crash
    );

    asm.in_runtime(Update::STACK | Update::HEAP, |asm| {
        emit!(asm.ops
            ; mov rdi, c_p
        );
        asm.load_x_reg_array(ArgReg::Arg3);
        asm.runtime_call::<4>(HookKind::HandleError)
    })?;

    emit!(asm.ops
        ; test rax, rax
        ; jz =>do_schedule
        ; jmp rax
        ; crash:
        ; ud2
    );
    Ok(())
}

pub(super) fn emit_error_action_code(asm: &mut GlobalAssembler<'_>) -> Result<(), JitError> {
    let shared = asm.label(FragmentId::HandleErrorShared);
    emit!(asm.ops
        ; xor esi, esi
        ; xor ecx, ecx
        ; jmp =>shared
    );
    Ok(())
}
