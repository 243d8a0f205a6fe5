//! Native entry into managed code and the way back out.
//!
//! `process_main` is called from Rust as
//! `extern "C" fn(*mut Process, *mut RegisterFile)`. It keeps the native
//! frame it builds until `do_schedule` tears it down and returns to the
//! caller, so the two fragments must agree on the frame layout:
//!
//! ```text
//! [native_sp + 56]  return address into the caller
//! [native_sp + 8]   rbx rbp r12 r13 r14 r15 (pushed in this order)
//! [native_sp]       padding, keeps native_sp 16-byte aligned
//! ```

use dynasmrt::DynasmApi;

use crate::assembler::GlobalAssembler;
use crate::global::JitError;
use crate::process::{FCALLS_OFFSET, HTOP_OFFSET, I_OFFSET, NATIVE_SP_OFFSET, STOP_OFFSET};
use crate::registers::emit;

pub(super) fn emit_process_main(asm: &mut GlobalAssembler<'_>) -> Result<(), JitError> {
    emit!(asm.ops
        ; push rbx
        ; push rbp
        ; push r12
        ; push r13
        ; push r14
        ; push r15
        ; sub rsp, 8
        ; mov c_p, rdi
        ; mov xregs, rsi
        ; mov [c_p + NATIVE_SP_OFFSET], rsp
        ; mov htop, [c_p + HTOP_OFFSET]
        ; mov fcalls, [c_p + FCALLS_OFFSET]
        ; mov e, [c_p + STOP_OFFSET]
        ; jmp QWORD [c_p + I_OFFSET]
    );
    Ok(())
}

/// Writes the managed state back into the process and returns from the
/// `process_main` call that started this slice.
pub(super) fn emit_do_schedule(asm: &mut GlobalAssembler<'_>) -> Result<(), JitError> {
    emit!(asm.ops
        ; mov [c_p + STOP_OFFSET], e
        ; mov [c_p + HTOP_OFFSET], htop
        ; mov [c_p + FCALLS_OFFSET], fcalls
        ; mov rsp, [c_p + NATIVE_SP_OFFSET]
        ; add rsp, 8
        ; pop r15
        ; pop r14
        ; pop r13
        ; pop r12
        ; pop rbp
        ; pop rbx
        ; ret
    );
    Ok(())
}
