//! Lock-order verification around the main process lock.
//!
//! Both fragments are called from module code and preserve `rax`, so they
//! can be dropped between producing a result and consuming it.

use dynasmrt::DynasmApi;

use crate::assembler::GlobalAssembler;
use crate::global::JitError;
use crate::hooks::HookKind;
use crate::process::PROC_LOCK_MAIN;
use crate::registers::emit;
use crate::runtime_call::Update;

pub(super) fn emit_proc_lc_require(asm: &mut GlobalAssembler<'_>) -> Result<(), JitError> {
    emit_lock_check(asm, HookKind::LockRequire)
}

pub(super) fn emit_proc_lc_unrequire(asm: &mut GlobalAssembler<'_>) -> Result<(), JitError> {
    emit_lock_check(asm, HookKind::LockUnrequire)
}

fn emit_lock_check(asm: &mut GlobalAssembler<'_>, kind: HookKind) -> Result<(), JitError> {
    let lock = PROC_LOCK_MAIN as i32;

    emit!(asm.ops
        ; push rax
    );
    asm.in_runtime(Update::NONE, |asm| {
        emit!(asm.ops
            ; mov rdi, c_p
            ; mov esi, lock
        );
        asm.runtime_call::<2>(kind)
    })?;
    emit!(asm.ops
        ; pop rax
        ; ret
    );
    Ok(())
}
