//! Crossing from managed code into native runtime functions.
//!
//! Managed state lives in registers while managed code runs. Before a
//! native call the fragment spills the parts the callee may observe or
//! change into the process, and reloads them afterwards:
//!
//! ```text
//! enter_runtime(flags)      spill requested state (+ stack switch)
//! runtime_call::<N>(hook)   aligned call with N argument registers
//! leave_runtime(flags)      reload the same state
//! ```
//!
//! State that is not named in `flags` is undefined after the call.

use std::ops::BitOr;

use dynasmrt::DynasmApi;

use crate::assembler::GlobalAssembler;
use crate::global::JitError;
use crate::hooks::HookKind;
use crate::process::{FCALLS_OFFSET, HTOP_OFFSET, NATIVE_SP_OFFSET, STOP_OFFSET};
use crate::registers::{ArgReg, MAX_CALL_ARGS, STACK_MODE, StackMode, emit};

/// Which pieces of managed state cross a runtime call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Update(u8);

impl Update {
    /// Nothing is synchronized.
    pub const NONE: Update = Update(0);
    /// The managed stack pointer.
    pub const STACK: Update = Update(1 << 0);
    /// The heap top.
    pub const HEAP: Update = Update(1 << 1);
    /// The reduction budget.
    pub const REDUCTIONS: Update = Update(1 << 2);

    /// Whether every flag in `other` is set.
    pub const fn contains(self, other: Update) -> bool {
        self.0 & other.0 == other.0
    }

    /// Raw bits.
    pub const fn bits(self) -> u8 {
        self.0
    }
}

impl BitOr for Update {
    type Output = Update;

    fn bitor(self, rhs: Update) -> Update {
        Update(self.0 | rhs.0)
    }
}

impl GlobalAssembler<'_> {
    /// Spill the managed state named by `flags` into the process.
    ///
    /// With a dedicated managed stack this also switches `rsp` to the
    /// runtime stack, whatever the flags say.
    pub fn enter_runtime(&mut self, flags: Update) {
        if flags.contains(Update::HEAP) {
            emit!(self.ops ; mov [c_p + HTOP_OFFSET], htop);
        }
        if flags.contains(Update::REDUCTIONS) {
            emit!(self.ops ; mov [c_p + FCALLS_OFFSET], fcalls);
        }
        match STACK_MODE {
            StackMode::Dedicated => {
                emit!(self.ops
                    ; mov [c_p + STOP_OFFSET], e
                    ; mov rsp, [c_p + NATIVE_SP_OFFSET]
                );
            }
            StackMode::Shared => {
                if flags.contains(Update::STACK) {
                    emit!(self.ops ; mov [c_p + STOP_OFFSET], e);
                }
            }
        }
    }

    /// Reload the managed state named by `flags` from the process.
    pub fn leave_runtime(&mut self, flags: Update) {
        if STACK_MODE == StackMode::Dedicated || flags.contains(Update::STACK) {
            emit!(self.ops ; mov e, [c_p + STOP_OFFSET]);
        }
        if flags.contains(Update::REDUCTIONS) {
            emit!(self.ops ; mov fcalls, [c_p + FCALLS_OFFSET]);
        }
        if flags.contains(Update::HEAP) {
            emit!(self.ops ; mov htop, [c_p + HTOP_OFFSET]);
        }
    }

    /// `enter_runtime(flags)`, `body`, `leave_runtime(flags)`.
    pub fn in_runtime<F>(&mut self, flags: Update, body: F) -> Result<(), JitError>
    where
        F: FnOnce(&mut Self) -> Result<(), JitError>,
    {
        self.enter_runtime(flags);
        body(self)?;
        self.leave_runtime(flags);
        Ok(())
    }

    /// Call the runtime hook `kind` with `N` argument registers already
    /// loaded. `N` must match the hook's parameter count.
    ///
    /// The native stack is realigned to 16 bytes through `rbp`, so the
    /// call is correct whether the fragment was entered by `call` or `jmp`.
    /// The result is in `rax`.
    pub fn runtime_call<const N: usize>(&mut self, kind: HookKind) -> Result<(), JitError> {
        const { assert!(N <= MAX_CALL_ARGS) };
        if kind.param_count() != N {
            return Err(JitError::HookArity { hook: kind, passed: N });
        }
        let target = self.hook(kind)? as i64;
        emit!(self.ops
            ; push rbp
            ; mov rbp, rsp
            ; and rsp, -16
            ; mov rax, QWORD target
            ; call rax
            ; mov rsp, rbp
            ; pop rbp
        );
        Ok(())
    }

    /// Load the register-file base into `dest`.
    pub fn load_x_reg_array(&mut self, dest: ArgReg) {
        let dest = dest.role().code();
        emit!(self.ops ; mov Rq(dest), xregs);
    }
}
