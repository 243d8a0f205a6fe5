//! Register roles shared by every fragment and by module code.
//!
//! ```text
//! role        register   notes
//! ARG1..ARG6  rdi rsi rdx rcx r8 r9   System V integer arguments
//! RET         rax
//! XREGS       rbx        register-file base, callee-saved
//! E           r12 / rsp  managed stack (shared / dedicated mode)
//! C_P         r13        current process
//! FCALLS      r14        reduction budget
//! HTOP        r15        heap top
//! FRAME       rbp        native frame used to realign around calls
//! ```
//!
//! `XREGS`, `C_P`, `FCALLS` and `HTOP` sit in callee-saved registers, so
//! they survive native calls without being spilled.
//!
//! Emitters name the managed-state roles through [`emit!`], which declares
//! `xregs`, `e`, `c_p`, `fcalls` and `htop` as `dynasm` aliases for the
//! registers in [`Role::register`]. Argument registers keep their System V
//! names.

use dynasmrt::x64::Rq;

/// How the managed stack relates to the native stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackMode {
    /// The managed stack lives in its own register (`r12`); native code
    /// runs on `rsp` untouched.
    Shared,
    /// The managed stack *is* `rsp`; native calls must switch to the
    /// runtime stack recorded by `process_main`.
    Dedicated,
}

/// Stack mode selected at build time.
pub const STACK_MODE: StackMode = if cfg!(feature = "dedicated-managed-stack") {
    StackMode::Dedicated
} else {
    StackMode::Shared
};

/// `dynasm!` for x64 with the managed-state role aliases declared.
#[cfg(not(feature = "dedicated-managed-stack"))]
macro_rules! emit {
    ($ops:expr ; $($body:tt)*) => {
        ::dynasmrt::dynasm!($ops
            ; .arch x64
            ; .alias xregs, rbx
            ; .alias e, r12
            ; .alias c_p, r13
            ; .alias fcalls, r14
            ; .alias htop, r15
            ; $($body)*
        )
    };
}

/// `dynasm!` for x64 with the managed-state role aliases declared.
#[cfg(feature = "dedicated-managed-stack")]
macro_rules! emit {
    ($ops:expr ; $($body:tt)*) => {
        ::dynasmrt::dynasm!($ops
            ; .arch x64
            ; .alias xregs, rbx
            ; .alias e, rsp
            ; .alias c_p, r13
            ; .alias fcalls, r14
            ; .alias htop, r15
            ; $($body)*
        )
    };
}

pub(crate) use emit;

/// Abstract register roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// First integer argument.
    Arg1,
    /// Second integer argument.
    Arg2,
    /// Third integer argument.
    Arg3,
    /// Fourth integer argument.
    Arg4,
    /// Fifth integer argument.
    Arg5,
    /// Sixth integer argument.
    Arg6,
    /// Return value of native calls.
    Ret,
    /// Base of the register file.
    XRegs,
    /// Managed stack pointer.
    ManagedStack,
    /// Current process.
    Process,
    /// Reduction budget.
    Fcalls,
    /// Heap top.
    Htop,
    /// Native frame register.
    Frame,
}

impl Role {
    /// Physical register backing this role under [`STACK_MODE`].
    pub const fn register(self) -> Rq {
        match self {
            Role::Arg1 => Rq::RDI,
            Role::Arg2 => Rq::RSI,
            Role::Arg3 => Rq::RDX,
            Role::Arg4 => Rq::RCX,
            Role::Arg5 => Rq::R8,
            Role::Arg6 => Rq::R9,
            Role::Ret => Rq::RAX,
            Role::XRegs => Rq::RBX,
            Role::ManagedStack => match STACK_MODE {
                StackMode::Shared => Rq::R12,
                StackMode::Dedicated => Rq::RSP,
            },
            Role::Process => Rq::R13,
            Role::Fcalls => Rq::R14,
            Role::Htop => Rq::R15,
            Role::Frame => Rq::RBP,
        }
    }

    /// Register number as used by `dynasm`'s dynamic register operands.
    pub const fn code(self) -> u8 {
        self.register() as u8
    }
}

const fn is_callee_saved(reg: Rq) -> bool {
    matches!(reg, Rq::RBX | Rq::RBP | Rq::R12 | Rq::R13 | Rq::R14 | Rq::R15)
}

// Fragments keep these live across native calls without spilling them.
const _: () = assert!(is_callee_saved(Role::XRegs.register()));
const _: () = assert!(is_callee_saved(Role::Process.register()));
const _: () = assert!(is_callee_saved(Role::Fcalls.register()));
const _: () = assert!(is_callee_saved(Role::Htop.register()));
const _: () = assert!(is_callee_saved(Role::Frame.register()));

/// Argument registers, the valid destinations of
/// [`GlobalAssembler::load_x_reg_array`](crate::assembler::GlobalAssembler::load_x_reg_array).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgReg {
    /// `rdi`
    Arg1,
    /// `rsi`
    Arg2,
    /// `rdx`
    Arg3,
    /// `rcx`
    Arg4,
    /// `r8`
    Arg5,
    /// `r9`
    Arg6,
}

impl ArgReg {
    /// Role of this argument register.
    pub const fn role(self) -> Role {
        match self {
            ArgReg::Arg1 => Role::Arg1,
            ArgReg::Arg2 => Role::Arg2,
            ArgReg::Arg3 => Role::Arg3,
            ArgReg::Arg4 => Role::Arg4,
            ArgReg::Arg5 => Role::Arg5,
            ArgReg::Arg6 => Role::Arg6,
        }
    }
}

/// Maximum number of register arguments a runtime call may take.
pub const MAX_CALL_ARGS: usize = 6;

#[cfg(test)]
mod tests {
    use dynasmrt::x64::X64Relocation;
    use dynasmrt::{DynasmApi, VecAssembler, dynasm};

    use super::*;

    const ALL: [Role; 13] = [
        Role::Arg1,
        Role::Arg2,
        Role::Arg3,
        Role::Arg4,
        Role::Arg5,
        Role::Arg6,
        Role::Ret,
        Role::XRegs,
        Role::ManagedStack,
        Role::Process,
        Role::Fcalls,
        Role::Htop,
        Role::Frame,
    ];

    #[test]
    fn roles_map_to_distinct_registers() {
        for (i, a) in ALL.iter().enumerate() {
            for b in &ALL[i + 1..] {
                assert_ne!(a.register(), b.register(), "{a:?} and {b:?} share a register");
            }
        }
    }

    #[test]
    fn argument_registers_leave_managed_state_alone() {
        for role in [Role::Arg1, Role::Arg4, Role::Ret] {
            assert!(!is_callee_saved(role.register()));
        }
    }

    #[test]
    fn argument_registers_follow_system_v_order() {
        let expected = [Rq::RDI, Rq::RSI, Rq::RDX, Rq::RCX, Rq::R8, Rq::R9];
        let args = [
            ArgReg::Arg1,
            ArgReg::Arg2,
            ArgReg::Arg3,
            ArgReg::Arg4,
            ArgReg::Arg5,
            ArgReg::Arg6,
        ];
        for (arg, reg) in args.iter().zip(expected) {
            assert_eq!(arg.role().register(), reg);
        }
    }

    #[test]
    fn managed_stack_follows_stack_mode() {
        let reg = Role::ManagedStack.register();
        match STACK_MODE {
            StackMode::Shared => assert_eq!(reg, Rq::R12),
            StackMode::Dedicated => assert_eq!(reg, Rq::RSP),
        }
    }

    fn via_role(role: Role) -> Vec<u8> {
        let mut ops = VecAssembler::<X64Relocation>::new(0);
        dynasm!(ops ; .arch x64 ; mov rax, Rq(role.code()));
        ops.finalize().unwrap()
    }

    #[test]
    fn aliases_match_role_table() {
        let mut ops = VecAssembler::<X64Relocation>::new(0);
        emit!(ops ; mov rax, xregs);
        assert_eq!(ops.finalize().unwrap(), via_role(Role::XRegs));

        let mut ops = VecAssembler::<X64Relocation>::new(0);
        emit!(ops ; mov rax, e);
        assert_eq!(ops.finalize().unwrap(), via_role(Role::ManagedStack));

        let mut ops = VecAssembler::<X64Relocation>::new(0);
        emit!(ops ; mov rax, c_p);
        assert_eq!(ops.finalize().unwrap(), via_role(Role::Process));

        let mut ops = VecAssembler::<X64Relocation>::new(0);
        emit!(ops ; mov rax, fcalls);
        assert_eq!(ops.finalize().unwrap(), via_role(Role::Fcalls));

        let mut ops = VecAssembler::<X64Relocation>::new(0);
        emit!(ops ; mov rax, htop);
        assert_eq!(ops.finalize().unwrap(), via_role(Role::Htop));
    }
}
