//! The global fragments and their emitters.
//!
//! Each fragment is a short routine shared by all compiled module code.
//! Fragments are emitted back to back into one buffer in [`FragmentId::ALL`]
//! order; [`EMITTERS`] pairs every identity with the function that writes
//! its body.

mod call_error;
mod errors;
mod gc;
#[cfg(feature = "lock-check")]
mod lock_check;
mod scheduler;

use crate::assembler::GlobalAssembler;
use crate::global::JitError;

/// Identity of a global fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum FragmentId {
    /// Native entry into managed code.
    ProcessMain,
    /// Hands the process back to the scheduler.
    DoSchedule,
    /// Error raised by a `call`; the return address is the error address.
    HandleError,
    /// Common error path; expects the error address in `ARG2`.
    HandleErrorShared,
    /// Like [`FragmentId::HandleError`] but masks the return address first.
    HandleErrorSharedPrologue,
    /// Error path with no error address and no function identity.
    ErrorActionCode,
    /// Collection requested by module code.
    GarbageCollect,
    /// Dispatch for call sites whose target is missing or instrumented.
    CallErrorHandlerShared,
    /// Breakpoint dispatch.
    GenericBpGlobal,
    /// Lock-order check before acquiring the main process lock.
    #[cfg(feature = "lock-check")]
    ProcLcRequire,
    /// Lock-order check after releasing the main process lock.
    #[cfg(feature = "lock-check")]
    ProcLcUnrequire,
}

impl FragmentId {
    /// Every fragment, in emission order.
    pub const ALL: &'static [FragmentId] = &[
        FragmentId::ProcessMain,
        FragmentId::DoSchedule,
        FragmentId::HandleError,
        FragmentId::HandleErrorShared,
        FragmentId::HandleErrorSharedPrologue,
        FragmentId::ErrorActionCode,
        FragmentId::GarbageCollect,
        FragmentId::CallErrorHandlerShared,
        FragmentId::GenericBpGlobal,
        #[cfg(feature = "lock-check")]
        FragmentId::ProcLcRequire,
        #[cfg(feature = "lock-check")]
        FragmentId::ProcLcUnrequire,
    ];

    /// Short name.
    pub fn name(self) -> &'static str {
        match self {
            FragmentId::ProcessMain => "process_main",
            FragmentId::DoSchedule => "do_schedule",
            FragmentId::HandleError => "handle_error",
            FragmentId::HandleErrorShared => "handle_error_shared",
            FragmentId::HandleErrorSharedPrologue => "handle_error_shared_prologue",
            FragmentId::ErrorActionCode => "error_action_code",
            FragmentId::GarbageCollect => "garbage_collect",
            FragmentId::CallErrorHandlerShared => "call_error_handler_shared",
            FragmentId::GenericBpGlobal => "generic_bp_global",
            #[cfg(feature = "lock-check")]
            FragmentId::ProcLcRequire => "proc_lc_require",
            #[cfg(feature = "lock-check")]
            FragmentId::ProcLcUnrequire => "proc_lc_unrequire",
        }
    }

    /// Name published to debuggers and profilers.
    pub fn symbol_name(self) -> String {
        format!("global::{}", self.name())
    }
}

impl std::fmt::Display for FragmentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Number of fragments in this build.
pub const FRAGMENT_COUNT: usize = FragmentId::ALL.len();

/// Writes the body of one fragment. The label is already bound.
pub type EmitFn = fn(&mut GlobalAssembler<'_>) -> Result<(), JitError>;

/// Emitter of every fragment, in emission order.
pub const EMITTERS: &[(FragmentId, EmitFn)] = &[
    (FragmentId::ProcessMain, scheduler::emit_process_main),
    (FragmentId::DoSchedule, scheduler::emit_do_schedule),
    (FragmentId::HandleError, errors::emit_handle_error),
    (FragmentId::HandleErrorShared, errors::emit_handle_error_shared),
    (FragmentId::HandleErrorSharedPrologue, errors::emit_handle_error_shared_prologue),
    (FragmentId::ErrorActionCode, errors::emit_error_action_code),
    (FragmentId::GarbageCollect, gc::emit_garbage_collect),
    (FragmentId::CallErrorHandlerShared, call_error::emit_call_error_handler_shared),
    (FragmentId::GenericBpGlobal, call_error::emit_generic_bp_global),
    #[cfg(feature = "lock-check")]
    (FragmentId::ProcLcRequire, lock_check::emit_proc_lc_require),
    #[cfg(feature = "lock-check")]
    (FragmentId::ProcLcUnrequire, lock_check::emit_proc_lc_unrequire),
];
