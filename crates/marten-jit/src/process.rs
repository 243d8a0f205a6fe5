//! Logical-process and register-file layout seen by the fragments.
//!
//! Only the fields the fragments touch are modelled. Field offsets are
//! baked into the machine code, so both structs are `#[repr(C)]` and the
//! offsets are exported as `i32` constants for `dynasm!` displacements.

use std::ffi::c_void;
use std::mem::offset_of;

/// A tagged machine word.
pub type Term = u64;

/// Number of argument ("X") registers.
pub const MAX_REG: usize = 1024;

/// Bytes per machine word.
pub const WORD_SIZE: u64 = 8;
/// `log2(WORD_SIZE)`.
pub const WORD_SHIFT: u32 = 3;

/// Low bits that must be clear in a valid continuation address.
pub const CP_MASK: u64 = 7;

/// Failure reason stored in [`Process::freason`] when a called function
/// does not exist.
pub const UNDEFINED_FUNCTION: u64 = 0x4_0B;

/// Identifier of the main process lock, passed to the lock-check hooks.
pub const PROC_LOCK_MAIN: u64 = 1;

/// The argument register file. `process_main` receives its address and
/// keeps it in the `XREGS` role for the life of the process slice.
#[repr(C)]
#[derive(Debug)]
pub struct RegisterFile {
    /// Register contents.
    pub x: [Term; MAX_REG],
}

impl RegisterFile {
    /// A zeroed register file, boxed (it is 8 KiB).
    pub fn boxed() -> Box<Self> {
        Box::new(Self { x: [0; MAX_REG] })
    }
}

/// Module/function/arity triple identifying the function an error was
/// raised from. Passed by pointer in `ARG4`; may be null.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FunctionIdentity {
    /// Module atom.
    pub module: Term,
    /// Function atom.
    pub function: Term,
    /// Arity.
    pub arity: u64,
}

/// Execution state of one logical process.
#[repr(C)]
#[derive(Debug)]
pub struct Process {
    /// Heap top while the process is not running managed code.
    pub htop: *mut Term,
    /// Managed stack pointer while the process is not running managed code.
    pub stop: *mut Term,
    /// Remaining reductions.
    pub fcalls: i64,
    /// Instruction pointer: where `process_main` resumes, and the return
    /// address saved by `garbage_collect`.
    pub i: *const u8,
    /// Failure reason of the last error.
    pub freason: u64,
    /// Native stack pointer recorded by `process_main`.
    pub native_sp: *mut u8,
    /// Opaque pointer owned by the embedding runtime.
    pub host: *mut c_void,
}

impl Default for Process {
    fn default() -> Self {
        Self {
            htop: std::ptr::null_mut(),
            stop: std::ptr::null_mut(),
            fcalls: 0,
            i: std::ptr::null(),
            freason: 0,
            native_sp: std::ptr::null_mut(),
            host: std::ptr::null_mut(),
        }
    }
}

/// Offset of [`Process::htop`].
pub const HTOP_OFFSET: i32 = offset_of!(Process, htop) as i32;
/// Offset of [`Process::stop`].
pub const STOP_OFFSET: i32 = offset_of!(Process, stop) as i32;
/// Offset of [`Process::fcalls`].
pub const FCALLS_OFFSET: i32 = offset_of!(Process, fcalls) as i32;
/// Offset of [`Process::i`].
pub const I_OFFSET: i32 = offset_of!(Process, i) as i32;
/// Offset of [`Process::freason`].
pub const FREASON_OFFSET: i32 = offset_of!(Process, freason) as i32;
/// Offset of [`Process::native_sp`].
pub const NATIVE_SP_OFFSET: i32 = offset_of!(Process, native_sp) as i32;

// The fragments encode these as sign-extended 32-bit immediates.
const _: () = assert!(UNDEFINED_FUNCTION <= i32::MAX as u64);
const _: () = assert!(PROC_LOCK_MAIN <= i32::MAX as u64);
const _: () = assert!(1 << WORD_SHIFT == WORD_SIZE);

/// Whether `address` may be handed to the error handler.
///
/// Null means "no continuation"; anything else must be word aligned.
#[inline]
pub const fn is_valid_error_address(address: u64) -> bool {
    address == 0 || address & CP_MASK == 0
}

/// Clear the low tag bits of a raw return address, as the
/// `handle_error_shared_prologue` fragment does.
#[inline]
pub const fn normalize_return_address(address: u64) -> u64 {
    address & !CP_MASK
}

/// Words requested from the collector when code wants the heap top to
/// reach `desired` but it currently is `current`.
#[inline]
pub const fn words_needed(desired: u64, current: u64) -> u64 {
    desired.wrapping_sub(current) >> WORD_SHIFT
}

/// Reduction budget after a collection that consumed `consumed`.
#[inline]
pub const fn fuel_after_collection(fuel: i64, consumed: i64) -> i64 {
    fuel.wrapping_sub(consumed)
}
