//! Native runtime hooks called from the global fragments.
//!
//! The fragments never link against the runtime directly. The embedder
//! fills a [`RuntimeHooks`] table with `extern "C"` function pointers and
//! the emitters bake those addresses into the code as absolute immediates.
//!
//! # ABI
//!
//! Every hook takes the current process as its first argument. Pointer
//! results are continuation addresses; null means "no continuation".

use crate::global::JitError;
use crate::process::{FunctionIdentity, Process, RegisterFile};

/// `(process, error_address, xregs, identity) -> resume_address`
pub type HandleErrorFn = unsafe extern "C" fn(
    *mut Process,
    usize,
    *mut RegisterFile,
    *const FunctionIdentity,
) -> *const u8;

/// `(process, xregs, words_needed, fuel, live) -> fuel_consumed`
pub type GarbageCollectFn =
    unsafe extern "C" fn(*mut Process, *mut RegisterFile, u64, i64, u64) -> i64;

/// `(process, xregs, reason, call_site) -> target`
pub type ResolveUndefinedFn =
    unsafe extern "C" fn(*mut Process, *mut RegisterFile, u64, *const u8) -> *const u8;

/// `(process, op_block, xregs) -> resume_address`
pub type BreakpointFn =
    unsafe extern "C" fn(*mut Process, *const u64, *mut RegisterFile) -> *const u8;

/// `(process, lock)`
pub type LockCheckFn = unsafe extern "C" fn(*mut Process, u64);

/// Identifies a runtime hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum HookKind {
    /// Error dispatch, see [`HandleErrorFn`].
    HandleError,
    /// Collection, see [`GarbageCollectFn`].
    GarbageCollect,
    /// Missing-function resolution, see [`ResolveUndefinedFn`].
    ResolveUndefined,
    /// Breakpoint dispatch, see [`BreakpointFn`].
    GenericBreakpoint,
    /// Lock-order check on acquire, see [`LockCheckFn`].
    #[cfg(feature = "lock-check")]
    LockRequire,
    /// Lock-order check on release, see [`LockCheckFn`].
    #[cfg(feature = "lock-check")]
    LockUnrequire,
}

impl HookKind {
    /// Every hook, in slot order.
    pub const ALL: &'static [HookKind] = &[
        HookKind::HandleError,
        HookKind::GarbageCollect,
        HookKind::ResolveUndefined,
        HookKind::GenericBreakpoint,
        #[cfg(feature = "lock-check")]
        HookKind::LockRequire,
        #[cfg(feature = "lock-check")]
        HookKind::LockUnrequire,
    ];

    /// Symbol name used in logs and disassembly annotations.
    pub fn symbol_name(self) -> &'static str {
        match self {
            HookKind::HandleError => "marten_handle_error",
            HookKind::GarbageCollect => "marten_garbage_collect",
            HookKind::ResolveUndefined => "marten_resolve_undefined",
            HookKind::GenericBreakpoint => "marten_generic_breakpoint",
            #[cfg(feature = "lock-check")]
            HookKind::LockRequire => "marten_lc_require",
            #[cfg(feature = "lock-check")]
            HookKind::LockUnrequire => "marten_lc_unrequire",
        }
    }

    /// Number of register arguments the fragment passes.
    pub fn param_count(self) -> usize {
        match self {
            HookKind::HandleError => 4,
            HookKind::GarbageCollect => 5,
            HookKind::ResolveUndefined => 4,
            HookKind::GenericBreakpoint => 3,
            #[cfg(feature = "lock-check")]
            HookKind::LockRequire | HookKind::LockUnrequire => 2,
        }
    }
}

/// Number of hook slots.
pub const HOOK_COUNT: usize = HookKind::ALL.len();

/// Table of runtime hook pointers, indexed by [`HookKind`].
#[derive(Clone)]
pub struct RuntimeHooks {
    ptrs: [Option<*const u8>; HOOK_COUNT],
}

// SAFETY: the table only stores addresses of `extern "C"` functions.
unsafe impl Send for RuntimeHooks {}
unsafe impl Sync for RuntimeHooks {}

impl Default for RuntimeHooks {
    fn default() -> Self {
        Self {
            ptrs: [None; HOOK_COUNT],
        }
    }
}

impl std::fmt::Debug for RuntimeHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut map = f.debug_map();
        for &kind in HookKind::ALL {
            map.entry(&kind, &self.get(kind));
        }
        map.finish()
    }
}

impl RuntimeHooks {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a hook from a raw pointer.
    ///
    /// # Safety
    ///
    /// `ptr` must be an `extern "C"` function with the signature documented
    /// for `kind`.
    pub unsafe fn set(&mut self, kind: HookKind, ptr: *const u8) {
        self.ptrs[kind as usize] = Some(ptr);
    }

    /// Get a hook pointer.
    pub fn get(&self, kind: HookKind) -> Option<*const u8> {
        self.ptrs[kind as usize]
    }

    /// Get a hook pointer or fail with [`JitError::MissingHook`].
    pub fn require(&self, kind: HookKind) -> Result<*const u8, JitError> {
        self.get(kind).ok_or(JitError::MissingHook(kind))
    }

    /// Set the error handler.
    pub fn with_handle_error(mut self, f: HandleErrorFn) -> Self {
        self.ptrs[HookKind::HandleError as usize] = Some(f as *const u8);
        self
    }

    /// Set the collector entry point.
    pub fn with_garbage_collect(mut self, f: GarbageCollectFn) -> Self {
        self.ptrs[HookKind::GarbageCollect as usize] = Some(f as *const u8);
        self
    }

    /// Set the missing-function resolver.
    pub fn with_resolve_undefined(mut self, f: ResolveUndefinedFn) -> Self {
        self.ptrs[HookKind::ResolveUndefined as usize] = Some(f as *const u8);
        self
    }

    /// Set the breakpoint handler.
    pub fn with_breakpoint(mut self, f: BreakpointFn) -> Self {
        self.ptrs[HookKind::GenericBreakpoint as usize] = Some(f as *const u8);
        self
    }

    /// Set both lock-check hooks.
    #[cfg(feature = "lock-check")]
    pub fn with_lock_check(mut self, require: LockCheckFn, unrequire: LockCheckFn) -> Self {
        self.ptrs[HookKind::LockRequire as usize] = Some(require as *const u8);
        self.ptrs[HookKind::LockUnrequire as usize] = Some(unrequire as *const u8);
        self
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    unsafe extern "C" fn handle_error(
        _: *mut Process,
        _: usize,
        _: *mut RegisterFile,
        _: *const FunctionIdentity,
    ) -> *const u8 {
        std::ptr::null()
    }

    unsafe extern "C" fn garbage_collect(
        _: *mut Process,
        _: *mut RegisterFile,
        _: u64,
        _: i64,
        _: u64,
    ) -> i64 {
        0
    }

    unsafe extern "C" fn resolve(
        _: *mut Process,
        _: *mut RegisterFile,
        _: u64,
        _: *const u8,
    ) -> *const u8 {
        std::ptr::null()
    }

    unsafe extern "C" fn breakpoint(
        _: *mut Process,
        _: *const u64,
        _: *mut RegisterFile,
    ) -> *const u8 {
        std::ptr::null()
    }

    #[cfg(feature = "lock-check")]
    unsafe extern "C" fn lock_check(_: *mut Process, _: u64) {}

    /// A complete table of no-op hooks, for code-shape tests.
    pub(crate) fn noop_hooks() -> RuntimeHooks {
        let hooks = RuntimeHooks::new()
            .with_handle_error(handle_error)
            .with_garbage_collect(garbage_collect)
            .with_resolve_undefined(resolve)
            .with_breakpoint(breakpoint);
        #[cfg(feature = "lock-check")]
        let hooks = hooks.with_lock_check(lock_check, lock_check);
        hooks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_follow_declaration_order() {
        for (i, &kind) in HookKind::ALL.iter().enumerate() {
            assert_eq!(kind as usize, i);
        }
    }

    #[test]
    fn empty_table_reports_missing_hook() {
        let hooks = RuntimeHooks::new();
        assert!(matches!(
            hooks.require(HookKind::GarbageCollect),
            Err(JitError::MissingHook(HookKind::GarbageCollect))
        ));
    }

    #[test]
    fn builders_fill_every_slot() {
        let hooks = test_support::noop_hooks();
        for &kind in HookKind::ALL {
            assert!(hooks.require(kind).is_ok(), "{} missing", kind.symbol_name());
        }
    }

    #[test]
    fn raw_set_overrides_slot() {
        let mut hooks = RuntimeHooks::new();
        let marker = 0x1000 as *const u8;
        // SAFETY: the table is never used to emit code in this test.
        unsafe { hooks.set(HookKind::HandleError, marker) };
        assert_eq!(hooks.get(HookKind::HandleError), Some(marker));
        assert_eq!(hooks.get(HookKind::GenericBreakpoint), None);
    }

    #[test]
    fn param_counts_fit_in_registers() {
        for &kind in HookKind::ALL {
            assert!(kind.param_count() <= crate::registers::MAX_CALL_ARGS);
        }
    }
}
