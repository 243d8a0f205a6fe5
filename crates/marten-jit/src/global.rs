//! Building, publishing and looking up the global fragments.

use std::sync::OnceLock;

use dynasmrt::{AssemblyOffset, DynasmError, ExecutableBuffer};
use marten_profiler::{CodeRange, RangeRegistrar};
use parking_lot::Mutex;

use crate::assembler::GlobalAssembler;
use crate::config::GlobalConfig;
use crate::fragments::{FRAGMENT_COUNT, FragmentId};
use crate::hooks::{HookKind, RuntimeHooks};
use crate::process::{Process, RegisterFile};

/// Group name under which the fragments are registered.
pub const RANGE_GROUP: &str = "global";

/// Errors produced while generating the global fragments.
#[derive(Debug, thiserror::Error)]
pub enum JitError {
    /// Executable memory could not be allocated.
    #[error("failed to allocate executable memory: {0}")]
    Alloc(#[from] std::io::Error),

    /// The assembler rejected the generated code.
    #[error("assembler error: {0:?}")]
    Assembler(DynasmError),

    /// The executable buffer could not be finalized.
    #[error("executable buffer is still in use")]
    Finalize,

    /// An emitter needs a hook the table does not provide.
    #[error("runtime hook `{}` is not set", .0.symbol_name())]
    MissingHook(HookKind),

    /// An emitter passes a hook the wrong number of arguments.
    #[error("runtime hook `{}` takes {} arguments, {passed} passed", .hook.symbol_name(), .hook.param_count())]
    HookArity {
        /// The hook being called.
        hook: HookKind,
        /// Argument registers the emitter loaded.
        passed: usize,
    },

    /// A fragment label was never bound by its emitter.
    #[error("fragment `{0}` was never emitted")]
    UnboundFragment(FragmentId),

    /// A fragment label was bound twice.
    #[error("fragment `{0}` was emitted twice")]
    LabelRebound(FragmentId),

    /// [`init_global`] was called more than once.
    #[error("global fragments are already initialized")]
    AlreadyInitialized,
}

impl From<DynasmError> for JitError {
    fn from(value: DynasmError) -> Self {
        Self::Assembler(value)
    }
}

/// Native address of a fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentEntry(*const u8);

// SAFETY: entries point into an immutable executable buffer.
unsafe impl Send for FragmentEntry {}
unsafe impl Sync for FragmentEntry {}

impl FragmentEntry {
    /// Raw code pointer.
    pub fn as_ptr(self) -> *const u8 {
        self.0
    }

    /// Address as an integer.
    pub fn addr(self) -> usize {
        self.0 as usize
    }
}

/// Native signature of `process_main`.
pub type ProcessMainFn = unsafe extern "C" fn(*mut Process, *mut RegisterFile);

/// The finished, executable global fragments.
///
/// Entry pointers only exist on this value, so nothing can observe them
/// before the code is final and registered.
pub struct GlobalFragments {
    buffer: ExecutableBuffer,
    offsets: [AssemblyOffset; FRAGMENT_COUNT],
    entries: [FragmentEntry; FRAGMENT_COUNT],
}

impl std::fmt::Debug for GlobalFragments {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GlobalFragments")
            .field("base", &self.buffer.ptr(AssemblyOffset(0)))
            .field("size", &self.buffer.len())
            .field("fragments", &FRAGMENT_COUNT)
            .finish()
    }
}

impl GlobalFragments {
    /// Generate the fragments, registering them with the tools selected by
    /// [`GlobalConfig::from_env`].
    pub fn new(hooks: &RuntimeHooks) -> Result<Self, JitError> {
        let config = GlobalConfig::from_env();
        Self::with_registrars(hooks, &*config.debugger(), &*config.profiler())
    }

    /// Generate the fragments with explicit registrars.
    pub fn with_registrars(
        hooks: &RuntimeHooks,
        debugger: &dyn RangeRegistrar,
        profiler: &dyn RangeRegistrar,
    ) -> Result<Self, JitError> {
        let mut asm = GlobalAssembler::new(hooks)?;
        asm.emit_all()?;

        let (mut ops, labels) = asm.into_parts();
        let offsets = labels.bound_offsets()?;
        ops.commit()?;
        let buffer = ops.finalize().map_err(|_| JitError::Finalize)?;

        let ranges = compute_ranges(&buffer, &offsets);
        debugger.register_ranges(RANGE_GROUP, &ranges);
        profiler.register_ranges(RANGE_GROUP, &ranges);

        let entries = offsets.map(|offset| FragmentEntry(buffer.ptr(offset)));
        tracing::info!(
            base = ?buffer.ptr(AssemblyOffset(0)),
            size = buffer.len(),
            fragments = FRAGMENT_COUNT,
            "global fragments ready"
        );

        Ok(Self {
            buffer,
            offsets,
            entries,
        })
    }

    /// Entry address of a fragment.
    pub fn entry(&self, id: FragmentId) -> FragmentEntry {
        self.entries[id as usize]
    }

    /// Named code ranges, one per fragment, in emission order.
    pub fn ranges(&self) -> Vec<CodeRange> {
        compute_ranges(&self.buffer, &self.offsets)
    }

    /// The whole code buffer.
    pub fn code(&self) -> &[u8] {
        &self.buffer
    }

    /// Machine code of one fragment.
    pub fn fragment_code(&self, id: FragmentId) -> &[u8] {
        let (start, stop) = span(&self.buffer, &self.offsets, id as usize);
        &self.buffer[start..stop]
    }

    /// `process_main` as a callable function.
    ///
    /// The pointer is valid for as long as `self` is alive.
    pub fn process_main(&self) -> ProcessMainFn {
        let entry = self.entry(FragmentId::ProcessMain).as_ptr();
        // SAFETY: `process_main` is emitted with exactly this signature.
        unsafe { std::mem::transmute::<*const u8, ProcessMainFn>(entry) }
    }
}

fn span(buffer: &ExecutableBuffer, offsets: &[AssemblyOffset], index: usize) -> (usize, usize) {
    let start = offsets[index].0;
    let stop = offsets.get(index + 1).map_or(buffer.len(), |next| next.0);
    (start, stop)
}

fn compute_ranges(buffer: &ExecutableBuffer, offsets: &[AssemblyOffset]) -> Vec<CodeRange> {
    let base = buffer.ptr(AssemblyOffset(0)) as usize;
    FragmentId::ALL
        .iter()
        .map(|&id| {
            let (start, stop) = span(buffer, offsets, id as usize);
            CodeRange::new(id.symbol_name(), base + start, base + stop)
        })
        .collect()
}

static GLOBAL: OnceLock<GlobalFragments> = OnceLock::new();

// Held while generating, so ranges are registered by one caller only.
static INIT_LOCK: Mutex<()> = Mutex::new(());

/// Generate the process-wide fragments. Fails with
/// [`JitError::AlreadyInitialized`] if they already exist.
///
/// Concurrent callers are serialized: exactly one generates and registers
/// the fragments, the others get [`JitError::AlreadyInitialized`] and find
/// the same instance through [`global`].
pub fn init_global(hooks: &RuntimeHooks) -> Result<&'static GlobalFragments, JitError> {
    let _guard = INIT_LOCK.lock();
    if GLOBAL.get().is_some() {
        return Err(JitError::AlreadyInitialized);
    }
    let fragments = GlobalFragments::new(hooks)?;
    Ok(GLOBAL.get_or_init(|| fragments))
}

/// The process-wide fragments, if [`init_global`] has run.
pub fn global() -> Option<&'static GlobalFragments> {
    GLOBAL.get()
}
