//! GDB JIT compilation interface.
//!
//! GDB places a breakpoint on [`__jit_debug_register_code`] and walks the
//! linked list rooted at [`__jit_debug_descriptor`] whenever it fires. Each
//! entry points at an in-memory symbol file; a debugger-side reader plugin
//! decodes it. Our symbol file is a compact binary table of named ranges:
//!
//! ```text
//! magic "MRTN" | version u32 | group len u32 | group bytes | count u32 |
//! count * (start u64 | stop u64 | name len u32 | name bytes)
//! ```
//!
//! All integers are little-endian.

use parking_lot::Mutex;

use crate::range::{CodeRange, RangeRegistrar};

/// Symbol file magic.
pub const SYMFILE_MAGIC: [u8; 4] = *b"MRTN";
/// Symbol file format version.
pub const SYMFILE_VERSION: u32 = 1;

const JIT_NOACTION: u32 = 0;
const JIT_REGISTER_FN: u32 = 1;

/// One node in the debugger-visible list.
#[repr(C)]
#[derive(Debug)]
pub struct JitCodeEntry {
    next_entry: *mut JitCodeEntry,
    prev_entry: *mut JitCodeEntry,
    symfile_addr: *const u8,
    symfile_size: u64,
}

/// Root of the debugger-visible list.
#[repr(C)]
#[derive(Debug)]
pub struct JitDescriptor {
    version: u32,
    action_flag: u32,
    relevant_entry: *mut JitCodeEntry,
    first_entry: *mut JitCodeEntry,
}

/// Read by GDB on every registration. The symbol name is fixed by GDB.
#[allow(non_upper_case_globals)]
#[unsafe(no_mangle)]
pub static mut __jit_debug_descriptor: JitDescriptor = JitDescriptor {
    version: 1,
    action_flag: JIT_NOACTION,
    relevant_entry: std::ptr::null_mut(),
    first_entry: std::ptr::null_mut(),
};

/// GDB sets a breakpoint here. Must not be inlined or optimized away.
#[unsafe(no_mangle)]
#[inline(never)]
pub extern "C" fn __jit_debug_register_code() {
    std::hint::black_box(());
}

// Guards every mutation of `__jit_debug_descriptor`.
static DESCRIPTOR_LOCK: Mutex<()> = Mutex::new(());

/// Registrar that publishes ranges through the GDB JIT interface.
///
/// Entries and their symbol files live for the rest of the process; the
/// debugger may read them at any time.
#[derive(Debug, Default, Clone, Copy)]
pub struct GdbJitRegistrar;

impl GdbJitRegistrar {
    /// Create a registrar.
    pub fn new() -> Self {
        Self
    }
}

impl RangeRegistrar for GdbJitRegistrar {
    fn register_ranges(&self, group: &str, ranges: &[CodeRange]) {
        let symfile: &'static [u8] = Box::leak(encode_symfile(group, ranges).into_boxed_slice());

        let _guard = DESCRIPTOR_LOCK.lock();
        // SAFETY: the descriptor is only mutated while holding
        // `DESCRIPTOR_LOCK`, and every entry is leaked so the list never
        // contains dangling pointers.
        unsafe {
            let descriptor = &raw mut __jit_debug_descriptor;
            let head = (*descriptor).first_entry;
            let entry = Box::into_raw(Box::new(JitCodeEntry {
                next_entry: head,
                prev_entry: std::ptr::null_mut(),
                symfile_addr: symfile.as_ptr(),
                symfile_size: symfile.len() as u64,
            }));
            if !head.is_null() {
                (*head).prev_entry = entry;
            }
            (*descriptor).first_entry = entry;
            (*descriptor).relevant_entry = entry;
            (*descriptor).action_flag = JIT_REGISTER_FN;
            __jit_debug_register_code();
            (*descriptor).action_flag = JIT_NOACTION;
        }

        tracing::debug!(group, count = ranges.len(), "registered ranges with debugger");
    }
}

/// Encode a symbol file for `ranges`.
pub fn encode_symfile(group: &str, ranges: &[CodeRange]) -> Vec<u8> {
    let mut out = Vec::with_capacity(16 + group.len() + ranges.len() * 32);
    out.extend_from_slice(&SYMFILE_MAGIC);
    out.extend_from_slice(&SYMFILE_VERSION.to_le_bytes());
    push_str(&mut out, group);
    out.extend_from_slice(&(ranges.len() as u32).to_le_bytes());
    for range in ranges {
        out.extend_from_slice(&(range.start as u64).to_le_bytes());
        out.extend_from_slice(&(range.stop as u64).to_le_bytes());
        push_str(&mut out, &range.name);
    }
    out
}

fn push_str(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(&(s.len() as u32).to_le_bytes());
    out.extend_from_slice(s.as_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_u32(bytes: &[u8], at: usize) -> u32 {
        u32::from_le_bytes(bytes[at..at + 4].try_into().unwrap())
    }

    fn read_u64(bytes: &[u8], at: usize) -> u64 {
        u64::from_le_bytes(bytes[at..at + 8].try_into().unwrap())
    }

    #[test]
    fn symfile_layout() {
        let bytes = encode_symfile("global", &[CodeRange::new("global::a", 0x100, 0x140)]);

        assert_eq!(&bytes[0..4], b"MRTN");
        assert_eq!(read_u32(&bytes, 4), SYMFILE_VERSION);
        assert_eq!(read_u32(&bytes, 8), 6);
        assert_eq!(&bytes[12..18], b"global");
        assert_eq!(read_u32(&bytes, 18), 1);
        assert_eq!(read_u64(&bytes, 22), 0x100);
        assert_eq!(read_u64(&bytes, 30), 0x140);
        assert_eq!(read_u32(&bytes, 38), 9);
        assert_eq!(&bytes[42..51], b"global::a");
        assert_eq!(bytes.len(), 51);
    }

    #[test]
    fn registration_links_a_new_head() {
        let registrar = GdbJitRegistrar::new();
        registrar.register_ranges("test", &[CodeRange::new("test::x", 0x10, 0x20)]);

        let _guard = DESCRIPTOR_LOCK.lock();
        // SAFETY: read under the descriptor lock; entries are never freed.
        unsafe {
            let descriptor = &raw const __jit_debug_descriptor;
            assert_eq!((*descriptor).version, 1);
            assert_eq!((*descriptor).action_flag, JIT_NOACTION);

            let head = (*descriptor).first_entry;
            assert!(!head.is_null());
            assert!((*head).prev_entry.is_null());

            let symfile =
                std::slice::from_raw_parts((*head).symfile_addr, (*head).symfile_size as usize);
            assert_eq!(&symfile[0..4], b"MRTN");
        }
    }
}
