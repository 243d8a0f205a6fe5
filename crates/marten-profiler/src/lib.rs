//! # Marten Profiler
//!
//! Registration of generated machine-code ranges with external tooling:
//! interactive debuggers (the GDB JIT interface) and sampling profilers
//! (Linux `perf` map files).

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod gdb;
pub mod perf_map;
pub mod range;

pub use gdb::GdbJitRegistrar;
pub use perf_map::PerfMapRegistrar;
pub use range::{CodeRange, NullRegistrar, RangeRegistrar, RecordingRegistrar, Registration};
