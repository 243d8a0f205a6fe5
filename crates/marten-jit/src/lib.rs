//! # Marten JIT
//!
//! Shared machine-code fragments for the Marten baseline JIT on x86-64.
//!
//! Compiled module code does not carry its own error dispatch, collector
//! entry or scheduler handoff. It jumps into a small set of global
//! fragments generated once per process by [`init_global`]:
//!
//! ```text
//! process_main ──> module code ──> garbage_collect ──> collector
//!                       │   └────> call_error_handler_shared ──> resolver
//!                       └────────> handle_error* ──> error handler
//!                                        └───────> do_schedule ──> back to Rust
//! ```
//!
//! [`call_site`] has the inline sequences module assemblers use to reach
//! the fragments.

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod assembler;
pub mod call_site;
pub mod config;
pub mod fragments;
pub mod global;
pub mod hooks;
pub mod labels;
pub mod markers;
pub mod process;
pub mod registers;
pub mod runtime_call;

pub use fragments::{FRAGMENT_COUNT, FragmentId};
pub use global::{
    FragmentEntry, GlobalFragments, JitError, ProcessMainFn, RANGE_GROUP, global, init_global,
};
pub use hooks::{HookKind, RuntimeHooks};
pub use labels::LabelAlloc;
pub use process::{FunctionIdentity, Process, RegisterFile};
pub use runtime_call::Update;
