//! Marker words at the head of call-site operand blocks.
//!
//! Every module-side call site that can reach `call_error_handler_shared`
//! owns a two-word operand block. The first word says what the call site
//! is; the second carries an address when the site has been redirected.

/// The call site targets a function that is not loaded.
pub const CALL_ERROR_HANDLER: u64 = 0x4D52_4345;

/// The call site has a breakpoint set on it.
pub const GENERIC_BREAKPOINT: u64 = 0x4D52_4250;

// Compared as sign-extended 32-bit immediates.
const _: () = assert!(CALL_ERROR_HANDLER <= i32::MAX as u64);
const _: () = assert!(GENERIC_BREAKPOINT <= i32::MAX as u64);
const _: () = assert!(CALL_ERROR_HANDLER != GENERIC_BREAKPOINT);
