//! Code that module assemblers place inline to reach the global fragments.
//!
//! Module code is emitted into its own buffers, far from the global
//! fragments, so every transfer goes through a register holding the
//! fragment's absolute address.

use dynasmrt::x64::X64Relocation;
use dynasmrt::{AssemblyOffset, DynamicLabel, DynasmApi, DynasmLabelApi, VecAssembler, dynasm};

use crate::fragments::FragmentId;
use crate::global::{FragmentEntry, GlobalFragments, JitError};
use crate::labels::LabelAlloc;
use crate::markers::CALL_ERROR_HANDLER;
use crate::process::FunctionIdentity;
use crate::registers::{STACK_MODE, StackMode};

/// Size in bytes of the operand block embedded in each stub.
pub const OPERAND_BLOCK_SIZE: usize = 16;

/// Operand block of a freshly emitted stub: the marker word, then no target.
pub fn initial_operand_block() -> [u8; OPERAND_BLOCK_SIZE] {
    let mut block = [0; OPERAND_BLOCK_SIZE];
    block[..8].copy_from_slice(&CALL_ERROR_HANDLER.to_le_bytes());
    block
}

fn identity_imm(identity: Option<&'static FunctionIdentity>) -> i64 {
    identity.map_or(0, |id| id as *const FunctionIdentity as i64)
}

/// Emit a call-error-handler stub and return the offset of its entry.
///
/// Layout, starting 8-byte aligned:
///
/// ```text
/// entry:    jmp dispatch
///           (padding)
/// op:       CALL_ERROR_HANDLER, 0        ; 16-byte operand block
/// dispatch: lea rdi, [op]
///           lea rsi, [entry]
///           mov rax, <call_error_handler_shared>
///           jmp rax
/// ```
///
/// The stub only refers to itself rip-relatively, so the bytes do not
/// depend on where it is placed. Patching the operand block retargets the
/// call site: write [`GENERIC_BREAKPOINT`](crate::markers::GENERIC_BREAKPOINT)
/// to trap into the breakpoint handler, or any other word plus a target
/// address to redirect it.
pub fn emit_call_error_handler<A>(ops: &mut A, shared: FragmentEntry) -> AssemblyOffset
where
    A: LabelAlloc,
{
    let entry = ops.new_label();
    let op = ops.new_label();
    let dispatch = ops.new_label();
    let shared = shared.addr() as i64;

    dynasm!(ops
        ; .arch x64
        ; .align 8
    );
    let start = ops.offset();
    dynasm!(ops
        ; .arch x64
        ; =>entry
        ; jmp =>dispatch
        ; .align 8
        ; =>op
        ; .bytes initial_operand_block()
        ; =>dispatch
        ; lea rdi, [=>op]
        ; lea rsi, [=>entry]
        ; mov rax, QWORD shared
        ; jmp rax
    );
    start
}

/// The stub bytes for the given global fragments, as placed at an
/// 8-byte aligned address.
pub fn call_error_handler_template(globals: &GlobalFragments) -> Result<Vec<u8>, JitError> {
    let mut ops = VecAssembler::<X64Relocation>::new(0);
    emit_call_error_handler(&mut ops, globals.entry(FragmentId::CallErrorHandlerShared));
    Ok(ops.finalize()?)
}

/// Implicit `handle_error`: the error address is the return address of
/// this call, masked by `handle_error_shared_prologue`.
///
/// Returns the offset of the return address, i.e. the error location
/// before masking.
pub fn emit_handle_error<A>(
    ops: &mut A,
    globals: &GlobalFragments,
    identity: Option<&'static FunctionIdentity>,
) -> AssemblyOffset
where
    A: DynasmApi,
{
    let identity = identity_imm(identity);
    let prologue = globals.entry(FragmentId::HandleErrorSharedPrologue).addr() as i64;
    dynasm!(ops
        ; .arch x64
        ; mov rcx, QWORD identity
        ; mov rax, QWORD prologue
        ; call rax
    );
    ops.offset()
}

/// Explicit `handle_error`: the error address is `label`, which must be
/// bound at an 8-byte aligned offset.
pub fn emit_handle_error_at<A>(
    ops: &mut A,
    globals: &GlobalFragments,
    label: DynamicLabel,
    identity: Option<&'static FunctionIdentity>,
) where
    A: DynasmLabelApi<Relocation = X64Relocation>,
{
    let identity = identity_imm(identity);
    let shared = globals.entry(FragmentId::HandleErrorShared).addr() as i64;
    dynasm!(ops
        ; .arch x64
        ; lea rsi, [=>label]
        ; mov rcx, QWORD identity
    );
    if STACK_MODE == StackMode::Dedicated {
        dynasm!(ops ; .arch x64 ; push rsi);
    }
    dynasm!(ops
        ; .arch x64
        ; mov rax, QWORD shared
        ; jmp rax
    );
}

/// Call a fragment that returns, such as `garbage_collect`.
pub fn emit_fragment_call<A>(ops: &mut A, globals: &GlobalFragments, id: FragmentId)
where
    A: DynasmApi,
{
    let target = globals.entry(id).addr() as i64;
    dynasm!(ops
        ; .arch x64
        ; mov rax, QWORD target
        ; call rax
    );
}

/// Jump to a fragment that does not return, such as `error_action_code`.
pub fn emit_fragment_jump<A>(ops: &mut A, globals: &GlobalFragments, id: FragmentId)
where
    A: DynasmApi,
{
    let target = globals.entry(id).addr() as i64;
    dynasm!(ops
        ; .arch x64
        ; mov rax, QWORD target
        ; jmp rax
    );
}

/// Lock-order check before taking the main process lock. Emits nothing
/// unless the `lock-check` feature is on.
pub fn emit_proc_lc_require<A>(ops: &mut A, globals: &GlobalFragments)
where
    A: DynasmApi,
{
    #[cfg(feature = "lock-check")]
    emit_lock_check_call(ops, globals, FragmentId::ProcLcRequire);
    #[cfg(not(feature = "lock-check"))]
    let _ = (ops, globals);
}

/// Lock-order check after releasing the main process lock. Emits nothing
/// unless the `lock-check` feature is on.
pub fn emit_proc_lc_unrequire<A>(ops: &mut A, globals: &GlobalFragments)
where
    A: DynasmApi,
{
    #[cfg(feature = "lock-check")]
    emit_lock_check_call(ops, globals, FragmentId::ProcLcUnrequire);
    #[cfg(not(feature = "lock-check"))]
    let _ = (ops, globals);
}

// `rax` is live across the check; go through `r11` instead.
#[cfg(feature = "lock-check")]
fn emit_lock_check_call<A>(ops: &mut A, globals: &GlobalFragments, id: FragmentId)
where
    A: DynasmApi,
{
    let target = globals.entry(id).addr() as i64;
    dynasm!(ops
        ; .arch x64
        ; mov r11, QWORD target
        ; call r11
    );
}

#[cfg(test)]
mod tests {
    use iced_x86::{Decoder, DecoderOptions, Mnemonic, Register};
    use marten_profiler::NullRegistrar;

    use super::*;
    use crate::hooks::test_support::noop_hooks;

    fn build() -> GlobalFragments {
        GlobalFragments::with_registrars(&noop_hooks(), &NullRegistrar, &NullRegistrar).unwrap()
    }

    fn decode(code: &[u8], ip: u64) -> Vec<iced_x86::Instruction> {
        let mut decoder = Decoder::with_ip(64, code, ip, DecoderOptions::NONE);
        let mut out = Vec::new();
        while decoder.can_decode() {
            out.push(decoder.decode());
        }
        out
    }

    #[test]
    fn stub_carries_marker_block() {
        let globals = build();
        let stub = call_error_handler_template(&globals).unwrap();

        // jmp rel32 (5 bytes), padded to 8, then the operand block.
        assert_eq!(stub[0], 0xE9);
        let block = &stub[8..8 + OPERAND_BLOCK_SIZE];
        assert_eq!(block, &initial_operand_block());
        assert_eq!(&block[..8], &CALL_ERROR_HANDLER.to_le_bytes());
        assert!(block[8..].iter().all(|&b| b == 0));
    }

    #[test]
    fn stub_is_position_independent() {
        let globals = build();
        let template = call_error_handler_template(&globals).unwrap();

        let mut ops = VecAssembler::<X64Relocation>::new(0);
        for _ in 0..3 {
            dynasm!(ops ; .arch x64 ; nop);
        }
        let start = emit_call_error_handler(&mut ops, globals.entry(FragmentId::CallErrorHandlerShared));
        let code = ops.finalize().unwrap();

        assert_eq!(start.0 % 8, 0);
        assert_eq!(&code[start.0..], &template[..]);
    }

    #[test]
    fn stub_loads_operand_block_and_entry() {
        let globals = build();
        let stub = call_error_handler_template(&globals).unwrap();
        let base = 0x10_0000;
        let dispatch = 8 + OPERAND_BLOCK_SIZE;
        let insns = decode(&stub[dispatch..], base + dispatch as u64);

        assert_eq!(insns[0].mnemonic(), Mnemonic::Lea);
        assert_eq!(insns[0].op0_register(), Register::RDI);
        assert_eq!(insns[0].memory_displacement64(), base + 8);
        assert_eq!(insns[1].mnemonic(), Mnemonic::Lea);
        assert_eq!(insns[1].op0_register(), Register::RSI);
        assert_eq!(insns[1].memory_displacement64(), base);
        assert_eq!(
            insns[2].immediate(1),
            globals.entry(FragmentId::CallErrorHandlerShared).addr() as u64
        );
        assert_eq!(insns[3].mnemonic(), Mnemonic::Jmp);
    }

    #[test]
    fn implicit_handle_error_calls_prologue() {
        let globals = build();
        let mut ops = VecAssembler::<X64Relocation>::new(0);
        let ret = emit_handle_error(&mut ops, &globals, None);
        let code = ops.finalize().unwrap();
        let insns = decode(&code, 0);

        assert_eq!(ret.0, code.len());
        assert_eq!(insns[0].immediate(1), 0);
        assert_eq!(
            insns[1].immediate(1),
            globals.entry(FragmentId::HandleErrorSharedPrologue).addr() as u64
        );
        assert_eq!(insns[2].mnemonic(), Mnemonic::Call);
    }

    #[test]
    fn lock_check_helpers_follow_feature() {
        let globals = build();
        let mut ops = VecAssembler::<X64Relocation>::new(0);
        emit_proc_lc_require(&mut ops, &globals);
        emit_proc_lc_unrequire(&mut ops, &globals);
        let code = ops.finalize().unwrap();

        if cfg!(feature = "lock-check") {
            let insns = decode(&code, 0);
            assert_eq!(insns.len(), 4);
            assert_eq!(insns[1].mnemonic(), Mnemonic::Call);
            assert_eq!(insns[1].op0_register(), Register::R11);
        } else {
            assert!(code.is_empty());
        }
    }
}
