//! The Interrupt Descriptor Table and exception dispatch.
//!
//! `x86_64::structures::idt::InterruptDescriptorTable` supplies the gate
//! layout and `lidt` plumbing, but its `set_handler_fn` only hands Rust an
//! `InterruptStackFrame` -- no general-purpose registers, no control or
//! debug registers. The panic path needs the full image (see
//! [`super::registers::InterruptStack`]), so every populated vector instead
//! points at a hand-written naked-assembly stub via `set_handler_addr`: the
//! stub saves everything, calls [`dispatch`], then restores and `iretq`s.

use core::arch::naked_asm;

use lazy_static::lazy_static;
use x86_64::structures::idt::InterruptDescriptorTable;
use x86_64::VirtAddr;

use super::registers::InterruptStack;

/// Vectors populated per the specified exception set: 0-8, 10-14, 16-19,
/// 21, 28-30. 9 (legacy coprocessor segment overrun) and 15, 20, 22-27, 31
/// are reserved/unused on current hardware.
const HANDLED_VECTORS: &[u8] = &[
    0, 1, 2, 3, 4, 5, 6, 7, 8, 10, 11, 12, 13, 14, 16, 17, 18, 19, 21, 28, 29, 30,
];

pub fn mnemonic(vector: u64) -> &'static str {
    match vector {
        0 => "Divide Error",
        1 => "Debug Exception",
        2 => "NMI Interrupt",
        3 => "Breakpoint",
        4 => "Overflow",
        5 => "BOUND Range Exceeded",
        6 => "Invalid Opcode",
        7 => "Device Not Available",
        8 => "Double Fault",
        10 => "Invalid TSS",
        11 => "Segment Not Present",
        12 => "Stack-Segment Fault",
        13 => "General Protection Fault",
        14 => "Page Fault",
        16 => "x87 Floating-Point Error",
        17 => "Alignment Check",
        18 => "Machine Check",
        19 => "SIMD Floating-Point Exception",
        21 => "Control Protection Exception",
        28 => "Hypervisor Injection Exception",
        29 => "VMM Communication Exception",
        30 => "Security Exception",
        _ => "Unknown Exception",
    }
}

/// Generates a naked stub for one vector. Vectors without a CPU-pushed
/// error code push a zero in its place so [`InterruptStack`] has a uniform
/// layout regardless of vector.
macro_rules! stub {
    ($name:ident, $vector:expr, push_error_code) => {
        #[unsafe(naked)]
        unsafe extern "C" fn $name() -> ! {
            naked_asm!(
                "push {vector}",
                "jmp {trampoline}",
                vector = const $vector,
                trampoline = sym trampoline,
            );
        }
    };
    ($name:ident, $vector:expr, no_error_code) => {
        #[unsafe(naked)]
        unsafe extern "C" fn $name() -> ! {
            naked_asm!(
                "push 0",
                "push {vector}",
                "jmp {trampoline}",
                vector = const $vector,
                trampoline = sym trampoline,
            );
        }
    };
}

/// Shared body for every stub once the vector (and, for some, the error
/// code) is on the stack: save every GPR, CRn and DRn in
/// [`InterruptStack`] order, call [`dispatch`] with the stack pointer,
/// then unwind back to the original context. `dispatch` never returns for
/// vectors this kernel treats as fatal, but the epilogue is correct either
/// way.
#[unsafe(naked)]
unsafe extern "C" fn trampoline() -> ! {
    naked_asm!(
        "push rax",
        "push rcx",
        "push rdx",
        "push rbx",
        "push rbp",
        "push rsi",
        "push rdi",
        "push r8",
        "push r9",
        "push r10",
        "push r11",
        "push r12",
        "push r13",
        "push r14",
        "push r15",
        "mov rax, cr0",
        "push rax",
        "mov rax, cr2",
        "push rax",
        "mov rax, cr3",
        "push rax",
        "mov rax, cr4",
        "push rax",
        "mov rax, dr0",
        "push rax",
        "mov rax, dr1",
        "push rax",
        "mov rax, dr2",
        "push rax",
        "mov rax, dr3",
        "push rax",
        "mov rax, dr6",
        "push rax",
        "mov rax, dr7",
        "push rax",
        "mov rdi, rsp",
        "call {dispatch}",
        "add rsp, 80", // drop DR0..DR7 + CR0..CR4 (10 * 8 bytes)
        "pop r15",
        "pop r14",
        "pop r13",
        "pop r12",
        "pop r11",
        "pop r10",
        "pop r9",
        "pop r8",
        "pop rdi",
        "pop rsi",
        "pop rbp",
        "pop rbx",
        "pop rdx",
        "pop rcx",
        "pop rax",
        "add rsp, 16", // drop vector + error_code
        "iretq",
        dispatch = sym dispatch,
    );
}

extern "C" fn dispatch(stack: *mut InterruptStack) -> ! {
    // SAFETY: `stack` points at the frame the trampoline just assembled on
    // its own stack; it is valid for the duration of this call.
    let stack = unsafe { &*stack };
    crate::panic::handle_exception(stack);
}

stub!(stub_0, 0, no_error_code);
stub!(stub_1, 1, no_error_code);
stub!(stub_2, 2, no_error_code);
stub!(stub_3, 3, no_error_code);
stub!(stub_4, 4, no_error_code);
stub!(stub_5, 5, no_error_code);
stub!(stub_6, 6, no_error_code);
stub!(stub_7, 7, no_error_code);
stub!(stub_8, 8, push_error_code);
stub!(stub_10, 10, push_error_code);
stub!(stub_11, 11, push_error_code);
stub!(stub_12, 12, push_error_code);
stub!(stub_13, 13, push_error_code);
stub!(stub_14, 14, push_error_code);
stub!(stub_16, 16, no_error_code);
stub!(stub_17, 17, push_error_code);
stub!(stub_18, 18, no_error_code);
stub!(stub_19, 19, no_error_code);
stub!(stub_21, 21, push_error_code);
stub!(stub_28, 28, no_error_code);
stub!(stub_29, 29, push_error_code);
stub!(stub_30, 30, push_error_code);

fn stub_addr(vector: u8) -> u64 {
    match vector {
        0 => stub_0 as u64,
        1 => stub_1 as u64,
        2 => stub_2 as u64,
        3 => stub_3 as u64,
        4 => stub_4 as u64,
        5 => stub_5 as u64,
        6 => stub_6 as u64,
        7 => stub_7 as u64,
        8 => stub_8 as u64,
        10 => stub_10 as u64,
        11 => stub_11 as u64,
        12 => stub_12 as u64,
        13 => stub_13 as u64,
        14 => stub_14 as u64,
        16 => stub_16 as u64,
        17 => stub_17 as u64,
        18 => stub_18 as u64,
        19 => stub_19 as u64,
        21 => stub_21 as u64,
        28 => stub_28 as u64,
        29 => stub_29 as u64,
        30 => stub_30 as u64,
        _ => unreachable!("vector {vector} is not in HANDLED_VECTORS"),
    }
}

lazy_static! {
    static ref IDT: InterruptDescriptorTable = {
        let mut idt = InterruptDescriptorTable::new();
        for &vector in HANDLED_VECTORS {
            // SAFETY: every stub above preserves the standard `iretq` frame
            // and uses a valid, present code selector (the stub executes in
            // the context it interrupted, with CS already set by the CPU).
            unsafe {
                idt[vector].set_handler_addr(VirtAddr::new(stub_addr(vector)));
            }
        }
        idt
    };
}

pub fn init() {
    IDT.load();
}
