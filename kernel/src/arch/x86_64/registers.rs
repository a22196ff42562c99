//! The exact register image the interrupt stubs in [`super::idt`] leave on
//! the stack before calling into Rust, and the symbolicated dump the
//! exception handler renders from it.

use core::fmt;

/// Layout pushed by every vector stub, low address first. Field order here
/// is the reverse of push order: the stub's last push is this struct's
/// first field, so that a `&INTERRUPT_STACK` cast directly onto the
/// stack pointer at handler entry reads correctly.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct InterruptStack {
    pub dr7: u64,
    pub dr6: u64,
    pub dr3: u64,
    pub dr2: u64,
    pub dr1: u64,
    pub dr0: u64,
    pub cr4: u64,
    pub cr3: u64,
    pub cr2: u64,
    pub cr0: u64,
    pub r15: u64,
    pub r14: u64,
    pub r13: u64,
    pub r12: u64,
    pub r11: u64,
    pub r10: u64,
    pub r9: u64,
    pub r8: u64,
    pub rdi: u64,
    pub rsi: u64,
    pub rbp: u64,
    pub rbx: u64,
    pub rdx: u64,
    pub rcx: u64,
    pub rax: u64,
    pub vector: u64,
    pub error_code: u64,
    pub rip: u64,
    pub cs: u64,
    pub rflags: u64,
    pub rsp: u64,
    pub ss: u64,
}

impl fmt::Display for InterruptStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "RAX={:016x} RBX={:016x} RCX={:016x} RDX={:016x}",
            self.rax, self.rbx, self.rcx, self.rdx
        )?;
        writeln!(
            f,
            "RSI={:016x} RDI={:016x} RBP={:016x} RSP={:016x}",
            self.rsi, self.rdi, self.rbp, self.rsp
        )?;
        writeln!(
            f,
            "R8 ={:016x} R9 ={:016x} R10={:016x} R11={:016x}",
            self.r8, self.r9, self.r10, self.r11
        )?;
        writeln!(
            f,
            "R12={:016x} R13={:016x} R14={:016x} R15={:016x}",
            self.r12, self.r13, self.r14, self.r15
        )?;
        writeln!(
            f,
            "RIP={:016x} CS={:04x} RFLAGS={:016x} SS={:04x}",
            self.rip, self.cs, self.rflags, self.ss
        )?;
        writeln!(
            f,
            "CR0={:016x} CR2={:016x} CR3={:016x} CR4={:016x}",
            self.cr0, self.cr2, self.cr3, self.cr4
        )?;
        write!(
            f,
            "DR0={:016x} DR1={:016x} DR2={:016x} DR3={:016x} DR6={:016x} DR7={:016x}",
            self.dr0, self.dr1, self.dr2, self.dr3, self.dr6, self.dr7
        )
    }
}
