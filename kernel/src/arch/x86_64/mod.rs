//! x86_64 control-surface setup: GDT, IDT and exception dispatch, CPUID
//! probing, the serial diagnostic sink, and the QEMU test-exit device.

pub mod cpuid;
pub mod gdt;
pub mod idt;
pub mod qemu;
pub mod registers;
pub mod serial;

use x86_64::instructions::hlt;
use x86_64::instructions::interrupts;

/// Halts the CPU forever. The terminal operation of the panic path.
pub fn halt() -> ! {
    interrupts::disable();
    loop {
        hlt();
    }
}
