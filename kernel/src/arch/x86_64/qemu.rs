//! The `isa-debug-exit` device used by the in-kernel test harness to signal
//! pass/fail back to the host without a real shutdown path.

use x86_64::instructions::port::Port;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ExitCode {
    Success = 0x10,
    Failed = 0x11,
}

pub fn exit(code: ExitCode) -> ! {
    // SAFETY: port 0xf4 is QEMU's `isa-debug-exit` device, present only
    // under the `-device isa-debug-exit` flag this kernel's test runner
    // passes; writing to it terminates the VM.
    unsafe {
        let mut port = Port::new(0xf4);
        port.write(code as u32);
    }
    crate::arch::x86_64::halt()
}
