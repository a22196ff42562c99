#![no_std]
#![cfg_attr(not(test), no_main)]
#![feature(custom_test_frameworks)]
#![test_runner(crate::test_runner)]
#![reexport_test_harness_main = "test_main"]
#![feature(abi_x86_interrupt)]

extern crate alloc;

#[macro_use]
pub mod print;

pub mod arch;
pub mod boot;
pub mod dwarf;
pub mod elf;
pub mod error;
mod intrinsics;
pub mod logger;
pub mod mm;
pub mod panic;
pub mod sync;

pub use error::{KernelError, Result};

/// Global heap allocator. Our own intrusive free-list allocator (see
/// [`mm::heap`]); it starts unusable and is handed its backing range by
/// [`mm::heap::init`] once the virtual memory manager is ready.
#[global_allocator]
static ALLOCATOR: mm::heap::LockedHeap = mm::heap::LockedHeap::empty();

#[cfg(test)]
use core::panic::PanicInfo;

#[cfg(test)]
#[panic_handler]
fn test_panic_handler(info: &PanicInfo) -> ! {
    serial_println!("[failed]\n");
    serial_println!("Error: {}\n", info);
    arch::x86_64::qemu::exit(arch::x86_64::qemu::ExitCode::Failed)
}

#[cfg(test)]
pub trait Testable {
    fn run(&self);
}

#[cfg(test)]
impl<T: Fn()> Testable for T {
    fn run(&self) {
        serial_print!("{}...\t", core::any::type_name::<T>());
        self();
        serial_println!("[ok]");
    }
}

#[cfg(test)]
pub fn test_runner(tests: &[&dyn Testable]) {
    serial_println!("running {} tests", tests.len());
    for test in tests {
        test.run();
    }
    arch::x86_64::qemu::exit(arch::x86_64::qemu::ExitCode::Success)
}

#[cfg(test)]
#[no_mangle]
extern "C" fn _start() -> ! {
    test_main();
    arch::x86_64::qemu::exit(arch::x86_64::qemu::ExitCode::Success)
}
