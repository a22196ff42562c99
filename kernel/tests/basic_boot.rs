//! Boots the kernel through its real entry sequence under QEMU and
//! confirms memory management, the DWARF symbolicator, and the interrupt
//! tables all come up without a panic.

#![no_std]
#![no_main]

use core::panic::PanicInfo;

use ignis_kernel::arch::x86_64::qemu::{self, ExitCode};
use ignis_kernel::arch::x86_64::{gdt, idt};
use ignis_kernel::{boot, dwarf, logger, mm, serial_println};

#[no_mangle]
pub extern "C" fn _start() -> ! {
    serial_println!("basic_boot: starting");

    logger::init();
    let boot_info = boot::limine::handshake();

    test_mm_init(&boot_info);
    test_gdt_idt_init();
    test_dwarf_init(&boot_info);
    test_heap_allocates();

    serial_println!("basic_boot: all tests passed");
    qemu::exit(ExitCode::Success)
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    serial_println!("basic_boot: [failed]\n{}", info);
    qemu::exit(ExitCode::Failed)
}

fn test_mm_init(boot_info: &boot::BootInfo) {
    serial_println!("test_mm_init...");
    mm::init(boot_info).expect("mm::init failed");
    serial_println!("test_mm_init [ok]");
}

fn test_gdt_idt_init() {
    serial_println!("test_gdt_idt_init...");
    gdt::init();
    idt::init();
    serial_println!("test_gdt_idt_init [ok]");
}

fn test_dwarf_init(boot_info: &boot::BootInfo) {
    serial_println!("test_dwarf_init...");
    if let Some((addr, len)) = boot_info.kernel_file {
        // SAFETY: the bootloader's kernel-file response names this very
        // binary's own image, valid for the kernel's lifetime.
        let image = unsafe { core::slice::from_raw_parts(addr, len) };
        dwarf::init(image).expect("dwarf::init failed");
        assert!(dwarf::context().is_some());
    }
    serial_println!("test_dwarf_init [ok]");
}

fn test_heap_allocates() {
    serial_println!("test_heap_allocates...");
    extern crate alloc;
    let v = alloc::vec![1u32, 2, 3];
    assert_eq!(v.iter().sum::<u32>(), 6);
    serial_println!("test_heap_allocates [ok]");
}
