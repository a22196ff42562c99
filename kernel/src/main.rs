//! Entry point. Pulls in everything as a library (`ignis_kernel`) and
//! drives the boot sequence: Limine handshake, memory management, control
//! structures, debug info, framebuffer console, then idle.

#![no_std]
#![no_main]

use ignis_kernel::arch::x86_64::{gdt, halt, idt};
use ignis_kernel::{boot, dwarf, logger, mm};

#[no_mangle]
pub extern "C" fn _start() -> ! {
    logger::init();

    let boot_info = boot::limine::handshake();
    log::info!("limine handshake complete, hhdm offset {:#x}", boot_info.hhdm_offset);

    mm::init(&boot_info).expect("memory management init failed");

    gdt::init();
    idt::init();
    log::info!("gdt and idt loaded");

    // SAFETY: `kernel_file` points at the bootloader-provided image of this
    // very binary, valid and immutable for the kernel's lifetime.
    if let Some((addr, len)) = boot_info.kernel_file {
        let image = unsafe { core::slice::from_raw_parts(addr, len) };
        match dwarf::init(image) {
            Ok(()) => log::info!("dwarf debug info loaded"),
            Err(e) => log::warn!("dwarf init failed: {e}, stack traces will be unsymbolicated"),
        }
    } else {
        log::warn!("bootloader did not hand back the kernel file, no stack symbolication");
    }

    if let Some(fb) = boot_info.framebuffer.as_ref() {
        boot::console::init(fb);
        log::info!("framebuffer console ready ({}x{})", fb.width, fb.height);
    }

    log::info!("kernel initialized");
    halt();
}
