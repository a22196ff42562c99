//! Bootloader interface.
//!
//! Everything the kernel learns about its environment from Limine funnels
//! through this module: the physical memory map, the higher-half direct map
//! offset, the kernel's own load address, the kernel file image (for
//! [`crate::elf`]/[`crate::dwarf`]), and the boot framebuffer.
//!
//! The actual request/response records are Limine protocol structures
//! (see [`limine`]); this module narrows them into the plain types the rest
//! of the kernel consumes, so no other module needs to know the bootloader's
//! wire format.

pub mod console;
pub mod limine;

pub use limine::{BootInfo, MemoryRegion, RegionKind};
