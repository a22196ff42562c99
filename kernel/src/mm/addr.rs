//! Physical/virtual address conversion through the bootloader's higher-half
//! direct map (HHDM). The offset is learned once, from the Limine handshake,
//! and stored in a pre-heap [`crate::sync::OnceCell`]; everything after
//! `boot::limine::handshake()` can convert freely.

use x86_64::{PhysAddr, VirtAddr};

use crate::sync::OnceCell;

/// Sentinel the frame allocator and VM manager use for "no address", per
/// the bit pattern reserved by the data model (bit 52 set, which no real
/// physical address on current hardware ever has).
pub const INVALID_PHYS: u64 = 1 << 52;

static HHDM_OFFSET: OnceCell<u64> = OnceCell::new();

pub fn init(offset: u64) {
    HHDM_OFFSET.set(offset);
}

fn offset() -> u64 {
    *HHDM_OFFSET
        .get()
        .expect("HHDM offset read before boot::limine::handshake()")
}

pub fn phys_to_virt(phys: PhysAddr) -> VirtAddr {
    VirtAddr::new(phys.as_u64() + offset())
}

pub fn virt_to_phys(virt: VirtAddr) -> PhysAddr {
    PhysAddr::new(virt.as_u64() - offset())
}
