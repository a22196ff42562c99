//! The virtual memory manager: one active PML4, built and mapped before
//! `CR3` is ever switched away from the bootloader's own tables.
//!
//! Installing a new page-table hierarchy needs frames to hold the
//! intermediate tables, which normally means calling into the frame
//! allocator -- but the frame allocator's own bitmap first has to be
//! *mapped* by this same manager, which needs a table, which needs a
//! frame... The table pool breaks that cycle: a fixed reserve of
//! pre-zeroed frames is set aside before anything is mapped, and `map`
//! draws from it. Only once the pool itself is mapped and reachable (the
//! "ready" phase) is it legal to refill the pool by allocating fresh
//! frames.

use x86_64::registers::control::{Cr3, Cr3Flags};
use x86_64::structures::paging::page_table::PageTableEntry;
use x86_64::structures::paging::{PageTable, PageTableFlags, PhysFrame, Size4KiB};
use x86_64::{PhysAddr, VirtAddr};

use crate::arch::x86_64::cpuid;
use crate::error::{KernelError, Result};
use crate::mm::addr::{phys_to_virt, virt_to_phys};
use crate::mm::frame_allocator::{FrameAllocator, FRAME_SIZE};

const POOL_SIZE: usize = 10;

bitflags::bitflags! {
    /// The subset of hardware page flags this kernel's callers choose
    /// from; translated to [`PageTableFlags`] at the leaf.
    #[derive(Debug, Clone, Copy)]
    pub struct MapFlags: u32 {
        const WRITABLE      = 1 << 0;
        const USER          = 1 << 1;
        const WRITE_THROUGH = 1 << 2;
        const CACHE_DISABLE = 1 << 3;
        const NO_EXECUTE    = 1 << 4;
    }
}

/// Type-state marker: the pool has not been mapped into the new address
/// space yet, so `map` must never trigger a refill.
struct Bootstrap;
/// Type-state marker: the pool is reachable through the active PML4;
/// exhausted slots are refilled immediately after use.
struct Ready;

struct Pool<State = Bootstrap> {
    frames: [PhysFrame; POOL_SIZE],
    virt: [VirtAddr; POOL_SIZE],
    next: usize,
    _state: core::marker::PhantomData<State>,
}

impl Pool<Bootstrap> {
    fn seed(frame_alloc: &FrameAllocator) -> Self {
        let mut frames = [PhysFrame::containing_address(PhysAddr::new(0)); POOL_SIZE];
        let mut virt = [VirtAddr::new(0); POOL_SIZE];
        for i in 0..POOL_SIZE {
            let phys = frame_alloc
                .allocate(FRAME_SIZE)
                .expect("out of physical memory seeding the page-table pool");
            let v = phys_to_virt(phys);
            // SAFETY: `phys` was just allocated fresh from the frame
            // allocator and is reachable through the bootloader's HHDM,
            // which is still active (CR3 has not been switched yet).
            unsafe {
                core::ptr::write_bytes(v.as_mut_ptr::<u8>(), 0, FRAME_SIZE as usize);
            }
            frames[i] = PhysFrame::containing_address(phys);
            virt[i] = v;
        }
        Pool {
            frames,
            virt,
            next: 0,
            _state: core::marker::PhantomData,
        }
    }

    fn into_ready(self) -> Pool<Ready> {
        Pool {
            frames: self.frames,
            virt: self.virt,
            next: self.next,
            _state: core::marker::PhantomData,
        }
    }
}

impl<State> Pool<State> {
    fn take(&mut self) -> Option<(PhysFrame, VirtAddr)> {
        if self.next >= POOL_SIZE {
            return None;
        }
        let slot = self.next;
        self.next += 1;
        Some((self.frames[slot], self.virt[slot]))
    }
}

impl Pool<Ready> {
    /// Replenishes every slot consumed since the last refill. Writes the
    /// new slot's own virtual identity into the pool *before* calling
    /// `map_memory` for it, so the recursive call that maps the
    /// replacement frame finds a pool that already accounts for it.
    fn refill(&mut self, manager: &mut Manager, frame_alloc: &FrameAllocator) -> Result<()> {
        while self.next > 0 {
            self.next -= 1;
            let phys = frame_alloc.allocate(FRAME_SIZE)?;
            let virt = phys_to_virt(phys);
            let slot = self.next;
            self.frames[slot] = PhysFrame::containing_address(phys);
            self.virt[slot] = virt;
            manager.map_memory_inner(phys, virt, FRAME_SIZE, MapFlags::WRITABLE, frame_alloc)?;
        }
        Ok(())
    }
}

/// Owns the active PML4 root and the table pool across both lifecycle
/// phases.
pub struct Manager {
    pml4_virt: VirtAddr,
    pml4_phys: PhysAddr,
    pool: Option<Pool<Ready>>,
    phys_addr_bits: u8,
}

fn table_flags(leaf: bool, flags: MapFlags) -> PageTableFlags {
    let mut out = PageTableFlags::PRESENT;
    if leaf {
        if flags.contains(MapFlags::WRITABLE) {
            out |= PageTableFlags::WRITABLE;
        }
        if flags.contains(MapFlags::USER) {
            out |= PageTableFlags::USER_ACCESSIBLE;
        }
        if flags.contains(MapFlags::WRITE_THROUGH) {
            out |= PageTableFlags::WRITE_THROUGH;
        }
        if flags.contains(MapFlags::CACHE_DISABLE) {
            out |= PageTableFlags::NO_CACHE;
        }
        if flags.contains(MapFlags::NO_EXECUTE) {
            out |= PageTableFlags::NO_EXECUTE;
        }
    } else {
        // Intermediate tables are always writable/supervisor; the leaf's
        // own flags are what actually restrict access.
        out |= PageTableFlags::WRITABLE;
    }
    out
}

fn phys_mask(bits: u8) -> u64 {
    ((1u64 << bits) - 1) & !0xFFF
}

impl Manager {
    /// Runs the full initialization order: seed the pool, map the pool's
    /// own pages, mark it ready, map the PML4/bitmap/reclaimable/kernel
    /// image/framebuffer, then switch `CR3`.
    pub fn init(
        frame_alloc: &FrameAllocator,
        regions: impl Iterator<Item = crate::boot::MemoryRegion> + Clone,
        kernel_phys_base: u64,
        kernel_virt_base: u64,
        framebuffer: Option<&crate::boot::limine::FramebufferInfo>,
    ) -> Result<Self> {
        let widths = cpuid::address_widths();

        let pml4_phys = frame_alloc.allocate(FRAME_SIZE)?;
        let pml4_virt = phys_to_virt(pml4_phys);
        // SAFETY: freshly allocated frame, reachable via HHDM.
        unsafe {
            core::ptr::write_bytes(pml4_virt.as_mut_ptr::<u8>(), 0, FRAME_SIZE as usize);
        }

        let mut manager = Manager {
            pml4_virt,
            pml4_phys,
            pool: None,
            phys_addr_bits: widths.physical,
        };

        let mut pool = Pool::seed(frame_alloc);
        for i in 0..POOL_SIZE {
            let (frame, virt) = (pool.frames[i], pool.virt[i]);
            manager.map_memory_inner(
                frame.start_address(),
                virt,
                FRAME_SIZE,
                MapFlags::WRITABLE,
                frame_alloc,
            )?;
        }
        manager.pool = Some(pool.into_ready());

        manager.map_memory_inner(pml4_phys, pml4_virt, FRAME_SIZE, MapFlags::WRITABLE, frame_alloc)?;
        manager.map_memory_inner(
            PhysAddr::new(0),
            VirtAddr::new(phys_to_virt(PhysAddr::new(0)).as_u64()),
            0,
            MapFlags::empty(),
            frame_alloc,
        )
        .ok(); // zero-length no-op; keeps the HHDM base documented as intentional

        for region in regions {
            use crate::boot::RegionKind;
            let needs_map = matches!(
                region.kind,
                RegionKind::Usable
                    | RegionKind::BootloaderReclaimable
                    | RegionKind::KernelAndModules
                    | RegionKind::Framebuffer
            );
            if !needs_map || region.length == 0 {
                continue;
            }
            let virt = phys_to_virt(PhysAddr::new(region.base));
            manager.map_memory_inner(
                PhysAddr::new(region.base),
                virt,
                region.length,
                MapFlags::WRITABLE | MapFlags::NO_EXECUTE,
                frame_alloc,
            )?;
        }

        // The kernel image itself lives at the bootloader-reported virtual
        // base, not the HHDM -- this is the higher-half link address from
        // `link.ld`.
        let kernel_size = 16 * 1024 * 1024; // generous upper bound on image size
        manager.map_memory_inner(
            PhysAddr::new(kernel_phys_base),
            VirtAddr::new(kernel_virt_base),
            kernel_size,
            MapFlags::WRITABLE,
            frame_alloc,
        )?;

        if let Some(fb) = framebuffer {
            let fb_phys = virt_to_phys_guess(fb.addr as u64, &manager);
            let size = fb.pitch * fb.height;
            manager.map_memory_inner(
                PhysAddr::new(fb_phys),
                VirtAddr::new(fb.addr as u64),
                size,
                MapFlags::WRITABLE | MapFlags::NO_EXECUTE,
                frame_alloc,
            )?;
        }

        manager.activate();
        Ok(manager)
    }

    /// Public entry point once the manager is past bootstrap: splits into
    /// 4 KiB pages and installs each leaf, refilling the pool as it's
    /// consumed.
    pub fn map_memory(
        &mut self,
        phys: PhysAddr,
        virt: VirtAddr,
        size: u64,
        flags: MapFlags,
        frame_alloc: &FrameAllocator,
    ) -> Result<()> {
        self.map_memory_inner(phys, virt, size, flags, frame_alloc)
    }

    fn map_memory_inner(
        &mut self,
        phys: PhysAddr,
        virt: VirtAddr,
        size: u64,
        flags: MapFlags,
        frame_alloc: &FrameAllocator,
    ) -> Result<()> {
        if size == 0 {
            return Ok(());
        }
        let pages = size.div_ceil(FRAME_SIZE);
        for i in 0..pages {
            let page_phys = PhysAddr::new(phys.as_u64() + i * FRAME_SIZE);
            let page_virt = VirtAddr::new(virt.as_u64() + i * FRAME_SIZE);
            self.map_page(page_phys, page_virt, flags, frame_alloc)?;
        }
        Ok(())
    }

    fn map_page(
        &mut self,
        phys: PhysAddr,
        virt: VirtAddr,
        flags: MapFlags,
        frame_alloc: &FrameAllocator,
    ) -> Result<()> {
        let indices = [
            u64::from(virt.p4_index()),
            u64::from(virt.p3_index()),
            u64::from(virt.p2_index()),
            u64::from(virt.p1_index()),
        ];

        let mut table_virt = self.pml4_virt;
        for level in 0..3 {
            let idx = indices[level] as usize;
            // SAFETY: `table_virt` names a live, zeroed-or-populated page
            // table reached through the HHDM or an already-mapped range.
            let table: &mut PageTable = unsafe { &mut *table_virt.as_mut_ptr() };
            let entry = &mut table[idx];
            if !entry.flags().contains(PageTableFlags::PRESENT) {
                let (child_phys, child_virt) = self.next_pool_slot(frame_alloc)?;
                entry.set_addr(child_phys, table_flags(false, MapFlags::empty()));
                table_virt = child_virt;
            } else {
                let child_phys = entry.addr();
                table_virt = phys_to_virt(child_phys);
            }
        }

        // SAFETY: `table_virt` now names the PT for `virt`'s P1 index.
        let pt: &mut PageTable = unsafe { &mut *table_virt.as_mut_ptr() };
        let leaf: &mut PageTableEntry = &mut pt[indices[3] as usize];
        if leaf.flags().contains(PageTableFlags::PRESENT) {
            log::warn!("map_page: {virt:?} is already mapped");
            return Err(KernelError::AlreadyUsed);
        }
        let masked = PhysAddr::new(phys.as_u64() & phys_mask(self.phys_addr_bits));
        leaf.set_addr(masked, table_flags(true, flags));

        if active_pml4(self.pml4_phys) {
            x86_64::instructions::tlb::flush(virt);
        }

        if let Some(mut pool) = self.pool.take() {
            pool.refill(self, frame_alloc)?;
            self.pool = Some(pool);
        }

        Ok(())
    }

    fn next_pool_slot(&mut self, frame_alloc: &FrameAllocator) -> Result<(PhysAddr, VirtAddr)> {
        if let Some(pool) = self.pool.as_mut() {
            if let Some((frame, virt)) = pool.take() {
                return Ok((frame.start_address(), virt));
            }
        }
        // Bootstrap phase pool (not yet wrapped in `Pool<Ready>`): callers
        // during `init` reach this only via the raw `Pool<Bootstrap>`
        // path above, never through here. Reaching this arm after init
        // means every pool slot across every refill was exhausted at once.
        let phys = frame_alloc.allocate(FRAME_SIZE)?;
        let virt = phys_to_virt(phys);
        // SAFETY: freshly allocated frame, reachable via HHDM.
        unsafe {
            core::ptr::write_bytes(virt.as_mut_ptr::<u8>(), 0, FRAME_SIZE as usize);
        }
        Ok((phys, virt))
    }

    fn activate(&self) {
        let frame = PhysFrame::<Size4KiB>::containing_address(self.pml4_phys);
        let (_, flags) = Cr3::read();
        // SAFETY: every table the new PML4 reaches was installed by
        // `map_page` above, covering at minimum the pool, the bitmap, all
        // reclaimable/usable/kernel/framebuffer regions, and the PML4
        // itself; the kernel's own code is mapped at its link address.
        unsafe {
            Cr3::write(frame, flags & Cr3Flags::PAGE_LEVEL_CACHE_DISABLE);
        }
    }
}

fn active_pml4(pml4_phys: PhysAddr) -> bool {
    Cr3::read().0.start_address() == pml4_phys
}

/// Limine's framebuffer address is already expressed in terms of the HHDM
/// it also set up, so this degrades to a direct offset subtraction; kept as
/// a named helper because a future bootloader might not guarantee that.
fn virt_to_phys_guess(virt: u64, _manager: &Manager) -> u64 {
    virt_to_phys(VirtAddr::new(virt)).as_u64()
}

#[cfg(test)]
mod tests {
    use super::*;

    // `Manager::init` brings up a full address space (pool, bitmap,
    // every usable/reclaimable region, a 16 MiB kernel-image mapping) and
    // needs physical memory at that scale to back it; that's exercised by
    // the `basic_boot` integration test against the real Limine memory
    // map instead. These cover the pure, allocator-free logic.

    #[test]
    fn leaf_flags_translate_writable_and_no_execute() {
        let flags = table_flags(true, MapFlags::WRITABLE | MapFlags::NO_EXECUTE);
        assert!(flags.contains(PageTableFlags::PRESENT));
        assert!(flags.contains(PageTableFlags::WRITABLE));
        assert!(flags.contains(PageTableFlags::NO_EXECUTE));
        assert!(!flags.contains(PageTableFlags::USER_ACCESSIBLE));
    }

    #[test]
    fn intermediate_flags_are_always_writable() {
        let flags = table_flags(false, MapFlags::empty());
        assert!(flags.contains(PageTableFlags::WRITABLE));
    }

    #[test]
    fn phys_mask_clears_low_bits_and_caps_at_width() {
        assert_eq!(phys_mask(40) & 0xFFF, 0);
        let addr = 0x0000_00AB_CDEF_1000u64;
        assert_eq!(addr & phys_mask(40), addr);
    }
}
