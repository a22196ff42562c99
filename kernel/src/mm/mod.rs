//! Memory management: physical frames, virtual address space, and the
//! kernel heap built on top of both.
//!
//! [`init`] runs once, early in boot, in the order the rest of the
//! kernel depends on: the HHDM offset first (everything else converts
//! addresses through it), then the frame allocator (the page-table
//! manager needs frames), then the page tables (the heap needs mapped
//! virtual memory), then the heap itself.

pub mod addr;
pub mod frame_allocator;
pub mod heap;
pub mod page_table;

use spin::Mutex;

use crate::boot::BootInfo;
use crate::error::Result;
use crate::sync::OnceCell;

/// Virtual base of the kernel heap. Chosen well clear of the HHDM (which
/// covers all physical memory 1:1 from offset 0) and the higher-half
/// kernel image itself.
const HEAP_START: u64 = 0xffff_9000_0000_0000;
const HEAP_INITIAL_SIZE: u64 = 256 * frame_allocator::FRAME_SIZE; // 1 MiB
const HEAP_MAX_SIZE: u64 = 64 * 1024 * 1024;

static FRAME_ALLOCATOR: OnceCell<frame_allocator::FrameAllocator> = OnceCell::new();
static PAGE_TABLE: OnceCell<Mutex<page_table::Manager>> = OnceCell::new();

pub fn frame_allocator() -> &'static frame_allocator::FrameAllocator {
    FRAME_ALLOCATOR
        .get()
        .expect("frame allocator read before mm::init()")
}

/// Grows the heap by mapping fresh frames at the next virtual address,
/// capped at [`HEAP_MAX_SIZE`] total.
struct HeapExpander {
    mapped_so_far: u64,
}

impl heap::Expander for HeapExpander {
    fn expand(&mut self, virt_end: usize, size: usize) -> Option<usize> {
        let remaining = HEAP_MAX_SIZE.checked_sub(self.mapped_so_far)?;
        let size = (size as u64).min(remaining);
        if size == 0 {
            return None;
        }
        let frame_alloc = FRAME_ALLOCATOR.get()?;
        let mut manager = PAGE_TABLE.get()?.lock();

        let pages = size.div_ceil(frame_allocator::FRAME_SIZE);
        for i in 0..pages {
            let phys = frame_alloc.allocate(frame_allocator::FRAME_SIZE).ok()?;
            let virt = x86_64::VirtAddr::new(virt_end as u64 + i * frame_allocator::FRAME_SIZE);
            manager
                .map_memory(
                    phys,
                    virt,
                    frame_allocator::FRAME_SIZE,
                    page_table::MapFlags::WRITABLE | page_table::MapFlags::NO_EXECUTE,
                    frame_alloc,
                )
                .ok()?;
        }
        let mapped = pages * frame_allocator::FRAME_SIZE;
        self.mapped_so_far += mapped;
        Some(mapped as usize)
    }
}

static mut HEAP_EXPANDER: HeapExpander = HeapExpander {
    mapped_so_far: HEAP_INITIAL_SIZE,
};

/// Brings up the physical frame allocator, the kernel's own page tables,
/// and the global heap, in that order. Must run exactly once, before any
/// code that allocates (directly or via `alloc::*`) executes.
pub fn init(boot_info: &BootInfo) -> Result<()> {
    addr::init(boot_info.hhdm_offset);

    let frame_alloc = frame_allocator::init(crate::boot::limine::memory_map());
    let frame_alloc = FRAME_ALLOCATOR.get_or_init(|| frame_alloc);

    let mut manager = page_table::Manager::init(
        frame_alloc,
        crate::boot::limine::memory_map(),
        boot_info.kernel_phys_base,
        boot_info.kernel_virt_base,
        boot_info.framebuffer.as_ref(),
    )?;

    for i in 0..(HEAP_INITIAL_SIZE / frame_allocator::FRAME_SIZE) {
        let phys = frame_alloc.allocate(frame_allocator::FRAME_SIZE)?;
        let virt = x86_64::VirtAddr::new(HEAP_START + i * frame_allocator::FRAME_SIZE);
        manager.map_memory(
            phys,
            virt,
            frame_allocator::FRAME_SIZE,
            page_table::MapFlags::WRITABLE | page_table::MapFlags::NO_EXECUTE,
            frame_alloc,
        )?;
    }
    PAGE_TABLE.set(Mutex::new(manager));

    // SAFETY: `init` runs exactly once on the boot core before any
    // allocation is attempted; `HEAP_START..+HEAP_INITIAL_SIZE` was just
    // mapped above.
    unsafe {
        crate::ALLOCATOR.init(HEAP_START as usize, HEAP_INITIAL_SIZE as usize);
    }
    // SAFETY: `HEAP_EXPANDER` is touched only here and only before any
    // other core could plausibly be running.
    #[allow(static_mut_refs)]
    crate::ALLOCATOR.set_expander(unsafe { &mut HEAP_EXPANDER });

    log::info!(
        "mm: heap at {:#x}, initial {} KiB, max {} MiB",
        HEAP_START,
        HEAP_INITIAL_SIZE / 1024,
        HEAP_MAX_SIZE / (1024 * 1024)
    );

    Ok(())
}
