//! The physical frame allocator: one bit per 4 KiB frame, hosted inside the
//! smallest usable memory-map region that can hold it.

use spin::Mutex;
use x86_64::PhysAddr;

use crate::boot::MemoryRegion;
use crate::error::{KernelError, Result};
use crate::mm::addr;

pub const FRAME_SIZE: u64 = 4096;

struct Bitmap {
    /// Points into the region chosen to host the bitmap, reached through
    /// the HHDM so it can be read/written before the kernel's own page
    /// tables exist.
    words: &'static mut [u64],
    total_pages: u64,
    used_pages: u64,
}

impl Bitmap {
    fn word_bit(page: u64) -> (usize, u32) {
        ((page / 64) as usize, (page % 64) as u32)
    }

    fn get(&self, page: u64) -> bool {
        let (word, bit) = Self::word_bit(page);
        self.words[word] & (1 << bit) != 0
    }

    fn set(&mut self, page: u64, value: bool) {
        let (word, bit) = Self::word_bit(page);
        if value {
            self.words[word] |= 1 << bit;
        } else {
            self.words[word] &= !(1 << bit);
        }
    }
}

pub struct FrameAllocator {
    bitmap: Mutex<Bitmap>,
}

impl FrameAllocator {
    pub fn reserve(&self, phys_addr: u64, size: u64) -> Result<()> {
        if phys_addr % FRAME_SIZE != 0 {
            return Err(KernelError::AddressAlignment);
        }
        let start = phys_addr / FRAME_SIZE;
        let count = size.div_ceil(FRAME_SIZE);
        let mut bitmap = self.bitmap.lock();
        for page in start..start + count {
            if page >= bitmap.total_pages {
                break;
            }
            if bitmap.get(page) {
                return Err(KernelError::AlreadyUsed);
            }
        }
        for page in start..start + count {
            if page >= bitmap.total_pages {
                break;
            }
            bitmap.set(page, true);
            bitmap.used_pages += 1;
        }
        Ok(())
    }

    pub fn release(&self, phys_addr: u64, size: u64) -> Result<()> {
        if phys_addr % FRAME_SIZE != 0 {
            return Err(KernelError::AddressAlignment);
        }
        let start = phys_addr / FRAME_SIZE;
        let count = size.div_ceil(FRAME_SIZE);
        let mut bitmap = self.bitmap.lock();
        for page in start..start + count {
            if page >= bitmap.total_pages {
                break;
            }
            if bitmap.get(page) {
                bitmap.set(page, false);
                bitmap.used_pages -= 1;
            }
        }
        Ok(())
    }

    /// Scans for the first run of consecutive free pages long enough for
    /// `size` bytes, reserves it, and returns its base physical address.
    pub fn allocate(&self, size: u64) -> Result<PhysAddr> {
        let needed = size.div_ceil(FRAME_SIZE);
        let mut bitmap = self.bitmap.lock();
        let total = bitmap.total_pages;

        let mut run_start = None;
        let mut run_len = 0u64;
        for page in 1..total {
            if !bitmap.get(page) {
                if run_start.is_none() {
                    run_start = Some(page);
                }
                run_len += 1;
                if run_len >= needed {
                    let base = run_start.unwrap();
                    for p in base..base + needed {
                        bitmap.set(p, true);
                    }
                    bitmap.used_pages += needed;
                    return Ok(PhysAddr::new(base * FRAME_SIZE));
                }
            } else {
                run_start = None;
                run_len = 0;
            }
        }
        Err(KernelError::NotFound)
    }

    pub fn used_pages(&self) -> u64 {
        self.bitmap.lock().used_pages
    }

    pub fn total_pages(&self) -> u64 {
        self.bitmap.lock().total_pages
    }
}

/// Builds the allocator from the Limine memory map: computes total RAM,
/// picks the smallest usable region that can host the bitmap, marks
/// everything reserved, then releases each usable region and re-reserves
/// the bitmap's own footprint.
pub fn init(regions: impl Iterator<Item = MemoryRegion> + Clone) -> FrameAllocator {
    let highest_addr = regions
        .clone()
        .map(|r| r.base + r.length)
        .max()
        .unwrap_or(0);
    let total_pages = highest_addr.div_ceil(FRAME_SIZE);
    let bitmap_bytes = (total_pages as usize).div_ceil(8);
    let bitmap_pages = (bitmap_bytes as u64).div_ceil(FRAME_SIZE) * FRAME_SIZE;

    let host_region = regions
        .clone()
        .filter(|r| r.kind.is_usable() && r.length >= bitmap_pages)
        .min_by_key(|r| r.length)
        .expect("no usable memory-map region is large enough to host the frame bitmap");

    let bitmap_phys = host_region.base;
    let bitmap_virt = addr::phys_to_virt(PhysAddr::new(bitmap_phys));
    let word_count = (total_pages as usize).div_ceil(64);

    // SAFETY: `bitmap_phys` lies inside a region the bootloader reported as
    // usable RAM, reached through the HHDM mapping the bootloader also set
    // up; it is large enough for `word_count` u64 words per the size check
    // above, and nothing else has touched it yet.
    let words: &'static mut [u64] = unsafe {
        let ptr = bitmap_virt.as_mut_ptr::<u64>();
        core::slice::from_raw_parts_mut(ptr, word_count)
    };
    words.fill(u64::MAX); // everything reserved until proven usable

    let mut bitmap = Bitmap {
        words,
        total_pages,
        used_pages: total_pages,
    };

    for region in regions {
        if region.kind.is_usable() {
            let start = region.base / FRAME_SIZE;
            let count = region.length / FRAME_SIZE;
            for page in start..start + count {
                if bitmap.get(page) {
                    bitmap.set(page, false);
                    bitmap.used_pages -= 1;
                }
            }
        }
    }

    // Re-reserve the bitmap's own storage: it was inside a usable region
    // that was just released above.
    let bitmap_start = bitmap_phys / FRAME_SIZE;
    let bitmap_page_count = bitmap_pages / FRAME_SIZE;
    for page in bitmap_start..bitmap_start + bitmap_page_count {
        if !bitmap.get(page) {
            bitmap.set(page, true);
            bitmap.used_pages += 1;
        }
    }

    log::info!(
        "frame allocator: {} total pages, {} reserved, bitmap at {:#x} ({} region kind {:?})",
        bitmap.total_pages,
        bitmap.used_pages,
        bitmap_phys,
        bitmap_pages,
        host_region.kind,
    );

    FrameAllocator {
        bitmap: Mutex::new(bitmap),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boot::RegionKind;

    /// Backs a fake "physical" region `0..len` with a real stack buffer,
    /// by setting the HHDM offset to the buffer's real address so
    /// `phys_to_virt(0)` lands on it. Lets the allocator run its real
    /// `init`/`allocate`/`release` paths without a live Limine boot, and
    /// without the synthetic region's "physical" span exploding to the
    /// buffer's actual (very large) address.
    #[repr(align(4096))]
    struct Ram([u8; 64 * 4096]);

    fn build(ram: &mut Ram) -> FrameAllocator {
        let real_addr = ram.0.as_mut_ptr() as u64;
        addr::init(real_addr);
        let region = MemoryRegion {
            base: 0,
            length: ram.0.len() as u64,
            kind: RegionKind::Usable,
        };
        super::init(core::iter::once(region))
    }

    #[test]
    fn allocate_then_release_is_reusable() {
        let mut ram = Ram([0u8; 64 * 4096]);
        let alloc = build(&mut ram);

        let a = alloc.allocate(FRAME_SIZE).unwrap();
        alloc.release(a.as_u64(), FRAME_SIZE).unwrap();
        let b = alloc.allocate(FRAME_SIZE).unwrap();
        assert_eq!(a, b, "released frame should be handed back out first");
    }

    #[test]
    fn allocations_do_not_overlap() {
        let mut ram = Ram([0u8; 64 * 4096]);
        let alloc = build(&mut ram);

        let a = alloc.allocate(FRAME_SIZE).unwrap();
        let b = alloc.allocate(FRAME_SIZE).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn reserve_rejects_misaligned_address() {
        let mut ram = Ram([0u8; 64 * 4096]);
        let alloc = build(&mut ram);
        assert_eq!(alloc.reserve(1, FRAME_SIZE), Err(KernelError::AddressAlignment));
    }

    #[test]
    fn reserve_then_reserve_again_fails() {
        let mut ram = Ram([0u8; 64 * 4096]);
        let alloc = build(&mut ram);
        let phys = alloc.allocate(FRAME_SIZE).unwrap();
        alloc.release(phys.as_u64(), FRAME_SIZE).unwrap();
        alloc.reserve(phys.as_u64(), FRAME_SIZE).unwrap();
        assert_eq!(alloc.reserve(phys.as_u64(), FRAME_SIZE), Err(KernelError::AlreadyUsed));
    }
}
