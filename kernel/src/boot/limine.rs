//! The Limine protocol handshake.
//!
//! Request records live in the `.requests` link section, bracketed by the
//! start/end markers Limine's protocol uses to find them regardless of the
//! surrounding object layout. Each request is a `static`, queried once
//! `init()` runs (after the bootloader has handed control to `_start`), and
//! narrowed into the plain [`BootInfo`] the rest of the kernel consumes.

use limine::memory_map::EntryType;
use limine::request::{
    ExecutableAddressRequest, ExecutableFileRequest, FramebufferRequest, HhdmRequest,
    MemoryMapRequest, RequestsEndMarker, RequestsStartMarker,
};
use limine::BaseRevision;

#[used]
#[link_section = ".requests"]
static BASE_REVISION: BaseRevision = BaseRevision::new();

#[used]
#[link_section = ".requests"]
static MEMMAP_REQUEST: MemoryMapRequest = MemoryMapRequest::new();

#[used]
#[link_section = ".requests"]
static HHDM_REQUEST: HhdmRequest = HhdmRequest::new();

#[used]
#[link_section = ".requests"]
static KERNEL_ADDRESS_REQUEST: ExecutableAddressRequest = ExecutableAddressRequest::new();

#[used]
#[link_section = ".requests"]
static KERNEL_FILE_REQUEST: ExecutableFileRequest = ExecutableFileRequest::new();

#[used]
#[link_section = ".requests"]
static FRAMEBUFFER_REQUEST: FramebufferRequest = FramebufferRequest::new();

#[used]
#[link_section = ".requests_start_marker"]
static _START_MARKER: RequestsStartMarker = RequestsStartMarker::new();

#[used]
#[link_section = ".requests_end_marker"]
static _END_MARKER: RequestsEndMarker = RequestsEndMarker::new();

/// One physical memory region, narrowed from Limine's `memory_map::Entry`.
#[derive(Debug, Clone, Copy)]
pub struct MemoryRegion {
    pub base: u64,
    pub length: u64,
    pub kind: RegionKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionKind {
    Usable,
    Reserved,
    AcpiReclaimable,
    AcpiNvs,
    BadMemory,
    BootloaderReclaimable,
    KernelAndModules,
    Framebuffer,
    Unknown(u64),
}

impl From<EntryType> for RegionKind {
    fn from(value: EntryType) -> Self {
        match value {
            EntryType::USABLE => RegionKind::Usable,
            EntryType::RESERVED => RegionKind::Reserved,
            EntryType::ACPI_RECLAIMABLE => RegionKind::AcpiReclaimable,
            EntryType::ACPI_NVS => RegionKind::AcpiNvs,
            EntryType::BAD_MEMORY => RegionKind::BadMemory,
            EntryType::BOOTLOADER_RECLAIMABLE => RegionKind::BootloaderReclaimable,
            EntryType::EXECUTABLE_AND_MODULES => RegionKind::KernelAndModules,
            EntryType::FRAMEBUFFER => RegionKind::Framebuffer,
            // SAFETY: `EntryType` is `#[repr(transparent)]` over a `u64` and
            // has no private invariants beyond that raw value, so this is a
            // value-preserving reinterpretation.
            other => RegionKind::Unknown(unsafe { core::mem::transmute::<EntryType, u64>(other) }),
        }
    }
}

impl RegionKind {
    pub fn is_usable(self) -> bool {
        matches!(self, RegionKind::Usable)
    }
}

/// Framebuffer geometry, narrowed from Limine's `Framebuffer` response.
#[derive(Debug, Clone, Copy)]
pub struct FramebufferInfo {
    pub addr: *mut u8,
    pub width: u64,
    pub height: u64,
    pub pitch: u64,
    pub bpp: u16,
}

// SAFETY: the framebuffer pointer is a boot-time-fixed MMIO mapping handed
// to us by the bootloader; it is valid for the kernel's entire lifetime and
// every access to it goes through `boot::console`, which serializes writes.
unsafe impl Send for FramebufferInfo {}

/// Everything the rest of the kernel needs from the bootloader handshake.
pub struct BootInfo {
    pub hhdm_offset: u64,
    pub kernel_phys_base: u64,
    pub kernel_virt_base: u64,
    pub kernel_file: Option<(*const u8, usize)>,
    pub framebuffer: Option<FramebufferInfo>,
}

// SAFETY: `kernel_file` points into the bootloader-provided, read-only
// kernel image, which outlives the kernel; `framebuffer` is `Send` for the
// reason given above.
unsafe impl Send for BootInfo {}
unsafe impl Sync for BootInfo {}

/// Performs the full Limine handshake. Panics (there is no diagnostic sink
/// yet at this point besides the raw halt loop) if the bootloader's base
/// revision is unsupported or a required response is missing.
pub fn handshake() -> BootInfo {
    assert!(BASE_REVISION.is_supported(), "unsupported Limine base revision");

    let hhdm_offset = HHDM_REQUEST
        .get_response()
        .expect("Limine did not answer the HHDM request")
        .offset();

    let kernel_address = KERNEL_ADDRESS_REQUEST
        .get_response()
        .expect("Limine did not answer the kernel address request");

    let kernel_file = KERNEL_FILE_REQUEST
        .get_response()
        .map(|r| r.file())
        .map(|f| (f.addr().cast_const(), f.size() as usize));

    let framebuffer = FRAMEBUFFER_REQUEST
        .get_response()
        .and_then(|r| r.framebuffers().next())
        .map(|fb| FramebufferInfo {
            addr: fb.addr(),
            width: fb.width(),
            height: fb.height(),
            pitch: fb.pitch(),
            bpp: fb.bpp(),
        });

    BootInfo {
        hhdm_offset,
        kernel_phys_base: kernel_address.physical_base(),
        kernel_virt_base: kernel_address.virtual_base(),
        kernel_file,
        framebuffer,
    }
}

/// Iterates the Limine-supplied memory map, narrowed to [`MemoryRegion`].
/// Panics if the bootloader did not answer the memory map request -- without
/// it the frame allocator has nothing to initialize from.
pub fn memory_map() -> impl Iterator<Item = MemoryRegion> + Clone {
    let entries = MEMMAP_REQUEST
        .get_response()
        .expect("Limine did not answer the memory map request")
        .entries();

    entries.iter().map(|e| MemoryRegion {
        base: e.base,
        length: e.length,
        kind: e.entry_type.into(),
    })
}
