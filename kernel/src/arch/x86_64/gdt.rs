//! The Global Descriptor Table: null, kernel code/data, user code/data.
//! Long mode makes segmentation almost irrelevant -- limits and most access
//! flags are ignored by the CPU -- but the five descriptors still have to
//! exist and be loaded for `iretq` and future ring transitions to have
//! valid selectors to reference. No TSS: this kernel never takes an
//! interrupt on a separate stack, so there is nothing for an IST to name.

use lazy_static::lazy_static;
use x86_64::instructions::segmentation::{Segment, CS, DS, ES, FS, GS, SS};
use x86_64::registers::segmentation::SegmentSelector;
use x86_64::structures::gdt::{Descriptor, GlobalDescriptorTable};
use x86_64::PrivilegeLevel;

struct Selectors {
    kernel_code: SegmentSelector,
    kernel_data: SegmentSelector,
    user_code: SegmentSelector,
    user_data: SegmentSelector,
}

lazy_static! {
    static ref GDT: (GlobalDescriptorTable, Selectors) = {
        let mut gdt = GlobalDescriptorTable::new();
        let kernel_code = gdt.append(Descriptor::kernel_code_segment());
        let kernel_data = gdt.append(Descriptor::kernel_data_segment());
        let user_code = gdt.append(Descriptor::user_code_segment());
        let user_data = gdt.append(Descriptor::user_data_segment());
        (
            gdt,
            Selectors {
                kernel_code,
                kernel_data,
                user_code,
                user_data,
            },
        )
    };
}

/// Loads the GDT and reloads every segment register. CS is reloaded via
/// `CS::set_reg`, which performs the far-jump `x86_64` needs to actually
/// change the active code segment rather than just the selector value.
pub fn init() {
    GDT.0.load();
    // SAFETY: the selectors above come straight out of the GDT we just
    // loaded, so they name valid, present descriptors.
    unsafe {
        CS::set_reg(GDT.1.kernel_code);
        DS::set_reg(GDT.1.kernel_data);
        ES::set_reg(GDT.1.kernel_data);
        SS::set_reg(GDT.1.kernel_data);
        FS::set_reg(SegmentSelector::new(0, PrivilegeLevel::Ring0));
        GS::set_reg(SegmentSelector::new(0, PrivilegeLevel::Ring0));
    }
}

#[allow(dead_code)]
pub fn user_code_selector() -> SegmentSelector {
    GDT.1.user_code
}

#[allow(dead_code)]
pub fn user_data_selector() -> SegmentSelector {
    GDT.1.user_data
}
