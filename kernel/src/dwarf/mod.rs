//! The DWARF-5 symbolicator: turns a program counter into a function
//! name and source location using the kernel's own debug sections.
//!
//! Nothing here touches the heap — every parser reads directly out of
//! the borrowed section slices handed to [`Context::load_sections`], so
//! symbolication works even when called from the panic path with the
//! allocator in an unknown state.

pub mod abbrev;
pub mod constants;
pub mod die;
pub mod line;
pub mod reader;

use constants::*;
use die::next_die;
use line::Selection;
use reader::Reader;

use crate::elf::Image;
use crate::error::{KernelError, Result};
use crate::sync::OnceCell;

#[derive(Clone, Copy)]
struct Sections<'a> {
    info: &'a [u8],
    abbrev: &'a [u8],
    aranges: &'a [u8],
    line: &'a [u8],
    line_str: &'a [u8],
    str_: &'a [u8],
}

pub struct Context<'a> {
    sections: Sections<'a>,
}

pub struct FunctionMatch<'a> {
    pub name: &'a str,
}

pub struct LineMatch<'a> {
    pub line: u64,
    pub column: u64,
    pub file_name: &'a str,
    pub directory_path: &'a str,
}

static CONTEXT: OnceCell<Context<'static>> = OnceCell::new();

/// Parses the kernel's own ELF image (as handed back by the bootloader)
/// and installs the global symbolication context. Idempotent: a second
/// call is rejected quietly by `OnceCell`, matching the "second call is a
/// no-op" requirement.
pub fn init(kernel_image: &'static [u8]) -> Result<()> {
    let ctx = Context::load(kernel_image)?;
    CONTEXT.get_or_init(|| ctx);
    Ok(())
}

pub fn context() -> Option<&'static Context<'static>> {
    CONTEXT.get()
}

impl<'a> Context<'a> {
    fn section(image: &Image<'a>, name: &str) -> Result<&'a [u8]> {
        image.section_by_name(name)?.ok_or(KernelError::UnexpectedNull)
    }

    /// Caches the six section spans used by every query below.
    pub fn load(data: &'a [u8]) -> Result<Self> {
        let image = Image::parse(data)?;
        let sections = Sections {
            info: Self::section(&image, ".debug_info")?,
            abbrev: Self::section(&image, ".debug_abbrev")?,
            aranges: Self::section(&image, ".debug_aranges")?,
            line: Self::section(&image, ".debug_line")?,
            line_str: Self::section(&image, ".debug_line_str")?,
            str_: Self::section(&image, ".debug_str")?,
        };
        Ok(Context { sections })
    }

    /// Scans `.debug_aranges` for the unit whose address ranges contain
    /// `pc`, returning that unit's `.debug_info` offset.
    fn cu_offset_for_address(&self, pc: u64) -> Result<Option<usize>> {
        let mut reader = Reader::new(self.sections.aranges);
        while !reader.is_empty() {
            let unit_start = reader.position();
            let unit_length = reader.u32()?;
            let unit_end = reader.position() + unit_length as usize;

            let version = reader.u16()?;
            if version != 2 {
                return Err(KernelError::DwarfUnsupportedVersion);
            }
            let debug_info_offset = reader.u32()? as usize;
            let address_size = reader.u8()?;
            let segment_size = reader.u8()?;
            if address_size != 8 || segment_size != 0 {
                return Err(KernelError::DwarfUnsupportedHeader);
            }

            let header_len = reader.position() - unit_start;
            let tuple_align = 2 * address_size as usize;
            let padding = (tuple_align - (header_len % tuple_align)) % tuple_align;
            reader.skip(padding)?;

            loop {
                if reader.position() >= unit_end {
                    break;
                }
                let addr = reader.u64()?;
                let length = reader.u64()?;
                if addr == 0 && length == 0 {
                    break;
                }
                if pc >= addr && pc < addr + length {
                    return Ok(Some(debug_info_offset));
                }
            }

            reader.seek(unit_end)?;
        }
        Ok(None)
    }

    /// Validates the compilation-unit header at `offset` and returns
    /// `(first_die_offset, unit_end, abbrev_offset)`.
    fn verify_cu_header(&self, offset: usize) -> Result<(usize, usize, usize)> {
        let mut reader = Reader::at(self.sections.info, offset)?;
        let unit_length = reader.u32()?;
        let unit_end = reader.position() + unit_length as usize;
        let version = reader.u16()?;
        if version != 5 {
            return Err(KernelError::DwarfUnsupportedVersion);
        }
        let unit_type = reader.u8()?;
        if unit_type != DW_UT_COMPILE {
            return Err(KernelError::DwarfInvalidHeader);
        }
        let _address_size = reader.u8()?;
        let abbrev_offset = reader.u32()? as usize;
        Ok((reader.position(), unit_end, abbrev_offset))
    }

    fn resolve_name(&self, value: die::AttrValue<'a>, form_is_strp: bool) -> Result<&'a str> {
        let offset = value.as_u64().ok_or(KernelError::DwarfInvalidUnit)? as usize;
        let section = if form_is_strp { self.sections.str_ } else { self.sections.line_str };
        let mut r = Reader::at(section, offset)?;
        r.c_string()
    }

    /// Finds the subprogram DIE containing `pc` and returns its name.
    pub fn query_func(&self, pc: u64) -> Result<Option<FunctionMatch<'a>>> {
        let Some(cu_offset) = self.cu_offset_for_address(pc)? else {
            return Ok(None);
        };
        let (dies_start, dies_end, abbrev_offset) = self.verify_cu_header(cu_offset)?;

        let mut info = Reader::at(self.sections.info, dies_start)?;
        // The compile-unit DIE itself; skip past it to its children.
        let _cu_die = next_die(&mut info, self.sections.abbrev, abbrev_offset)?;

        while info.position() < dies_end {
            let die = next_die(&mut info, self.sections.abbrev, abbrev_offset)?;
            if die.tag == 0 {
                continue;
            }
            if die.tag == DW_TAG_SUBPROGRAM {
                if let (Some(low_pc), Some(high_pc_len)) =
                    (die.attr(DW_AT_LOW_PC).and_then(|v| v.as_u64()), die.attr(DW_AT_HIGH_PC).and_then(|v| v.as_u64()))
                {
                    if pc >= low_pc && pc < low_pc + high_pc_len {
                        if let Some(name_val) = die.attr(DW_AT_NAME) {
                            let name = match name_val {
                                die::AttrValue::Str(s) => s,
                                die::AttrValue::Number(_) => self.resolve_name(name_val, true)?,
                            };
                            return Ok(Some(FunctionMatch { name }));
                        }
                    }
                }
            }
        }
        Ok(None)
    }

    /// Resolves `pc` to a source line using the compile unit's line
    /// program, per the selection policy appropriate to the caller (see
    /// [`Selection`]).
    pub fn query_line(&self, pc: u64, selection: Selection) -> Result<Option<LineMatch<'a>>> {
        let Some(cu_offset) = self.cu_offset_for_address(pc)? else {
            return Ok(None);
        };
        let (dies_start, _dies_end, abbrev_offset) = self.verify_cu_header(cu_offset)?;

        let mut info = Reader::at(self.sections.info, dies_start)?;
        let cu_die = next_die(&mut info, self.sections.abbrev, abbrev_offset)?;
        if cu_die.tag != DW_TAG_COMPILE_UNIT {
            return Err(KernelError::DwarfInvalidUnit);
        }
        let stmt_list = cu_die
            .attr(DW_AT_STMT_LIST)
            .and_then(|v| v.as_u64())
            .ok_or(KernelError::NotFound)?;

        let result = line::query(self.sections.line, self.sections.line_str, stmt_list as usize, pc, selection)?;
        Ok(result.map(|r| LineMatch {
            line: r.line,
            column: r.column,
            file_name: r.file_name,
            directory_path: r.directory_path,
        }))
    }
}
