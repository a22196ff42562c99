//! Debug Information Entry materialization: reads one DIE's attributes
//! from `.debug_info`, guided by its abbreviation entry.

use super::abbrev::{self, AbbrevEntry, AttrSpec};
use super::reader::Reader;
use crate::dwarf::constants::*;
use crate::error::{KernelError, Result};

const MAX_ATTRS: usize = 15;

#[derive(Clone, Copy)]
pub enum AttrValue<'a> {
    /// A plain integer: `dataN`, `addr`, `flag_present` (1), `exprloc`
    /// (the skipped byte count), `implicit_const`, or a raw 32-bit
    /// section offset for `strp`/`line_strp`/`sec_offset`/`ref4`.
    Number(u64),
    /// An inline `DW_FORM_string` C-string read directly out of
    /// `.debug_info`.
    Str(&'a str),
}

impl<'a> AttrValue<'a> {
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            AttrValue::Number(n) => Some(*n),
            AttrValue::Str(_) => None,
        }
    }
}

pub struct Die<'a> {
    pub tag: u64,
    pub has_children: bool,
    names: [u64; MAX_ATTRS],
    values: [AttrValueStorage<'a>; MAX_ATTRS],
    count: usize,
}

#[derive(Clone, Copy)]
enum AttrValueStorage<'a> {
    Number(u64),
    Str(&'a str),
    Empty,
}

impl<'a> Die<'a> {
    pub fn attr(&self, name: u64) -> Option<AttrValue<'a>> {
        for i in 0..self.count {
            if self.names[i] == name {
                return Some(match self.values[i] {
                    AttrValueStorage::Number(n) => AttrValue::Number(n),
                    AttrValueStorage::Str(s) => AttrValue::Str(s),
                    AttrValueStorage::Empty => unreachable!(),
                });
            }
        }
        None
    }
}

fn read_form<'a>(
    info: &mut Reader<'a>,
    form: u64,
    implicit_const: Option<i64>,
) -> Result<AttrValueStorage<'a>> {
    let value = match form {
        DW_FORM_STRP | DW_FORM_LINE_STRP | DW_FORM_SEC_OFFSET | DW_FORM_REF4 | DW_FORM_DATA4 => {
            AttrValueStorage::Number(u64::from(info.u32()?))
        }
        DW_FORM_DATA1 => AttrValueStorage::Number(u64::from(info.u8()?)),
        DW_FORM_DATA2 => AttrValueStorage::Number(u64::from(info.u16()?)),
        DW_FORM_DATA8 | DW_FORM_ADDR => AttrValueStorage::Number(info.u64()?),
        DW_FORM_STRING => AttrValueStorage::Str(info.c_string()?),
        DW_FORM_FLAG_PRESENT => AttrValueStorage::Number(1),
        DW_FORM_EXPRLOC => {
            let size = info.uleb128()?;
            info.skip(size as usize)?;
            AttrValueStorage::Number(size)
        }
        DW_FORM_IMPLICIT_CONST => {
            AttrValueStorage::Number(implicit_const.ok_or(KernelError::DwarfInvalidUnit)? as u64)
        }
        _ => return Err(KernelError::Unsupported),
    };
    Ok(value)
}

/// Reads one DIE: the abbreviation code from `info`, code `0` is the
/// null DIE (end-of-children marker, `tag = 0`, no attributes). Walks
/// the matching abbreviation entry's attribute specs in lockstep with
/// `.debug_info` to materialize each value.
pub fn next_die<'a>(
    info: &mut Reader<'a>,
    abbrev_section: &'a [u8],
    abbrev_offset: usize,
) -> Result<Die<'a>> {
    let code = info.uleb128()?;
    if code == 0 {
        return Ok(Die {
            tag: 0,
            has_children: false,
            names: [0; MAX_ATTRS],
            values: [AttrValueStorage::Empty; MAX_ATTRS],
            count: 0,
        });
    }

    let AbbrevEntry { tag, has_children, mut attrs } = abbrev::find(abbrev_section, abbrev_offset, code)?
        .ok_or(KernelError::DwarfInvalidUnit)?;

    let mut names = [0u64; MAX_ATTRS];
    let mut values = [AttrValueStorage::Empty; MAX_ATTRS];
    let mut count = 0;

    while let Some(AttrSpec { name, form, implicit_const }) = AbbrevEntry::next_attr(&mut attrs)? {
        let value = read_form(info, form, implicit_const)?;
        if count < MAX_ATTRS {
            names[count] = name;
            values[count] = value;
            count += 1;
        }
    }

    Ok(Die { tag, has_children, names, values, count })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_subprogram_die_with_name_and_pc_range() {
        // abbrev: code=1 tag=subprogram(0x2e) children=0,
        // attrs: (low_pc, addr), (high_pc, data8), (name, strp), term.
        let abbrev = [
            0x01, 0x2e, 0x00, 0x11, 0x01, 0x12, 0x07, 0x03, 0x0e, 0x00, 0x00,
        ];
        let mut info_bytes = [0u8; 21];
        info_bytes[0] = 0x01; // abbrev code
        info_bytes[1..9].copy_from_slice(&0x1000u64.to_le_bytes()); // low_pc
        info_bytes[9..17].copy_from_slice(&0x40u64.to_le_bytes()); // high_pc (length)
        info_bytes[17..21].copy_from_slice(&0x20u32.to_le_bytes()); // name strp offset
        let mut info = Reader::new(&info_bytes);

        let die = next_die(&mut info, &abbrev, 0).unwrap();
        assert_eq!(die.tag, 0x2e);
        assert_eq!(die.attr(DW_AT_LOW_PC).unwrap().as_u64(), Some(0x1000));
        assert_eq!(die.attr(DW_AT_HIGH_PC).unwrap().as_u64(), Some(0x40));
        assert_eq!(die.attr(DW_AT_NAME).unwrap().as_u64(), Some(0x20));
    }

    #[test]
    fn null_die_has_tag_zero() {
        let abbrev = [0x00];
        let info_bytes = [0x00u8];
        let mut info = Reader::new(&info_bytes);
        let die = next_die(&mut info, &abbrev, 0).unwrap();
        assert_eq!(die.tag, 0);
    }
}
