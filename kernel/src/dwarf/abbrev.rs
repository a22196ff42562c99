//! `.debug_abbrev` lookup: given a code, locate the matching abbreviation
//! entry's attribute-form pairs.

use super::reader::Reader;
use crate::error::{KernelError, Result};

use crate::dwarf::constants::DW_FORM_IMPLICIT_CONST;

#[derive(Clone, Copy)]
pub struct AbbrevEntry<'a> {
    pub tag: u64,
    pub has_children: bool,
    /// Byte range within `.debug_abbrev` spanning this entry's
    /// `(name, form[, const])` triples, positioned just past the
    /// has-children byte.
    pub attrs: Reader<'a>,
}

/// Attribute specification as read one step at a time from an
/// [`AbbrevEntry`]'s attribute stream.
pub struct AttrSpec {
    pub name: u64,
    pub form: u64,
    pub implicit_const: Option<i64>,
}

impl<'a> AbbrevEntry<'a> {
    /// Reads the next `(name, form)` pair, or `None` at the `(0, 0)`
    /// terminator.
    pub fn next_attr(attrs: &mut Reader<'a>) -> Result<Option<AttrSpec>> {
        let name = attrs.uleb128()?;
        let form = attrs.uleb128()?;
        if name == 0 && form == 0 {
            return Ok(None);
        }
        let implicit_const = if form == DW_FORM_IMPLICIT_CONST {
            Some(attrs.sleb128()?)
        } else {
            None
        };
        Ok(Some(AttrSpec { name, form, implicit_const }))
    }
}

/// Walks `.debug_abbrev` from `start` looking for the entry whose code
/// matches. Returns `None` (not an error) if the table is exhausted
/// without a match.
pub fn find<'a>(section: &'a [u8], start: usize, code: u64) -> Result<Option<AbbrevEntry<'a>>> {
    let mut reader = Reader::at(section, start)?;
    loop {
        if reader.is_empty() {
            return Ok(None);
        }
        let entry_code = reader.uleb128()?;
        if entry_code == 0 {
            return Ok(None);
        }
        let tag = reader.uleb128()?;
        let has_children = reader.u8()? != 0;
        let attrs_start = reader.position();

        // Walk this entry's attribute list to find where it ends, without
        // materializing it, so the cursor can resume at the next entry.
        let mut scan = reader;
        loop {
            let name = scan.uleb128()?;
            let form = scan.uleb128()?;
            if form == DW_FORM_IMPLICIT_CONST {
                scan.sleb128()?;
            }
            if name == 0 && form == 0 {
                break;
            }
        }

        if entry_code == code {
            let attrs = Reader::at(section, attrs_start)?;
            return Ok(Some(AbbrevEntry { tag, has_children, attrs }));
        }

        reader = scan;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_abbrev() -> [u8; 14] {
        [
            0x01, 0x11, 0x01, // code=1, tag=compile_unit(0x11), children=1
            0x10, 0x17, // DW_AT_stmt_list, DW_FORM_sec_offset
            0x00, 0x00, // terminator
            0x02, 0x2e, 0x00, // code=2, tag=subprogram(0x2e), children=0
            0x03, 0x0e, // DW_AT_name, DW_FORM_strp
            0x00, 0x00, // terminator
        ]
    }

    #[test]
    fn finds_second_entry_after_skipping_first() {
        let section = sample_abbrev();
        let entry = find(&section, 0, 2).unwrap().unwrap();
        assert_eq!(entry.tag, 0x2e);
        assert!(!entry.has_children);
    }

    #[test]
    fn missing_code_returns_none() {
        let section = sample_abbrev();
        assert!(find(&section, 0, 99).unwrap().is_none());
    }
}
