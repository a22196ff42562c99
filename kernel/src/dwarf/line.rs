//! The DWARF-5 line-number program: header parsing and the opcode state
//! machine that turns a byte program into `(pc) -> (file, line, column)`
//! lookups.

use super::reader::Reader;
use crate::dwarf::constants::{line_extended_opcode as ext, line_opcode as std_op, *};
use crate::error::{KernelError, Result};

const MAX_DIRS: usize = 32;
const MAX_FILES: usize = 64;
const MAX_STD_OPCODES: usize = 16;

/// Chooses which committed row answers a query, per §4.3 step 5. Function
/// lookups that already know they're looking at a call site use
/// `ExactLine`; stack-trace unwinding, where `pc` is a return address one
/// past the call, uses `PreviousLine`.
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    ExactLine,
    PreviousLine,
}

#[derive(Clone, Copy)]
struct Registers {
    address: u64,
    op_index: u64,
    file: u64,
    line: u64,
    column: u64,
    is_stmt: bool,
    basic_block: bool,
    end_sequence: bool,
    prologue_end: bool,
    epilogue_begin: bool,
    isa: u64,
    discriminator: u64,
}

impl Registers {
    fn initial(default_is_stmt: bool) -> Self {
        Registers {
            address: 0,
            op_index: 0,
            file: 1,
            line: 1,
            column: 0,
            is_stmt: default_is_stmt,
            basic_block: false,
            end_sequence: false,
            prologue_end: false,
            epilogue_begin: false,
            isa: 0,
            discriminator: 0,
        }
    }
}

struct Header {
    address_size: u8,
    minimum_instruction_length: u8,
    maximum_operations_per_instruction: u8,
    default_is_stmt: bool,
    line_base: i8,
    line_range: u8,
    opcode_base: u8,
    std_opcode_lengths: [u8; MAX_STD_OPCODES],
    directories: [u32; MAX_DIRS],
    dir_count: usize,
    files: [(u32, u64); MAX_FILES],
    file_count: usize,
    program_start: usize,
}

fn parse_header(reader: &mut Reader<'_>) -> Result<Header> {
    let unit_length = reader.u32()?;
    let unit_end = reader.position() + unit_length as usize;
    let version = reader.u16()?;
    if version != 5 {
        return Err(KernelError::DwarfUnsupportedVersion);
    }
    let address_size = reader.u8()?;
    let segment_selector_size = reader.u8()?;
    if segment_selector_size != 0 {
        return Err(KernelError::Unsupported);
    }
    let header_length = reader.u32()?;
    let program_start = reader.position() + header_length as usize;

    let minimum_instruction_length = reader.u8()?;
    let maximum_operations_per_instruction = reader.u8()?;
    let default_is_stmt = reader.u8()? != 0;
    let line_base = reader.i8()?;
    let line_range = reader.u8()?;
    let opcode_base = reader.u8()?;

    let mut std_opcode_lengths = [0u8; MAX_STD_OPCODES];
    let std_count = (opcode_base as usize - 1).min(MAX_STD_OPCODES);
    for slot in std_opcode_lengths.iter_mut().take(std_count) {
        *slot = reader.u8()?;
    }

    // Directory entry format: count must be 1, format must be
    // (DW_LNCT_path, DW_FORM_line_strp).
    let dir_format_count = reader.u8()?;
    if dir_format_count != 1 {
        return Err(KernelError::Unsupported);
    }
    let (lnct, form) = (reader.uleb128()?, reader.uleb128()?);
    if lnct != DW_LNCT_PATH || form != DW_FORM_LINE_STRP {
        return Err(KernelError::Unsupported);
    }
    let dir_count_raw = reader.uleb128()? as usize;
    let mut directories = [0u32; MAX_DIRS];
    let dir_count = dir_count_raw.min(MAX_DIRS);
    for i in 0..dir_count_raw {
        let offset = reader.u32()?;
        if i < MAX_DIRS {
            directories[i] = offset;
        }
    }

    // File entry format: count must be 2, formats (path, line_strp) and
    // (directory_index, udata).
    let file_format_count = reader.u8()?;
    if file_format_count != 2 {
        return Err(KernelError::Unsupported);
    }
    let (lnct0, form0) = (reader.uleb128()?, reader.uleb128()?);
    let (lnct1, form1) = (reader.uleb128()?, reader.uleb128()?);
    if lnct0 != DW_LNCT_PATH || form0 != DW_FORM_LINE_STRP {
        return Err(KernelError::Unsupported);
    }
    if lnct1 != DW_LNCT_DIRECTORY_INDEX {
        return Err(KernelError::Unsupported);
    }
    let file_count_raw = reader.uleb128()? as usize;
    let mut files = [(0u32, 0u64); MAX_FILES];
    let file_count = file_count_raw.min(MAX_FILES);
    for i in 0..file_count_raw {
        let path_offset = reader.u32()?;
        let dir_index = if form1 == DW_FORM_DATA1 {
            u64::from(reader.u8()?)
        } else if form1 == DW_FORM_DATA2 {
            u64::from(reader.u16()?)
        } else {
            reader.uleb128()?
        };
        if i < MAX_FILES {
            files[i] = (path_offset, dir_index);
        }
    }

    reader.seek(unit_end)?; // header parsing never needs to reach unit_end itself

    Ok(Header {
        address_size,
        minimum_instruction_length,
        maximum_operations_per_instruction: maximum_operations_per_instruction.max(1),
        default_is_stmt,
        line_base,
        line_range,
        opcode_base,
        std_opcode_lengths,
        directories,
        dir_count,
        files,
        file_count,
        program_start,
    })
}

pub struct LineResult<'a> {
    pub line: u64,
    pub column: u64,
    pub file_name: &'a str,
    pub directory_path: &'a str,
}

fn resolve_string(line_str: &[u8], offset: u32) -> Result<&str> {
    let mut reader = Reader::at(line_str, offset as usize)?;
    reader.c_string()
}

/// Runs the line-number program for the unit at `offset` in `.debug_line`
/// and returns the row selected for `pc` under `selection`.
pub fn query<'a>(line_section: &'a [u8], line_str: &'a [u8], offset: usize, pc: u64, selection: Selection) -> Result<Option<LineResult<'a>>> {
    let mut reader = Reader::at(line_section, offset)?;
    let header = parse_header(&mut reader)?;
    if header.address_size != 8 {
        return Err(KernelError::Unsupported);
    }

    let mut program = Reader::at(line_section, header.program_start)?;
    let mut current = Registers::initial(header.default_is_stmt);
    let mut previous = current;

    macro_rules! commit {
        () => {{
            let hit = match selection {
                Selection::ExactLine => {
                    if current.address == pc {
                        Some(current)
                    } else if current.address > pc {
                        Some(previous)
                    } else {
                        None
                    }
                }
                Selection::PreviousLine => {
                    if current.address >= pc {
                        Some(previous)
                    } else {
                        None
                    }
                }
            };
            if let Some(row) = hit {
                return resolve_row(&header, line_str, row);
            }
            previous = current;
        }};
    }

    while !program.is_empty() {
        let opcode = program.u8()?;
        if opcode == 0 {
            // Extended opcode: LEB128 length, then the opcode byte + args.
            let len = program.uleb128()? as usize;
            let next_pos = program.position() + len;
            let sub = program.u8()?;
            match sub {
                x if x == ext::END_SEQUENCE => {
                    current.end_sequence = true;
                    commit!();
                    current = Registers::initial(header.default_is_stmt);
                    previous = current;
                }
                x if x == ext::SET_ADDRESS => {
                    current.address = program.u64()?;
                    current.op_index = 0;
                }
                x if x == ext::SET_DISCRIMINATOR => {
                    current.discriminator = program.uleb128()?;
                }
                _ => {}
            }
            program.seek(next_pos)?;
        } else if opcode < header.opcode_base {
            match opcode {
                x if x == std_op::COPY => {
                    commit!();
                    current.discriminator = 0;
                    current.basic_block = false;
                    current.prologue_end = false;
                    current.epilogue_begin = false;
                }
                x if x == std_op::ADVANCE_PC => {
                    let adv = program.uleb128()?;
                    advance_pc(&mut current, &header, adv);
                }
                x if x == std_op::ADVANCE_LINE => {
                    let delta = program.sleb128()?;
                    current.line = (current.line as i64 + delta) as u64;
                }
                x if x == std_op::SET_FILE => {
                    current.file = program.uleb128()?;
                }
                x if x == std_op::SET_COLUMN => {
                    current.column = program.uleb128()?;
                }
                x if x == std_op::NEGATE_STMT => {
                    current.is_stmt = !current.is_stmt;
                }
                x if x == std_op::SET_BASIC_BLOCK => {
                    current.basic_block = true;
                }
                x if x == std_op::CONST_ADD_PC => {
                    let adjusted = (255 - header.opcode_base) as u64;
                    advance_pc(&mut current, &header, adjusted / header.line_range.max(1) as u64);
                }
                x if x == std_op::FIXED_ADVANCE_PC => {
                    current.address += u64::from(program.u16()?);
                    current.op_index = 0;
                }
                x if x == std_op::SET_PROLOGUE_END => {
                    current.prologue_end = true;
                }
                x if x == std_op::SET_EPILOGUE_BEGIN => {
                    current.epilogue_begin = true;
                }
                x if x == std_op::SET_ISA => {
                    current.isa = program.uleb128()?;
                }
                other => {
                    // Unknown standard opcode: skip its declared operand count.
                    let idx = other as usize - 1;
                    let argc = header.std_opcode_lengths.get(idx).copied().unwrap_or(0);
                    for _ in 0..argc {
                        program.uleb128()?;
                    }
                }
            }
        } else {
            let adjusted = (opcode - header.opcode_base) as u64;
            let line_range = header.line_range.max(1) as u64;
            advance_pc(&mut current, &header, adjusted / line_range);
            current.line = (current.line as i64 + header.line_base as i64 + (adjusted % line_range) as i64) as u64;
            commit!();
            current.basic_block = false;
            current.prologue_end = false;
            current.epilogue_begin = false;
            current.discriminator = 0;
        }
    }

    Ok(None)
}

fn advance_pc(regs: &mut Registers, header: &Header, op_advance: u64) {
    let max_ops = header.maximum_operations_per_instruction as u64;
    let min_len = header.minimum_instruction_length as u64;
    if max_ops <= 1 {
        regs.address += min_len * op_advance;
    } else {
        let total = regs.op_index + op_advance;
        regs.address += min_len * (total / max_ops);
        regs.op_index = total % max_ops;
    }
}

fn resolve_row<'a>(header: &Header, line_str: &'a [u8], row: Registers) -> Result<Option<LineResult<'a>>> {
    if row.file as usize == 0 || row.file as usize > header.file_count {
        return Err(KernelError::NotFound);
    }
    let (path_offset, dir_index) = header.files[row.file as usize - 1];
    let file_name = resolve_string(line_str, path_offset)?;
    let directory_path = if dir_index as usize == 0 || dir_index as usize > header.dir_count {
        // Directory index 0 conventionally names the compilation directory,
        // which this minimal table does not separately track.
        ""
    } else {
        resolve_string(line_str, header.directories[dir_index as usize - 1])?
    };
    Ok(Some(LineResult {
        line: row.line,
        column: row.column,
        file_name,
        directory_path,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedVec {
        data: [u8; 256],
        len: usize,
    }

    impl FixedVec {
        fn new() -> Self {
            FixedVec { data: [0; 256], len: 0 }
        }
        fn push(&mut self, b: u8) {
            self.data[self.len] = b;
            self.len += 1;
        }
        fn extend_from_slice(&mut self, bytes: &[u8]) {
            self.data[self.len..self.len + bytes.len()].copy_from_slice(bytes);
            self.len += bytes.len();
        }
        fn patch_u32(&mut self, pos: usize, value: u32) {
            self.data[pos..pos + 4].copy_from_slice(&value.to_le_bytes());
        }
        fn push_u32(&mut self, value: u32) {
            self.extend_from_slice(&value.to_le_bytes());
        }
        fn as_slice(&self) -> &[u8] {
            &self.data[..self.len]
        }
    }

    /// Builds one complete DWARF-5 line-number program: one directory, one
    /// file, and a program that sets the address to `0x1000`, commits a
    /// row at line 7, then advances to `0x1010` and commits line 9.
    fn build_unit() -> (FixedVec, FixedVec) {
        let mut line_str = FixedVec::new();
        let dir_offset = line_str.len;
        line_str.extend_from_slice(b"/src\0");
        let file_offset = line_str.len;
        line_str.extend_from_slice(b"main.rs\0");

        let mut unit = FixedVec::new();
        unit.extend_from_slice(&[0u8; 4]); // unit_length placeholder
        unit.extend_from_slice(&5u16.to_le_bytes()); // version
        unit.push(8); // address_size
        unit.push(0); // segment_selector_size
        let header_length_pos = unit.len;
        unit.extend_from_slice(&[0u8; 4]); // header_length placeholder
        let header_body_start = unit.len;

        unit.push(1); // minimum_instruction_length
        unit.push(1); // maximum_operations_per_instruction
        unit.push(1); // default_is_stmt
        unit.push((-5i8) as u8); // line_base
        unit.push(14); // line_range
        unit.push(13); // opcode_base
        unit.extend_from_slice(&[0, 1, 1, 1, 1, 0, 0, 0, 1, 0, 0, 1]); // 12 std opcode lengths

        unit.push(1); // directory_entry_format_count
        unit.extend_from_slice(&[DW_LNCT_PATH as u8, DW_FORM_LINE_STRP as u8]);
        unit.push(1); // directories_count (uleb128, fits in one byte)
        unit.push_u32(dir_offset as u32);

        unit.push(2); // file_entry_format_count
        unit.extend_from_slice(&[DW_LNCT_PATH as u8, DW_FORM_LINE_STRP as u8]);
        unit.extend_from_slice(&[DW_LNCT_DIRECTORY_INDEX as u8, DW_FORM_DATA1 as u8]);
        unit.push(1); // file_names_count
        unit.push_u32(file_offset as u32);
        unit.push(1); // directory_index

        let program_start = unit.len;
        let header_length = (program_start - header_body_start) as u32;
        unit.patch_u32(header_length_pos, header_length);

        // Program: DW_LNE_set_address 0x1000; special opcode to commit
        // line 7; DW_LNS_advance_pc 16; special opcode to commit line 9;
        // DW_LNE_end_sequence.
        unit.push(0); // extended opcode marker
        unit.push(9); // length: 1 (sub-opcode) + 8 (address)
        unit.push(ext::SET_ADDRESS);
        unit.extend_from_slice(&0x1000u64.to_le_bytes());

        // special opcode for line advance of +6 (7 - default 1), addr advance 0:
        // adjusted = (line_delta - line_base) + (line_range * addr_advance)
        //          = (6 - (-5)) + 14*0 = 11; opcode = adjusted + opcode_base = 24
        unit.push(11 + 13);

        unit.push(std_op::ADVANCE_PC);
        unit.push(16); // uleb128(16)

        // special opcode for line advance of +2 (9 - 7), addr advance 0:
        // adjusted = (2 - (-5)) + 0 = 7; opcode = 7 + 13 = 20
        unit.push(7 + 13);

        unit.push(0);
        unit.push(1);
        unit.push(ext::END_SEQUENCE);

        let unit_length = (unit.len - 4) as u32;
        unit.patch_u32(0, unit_length);

        (unit, line_str)
    }

    #[test]
    fn exact_line_stops_at_matching_address() {
        let (unit, line_str) = build_unit();
        let result = query(unit.as_slice(), line_str.as_slice(), 0, 0x1010, Selection::ExactLine)
            .unwrap()
            .unwrap();
        assert_eq!(result.line, 9);
        assert_eq!(result.file_name, "main.rs");
        assert_eq!(result.directory_path, "/src");
    }

    #[test]
    fn previous_line_stops_before_overshooting_address() {
        let (unit, line_str) = build_unit();
        // An address between the two committed rows should resolve to the
        // first row under PREVIOUS_LINE, since 0x1010 has not committed yet.
        let result = query(unit.as_slice(), line_str.as_slice(), 0, 0x1008, Selection::PreviousLine)
            .unwrap()
            .unwrap();
        assert_eq!(result.line, 7);
    }

    #[test]
    fn advance_pc_without_vliw_is_plain_multiply() {
        let header = Header {
            address_size: 8,
            minimum_instruction_length: 4,
            maximum_operations_per_instruction: 1,
            default_is_stmt: true,
            line_base: -5,
            line_range: 14,
            opcode_base: 13,
            std_opcode_lengths: [0; MAX_STD_OPCODES],
            directories: [0; MAX_DIRS],
            dir_count: 0,
            files: [(0, 0); MAX_FILES],
            file_count: 0,
            program_start: 0,
        };
        let mut regs = Registers::initial(true);
        advance_pc(&mut regs, &header, 3);
        assert_eq!(regs.address, 12);
        assert_eq!(regs.op_index, 0);
    }

    #[test]
    fn advance_pc_with_vliw_tracks_op_index() {
        let header = Header {
            address_size: 8,
            minimum_instruction_length: 2,
            maximum_operations_per_instruction: 3,
            default_is_stmt: true,
            line_base: -5,
            line_range: 14,
            opcode_base: 13,
            std_opcode_lengths: [0; MAX_STD_OPCODES],
            directories: [0; MAX_DIRS],
            dir_count: 0,
            files: [(0, 0); MAX_FILES],
            file_count: 0,
            program_start: 0,
        };
        let mut regs = Registers::initial(true);
        advance_pc(&mut regs, &header, 4); // total op_index 4 over max_ops 3
        assert_eq!(regs.address, 2); // 2 * (4/3)
        assert_eq!(regs.op_index, 1); // 4 % 3
    }
}
