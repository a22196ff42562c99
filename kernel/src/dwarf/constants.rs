//! DWARF-5 tag/attribute/form constants actually consulted by this
//! symbolicator. Not exhaustive — only the subset §4.3 names.

#![allow(dead_code)]

pub const DW_TAG_COMPILE_UNIT: u64 = 0x11;
pub const DW_TAG_SUBPROGRAM: u64 = 0x2e;

pub const DW_AT_NAME: u64 = 0x03;
pub const DW_AT_STMT_LIST: u64 = 0x10;
pub const DW_AT_LOW_PC: u64 = 0x11;
pub const DW_AT_HIGH_PC: u64 = 0x12;

pub const DW_FORM_ADDR: u64 = 0x01;
pub const DW_FORM_DATA1: u64 = 0x0b;
pub const DW_FORM_DATA2: u64 = 0x05;
pub const DW_FORM_DATA4: u64 = 0x06;
pub const DW_FORM_DATA8: u64 = 0x07;
pub const DW_FORM_STRING: u64 = 0x08;
pub const DW_FORM_STRP: u64 = 0x0e;
pub const DW_FORM_REF4: u64 = 0x13;
pub const DW_FORM_SEC_OFFSET: u64 = 0x17;
pub const DW_FORM_EXPRLOC: u64 = 0x18;
pub const DW_FORM_FLAG_PRESENT: u64 = 0x19;
pub const DW_FORM_LINE_STRP: u64 = 0x1f;
pub const DW_FORM_IMPLICIT_CONST: u64 = 0x21;

pub const DW_UT_COMPILE: u8 = 0x01;

pub const DW_LNCT_PATH: u64 = 1;
pub const DW_LNCT_DIRECTORY_INDEX: u64 = 2;

/// Standard line-number opcodes, DWARF §6.2.5.2.
pub mod line_opcode {
    pub const COPY: u8 = 1;
    pub const ADVANCE_PC: u8 = 2;
    pub const ADVANCE_LINE: u8 = 3;
    pub const SET_FILE: u8 = 4;
    pub const SET_COLUMN: u8 = 5;
    pub const NEGATE_STMT: u8 = 6;
    pub const SET_BASIC_BLOCK: u8 = 7;
    pub const CONST_ADD_PC: u8 = 8;
    pub const FIXED_ADVANCE_PC: u8 = 9;
    pub const SET_PROLOGUE_END: u8 = 10;
    pub const SET_EPILOGUE_BEGIN: u8 = 11;
    pub const SET_ISA: u8 = 12;
}

/// Extended line-number opcodes, DWARF §6.2.5.3.
pub mod line_extended_opcode {
    pub const END_SEQUENCE: u8 = 1;
    pub const SET_ADDRESS: u8 = 2;
    pub const SET_DISCRIMINATOR: u8 = 4;
}
