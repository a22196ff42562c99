//! The `err_code` taxonomy.
//!
//! Every fallible operation in this kernel returns one of these variants --
//! never a composite, never a payload-bearing catch-all. `Result<T,
//! KernelError>` is threaded through with `?`; the panic path is the only
//! place a `KernelError` is ever turned into a fatal halt.

use core::fmt;

pub type Result<T> = core::result::Result<T, KernelError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// A read or index would cross the end of its bounded region.
    OutOfBounds,
    /// A pointer or response the caller required was null/absent.
    UnexpectedNull,
    /// A prerequisite subsystem has not been initialized yet.
    DependencyNotLoaded,
    /// The input is well-formed but this kernel does not implement it.
    Unsupported,
    /// The operation is recognized but not yet implemented.
    NotImplemented,
    /// The requested item does not exist.
    NotFound,
    /// There is not enough room (physical memory, heap, table pool slots).
    InsufficientSpace,
    /// An address is outside any valid range for the operation.
    InvalidAddress,
    /// An address does not meet the operation's alignment requirement.
    AddressAlignment,
    /// The target is already reserved/allocated/mapped.
    AlreadyUsed,
    /// The target is already free/unmapped.
    AlreadyFree,

    /// DWARF: a `.debug_aranges`/`.debug_info` unit reports an unsupported
    /// version.
    DwarfUnsupportedVersion,
    /// DWARF: a header field this kernel does not parse (e.g. more than one
    /// directory/file entry format).
    DwarfUnsupportedHeader,
    /// DWARF: a header failed a structural check (bad length, bad counts).
    DwarfInvalidHeader,
    /// DWARF: a compilation unit is malformed (wrong unit type, truncated).
    DwarfInvalidUnit,
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            KernelError::OutOfBounds => "out of bounds",
            KernelError::UnexpectedNull => "unexpected null",
            KernelError::DependencyNotLoaded => "dependency not loaded",
            KernelError::Unsupported => "unsupported",
            KernelError::NotImplemented => "not implemented",
            KernelError::NotFound => "not found",
            KernelError::InsufficientSpace => "insufficient space",
            KernelError::InvalidAddress => "invalid address",
            KernelError::AddressAlignment => "address alignment",
            KernelError::AlreadyUsed => "already used",
            KernelError::AlreadyFree => "already free",
            KernelError::DwarfUnsupportedVersion => "dwarf: unsupported version",
            KernelError::DwarfUnsupportedHeader => "dwarf: unsupported header",
            KernelError::DwarfInvalidHeader => "dwarf: invalid header",
            KernelError::DwarfInvalidUnit => "dwarf: invalid unit",
        };
        f.write_str(msg)
    }
}
