//! # Error Types
//!
//! Every decoding failure is one of these variants. All of them are fatal for the
//! compilation unit being decoded: once a read goes wrong the cursor no longer
//! points at the start of a field, so nothing after it can be trusted.

use thiserror::Error;

use crate::dwarf::constants::DW_FORM;

/// Errors produced while decoding DWARF sections
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A fixed-size or length-prefixed read would run past the end of its buffer
    #[error("truncated input at offset 0x{offset:x}")]
    TruncatedInput { offset: u64 },

    /// A LEB128 value has more significant bits than fit in 64
    #[error("LEB128 value at offset 0x{offset:x} does not fit in 64 bits")]
    MalformedLeb128 { offset: u64 },

    /// `.debug_abbrev` content that cannot be a valid abbreviation declaration
    ///
    /// This covers subtables missing their terminator, unknown tag or attribute
    /// values, duplicate codes, and units pointing at an offset where no subtable
    /// begins.
    #[error("malformed abbreviation at offset 0x{offset:x}: {reason}")]
    MalformedAbbreviation { offset: u64, reason: &'static str },

    /// A DIE uses an abbreviation code its unit's subtable does not declare
    #[error("unknown abbreviation code {code} for DIE at 0x{offset:x}")]
    UnknownAbbreviationCode { offset: u64, code: u64 },

    /// A form whose layout is deliberately not decoded
    #[error("unsupported attribute form {0:?}")]
    UnsupportedForm(DW_FORM),

    /// `DW_FORM_indirect` named a value that is not a form at all
    #[error("unknown attribute form 0x{value:x} at offset 0x{offset:x}")]
    UnknownForm { offset: u64, value: u64 },

    #[error("unsupported DWARF version {0}")]
    UnsupportedVersion(u16),

    #[error("unsupported DWARF5 unit type 0x{0:02x}")]
    UnsupportedUnitType(u8),

    #[error("unsupported address size {0}")]
    UnsupportedAddressSize(u8),

    /// A string or string-offset lookup outside its section
    #[error("offset 0x{offset:x} is out of bounds for a section of {len} bytes")]
    OutOfBounds { offset: u64, len: u64 },

    /// An attribute needs a section the caller did not supply
    #[error("required section {0} is missing")]
    MissingSection(&'static str),

    /// Any of the above, raised while decoding the unit starting at `offset`
    #[error("compilation unit at 0x{offset:08x}: {source}")]
    Unit {
        offset: u64,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Attach the start offset of the compilation unit being decoded.
    pub fn in_unit(self, offset: u64) -> Self {
        match self {
            Error::Unit { .. } => self,
            other => Error::Unit {
                offset,
                source: Box::new(other),
            },
        }
    }

    /// The error with any unit context stripped.
    pub fn kind(&self) -> &Error {
        match self {
            Error::Unit { source, .. } => source.kind(),
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
