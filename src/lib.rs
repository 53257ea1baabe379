//! Decoder for the DWARF debugging information in `.debug_info` and its
//! companion sections.
//!
//! Section bytes are handed in already extracted from the object file; see
//! [`dwarf::sections::DwarfSections`]. [`dwarf::DwarfInfo`] decodes every
//! compilation unit into a DIE tree and answers string and reference queries
//! against it.

pub mod dwarf;
pub mod error;
pub mod util;

pub use error::{Error, Result};
