use std::ffi::CStr;

use tracing::trace;

use crate::{
    error::{Error, Result},
    util::Reader,
};

/// Raw debug section contents, borrowed from whoever loaded the object file.
///
/// An empty slice means the section is absent.
#[derive(Debug, Clone, Copy, Default)]
pub struct DwarfSections<'a> {
    pub abbrev: &'a [u8],
    pub info: &'a [u8],
    pub str: &'a [u8],
    pub str_offsets: &'a [u8],
    pub line_str: &'a [u8],
}

impl<'a> DwarfSections<'a> {
    pub const NAMES: [&'static str; 5] = [
        ".debug_abbrev",
        ".debug_info",
        ".debug_str",
        ".debug_str_offsets",
        ".debug_line_str",
    ];

    /// Fill every section through `lookup`, called once per entry of [`Self::NAMES`].
    pub fn load<E>(
        mut lookup: impl FnMut(&'static str) -> std::result::Result<&'a [u8], E>,
    ) -> std::result::Result<Self, E> {
        let mut sections = Self::default();
        for (name, output) in sections.names_and_mut_output() {
            *output = lookup(name)?;
        }
        Ok(sections)
    }

    pub fn names_and_mut_output(&mut self) -> [(&'static str, &mut &'a [u8]); 5] {
        let [abbrev, info, str, str_offsets, line_str] = Self::NAMES;
        [
            (abbrev, &mut self.abbrev),
            (info, &mut self.info),
            (str, &mut self.str),
            (str_offsets, &mut self.str_offsets),
            (line_str, &mut self.line_str),
        ]
    }

    /// The sections without which nothing can be decoded at all.
    pub fn has_required(&self) -> bool {
        !self.abbrev.is_empty() && !self.info.is_empty()
    }
}

/// Nul-terminated strings addressed by byte offset (`.debug_str`, `.debug_line_str`).
#[derive(Debug, Clone, Copy)]
pub struct StringTable<'a> {
    name: &'static str,
    data: &'a [u8],
}

impl<'a> StringTable<'a> {
    pub fn new(name: &'static str, data: &'a [u8]) -> Self {
        Self { name, data }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn read_at(&self, offset: u64) -> Result<&'a CStr> {
        if self.data.is_empty() {
            return Err(Error::MissingSection(self.name));
        }
        let out_of_bounds = Error::OutOfBounds {
            offset,
            len: self.data.len() as u64,
        };
        let start = usize::try_from(offset)
            .ok()
            .filter(|&start| start < self.data.len())
            .ok_or_else(|| out_of_bounds.clone())?;
        let rest = &self.data[start..];
        let nul = memchr::memchr(0, rest).ok_or(out_of_bounds)?;
        CStr::from_bytes_with_nul(&rest[..=nul]).map_err(|_| Error::OutOfBounds {
            offset,
            len: self.data.len() as u64,
        })
    }
}

/// One contribution header in `.debug_str_offsets`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrOffsetsHeader {
    /// Offset of the header itself
    pub offset: u64,
    pub unit_length: u64,
    pub version: u16,
    pub padding: u16,
    pub dwarf64: bool,
    /// 4 or 8
    pub entry_width: u8,
    /// Offset of the first entry, which is what `DW_AT_str_offsets_base` points at
    pub base_offset: u64,
}

impl StrOffsetsHeader {
    pub fn end_offset(&self) -> u64 {
        self.offset
            .saturating_add(if self.dwarf64 { 12 } else { 4 })
            .saturating_add(self.unit_length)
    }

    pub fn entry_count(&self) -> u64 {
        // the version and padding fields are counted in unit_length
        self.unit_length.saturating_sub(4) / u64::from(self.entry_width)
    }
}

/// Maps indexed-string forms (`DW_FORM_strx*`) to `.debug_str` offsets.
#[derive(Debug, Clone, Default)]
pub struct StringOffsetsTable<'a> {
    data: &'a [u8],
    headers: Vec<StrOffsetsHeader>,
}

impl<'a> StringOffsetsTable<'a> {
    /// Reads every contribution header back to back until the section is exhausted.
    pub fn parse(data: &'a [u8]) -> Result<Self> {
        let mut headers = Vec::new();
        let mut offset = 0;

        while (offset as usize) < data.len() {
            let header = Self::parse_header(data, offset)?;
            trace!(
                offset = header.offset,
                base = header.base_offset,
                entries = header.entry_count(),
                "string offsets contribution"
            );
            offset = header.end_offset();
            headers.push(header);
        }

        Ok(Self { data, headers })
    }

    fn parse_header(data: &'a [u8], offset: u64) -> Result<StrOffsetsHeader> {
        let mut input = Reader::at(data, offset)?;

        let (dwarf64, unit_length) = match input.consume_u32_le()? {
            0xFFFF_FFFF => (true, input.consume_u64_le()?),
            small => (false, u64::from(small)),
        };
        let version = input.consume_u16_le()?;
        let padding = input.consume_u16_le()?;

        // a length that overflows cannot fit in the section either
        let length_size = if dwarf64 { 12 } else { 4 };
        offset
            .checked_add(length_size)
            .and_then(|end| end.checked_add(unit_length))
            .filter(|&end| end <= data.len() as u64)
            .ok_or(Error::TruncatedInput {
                offset: data.len() as u64,
            })?;

        Ok(StrOffsetsHeader {
            offset,
            unit_length,
            version,
            padding,
            dwarf64,
            entry_width: if dwarf64 { 8 } else { 4 },
            base_offset: input.offset(),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    pub fn headers(&self) -> &[StrOffsetsHeader] {
        &self.headers
    }

    /// The base used by units that carry no `DW_AT_str_offsets_base`.
    pub fn default_base(&self) -> Option<u64> {
        self.headers.first().map(|header| header.base_offset)
    }

    /// Returns the `.debug_str` offset stored at entry `index` of the
    /// contribution whose entries start at `unit_base`.
    pub fn resolve(&self, index: u64, unit_base: u64) -> Result<u64> {
        let len = self.data.len() as u64;
        let header = self
            .headers
            .iter()
            .find(|header| header.base_offset == unit_base)
            .ok_or(Error::OutOfBounds {
                offset: unit_base,
                len,
            })?;

        let width = u64::from(header.entry_width);
        let entry_offset = index
            .checked_mul(width)
            .and_then(|delta| delta.checked_add(unit_base))
            .filter(|&entry| entry.saturating_add(width) <= header.end_offset())
            .ok_or(Error::OutOfBounds {
                offset: unit_base.saturating_add(index.saturating_mul(width)),
                len,
            })?;

        Reader::at(self.data, entry_offset)?.consume_uint_le(header.entry_width)
    }
}
