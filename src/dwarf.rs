use std::ffi::CStr;

use tracing::{debug, warn};

use crate::{
    error::{Error, Result},
    util::Reader,
};

pub mod abbrev;
pub mod constants;
pub mod die;
pub mod sections;
pub mod tree;
pub mod unit;

use abbrev::AbbrevTable;
use constants::DW_AT;
use die::{AttrValue, Die, decode_entry};
use sections::{DwarfSections, StringOffsetsTable, StringTable};
use tree::{TreeBuilder, Walk};
use unit::UnitHeader;

pub fn uleb128(input: &mut Reader) -> Result<u64> {
    let start = input.offset();
    let mut result = 0;
    let mut shift: u32 = 0;
    loop {
        let byte = input.consume_first()?;
        let group = u64::from(byte & 0x7F);
        if shift < u64::BITS {
            if (group << shift) >> shift != group {
                return Err(Error::MalformedLeb128 { offset: start });
            }
            result |= group << shift;
        } else if group != 0 {
            return Err(Error::MalformedLeb128 { offset: start });
        }
        if byte & 0x80 == 0 {
            return Ok(result);
        }
        shift = shift.saturating_add(7);
    }
}

pub fn sleb128(input: &mut Reader) -> Result<i64> {
    let start = input.offset();
    let mut result: i64 = 0;
    let mut shift: u32 = 0;
    loop {
        let byte = input.consume_first()?;
        let group = i64::from(byte & 0x7F);
        if shift < 63 {
            result |= group << shift;
        } else {
            // only the lowest bit still fits, the rest must repeat the sign
            let fill = match shift {
                63 if group & 1 != 0 => 0x7F,
                63 => 0,
                _ if result < 0 => 0x7F,
                _ => 0,
            };
            if group != fill {
                return Err(Error::MalformedLeb128 { offset: start });
            }
            result |= group << shift.min(63);
        }
        if byte & 0x80 == 0 {
            let bits = shift.saturating_add(7);
            if bits < i64::BITS && byte & 0x40 != 0 {
                // sign extend
                result |= -1 << bits;
            }
            return Ok(result);
        }
        shift = shift.saturating_add(7);
    }
}

/// What [`DwarfInfo::parse_with`] does when a compilation unit fails to decode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ErrorPolicy {
    /// Return the first error.
    #[default]
    Abort,
    /// Record the error, step over the unit and carry on with the next one.
    SkipUnit,
}

#[derive(Debug, Clone)]
pub struct CompilationUnit<'a> {
    pub header: UnitHeader,
    /// Top-level entries, normally just the unit DIE
    pub roots: Vec<Die<'a>>,
    /// Where this unit's `.debug_str_offsets` entries start
    pub str_offsets_base: Option<u64>,
}

impl<'a> CompilationUnit<'a> {
    pub fn root(&self) -> Option<&Die<'a>> {
        self.roots.first()
    }

    pub fn entries(&self) -> Walk<'_, 'a> {
        Walk::new(&self.roots)
    }

    pub fn contains(&self, offset: u64) -> bool {
        (self.header.entries_offset..self.header.end_offset()).contains(&offset)
    }
}

/// A reference attribute whose target is not the start of any decoded entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DanglingReference {
    pub unit: u64,
    pub die: u64,
    pub attribute: DW_AT,
    pub target: u64,
}

/// Every compilation unit in `.debug_info`, decoded, plus the tables needed to
/// resolve strings inside them.
#[derive(Debug)]
pub struct DwarfInfo<'a> {
    sections: DwarfSections<'a>,
    abbrevs: AbbrevTable,
    strings: StringTable<'a>,
    line_strings: StringTable<'a>,
    str_offsets: StringOffsetsTable<'a>,
    units: Vec<CompilationUnit<'a>>,
}

impl<'a> DwarfInfo<'a> {
    pub fn parse(sections: &DwarfSections<'a>) -> Result<Self> {
        let (info, _) = Self::parse_with(sections, ErrorPolicy::Abort)?;
        Ok(info)
    }

    /// Decodes every compilation unit in `.debug_info`.
    ///
    /// With [`ErrorPolicy::SkipUnit`] the second element lists the errors of
    /// the units that were left out, each carrying the unit's offset. Failures
    /// in the shared tables are returned as errors under either policy.
    pub fn parse_with(
        sections: &DwarfSections<'a>,
        policy: ErrorPolicy,
    ) -> Result<(Self, Vec<Error>)> {
        let abbrevs = AbbrevTable::parse(sections.abbrev)?;
        let str_offsets = StringOffsetsTable::parse(sections.str_offsets)?;

        let mut skipped = Vec::new();
        let mut units = Vec::new();
        let mut offset = 0;
        while offset < sections.info.len() as u64 {
            match parse_unit(sections.info, offset, &abbrevs, &str_offsets) {
                Ok(unit) => {
                    offset = unit.header.end_offset();
                    units.push(unit);
                }
                Err(err) => {
                    let err = err.in_unit(offset);
                    if policy == ErrorPolicy::Abort {
                        return Err(err);
                    }

                    warn!(offset, "skipping compilation unit: {err}");
                    let next = unit::unit_end(sections.info, offset);
                    skipped.push(err);
                    match next {
                        Ok(end) => offset = end,
                        Err(_) => break,
                    }
                }
            }
        }

        debug!(units = units.len(), skipped = skipped.len(), "parsed .debug_info");

        let info = DwarfInfo {
            sections: *sections,
            abbrevs,
            strings: StringTable::new(".debug_str", sections.str),
            line_strings: StringTable::new(".debug_line_str", sections.line_str),
            str_offsets,
            units,
        };
        Ok((info, skipped))
    }

    pub fn sections(&self) -> &DwarfSections<'a> {
        &self.sections
    }

    pub fn units(&self) -> &[CompilationUnit<'a>] {
        &self.units
    }

    pub fn abbrevs(&self) -> &AbbrevTable {
        &self.abbrevs
    }

    pub fn str_offsets(&self) -> &StringOffsetsTable<'a> {
        &self.str_offsets
    }

    /// String at `offset` in `.debug_str`.
    pub fn resolve_string(&self, offset: u64) -> Result<&'a CStr> {
        self.strings.read_at(offset)
    }

    /// String at `offset` in `.debug_line_str`, or `.debug_str` when the former is absent.
    pub fn resolve_line_string(&self, offset: u64) -> Result<&'a CStr> {
        match self.line_strings.is_empty() {
            true => self.strings.read_at(offset),
            false => self.line_strings.read_at(offset),
        }
    }

    pub fn resolve_indexed_string(&self, unit: &CompilationUnit, index: u64) -> Result<&'a CStr> {
        let base = unit
            .str_offsets_base
            .filter(|_| !self.str_offsets.is_empty())
            .ok_or(Error::MissingSection(".debug_str_offsets"))?;
        let offset = self.str_offsets.resolve(index, base)?;
        self.resolve_string(offset)
    }

    /// The string an attribute value denotes, whichever string form encodes it.
    ///
    /// Returns `None` for values that are not strings.
    pub fn attr_string(
        &self,
        unit: &CompilationUnit,
        value: &AttrValue<'a>,
    ) -> Result<Option<&'a CStr>> {
        Ok(Some(match *value {
            AttrValue::String(string) => string,
            AttrValue::StrOffset(offset) => self.resolve_string(offset)?,
            AttrValue::LineStrOffset(offset) => self.resolve_line_string(offset)?,
            AttrValue::StrIndex(index) => self.resolve_indexed_string(unit, index)?,
            _ => return Ok(None),
        }))
    }

    pub fn die_name(&self, unit: &CompilationUnit, die: &Die<'a>) -> Result<Option<&'a CStr>> {
        match die.find_attribute(DW_AT::DW_AT_name) {
            Some(value) => self.attr_string(unit, value),
            None => Ok(None),
        }
    }

    pub fn unit_name(&self, unit: &CompilationUnit<'a>) -> Result<Option<&'a CStr>> {
        match unit.root() {
            Some(root) => self.die_name(unit, root),
            None => Ok(None),
        }
    }

    pub fn unit_containing(&self, offset: u64) -> Option<&CompilationUnit<'a>> {
        let index = self
            .units
            .partition_point(|unit| unit.header.offset <= offset)
            .checked_sub(1)?;
        Some(&self.units[index]).filter(|unit| unit.contains(offset))
    }

    /// The entry whose id is `offset`.
    ///
    /// Entry offsets increase in depth-first order, so every level of the tree
    /// is sorted and can be binary searched.
    pub fn resolve_reference(&self, offset: u64) -> Option<&Die<'a>> {
        let mut level = self.unit_containing(offset)?.roots.as_slice();
        loop {
            let index = level.partition_point(|die| die.offset <= offset).checked_sub(1)?;
            let candidate = &level[index];
            if candidate.offset == offset {
                return Some(candidate);
            }
            level = &candidate.children;
        }
    }

    pub fn dangling_references(&self) -> Vec<DanglingReference> {
        let mut result = Vec::new();
        for unit in &self.units {
            for entry in unit.entries() {
                for attr in &entry.die.attributes {
                    let Some(target) = attr.value.as_reference() else {
                        continue;
                    };
                    if self.resolve_reference(target).is_none() {
                        result.push(DanglingReference {
                            unit: unit.header.offset,
                            die: entry.die.offset,
                            attribute: attr.name,
                            target,
                        });
                    }
                }
            }
        }
        result
    }
}

fn parse_unit<'a>(
    info: &'a [u8],
    offset: u64,
    abbrevs: &AbbrevTable,
    str_offsets: &StringOffsetsTable,
) -> Result<CompilationUnit<'a>> {
    let (header, _) = UnitHeader::parse(info, offset)?;
    if abbrevs.subtable(header.debug_abbrev_offset).is_none() {
        return Err(Error::MalformedAbbreviation {
            offset: header.debug_abbrev_offset,
            reason: "no abbreviation subtable starts here",
        });
    }

    let end = header.end_offset();
    let mut content = Reader::at(info, header.entries_offset)?.bounded(end)?;
    let mut builder = TreeBuilder::new();
    let mut entries = 0usize;
    while !content.is_empty() {
        let entry = decode_entry(&mut content, &header, abbrevs)?;
        entries += usize::from(entry.is_some());
        builder.push(entry);
    }
    let roots = builder.finish(end)?;

    let str_offsets_base = roots
        .first()
        .and_then(|root| root.find_attribute(DW_AT::DW_AT_str_offsets_base))
        .and_then(|value| match *value {
            AttrValue::SecOffset(_, base) => Some(base),
            ref other => other.as_unsigned(),
        })
        .or_else(|| str_offsets.default_base());

    debug!(
        offset,
        version = header.version,
        dwarf64 = header.dwarf64,
        unit_type = ?header.unit_type,
        entries,
        root = ?roots.first().map(|root| root.tag),
        "compilation unit"
    );

    Ok(CompilationUnit {
        header,
        roots,
        str_offsets_base,
    })
}
