use super::constants::DW_UT;
use crate::{
    error::{Error, Result},
    util::Reader,
};

pub const MIN_VERSION: u16 = 2;
pub const MAX_VERSION: u16 = 5;

/// A compilation unit header from `.debug_info`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitHeader {
    /// Offset of the header in `.debug_info`; identifies the unit and is the
    /// base for unit-relative references
    pub offset: u64,
    pub unit_length: u64,
    pub dwarf64: bool,
    pub version: u16,
    /// Only present in DWARF5 headers
    pub unit_type: Option<DW_UT>,
    pub address_size: u8,
    pub debug_abbrev_offset: u64,
    /// Skeleton and split compilation units
    pub dwo_id: Option<u64>,
    /// Type units: signature and unit-relative offset of the described type
    pub type_signature: Option<u64>,
    pub type_offset: Option<u64>,
    /// Offset of the first DIE
    pub entries_offset: u64,
}

impl UnitHeader {
    /// Size of the initial length field: 12 for DWARF64, 4 otherwise.
    pub fn initial_length_size(&self) -> u8 {
        if self.dwarf64 { 12 } else { 4 }
    }

    /// Width of section offsets inside this unit.
    pub fn offset_size(&self) -> u8 {
        if self.dwarf64 { 8 } else { 4 }
    }

    /// One past the last byte belonging to this unit.
    pub fn end_offset(&self) -> u64 {
        self.offset + u64::from(self.initial_length_size()) + self.unit_length
    }

    pub fn header_size(&self) -> u64 {
        self.entries_offset - self.offset
    }

    pub fn parse(info: &[u8], offset: u64) -> Result<(Self, u64)> {
        let mut input = Reader::at(info, offset)?;

        let (dwarf64, unit_length) = read_initial_length(&mut input)?;
        let end = input
            .offset()
            .checked_add(unit_length)
            .filter(|&end| end <= info.len() as u64)
            .ok_or(Error::TruncatedInput {
                offset: info.len() as u64,
            })?;
        let mut input = input.bounded(end)?;

        let version = input.consume_u16_le()?;
        if !(MIN_VERSION..=MAX_VERSION).contains(&version) {
            return Err(Error::UnsupportedVersion(version));
        }

        let mut unit = UnitHeader {
            offset,
            unit_length,
            dwarf64,
            version,
            unit_type: None,
            address_size: 0,
            debug_abbrev_offset: 0,
            dwo_id: None,
            type_signature: None,
            type_offset: None,
            entries_offset: 0,
        };

        if version >= 5 {
            let raw_type = input.consume_first()?;
            let unit_type = DW_UT::from_value(raw_type.into())
                .ok_or(Error::UnsupportedUnitType(raw_type))?;
            unit.unit_type = Some(unit_type);
            unit.address_size = input.consume_first()?;
            unit.debug_abbrev_offset = input.consume_offset(dwarf64)?;

            match unit_type {
                DW_UT::DW_UT_skeleton | DW_UT::DW_UT_split_compile => {
                    unit.dwo_id = Some(input.consume_u64_le()?);
                }
                DW_UT::DW_UT_type | DW_UT::DW_UT_split_type => {
                    unit.type_signature = Some(input.consume_u64_le()?);
                    unit.type_offset = Some(input.consume_offset(dwarf64)?);
                }
                DW_UT::DW_UT_compile | DW_UT::DW_UT_partial => {}
                DW_UT::DW_UT_user(_) => return Err(Error::UnsupportedUnitType(raw_type)),
            }
        } else {
            unit.debug_abbrev_offset = input.consume_offset(dwarf64)?;
            unit.address_size = input.consume_first()?;
        }

        unit.entries_offset = input.offset();
        Ok((unit, unit.header_size()))
    }
}

fn read_initial_length(input: &mut Reader) -> Result<(bool, u64)> {
    Ok(match input.consume_u32_le()? {
        0xFFFF_FFFF => (true, input.consume_u64_le()?),
        small => (false, u64::from(small)),
    })
}

/// Offset just past the unit starting at `offset`, reading only its initial length.
///
/// Used to step over a unit whose header or contents failed to decode.
pub fn unit_end(info: &[u8], offset: u64) -> Result<u64> {
    let mut input = Reader::at(info, offset)?;
    let (_, unit_length) = read_initial_length(&mut input)?;
    input
        .offset()
        .checked_add(unit_length)
        .filter(|&end| end <= info.len() as u64)
        .ok_or(Error::TruncatedInput {
            offset: info.len() as u64,
        })
}
