use std::{ffi::CStr, fmt::Debug};

use tracing::trace;

use super::{
    abbrev::{AbbrevTable, AttributeSpec},
    constants::{DW_AT, DW_FORM, DW_TAG},
    sleb128,
    unit::UnitHeader,
    uleb128,
};
use crate::{
    error::{Error, Result},
    util::Reader,
};

/// A location expression, kept as raw bytecode.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Expression<'a> {
    pub content: &'a [u8],
}

impl<'a> Expression<'a> {
    fn consume(input: &mut Reader<'a>) -> Result<Self> {
        let length = uleb128(input)?;
        let content = input.consume_n(length)?;

        Ok(Self { content })
    }
}

impl Debug for Expression<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Expression(")?;
        for byte in self.content {
            write!(f, "{byte:02x}")?;
        }
        write!(f, ")")
    }
}

/// Which section a `DW_FORM_sec_offset` value points into, decided by the attribute name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecOffsetClass {
    Line,
    LocList,
    RangeList,
    Macro,
    StrOffsets,
    Addr,
    Other,
}

impl SecOffsetClass {
    pub fn for_name(name: DW_AT) -> Self {
        use DW_AT::*;
        match name {
            DW_AT_stmt_list => Self::Line,
            DW_AT_ranges | DW_AT_start_scope | DW_AT_rnglists_base => Self::RangeList,
            DW_AT_location
            | DW_AT_string_length
            | DW_AT_return_addr
            | DW_AT_data_member_location
            | DW_AT_frame_base
            | DW_AT_segment
            | DW_AT_static_link
            | DW_AT_use_location
            | DW_AT_vtable_elem_location
            | DW_AT_loclists_base => Self::LocList,
            DW_AT_macro_info | DW_AT_macros => Self::Macro,
            DW_AT_str_offsets_base => Self::StrOffsets,
            DW_AT_addr_base => Self::Addr,
            _ => Self::Other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrValue<'a> {
    /// `DW_FORM_addr`, already widened from the unit's address size
    Address(u64),
    /// `DW_FORM_data1/2/4/8`, raw little-endian bytes
    Bytes(&'a [u8]),
    /// `DW_FORM_block*`
    Block(&'a [u8]),
    Expression(Expression<'a>),
    Flag(bool),
    Signed(i64),
    Unsigned(u64),
    /// `DW_FORM_implicit_const`, copied from the abbreviation
    Constant(i64),
    /// `DW_FORM_string`
    String(&'a CStr),
    /// `DW_FORM_strp`, an offset into `.debug_str`
    StrOffset(u64),
    /// `DW_FORM_line_strp`, an offset into `.debug_line_str`
    LineStrOffset(u64),
    /// `DW_FORM_strx*`, an index into the unit's `.debug_str_offsets` contribution
    StrIndex(u64),
    /// Absolute `.debug_info` offset of the referenced DIE
    Reference(u64),
    SecOffset(SecOffsetClass, u64),
    /// `DW_FORM_loclistx`/`DW_FORM_rnglistx`
    ListIndex(u64),
}

impl<'a> AttrValue<'a> {
    pub fn as_unsigned(&self) -> Option<u64> {
        match *self {
            AttrValue::Bytes(value) => match *value {
                [a] => Some(a.into()),
                [a, b] => Some(u16::from_le_bytes([a, b]).into()),
                [a, b, c, d] => Some(u32::from_le_bytes([a, b, c, d]).into()),
                [a, b, c, d, e, f, g, h] => Some(u64::from_le_bytes([a, b, c, d, e, f, g, h])),
                _ => None,
            },
            AttrValue::Address(value) | AttrValue::Unsigned(value) => Some(value),
            AttrValue::Signed(value) | AttrValue::Constant(value) => u64::try_from(value).ok(),
            _ => None,
        }
    }

    pub fn as_signed(&self) -> Option<i64> {
        match *self {
            AttrValue::Signed(value) | AttrValue::Constant(value) => Some(value),
            AttrValue::Bytes(value) => match *value {
                [a] => Some(i8::from_le_bytes([a]).into()),
                [a, b] => Some(i16::from_le_bytes([a, b]).into()),
                [a, b, c, d] => Some(i32::from_le_bytes([a, b, c, d]).into()),
                [a, b, c, d, e, f, g, h] => Some(i64::from_le_bytes([a, b, c, d, e, f, g, h])),
                _ => None,
            },
            AttrValue::Unsigned(value) => i64::try_from(value).ok(),
            _ => None,
        }
    }

    pub fn as_reference(&self) -> Option<u64> {
        match *self {
            AttrValue::Reference(offset) => Some(offset),
            _ => None,
        }
    }

    pub fn as_flag(&self) -> Option<bool> {
        match *self {
            AttrValue::Flag(value) => Some(value),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attribute<'a> {
    pub name: DW_AT,
    /// The form actually decoded, after following `DW_FORM_indirect`
    pub form: DW_FORM,
    pub value: AttrValue<'a>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebuggingInformationEntry<'a> {
    /// Offset in `.debug_info`, also the target of references to this entry
    pub offset: u64,
    pub abbreviation_code: u64,
    pub tag: DW_TAG,
    pub has_children: bool,
    pub attributes: Vec<Attribute<'a>>,
    pub children: Vec<DebuggingInformationEntry<'a>>,
}

pub type Die<'a> = DebuggingInformationEntry<'a>;

impl<'a> DebuggingInformationEntry<'a> {
    pub fn find_attribute(&self, name: DW_AT) -> Option<&AttrValue<'a>> {
        self.attributes
            .iter()
            .find(|attr| attr.name == name)
            .map(|attr| &attr.value)
    }

    pub fn is_declaration(&self) -> bool {
        self.find_attribute(DW_AT::DW_AT_declaration)
            .and_then(AttrValue::as_flag)
            .unwrap_or(false)
    }

    /// Offset of the entry named by `DW_AT_type`.
    pub fn type_ref(&self) -> Option<u64> {
        self.find_attribute(DW_AT::DW_AT_type)?.as_reference()
    }

    pub fn specification(&self) -> Option<u64> {
        self.find_attribute(DW_AT::DW_AT_specification)?.as_reference()
    }

    pub fn children(&self) -> &[DebuggingInformationEntry<'a>] {
        &self.children
    }
}

/// Decode one entry at the reader's position.
///
/// Returns `None` for a null entry (code 0), which closes the current sibling list.
pub fn decode_entry<'a>(
    input: &mut Reader<'a>,
    unit: &UnitHeader,
    abbrevs: &AbbrevTable,
) -> Result<Option<Die<'a>>> {
    let offset = input.offset();
    let abbreviation_code = uleb128(input)?;
    if abbreviation_code == 0 {
        return Ok(None);
    }

    let abbrv = abbrevs
        .find(unit.debug_abbrev_offset, abbreviation_code)
        .ok_or(Error::UnknownAbbreviationCode {
            offset,
            code: abbreviation_code,
        })?;

    trace!(offset, tag = %abbrv.tag, children = abbrv.children, "entry");

    let mut attributes = Vec::with_capacity(abbrv.attributes.len());
    for spec in abbrv.attributes.iter() {
        attributes.push(consume_attribute(input, unit, spec)?);
    }

    Ok(Some(DebuggingInformationEntry {
        offset,
        abbreviation_code,
        tag: abbrv.tag,
        has_children: abbrv.children,
        attributes,
        children: Vec::new(),
    }))
}

fn consume_attribute<'a>(
    input: &mut Reader<'a>,
    unit: &UnitHeader,
    spec: &AttributeSpec,
) -> Result<Attribute<'a>> {
    let mut form = spec.form;
    while form == DW_FORM::DW_FORM_indirect {
        let offset = input.offset();
        let value = uleb128(input)?;
        form = DW_FORM::from_value(value).ok_or(Error::UnknownForm { offset, value })?;
    }

    let value = match spec.implicit_const {
        Some(constant) if form == DW_FORM::DW_FORM_implicit_const => AttrValue::Constant(constant),
        _ => consume_attr_value(input, unit, spec.name, form)?,
    };

    Ok(Attribute {
        name: spec.name,
        form,
        value,
    })
}

fn consume_attr_value<'a>(
    input: &mut Reader<'a>,
    unit: &UnitHeader,
    name: DW_AT,
    form: DW_FORM,
) -> Result<AttrValue<'a>> {
    use DW_FORM::*;

    let start = input.offset();
    // a delta that overflows cannot point anywhere in the section
    let relative = |delta: u64| {
        unit.offset
            .checked_add(delta)
            .map(AttrValue::Reference)
            .ok_or(Error::OutOfBounds {
                offset: start,
                len: unit.end_offset(),
            })
    };

    Ok(match form {
        DW_FORM_addr => AttrValue::Address(read_address(input, unit.address_size)?),
        DW_FORM_block1 => {
            let n = input.consume_first()?.into();
            AttrValue::Block(input.consume_n(n)?)
        }
        DW_FORM_block2 => {
            let n = input.consume_u16_le()?.into();
            AttrValue::Block(input.consume_n(n)?)
        }
        DW_FORM_block4 => {
            let n = input.consume_u32_le()?.into();
            AttrValue::Block(input.consume_n(n)?)
        }
        DW_FORM_block => {
            let n = uleb128(input)?;
            AttrValue::Block(input.consume_n(n)?)
        }
        DW_FORM_data1 => AttrValue::Bytes(input.consume_chunk::<1>()?),
        DW_FORM_data2 => AttrValue::Bytes(input.consume_chunk::<2>()?),
        DW_FORM_data4 => AttrValue::Bytes(input.consume_chunk::<4>()?),
        DW_FORM_data8 => AttrValue::Bytes(input.consume_chunk::<8>()?),
        DW_FORM_flag => AttrValue::Flag(input.consume_first()? != 0),
        DW_FORM_flag_present => AttrValue::Flag(true),
        DW_FORM_string => AttrValue::String(input.consume_cstr()?),
        DW_FORM_sdata => AttrValue::Signed(sleb128(input)?),
        DW_FORM_udata => AttrValue::Unsigned(uleb128(input)?),
        DW_FORM_strp => AttrValue::StrOffset(input.consume_offset(unit.dwarf64)?),
        DW_FORM_line_strp => AttrValue::LineStrOffset(input.consume_offset(unit.dwarf64)?),
        DW_FORM_strx => AttrValue::StrIndex(uleb128(input)?),
        DW_FORM_strx1 => AttrValue::StrIndex(input.consume_first()?.into()),
        DW_FORM_strx2 => AttrValue::StrIndex(input.consume_u16_le()?.into()),
        DW_FORM_strx3 => AttrValue::StrIndex(input.consume_u24_le()?.into()),
        DW_FORM_strx4 => AttrValue::StrIndex(input.consume_u32_le()?.into()),
        DW_FORM_ref1 => relative(input.consume_first()?.into())?,
        DW_FORM_ref2 => relative(input.consume_u16_le()?.into())?,
        DW_FORM_ref4 => relative(input.consume_u32_le()?.into())?,
        DW_FORM_ref8 => relative(input.consume_u64_le()?)?,
        DW_FORM_ref_udata => relative(uleb128(input)?)?,
        DW_FORM_ref_addr => {
            // DWARF2 sized this like an address, later versions like an offset
            let target = match unit.version {
                2 => read_address(input, unit.address_size)?,
                _ => input.consume_offset(unit.dwarf64)?,
            };
            AttrValue::Reference(target)
        }
        DW_FORM_sec_offset => AttrValue::SecOffset(
            SecOffsetClass::for_name(name),
            input.consume_offset(unit.dwarf64)?,
        ),
        DW_FORM_exprloc => AttrValue::Expression(Expression::consume(input)?),
        DW_FORM_loclistx | DW_FORM_rnglistx => AttrValue::ListIndex(uleb128(input)?),
        // only reachable through DW_FORM_indirect, which has no abbreviation constant
        DW_FORM_implicit_const => AttrValue::Constant(sleb128(input)?),
        // consume_attribute resolves indirection before dispatching here
        DW_FORM_indirect
        | DW_FORM_addrx
        | DW_FORM_addrx1
        | DW_FORM_addrx2
        | DW_FORM_addrx3
        | DW_FORM_addrx4
        | DW_FORM_ref_sig8
        | DW_FORM_data16
        | DW_FORM_strp_sup
        | DW_FORM_ref_sup4
        | DW_FORM_ref_sup8
        | DW_FORM_GNU_addr_index
        | DW_FORM_GNU_str_index
        | DW_FORM_GNU_ref_alt
        | DW_FORM_GNU_strp_alt
        | DW_FORM_GNU_other(_) => return Err(Error::UnsupportedForm(form)),
    })
}

fn read_address(input: &mut Reader, address_size: u8) -> Result<u64> {
    match address_size {
        1 | 2 | 4 | 8 => input.consume_uint_le(address_size),
        size => Err(Error::UnsupportedAddressSize(size)),
    }
}
