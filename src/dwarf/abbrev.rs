use std::collections::{BTreeMap, HashMap};

use tracing::trace;

use super::{
    constants::{DW_AT, DW_FORM, DW_TAG},
    sleb128, uleb128,
};
use crate::{
    error::{Error, Result},
    util::Reader,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttributeSpec {
    pub name: DW_AT,
    pub form: DW_FORM,
    /// Only set for `DW_FORM_implicit_const`, whose value lives here instead of in `.debug_info`
    pub implicit_const: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Abbreviation {
    /// Offset of the subtable this declaration belongs to
    pub subtable_offset: u64,
    pub code: u64,
    pub tag: DW_TAG,
    pub children: bool,
    pub attributes: Vec<AttributeSpec>,
}

/// The declarations between one subtable start and its zero code.
#[derive(Debug, Clone, Default)]
pub struct AbbrevSubtable {
    declarations: Vec<Abbreviation>,
    by_code: HashMap<u64, usize>,
}

impl AbbrevSubtable {
    pub fn get(&self, code: u64) -> Option<&Abbreviation> {
        self.by_code.get(&code).map(|&index| &self.declarations[index])
    }

    /// Declarations in the order they appear in `.debug_abbrev`.
    pub fn declarations(&self) -> &[Abbreviation] {
        &self.declarations
    }

    pub fn len(&self) -> usize {
        self.declarations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.declarations.is_empty()
    }
}

/// Every subtable in `.debug_abbrev`, keyed by the offset units refer to it by.
#[derive(Debug, Clone, Default)]
pub struct AbbrevTable(BTreeMap<u64, AbbrevSubtable>);

impl AbbrevTable {
    /// Parses every subtable in `.debug_abbrev`.
    ///
    /// Any tag, attribute or form value this crate has no constant for fails the
    /// whole table, wherever it appears. A table failure is fatal to
    /// [`DwarfInfo::parse_with`](super::DwarfInfo::parse_with) under
    /// [`ErrorPolicy::SkipUnit`](super::ErrorPolicy::SkipUnit) too, so such a
    /// binary decodes no units at all.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut result = Self(BTreeMap::new());
        let mut input = Reader::new(data);

        while !input.is_empty() {
            let offset = input.offset();
            let subtable = parse_subtable(&mut input).map_err(|err| match err {
                Error::TruncatedInput { .. } => Error::MalformedAbbreviation {
                    offset,
                    reason: "subtable runs past the end of .debug_abbrev",
                },
                other => other,
            })?;
            trace!(offset, declarations = subtable.len(), "abbreviation subtable");
            result.0.insert(offset, subtable);
        }

        Ok(result)
    }

    pub fn find(&self, subtable_offset: u64, code: u64) -> Option<&Abbreviation> {
        self.0.get(&subtable_offset)?.get(code)
    }

    pub fn subtable(&self, offset: u64) -> Option<&AbbrevSubtable> {
        self.0.get(&offset)
    }

    pub fn subtables(&self) -> impl Iterator<Item = (u64, &AbbrevSubtable)> {
        self.0.iter().map(|(&offset, subtable)| (offset, subtable))
    }
}

fn parse_subtable(input: &mut Reader) -> Result<AbbrevSubtable> {
    let subtable_offset = input.offset();
    let mut result = AbbrevSubtable::default();

    loop {
        let declaration_offset = input.offset();
        let code = uleb128(input)?;
        if code == 0 {
            break;
        }

        let tag_value = uleb128(input)?;
        let tag = DW_TAG::from_value(tag_value).ok_or(Error::MalformedAbbreviation {
            offset: declaration_offset,
            reason: "unknown tag",
        })?;
        // DW_CHILDREN_yes is 1, but any nonzero byte is taken to mean children follow
        let children = input.consume_first()? != 0;

        let mut abbrv = Abbreviation {
            subtable_offset,
            code,
            tag,
            children,
            attributes: Vec::new(),
        };

        loop {
            let spec_offset = input.offset();
            let at_name = uleb128(input)?;
            let at_form = uleb128(input)?;
            if at_name == 0 && at_form == 0 {
                break;
            }

            let name = DW_AT::from_value(at_name).ok_or(Error::MalformedAbbreviation {
                offset: spec_offset,
                reason: "unknown attribute name",
            })?;
            let form = DW_FORM::from_value(at_form).ok_or(Error::MalformedAbbreviation {
                offset: spec_offset,
                reason: "unknown attribute form",
            })?;
            let implicit_const = match form {
                DW_FORM::DW_FORM_implicit_const => Some(sleb128(input)?),
                _ => None,
            };

            abbrv.attributes.push(AttributeSpec {
                name,
                form,
                implicit_const,
            });
        }

        if result
            .by_code
            .insert(code, result.declarations.len())
            .is_some()
        {
            return Err(Error::MalformedAbbreviation {
                offset: declaration_offset,
                reason: "duplicate abbreviation code in subtable",
            });
        }
        result.declarations.push(abbrv);
    }

    Ok(result)
}
