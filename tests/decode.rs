mod common;

use common::{Abbrevs, Strings, UnitBuilder, str_offsets_contribution};
use dwarfscan::{
    Error,
    dwarf::{
        DanglingReference, DwarfInfo, ErrorPolicy,
        constants::{DW_AT::*, DW_FORM::*, DW_TAG::*},
        die::{AttrValue, SecOffsetClass},
        sections::DwarfSections,
    },
};

#[test]
fn strp_names_and_unit_relative_references() {
    common::init();

    let mut abbrevs = Abbrevs::new();
    abbrevs
        .decl(
            1,
            DW_TAG_compile_unit,
            true,
            &[(DW_AT_name, DW_FORM_strp), (DW_AT_language, DW_FORM_data1)],
        )
        .decl(
            2,
            DW_TAG_base_type,
            false,
            &[(DW_AT_name, DW_FORM_string), (DW_AT_byte_size, DW_FORM_data1)],
        )
        .decl(
            3,
            DW_TAG_variable,
            false,
            &[(DW_AT_name, DW_FORM_strp), (DW_AT_type, DW_FORM_ref4)],
        )
        .end();

    let mut strings = Strings::new();
    let hello = strings.add("hello");
    let counter = strings.add("counter");

    let mut unit = UnitBuilder::new(4, false, 0);
    unit.entry(1).u32(hello as u32).u8(0x0c);
    let int_at = unit.here();
    unit.entry(2).cstr("int").u8(4);
    let var_at = unit.here();
    unit.entry(3).u32(counter as u32).u32(int_at as u32);
    unit.null();

    let mut info = Vec::new();
    unit.finish(&mut info);

    let sections = DwarfSections {
        abbrev: &abbrevs.data,
        info: &info,
        str: &strings.data,
        ..Default::default()
    };
    let dwarf = DwarfInfo::parse(&sections).unwrap();

    assert_eq!(dwarf.units().len(), 1);
    let unit = &dwarf.units()[0];
    assert_eq!(unit.roots.len(), 1);

    let root = unit.root().unwrap();
    assert_eq!(root.tag, DW_TAG_compile_unit);
    assert_eq!(root.offset, 11);
    assert_eq!(dwarf.unit_name(unit), Ok(Some(c"hello")));
    assert_eq!(
        root.find_attribute(DW_AT_language).and_then(AttrValue::as_unsigned),
        Some(0x0c)
    );
    assert_eq!(root.children().len(), 2);

    let var = &root.children()[1];
    assert_eq!(var.offset, var_at);
    assert_eq!(dwarf.die_name(unit, var), Ok(Some(c"counter")));
    assert_eq!(var.type_ref(), Some(int_at));

    let int = dwarf.resolve_reference(int_at).unwrap();
    assert_eq!(int.tag, DW_TAG_base_type);
    assert_eq!(dwarf.die_name(unit, int), Ok(Some(c"int")));
    assert!(dwarf.resolve_reference(var_at + 1).is_none());
    assert!(dwarf.dangling_references().is_empty());
}

#[test]
fn dwarf64_widens_offsets() {
    common::init();

    let mut abbrevs = Abbrevs::new();
    abbrevs
        .decl(
            1,
            DW_TAG_compile_unit,
            false,
            &[(DW_AT_name, DW_FORM_strp), (DW_AT_stmt_list, DW_FORM_sec_offset)],
        )
        .end();
    let mut strings = Strings::new();
    let name = strings.add("wide.c");

    let mut unit = UnitBuilder::new(4, true, 0);
    unit.entry(1).offset(name).offset(0x1_0000_0010);
    let mut info = Vec::new();
    unit.finish(&mut info);

    let sections = DwarfSections {
        abbrev: &abbrevs.data,
        info: &info,
        str: &strings.data,
        ..Default::default()
    };
    let dwarf = DwarfInfo::parse(&sections).unwrap();
    let unit = &dwarf.units()[0];

    assert!(unit.header.dwarf64);
    assert_eq!(unit.header.entries_offset, 23);
    assert_eq!(unit.header.end_offset(), info.len() as u64);
    assert_eq!(dwarf.unit_name(unit), Ok(Some(c"wide.c")));
    assert_eq!(
        unit.root().unwrap().find_attribute(DW_AT_stmt_list),
        Some(&AttrValue::SecOffset(SecOffsetClass::Line, 0x1_0000_0010))
    );
}

#[test]
fn indexed_strings_use_each_units_contribution() {
    common::init();

    let mut strings = Strings::new();
    let first = strings.add("first.c");
    let second = strings.add("second.c");

    let mut str_offsets = Vec::new();
    let first_base = str_offsets_contribution(&[first], &mut str_offsets);
    let second_base = str_offsets_contribution(&[0, second], &mut str_offsets);

    let mut abbrevs = Abbrevs::new();
    abbrevs
        .decl(1, DW_TAG_compile_unit, false, &[(DW_AT_name, DW_FORM_strx1)])
        .decl(
            2,
            DW_TAG_compile_unit,
            false,
            &[
                (DW_AT_str_offsets_base, DW_FORM_sec_offset),
                (DW_AT_name, DW_FORM_strx1),
            ],
        )
        .end();

    let mut info = Vec::new();
    UnitBuilder::new(5, false, 0).entry(1).u8(0).finish(&mut info);
    UnitBuilder::new(5, false, 0)
        .entry(2)
        .offset(second_base)
        .u8(1)
        .finish(&mut info);

    let sections = DwarfSections {
        abbrev: &abbrevs.data,
        info: &info,
        str: &strings.data,
        str_offsets: &str_offsets,
        ..Default::default()
    };
    let dwarf = DwarfInfo::parse(&sections).unwrap();
    let [one, two] = dwarf.units() else {
        panic!("expected two units, got {}", dwarf.units().len());
    };

    assert_eq!(one.header.version, 5);
    assert_eq!(one.str_offsets_base, Some(first_base));
    assert_eq!(two.str_offsets_base, Some(second_base));
    assert_eq!(dwarf.unit_name(one), Ok(Some(c"first.c")));
    assert_eq!(dwarf.unit_name(two), Ok(Some(c"second.c")));
    assert!(matches!(
        dwarf.resolve_indexed_string(one, 5),
        Err(Error::OutOfBounds { .. })
    ));
}

#[test]
fn indexed_strings_without_offsets_section() {
    let mut abbrevs = Abbrevs::new();
    abbrevs
        .decl(1, DW_TAG_compile_unit, false, &[(DW_AT_name, DW_FORM_strx1)])
        .end();
    let mut info = Vec::new();
    UnitBuilder::new(5, false, 0).entry(1).u8(0).finish(&mut info);

    let strings = Strings::new();
    let sections = DwarfSections {
        abbrev: &abbrevs.data,
        info: &info,
        str: &strings.data,
        ..Default::default()
    };
    let dwarf = DwarfInfo::parse(&sections).unwrap();
    assert_eq!(
        dwarf.unit_name(&dwarf.units()[0]),
        Err(Error::MissingSection(".debug_str_offsets"))
    );
}

#[test]
fn line_strp_prefers_debug_line_str() {
    let mut abbrevs = Abbrevs::new();
    abbrevs
        .decl(1, DW_TAG_compile_unit, false, &[(DW_AT_comp_dir, DW_FORM_line_strp)])
        .end();
    let mut info = Vec::new();
    UnitBuilder::new(5, false, 0).entry(1).u32(0).finish(&mut info);

    let mut sections = DwarfSections {
        abbrev: &abbrevs.data,
        info: &info,
        str: b"/from/str\0",
        line_str: b"/from/line_str\0",
        ..Default::default()
    };

    let comp_dir = |sections: &DwarfSections| {
        let dwarf = DwarfInfo::parse(sections).unwrap();
        let unit = &dwarf.units()[0];
        let value = unit.root().unwrap().find_attribute(DW_AT_comp_dir).copied();
        dwarf.attr_string(unit, &value.unwrap()).unwrap().unwrap().to_owned()
    };

    assert_eq!(comp_dir(&sections).as_c_str(), c"/from/line_str");
    sections.line_str = &[];
    assert_eq!(comp_dir(&sections).as_c_str(), c"/from/str");
}

#[test]
fn implicit_const_comes_from_the_abbreviation() {
    let mut abbrevs = Abbrevs::new();
    abbrevs
        .decl_implicit(1, DW_TAG_variable, DW_AT_const_value, -42)
        .end();
    let mut info = Vec::new();
    UnitBuilder::new(5, false, 0).entry(1).null().null().finish(&mut info);

    let sections = DwarfSections {
        abbrev: &abbrevs.data,
        info: &info,
        ..Default::default()
    };
    let dwarf = DwarfInfo::parse(&sections).unwrap();
    let unit = &dwarf.units()[0];

    // the trailing nulls are padding, not extra roots
    assert_eq!(unit.roots.len(), 1);
    let value = unit.root().unwrap().find_attribute(DW_AT_const_value);
    assert_eq!(value, Some(&AttrValue::Constant(-42)));
    assert_eq!(value.and_then(AttrValue::as_signed), Some(-42));
}

#[test]
fn ref_addr_crosses_units() {
    let mut abbrevs = Abbrevs::new();
    abbrevs
        .decl(1, DW_TAG_compile_unit, true, &[])
        .decl(2, DW_TAG_variable, false, &[(DW_AT_type, DW_FORM_ref_addr)])
        .decl(3, DW_TAG_base_type, false, &[(DW_AT_byte_size, DW_FORM_data1)])
        .end();

    // first unit: 11 header bytes, then 1 + (1 + 4) + 1 body bytes
    let second_start = 18;
    let target = second_start + 11;

    let mut info = Vec::new();
    UnitBuilder::new(4, false, 0)
        .entry(1)
        .entry(2)
        .u32(target as u32)
        .null()
        .finish(&mut info);
    let start = UnitBuilder::new(4, false, 0).entry(3).u8(8).finish(&mut info);
    assert_eq!(start, second_start);

    let sections = DwarfSections {
        abbrev: &abbrevs.data,
        info: &info,
        ..Default::default()
    };
    let dwarf = DwarfInfo::parse(&sections).unwrap();
    assert_eq!(dwarf.units().len(), 2);

    let var = &dwarf.units()[0].root().unwrap().children()[0];
    assert_eq!(var.type_ref(), Some(target));
    assert_eq!(
        dwarf.resolve_reference(target).map(|die| die.tag),
        Some(DW_TAG_base_type)
    );
    assert_eq!(
        dwarf.unit_containing(target).map(|unit| unit.header.offset),
        Some(second_start)
    );
    // inside the first unit's header, before any DIE
    assert!(dwarf.unit_containing(5).is_none());
    assert!(dwarf.dangling_references().is_empty());
}

#[test]
fn dangling_references_are_reported() {
    let mut abbrevs = Abbrevs::new();
    abbrevs
        .decl(1, DW_TAG_compile_unit, true, &[])
        .decl(2, DW_TAG_variable, false, &[(DW_AT_type, DW_FORM_ref4)])
        .end();

    let mut unit = UnitBuilder::new(4, false, 0);
    unit.entry(1);
    let broken_at = unit.here();
    unit.entry(2).u32(0x7777);
    unit.entry(2).u32(broken_at as u32);
    unit.null();
    let mut info = Vec::new();
    unit.finish(&mut info);

    let sections = DwarfSections {
        abbrev: &abbrevs.data,
        info: &info,
        ..Default::default()
    };
    let dwarf = DwarfInfo::parse(&sections).unwrap();
    assert_eq!(
        dwarf.dangling_references(),
        [DanglingReference {
            unit: 0,
            die: broken_at,
            attribute: DW_AT_type,
            target: 0x7777,
        }]
    );
}

#[test]
fn unclosed_children_are_truncation() {
    let mut abbrevs = Abbrevs::new();
    abbrevs
        .decl(1, DW_TAG_compile_unit, true, &[(DW_AT_name, DW_FORM_string)])
        .end();
    let mut info = Vec::new();
    UnitBuilder::new(4, false, 0).entry(1).cstr("a.c").finish(&mut info);

    let sections = DwarfSections {
        abbrev: &abbrevs.data,
        info: &info,
        ..Default::default()
    };
    let err = DwarfInfo::parse(&sections).err().unwrap();
    assert!(matches!(err, Error::Unit { offset: 0, .. }));
    assert_eq!(
        err.kind(),
        &Error::TruncatedInput {
            offset: info.len() as u64
        }
    );
}

#[test]
fn skip_unit_policy_continues_after_a_bad_unit() {
    common::init();

    let mut abbrevs = Abbrevs::new();
    abbrevs
        .decl(1, DW_TAG_compile_unit, false, &[(DW_AT_name, DW_FORM_string)])
        .end();

    let mut info = Vec::new();
    UnitBuilder::new(4, false, 0).entry(9).finish(&mut info);
    let good = UnitBuilder::new(4, false, 0)
        .entry(1)
        .cstr("ok.c")
        .finish(&mut info);

    let sections = DwarfSections {
        abbrev: &abbrevs.data,
        info: &info,
        ..Default::default()
    };

    let err = DwarfInfo::parse(&sections).err().unwrap();
    assert_eq!(
        err.kind(),
        &Error::UnknownAbbreviationCode { offset: 11, code: 9 }
    );

    let (dwarf, skipped) = DwarfInfo::parse_with(&sections, ErrorPolicy::SkipUnit).unwrap();
    assert_eq!(dwarf.units().len(), 1);
    assert_eq!(dwarf.units()[0].header.offset, good);
    assert_eq!(dwarf.unit_name(&dwarf.units()[0]), Ok(Some(c"ok.c")));
    assert_eq!(skipped.len(), 1);
    assert!(matches!(skipped[0], Error::Unit { offset: 0, .. }));
}

#[test]
fn unsupported_forms_abort_the_unit() {
    let mut abbrevs = Abbrevs::new();
    abbrevs
        .decl(1, DW_TAG_variable, false, &[(DW_AT_const_value, DW_FORM_data16)])
        .end();
    let mut info = Vec::new();
    UnitBuilder::new(5, false, 0).entry(1).u64(0).u64(0).finish(&mut info);

    let sections = DwarfSections {
        abbrev: &abbrevs.data,
        info: &info,
        ..Default::default()
    };
    let err = DwarfInfo::parse(&sections).err().unwrap();
    assert_eq!(err.kind(), &Error::UnsupportedForm(DW_FORM_data16));
    assert!(err.to_string().contains("DW_FORM_data16"));
}

#[test]
fn abbrev_offset_must_start_a_subtable() {
    let mut abbrevs = Abbrevs::new();
    abbrevs
        .decl(1, DW_TAG_compile_unit, false, &[(DW_AT_name, DW_FORM_string)])
        .end();
    let mut info = Vec::new();
    UnitBuilder::new(4, false, 3).entry(1).cstr("x").finish(&mut info);

    let sections = DwarfSections {
        abbrev: &abbrevs.data,
        info: &info,
        ..Default::default()
    };
    let err = DwarfInfo::parse(&sections).err().unwrap();
    assert!(matches!(
        err.kind(),
        Error::MalformedAbbreviation { offset: 3, .. }
    ));
}

#[test]
fn unknown_tag_in_any_subtable_fails_every_policy() {
    let mut abbrevs = Abbrevs::new();
    abbrevs
        .decl(1, DW_TAG_compile_unit, false, &[(DW_AT_name, DW_FORM_string)])
        .end();
    // a second subtable no unit uses, declaring tag 0x3000
    let bad = abbrevs.offset();
    abbrevs.data.extend_from_slice(&[0x01, 0x80, 0x60, 0x00, 0x00, 0x00, 0x00]);

    let mut info = Vec::new();
    UnitBuilder::new(4, false, 0).entry(1).cstr("fine").finish(&mut info);

    let sections = DwarfSections {
        abbrev: &abbrevs.data,
        info: &info,
        ..Default::default()
    };
    for policy in [ErrorPolicy::Abort, ErrorPolicy::SkipUnit] {
        let err = DwarfInfo::parse_with(&sections, policy).err().unwrap();
        assert_eq!(
            err.kind(),
            &Error::MalformedAbbreviation {
                offset: bad,
                reason: "unknown tag",
            }
        );
    }
}
