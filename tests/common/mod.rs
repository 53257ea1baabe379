#![allow(dead_code)]

//! Writers for small synthetic DWARF sections used by the integration tests

use std::sync::Once;

use dwarfscan::dwarf::constants::{DW_AT, DW_FORM, DW_TAG};

static INIT: Once = Once::new();

/// Route library logging to the test output; `RUST_LOG` picks the level
pub fn init() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("off")),
            )
            .with_test_writer()
            .try_init()
            .ok();
    });
}

pub fn uleb(mut value: u64, out: &mut Vec<u8>) {
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

pub fn sleb(mut value: i64, out: &mut Vec<u8>) {
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        let done = (value == 0 && byte & 0x40 == 0) || (value == -1 && byte & 0x40 != 0);
        if done {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

/// `.debug_abbrev` contents, one subtable after another
#[derive(Default)]
pub struct Abbrevs {
    pub data: Vec<u8>,
}

impl Abbrevs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Where the next subtable will start
    pub fn offset(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn decl(
        &mut self,
        code: u64,
        tag: DW_TAG,
        children: bool,
        specs: &[(DW_AT, DW_FORM)],
    ) -> &mut Self {
        uleb(code, &mut self.data);
        uleb(tag.value(), &mut self.data);
        self.data.push(children.into());
        for (name, form) in specs {
            uleb(name.value(), &mut self.data);
            uleb(form.value(), &mut self.data);
        }
        self.data.extend_from_slice(&[0, 0]);
        self
    }

    pub fn decl_implicit(&mut self, code: u64, tag: DW_TAG, name: DW_AT, constant: i64) -> &mut Self {
        uleb(code, &mut self.data);
        uleb(tag.value(), &mut self.data);
        self.data.push(0);
        uleb(name.value(), &mut self.data);
        uleb(DW_FORM::DW_FORM_implicit_const.value(), &mut self.data);
        sleb(constant, &mut self.data);
        self.data.extend_from_slice(&[0, 0]);
        self
    }

    /// Close the current subtable
    pub fn end(&mut self) -> &mut Self {
        self.data.push(0);
        self
    }
}

/// Strings packed into a `.debug_str`-like section
#[derive(Default)]
pub struct Strings {
    pub data: Vec<u8>,
}

impl Strings {
    pub fn new() -> Self {
        // offset 0 is conventionally the empty string
        Self { data: vec![0] }
    }

    pub fn add(&mut self, text: &str) -> u64 {
        let offset = self.data.len() as u64;
        self.data.extend_from_slice(text.as_bytes());
        self.data.push(0);
        offset
    }
}

/// Appends one DWARF32 `.debug_str_offsets` contribution; returns its base offset
pub fn str_offsets_contribution(entries: &[u64], out: &mut Vec<u8>) -> u64 {
    out.extend_from_slice(&(4 + 4 * entries.len() as u32).to_le_bytes());
    out.extend_from_slice(&5u16.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    let base = out.len() as u64;
    for &entry in entries {
        out.extend_from_slice(&(entry as u32).to_le_bytes());
    }
    base
}

/// One compilation unit; the header is written by [`UnitBuilder::finish`]
pub struct UnitBuilder {
    pub version: u16,
    pub dwarf64: bool,
    pub address_size: u8,
    pub abbrev_offset: u64,
    body: Vec<u8>,
}

impl UnitBuilder {
    pub fn new(version: u16, dwarf64: bool, abbrev_offset: u64) -> Self {
        Self {
            version,
            dwarf64,
            address_size: 8,
            abbrev_offset,
            body: Vec::new(),
        }
    }

    fn length_size(&self) -> u64 {
        if self.dwarf64 { 12 } else { 4 }
    }

    pub fn header_size(&self) -> u64 {
        let offset = if self.dwarf64 { 8 } else { 4 };
        let extra = if self.version >= 5 { 2 } else { 1 };
        self.length_size() + 2 + extra + offset
    }

    /// Unit-relative offset of whatever is written next
    pub fn here(&self) -> u64 {
        self.header_size() + self.body.len() as u64
    }

    pub fn entry(&mut self, code: u64) -> &mut Self {
        uleb(code, &mut self.body);
        self
    }

    pub fn null(&mut self) -> &mut Self {
        self.body.push(0);
        self
    }

    pub fn u8(&mut self, value: u8) -> &mut Self {
        self.body.push(value);
        self
    }

    pub fn u16(&mut self, value: u16) -> &mut Self {
        self.body.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn u32(&mut self, value: u32) -> &mut Self {
        self.body.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn u64(&mut self, value: u64) -> &mut Self {
        self.body.extend_from_slice(&value.to_le_bytes());
        self
    }

    /// A section offset in this unit's format
    pub fn offset(&mut self, value: u64) -> &mut Self {
        match self.dwarf64 {
            true => self.u64(value),
            false => self.u32(value as u32),
        }
    }

    pub fn uleb(&mut self, value: u64) -> &mut Self {
        uleb(value, &mut self.body);
        self
    }

    pub fn cstr(&mut self, text: &str) -> &mut Self {
        self.body.extend_from_slice(text.as_bytes());
        self.body.push(0);
        self
    }

    /// Appends the unit to `info` and returns its start offset
    pub fn finish(&self, info: &mut Vec<u8>) -> u64 {
        let start = info.len() as u64;
        let unit_length = self.header_size() - self.length_size() + self.body.len() as u64;

        match self.dwarf64 {
            true => {
                info.extend_from_slice(&0xFFFF_FFFFu32.to_le_bytes());
                info.extend_from_slice(&unit_length.to_le_bytes());
            }
            false => info.extend_from_slice(&(unit_length as u32).to_le_bytes()),
        }
        info.extend_from_slice(&self.version.to_le_bytes());

        let abbrev_offset = match self.dwarf64 {
            true => self.abbrev_offset.to_le_bytes().to_vec(),
            false => (self.abbrev_offset as u32).to_le_bytes().to_vec(),
        };
        if self.version >= 5 {
            // DW_UT_compile
            info.push(0x01);
            info.push(self.address_size);
            info.extend_from_slice(&abbrev_offset);
        } else {
            info.extend_from_slice(&abbrev_offset);
            info.push(self.address_size);
        }

        info.extend_from_slice(&self.body);
        start
    }
}
