use std::{borrow::Cow, collections::HashMap, path::PathBuf, time::Instant};

use anyhow::{Context, Result, bail};
use clap::Parser;
use dwarfscan::dwarf::{
    CompilationUnit, DwarfInfo, ErrorPolicy,
    die::{AttrValue, Die},
    sections::DwarfSections,
};
use object::{Object, ObjectSection};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[clap(version, about = "Decode and inspect DWARF debugging information")]
struct Args {
    #[clap(short, long)]
    verbose: bool,
    /// Skip compilation units that fail to decode instead of stopping
    #[clap(short, long)]
    keep_going: bool,
    binary: PathBuf,
    #[clap(subcommand)]
    subcommand: Subcommand,
}

#[derive(clap::Subcommand)]
enum Subcommand {
    /// List compilation unit headers
    Units,
    /// Print every DIE with its attributes
    Tree,
    /// Dump the abbreviation subtables
    Abbrev,
    /// Dump the .debug_str_offsets contribution headers
    StrOffsets,
    /// Print the DIE at a .debug_info offset and everything below it
    Lookup {
        #[clap(value_parser = parse_offset)]
        offset: u64,
    },
    /// List references that do not point at a decoded DIE
    Dangling,
}

fn parse_offset(text: &str) -> Result<u64, std::num::ParseIntError> {
    match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => text.parse(),
    }
}

fn stage<R>(name: &str, fun: impl FnOnce() -> R) -> R {
    info!("{name}");
    let start = Instant::now();
    let result = fun();
    info!("{name}: done in {:.2}ms", start.elapsed().as_secs_f32() * 1000.);
    result
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn load_sections<'data>(
    file: &object::File<'data>,
) -> Result<HashMap<&'static str, Cow<'data, [u8]>>> {
    let mut result = HashMap::new();
    for name in DwarfSections::NAMES {
        let Some(section) = file.section_by_name(name) else {
            continue;
        };
        let data = section
            .uncompressed_data()
            .with_context(|| format!("failed to read {name}"))?;
        result.insert(name, data);
    }
    Ok(result)
}

fn format_value(info: &DwarfInfo, unit: &CompilationUnit, value: &AttrValue) -> String {
    match info.attr_string(unit, value) {
        Ok(Some(string)) => format!("{:?}", string.to_string_lossy()),
        Ok(None) => match value {
            AttrValue::Reference(target) => format!("<0x{target:08x}>"),
            other => format!("{other:?}"),
        },
        Err(err) => format!("<{err}>"),
    }
}

fn print_entry(info: &DwarfInfo, unit: &CompilationUnit, die: &Die, depth: usize) {
    let indent = "\t".repeat(depth);
    println!("{indent}<0x{:08x}> {}", die.offset, die.tag);
    for attr in &die.attributes {
        println!(
            "{indent}\t{} = {}",
            attr.name,
            format_value(info, unit, &attr.value)
        );
    }
}

fn print_units(info: &DwarfInfo) {
    for unit in info.units() {
        let header = &unit.header;
        let name = match info.unit_name(unit) {
            Ok(name) => name.map(|name| name.to_string_lossy()).unwrap_or_default(),
            Err(err) => format!("<{err}>").into(),
        };
        println!(
            "[0x{:08x}] v{} {} addr{} abbrev=0x{:x} type={} entries={} {}",
            header.offset,
            header.version,
            if header.dwarf64 { "DWARF64" } else { "DWARF32" },
            header.address_size,
            header.debug_abbrev_offset,
            header
                .unit_type
                .map_or_else(|| "-".to_owned(), |ty| ty.to_string()),
            unit.entries().count(),
            name,
        );
    }
}

fn print_tree(info: &DwarfInfo) {
    for unit in info.units() {
        println!(
            "COMPILE UNIT <0x{:08x}> version {}",
            unit.header.offset, unit.header.version
        );
        for entry in unit.entries() {
            print_entry(info, unit, entry.die, entry.depth + 1);
        }
    }
}

fn print_abbrevs(info: &DwarfInfo) {
    for (offset, subtable) in info.abbrevs().subtables() {
        println!("subtable 0x{offset:08x} ({} declarations)", subtable.len());
        for abbrv in subtable.declarations() {
            println!(
                "\t[{}] {} {}",
                abbrv.code,
                abbrv.tag,
                if abbrv.children { "children" } else { "no children" }
            );
            for spec in &abbrv.attributes {
                match spec.implicit_const {
                    Some(constant) => println!("\t\t{} {} ({constant})", spec.name, spec.form),
                    None => println!("\t\t{} {}", spec.name, spec.form),
                }
            }
        }
    }
}

fn print_str_offsets(info: &DwarfInfo) {
    for header in info.str_offsets().headers() {
        println!(
            "[0x{:08x}] v{} {} base=0x{:x} entries={}",
            header.offset,
            header.version,
            if header.dwarf64 { "DWARF64" } else { "DWARF32" },
            header.base_offset,
            header.entry_count()
        );
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let data = std::fs::read(&args.binary)
        .with_context(|| format!("failed to read {}", args.binary.display()))?;
    let file = object::File::parse(&*data)
        .with_context(|| format!("{} is not a recognised object file", args.binary.display()))?;

    let raw = stage("Loading debug sections", || load_sections(&file))?;
    let sections = DwarfSections::load(|name| {
        anyhow::Ok(raw.get(name).map_or(&[][..], |data| &**data))
    })?;
    if !sections.has_required() {
        bail!(
            "{} doesn't contain DWARF information",
            args.binary.display()
        );
    }

    let policy = match args.keep_going {
        true => ErrorPolicy::SkipUnit,
        false => ErrorPolicy::Abort,
    };
    let (info, skipped) = stage("Parsing DWARF", || DwarfInfo::parse_with(&sections, policy))
        .context("failed to decode .debug_info")?;
    for err in &skipped {
        warn!("skipped: {err}");
    }
    info!(
        units = info.units().len(),
        skipped = skipped.len(),
        "decoded compilation units"
    );

    match args.subcommand {
        Subcommand::Units => print_units(&info),
        Subcommand::Tree => print_tree(&info),
        Subcommand::Abbrev => print_abbrevs(&info),
        Subcommand::StrOffsets => print_str_offsets(&info),
        Subcommand::Lookup { offset } => {
            let (Some(unit), Some(die)) =
                (info.unit_containing(offset), info.resolve_reference(offset))
            else {
                bail!("no DIE starts at 0x{offset:08x}");
            };
            for entry in die.walk() {
                print_entry(&info, unit, entry.die, entry.depth);
            }
        }
        Subcommand::Dangling => {
            let dangling = info.dangling_references();
            for reference in &dangling {
                println!(
                    "[0x{:08x}] <0x{:08x}> {} -> 0x{:08x}",
                    reference.unit, reference.die, reference.attribute, reference.target
                );
            }
            info!("{} dangling references", dangling.len());
        }
    }

    Ok(())
}
