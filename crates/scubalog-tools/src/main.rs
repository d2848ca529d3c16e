use anyhow::{bail, Context, Result};
use clap::{arg, Arg, ArgMatches, Command, ValueEnum};
use colorize::AnsiColor;
use scubalog::{
    load_log_book, save_log_book, scan_chunks, ChunkInfo, Loaded, LogBook, SkipReason,
    SkippedChunk,
};
use serde::Serialize;
use std::{
    fs::File,
    io::{stdout, BufReader, Write},
    path::{Path, PathBuf},
    process::ExitCode,
};
use tracing_subscriber::EnvFilter;

fn cli() -> Command {
    Command::new("scubalog-tools")
        .about("Tools for inspecting and building scuba log books (.slb)")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            Command::new("info")
                .about("Summarize a log book")
                .arg(arg!(logbook: <LOGBOOK>)),
        )
        .subcommand(
            Command::new("dump")
                .about("Print a whole log book as YAML or JSON")
                .arg(arg!(logbook: <LOGBOOK>))
                .arg(arg!(-j - -json))
                .arg(arg!(-p - -pretty)),
        )
        .subcommand(
            Command::new("chunks")
                .about("List the chunks of a log book without decoding them")
                .arg(arg!(logbook: <LOGBOOK>))
                .arg(arg!(-j - -json))
                .arg(arg!(-p - -pretty)),
        )
        .subcommand(
            Command::new("pack")
                .about("Build a log book from a YAML or JSON dump")
                .arg(arg!(source: <SOURCE>))
                .arg(arg!(-o - -out[OUT]))
                .arg(arg!(-w - -overwrite))
                .arg(
                    Arg::new("format")
                        .long("format")
                        .short('f')
                        .value_parser(clap::value_parser!(DumpFormat)),
                ),
        )
        .subcommand(
            Command::new("check")
                .about("Load a log book and report skipped records")
                .arg(arg!(logbook: <LOGBOOK>))
                .arg(arg!(-s - -strict "Fail when any record had to be skipped")),
        )
}

pub fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let matches = cli().get_matches();
    match matches.subcommand() {
        Some(("info", sub_matches)) => {
            let (loaded, path) = open_log_book(sub_matches)?;
            print_info(&loaded, &path);
        }
        Some(("dump", sub_matches)) => {
            let (loaded, _) = open_log_book(sub_matches)?;
            emit(sub_matches, &loaded.log_book)?;
        }
        Some(("chunks", sub_matches)) => {
            let path = logbook_path(sub_matches)?;
            let f = File::open(&path)
                .with_context(|| format!("Couldn't open [{}]", path.display()))?;
            let chunks = scan_chunks(BufReader::new(f))
                .with_context(|| format!("Couldn't scan [{}]", path.display()))?;
            if sub_matches.get_flag("json") {
                emit(sub_matches, &chunks)?;
            } else {
                print_chunks(&chunks);
            }
        }
        Some(("pack", sub_matches)) => {
            let source = PathBuf::from(
                sub_matches
                    .get_one::<String>("source")
                    .context("Couldn't get source from args")?,
            );
            let out = sub_matches
                .get_one::<String>("out")
                .map(PathBuf::from)
                .unwrap_or_else(|| source.with_extension("slb"));
            if out.exists() && !sub_matches.get_flag("overwrite") {
                bail!("[{}] already exists, pass --overwrite", out.display());
            }
            let format = sub_matches
                .get_one::<DumpFormat>("format")
                .copied()
                .unwrap_or_else(|| DumpFormat::from_path(&source));

            let data = std::fs::read(&source)
                .with_context(|| format!("Couldn't read [{}]", source.display()))?;
            let log_book: LogBook = match format {
                DumpFormat::Yaml => serde_yaml::from_slice(&data)?,
                DumpFormat::Json => serde_json::from_slice(&data)?,
            };
            let len = save_log_book(&log_book, &out)?;
            tracing::info!(out = %out.display(), len, "log book packed");
            println!(
                "{} {} ({} dives, {} bytes)",
                "Packed".blue().bold(),
                out.display(),
                log_book.dive_logs().len(),
                len
            );
        }
        Some(("check", sub_matches)) => {
            let (loaded, path) = open_log_book(sub_matches)?;
            let warnings: Vec<_> = loaded.warnings().collect();
            for skipped in &warnings {
                print_skipped(skipped);
            }
            if warnings.is_empty() {
                println!("{} {}", path.display(), "OK".blue().bold());
            } else if sub_matches.get_flag("strict") {
                return Ok(ExitCode::from(2));
            }
        }
        _ => unreachable!(),
    }
    Ok(ExitCode::SUCCESS)
}

#[derive(Debug, ValueEnum, Clone, Copy, Default)]
#[clap(rename_all = "snake_case")]
pub enum DumpFormat {
    #[default]
    Yaml,
    Json,
}

impl DumpFormat {
    fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => DumpFormat::Json,
            _ => DumpFormat::Yaml,
        }
    }
}

fn logbook_path(sub_matches: &ArgMatches) -> Result<PathBuf> {
    Ok(PathBuf::from(
        sub_matches
            .get_one::<String>("logbook")
            .context("Couldn't get log book path from args")?,
    ))
}

fn open_log_book(sub_matches: &ArgMatches) -> Result<(Loaded, PathBuf)> {
    let path = logbook_path(sub_matches)?;
    let loaded = load_log_book(&path).context("Couldn't load log book")?;
    Ok((loaded, path))
}

/// YAML by default, JSON with `--json`.
fn emit<T: Serialize>(sub_matches: &ArgMatches, value: &T) -> Result<()> {
    if sub_matches.get_flag("json") {
        if sub_matches.get_flag("pretty") {
            serde_json::to_writer_pretty(stdout().lock(), value)?;
        } else {
            serde_json::to_writer(stdout().lock(), value)?;
        }
        println!();
    } else {
        serde_yaml::to_writer(stdout().lock(), value)?;
    }
    stdout().flush()?;
    Ok(())
}

fn print_info(loaded: &Loaded, path: &Path) {
    let book = &loaded.log_book;
    let personal = book.personal();
    let diver = if personal.diver_name.is_empty() {
        "(no diver name)".to_string()
    } else {
        personal.diver_name.clone()
    };
    println!("{} {}", diver.blue().bold(), path.display());
    if !personal.email_address.is_empty() {
        println!("  email:      {}", personal.email_address);
    }
    if !personal.www_url.is_empty() {
        println!("  www:        {}", personal.www_url);
    }

    let dives = book.dive_logs();
    match (dives.first(), dives.last()) {
        (Some(first), Some(last)) => println!(
            "  dives:      {} {}",
            dives.len(),
            format!("[#{} - #{}]", first.log_number(), last.log_number()).bold()
        ),
        _ => println!("  dives:      0"),
    }
    let deepest = dives
        .iter()
        .map(|d| d.max_depth)
        .filter(|d| d.is_finite())
        .fold(None, |acc: Option<f32>, d| Some(acc.map_or(d, |a| a.max(d))));
    if let Some(deepest) = deepest {
        println!("  deepest:    {deepest:.1} m");
    }
    println!("  locations:  {}", book.location_logs().len());
    let orphans = dives
        .iter()
        .filter(|d| !d.location.is_empty() && book.location_of(d).is_none())
        .count();
    if orphans > 0 {
        println!(
            "  {}",
            format!("{orphans} dives name a location that is not logged").red()
        );
    }
    println!(
        "  equipment:  {} ({} history entries)",
        book.equipment_logs().len(),
        book.history_entry_count()
    );
    let unknown = loaded
        .skipped
        .iter()
        .filter(|s| matches!(s.reason, SkipReason::Unknown { .. }))
        .count();
    if unknown > 0 {
        println!("  unknown chunks skipped: {unknown}");
    }
    for skipped in loaded.warnings() {
        print_skipped(skipped);
    }
}

fn print_skipped(skipped: &SkippedChunk) {
    if let SkipReason::Corrupt(cause) = &skipped.reason {
        println!(
            "{}",
            AnsiColor::redb(format!(
                "Skipped {} chunk at offset {}: {}",
                skipped.id, skipped.offset, cause
            ))
        );
    }
}

fn print_chunks(chunks: &[ChunkInfo]) {
    for c in chunks {
        let tag = c.header.id.to_string();
        let tag = if c.known { tag.blue().bold() } else { tag.red().bold() };
        println!(
            "{:>10}  {}  size {:>8}  v{}",
            c.offset, tag, c.header.size, c.header.version
        );
    }
}
