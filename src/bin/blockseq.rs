//! Command-line front-end for blocked sequence set files.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::process::ExitCode;

use blockseq::file::BlockFile;
use blockseq::record::{Record, ZipRecord};
use blockseq::stats::StateExtremes;
use blockseq::store::build;
use blockseq::{csv, Error, Options, Result, SeqSet};

fn print_usage(program: &str) {
    eprintln!(
        "Usage:\n\
         \x20 {program} convert <input.csv> <output.bsq> [blockSize] [minBlockSize]\n\
         \x20 {program} header <file.bsq>\n\
         \x20 {program} search <file.bsq> <key> [<key> ...]\n\
         \x20 {program} add <file.bsq> <records.csv>\n\
         \x20 {program} del <file.bsq> <keys.txt>\n\
         \x20 {program} dump-physical <file.bsq>\n\
         \x20 {program} dump-logical <file.bsq>\n\
         \x20 {program} verify <input.csv> <file.bsq>"
    );
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    let program = args.first().map(String::as_str).unwrap_or("blockseq");
    if args.len() < 2 {
        print_usage(program);
        return ExitCode::FAILURE;
    }

    let result = match (args[1].as_str(), args.len()) {
        ("convert", 4..=6) => convert(&args),
        ("header", 3) => show_header(&args[2]),
        ("search", n) if n >= 4 => search(&args[2], &args[3..]),
        ("add", 4) => add(&args[2], &args[3]),
        ("del", 4) => del(&args[2], &args[3]),
        ("dump-physical", 3) => dump(&args[2], true),
        ("dump-logical", 3) => dump(&args[2], false),
        ("verify", 4) => return verify(&args[2], &args[3]),
        _ => {
            print_usage(program);
            return ExitCode::FAILURE;
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn convert(args: &[String]) -> Result<()> {
    let input = Path::new(&args[2]);
    let output = Path::new(&args[3]);

    let mut options = Options::default();
    if let Some(arg) = args.get(4) {
        options.block_size = parse_number(arg, "blockSize")?;
    }
    if let Some(arg) = args.get(5) {
        options.min_block_size = parse_number(arg, "minBlockSize")? as u16;
    }
    options.index_file_name = index_name_for(output);

    let records = csv::load_records(input)?;
    println!("Read {} records from {}", records.len(), input.display());

    let set = build::create_from_records(output, options, records)?;
    println!(
        "Wrote {} records in {} blocks to {}",
        set.header().record_count,
        set.header().block_count,
        output.display()
    );
    println!("Index written to {}", set.header().index_file_name);
    set.close()
}

fn show_header(path: &str) -> Result<()> {
    let (_, header) = BlockFile::<ZipRecord>::open(Path::new(path))?;

    println!("File: {path}");
    println!("Version: {}", header.version);
    println!("Header size: {} bytes", header.header_size);
    println!("Block size: {} bytes", header.block_size);
    println!("Min block size: {} bytes", header.min_block_size);
    println!("Index file: {}", header.index_file_name);
    println!("Schema: {}", header.schema_info);
    println!("Record count: {}", header.record_count);
    println!("Block count: {}", header.block_count);
    println!("Available list head: {}", header.available_list_head);
    println!("Sequence set head: {}", header.sequence_set_head);
    println!("Stale flag: {}", if header.stale_flag { "STALE" } else { "VALID" });
    println!("Fields:");
    for (i, field) in header.fields.iter().enumerate() {
        let marker = if i == header.primary_key_field as usize {
            " (primary key)"
        } else {
            ""
        };
        println!("  [{i}] {} ({:?}){marker}", field.name, field.field_type);
    }
    Ok(())
}

fn search(path: &str, keys: &[String]) -> Result<()> {
    let mut set = SeqSet::<ZipRecord>::open(Path::new(path))?;
    for arg in keys {
        let key: u32 = parse_number(arg, "key")?;
        match set.lookup(key)? {
            Some(record) => println!(
                "{key}: {},{},{},{:.6},{:.6}",
                record.place_name, record.state, record.county, record.latitude, record.longitude
            ),
            None => println!("{key}: NOT FOUND"),
        }
    }
    set.close()
}

fn add(path: &str, csv_path: &str) -> Result<()> {
    let mut set = SeqSet::<ZipRecord>::open(Path::new(path))?;
    let mut added = 0u32;

    for item in csv::CsvReader::open(Path::new(csv_path))? {
        let record = match item {
            Ok(record) => record,
            Err(e) => {
                eprintln!("skip bad line: {e}");
                continue;
            }
        };
        let key = record.key();
        let blocks_before = set.header().block_count;
        match set.insert(record) {
            Ok(()) => {
                added += 1;
                if set.header().block_count != blocks_before {
                    println!("SPLIT: adding key {key} grew the file to {} blocks", set.header().block_count);
                }
            }
            Err(e @ Error::Duplicate(_)) => println!("ADD: {e}, skipped"),
            Err(e) => return Err(e),
        }
    }

    println!("ADD: inserted {added} records");
    set.close()
}

fn del(path: &str, keys_path: &str) -> Result<()> {
    let mut set = SeqSet::<ZipRecord>::open(Path::new(path))?;
    let reader = BufReader::new(
        File::open(keys_path).map_err(|e| Error::Io(format!("open {keys_path}: {e}")))?,
    );
    let mut removed = 0u32;

    for line in reader.lines() {
        let line = line.map_err(Error::from)?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let key: u32 = parse_number(line, "key")?;
        match set.remove(key) {
            Ok(merged) => {
                removed += 1;
                if merged {
                    println!("MERGE: removing key {key} freed a block");
                }
            }
            Err(e @ Error::NotFound(_)) => println!("DELETE: {e}"),
            Err(e) => return Err(e),
        }
    }

    println!("DEL: removed {removed} keys");
    set.close()
}

fn dump(path: &str, physical: bool) -> Result<()> {
    let mut set = SeqSet::<ZipRecord>::open(Path::new(path))?;
    let mut out = std::io::stdout().lock();
    if physical {
        set.dump_physical(&mut out)?;
    } else {
        set.dump_logical(&mut out)?;
    }
    set.close()
}

fn verify(csv_path: &str, file_path: &str) -> ExitCode {
    let run = || -> Result<bool> {
        let csv_records = csv::load_records(Path::new(csv_path))?;
        let csv_signature = StateExtremes::from_records(&csv_records).signature();

        let mut set = SeqSet::<ZipRecord>::open(Path::new(file_path))?;
        let stored: Vec<ZipRecord> = set.scan().collect::<Result<Vec<_>>>()?;
        set.close()?;
        let stored_signature = StateExtremes::from_records(&stored).signature();

        Ok(csv_signature == stored_signature)
    };

    match run() {
        Ok(true) => {
            println!("IDENTICAL");
            ExitCode::SUCCESS
        }
        Ok(false) => {
            println!("DIFFER");
            ExitCode::from(2)
        }
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn parse_number(arg: &str, what: &str) -> Result<u32> {
    arg.parse::<u32>()
        .map_err(|e| Error::Io(format!("bad {what} {arg:?}: {e}")))
}

fn index_name_for(output: &Path) -> String {
    let stem = output
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("blockseq");
    format!("{stem}.idx")
}
