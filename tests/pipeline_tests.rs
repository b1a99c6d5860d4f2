//! Pipeline tests: the CSV-to-blocked-file conversion path, the extremes
//! signature identicality check, and engine behaviors that need a custom
//! block geometry.

use std::path::PathBuf;

use tempfile::TempDir;

use blockseq::csv;
use blockseq::record::{Record, ZipRecord};
use blockseq::stats::StateExtremes;
use blockseq::store::build;
use blockseq::{Options, Result, SeqSet};

const SAMPLE_CSV: &str = "\
zip,place,state,county,lat,lon
55455,Minneapolis,MN,Hennepin,44.973000,-93.235000
30301,Atlanta,GA,Fulton,33.749000,-84.388000
10001,New York,NY,New York,40.750000,-73.997000
94103,San Francisco,CA,San Francisco,37.773000,-122.411000
55101,Saint Paul,MN,Ramsey,44.949000,-93.093000
73301,Austin,TX,Travis,30.267000,-97.743000
";

fn opts() -> Options {
    Options {
        block_size: 512,
        min_block_size: 256,
        index_file_name: "pipeline.idx".to_string(),
        schema_info: "primary key: zipcode".to_string(),
    }
}

fn write_sample_csv(dir: &TempDir) -> PathBuf {
    let path = dir.path().join("zips.csv");
    std::fs::write(&path, SAMPLE_CSV).expect("Failed to write CSV fixture");
    path
}

#[test]
fn test_csv_to_blocked_file_preserves_every_record() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let csv_path = write_sample_csv(&dir);
    let data_path = dir.path().join("zips.bsq");

    let records = csv::load_records(&csv_path).expect("Failed to load CSV");
    assert_eq!(records.len(), 6);

    let mut set =
        build::create_from_records(&data_path, opts(), records.clone()).expect("bulk load failed");

    for record in &records {
        let found = set
            .lookup(record.zip_code)
            .expect("lookup failed")
            .expect("record missing after bulk load");
        assert_eq!(&found, record);
    }
    set.verify_integrity().expect("integrity check failed");
    set.close().expect("Failed to close");
}

#[test]
fn test_extremes_signature_survives_storage() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let csv_path = write_sample_csv(&dir);
    let data_path = dir.path().join("zips.bsq");

    let records = csv::load_records(&csv_path).expect("Failed to load CSV");
    let csv_signature = StateExtremes::from_records(&records).signature();

    let set = build::create_from_records(&data_path, opts(), records).expect("bulk load failed");
    set.close().expect("Failed to close");

    let mut reopened = SeqSet::<ZipRecord>::open(&data_path).expect("Failed to reopen");
    let stored: Vec<ZipRecord> = reopened
        .scan()
        .collect::<Result<Vec<_>>>()
        .expect("scan failed");
    let stored_signature = StateExtremes::from_records(&stored).signature();

    assert_eq!(csv_signature, stored_signature);
    // Two MN records collapse into one state row.
    assert_eq!(StateExtremes::from_records(&stored).len(), 5);
}

#[test]
fn test_add_and_delete_after_bulk_load() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let csv_path = write_sample_csv(&dir);
    let data_path = dir.path().join("zips.bsq");

    let records = csv::load_records(&csv_path).expect("Failed to load CSV");
    let set = build::create_from_records(&data_path, opts(), records).expect("bulk load failed");
    set.close().expect("Failed to close");

    let mut set = SeqSet::<ZipRecord>::open(&data_path).expect("Failed to reopen");
    set.insert(ZipRecord::new(60601, "Chicago", "IL", "Cook", 41.886, -87.623))
        .expect("Failed to insert");
    set.remove(30301).expect("Failed to remove");
    set.close().expect("Failed to close");

    let mut reopened = SeqSet::<ZipRecord>::open(&data_path).expect("Failed to reopen");
    assert!(reopened.lookup(60601).expect("lookup failed").is_some());
    assert!(reopened.lookup(30301).expect("lookup failed").is_none());
    assert_eq!(reopened.header().record_count, 6);
    reopened.verify_integrity().expect("integrity check failed");
}

/// A 60-byte record, as in the engine test fixtures.
fn rec(zip: u32) -> ZipRecord {
    let record = ZipRecord::new(zip, "PP", "MN", &"C".repeat(29), 44.973, -93.235);
    assert_eq!(record.encoded_size(), 60);
    record
}

#[test]
fn test_odd_split_sends_extra_record_upward() {
    // A 450-byte block holds six 64-byte records (394 used); the seventh
    // forces a split of an odd working list: floor(7/2) = 3 stay low.
    let dir = TempDir::new().expect("Failed to create temp dir");
    let mut set = SeqSet::create(
        &dir.path().join("odd.bsq"),
        Options {
            block_size: 450,
            min_block_size: 128,
            ..opts()
        },
    )
    .expect("Failed to create");

    for zip in [100, 200, 300, 400, 500, 600] {
        set.insert(rec(zip)).expect("Failed to insert");
    }
    assert_eq!(set.header().block_count, 1);
    set.insert(rec(700)).expect("Failed to insert");

    let mut out = Vec::new();
    set.dump_logical(&mut out).expect("Failed to dump");
    let dump = String::from_utf8(out).expect("dump is not utf-8");
    assert_eq!(dump, "RBN 1: 100 200 300\nRBN 2: 400 500 600 700\n");
    set.verify_integrity().expect("integrity check failed");
}

#[test]
fn test_lookup_miss_between_blocks() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let mut set = SeqSet::create(&dir.path().join("gap.bsq"), opts()).expect("Failed to create");

    for zip in [100, 200, 300, 400, 500, 600, 700, 250] {
        set.insert(rec(zip)).expect("Failed to insert");
    }
    assert_eq!(set.header().block_count, 2);

    // 350 falls in the gap between block 1 (max 300) and block 2 (min 400):
    // the index sends the probe to block 2, which does not contain it.
    assert!(set.lookup(350).expect("lookup failed").is_none());
    // Beyond every key, the index reports no candidate block at all.
    assert!(set.lookup(999).expect("lookup failed").is_none());
}

#[test]
fn test_index_file_lands_next_to_data_file() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let data_path = dir.path().join("nested.bsq");

    let set = SeqSet::<ZipRecord>::create(&data_path, opts()).expect("Failed to create");
    set.close().expect("Failed to close");

    assert!(
        dir.path().join("pipeline.idx").exists(),
        "relative index names resolve against the data file's directory"
    );
}
