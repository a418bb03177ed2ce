//! Tests for the csv_source module

use dataferry::csv_source::{list_files, read_csv, table_name_for};
use dataferry::MigrationError;
use dataferry_rdbc::Value;
use std::fs;
use tempfile::TempDir;

fn write(dir: &TempDir, name: &str, contents: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, contents).unwrap();
    path
}

// ============================================================================
// Parsing Tests
// ============================================================================

#[test]
fn test_read_csv_infers_types() {
    let dir = TempDir::new().unwrap();
    let path = write(
        &dir,
        "space_session_info.csv",
        "id,number_of_participants,duration,recorded,title\n\
         1,3,12.5,true,Kickoff\n\
         2,1,4,FALSE,Standup\n",
    );

    let ds = read_csv(&path).unwrap();
    assert_eq!(ds.shape(), (2, 5));

    let types: Vec<&str> = ds.columns().iter().map(|c| c.type_name.as_str()).collect();
    assert_eq!(types, vec!["BIGINT", "BIGINT", "DOUBLE PRECISION", "BOOLEAN", "TEXT"]);

    assert_eq!(ds.rows()[0][2], Value::Float64(12.5));
    assert_eq!(ds.rows()[1][2], Value::Float64(4.0));
    assert_eq!(ds.rows()[1][3], Value::Bool(false));
    assert_eq!(ds.rows()[0][4], Value::from("Kickoff"));
}

#[test]
fn test_empty_fields_are_null() {
    let dir = TempDir::new().unwrap();
    let path = write(&dir, "user.csv", "ID,email,age\n1,a@x.com,\n2,,31\n");

    let ds = read_csv(&path).unwrap();
    assert_eq!(ds.columns()[2].type_name, "BIGINT");
    assert_eq!(ds.rows()[0][2], Value::Null);
    assert_eq!(ds.rows()[1][1], Value::Null);
    assert_eq!(ds.rows()[1][2], Value::Int64(31));
}

#[test]
fn test_all_empty_column_is_text() {
    let dir = TempDir::new().unwrap();
    let path = write(&dir, "t.csv", "a,b\n1,\n2,\n");

    let ds = read_csv(&path).unwrap();
    assert_eq!(ds.columns()[1].type_name, "TEXT");
    assert!(ds.column_values("b").unwrap().iter().all(|v| v.is_null()));
}

#[test]
fn test_header_only_file() {
    let dir = TempDir::new().unwrap();
    let path = write(&dir, "empty.csv", "x,y\n");

    let ds = read_csv(&path).unwrap();
    assert_eq!(ds.shape(), (0, 2));
    assert_eq!(ds.column_names(), vec!["x", "y"]);
}

#[test]
fn test_quoted_fields_keep_commas_and_spaces() {
    let dir = TempDir::new().unwrap();
    let path = write(&dir, "q.csv", "name,note\n\"Doe, Jane\", padded \n");

    let ds = read_csv(&path).unwrap();
    assert_eq!(ds.rows()[0][0], Value::from("Doe, Jane"));
    assert_eq!(ds.rows()[0][1], Value::from(" padded "));
}

// ============================================================================
// Error Tests
// ============================================================================

#[test]
fn test_duplicate_headers_rejected() {
    let dir = TempDir::new().unwrap();
    let path = write(&dir, "dup.csv", "a,A\n1,2\n");

    let err = read_csv(&path).unwrap_err();
    assert!(matches!(err, MigrationError::Rdbc(_)));
    assert!(err.to_string().contains("duplicate column"));
}

#[test]
fn test_ragged_record_is_csv_error() {
    let dir = TempDir::new().unwrap();
    let path = write(&dir, "ragged.csv", "a,b\n1,2\n3\n");

    let err = read_csv(&path).unwrap_err();
    assert!(matches!(err, MigrationError::Csv { .. }));
    assert!(err.to_string().contains("ragged.csv"));
}

#[test]
fn test_missing_file_is_io_error() {
    let dir = TempDir::new().unwrap();
    let err = read_csv(&dir.path().join("nope.csv")).unwrap_err();
    assert!(matches!(err, MigrationError::Io { .. }));
}

// ============================================================================
// Directory Tests
// ============================================================================

#[test]
fn test_list_files_skips_directories() {
    let dir = TempDir::new().unwrap();
    write(&dir, "foo.csv", "a\n1\n");
    write(&dir, "bar.csv", "b\n2\n");
    fs::create_dir(dir.path().join("archive")).unwrap();

    let mut names: Vec<String> = list_files(dir.path())
        .unwrap()
        .iter()
        .map(|p| table_name_for(p).unwrap())
        .collect();
    names.sort();
    assert_eq!(names, vec!["bar", "foo"]);
}

#[test]
fn test_list_files_missing_directory() {
    let dir = TempDir::new().unwrap();
    let err = list_files(&dir.path().join("missing")).unwrap_err();
    assert!(matches!(err, MigrationError::Io { .. }));
}
