//! Test helpers and utilities

use dataferry_rdbc::connection::ConnectionParams;
use dataferry_rdbc::types::{ColumnMetadata, Value};
use dataferry_rdbc::Dataset;
use std::path::Path;

/// Initialize tracing for tests (call once at start of test)
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::from_default_env();
    let filter = ["dataferry=debug", "dataferry_rdbc=debug"]
        .into_iter()
        .filter_map(|d| d.parse().ok())
        .fold(filter, |f, d| f.add_directive(d));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// Parameters for a database reached through a mock factory.
///
/// The dialect only has to parse; the factory decides the backend.
pub fn mock_params(database: &str) -> ConnectionParams {
    ConnectionParams::new("postgresql", "localhost", 5432, "test", "test", database)
}

/// Dataset with untyped columns, typed from the values
pub fn dataset(columns: &[&str], rows: Vec<Vec<Value>>) -> Dataset {
    let columns = columns
        .iter()
        .enumerate()
        .map(|(i, name)| ColumnMetadata::new(*name, "").with_ordinal(i as u32 + 1))
        .collect();
    match Dataset::new(columns, rows) {
        Ok(dataset) => dataset,
        Err(e) => panic!("invalid test dataset: {}", e),
    }
}

/// Write `contents` to `dir/name`
pub fn write_file(dir: &Path, name: &str, contents: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    if let Err(e) = std::fs::write(&path, contents) {
        panic!("failed to write {}: {}", path.display(), e);
    }
    path
}

/// The raw-data files of a small session dataset.
///
/// `a@x.com` joins sessions in two weeks, `b@x.com` in one.
pub fn write_sample_raw_data(dir: &Path) {
    write_file(
        dir,
        "user.csv",
        "ID,email\n\
         1,a@x.com\n\
         2,b@x.com\n",
    );
    write_file(
        dir,
        "space_attendee.csv",
        "userId,spaceSessionId,joinDate\n\
         1,10,01/02/2023 10:00\n\
         1,11,01/03/2023 11:30\n\
         1,12,01/10/2023 09:15\n\
         2,10,01/02/2023 10:05\n",
    );
    write_file(
        dir,
        "space_session_info.csv",
        "id,number_of_participants,duration\n\
         10,2,30\n\
         11,1,45\n\
         12,3,4\n",
    );
}
