//! In-memory tabular dataset exchanged between the query executor and the
//! table loader.
//!
//! A dataset is an ordered list of uniquely named, typed columns plus an
//! ordered list of rows. Every dataset also carries an implicit ordinal
//! row index (`0..len`), which the loader can write as its own column.

use crate::error::{Error, Result};
use crate::types::{ColumnMetadata, Row, Value};

/// Column name used for the row index when no label is set
pub const DEFAULT_INDEX_LABEL: &str = "index";

/// Type assigned to columns with no driver metadata and no non-null value
pub const FALLBACK_TYPE: &str = "TEXT";

/// Ordered, typed columns with ordered rows
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    columns: Vec<ColumnMetadata>,
    rows: Vec<Vec<Value>>,
    index_label: Option<String>,
}

impl Dataset {
    /// Build a dataset, validating column names and row widths.
    ///
    /// Columns without a type are typed from their first non-null value,
    /// or `TEXT` if every value is NULL.
    pub fn new(columns: Vec<ColumnMetadata>, rows: Vec<Vec<Value>>) -> Result<Self> {
        check_unique(&columns)?;

        let width = columns.len();
        if let Some((pos, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != width) {
            return Err(Error::schema(format!(
                "row {} has {} values, expected {}",
                pos,
                row.len(),
                width
            )));
        }

        let mut dataset = Self {
            columns,
            rows,
            index_label: None,
        };
        dataset.resolve_types();
        Ok(dataset)
    }

    /// Dataset with columns but no rows
    pub fn empty(columns: Vec<ColumnMetadata>) -> Result<Self> {
        Self::new(columns, Vec::new())
    }

    /// Build a dataset from driver rows; column names come from the first row.
    ///
    /// An empty row list yields a dataset with no columns.
    pub fn from_rows(rows: Vec<Row>) -> Result<Self> {
        let columns: Vec<ColumnMetadata> = match rows.first() {
            Some(first) => first
                .columns()
                .iter()
                .enumerate()
                .map(|(i, name)| ColumnMetadata::new(name.clone(), "").with_ordinal(i as u32 + 1))
                .collect(),
            None => Vec::new(),
        };

        let values = rows.into_iter().map(Row::into_values).collect();
        Self::new(columns, values)
    }

    /// Set the name used when the row index is written as a column
    pub fn with_index_label(mut self, label: impl Into<String>) -> Self {
        self.index_label = Some(label.into());
        self
    }

    /// Name of the row index column
    pub fn index_label(&self) -> &str {
        self.index_label.as_deref().unwrap_or(DEFAULT_INDEX_LABEL)
    }

    /// Column metadata in order
    #[inline]
    pub fn columns(&self) -> &[ColumnMetadata] {
        &self.columns
    }

    /// Column names in order
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Rows in order
    #[inline]
    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    /// Number of rows
    #[inline]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the dataset has no rows
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// `(rows, columns)`
    #[inline]
    pub fn shape(&self) -> (usize, usize) {
        (self.rows.len(), self.columns.len())
    }

    /// Find a column position by name (case-insensitive)
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Values of one column, top to bottom
    pub fn column_values(&self, name: &str) -> Option<Vec<&Value>> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter().map(|r| &r[idx]).collect())
    }

    /// Convert into driver-style rows
    pub fn into_rows(self) -> Vec<Row> {
        let names: Vec<String> = self.columns.into_iter().map(|c| c.name).collect();
        self.rows
            .into_iter()
            .map(|values| Row::new(names.clone(), values))
            .collect()
    }

    fn resolve_types(&mut self) {
        for (idx, column) in self.columns.iter_mut().enumerate() {
            if !column.is_untyped() {
                continue;
            }
            column.type_name = self
                .rows
                .iter()
                .map(|r| &r[idx])
                .find(|v| !v.is_null())
                .map(Value::sql_type)
                .unwrap_or(FALLBACK_TYPE)
                .to_string();
        }
    }
}

fn check_unique(columns: &[ColumnMetadata]) -> Result<()> {
    for (i, column) in columns.iter().enumerate() {
        if columns[..i]
            .iter()
            .any(|c| c.name.eq_ignore_ascii_case(&column.name))
        {
            return Err(Error::schema(format!(
                "duplicate column name '{}'",
                column.name
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cols(names: &[&str]) -> Vec<ColumnMetadata> {
        names.iter().map(|n| ColumnMetadata::new(*n, "")).collect()
    }

    #[test]
    fn test_shape_and_types() {
        let ds = Dataset::new(
            cols(&["email", "total"]),
            vec![
                vec![Value::from("a@x.com"), Value::Int64(3)],
                vec![Value::from("b@x.com"), Value::Int64(1)],
            ],
        )
        .unwrap();

        assert_eq!(ds.shape(), (2, 2));
        assert_eq!(ds.columns()[0].type_name, "VARCHAR");
        assert_eq!(ds.columns()[1].type_name, "BIGINT");
    }

    #[test]
    fn test_all_null_column_falls_back_to_text() {
        let ds = Dataset::new(cols(&["x"]), vec![vec![Value::Null], vec![Value::Null]]).unwrap();
        assert_eq!(ds.columns()[0].type_name, FALLBACK_TYPE);
    }

    #[test]
    fn test_driver_types_are_kept() {
        let ds = Dataset::new(
            vec![ColumnMetadata::new("n", "INTEGER")],
            vec![vec![Value::Int64(1)]],
        )
        .unwrap();
        assert_eq!(ds.columns()[0].type_name, "INTEGER");
    }

    #[test]
    fn test_duplicate_columns_rejected() {
        let err = Dataset::new(cols(&["a", "A"]), vec![]).unwrap_err();
        assert!(err.to_string().contains("duplicate column"));
    }

    #[test]
    fn test_ragged_rows_rejected() {
        let err = Dataset::new(cols(&["a", "b"]), vec![vec![Value::Int64(1)]]).unwrap_err();
        assert!(err.to_string().contains("row 0"));
    }

    #[test]
    fn test_from_rows_and_back() {
        let rows = vec![
            Row::new(vec!["id".into()], vec![Value::Int64(1)]),
            Row::new(vec!["id".into()], vec![Value::Int64(2)]),
        ];
        let ds = Dataset::from_rows(rows.clone()).unwrap();
        assert_eq!(ds.column_names(), vec!["id"]);
        assert_eq!(ds.into_rows(), rows);
    }

    #[test]
    fn test_from_no_rows_has_no_columns() {
        let ds = Dataset::from_rows(vec![]).unwrap();
        assert_eq!(ds.shape(), (0, 0));
    }

    #[test]
    fn test_index_label() {
        let ds = Dataset::empty(cols(&["a"])).unwrap();
        assert_eq!(ds.index_label(), "index");
        assert_eq!(ds.with_index_label("row_id").index_label(), "row_id");
    }

    #[test]
    fn test_column_values() {
        let ds = Dataset::new(
            cols(&["a"]),
            vec![vec![Value::Int64(1)], vec![Value::Int64(2)]],
        )
        .unwrap();
        assert_eq!(
            ds.column_values("A"),
            Some(vec![&Value::Int64(1), &Value::Int64(2)])
        );
        assert!(ds.column_values("missing").is_none());
    }
}
