//! Data loading utilities

use crate::error::{Result, SolverError};
use crate::utils::columns::column_uniquify;
use polars::prelude::*;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::debug;

/// CSV loader used to resolve dataset descriptors
#[derive(Debug, Clone)]
pub struct DataLoader {
    /// Field separator
    delimiter: u8,
    /// Rows used for dtype inference
    infer_schema_length: usize,
}

impl Default for DataLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl DataLoader {
    /// Create a new data loader
    pub fn new() -> Self {
        Self {
            delimiter: b',',
            infer_schema_length: 100,
        }
    }

    /// Set the field separator
    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    /// Set the number of rows used for dtype inference
    pub fn with_infer_schema_length(mut self, rows: usize) -> Self {
        self.infer_schema_length = rows.max(1);
        self
    }

    /// Load a CSV file. Repeated header names are made unique with `column_uniquify`.
    pub fn load_csv(&self, path: impl AsRef<Path>) -> Result<DataFrame> {
        let path = path.as_ref();
        let header = self.read_header(path)?;
        let names = column_uniquify(&header);

        let file = File::open(path)?;
        let parse_opts = CsvParseOptions::default().with_separator(self.delimiter);

        let mut df = CsvReadOptions::default()
            .with_has_header(false)
            .with_skip_rows(1)
            .with_infer_schema_length(Some(self.infer_schema_length))
            .with_parse_options(parse_opts)
            .into_reader_with_file_handle(file)
            .finish()
            .map_err(|e| SolverError::DataError(e.to_string()))?;

        if df.width() != names.len() {
            return Err(SolverError::ShapeError {
                expected: format!("{} columns", names.len()),
                actual: format!("{} columns", df.width()),
            });
        }
        df.set_column_names(names.iter().map(String::as_str))?;

        debug!(path = %path.display(), rows = df.height(), cols = df.width(), "loaded csv");
        Ok(df)
    }

    fn read_header(&self, path: &Path) -> Result<Vec<String>> {
        let file = File::open(path)?;
        let mut lines = BufReader::new(file).lines();
        let header = lines
            .next()
            .transpose()?
            .ok_or_else(|| SolverError::DataError(format!("{} is empty", path.display())))?;

        let separator = self.delimiter as char;
        Ok(header
            .trim_end_matches('\r')
            .split(separator)
            .map(|s| s.trim().trim_matches('"').to_string())
            .collect())
    }
}

/// Save DataFrame to disk
pub struct DataSaver;

impl DataSaver {
    /// Save to CSV
    pub fn save_csv(df: &mut DataFrame, path: impl AsRef<Path>) -> Result<()> {
        let mut file = File::create(path)?;
        CsvWriter::new(&mut file)
            .finish(df)
            .map_err(|e| SolverError::DataError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_test_csv(contents: &[&str]) -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        for line in contents {
            writeln!(file, "{}", line).unwrap();
        }
        file
    }

    #[test]
    fn test_load_csv() {
        let file = create_test_csv(&["a,b,c", "1,2,3", "4,5,6", "7,8,9"]);
        let df = DataLoader::new().load_csv(file.path()).unwrap();

        assert_eq!(df.height(), 3);
        assert_eq!(df.width(), 3);
    }

    #[test]
    fn test_load_csv_uniquifies_header() {
        let file = create_test_csv(&["a,a,b,a", "1,2,3,4"]);
        let df = DataLoader::new().load_csv(file.path()).unwrap();

        let names: Vec<String> = df.get_column_names().iter().map(|s| s.to_string()).collect();
        assert_eq!(names, vec!["a", "a_1", "b", "a_2"]);
    }

    #[test]
    fn test_load_csv_with_delimiter() {
        let file = create_test_csv(&["x;y", "1;2", "3;4"]);
        let df = DataLoader::new().with_delimiter(b';').load_csv(file.path()).unwrap();

        assert_eq!(df.width(), 2);
        assert_eq!(df.height(), 2);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = DataLoader::new().load_csv("/nonexistent/data.csv").unwrap_err();
        assert!(matches!(err, SolverError::IoError(_)));
    }

    #[test]
    fn test_save_csv() {
        let mut df = DataFrame::new(vec![
            Column::new("a".into(), &[1, 2, 3]),
            Column::new("b".into(), &[4, 5, 6]),
        ])
        .unwrap();

        let file = NamedTempFile::new().unwrap();
        DataSaver::save_csv(&mut df, file.path()).unwrap();

        let loaded = DataLoader::new().load_csv(file.path()).unwrap();
        assert_eq!(loaded.height(), 3);
        assert_eq!(loaded.width(), 2);
    }
}
