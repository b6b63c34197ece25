//! Reading and writing tab-delimited event tables
//!
//! The normalisation core only sees [`TableSource`] and [`TableSink`]; the
//! delimited-file implementations here are what the command-line driver uses.

use crate::error::{CytoNormError, Result};
use crate::table::EventTable;
use polars::prelude::*;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Prefix added to every normalised output file name
pub const OUTPUT_PREFIX: &str = "normalised_";

/// Name of the output subdirectory created next to the inputs
pub const OUTPUT_DIR_NAME: &str = "normalised";

/// Something that yields event tables by identifier
///
/// # Example Implementation
///
/// ```rust
/// use cytonorm_rs::{EventTable, Result, TableSource};
/// use std::collections::BTreeMap;
///
/// struct InMemory(BTreeMap<String, EventTable>);
///
/// impl TableSource for InMemory {
///     fn list_inputs(&self) -> Result<Vec<String>> {
///         Ok(self.0.keys().cloned().collect())
///     }
///
///     fn read(&self, identifier: &str) -> Result<EventTable> {
///         self.0
///             .get(identifier)
///             .cloned()
///             .ok_or_else(|| cytonorm_rs::CytoNormError::read_failed(identifier, "unknown table"))
///     }
/// }
/// ```
pub trait TableSource {
    /// Identifiers of every available table, in a stable order
    fn list_inputs(&self) -> Result<Vec<String>>;

    /// # Errors
    /// [`CytoNormError::Source`] if the input is not a rectangular numeric table with a header
    fn read(&self, identifier: &str) -> Result<EventTable>;
}

/// Something that persists event tables
pub trait TableSink {
    /// Where the output for `identifier` goes; never the same as the input
    fn output_identifier(&self, identifier: &str) -> String;

    /// # Errors
    /// [`CytoNormError::Sink`] on I/O failure
    fn write(&self, identifier: &str, table: &EventTable) -> Result<()>;
}

/// Read a tab-delimited file with one header row, keeping inferred column types
///
/// Types are inferred from every row, so a channel that only turns fractional
/// deep into the file still reads as `f64`.
pub fn read_data_frame(path: &Path) -> Result<DataFrame> {
    let identifier = path.display().to_string();
    let data_frame = CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(None)
        .map_parse_options(|options| options.with_separator(b'\t'))
        .try_into_reader_with_file_path(Some(path.to_path_buf()))
        .and_then(|reader| reader.finish())
        .map_err(|e| CytoNormError::read_failed(&identifier, e))?;

    debug!(
        "Read {} ({} rows x {} columns)",
        identifier,
        data_frame.height(),
        data_frame.width()
    );
    Ok(data_frame)
}

/// Read a tab-delimited file as an [`EventTable`]
pub fn read_delimited(path: &Path) -> Result<EventTable> {
    let data_frame = read_data_frame(path)?;
    EventTable::from_data_frame(data_frame)
        .map_err(|e| CytoNormError::read_failed(path.display().to_string(), e))
}

/// Write a DataFrame as tab-delimited text with a header row
pub fn write_data_frame(path: &Path, data_frame: &DataFrame) -> Result<()> {
    let identifier = path.display().to_string();
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(|e| CytoNormError::write_failed(&identifier, e))?;
    }
    let mut file = File::create(path).map_err(|e| CytoNormError::write_failed(&identifier, e))?;
    let mut data_frame = data_frame.clone();
    CsvWriter::new(&mut file)
        .include_header(true)
        .with_separator(b'\t')
        .finish(&mut data_frame)
        .map_err(|e| CytoNormError::write_failed(identifier, e))
}

pub fn write_delimited(path: &Path, table: &EventTable) -> Result<()> {
    write_data_frame(path, table.data_frame())
}

/// Delimited files collected from paths and directories
#[derive(Debug, Clone)]
pub struct DelimitedFiles {
    paths: Vec<PathBuf>,
}

impl DelimitedFiles {
    /// Collect files with `extension` (case-insensitive) from files and directories
    ///
    /// Directories are searched one level deep; previously written outputs
    /// (files starting with [`OUTPUT_PREFIX`]) are skipped. The result is sorted.
    pub fn discover(inputs: &[PathBuf], extension: &str) -> Result<Self> {
        let matches_extension = |path: &Path| {
            path.extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case(extension))
        };
        let is_output = |path: &Path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(OUTPUT_PREFIX))
        };

        let mut paths = Vec::new();
        for input in inputs {
            if input.is_file() {
                paths.push(input.clone());
            } else if input.is_dir() {
                for entry in walkdir::WalkDir::new(input).max_depth(1) {
                    let entry = entry.map_err(|e| {
                        CytoNormError::read_failed(input.display().to_string(), e)
                    })?;
                    let path = entry.path();
                    if path.is_file() && matches_extension(path) && !is_output(path) {
                        paths.push(path.to_path_buf());
                    }
                }
            } else {
                return Err(CytoNormError::read_failed(
                    input.display().to_string(),
                    "path does not exist",
                ));
            }
        }

        paths.sort();
        paths.dedup();
        Ok(Self { paths })
    }

    pub fn from_paths(mut paths: Vec<PathBuf>) -> Self {
        paths.sort();
        Self { paths }
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

impl TableSource for DelimitedFiles {
    fn list_inputs(&self) -> Result<Vec<String>> {
        Ok(self.paths.iter().map(|p| p.display().to_string()).collect())
    }

    fn read(&self, identifier: &str) -> Result<EventTable> {
        read_delimited(Path::new(identifier))
    }
}

/// Writes `normalised_<name>` into a fixed directory, or next to each input
#[derive(Debug, Clone, Default)]
pub struct PrefixedSink {
    output_dir: Option<PathBuf>,
}

impl PrefixedSink {
    /// Outputs go to `<input dir>/normalised/`
    pub fn beside_inputs() -> Self {
        Self { output_dir: None }
    }

    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: Some(dir.into()),
        }
    }

    pub fn output_path(&self, identifier: &str) -> PathBuf {
        let input = Path::new(identifier);
        let name = input
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "table.txt".to_string());
        let dir = match &self.output_dir {
            Some(dir) => dir.clone(),
            None => input
                .parent()
                .unwrap_or_else(|| Path::new("."))
                .join(OUTPUT_DIR_NAME),
        };
        dir.join(format!("{OUTPUT_PREFIX}{name}"))
    }
}

impl TableSink for PrefixedSink {
    fn output_identifier(&self, identifier: &str) -> String {
        self.output_path(identifier).display().to_string()
    }

    fn write(&self, identifier: &str, table: &EventTable) -> Result<()> {
        let path = self.output_path(identifier);
        write_delimited(&path, table)?;
        debug!("Wrote {} events to {}", table.n_events(), path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_output_path_is_prefixed() {
        let sink = PrefixedSink::beside_inputs();
        assert_eq!(
            sink.output_path("/data/run1/sample.txt"),
            PathBuf::from("/data/run1/normalised/normalised_sample.txt")
        );
        let sink = PrefixedSink::in_dir("/out");
        assert_eq!(
            sink.output_identifier("/data/run1/sample.txt"),
            "/out/normalised_sample.txt"
        );
    }

    #[test]
    fn test_discover_sorts_and_skips_outputs() {
        let dir = TempDir::new().unwrap();
        for name in ["b.txt", "a.TXT", "notes.md", "normalised_c.txt"] {
            std::fs::write(dir.path().join(name), "A\tB\n1\t2\n").unwrap();
        }
        let files = DelimitedFiles::discover(&[dir.path().to_path_buf()], "txt").unwrap();
        let names: Vec<String> = files
            .paths()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.TXT", "b.txt"]);
    }

    #[test]
    fn test_discover_missing_path() {
        let err = DelimitedFiles::discover(&[PathBuf::from("/no/such/dir")], "txt").unwrap_err();
        assert!(err.is_io_boundary());
    }

    #[test]
    fn test_round_trip_preserves_columns_and_integers() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("sample.txt");
        std::fs::write(&input, "Cell_Index\tRefCh\tCD4\n1\t2.5\t10\n2\t0.5\t3.25\n").unwrap();

        let table = read_delimited(&input).unwrap();
        assert_eq!(table.columns(), vec!["Cell_Index", "RefCh", "CD4"]);
        assert_eq!(table.column_f64("CD4").unwrap(), vec![10.0, 3.25]);

        let sink = PrefixedSink::beside_inputs();
        sink.write(&input.display().to_string(), &table).unwrap();
        let written = std::fs::read_to_string(
            dir.path().join("normalised").join("normalised_sample.txt"),
        )
        .unwrap();
        let mut lines = written.lines();
        assert_eq!(lines.next(), Some("Cell_Index\tRefCh\tCD4"));
        assert!(lines.next().unwrap().starts_with("1\t2.5\t"));
    }

    #[test]
    fn test_late_fractional_value_reads_as_float() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sparse.txt");
        let mut contents = String::from("Cell_Index\tRefCh\tCD4\n");
        for i in 1..=150 {
            contents.push_str(&format!("{i}\t2\t0\n"));
        }
        contents.push_str("151\t2.5\t3.75\n");
        std::fs::write(&path, contents).unwrap();

        let table = read_delimited(&path).unwrap();
        assert_eq!(table.n_events(), 151);
        let cd4 = table.column_f64("CD4").unwrap();
        assert_eq!(cd4[0], 0.0);
        assert_eq!(cd4[150], 3.75);
        assert_eq!(table.column_f64("RefCh").unwrap()[150], 2.5);
        assert_eq!(
            table.data_frame().column("Cell_Index").unwrap().dtype(),
            &DataType::Int64
        );
    }

    #[test]
    fn test_non_numeric_file_is_source_error() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("bad.txt");
        std::fs::write(&input, "Name\tCD4\nabc\t1\n").unwrap();
        assert!(read_delimited(&input).unwrap_err().is_io_boundary());
    }
}
