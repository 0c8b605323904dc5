//! One-shot replay of historical CSV exports into the backend.
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::config::ImportSettings;
use crate::error::ImportError;
use crate::record::{CsvRow, ImportDefaults, MeasurementRecord, from_csv_row};
use crate::storage::{TimeSeriesBackend, write_batches};

/// Totals of one [`Importer::import_path`] run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ImportSummary {
    pub files_succeeded: usize,
    pub files_attempted: usize,
    pub records_written: usize,
}

pub struct Importer {
    backend: Arc<dyn TimeSeriesBackend>,
    defaults: ImportDefaults,
    batch_size: usize,
}

impl Importer {
    pub fn new(settings: &ImportSettings, backend: Arc<dyn TimeSeriesBackend>) -> Self {
        Self {
            backend,
            defaults: settings.defaults.clone(),
            batch_size: settings.batch_size,
        }
    }

    /// Imports every file that `pattern` resolves to, in sorted order.
    ///
    /// Only an empty resolution is an error; per-row and per-file failures are
    /// logged and reflected in the summary.
    pub async fn import_path(&self, pattern: &str) -> Result<ImportSummary, ImportError> {
        let files = resolve_files(pattern)?;
        info!(pattern, files = files.len(), "Starting CSV import.");

        let mut summary = ImportSummary::default();
        for path in &files {
            summary.files_attempted += 1;
            match self.import_file(path).await {
                Ok(written) => {
                    summary.files_succeeded += 1;
                    summary.records_written += written;
                }
                Err(written) => summary.records_written += written,
            }
        }

        info!(
            files_succeeded = summary.files_succeeded,
            files_attempted = summary.files_attempted,
            records_written = summary.records_written,
            "CSV import finished."
        );

        match self.backend.count_records().await {
            Ok(total) => info!(total, "Total speedtest records in InfluxDB."),
            Err(e) => warn!(error = %e, "Could not query total record count."),
        }

        Ok(summary)
    }

    /// Ok with the written count when the whole file persisted, Err with the
    /// partial count otherwise.
    async fn import_file(&self, path: &Path) -> Result<usize, usize> {
        let records = match read_records(path, &self.defaults) {
            Ok(records) => records,
            Err(e) => {
                error!(error = %e, "Skipping unreadable file.");
                return Err(0);
            }
        };

        let (Some(first), Some(last)) = (records.first(), records.last()) else {
            warn!(file = %path.display(), "No valid records found.");
            return Err(0);
        };
        info!(
            file = %path.display(),
            records = records.len(),
            first = %first.timestamp(),
            last = %last.timestamp(),
            "Parsed CSV file."
        );

        let report = write_batches(self.backend.as_ref(), &records, self.batch_size).await;
        if report.is_success() {
            info!(file = %path.display(), written = report.success_count(), "Imported file.");
            Ok(report.success_count())
        } else {
            error!(
                file = %path.display(),
                written = report.success_count(),
                failed_batches = report.failures.len(),
                "File imported with failed batches."
            );
            Err(report.success_count())
        }
    }
}

/// Expands a glob, or a directory's `*.csv` files, into a sorted list.
pub fn resolve_files(pattern: &str) -> Result<Vec<PathBuf>, ImportError> {
    let mut files = glob_files(pattern)?;
    if files.is_empty() && Path::new(pattern).is_dir() {
        let nested = Path::new(pattern).join("*.csv");
        files = glob_files(&nested.to_string_lossy())?;
    }
    if files.is_empty() {
        return Err(ImportError::NoFilesFound(pattern.to_string()));
    }
    files.sort();
    Ok(files)
}

fn glob_files(pattern: &str) -> Result<Vec<PathBuf>, ImportError> {
    let paths = glob::glob(pattern).map_err(|e| ImportError::InvalidPattern {
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })?;
    Ok(paths.filter_map(Result::ok).filter(|p| p.is_file()).collect())
}

/// Reads and normalizes every row of one export; bad rows are logged and skipped.
pub fn read_records(
    path: &Path,
    defaults: &ImportDefaults,
) -> Result<Vec<MeasurementRecord>, ImportError> {
    let csv_error = |source| ImportError::Csv {
        path: path.to_path_buf(),
        source,
    };
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .map_err(csv_error)?;
    let headers = reader.headers().map_err(csv_error)?.clone();

    let mut records = Vec::new();
    for result in reader.records() {
        let row = match result {
            Ok(row) => row,
            Err(e) => {
                warn!(file = %path.display(), error = %e, "Skipping unreadable row.");
                continue;
            }
        };
        let line = row.position().map(|p| p.line()).unwrap_or_default();
        let csv_row = CsvRow::from_pairs(headers.iter().zip(row.iter()));
        match from_csv_row(&csv_row, defaults) {
            Ok(record) => records.push(record),
            Err(e) => warn!(file = %path.display(), line, error = %e, "Skipping invalid row."),
        }
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Status;
    use crate::storage::FieldValue;
    use crate::storage::batch::tests::RecordingBackend;
    use std::fs;
    use tempfile::TempDir;

    const HEADER: &str =
        "Time,Download,Upload,Latency,Jitter,Packet_loss,Download_bytes,Upload_bytes,ISP,Server_name,Server_id,IP,Share_url";

    fn row(time: &str) -> String {
        format!("{time},12500000,2500000,5.1234,1.2,0,1000,200,TM,Kuala Lumpur,1,1.2.3.4,")
    }

    fn write_csv(dir: &TempDir, name: &str, rows: &[String]) -> PathBuf {
        let path = dir.path().join(name);
        let mut contents = String::from(HEADER);
        for r in rows {
            contents.push('\n');
            contents.push_str(r);
        }
        contents.push('\n');
        fs::write(&path, contents).unwrap();
        path
    }

    fn importer(backend: Arc<RecordingBackend>, batch_size: usize) -> Importer {
        let settings = ImportSettings {
            batch_size,
            defaults: ImportDefaults::default(),
        };
        Importer::new(&settings, backend)
    }

    #[tokio::test]
    async fn test_imports_valid_rows_and_skips_invalid_ones() {
        let dir = TempDir::new().unwrap();
        let path = write_csv(
            &dir,
            "speedtest-2024-01.csv",
            &[
                row("2024-01-01 10:00:00"),
                "2024-01-01 11:00:00,N/A,N/A,N/A,N/A,N/A,N/A,N/A,TM,KL,1,1.2.3.4,".to_string(),
            ],
        );
        let backend = Arc::new(RecordingBackend::default());

        let summary = importer(Arc::clone(&backend), 1000)
            .import_path(&path.to_string_lossy())
            .await
            .unwrap();

        assert_eq!(
            summary,
            ImportSummary {
                files_succeeded: 1,
                files_attempted: 1,
                records_written: 1,
            }
        );
        let points = backend.points();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].field("download"), Some(&FieldValue::Float(100.0)));
        assert_eq!(points[0].tag("server_country"), Some("Malaysia"));
    }

    #[tokio::test]
    async fn test_empty_glob_is_no_files_found() {
        let dir = TempDir::new().unwrap();
        let backend = Arc::new(RecordingBackend::default());
        let pattern = dir.path().join("*.csv");

        let result = importer(Arc::clone(&backend), 1000)
            .import_path(&pattern.to_string_lossy())
            .await;

        assert!(matches!(result, Err(ImportError::NoFilesFound(_))));
        assert!(backend.call_sizes().is_empty());
    }

    #[test]
    fn test_directory_resolves_to_sorted_csv_files() {
        let dir = TempDir::new().unwrap();
        write_csv(&dir, "speedtest-2024-03.csv", &[]);
        write_csv(&dir, "speedtest-2024-01.csv", &[]);
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let files = resolve_files(&dir.path().to_string_lossy()).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["speedtest-2024-01.csv", "speedtest-2024-03.csv"]);
    }

    #[tokio::test]
    async fn test_files_are_imported_in_sorted_order() {
        let dir = TempDir::new().unwrap();
        write_csv(&dir, "b.csv", &[row("2024-02-01 00:00:00")]);
        write_csv(&dir, "a.csv", &[row("2024-01-01 00:00:00")]);
        let backend = Arc::new(RecordingBackend::default());

        importer(Arc::clone(&backend), 1000)
            .import_path(&dir.path().join("*.csv").to_string_lossy())
            .await
            .unwrap();

        let timestamps: Vec<_> = backend.points().iter().map(|p| p.timestamp).collect();
        assert_eq!(backend.call_sizes(), vec![1, 1]);
        assert!(timestamps[0] < timestamps[1]);
    }

    #[tokio::test]
    async fn test_failed_batch_marks_file_failed_and_continues() {
        let dir = TempDir::new().unwrap();
        let rows: Vec<_> = (0..3)
            .map(|h| row(&format!("2024-01-01 0{h}:00:00")))
            .collect();
        write_csv(&dir, "a.csv", &rows);
        write_csv(&dir, "b.csv", &[row("2024-01-02 00:00:00")]);
        let backend = Arc::new(RecordingBackend::failing_on([0]));

        let summary = importer(Arc::clone(&backend), 2)
            .import_path(&dir.path().join("*.csv").to_string_lossy())
            .await
            .unwrap();

        assert_eq!(backend.call_sizes(), vec![2, 1, 1]);
        assert_eq!(summary.files_attempted, 2);
        assert_eq!(summary.files_succeeded, 1);
        assert_eq!(summary.records_written, 2);
    }

    #[tokio::test]
    async fn test_file_without_valid_rows_counts_as_failed() {
        let dir = TempDir::new().unwrap();
        write_csv(&dir, "empty.csv", &[]);
        let backend = Arc::new(RecordingBackend {
            count_fails: true,
            ..RecordingBackend::default()
        });

        let summary = importer(Arc::clone(&backend), 1000)
            .import_path(&dir.path().to_string_lossy())
            .await
            .unwrap();

        // A failing count query is advisory only.
        assert_eq!(summary.files_attempted, 1);
        assert_eq!(summary.files_succeeded, 0);
        assert!(backend.call_sizes().is_empty());
    }

    #[test]
    fn test_read_records_keeps_row_order() {
        let dir = TempDir::new().unwrap();
        let path = write_csv(
            &dir,
            "a.csv",
            &[row("2024-01-01 00:00:00"), row("2024-01-01 01:00:00")],
        );
        let records = read_records(&path, &ImportDefaults::default()).unwrap();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.status() == Status::Online));
        assert!(records[0].timestamp() < records[1].timestamp());
    }
}
