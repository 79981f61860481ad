use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{PipelineError, Result};
use crate::extractor::MemberRecord;

/// Stands in for any field the API did not provide.
pub const SENTINEL: &str = "N/A";

pub const COLUMNS: [&str; 6] = [
    "member_id",
    "fullname",
    "last_seen",
    "contacts",
    "friends_count",
    "town",
];

/// One textual staging row; column order follows [`COLUMNS`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagedRow {
    pub member_id: String,
    pub fullname: String,
    pub last_seen: String,
    pub contacts: String,
    pub friends_count: String,
    pub town: String,
}

impl From<&MemberRecord> for StagedRow {
    fn from(r: &MemberRecord) -> Self {
        StagedRow {
            member_id: r.member_id.to_string(),
            fullname: r.full_name.clone(),
            last_seen: or_sentinel(r.last_seen),
            contacts: or_sentinel(r.contacts.as_deref()),
            friends_count: or_sentinel(r.friends_count),
            town: or_sentinel(r.town.as_deref()),
        }
    }
}

fn or_sentinel<T: ToString>(v: Option<T>) -> String {
    v.map(|v| v.to_string()).unwrap_or_else(|| SENTINEL.to_string())
}

/// Handle to a fully written staging dataset, handed from Extractor to Loader.
#[derive(Debug, Clone)]
pub struct StagingDataset {
    path: PathBuf,
    rows: usize,
}

impl StagingDataset {
    /// Refer to a dataset written by an earlier, separate run of the Extractor.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        StagingDataset {
            path: path.into(),
            rows: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rows written, when this handle came from [`write_staging`].
    pub fn rows_written(&self) -> usize {
        self.rows
    }
}

/// Overwrite the dataset at `path` with `records`. The file is written beside
/// the target and renamed, so readers never see a half-written version.
pub fn write_staging(path: &Path, records: &[MemberRecord]) -> Result<StagingDataset> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| staging_io(path, e))?;
    }

    let tmp = path.with_extension("csv.tmp");
    {
        let mut writer = csv::Writer::from_path(&tmp).map_err(|e| staging_csv(&tmp, e))?;
        // serialize() only emits the header with the first row
        if records.is_empty() {
            writer.write_record(COLUMNS).map_err(|e| staging_csv(&tmp, e))?;
        }
        for record in records {
            writer
                .serialize(StagedRow::from(record))
                .map_err(|e| staging_csv(&tmp, e))?;
        }
        writer.flush().map_err(|e| staging_io(&tmp, e))?;
    }
    fs::rename(&tmp, path).map_err(|e| staging_io(path, e))?;

    info!("Staged {} members to {}", records.len(), path.display());
    Ok(StagingDataset {
        path: path.to_path_buf(),
        rows: records.len(),
    })
}

/// Read every staged row. A header-only dataset is valid and yields no rows.
pub fn read_staging(dataset: &StagingDataset) -> Result<Vec<StagedRow>> {
    let path = dataset.path();
    let mut reader = match csv::Reader::from_path(path) {
        Ok(r) => r,
        Err(e) => {
            let missing =
                matches!(e.kind(), csv::ErrorKind::Io(io) if io.kind() == ErrorKind::NotFound);
            return Err(if missing {
                PipelineError::DataUnavailable(format!("{} does not exist", path.display()))
            } else {
                staging_csv(path, e)
            });
        }
    };

    let headers = reader.headers().map_err(|e| staging_csv(path, e))?;
    if !headers.iter().eq(COLUMNS.iter().copied()) {
        return Err(PipelineError::DataUnavailable(format!(
            "{} has header {:?}, expected {:?}",
            path.display(),
            headers.iter().collect::<Vec<_>>(),
            COLUMNS
        )));
    }

    reader
        .deserialize()
        .collect::<std::result::Result<Vec<StagedRow>, _>>()
        .map_err(|e| staging_csv(path, e))
}

fn staging_io(path: &Path, e: std::io::Error) -> PipelineError {
    PipelineError::DataUnavailable(format!("{}: {}", path.display(), e))
}

fn staging_csv(path: &Path, e: csv::Error) -> PipelineError {
    PipelineError::DataUnavailable(format!("{}: {}", path.display(), e))
}
