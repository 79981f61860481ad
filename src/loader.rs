use tracing::info;

use crate::error::{PipelineError, Result};
use crate::settings::LoadMode;
use crate::staging::{read_staging, StagedRow, StagingDataset, SENTINEL};
use crate::store::{MemberRow, MemberStore};

/// Outcome of one Loader run.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadReport {
    pub staged: usize,
    pub inserted: usize,
    pub mode: LoadMode,
}

pub fn ensure_schema(store: &MemberStore) -> Result<()> {
    store.ensure_schema()
}

/// Read the staging dataset, coerce every row, append them as one batch.
pub fn load_staged_records(
    store: &MemberStore,
    staging: &StagingDataset,
    mode: LoadMode,
) -> Result<LoadReport> {
    let staged = read_staging(staging)?;
    let rows = staged
        .iter()
        .enumerate()
        .map(|(i, row)| {
            coerce_row(row).map_err(|e| {
                PipelineError::DataUnavailable(format!(
                    "{} row {}: {}",
                    staging.path().display(),
                    i + 1,
                    e
                ))
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let inserted = store.insert_batch(&rows, mode)?;
    info!(
        "Loaded {} of {} staged rows ({:?})",
        inserted,
        staged.len(),
        mode
    );
    Ok(LoadReport {
        staged: staged.len(),
        inserted,
        mode,
    })
}

/// Numeric sentinels become 0, text sentinels are kept as-is.
pub fn coerce_row(row: &StagedRow) -> std::result::Result<MemberRow, String> {
    Ok(MemberRow {
        member_id: row
            .member_id
            .trim()
            .parse()
            .map_err(|_| format!("member_id {:?} is not numeric", row.member_id))?,
        fullname: row.fullname.clone(),
        last_seen: numeric_or_zero("last_seen", &row.last_seen)?,
        contacts: row.contacts.clone(),
        friends_count: numeric_or_zero("friends_count", &row.friends_count)?,
        town: row.town.clone(),
    })
}

fn numeric_or_zero<T>(column: &str, value: &str) -> std::result::Result<T, String>
where
    T: std::str::FromStr + Default,
{
    if value == SENTINEL {
        return Ok(T::default());
    }
    value
        .trim()
        .parse()
        .map_err(|_| format!("{} {:?} is not numeric", column, value))
}
