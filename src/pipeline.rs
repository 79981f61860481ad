use std::time::Instant;

use tracing::info;

use crate::analyzer::{self, Report};
use crate::api::MemberApi;
use crate::error::Result;
use crate::extractor;
use crate::loader::{self, LoadReport};
use crate::settings::Settings;
use crate::staging::{self, StagingDataset};
use crate::store::MemberStore;

// Stage entry points. Each takes the previous stage's handle and returns its own.

pub async fn extract<A: MemberApi>(api: &A, settings: &Settings) -> Result<StagingDataset> {
    let t0 = Instant::now();
    let members = extractor::fetch_all_members(api, settings).await?;
    let dataset = staging::write_staging(&settings.staging_path, &members)?;
    info!("Extract finished in {:.1}s", t0.elapsed().as_secs_f64());
    Ok(dataset)
}

pub fn load(store: &MemberStore, dataset: &StagingDataset, settings: &Settings) -> Result<LoadReport> {
    let t0 = Instant::now();
    loader::ensure_schema(store)?;
    let report = loader::load_staged_records(store, dataset, settings.load_mode)?;
    info!("Load finished in {:.1}s", t0.elapsed().as_secs_f64());
    Ok(report)
}

pub fn analyze(store: &MemberStore, settings: &Settings) -> Result<Report> {
    loader::ensure_schema(store)?;
    let report = analyzer::analyze(store)?;
    report.write_charts(&settings.report_dir)?;
    Ok(report)
}

pub struct RunSummary {
    pub staged: usize,
    pub load: LoadReport,
    pub report: Report,
}

/// Extract → Load → Analyze. Stops at the first failing stage; nothing is rolled back.
pub async fn run_all<A: MemberApi>(
    api: &A,
    store: &MemberStore,
    settings: &Settings,
) -> Result<RunSummary> {
    let dataset = extract(api, settings).await?;
    let loaded = load(store, &dataset, settings)?;
    let report = analyze(store, settings)?;
    Ok(RunSummary {
        staged: dataset.rows_written(),
        load: loaded,
        report,
    })
}
