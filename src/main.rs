mod analyzer;
mod api;
mod error;
mod extractor;
mod loader;
mod pipeline;
mod settings;
mod staging;
mod store;

use std::time::Instant;

use anyhow::Context;
use clap::{Parser, Subcommand};

use crate::api::VkClient;
use crate::settings::{LoadMode, Overrides, Settings};
use crate::staging::StagingDataset;
use crate::store::MemberStore;

#[derive(Parser)]
#[command(name = "vk_members", about = "VK group members: extract, load, analyze")]
struct Cli {
    /// Settings file (TOML); missing file is fine
    #[arg(short, long, global = true, default_value = settings::DEFAULT_CONFIG_FILE)]
    config: String,

    /// Group to page through (overrides `group_id`)
    #[arg(short, long, global = true)]
    group: Option<String>,

    /// Members requested per API call, at most 1000
    #[arg(long, global = true)]
    page_size: Option<u32>,

    /// SQLite database holding the members table
    #[arg(long, global = true)]
    store: Option<String>,

    /// Staging CSV written by `extract` and read by `load`
    #[arg(long, global = true)]
    staging: Option<String>,

    /// How `load` treats member ids already in the table
    #[arg(long, global = true, value_enum)]
    mode: Option<LoadMode>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Page through the group and write the staging CSV
    Extract,
    /// Create the table if needed and insert the staged rows
    Load,
    /// Print summaries and write chart data
    Analyze,
    /// Extract + load + analyze, stopping at the first failure
    Run,
    /// Show table row counts
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let settings = Settings::load(
        &cli.config,
        Overrides {
            group_id: cli.group,
            page_size: cli.page_size,
            store_path: cli.store,
            staging_path: cli.staging,
            load_mode: cli.mode,
        },
    )
    .context("Failed to load settings")?;

    let result = match cli.command {
        Commands::Extract => {
            let api = VkClient::new(&settings)?;
            let dataset = pipeline::extract(&api, &settings)
                .await
                .context("Extract stage failed")?;
            println!(
                "Staged {} members to {}",
                dataset.rows_written(),
                dataset.path().display()
            );
            Ok(())
        }
        Commands::Load => {
            let store = open_store(&settings)?;
            let dataset = StagingDataset::at(&settings.staging_path);
            let report = pipeline::load(&store, &dataset, &settings).context("Load stage failed")?;
            println!(
                "Inserted {} of {} staged rows ({:?} mode)",
                report.inserted, report.staged, report.mode
            );
            Ok(())
        }
        Commands::Analyze => {
            let store = open_store(&settings)?;
            let report = pipeline::analyze(&store, &settings).context("Analyze stage failed")?;
            print!("{}", report.render());
            println!("\nChart data in {}", settings.report_dir.display());
            Ok(())
        }
        Commands::Run => {
            let api = VkClient::new(&settings)?;
            let store = open_store(&settings)?;
            let summary = pipeline::run_all(&api, &store, &settings)
                .await
                .context("Pipeline run failed")?;
            println!(
                "Staged {} members, inserted {} rows.\n",
                summary.staged, summary.load.inserted
            );
            print!("{}", summary.report.render());
            Ok(())
        }
        Commands::Stats => {
            let store = open_store(&settings)?;
            store.ensure_schema()?;
            let s = store.stats()?;
            println!("Rows:       {}", s.rows);
            println!("Members:    {}", s.members);
            println!("Duplicates: {}", s.duplicates);
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn open_store(settings: &Settings) -> anyhow::Result<MemberStore> {
    MemberStore::open(&settings.store_path)
        .with_context(|| format!("Failed to open {}", settings.store_path.display()))
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
