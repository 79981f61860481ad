use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::info;

use crate::error::{PipelineError, Result};
use crate::store::{AgePoint, CityAverage, CityCount, MemberStore, NameCount};

const TOP_NAMES: usize = 5;
const TOP_CITIES: usize = 3;
const BAR_WIDTH: usize = 40;

pub const NAMES_CHART: &str = "top_5_names.csv";
pub const AGE_CHART: &str = "friends_vs_age.csv";

/// Results of the four summary queries. Any of them may be empty.
#[derive(Debug, Clone)]
pub struct Report {
    pub generated_at: DateTime<Utc>,
    pub top_names: Vec<NameCount>,
    pub friends_vs_age: Vec<AgePoint>,
    pub top_cities: Vec<CityAverage>,
    pub most_common_city: Option<CityCount>,
}

/// Run every summary query against the loaded table. Read-only.
pub fn analyze(store: &MemberStore) -> Result<Report> {
    let report = Report {
        generated_at: Utc::now(),
        top_names: store.top_names(TOP_NAMES)?,
        friends_vs_age: store.contacts_vs_friends()?,
        top_cities: store.top_cities_by_avg_friends(TOP_CITIES)?,
        most_common_city: store.most_common_city()?,
    };
    info!(
        "Analyzed: {} names, {} scatter points, {} cities",
        report.top_names.len(),
        report.friends_vs_age.len(),
        report.top_cities.len()
    );
    Ok(report)
}

impl Report {
    pub fn is_empty(&self) -> bool {
        self.top_names.is_empty()
            && self.friends_vs_age.is_empty()
            && self.top_cities.is_empty()
            && self.most_common_city.is_none()
    }

    /// Text summary for the terminal.
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "Group report ({})\n",
            self.generated_at.format("%Y-%m-%d %H:%M UTC")
        ));
        out.push_str(&"=".repeat(40));
        out.push('\n');

        if self.is_empty() {
            out.push_str("No rows yet.\n");
            return out;
        }

        out.push_str("\nTop 5 most popular names\n");
        let widest = self.top_names.first().map(|n| n.count).unwrap_or(0).max(1);
        for n in &self.top_names {
            let bar = (n.count as usize * BAR_WIDTH).div_ceil(widest as usize);
            out.push_str(&format!(
                "  {:<24} {:>5} {}\n",
                truncate(&n.fullname, 24),
                n.count,
                "#".repeat(bar)
            ));
        }

        out.push_str(&format!(
            "\nFriends count vs age: {} points (see {})\n",
            self.friends_vs_age.len(),
            AGE_CHART
        ));

        out.push_str("\nTop 3 cities with highest average number of friends:\n");
        for c in &self.top_cities {
            out.push_str(&format!("  {:<24} {:>8.1}\n", truncate(&c.town, 24), c.avg_friends));
        }

        out.push_str("\nMost common city among group members: ");
        match &self.most_common_city {
            Some(c) => out.push_str(&format!("{} ({})\n", c.town, c.count)),
            None => out.push_str("-\n"),
        }
        out
    }

    /// Write the two chart datasets as CSV into `dir`; returns the files written.
    pub fn write_charts(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        fs::create_dir_all(dir).map_err(|e| report_err(dir, e))?;

        let names = dir.join(NAMES_CHART);
        let mut w = csv::Writer::from_path(&names).map_err(|e| report_err(&names, e))?;
        w.write_record(["fullname", "count"]).map_err(|e| report_err(&names, e))?;
        for n in &self.top_names {
            let count = n.count.to_string();
            w.write_record([n.fullname.as_str(), count.as_str()])
                .map_err(|e| report_err(&names, e))?;
        }
        w.flush().map_err(|e| report_err(&names, e))?;

        let ages = dir.join(AGE_CHART);
        let mut w = csv::Writer::from_path(&ages).map_err(|e| report_err(&ages, e))?;
        w.write_record(["age", "friends_count"]).map_err(|e| report_err(&ages, e))?;
        for p in &self.friends_vs_age {
            let friends = p.friends_count.to_string();
            w.write_record([p.age.as_str(), friends.as_str()])
                .map_err(|e| report_err(&ages, e))?;
        }
        w.flush().map_err(|e| report_err(&ages, e))?;

        info!("Chart data written to {}", dir.display());
        Ok(vec![names, ages])
    }
}

fn report_err(path: &Path, e: impl std::fmt::Display) -> PipelineError {
    PipelineError::Transport(format!("cannot write report {}: {}", path.display(), e))
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max - 3).collect();
        format!("{}...", truncated)
    }
}
