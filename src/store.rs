use std::collections::BTreeSet;
use std::path::Path;

use rusqlite::{params, Connection};
use tracing::debug;

use crate::error::{PipelineError, Result};
use crate::settings::LoadMode;
use crate::staging::SENTINEL;

/// Handle to the analytical table. Shared by the Loader and the Analyzer.
pub struct MemberStore {
    conn: Connection,
}

impl MemberStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                PipelineError::Transport(format!("cannot create {}: {}", parent.display(), e))
            })?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Ok(MemberStore { conn })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        Ok(MemberStore {
            conn: Connection::open_in_memory()?,
        })
    }

    /// Create the table if absent. Existing tables and rows are left untouched.
    pub fn ensure_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS vk_group_members (
                member_id     UNSIGNED BIG INT NOT NULL,
                fullname      TEXT NOT NULL,
                last_seen     UNSIGNED BIG INT NOT NULL,
                contacts      TEXT NOT NULL,
                friends_count UNSIGNED INT NOT NULL
                              CHECK (friends_count BETWEEN 0 AND 4294967295),
                town          TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_members_member_id ON vk_group_members(member_id);
            ",
        )?;
        Ok(())
    }

    // ── Loading ──

    /// Insert `rows` as one batch. Nothing is written if any row is rejected.
    pub fn insert_batch(&self, rows: &[MemberRow], mode: LoadMode) -> Result<usize> {
        let tx = self
            .conn
            .unchecked_transaction()
            .map_err(PipelineError::StoreWrite)?;
        let mut count = 0;
        {
            if mode == LoadMode::Replace {
                let ids: BTreeSet<i64> = rows.iter().map(|r| id_to_sql(r.member_id)).collect();
                let mut del = tx
                    .prepare("DELETE FROM vk_group_members WHERE member_id = ?1")
                    .map_err(PipelineError::StoreWrite)?;
                let mut removed = 0;
                for id in ids {
                    removed += del.execute(params![id]).map_err(PipelineError::StoreWrite)?;
                }
                debug!("Replace mode removed {} existing rows", removed);
            }

            let mut stmt = tx
                .prepare(
                    "INSERT INTO vk_group_members
                     (member_id, fullname, last_seen, contacts, friends_count, town)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                )
                .map_err(PipelineError::StoreWrite)?;
            for r in rows {
                count += stmt
                    .execute(params![
                        id_to_sql(r.member_id),
                        r.fullname,
                        r.last_seen,
                        r.contacts,
                        r.friends_count,
                        r.town,
                    ])
                    .map_err(PipelineError::StoreWrite)?;
            }
        }
        tx.commit().map_err(PipelineError::StoreWrite)?;
        Ok(count)
    }

    /// Every row in insertion order.
    #[cfg(test)]
    pub fn fetch_all(&self) -> Result<Vec<MemberRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT member_id, fullname, last_seen, contacts, friends_count, town
             FROM vk_group_members ORDER BY rowid",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(MemberRow {
                    member_id: id_from_sql(row.get(0)?),
                    fullname: row.get(1)?,
                    last_seen: row.get(2)?,
                    contacts: row.get(3)?,
                    friends_count: row.get(4)?,
                    town: row.get(5)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // ── Aggregates ──
    //
    // Ties are broken by first-seen row (lowest rowid).

    pub fn top_names(&self, limit: usize) -> Result<Vec<NameCount>> {
        let mut stmt = self.conn.prepare(
            "SELECT fullname, COUNT(*) AS cnt
             FROM vk_group_members
             GROUP BY fullname
             ORDER BY cnt DESC, MIN(rowid)
             LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit as i64], |row| {
                Ok(NameCount {
                    fullname: row.get(0)?,
                    count: row.get(1)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Contacts plotted as if they were an age. Kept as the reports have always drawn it.
    pub fn contacts_vs_friends(&self) -> Result<Vec<AgePoint>> {
        let mut stmt = self.conn.prepare(
            "SELECT contacts AS age, friends_count
             FROM vk_group_members
             WHERE contacts != ?1
             ORDER BY rowid",
        )?;
        let rows = stmt
            .query_map(params![SENTINEL], |row| {
                Ok(AgePoint {
                    age: row.get(0)?,
                    friends_count: row.get(1)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Rows without a known town group together under `N/A` and compete like any city.
    pub fn top_cities_by_avg_friends(&self, limit: usize) -> Result<Vec<CityAverage>> {
        let mut stmt = self.conn.prepare(
            "SELECT town, AVG(friends_count) AS avg_friends
             FROM vk_group_members
             GROUP BY town
             ORDER BY avg_friends DESC, MIN(rowid)
             LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit as i64], |row| {
                Ok(CityAverage {
                    town: row.get(0)?,
                    avg_friends: row.get(1)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn most_common_city(&self) -> Result<Option<CityCount>> {
        let mut stmt = self.conn.prepare(
            "SELECT town, COUNT(*) AS cnt
             FROM vk_group_members
             GROUP BY town
             ORDER BY cnt DESC, MIN(rowid)
             LIMIT 1",
        )?;
        let mut rows = stmt.query_map([], |row| {
            Ok(CityCount {
                town: row.get(0)?,
                count: row.get(1)?,
            })
        })?;
        let first = rows.next().transpose()?;
        Ok(first)
    }

    // ── Stats ──

    pub fn stats(&self) -> Result<TableStats> {
        let rows: u64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM vk_group_members", [], |r| r.get(0))?;
        let members: u64 = self.conn.query_row(
            "SELECT COUNT(DISTINCT member_id) FROM vk_group_members",
            [],
            |r| r.get(0),
        )?;
        Ok(TableStats {
            rows,
            members,
            duplicates: rows - members,
        })
    }
}

// SQLite integers are signed 64-bit. Member ids are stored bit-cast so the
// whole u64 range fits; equality and COUNT(DISTINCT) are unaffected.
fn id_to_sql(id: u64) -> i64 {
    id as i64
}

#[cfg(test)]
fn id_from_sql(raw: i64) -> u64 {
    raw as u64
}

/// Typed table row after sentinel coercion.
#[derive(Debug, Clone, PartialEq)]
pub struct MemberRow {
    pub member_id: u64,
    pub fullname: String,
    pub last_seen: u64,
    pub contacts: String,
    pub friends_count: u32,
    pub town: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NameCount {
    pub fullname: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AgePoint {
    pub age: String,
    pub friends_count: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CityAverage {
    pub town: String,
    pub avg_friends: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CityCount {
    pub town: String,
    pub count: u64,
}

pub struct TableStats {
    pub rows: u64,
    pub members: u64,
    pub duplicates: u64,
}
