use indicatif::{ProgressBar, ProgressStyle};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::api::{MemberApi, PageResponse};
use crate::error::{PipelineError, Result};
use crate::settings::Settings;

/// One group member as read from the API. `None` means the API did not
/// provide the field; it is staged as the `N/A` sentinel.
#[derive(Debug, Clone, PartialEq)]
pub struct MemberRecord {
    pub member_id: u64,
    pub full_name: String,
    pub last_seen: Option<u64>,
    pub contacts: Option<String>,
    pub friends_count: Option<u32>,
    pub town: Option<String>,
}

/// Page through the group until the API signals the end, normalizing as we go.
pub async fn fetch_all_members<A: MemberApi>(
    api: &A,
    settings: &Settings,
) -> Result<Vec<MemberRecord>> {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );

    let mut members = Vec::new();
    let mut offset: u64 = 0;
    let mut pages: u32 = 0;
    let mut requests: u32 = 0;
    let mut skipped = 0usize;

    // At most `max_pages` non-empty pages; the request after them must end pagination.
    loop {
        let response = api.fetch_page(offset, settings.page_size).await?;
        requests += 1;

        let items = match response {
            PageResponse::Items(items) if !items.is_empty() => items,
            PageResponse::Items(_) => {
                debug!("Empty page at offset {}, done", offset);
                break;
            }
            PageResponse::Absent => {
                debug!("No items payload at offset {}, done", offset);
                break;
            }
            PageResponse::Rejected { code, message } => {
                pb.finish_and_clear();
                return Err(PipelineError::Transport(format!(
                    "member API error {} at offset {}: {}",
                    code, offset, message
                )));
            }
        };

        if pages >= settings.max_pages {
            pb.finish_and_clear();
            return Err(PipelineError::Transport(format!(
                "gave up after {} pages at offset {}; endpoint never signalled the end",
                pages, offset
            )));
        }
        pages += 1;

        for raw in &items {
            match normalize_member(raw) {
                Ok(record) => members.push(record),
                Err(e) => {
                    skipped += 1;
                    warn!("Skipping entry at offset {}: {}", offset, e);
                }
            }
        }

        offset += u64::from(settings.page_size);
        pb.set_message(format!("{} members from {} pages", members.len(), pages));
        pb.tick();
    }

    pb.finish_and_clear();
    info!(
        "Fetched {} members of group {} ({} requests, {} skipped)",
        members.len(),
        settings.group_id,
        requests,
        skipped
    );
    Ok(members)
}

/// Turn one raw API entry into a record. Only a missing or non-numeric id is fatal.
pub fn normalize_member(raw: &Value) -> Result<MemberRecord> {
    let member_id = raw
        .get("id")
        .and_then(|id| match id {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        })
        .ok_or_else(|| PipelineError::MalformedRecord(format!("no numeric id in {}", raw)))?;

    let first = raw.get("first_name").and_then(Value::as_str).unwrap_or("");
    let last = raw.get("last_name").and_then(Value::as_str).unwrap_or("");

    Ok(MemberRecord {
        member_id,
        full_name: format!("{} {}", first, last),
        last_seen: lookup_number(raw, &["last_seen", "time"])
            .filter(|&t| i64::try_from(t).is_ok()),
        contacts: lookup_text(raw, &["mobile_phone"]),
        friends_count: lookup_number(raw, &["counters", "friends"])
            .and_then(|n| u32::try_from(n).ok()),
        town: lookup_text(raw, &["city", "title"]),
    })
}

/// Walk `path` through nested objects; `None` as soon as a level is missing.
fn lookup<'a>(raw: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(raw, |node, key| node.get(key))
}

fn lookup_text(raw: &Value, path: &[&str]) -> Option<String> {
    match lookup(raw, path)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn lookup_number(raw: &Value, path: &[&str]) -> Option<u64> {
    match lookup(raw, path)? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
pub mod fake {
    use std::cell::{Cell, RefCell};
    use std::collections::VecDeque;

    use super::*;

    /// Scripted API: answers calls in order, then keeps answering `Absent`.
    pub struct ScriptedApi {
        script: RefCell<VecDeque<PageResponse>>,
        pub calls: Cell<usize>,
        pub offsets: RefCell<Vec<u64>>,
    }

    impl ScriptedApi {
        pub fn new(script: Vec<PageResponse>) -> Self {
            ScriptedApi {
                script: RefCell::new(script.into()),
                calls: Cell::new(0),
                offsets: RefCell::new(Vec::new()),
            }
        }

        /// Replay the same script for another run.
        pub fn reset(&self, script: Vec<PageResponse>) {
            *self.script.borrow_mut() = script.into();
            self.calls.set(0);
            self.offsets.borrow_mut().clear();
        }
    }

    impl MemberApi for ScriptedApi {
        async fn fetch_page(&self, offset: u64, _count: u32) -> Result<PageResponse> {
            self.calls.set(self.calls.get() + 1);
            self.offsets.borrow_mut().push(offset);
            Ok(self
                .script
                .borrow_mut()
                .pop_front()
                .unwrap_or(PageResponse::Absent))
        }
    }

    /// Endpoint that never ends: every call returns a full page.
    pub struct EndlessApi;

    impl MemberApi for EndlessApi {
        async fn fetch_page(&self, offset: u64, _count: u32) -> Result<PageResponse> {
            Ok(PageResponse::Items(vec![serde_json::json!({
                "id": offset + 1, "first_name": "Loop", "last_name": "Forever"
            })]))
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::fake::{EndlessApi, ScriptedApi};
    use super::*;
    use crate::settings::test_settings;

    fn member(id: u64) -> Value {
        json!({"id": id, "first_name": "Ivan", "last_name": format!("N{}", id)})
    }

    #[test]
    fn full_entry_copied_verbatim() {
        let raw = json!({
            "id": 42,
            "first_name": "Anna",
            "last_name": "Petrova",
            "last_seen": {"time": 1700000000, "platform": 7},
            "mobile_phone": "+7 900 000 00 00",
            "counters": {"friends": 314},
            "city": {"id": 1, "title": "Moscow"}
        });
        let r = normalize_member(&raw).unwrap();
        assert_eq!(r.member_id, 42);
        assert_eq!(r.full_name, "Anna Petrova");
        assert_eq!(r.last_seen, Some(1700000000));
        assert_eq!(r.contacts.as_deref(), Some("+7 900 000 00 00"));
        assert_eq!(r.friends_count, Some(314));
        assert_eq!(r.town.as_deref(), Some("Moscow"));
    }

    #[test]
    fn missing_optionals_become_unknown() {
        let raw = json!({"id": 7, "first_name": "Oleg", "last_name": "S", "city": {}, "counters": null});
        let r = normalize_member(&raw).unwrap();
        assert_eq!(r.last_seen, None);
        assert_eq!(r.contacts, None);
        assert_eq!(r.friends_count, None);
        assert_eq!(r.town, None);
    }

    #[test]
    fn unusable_numbers_become_unknown() {
        let raw = json!({"id": 8, "last_seen": {"time": "soon"}, "counters": {"friends": -3}});
        let r = normalize_member(&raw).unwrap();
        assert_eq!(r.last_seen, None);
        assert_eq!(r.friends_count, None);
        assert_eq!(r.full_name, " ");

        let raw = json!({"id": 9, "last_seen": {"time": u64::MAX}});
        assert_eq!(normalize_member(&raw).unwrap().last_seen, None);
    }

    #[test]
    fn id_above_i64_max_accepted() {
        let raw = json!({"id": 9223372036854775808u64, "first_name": "Big", "last_name": "Id"});
        assert_eq!(normalize_member(&raw).unwrap().member_id, 9223372036854775808);
    }

    #[test]
    fn missing_id_is_malformed() {
        let err = normalize_member(&json!({"first_name": "No", "last_name": "Id"})).unwrap_err();
        assert!(matches!(err, PipelineError::MalformedRecord(_)));
        assert!(normalize_member(&json!({"id": "abc"})).is_err());
        assert_eq!(normalize_member(&json!({"id": "15"})).unwrap().member_id, 15);
    }

    #[tokio::test]
    async fn one_call_per_page_until_empty() {
        let dir = tempfile::tempdir().unwrap();
        let settings = test_settings(dir.path());
        let api = ScriptedApi::new(vec![
            PageResponse::Items(vec![member(1), member(2)]),
            PageResponse::Items(vec![member(3), member(4)]),
            PageResponse::Items(vec![member(5)]),
            PageResponse::Items(vec![]),
        ]);

        let members = fetch_all_members(&api, &settings).await.unwrap();
        assert_eq!(members.len(), 5);
        assert_eq!(api.calls.get(), 4);
        assert_eq!(*api.offsets.borrow(), vec![0, 2, 4, 6]);
    }

    #[tokio::test]
    async fn short_page_does_not_stop_early() {
        let dir = tempfile::tempdir().unwrap();
        let settings = test_settings(dir.path());
        // A page shorter than page_size is not an end signal on its own.
        let api = ScriptedApi::new(vec![
            PageResponse::Items(vec![member(1)]),
            PageResponse::Items(vec![member(2), member(3)]),
            PageResponse::Absent,
        ]);

        let members = fetch_all_members(&api, &settings).await.unwrap();
        assert_eq!(members.len(), 3);
        assert_eq!(api.calls.get(), 3);
    }

    #[tokio::test]
    async fn absent_on_first_call_yields_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let settings = test_settings(dir.path());
        let api = ScriptedApi::new(vec![PageResponse::Absent]);

        let members = fetch_all_members(&api, &settings).await.unwrap();
        assert!(members.is_empty());
        assert_eq!(api.calls.get(), 1);
    }

    #[tokio::test]
    async fn rejected_fails_without_looping() {
        let dir = tempfile::tempdir().unwrap();
        let settings = test_settings(dir.path());
        let api = ScriptedApi::new(vec![
            PageResponse::Items(vec![member(1)]),
            PageResponse::Rejected {
                code: 5,
                message: "User authorization failed".into(),
            },
        ]);

        let err = fetch_all_members(&api, &settings).await.unwrap_err();
        assert!(matches!(err, PipelineError::Transport(ref m) if m.contains("authorization")));
        assert_eq!(api.calls.get(), 2);
    }

    #[tokio::test]
    async fn malformed_entry_skipped_rest_of_page_kept() {
        let dir = tempfile::tempdir().unwrap();
        let settings = test_settings(dir.path());
        let api = ScriptedApi::new(vec![PageResponse::Items(vec![
            member(1),
            json!({"first_name": "Ghost"}),
            member(3),
        ])]);

        let members = fetch_all_members(&api, &settings).await.unwrap();
        let ids: Vec<u64> = members.iter().map(|m| m.member_id).collect();
        assert_eq!(ids, vec![1, 3]);
    }

    #[tokio::test]
    async fn page_ceiling_stops_endless_endpoint() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = test_settings(dir.path());
        settings.max_pages = 5;

        let err = fetch_all_members(&EndlessApi, &settings).await.unwrap_err();
        assert!(matches!(err, PipelineError::Transport(_)));
    }

    #[tokio::test]
    async fn group_filling_exactly_max_pages_completes() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = test_settings(dir.path());
        settings.max_pages = 2;
        let api = ScriptedApi::new(vec![
            PageResponse::Items(vec![member(1), member(2)]),
            PageResponse::Items(vec![member(3), member(4)]),
            PageResponse::Items(vec![]),
        ]);

        let members = fetch_all_members(&api, &settings).await.unwrap();
        assert_eq!(members.len(), 4);
        assert_eq!(api.calls.get(), 3);
    }
}
