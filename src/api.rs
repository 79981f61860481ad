use serde_json::Value;
use tracing::debug;

use crate::error::{PipelineError, Result};
use crate::settings::Settings;

/// One classified answer from the member endpoint. Every body maps to exactly
/// one of these, so pagination always has a defined next step.
#[derive(Debug, Clone, PartialEq)]
pub enum PageResponse {
    /// `{"response": {"items": [...]}}`, possibly empty.
    Items(Vec<Value>),
    /// No `response` key, or a `response` without an `items` array.
    Absent,
    /// `{"error": {...}}`: rate limit, auth failure, unknown group, ...
    Rejected { code: i64, message: String },
}

/// Paged access to group members.
#[allow(async_fn_in_trait)]
pub trait MemberApi {
    async fn fetch_page(&self, offset: u64, count: u32) -> Result<PageResponse>;
}

pub fn classify_response(body: Value) -> PageResponse {
    if let Some(err) = body.get("error") {
        return PageResponse::Rejected {
            code: err.get("error_code").and_then(Value::as_i64).unwrap_or(-1),
            message: err
                .get("error_msg")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string(),
        };
    }

    match body
        .get("response")
        .and_then(|r| r.get("items"))
        .and_then(Value::as_array)
    {
        Some(items) => PageResponse::Items(items.clone()),
        None => PageResponse::Absent,
    }
}

// ── VK HTTP client ──

pub struct VkClient {
    client: reqwest::Client,
    url: String,
    group_id: String,
    fields: String,
    version: String,
    token: String,
}

impl VkClient {
    pub fn new(settings: &Settings) -> Result<Self> {
        Ok(VkClient {
            client: reqwest::Client::new(),
            url: settings.api_url.clone(),
            group_id: settings.group_id.clone(),
            fields: settings.fields.clone(),
            version: settings.api_version.clone(),
            token: settings.access_token()?,
        })
    }
}

impl MemberApi for VkClient {
    async fn fetch_page(&self, offset: u64, count: u32) -> Result<PageResponse> {
        debug!("GET {} group={} offset={} count={}", self.url, self.group_id, offset, count);
        let offset_param = offset.to_string();
        let count_param = count.to_string();
        let response = self
            .client
            .get(&self.url)
            .query(&[
                ("group_id", self.group_id.as_str()),
                ("offset", offset_param.as_str()),
                ("count", count_param.as_str()),
                ("fields", self.fields.as_str()),
                ("access_token", self.token.as_str()),
                ("v", self.version.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::Transport(format!(
                "member API answered {} at offset {}",
                status, offset
            )));
        }

        let body: Value = response.json().await?;
        Ok(classify_response(body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn items_page() {
        let body = json!({"response": {"count": 2, "items": [{"id": 1}, {"id": 2}]}});
        match classify_response(body) {
            PageResponse::Items(items) => assert_eq!(items.len(), 2),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn empty_items_is_still_a_page() {
        let body = json!({"response": {"count": 0, "items": []}});
        assert_eq!(classify_response(body), PageResponse::Items(vec![]));
    }

    #[test]
    fn missing_payload_key_is_absent() {
        assert_eq!(classify_response(json!({})), PageResponse::Absent);
        assert_eq!(classify_response(json!({"response": {"count": 5}})), PageResponse::Absent);
        assert_eq!(classify_response(json!([1, 2, 3])), PageResponse::Absent);
    }

    #[test]
    fn error_body_is_rejected() {
        let body = json!({"error": {"error_code": 6, "error_msg": "Too many requests per second"}});
        assert_eq!(
            classify_response(body),
            PageResponse::Rejected {
                code: 6,
                message: "Too many requests per second".into()
            }
        );
    }
}
