use async_trait::async_trait;
use reqwest::{header, Client};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

use super::TicketSource;
use crate::config::{IdentityKey, JiraAuth, JiraSettings};
use crate::date_util::parse_jira_timestamp;
use crate::error::{Error, Result};
use crate::ticket::{LogicalTicket, NewTicket, SourceSystem, TicketUpdate};

const REQUEST_TIMEOUT_SECS: u64 = 30;
const SEARCH_FIELDS: &str = "summary,description,updated,reporter";

/// Shown instead of descriptions Jira returns as structured documents.
pub const RICH_TEXT_PLACEHOLDER: &str = "[rich-text description not supported]";

#[derive(Debug, Clone, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    issues: Vec<JiraIssue>,
    #[serde(default)]
    total: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JiraIssue {
    pub id: String,
    pub key: String,
    pub fields: JiraFields,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct JiraFields {
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub description: Option<Value>,
    #[serde(default)]
    pub updated: Option<String>,
    #[serde(default)]
    pub reporter: Option<JiraUser>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JiraUser {
    #[serde(rename = "displayName", default)]
    pub display_name: Option<String>,
    #[serde(rename = "emailAddress", default)]
    pub email_address: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct CreatedIssue {
    id: String,
    key: String,
}

impl JiraIssue {
    /// Reduce to a [`LogicalTicket`], choosing the reporter field that the
    /// identity map is keyed by.
    pub fn into_logical(self, identity_key: IdentityKey) -> LogicalTicket {
        let description = match &self.fields.description {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(_) => RICH_TEXT_PLACEHOLDER.to_string(),
        };
        let reporter = self.fields.reporter.as_ref().and_then(|r| {
            let (primary, secondary) = match identity_key {
                IdentityKey::DisplayName => (&r.display_name, &r.email_address),
                IdentityKey::Email => (&r.email_address, &r.display_name),
            };
            primary.clone().or_else(|| secondary.clone())
        });
        let updated = self.fields.updated.as_deref().and_then(parse_jira_timestamp);

        LogicalTicket::from_raw_body(
            SourceSystem::Jira,
            self.id,
            self.fields.summary.unwrap_or_default(),
            &description,
        )
        .with_display_key(self.key)
        .with_reporter(reporter)
        .with_last_modified(updated)
    }
}

/// Jira REST v2 client scoped to one project.
#[derive(Clone)]
pub struct JiraClient {
    settings: JiraSettings,
    http: Client,
    allow_deletion: bool,
}

impl JiraClient {
    pub fn new(settings: JiraSettings, allow_deletion: bool) -> Result<Self> {
        let mut headers = header::HeaderMap::new();
        headers.insert(header::ACCEPT, header::HeaderValue::from_static("application/json"));
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );
        let http = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Config(format!("failed to build Jira HTTP client: {e}")))?;
        Ok(Self {
            settings,
            http,
            allow_deletion,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        let base = self.settings.base_url.trim_end_matches('/');
        let suffix = path.trim_start_matches('/');
        format!("{base}/{suffix}")
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.settings.auth {
            JiraAuth::Basic { username, password } => request.basic_auth(username, Some(password)),
            JiraAuth::Bearer(token) => request.bearer_auth(token),
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<String> {
        let response = self
            .authorized(request)
            .send()
            .await
            .map_err(|e| Error::api(SourceSystem::Jira, format!("request failed: {e}")))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::api(SourceSystem::Jira, format!("response read failed: {e}")))?;
        if !status.is_success() {
            return Err(Error::api(
                SourceSystem::Jira,
                format!("request failed with status {status}: {body}"),
            ));
        }
        Ok(body)
    }

    async fn request_json<T: DeserializeOwned>(&self, request: reqwest::RequestBuilder) -> Result<T> {
        let body = self.send(request).await?;
        serde_json::from_str(&body)
            .map_err(|e| Error::api(SourceSystem::Jira, format!("malformed JSON response: {e}")))
    }

    /// All issues of the configured project, following `startAt` pages.
    pub async fn search_issues(&self) -> Result<Vec<JiraIssue>> {
        let jql = format!("project={}", self.settings.project_key);
        let page_size = self.settings.page_size.max(1);
        let mut issues = Vec::new();
        loop {
            let start_at = issues.len().to_string();
            let max_results = page_size.to_string();
            let request = self.http.get(self.endpoint("rest/api/2/search")).query(&[
                ("jql", jql.as_str()),
                ("startAt", start_at.as_str()),
                ("maxResults", max_results.as_str()),
                ("fields", SEARCH_FIELDS),
            ]);
            let page: SearchResponse = self.request_json(request).await?;
            let fetched = page.issues.len();
            issues.extend(page.issues);
            log::debug!("Fetched {} of {} Jira issues", issues.len(), page.total);
            if fetched == 0 || issues.len() as u64 >= page.total {
                break;
            }
        }
        Ok(issues)
    }
}

#[async_trait]
impl TicketSource for JiraClient {
    fn system(&self) -> SourceSystem {
        SourceSystem::Jira
    }

    async fn fetch_all(&self) -> Result<Vec<LogicalTicket>> {
        let identity_key = self.settings.identity_key;
        let issues = self.search_issues().await?;
        Ok(issues
            .into_iter()
            .map(|issue| issue.into_logical(identity_key))
            .collect())
    }

    async fn create(&self, ticket: &NewTicket) -> Result<String> {
        let request = self.http.post(self.endpoint("rest/api/2/issue")).json(&json!({
            "fields": {
                "project": { "key": self.settings.project_key },
                "summary": ticket.title,
                "description": ticket.body,
                "issuetype": { "name": self.settings.issue_type },
            }
        }));
        let created: CreatedIssue = self.request_json(request).await?;
        log::info!("Created Jira issue {} ({})", created.key, created.id);
        Ok(created.id)
    }

    async fn update(&self, remote_id: &str, update: &TicketUpdate) -> Result<()> {
        let mut fields = serde_json::Map::new();
        if let Some(title) = &update.title {
            fields.insert("summary".into(), json!(title));
        }
        if let Some(body) = &update.body {
            fields.insert("description".into(), json!(body));
        }
        if fields.is_empty() {
            return Ok(());
        }
        let request = self
            .http
            .put(self.endpoint(&format!("rest/api/2/issue/{remote_id}")))
            .json(&json!({ "fields": fields }));
        self.send(request).await?;
        Ok(())
    }

    async fn delete(&self, remote_id: &str) -> Result<bool> {
        if !self.allow_deletion {
            log::warn!("Deletion disabled - skipping deletion of Jira issue {remote_id}");
            return Ok(false);
        }
        let request = self
            .http
            .delete(self.endpoint(&format!("rest/api/2/issue/{remote_id}")));
        self.send(request).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provenance::ProvenanceTag;

    fn issue(description: Value) -> JiraIssue {
        serde_json::from_value(json!({
            "id": "10001",
            "key": "OPS-1",
            "fields": {
                "summary": "VPN down",
                "description": description,
                "updated": "2024-01-02T10:00:00.000+0000",
                "reporter": { "displayName": "Jane Doe", "emailAddress": "jdoe@example.com" }
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_into_logical_plain_description() {
        let t = issue(json!("Cannot connect\n\n[SRC:GLPI:55]")).into_logical(IdentityKey::DisplayName);
        assert_eq!(t.system, SourceSystem::Jira);
        assert_eq!(t.remote_id, "10001");
        assert_eq!(t.display_key, "OPS-1");
        assert_eq!(t.title, "VPN down");
        assert_eq!(t.body, "Cannot connect");
        assert_eq!(t.provenance, Some(ProvenanceTag::new(SourceSystem::Glpi, "55")));
        assert_eq!(t.reporter_identity.as_deref(), Some("Jane Doe"));
        assert!(t.last_modified.is_some());
        assert_eq!(t.owner_id, None);
    }

    #[test]
    fn test_into_logical_rich_description_degrades() {
        let doc = json!({ "type": "doc", "version": 1, "content": [] });
        let t = issue(doc).into_logical(IdentityKey::Email);
        assert_eq!(t.body, RICH_TEXT_PLACEHOLDER);
        assert_eq!(t.reporter_identity.as_deref(), Some("jdoe@example.com"));
    }

    #[test]
    fn test_into_logical_missing_fields() {
        let issue: JiraIssue = serde_json::from_value(json!({
            "id": "2", "key": "OPS-2", "fields": { "summary": "x", "description": null }
        }))
        .unwrap();
        let t = issue.into_logical(IdentityKey::DisplayName);
        assert_eq!(t.body, "");
        assert_eq!(t.reporter_identity, None);
        assert_eq!(t.last_modified, None);
    }

    #[test]
    fn test_search_response_defaults() {
        let page: SearchResponse = serde_json::from_value(json!({ "startAt": 0 })).unwrap();
        assert!(page.issues.is_empty());
        assert_eq!(page.total, 0);
    }
}
