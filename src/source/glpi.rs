use async_trait::async_trait;
use chrono::FixedOffset;
use reqwest::{header, Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

use super::TicketSource;
use crate::config::GlpiSettings;
use crate::date_util::parse_glpi_timestamp;
use crate::error::{Error, Result};
use crate::ticket::{LogicalTicket, NewTicket, SourceSystem, TicketUpdate};

const REQUEST_TIMEOUT_SECS: u64 = 30;
const USER_RANGE: &str = "0-999";

#[derive(Debug, Clone, Deserialize)]
pub struct GlpiTicket {
    pub id: u64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub date_mod: Option<String>,
    #[serde(default)]
    pub users_id_recipient: Option<u64>,
}

impl GlpiTicket {
    pub fn into_logical(self, server_offset: FixedOffset) -> LogicalTicket {
        let modified = self
            .date_mod
            .as_deref()
            .and_then(|s| parse_glpi_timestamp(s, server_offset));
        LogicalTicket::from_raw_body(
            SourceSystem::Glpi,
            self.id.to_string(),
            self.name,
            self.content.as_deref().unwrap_or(""),
        )
        .with_owner(self.users_id_recipient.filter(|id| *id != 0))
        .with_last_modified(modified)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GlpiUser {
    pub id: u64,
    /// Login name.
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub realname: Option<String>,
    #[serde(default)]
    pub firstname: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

impl GlpiUser {
    /// Every identity a Jira reporter could be matched by: email, login
    /// name, and "firstname realname".
    pub fn identities(&self) -> Vec<String> {
        let mut out = Vec::new();
        let non_empty = |s: &Option<String>| s.as_deref().map(str::trim).filter(|s| !s.is_empty()).map(String::from);
        if let Some(email) = non_empty(&self.email) {
            out.push(email);
        }
        if let Some(login) = non_empty(&self.name) {
            out.push(login);
        }
        match (non_empty(&self.firstname), non_empty(&self.realname)) {
            (Some(first), Some(last)) => out.push(format!("{first} {last}")),
            (None, Some(last)) => out.push(last),
            _ => {}
        }
        out
    }
}

#[derive(Debug, Clone, Deserialize)]
struct SessionResponse {
    session_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct CreatedTicket {
    id: u64,
}

/// GLPI REST client holding an open session. Obtain one with
/// [`GlpiClient::connect`] and release it with [`GlpiClient::close`].
pub struct GlpiClient {
    settings: GlpiSettings,
    http: Client,
    session_token: String,
    allow_deletion: bool,
}

impl GlpiClient {
    /// Open a session with the user token. Failure here is fatal for the run.
    pub async fn connect(settings: GlpiSettings, allow_deletion: bool) -> Result<Self> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );
        let app_token = header::HeaderValue::from_str(&settings.app_token)
            .map_err(|e| Error::Config(format!("GLPI_APP_TOKEN is invalid: {e}")))?;
        headers.insert("App-Token", app_token);
        let http = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Config(format!("failed to build GLPI HTTP client: {e}")))?;

        let url = endpoint(&settings.base_url, "initSession");
        let response = http
            .get(url)
            .header(header::AUTHORIZATION, format!("user_token {}", settings.user_token))
            .send()
            .await
            .map_err(|e| Error::Session(format!("initSession request failed: {e}")))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::Session(format!("initSession response read failed: {e}")))?;
        if !status.is_success() {
            return Err(Error::Session(format!("initSession failed with status {status}: {body}")));
        }
        let session: SessionResponse = serde_json::from_str(&body)
            .map_err(|e| Error::Session(format!("malformed initSession response: {e}")))?;
        let session_token = session
            .session_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::Session("initSession returned no session_token".into()))?;

        log::info!("GLPI session started");
        Ok(Self {
            settings,
            http,
            session_token,
            allow_deletion,
        })
    }

    /// Kill the session. Errors are logged, not returned.
    pub async fn close(self) {
        let request = self.http.get(self.endpoint("killSession"));
        match self.send(request).await {
            Ok(_) => log::info!("GLPI session ended"),
            Err(e) => log::warn!("Failed to end GLPI session: {e}"),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        endpoint(&self.settings.base_url, path)
    }

    async fn send_raw(&self, request: reqwest::RequestBuilder) -> Result<(StatusCode, String)> {
        let response = request
            .header("Session-Token", &self.session_token)
            .send()
            .await
            .map_err(|e| Error::api(SourceSystem::Glpi, format!("request failed: {e}")))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::api(SourceSystem::Glpi, format!("response read failed: {e}")))?;
        Ok((status, body))
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<String> {
        let (status, body) = self.send_raw(request).await?;
        if !status.is_success() {
            return Err(Error::api(
                SourceSystem::Glpi,
                format!("request failed with status {status}: {body}"),
            ));
        }
        Ok(body)
    }

    async fn request_json<T: DeserializeOwned>(&self, request: reqwest::RequestBuilder) -> Result<T> {
        let body = self.send(request).await?;
        serde_json::from_str(&body)
            .map_err(|e| Error::api(SourceSystem::Glpi, format!("malformed JSON response: {e}")))
    }

    /// All tickets, paged with `range=a-b` until a short page or a range
    /// past the end.
    pub async fn list_tickets(&self) -> Result<Vec<GlpiTicket>> {
        let page_size = self.settings.page_size.max(1);
        let mut tickets: Vec<GlpiTicket> = Vec::new();
        loop {
            let start = tickets.len();
            let range = format!("{}-{}", start, start + page_size - 1);
            let request = self
                .http
                .get(self.endpoint("Ticket/"))
                .query(&[("range", range.as_str())]);
            let (status, body) = self.send_raw(request).await?;
            if status == StatusCode::BAD_REQUEST && body.contains("ERROR_RANGE_EXCEED_TOTAL") {
                break;
            }
            if !status.is_success() {
                return Err(Error::api(
                    SourceSystem::Glpi,
                    format!("ticket list failed with status {status}: {body}"),
                ));
            }
            let page: Vec<GlpiTicket> = serde_json::from_str(&body)
                .map_err(|e| Error::api(SourceSystem::Glpi, format!("malformed ticket list: {e}")))?;
            let fetched = page.len();
            tickets.extend(page);
            if fetched < page_size {
                break;
            }
        }
        Ok(tickets)
    }

    /// Users for building the identity map.
    pub async fn list_users(&self) -> Result<Vec<GlpiUser>> {
        let request = self
            .http
            .get(self.endpoint("User"))
            .query(&[("range", USER_RANGE)]);
        self.request_json(request).await
    }
}

fn endpoint(base_url: &str, path: &str) -> String {
    let base = base_url.trim_end_matches('/');
    let suffix = path.trim_start_matches('/');
    format!("{base}/{suffix}")
}

#[async_trait]
impl TicketSource for GlpiClient {
    fn system(&self) -> SourceSystem {
        SourceSystem::Glpi
    }

    async fn fetch_all(&self) -> Result<Vec<LogicalTicket>> {
        let offset = self.settings.server_offset;
        Ok(self
            .list_tickets()
            .await?
            .into_iter()
            .map(|t| t.into_logical(offset))
            .collect())
    }

    async fn create(&self, ticket: &NewTicket) -> Result<String> {
        let mut input = serde_json::Map::new();
        input.insert("name".into(), json!(ticket.title));
        input.insert("content".into(), json!(ticket.body));
        if let Some(owner) = ticket.owner_id {
            input.insert("users_id_recipient".into(), json!(owner));
        }
        let request = self
            .http
            .post(self.endpoint("Ticket"))
            .json(&json!({ "input": input }));
        let created: CreatedTicket = self.request_json(request).await?;
        log::info!("Created GLPI ticket {}", created.id);
        Ok(created.id.to_string())
    }

    async fn update(&self, remote_id: &str, update: &TicketUpdate) -> Result<()> {
        let mut input = serde_json::Map::new();
        if let Some(title) = &update.title {
            input.insert("name".into(), json!(title));
        }
        if let Some(body) = &update.body {
            input.insert("content".into(), json!(body));
        }
        if let Some(owner) = update.owner_id {
            input.insert("users_id_recipient".into(), json!(owner));
        }
        if input.is_empty() {
            return Ok(());
        }
        let request = self
            .http
            .put(self.endpoint(&format!("Ticket/{remote_id}")))
            .json(&json!({ "input": Value::Object(input) }));
        self.send(request).await?;
        Ok(())
    }

    async fn delete(&self, remote_id: &str) -> Result<bool> {
        if !self.allow_deletion {
            log::warn!("Deletion disabled - skipping deletion of GLPI ticket {remote_id}");
            return Ok(false);
        }
        let mut request = self.http.delete(self.endpoint(&format!("Ticket/{remote_id}")));
        if self.settings.purge_on_delete {
            request = request.query(&[("force_purge", "true")]);
        }
        self.send(request).await?;
        Ok(true)
    }
}
