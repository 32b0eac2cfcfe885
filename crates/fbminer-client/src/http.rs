//! REST gateway to the mining backend.
//!
//! Thin reqwest client: every call maps transport failures to
//! `MinerError::Backend` and non-2xx answers to `MinerError::Http`.
//! The backend is loose about response envelopes (bare arrays vs
//! `{"pages": [...]}`, `{"status": "error"}` with a 200), so decoding goes
//! through a couple of tolerant helpers.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use fbminer_core::config::BackendConfig;
use fbminer_core::error::{MinerError, Result};
use fbminer_core::traits::{Catalog, Messenger};
use fbminer_core::types::{
    Conversation, CustomerGroup, CustomerRow, CustomerStatistics, GroupDraft, GroupMessage,
    HistoryMessage, InactivityEntry, MessageKind, MessageSet, MiningStatusEntry,
    MiningStatusUpdate, NewSetMessage, NewUser, OutboundMessage, Page, Schedule,
    ScheduleRequest, SendReceipt, SetMessage, SyncReport,
};
use reqwest::{Method, RequestBuilder};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

/// HTTP client for the backend REST API.
#[derive(Clone)]
pub struct HttpBackend {
    base: String,
    client: reqwest::Client,
}

impl HttpBackend {
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| MinerError::Backend(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            base: config.base().to_string(),
            client,
        })
    }

    /// Base URL without trailing slash.
    pub fn base_url(&self) -> &str {
        &self.base
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    /// Send a request and return the decoded JSON body (`Null` when empty).
    async fn execute(&self, request: RequestBuilder, endpoint: &str) -> Result<Value> {
        let response = request
            .send()
            .await
            .map_err(|e| MinerError::Backend(format!("{endpoint} request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MinerError::Http {
                status: status.as_u16(),
                endpoint: endpoint.to_string(),
                body: error_detail(&body),
            });
        }

        let text = response
            .text()
            .await
            .map_err(|e| MinerError::Backend(format!("{endpoint} body read failed: {e}")))?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text)
            .map_err(|e| MinerError::Backend(format!("Invalid response from {endpoint}: {e}")))
    }

    async fn get(&self, path: &str) -> Result<Value> {
        tracing::debug!("GET {path}");
        self.execute(self.client.get(self.url(path)), path).await
    }

    async fn send_json<B: Serialize + ?Sized>(&self, method: Method, path: &str, body: &B) -> Result<Value> {
        tracing::debug!("{method} {path}");
        let request = self.client.request(method, self.url(path)).json(body);
        self.execute(request, path).await
    }

    async fn post<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<Value> {
        self.send_json(Method::POST, path, body).await
    }

    async fn put<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<Value> {
        self.send_json(Method::PUT, path, body).await
    }

    async fn delete(&self, path: &str) -> Result<Value> {
        tracing::debug!("DELETE {path}");
        self.execute(self.client.delete(self.url(path)), path).await
    }

    // ─── Pages & conversations ─────────────────────────

    /// Pages connected on the backend.
    pub async fn pages(&self) -> Result<Vec<Page>> {
        let value = self.get("/pages").await?;
        decode(list_field(value, &["pages"]), "/pages")
    }

    /// URL that starts the Facebook OAuth flow in a browser.
    pub fn connect_url(&self) -> String {
        self.url("/connect")
    }

    /// Message history of one conversation.
    pub async fn conversation_history(&self, page_id: &str, conversation_id: &str) -> Result<Vec<HistoryMessage>> {
        let path = format!("/messages/{page_id}/{conversation_id}");
        let value = ensure_ok(self.get(&path).await?)?;
        decode(list_field(value, &["data", "messages"]), &path)
    }

    // ─── Set messages ──────────────────────────────────

    /// Upload a media file inline as a set message.
    pub async fn upload_media(
        &self,
        message_set_id: i64,
        page_id: &str,
        kind: MessageKind,
        file_name: &str,
        bytes: &[u8],
        display_order: i64,
    ) -> Result<SetMessage> {
        let message = media_message(message_set_id, page_id, kind, file_name, bytes, display_order)?;
        tracing::info!("📤 Uploading {kind} '{file_name}' ({} bytes)", bytes.len());
        self.create_set_message(&message).await
    }

    // ─── Groups & group messages ───────────────────────

    pub async fn group(&self, group_id: i64) -> Result<CustomerGroup> {
        let path = format!("/customer-group/{group_id}");
        decode(self.get(&path).await?, &path)
    }

    pub async fn create_group_message(&self, message: &GroupMessage) -> Result<GroupMessage> {
        decode(self.post("/group-messages", message).await?, "/group-messages")
    }

    pub async fn group_messages(&self, page_id: &str, group_id: i64) -> Result<Vec<GroupMessage>> {
        let path = format!("/group-messages/{page_id}/{group_id}");
        decode(list_field(self.get(&path).await?, &["messages"]), &path)
    }

    pub async fn update_group_message(&self, message_id: i64, message: &GroupMessage) -> Result<()> {
        self.put(&format!("/group-messages/{message_id}"), message).await?;
        Ok(())
    }

    pub async fn delete_group_message(&self, message_id: i64) -> Result<()> {
        self.delete(&format!("/group-messages/{message_id}")).await?;
        Ok(())
    }

    pub async fn create_group_messages_batch(&self, messages: &[GroupMessage]) -> Result<usize> {
        let value = self.post("/group-messages/batch", messages).await?;
        Ok(count_of(&value).unwrap_or(messages.len()))
    }

    pub async fn delete_all_group_messages(&self, page_id: &str, group_id: i64) -> Result<()> {
        self.delete(&format!("/group-messages/{page_id}/{group_id}/all")).await?;
        Ok(())
    }

    // ─── Schedules ─────────────────────────────────────

    pub async fn create_schedule(&self, request: &ScheduleRequest) -> Result<Schedule> {
        decode(self.post("/message-schedules", request).await?, "/message-schedules")
    }

    pub async fn create_schedules_batch(&self, requests: &[ScheduleRequest]) -> Result<Vec<Schedule>> {
        let value = self.post("/message-schedules/batch", requests).await?;
        decode(list_field(value, &["schedules"]), "/message-schedules/batch")
    }

    pub async fn group_schedules(&self, page_id: &str, group_id: i64) -> Result<Vec<Schedule>> {
        let path = format!("/message-schedules/group/{page_id}/{group_id}");
        decode(list_field(self.get(&path).await?, &["schedules"]), &path)
    }

    pub async fn update_schedule(&self, schedule_id: i64, request: &ScheduleRequest) -> Result<Schedule> {
        let path = format!("/message-schedules/{schedule_id}");
        decode(self.put(&path, request).await?, &path)
    }

    pub async fn delete_schedule(&self, schedule_id: i64) -> Result<()> {
        self.delete(&format!("/message-schedules/{schedule_id}")).await?;
        Ok(())
    }

    /// Hand a stored schedule to the backend runner.
    pub async fn activate_schedule(&self, page_id: &str, schedule: &Schedule) -> Result<String> {
        let body = json!({ "page_id": page_id, "schedule": schedule });
        let value = ensure_ok(self.post("/schedule/activate", &body).await?)?;
        Ok(message_of(&value))
    }

    pub async fn deactivate_schedule(&self, page_id: &str, schedule_id: i64) -> Result<String> {
        let body = json!({ "page_id": page_id, "schedule_id": schedule_id });
        let value = ensure_ok(self.post("/schedule/deactivate", &body).await?)?;
        Ok(message_of(&value))
    }

    /// Schedules currently loaded in the backend runner.
    pub async fn active_schedules(&self, page_id: &str) -> Result<Vec<Value>> {
        let path = format!("/active-schedules/{page_id}");
        decode(list_field(self.get(&path).await?, &["active_schedules"]), &path)
    }

    // ─── Reports & maintenance ─────────────────────────

    pub async fn customer_statistics(&self, page_id: &str) -> Result<CustomerStatistics> {
        let path = format!("/customer-statistics/{page_id}");
        decode(ensure_ok(self.get(&path).await?)?, &path)
    }

    /// Ask the backend to pull customers from Facebook again.
    pub async fn sync_customers(&self, page_id: &str) -> Result<SyncReport> {
        let path = format!("/sync-customers/{page_id}");
        let value = ensure_ok(self.post(&path, &json!({})).await?)?;
        decode(value, &path)
    }

    /// Customers that arrived since the last poll.
    pub async fn new_user_notifications(&self, page_id: &str) -> Result<Vec<NewUser>> {
        let path = format!("/new-user-notifications/{page_id}");
        decode(list_field(self.get(&path).await?, &["new_users"]), &path)
    }

    /// Mining status per customer PSID.
    pub async fn mining_statuses(&self, page_id: &str) -> Result<HashMap<String, MiningStatusEntry>> {
        let path = format!("/mining-status/{page_id}");
        let mut value = self.get(&path).await?;
        let statuses = value.get_mut("statuses").map(Value::take).unwrap_or(Value::Null);
        if statuses.is_null() {
            return Ok(HashMap::new());
        }
        decode(statuses, &path)
    }

    /// Push computed inactivity for a batch of users; returns the updated count.
    pub async fn update_inactivity(&self, page_id: &str, users: &[InactivityEntry]) -> Result<usize> {
        if users.is_empty() {
            return Ok(0);
        }
        let path = format!("/update-user-inactivity/{page_id}");
        let value = ensure_ok(self.post(&path, &json!({ "users": users })).await?)?;
        Ok(value
            .get("updated_count")
            .and_then(Value::as_u64)
            .map(|n| n as usize)
            .unwrap_or(users.len()))
    }
}

#[async_trait]
impl Catalog for HttpBackend {
    async fn list_conversations(&self, page_id: &str) -> Result<Vec<Conversation>> {
        let path = format!("/fb-customers/by-page/{page_id}");
        let value = ensure_ok(self.get(&path).await?)?;
        let rows: Vec<CustomerRow> = decode(list_field(value, &["customers", "data"]), &path)?;
        tracing::debug!("Loaded {} conversations for page {page_id}", rows.len());
        Ok(rows.into_iter().map(Conversation::from).collect())
    }

    async fn list_message_sets(&self, page_id: &str) -> Result<Vec<MessageSet>> {
        let path = format!("/message_sets/{page_id}");
        decode(self.get(&path).await?, &path)
    }

    async fn create_message_set(&self, page_id: &str, set_name: &str) -> Result<MessageSet> {
        let body = json!({ "page_id": page_id, "set_name": set_name });
        decode(self.post("/message_set", &body).await?, "/message_set")
    }

    async fn rename_message_set(&self, set_id: i64, set_name: &str) -> Result<MessageSet> {
        let path = format!("/message_set/{set_id}");
        decode(self.put(&path, &json!({ "set_name": set_name })).await?, &path)
    }

    async fn delete_message_set(&self, set_id: i64) -> Result<()> {
        self.delete(&format!("/message_set/{set_id}")).await?;
        Ok(())
    }

    async fn list_set_messages(&self, set_id: i64) -> Result<Vec<SetMessage>> {
        let path = format!("/custom_messages/{set_id}");
        decode(self.get(&path).await?, &path)
    }

    async fn create_set_message(&self, message: &NewSetMessage) -> Result<SetMessage> {
        decode(self.post("/custom_message", message).await?, "/custom_message")
    }

    async fn create_set_messages_batch(&self, messages: &[NewSetMessage]) -> Result<usize> {
        let value = self
            .post("/custom_message/batch", &json!({ "messages": messages }))
            .await?;
        Ok(count_of(&value).unwrap_or(messages.len()))
    }

    async fn update_set_message(
        &self,
        message_id: i64,
        kind: MessageKind,
        content: &str,
        display_order: i64,
    ) -> Result<SetMessage> {
        let path = format!("/custom_message/{message_id}");
        let body = json!({
            "message_type": kind,
            "content": content,
            "display_order": display_order,
        });
        decode(self.put(&path, &body).await?, &path)
    }

    async fn delete_set_message(&self, message_id: i64) -> Result<()> {
        self.delete(&format!("/custom_message/{message_id}")).await?;
        Ok(())
    }

    async fn list_groups(&self, page_id: &str, include_inactive: bool) -> Result<Vec<CustomerGroup>> {
        let path = format!("/customer-groups/{page_id}?include_inactive={include_inactive}");
        decode(list_field(self.get(&path).await?, &["groups", "data"]), &path)
    }

    async fn create_group(&self, draft: &GroupDraft) -> Result<()> {
        ensure_ok(self.post("/customer-groups", &group_body(draft)).await?)?;
        tracing::info!("✅ Group '{}' submitted", draft.name);
        Ok(())
    }

    async fn update_group(&self, group_id: i64, draft: &GroupDraft) -> Result<()> {
        let path = format!("/customer-groups/{group_id}");
        ensure_ok(self.put(&path, &group_body(draft)).await?)?;
        Ok(())
    }

    async fn delete_group(&self, group_id: i64, hard_delete: bool) -> Result<()> {
        self.delete(&format!("/customer-groups/{group_id}?hard_delete={hard_delete}"))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Messenger for HttpBackend {
    async fn send_message(&self, page_id: &str, psid: &str, message: &OutboundMessage) -> Result<SendReceipt> {
        let path = format!("/send/{page_id}/{psid}");
        let value = ensure_ok(self.post(&path, message).await?)?;
        // Older backends answer with a bare status object.
        Ok(serde_json::from_value(value).unwrap_or_else(|_| SendReceipt {
            success: true,
            ..Default::default()
        }))
    }

    async fn update_mining_status(&self, page_id: &str, update: &MiningStatusUpdate) -> Result<()> {
        let path = format!("/mining-status/update/{page_id}");
        ensure_ok(self.post(&path, update).await?)?;
        Ok(())
    }

    fn media_url(&self, dir: &str, name: &str) -> String {
        format!("{}/{}/{}", self.base, dir, name)
    }
}

/// Set message carrying a media file inline, content `[IMAGE] name`.
pub fn media_message(
    message_set_id: i64,
    page_id: &str,
    kind: MessageKind,
    file_name: &str,
    bytes: &[u8],
    display_order: i64,
) -> Result<NewSetMessage> {
    let marker = kind
        .marker()
        .ok_or_else(|| MinerError::Validation("only image and video messages carry media".into()))?;
    Ok(NewSetMessage {
        message_set_id,
        page_id: page_id.to_string(),
        message_type: kind,
        content: format!("{marker} {file_name}"),
        display_order,
        image_data_base64: Some(BASE64.encode(bytes)),
    })
}

// ─── Decoding helpers ──────────────────────────────────

fn decode<T: DeserializeOwned>(value: Value, endpoint: &str) -> Result<T> {
    serde_json::from_value(value)
        .map_err(|e| MinerError::Backend(format!("Unexpected payload from {endpoint}: {e}")))
}

/// Unwrap a list that may arrive bare or inside one of `keys`.
fn list_field(value: Value, keys: &[&str]) -> Value {
    match value {
        Value::Array(_) => value,
        Value::Object(mut map) => keys
            .iter()
            .find_map(|k| map.remove(*k).filter(Value::is_array))
            .unwrap_or_else(|| Value::Array(Vec::new())),
        _ => Value::Array(Vec::new()),
    }
}

/// Turn a 200 carrying `{"status": "error"}` or `{"error": ...}` into an error.
fn ensure_ok(value: Value) -> Result<Value> {
    if let Some(err) = value.get("error").and_then(Value::as_str) {
        return Err(MinerError::Backend(err.to_string()));
    }
    if value.get("status").and_then(Value::as_str) == Some("error") {
        return Err(MinerError::Backend(message_of(&value)));
    }
    Ok(value)
}

fn message_of(value: &Value) -> String {
    value
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn count_of(value: &Value) -> Option<usize> {
    value.get("count").and_then(Value::as_u64).map(|n| n as usize)
}

/// Pull FastAPI's `detail` out of an error body when present.
fn error_detail(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.get("detail")
                .or_else(|| v.get("error"))
                .map(|d| d.as_str().map(str::to_string).unwrap_or_else(|| d.to_string()))
        })
        .unwrap_or_else(|| body.to_string())
}

/// Group payload; the backend reads `type_name` on some routes and `name` on others.
fn group_body(draft: &GroupDraft) -> Value {
    json!({
        "page_id": draft.page_id,
        "name": draft.name,
        "type_name": draft.name,
        "rule_description": draft.rule_description,
        "keywords": draft.keywords,
        "examples": draft.examples,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::task::JoinHandle;

    /// Serve exactly one canned HTTP response and return the base URL.
    async fn serve_once(status: &'static str, body: &'static str) -> String {
        serve_recorded(status, body).await.0
    }

    /// Like `serve_once`, also handing back the raw request it received.
    async fn serve_recorded(status: &'static str, body: &'static str) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let task = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let request = read_request(&mut socket).await;
            let response = format!(
                "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
            request
        });
        (format!("http://{addr}"), task)
    }

    /// Read headers plus a `Content-Length` body.
    async fn read_request(socket: &mut TcpStream) -> String {
        let mut raw = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            raw.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&raw);
            if let Some(end) = text.find("\r\n\r\n") {
                let length = text[..end]
                    .lines()
                    .find_map(|l| {
                        let (name, value) = l.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length")
                            .then(|| value.trim().parse::<usize>().ok())
                            .flatten()
                    })
                    .unwrap_or(0);
                if raw.len() >= end + 4 + length {
                    break;
                }
            }
        }
        String::from_utf8_lossy(&raw).into_owned()
    }

    fn backend(base: &str) -> HttpBackend {
        HttpBackend::new(&BackendConfig {
            base_url: base.into(),
            request_timeout_secs: 5,
        })
        .unwrap()
    }

    #[test]
    fn test_urls() {
        let b = backend("http://localhost:8000/");
        assert_eq!(b.base_url(), "http://localhost:8000");
        assert_eq!(b.connect_url(), "http://localhost:8000/connect");
        assert_eq!(
            b.media_url("images", "cat.jpg"),
            "http://localhost:8000/images/cat.jpg"
        );
    }

    #[test]
    fn test_list_field_shapes() {
        assert_eq!(list_field(json!([1, 2]), &["pages"]), json!([1, 2]));
        assert_eq!(list_field(json!({"pages": [1]}), &["pages"]), json!([1]));
        assert_eq!(list_field(json!({"other": 1}), &["pages"]), json!([]));
        assert_eq!(list_field(Value::Null, &["pages"]), json!([]));
    }

    #[test]
    fn test_ensure_ok() {
        assert!(ensure_ok(json!({"status": "success"})).is_ok());
        let err = ensure_ok(json!({"status": "error", "message": "Missing required data"})).unwrap_err();
        assert_eq!(err.to_string(), "Backend error: Missing required data");
        assert!(ensure_ok(json!({"error": "no token"})).is_err());
    }

    #[test]
    fn test_error_detail() {
        assert_eq!(error_detail(r#"{"detail":"Page not found"}"#), "Page not found");
        assert_eq!(error_detail("plain text"), "plain text");
    }

    #[test]
    fn test_group_body_carries_both_names() {
        let draft = GroupDraft {
            page_id: Some("p1".into()),
            name: "VIP".into(),
            ..Default::default()
        };
        let body = group_body(&draft);
        assert_eq!(body["name"], "VIP");
        assert_eq!(body["type_name"], "VIP");
    }

    #[tokio::test]
    async fn test_pages_envelope() {
        let base = serve_once("200 OK", r#"{"pages":[{"id":"p1","name":"Shop"}]}"#).await;
        let pages = backend(&base).pages().await.unwrap();
        assert_eq!(pages, vec![Page { id: "p1".into(), name: "Shop".into() }]);
    }

    #[tokio::test]
    async fn test_conversations_from_customer_rows() {
        let base = serve_once(
            "200 OK",
            r#"[{"customer_psid":"u1","name":"Ann","last_interaction_at":"2026-10-01T08:00:00"}]"#,
        )
        .await;
        let convs = backend(&base).list_conversations("p1").await.unwrap();
        assert_eq!(convs.len(), 1);
        assert_eq!(convs[0].raw_psid.as_deref(), Some("u1"));
    }

    #[tokio::test]
    async fn test_http_error_mapping() {
        let base = serve_once("404 Not Found", r#"{"detail":"Page not found"}"#).await;
        let err = backend(&base).mining_statuses("p1").await.unwrap_err();
        assert_eq!(err.status(), Some(404));
        assert!(err.to_string().contains("Page not found"));
    }

    #[tokio::test]
    async fn test_send_message_request() {
        let (base, request) = serve_recorded("200 OK", r#"{"success":true,"task_id":"t1"}"#).await;
        let message = OutboundMessage {
            message: "Hello".into(),
            kind: MessageKind::Text,
            is_system_message: true,
        };
        backend(&base).send_message("p1", "u1", &message).await.unwrap();

        let request = request.await.unwrap();
        assert!(request.starts_with("POST /send/p1/u1 HTTP/1.1\r\n"), "{request}");
        let (_, body) = request.split_once("\r\n\r\n").unwrap();
        let body: Value = serde_json::from_str(body).unwrap();
        assert_eq!(
            body,
            json!({"message": "Hello", "type": "text", "is_system_message": true})
        );
    }

    #[test]
    fn test_media_message_inlines_bytes() {
        let message = media_message(3, "p1", MessageKind::Image, "cat.jpg", b"abc", 2).unwrap();
        assert_eq!(message.content, "[IMAGE] cat.jpg");
        assert_eq!(message.image_data_base64.as_deref(), Some("YWJj"));
        assert!(media_message(3, "p1", MessageKind::Text, "a.txt", b"abc", 0).is_err());
    }

    #[tokio::test]
    async fn test_transport_error() {
        let err = backend("http://127.0.0.1:1").pages().await.unwrap_err();
        assert!(matches!(err, MinerError::Backend(_)));
    }
}
