use std::time::Duration;

use chat_core::{
    ChatApi, ChatError, ChatErrorCategory, Conversation, SessionId, Snapshot,
    classify_http_status,
};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

const LOGIN_PATH: &str = "api/login";
const LOGOUT_PATH: &str = "api/logout";
const CONVERSATIONS_PATH: &str = "api/conversations";
const SEND_MESSAGE_PATH: &str = "api/send-message";
const CREATE_GROUP_PATH: &str = "api/create-group";

/// `ChatApi` over the bridge's JSON endpoints.
#[derive(Debug, Clone)]
pub struct HttpChatApi {
    http: Client,
    base_url: Url,
}

impl HttpChatApi {
    pub fn new(base_url: Url, request_timeout: Duration) -> Result<Self, ChatError> {
        let http = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|err| {
                ChatError::new(ChatErrorCategory::Config, "http_client_build_error", err.to_string())
            })?;

        Ok(Self {
            http,
            base_url: normalize_base_url(base_url),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url, ChatError> {
        self.base_url.join(path).map_err(|err| {
            ChatError::new(
                ChatErrorCategory::Config,
                "invalid_endpoint",
                format!("cannot build endpoint '{path}' from {}: {err}", self.base_url),
            )
        })
    }

    async fn read_body(response: reqwest::Response) -> Result<(u16, String), ChatError> {
        let status = response.status().as_u16();
        let body = response.text().await.map_err(map_reqwest_error)?;
        Ok((status, body))
    }
}

impl ChatApi for HttpChatApi {
    async fn login(&self, session: &SessionId) -> Result<(), ChatError> {
        let response = self
            .http
            .post(self.endpoint(LOGIN_PATH)?)
            .json(&ClientIdBody {
                client_id: session.as_str(),
            })
            .send()
            .await
            .map_err(map_reqwest_error)?;
        let (status, body) = Self::read_body(response).await?;
        decode_status_response(status, &body)
    }

    async fn logout(&self, session: &SessionId) -> Result<(), ChatError> {
        let response = self
            .http
            .post(self.endpoint(LOGOUT_PATH)?)
            .query(&[("client_id", session.as_str())])
            .send()
            .await
            .map_err(map_reqwest_error)?;
        let (status, body) = Self::read_body(response).await?;
        decode_status_response(status, &body)
    }

    async fn fetch_snapshot(&self, session: &SessionId) -> Result<Snapshot, ChatError> {
        let response = self
            .http
            .get(self.endpoint(CONVERSATIONS_PATH)?)
            .query(&[("client_id", session.as_str())])
            .send()
            .await
            .map_err(map_reqwest_error)?;
        let (status, body) = Self::read_body(response).await?;
        decode_snapshot_response(status, &body)
    }

    async fn send_message(
        &self,
        session: &SessionId,
        target_id: &str,
        body: &str,
    ) -> Result<(), ChatError> {
        let response = self
            .http
            .post(self.endpoint(SEND_MESSAGE_PATH)?)
            .json(&SendMessageBody {
                to: target_id,
                message: body,
                client_id: session.as_str(),
            })
            .send()
            .await
            .map_err(map_reqwest_error)?;
        let (status, body) = Self::read_body(response).await?;
        decode_status_response(status, &body)
    }

    async fn create_group(
        &self,
        session: &SessionId,
        name: &str,
        members: &[String],
    ) -> Result<(), ChatError> {
        let response = self
            .http
            .post(self.endpoint(CREATE_GROUP_PATH)?)
            .json(&CreateGroupBody {
                group_id: name,
                members,
                client_id: session.as_str(),
            })
            .send()
            .await
            .map_err(map_reqwest_error)?;
        let (status, body) = Self::read_body(response).await?;
        decode_status_response(status, &body)
    }
}

#[derive(Serialize)]
struct ClientIdBody<'a> {
    client_id: &'a str,
}

#[derive(Serialize)]
struct SendMessageBody<'a> {
    to: &'a str,
    message: &'a str,
    client_id: &'a str,
}

#[derive(Serialize)]
struct CreateGroupBody<'a> {
    group_id: &'a str,
    members: &'a [String],
    client_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    detail: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ConversationsResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    detail: Option<Value>,
    #[serde(default)]
    conversations: Option<Vec<Conversation>>,
    #[serde(default)]
    available_clients: Option<Vec<String>>,
    #[serde(default)]
    available_groups: Option<Vec<String>>,
}

/// Ensure `join` appends below the configured prefix instead of replacing its last segment.
pub(crate) fn normalize_base_url(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url.set_query(None);
    url.set_fragment(None);
    url
}

fn decode_status_response(status: u16, body: &str) -> Result<(), ChatError> {
    let parsed = serde_json::from_str::<StatusResponse>(body);
    if !is_success(status) {
        let detail = parsed.ok().and_then(|response| response.detail);
        return Err(http_status_error(status, detail));
    }

    let response = parsed.map_err(decode_error)?;
    ensure_ok(response.status.as_deref(), response.detail)
}

fn decode_snapshot_response(status: u16, body: &str) -> Result<Snapshot, ChatError> {
    let parsed = serde_json::from_str::<ConversationsResponse>(body);
    if !is_success(status) {
        let detail = parsed.ok().and_then(|response| response.detail);
        return Err(http_status_error(status, detail));
    }

    let response = parsed.map_err(decode_error)?;
    ensure_ok(response.status.as_deref(), response.detail)?;

    Ok(Snapshot {
        conversations: response.conversations.unwrap_or_default(),
        available_peers: response.available_clients.unwrap_or_default(),
        available_groups: response.available_groups.unwrap_or_default(),
    })
}

fn is_success(status: u16) -> bool {
    (200..300).contains(&status)
}

fn ensure_ok(status: Option<&str>, detail: Option<Value>) -> Result<(), ChatError> {
    if status == Some("ok") {
        return Ok(());
    }
    Err(ChatError::status_not_ok(detail.map(detail_text)))
}

fn http_status_error(status: u16, detail: Option<Value>) -> ChatError {
    let message = detail
        .map(detail_text)
        .unwrap_or_else(|| format!("HTTP {status}"));
    ChatError::new(classify_http_status(status), "http_status", message)
}

// `detail` is usually a string but validation failures send structured JSON.
fn detail_text(detail: Value) -> String {
    match detail {
        Value::String(text) => text,
        other => other.to_string(),
    }
}

fn decode_error(err: serde_json::Error) -> ChatError {
    ChatError::new(ChatErrorCategory::Protocol, "decode_error", err.to_string())
}

fn map_reqwest_error(err: reqwest::Error) -> ChatError {
    if err.is_builder() {
        return ChatError::new(
            ChatErrorCategory::Config,
            "request_build_error",
            err.to_string(),
        );
    }
    if err.is_decode() {
        return ChatError::new(ChatErrorCategory::Protocol, "decode_error", err.to_string());
    }
    if let Some(status) = err.status() {
        return ChatError::new(
            classify_http_status(status.as_u16()),
            "http_status",
            err.to_string(),
        );
    }
    ChatError::new(ChatErrorCategory::Transport, "transport_error", err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chat_core::ConversationKind;

    #[test]
    fn base_url_gains_trailing_slash_so_prefixes_survive_join() {
        let base = normalize_base_url(Url::parse("http://chat.local:8000/bridge").expect("url"));
        assert_eq!(base.as_str(), "http://chat.local:8000/bridge/");
        assert_eq!(
            base.join(CONVERSATIONS_PATH).expect("join").as_str(),
            "http://chat.local:8000/bridge/api/conversations"
        );

        let root = normalize_base_url(Url::parse("http://localhost:8000").expect("url"));
        assert_eq!(
            root.join(SEND_MESSAGE_PATH).expect("join").as_str(),
            "http://localhost:8000/api/send-message"
        );
    }

    #[test]
    fn decodes_full_snapshot() {
        let body = r#"{
            "status": "ok",
            "conversations": [
                {"id": "bob", "type": "private", "history": [
                    {"timestamp": "09:00:00", "sender": "bob", "message": "hi"}
                ]},
                {"id": "devs", "type": "group", "history": []}
            ],
            "available_clients": ["bob", "carol"],
            "available_groups": ["devs"]
        }"#;

        let snapshot = decode_snapshot_response(200, body).expect("snapshot should decode");
        assert_eq!(snapshot.conversations.len(), 2);
        assert_eq!(snapshot.conversations[1].kind, ConversationKind::Group);
        assert_eq!(snapshot.conversations[0].history[0].body, "hi");
        assert_eq!(snapshot.available_peers, vec!["bob", "carol"]);
        assert_eq!(snapshot.available_groups, vec!["devs"]);
    }

    #[test]
    fn missing_or_null_collections_decode_as_empty() {
        let body = r#"{"status":"ok","conversations":null,"available_groups":null}"#;
        let snapshot = decode_snapshot_response(200, body).expect("snapshot should decode");
        assert_eq!(snapshot, Snapshot::default());
    }

    #[test]
    fn non_ok_status_surfaces_detail() {
        let err = decode_snapshot_response(200, r#"{"status":"error","detail":"Cliente não logado"}"#)
            .expect_err("non-ok status must fail");
        assert_eq!(err.code, "status_not_ok");
        assert_eq!(err.category, ChatErrorCategory::Protocol);
        assert_eq!(err.message, "Cliente não logado");

        let err = decode_status_response(200, r#"{"status":"error"}"#)
            .expect_err("non-ok status must fail");
        assert_eq!(err.message, "unknown error");
    }

    #[test]
    fn http_errors_use_detail_and_status_classification() {
        let err = decode_status_response(404, r#"{"detail":"Conversa não encontrada"}"#)
            .expect_err("404 must fail");
        assert_eq!(err.code, "http_status");
        assert_eq!(err.category, ChatErrorCategory::Protocol);
        assert_eq!(err.message, "Conversa não encontrada");

        let err = decode_snapshot_response(503, "<html>unavailable</html>")
            .expect_err("503 must fail");
        assert_eq!(err.category, ChatErrorCategory::Transport);
        assert_eq!(err.message, "HTTP 503");

        let err = decode_status_response(422, r#"{"detail":[{"loc":["body","to"]}]}"#)
            .expect_err("422 must fail");
        assert!(err.message.contains("loc"));
    }

    #[test]
    fn malformed_success_body_is_a_decode_error() {
        let err = decode_snapshot_response(200, "{not json").expect_err("must fail");
        assert_eq!(err.code, "decode_error");

        let err = decode_snapshot_response(200, r#"{"status":"ok","conversations":"nope"}"#)
            .expect_err("wrong shape must fail");
        assert_eq!(err.code, "decode_error");
    }

    #[test]
    fn request_bodies_use_wire_field_names() {
        let members = vec!["bob".to_owned(), "carol".to_owned()];
        let group = serde_json::to_value(CreateGroupBody {
            group_id: "devs",
            members: &members,
            client_id: "alice",
        })
        .expect("encode");
        assert_eq!(
            group,
            serde_json::json!({"group_id": "devs", "members": ["bob", "carol"], "client_id": "alice"})
        );

        let send = serde_json::to_value(SendMessageBody {
            to: "bob",
            message: "oi",
            client_id: "alice",
        })
        .expect("encode");
        assert_eq!(
            send,
            serde_json::json!({"to": "bob", "message": "oi", "client_id": "alice"})
        );
    }
}
