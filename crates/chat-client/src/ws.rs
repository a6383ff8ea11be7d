use chat_core::{ChatError, ChatErrorCategory, PushConnector, PushFrames, SessionId};
use futures_util::StreamExt;
use tokio_tungstenite::{connect_async, tungstenite};
use url::Url;

use crate::http::normalize_base_url;

/// Opens `/ws/{client_id}` against the bridge and yields its text frames.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    base_url: Url,
}

impl WebSocketConnector {
    /// Use an explicit `ws://` or `wss://` base.
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url: normalize_base_url(base_url),
        }
    }

    /// Derive the push endpoint from the HTTP API base (`http` → `ws`, `https` → `wss`).
    pub fn from_http_base(http_base: &Url) -> Result<Self, ChatError> {
        let scheme = match http_base.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => {
                return Err(ChatError::new(
                    ChatErrorCategory::Config,
                    "unsupported_scheme",
                    format!("cannot derive push endpoint from scheme '{other}'"),
                ));
            }
        };

        let mut url = http_base.clone();
        url.set_scheme(scheme).map_err(|()| {
            ChatError::new(
                ChatErrorCategory::Config,
                "unsupported_scheme",
                format!("cannot switch {http_base} to {scheme}"),
            )
        })?;
        Ok(Self::new(url))
    }

    pub fn session_url(&self, session: &SessionId) -> Result<Url, ChatError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| {
                ChatError::new(
                    ChatErrorCategory::Config,
                    "invalid_endpoint",
                    format!("push base {} cannot carry a path", self.base_url),
                )
            })?
            .pop_if_empty()
            .push("ws")
            .push(session.as_str());
        Ok(url)
    }
}

impl PushConnector for WebSocketConnector {
    async fn connect(&self, session: &SessionId) -> Result<PushFrames, ChatError> {
        let url = self.session_url(session)?;
        let (stream, _response) = connect_async(url.as_str()).await.map_err(|err| {
            ChatError::new(ChatErrorCategory::Channel, "push_connect_failed", err.to_string())
        })?;

        let frames = stream.filter_map(|message| async move {
            match message {
                Ok(tungstenite::Message::Text(text)) => Some(Ok(text.as_str().to_owned())),
                Ok(_) => None,
                Err(err) => Some(Err(map_ws_error(err))),
            }
        });
        Ok(frames.boxed())
    }
}

fn map_ws_error(err: tungstenite::Error) -> ChatError {
    match err {
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
            ChatError::new(ChatErrorCategory::Channel, "push_closed", err.to_string())
        }
        other => ChatError::new(ChatErrorCategory::Channel, "push_error", other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(id: &str) -> SessionId {
        SessionId::parse(id).expect("valid session id")
    }

    #[test]
    fn derives_ws_endpoint_from_http_base() {
        let base = Url::parse("http://localhost:8000").expect("url");
        let connector = WebSocketConnector::from_http_base(&base).expect("http maps to ws");
        assert_eq!(
            connector.session_url(&session("alice")).expect("url").as_str(),
            "ws://localhost:8000/ws/alice"
        );

        let secure = Url::parse("https://chat.example.org/bridge/").expect("url");
        let connector = WebSocketConnector::from_http_base(&secure).expect("https maps to wss");
        assert_eq!(
            connector.session_url(&session("bob")).expect("url").as_str(),
            "wss://chat.example.org/bridge/ws/bob"
        );
    }

    #[test]
    fn session_id_is_percent_encoded_as_one_segment() {
        let connector = WebSocketConnector::new(Url::parse("ws://localhost:8000").expect("url"));
        let url = connector
            .session_url(&session("ana maria/2"))
            .expect("url should build");
        assert_eq!(url.as_str(), "ws://localhost:8000/ws/ana%20maria%2F2");
    }

    #[test]
    fn rejects_non_http_schemes() {
        let base = Url::parse("ftp://localhost/").expect("url");
        let err = WebSocketConnector::from_http_base(&base).expect_err("ftp must be rejected");
        assert_eq!(err.code, "unsupported_scheme");
    }
}
