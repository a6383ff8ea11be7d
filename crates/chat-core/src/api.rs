use std::future::Future;

use futures_util::stream::BoxStream;

use crate::{
    error::ChatError,
    types::{SessionId, Snapshot},
};

/// Inbound text frames of one push connection. The stream ends when the connection closes.
pub type PushFrames = BoxStream<'static, Result<String, ChatError>>;

/// Backend request surface used by the runtime.
///
/// Implementations perform exactly one request per call and never retry.
pub trait ChatApi: Send + Sync + 'static {
    /// Announce the identifier to the backend.
    fn login(&self, session: &SessionId) -> impl Future<Output = Result<(), ChatError>> + Send;

    /// Best-effort session release.
    fn logout(&self, session: &SessionId) -> impl Future<Output = Result<(), ChatError>> + Send;

    /// Fetch the full conversation/peer/group snapshot.
    fn fetch_snapshot(
        &self,
        session: &SessionId,
    ) -> impl Future<Output = Result<Snapshot, ChatError>> + Send;

    /// Send one message to a direct or group conversation.
    fn send_message(
        &self,
        session: &SessionId,
        target_id: &str,
        body: &str,
    ) -> impl Future<Output = Result<(), ChatError>> + Send;

    /// Create a group with the given members.
    fn create_group(
        &self,
        session: &SessionId,
        name: &str,
        members: &[String],
    ) -> impl Future<Output = Result<(), ChatError>> + Send;
}

/// Opens receive-only push connections keyed by session identifier.
pub trait PushConnector: Send + Sync + 'static {
    fn connect(
        &self,
        session: &SessionId,
    ) -> impl Future<Output = Result<PushFrames, ChatError>> + Send;
}
