use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::SignonError;
use crate::types::{SessionData, SessionEvent};

/// Remote authentication session object bound to one object path.
#[async_trait]
pub trait SessionProxy: Send + Sync {
    /// Intersection of `wanted` with the mechanisms the session supports.
    async fn query_available_mechanisms(
        &self,
        wanted: &[String],
    ) -> Result<Vec<String>, SignonError>;

    async fn process(
        &self,
        session_data: &SessionData,
        mechanism: &str,
    ) -> Result<SessionData, SignonError>;

    async fn cancel(&self) -> Result<(), SignonError>;

    async fn set_id(&self, id: u32) -> Result<(), SignonError>;

    /// Timeout applied to calls on this proxy. `None` means unbounded.
    fn set_default_timeout(&self, timeout: Option<Duration>);

    /// Subscribe to state-change and unregistration notifications.
    fn subscribe(&self) -> broadcast::Receiver<SessionEvent>;
}
