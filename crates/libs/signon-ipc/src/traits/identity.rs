use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::SignonError;
use crate::types::{IdentityEvent, IdentityInfo};

/// Remote identity object bound to one object path.
#[async_trait]
pub trait IdentityProxy: Send + Sync {
    /// Persists `info` and returns the id assigned by the daemon.
    async fn store(&self, info: &IdentityInfo) -> Result<u32, SignonError>;

    async fn remove(&self) -> Result<(), SignonError>;

    async fn sign_out(&self) -> Result<bool, SignonError>;

    async fn verify_secret(&self, secret: &str) -> Result<bool, SignonError>;

    async fn get_info(&self) -> Result<IdentityInfo, SignonError>;

    /// Subscribe to change and unregistration notifications.
    fn subscribe(&self) -> broadcast::Receiver<IdentityEvent>;
}
