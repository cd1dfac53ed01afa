use std::sync::Arc;

use async_trait::async_trait;

use crate::error::SignonError;
use crate::traits::{IdentityProxy, SessionProxy};
use crate::types::{IdentityRegistration, ObjectPath};

/// Entry point of the daemon: method discovery and remote object resolution.
///
/// The `*_proxy` constructors are synchronous; they bind a local proxy to an
/// already resolved path and must not wait on the daemon.
#[async_trait]
pub trait AuthServiceChannel: Send + Sync {
    /// Authentication methods the daemon has plugins for.
    async fn list_methods(&self) -> Result<Vec<String>, SignonError>;

    /// Mechanisms offered by `method`. Fails with `MethodNotKnown`.
    async fn list_mechanisms(&self, method: &str) -> Result<Vec<String>, SignonError>;

    /// Path of the authentication session object for `(identity_id, method)`.
    /// An identity id of 0 requests a session not bound to a stored identity.
    async fn resolve_session_path(
        &self,
        identity_id: u32,
        method: &str,
    ) -> Result<ObjectPath, SignonError>;

    /// Creates a fresh, unstored identity object.
    async fn register_new_identity(&self) -> Result<ObjectPath, SignonError>;

    /// Looks up a stored identity. Fails with `IdentityNotFound`.
    async fn get_identity(&self, id: u32) -> Result<IdentityRegistration, SignonError>;

    fn identity_proxy(&self, path: &ObjectPath) -> Result<Arc<dyn IdentityProxy>, SignonError>;

    fn session_proxy(&self, path: &ObjectPath) -> Result<Arc<dyn SessionProxy>, SignonError>;
}
