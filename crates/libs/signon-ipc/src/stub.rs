use std::sync::Arc;

use async_trait::async_trait;

use crate::error::SignonError;
use crate::traits::*;
use crate::types::*;

/// A channel that answers `NotImplemented` for every method.
///
/// Stands in for the daemon where no bus connection exists, so objects can be
/// constructed and their operations fail in a well-defined way.
pub struct StubChannel;

#[async_trait]
impl AuthServiceChannel for StubChannel {
    async fn list_methods(&self) -> Result<Vec<String>, SignonError> {
        Err(SignonError::not_implemented("list_methods"))
    }

    async fn list_mechanisms(&self, _method: &str) -> Result<Vec<String>, SignonError> {
        Err(SignonError::not_implemented("list_mechanisms"))
    }

    async fn resolve_session_path(
        &self,
        _identity_id: u32,
        _method: &str,
    ) -> Result<ObjectPath, SignonError> {
        Err(SignonError::not_implemented("resolve_session_path"))
    }

    async fn register_new_identity(&self) -> Result<ObjectPath, SignonError> {
        Err(SignonError::not_implemented("register_new_identity"))
    }

    async fn get_identity(&self, _id: u32) -> Result<IdentityRegistration, SignonError> {
        Err(SignonError::not_implemented("get_identity"))
    }

    fn identity_proxy(&self, _path: &ObjectPath) -> Result<Arc<dyn IdentityProxy>, SignonError> {
        Err(SignonError::not_implemented("identity_proxy"))
    }

    fn session_proxy(&self, _path: &ObjectPath) -> Result<Arc<dyn SessionProxy>, SignonError> {
        Err(SignonError::not_implemented("session_proxy"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stub_returns_not_implemented() {
        let stub = StubChannel;

        let err = stub.list_methods()
            .await
            .expect_err("should be NotImplemented");
        assert_eq!(
            err,
            SignonError::NotImplemented {
                method: "list_methods".into()
            }
        );
        assert!(!err.is_retryable());

        assert!(stub.list_mechanisms("password").await.is_err());
        assert!(stub.resolve_session_path(0, "password").await.is_err());
        assert!(stub.register_new_identity().await.is_err());
        assert!(stub.get_identity(7).await.is_err());

        let path = ObjectPath::from("/com/google/code/AccountsSSO/SingleSignOn/Identity/1");
        assert!(stub.identity_proxy(&path).is_err());
        assert!(stub.session_proxy(&path).is_err());
    }
}
