//! Client-side proxies for the signon single-sign-on daemon.
//!
//! An [`Identity`] stands for a set of stored credentials and an
//! [`AuthSession`] for one authentication conversation using them. Both are
//! bound lazily to remote objects owned by the daemon; operations issued
//! before the binding completes are queued and replayed in order.
//!
//! ```no_run
//! # async fn demo(channel: std::sync::Arc<dyn signon_ipc::AuthServiceChannel>)
//! # -> Result<(), signon_ipc::SignonError> {
//! use signon_client::{AuthService, Identity};
//! use signon_ipc::{session_keys, IdentityInfo, SessionData};
//!
//! let service = AuthService::new(channel)?;
//! let identity = Identity::new(&service);
//! let id = identity.store(IdentityInfo::new().with_username("alice")).await?;
//!
//! let session = identity.create_session("password")?;
//! let mut data = SessionData::new();
//! data.insert(session_keys::SECRET.to_owned(), "hunter2".into());
//! let reply = session.process(data, "password").await?;
//! # let _ = (id, reply);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod gate;
pub mod identity;
pub mod registration;
pub mod reply;
pub mod service;
pub mod session;

mod dispatch;

pub use config::ServiceConfig;
pub use gate::ReadyGate;
pub use identity::{Identity, IdentityNotice};
pub use registration::RegistrationState;
pub use reply::Reply;
pub use service::{AuthService, ChannelFactory};
pub use session::{AuthSession, StateChange, PROCESS_PENDING_MESSAGE};

pub use signon_ipc::{SignonError, StubChannel};
