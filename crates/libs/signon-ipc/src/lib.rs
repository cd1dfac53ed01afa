//! Interface boundary for the signon daemon.
//!
//! This crate defines what the client proxies need from a transport to the
//! single-sign-on daemon. It provides:
//!
//! - **Wire types** for identities, session data, state codes and events
//! - **Async collaborator traits** implemented by a bus binding
//! - **`StubChannel`** returning `NotImplemented` for every method
//! - **`SignonError`** with the daemon's error codes
//!
//! # Trait layout
//!
//! - [`AuthServiceChannel`]: method discovery and object path resolution
//! - [`IdentityProxy`]: calls and events of one remote identity
//! - [`SessionProxy`]: calls and events of one remote authentication session

pub mod error;
pub mod traits;
pub mod types;

pub use error::{DaemonErrorCode, SignonError};
pub use traits::{AuthServiceChannel, IdentityProxy, SessionProxy};
pub use types::*;

mod stub;
pub use stub::StubChannel;
