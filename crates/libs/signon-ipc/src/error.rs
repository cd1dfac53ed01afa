use serde::{Deserialize, Serialize};

/// Numeric error codes reported by the signon daemon.
///
/// Codes are grouped by the layer that raises them: 1xx for the service,
/// 2xx for identities, 3xx for authentication sessions.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum DaemonErrorCode {
    Unknown,
    InternalServer,
    InternalCommunication,
    PermissionDenied,

    MethodNotKnown,
    ServiceNotAvailable,
    InvalidQuery,

    MethodNotAvailable,
    IdentityNotFound,
    StoreFailed,
    RemoveFailed,
    SignOutFailed,
    IdentityOperationCanceled,
    CredentialsNotAvailable,
    ReferenceNotFound,

    MechanismNotAvailable,
    MissingData,
    InvalidCredentials,
    NotAuthorized,
    WrongState,
    OperationNotSupported,
    NoConnection,
    Network,
    Ssl,
    Runtime,
    SessionCanceled,
    TimedOut,
    UserInteraction,
    OperationFailed,
    EncryptionFailed,
    TosNotAccepted,
    ForgotPassword,
    MethodOrMechanismNotAllowed,
    IncorrectDate,

    UserError,
}

impl DaemonErrorCode {
    pub fn code(self) -> u32 {
        match self {
            Self::Unknown => 1,
            Self::InternalServer => 2,
            Self::InternalCommunication => 3,
            Self::PermissionDenied => 4,
            Self::MethodNotKnown => 101,
            Self::ServiceNotAvailable => 102,
            Self::InvalidQuery => 103,
            Self::MethodNotAvailable => 201,
            Self::IdentityNotFound => 202,
            Self::StoreFailed => 203,
            Self::RemoveFailed => 204,
            Self::SignOutFailed => 205,
            Self::IdentityOperationCanceled => 206,
            Self::CredentialsNotAvailable => 207,
            Self::ReferenceNotFound => 208,
            Self::MechanismNotAvailable => 301,
            Self::MissingData => 302,
            Self::InvalidCredentials => 303,
            Self::NotAuthorized => 304,
            Self::WrongState => 305,
            Self::OperationNotSupported => 306,
            Self::NoConnection => 307,
            Self::Network => 308,
            Self::Ssl => 309,
            Self::Runtime => 310,
            Self::SessionCanceled => 311,
            Self::TimedOut => 312,
            Self::UserInteraction => 313,
            Self::OperationFailed => 314,
            Self::EncryptionFailed => 315,
            Self::TosNotAccepted => 316,
            Self::ForgotPassword => 317,
            Self::MethodOrMechanismNotAllowed => 318,
            Self::IncorrectDate => 319,
            Self::UserError => 400,
        }
    }

    /// Maps a wire code back to its variant. Unrecognised codes become `Unknown`.
    pub fn from_code(code: u32) -> Self {
        match code {
            2 => Self::InternalServer,
            3 => Self::InternalCommunication,
            4 => Self::PermissionDenied,
            101 => Self::MethodNotKnown,
            102 => Self::ServiceNotAvailable,
            103 => Self::InvalidQuery,
            201 => Self::MethodNotAvailable,
            202 => Self::IdentityNotFound,
            203 => Self::StoreFailed,
            204 => Self::RemoveFailed,
            205 => Self::SignOutFailed,
            206 => Self::IdentityOperationCanceled,
            207 => Self::CredentialsNotAvailable,
            208 => Self::ReferenceNotFound,
            301 => Self::MechanismNotAvailable,
            302 => Self::MissingData,
            303 => Self::InvalidCredentials,
            304 => Self::NotAuthorized,
            305 => Self::WrongState,
            306 => Self::OperationNotSupported,
            307 => Self::NoConnection,
            308 => Self::Network,
            309 => Self::Ssl,
            310 => Self::Runtime,
            311 => Self::SessionCanceled,
            312 => Self::TimedOut,
            313 => Self::UserInteraction,
            314 => Self::OperationFailed,
            315 => Self::EncryptionFailed,
            316 => Self::TosNotAccepted,
            317 => Self::ForgotPassword,
            318 => Self::MethodOrMechanismNotAllowed,
            319 => Self::IncorrectDate,
            400 => Self::UserError,
            _ => Self::Unknown,
        }
    }
}

/// Errors surfaced by identity, session and service operations.
///
/// `Disposed` is what every queued or in-flight operation completes with when
/// its owning object goes away before the daemon answers.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, thiserror::Error)]
#[non_exhaustive]
pub enum SignonError {
    #[error("identity not found: {message}")]
    IdentityNotFound { message: String },

    #[error("method not known: {method}")]
    MethodNotKnown { method: String },

    #[error("method not available: {method}")]
    MethodNotAvailable { method: String },

    #[error("authentication session was canceled")]
    SessionCanceled,

    #[error("object disposed")]
    Disposed,

    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },

    #[error("transport error: {message}")]
    Transport { message: String },

    #[error("protocol error: {message}")]
    Protocol { message: String },

    #[error("daemon error {}: {message}", .code.code())]
    Daemon {
        code: DaemonErrorCode,
        message: String,
    },

    #[error("not implemented: {method}")]
    NotImplemented { method: String },
}

impl SignonError {
    /// Returns `true` for transient errors that may succeed on retry.
    ///
    /// The client never retries on its own; this is advice for callers.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { .. } => true,
            Self::Daemon { code, .. } => matches!(
                code,
                DaemonErrorCode::ServiceNotAvailable
                    | DaemonErrorCode::NoConnection
                    | DaemonErrorCode::Network
                    | DaemonErrorCode::TimedOut
            ),
            _ => false,
        }
    }

    /// The daemon error code this error corresponds to, when it has one.
    pub fn daemon_code(&self) -> Option<DaemonErrorCode> {
        match self {
            Self::IdentityNotFound { .. } => Some(DaemonErrorCode::IdentityNotFound),
            Self::MethodNotKnown { .. } => Some(DaemonErrorCode::MethodNotKnown),
            Self::MethodNotAvailable { .. } => Some(DaemonErrorCode::MethodNotAvailable),
            Self::SessionCanceled => Some(DaemonErrorCode::SessionCanceled),
            Self::Daemon { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Builds the closest typed error for a code and message received off the wire.
    pub fn from_daemon(code: u32, message: impl Into<String>) -> Self {
        let message = message.into();
        match DaemonErrorCode::from_code(code) {
            DaemonErrorCode::IdentityNotFound => Self::IdentityNotFound { message },
            DaemonErrorCode::MethodNotKnown => Self::MethodNotKnown { method: message },
            DaemonErrorCode::MethodNotAvailable => Self::MethodNotAvailable { method: message },
            DaemonErrorCode::SessionCanceled => Self::SessionCanceled,
            code => Self::Daemon { code, message },
        }
    }

    pub fn identity_not_found(message: impl Into<String>) -> Self {
        Self::IdentityNotFound {
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Convenience constructor for `NotImplemented`.
    pub fn not_implemented(method: impl Into<String>) -> Self {
        Self::NotImplemented {
            method: method.into(),
        }
    }
}
