//! Messages exchanged between client and server.

use std::collections::{HashMap, HashSet};

use crate::store::{Key, Value};

/// Identifier a client attaches to a request; echoed in the reply.
pub type RequestId = i32;

/// Outcome of a register-or-authenticate request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthStatus {
    /// Known user, correct password.
    Success,
    /// Unknown user, now registered.
    SuccessNewUser,
    /// Known user, wrong password.
    WrongCredentials,
    /// The user already has an active session.
    ExistingLogin,
}

impl AuthStatus {
    /// Wire code.
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::Success => 0,
            Self::SuccessNewUser => 1,
            Self::WrongCredentials => 2,
            Self::ExistingLogin => 3,
        }
    }

    /// Parses a wire code.
    #[must_use]
    pub const fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::Success),
            1 => Some(Self::SuccessNewUser),
            2 => Some(Self::WrongCredentials),
            3 => Some(Self::ExistingLogin),
            _ => None,
        }
    }

    /// Whether the connection is authenticated after this outcome.
    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Success | Self::SuccessNewUser)
    }
}

/// A protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Store one value.
    PutRequest {
        /// Request id.
        id: RequestId,
        /// Key to write.
        key: Key,
        /// Value to store.
        value: Value,
    },
    /// Read one value.
    GetRequest {
        /// Request id.
        id: RequestId,
        /// Key to read.
        key: Key,
    },
    /// Store several values atomically.
    MultiPutRequest {
        /// Request id.
        id: RequestId,
        /// Pairs to store.
        pairs: HashMap<Key, Value>,
    },
    /// Read several values.
    MultiGetRequest {
        /// Request id.
        id: RequestId,
        /// Keys to read.
        keys: HashSet<Key>,
    },
    /// Read one value once a condition holds.
    GetWhenRequest {
        /// Request id.
        id: RequestId,
        /// Key to read.
        key: Key,
        /// Key whose value is awaited.
        key_cond: Key,
        /// Awaited value.
        value_cond: Value,
    },
    /// Acknowledges a put or multi-put.
    PutResponse {
        /// Id of the answered request.
        request_id: RequestId,
    },
    /// Answers a get or get-when.
    GetResponse {
        /// Id of the answered request.
        request_id: RequestId,
        /// Value read, `None` when the key is absent.
        value: Option<Value>,
    },
    /// Answers a multi-get.
    MultiGetResponse {
        /// Id of the answered request.
        request_id: RequestId,
        /// Pairs found.
        pairs: HashMap<Key, Value>,
    },
    /// Register-or-authenticate.
    AuthRequest {
        /// User name.
        username: String,
        /// Password.
        password: String,
    },
    /// Answers an authentication request.
    AuthResponse {
        /// Outcome.
        status: AuthStatus,
    },
    /// The request could not be executed.
    ErrorResponse {
        /// Id of the answered request.
        request_id: RequestId,
        /// What went wrong.
        message: String,
    },
}

impl Message {
    /// Message name for logs and errors.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::PutRequest { .. } => "PutRequest",
            Self::GetRequest { .. } => "GetRequest",
            Self::MultiPutRequest { .. } => "MultiPutRequest",
            Self::MultiGetRequest { .. } => "MultiGetRequest",
            Self::GetWhenRequest { .. } => "GetWhenRequest",
            Self::PutResponse { .. } => "PutResponse",
            Self::GetResponse { .. } => "GetResponse",
            Self::MultiGetResponse { .. } => "MultiGetResponse",
            Self::AuthRequest { .. } => "AuthRequest",
            Self::AuthResponse { .. } => "AuthResponse",
            Self::ErrorResponse { .. } => "ErrorResponse",
        }
    }

    /// Id of a database request.
    #[must_use]
    pub const fn id(&self) -> Option<RequestId> {
        match self {
            Self::PutRequest { id, .. }
            | Self::GetRequest { id, .. }
            | Self::MultiPutRequest { id, .. }
            | Self::MultiGetRequest { id, .. }
            | Self::GetWhenRequest { id, .. } => Some(*id),
            _ => None,
        }
    }

    /// Id of the request a database reply answers.
    #[must_use]
    pub const fn request_id(&self) -> Option<RequestId> {
        match self {
            Self::PutResponse { request_id }
            | Self::GetResponse { request_id, .. }
            | Self::MultiGetResponse { request_id, .. }
            | Self::ErrorResponse { request_id, .. } => Some(*request_id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_status_codes() {
        for status in [
            AuthStatus::Success,
            AuthStatus::SuccessNewUser,
            AuthStatus::WrongCredentials,
            AuthStatus::ExistingLogin,
        ] {
            assert_eq!(AuthStatus::from_code(status.code()), Some(status));
        }
        assert_eq!(AuthStatus::from_code(4), None);
        assert_eq!(AuthStatus::from_code(-1), None);
    }

    #[test]
    fn ids_by_direction() {
        let request = Message::GetRequest {
            id: 3,
            key: "k".to_string(),
        };
        assert_eq!(request.id(), Some(3));
        assert_eq!(request.request_id(), None);

        let reply = Message::ErrorResponse {
            request_id: 3,
            message: "boom".to_string(),
        };
        assert_eq!(reply.id(), None);
        assert_eq!(reply.request_id(), Some(3));
    }
}
