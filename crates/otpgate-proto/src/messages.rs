//! Handshake messages.
//!
//! Messages are internally tagged: every document carries a `"type"` field
//! naming the variant, followed by the variant's camelCase fields.
//!
//! ```json
//! {"type":"KeyRequest","function":"NEW","targetIdentity":7,"requestedSize":64}
//! ```
//!
//! Application traffic shares the clear channel with these messages. Anything
//! whose `type` is not listed in [`MessageKind`] belongs to the application.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{ConnectionIdentity, ResponseCode};

/// Every handshake message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Message {
    /// Server → client on clear accept: the identity assigned to the channel
    Welcome(Welcome),
    /// Client → server: start a rotation or revoke the active key
    KeyRequest(KeyRequest),
    /// Server → client on the encrypted channel: the new key
    KeyResponse(KeyResponse),
    /// Client → server on the clear channel, encrypted with the new key
    KeyAck(KeyAck),
    /// Server → client: activation result
    AckResponse(AckResponse),
    /// Server → client: revocation result, always cleartext
    DeleteResponse(DeleteResponse),
    /// Server → client: failure with no more specific response type
    ErrorResponse(ErrorResponse),
}

impl Message {
    /// The variant's tag.
    pub const fn kind(&self) -> MessageKind {
        match self {
            Self::Welcome(_) => MessageKind::Welcome,
            Self::KeyRequest(_) => MessageKind::KeyRequest,
            Self::KeyResponse(_) => MessageKind::KeyResponse,
            Self::KeyAck(_) => MessageKind::KeyAck,
            Self::AckResponse(_) => MessageKind::AckResponse,
            Self::DeleteResponse(_) => MessageKind::DeleteResponse,
            Self::ErrorResponse(_) => MessageKind::ErrorResponse,
        }
    }
}

/// Tag values of [`Message`] variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// `Welcome`
    Welcome,
    /// `KeyRequest`
    KeyRequest,
    /// `KeyResponse`
    KeyResponse,
    /// `KeyAck`
    KeyAck,
    /// `AckResponse`
    AckResponse,
    /// `DeleteResponse`
    DeleteResponse,
    /// `ErrorResponse`
    ErrorResponse,
}

impl MessageKind {
    /// Tag string as it appears in the `"type"` field.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Welcome => "Welcome",
            Self::KeyRequest => "KeyRequest",
            Self::KeyResponse => "KeyResponse",
            Self::KeyAck => "KeyAck",
            Self::AckResponse => "AckResponse",
            Self::DeleteResponse => "DeleteResponse",
            Self::ErrorResponse => "ErrorResponse",
        }
    }

    /// Look up a tag. `None` for application message types.
    pub fn from_tag(tag: &str) -> Option<Self> {
        [
            Self::Welcome,
            Self::KeyRequest,
            Self::KeyResponse,
            Self::KeyAck,
            Self::AckResponse,
            Self::DeleteResponse,
            Self::ErrorResponse,
        ]
        .into_iter()
        .find(|kind| kind.as_str() == tag)
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity announcement sent when a clear channel is accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Welcome {
    /// Identity the client must name in key requests and acknowledgements
    pub identity: ConnectionIdentity,
}

/// Operation requested by a [`KeyRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum KeyFunction {
    /// Generate a new key and stage it for activation
    New,
    /// Revoke the active key
    Delete,
}

/// Key rotation or revocation request.
///
/// Every field is optional on the wire so that an incomplete request is
/// answered with a precise failure code instead of being unreadable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyRequest {
    /// `NEW` or `DELETE`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<KeyFunction>,
    /// Identity of the clear channel the request is about
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_identity: Option<ConnectionIdentity>,
    /// Key size in bytes (server default when absent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested_size: Option<u32>,
}

impl KeyRequest {
    /// Request a new key for `target`.
    pub fn new_key(target: ConnectionIdentity, requested_size: Option<u32>) -> Self {
        Self { function: Some(KeyFunction::New), target_identity: Some(target), requested_size }
    }

    /// Request revocation of `target`'s active key.
    pub fn delete(target: ConnectionIdentity) -> Self {
        Self {
            function: Some(KeyFunction::Delete),
            target_identity: Some(target),
            requested_size: None,
        }
    }
}

/// Reply to `KeyRequest { NEW }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyResponse {
    /// True when `key_bytes` holds a freshly staged key
    pub success: bool,
    /// Outcome code
    pub code: ResponseCode,
    /// Human-readable reason
    pub reason: String,
    /// Raw key material (success only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_bytes: Option<Vec<u8>>,
}

impl KeyResponse {
    /// Successful response carrying the new key.
    pub fn issued(key_bytes: Vec<u8>) -> Self {
        Self {
            success: true,
            code: ResponseCode::Ok,
            reason: ResponseCode::Ok.reason().to_string(),
            key_bytes: Some(key_bytes),
        }
    }

    /// Failed response.
    pub fn failure(code: ResponseCode) -> Self {
        Self { success: false, code, reason: code.reason().to_string(), key_bytes: None }
    }
}

/// Acknowledgement that the client switched to the pending key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyAck {
    /// Identity of the clear channel being switched
    pub target_identity: ConnectionIdentity,
}

macro_rules! outcome_message {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
        #[serde(rename_all = "camelCase")]
        pub struct $name {
            /// True when the request took effect
            pub success: bool,
            /// Outcome code
            pub code: ResponseCode,
            /// Human-readable reason
            pub reason: String,
        }

        impl $name {
            /// Successful outcome.
            pub fn ok() -> Self {
                Self::from_code(ResponseCode::Ok)
            }

            /// Failed outcome.
            pub fn failure(code: ResponseCode) -> Self {
                Self::from_code(code)
            }

            fn from_code(code: ResponseCode) -> Self {
                Self { success: code.is_ok(), code, reason: code.reason().to_string() }
            }
        }
    };
}

outcome_message!(
    /// Reply to [`KeyAck`], encrypted with the newly activated key on success.
    AckResponse
);

outcome_message!(
    /// Reply to `KeyRequest { DELETE }`, always sent in the clear.
    DeleteResponse
);

/// Failure reply for requests that have no dedicated response type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    /// Outcome code
    pub code: ResponseCode,
    /// Human-readable reason
    pub reason: String,
}

impl ErrorResponse {
    /// Error reply for `code`.
    pub fn new(code: ResponseCode) -> Self {
        Self { code, reason: code.reason().to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_request_wire_shape() {
        let request = KeyRequest::new_key(ConnectionIdentity::new(7), Some(64));
        let json = serde_json::to_string(&Message::KeyRequest(request)).unwrap();
        assert_eq!(
            json,
            r#"{"type":"KeyRequest","function":"NEW","targetIdentity":7,"requestedSize":64}"#
        );
    }

    #[test]
    fn outcome_success_tracks_code() {
        assert!(AckResponse::ok().success);
        let failure = DeleteResponse::failure(ResponseCode::NoActiveKey);
        assert!(!failure.success);
        assert_eq!(failure.code, ResponseCode::NoActiveKey);
        assert_eq!(failure.reason, "no active key for identity");
    }

    #[test]
    fn kind_matches_tag() {
        let message = Message::KeyAck(KeyAck { target_identity: ConnectionIdentity::new(1) });
        assert_eq!(MessageKind::from_tag(message.kind().as_str()), Some(MessageKind::KeyAck));
        assert_eq!(MessageKind::from_tag("ChatMessage"), None);
    }
}
