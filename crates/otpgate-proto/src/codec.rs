//! Message codecs.
//!
//! A [`Codec`] turns [`Message`]s into bytes and back. Decoding is two-phase:
//! the `"type"` tag is probed first, and only documents naming a handshake
//! message are decoded in full. That split is what lets the handshake layer
//! hand application traffic through untouched while still reporting broken
//! handshake messages as protocol violations.
//!
//! JSON is the default encoding on the wire. CBOR is available for clients
//! that prefer a compact binary encoding; both decode to identical values.

use serde::Deserialize;

use crate::{
    Message, MessageKind,
    errors::{ProtocolError, Result},
};

/// Encoding used for handshake messages.
///
/// Implementations are stateless and shared across connection tasks.
pub trait Codec: Clone + Send + Sync + 'static {
    /// Serialize a message.
    fn encode(&self, message: &Message) -> Result<Vec<u8>>;

    /// Deserialize a message.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::Undecodable` if the bytes are not a tagged document
    /// - `ProtocolError::UnknownType` if the tag names no handshake message
    /// - `ProtocolError::Malformed` if a handshake message has an invalid body
    fn decode(&self, bytes: &[u8]) -> Result<Message>;
}

/// Only the tag. Every other field is ignored while probing.
#[derive(Deserialize)]
struct Probe {
    #[serde(rename = "type")]
    kind: String,
}

fn classify(probe: Probe) -> Result<MessageKind> {
    MessageKind::from_tag(&probe.kind).ok_or(ProtocolError::UnknownType(probe.kind))
}

/// JSON codec (`serde_json`).
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode(&self, message: &Message) -> Result<Vec<u8>> {
        serde_json::to_vec(message).map_err(|e| ProtocolError::Encode(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<Message> {
        let probe: Probe =
            serde_json::from_slice(bytes).map_err(|e| ProtocolError::Undecodable(e.to_string()))?;
        let kind = classify(probe)?;

        serde_json::from_slice(bytes)
            .map_err(|e| ProtocolError::Malformed { kind, reason: e.to_string() })
    }
}

/// CBOR codec (`ciborium`).
#[derive(Debug, Clone, Copy, Default)]
pub struct CborCodec;

impl Codec for CborCodec {
    fn encode(&self, message: &Message) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::ser::into_writer(message, &mut buf)
            .map_err(|e| ProtocolError::Encode(e.to_string()))?;
        Ok(buf)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Message> {
        let probe: Probe = ciborium::de::from_reader(bytes)
            .map_err(|e| ProtocolError::Undecodable(e.to_string()))?;
        let kind = classify(probe)?;

        ciborium::de::from_reader(bytes)
            .map_err(|e| ProtocolError::Malformed { kind, reason: e.to_string() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ConnectionIdentity, KeyAck, KeyFunction, KeyRequest, KeyResponse, ResponseCode};

    #[test]
    fn json_decodes_key_request() {
        let bytes = br#"{"type":"KeyRequest","function":"DELETE","targetIdentity":3}"#;
        let message = JsonCodec.decode(bytes).unwrap();

        let Message::KeyRequest(request) = message else {
            unreachable!("expected KeyRequest, got {message:?}");
        };
        assert_eq!(request.function, Some(KeyFunction::Delete));
        assert_eq!(request.target_identity, Some(ConnectionIdentity::new(3)));
        assert_eq!(request.requested_size, None);
    }

    #[test]
    fn json_request_without_function_still_decodes() {
        let message = JsonCodec.decode(br#"{"type":"KeyRequest","targetIdentity":3}"#).unwrap();
        assert_eq!(
            message,
            Message::KeyRequest(KeyRequest {
                function: None,
                target_identity: Some(ConnectionIdentity::new(3)),
                requested_size: None,
            })
        );
    }

    #[test]
    fn application_document_is_unknown_type() {
        let result = JsonCodec.decode(br#"{"type":"PlayerMoved","x":10,"y":4}"#);
        assert_eq!(result, Err(ProtocolError::UnknownType("PlayerMoved".to_string())));
    }

    #[test]
    fn garbage_is_undecodable() {
        let result = JsonCodec.decode(&[0x9F, 0x00, 0x13, 0x37]);
        assert!(matches!(result, Err(ProtocolError::Undecodable(_))));

        let result = JsonCodec.decode(br#"{"x":1}"#);
        assert!(matches!(result, Err(ProtocolError::Undecodable(_))));
    }

    #[test]
    fn bad_function_is_malformed() {
        let result = JsonCodec.decode(br#"{"type":"KeyRequest","function":"ROTATE"}"#);
        assert!(matches!(
            result,
            Err(ProtocolError::Malformed { kind: MessageKind::KeyRequest, .. })
        ));
    }

    #[test]
    fn ack_missing_identity_is_malformed() {
        let result = JsonCodec.decode(br#"{"type":"KeyAck"}"#);
        assert!(matches!(result, Err(ProtocolError::Malformed { kind: MessageKind::KeyAck, .. })));
    }

    #[test]
    fn unknown_response_code_is_malformed() {
        let result = JsonCodec
            .decode(br#"{"type":"AckResponse","success":false,"code":4242,"reason":"?"}"#);
        assert!(matches!(result, Err(ProtocolError::Malformed { .. })));
    }

    #[test]
    fn cbor_and_json_agree() {
        let messages = [
            Message::KeyAck(KeyAck { target_identity: ConnectionIdentity::new(42) }),
            Message::KeyResponse(KeyResponse::issued(vec![0xAB; 16])),
            Message::KeyResponse(KeyResponse::failure(ResponseCode::InvalidKeySize)),
        ];

        for message in messages {
            let from_json = JsonCodec.decode(&JsonCodec.encode(&message).unwrap()).unwrap();
            let from_cbor = CborCodec.decode(&CborCodec.encode(&message).unwrap()).unwrap();
            assert_eq!(from_json, message);
            assert_eq!(from_cbor, message);
        }
    }

    #[test]
    fn cbor_application_document_is_unknown_type() {
        #[derive(serde::Serialize)]
        struct Chat<'a> {
            #[serde(rename = "type")]
            kind: &'a str,
            text: &'a str,
        }

        let mut bytes = Vec::new();
        ciborium::ser::into_writer(&Chat { kind: "Chat", text: "gg" }, &mut bytes).unwrap();

        assert_eq!(CborCodec.decode(&bytes), Err(ProtocolError::UnknownType("Chat".to_string())));
    }
}
