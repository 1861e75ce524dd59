//! CBOR wire codec for action envelopes.

use crate::action::ActionEnvelope;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("CBOR serialization error: {0}")]
    Encode(String),
    #[error("CBOR deserialization error: {0}")]
    Decode(String),
}

pub fn encode_action(envelope: &ActionEnvelope) -> Result<Vec<u8>, CodecError> {
    let mut buf = Vec::new();
    ciborium::into_writer(envelope, &mut buf).map_err(|e| CodecError::Encode(e.to_string()))?;
    Ok(buf)
}

pub fn decode_action(data: &[u8]) -> Result<ActionEnvelope, CodecError> {
    ciborium::from_reader(data).map_err(|e| CodecError::Decode(e.to_string()))
}
