//! Standard response envelope returned by the BFF.

use crate::error::FetchError;
use serde::de::DeserializeOwned;
use serde::Deserialize;

/// Message used whenever a success body does not match the expected shape.
pub const INVALID_RESPONSE_FORMAT: &str = "Invalid response format";

#[derive(Deserialize)]
pub struct Envelope<T> {
    pub data: T,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

/// Unwrap `{ "data": ... }`. Anything else fails fast as a shape mismatch
/// instead of yielding a partially filled value.
pub fn parse_envelope<T: DeserializeOwned>(body: &[u8]) -> Result<T, FetchError> {
    match serde_json::from_slice::<Envelope<T>>(body) {
        Ok(envelope) => Ok(envelope.data),
        Err(e) => {
            tracing::debug!(error = %e, "response did not match envelope");
            Err(FetchError::ShapeMismatch(INVALID_RESPONSE_FORMAT.into()))
        }
    }
}
