use alloy::primitives::keccak256;
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};

use crate::error::ApiError;

const VERSION: u8 = 1;
const PAYLOAD_LEN: usize = 1 + 8 + 8;
const CHECKSUM_LEN: usize = 4;

/// Position of the last row of a page in `(closed_at DESC, id DESC)` order.
///
/// Serialized as an opaque versioned token: `version | closed_at | id` in
/// big-endian followed by a truncated keccak256 checksum, base64url encoded
/// without padding.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageCursor {
    pub closed_at: u64,
    pub id: i64,
}

impl PageCursor {
    pub fn new(closed_at: u64, id: i64) -> Self {
        Self { closed_at, id }
    }

    pub fn encode(&self) -> String {
        let mut bytes = Vec::with_capacity(PAYLOAD_LEN + CHECKSUM_LEN);
        bytes.push(VERSION);
        bytes.extend_from_slice(&self.closed_at.to_be_bytes());
        bytes.extend_from_slice(&self.id.to_be_bytes());
        let checksum = keccak256(&bytes);
        bytes.extend_from_slice(&checksum[..CHECKSUM_LEN]);
        URL_SAFE_NO_PAD.encode(bytes)
    }

    pub fn decode(token: &str) -> Result<Self, ApiError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|e| ApiError::InvalidCursor(format!("malformed encoding: {e}")))?;
        if bytes.len() != PAYLOAD_LEN + CHECKSUM_LEN {
            return Err(ApiError::InvalidCursor(format!(
                "unexpected length {}",
                bytes.len()
            )));
        }
        if bytes[0] != VERSION {
            return Err(ApiError::InvalidCursor(format!(
                "unsupported version {}",
                bytes[0]
            )));
        }
        let (payload, checksum) = bytes.split_at(PAYLOAD_LEN);
        if keccak256(payload)[..CHECKSUM_LEN] != *checksum {
            return Err(ApiError::InvalidCursor("checksum mismatch".to_string()));
        }

        let mut closed_at = [0u8; 8];
        closed_at.copy_from_slice(&payload[1..9]);
        let mut id = [0u8; 8];
        id.copy_from_slice(&payload[9..17]);
        Ok(Self {
            closed_at: u64::from_be_bytes(closed_at),
            id: i64::from_be_bytes(id),
        })
    }
}
