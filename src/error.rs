use std::{fmt::Display, time::Duration};

use alloy::{contract, providers::MulticallError, sol_types, transports};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::{error, warn};

/// Failure of a single call against a single RPC endpoint.
///
/// [`crate::rpc::RpcPool`] decides from the variant whether the next endpoint
/// is worth trying.
#[derive(Debug, thiserror::Error)]
pub enum EndpointError {
    #[error("fatal error: {0}")]
    Fatal(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("unexpected empty RPC response")]
    NullResp,

    #[error("call reverted: {0}")]
    Reverted(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("call timed out after {0:?}")]
    Timeout(Duration),
}

impl EndpointError {
    /// Contract reverts are well-formed answers any other endpoint would
    /// repeat, everything else may be local to the endpoint.
    pub fn is_endpoint_fault(&self) -> bool {
        !matches!(self, Self::Reverted(_))
    }
}

impl From<contract::Error> for EndpointError {
    fn from(value: contract::Error) -> Self {
        match value {
            contract::Error::UnknownFunction(_) => Self::Fatal(value.to_string()),
            contract::Error::UnknownSelector(_) => Self::Fatal(value.to_string()),
            contract::Error::NotADeploymentTransaction => Self::Fatal(value.to_string()),
            contract::Error::ContractNotDeployed => Self::Fatal(value.to_string()),
            contract::Error::ZeroData(_, _) => Self::Fatal(value.to_string()),
            contract::Error::AbiError(_) => Self::Fatal(value.to_string()),
            contract::Error::TransportError(rpc_err) => Self::from(rpc_err),
            contract::Error::PendingTransactionError(err) => Self::Transport(err.to_string()),
        }
    }
}

impl<E: Display> From<transports::RpcError<E>> for EndpointError {
    fn from(value: transports::RpcError<E>) -> Self {
        match value {
            transports::RpcError::ErrorResp(ref resp) => {
                let msg = resp.message.to_ascii_lowercase();
                if resp.code == 3 && msg.contains("reverted") {
                    Self::Reverted(resp.message.to_string())
                } else if (resp.code == -32600 || resp.code == -32601 || resp.code == -32602)
                    && (msg.contains("invalid") || msg.contains("not found"))
                {
                    Self::InvalidRequest(msg)
                } else {
                    Self::Transport(value.to_string())
                }
            }
            transports::RpcError::NullResp => Self::NullResp,
            _ => Self::Transport(value.to_string()),
        }
    }
}

impl From<sol_types::Error> for EndpointError {
    fn from(value: sol_types::Error) -> Self {
        Self::Fatal(value.to_string())
    }
}

impl From<MulticallError> for EndpointError {
    fn from(value: MulticallError) -> Self {
        match value {
            MulticallError::ValueTx => Self::InvalidRequest(value.to_string()),
            MulticallError::DecodeError(_) => Self::Fatal(value.to_string()),
            MulticallError::NoReturnData => Self::NullResp,
            MulticallError::CallFailed(bytes) => Self::Reverted(bytes.to_string()),
            MulticallError::TransportError(rpc_err) => Self::from(rpc_err),
        }
    }
}

/// Failure of a sync unit (chain or vault). Never fatal to the whole pass.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("chain {chain_id} unavailable, {attempts} endpoint(s) failed, last error: {last}")]
    ChainUnavailable {
        chain_id: u64,
        attempts: usize,
        last: String,
    },

    #[error("chain {chain_id} read failed: {reason}")]
    ChainRead { chain_id: u64, reason: String },

    #[error("storage error: {0}")]
    Storage(#[from] StoreError),
}

impl SyncError {
    /// Indicates the failure concerns the chain as a whole rather than a
    /// single vault.
    pub fn is_chain_level(&self) -> bool {
        matches!(self, Self::ChainUnavailable { .. })
    }
}

/// Single log that could not be turned into a vault event.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("log is missing {0}")]
    MissingField(&'static str),

    #[error("abi decode failed: {0}")]
    Abi(String),

    #[error("unknown position side: {0}")]
    InvalidSide(u8),
}

impl From<sol_types::Error> for DecodeError {
    fn from(value: sol_types::Error) -> Self {
        Self::Abi(value.to_string())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(String),

    #[error("connection pool error: {0}")]
    Pool(String),

    #[error("migration {version} failed: {reason}")]
    Migration { version: u32, reason: String },

    #[error("transaction timed out after {0:?}")]
    Timeout(Duration),

    #[error("storage task failed: {0}")]
    Task(String),

    #[error("writer lock poisoned")]
    Poisoned,
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Sqlite(err.to_string())
    }
}

impl From<r2d2::Error> for StoreError {
    fn from(err: r2d2::Error) -> Self {
        StoreError::Pool(err.to_string())
    }
}

/// Read API failure with a stable [`ApiError::kind`].
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("chain {0} is not configured")]
    UnknownChain(u64),

    #[error("invalid cursor: {0}")]
    InvalidCursor(String),

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("enrichment unavailable for chain {chain_id}: {reason}")]
    EnrichmentUnavailable { chain_id: u64, reason: String },

    #[error("storage error: {0}")]
    Storage(#[from] StoreError),
}

impl ApiError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidAddress(_) => "INVALID_ADDRESS",
            Self::UnknownChain(_) => "UNKNOWN_CHAIN",
            Self::InvalidCursor(_) => "INVALID_CURSOR",
            Self::InvalidQuery(_) => "INVALID_QUERY",
            Self::EnrichmentUnavailable { .. } => "ENRICHMENT_UNAVAILABLE",
            Self::Storage(_) => "STORAGE_ERROR",
        }
    }
}

/// JSON error body of the HTTP API.
#[derive(serde::Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, details) = match &self {
            Self::InvalidAddress(_)
            | Self::UnknownChain(_)
            | Self::InvalidCursor(_)
            | Self::InvalidQuery(_) => (StatusCode::BAD_REQUEST, None),
            Self::EnrichmentUnavailable { reason, .. } => {
                warn!(%reason, "Enrichment unavailable");
                (StatusCode::SERVICE_UNAVAILABLE, Some(reason.clone()))
            }
            Self::Storage(err) => {
                // Storage details stay in the logs
                error!(%err, "Storage error while serving request");
                (StatusCode::INTERNAL_SERVER_ERROR, None)
            }
        };
        let error = match &self {
            Self::EnrichmentUnavailable { chain_id, .. } => {
                format!("live data for chain {chain_id} is currently unavailable")
            }
            Self::Storage(_) => "storage error occurred".to_string(),
            _ => self.to_string(),
        };
        let body = ErrorResponse {
            error,
            code: self.kind(),
            details,
        };
        (status, Json(body)).into_response()
    }
}
