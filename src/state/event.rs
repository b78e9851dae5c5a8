use alloy::{
    primitives::{Address, B256, TxHash, U256},
    rpc::types::Log,
};
use alloy_sol_types::SolEvent;
use serde::Serialize;

use crate::{
    abi::vault::ILendingVault,
    error::DecodeError,
    types::{BlockInstant, EventContext, LogPosition},
};

/// Side of the position in the vault.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionSide {
    Lender = 0,
    Borrower = 1,
}

impl PositionSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lender => "lender",
            Self::Borrower => "borrower",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "lender" => Some(Self::Lender),
            "borrower" => Some(Self::Borrower),
            _ => None,
        }
    }
}

impl TryFrom<u8> for PositionSide {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Lender),
            1 => Ok(Self::Borrower),
            _ => Err(DecodeError::InvalidSide(value)),
        }
    }
}

/// How the position got closed.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CloseReason {
    Repaid,
    Liquidated,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Repaid => "repaid",
            Self::Liquidated => "liquidated",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "repaid" => Some(Self::Repaid),
            "liquidated" => Some(Self::Liquidated),
            _ => None,
        }
    }
}

/// Vault log decoded into the closed set of events the indexer reacts to.
#[derive(Clone, derive_more::Debug, PartialEq, Eq)]
pub enum VaultEvent {
    /// Position opened.
    Activated(Activation),

    /// Position closed by repayment or liquidation.
    Closed(Closure),

    /// Log with a topic the indexer does not track, carries `topic0` if any.
    Unknown(Option<B256>),
}

/// Details of an opened position.
#[derive(Clone, derive_more::Debug, PartialEq, Eq)]
pub struct Activation {
    pub user: Address,
    #[debug("{position_id}")]
    pub position_id: U256,
    #[debug("{strategy_id}")]
    pub strategy_id: U256,
    pub side: PositionSide,
    #[debug("{principal}")]
    pub principal: U256,
    #[debug("{collateral}")]
    pub collateral: U256,
}

/// Terminal figures of a closed position.
///
/// For liquidations `repaid` is the debt covered by the liquidator and
/// `collateral_returned` the collateral seized.
#[derive(Clone, derive_more::Debug, PartialEq, Eq)]
pub struct Closure {
    pub user: Address,
    #[debug("{position_id}")]
    pub position_id: U256,
    pub reason: CloseReason,
    #[debug("{repaid}")]
    pub repaid: U256,
    #[debug("{collateral_returned}")]
    pub collateral_returned: U256,
    pub liquidator: Option<Address>,
}

impl VaultEvent {
    /// Decodes the log data by its `topic0`.
    ///
    /// Logs with unknown or missing `topic0` decode into [`VaultEvent::Unknown`],
    /// known topics with malformed data fail.
    pub fn decode(log: &alloy::primitives::Log) -> Result<Self, DecodeError> {
        let Some(topic0) = log.topics().first().copied() else {
            return Ok(Self::Unknown(None));
        };

        if topic0 == ILendingVault::PositionActivated::SIGNATURE_HASH {
            let e = ILendingVault::PositionActivated::decode_log_data(&log.data)?;
            Ok(Self::Activated(Activation {
                user: e.user,
                position_id: e.positionId,
                strategy_id: e.strategyId,
                side: PositionSide::try_from(e.side)?,
                principal: e.principal,
                collateral: e.collateral,
            }))
        } else if topic0 == ILendingVault::PositionRepaid::SIGNATURE_HASH {
            let e = ILendingVault::PositionRepaid::decode_log_data(&log.data)?;
            Ok(Self::Closed(Closure {
                user: e.user,
                position_id: e.positionId,
                reason: CloseReason::Repaid,
                repaid: e.repaid,
                collateral_returned: e.collateralReturned,
                liquidator: None,
            }))
        } else if topic0 == ILendingVault::PositionLiquidated::SIGNATURE_HASH {
            let e = ILendingVault::PositionLiquidated::decode_log_data(&log.data)?;
            Ok(Self::Closed(Closure {
                user: e.user,
                position_id: e.positionId,
                reason: CloseReason::Liquidated,
                repaid: e.debtCovered,
                collateral_returned: e.collateralSeized,
                liquidator: Some(e.liquidator),
            }))
        } else {
            Ok(Self::Unknown(Some(topic0)))
        }
    }

    /// Stable name of the event kind as persisted in event records.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Activated(_) => "activated",
            Self::Closed(c) => c.reason.as_str(),
            Self::Unknown(_) => "unknown",
        }
    }

    /// Arguments of the event as persisted in event records.
    pub fn args(&self) -> serde_json::Value {
        match self {
            Self::Activated(a) => serde_json::json!({
                "user": a.user.to_string(),
                "positionId": a.position_id.to_string(),
                "strategyId": a.strategy_id.to_string(),
                "side": a.side.as_str(),
                "principal": a.principal.to_string(),
                "collateral": a.collateral.to_string(),
            }),
            Self::Closed(c) => serde_json::json!({
                "user": c.user.to_string(),
                "positionId": c.position_id.to_string(),
                "repaid": c.repaid.to_string(),
                "collateralReturned": c.collateral_returned.to_string(),
                "liquidator": c.liquidator.map(|l| l.to_string()),
            }),
            Self::Unknown(topic0) => serde_json::json!({
                "topic0": topic0.map(|t| t.to_string()),
            }),
        }
    }
}

/// Vault event decoded from an RPC log, before its block timestamp is known.
#[derive(Clone, Debug)]
pub struct DecodedLog {
    pub position: LogPosition,
    pub tx_hash: TxHash,
    pub block_timestamp: Option<u64>,
    pub event: VaultEvent,
}

impl DecodedLog {
    /// Decodes the RPC log, which has to carry its mined location.
    pub fn from_rpc(log: &Log) -> Result<Self, DecodeError> {
        let block_number = log
            .block_number
            .ok_or(DecodeError::MissingField("block number"))?;
        let log_index = log.log_index.ok_or(DecodeError::MissingField("log index"))?;
        let tx_hash = log
            .transaction_hash
            .ok_or(DecodeError::MissingField("transaction hash"))?;
        Ok(Self {
            position: LogPosition::new(block_number, log_index),
            tx_hash,
            block_timestamp: log.block_timestamp,
            event: VaultEvent::decode(&log.inner)?,
        })
    }

    pub fn with_timestamp(self, block_timestamp: u64) -> EventContext<VaultEvent> {
        EventContext::new(
            self.tx_hash,
            self.position.log_index,
            BlockInstant::new(self.position.block_number, block_timestamp),
            self.event,
        )
    }
}

#[cfg(test)]
mod tests {
    use alloy::primitives::{LogData, address, b256};

    use super::*;

    fn rpc_log(data: LogData) -> Log {
        Log {
            inner: alloy::primitives::Log {
                address: address!("0x00000000000000000000000000000000000000f1"),
                data,
            },
            block_number: Some(101),
            log_index: Some(3),
            transaction_hash: Some(b256!(
                "0x1111111111111111111111111111111111111111111111111111111111111111"
            )),
            ..Default::default()
        }
    }

    #[test]
    fn test_decode_activation() {
        let user = address!("0x00000000000000000000000000000000000000c1");
        let data = ILendingVault::PositionActivated {
            user,
            positionId: U256::from(7),
            strategyId: U256::from(2),
            side: 1,
            principal: U256::from(1_000_000),
            collateral: U256::from(2_000_000),
        }
        .encode_log_data();

        let decoded = DecodedLog::from_rpc(&rpc_log(data)).unwrap();
        assert_eq!(decoded.position, LogPosition::new(101, 3));
        assert_eq!(decoded.block_timestamp, None);
        assert_eq!(
            decoded.event,
            VaultEvent::Activated(Activation {
                user,
                position_id: U256::from(7),
                strategy_id: U256::from(2),
                side: PositionSide::Borrower,
                principal: U256::from(1_000_000),
                collateral: U256::from(2_000_000),
            })
        );
        assert_eq!(decoded.event.kind(), "activated");
    }

    #[test]
    fn test_decode_liquidation() {
        let liquidator = address!("0x00000000000000000000000000000000000000d1");
        let data = ILendingVault::PositionLiquidated {
            user: address!("0x00000000000000000000000000000000000000c1"),
            positionId: U256::from(7),
            liquidator,
            debtCovered: U256::from(900),
            collateralSeized: U256::from(1200),
        }
        .encode_log_data();

        let event = DecodedLog::from_rpc(&rpc_log(data)).unwrap().event;
        let VaultEvent::Closed(closure) = event else {
            panic!("unexpected event: {event:?}");
        };
        assert_eq!(closure.reason, CloseReason::Liquidated);
        assert_eq!(closure.repaid, U256::from(900));
        assert_eq!(closure.collateral_returned, U256::from(1200));
        assert_eq!(closure.liquidator, Some(liquidator));
    }

    #[test]
    fn test_decode_unknown_topic() {
        let topic = b256!("0x2222222222222222222222222222222222222222222222222222222222222222");
        let data = LogData::new_unchecked(vec![topic], Default::default());
        let decoded = DecodedLog::from_rpc(&rpc_log(data)).unwrap();
        assert_eq!(decoded.event, VaultEvent::Unknown(Some(topic)));

        let decoded = DecodedLog::from_rpc(&rpc_log(LogData::default())).unwrap();
        assert_eq!(decoded.event, VaultEvent::Unknown(None));
    }

    #[test]
    fn test_decode_failures() {
        let data = ILendingVault::PositionActivated {
            user: Address::ZERO,
            positionId: U256::from(1),
            strategyId: U256::ZERO,
            side: 5,
            principal: U256::ZERO,
            collateral: U256::ZERO,
        }
        .encode_log_data();
        assert!(matches!(
            DecodedLog::from_rpc(&rpc_log(data)),
            Err(DecodeError::InvalidSide(5))
        ));

        // Known topic with truncated data
        let data = LogData::new_unchecked(
            vec![
                ILendingVault::PositionRepaid::SIGNATURE_HASH,
                B256::ZERO,
                B256::ZERO,
            ],
            vec![0u8; 7].into(),
        );
        assert!(matches!(
            DecodedLog::from_rpc(&rpc_log(data)),
            Err(DecodeError::Abi(_))
        ));

        let mut log = rpc_log(LogData::default());
        log.log_index = None;
        assert!(matches!(
            DecodedLog::from_rpc(&log),
            Err(DecodeError::MissingField("log index"))
        ));
    }
}
