use alloy::primitives::{Address, U256};
use serde::Serialize;

use super::{CloseReason, PositionSide};
use crate::types::{self, BlockInstant};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionStatus {
    Open,
    Closed,
}

impl PositionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Closed => "closed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "open" => Some(Self::Open),
            "closed" => Some(Self::Closed),
            _ => None,
        }
    }
}

/// Lender or borrower position as recorded by the indexer.
///
/// Opening details are absent for positions activated before the chain's
/// start block, closing details are absent while the position is open.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    id: i64,
    chain_id: u64,
    #[serde(with = "types::display")]
    vault: Address,
    #[serde(with = "types::display")]
    user: Address,
    #[serde(with = "types::display")]
    position_id: U256,
    side: Option<PositionSide>,
    #[serde(with = "types::display::option")]
    strategy_id: Option<U256>,
    #[serde(with = "types::display::option")]
    principal: Option<U256>,
    #[serde(with = "types::display::option")]
    collateral: Option<U256>,
    opened: Option<BlockInstant>,
    status: PositionStatus,
    close_reason: Option<CloseReason>,
    #[serde(with = "types::display::option")]
    repaid: Option<U256>,
    #[serde(with = "types::display::option")]
    collateral_returned: Option<U256>,
    closed: Option<BlockInstant>,
}

/// Opening details of a position.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Opening {
    pub side: PositionSide,
    pub strategy_id: U256,
    pub principal: U256,
    pub collateral: U256,
    pub instant: BlockInstant,
}

/// Closing details of a position.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Closing {
    pub reason: CloseReason,
    pub repaid: U256,
    pub collateral_returned: U256,
    pub instant: BlockInstant,
}

impl Position {
    pub(crate) fn new(
        id: i64,
        chain_id: u64,
        vault: Address,
        user: Address,
        position_id: U256,
        opening: Option<Opening>,
        closing: Option<Closing>,
    ) -> Self {
        Self {
            id,
            chain_id,
            vault,
            user,
            position_id,
            side: opening.map(|o| o.side),
            strategy_id: opening.map(|o| o.strategy_id),
            principal: opening.map(|o| o.principal),
            collateral: opening.map(|o| o.collateral),
            opened: opening.map(|o| o.instant),
            status: if closing.is_some() {
                PositionStatus::Closed
            } else {
                PositionStatus::Open
            },
            close_reason: closing.map(|c| c.reason),
            repaid: closing.map(|c| c.repaid),
            collateral_returned: closing.map(|c| c.collateral_returned),
            closed: closing.map(|c| c.instant),
        }
    }

    /// Storage-assigned ID, stable once assigned.
    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn vault(&self) -> Address {
        self.vault
    }

    /// Account holding the position.
    pub fn user(&self) -> Address {
        self.user
    }

    /// ID of the position assigned by the vault.
    pub fn position_id(&self) -> U256 {
        self.position_id
    }

    pub fn side(&self) -> Option<PositionSide> {
        self.side
    }

    pub fn strategy_id(&self) -> Option<U256> {
        self.strategy_id
    }

    /// Amount lent or borrowed, in asset base units.
    pub fn principal(&self) -> Option<U256> {
        self.principal
    }

    /// Collateral locked at opening, in asset base units.
    pub fn collateral(&self) -> Option<U256> {
        self.collateral
    }

    /// Block the position was opened at.
    pub fn opened(&self) -> Option<BlockInstant> {
        self.opened
    }

    pub fn status(&self) -> PositionStatus {
        self.status
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        self.close_reason
    }

    pub fn repaid(&self) -> Option<U256> {
        self.repaid
    }

    pub fn collateral_returned(&self) -> Option<U256> {
        self.collateral_returned
    }

    /// Block the position was closed at.
    pub fn closed(&self) -> Option<BlockInstant> {
        self.closed
    }

    /// Timestamp of the closing block.
    pub fn closed_at(&self) -> Option<u64> {
        self.closed.map(|c| c.block_timestamp())
    }
}

#[cfg(test)]
mod tests {
    use alloy::primitives::address;

    use super::*;

    #[test]
    fn test_position_json() {
        let position = Position::new(
            3,
            1,
            address!("0x00000000000000000000000000000000000000f1"),
            address!("0x00000000000000000000000000000000000000c1"),
            U256::from(7),
            Some(Opening {
                side: PositionSide::Borrower,
                strategy_id: U256::from(2),
                principal: U256::from(1_000_000),
                collateral: U256::from(2_000_000),
                instant: BlockInstant::new(101, 1_700_000_101),
            }),
            Some(Closing {
                reason: CloseReason::Repaid,
                repaid: U256::from(1_050_000),
                collateral_returned: U256::from(2_000_000),
                instant: BlockInstant::new(104, 1_700_000_104),
            }),
        );
        assert_eq!(position.status(), PositionStatus::Closed);
        assert_eq!(position.closed_at(), Some(1_700_000_104));

        let json = serde_json::to_value(&position).unwrap();
        assert_eq!(json["positionId"], "7");
        assert_eq!(json["side"], "borrower");
        assert_eq!(json["status"], "closed");
        assert_eq!(json["closeReason"], "repaid");
        assert_eq!(json["repaid"], "1050000");
        assert_eq!(json["closed"]["blockTimestamp"], 1_700_000_104u64);
        assert_eq!(json["user"], position.user().to_string());
    }

    #[test]
    fn test_closure_only_position() {
        let position = Position::new(
            1,
            1,
            Address::ZERO,
            Address::ZERO,
            U256::from(1),
            None,
            Some(Closing {
                reason: CloseReason::Liquidated,
                repaid: U256::from(5),
                collateral_returned: U256::from(6),
                instant: BlockInstant::new(10, 20),
            }),
        );
        assert_eq!(position.side(), None);
        assert_eq!(position.opened(), None);
        assert_eq!(position.status(), PositionStatus::Closed);

        let json = serde_json::to_value(&position).unwrap();
        assert!(json["principal"].is_null());
    }
}
