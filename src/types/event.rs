use alloy::primitives::TxHash;

use super::{BlockInstant, LogPosition};

/// Event along with its chain context.
#[derive(Clone, Debug)]
pub struct EventContext<T> {
    pub(crate) tx_hash: TxHash,
    pub(crate) log_index: u64,
    pub(crate) instant: BlockInstant,
    pub(crate) event: T,
}

impl<T> EventContext<T> {
    pub fn new(tx_hash: TxHash, log_index: u64, instant: BlockInstant, event: T) -> Self {
        Self {
            tx_hash,
            log_index,
            instant,
            event,
        }
    }

    pub fn tx_hash(&self) -> TxHash {
        self.tx_hash
    }

    pub fn log_index(&self) -> u64 {
        self.log_index
    }

    /// Block the event was emitted in.
    pub fn instant(&self) -> BlockInstant {
        self.instant
    }

    pub fn position(&self) -> LogPosition {
        LogPosition::new(self.instant.block_number(), self.log_index)
    }

    pub fn event(&self) -> &T {
        &self.event
    }
}
