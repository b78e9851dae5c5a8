//! Domain model of the indexed protocol state.
//!
//! Vault logs are decoded into the closed [`VaultEvent`] set, which the sync
//! engine turns into [`Position`] transitions persisted by [`crate::store`].
//! Stored [`Vault`] and [`Position`] records are what the read API serves.

mod event;
mod position;
mod vault;

pub use event::*;
pub use position::*;
pub use vault::*;
