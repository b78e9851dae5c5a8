use alloy::primitives::Address;
use rusqlite::{OptionalExtension, params};

use super::{Store, address_from_row, unix_now};
use crate::{error::StoreError, state::Vault, viewer::VaultDescriptor};

const VAULT_COLUMNS: &str = "chain_id, address, asset, symbol, decimals, active, updated_at";

fn row_to_vault(row: &rusqlite::Row<'_>) -> rusqlite::Result<Vault> {
    let chain_id: i64 = row.get(0)?;
    let address: Vec<u8> = row.get(1)?;
    let asset: Vec<u8> = row.get(2)?;
    let updated_at: i64 = row.get(6)?;
    Ok(Vault::new(
        chain_id as u64,
        address_from_row(&address, 1)?,
        address_from_row(&asset, 2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        updated_at as u64,
    ))
}

impl Store {
    /// Upserts listed vaults as active with refreshed metadata.
    ///
    /// # Returns
    ///
    /// Number of rows inserted or changed, zero when the listing matches
    /// the stored state.
    pub async fn upsert_vaults(
        &self,
        chain_id: u64,
        vaults: Vec<VaultDescriptor>,
    ) -> Result<usize, StoreError> {
        self.with_writer(move |conn| {
            let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
            let mut written = 0;
            {
                let mut stmt = tx.prepare_cached(
                    "INSERT INTO vaults (chain_id, address, asset, symbol, decimals, active, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6)
                     ON CONFLICT (chain_id, address) DO UPDATE SET
                         asset = excluded.asset,
                         symbol = excluded.symbol,
                         decimals = excluded.decimals,
                         active = 1,
                         updated_at = excluded.updated_at
                     WHERE vaults.asset IS NOT excluded.asset
                        OR vaults.symbol IS NOT excluded.symbol
                        OR vaults.decimals IS NOT excluded.decimals
                        OR vaults.active = 0",
                )?;
                let now = unix_now();
                for vault in &vaults {
                    written += stmt.execute(params![
                        chain_id as i64,
                        vault.address.as_slice(),
                        vault.asset.as_slice(),
                        vault.symbol,
                        vault.decimals,
                        now,
                    ])?;
                }
            }
            tx.commit()?;
            Ok(written)
        })
        .await
    }

    /// Known vaults of the chain, active or not.
    pub async fn vaults(&self, chain_id: u64) -> Result<Vec<Vault>, StoreError> {
        self.with_reader(move |conn| {
            let mut stmt = conn.prepare_cached(&format!(
                "SELECT {VAULT_COLUMNS} FROM vaults WHERE chain_id = ?1 ORDER BY address"
            ))?;
            let vaults = stmt
                .query_map([chain_id as i64], row_to_vault)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(vaults)
        })
        .await
    }

    /// Addresses of the chain's active vaults, read on the writer connection
    /// like [`Self::watermark`].
    pub async fn active_vaults(&self, chain_id: u64) -> Result<Vec<Address>, StoreError> {
        self.with_writer(move |conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT address FROM vaults WHERE chain_id = ?1 AND active = 1 ORDER BY address",
            )?;
            let vaults = stmt
                .query_map([chain_id as i64], |row| {
                    let address: Vec<u8> = row.get(0)?;
                    address_from_row(&address, 0)
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(vaults)
        })
        .await
    }

    pub async fn vault(&self, chain_id: u64, address: Address) -> Result<Option<Vault>, StoreError> {
        self.with_reader(move |conn| {
            Ok(conn
                .query_row(
                    &format!(
                        "SELECT {VAULT_COLUMNS} FROM vaults WHERE chain_id = ?1 AND address = ?2"
                    ),
                    params![chain_id as i64, address.as_slice()],
                    row_to_vault,
                )
                .optional()?)
        })
        .await
    }

    /// Sets the vault's `active` flag, returns whether the row changed.
    ///
    /// Sync never deactivates vaults on its own, this is an operator action.
    pub async fn set_vault_active(
        &self,
        chain_id: u64,
        address: Address,
        active: bool,
    ) -> Result<bool, StoreError> {
        self.with_writer(move |conn| {
            let changed = conn.execute(
                "UPDATE vaults SET active = ?3, updated_at = ?4
                 WHERE chain_id = ?1 AND address = ?2 AND active IS NOT ?3",
                params![chain_id as i64, address.as_slice(), active, unix_now()],
            )?;
            Ok(changed > 0)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use alloy::primitives::address;

    use super::*;

    fn descriptor(address: Address, symbol: &str) -> VaultDescriptor {
        VaultDescriptor {
            address,
            asset: address!("0x00000000000000000000000000000000000000e1"),
            symbol: symbol.to_string(),
            decimals: 6,
        }
    }

    #[tokio::test]
    async fn test_upsert_vaults_is_idempotent() {
        let store = Store::in_memory().unwrap();
        let a = address!("0x00000000000000000000000000000000000000a1");
        let b = address!("0x00000000000000000000000000000000000000b1");

        let listing = vec![descriptor(a, "USDC"), descriptor(b, "USDT")];
        assert_eq!(store.upsert_vaults(1, listing.clone()).await.unwrap(), 2);
        assert_eq!(store.upsert_vaults(1, listing).await.unwrap(), 0);

        // Metadata change touches the changed row only
        let listing = vec![descriptor(a, "USDC.e"), descriptor(b, "USDT")];
        assert_eq!(store.upsert_vaults(1, listing).await.unwrap(), 1);

        let vaults = store.vaults(1).await.unwrap();
        assert_eq!(vaults.len(), 2);
        assert_eq!(vaults[0].symbol(), "USDC.e");
        assert!(vaults.iter().all(|v| v.active()));
        assert!(store.vaults(2).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_relisting_reactivates_vault() {
        let store = Store::in_memory().unwrap();
        let a = address!("0x00000000000000000000000000000000000000a1");
        store.upsert_vaults(1, vec![descriptor(a, "USDC")]).await.unwrap();

        assert!(store.set_vault_active(1, a, false).await.unwrap());
        assert!(!store.set_vault_active(1, a, false).await.unwrap());
        assert!(!store.vault(1, a).await.unwrap().unwrap().active());
        assert!(store.active_vaults(1).await.unwrap().is_empty());

        assert_eq!(store.upsert_vaults(1, vec![descriptor(a, "USDC")]).await.unwrap(), 1);
        assert!(store.vault(1, a).await.unwrap().unwrap().active());
    }
}
