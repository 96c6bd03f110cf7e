use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::AccountStore;

/// A smartcard account record with its acquired items.
#[derive(Debug, Clone, Serialize)]
pub struct Account {
    pub smartcard: String,
    pub name: String,
    pub phone: String,
    pub balance: i64,
    pub items: Vec<String>,
}

/// Result of an idempotent item addition for a known smartcard.
#[derive(Debug, Clone)]
pub struct ItemAddition {
    pub added: bool,
    pub items: Vec<String>,
}

/// Result of a balance top-up.
#[derive(Debug, Clone, PartialEq)]
pub enum TopUpResult {
    Updated(i64),
    /// The signed amount would drive the balance below zero.
    Rejected,
    NotFound,
}

/// Phone verification against a known smartcard.
#[derive(Debug, Clone)]
pub struct PhoneVerification {
    pub matches: bool,
    pub name: String,
}

/// Shape of the legacy on-disk `User.json` object, keyed by smartcard number.
#[derive(Debug, Deserialize)]
struct LegacyAccount {
    #[serde(default)]
    name: String,
    #[serde(default)]
    phone: String,
    #[serde(default)]
    balance: i64,
    #[serde(default, alias = "movies")]
    items: Vec<String>,
}

impl AccountStore {
    /// Look up an account by smartcard number.
    pub async fn find(&self, smartcard: &str) -> Result<Option<Account>> {
        let conn = self.conn.lock().await;

        let row = conn.query_row(
            "SELECT smartcard, name, phone, balance FROM accounts WHERE smartcard = ?1",
            rusqlite::params![smartcard],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            },
        );

        match row {
            Ok((smartcard, name, phone, balance)) => {
                let items = Self::items_for(&conn, &smartcard)?;
                Ok(Some(Account {
                    smartcard,
                    name,
                    phone,
                    balance,
                    items,
                }))
            }
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e).context("Failed to look up account"),
        }
    }

    /// Compare the stored phone number against the supplied one.
    /// Exact string equality, no normalization.
    pub async fn verify_phone(
        &self,
        smartcard: &str,
        phone: &str,
    ) -> Result<Option<PhoneVerification>> {
        let conn = self.conn.lock().await;

        let row = conn.query_row(
            "SELECT phone, name FROM accounts WHERE smartcard = ?1",
            rusqlite::params![smartcard],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
        );

        match row {
            Ok((stored_phone, name)) => Ok(Some(PhoneVerification {
                matches: stored_phone == phone,
                name,
            })),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e).context("Failed to verify phone"),
        }
    }

    /// Add an item to the account's list; a no-op when already present.
    /// Returns None for an unknown smartcard.
    pub async fn add_item(&self, smartcard: &str, item: &str) -> Result<Option<ItemAddition>> {
        let conn = self.conn.lock().await;

        let exists: bool = conn.query_row(
            "SELECT count(*) > 0 FROM accounts WHERE smartcard = ?1",
            rusqlite::params![smartcard],
            |row| row.get(0),
        )?;
        if !exists {
            return Ok(None);
        }

        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO account_items (smartcard, item) VALUES (?1, ?2)",
                rusqlite::params![smartcard, item],
            )
            .context("Failed to add item")?;

        let items = Self::items_for(&conn, smartcard)?;
        Ok(Some(ItemAddition {
            added: inserted > 0,
            items,
        }))
    }

    /// Apply a signed amount to the account balance in a single atomic update.
    pub async fn top_up(&self, smartcard: &str, amount: i64) -> Result<TopUpResult> {
        let conn = self.conn.lock().await;

        let updated = conn.query_row(
            "UPDATE accounts
             SET balance = balance + ?2, updated_at = datetime('now')
             WHERE smartcard = ?1
             RETURNING balance",
            rusqlite::params![smartcard, amount],
            |row| row.get::<_, i64>(0),
        );

        match updated {
            Ok(balance) => Ok(TopUpResult::Updated(balance)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(TopUpResult::NotFound),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Ok(TopUpResult::Rejected)
            }
            Err(e) => Err(e).context("Failed to apply top-up"),
        }
    }

    /// Insert an account, leaving any existing row untouched.
    pub async fn insert_account(
        &self,
        smartcard: &str,
        name: &str,
        phone: &str,
        balance: i64,
    ) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT OR IGNORE INTO accounts (smartcard, name, phone, balance)
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![smartcard, name, phone, balance],
        )
        .context("Failed to insert account")?;
        Ok(())
    }

    /// All account records (admin/debug dump).
    pub async fn list_all(&self) -> Result<Vec<Account>> {
        let conn = self.conn.lock().await;

        let mut stmt = conn.prepare(
            "SELECT smartcard, name, phone, balance FROM accounts ORDER BY smartcard",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to list accounts")?;

        let mut accounts = Vec::with_capacity(rows.len());
        for (smartcard, name, phone, balance) in rows {
            let items = Self::items_for(&conn, &smartcard)?;
            accounts.push(Account {
                smartcard,
                name,
                phone,
                balance,
                items,
            });
        }
        Ok(accounts)
    }

    /// Import the legacy JSON object (`{"SC1": {"phone": ..., "balance": ...,
    /// "movies": [...]}}`) into SQLite. Existing rows win; the file is never
    /// written back. Returns the number of entries processed.
    pub async fn import_legacy_json(&self, path: &Path) -> Result<usize> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read legacy file: {}", path.display()))?;

        let legacy: HashMap<String, LegacyAccount> = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse legacy file: {}", path.display()))?;

        let conn = self.conn.lock().await;
        for (smartcard, account) in &legacy {
            conn.execute(
                "INSERT OR IGNORE INTO accounts (smartcard, name, phone, balance)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![smartcard, account.name, account.phone, account.balance],
            )
            .context("Failed to import legacy account")?;

            for item in &account.items {
                conn.execute(
                    "INSERT OR IGNORE INTO account_items (smartcard, item) VALUES (?1, ?2)",
                    rusqlite::params![smartcard, item],
                )
                .context("Failed to import legacy item")?;
            }
        }

        info!("Imported {} legacy account(s)", legacy.len());
        Ok(legacy.len())
    }

    fn items_for(conn: &Connection, smartcard: &str) -> Result<Vec<String>> {
        let mut stmt = conn.prepare(
            "SELECT item FROM account_items WHERE smartcard = ?1 ORDER BY added_at, item",
        )?;
        let items = stmt
            .query_map(rusqlite::params![smartcard], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()
            .context("Failed to load account items")?;
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    async fn store_with_account() -> AccountStore {
        let store = AccountStore::open_in_memory().unwrap();
        store
            .insert_account("SC123", "Ada Lovelace", "+447911123456", 100)
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_find_known_account() {
        let store = store_with_account().await;
        let account = store.find("SC123").await.unwrap().unwrap();
        assert_eq!(account.name, "Ada Lovelace");
        assert_eq!(account.balance, 100);
        assert!(account.items.is_empty());
    }

    #[tokio::test]
    async fn test_find_unknown_account_is_none() {
        let store = store_with_account().await;
        assert!(store.find("SC999").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_top_up_then_read_adds_amount() {
        let store = store_with_account().await;
        let result = store.top_up("SC123", 50).await.unwrap();
        assert_eq!(result, TopUpResult::Updated(150));

        let account = store.find("SC123").await.unwrap().unwrap();
        assert_eq!(account.balance, 150);
    }

    #[tokio::test]
    async fn test_negative_top_up_within_balance() {
        let store = store_with_account().await;
        let result = store.top_up("SC123", -40).await.unwrap();
        assert_eq!(result, TopUpResult::Updated(60));
    }

    #[tokio::test]
    async fn test_top_up_below_zero_is_rejected() {
        let store = store_with_account().await;
        let result = store.top_up("SC123", -500).await.unwrap();
        assert_eq!(result, TopUpResult::Rejected);

        // Balance unchanged by the rejected update.
        let account = store.find("SC123").await.unwrap().unwrap();
        assert_eq!(account.balance, 100);
    }

    #[tokio::test]
    async fn test_top_up_unknown_account() {
        let store = store_with_account().await;
        let result = store.top_up("SC999", 50).await.unwrap();
        assert_eq!(result, TopUpResult::NotFound);
    }

    #[tokio::test]
    async fn test_add_item_twice_is_idempotent() {
        let store = store_with_account().await;

        let first = store.add_item("SC123", "Inception").await.unwrap().unwrap();
        assert!(first.added);
        assert_eq!(first.items, vec!["Inception"]);

        let second = store.add_item("SC123", "Inception").await.unwrap().unwrap();
        assert!(!second.added);
        assert_eq!(second.items, vec!["Inception"]);
    }

    #[tokio::test]
    async fn test_add_item_unknown_account() {
        let store = store_with_account().await;
        assert!(store.add_item("SC999", "Inception").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_verify_phone_exact_match_only() {
        let store = store_with_account().await;

        let exact = store
            .verify_phone("SC123", "+447911123456")
            .await
            .unwrap()
            .unwrap();
        assert!(exact.matches);
        assert_eq!(exact.name, "Ada Lovelace");

        // Same number without the prefix does not match: equality is exact.
        let unprefixed = store
            .verify_phone("SC123", "447911123456")
            .await
            .unwrap()
            .unwrap();
        assert!(!unprefixed.matches);

        assert!(store
            .verify_phone("SC999", "+447911123456")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_insert_account_leaves_existing_row() {
        let store = store_with_account().await;
        store
            .insert_account("SC123", "Someone Else", "+10000000000", 0)
            .await
            .unwrap();

        let account = store.find("SC123").await.unwrap().unwrap();
        assert_eq!(account.name, "Ada Lovelace");
        assert_eq!(account.balance, 100);
    }

    #[tokio::test]
    async fn test_import_legacy_json() {
        let store = AccountStore::open_in_memory().unwrap();

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "SC1": {{"phone": "+111", "balance": 20, "movies": ["Dune", "Heat"]}},
                "SC2": {{"name": "Grace", "phone": "+222", "balance": 0, "items": ["Alien"]}}
            }}"#
        )
        .unwrap();

        let imported = store.import_legacy_json(file.path()).await.unwrap();
        assert_eq!(imported, 2);

        let sc1 = store.find("SC1").await.unwrap().unwrap();
        assert_eq!(sc1.balance, 20);
        assert_eq!(sc1.items, vec!["Dune", "Heat"]);

        let sc2 = store.find("SC2").await.unwrap().unwrap();
        assert_eq!(sc2.name, "Grace");
        assert_eq!(sc2.items, vec!["Alien"]);
    }

    #[tokio::test]
    async fn test_import_does_not_overwrite_existing() {
        let store = store_with_account().await;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"SC123": {{"phone": "+000", "balance": 999}}}}"#).unwrap();

        store.import_legacy_json(file.path()).await.unwrap();

        let account = store.find("SC123").await.unwrap().unwrap();
        assert_eq!(account.balance, 100);
        assert_eq!(account.phone, "+447911123456");
    }

    #[tokio::test]
    async fn test_list_all() {
        let store = store_with_account().await;
        store
            .insert_account("SC456", "Grace Hopper", "+15550002222", 10)
            .await
            .unwrap();

        let all = store.list_all().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].smartcard, "SC123");
        assert_eq!(all[1].smartcard, "SC456");
    }
}
