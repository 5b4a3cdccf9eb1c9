use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, RwLock},
};

use crate::{AccountId, account::AccountLedgerEntry};

/// Shared, individually lockable account entry.
pub type AccountHandle = Arc<Mutex<AccountLedgerEntry>>;

/// Persistence boundary of the ledger.
///
/// Every entry sits behind its own mutex so operations on different accounts
/// never contend, while two operations on the same account are serialized.
pub trait AccountStore: Send + Sync {
    fn load(&self, account: AccountId) -> Option<AccountHandle>;

    /// Entries are created lazily, on the first accepted deposit.
    fn load_or_create(&self, account: AccountId) -> AccountHandle;

    /// All known accounts, ordered by id.
    fn accounts(&self) -> Vec<(AccountId, AccountHandle)>;
}

#[derive(Debug, Default)]
pub struct InMemoryAccountStore {
    accounts: RwLock<BTreeMap<AccountId, AccountHandle>>,
}

impl AccountStore for InMemoryAccountStore {
    fn load(&self, account: AccountId) -> Option<AccountHandle> {
        self.accounts
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&account)
            .cloned()
    }

    fn load_or_create(&self, account: AccountId) -> AccountHandle {
        if let Some(handle) = self.load(account) {
            return handle;
        }
        self.accounts
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .entry(account)
            .or_default()
            .clone()
    }

    fn accounts(&self) -> Vec<(AccountId, AccountHandle)> {
        self.accounts
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .map(|(id, handle)| (*id, handle.clone()))
            .collect()
    }
}
