//! Managers for several accounts over one connection

use std::sync::Arc;

use dashmap::DashMap;
use futures::future::join_all;
use rtxn_ledger_core::{AccountId, Signer};
use tracing::{debug, info};

use crate::config::SubmitConfig;
use crate::connection::Connection;
use crate::error::{SubmitError, SubmitResult};
use crate::manager::TransactionManager;

/// One [`TransactionManager`] per account, sharing a connection
///
/// Owned by the caller and passed around explicitly.
pub struct ManagerSet {
    connection: Arc<dyn Connection>,
    config: SubmitConfig,
    managers: DashMap<AccountId, TransactionManager>,
}

impl ManagerSet {
    pub fn new(connection: Arc<dyn Connection>, config: SubmitConfig) -> Self {
        Self {
            connection,
            config,
            managers: DashMap::new(),
        }
    }

    /// Start a manager for the signer's account
    pub async fn add_account(&self, signer: Arc<dyn Signer>) -> SubmitResult<TransactionManager> {
        let account = signer.account().clone();
        if self.managers.contains_key(&account) {
            return Err(SubmitError::DuplicateAccount(account));
        }
        let manager = TransactionManager::start(self.connection.clone(), signer, self.config.clone()).await?;
        // Another task may have raced us while the manager was starting.
        if self.managers.contains_key(&account) {
            manager.shutdown().await?;
            return Err(SubmitError::DuplicateAccount(account));
        }
        self.managers.insert(account.clone(), manager.clone());
        info!(%account, accounts = self.managers.len(), "account added");
        Ok(manager)
    }

    pub fn get(&self, account: &AccountId) -> Option<TransactionManager> {
        self.managers.get(account).map(|entry| entry.value().clone())
    }

    pub fn accounts(&self) -> Vec<AccountId> {
        self.managers.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.managers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.managers.is_empty()
    }

    /// Stop and forget one account's manager
    pub async fn remove(&self, account: &AccountId) -> SubmitResult<()> {
        let (_, manager) = self
            .managers
            .remove(account)
            .ok_or_else(|| SubmitError::Internal(format!("no manager for {}", account)))?;
        debug!(%account, "removing account");
        manager.shutdown().await
    }

    /// Stop every manager
    pub async fn shutdown_all(&self) {
        let managers: Vec<TransactionManager> = self.managers.iter().map(|entry| entry.value().clone()).collect();
        self.managers.clear();
        let results = join_all(managers.iter().map(|manager| manager.shutdown())).await;
        for (manager, result) in managers.iter().zip(results) {
            if let Err(e) = result {
                debug!(account = %manager.account(), error = %e, "manager already stopped");
            }
        }
    }
}
