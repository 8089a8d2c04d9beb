//! Account auto-creation
//!
//! An account comes into existence when a minimal transfer lands on the
//! address derived from the key alias. Creation is confirmed by polling the
//! replica, then announced with a `BIND` event.

use std::sync::Arc;
use std::time::Duration;

use binding_ledger::{LedgerTransfer, ReplicaQuery};
use binding_registry::BindingRegistry;
use binding_types::{AccountId, BindArgs, Chain, EvmAddress, IdentityEvent, Subject};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::error::ProvisionError;
use crate::publisher::EventPublisher;

/// Provisioning settings
#[derive(Clone, Debug)]
pub struct ProvisionConfig {
    pub poll_attempts: u32,
    /// Delay before each poll.
    pub poll_interval: Duration,
    pub funding_amount: u64,
    pub chain: Chain,
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            poll_attempts: 10,
            poll_interval: Duration::from_millis(500),
            funding_amount: 1,
            chain: Chain::Testnet,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ProvisionOutcome {
    pub account_id: AccountId,
    /// Funding transfer reference; `None` when the account already existed.
    pub tx_ref: Option<String>,
    pub was_created: bool,
}

/// Creates ledger accounts for keys that have none.
pub struct Provisioner {
    replica: Arc<dyn ReplicaQuery>,
    transfer: Arc<dyn LedgerTransfer>,
    registry: Arc<BindingRegistry>,
    publisher: EventPublisher,
    config: ProvisionConfig,
}

impl Provisioner {
    pub fn new(
        replica: Arc<dyn ReplicaQuery>,
        transfer: Arc<dyn LedgerTransfer>,
        registry: Arc<BindingRegistry>,
        publisher: EventPublisher,
        config: ProvisionConfig,
    ) -> Self {
        Self {
            replica,
            transfer,
            registry,
            publisher,
            config,
        }
    }

    /// Ensure an account exists for `alias` and is bound to `issuer`.
    ///
    /// Not safe to run concurrently for one alias; callers serialize through
    /// the identity lock.
    #[instrument(skip(self, alias, issuer, contact_hash), fields(alias = %alias, subject = %issuer))]
    pub async fn provision(
        &self,
        alias: &EvmAddress,
        issuer: &Subject,
        contact_hash: Option<String>,
    ) -> Result<ProvisionOutcome, ProvisionError> {
        if let Some(account_id) = self
            .replica
            .lookup_account(alias)
            .await
            .map_err(ProvisionError::Replica)?
        {
            info!(account_id = %account_id, "Account already exists");
            return Ok(ProvisionOutcome {
                account_id,
                tx_ref: None,
                was_created: false,
            });
        }

        let receipt = self
            .transfer
            .fund_alias(alias, self.config.funding_amount)
            .await
            .map_err(ProvisionError::Transfer)?;
        info!(tx_ref = %receipt.tx_ref, amount = self.config.funding_amount, "Submitted auto-create transfer");

        let account_id = self.await_account(alias, &receipt.tx_ref).await?;

        let event = IdentityEvent::bind(
            self.config.chain,
            BindArgs {
                issuer: issuer.clone(),
                account_id: account_id.clone(),
                evm_address: alias.as_str().to_string(),
                create_tx_id: Some(receipt.tx_ref.clone()),
                contact_hash,
            },
        );
        self.registry.apply(&event);
        self.publisher.publish_async(event);

        info!(account_id = %account_id, "Account provisioned");
        Ok(ProvisionOutcome {
            account_id,
            tx_ref: Some(receipt.tx_ref),
            was_created: true,
        })
    }

    async fn await_account(
        &self,
        alias: &EvmAddress,
        tx_ref: &str,
    ) -> Result<AccountId, ProvisionError> {
        for attempt in 1..=self.config.poll_attempts {
            tokio::time::sleep(self.config.poll_interval).await;

            match self.replica.lookup_account(alias).await {
                Ok(Some(account_id)) => {
                    debug!(attempt, account_id = %account_id, "Account visible on replica");
                    return Ok(account_id);
                }
                Ok(None) => debug!(attempt, "Account not visible yet"),
                // A poll failure counts as a miss; the transfer is already out.
                Err(e) => warn!(attempt, error = %e, "Replica poll failed"),
            }
        }

        warn!(tx_ref, attempts = self.config.poll_attempts, "Account never became visible");
        Err(ProvisionError::ConfirmationTimeout {
            alias: alias.to_string(),
            tx_ref: tx_ref.to_string(),
            attempts: self.config.poll_attempts,
        })
    }
}
