//! Replica account lookup

use anyhow::Context;
use binding_ledger::{MirrorClient, ReplicaQuery};
use binding_service::BindingConfig;
use binding_types::{canonical_did, EvmAddress};
use serde::Serialize;

use crate::output::{print_field, print_json, print_warning};

#[derive(Serialize)]
struct LookupOutput {
    did: String,
    alias: String,
    account_id: Option<String>,
}

/// Look an identity up on the mirror node by its key alias
pub async fn execute(config: &BindingConfig, identity: &str, json: bool) -> anyhow::Result<()> {
    let did = canonical_did(identity, config.did_salt.as_deref())?;
    let alias = EvmAddress::from_did(did.as_str())
        .with_context(|| format!("{} does not name an externally-owned key", did))?;

    let client = MirrorClient::new(&config.mirror_url, config.request_timeout())?;
    let account = client.lookup_account(&alias).await?;

    let output = LookupOutput {
        did: did.to_string(),
        alias: alias.to_string(),
        account_id: account.map(|a| a.to_string()),
    };
    if json {
        return print_json(&output);
    }

    print_field("DID", &output.did);
    print_field("Alias", &output.alias);
    match &output.account_id {
        Some(account) => print_field("Account", account),
        None => print_warning("No account on the replica"),
    }
    Ok(())
}
