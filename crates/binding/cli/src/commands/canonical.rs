//! Canonical DID derivation

use binding_types::{canonical_did, ensure_no_pii, EvmAddress};
use serde::Serialize;

use crate::output::{print_field, print_json, print_success, print_warning};

#[derive(Serialize)]
struct CanonicalOutput {
    did: String,
    alias: Option<String>,
    pii_safe: bool,
}

/// Print the canonical DID for an issuer string
pub fn execute(issuer: &str, salt: Option<&str>, json: bool) -> anyhow::Result<()> {
    let did = canonical_did(issuer, salt)?;
    let pii_safe = ensure_no_pii(did.as_str()).is_ok();
    let output = CanonicalOutput {
        alias: EvmAddress::from_did(did.as_str()).map(|a| a.to_string()),
        did: did.to_string(),
        pii_safe,
    };

    if json {
        return print_json(&output);
    }

    print_field("DID", &output.did);
    print_field("Alias", output.alias.as_deref().unwrap_or("-"));
    if output.pii_safe {
        print_success("Safe to publish");
    } else {
        print_warning("DID still carries personal data");
    }
    Ok(())
}
