//! DID normalization and externally-owned-key alias handling.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::error::DidError;

const DID_ETHR_PREFIX: &str = "did:ethr:";

/// Salt used for hashed contact DIDs when none is configured.
pub const DEFAULT_DID_SALT: &str = "identity-binding-default-salt";

/// A DID normalized to trimmed lowercase. Every map in the pipeline is keyed by this.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Subject(String);

impl Subject {
    pub fn new(did: impl AsRef<str>) -> Self {
        Self(did.as_ref().trim().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<String> for Subject {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for Subject {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<Subject> for String {
    fn from(value: Subject) -> Self {
        value.0
    }
}

impl AsRef<str> for Subject {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lowercase `0x` + 40 hex character externally-owned-key alias.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EvmAddress(String);

impl EvmAddress {
    /// Parse a bare address. Only the exact `0x` + 40 hex shape is accepted.
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim().to_lowercase();
        let hex = value.strip_prefix("0x")?;
        if hex.len() != 40 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return None;
        }
        Some(Self(value))
    }

    /// Extract the alias from a `did:ethr:0x<40 hex>` identity.
    pub fn from_did(did: &str) -> Option<Self> {
        let did = did.trim().to_lowercase();
        Self::parse(did.strip_prefix(DID_ETHR_PREFIX)?)
    }

    pub fn to_did(&self) -> Subject {
        Subject(format!("{}{}", DID_ETHR_PREFIX, self.0))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EvmAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derive the canonical, PII-free DID for an issuer string.
///
/// Contact-based issuers (`email:<addr>`, `did:ethr:<addr>` holding an email,
/// raw emails) are replaced by a salted SHA-256 pseudonym so the same contact
/// always maps to the same DID. Proper `did:ethr:0x…` DIDs and bare addresses
/// are normalized; anything else is hashed.
pub fn canonical_did(issuer: &str, salt: Option<&str>) -> Result<Subject, DidError> {
    let issuer = issuer.trim();
    if issuer.is_empty() {
        return Err(DidError::Empty);
    }

    if let Some(contact) = issuer.strip_prefix("email:") {
        return Ok(hashed_contact(contact, salt));
    }

    let lowered = issuer.to_lowercase();
    if let Some(rest) = lowered.strip_prefix(DID_ETHR_PREFIX) {
        if let Some(address) = EvmAddress::parse(rest) {
            return Ok(address.to_did());
        }
        if rest.contains('@') {
            warn!("Contact-based DID detected, hashing for privacy");
            return Ok(hashed_contact(rest, salt));
        }
    }

    if issuer.contains('@') {
        warn!("Raw contact address detected, hashing for privacy");
        return Ok(hashed_contact(issuer, salt));
    }

    if let Some(address) = EvmAddress::parse(issuer) {
        return Ok(address.to_did());
    }

    warn!("Unknown issuer format, hashing");
    Ok(digest_did(Sha256::digest(issuer.as_bytes()).as_slice()))
}

/// Final guard before a DID is written anywhere durable.
pub fn ensure_no_pii(did: &str) -> Result<(), DidError> {
    if did.contains('@') {
        return Err(DidError::ContainsPii("@ symbol"));
    }

    // Hex addresses can contain TLD-like fragments and long digit runs.
    if did.starts_with("did:ethr:0x") {
        return Ok(());
    }

    let lowered = did.to_lowercase();
    const DOMAIN_SUFFIXES: [&str; 6] = [".com", ".org", ".net", ".io", ".edu", ".gov"];
    if DOMAIN_SUFFIXES.iter().any(|suffix| lowered.contains(suffix)) {
        return Err(DidError::ContainsPii("domain name"));
    }

    let mut run = 0usize;
    for c in did.chars() {
        run = if c.is_ascii_digit() { run + 1 } else { 0 };
        if run >= 10 {
            return Err(DidError::ContainsPii("phone number"));
        }
    }

    Ok(())
}

fn hashed_contact(contact: &str, salt: Option<&str>) -> Subject {
    let salt = match salt {
        Some(salt) if !salt.is_empty() => salt,
        _ => {
            warn!("Using default DID salt; configure did_salt in production");
            DEFAULT_DID_SALT
        }
    };

    let normalized = contact.trim().to_lowercase();
    let digest = Sha256::digest(format!("{}:{}", salt, normalized).as_bytes());
    digest_did(digest.as_slice())
}

fn digest_did(digest: &[u8]) -> Subject {
    Subject(format!("{}0x{}", DID_ETHR_PREFIX, &hex::encode(digest)[..40]))
}
