//! Identity events and their consensus-log wire format.
//!
//! One JSON object per log message:
//!
//! ```text
//! { "kind": "BIND|ASSERT|ROTATE|UNBIND", "v": 1, "subject": "did:ethr:0x...",
//!   "issuedAt": "<ISO-8601>", "chain": "testnet|mainnet",
//!   "signature": "<hex|null>", "payload": { ...kind-specific } }
//! ```
//!
//! Legacy field names (`t`, `sub`, `iat`, `sig`, `IDENTITY_*` kinds,
//! `hedera_*` payload keys) are accepted when decoding so older topics
//! replay unchanged.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::did::Subject;
use crate::error::EventError;
use crate::record::AccountId;

/// Envelope version written by this crate.
pub const EVENT_VERSION: u64 = 1;

/// Identity event kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    #[serde(rename = "BIND", alias = "IDENTITY_BIND")]
    Bind,
    #[serde(rename = "ASSERT", alias = "IDENTITY_ASSERT")]
    Assert,
    #[serde(rename = "ROTATE", alias = "IDENTITY_ROTATE")]
    Rotate,
    #[serde(rename = "UNBIND", alias = "IDENTITY_UNBIND")]
    Unbind,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Bind => "BIND",
            EventKind::Assert => "ASSERT",
            EventKind::Rotate => "ROTATE",
            EventKind::Unbind => "UNBIND",
        }
    }

    /// Transitions that only the key holder (or an operator for unbind) may make.
    pub fn requires_signature(&self) -> bool {
        matches!(self, EventKind::Rotate | EventKind::Unbind)
    }
}

impl FromStr for EventKind {
    type Err = EventError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.strip_prefix("IDENTITY_").unwrap_or(s) {
            "BIND" => Ok(EventKind::Bind),
            "ASSERT" => Ok(EventKind::Assert),
            "ROTATE" => Ok(EventKind::Rotate),
            "UNBIND" => Ok(EventKind::Unbind),
            _ => Err(EventError::UnknownKind(s.to_string())),
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Target ledger network.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Chain {
    #[default]
    Testnet,
    Mainnet,
}

impl Chain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Chain::Testnet => "testnet",
            Chain::Mainnet => "mainnet",
        }
    }
}

impl FromStr for Chain {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "testnet" => Ok(Chain::Testnet),
            "mainnet" => Ok(Chain::Mainnet),
            other => Err(format!("unknown network: {}", other)),
        }
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindPayload {
    #[serde(alias = "hedera_account_id")]
    pub account_id: AccountId,
    pub evm_address: String,
    #[serde(default)]
    pub create_tx_id: Option<String>,
    /// Hashed contact reference. Never raw PII.
    #[serde(default, alias = "email_hash")]
    pub contact_hash: Option<String>,
    #[serde(default = "default_bind_method")]
    pub bind_method: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssertPayload {
    #[serde(alias = "hedera_account_id")]
    pub account_id: AccountId,
    #[serde(default)]
    pub reason: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotatePayload {
    #[serde(alias = "from_hedera_id")]
    pub from_account_id: AccountId,
    #[serde(alias = "to_hedera_id")]
    pub to_account_id: AccountId,
    #[serde(default)]
    pub reason: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnbindPayload {
    #[serde(alias = "hedera_account_id")]
    pub account_id: AccountId,
    #[serde(default)]
    pub reason: String,
}

/// `issuedAt` travels with millisecond precision; events carry the same
/// precision in memory so a local fold matches a replayed one.
fn wire_precision(at: DateTime<Utc>) -> DateTime<Utc> {
    at.trunc_subsecs(3)
}

fn default_bind_method() -> String {
    "auto-create".to_string()
}

/// Kind-specific event body.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EventPayload {
    Bind(BindPayload),
    Assert(AssertPayload),
    Rotate(RotatePayload),
    Unbind(UnbindPayload),
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::Bind(_) => EventKind::Bind,
            EventPayload::Assert(_) => EventKind::Assert,
            EventPayload::Rotate(_) => EventKind::Rotate,
            EventPayload::Unbind(_) => EventKind::Unbind,
        }
    }

    fn to_value(&self) -> Value {
        let value = match self {
            EventPayload::Bind(p) => serde_json::to_value(p),
            EventPayload::Assert(p) => serde_json::to_value(p),
            EventPayload::Rotate(p) => serde_json::to_value(p),
            EventPayload::Unbind(p) => serde_json::to_value(p),
        };
        value.unwrap_or_default()
    }

    fn from_value(kind: EventKind, value: Value) -> Result<Self, EventError> {
        let invalid = |e: serde_json::Error| EventError::InvalidPayload {
            kind,
            reason: e.to_string(),
        };
        Ok(match kind {
            EventKind::Bind => EventPayload::Bind(serde_json::from_value(value).map_err(invalid)?),
            EventKind::Assert => {
                EventPayload::Assert(serde_json::from_value(value).map_err(invalid)?)
            }
            EventKind::Rotate => {
                EventPayload::Rotate(serde_json::from_value(value).map_err(invalid)?)
            }
            EventKind::Unbind => {
                EventPayload::Unbind(serde_json::from_value(value).map_err(invalid)?)
            }
        })
    }
}

/// Arguments for [`IdentityEvent::bind`].
#[derive(Clone, Debug)]
pub struct BindArgs {
    pub issuer: Subject,
    pub account_id: AccountId,
    pub evm_address: String,
    pub create_tx_id: Option<String>,
    pub contact_hash: Option<String>,
}

/// Arguments for [`IdentityEvent::rotate`].
#[derive(Clone, Debug)]
pub struct RotateArgs {
    pub issuer: Subject,
    pub from_account_id: AccountId,
    pub to_account_id: AccountId,
    pub signature: String,
    pub reason: Option<String>,
}

/// Arguments for [`IdentityEvent::unbind`].
#[derive(Clone, Debug)]
pub struct UnbindArgs {
    pub issuer: Subject,
    pub account_id: AccountId,
    /// `None` only for operator-initiated unbinds.
    pub signature: Option<String>,
    pub reason: Option<String>,
}

/// An immutable identity event.
///
/// Ordering is decided solely by `issued_at`, the creation time stamped by the
/// emitter; consensus sequence numbers are replay bookkeeping only.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "WireEnvelope", into = "WireEnvelope")]
pub struct IdentityEvent {
    subject: Subject,
    issued_at: DateTime<Utc>,
    chain: Chain,
    signature: Option<String>,
    payload: EventPayload,
}

impl IdentityEvent {
    fn new(subject: Subject, chain: Chain, signature: Option<String>, payload: EventPayload) -> Self {
        Self {
            subject,
            issued_at: wire_precision(Utc::now()),
            chain,
            signature,
            payload,
        }
    }

    /// `BIND`: a new account was created for the subject.
    pub fn bind(chain: Chain, args: BindArgs) -> Self {
        Self::new(
            args.issuer,
            chain,
            None,
            EventPayload::Bind(BindPayload {
                account_id: args.account_id,
                evm_address: args.evm_address.to_lowercase(),
                create_tx_id: args.create_tx_id,
                contact_hash: args.contact_hash,
                bind_method: default_bind_method(),
            }),
        )
    }

    /// `ASSERT`: an existing binding was confirmed out of band.
    pub fn assert(
        chain: Chain,
        issuer: Subject,
        account_id: AccountId,
        reason: impl Into<String>,
    ) -> Self {
        Self::new(
            issuer,
            chain,
            None,
            EventPayload::Assert(AssertPayload {
                account_id,
                reason: reason.into(),
            }),
        )
    }

    /// `ROTATE`: move the subject to a new account. Fails without a signature.
    pub fn rotate(chain: Chain, args: RotateArgs) -> Result<Self, EventError> {
        if args.signature.trim().is_empty() {
            return Err(EventError::MissingSignature(EventKind::Rotate));
        }
        Ok(Self::new(
            args.issuer,
            chain,
            Some(args.signature),
            EventPayload::Rotate(RotatePayload {
                from_account_id: args.from_account_id,
                to_account_id: args.to_account_id,
                reason: args.reason.unwrap_or_else(|| "key-rotation".to_string()),
            }),
        ))
    }

    /// `UNBIND`: deactivate the binding.
    pub fn unbind(chain: Chain, args: UnbindArgs) -> Self {
        Self::new(
            args.issuer,
            chain,
            args.signature,
            EventPayload::Unbind(UnbindPayload {
                account_id: args.account_id,
                reason: args.reason.unwrap_or_else(|| "unbind".to_string()),
            }),
        )
    }

    /// Override the creation timestamp. Used when re-emitting or in tests.
    pub fn with_issued_at(mut self, issued_at: DateTime<Utc>) -> Self {
        self.issued_at = wire_precision(issued_at);
        self
    }

    /// Override the signature. `None` models an unsigned event received from the log.
    pub fn with_signature(mut self, signature: Option<String>) -> Self {
        self.signature = signature;
        self
    }

    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }

    pub fn subject(&self) -> &Subject {
        &self.subject
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    pub fn chain(&self) -> Chain {
        self.chain
    }

    pub fn signature(&self) -> Option<&str> {
        self.signature.as_deref()
    }

    /// True when a non-empty signature is attached.
    pub fn is_signed(&self) -> bool {
        self.signature.as_deref().is_some_and(|s| !s.trim().is_empty())
    }

    pub fn payload(&self) -> &EventPayload {
        &self.payload
    }

    /// Structural checks applied before an event is published.
    pub fn validate(&self) -> Result<(), EventError> {
        if self.subject.is_empty() {
            return Err(EventError::InvalidSubject(self.subject.to_string()));
        }
        if self.kind() == EventKind::Rotate && !self.is_signed() {
            return Err(EventError::MissingSignature(EventKind::Rotate));
        }
        Ok(())
    }

    /// Serialize to the JSON wire format.
    pub fn encode(&self) -> Result<Vec<u8>, EventError> {
        serde_json::to_vec(self).map_err(|e| EventError::Malformed(e.to_string()))
    }

    /// Decode one log message.
    ///
    /// Messages without a recognizable `kind` yield [`EventError::UnknownKind`]
    /// so callers can tell foreign traffic apart from corrupt identity events.
    pub fn decode(bytes: &[u8]) -> Result<Self, EventError> {
        let value: Value =
            serde_json::from_slice(bytes).map_err(|e| EventError::Malformed(e.to_string()))?;

        let kind = value
            .get("kind")
            .or_else(|| value.get("t"))
            .and_then(Value::as_str)
            .ok_or_else(|| EventError::UnknownKind("<none>".to_string()))?;
        kind.parse::<EventKind>()?;

        let wire: WireEnvelope =
            serde_json::from_value(value).map_err(|e| EventError::Malformed(e.to_string()))?;
        IdentityEvent::try_from(wire)
    }
}

#[derive(Serialize, Deserialize)]
struct WireEnvelope {
    #[serde(alias = "t")]
    kind: String,
    v: u64,
    #[serde(alias = "sub")]
    subject: String,
    #[serde(rename = "issuedAt", alias = "iat")]
    issued_at: String,
    #[serde(default)]
    chain: Chain,
    #[serde(default, alias = "sig")]
    signature: Option<String>,
    #[serde(default)]
    payload: Value,
}

impl TryFrom<WireEnvelope> for IdentityEvent {
    type Error = EventError;

    fn try_from(wire: WireEnvelope) -> Result<Self, Self::Error> {
        let kind: EventKind = wire.kind.parse()?;
        if wire.v != EVENT_VERSION {
            return Err(EventError::UnsupportedVersion(wire.v));
        }

        let subject = Subject::new(&wire.subject);
        if subject.is_empty() {
            return Err(EventError::InvalidSubject(wire.subject));
        }

        let issued_at = DateTime::parse_from_rfc3339(&wire.issued_at)
            .map(|ts| wire_precision(ts.with_timezone(&Utc)))
            .map_err(|_| EventError::InvalidTimestamp(wire.issued_at.clone()))?;

        Ok(Self {
            subject,
            issued_at,
            chain: wire.chain,
            signature: wire.signature,
            payload: EventPayload::from_value(kind, wire.payload)?,
        })
    }
}

impl From<IdentityEvent> for WireEnvelope {
    fn from(event: IdentityEvent) -> Self {
        Self {
            kind: event.kind().as_str().to_string(),
            v: EVENT_VERSION,
            subject: event.subject.into(),
            issued_at: event.issued_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            chain: event.chain,
            signature: event.signature,
            payload: event.payload.to_value(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn subject() -> Subject {
        Subject::new("did:ethr:0x1111111111111111111111111111111111111111")
    }

    #[test]
    fn bind_event_wire_shape() {
        let event = IdentityEvent::bind(
            Chain::Testnet,
            BindArgs {
                issuer: subject(),
                account_id: AccountId::from("0.0.1001"),
                evm_address: "0x1111111111111111111111111111111111111111".into(),
                create_tx_id: Some("0.0.2@1700000000.000000001".into()),
                contact_hash: None,
            },
        );

        let value: Value = serde_json::from_slice(&event.encode().unwrap()).unwrap();
        assert_eq!(value["kind"], "BIND");
        assert_eq!(value["v"], 1);
        assert_eq!(value["chain"], "testnet");
        assert_eq!(value["signature"], Value::Null);
        assert_eq!(value["payload"]["account_id"], "0.0.1001");
        assert_eq!(
            value["payload"]["evm_address"],
            "0x1111111111111111111111111111111111111111"
        );
        assert_eq!(value["payload"]["bind_method"], "auto-create");
        assert!(value["issuedAt"].as_str().unwrap().ends_with('Z'));
    }

    #[test]
    fn decode_preserves_event() {
        let event = IdentityEvent::assert(
            Chain::Mainnet,
            subject(),
            AccountId::from("0.0.7"),
            "mirror-resolution",
        );
        let decoded = IdentityEvent::decode(&event.encode().unwrap()).unwrap();
        assert_eq!(decoded.kind(), EventKind::Assert);
        assert_eq!(decoded.subject(), event.subject());
        assert_eq!(decoded.chain(), Chain::Mainnet);
        assert_eq!(decoded.issued_at(), event.issued_at());
        assert_eq!(decoded, event);
    }

    #[test]
    fn issued_at_is_kept_at_wire_precision() {
        let precise = Utc.timestamp_opt(1_700_000_000, 123_456_789).unwrap();
        let event = IdentityEvent::assert(Chain::Testnet, subject(), AccountId::from("0.0.7"), "x")
            .with_issued_at(precise);
        assert_eq!(event.issued_at().timestamp_subsec_nanos(), 123_000_000);

        let decoded = IdentityEvent::decode(&event.encode().unwrap()).unwrap();
        assert_eq!(decoded.issued_at(), event.issued_at());
    }

    #[test]
    fn rotate_requires_signature() {
        let args = RotateArgs {
            issuer: subject(),
            from_account_id: AccountId::from("0.0.1"),
            to_account_id: AccountId::from("0.0.2"),
            signature: "  ".into(),
            reason: None,
        };
        assert_eq!(
            IdentityEvent::rotate(Chain::Testnet, args).unwrap_err(),
            EventError::MissingSignature(EventKind::Rotate)
        );
    }

    #[test]
    fn operator_unbind_has_no_signature() {
        let event = IdentityEvent::unbind(
            Chain::Testnet,
            UnbindArgs {
                issuer: subject(),
                account_id: AccountId::from("0.0.1"),
                signature: None,
                reason: None,
            },
        );
        assert!(!event.is_signed());
        assert!(event.validate().is_ok());
        match event.payload() {
            EventPayload::Unbind(p) => assert_eq!(p.reason, "unbind"),
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn decodes_legacy_field_names() {
        let legacy = json!({
            "t": "IDENTITY_ROTATE",
            "v": 1,
            "sub": "DID:ETHR:0x1111111111111111111111111111111111111111",
            "iat": "2024-05-01T10:00:00.000Z",
            "chain": "testnet",
            "sig": "0xdeadbeef",
            "payload": { "from_hedera_id": "0.0.1", "to_hedera_id": "0.0.2", "reason": "key-rotation" }
        });
        let event = IdentityEvent::decode(legacy.to_string().as_bytes()).unwrap();
        assert_eq!(event.kind(), EventKind::Rotate);
        assert_eq!(event.subject(), &subject());
        assert!(event.is_signed());
        match event.payload() {
            EventPayload::Rotate(p) => assert_eq!(p.to_account_id, AccountId::from("0.0.2")),
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn decode_classifies_failures() {
        assert!(matches!(
            IdentityEvent::decode(b"not json"),
            Err(EventError::Malformed(_))
        ));
        assert!(matches!(
            IdentityEvent::decode(br#"{"type":"RECOGNITION_MINT"}"#),
            Err(EventError::UnknownKind(_))
        ));
        assert!(matches!(
            IdentityEvent::decode(br#"{"kind":"PROFILE_UPDATE","v":1}"#),
            Err(EventError::UnknownKind(_))
        ));

        let wrong_version = json!({
            "kind": "ASSERT", "v": 2, "subject": "did:ethr:0x1111111111111111111111111111111111111111",
            "issuedAt": "2024-05-01T10:00:00Z", "chain": "testnet", "signature": null,
            "payload": { "account_id": "0.0.1", "reason": "x" }
        });
        assert_eq!(
            IdentityEvent::decode(wrong_version.to_string().as_bytes()),
            Err(EventError::UnsupportedVersion(2))
        );

        let bad_payload = json!({
            "kind": "BIND", "v": 1, "subject": "did:ethr:0x1111111111111111111111111111111111111111",
            "issuedAt": "2024-05-01T10:00:00Z", "chain": "testnet", "signature": null,
            "payload": { "reason": "missing account" }
        });
        assert!(matches!(
            IdentityEvent::decode(bad_payload.to_string().as_bytes()),
            Err(EventError::InvalidPayload { kind: EventKind::Bind, .. })
        ));

        let bad_time = json!({
            "kind": "ASSERT", "v": 1, "subject": "did:ethr:0x1111111111111111111111111111111111111111",
            "issuedAt": "yesterday", "payload": { "account_id": "0.0.1" }
        });
        assert!(matches!(
            IdentityEvent::decode(bad_time.to_string().as_bytes()),
            Err(EventError::InvalidTimestamp(_))
        ));
    }
}
