//! Mirror-node REST client
//!
//! Reads the consensus log (`/api/v1/topics/{id}/messages`) and resolves key
//! aliases to accounts (`/api/v1/accounts`). The mirror is a lagging replica
//! of consensus state; callers treat it as eventually consistent.

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use binding_types::{AccountId, EvmAddress};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use crate::error::{LedgerError, Result};
use crate::traits::{LogReader, ReplicaQuery};
use crate::types::{ConsensusTimestamp, LogMessage};

/// Largest page the mirror node serves per request.
const PAGE_LIMIT: usize = 100;

/// Minimum `links.next` hops within one fetch; the mirror may serve short pages.
const MIN_PAGES: usize = 10;

/// Hop bound for one fetch: enough full pages to reach `limit`.
fn page_budget(limit: usize) -> usize {
    limit.div_ceil(PAGE_LIMIT).max(MIN_PAGES)
}

/// HTTP client for a mirror node
#[derive(Clone)]
pub struct MirrorClient {
    http: Client,
    origin: String,
}

#[derive(Debug, Deserialize)]
struct MessagesPage {
    #[serde(default)]
    messages: Vec<MirrorMessage>,
    #[serde(default)]
    links: Links,
}

#[derive(Debug, Deserialize)]
struct MirrorMessage {
    consensus_timestamp: String,
    message: String,
    #[serde(default)]
    sequence_number: u64,
}

#[derive(Debug, Default, Deserialize)]
struct Links {
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AccountsPage {
    #[serde(default)]
    accounts: Vec<MirrorAccount>,
}

#[derive(Debug, Deserialize)]
struct MirrorAccount {
    account: String,
}

impl MirrorClient {
    /// Create a client for `base_url`, with or without the `/api/v1` suffix.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let http = Client::builder().timeout(timeout).build()?;
        let trimmed = base_url.trim().trim_end_matches('/');
        let origin = trimmed
            .strip_suffix("/api/v1")
            .unwrap_or(trimmed)
            .to_string();

        if origin.is_empty() {
            return Err(LedgerError::InvalidResponse("empty mirror url".into()));
        }

        Ok(Self { http, origin })
    }

    fn api(&self, path: &str) -> String {
        format!("{}/api/v1{}", self.origin, path)
    }

    fn follow(&self, next: &str) -> String {
        if next.starts_with("http://") || next.starts_with("https://") {
            next.to_string()
        } else {
            format!("{}{}", self.origin, next)
        }
    }

    async fn get_page(&self, url: &str) -> Result<MessagesPage> {
        let response = self.http.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LedgerError::Status {
                status: status.as_u16(),
                body,
            });
        }
        response
            .json::<MessagesPage>()
            .await
            .map_err(|e| LedgerError::InvalidResponse(e.to_string()))
    }
}

fn decode_message(raw: MirrorMessage) -> Result<LogMessage> {
    let consensus_timestamp: ConsensusTimestamp = raw
        .consensus_timestamp
        .parse()
        .map_err(LedgerError::InvalidResponse)?;

    // Undecodable payloads are passed through so the consumer can count them.
    let contents = match STANDARD.decode(raw.message.as_bytes()) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(%consensus_timestamp, error = %e, "Mirror message is not base64");
            raw.message.into_bytes()
        }
    };

    Ok(LogMessage {
        sequence: raw.sequence_number,
        consensus_timestamp,
        contents,
    })
}

#[async_trait]
impl LogReader for MirrorClient {
    #[instrument(skip(self))]
    async fn fetch(
        &self,
        topic: &str,
        since: Option<ConsensusTimestamp>,
        limit: usize,
    ) -> Result<Vec<LogMessage>> {
        let page_size = limit.clamp(1, PAGE_LIMIT);
        let mut url = self.api(&format!(
            "/topics/{}/messages?order=asc&limit={}",
            topic, page_size
        ));
        if let Some(since) = since {
            url.push_str(&format!("&timestamp=gt:{}", since));
        }

        let mut out = Vec::new();
        for _ in 0..page_budget(limit) {
            let page = self.get_page(&url).await?;
            let received = page.messages.len();

            for raw in page.messages {
                if out.len() >= limit {
                    break;
                }
                out.push(decode_message(raw)?);
            }

            debug!(topic, received, total = out.len(), "Fetched mirror page");

            match page.links.next {
                Some(next) if out.len() < limit && received > 0 => url = self.follow(&next),
                _ => break,
            }
        }

        Ok(out)
    }
}

#[async_trait]
impl ReplicaQuery for MirrorClient {
    #[instrument(skip(self, alias), fields(alias = %alias))]
    async fn lookup_account(&self, alias: &EvmAddress) -> Result<Option<AccountId>> {
        let response = self
            .http
            .get(self.api("/accounts"))
            .query(&[("account.id", alias.as_str())])
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LedgerError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let page = response
            .json::<AccountsPage>()
            .await
            .map_err(|e| LedgerError::InvalidResponse(e.to_string()))?;

        Ok(page
            .accounts
            .into_iter()
            .next()
            .map(|a| AccountId::new(a.account)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param, query_param_is_missing};
    use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

    fn client(server: &MockServer) -> MirrorClient {
        MirrorClient::new(&format!("{}/api/v1/", server.uri()), Duration::from_secs(5)).unwrap()
    }

    fn b64(s: &str) -> String {
        STANDARD.encode(s.as_bytes())
    }

    #[tokio::test]
    async fn fetch_follows_next_links() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/v1/topics/0.0.42/messages"))
            .and(query_param("order", "asc"))
            .and(query_param_is_missing("timestamp"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "messages": [
                    {"consensus_timestamp": "100.000000001", "message": b64("one"), "sequence_number": 1}
                ],
                "links": {"next": "/api/v1/topics/0.0.42/messages?order=asc&limit=2&timestamp=gt:100.000000001"}
            })))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/api/v1/topics/0.0.42/messages"))
            .and(query_param("timestamp", "gt:100.000000001"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "messages": [
                    {"consensus_timestamp": "100.5", "message": "%%not-base64%%", "sequence_number": 2}
                ],
                "links": {"next": null}
            })))
            .mount(&server)
            .await;

        let messages = client(&server).fetch("0.0.42", None, 2).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].contents, b"one".to_vec());
        assert_eq!(messages[1].consensus_timestamp, ConsensusTimestamp::new(100, 500_000_000));
        assert_eq!(messages[1].contents, b"%%not-base64%%".to_vec());
    }

    /// Serves `pages` full pages keyed by the `timestamp=gt:` cursor.
    struct PagedTopic {
        pages: u64,
    }

    impl Respond for PagedTopic {
        fn respond(&self, request: &Request) -> ResponseTemplate {
            let cursor = request
                .url
                .query_pairs()
                .find(|(k, _)| k == "timestamp")
                .and_then(|(_, v)| v.trim_start_matches("gt:").split('.').next()?.parse::<u64>().ok())
                .unwrap_or(0);
            let page = cursor / PAGE_LIMIT as u64;

            let messages: Vec<_> = (1..=PAGE_LIMIT as u64)
                .map(|i| {
                    json!({
                        "consensus_timestamp": format!("{}.000000000", cursor + i),
                        "message": b64("m"),
                        "sequence_number": cursor + i,
                    })
                })
                .collect();
            let next = (page + 1 < self.pages).then(|| {
                format!(
                    "/api/v1/topics/0.0.42/messages?order=asc&limit=100&timestamp=gt:{}.000000000",
                    cursor + PAGE_LIMIT as u64
                )
            });

            ResponseTemplate::new(200).set_body_json(json!({
                "messages": messages,
                "links": {"next": next}
            }))
        }
    }

    #[test]
    fn page_budget_covers_limit() {
        assert_eq!(page_budget(1), MIN_PAGES);
        assert_eq!(page_budget(1000), 10);
        assert_eq!(page_budget(1001), 11);
        assert_eq!(page_budget(1500), 15);
    }

    #[tokio::test]
    async fn fetch_fills_limits_beyond_ten_pages() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/topics/0.0.42/messages"))
            .respond_with(PagedTopic { pages: 15 })
            .mount(&server)
            .await;

        let messages = client(&server).fetch("0.0.42", None, 1200).await.unwrap();
        assert_eq!(messages.len(), 1200);
        assert_eq!(messages[1199].consensus_timestamp, ConsensusTimestamp::new(1200, 0));
    }

    #[tokio::test]
    async fn fetch_passes_watermark() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/v1/topics/0.0.42/messages"))
            .and(query_param("timestamp", "gt:200.000000000"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "messages": [],
                "links": {"next": null}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let messages = client(&server)
            .fetch("0.0.42", Some(ConsensusTimestamp::new(200, 0)), 500)
            .await
            .unwrap();
        assert!(messages.is_empty());
    }

    #[tokio::test]
    async fn fetch_surfaces_server_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
            .mount(&server)
            .await;

        let err = client(&server).fetch("0.0.42", None, 10).await.unwrap_err();
        assert!(matches!(err, LedgerError::Status { status: 503, .. }));
    }

    #[tokio::test]
    async fn lookup_account_by_alias() {
        let server = MockServer::start().await;
        let alias = EvmAddress::parse("0x1111111111111111111111111111111111111111").unwrap();

        Mock::given(method("GET"))
            .and(path("/api/v1/accounts"))
            .and(query_param("account.id", alias.as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "accounts": [{"account": "0.0.5005", "evm_address": alias.as_str()}]
            })))
            .mount(&server)
            .await;

        let found = client(&server).lookup_account(&alias).await.unwrap();
        assert_eq!(found, Some(AccountId::from("0.0.5005")));
    }

    #[tokio::test]
    async fn lookup_account_missing() {
        let server = MockServer::start().await;
        let alias = EvmAddress::parse("0x3333333333333333333333333333333333333333").unwrap();

        Mock::given(method("GET"))
            .and(path("/api/v1/accounts"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        assert_eq!(client(&server).lookup_account(&alias).await.unwrap(), None);
    }
}
