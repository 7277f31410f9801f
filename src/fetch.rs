// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Fetching with an ordered fallback chain.
//!
//! Every call first tries the target URL directly and then each configured
//! relay in order, one attempt per endpoint, returning the first success.
//! Nothing is remembered between calls.

use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use tracing::{debug, warn};

use crate::error::{AttemptError, FetchError};
use crate::http::HttpClient;
use crate::progress::{NoopReporter, ProgressEvent, SharedProgressReporter};

/// Characters left unescaped by `encodeURIComponent`
const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// Upper bound for buffer preallocation based on Content-Length
const MAX_PREALLOC: u64 = 64 * 1024 * 1024;

/// One way of reaching a target URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchStrategy {
    /// Request the target URL as is
    Direct,
    /// Request through a URL-rewriting relay
    Relay { base: String },
}

impl FetchStrategy {
    /// The URL actually requested for `target`
    pub fn endpoint_for(&self, target: &str) -> String {
        match self {
            FetchStrategy::Direct => target.to_string(),
            FetchStrategy::Relay { base } => {
                format!("{}{}", base, utf8_percent_encode(target, URI_COMPONENT))
            }
        }
    }
}

/// How the response body should be returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    Text,
    Binary,
}

/// A successfully fetched body
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fetched {
    Text(String),
    Binary(Bytes),
}

impl Fetched {
    pub fn into_bytes(self) -> Bytes {
        match self {
            Fetched::Text(text) => Bytes::from(text),
            Fetched::Binary(bytes) => bytes,
        }
    }

    pub fn into_text(self) -> String {
        match self {
            Fetched::Text(text) => text,
            Fetched::Binary(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        }
    }
}

impl ResponseKind {
    fn decode(self, bytes: Bytes) -> Fetched {
        match self {
            ResponseKind::Text => Fetched::Text(String::from_utf8_lossy(&bytes).into_owned()),
            ResponseKind::Binary => Fetched::Binary(bytes),
        }
    }
}

/// Fetcher that walks a direct request followed by a list of relays
pub struct ResilientFetcher<C> {
    client: C,
    relays: Vec<FetchStrategy>,
    reporter: SharedProgressReporter,
}

impl<C: HttpClient> ResilientFetcher<C> {
    /// Create a fetcher trying `relays` (base URLs) in order after the direct attempt
    pub fn new<I, S>(client: C, relays: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            client,
            relays: relays
                .into_iter()
                .map(|base| FetchStrategy::Relay { base: base.into() })
                .collect(),
            reporter: NoopReporter::shared(),
        }
    }

    /// Report failed attempts to `reporter`
    pub fn with_reporter(mut self, reporter: SharedProgressReporter) -> Self {
        self.reporter = reporter;
        self
    }

    /// The full ordered attempt list
    pub fn strategies(&self) -> Vec<FetchStrategy> {
        std::iter::once(FetchStrategy::Direct)
            .chain(self.relays.iter().cloned())
            .collect()
    }

    /// Fetch `url`, falling back through the relays
    pub async fn fetch(&self, url: &str, kind: ResponseKind) -> Result<Fetched, FetchError> {
        self.fetch_with_progress(url, kind, |_, _| {}).await
    }

    /// Fetch `url`, calling `on_progress(received, total)` after every body chunk.
    ///
    /// Progress restarts from zero when an attempt fails and the next
    /// endpoint is tried.
    pub async fn fetch_with_progress<F>(
        &self,
        url: &str,
        kind: ResponseKind,
        mut on_progress: F,
    ) -> Result<Fetched, FetchError>
    where
        F: FnMut(u64, Option<u64>) + Send,
    {
        let mut last = match self.attempt(url, &mut on_progress).await {
            Ok(bytes) => {
                debug!(url, "fetched directly");
                return Ok(kind.decode(bytes));
            }
            Err(e) => e,
        };
        self.note_failure(url, url, &last);

        for relay in &self.relays {
            let endpoint = relay.endpoint_for(url);
            match self.attempt(&endpoint, &mut on_progress).await {
                Ok(bytes) => {
                    debug!(url, endpoint, "fetched through relay");
                    return Ok(kind.decode(bytes));
                }
                Err(e) => {
                    self.note_failure(url, &endpoint, &e);
                    last = e;
                }
            }
        }

        Err(FetchError::AllAttemptsFailed {
            url: url.to_string(),
            attempts: self.relays.len() + 1,
            last: Box::new(last),
        })
    }

    async fn attempt<F>(&self, endpoint: &str, on_progress: &mut F) -> Result<Bytes, AttemptError>
    where
        F: FnMut(u64, Option<u64>) + Send,
    {
        let response =
            self.client
                .get_stream(endpoint)
                .await
                .map_err(|e| AttemptError::Transport {
                    endpoint: endpoint.to_string(),
                    source: e,
                })?;

        if !response.is_success() {
            return Err(AttemptError::Status {
                endpoint: endpoint.to_string(),
                status: response.status,
            });
        }

        let total = response.content_length;
        let capacity = total.unwrap_or(0).min(MAX_PREALLOC) as usize;
        let mut body = BytesMut::with_capacity(capacity);
        let mut stream = response.body;

        while let Some(chunk_result) = stream.next().await {
            let chunk = chunk_result.map_err(|e| AttemptError::Stream {
                endpoint: endpoint.to_string(),
                source: e,
            })?;
            body.extend_from_slice(&chunk);
            on_progress(body.len() as u64, total);
        }

        Ok(body.freeze())
    }

    fn note_failure(&self, url: &str, endpoint: &str, error: &AttemptError) {
        warn!(url, endpoint, %error, "fetch attempt failed");
        self.reporter.report(ProgressEvent::AttemptFailed {
            url: url.to_string(),
            endpoint: endpoint.to_string(),
            error: error.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeHttpClient;

    const TARGET: &str = "https://example.com/feed.xml";
    const RELAY_A: &str = "https://relay-a.test/raw?url=";
    const RELAY_B: &str = "https://relay-b.test/?";

    fn relayed(base: &str) -> String {
        FetchStrategy::Relay {
            base: base.to_string(),
        }
        .endpoint_for(TARGET)
    }

    #[test]
    fn relay_endpoint_percent_encodes_target() {
        let strategy = FetchStrategy::Relay {
            base: RELAY_A.to_string(),
        };
        assert_eq!(
            strategy.endpoint_for("https://a.b/c?d=e f&g=(h)"),
            "https://relay-a.test/raw?url=https%3A%2F%2Fa.b%2Fc%3Fd%3De%20f%26g%3D(h)"
        );
        assert_eq!(FetchStrategy::Direct.endpoint_for(TARGET), TARGET);
    }

    #[test]
    fn strategies_start_with_direct() {
        let fetcher = ResilientFetcher::new(FakeHttpClient::new(), [RELAY_A, RELAY_B]);
        let strategies = fetcher.strategies();

        assert_eq!(strategies.len(), 3);
        assert_eq!(strategies[0], FetchStrategy::Direct);
        assert_eq!(
            strategies[2],
            FetchStrategy::Relay {
                base: RELAY_B.to_string()
            }
        );
    }

    #[tokio::test]
    async fn direct_success_skips_relays() {
        let client = FakeHttpClient::new().route(TARGET, 200, "hello");
        let fetcher = ResilientFetcher::new(client.clone(), [RELAY_A, RELAY_B]);

        let fetched = fetcher.fetch(TARGET, ResponseKind::Text).await.unwrap();

        assert_eq!(fetched, Fetched::Text("hello".to_string()));
        assert_eq!(client.requests(), vec![TARGET.to_string()]);
    }

    #[tokio::test]
    async fn falls_back_to_second_relay() {
        let client = FakeHttpClient::new()
            .route(TARGET, 403, "forbidden")
            .route(relayed(RELAY_A), 500, "boom")
            .route(relayed(RELAY_B), 200, vec![1u8, 2, 3, 4]);
        let fetcher = ResilientFetcher::new(client.clone(), [RELAY_A, RELAY_B]);

        let fetched = fetcher.fetch(TARGET, ResponseKind::Binary).await.unwrap();

        assert_eq!(fetched, Fetched::Binary(Bytes::from_static(&[1, 2, 3, 4])));
        assert_eq!(
            client.requests(),
            vec![TARGET.to_string(), relayed(RELAY_A), relayed(RELAY_B)]
        );
    }

    #[tokio::test]
    async fn all_failures_name_last_cause() {
        let client = FakeHttpClient::new().route(relayed(RELAY_B), 502, "bad gateway");
        let fetcher = ResilientFetcher::new(client, [RELAY_A, RELAY_B]);

        let err = fetcher.fetch(TARGET, ResponseKind::Text).await.unwrap_err();

        match err {
            FetchError::AllAttemptsFailed {
                url,
                attempts,
                last,
            } => {
                assert_eq!(url, TARGET);
                assert_eq!(attempts, 3);
                match *last {
                    AttemptError::Status { endpoint, status } => {
                        assert_eq!(status, 502);
                        assert_eq!(endpoint, relayed(RELAY_B));
                    }
                    other => panic!("Expected Status error, got {other:?}"),
                }
            }
        }
    }

    #[tokio::test]
    async fn every_call_restarts_with_direct() {
        let client = FakeHttpClient::new().route(relayed(RELAY_A), 200, "via relay");
        let fetcher = ResilientFetcher::new(client.clone(), [RELAY_A]);

        fetcher.fetch(TARGET, ResponseKind::Text).await.unwrap();
        fetcher.fetch(TARGET, ResponseKind::Text).await.unwrap();

        assert_eq!(
            client.requests(),
            vec![
                TARGET.to_string(),
                relayed(RELAY_A),
                TARGET.to_string(),
                relayed(RELAY_A)
            ]
        );
    }

    #[tokio::test]
    async fn progress_reports_received_bytes() {
        let client = FakeHttpClient::new().route(TARGET, 200, vec![0u8; 10]);
        let fetcher = ResilientFetcher::new(client, Vec::<String>::new());

        let mut seen = Vec::new();
        fetcher
            .fetch_with_progress(TARGET, ResponseKind::Binary, |received, total| {
                seen.push((received, total))
            })
            .await
            .unwrap();

        assert_eq!(seen.last(), Some(&(10, Some(10))));
        assert!(seen.windows(2).all(|w| w[0].0 < w[1].0));
    }

    #[test]
    fn text_decoding_is_lossy() {
        let fetched = ResponseKind::Text.decode(Bytes::from_static(b"caf\xe9"));
        assert_eq!(fetched.into_text(), "caf\u{fffd}");
    }
}
