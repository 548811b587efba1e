//! HttpTransport -- [`Transport`] over JSON HTTP.
//!
//! Each dispatch resolves the agent's endpoint and POSTs
//! `{"agent_id", "intent", "payload"}` to `{endpoint}/tasks`.
//!
//! | Response            | Outcome                                      |
//! |---------------------|----------------------------------------------|
//! | 2xx, JSON body      | `Completed { data: body }`                   |
//! | 402, JSON terms     | `PaymentRequired { requirements }`           |
//! | other status        | `TransportError::Rejected("HTTP <code>: ..")`|
//! | unparseable body    | `TransportError::InvalidResponse`            |
//! | connect/timeout     | `TransportError::Network`                    |

use std::time::Duration;

use agentflow_core::transport::{AgentLookup, Transport};
use agentflow_types::transport::{
    DispatchOptions, DispatchOutcome, PaymentRequirements, TransportError,
};
use agentflow_types::workflow::TaskPayload;
use reqwest::StatusCode;
use serde::Serialize;
use serde_json::Value;

/// Path appended to every agent endpoint.
pub const TASKS_PATH: &str = "/tasks";

/// Longest error body echoed back in a `Rejected` message.
const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, Serialize)]
struct TaskRequest<'a> {
    agent_id: &'a str,
    intent: &'a str,
    payload: &'a TaskPayload,
}

/// JSON-over-HTTP transport.
pub struct HttpTransport<L> {
    client: reqwest::Client,
    lookup: L,
}

impl<L: AgentLookup> HttpTransport<L> {
    pub fn new(lookup: L) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(concat!("agentflow/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self::with_client(client, lookup)
    }

    pub fn with_client(client: reqwest::Client, lookup: L) -> Self {
        Self { client, lookup }
    }
}

impl<L: AgentLookup> Transport for HttpTransport<L> {
    fn name(&self) -> &str {
        "http"
    }

    async fn send(
        &self,
        agent_id: &str,
        intent: &str,
        payload: TaskPayload,
        opts: DispatchOptions,
    ) -> Result<DispatchOutcome, TransportError> {
        let endpoint = self.lookup.resolve(agent_id).await?;
        let url = format!("{}{TASKS_PATH}", endpoint.endpoint);

        tracing::debug!(agent_id, intent, url = url.as_str(), "posting task");

        let response = self
            .client
            .post(&url)
            .timeout(opts.timeout)
            .json(&TaskRequest {
                agent_id,
                intent,
                payload: &payload,
            })
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TransportError::Network(format!("request to {url} timed out"))
                } else {
                    TransportError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;

        if status == StatusCode::PAYMENT_REQUIRED {
            let requirements: PaymentRequirements = serde_json::from_str(&body).map_err(|e| {
                TransportError::InvalidResponse(format!("malformed payment terms from '{agent_id}': {e}"))
            })?;
            return Ok(DispatchOutcome::PaymentRequired { requirements });
        }

        if !status.is_success() {
            tracing::debug!(agent_id, intent, %status, "agent rejected task");
            return Err(TransportError::Rejected(format!(
                "HTTP {status}: {}",
                truncate(&body, MAX_ERROR_BODY)
            )));
        }

        if body.trim().is_empty() {
            return Ok(DispatchOutcome::completed(Value::Null));
        }
        let data: Value = serde_json::from_str(&body)
            .map_err(|e| TransportError::InvalidResponse(format!("agent '{agent_id}' returned non-JSON body: {e}")))?;
        Ok(DispatchOutcome::completed(data))
    }
}

impl<L> std::fmt::Debug for HttpTransport<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport").finish_non_exhaustive()
    }
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::StaticAgentRegistry;
    use serde_json::json;
    use wiremock::{Mock, MockServer, ResponseTemplate, matchers};

    fn transport(server: &MockServer) -> HttpTransport<StaticAgentRegistry> {
        let registry = StaticAgentRegistry::new();
        registry.register("fetcher", &server.uri());
        HttpTransport::new(registry)
    }

    fn opts() -> DispatchOptions {
        DispatchOptions {
            timeout: Duration::from_secs(5),
        }
    }

    fn payload() -> TaskPayload {
        let mut p = TaskPayload::new();
        p.insert("url".into(), json!("https://example.com"));
        p
    }

    #[tokio::test]
    async fn test_success_returns_body_as_data() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .and(matchers::path("/tasks"))
            .and(matchers::body_json(json!({
                "agent_id": "fetcher",
                "intent": "fetch",
                "payload": { "url": "https://example.com" },
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "rows": 3 })))
            .expect(1)
            .mount(&server)
            .await;

        let outcome = transport(&server)
            .send("fetcher", "fetch", payload(), opts())
            .await
            .unwrap();
        assert_eq!(outcome, DispatchOutcome::completed(json!({ "rows": 3 })));
    }

    #[tokio::test]
    async fn test_402_maps_to_payment_required() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(402).set_body_json(json!({
                "amount": "1000",
                "asset": "USDC",
                "pay_to": "0xabc",
            })))
            .mount(&server)
            .await;

        let outcome = transport(&server)
            .send("fetcher", "fetch", payload(), opts())
            .await
            .unwrap();
        match outcome {
            DispatchOutcome::PaymentRequired { requirements } => {
                assert_eq!(requirements.amount, "1000");
                assert_eq!(requirements.pay_to, "0xabc");
            }
            other => panic!("expected payment required, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_error_status_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("Internal Server Error"))
            .mount(&server)
            .await;

        let err = transport(&server)
            .send("fetcher", "fetch", payload(), opts())
            .await
            .unwrap_err();
        match err {
            TransportError::Rejected(msg) => {
                assert!(msg.contains("500"));
                assert!(msg.contains("Internal Server Error"));
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_non_json_body_is_invalid_response() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let err = transport(&server)
            .send("fetcher", "fetch", payload(), opts())
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn test_unknown_agent_fails_before_request() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let err = transport(&server)
            .send("ghost", "fetch", payload(), opts())
            .await
            .unwrap_err();
        assert_eq!(err, TransportError::AgentNotFound("ghost".into()));
    }

    #[tokio::test]
    async fn test_slow_agent_times_out_as_network_error() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let err = transport(&server)
            .send(
                "fetcher",
                "fetch",
                payload(),
                DispatchOptions {
                    timeout: Duration::from_millis(100),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Network(msg) if msg.contains("timed out")));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "h");
        assert_eq!(truncate("short", 10), "short");
    }
}
