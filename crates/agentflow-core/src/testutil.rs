//! Scripted in-memory transport for engine tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use agentflow_types::transport::{
    DispatchOptions, DispatchOutcome, PaymentRequirements, TransportError,
};
use agentflow_types::workflow::TaskPayload;
use serde_json::{Value, json};

use crate::transport::Transport;

#[derive(Debug, Clone)]
enum ReplyKind {
    Ok(Value),
    Fail(TransportError),
    Payment(PaymentRequirements),
}

/// One canned answer, optionally delivered after a delay.
#[derive(Debug, Clone)]
pub(crate) struct Reply {
    kind: ReplyKind,
    delay: Option<Duration>,
}

impl Reply {
    pub(crate) fn ok(data: Value) -> Self {
        Self {
            kind: ReplyKind::Ok(data),
            delay: None,
        }
    }

    pub(crate) fn fail(error: TransportError) -> Self {
        Self {
            kind: ReplyKind::Fail(error),
            delay: None,
        }
    }

    pub(crate) fn payment(amount: &str, asset: &str) -> Self {
        Self {
            kind: ReplyKind::Payment(PaymentRequirements {
                amount: amount.to_string(),
                asset: asset.to_string(),
                pay_to: "treasury".to_string(),
                details: None,
            }),
            delay: None,
        }
    }

    pub(crate) fn after(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

/// A recorded `send` call.
#[derive(Debug, Clone)]
pub(crate) struct Call {
    pub agent_id: String,
    pub intent: String,
    pub payload: TaskPayload,
}

#[derive(Debug, Default)]
struct Inner {
    scripts: HashMap<String, VecDeque<Reply>>,
    defaults: HashMap<String, Reply>,
    calls: Vec<Call>,
}

/// Transport whose answers are scripted per agent.
///
/// Replies are looked up by `"<agent>/<intent>"` first, then by agent id:
/// queued replies are consumed in order, then the standing reply for that
/// key applies. With nothing configured the call succeeds with
/// `{"agent": .., "intent": ..}`. Clones share state, so a test can keep
/// a handle after boxing one into the engine.
#[derive(Debug, Clone, Default)]
pub(crate) struct ScriptedTransport {
    inner: Arc<Mutex<Inner>>,
}

impl ScriptedTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Queue replies for `key` (`"agent"` or `"agent/intent"`).
    pub(crate) fn script(&self, key: &str, replies: Vec<Reply>) {
        self.lock()
            .scripts
            .entry(key.to_string())
            .or_default()
            .extend(replies);
    }

    /// Standing reply for `key` once its queue is empty.
    pub(crate) fn respond(&self, key: &str, reply: Reply) {
        self.lock().defaults.insert(key.to_string(), reply);
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    pub(crate) fn calls_to(&self, agent_id: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.agent_id == agent_id)
            .count()
    }

    /// Intents sent, in order, as `"agent/intent"`.
    pub(crate) fn call_log(&self) -> Vec<String> {
        self.lock()
            .calls
            .iter()
            .map(|c| format!("{}/{}", c.agent_id, c.intent))
            .collect()
    }

    fn next_reply(&self, agent_id: &str, intent: &str) -> Option<Reply> {
        let mut inner = self.lock();
        let specific = format!("{agent_id}/{intent}");
        for key in [specific.as_str(), agent_id] {
            if let Some(reply) = inner.scripts.get_mut(key).and_then(VecDeque::pop_front) {
                return Some(reply);
            }
            if let Some(reply) = inner.defaults.get(key) {
                return Some(reply.clone());
            }
        }
        None
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("scripted transport lock poisoned")
    }
}

impl Transport for ScriptedTransport {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn send(
        &self,
        agent_id: &str,
        intent: &str,
        payload: TaskPayload,
        _opts: DispatchOptions,
    ) -> Result<DispatchOutcome, TransportError> {
        self.lock().calls.push(Call {
            agent_id: agent_id.to_string(),
            intent: intent.to_string(),
            payload,
        });

        let Some(reply) = self.next_reply(agent_id, intent) else {
            return Ok(DispatchOutcome::completed(json!({
                "agent": agent_id,
                "intent": intent,
            })));
        };

        if let Some(delay) = reply.delay {
            tokio::time::sleep(delay).await;
        }

        match reply.kind {
            ReplyKind::Ok(data) => Ok(DispatchOutcome::completed(data)),
            ReplyKind::Fail(err) => Err(err),
            ReplyKind::Payment(requirements) => Ok(DispatchOutcome::PaymentRequired { requirements }),
        }
    }
}
