use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::thread::{self, ThreadId};
use std::time::Duration;

use serde_json::{json, Value};

use crate::transport::{Transport, TransportError, TransportErrorKind, TransportResponse};

type Scripted = Result<TransportResponse, TransportError>;

/// Replays queued responses in order; once the queue is empty every call
/// gets the fallback.
#[derive(Clone)]
pub(crate) struct ScriptedTransport {
    queue: Arc<Mutex<VecDeque<Scripted>>>,
    fallback: Scripted,
    seen: Arc<Mutex<Vec<(ThreadId, String, Value)>>>,
}

impl ScriptedTransport {
    pub(crate) fn new(script: Vec<Scripted>) -> Self {
        Self {
            queue: Arc::new(Mutex::new(script.into())),
            fallback: Ok(status(429, "{\"error\":{\"status\":\"RESOURCE_EXHAUSTED\"}}")),
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub(crate) fn always(response: Scripted) -> Self {
        let mut transport = Self::new(Vec::new());
        transport.fallback = response;
        transport
    }

    pub(crate) fn keys(&self) -> Vec<String> {
        self.calls().into_iter().map(|(_, key, _)| key).collect()
    }

    pub(crate) fn payloads(&self) -> Vec<Value> {
        self.calls().into_iter().map(|(_, _, payload)| payload).collect()
    }

    pub(crate) fn calls(&self) -> Vec<(ThreadId, String, Value)> {
        self.seen.lock().map(|seen| seen.clone()).unwrap_or_default()
    }
}

impl Transport for ScriptedTransport {
    fn post_json(
        &self,
        _endpoint: &str,
        credential: &str,
        payload: &Value,
        _timeout: Duration,
    ) -> Result<TransportResponse, TransportError> {
        if let Ok(mut seen) = self.seen.lock() {
            seen.push((thread::current().id(), credential.to_string(), payload.clone()));
        }
        let next = self.queue.lock().ok().and_then(|mut queue| queue.pop_front());
        next.unwrap_or_else(|| self.fallback.clone())
    }
}

pub(crate) fn status(code: u16, body: &str) -> TransportResponse {
    TransportResponse {
        status: code,
        body: body.to_string(),
    }
}

pub(crate) fn reply(text: &str) -> Scripted {
    let body = json!({
        "candidates": [{
            "content": {"parts": [{"text": text}], "role": "model"},
            "finishReason": "STOP"
        }]
    });
    Ok(status(200, &body.to_string()))
}

pub(crate) fn quota() -> Scripted {
    Ok(status(429, "{\"error\":{\"code\":429,\"status\":\"RESOURCE_EXHAUSTED\"}}"))
}

pub(crate) fn refused() -> Scripted {
    Err(TransportError::new(
        TransportErrorKind::Connect,
        "request failed: connection refused",
    ))
}

pub(crate) fn keys(names: &[&str]) -> Vec<String> {
    names.iter().map(|name| name.to_string()).collect()
}
