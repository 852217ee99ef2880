//! The prompt-to-text completion interface.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::{LlmError, Result, is_retryable};

// ─────────────────────────────────────────────────────────────────────────────
// Completer Trait
// ─────────────────────────────────────────────────────────────────────────────

/// A text completion function: `(prompt) -> response`.
///
/// Used by the dedup judge, validator, merge executor, update-intent
/// analyzer, skill synthesizer and document structurer. Timeouts and
/// cancellation are the implementation's responsibility.
#[async_trait]
pub trait Completer: Send + Sync {
    /// Complete a single prompt.
    async fn complete(&self, prompt: &str) -> Result<String>;

    /// Name of this completer, for logging.
    fn name(&self) -> &str;
}

/// A completer that can be shared across threads.
pub type SharedCompleter = Arc<dyn Completer>;

// ─────────────────────────────────────────────────────────────────────────────
// Shared Retry Logic
// ─────────────────────────────────────────────────────────────────────────────

/// Execute an async operation with exponential backoff retry.
///
/// Retries only on transient errors (network failures, rate limits).
/// Non-retryable errors are returned immediately.
pub async fn with_retry<F, Fut, T>(
    max_retries: u32,
    initial_backoff: Duration,
    backend_name: &str,
    mut f: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut backoff = initial_backoff;
    let mut attempt = 0;

    loop {
        match f().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                if !is_retryable(&e) || attempt >= max_retries {
                    return Err(e);
                }

                let wait = e.retry_after().unwrap_or(backoff);
                attempt += 1;
                tracing::warn!(
                    backend = backend_name,
                    attempt = attempt,
                    max_retries = max_retries,
                    backoff_ms = wait.as_millis() as u64,
                    "Request failed, retrying"
                );
                tokio::time::sleep(wait).await;
                backoff *= 2;
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Mock Completer
// ─────────────────────────────────────────────────────────────────────────────

type Responder = Box<dyn Fn(&str) -> Result<String> + Send + Sync>;

/// A mock completer for testing.
///
/// Either replays a queue of canned responses in order, or computes each
/// response from the prompt with a closure. Every prompt is logged.
pub struct MockCompleter {
    responses: Mutex<VecDeque<Result<String>>>,
    responder: Option<Responder>,
    prompts: Mutex<Vec<String>>,
}

impl MockCompleter {
    /// Replay `responses` in order; errors once the queue is exhausted.
    pub fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            responses: Mutex::new(responses.into_iter().map(|r| Ok(r.into())).collect()),
            responder: None,
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Always return the same text.
    pub fn with_text(text: impl Into<String>) -> Self {
        let text = text.into();
        Self::with_fn(move |_| Ok(text.clone()))
    }

    /// Compute each response from the prompt.
    pub fn with_fn<F>(f: F) -> Self
    where
        F: Fn(&str) -> Result<String> + Send + Sync + 'static,
    {
        Self {
            responses: Mutex::new(VecDeque::new()),
            responder: Some(Box::new(f)),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Always fail with a backend error.
    pub fn failing(message: impl Into<String>) -> Self {
        let message = message.into();
        Self::with_fn(move |_| Err(LlmError::Backend(message.clone())))
    }

    /// Queue an error as the next response.
    pub fn push_error(&self, error: LlmError) {
        self.responses.lock().push_back(Err(error));
    }

    /// Queue a text response.
    pub fn push_response(&self, text: impl Into<String>) {
        self.responses.lock().push_back(Ok(text.into()));
    }

    /// All prompts received so far.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }

    /// Number of calls made.
    pub fn call_count(&self) -> usize {
        self.prompts.lock().len()
    }
}

#[async_trait]
impl Completer for MockCompleter {
    async fn complete(&self, prompt: &str) -> Result<String> {
        self.prompts.lock().push(prompt.to_string());

        if let Some(next) = self.responses.lock().pop_front() {
            return next;
        }
        match &self.responder {
            Some(f) => f(prompt),
            None => Err(LlmError::Backend(
                "MockCompleter: no more responses available".to_string(),
            )),
        }
    }

    fn name(&self) -> &str {
        "mock"
    }
}
