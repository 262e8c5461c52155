//! Acquire requests and release reports.

use serde::{Deserialize, Serialize};

use crate::error::GovernorError;
use crate::lease::Priority;

/// A request for admission, consumed by `Governor::acquire`.
///
/// # Example
///
/// ```rust
/// use tollgate_core::{AcquireRequest, Priority};
///
/// let request = AcquireRequest::builder()
///     .actor_id("user-42")
///     .action("chat.completion")
///     .priority(Priority::Background)
///     .weight(2)
///     .prompt_tokens(1_200)
///     .max_output_tokens(800)
///     .idempotency_key("req-9f3a")
///     .build()
///     .unwrap();
///
/// assert_eq!(request.estimated_tokens(), 2_000);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcquireRequest {
    actor_id: String,
    action: String,
    priority: Priority,
    weight: u32,
    prompt_tokens: u64,
    max_output_tokens: u64,
    idempotency_key: Option<String>,
}

impl AcquireRequest {
    /// Returns a builder for constructing an `AcquireRequest`.
    #[must_use]
    pub fn builder() -> AcquireRequestBuilder {
        AcquireRequestBuilder::default()
    }

    /// Returns the fairness principal.
    #[must_use]
    pub fn actor_id(&self) -> &str {
        &self.actor_id
    }

    /// Returns the action label.
    #[must_use]
    pub fn action(&self) -> &str {
        &self.action
    }

    /// Returns the scheduling class.
    #[must_use]
    pub const fn priority(&self) -> Priority {
        self.priority
    }

    /// Returns the concurrency units requested.
    #[must_use]
    pub const fn weight(&self) -> u32 {
        self.weight
    }

    /// Returns the estimated prompt tokens.
    #[must_use]
    pub const fn prompt_tokens(&self) -> u64 {
        self.prompt_tokens
    }

    /// Returns the output-token ceiling of the estimate.
    #[must_use]
    pub const fn max_output_tokens(&self) -> u64 {
        self.max_output_tokens
    }

    /// Returns the idempotency key, if any.
    #[must_use]
    pub fn idempotency_key(&self) -> Option<&str> {
        self.idempotency_key.as_deref()
    }

    /// Returns the token charge for the token-rate window.
    #[must_use]
    pub const fn estimated_tokens(&self) -> u64 {
        self.prompt_tokens.saturating_add(self.max_output_tokens)
    }
}

/// Builder for [`AcquireRequest`].
#[derive(Debug, Default)]
pub struct AcquireRequestBuilder {
    actor_id: Option<String>,
    action: Option<String>,
    priority: Priority,
    weight: u32,
    prompt_tokens: u64,
    max_output_tokens: u64,
    idempotency_key: Option<String>,
}

impl AcquireRequestBuilder {
    /// Sets the fairness principal. Required.
    #[must_use]
    pub fn actor_id(mut self, actor_id: impl Into<String>) -> Self {
        self.actor_id = Some(actor_id.into());
        self
    }

    /// Sets the action label. Required.
    #[must_use]
    pub fn action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    /// Sets the scheduling class. Defaults to interactive.
    #[must_use]
    pub const fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the concurrency units to consume. Defaults to 1.
    #[must_use]
    pub const fn weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    /// Sets the estimated prompt tokens. Defaults to 0.
    #[must_use]
    pub const fn prompt_tokens(mut self, tokens: u64) -> Self {
        self.prompt_tokens = tokens;
        self
    }

    /// Sets the output-token ceiling. Defaults to 0.
    #[must_use]
    pub const fn max_output_tokens(mut self, tokens: u64) -> Self {
        self.max_output_tokens = tokens;
        self
    }

    /// Sets the idempotency key.
    #[must_use]
    pub fn idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    /// Builds the request.
    ///
    /// A zero weight defaults to 1 rather than erroring; an explicit weight
    /// was either given or it wasn't.
    ///
    /// # Errors
    ///
    /// Returns [`GovernorError::MissingField`] if `actor_id` or `action` is
    /// not set, or [`GovernorError::InvalidRequest`] if either is empty.
    pub fn build(self) -> Result<AcquireRequest, GovernorError> {
        let actor_id = self
            .actor_id
            .ok_or_else(|| GovernorError::missing_field("actor_id"))?;
        let action = self
            .action
            .ok_or_else(|| GovernorError::missing_field("action"))?;

        if actor_id.is_empty() {
            return Err(GovernorError::invalid_request("actor_id must not be empty"));
        }
        if action.is_empty() {
            return Err(GovernorError::invalid_request("action must not be empty"));
        }

        Ok(AcquireRequest {
            actor_id,
            action,
            priority: self.priority,
            weight: self.weight.max(1),
            prompt_tokens: self.prompt_tokens,
            max_output_tokens: self.max_output_tokens,
            idempotency_key: self.idempotency_key,
        })
    }
}

/// How the governed work ended, reported at release.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseOutcome {
    /// The work completed normally.
    #[default]
    Success,
    /// The work failed.
    Error,
    /// The work timed out.
    Timeout,
    /// The caller cancelled the work.
    Cancelled,
}

impl std::fmt::Display for ReleaseOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Error => write!(f, "error"),
            Self::Timeout => write!(f, "timeout"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Actual token usage observed by the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Tokens consumed by the prompt.
    pub prompt_tokens: u64,
    /// Tokens produced in the output.
    pub output_tokens: u64,
}

impl TokenUsage {
    /// Creates a usage record.
    #[must_use]
    pub const fn new(prompt_tokens: u64, output_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            output_tokens,
        }
    }

    /// Returns the total tokens to reconcile against the window charge.
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.prompt_tokens.saturating_add(self.output_tokens)
    }
}

/// Optional completion report passed to `Governor::release`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseReport {
    /// How the work ended.
    #[serde(default)]
    pub outcome: ReleaseOutcome,

    /// Actual token usage, reconciled into the token window.
    #[serde(default)]
    pub usage: Option<TokenUsage>,

    /// End-to-end latency fed to the adaptive controller.
    #[serde(default)]
    pub latency_ms: Option<u64>,
}

impl ReleaseReport {
    /// Creates a report with the given outcome and nothing else.
    #[must_use]
    pub fn with_outcome(outcome: ReleaseOutcome) -> Self {
        Self {
            outcome,
            ..Self::default()
        }
    }

    /// Attaches actual token usage.
    #[must_use]
    pub const fn usage(mut self, usage: TokenUsage) -> Self {
        self.usage = Some(usage);
        self
    }

    /// Attaches the observed latency.
    #[must_use]
    pub const fn latency_ms(mut self, latency_ms: u64) -> Self {
        self.latency_ms = Some(latency_ms);
        self
    }
}
