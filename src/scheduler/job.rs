//! Job definitions for the scheduler.
//!
//! This module defines the core types tracked through the queue:
//!
//! - `ClaimPayload`: the claim-verification work item
//! - `JobRecord`: a payload plus lifecycle state, retry budget and timestamps
//! - `BackoffPolicy`: delay policy applied between retry attempts
//! - `EnqueueOptions`: per-submission overrides

use std::sync::OnceLock;
use std::time::Duration;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Highest priority, reserved for privileged submitters.
pub const PRIORITY_HIGH: u8 = 10;

/// Priority for URL submissions.
pub const PRIORITY_NORMAL: u8 = 5;

/// Priority for anonymous free-text submissions.
pub const PRIORITY_LOW: u8 = 1;

/// Default maximum number of attempts for a job.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default base delay for retry backoff, in milliseconds.
pub const DEFAULT_BACKOFF_DELAY_MS: u64 = 2000;

/// Kind of input the user submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum InputType {
    /// A URL whose content carries the claim.
    Url,
    /// Free-form claim text.
    #[default]
    Text,
}

/// The claim-verification work item carried by a job.
///
/// Normalization fields are optional: when the normalizer fails, submission
/// degrades to the raw input and the pipeline works from that.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ClaimPayload {
    /// Submitting user, if known.
    #[serde(default)]
    pub user_id: Option<String>,
    /// The raw user input.
    pub input: String,
    /// How the input was submitted.
    #[serde(default)]
    pub input_type: InputType,
    /// The claim extracted from the input.
    #[serde(default)]
    pub claim: Option<String>,
    /// The normalized, neutral restatement of the claim.
    #[serde(default)]
    pub normalized_claim: Option<String>,
    /// Topical category assigned by the normalizer.
    #[serde(default)]
    pub category: Option<String>,
    /// Key entities and terms for search.
    #[serde(default)]
    pub keywords: Vec<String>,
    /// The claim rephrased as a fact-checkable question.
    #[serde(default)]
    pub question: Option<String>,
    /// Content hash of the normalized claim, hex-encoded.
    #[serde(default)]
    pub claim_hash: Option<String>,
    /// Identifier of the durable result-store row tracking this job.
    #[serde(default)]
    pub result_store_id: Option<Uuid>,
}

impl ClaimPayload {
    /// Creates a payload for free-text input.
    pub fn text(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            input_type: InputType::Text,
            ..Default::default()
        }
    }

    /// Creates a payload for URL input.
    pub fn url(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            input_type: InputType::Url,
            ..Default::default()
        }
    }

    /// Sets the submitting user.
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Sets the normalization result fields.
    pub fn with_normalization(
        mut self,
        normalized_claim: impl Into<String>,
        category: impl Into<String>,
        keywords: Vec<String>,
        question: impl Into<String>,
    ) -> Self {
        self.normalized_claim = Some(normalized_claim.into());
        self.category = Some(category.into());
        self.keywords = keywords;
        self.question = Some(question.into());
        self
    }

    /// Sets the content hash.
    pub fn with_claim_hash(mut self, hash: impl Into<String>) -> Self {
        self.claim_hash = Some(hash.into());
        self
    }

    /// Sets the durable result-store row id.
    pub fn with_result_store_id(mut self, id: Uuid) -> Self {
        self.result_store_id = Some(id);
        self
    }

    /// The text the pipeline should verify: the normalized claim when
    /// available, otherwise the extracted claim, otherwise the raw input.
    pub fn processing_input(&self) -> &str {
        self.normalized_claim
            .as_deref()
            .or(self.claim.as_deref())
            .unwrap_or(&self.input)
    }
}

/// Lifecycle state of a job.
///
/// `Unknown` is a reporting sentinel for repaired or unparseable records; it
/// is never written by the queue and status queries treat it as best-effort
/// pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Enqueued and eligible (or scheduled) for claiming.
    Waiting,
    /// Claimed by a worker slot.
    Active,
    /// Finished successfully; result retained.
    Completed,
    /// Attempts exhausted; failure reason retained.
    Failed,
    /// Record could not be read back intact.
    Unknown,
}

impl JobState {
    /// Returns whether the state is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobState::Waiting => write!(f, "waiting"),
            JobState::Active => write!(f, "active"),
            JobState::Completed => write!(f, "completed"),
            JobState::Failed => write!(f, "failed"),
            JobState::Unknown => write!(f, "unknown"),
        }
    }
}

/// Shape of the delay between retry attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    /// Base delay doubles after each failed attempt.
    Exponential,
    /// Constant delay.
    Fixed,
}

/// Delay policy applied between retry attempts of a failed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    /// Delay shape.
    pub kind: BackoffKind,
    /// Base delay in milliseconds.
    pub delay_ms: u64,
}

impl BackoffPolicy {
    /// Creates an exponential policy with the given base delay.
    pub fn exponential(delay_ms: u64) -> Self {
        Self {
            kind: BackoffKind::Exponential,
            delay_ms,
        }
    }

    /// Creates a fixed policy with the given delay.
    pub fn fixed(delay_ms: u64) -> Self {
        Self {
            kind: BackoffKind::Fixed,
            delay_ms,
        }
    }

    /// The delay to wait before the next attempt, given the number of
    /// attempts that have already failed (1-based).
    ///
    /// Exponential doubles the base delay per failed attempt: after the
    /// first failure the delay is the base, after the second it is twice
    /// the base, and so on. The shift is capped so large attempt counts
    /// cannot overflow.
    pub fn delay_for(&self, failed_attempts: u32) -> Duration {
        let ms = match self.kind {
            BackoffKind::Fixed => self.delay_ms,
            BackoffKind::Exponential => {
                let shift = failed_attempts.saturating_sub(1).min(20);
                self.delay_ms.saturating_mul(1u64 << shift)
            }
        };
        Duration::from_millis(ms)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::exponential(DEFAULT_BACKOFF_DELAY_MS)
    }
}

/// Per-submission overrides for enqueueing.
#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    /// Explicit priority; clamped to [1, 10]. Derived from the payload
    /// when unset.
    pub priority: Option<u8>,
    /// Initial scheduling delay.
    pub delay: Option<Duration>,
    /// Maximum attempts before the job fails permanently.
    pub attempts: Option<u32>,
    /// Retry delay policy.
    pub backoff: Option<BackoffPolicy>,
}

impl EnqueueOptions {
    /// Sets an explicit priority.
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Sets an initial delay.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Sets the attempt budget.
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = Some(attempts);
        self
    }

    /// Sets the backoff policy.
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = Some(backoff);
        self
    }
}

/// Matches user ids that look like verified phone-number accounts; those
/// submissions jump to the highest priority.
fn priority_user_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[+\d]").expect("static pattern is valid"))
}

/// Resolves the effective priority for a payload.
///
/// An explicit priority wins, clamped to [1, 10]. Otherwise: phone-style
/// user ids are HIGH, URL submissions NORMAL, everything else LOW.
pub fn resolve_priority(payload: &ClaimPayload, explicit: Option<u8>) -> u8 {
    if let Some(priority) = explicit {
        return priority.clamp(PRIORITY_LOW, PRIORITY_HIGH);
    }

    if let Some(user_id) = &payload.user_id {
        if priority_user_pattern().is_match(user_id) {
            return PRIORITY_HIGH;
        }
    }

    match payload.input_type {
        InputType::Url => PRIORITY_NORMAL,
        InputType::Text => PRIORITY_LOW,
    }
}

/// A job tracked through its queue lifecycle.
///
/// Owned by the queue while waiting or active, transferred to the claiming
/// worker slot, and immutable once terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    /// Unique identifier for this job.
    pub id: Uuid,
    /// The work item.
    pub payload: ClaimPayload,
    /// Effective priority, 1-10 (higher drains first).
    pub priority: u8,
    /// Lifecycle state.
    pub state: JobState,
    /// Last reported progress (0-100); unset until first claimed.
    #[serde(default)]
    pub progress: Option<u8>,
    /// Number of attempts started so far.
    pub attempts: u32,
    /// Maximum attempts before permanent failure.
    pub max_attempts: u32,
    /// Retry delay policy.
    pub backoff: BackoffPolicy,
    /// When the job was enqueued.
    pub enqueued_at: DateTime<Utc>,
    /// When the current (or last) attempt started.
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    /// When the job reached a terminal state.
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    /// Opaque success value, set when completed.
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    /// Last failure reason, set when failed.
    #[serde(default)]
    pub failure_reason: Option<String>,
}

impl JobRecord {
    /// Creates a new waiting job.
    pub fn new(payload: ClaimPayload, priority: u8, max_attempts: u32, backoff: BackoffPolicy) -> Self {
        Self {
            id: Uuid::new_v4(),
            payload,
            priority,
            state: JobState::Waiting,
            progress: None,
            attempts: 0,
            max_attempts,
            backoff,
            enqueued_at: Utc::now(),
            started_at: None,
            finished_at: None,
            result: None,
            failure_reason: None,
        }
    }

    /// Builds the repaired sentinel for a record that could not be read
    /// back intact.
    pub fn unknown(id: Uuid) -> Self {
        Self {
            id,
            payload: ClaimPayload::default(),
            priority: PRIORITY_LOW,
            state: JobState::Unknown,
            progress: None,
            attempts: 0,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: BackoffPolicy::default(),
            enqueued_at: Utc::now(),
            started_at: None,
            finished_at: None,
            result: None,
            failure_reason: None,
        }
    }

    /// Returns whether the retry budget has attempts left.
    pub fn has_attempts_left(&self) -> bool {
        self.attempts < self.max_attempts
    }

    /// Wall-clock time from enqueue to terminal state, when finished.
    pub fn time_to_complete(&self) -> Option<chrono::Duration> {
        self.finished_at.map(|finished| finished - self.enqueued_at)
    }
}
