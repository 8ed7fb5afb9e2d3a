//! Pipeline service composing the engines with storage, delivery and notifications.

mod blasts;
mod feedback;
mod leads;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

pub use blasts::{BlastView, RecipientResponse};
pub use feedback::{CloseRequest, FeedbackSweep, PeriodRecorded};
pub use leads::{LeadScoreView, MatchQuery};

use super::blast::{BlastConfig, BlastError, BlastOrchestrator, OutboundProviders};
use super::domain::{BuyBoxError, LeadId, UserId};
use super::feedback::{FeedbackConfig, FeedbackProcessor, PeriodError, RecommendationError};
use super::matching::{BuyerMatcher, MatchingConfig};
use super::repository::{Notifier, PipelineNotification, PipelineStore, RepositoryError};
use super::routing::{RoutingConfig, RoutingEngine, RoutingError};
use super::scoring::{ScoringConfig, ScoringEngine};
use super::underwriting::UnderwritingDefaults;

/// Immutable settings handed to every engine at construction.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub scoring: ScoringConfig,
    pub routing: RoutingConfig,
    pub matching: MatchingConfig,
    pub blast: BlastConfig,
    pub feedback: FeedbackConfig,
    pub underwriting: UnderwritingDefaults,
}

/// Time source so SLA, cooldown and rate windows can be pinned in tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut now) = self.now.lock() {
            *now += by;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.now
            .lock()
            .map(|now| *now)
            .unwrap_or_else(|poisoned| *poisoned.into_inner())
    }
}

pub struct DealPipelineService<S, N> {
    store: Arc<S>,
    notifier: Arc<N>,
    providers: OutboundProviders,
    clock: Arc<dyn Clock>,
    underwriting: UnderwritingDefaults,
    default_weights: super::scoring::CheckWeights,
    scoring: ScoringEngine,
    routing: RoutingEngine,
    matcher: BuyerMatcher,
    blasts: BlastOrchestrator,
    feedback: FeedbackProcessor,
    sequence: AtomicU64,
}

impl<S, N> DealPipelineService<S, N>
where
    S: PipelineStore + 'static,
    N: Notifier + 'static,
{
    pub fn new(store: Arc<S>, notifier: Arc<N>, config: PipelineConfig) -> Self {
        let PipelineConfig {
            scoring,
            routing,
            matching,
            blast,
            feedback,
            underwriting,
        } = config;

        Self {
            store,
            notifier,
            providers: OutboundProviders::default(),
            clock: Arc::new(SystemClock),
            default_weights: scoring.weights,
            matcher: BuyerMatcher::new(
                matching,
                underwriting.clone(),
                scoring.major_exclusions.clone(),
            ),
            scoring: ScoringEngine::new(scoring, underwriting.clone()),
            routing: RoutingEngine::new(routing),
            blasts: BlastOrchestrator::new(blast),
            feedback: FeedbackProcessor::new(feedback),
            underwriting,
            sequence: AtomicU64::new(1),
        }
    }

    pub fn with_providers(mut self, providers: OutboundProviders) -> Self {
        self.providers = providers;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub(crate) fn next_id(&self, prefix: &str) -> String {
        let id = self.sequence.fetch_add(1, Ordering::Relaxed);
        format!("{prefix}-{id:06}")
    }

    /// Best-effort notification; a failure is logged and swallowed.
    pub(crate) fn notify(
        &self,
        template: &str,
        recipient: Option<UserId>,
        lead_id: Option<LeadId>,
        details: BTreeMap<String, String>,
    ) {
        let notification = PipelineNotification {
            template: template.to_string(),
            recipient,
            lead_id,
            details,
        };
        if let Err(error) = self.notifier.notify(notification) {
            warn!(template, %error, "notification dropped");
        }
    }
}

/// Error raised by the pipeline service.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("invalid {field}: {message}")]
    Validation {
        field: &'static str,
        message: String,
    },
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },
    #[error("{entity} is {current}; cannot {action}")]
    StateConflict {
        entity: &'static str,
        current: String,
        action: &'static str,
    },
    #[error("send limit of {limit} blasts per hour reached")]
    RateLimited { limit: usize },
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl PipelineError {
    pub(crate) fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub(crate) fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            field,
            message: message.into(),
        }
    }
}

impl From<BuyBoxError> for PipelineError {
    fn from(error: BuyBoxError) -> Self {
        Self::validation("buy_box", error.to_string())
    }
}

impl From<RoutingError> for PipelineError {
    fn from(error: RoutingError) -> Self {
        match error {
            RoutingError::MissingJustification => {
                Self::validation("justification", error.to_string())
            }
        }
    }
}

impl From<PeriodError> for PipelineError {
    fn from(error: PeriodError) -> Self {
        Self::validation("period", error.to_string())
    }
}

impl From<RecommendationError> for PipelineError {
    fn from(error: RecommendationError) -> Self {
        match error {
            RecommendationError::NotPending { current } => Self::StateConflict {
                entity: "recommendation",
                current: current.label().to_string(),
                action: "decide",
            },
        }
    }
}

impl From<BlastError> for PipelineError {
    fn from(error: BlastError) -> Self {
        match error {
            BlastError::LeadArchived { .. } => Self::StateConflict {
                entity: "lead",
                current: "archived".to_string(),
                action: "blast",
            },
            BlastError::TemplateUnavailable { .. } | BlastError::TemplateChannel { .. } => {
                Self::validation("message_template_key", error.to_string())
            }
            BlastError::NoEligibleBuyers { .. } => Self::validation("lead_id", error.to_string()),
            BlastError::NotDraft { current, action } => Self::StateConflict {
                entity: "blast",
                current: current.label().to_string(),
                action: if action == "sent" { "send" } else { "cancel" },
            },
            BlastError::NotSent { current } => Self::StateConflict {
                entity: "blast",
                current: current.label().to_string(),
                action: "record a response",
            },
            BlastError::NotAwaitingResponse { current } => Self::StateConflict {
                entity: "recipient",
                current: current.label().to_string(),
                action: "record a response",
            },
            BlastError::ResponseStatusRequired | BlastError::InvalidResponseStatus { .. } => {
                Self::validation("status", error.to_string())
            }
            BlastError::RateLimited { limit } => Self::RateLimited { limit },
        }
    }
}
