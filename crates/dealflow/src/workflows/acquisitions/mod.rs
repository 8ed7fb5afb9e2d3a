//! Acquisitions pipeline: lead underwriting and grading, routing into work
//! queues, buyer matching, deal blasts, and post-close feedback.

pub mod blast;
pub mod domain;
pub mod feedback;
pub mod matching;
pub mod memory;
pub mod repository;
pub mod router;
pub mod routing;
pub mod scoring;
pub mod service;
pub mod underwriting;

#[cfg(test)]
mod tests;

pub use blast::{
    BlastConfig, BlastError, BlastOrchestrator, BlastRequest, BlastStats, BlastStatus, DealBlast,
    DealBlastRecipient, DeliveryReceipt, GradeSnapshot, InternalInbox, MessageTemplate,
    OutboundError, OutboundMessage, OutboundProvider, OutboundProviders, RecipientStatus,
    TemplateKey, TemplateStatus,
};
pub use domain::{
    market_key, BlastId, BuyBox, BuyBoxError, BuyBoxId, Buyer, BuyerId, Channel, ChannelOptOuts,
    ConditionTier, ContactChannels, DealTerms, Grade, GradeOverride, HandoffStatus, Lead, LeadId,
    LeadRouting, LeadScore, PerformanceId, PriceBand, Priority, PropertyFacts, PropertyLocation,
    PropertyType, RecipientId, RecommendationId, Route, RouteOverride, Strategy, UserId,
};
pub use feedback::{
    BuyBoxHealth, DealPerformance, FeedbackConfig, FeedbackProcessor, PerformanceGrade,
    PeriodActuals, ProForma, Recommendation, RecommendationKind, RecommendationStatus,
    ScoringWeightsVersion, SystemicIssue, WarningTier,
};
pub use matching::{BuyerMatch, BuyerMatcher, ExcludedBuyer, ExclusionReason, MatchReport, MatchingConfig};
pub use memory::{InMemoryPipelineStore, RecordingNotifier};
pub use repository::{
    Notifier, NotifyError, PipelineNotification, PipelineStore, RepositoryError,
};
pub use router::{pipeline_router, USER_HEADER};
pub use routing::{QuietHours, RoutingConfig, RoutingEngine, RoutingEffect, SlaHours};
pub use scoring::{CheckWeights, GradeThresholds, ScoreOutcome, ScoringConfig, ScoringEngine};
pub use service::{
    BlastView, Clock, CloseRequest, DealPipelineService, FeedbackSweep, LeadScoreView,
    ManualClock, MatchQuery, PeriodRecorded, PipelineConfig, PipelineError, RecipientResponse,
    SystemClock,
};
pub use underwriting::{calculate, CashFlowInputs, CashFlowResult, FinancingTerms, LoanType, UnderwritingDefaults};
