use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::blast::{DealBlast, DealBlastRecipient, MessageTemplate, TemplateKey};
use super::domain::{
    BlastId, BuyBox, BuyBoxId, Buyer, BuyerId, LeadId, Lead, PerformanceId, RecipientId,
    RecommendationId, UserId,
};
use super::feedback::{DealPerformance, Recommendation, ScoringWeightsVersion};

/// Lead documents including their embedded score and routing records.
pub trait LeadRepository: Send + Sync {
    fn fetch_lead(&self, id: &LeadId) -> Result<Option<Lead>, RepositoryError>;
    fn save_lead(&self, lead: Lead) -> Result<(), RepositoryError>;
}

pub trait BuyBoxRepository: Send + Sync {
    fn fetch_buy_box(&self, id: &BuyBoxId) -> Result<Option<BuyBox>, RepositoryError>;
    fn buy_boxes_in_market(&self, market: &str) -> Result<Vec<BuyBox>, RepositoryError>;
    fn save_buy_box(&self, buy_box: BuyBox) -> Result<(), RepositoryError>;
}

pub trait BuyerRepository: Send + Sync {
    fn fetch_buyer(&self, id: &BuyerId) -> Result<Option<Buyer>, RepositoryError>;
    /// Buyers listing the market among preferred or legacy markets.
    fn buyers_in_market(&self, market: &str) -> Result<Vec<Buyer>, RepositoryError>;
    fn save_buyer(&self, buyer: Buyer) -> Result<(), RepositoryError>;
}

pub trait TemplateRepository: Send + Sync {
    fn fetch_template(&self, key: &TemplateKey) -> Result<Option<MessageTemplate>, RepositoryError>;
}

pub trait BlastRepository: Send + Sync {
    fn insert_blast(
        &self,
        blast: DealBlast,
        recipients: Vec<DealBlastRecipient>,
    ) -> Result<(), RepositoryError>;
    fn fetch_blast(&self, id: &BlastId) -> Result<Option<DealBlast>, RepositoryError>;
    fn update_blast(&self, blast: DealBlast) -> Result<(), RepositoryError>;
    /// Recipients of a blast in rank order.
    fn recipients(&self, blast_id: &BlastId) -> Result<Vec<DealBlastRecipient>, RepositoryError>;
    fn fetch_recipient(
        &self,
        id: &RecipientId,
    ) -> Result<Option<DealBlastRecipient>, RepositoryError>;
    fn update_recipient(&self, recipient: DealBlastRecipient) -> Result<(), RepositoryError>;
    fn blasts_sent_since(
        &self,
        created_by: &UserId,
        since: DateTime<Utc>,
    ) -> Result<Vec<DealBlast>, RepositoryError>;
}

pub trait PerformanceRepository: Send + Sync {
    /// Fails with `Conflict` when the lead already has a performance record.
    fn insert_performance(&self, record: DealPerformance) -> Result<(), RepositoryError>;
    fn fetch_performance(
        &self,
        id: &PerformanceId,
    ) -> Result<Option<DealPerformance>, RepositoryError>;
    fn update_performance(&self, record: DealPerformance) -> Result<(), RepositoryError>;
    fn performance_for_buy_box(
        &self,
        id: &BuyBoxId,
    ) -> Result<Vec<DealPerformance>, RepositoryError>;
    fn performance_for_buyer(&self, id: &BuyerId) -> Result<Vec<DealPerformance>, RepositoryError>;
    fn all_performance(&self) -> Result<Vec<DealPerformance>, RepositoryError>;
}

pub trait RecommendationRepository: Send + Sync {
    fn insert_recommendation(&self, recommendation: Recommendation) -> Result<(), RepositoryError>;
    fn fetch_recommendation(
        &self,
        id: &RecommendationId,
    ) -> Result<Option<Recommendation>, RepositoryError>;
    fn update_recommendation(&self, recommendation: Recommendation) -> Result<(), RepositoryError>;
    fn recommendations_for_buy_box(
        &self,
        id: &BuyBoxId,
    ) -> Result<Vec<Recommendation>, RepositoryError>;
}

pub trait WeightsRepository: Send + Sync {
    fn active_weights(&self) -> Result<Option<ScoringWeightsVersion>, RepositoryError>;
    /// Insert or replace a version by number.
    fn save_weights(&self, version: ScoringWeightsVersion) -> Result<(), RepositoryError>;
    fn weights_history(&self) -> Result<Vec<ScoringWeightsVersion>, RepositoryError>;
}

/// Every collection the pipeline service reads or writes.
pub trait PipelineStore:
    LeadRepository
    + BuyBoxRepository
    + BuyerRepository
    + TemplateRepository
    + BlastRepository
    + PerformanceRepository
    + RecommendationRepository
    + WeightsRepository
{
}

impl<T> PipelineStore for T where
    T: LeadRepository
        + BuyBoxRepository
        + BuyerRepository
        + TemplateRepository
        + BlastRepository
        + PerformanceRepository
        + RecommendationRepository
        + WeightsRepository
{
}

/// Error enumeration for repository failures.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("record already exists")]
    Conflict,
    #[error("record not found")]
    NotFound,
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}

/// Fire-and-forget notifications (closer alerts, interested replies).
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: PipelineNotification) -> Result<(), NotifyError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineNotification {
    pub template: String,
    #[serde(default)]
    pub recipient: Option<UserId>,
    #[serde(default)]
    pub lead_id: Option<LeadId>,
    pub details: BTreeMap<String, String>,
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("notification transport unavailable: {0}")]
    Transport(String),
}
