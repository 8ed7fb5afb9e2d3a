//! Mutex-guarded in-memory store and notifier used by the API binary and tests.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use super::blast::{DealBlast, DealBlastRecipient, MessageTemplate, TemplateKey};
use super::domain::{
    same_place, BlastId, BuyBox, BuyBoxId, Buyer, BuyerId, Lead, LeadId, PerformanceId,
    RecipientId, RecommendationId, UserId,
};
use super::feedback::{DealPerformance, Recommendation, ScoringWeightsVersion, WeightsStatus};
use super::repository::{
    BlastRepository, BuyBoxRepository, BuyerRepository, LeadRepository, Notifier, NotifyError,
    PerformanceRepository, PipelineNotification, RecommendationRepository, RepositoryError,
    TemplateRepository, WeightsRepository,
};

#[derive(Debug, Default)]
pub struct InMemoryPipelineStore {
    leads: Mutex<HashMap<LeadId, Lead>>,
    buy_boxes: Mutex<HashMap<BuyBoxId, BuyBox>>,
    buyers: Mutex<HashMap<BuyerId, Buyer>>,
    templates: Mutex<HashMap<TemplateKey, MessageTemplate>>,
    blasts: Mutex<HashMap<BlastId, DealBlast>>,
    recipients: Mutex<HashMap<RecipientId, DealBlastRecipient>>,
    performance: Mutex<HashMap<PerformanceId, DealPerformance>>,
    recommendations: Mutex<HashMap<RecommendationId, Recommendation>>,
    weights: Mutex<Vec<ScoringWeightsVersion>>,
}

fn guard<'a, T>(
    mutex: &'a Mutex<T>,
    collection: &str,
) -> Result<MutexGuard<'a, T>, RepositoryError> {
    mutex
        .lock()
        .map_err(|_| RepositoryError::Unavailable(format!("{collection} lock poisoned")))
}

impl InMemoryPipelineStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn save_template(&self, template: MessageTemplate) -> Result<(), RepositoryError> {
        guard(&self.templates, "templates")?.insert(template.key.clone(), template);
        Ok(())
    }

    pub fn all_leads(&self) -> Result<Vec<Lead>, RepositoryError> {
        let mut leads: Vec<Lead> = guard(&self.leads, "leads")?.values().cloned().collect();
        leads.sort_by(|left, right| left.id.cmp(&right.id));
        Ok(leads)
    }
}

impl LeadRepository for InMemoryPipelineStore {
    fn fetch_lead(&self, id: &LeadId) -> Result<Option<Lead>, RepositoryError> {
        Ok(guard(&self.leads, "leads")?.get(id).cloned())
    }

    fn save_lead(&self, lead: Lead) -> Result<(), RepositoryError> {
        guard(&self.leads, "leads")?.insert(lead.id.clone(), lead);
        Ok(())
    }
}

impl BuyBoxRepository for InMemoryPipelineStore {
    fn fetch_buy_box(&self, id: &BuyBoxId) -> Result<Option<BuyBox>, RepositoryError> {
        Ok(guard(&self.buy_boxes, "buy boxes")?.get(id).cloned())
    }

    fn buy_boxes_in_market(&self, market: &str) -> Result<Vec<BuyBox>, RepositoryError> {
        let mut boxes: Vec<BuyBox> = guard(&self.buy_boxes, "buy boxes")?
            .values()
            .filter(|buy_box| same_place(&buy_box.market, market))
            .cloned()
            .collect();
        boxes.sort_by(|left, right| left.id.cmp(&right.id));
        Ok(boxes)
    }

    fn save_buy_box(&self, buy_box: BuyBox) -> Result<(), RepositoryError> {
        guard(&self.buy_boxes, "buy boxes")?.insert(buy_box.id.clone(), buy_box);
        Ok(())
    }
}

impl BuyerRepository for InMemoryPipelineStore {
    fn fetch_buyer(&self, id: &BuyerId) -> Result<Option<Buyer>, RepositoryError> {
        Ok(guard(&self.buyers, "buyers")?.get(id).cloned())
    }

    fn buyers_in_market(&self, market: &str) -> Result<Vec<Buyer>, RepositoryError> {
        let mut buyers: Vec<Buyer> = guard(&self.buyers, "buyers")?
            .values()
            .filter(|buyer| buyer.in_market(market))
            .cloned()
            .collect();
        buyers.sort_by(|left, right| left.id.cmp(&right.id));
        Ok(buyers)
    }

    fn save_buyer(&self, buyer: Buyer) -> Result<(), RepositoryError> {
        guard(&self.buyers, "buyers")?.insert(buyer.id.clone(), buyer);
        Ok(())
    }
}

impl TemplateRepository for InMemoryPipelineStore {
    fn fetch_template(&self, key: &TemplateKey) -> Result<Option<MessageTemplate>, RepositoryError> {
        Ok(guard(&self.templates, "templates")?.get(key).cloned())
    }
}

impl BlastRepository for InMemoryPipelineStore {
    fn insert_blast(
        &self,
        blast: DealBlast,
        recipients: Vec<DealBlastRecipient>,
    ) -> Result<(), RepositoryError> {
        let mut blasts = guard(&self.blasts, "blasts")?;
        if blasts.contains_key(&blast.id) {
            return Err(RepositoryError::Conflict);
        }
        let mut stored = guard(&self.recipients, "recipients")?;
        for recipient in recipients {
            stored.insert(recipient.id.clone(), recipient);
        }
        blasts.insert(blast.id.clone(), blast);
        Ok(())
    }

    fn fetch_blast(&self, id: &BlastId) -> Result<Option<DealBlast>, RepositoryError> {
        Ok(guard(&self.blasts, "blasts")?.get(id).cloned())
    }

    fn update_blast(&self, blast: DealBlast) -> Result<(), RepositoryError> {
        let mut blasts = guard(&self.blasts, "blasts")?;
        match blasts.get_mut(&blast.id) {
            Some(existing) => {
                *existing = blast;
                Ok(())
            }
            None => Err(RepositoryError::NotFound),
        }
    }

    fn recipients(&self, blast_id: &BlastId) -> Result<Vec<DealBlastRecipient>, RepositoryError> {
        let mut rows: Vec<DealBlastRecipient> = guard(&self.recipients, "recipients")?
            .values()
            .filter(|recipient| &recipient.blast_id == blast_id)
            .cloned()
            .collect();
        rows.sort_by_key(|recipient| recipient.rank);
        Ok(rows)
    }

    fn fetch_recipient(
        &self,
        id: &RecipientId,
    ) -> Result<Option<DealBlastRecipient>, RepositoryError> {
        Ok(guard(&self.recipients, "recipients")?.get(id).cloned())
    }

    fn update_recipient(&self, recipient: DealBlastRecipient) -> Result<(), RepositoryError> {
        let mut rows = guard(&self.recipients, "recipients")?;
        match rows.get_mut(&recipient.id) {
            Some(existing) => {
                *existing = recipient;
                Ok(())
            }
            None => Err(RepositoryError::NotFound),
        }
    }

    fn blasts_sent_since(
        &self,
        created_by: &UserId,
        since: DateTime<Utc>,
    ) -> Result<Vec<DealBlast>, RepositoryError> {
        Ok(guard(&self.blasts, "blasts")?
            .values()
            .filter(|blast| &blast.created_by == created_by)
            .filter(|blast| blast.sent_at.map(|sent| sent > since).unwrap_or(false))
            .cloned()
            .collect())
    }
}

impl PerformanceRepository for InMemoryPipelineStore {
    fn insert_performance(&self, record: DealPerformance) -> Result<(), RepositoryError> {
        let mut records = guard(&self.performance, "performance")?;
        let duplicate = records.contains_key(&record.id)
            || records
                .values()
                .any(|existing| existing.lead_id == record.lead_id);
        if duplicate {
            return Err(RepositoryError::Conflict);
        }
        records.insert(record.id.clone(), record);
        Ok(())
    }

    fn fetch_performance(
        &self,
        id: &PerformanceId,
    ) -> Result<Option<DealPerformance>, RepositoryError> {
        Ok(guard(&self.performance, "performance")?.get(id).cloned())
    }

    fn update_performance(&self, record: DealPerformance) -> Result<(), RepositoryError> {
        let mut records = guard(&self.performance, "performance")?;
        match records.get_mut(&record.id) {
            Some(existing) => {
                *existing = record;
                Ok(())
            }
            None => Err(RepositoryError::NotFound),
        }
    }

    fn performance_for_buy_box(
        &self,
        id: &BuyBoxId,
    ) -> Result<Vec<DealPerformance>, RepositoryError> {
        self.filtered_performance(|record| record.buy_box_id.as_ref() == Some(id))
    }

    fn performance_for_buyer(&self, id: &BuyerId) -> Result<Vec<DealPerformance>, RepositoryError> {
        self.filtered_performance(|record| record.buyer_id.as_ref() == Some(id))
    }

    fn all_performance(&self) -> Result<Vec<DealPerformance>, RepositoryError> {
        self.filtered_performance(|_| true)
    }
}

impl InMemoryPipelineStore {
    fn filtered_performance(
        &self,
        keep: impl Fn(&DealPerformance) -> bool,
    ) -> Result<Vec<DealPerformance>, RepositoryError> {
        let mut records: Vec<DealPerformance> = guard(&self.performance, "performance")?
            .values()
            .filter(|record| keep(record))
            .cloned()
            .collect();
        records.sort_by(|left, right| left.id.cmp(&right.id));
        Ok(records)
    }
}

impl RecommendationRepository for InMemoryPipelineStore {
    fn insert_recommendation(&self, recommendation: Recommendation) -> Result<(), RepositoryError> {
        let mut rows = guard(&self.recommendations, "recommendations")?;
        if rows.contains_key(&recommendation.id) {
            return Err(RepositoryError::Conflict);
        }
        rows.insert(recommendation.id.clone(), recommendation);
        Ok(())
    }

    fn fetch_recommendation(
        &self,
        id: &RecommendationId,
    ) -> Result<Option<Recommendation>, RepositoryError> {
        Ok(guard(&self.recommendations, "recommendations")?
            .get(id)
            .cloned())
    }

    fn update_recommendation(&self, recommendation: Recommendation) -> Result<(), RepositoryError> {
        let mut rows = guard(&self.recommendations, "recommendations")?;
        match rows.get_mut(&recommendation.id) {
            Some(existing) => {
                *existing = recommendation;
                Ok(())
            }
            None => Err(RepositoryError::NotFound),
        }
    }

    fn recommendations_for_buy_box(
        &self,
        id: &BuyBoxId,
    ) -> Result<Vec<Recommendation>, RepositoryError> {
        let mut rows: Vec<Recommendation> = guard(&self.recommendations, "recommendations")?
            .values()
            .filter(|recommendation| &recommendation.buy_box_id == id)
            .cloned()
            .collect();
        rows.sort_by(|left, right| left.id.cmp(&right.id));
        Ok(rows)
    }
}

impl WeightsRepository for InMemoryPipelineStore {
    fn active_weights(&self) -> Result<Option<ScoringWeightsVersion>, RepositoryError> {
        Ok(guard(&self.weights, "weights")?
            .iter()
            .filter(|version| version.status == WeightsStatus::Active)
            .max_by_key(|version| version.version)
            .cloned())
    }

    fn save_weights(&self, version: ScoringWeightsVersion) -> Result<(), RepositoryError> {
        let mut versions = guard(&self.weights, "weights")?;
        match versions
            .iter_mut()
            .find(|existing| existing.version == version.version)
        {
            Some(existing) => *existing = version,
            None => versions.push(version),
        }
        Ok(())
    }

    fn weights_history(&self) -> Result<Vec<ScoringWeightsVersion>, RepositoryError> {
        let mut versions = guard(&self.weights, "weights")?.clone();
        versions.sort_by_key(|version| version.version);
        Ok(versions)
    }
}

/// Notifier that keeps every notification for inspection.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<PipelineNotification>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<PipelineNotification> {
        self.sent
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notification: PipelineNotification) -> Result<(), NotifyError> {
        self.sent
            .lock()
            .map_err(|_| NotifyError::Transport("notifier lock poisoned".to_string()))?
            .push(notification);
        Ok(())
    }
}
