use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::super::domain::{
    BuyBox, BuyBoxId, BuyerId, LeadId, PerformanceId, RecommendationId, UserId,
};
use super::super::feedback::{
    BuyBoxHealth, DealPerformance, PeriodActuals, ProForma, Recommendation,
    RecommendationKind, RecommendationStatus, ScoringWeightsVersion, WeightsStatus,
};
use super::super::repository::{Notifier, PipelineStore, RepositoryError};
use super::super::scoring::underwrite;
use super::{DealPipelineService, PipelineError};

/// Lock the pro forma for a closed lead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloseRequest {
    pub lead_id: LeadId,
    #[serde(default)]
    pub buy_box_id: Option<BuyBoxId>,
    #[serde(default)]
    pub buyer_id: Option<BuyerId>,
    #[serde(default)]
    pub purchase_price: Option<f64>,
    /// Explicit pro forma; otherwise derived from the lead's underwriting.
    #[serde(default)]
    pub pro_forma: Option<ProForma>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodRecorded {
    pub performance: DealPerformance,
    pub buy_box_health: Option<BuyBoxHealth>,
    pub buyer_engagement: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FeedbackSweep {
    pub buy_boxes_updated: usize,
    pub buyers_updated: usize,
    pub failures: Vec<String>,
}

impl<S, N> DealPipelineService<S, N>
where
    S: PipelineStore + 'static,
    N: Notifier + 'static,
{
    pub fn record_close(&self, request: CloseRequest) -> Result<DealPerformance, PipelineError> {
        let lead = self.fetch_lead(&request.lead_id)?;
        let buy_box_id = request.buy_box_id.clone().or_else(|| {
            lead.score
                .as_ref()
                .and_then(|score| score.buy_box_id.clone())
        });
        let purchase_price = request.purchase_price.unwrap_or(lead.terms.asking_price);

        let pro_forma = match request.pro_forma {
            Some(pro_forma) => pro_forma,
            None => {
                let buy_box = match &buy_box_id {
                    Some(id) => self.store.fetch_buy_box(id)?,
                    None => None,
                };
                let mut priced = lead.clone();
                priced.terms.asking_price = purchase_price;
                let result = underwrite(&priced, buy_box.as_ref(), &self.underwriting);
                if let Some(error) = &result.error {
                    return Err(PipelineError::validation("pro_forma", error.clone()));
                }
                ProForma::from_cash_flow(purchase_price, &result)
            }
        };

        let record = DealPerformance {
            id: PerformanceId(self.next_id("perf")),
            lead_id: lead.id.clone(),
            buy_box_id,
            buyer_id: request.buyer_id,
            closed_at: self.now(),
            pro_forma,
            periods: Vec::new(),
        };

        match self.store.insert_performance(record.clone()) {
            Ok(()) => {}
            Err(RepositoryError::Conflict) => {
                return Err(PipelineError::StateConflict {
                    entity: "lead",
                    current: "closed".to_string(),
                    action: "lock a second pro forma",
                })
            }
            Err(other) => return Err(other.into()),
        }
        info!(performance_id = %record.id, lead_id = %record.lead_id, "pro forma locked");

        Ok(record)
    }

    /// Append actuals, then refresh the linked buy box and buyer on a best-effort basis.
    pub fn append_period(
        &self,
        performance_id: &PerformanceId,
        actuals: PeriodActuals,
    ) -> Result<PeriodRecorded, PipelineError> {
        let mut record = self
            .store
            .fetch_performance(performance_id)?
            .ok_or_else(|| PipelineError::not_found("performance", performance_id))?;

        let grade = record.append_period(actuals, self.now())?.grade;
        self.store.update_performance(record.clone())?;
        info!(performance_id = %record.id, grade = ?grade, "performance period recorded");

        let buy_box_health = record.buy_box_id.as_ref().and_then(|id| {
            self.refresh_buy_box_health(id)
                .map_err(|error| warn!(buy_box_id = %id, %error, "buy box health refresh failed"))
                .ok()
                .flatten()
        });
        let buyer_engagement = record.buyer_id.as_ref().and_then(|id| {
            self.refresh_buyer_engagement(id)
                .map_err(|error| warn!(buyer_id = %id, %error, "buyer engagement refresh failed"))
                .ok()
                .flatten()
        });

        Ok(PeriodRecorded {
            performance: record,
            buy_box_health,
            buyer_engagement,
        })
    }

    pub fn refresh_buy_box_health(
        &self,
        buy_box_id: &BuyBoxId,
    ) -> Result<Option<BuyBoxHealth>, PipelineError> {
        let mut buy_box = self.fetch_buy_box(buy_box_id)?;
        let records = self.store.performance_for_buy_box(buy_box_id)?;
        let Some(health) = self.feedback.buy_box_health(&records, self.now()) else {
            return Ok(None);
        };

        info!(
            buy_box_id = %buy_box_id,
            sample_size = health.sample_size,
            ab_rate = health.ab_rate,
            tier = ?health.warning_tier,
            "buy box health updated"
        );
        buy_box.health = Some(health.clone());
        self.store.save_buy_box(buy_box)?;
        Ok(Some(health))
    }

    pub fn refresh_buyer_engagement(&self, buyer_id: &BuyerId) -> Result<Option<f64>, PipelineError> {
        let mut buyer = self
            .store
            .fetch_buyer(buyer_id)?
            .ok_or_else(|| PipelineError::not_found("buyer", buyer_id))?;
        let records = self.store.performance_for_buyer(buyer_id)?;
        let Some(engagement) = self.feedback.buyer_engagement(&records) else {
            return Ok(None);
        };

        info!(buyer_id = %buyer_id, engagement, "buyer engagement updated");
        buyer.engagement_score = engagement;
        self.store.save_buyer(buyer)?;
        Ok(Some(engagement))
    }

    /// Recompute every buy box and buyer with performance data; failures are collected.
    pub fn recalculate_feedback(&self) -> Result<FeedbackSweep, PipelineError> {
        let records = self.store.all_performance()?;
        let buy_boxes: BTreeSet<BuyBoxId> = records
            .iter()
            .filter_map(|record| record.buy_box_id.clone())
            .collect();
        let buyers: BTreeSet<BuyerId> = records
            .iter()
            .filter_map(|record| record.buyer_id.clone())
            .collect();

        let mut sweep = FeedbackSweep::default();
        for id in &buy_boxes {
            match self.refresh_buy_box_health(id) {
                Ok(Some(_)) => sweep.buy_boxes_updated += 1,
                Ok(None) => {}
                Err(error) => {
                    warn!(buy_box_id = %id, %error, "buy box feedback failed");
                    sweep.failures.push(format!("buy box {id}: {error}"));
                }
            }
        }
        for id in &buyers {
            match self.refresh_buyer_engagement(id) {
                Ok(Some(_)) => sweep.buyers_updated += 1,
                Ok(None) => {}
                Err(error) => {
                    warn!(buyer_id = %id, %error, "buyer feedback failed");
                    sweep.failures.push(format!("buyer {id}: {error}"));
                }
            }
        }

        info!(
            buy_boxes = sweep.buy_boxes_updated,
            buyers = sweep.buyers_updated,
            failures = sweep.failures.len(),
            "feedback sweep complete"
        );
        Ok(sweep)
    }

    pub fn generate_recommendations(
        &self,
        buy_box_id: &BuyBoxId,
    ) -> Result<Vec<Recommendation>, PipelineError> {
        let buy_box = self.fetch_buy_box(buy_box_id)?;
        let records = self.store.performance_for_buy_box(buy_box_id)?;
        let now = self.now();
        let Some(health) = self.feedback.buy_box_health(&records, now) else {
            return Ok(Vec::new());
        };

        let weights = self
            .store
            .active_weights()?
            .map(|version| version.weights)
            .unwrap_or(self.default_weights);
        let pending = self.store.recommendations_for_buy_box(buy_box_id)?;

        let proposals = self.feedback.recommend(
            &buy_box,
            &health,
            &weights,
            &self.underwriting,
            &pending,
            now,
            || RecommendationId(self.next_id("rec")),
        );
        for recommendation in &proposals {
            self.store.insert_recommendation(recommendation.clone())?;
        }
        info!(
            buy_box_id = %buy_box_id,
            generated = proposals.len(),
            "recommendations generated"
        );

        Ok(proposals)
    }

    pub fn accept_recommendation(
        &self,
        id: &RecommendationId,
        decided_by: UserId,
        note: Option<String>,
    ) -> Result<Recommendation, PipelineError> {
        let mut recommendation = self.fetch_recommendation(id)?;
        recommendation.ensure_pending()?;
        let now = self.now();

        match &recommendation.kind {
            RecommendationKind::RaiseScoringWeight { .. } => {
                self.activate_weights(&recommendation, decided_by.clone())?;
            }
            _ => {
                let mut buy_box = self.fetch_buy_box(&recommendation.buy_box_id)?;
                recommendation.apply_to(&mut buy_box, &self.underwriting);
                self.save_buy_box(buy_box)?;
            }
        }

        recommendation.decide(RecommendationStatus::Accepted, decided_by, note, now)?;
        self.store.update_recommendation(recommendation.clone())?;
        info!(
            recommendation_id = %recommendation.id,
            kind = recommendation.kind.label(),
            "recommendation accepted"
        );
        Ok(recommendation)
    }

    pub fn reject_recommendation(
        &self,
        id: &RecommendationId,
        decided_by: UserId,
        note: Option<String>,
    ) -> Result<Recommendation, PipelineError> {
        let mut recommendation = self.fetch_recommendation(id)?;
        recommendation.decide(RecommendationStatus::Rejected, decided_by, note, self.now())?;
        self.store.update_recommendation(recommendation.clone())?;
        info!(recommendation_id = %recommendation.id, "recommendation rejected");
        Ok(recommendation)
    }

    /// Archive the active weight set and activate its successor.
    fn activate_weights(
        &self,
        recommendation: &Recommendation,
        decided_by: UserId,
    ) -> Result<ScoringWeightsVersion, PipelineError> {
        let now = self.now();
        let current = match self.store.active_weights()? {
            Some(version) => version,
            None => ScoringWeightsVersion {
                version: 1,
                weights: self.default_weights,
                status: WeightsStatus::Active,
                created_at: now,
                created_by: None,
                source_recommendation: None,
                archived_at: None,
            },
        };

        let next = current
            .successor(recommendation, decided_by, now)
            .ok_or_else(|| {
                PipelineError::validation("recommendation", "not a scoring weight change")
            })?;

        self.store.save_weights(ScoringWeightsVersion {
            status: WeightsStatus::Archived,
            archived_at: Some(now),
            ..current
        })?;
        self.store.save_weights(next.clone())?;
        info!(version = next.version, "scoring weights version activated");
        Ok(next)
    }

    fn fetch_buy_box(&self, id: &BuyBoxId) -> Result<BuyBox, PipelineError> {
        self.store
            .fetch_buy_box(id)?
            .ok_or_else(|| PipelineError::not_found("buy box", id))
    }

    fn fetch_recommendation(&self, id: &RecommendationId) -> Result<Recommendation, PipelineError> {
        self.store
            .fetch_recommendation(id)?
            .ok_or_else(|| PipelineError::not_found("recommendation", id))
    }
}
