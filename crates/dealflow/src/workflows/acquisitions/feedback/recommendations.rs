use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::super::domain::{BuyBox, BuyBoxId, RecommendationId, UserId};
use super::super::scoring::{CheckKind, CheckWeights};
use super::super::underwriting::UnderwritingDefaults;
use super::{BuyBoxHealth, FeedbackProcessor, SystemicIssue, WarningTier};

const DSCR_STEP: f64 = 0.10;
const VACANCY_STEP: f64 = 0.02;
const WEIGHT_STEP: u16 = 5;

/// Proposed tuning for one buy box.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecommendationKind {
    RaiseRequiredDscr { current: f64, proposed: f64 },
    RaiseVacancyReserve { current: f64, proposed: f64 },
    LowerPriceCeiling { current: f64, proposed: f64 },
    RaiseScoringWeight {
        check: CheckKind,
        current: u16,
        proposed: u16,
    },
}

impl RecommendationKind {
    pub const fn label(&self) -> &'static str {
        match self {
            Self::RaiseRequiredDscr { .. } => "raise_required_dscr",
            Self::RaiseVacancyReserve { .. } => "raise_vacancy_reserve",
            Self::LowerPriceCeiling { .. } => "lower_price_ceiling",
            Self::RaiseScoringWeight { .. } => "raise_scoring_weight",
        }
    }

    fn same_kind(&self, other: &Self) -> bool {
        self.label() == other.label()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationStatus {
    Pending,
    Accepted,
    Rejected,
}

impl RecommendationStatus {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub id: RecommendationId,
    pub buy_box_id: BuyBoxId,
    #[serde(flatten)]
    pub kind: RecommendationKind,
    pub status: RecommendationStatus,
    pub confidence: f64,
    pub evidence: Vec<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub decided_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub decided_by: Option<UserId>,
    #[serde(default)]
    pub decision_note: Option<String>,
}

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum RecommendationError {
    #[error("recommendation is {} and can no longer be decided", .current.label())]
    NotPending { current: RecommendationStatus },
}

impl Recommendation {
    pub fn ensure_pending(&self) -> Result<(), RecommendationError> {
        if self.status != RecommendationStatus::Pending {
            return Err(RecommendationError::NotPending {
                current: self.status,
            });
        }
        Ok(())
    }

    pub fn decide(
        &mut self,
        status: RecommendationStatus,
        decided_by: UserId,
        note: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), RecommendationError> {
        self.ensure_pending()?;
        self.status = status;
        self.decided_by = Some(decided_by);
        self.decision_note = note;
        self.decided_at = Some(now);
        Ok(())
    }

    /// Apply a buy box change. Returns false for weight changes, which are versioned separately.
    pub fn apply_to(&self, buy_box: &mut BuyBox, defaults: &UnderwritingDefaults) -> bool {
        match &self.kind {
            RecommendationKind::RaiseRequiredDscr { proposed, .. } => {
                buy_box
                    .financing
                    .get_or_insert_with(|| defaults.default_financing())
                    .required_dscr = *proposed;
                true
            }
            RecommendationKind::RaiseVacancyReserve { proposed, .. } => {
                buy_box
                    .financing
                    .get_or_insert_with(|| defaults.default_financing())
                    .vacancy_rate = Some(*proposed);
                true
            }
            RecommendationKind::LowerPriceCeiling { proposed, .. } => {
                buy_box.max_price = Some(*proposed);
                true
            }
            RecommendationKind::RaiseScoringWeight { .. } => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeightsStatus {
    Active,
    Archived,
}

/// Versioned checklist weights; at most one version is active.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringWeightsVersion {
    pub version: u32,
    pub weights: CheckWeights,
    pub status: WeightsStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub created_by: Option<UserId>,
    #[serde(default)]
    pub source_recommendation: Option<RecommendationId>,
    #[serde(default)]
    pub archived_at: Option<DateTime<Utc>>,
}

impl ScoringWeightsVersion {
    /// Successor version carrying the recommended weight change.
    pub fn successor(
        &self,
        recommendation: &Recommendation,
        created_by: UserId,
        now: DateTime<Utc>,
    ) -> Option<Self> {
        let RecommendationKind::RaiseScoringWeight {
            check, proposed, ..
        } = &recommendation.kind
        else {
            return None;
        };

        Some(Self {
            version: self.version + 1,
            weights: self.weights.with_weight(*check, *proposed),
            status: WeightsStatus::Active,
            created_at: now,
            created_by: Some(created_by),
            source_recommendation: Some(recommendation.id.clone()),
            archived_at: None,
        })
    }
}

impl FeedbackProcessor {
    /// Proposals for a buy box, skipping kinds that already have a pending recommendation.
    pub fn recommend(
        &self,
        buy_box: &BuyBox,
        health: &BuyBoxHealth,
        weights: &CheckWeights,
        defaults: &UnderwritingDefaults,
        pending: &[Recommendation],
        now: DateTime<Utc>,
        mut next_id: impl FnMut() -> RecommendationId,
    ) -> Vec<Recommendation> {
        if health.sample_size < self.config().min_sample_size {
            return Vec::new();
        }

        let confidence = self.confidence(health);
        let sample = format!(
            "{} periods across {} deals, A/B rate {:.0}%",
            health.sample_size,
            health.deal_count,
            health.ab_rate * 100.0
        );
        let financing = buy_box.financing.as_ref();
        let mut proposals = Vec::new();

        if health.has_issue(SystemicIssue::DscrShortfall) {
            let current = financing
                .map(|terms| terms.required_dscr)
                .unwrap_or(defaults.required_dscr);
            proposals.push((
                RecommendationKind::RaiseRequiredDscr {
                    current,
                    proposed: round_to(current + DSCR_STEP, 2),
                },
                format!(
                    "{:.0}% of periods fell below the underwritten DSCR",
                    health.dscr_shortfall_rate * 100.0
                ),
            ));
        }

        if health.has_issue(SystemicIssue::RentShortfall) {
            let current = financing
                .and_then(|terms| terms.vacancy_rate)
                .unwrap_or(defaults.vacancy_rate);
            proposals.push((
                RecommendationKind::RaiseVacancyReserve {
                    current,
                    proposed: round_to(current + VACANCY_STEP, 3),
                },
                format!(
                    "average rent variance {:.1}%",
                    health.avg_rent_variance * 100.0
                ),
            ));
        }

        if health.has_issue(SystemicIssue::CashFlowShortfall) {
            if let Some(current) = buy_box.max_price {
                let cut = (-health.avg_cash_flow_variance / 2.0).clamp(0.05, 0.15);
                proposals.push((
                    RecommendationKind::LowerPriceCeiling {
                        current,
                        proposed: (current * (1.0 - cut) / 1000.0).round() * 1000.0,
                    },
                    format!(
                        "average cash flow variance {:.1}%",
                        health.avg_cash_flow_variance * 100.0
                    ),
                ));
            }
        }

        if health.warning_tier == WarningTier::Critical {
            let current = weights.weight(CheckKind::Price);
            proposals.push((
                RecommendationKind::RaiseScoringWeight {
                    check: CheckKind::Price,
                    current,
                    proposed: current + WEIGHT_STEP,
                },
                "A/B rate is in the critical tier".to_string(),
            ));
        }

        proposals
            .into_iter()
            .filter(|(kind, _)| {
                !pending.iter().any(|existing| {
                    existing.buy_box_id == buy_box.id
                        && existing.status == RecommendationStatus::Pending
                        && existing.kind.same_kind(kind)
                })
            })
            .map(|(kind, finding)| Recommendation {
                id: next_id(),
                buy_box_id: buy_box.id.clone(),
                kind,
                status: RecommendationStatus::Pending,
                confidence,
                evidence: vec![finding, sample.clone()],
                created_at: now,
                decided_at: None,
                decided_by: None,
                decision_note: None,
            })
            .collect()
    }

    /// Grows with sample size and with how far the box sits below the warning line.
    fn confidence(&self, health: &BuyBoxHealth) -> f64 {
        let sample = (health.sample_size as f64 / 12.0).min(1.0);
        let gap = (self.config().warning_ab_rate - health.ab_rate).max(0.0);
        round_to((0.4 + 0.35 * sample + gap).min(0.95), 2)
    }
}

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}
