//! Closed-deal feedback: period grading, buy box health, buyer engagement and
//! threshold recommendations.

pub mod performance;
pub mod recommendations;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use performance::{
    relative_variance, DealPerformance, PerformanceGrade, PerformancePeriod, PeriodActuals,
    PeriodError, PeriodVariance, ProForma,
};
pub use recommendations::{
    Recommendation, RecommendationError, RecommendationKind, RecommendationStatus,
    ScoringWeightsVersion, WeightsStatus,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningTier {
    None,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemicIssue {
    CashFlowShortfall,
    DscrShortfall,
    RentShortfall,
}

impl SystemicIssue {
    pub const fn label(self) -> &'static str {
        match self {
            Self::CashFlowShortfall => "cash_flow_shortfall",
            Self::DscrShortfall => "dscr_shortfall",
            Self::RentShortfall => "rent_shortfall",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GradeDistribution {
    pub a: usize,
    pub b: usize,
    pub c: usize,
    pub d: usize,
}

impl GradeDistribution {
    pub fn record(&mut self, grade: PerformanceGrade) {
        match grade {
            PerformanceGrade::A => self.a += 1,
            PerformanceGrade::B => self.b += 1,
            PerformanceGrade::C => self.c += 1,
            PerformanceGrade::D => self.d += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.a + self.b + self.c + self.d
    }

    pub fn ab_rate(&self) -> f64 {
        match self.total() {
            0 => 0.0,
            total => (self.a + self.b) as f64 / total as f64,
        }
    }
}

/// Period statistics pooled across a set of closed deals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceAggregate {
    pub deal_count: usize,
    pub period_count: usize,
    pub distribution: GradeDistribution,
    pub ab_rate: f64,
    pub avg_noi_variance: f64,
    pub avg_cash_flow_variance: f64,
    pub avg_rent_variance: f64,
    pub dscr_shortfall_rate: f64,
}

impl PerformanceAggregate {
    /// `None` when no deal has a recorded period.
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a DealPerformance>) -> Option<Self> {
        let mut deal_count = 0;
        let mut distribution = GradeDistribution::default();
        let (mut noi, mut cash_flow, mut rent) = (0.0, 0.0, 0.0);
        let mut dscr_shortfalls = 0;

        for record in records {
            if record.periods.is_empty() {
                continue;
            }
            deal_count += 1;
            for period in &record.periods {
                distribution.record(period.grade);
                noi += period.variance.noi;
                cash_flow += period.variance.cash_flow;
                rent += period.variance.rent;
                if period.variance.dscr_shortfall {
                    dscr_shortfalls += 1;
                }
            }
        }

        let period_count = distribution.total();
        if period_count == 0 {
            return None;
        }
        let count = period_count as f64;

        Some(Self {
            deal_count,
            period_count,
            distribution,
            ab_rate: distribution.ab_rate(),
            avg_noi_variance: noi / count,
            avg_cash_flow_variance: cash_flow / count,
            avg_rent_variance: rent / count,
            dscr_shortfall_rate: dscr_shortfalls as f64 / count,
        })
    }
}

/// Advisory health written onto a buy box; never changes its thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuyBoxHealth {
    pub sample_size: usize,
    pub deal_count: usize,
    pub distribution: GradeDistribution,
    pub ab_rate: f64,
    pub avg_noi_variance: f64,
    pub avg_cash_flow_variance: f64,
    pub avg_rent_variance: f64,
    pub dscr_shortfall_rate: f64,
    pub warning_tier: WarningTier,
    pub issues: Vec<SystemicIssue>,
    pub evaluated_at: DateTime<Utc>,
}

impl BuyBoxHealth {
    pub fn has_issue(&self, issue: SystemicIssue) -> bool {
        self.issues.contains(&issue)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackConfig {
    pub warning_ab_rate: f64,
    pub critical_ab_rate: f64,
    pub cash_flow_shortfall: f64,
    pub rent_shortfall: f64,
    pub dscr_shortfall_rate: f64,
    /// Periods required before recommendations are proposed.
    pub min_sample_size: usize,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            warning_ab_rate: 0.60,
            critical_ab_rate: 0.40,
            cash_flow_shortfall: -0.10,
            rent_shortfall: -0.05,
            dscr_shortfall_rate: 0.25,
            min_sample_size: 3,
        }
    }
}

pub struct FeedbackProcessor {
    config: FeedbackConfig,
}

impl FeedbackProcessor {
    pub fn new(config: FeedbackConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FeedbackConfig {
        &self.config
    }

    pub fn warning_tier(&self, ab_rate: f64) -> WarningTier {
        if ab_rate < self.config.critical_ab_rate {
            WarningTier::Critical
        } else if ab_rate < self.config.warning_ab_rate {
            WarningTier::Warning
        } else {
            WarningTier::None
        }
    }

    pub fn buy_box_health(
        &self,
        records: &[DealPerformance],
        now: DateTime<Utc>,
    ) -> Option<BuyBoxHealth> {
        let aggregate = PerformanceAggregate::from_records(records)?;

        let mut issues = Vec::new();
        if aggregate.avg_cash_flow_variance < self.config.cash_flow_shortfall {
            issues.push(SystemicIssue::CashFlowShortfall);
        }
        if aggregate.dscr_shortfall_rate >= self.config.dscr_shortfall_rate {
            issues.push(SystemicIssue::DscrShortfall);
        }
        if aggregate.avg_rent_variance < self.config.rent_shortfall {
            issues.push(SystemicIssue::RentShortfall);
        }

        Some(BuyBoxHealth {
            sample_size: aggregate.period_count,
            deal_count: aggregate.deal_count,
            distribution: aggregate.distribution,
            ab_rate: aggregate.ab_rate,
            avg_noi_variance: aggregate.avg_noi_variance,
            avg_cash_flow_variance: aggregate.avg_cash_flow_variance,
            avg_rent_variance: aggregate.avg_rent_variance,
            dscr_shortfall_rate: aggregate.dscr_shortfall_rate,
            warning_tier: self.warning_tier(aggregate.ab_rate),
            issues,
            evaluated_at: now,
        })
    }

    /// Engagement score from a buyer's closed deals, or `None` without period data.
    pub fn buyer_engagement(&self, records: &[DealPerformance]) -> Option<f64> {
        let aggregate = PerformanceAggregate::from_records(records)?;

        let mut score = aggregate.ab_rate * 100.0;
        if aggregate.deal_count >= 10 {
            score += 5.0;
        } else if aggregate.deal_count >= 5 {
            score += 2.0;
        }
        if aggregate.avg_cash_flow_variance < -0.10 {
            score -= 10.0;
        } else if aggregate.avg_cash_flow_variance > 0.05 {
            score += 5.0;
        }

        Some(score.clamp(0.0, 100.0))
    }
}
