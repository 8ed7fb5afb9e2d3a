use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::super::domain::{BuyBoxId, BuyerId, LeadId, PerformanceId};
use super::super::underwriting::CashFlowResult;

/// Underwritten expectations locked when the deal closes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProForma {
    pub purchase_price: f64,
    pub monthly_rent: f64,
    pub monthly_noi: f64,
    pub monthly_cash_flow: f64,
    #[serde(default)]
    pub dscr: Option<f64>,
    pub required_dscr: f64,
}

impl ProForma {
    pub fn from_cash_flow(purchase_price: f64, result: &CashFlowResult) -> Self {
        Self {
            purchase_price,
            monthly_rent: result.monthly_gross_income,
            monthly_noi: result.monthly_noi,
            monthly_cash_flow: result.monthly_cash_flow,
            dscr: result.dscr,
            required_dscr: result.required_dscr,
        }
    }
}

/// Monthly averages observed over one reporting period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodActuals {
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub monthly_rent: f64,
    pub monthly_noi: f64,
    pub monthly_cash_flow: f64,
    #[serde(default)]
    pub dscr: Option<f64>,
}

/// Relative variance of actuals against the pro forma (-0.10 = 10% short).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PeriodVariance {
    pub rent: f64,
    pub noi: f64,
    pub cash_flow: f64,
    pub dscr_shortfall: bool,
}

impl PeriodVariance {
    pub fn between(pro_forma: &ProForma, actuals: &PeriodActuals) -> Self {
        Self {
            rent: relative_variance(actuals.monthly_rent, pro_forma.monthly_rent),
            noi: relative_variance(actuals.monthly_noi, pro_forma.monthly_noi),
            cash_flow: relative_variance(actuals.monthly_cash_flow, pro_forma.monthly_cash_flow),
            dscr_shortfall: actuals
                .dscr
                .map(|dscr| dscr < pro_forma.required_dscr)
                .unwrap_or(false),
        }
    }

    pub fn worst(&self) -> f64 {
        self.noi.min(self.cash_flow)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PerformanceGrade {
    A,
    B,
    C,
    D,
}

impl PerformanceGrade {
    pub fn from_variance(variance: &PeriodVariance) -> Self {
        let worst = variance.worst();
        if worst >= -0.05 {
            Self::A
        } else if worst >= -0.15 {
            Self::B
        } else if worst >= -0.30 {
            Self::C
        } else {
            Self::D
        }
    }

    pub const fn is_top_tier(self) -> bool {
        matches!(self, Self::A | Self::B)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformancePeriod {
    pub actuals: PeriodActuals,
    pub variance: PeriodVariance,
    pub grade: PerformanceGrade,
    pub recorded_at: DateTime<Utc>,
}

/// Closed deal with its locked pro forma and append-only period history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DealPerformance {
    pub id: PerformanceId,
    pub lead_id: LeadId,
    #[serde(default)]
    pub buy_box_id: Option<BuyBoxId>,
    #[serde(default)]
    pub buyer_id: Option<BuyerId>,
    pub closed_at: DateTime<Utc>,
    pub pro_forma: ProForma,
    #[serde(default)]
    pub periods: Vec<PerformancePeriod>,
}

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum PeriodError {
    #[error("period ends ({end}) before it starts ({start})")]
    InvertedPeriod { start: NaiveDate, end: NaiveDate },
    #[error("period starting {start} overlaps the last recorded period ending {last_end}")]
    Overlapping { start: NaiveDate, last_end: NaiveDate },
}

impl DealPerformance {
    /// Grade and append a period; earlier periods are never rewritten.
    pub fn append_period(
        &mut self,
        actuals: PeriodActuals,
        now: DateTime<Utc>,
    ) -> Result<&PerformancePeriod, PeriodError> {
        if actuals.period_end < actuals.period_start {
            return Err(PeriodError::InvertedPeriod {
                start: actuals.period_start,
                end: actuals.period_end,
            });
        }
        if let Some(last) = self.periods.last() {
            if actuals.period_start <= last.actuals.period_end {
                return Err(PeriodError::Overlapping {
                    start: actuals.period_start,
                    last_end: last.actuals.period_end,
                });
            }
        }

        let variance = PeriodVariance::between(&self.pro_forma, &actuals);
        self.periods.push(PerformancePeriod {
            grade: PerformanceGrade::from_variance(&variance),
            variance,
            actuals,
            recorded_at: now,
        });

        let index = self.periods.len() - 1;
        Ok(&self.periods[index])
    }
}

/// `(actual - expected) / |expected|`; a zero expectation only penalises shortfalls.
pub fn relative_variance(actual: f64, expected: f64) -> f64 {
    if expected.abs() < f64::EPSILON {
        if actual >= 0.0 {
            0.0
        } else {
            -1.0
        }
    } else {
        (actual - expected) / expected.abs()
    }
}
