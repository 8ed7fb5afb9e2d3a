mod config;
mod policy;
mod rules;

pub use config::{default_major_exclusions, CheckKind, CheckWeights, GradeThresholds, ScoringConfig};
pub use policy::{cash_flow_inputs, underwrite};

pub(crate) use rules::scan_exclusions;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::domain::{BuyBox, BuyBoxId, Grade, Lead, LeadScore, Strategy};
use super::underwriting::{CashFlowResult, UnderwritingDefaults};

/// Stateless grader applying the rubric configuration to a lead.
pub struct ScoringEngine {
    config: ScoringConfig,
    underwriting: UnderwritingDefaults,
}

impl ScoringEngine {
    pub fn new(config: ScoringConfig, underwriting: UnderwritingDefaults) -> Self {
        Self {
            config,
            underwriting,
        }
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// Grade a lead against the active buy boxes for its market.
    ///
    /// `weights` overrides the configured check weights, e.g. with the active
    /// versioned weight set.
    pub fn score(
        &self,
        lead: &Lead,
        buy_boxes: &[BuyBox],
        weights: Option<&CheckWeights>,
    ) -> ScoreOutcome {
        let weights = weights.unwrap_or(&self.config.weights);
        let market = lead.market_key();

        let mut best: Option<(&BuyBox, rules::BoxEvaluation, u8)> = None;
        for buy_box in buy_boxes
            .iter()
            .filter(|candidate| candidate.active && candidate.market.eq_ignore_ascii_case(&market))
        {
            let evaluation =
                rules::evaluate_box(lead, buy_box, weights, &self.config.major_exclusions);
            let score = evaluation.raw_score(self.config.exclusion_penalty);
            let better = match &best {
                Some((_, _, best_score)) => score > *best_score,
                None => true,
            };
            if better {
                best = Some((buy_box, evaluation, score));
            }
        }

        let Some((buy_box, evaluation, score)) = best else {
            let exclusion_hits = scan_exclusions(lead, &[], &self.config.major_exclusions);
            return ScoreOutcome {
                score: 0,
                grade: Grade::Dead,
                buy_box_id: None,
                buy_box_name: None,
                strategy: lead.strategy,
                requires_cash_flow: false,
                reasons: vec![format!("no active buy box covers market {market}")],
                failed_checks: vec!["market".to_string()],
                exclusion_hits,
                checks: Vec::new(),
                cash_flow: None,
            };
        };

        let mut reasons = Vec::new();
        let mut failed_checks = Vec::new();
        for check in &evaluation.checks {
            if check.passed {
                reasons.push(check.notes.clone());
            } else {
                failed_checks.push(format!("{}: {}", check.check.label(), check.notes));
            }
        }
        if evaluation.hard_fail {
            reasons.push("property type mismatch is disqualifying".to_string());
        }
        if !evaluation.exclusion_hits.is_empty() {
            reasons.push(format!(
                "exclusion phrases matched ({}): -{} points",
                evaluation.exclusion_hits.join(", "),
                self.config.exclusion_penalty
            ));
        }

        let mut grade = self.config.thresholds.grade_for(score);
        reasons.push(format!(
            "scored {score} against {} ({} of {} weighted points)",
            buy_box.name, evaluation.earned, evaluation.available
        ));

        let requires_cash_flow = buy_box.requires_cash_flow();
        let cash_flow = if requires_cash_flow {
            let result = underwrite(lead, Some(buy_box), &self.underwriting);
            if let Some(failure) = result.failure() {
                failed_checks.push(failure.summary());
            }
            let (gated, note) = policy::gate_grade(grade, &result);
            grade = gated;
            if let Some(note) = note {
                reasons.push(note);
            }
            Some(result)
        } else {
            None
        };

        ScoreOutcome {
            score,
            grade,
            buy_box_id: Some(buy_box.id.clone()),
            buy_box_name: Some(buy_box.name.clone()),
            strategy: Some(buy_box.strategy),
            requires_cash_flow,
            reasons,
            failed_checks,
            exclusion_hits: evaluation.exclusion_hits,
            checks: evaluation.checks,
            cash_flow,
        }
    }
}

/// Discrete checklist result kept for audits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub check: CheckKind,
    pub passed: bool,
    pub weight: u16,
    pub notes: String,
}

/// Scoring output for the winning buy box.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreOutcome {
    pub score: u8,
    pub grade: Grade,
    pub buy_box_id: Option<BuyBoxId>,
    pub buy_box_name: Option<String>,
    pub strategy: Option<Strategy>,
    pub requires_cash_flow: bool,
    pub reasons: Vec<String>,
    pub failed_checks: Vec<String>,
    pub exclusion_hits: Vec<String>,
    pub checks: Vec<CheckResult>,
    pub cash_flow: Option<CashFlowResult>,
}

impl ScoreOutcome {
    /// Merge into the lead's score record, keeping any human override.
    pub fn apply_to(self, lead: &mut Lead, scored_at: DateTime<Utc>) {
        let grade_override = lead
            .score
            .take()
            .and_then(|previous| previous.grade_override);

        lead.score = Some(LeadScore {
            score: self.score,
            grade: self.grade,
            buy_box_id: self.buy_box_id,
            strategy: self.strategy,
            requires_cash_flow: self.requires_cash_flow,
            reasons: self.reasons,
            failed_checks: self.failed_checks,
            exclusion_hits: self.exclusion_hits,
            cash_flow: self.cash_flow,
            scored_at,
            grade_override,
        });
    }
}
