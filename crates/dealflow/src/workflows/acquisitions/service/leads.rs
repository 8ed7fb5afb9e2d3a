use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::super::domain::{
    BuyBox, Channel, Grade, GradeOverride, HandoffStatus, Lead, LeadId, LeadRouting, LeadScore,
    Priority, Route, RouteOverride, UserId,
};
use super::super::matching::MatchReport;
use super::super::repository::{Notifier, PipelineStore};
use super::super::routing::RoutingEffect;
use super::{DealPipelineService, PipelineError};

/// Score and routing as exposed to API callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeadScoreView {
    pub lead_id: LeadId,
    pub effective_grade: Grade,
    pub score: LeadScore,
    pub routing: Option<LeadRouting>,
    pub intake_locked: bool,
    pub closer_handoff: HandoffStatus,
}

impl LeadScoreView {
    fn from_lead(lead: &Lead) -> Option<Self> {
        let score = lead.score.clone()?;
        Some(Self {
            lead_id: lead.id.clone(),
            effective_grade: score.effective_grade(),
            score,
            routing: lead.routing.clone(),
            intake_locked: lead.intake_locked,
            closer_handoff: lead.closer_handoff,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MatchQuery {
    #[serde(default)]
    pub threshold: Option<u8>,
    #[serde(default)]
    pub channel: Option<Channel>,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl<S, N> DealPipelineService<S, N>
where
    S: PipelineStore + 'static,
    N: Notifier + 'static,
{
    /// Validate and store a buy box.
    pub fn save_buy_box(&self, buy_box: BuyBox) -> Result<(), PipelineError> {
        buy_box.validate()?;
        self.store.save_buy_box(buy_box)?;
        Ok(())
    }

    pub fn lead_score(&self, lead_id: &LeadId) -> Result<LeadScoreView, PipelineError> {
        let lead = self.fetch_lead(lead_id)?;
        LeadScoreView::from_lead(&lead).ok_or_else(|| PipelineError::not_found("score for lead", lead_id))
    }

    /// Re-score against the market's buy boxes and re-route immediately.
    pub fn recalculate_score(&self, lead_id: &LeadId) -> Result<LeadScoreView, PipelineError> {
        let mut lead = self.fetch_lead(lead_id)?;
        let market = lead.market_key();
        let buy_boxes = self.store.buy_boxes_in_market(&market)?;
        let weights = self
            .store
            .active_weights()?
            .map(|version| version.weights);

        let outcome = self.scoring.score(&lead, &buy_boxes, weights.as_ref());
        let now = self.now();
        info!(
            lead_id = %lead.id,
            market = %market,
            score = outcome.score,
            grade = %outcome.grade,
            buy_box_id = ?outcome.buy_box_id,
            "lead scored"
        );
        outcome.apply_to(&mut lead, now);

        let effects = self.route_lead(&mut lead);
        self.store.save_lead(lead.clone())?;
        self.carry_out(&lead, &effects);

        LeadScoreView::from_lead(&lead).ok_or_else(|| PipelineError::not_found("score for lead", lead_id))
    }

    /// Pin a letter grade for display and routing; the computed score is kept.
    pub fn override_score(
        &self,
        lead_id: &LeadId,
        grade: Grade,
        reason: &str,
        applied_by: UserId,
    ) -> Result<LeadScoreView, PipelineError> {
        if reason.trim().is_empty() {
            return Err(PipelineError::validation(
                "reason",
                "grade override requires a reason",
            ));
        }

        let mut lead = self.fetch_lead(lead_id)?;
        let now = self.now();
        let Some(score) = lead.score.as_mut() else {
            return Err(PipelineError::StateConflict {
                entity: "lead",
                current: "unscored".to_string(),
                action: "override score",
            });
        };
        info!(
            lead_id = %lead_id,
            computed = %score.grade,
            grade = %grade,
            applied_by = %applied_by,
            "grade override applied"
        );
        score.grade_override = Some(GradeOverride {
            grade,
            reason: reason.trim().to_string(),
            applied_by,
            applied_at: now,
        });

        let effects = self.route_lead(&mut lead);
        self.store.save_lead(lead.clone())?;
        self.carry_out(&lead, &effects);

        LeadScoreView::from_lead(&lead).ok_or_else(|| PipelineError::not_found("score for lead", lead_id))
    }

    pub fn clear_score_override(&self, lead_id: &LeadId) -> Result<LeadScoreView, PipelineError> {
        let mut lead = self.fetch_lead(lead_id)?;
        let cleared = lead
            .score
            .as_mut()
            .and_then(|score| score.grade_override.take())
            .is_some();
        if !cleared {
            return Err(PipelineError::not_found("grade override for lead", lead_id));
        }

        let effects = self.route_lead(&mut lead);
        self.store.save_lead(lead.clone())?;
        self.carry_out(&lead, &effects);

        LeadScoreView::from_lead(&lead).ok_or_else(|| PipelineError::not_found("score for lead", lead_id))
    }

    pub fn override_route(
        &self,
        lead_id: &LeadId,
        route: Route,
        priority: Priority,
        justification: &str,
        applied_by: UserId,
    ) -> Result<LeadScoreView, PipelineError> {
        let mut lead = self.fetch_lead(lead_id)?;
        if lead.score.is_none() {
            return Err(PipelineError::StateConflict {
                entity: "lead",
                current: "unscored".to_string(),
                action: "override route",
            });
        }

        let now = self.now();
        let route_override = RouteOverride {
            route,
            priority,
            justification: justification.trim().to_string(),
            previous_route: None,
            previous_priority: None,
            applied_by,
            applied_at: now,
        };
        let effects = self.routing.apply_override(&mut lead, route_override, now)?;
        info!(
            lead_id = %lead_id,
            route = route.label(),
            priority = priority.label(),
            "route override applied"
        );
        self.store.save_lead(lead.clone())?;
        self.carry_out(&lead, &effects);

        LeadScoreView::from_lead(&lead).ok_or_else(|| PipelineError::not_found("score for lead", lead_id))
    }

    /// Drop the manual route and fall back to the computed one.
    pub fn clear_route_override(&self, lead_id: &LeadId) -> Result<LeadScoreView, PipelineError> {
        let mut lead = self.fetch_lead(lead_id)?;
        if !self.routing.clear_override(&mut lead) {
            return Err(PipelineError::not_found("route override for lead", lead_id));
        }

        let effects = self.route_lead(&mut lead);
        self.store.save_lead(lead.clone())?;
        self.carry_out(&lead, &effects);

        LeadScoreView::from_lead(&lead).ok_or_else(|| PipelineError::not_found("score for lead", lead_id))
    }

    pub fn matching_buyers(
        &self,
        lead_id: &LeadId,
        query: MatchQuery,
    ) -> Result<MatchReport, PipelineError> {
        let lead = self.fetch_lead(lead_id)?;
        let buyers = self.store.buyers_in_market(&lead.market_key())?;
        let limit = self.blasts.recipient_limit(query.limit);
        let report = self.matcher.match_buyers(
            &lead,
            &buyers,
            query.channel.unwrap_or_default(),
            limit,
            self.now(),
        );
        debug!(
            lead_id = %lead_id,
            matched = report.matches.len(),
            excluded = report.excluded_total,
            "buyers matched"
        );

        Ok(match query.threshold {
            Some(threshold) => report.above_threshold(threshold),
            None => report,
        })
    }

    pub(crate) fn fetch_lead(&self, lead_id: &LeadId) -> Result<Lead, PipelineError> {
        self.store
            .fetch_lead(lead_id)?
            .ok_or_else(|| PipelineError::not_found("lead", lead_id))
    }

    fn route_lead(&self, lead: &mut Lead) -> Vec<RoutingEffect> {
        let Some(score) = lead.score.as_ref() else {
            return Vec::new();
        };
        let decision = self.routing.determine_route(score);
        let effects = self.routing.apply(lead, decision, self.now());
        if let Some(routing) = &lead.routing {
            info!(
                lead_id = %lead.id,
                route = routing.route.label(),
                priority = routing.priority.label(),
                sla_hours = routing.sla_hours,
                manual = routing.manual_override.is_some(),
                "lead routed"
            );
        }
        effects
    }

    fn carry_out(&self, lead: &Lead, effects: &[RoutingEffect]) {
        for effect in effects {
            match effect {
                RoutingEffect::IntakeLocked => {
                    info!(lead_id = %lead.id, "intake locked for closer queue");
                }
                RoutingEffect::CloserHandoffRequested => {
                    self.notify(
                        "closer_handoff_requested",
                        None,
                        Some(lead.id.clone()),
                        lead_details(lead),
                    );
                }
                RoutingEffect::AlertRequested => {
                    self.notify("closer_alert", None, Some(lead.id.clone()), lead_details(lead));
                }
                RoutingEffect::AlertSuppressedQuietHours => {
                    info!(lead_id = %lead.id, "closer alert held for quiet hours");
                }
            }
        }
    }
}

fn lead_details(lead: &Lead) -> BTreeMap<String, String> {
    let mut details = BTreeMap::new();
    details.insert("market".to_string(), lead.market_key());
    details.insert(
        "asking_price".to_string(),
        format!("{:.0}", lead.terms.asking_price),
    );
    if let Some(score) = &lead.score {
        details.insert("grade".to_string(), score.effective_grade().to_string());
        details.insert("score".to_string(), score.score.to_string());
    }
    if let Some(routing) = &lead.routing {
        details.insert("route".to_string(), routing.route.label().to_string());
        details.insert("sla_due_at".to_string(), routing.sla_due_at.to_rfc3339());
    }
    details
}
