//! Grade to workflow-queue assignment with SLA and closer handoff effects.

use chrono::{DateTime, Duration, Timelike, Utc};
use serde::{Deserialize, Serialize};

use super::domain::{
    Grade, HandoffStatus, Lead, LeadRouting, LeadScore, Priority, Route, RouteOverride,
};

/// SLA hours per letter grade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlaHours {
    pub a: u32,
    pub b: u32,
    pub c: u32,
    pub d: u32,
}

impl Default for SlaHours {
    fn default() -> Self {
        Self {
            a: 1,
            b: 4,
            c: 72,
            d: 168,
        }
    }
}

impl SlaHours {
    pub fn for_route(&self, route: Route) -> u32 {
        match route {
            Route::ImmediateCloser => self.a,
            Route::DialerPriority => self.b,
            Route::Nurture => self.c,
            Route::Archive => self.d,
        }
    }
}

/// UTC hour window during which alerts are held back; may wrap midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuietHours {
    pub start_hour: u32,
    pub end_hour: u32,
}

impl QuietHours {
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        let hour = at.hour();
        if self.start_hour == self.end_hour {
            false
        } else if self.start_hour < self.end_hour {
            hour >= self.start_hour && hour < self.end_hour
        } else {
            hour >= self.start_hour || hour < self.end_hour
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RoutingConfig {
    pub sla: SlaHours,
    pub quiet_hours: Option<QuietHours>,
}

/// Routing outcome before it is merged into the lead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteDecision {
    pub route: Route,
    pub priority: Priority,
    pub sla_hours: u32,
    pub reasons: Vec<String>,
    pub routing_reason: Option<String>,
}

/// Side effects the caller must carry out after routing is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingEffect {
    IntakeLocked,
    CloserHandoffRequested,
    AlertRequested,
    AlertSuppressedQuietHours,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RoutingError {
    #[error("route override requires a non-empty justification")]
    MissingJustification,
}

pub struct RoutingEngine {
    config: RoutingConfig,
}

impl RoutingEngine {
    pub fn new(config: RoutingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RoutingConfig {
        &self.config
    }

    /// Deterministic grade to route mapping with cash-flow and exclusion guards.
    pub fn determine_route(&self, score: &LeadScore) -> RouteDecision {
        let grade = score.effective_grade();
        let (mut route, mut priority) = match grade {
            Grade::A => (Route::ImmediateCloser, Priority::Urgent),
            Grade::B => (Route::DialerPriority, Priority::High),
            Grade::C => (Route::Nurture, Priority::Normal),
            Grade::D | Grade::Dead => (Route::Archive, Priority::Low),
        };

        let mut reasons = vec![match &score.grade_override {
            Some(grade_override) => format!(
                "grade {} (manual override of {}: {})",
                grade, score.grade, grade_override.reason
            ),
            None => format!("grade {} with score {}", grade, score.score),
        }];
        let mut routing_reason = None;

        if route != Route::Archive {
            if let Some(failure) = score.cash_flow_failure() {
                let summary = failure.summary();
                if route != Route::Nurture {
                    reasons.push(format!(
                        "rerouted from {} to nurture: {}",
                        route.label(),
                        summary
                    ));
                    route = Route::Nurture;
                    priority = Priority::Normal;
                }
                routing_reason = Some(summary);
            }
        }

        if grade.is_top_tier() && !score.exclusion_hits.is_empty() {
            reasons.push(format!(
                "warning: exclusion phrases present ({})",
                score.exclusion_hits.join(", ")
            ));
        }

        RouteDecision {
            route,
            priority,
            sla_hours: self.config.sla.for_route(route),
            reasons,
            routing_reason,
        }
    }

    /// Merge an automatic decision into the lead; manual overrides are left alone.
    pub fn apply(
        &self,
        lead: &mut Lead,
        decision: RouteDecision,
        now: DateTime<Utc>,
    ) -> Vec<RoutingEffect> {
        if lead
            .routing
            .as_ref()
            .map(|routing| routing.manual_override.is_some())
            .unwrap_or(false)
        {
            return Vec::new();
        }

        let previous = lead.routing.take();
        let alerted_at = previous.as_ref().and_then(|routing| routing.alerted_at);
        let previous_route = previous.as_ref().map(|routing| routing.route);

        lead.routing = Some(LeadRouting {
            route: decision.route,
            priority: decision.priority,
            sla_hours: decision.sla_hours,
            sla_due_at: now + Duration::hours(i64::from(decision.sla_hours)),
            reasons: decision.reasons,
            routing_reason: decision.routing_reason,
            routed_at: now,
            alerted_at,
            manual_override: None,
        });

        self.transition_effects(lead, previous_route, now)
    }

    /// Replace the computed route with a human decision, keeping the prior values for audit.
    pub fn apply_override(
        &self,
        lead: &mut Lead,
        route_override: RouteOverride,
        now: DateTime<Utc>,
    ) -> Result<Vec<RoutingEffect>, RoutingError> {
        if route_override.justification.trim().is_empty() {
            return Err(RoutingError::MissingJustification);
        }

        let previous = lead.routing.take();
        let previous_route = previous.as_ref().map(|routing| routing.route);
        let alerted_at = previous.as_ref().and_then(|routing| routing.alerted_at);
        let sla_hours = self.config.sla.for_route(route_override.route);

        let mut reasons = vec![format!(
            "manual override by {}: {}",
            route_override.applied_by, route_override.justification
        )];
        if let Some(previous) = &previous {
            reasons.push(format!(
                "previously {} / {}",
                previous.route.label(),
                previous.priority.label()
            ));
        }

        let route_override = RouteOverride {
            previous_route,
            previous_priority: previous.as_ref().map(|routing| routing.priority),
            applied_at: now,
            ..route_override
        };

        lead.routing = Some(LeadRouting {
            route: route_override.route,
            priority: route_override.priority,
            sla_hours,
            sla_due_at: now + Duration::hours(i64::from(sla_hours)),
            reasons,
            routing_reason: Some(route_override.justification.clone()),
            routed_at: now,
            alerted_at,
            manual_override: Some(route_override),
        });

        Ok(self.transition_effects(lead, previous_route, now))
    }

    /// Drop a manual override so the next automatic pass recomputes the route.
    pub fn clear_override(&self, lead: &mut Lead) -> bool {
        match lead.routing.as_mut() {
            Some(routing) if routing.manual_override.is_some() => {
                routing.manual_override = None;
                true
            }
            _ => false,
        }
    }

    /// Effects for entering the closer queue, stamping the lead as they are requested.
    pub(crate) fn transition_effects(
        &self,
        lead: &mut Lead,
        previous_route: Option<Route>,
        now: DateTime<Utc>,
    ) -> Vec<RoutingEffect> {
        let mut effects = Vec::new();
        let Some(routing) = lead.routing.as_mut() else {
            return effects;
        };
        if routing.route != Route::ImmediateCloser {
            return effects;
        }

        if previous_route != Some(Route::ImmediateCloser) && !lead.intake_locked {
            lead.intake_locked = true;
            effects.push(RoutingEffect::IntakeLocked);
        }

        if lead.closer_handoff.can_open() {
            lead.closer_handoff = HandoffStatus::Requested;
            effects.push(RoutingEffect::CloserHandoffRequested);
        }

        if routing.alerted_at.is_none() {
            let quiet = self
                .config
                .quiet_hours
                .map(|window| window.contains(now))
                .unwrap_or(false);
            if quiet {
                effects.push(RoutingEffect::AlertSuppressedQuietHours);
            } else {
                routing.alerted_at = Some(now);
                effects.push(RoutingEffect::AlertRequested);
            }
        }

        effects
    }
}
