use super::common::*;
use crate::workflows::acquisitions::domain::{
    Grade, HandoffStatus, LeadId, Priority, Route, Strategy, UserId,
};
use crate::workflows::acquisitions::service::{MatchQuery, PipelineError};

fn flip_id() -> LeadId {
    LeadId::from("lead-flip")
}

#[test]
fn score_is_missing_until_first_calculation() {
    let harness = harness();
    let lead_id = harness.seeded_flip(0);

    let error = harness
        .service
        .lead_score(&lead_id)
        .expect_err("unscored lead has no score");
    assert!(matches!(error, PipelineError::NotFound { .. }));
}

#[test]
fn grade_a_lead_locks_intake_and_alerts_closers() {
    let harness = harness();
    let lead_id = harness.seeded_flip(0);

    let view = harness
        .service
        .recalculate_score(&lead_id)
        .expect("lead scores");

    assert_eq!(view.effective_grade, Grade::A);
    assert!(view.intake_locked);
    assert_eq!(view.closer_handoff, HandoffStatus::Requested);
    let routing = view.routing.expect("lead routed");
    assert_eq!(routing.route, Route::ImmediateCloser);
    assert_eq!(routing.sla_hours, 1);

    let templates: Vec<String> = harness
        .notifier
        .sent()
        .into_iter()
        .map(|notification| notification.template)
        .collect();
    assert_eq!(templates, vec!["closer_handoff_requested", "closer_alert"]);

    let stored = harness.stored_lead(&lead_id);
    assert_eq!(stored.score.map(|score| score.score), Some(100));
}

#[test]
fn score_override_needs_reason_and_a_score() {
    let harness = harness();
    let lead_id = harness.seeded_flip(0);

    let error = harness
        .service
        .override_score(&lead_id, Grade::B, " ", UserId::from("closer-1"))
        .expect_err("blank reason rejected");
    assert!(matches!(error, PipelineError::Validation { field: "reason", .. }));

    let error = harness
        .service
        .override_score(&lead_id, Grade::B, "motivated seller", UserId::from("closer-1"))
        .expect_err("unscored lead rejected");
    assert!(matches!(
        error,
        PipelineError::StateConflict { ref current, .. } if current == "unscored"
    ));
}

#[test]
fn score_override_reroutes_and_clears() {
    let harness = harness();
    let lead_id = harness.seeded_flip(0);
    harness
        .service
        .recalculate_score(&lead_id)
        .expect("lead scores");

    let view = harness
        .service
        .override_score(&lead_id, Grade::D, "roof collapse on walkthrough", UserId::from("closer-1"))
        .expect("override applies");
    assert_eq!(view.effective_grade, Grade::D);
    assert_eq!(view.score.grade, Grade::A);
    assert_eq!(view.score.score, 100);
    let grade_override = view.score.grade_override.expect("override kept");
    assert_eq!(grade_override.reason, "roof collapse on walkthrough");
    assert_eq!(grade_override.applied_at, now());
    assert_eq!(view.routing.map(|routing| routing.route), Some(Route::Archive));

    let cleared = harness
        .service
        .clear_score_override(&lead_id)
        .expect("override clears");
    assert_eq!(cleared.effective_grade, Grade::A);
    assert_eq!(
        cleared.routing.map(|routing| routing.route),
        Some(Route::ImmediateCloser)
    );

    let error = harness
        .service
        .clear_score_override(&lead_id)
        .expect_err("nothing left to clear");
    assert!(matches!(error, PipelineError::NotFound { .. }));
}

#[test]
fn route_override_is_kept_until_cleared() {
    let harness = harness();
    let lead_id = harness.seeded_flip(0);
    harness
        .service
        .recalculate_score(&lead_id)
        .expect("lead scores");

    let error = harness
        .service
        .override_route(&lead_id, Route::Nurture, Priority::Normal, "", UserId::from("mgr"))
        .expect_err("justification required");
    assert!(matches!(
        error,
        PipelineError::Validation {
            field: "justification",
            ..
        }
    ));

    let view = harness
        .service
        .override_route(
            &lead_id,
            Route::Nurture,
            Priority::Normal,
            "seller asked for a callback next month",
            UserId::from("mgr"),
        )
        .expect("override applies");
    let routing = view.routing.expect("routed");
    assert_eq!(routing.route, Route::Nurture);
    assert_eq!(routing.sla_hours, 72);
    let manual = routing.manual_override.expect("override recorded");
    assert_eq!(manual.previous_route, Some(Route::ImmediateCloser));
    assert_eq!(manual.previous_priority, Some(Priority::Urgent));

    let rescored = harness
        .service
        .recalculate_score(&lead_id)
        .expect("lead rescores");
    assert_eq!(
        rescored.routing.map(|routing| routing.route),
        Some(Route::Nurture)
    );

    let cleared = harness
        .service
        .clear_route_override(&lead_id)
        .expect("override clears");
    let routing = cleared.routing.expect("routed");
    assert_eq!(routing.route, Route::ImmediateCloser);
    assert!(routing.manual_override.is_none());

    let error = harness
        .service
        .clear_route_override(&lead_id)
        .expect_err("nothing left to clear");
    assert!(matches!(error, PipelineError::NotFound { .. }));
}

#[test]
fn route_override_on_unscored_lead_conflicts() {
    let harness = harness();
    let lead_id = harness.seeded_flip(0);

    let error = harness
        .service
        .override_route(
            &lead_id,
            Route::DialerPriority,
            Priority::High,
            "manual triage",
            UserId::from("mgr"),
        )
        .expect_err("unscored lead rejected");
    assert!(matches!(error, PipelineError::StateConflict { .. }));
}

#[test]
fn matching_buyers_applies_threshold_and_limit() {
    let harness = harness();
    harness.seeded_flip(4);
    let mut engaged = buyer("buyer-engaged", POLK);
    engaged.engagement_score = 100.0;
    harness.save_buyer(engaged);

    let report = harness
        .service
        .matching_buyers(
            &flip_id(),
            MatchQuery {
                threshold: Some(70),
                ..MatchQuery::default()
            },
        )
        .expect("buyers match");
    assert_eq!(report.matches.len(), 1);
    assert_eq!(report.matches[0].buyer_id.as_str(), "buyer-engaged");
    assert_eq!(report.matches[0].score, 80);

    let report = harness
        .service
        .matching_buyers(
            &flip_id(),
            MatchQuery {
                limit: Some(3),
                ..MatchQuery::default()
            },
        )
        .expect("buyers match");
    assert_eq!(report.matches.len(), 3);
    assert_eq!(report.matches[0].buyer_id.as_str(), "buyer-engaged");
}

#[test]
fn unknown_lead_is_not_found() {
    let harness = harness();
    let error = harness
        .service
        .recalculate_score(&LeadId::from("lead-nope"))
        .expect_err("missing lead");
    assert!(matches!(
        error,
        PipelineError::NotFound { entity: "lead", .. }
    ));
}

#[test]
fn rental_buy_box_must_require_cash_flow() {
    let harness = harness();
    let mut buy_box = rental_box();
    buy_box.requires_positive_cash_flow = false;

    let error = harness
        .service
        .save_buy_box(buy_box)
        .expect_err("rental box without cash flow rejected");
    assert!(matches!(error, PipelineError::Validation { field: "buy_box", .. }));

    let mut flip = flip_box();
    flip.strategy = Strategy::Flip;
    flip.min_price = Some(300_000.0);
    let error = harness
        .service
        .save_buy_box(flip)
        .expect_err("inverted price range rejected");
    assert!(matches!(error, PipelineError::Validation { field: "buy_box", .. }));
}
