use chrono::Duration;

use super::common::*;
use crate::workflows::acquisitions::domain::{Buyer, Channel, ConditionTier, Strategy};
use crate::workflows::acquisitions::matching::{BuyerMatcher, ExclusionReason, MatchingConfig};
use crate::workflows::acquisitions::scoring::default_major_exclusions;
use crate::workflows::acquisitions::underwriting::UnderwritingDefaults;

fn matcher() -> BuyerMatcher {
    BuyerMatcher::new(
        MatchingConfig::default(),
        UnderwritingDefaults::default(),
        default_major_exclusions(),
    )
}

fn only_reason(buyer: Buyer) -> Option<ExclusionReason> {
    let report = matcher().match_buyers(&flip_lead(), &[buyer], Channel::Internal, 25, now());
    report.excluded.into_iter().next().map(|excluded| excluded.reason)
}

#[test]
fn top_ranked_buyers_are_capped_at_limit() {
    let buyers: Vec<Buyer> = (0..40)
        .map(|index| {
            let mut buyer = buyer(&format!("buyer-{index:02}"), POLK);
            buyer.engagement_score = f64::from(index) * 2.5;
            buyer
        })
        .collect();

    let capped = matcher().match_buyers(&flip_lead(), &buyers, Channel::Internal, 25, now());
    let full = matcher().match_buyers(&flip_lead(), &buyers, Channel::Internal, 100, now());

    assert_eq!(capped.matches.len(), 25);
    assert_eq!(full.matches.len(), 40);
    assert_eq!(capped.matches[..], full.matches[..25]);
    assert!(capped
        .matches
        .windows(2)
        .all(|pair| pair[0].score >= pair[1].score));
    assert_eq!(capped.matches[0].buyer_id.as_str(), "buyer-39");
    assert!(capped.excluded.is_empty());
}

#[test]
fn cooldown_boundary_is_eligible() {
    let mut rested = buyer("buyer-rested", POLK);
    rested.cooldown_hours = 72;
    rested.last_blast_at = Some(now() - Duration::hours(72));
    assert_eq!(only_reason(rested), None);

    let mut resting = buyer("buyer-resting", POLK);
    resting.cooldown_hours = 72;
    resting.last_blast_at = Some(now() - Duration::hours(71));
    assert_eq!(
        only_reason(resting),
        Some(ExclusionReason::Cooldown { hours_remaining: 1 })
    );
}

#[test]
fn opt_out_is_checked_for_the_blast_channel_only() {
    let mut quiet = buyer("buyer-quiet", POLK);
    quiet.opt_outs.sms = true;

    let lead = flip_lead();
    let sms = matcher().match_buyers(&lead, &[quiet.clone()], Channel::Sms, 25, now());
    assert_eq!(
        sms.excluded[0].reason,
        ExclusionReason::OptedOut {
            channel: Channel::Sms
        }
    );

    let internal = matcher().match_buyers(&lead, &[quiet], Channel::Internal, 25, now());
    assert_eq!(internal.matches.len(), 1);
}

#[test]
fn legacy_market_still_qualifies_without_bonus() {
    let mut legacy = buyer("buyer-legacy", "ia-dallas");
    legacy.legacy_markets = vec![POLK.to_string()];
    let preferred = buyer("buyer-preferred", POLK);

    let report = matcher().match_buyers(
        &flip_lead(),
        &[legacy, preferred],
        Channel::Internal,
        25,
        now(),
    );
    assert_eq!(report.matches.len(), 2);
    assert_eq!(report.matches[0].buyer_id.as_str(), "buyer-preferred");
    assert_eq!(report.matches[0].score, 60);
    assert_eq!(report.matches[1].score, 50);
}

#[test]
fn wrong_market_is_excluded() {
    assert_eq!(
        only_reason(buyer("buyer-elsewhere", "ia-linn")),
        Some(ExclusionReason::MarketMismatch {
            market: POLK.to_string()
        })
    );
}

#[test]
fn buyer_preferences_gate_the_lead() {
    let mut picky = buyer("buyer-picky", POLK);
    picky.min_beds = Some(4);
    assert!(matches!(
        only_reason(picky),
        Some(ExclusionReason::BelowMinimum { ref field, .. }) if field == "beds"
    ));

    let mut frugal = buyer("buyer-frugal", POLK);
    frugal.max_price = Some(140_000.0);
    assert!(matches!(
        only_reason(frugal),
        Some(ExclusionReason::PriceCeiling { .. })
    ));

    let mut light_touch = buyer("buyer-light", POLK);
    light_touch.max_rehab = Some(10_000.0);
    assert!(matches!(
        only_reason(light_touch),
        Some(ExclusionReason::RehabTolerance { .. })
    ));
}

#[test]
fn hard_damage_requires_heavy_rehab_tolerance() {
    let mut lead = flip_lead();
    lead.facts.condition = Some(ConditionTier::Teardown);
    let careful = buyer("buyer-careful", POLK);
    let mut brave = buyer("buyer-brave", POLK);
    brave.tolerates_heavy_rehab = true;

    let report = matcher().match_buyers(&lead, &[careful, brave], Channel::Internal, 25, now());
    assert_eq!(report.matches.len(), 1);
    assert_eq!(report.matches[0].buyer_id.as_str(), "buyer-brave");
    assert_eq!(
        report.excluded[0].reason,
        ExclusionReason::HardDamage {
            phrases: vec!["teardown".to_string()]
        }
    );
}

#[test]
fn rental_buyers_need_positive_cash_flow() {
    let mut landlord = buyer("buyer-landlord", STORY);
    landlord.strategies = vec![Strategy::BuyHold];

    let mut short = negative_rental_lead();
    rental_box_score(&mut short);
    let report = matcher().match_buyers(&short, &[landlord.clone()], Channel::Internal, 25, now());
    assert!(matches!(
        report.excluded[0].reason,
        ExclusionReason::CashFlow { .. }
    ));

    let mut strong = positive_rental_lead();
    rental_box_score(&mut strong);
    let report = matcher().match_buyers(&strong, &[landlord], Channel::Internal, 25, now());
    let matched = &report.matches[0];
    assert!(matched
        .reasons
        .iter()
        .any(|reason| reason.contains("cash flow above target")));
}

#[test]
fn engagement_and_funds_raise_rank() {
    let plain = buyer("buyer-a", POLK);
    let mut proven = buyer("buyer-b", POLK);
    proven.engagement_score = 100.0;
    proven.proof_of_funds = true;
    proven.counties = vec!["Polk".to_string()];
    proven.cities = vec!["Des Moines".to_string()];
    proven.last_purchase_at = Some(now() - Duration::days(30));

    let report = matcher().match_buyers(&flip_lead(), &[plain, proven], Channel::Internal, 25, now());
    assert_eq!(report.matches[0].buyer_id.as_str(), "buyer-b");
    assert_eq!(report.matches[0].score, 100);
}

#[test]
fn threshold_filters_low_scores() {
    let plain = buyer("buyer-a", POLK);
    let mut engaged = buyer("buyer-b", POLK);
    engaged.engagement_score = 50.0;

    let report = matcher()
        .match_buyers(&flip_lead(), &[plain, engaged], Channel::Internal, 25, now())
        .above_threshold(65);
    assert_eq!(report.matches.len(), 1);
    assert_eq!(report.matches[0].score, 70);
}

fn rental_box_score(lead: &mut crate::workflows::acquisitions::domain::Lead) {
    use crate::workflows::acquisitions::scoring::{ScoringConfig, ScoringEngine};
    ScoringEngine::new(ScoringConfig::default(), UnderwritingDefaults::default())
        .score(lead, &[rental_box()], None)
        .apply_to(lead, now());
}
