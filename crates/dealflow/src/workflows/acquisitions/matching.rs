//! Buyer eligibility gate and ranking for a single lead.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::domain::{same_place, Buyer, BuyerId, Channel, ConditionTier, Lead, Strategy};
use super::scoring::{scan_exclusions, underwrite};
use super::underwriting::{CashFlowResult, UnderwritingDefaults};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchingConfig {
    pub base_score: f64,
    pub market_bonus: f64,
    pub county_bonus: f64,
    pub city_bonus: f64,
    pub max_engagement_bonus: f64,
    pub proof_of_funds_bonus: f64,
    pub recent_purchase_bonus: f64,
    pub lapsed_purchase_bonus: f64,
    pub max_cash_flow_bonus: f64,
    pub default_target_cash_flow: f64,
    pub max_excluded: usize,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            base_score: 50.0,
            market_bonus: 10.0,
            county_bonus: 10.0,
            city_bonus: 10.0,
            max_engagement_bonus: 20.0,
            proof_of_funds_bonus: 5.0,
            recent_purchase_bonus: 5.0,
            lapsed_purchase_bonus: 3.0,
            max_cash_flow_bonus: 8.0,
            default_target_cash_flow: 200.0,
            max_excluded: 50,
        }
    }
}

/// Why a buyer did not make the list. Gates are checked in declaration order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "gate", rename_all = "snake_case")]
pub enum ExclusionReason {
    OptedOut { channel: Channel },
    Cooldown { hours_remaining: i64 },
    MarketMismatch { market: String },
    PropertyType,
    BelowMinimum {
        field: String,
        required: String,
        actual: String,
    },
    RehabTolerance { rehab: f64, max_rehab: f64 },
    PriceCeiling { price: f64, max_price: f64 },
    ArvFloor { arv: f64, min_arv: f64 },
    HardDamage { phrases: Vec<String> },
    CashFlow { detail: String },
}

impl ExclusionReason {
    pub fn summary(&self) -> String {
        match self {
            Self::OptedOut { channel } => format!("opted out of {} messages", channel.label()),
            Self::Cooldown { hours_remaining } => {
                format!("in cooldown for another {hours_remaining}h")
            }
            Self::MarketMismatch { market } => format!("does not buy in {market}"),
            Self::PropertyType => "property type not in buyer preferences".to_string(),
            Self::BelowMinimum {
                field,
                required,
                actual,
            } => format!("{field} {actual} below buyer minimum {required}"),
            Self::RehabTolerance { rehab, max_rehab } => format!(
                "rehab ${:.0} exceeds buyer tolerance ${:.0}",
                rehab, max_rehab
            ),
            Self::PriceCeiling { price, max_price } => format!(
                "asking ${:.0} exceeds buyer ceiling ${:.0}",
                price, max_price
            ),
            Self::ArvFloor { arv, min_arv } => {
                format!("ARV ${:.0} below buyer floor ${:.0}", arv, min_arv)
            }
            Self::HardDamage { phrases } => format!(
                "hard damage ({}) and buyer avoids heavy rehab",
                phrases.join(", ")
            ),
            Self::CashFlow { detail } => detail.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuyerMatch {
    pub buyer_id: BuyerId,
    pub buyer_name: String,
    pub score: u8,
    pub reasons: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExcludedBuyer {
    pub buyer_id: BuyerId,
    pub buyer_name: String,
    pub reason: ExclusionReason,
    pub summary: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MatchReport {
    pub market: String,
    pub matches: Vec<BuyerMatch>,
    pub excluded: Vec<ExcludedBuyer>,
    pub excluded_total: usize,
}

impl MatchReport {
    pub fn above_threshold(mut self, threshold: u8) -> Self {
        self.matches.retain(|candidate| candidate.score >= threshold);
        self
    }
}

pub struct BuyerMatcher {
    config: MatchingConfig,
    underwriting: UnderwritingDefaults,
    major_exclusions: Vec<String>,
}

struct LeadView<'a> {
    lead: &'a Lead,
    market: String,
    strategy: Option<Strategy>,
    hard_damage: Vec<String>,
    cash_flow: CashFlowResult,
}

impl BuyerMatcher {
    pub fn new(
        config: MatchingConfig,
        underwriting: UnderwritingDefaults,
        major_exclusions: Vec<String>,
    ) -> Self {
        Self {
            config,
            underwriting,
            major_exclusions,
        }
    }

    /// Rank eligible buyers for a lead; excluded buyers are reported, never dropped.
    pub fn match_buyers(
        &self,
        lead: &Lead,
        buyers: &[Buyer],
        channel: Channel,
        max_results: usize,
        now: DateTime<Utc>,
    ) -> MatchReport {
        let view = self.lead_view(lead);

        let mut matches = Vec::new();
        let mut excluded = Vec::new();
        for buyer in buyers {
            match self.exclusion(&view, buyer, channel, now) {
                Some(reason) => excluded.push(ExcludedBuyer {
                    buyer_id: buyer.id.clone(),
                    buyer_name: buyer.name.clone(),
                    summary: reason.summary(),
                    reason,
                }),
                None => matches.push(self.rank(&view, buyer, now)),
            }
        }

        matches.sort_by(|left, right| {
            right
                .score
                .cmp(&left.score)
                .then_with(|| left.buyer_id.cmp(&right.buyer_id))
        });
        matches.truncate(max_results);

        let excluded_total = excluded.len();
        excluded.truncate(self.config.max_excluded);

        MatchReport {
            market: view.market,
            matches,
            excluded,
            excluded_total,
        }
    }

    fn lead_view<'a>(&self, lead: &'a Lead) -> LeadView<'a> {
        let score = lead.score.as_ref();
        let hard_damage = scan_exclusions(lead, &[], &self.major_exclusions);
        let hard_damage = if lead.facts.condition == Some(ConditionTier::Teardown)
            && hard_damage.is_empty()
        {
            vec![ConditionTier::Teardown.label().to_string()]
        } else {
            hard_damage
        };

        LeadView {
            lead,
            market: lead.market_key(),
            strategy: score.and_then(|score| score.strategy).or(lead.strategy),
            hard_damage,
            cash_flow: score
                .and_then(|score| score.cash_flow.clone())
                .unwrap_or_else(|| underwrite(lead, None, &self.underwriting)),
        }
    }

    fn exclusion(
        &self,
        view: &LeadView<'_>,
        buyer: &Buyer,
        channel: Channel,
        now: DateTime<Utc>,
    ) -> Option<ExclusionReason> {
        let lead = view.lead;
        let facts = &lead.facts;
        let terms = &lead.terms;

        if buyer.opt_outs.is_opted_out(channel) {
            return Some(ExclusionReason::OptedOut { channel });
        }

        if let Some(last_blast_at) = buyer.last_blast_at {
            let cooldown = Duration::hours(i64::from(buyer.cooldown_hours));
            let elapsed = now - last_blast_at;
            if elapsed < cooldown {
                let remaining = cooldown - elapsed;
                let hours_remaining = (remaining.num_minutes() + 59) / 60;
                return Some(ExclusionReason::Cooldown { hours_remaining });
            }
        }

        if !buyer.in_market(&view.market) {
            return Some(ExclusionReason::MarketMismatch {
                market: view.market.clone(),
            });
        }

        if !buyer.property_types.is_empty() && !buyer.property_types.contains(&facts.property_type)
        {
            return Some(ExclusionReason::PropertyType);
        }

        if let Some((min, beds)) = buyer.min_beds.zip(facts.beds) {
            if beds < min {
                return Some(below("beds", min, beds));
            }
        }
        if let Some((min, baths)) = buyer.min_baths.zip(facts.baths) {
            if baths < min {
                return Some(below("baths", min, baths));
            }
        }
        if let Some((min, sqft)) = buyer.min_sqft.zip(facts.sqft) {
            if sqft < min {
                return Some(below("sqft", min, sqft));
            }
        }
        if let Some((min, year)) = buyer.min_year_built.zip(facts.year_built) {
            if year < min {
                return Some(below("year built", min, year));
            }
        }

        if let Some((max_rehab, rehab)) = buyer.max_rehab.zip(terms.estimated_rehab) {
            if rehab > max_rehab {
                return Some(ExclusionReason::RehabTolerance { rehab, max_rehab });
            }
        }

        if let Some(max_price) = buyer.max_price {
            if terms.asking_price > max_price {
                return Some(ExclusionReason::PriceCeiling {
                    price: terms.asking_price,
                    max_price,
                });
            }
        }

        if let Some((min_arv, arv)) = buyer.min_arv.zip(terms.arv) {
            if arv < min_arv {
                return Some(ExclusionReason::ArvFloor { arv, min_arv });
            }
        }

        if !view.hard_damage.is_empty() && !buyer.tolerates_heavy_rehab {
            return Some(ExclusionReason::HardDamage {
                phrases: view.hard_damage.clone(),
            });
        }

        let lead_requires = view
            .strategy
            .map(Strategy::requires_cash_flow)
            .unwrap_or(false);
        if buyer.requires_cash_flow() || lead_requires {
            if let Some(failure) = view.cash_flow.failure() {
                return Some(ExclusionReason::CashFlow {
                    detail: failure.summary(),
                });
            }
        }

        None
    }

    fn rank(&self, view: &LeadView<'_>, buyer: &Buyer, now: DateTime<Utc>) -> BuyerMatch {
        let config = &self.config;
        let location = &view.lead.location;
        let mut score = config.base_score;
        let mut reasons = vec![format!("base {:.0}", config.base_score)];

        if buyer.prefers_market(&view.market) {
            score += config.market_bonus;
            reasons.push(format!("+{:.0} preferred market", config.market_bonus));
        }
        if buyer
            .counties
            .iter()
            .any(|county| same_place(county, &location.county))
        {
            score += config.county_bonus;
            reasons.push(format!("+{:.0} county match", config.county_bonus));
        }
        if buyer
            .cities
            .iter()
            .any(|city| same_place(city, &location.city))
        {
            score += config.city_bonus;
            reasons.push(format!("+{:.0} city match", config.city_bonus));
        }

        let engagement =
            (buyer.engagement_score.clamp(0.0, 100.0) / 100.0) * config.max_engagement_bonus;
        if engagement > 0.0 {
            score += engagement;
            reasons.push(format!("+{:.1} engagement", engagement));
        }

        if buyer.proof_of_funds {
            score += config.proof_of_funds_bonus;
            reasons.push(format!("+{:.0} proof of funds", config.proof_of_funds_bonus));
        }

        if let Some(purchased_at) = buyer.last_purchase_at {
            let since = now - purchased_at;
            if since <= Duration::days(90) {
                score += config.recent_purchase_bonus;
                reasons.push(format!(
                    "+{:.0} purchased within 90 days",
                    config.recent_purchase_bonus
                ));
            } else if since <= Duration::days(180) {
                score += config.lapsed_purchase_bonus;
                reasons.push(format!(
                    "+{:.0} purchased within 180 days",
                    config.lapsed_purchase_bonus
                ));
            }
        }

        if buyer.is_buy_and_hold() {
            let bonus = self.cash_flow_bonus(view, buyer);
            if bonus > 0.0 {
                score += bonus;
                reasons.push(format!("+{:.1} cash flow above target", bonus));
            }
        }

        BuyerMatch {
            buyer_id: buyer.id.clone(),
            buyer_name: buyer.name.clone(),
            score: score.clamp(0.0, 100.0).round() as u8,
            reasons,
        }
    }

    fn cash_flow_bonus(&self, view: &LeadView<'_>, buyer: &Buyer) -> f64 {
        let cash_flow = &view.cash_flow;
        if cash_flow.error.is_some() || !cash_flow.cash_flow_pass {
            return 0.0;
        }

        let target = buyer
            .target_monthly_cash_flow
            .unwrap_or(self.config.default_target_cash_flow)
            .max(1.0);
        if cash_flow.monthly_cash_flow <= target {
            return 0.0;
        }

        let half = self.config.max_cash_flow_bonus / 2.0;
        let surplus = ((cash_flow.monthly_cash_flow - target) / target).min(1.0);
        half + half * surplus
    }
}

fn below<T: std::fmt::Display>(field: &'static str, required: T, actual: T) -> ExclusionReason {
    ExclusionReason::BelowMinimum {
        field: field.to_string(),
        required: required.to_string(),
        actual: actual.to_string(),
    }
}
