use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::underwriting::{CashFlowResult, FinancingTerms};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

string_id!(
    /// Identifier wrapper for property leads.
    LeadId
);
string_id!(BuyBoxId);
string_id!(BuyerId);
string_id!(UserId);
string_id!(BlastId);
string_id!(RecipientId);
string_id!(PerformanceId);
string_id!(RecommendationId);

/// Acquisition strategy shared by buy boxes, leads, and buyer preferences.
///
/// Buyers historically declared `rental` (and a few other spellings) for what
/// buy boxes call `buy_hold`; those labels deserialize onto the same variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    #[serde(alias = "fix_and_flip")]
    Flip,
    #[serde(alias = "rental", alias = "buy_and_hold", alias = "brrrr")]
    BuyHold,
    Commercial,
    Wholesale,
}

impl Strategy {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Flip => "flip",
            Self::BuyHold => "buy_hold",
            Self::Commercial => "commercial",
            Self::Wholesale => "wholesale",
        }
    }

    /// Strategies underwritten on rental income rather than resale.
    pub const fn requires_cash_flow(self) -> bool {
        matches!(self, Self::BuyHold | Self::Commercial)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyType {
    #[serde(alias = "sfr")]
    SingleFamily,
    MultiFamily,
    Condo,
    Townhouse,
    Mobile,
    Land,
    Commercial,
}

impl PropertyType {
    pub const fn label(self) -> &'static str {
        match self {
            Self::SingleFamily => "single family",
            Self::MultiFamily => "multi family",
            Self::Condo => "condo",
            Self::Townhouse => "townhouse",
            Self::Mobile => "mobile home",
            Self::Land => "land",
            Self::Commercial => "commercial",
        }
    }
}

/// Rehab tiers ordered from move-in ready to teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionTier {
    Turnkey,
    Light,
    Medium,
    Heavy,
    Teardown,
}

impl ConditionTier {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Turnkey => "turnkey",
            Self::Light => "light rehab",
            Self::Medium => "medium rehab",
            Self::Heavy => "heavy rehab",
            Self::Teardown => "teardown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Grade {
    A,
    B,
    C,
    D,
    Dead,
}

impl Grade {
    pub const fn label(self) -> &'static str {
        match self {
            Self::A => "A",
            Self::B => "B",
            Self::C => "C",
            Self::D => "D",
            Self::Dead => "Dead",
        }
    }

    pub const fn is_top_tier(self) -> bool {
        matches!(self, Self::A | Self::B)
    }
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Outbound channel a buyer can be reached on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Internal,
    Sms,
    Email,
}

impl Channel {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Internal => "internal",
            Self::Sms => "sms",
            Self::Email => "email",
        }
    }
}

impl Default for Channel {
    fn default() -> Self {
        Self::Internal
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PropertyLocation {
    pub state: String,
    pub county: String,
    pub city: String,
    #[serde(default)]
    pub street_address: Option<String>,
    #[serde(default)]
    pub zip: Option<String>,
}

impl PropertyLocation {
    /// Market key shared by buy boxes and buyer market lists, e.g. `ia-polk`.
    pub fn market_key(&self) -> String {
        market_key(&self.state, &self.county)
    }
}

pub fn market_key(state: &str, county: &str) -> String {
    let county = county
        .trim()
        .to_ascii_lowercase()
        .trim_end_matches(" county")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_");
    format!("{}-{}", state.trim().to_ascii_lowercase(), county)
}

pub(crate) fn same_place(left: &str, right: &str) -> bool {
    left.trim().eq_ignore_ascii_case(right.trim())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyFacts {
    pub property_type: PropertyType,
    #[serde(default)]
    pub beds: Option<u8>,
    #[serde(default)]
    pub baths: Option<f32>,
    #[serde(default)]
    pub sqft: Option<u32>,
    #[serde(default)]
    pub year_built: Option<u16>,
    #[serde(default)]
    pub condition: Option<ConditionTier>,
}

/// Commercial terms captured at intake and enrichment.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DealTerms {
    pub asking_price: f64,
    #[serde(default)]
    pub arv: Option<f64>,
    #[serde(default)]
    pub estimated_rehab: Option<f64>,
    #[serde(default)]
    pub estimated_rent: Option<f64>,
    #[serde(default)]
    pub target_noi: Option<f64>,
    #[serde(default)]
    pub annual_taxes: Option<f64>,
    #[serde(default)]
    pub annual_insurance: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandoffStatus {
    #[default]
    None,
    BackToDialer,
    Requested,
    InProgress,
    Closed,
}

impl HandoffStatus {
    /// Whether a closer handoff may be (re)opened from this status.
    pub const fn can_open(self) -> bool {
        matches!(self, Self::None | Self::BackToDialer)
    }
}

/// A prospective property acquisition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lead {
    pub id: LeadId,
    pub location: PropertyLocation,
    pub facts: PropertyFacts,
    pub terms: DealTerms,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub notes: Vec<String>,
    #[serde(default)]
    pub red_flags: Vec<String>,
    #[serde(default)]
    pub strategy: Option<Strategy>,
    #[serde(default)]
    pub intake_locked: bool,
    #[serde(default)]
    pub closer_handoff: HandoffStatus,
    #[serde(default)]
    pub score: Option<LeadScore>,
    #[serde(default)]
    pub routing: Option<LeadRouting>,
}

impl Lead {
    pub fn market_key(&self) -> String {
        self.location.market_key()
    }

    /// Free text the exclusion scan reads.
    pub fn searchable_text(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.description.as_str())
            .chain(self.notes.iter().map(String::as_str))
            .chain(self.red_flags.iter().map(String::as_str))
    }

    pub fn effective_grade(&self) -> Option<Grade> {
        self.score.as_ref().map(LeadScore::effective_grade)
    }
}

/// Human grade override; wins for display and routing only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradeOverride {
    pub grade: Grade,
    pub reason: String,
    pub applied_by: UserId,
    pub applied_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeadScore {
    pub score: u8,
    pub grade: Grade,
    pub buy_box_id: Option<BuyBoxId>,
    pub strategy: Option<Strategy>,
    pub requires_cash_flow: bool,
    pub reasons: Vec<String>,
    pub failed_checks: Vec<String>,
    pub exclusion_hits: Vec<String>,
    pub cash_flow: Option<CashFlowResult>,
    pub scored_at: DateTime<Utc>,
    #[serde(default)]
    pub grade_override: Option<GradeOverride>,
}

impl LeadScore {
    pub fn effective_grade(&self) -> Grade {
        self.grade_override
            .as_ref()
            .map(|value| value.grade)
            .unwrap_or(self.grade)
    }

    /// The failed cash-flow sub-check when the winning buy box required one.
    pub fn cash_flow_failure(&self) -> Option<CashFlowFailure> {
        if !self.requires_cash_flow {
            return None;
        }

        match &self.cash_flow {
            None => Some(CashFlowFailure::NotUnderwritten(
                "no cash-flow analysis available".to_string(),
            )),
            Some(result) => result.failure(),
        }
    }
}

/// Which cash-flow sub-check failed, used as the routing reason.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "check", rename_all = "snake_case")]
pub enum CashFlowFailure {
    NotUnderwritten(String),
    NegativeCashFlow { monthly_cash_flow: f64 },
    DscrBelowRequired { dscr: f64, required: f64 },
}

impl CashFlowFailure {
    pub fn summary(&self) -> String {
        match self {
            Self::NotUnderwritten(detail) => format!("cash flow check failed: {detail}"),
            Self::NegativeCashFlow { monthly_cash_flow } => format!(
                "cash flow check failed: monthly cash flow ${:.2} is not positive",
                monthly_cash_flow
            ),
            Self::DscrBelowRequired { dscr, required } => format!(
                "dscr check failed: {:.2} below required {:.2}",
                dscr, required
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    ImmediateCloser,
    DialerPriority,
    Nurture,
    Archive,
}

impl Route {
    pub const fn label(self) -> &'static str {
        match self {
            Self::ImmediateCloser => "immediate_closer",
            Self::DialerPriority => "dialer_priority",
            Self::Nurture => "nurture",
            Self::Archive => "archive",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Urgent,
    High,
    Normal,
    Low,
}

impl Priority {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Urgent => "urgent",
            Self::High => "high",
            Self::Normal => "normal",
            Self::Low => "low",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteOverride {
    pub route: Route,
    pub priority: Priority,
    pub justification: String,
    pub previous_route: Option<Route>,
    pub previous_priority: Option<Priority>,
    pub applied_by: UserId,
    pub applied_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeadRouting {
    pub route: Route,
    pub priority: Priority,
    pub sla_hours: u32,
    pub sla_due_at: DateTime<Utc>,
    pub reasons: Vec<String>,
    pub routing_reason: Option<String>,
    pub routed_at: DateTime<Utc>,
    #[serde(default)]
    pub alerted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub manual_override: Option<RouteOverride>,
}

/// Price band applied instead of the box-wide range for one city.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceBand {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

/// Acquisition criteria for one market and strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuyBox {
    pub id: BuyBoxId,
    pub name: String,
    pub market: String,
    pub strategy: Strategy,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub property_types: Vec<PropertyType>,
    #[serde(default)]
    pub counties: Vec<String>,
    #[serde(default)]
    pub cities: Vec<String>,
    #[serde(default)]
    pub min_beds: Option<u8>,
    #[serde(default)]
    pub min_baths: Option<f32>,
    #[serde(default)]
    pub min_sqft: Option<u32>,
    #[serde(default)]
    pub min_year_built: Option<u16>,
    #[serde(default)]
    pub min_price: Option<f64>,
    #[serde(default)]
    pub max_price: Option<f64>,
    #[serde(default)]
    pub min_arv: Option<f64>,
    #[serde(default)]
    pub max_arv: Option<f64>,
    #[serde(default)]
    pub allowed_conditions: Vec<ConditionTier>,
    #[serde(default)]
    pub city_price_overrides: BTreeMap<String, PriceBand>,
    #[serde(default)]
    pub exclusion_phrases: Vec<String>,
    #[serde(default)]
    pub requires_positive_cash_flow: bool,
    #[serde(default)]
    pub financing: Option<FinancingTerms>,
    #[serde(default)]
    pub health: Option<super::feedback::BuyBoxHealth>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum BuyBoxError {
    #[error("{strategy} buy boxes must require positive cash flow")]
    CashFlowRequired { strategy: &'static str },
    #[error("price range is inverted (min {min} > max {max})")]
    InvertedPriceRange { min: u64, max: u64 },
    #[error("buy box market must not be empty")]
    MissingMarket,
}

impl BuyBox {
    pub fn requires_cash_flow(&self) -> bool {
        self.requires_positive_cash_flow || self.strategy.requires_cash_flow()
    }

    pub fn validate(&self) -> Result<(), BuyBoxError> {
        if self.market.trim().is_empty() {
            return Err(BuyBoxError::MissingMarket);
        }

        if self.strategy.requires_cash_flow() && !self.requires_positive_cash_flow {
            return Err(BuyBoxError::CashFlowRequired {
                strategy: self.strategy.label(),
            });
        }

        if let (Some(min), Some(max)) = (self.min_price, self.max_price) {
            if min > max {
                return Err(BuyBoxError::InvertedPriceRange {
                    min: min as u64,
                    max: max as u64,
                });
            }
        }

        Ok(())
    }

    /// Price band for a city, falling back to the box-wide range.
    pub fn price_band_for(&self, city: &str) -> (PriceBand, bool) {
        let city_override = self
            .city_price_overrides
            .iter()
            .find(|(name, _)| same_place(name, city))
            .map(|(_, band)| *band);

        match city_override {
            Some(band) => (band, true),
            None => (
                PriceBand {
                    min: self.min_price,
                    max: self.max_price,
                },
                false,
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ContactChannels {
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub internal_user: Option<UserId>,
}

impl ContactChannels {
    pub fn destination(&self, channel: Channel) -> Option<&str> {
        let value = match channel {
            Channel::Sms => self.phone.as_deref(),
            Channel::Email => self.email.as_deref(),
            Channel::Internal => self.internal_user.as_ref().map(UserId::as_str),
        };
        value.filter(|raw| !raw.trim().is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChannelOptOuts {
    #[serde(default)]
    pub internal: bool,
    #[serde(default)]
    pub sms: bool,
    #[serde(default)]
    pub email: bool,
}

impl ChannelOptOuts {
    pub fn is_opted_out(&self, channel: Channel) -> bool {
        match channel {
            Channel::Internal => self.internal,
            Channel::Sms => self.sms,
            Channel::Email => self.email,
        }
    }

    pub fn opt_out(&mut self, channel: Channel) {
        match channel {
            Channel::Internal => self.internal = true,
            Channel::Sms => self.sms = true,
            Channel::Email => self.email = true,
        }
    }
}

/// A capital source receiving deal blasts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Buyer {
    pub id: BuyerId,
    pub name: String,
    #[serde(default)]
    pub contact: ContactChannels,
    #[serde(default)]
    pub markets: Vec<String>,
    #[serde(default)]
    pub legacy_markets: Vec<String>,
    #[serde(default)]
    pub counties: Vec<String>,
    #[serde(default)]
    pub cities: Vec<String>,
    #[serde(default)]
    pub property_types: Vec<PropertyType>,
    #[serde(default)]
    pub strategies: Vec<Strategy>,
    #[serde(default)]
    pub min_beds: Option<u8>,
    #[serde(default)]
    pub min_baths: Option<f32>,
    #[serde(default)]
    pub min_sqft: Option<u32>,
    #[serde(default)]
    pub min_year_built: Option<u16>,
    #[serde(default)]
    pub max_price: Option<f64>,
    #[serde(default)]
    pub min_arv: Option<f64>,
    #[serde(default)]
    pub max_rehab: Option<f64>,
    #[serde(default)]
    pub tolerates_heavy_rehab: bool,
    #[serde(default)]
    pub target_monthly_cash_flow: Option<f64>,
    #[serde(default)]
    pub opt_outs: ChannelOptOuts,
    #[serde(default)]
    pub cooldown_hours: u32,
    #[serde(default)]
    pub last_blast_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_contacted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_purchase_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub proof_of_funds: bool,
    #[serde(default)]
    pub engagement_score: f64,
    #[serde(default)]
    pub close_rate: f64,
    #[serde(default)]
    pub responsiveness_score: f64,
}

impl Buyer {
    pub fn in_market(&self, market: &str) -> bool {
        self.markets
            .iter()
            .chain(self.legacy_markets.iter())
            .any(|candidate| same_place(candidate, market))
    }

    pub fn prefers_market(&self, market: &str) -> bool {
        self.markets
            .iter()
            .any(|candidate| same_place(candidate, market))
    }

    /// A buyer only holding rental-style strategies underwrites on cash flow.
    pub fn requires_cash_flow(&self) -> bool {
        !self.strategies.is_empty()
            && self
                .strategies
                .iter()
                .all(|strategy| strategy.requires_cash_flow())
    }

    pub fn is_buy_and_hold(&self) -> bool {
        self.strategies.contains(&Strategy::BuyHold)
    }
}
