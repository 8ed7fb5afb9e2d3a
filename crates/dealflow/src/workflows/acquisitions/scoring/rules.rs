use super::super::domain::{same_place, BuyBox, Lead};
use super::config::{CheckKind, CheckWeights};
use super::CheckResult;

/// Checklist tally for one lead against one buy box.
pub(crate) struct BoxEvaluation {
    pub checks: Vec<CheckResult>,
    pub earned: u32,
    pub available: u32,
    pub hard_fail: bool,
    pub exclusion_hits: Vec<String>,
}

impl BoxEvaluation {
    pub fn raw_score(&self, exclusion_penalty: u8) -> u8 {
        if self.hard_fail || self.available == 0 {
            return 0;
        }

        let weighted = (f64::from(self.earned) / f64::from(self.available) * 100.0).round();
        let penalty = if self.exclusion_hits.is_empty() {
            0.0
        } else {
            f64::from(exclusion_penalty)
        };
        (weighted - penalty).clamp(0.0, 100.0) as u8
    }
}

struct Tally<'w> {
    weights: &'w CheckWeights,
    checks: Vec<CheckResult>,
    earned: u32,
    available: u32,
}

impl<'w> Tally<'w> {
    fn record(&mut self, kind: CheckKind, passed: bool, notes: String) {
        let weight = self.weights.weight(kind);
        self.available += u32::from(weight);
        if passed {
            self.earned += u32::from(weight);
        }
        self.checks.push(CheckResult {
            check: kind,
            passed,
            weight,
            notes,
        });
    }
}

pub(crate) fn evaluate_box(
    lead: &Lead,
    buy_box: &BuyBox,
    weights: &CheckWeights,
    major_exclusions: &[String],
) -> BoxEvaluation {
    let mut tally = Tally {
        weights,
        checks: Vec::new(),
        earned: 0,
        available: 0,
    };
    let facts = &lead.facts;
    let terms = &lead.terms;

    let mut hard_fail = false;
    if !buy_box.property_types.is_empty() {
        let matched = buy_box.property_types.contains(&facts.property_type);
        hard_fail = !matched;
        tally.record(
            CheckKind::PropertyType,
            matched,
            if matched {
                format!("{} is an accepted property type", facts.property_type.label())
            } else {
                format!(
                    "{} is not an accepted property type",
                    facts.property_type.label()
                )
            },
        );
    }

    let beds_rule = buy_box.min_beds.zip(facts.beds);
    let baths_rule = buy_box.min_baths.zip(facts.baths);
    if beds_rule.is_some() || baths_rule.is_some() {
        let beds_ok = beds_rule.map(|(min, beds)| beds >= min).unwrap_or(true);
        let baths_ok = baths_rule.map(|(min, baths)| baths >= min).unwrap_or(true);
        let passed = beds_ok && baths_ok;
        tally.record(
            CheckKind::BedsBaths,
            passed,
            format!(
                "{} bd / {} ba against minimum {} bd / {} ba",
                display_opt(facts.beds),
                display_opt(facts.baths),
                display_opt(buy_box.min_beds),
                display_opt(buy_box.min_baths)
            ),
        );
    }

    if let Some((min, sqft)) = buy_box.min_sqft.zip(facts.sqft) {
        tally.record(
            CheckKind::Sqft,
            sqft >= min,
            format!("{sqft} sq ft against minimum {min}"),
        );
    }

    if let Some((min, year)) = buy_box.min_year_built.zip(facts.year_built) {
        tally.record(
            CheckKind::YearBuilt,
            year >= min,
            format!("built {year} against minimum {min}"),
        );
    }

    if let (false, Some(condition)) = (buy_box.allowed_conditions.is_empty(), facts.condition) {
        let passed = buy_box.allowed_conditions.contains(&condition);
        tally.record(
            CheckKind::Condition,
            passed,
            if passed {
                format!("{} condition accepted", condition.label())
            } else {
                format!("{} condition outside allowed tiers", condition.label())
            },
        );
    }

    let (band, city_override) = buy_box.price_band_for(&lead.location.city);
    if band.min.is_some() || band.max.is_some() {
        let price = terms.asking_price;
        let passed = band.min.map(|min| price >= min).unwrap_or(true)
            && band.max.map(|max| price <= max).unwrap_or(true);
        let scope = if city_override {
            format!("{} price override", lead.location.city)
        } else {
            "price range".to_string()
        };
        tally.record(
            CheckKind::Price,
            passed,
            format!(
                "asking ${:.0} {} {} {}-{}",
                price,
                if passed { "within" } else { "outside" },
                scope,
                display_money(band.min),
                display_money(band.max)
            ),
        );
    }

    if let (true, Some(arv)) = (
        buy_box.min_arv.is_some() || buy_box.max_arv.is_some(),
        terms.arv,
    ) {
        let passed = buy_box.min_arv.map(|min| arv >= min).unwrap_or(true)
            && buy_box.max_arv.map(|max| arv <= max).unwrap_or(true);
        tally.record(
            CheckKind::Arv,
            passed,
            format!(
                "ARV ${:.0} {} {}-{}",
                arv,
                if passed { "within" } else { "outside" },
                display_money(buy_box.min_arv),
                display_money(buy_box.max_arv)
            ),
        );
    }

    if !buy_box.counties.is_empty() || !buy_box.cities.is_empty() {
        let county_ok = buy_box.counties.is_empty()
            || buy_box
                .counties
                .iter()
                .any(|county| same_place(county, &lead.location.county));
        let city_ok = buy_box.cities.is_empty()
            || buy_box
                .cities
                .iter()
                .any(|city| same_place(city, &lead.location.city));
        let passed = county_ok && city_ok;
        tally.record(
            CheckKind::Location,
            passed,
            format!(
                "{}, {} {} target area",
                lead.location.city,
                lead.location.county,
                if passed { "inside" } else { "outside" }
            ),
        );
    }

    let exclusion_hits = scan_exclusions(lead, &buy_box.exclusion_phrases, major_exclusions);

    BoxEvaluation {
        checks: tally.checks,
        earned: tally.earned,
        available: tally.available,
        hard_fail,
        exclusion_hits,
    }
}

/// Case-insensitive phrase scan over description, notes, and red flags.
pub(crate) fn scan_exclusions(
    lead: &Lead,
    box_phrases: &[String],
    major_exclusions: &[String],
) -> Vec<String> {
    let haystack: Vec<String> = lead
        .searchable_text()
        .map(|text| text.to_lowercase())
        .collect();

    let mut hits: Vec<String> = Vec::new();
    for phrase in box_phrases.iter().chain(major_exclusions.iter()) {
        let needle = phrase.trim().to_lowercase();
        if needle.is_empty() || hits.iter().any(|hit| *hit == needle) {
            continue;
        }
        if haystack.iter().any(|text| text.contains(&needle)) {
            hits.push(needle);
        }
    }
    hits
}

fn display_opt<T: std::fmt::Display>(value: Option<T>) -> String {
    value
        .map(|inner| inner.to_string())
        .unwrap_or_else(|| "?".to_string())
}

fn display_money(value: Option<f64>) -> String {
    value
        .map(|amount| format!("${amount:.0}"))
        .unwrap_or_else(|| "any".to_string())
}
