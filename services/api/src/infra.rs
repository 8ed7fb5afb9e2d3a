use chrono::{DateTime, Utc};
use dealflow::workflows::acquisitions::repository::{
    BuyBoxRepository, BuyerRepository, LeadRepository,
};
use dealflow::workflows::acquisitions::{
    BuyBox, BuyBoxId, Buyer, BuyerId, ChannelOptOuts, ConditionTier, ContactChannels, DealTerms,
    FinancingTerms, HandoffStatus, InMemoryPipelineStore, Lead, LeadId, LoanType,
    MessageTemplate, Notifier, NotifyError, PipelineError, PipelineNotification, PropertyFacts,
    PropertyLocation, PropertyType, Strategy, TemplateKey, TemplateStatus, UserId,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::info;

pub(crate) const SAMPLE_TEMPLATE: &str = "deal-alert";
pub(crate) const SAMPLE_FLIP_LEAD: &str = "lead-1001";
pub(crate) const SAMPLE_RENTAL_LEAD: &str = "lead-1002";
pub(crate) const SAMPLE_SHORT_RENTAL_LEAD: &str = "lead-1003";
pub(crate) const SAMPLE_RENTAL_BOX: &str = "bb-story-rental";

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Writes pipeline notifications to the log until a real transport is wired in.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, notification: PipelineNotification) -> Result<(), NotifyError> {
        info!(
            template = %notification.template,
            recipient = ?notification.recipient,
            lead_id = ?notification.lead_id,
            details = ?notification.details,
            "pipeline notification"
        );
        Ok(())
    }
}

/// Two Iowa buy boxes, a handful of buyers, the blast template and three leads.
pub(crate) fn seed_store(store: &InMemoryPipelineStore) -> Result<(), PipelineError> {
    for buy_box in sample_buy_boxes() {
        buy_box.validate()?;
        store.save_buy_box(buy_box)?;
    }
    for buyer in sample_buyers() {
        store.save_buyer(buyer)?;
    }
    store.save_template(sample_template())?;
    for lead in sample_leads() {
        store.save_lead(lead)?;
    }
    Ok(())
}

fn blank_buy_box(id: &str, name: &str, market: &str, strategy: Strategy) -> BuyBox {
    BuyBox {
        id: BuyBoxId::from(id),
        name: name.to_string(),
        market: market.to_string(),
        strategy,
        active: true,
        property_types: vec![PropertyType::SingleFamily, PropertyType::MultiFamily],
        counties: Vec::new(),
        cities: Vec::new(),
        min_beds: None,
        min_baths: None,
        min_sqft: None,
        min_year_built: None,
        min_price: None,
        max_price: None,
        min_arv: None,
        max_arv: None,
        allowed_conditions: Vec::new(),
        city_price_overrides: Default::default(),
        exclusion_phrases: Vec::new(),
        requires_positive_cash_flow: false,
        financing: None,
        health: None,
    }
}

pub(crate) fn sample_buy_boxes() -> Vec<BuyBox> {
    let flip = BuyBox {
        counties: vec!["Polk".to_string()],
        min_beds: Some(3),
        min_baths: Some(1.5),
        min_sqft: Some(1_000),
        min_year_built: Some(1950),
        min_price: Some(100_000.0),
        max_price: Some(250_000.0),
        allowed_conditions: vec![
            ConditionTier::Turnkey,
            ConditionTier::Light,
            ConditionTier::Medium,
        ],
        ..blank_buy_box("bb-polk-flip", "Polk County flips", "ia-polk", Strategy::Flip)
    };

    let rental = BuyBox {
        counties: vec!["Story".to_string()],
        min_price: Some(80_000.0),
        max_price: Some(200_000.0),
        requires_positive_cash_flow: true,
        financing: Some(FinancingTerms {
            loan_type: LoanType::InterestOnly,
            loan_to_value: 0.75,
            interest_rate: Some(0.08),
            amortization_years: 30,
            required_dscr: 1.25,
            vacancy_rate: Some(0.0),
            maintenance_rate: Some(0.0),
            management_rate: Some(0.0),
        }),
        ..blank_buy_box(
            SAMPLE_RENTAL_BOX,
            "Story County rentals",
            "ia-story",
            Strategy::BuyHold,
        )
    };

    vec![flip, rental]
}

fn sample_buyer(id: &str, name: &str, market: &str, strategy: Strategy) -> Buyer {
    Buyer {
        id: BuyerId::from(id),
        name: name.to_string(),
        contact: ContactChannels {
            phone: None,
            email: Some(format!("{id}@buyers.example.com")),
            internal_user: Some(UserId(format!("portal-{id}"))),
        },
        markets: vec![market.to_string()],
        legacy_markets: Vec::new(),
        counties: Vec::new(),
        cities: Vec::new(),
        property_types: Vec::new(),
        strategies: vec![strategy],
        min_beds: None,
        min_baths: None,
        min_sqft: None,
        min_year_built: None,
        max_price: None,
        min_arv: None,
        max_rehab: None,
        tolerates_heavy_rehab: false,
        target_monthly_cash_flow: None,
        opt_outs: ChannelOptOuts::default(),
        cooldown_hours: 72,
        last_blast_at: None,
        last_contacted_at: None,
        last_purchase_at: None,
        proof_of_funds: false,
        engagement_score: 0.0,
        close_rate: 0.0,
        responsiveness_score: 0.0,
    }
}

pub(crate) fn sample_buyers() -> Vec<Buyer> {
    vec![
        Buyer {
            counties: vec!["Polk".to_string()],
            cities: vec!["Des Moines".to_string()],
            proof_of_funds: true,
            engagement_score: 85.0,
            ..sample_buyer("buyer-ridgeline", "Ridgeline Capital", "ia-polk", Strategy::Flip)
        },
        Buyer {
            max_price: Some(180_000.0),
            engagement_score: 40.0,
            ..sample_buyer("buyer-hawkeye", "Hawkeye Homes", "ia-polk", Strategy::Flip)
        },
        Buyer {
            min_beds: Some(4),
            ..sample_buyer("buyer-eastside", "Eastside Rehab Co", "ia-polk", Strategy::Flip)
        },
        Buyer {
            legacy_markets: vec!["ia-polk".to_string()],
            ..sample_buyer("buyer-prairie", "Prairie Holdings", "ia-dallas", Strategy::Flip)
        },
        Buyer {
            target_monthly_cash_flow: Some(200.0),
            proof_of_funds: true,
            engagement_score: 60.0,
            ..sample_buyer("buyer-cyclone", "Cyclone Rentals", "ia-story", Strategy::BuyHold)
        },
    ]
}

pub(crate) fn sample_template() -> MessageTemplate {
    MessageTemplate {
        key: TemplateKey(SAMPLE_TEMPLATE.to_string()),
        status: TemplateStatus::Active,
        channel: None,
        subject: Some("New {{property_type}} in {{city}}".to_string()),
        body: "{{address}} asking {{price}} (ARV {{arv}}, rehab {{rehab}}). Grade {{grade}}."
            .to_string(),
    }
}

fn sample_lead(id: &str, county: &str, city: &str, street: &str, asking_price: f64) -> Lead {
    Lead {
        id: LeadId::from(id),
        location: PropertyLocation {
            state: "IA".to_string(),
            county: county.to_string(),
            city: city.to_string(),
            street_address: Some(street.to_string()),
            zip: None,
        },
        facts: PropertyFacts {
            property_type: PropertyType::SingleFamily,
            beds: Some(3),
            baths: Some(2.0),
            sqft: Some(1_450),
            year_built: Some(1978),
            condition: Some(ConditionTier::Light),
        },
        terms: DealTerms {
            asking_price,
            arv: Some(asking_price * 1.4),
            estimated_rehab: Some(18_000.0),
            ..DealTerms::default()
        },
        description: "Seller relocating, vacant and ready to show".to_string(),
        notes: Vec::new(),
        red_flags: Vec::new(),
        strategy: None,
        intake_locked: false,
        closer_handoff: HandoffStatus::None,
        score: None,
        routing: None,
    }
}

pub(crate) fn sample_leads() -> Vec<Lead> {
    let flip = sample_lead(SAMPLE_FLIP_LEAD, "Polk", "Des Moines", "1204 Walnut St", 150_000.0);

    let mut rental = sample_lead(SAMPLE_RENTAL_LEAD, "Story", "Ames", "418 Duff Ave", 120_000.0);
    rental.terms.estimated_rent = Some(1_600.0);
    rental.terms.annual_taxes = Some(4_200.0);
    rental.terms.annual_insurance = Some(1_200.0);

    let mut short = rental.clone();
    short.id = LeadId::from(SAMPLE_SHORT_RENTAL_LEAD);
    short.location.street_address = Some("2710 Lincoln Way".to_string());
    short.terms.estimated_rent = Some(1_000.0);

    vec![flip, rental, short]
}

pub(crate) fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|timestamp| timestamp.with_timezone(&Utc))
        .map_err(|err| format!("failed to parse '{raw}' as an RFC 3339 timestamp ({err})"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_buy_boxes_validate() {
        for buy_box in sample_buy_boxes() {
            buy_box.validate().expect("sample buy box valid");
        }
    }

    #[test]
    fn seed_store_populates_markets() {
        let store = InMemoryPipelineStore::new();
        seed_store(&store).expect("seed succeeds");

        let polk = store.buyers_in_market("ia-polk").expect("buyers listed");
        assert_eq!(polk.len(), 4);
        let story = store
            .buy_boxes_in_market("ia-story")
            .expect("buy boxes listed");
        assert_eq!(story.len(), 1);
        assert!(store
            .fetch_lead(&LeadId::from(SAMPLE_FLIP_LEAD))
            .expect("lead fetch")
            .is_some());
    }

    #[test]
    fn parses_rfc3339_timestamps() {
        let parsed = parse_timestamp("2025-06-02T15:00:00Z").expect("timestamp parses");
        assert_eq!(parsed.to_rfc3339(), "2025-06-02T15:00:00+00:00");
        assert!(parse_timestamp("yesterday").is_err());
    }
}
