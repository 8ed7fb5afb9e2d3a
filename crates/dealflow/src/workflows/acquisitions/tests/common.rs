use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};

use crate::workflows::acquisitions::blast::{
    InternalInbox, MessageTemplate, OutboundProvider, OutboundProviders, TemplateKey,
    TemplateStatus,
};
use crate::workflows::acquisitions::domain::{
    BuyBox, BuyBoxId, Buyer, BuyerId, ChannelOptOuts, ConditionTier, ContactChannels, DealTerms,
    HandoffStatus, Lead, LeadId, PropertyFacts, PropertyLocation, PropertyType, Strategy, UserId,
};
use crate::workflows::acquisitions::memory::{InMemoryPipelineStore, RecordingNotifier};
use crate::workflows::acquisitions::service::{DealPipelineService, ManualClock, PipelineConfig};
use crate::workflows::acquisitions::underwriting::{FinancingTerms, LoanType};

pub(super) const POLK: &str = "ia-polk";
pub(super) const STORY: &str = "ia-story";
pub(super) const TEMPLATE: &str = "deal-alert";

pub(super) type Service = DealPipelineService<InMemoryPipelineStore, RecordingNotifier>;

pub(super) fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 2, 15, 0, 0)
        .single()
        .expect("valid timestamp")
}

pub(super) fn buy_box(id: &str, market: &str, strategy: Strategy) -> BuyBox {
    BuyBox {
        id: BuyBoxId::from(id),
        name: id.replace('-', " "),
        market: market.to_string(),
        strategy,
        active: true,
        property_types: vec![PropertyType::SingleFamily],
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

/// Polk County flip box priced $100k-$250k.
pub(super) fn flip_box() -> BuyBox {
    BuyBox {
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
        ..buy_box("bb-polk-flip", POLK, Strategy::Flip)
    }
}

/// Story County rental box: interest-only at 8% with reserves zeroed so
/// cash flow is easy to reason about.
pub(super) fn rental_box() -> BuyBox {
    BuyBox {
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
        ..buy_box("bb-story-rental", STORY, Strategy::BuyHold)
    }
}

pub(super) fn lead(id: &str, county: &str, city: &str, asking_price: f64) -> Lead {
    Lead {
        id: LeadId::from(id),
        location: PropertyLocation {
            state: "IA".to_string(),
            county: county.to_string(),
            city: city.to_string(),
            street_address: Some("1204 Walnut St".to_string()),
            zip: Some("50309".to_string()),
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
        description: "Motivated seller, vacant since spring".to_string(),
        notes: Vec::new(),
        red_flags: Vec::new(),
        strategy: None,
        intake_locked: false,
        closer_handoff: HandoffStatus::None,
        score: None,
        routing: None,
    }
}

/// $150k Des Moines single family that fits the flip box on every check.
pub(super) fn flip_lead() -> Lead {
    lead("lead-flip", "Polk", "Des Moines", 150_000.0)
}

/// $120k Ames rental losing $50 a month: $1,000 rent against $450 of taxes
/// and insurance plus $600 of interest.
pub(super) fn negative_rental_lead() -> Lead {
    let mut lead = lead("lead-rental-short", "Story", "Ames", 120_000.0);
    lead.terms.estimated_rent = Some(1_000.0);
    lead.terms.annual_taxes = Some(4_200.0);
    lead.terms.annual_insurance = Some(1_200.0);
    lead
}

/// Same Ames rental at $1,600 rent, clearing $550 a month.
pub(super) fn positive_rental_lead() -> Lead {
    let mut lead = negative_rental_lead();
    lead.id = LeadId::from("lead-rental-strong");
    lead.terms.estimated_rent = Some(1_600.0);
    lead
}

pub(super) fn buyer(id: &str, market: &str) -> Buyer {
    Buyer {
        id: BuyerId::from(id),
        name: format!("Buyer {id}"),
        contact: ContactChannels {
            phone: Some("+15155550100".to_string()),
            email: Some(format!("{id}@example.com")),
            internal_user: Some(UserId(format!("user-{id}"))),
        },
        markets: vec![market.to_string()],
        legacy_markets: Vec::new(),
        counties: Vec::new(),
        cities: Vec::new(),
        property_types: Vec::new(),
        strategies: vec![Strategy::Flip],
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
        cooldown_hours: 0,
        last_blast_at: None,
        last_contacted_at: None,
        last_purchase_at: None,
        proof_of_funds: false,
        engagement_score: 0.0,
        close_rate: 0.0,
        responsiveness_score: 0.0,
    }
}

pub(super) fn template() -> MessageTemplate {
    MessageTemplate {
        key: TemplateKey(TEMPLATE.to_string()),
        status: TemplateStatus::Active,
        channel: None,
        subject: Some("New {{property_type}} in {{city}}".to_string()),
        body: "{{address}} asking {{price}}, ARV {{arv}}. Grade {{grade}}.".to_string(),
    }
}

pub(super) struct Harness {
    pub service: Arc<Service>,
    pub store: Arc<InMemoryPipelineStore>,
    pub notifier: Arc<RecordingNotifier>,
    pub clock: Arc<ManualClock>,
    pub inbox: Arc<InternalInbox>,
}

pub(super) fn harness() -> Harness {
    harness_with(PipelineConfig::default())
}

pub(super) fn harness_with(config: PipelineConfig) -> Harness {
    build_harness(config, None)
}

/// Default harness with an SMS gateway next to the internal inbox.
pub(super) fn harness_with_sms(sms: Arc<dyn OutboundProvider>) -> Harness {
    build_harness(PipelineConfig::default(), Some(sms))
}

fn build_harness(config: PipelineConfig, sms: Option<Arc<dyn OutboundProvider>>) -> Harness {
    let store = Arc::new(InMemoryPipelineStore::new());
    let notifier = Arc::new(RecordingNotifier::default());
    let clock = Arc::new(ManualClock::new(now()));
    let inbox = Arc::new(InternalInbox::default());

    let mut providers = OutboundProviders::internal_only(inbox.clone());
    if let Some(sms) = sms {
        providers = providers.with_sms(sms);
    }
    let service = DealPipelineService::new(store.clone(), notifier.clone(), config)
        .with_clock(clock.clone())
        .with_providers(providers);

    Harness {
        service: Arc::new(service),
        store,
        notifier,
        clock,
        inbox,
    }
}

impl Harness {
    /// Flip box, template, the $150k flip lead, and `buyers` Polk buyers.
    pub fn seeded_flip(&self, buyers: usize) -> LeadId {
        self.service
            .save_buy_box(flip_box())
            .expect("flip box is valid");
        self.store
            .save_template(template())
            .expect("template stored");
        let lead = flip_lead();
        let id = lead.id.clone();
        self.save_lead(lead);
        for index in 0..buyers {
            self.save_buyer(buyer(&format!("buyer-{index:02}"), POLK));
        }
        id
    }

    pub fn save_lead(&self, lead: Lead) {
        use crate::workflows::acquisitions::repository::LeadRepository;
        self.store.save_lead(lead).expect("lead stored");
    }

    pub fn save_buyer(&self, buyer: Buyer) {
        use crate::workflows::acquisitions::repository::BuyerRepository;
        self.store.save_buyer(buyer).expect("buyer stored");
    }

    pub fn stored_buyer(&self, id: &str) -> Buyer {
        use crate::workflows::acquisitions::repository::BuyerRepository;
        self.store
            .fetch_buyer(&BuyerId::from(id))
            .expect("fetch succeeds")
            .expect("buyer present")
    }

    pub fn stored_lead(&self, id: &LeadId) -> Lead {
        use crate::workflows::acquisitions::repository::LeadRepository;
        self.store
            .fetch_lead(id)
            .expect("fetch succeeds")
            .expect("lead present")
    }
}

pub(super) async fn read_json_body(response: axum::response::Response) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), 256 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}
