use crate::infra::{
    seed_store, SAMPLE_FLIP_LEAD, SAMPLE_RENTAL_BOX, SAMPLE_RENTAL_LEAD,
    SAMPLE_SHORT_RENTAL_LEAD, SAMPLE_TEMPLATE,
};
use chrono::{DateTime, Duration, Utc};
use clap::Args;
use dealflow::config::AppConfig;
use dealflow::error::AppError;
use dealflow::workflows::acquisitions::{
    BlastRequest, BuyBoxId, BuyerId, Channel, Clock, CloseRequest, DealPipelineService,
    InMemoryPipelineStore, InternalInbox, LeadId, LeadScoreView, ManualClock, MatchQuery,
    OutboundProviders, PeriodActuals, RecipientResponse, RecipientStatus, RecordingNotifier,
    TemplateKey, UserId,
};
use std::sync::Arc;

#[derive(Args, Debug, Default)]
pub(crate) struct DemoArgs {
    /// Pin the demo clock (RFC 3339). Defaults to now.
    #[arg(long, value_parser = crate::infra::parse_timestamp)]
    pub(crate) now: Option<DateTime<Utc>>,
    /// Minimum buyer match score shown in the match listing.
    #[arg(long)]
    pub(crate) threshold: Option<u8>,
    /// Skip the post-close feedback portion of the demo.
    #[arg(long)]
    pub(crate) skip_feedback: bool,
}

type DemoService = DealPipelineService<InMemoryPipelineStore, RecordingNotifier>;

pub(crate) fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let DemoArgs {
        now,
        threshold,
        skip_feedback,
    } = args;

    let config = AppConfig::load()?;
    let clock = Arc::new(ManualClock::new(now.unwrap_or_else(Utc::now)));
    let store = Arc::new(InMemoryPipelineStore::new());
    seed_store(&store)?;
    let notifier = Arc::new(RecordingNotifier::default());
    let inbox = Arc::new(InternalInbox::default());
    let service = DealPipelineService::new(store, notifier.clone(), config.pipeline)
        .with_clock(clock.clone())
        .with_providers(OutboundProviders::internal_only(inbox.clone()));

    println!("Deal pipeline demo");
    println!("\nLead scoring and routing");
    for lead_id in [SAMPLE_FLIP_LEAD, SAMPLE_RENTAL_LEAD, SAMPLE_SHORT_RENTAL_LEAD] {
        let view = service.recalculate_score(&LeadId::from(lead_id))?;
        render_score(&view);
    }

    let flip = LeadId::from(SAMPLE_FLIP_LEAD);
    let report = service.matching_buyers(
        &flip,
        MatchQuery {
            threshold,
            ..MatchQuery::default()
        },
    )?;
    println!(
        "\nBuyer matches for {} ({}): {} ranked, {} excluded",
        flip,
        report.market,
        report.matches.len(),
        report.excluded_total
    );
    for candidate in &report.matches {
        println!(
            "  - {} [{}] score {}: {}",
            candidate.buyer_name,
            candidate.buyer_id,
            candidate.score,
            candidate.reasons.join("; ")
        );
    }
    for excluded in &report.excluded {
        println!(
            "  x {} [{}]: {}",
            excluded.buyer_name, excluded.buyer_id, excluded.summary
        );
    }

    run_blast(&service, &flip, &inbox)?;

    let alerts = notifier.sent();
    if alerts.is_empty() {
        println!("\nNotifications: none dispatched");
    } else {
        println!("\nNotifications");
        for alert in alerts {
            println!(
                "  - template={} lead={} recipient={}",
                alert.template,
                alert
                    .lead_id
                    .as_ref()
                    .map(|id| id.as_str())
                    .unwrap_or("-"),
                alert
                    .recipient
                    .as_ref()
                    .map(|id| id.as_str())
                    .unwrap_or("-")
            );
        }
    }

    if skip_feedback {
        return Ok(());
    }
    run_feedback(&service, &clock)
}

fn render_score(view: &LeadScoreView) {
    println!(
        "- {} -> grade {} (score {}, computed {})",
        view.lead_id, view.effective_grade, view.score.score, view.score.grade
    );
    if !view.score.failed_checks.is_empty() {
        println!("  Failed checks: {}", view.score.failed_checks.join(", "));
    }
    if let Some(cash_flow) = &view.score.cash_flow {
        match &cash_flow.error {
            Some(error) => println!("  Cash flow not underwritten: {error}"),
            None => println!(
                "  Cash flow ${:.0}/mo, DSCR {}",
                cash_flow.monthly_cash_flow,
                cash_flow
                    .dscr
                    .map(|dscr| format!("{dscr:.2}"))
                    .unwrap_or_else(|| "n/a".to_string())
            ),
        }
    }
    if let Some(routing) = &view.routing {
        println!(
            "  Route {} / {} (SLA {}h){}",
            routing.route.label(),
            routing.priority.label(),
            routing.sla_hours,
            routing
                .routing_reason
                .as_ref()
                .map(|reason| format!(": {reason}"))
                .unwrap_or_default()
        );
    }
    if view.intake_locked {
        println!("  Intake locked for the closer queue");
    }
}

fn run_blast(service: &DemoService, lead_id: &LeadId, inbox: &InternalInbox) -> Result<(), AppError> {
    let creator = UserId::from("acq-manager");
    let draft = service.create_blast(
        BlastRequest {
            lead_id: lead_id.clone(),
            channel: Channel::Internal,
            template_key: TemplateKey(SAMPLE_TEMPLATE.to_string()),
            max_recipients: Some(3),
            mask_address: true,
        },
        creator,
    )?;
    println!(
        "\nDeal blast {} drafted for {} recipients",
        draft.blast.id,
        draft.recipients.len()
    );

    let sent = service.send_blast(&draft.blast.id)?;
    println!(
        "- Sent {} | failed {} | status {}",
        sent.blast.stats.sent,
        sent.blast.stats.failed,
        sent.blast.status.label()
    );
    if let Some(message) = inbox.delivered().first() {
        println!(
            "  First message: {}",
            message.subject.as_deref().unwrap_or("(no subject)")
        );
        println!("  {}", message.body.lines().next().unwrap_or_default());
    }

    let replies = [
        (
            "Interested, send me the walkthrough times",
            Some(RecipientStatus::Interested),
        ),
        ("STOP texting me", None),
    ];
    for (recipient, (text, status)) in sent.recipients.iter().zip(replies) {
        let updated = service.record_response(
            &sent.blast.id,
            RecipientResponse {
                recipient_id: recipient.id.clone(),
                response_text: text.to_string(),
                status,
            },
        )?;
        println!(
            "  Reply from {}: \"{}\" -> {}",
            updated.buyer_name,
            text,
            updated.status.label()
        );
    }

    let view = service.get_blast(&sent.blast.id)?;
    println!(
        "- Tally: {} interested, {} opted out, {} awaiting reply",
        view.blast.stats.interested,
        view.blast.stats.opted_out,
        view.blast.stats.sent
    );
    Ok(())
}

fn run_feedback(service: &DemoService, clock: &ManualClock) -> Result<(), AppError> {
    println!("\nPost-close feedback");
    let performance = service.record_close(CloseRequest {
        lead_id: LeadId::from(SAMPLE_RENTAL_LEAD),
        buy_box_id: Some(BuyBoxId::from(SAMPLE_RENTAL_BOX)),
        buyer_id: Some(BuyerId::from("buyer-cyclone")),
        purchase_price: None,
        pro_forma: None,
    })?;
    println!(
        "- Closed {}: pro forma rent ${:.0}, NOI ${:.0}, cash flow ${:.0}/mo",
        performance.lead_id,
        performance.pro_forma.monthly_rent,
        performance.pro_forma.monthly_noi,
        performance.pro_forma.monthly_cash_flow
    );

    let first_month = clock.now().date_naive();
    let mut health = None;
    for month in 0..3 {
        let period_start = first_month + Duration::days(30 * month);
        let recorded = service.append_period(
            &performance.id,
            PeriodActuals {
                period_start,
                period_end: period_start + Duration::days(29),
                monthly_rent: 1_300.0,
                monthly_noi: 850.0,
                monthly_cash_flow: 250.0,
                dscr: Some(1.15),
            },
        )?;
        if let Some(period) = recorded.performance.periods.last() {
            println!(
                "  Period {} to {}: grade {:?} (cash flow variance {:+.0}%)",
                period.actuals.period_start,
                period.actuals.period_end,
                period.grade,
                period.variance.cash_flow * 100.0
            );
        }
        health = recorded.buy_box_health;
    }

    if let Some(health) = health {
        println!(
            "- Buy box {} health: {:.0}% A/B across {} periods, tier {:?}",
            SAMPLE_RENTAL_BOX,
            health.ab_rate * 100.0,
            health.sample_size,
            health.warning_tier
        );
    }

    let recommendations = service.generate_recommendations(&BuyBoxId::from(SAMPLE_RENTAL_BOX))?;
    if recommendations.is_empty() {
        println!("- No threshold changes recommended");
        return Ok(());
    }
    println!("- Recommendations:");
    for recommendation in &recommendations {
        println!(
            "    {} [{}] confidence {:.2}: {}",
            recommendation.id,
            recommendation.kind.label(),
            recommendation.confidence,
            recommendation.evidence.join("; ")
        );
    }

    let accepted = service.accept_recommendation(
        &recommendations[0].id,
        UserId::from("acq-director"),
        Some("approved in weekly review".to_string()),
    )?;
    println!(
        "- Accepted {} ({})",
        accepted.id,
        accepted.kind.label()
    );
    Ok(())
}
