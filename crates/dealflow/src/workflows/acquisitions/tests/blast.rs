use std::sync::{Arc, Mutex};

use chrono::Duration;

use super::common::*;
use crate::workflows::acquisitions::blast::{
    BlastConfig, BlastRequest, BlastStatus, DealPackage, DeliveryReceipt, OutboundError,
    OutboundMessage, OutboundProvider, RecipientStatus, TemplateKey, TemplateStatus,
    COMPLIANCE_DISCLAIMER,
};
use crate::workflows::acquisitions::domain::{Channel, Grade, LeadId, Route, UserId};
use crate::workflows::acquisitions::service::{PipelineConfig, PipelineError, RecipientResponse};

fn request(lead_id: &LeadId) -> BlastRequest {
    BlastRequest {
        lead_id: lead_id.clone(),
        channel: Channel::Internal,
        template_key: TemplateKey(TEMPLATE.to_string()),
        max_recipients: None,
        mask_address: true,
    }
}

fn creator() -> UserId {
    UserId::from("acq-manager")
}

#[test]
fn draft_snapshots_grade_and_queues_ranked_buyers() {
    let harness = harness();
    let lead_id = harness.seeded_flip(30);
    harness
        .service
        .recalculate_score(&lead_id)
        .expect("lead scores");

    let view = harness
        .service
        .create_blast(request(&lead_id), creator())
        .expect("blast drafts");

    assert_eq!(view.blast.status, BlastStatus::Draft);
    assert_eq!(view.blast.max_recipients, 25);
    assert_eq!(view.recipients.len(), 25);
    assert_eq!(view.blast.stats.queued, 25);
    assert_eq!(view.blast.grade_snapshot.grade, Some(Grade::A));
    assert_eq!(view.blast.grade_snapshot.route, Some(Route::ImmediateCloser));
    assert!(view
        .recipients
        .iter()
        .enumerate()
        .all(|(index, recipient)| recipient.rank == index + 1
            && recipient.status == RecipientStatus::Queued));
}

#[test]
fn send_delivers_in_rank_order_and_starts_cooldown() {
    let harness = harness();
    let lead_id = harness.seeded_flip(3);
    let draft = harness
        .service
        .create_blast(request(&lead_id), creator())
        .expect("blast drafts");

    let sent = harness
        .service
        .send_blast(&draft.blast.id)
        .expect("blast sends");

    assert_eq!(sent.blast.status, BlastStatus::Sent);
    assert_eq!(sent.blast.sent_at, Some(now()));
    assert_eq!(sent.blast.stats.sent, 3);
    assert!(sent.recipients.iter().all(|recipient| {
        recipient.status == RecipientStatus::Sent
            && recipient.delivered_via == Some(Channel::Internal)
            && recipient.provider.as_deref() == Some("internal")
    }));

    let delivered = harness.inbox.delivered();
    assert_eq!(delivered.len(), 3);
    assert_eq!(
        delivered[0].metadata.get("recipient_id").map(String::as_str),
        Some(sent.recipients[0].id.as_str())
    );
    assert!(delivered[0].body.ends_with(COMPLIANCE_DISCLAIMER));
    assert!(delivered[0].body.contains("Des Moines, IA (address on request)"));
    assert!(!delivered[0].body.contains("Walnut"));

    let buyer = harness.stored_buyer("buyer-00");
    assert_eq!(buyer.last_blast_at, Some(now()));
    assert_eq!(buyer.last_contacted_at, Some(now()));
}

#[test]
fn sms_without_provider_falls_back_to_internal_inbox() {
    let harness = harness();
    let lead_id = harness.seeded_flip(0);
    harness.save_buyer(buyer("buyer-inbox", POLK));
    let mut offline = buyer("buyer-offline", POLK);
    offline.contact.internal_user = None;
    harness.save_buyer(offline);

    let draft = harness
        .service
        .create_blast(
            BlastRequest {
                channel: Channel::Sms,
                ..request(&lead_id)
            },
            creator(),
        )
        .expect("blast drafts");
    let sent = harness
        .service
        .send_blast(&draft.blast.id)
        .expect("send completes");

    let by_buyer = |id: &str| {
        sent.recipients
            .iter()
            .find(|recipient| recipient.buyer_id.as_str() == id)
            .expect("recipient present")
    };
    let inbox = by_buyer("buyer-inbox");
    assert_eq!(inbox.status, RecipientStatus::Sent);
    assert_eq!(inbox.delivered_via, Some(Channel::Internal));

    let offline = by_buyer("buyer-offline");
    assert_eq!(offline.status, RecipientStatus::Failed);
    assert_eq!(offline.error.as_deref(), Some("sms provider not configured"));
    assert_eq!(sent.blast.stats.failed, 1);
    assert_eq!(harness.stored_buyer("buyer-offline").last_blast_at, None);
}

#[test]
fn stop_reply_overrides_interested_status() {
    let harness = harness();
    let lead_id = harness.seeded_flip(1);
    let draft = harness
        .service
        .create_blast(request(&lead_id), creator())
        .expect("blast drafts");
    let sent = harness
        .service
        .send_blast(&draft.blast.id)
        .expect("blast sends");

    let recipient = harness
        .service
        .record_response(
            &sent.blast.id,
            RecipientResponse {
                recipient_id: sent.recipients[0].id.clone(),
                response_text: "Looks great but STOP texting me".to_string(),
                status: Some(RecipientStatus::Interested),
            },
        )
        .expect("response recorded");

    assert_eq!(recipient.status, RecipientStatus::OptedOut);
    assert!(harness.stored_buyer("buyer-00").opt_outs.internal);
    let view = harness.service.get_blast(&sent.blast.id).expect("blast");
    assert_eq!(view.blast.stats.opted_out, 1);
    assert!(harness
        .notifier
        .sent()
        .iter()
        .all(|notification| notification.template != "buyer_interested"));
}

#[test]
fn interested_reply_notifies_blast_creator() {
    let harness = harness();
    let lead_id = harness.seeded_flip(1);
    let draft = harness
        .service
        .create_blast(request(&lead_id), creator())
        .expect("blast drafts");
    harness
        .service
        .send_blast(&draft.blast.id)
        .expect("blast sends");

    let recipient = harness
        .service
        .record_response(
            &draft.blast.id,
            RecipientResponse {
                recipient_id: draft.recipients[0].id.clone(),
                response_text: "Can I walk it Friday?".to_string(),
                status: Some(RecipientStatus::Interested),
            },
        )
        .expect("response recorded");
    assert_eq!(recipient.status, RecipientStatus::Interested);

    let notification = harness
        .notifier
        .sent()
        .into_iter()
        .find(|notification| notification.template == "buyer_interested")
        .expect("creator notified");
    assert_eq!(notification.recipient, Some(creator()));
    assert_eq!(notification.lead_id, Some(lead_id));
}

#[test]
fn response_before_send_is_rejected() {
    let harness = harness();
    let lead_id = harness.seeded_flip(1);
    let draft = harness
        .service
        .create_blast(request(&lead_id), creator())
        .expect("blast drafts");

    let error = harness
        .service
        .record_response(
            &draft.blast.id,
            RecipientResponse {
                recipient_id: draft.recipients[0].id.clone(),
                response_text: "interested".to_string(),
                status: Some(RecipientStatus::Interested),
            },
        )
        .expect_err("draft blast cannot take responses");
    assert!(matches!(
        error,
        PipelineError::StateConflict { entity: "blast", ref current, .. } if current == "draft"
    ));
}

#[test]
fn canceled_blast_takes_no_responses() {
    let harness = harness();
    let lead_id = harness.seeded_flip(1);
    let draft = harness
        .service
        .create_blast(request(&lead_id), creator())
        .expect("blast drafts");
    harness
        .service
        .cancel_blast(&draft.blast.id)
        .expect("draft cancels");

    let error = harness
        .service
        .record_response(
            &draft.blast.id,
            RecipientResponse {
                recipient_id: draft.recipients[0].id.clone(),
                response_text: "Still available?".to_string(),
                status: Some(RecipientStatus::Interested),
            },
        )
        .expect_err("canceled blast cannot take responses");
    assert!(matches!(
        error,
        PipelineError::StateConflict { entity: "blast", ref current, .. } if current == "canceled"
    ));

    let view = harness.service.get_blast(&draft.blast.id).expect("blast");
    assert_eq!(view.recipients[0].status, RecipientStatus::OptedOut);
    assert_eq!(view.recipients[0].response_text, None);
    assert!(harness
        .notifier
        .sent()
        .iter()
        .all(|notification| notification.template != "buyer_interested"));
}

#[test]
fn opted_out_recipient_stays_opted_out() {
    let harness = harness();
    let lead_id = harness.seeded_flip(1);
    let draft = harness
        .service
        .create_blast(request(&lead_id), creator())
        .expect("blast drafts");
    harness.service.send_blast(&draft.blast.id).expect("sent");
    let recipient_id = draft.recipients[0].id.clone();

    harness
        .service
        .record_response(
            &draft.blast.id,
            RecipientResponse {
                recipient_id: recipient_id.clone(),
                response_text: "STOP".to_string(),
                status: None,
            },
        )
        .expect("opt-out recorded");

    let error = harness
        .service
        .record_response(
            &draft.blast.id,
            RecipientResponse {
                recipient_id,
                response_text: "actually yes".to_string(),
                status: Some(RecipientStatus::Interested),
            },
        )
        .expect_err("opt-out is final");
    assert!(matches!(
        error,
        PipelineError::StateConflict { entity: "recipient", ref current, .. }
            if current == "opted_out"
    ));

    let view = harness.service.get_blast(&draft.blast.id).expect("blast");
    assert_eq!(view.recipients[0].status, RecipientStatus::OptedOut);
    assert_eq!(view.recipients[0].response_text.as_deref(), Some("STOP"));
    assert_eq!(view.blast.stats.interested, 0);
    assert!(harness.stored_buyer("buyer-00").opt_outs.internal);
    assert!(harness
        .notifier
        .sent()
        .iter()
        .all(|notification| notification.template != "buyer_interested"));
}

#[derive(Debug, Default)]
struct SmsGateway {
    unreachable: String,
    sent: Mutex<Vec<String>>,
}

impl OutboundProvider for SmsGateway {
    fn send(&self, message: &OutboundMessage) -> Result<DeliveryReceipt, OutboundError> {
        if message.to == self.unreachable {
            return Err(OutboundError::Rejected("unreachable number".to_string()));
        }
        let mut sent = self.sent.lock().expect("gateway lock");
        sent.push(message.to.clone());
        Ok(DeliveryReceipt {
            message_id: format!("sms-{}", sent.len()),
            provider: "sms-gateway".to_string(),
            status: "queued".to_string(),
        })
    }

    fn is_configured(&self) -> bool {
        true
    }
}

#[test]
fn provider_rejection_fails_one_recipient_and_send_continues() {
    let gateway = Arc::new(SmsGateway {
        unreachable: "+15155550199".to_string(),
        ..SmsGateway::default()
    });
    let harness = harness_with_sms(gateway.clone());
    let lead_id = harness.seeded_flip(0);
    for id in ["buyer-00", "buyer-01", "buyer-02"] {
        let mut buyer = buyer(id, POLK);
        if id == "buyer-01" {
            buyer.contact.phone = Some("+15155550199".to_string());
        }
        harness.save_buyer(buyer);
    }

    let draft = harness
        .service
        .create_blast(
            BlastRequest {
                channel: Channel::Sms,
                ..request(&lead_id)
            },
            creator(),
        )
        .expect("blast drafts");
    let sent = harness
        .service
        .send_blast(&draft.blast.id)
        .expect("send completes");

    assert_eq!(sent.blast.status, BlastStatus::Sent);
    assert_eq!(sent.blast.stats.sent, 2);
    assert_eq!(sent.blast.stats.failed, 1);
    for recipient in &sent.recipients {
        if recipient.buyer_id.as_str() == "buyer-01" {
            assert_eq!(recipient.status, RecipientStatus::Failed);
            assert_eq!(
                recipient.error.as_deref(),
                Some("provider rejected message: unreachable number")
            );
            assert_eq!(recipient.message_id, None);
        } else {
            assert_eq!(recipient.status, RecipientStatus::Sent);
            assert_eq!(recipient.delivered_via, Some(Channel::Sms));
            assert_eq!(recipient.provider.as_deref(), Some("sms-gateway"));
        }
    }
    assert_eq!(gateway.sent.lock().expect("gateway lock").len(), 2);
    assert!(harness.inbox.delivered().is_empty());
    assert_eq!(harness.stored_buyer("buyer-01").last_blast_at, None);
    assert_eq!(harness.stored_buyer("buyer-02").last_blast_at, Some(now()));
}

#[test]
fn send_resumes_with_recipients_still_queued() {
    use crate::workflows::acquisitions::repository::BlastRepository;

    let harness = harness();
    let lead_id = harness.seeded_flip(3);
    let draft = harness
        .service
        .create_blast(request(&lead_id), creator())
        .expect("blast drafts");

    let mut attempted = draft.recipients[0].clone();
    attempted.status = RecipientStatus::Sent;
    attempted.sent_at = Some(now());
    harness
        .store
        .update_recipient(attempted.clone())
        .expect("recipient stored");

    let sent = harness
        .service
        .send_blast(&draft.blast.id)
        .expect("send resumes");

    assert_eq!(sent.blast.status, BlastStatus::Sent);
    assert_eq!(sent.blast.stats.sent, 3);
    let delivered = harness.inbox.delivered();
    assert_eq!(delivered.len(), 2);
    assert!(delivered.iter().all(|message| {
        message.metadata.get("recipient_id").map(String::as_str) != Some(attempted.id.as_str())
    }));
}

#[test]
fn response_without_status_needs_opt_out_keyword() {
    let harness = harness();
    let lead_id = harness.seeded_flip(1);
    let draft = harness
        .service
        .create_blast(request(&lead_id), creator())
        .expect("blast drafts");
    harness.service.send_blast(&draft.blast.id).expect("sent");

    let error = harness
        .service
        .record_response(
            &draft.blast.id,
            RecipientResponse {
                recipient_id: draft.recipients[0].id.clone(),
                response_text: "maybe".to_string(),
                status: None,
            },
        )
        .expect_err("status required");
    assert!(matches!(
        error,
        PipelineError::Validation { field: "status", .. }
    ));
}

#[test]
fn canceling_a_sent_blast_is_rejected() {
    let harness = harness();
    let lead_id = harness.seeded_flip(2);
    let draft = harness
        .service
        .create_blast(request(&lead_id), creator())
        .expect("blast drafts");
    harness.service.send_blast(&draft.blast.id).expect("sent");

    let error = harness
        .service
        .cancel_blast(&draft.blast.id)
        .expect_err("sent blasts cannot be canceled");
    assert!(matches!(
        error,
        PipelineError::StateConflict { entity: "blast", ref current, .. } if current == "sent"
    ));
}

#[test]
fn canceling_a_draft_closes_out_queued_recipients() {
    let harness = harness();
    let lead_id = harness.seeded_flip(3);
    let draft = harness
        .service
        .create_blast(request(&lead_id), creator())
        .expect("blast drafts");
    assert_eq!(draft.recipients.len(), 3);

    let canceled = harness
        .service
        .cancel_blast(&draft.blast.id)
        .expect("draft cancels");

    assert_eq!(canceled.blast.status, BlastStatus::Canceled);
    assert_eq!(canceled.blast.canceled_at, Some(now()));
    assert_eq!(canceled.blast.stats.opted_out, 3);
    assert!(canceled
        .recipients
        .iter()
        .all(|recipient| recipient.status == RecipientStatus::OptedOut));

    let error = harness
        .service
        .send_blast(&draft.blast.id)
        .expect_err("canceled blasts cannot send");
    assert!(matches!(error, PipelineError::StateConflict { .. }));
    assert!(harness.inbox.delivered().is_empty());
}

#[test]
fn send_rate_is_limited_per_creator() {
    let mut config = PipelineConfig::default();
    config.blast = BlastConfig {
        max_blasts_per_hour: 2,
        ..BlastConfig::default()
    };
    let harness = harness_with(config);
    let lead_id = harness.seeded_flip(1);

    for _ in 0..2 {
        let draft = harness
            .service
            .create_blast(request(&lead_id), creator())
            .expect("blast drafts");
        harness.service.send_blast(&draft.blast.id).expect("within limit");
    }

    let third = harness
        .service
        .create_blast(request(&lead_id), creator())
        .expect("drafting is not limited");
    let error = harness
        .service
        .send_blast(&third.blast.id)
        .expect_err("third send in the hour is limited");
    assert!(matches!(error, PipelineError::RateLimited { limit: 2 }));

    let other = harness
        .service
        .create_blast(request(&lead_id), UserId::from("other-manager"))
        .expect("blast drafts");
    harness
        .service
        .send_blast(&other.blast.id)
        .expect("limit is per creator");

    harness.clock.advance(Duration::minutes(61));
    harness
        .service
        .send_blast(&third.blast.id)
        .expect("window has rolled over");
}

#[test]
fn archived_leads_cannot_be_blasted() {
    let harness = harness();
    let lead_id = harness.seeded_flip(2);
    harness
        .service
        .recalculate_score(&lead_id)
        .expect("lead scores");
    harness
        .service
        .override_route(
            &lead_id,
            Route::Archive,
            crate::workflows::acquisitions::domain::Priority::Low,
            "seller listed with an agent",
            UserId::from("acq-manager"),
        )
        .expect("override applies");

    let error = harness
        .service
        .create_blast(request(&lead_id), creator())
        .expect_err("archived lead rejected");
    assert!(matches!(
        error,
        PipelineError::StateConflict { ref current, .. } if current == "archived"
    ));
}

#[test]
fn inactive_template_is_rejected() {
    let harness = harness();
    let lead_id = harness.seeded_flip(2);
    let mut draft_template = template();
    draft_template.status = TemplateStatus::Draft;
    harness
        .store
        .save_template(draft_template)
        .expect("template stored");

    let error = harness
        .service
        .create_blast(request(&lead_id), creator())
        .expect_err("draft template rejected");
    assert!(matches!(
        error,
        PipelineError::Validation {
            field: "message_template_key",
            ..
        }
    ));
}

#[test]
fn no_eligible_buyers_is_a_validation_error() {
    let harness = harness();
    let lead_id = harness.seeded_flip(0);
    let error = harness
        .service
        .create_blast(request(&lead_id), creator())
        .expect_err("nobody to blast");
    assert!(matches!(
        error,
        PipelineError::Validation { field: "lead_id", .. }
    ));
}

#[test]
fn deal_package_fills_known_placeholders_only() {
    let lead = flip_lead();
    let package = DealPackage::from_lead(&lead, false);

    assert_eq!(package.get("price"), Some("$150,000"));
    assert_eq!(package.get("arv"), Some("$210,000"));
    assert_eq!(package.get("rent"), Some("TBD"));
    assert_eq!(
        package.get("address"),
        Some("1204 Walnut St, Des Moines, IA")
    );
    assert_eq!(
        package.fill("{{city}} at {{price}} ({{unknown}})"),
        "Des Moines at $150,000 ({{unknown}})"
    );
}
