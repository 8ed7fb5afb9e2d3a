//! Deal blast campaigns: drafting from a match report, sequential delivery,
//! buyer responses, and cancellation.

pub mod compliance;
pub mod outbound;
pub mod template;

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

pub use compliance::{detect_opt_out, COMPLIANCE_DISCLAIMER};
pub use outbound::{
    DeliveryReceipt, InternalInbox, OutboundError, OutboundMessage, OutboundProvider,
    OutboundProviders,
};
pub use template::{DealPackage, MessageTemplate, RenderedMessage, TemplateKey, TemplateStatus};

use super::domain::{
    BlastId, Buyer, BuyerId, Channel, Grade, Lead, LeadId, RecipientId, Route, UserId,
};
use super::matching::MatchReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlastStatus {
    Draft,
    Sent,
    Canceled,
}

impl BlastStatus {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Sent => "sent",
            Self::Canceled => "canceled",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecipientStatus {
    Queued,
    Sent,
    Failed,
    Replied,
    Interested,
    NotInterested,
    OptedOut,
}

impl RecipientStatus {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Sent => "sent",
            Self::Failed => "failed",
            Self::Replied => "replied",
            Self::Interested => "interested",
            Self::NotInterested => "not_interested",
            Self::OptedOut => "opted_out",
        }
    }

    /// Statuses a caller may record against a delivered message.
    pub const fn is_response(self) -> bool {
        matches!(
            self,
            Self::Replied | Self::Interested | Self::NotInterested | Self::OptedOut
        )
    }
}

/// Lead grade and route frozen when the blast is drafted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradeSnapshot {
    pub score: Option<u8>,
    pub grade: Option<Grade>,
    pub route: Option<Route>,
    pub captured_at: DateTime<Utc>,
}

impl GradeSnapshot {
    pub fn capture(lead: &Lead, now: DateTime<Utc>) -> Self {
        Self {
            score: lead.score.as_ref().map(|score| score.score),
            grade: lead.effective_grade(),
            route: lead.routing.as_ref().map(|routing| routing.route),
            captured_at: now,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BlastStats {
    pub total: usize,
    pub queued: usize,
    pub sent: usize,
    pub failed: usize,
    pub replied: usize,
    pub interested: usize,
    pub not_interested: usize,
    pub opted_out: usize,
}

impl BlastStats {
    pub fn tally(recipients: &[DealBlastRecipient]) -> Self {
        let mut stats = Self {
            total: recipients.len(),
            ..Self::default()
        };
        for recipient in recipients {
            match recipient.status {
                RecipientStatus::Queued => stats.queued += 1,
                RecipientStatus::Sent => stats.sent += 1,
                RecipientStatus::Failed => stats.failed += 1,
                RecipientStatus::Replied => stats.replied += 1,
                RecipientStatus::Interested => stats.interested += 1,
                RecipientStatus::NotInterested => stats.not_interested += 1,
                RecipientStatus::OptedOut => stats.opted_out += 1,
            }
        }
        stats
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DealBlast {
    pub id: BlastId,
    pub lead_id: LeadId,
    pub channel: Channel,
    pub template_key: TemplateKey,
    pub created_by: UserId,
    pub status: BlastStatus,
    pub grade_snapshot: GradeSnapshot,
    pub max_recipients: usize,
    pub mask_address: bool,
    pub stats: BlastStats,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub sent_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub canceled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DealBlastRecipient {
    pub id: RecipientId,
    pub blast_id: BlastId,
    pub buyer_id: BuyerId,
    pub buyer_name: String,
    pub rank: usize,
    pub match_score: u8,
    pub match_reasons: Vec<String>,
    pub status: RecipientStatus,
    #[serde(default)]
    pub delivered_via: Option<Channel>,
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub sent_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub response_text: Option<String>,
    #[serde(default)]
    pub responded_at: Option<DateTime<Utc>>,
}

/// Caller input for drafting a blast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlastRequest {
    pub lead_id: LeadId,
    #[serde(default)]
    pub channel: Channel,
    #[serde(alias = "message_template_key")]
    pub template_key: TemplateKey,
    #[serde(default)]
    pub max_recipients: Option<usize>,
    #[serde(default = "default_mask_address")]
    pub mask_address: bool,
}

fn default_mask_address() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlastConfig {
    pub default_max_recipients: usize,
    pub max_recipients_cap: usize,
    pub max_blasts_per_hour: usize,
}

impl Default for BlastConfig {
    fn default() -> Self {
        Self {
            default_max_recipients: 25,
            max_recipients_cap: 100,
            max_blasts_per_hour: 10,
        }
    }
}

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum BlastError {
    #[error("lead {lead_id} is routed to archive and cannot be blasted")]
    LeadArchived { lead_id: LeadId },
    #[error("no active template for key `{key}`")]
    TemplateUnavailable { key: String },
    #[error("template `{key}` does not support the {channel} channel")]
    TemplateChannel { key: String, channel: &'static str },
    #[error("no eligible buyers for lead {lead_id}")]
    NoEligibleBuyers { lead_id: LeadId },
    #[error("blast is {} and cannot be {action}", .current.label())]
    NotDraft {
        current: BlastStatus,
        action: &'static str,
    },
    #[error("blast is {} and cannot take responses", .current.label())]
    NotSent { current: BlastStatus },
    #[error("recipient is {} and cannot record a response", .current.label())]
    NotAwaitingResponse { current: RecipientStatus },
    #[error("a response status is required unless the reply is an opt-out")]
    ResponseStatusRequired,
    #[error("`{}` is not a response status", .status.label())]
    InvalidResponseStatus { status: RecipientStatus },
    #[error("send limit of {limit} blasts per hour reached")]
    RateLimited { limit: usize },
}

/// Result of one delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Sent { via: Channel, receipt: DeliveryReceipt },
    Failed { error: String },
    OptedOut,
}

/// Campaign state machine; persistence and lookups belong to the caller.
pub struct BlastOrchestrator {
    config: BlastConfig,
}

impl BlastOrchestrator {
    pub fn new(config: BlastConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BlastConfig {
        &self.config
    }

    pub fn recipient_limit(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.config.default_max_recipients)
            .clamp(1, self.config.max_recipients_cap)
    }

    pub fn ensure_not_archived(&self, lead: &Lead) -> Result<(), BlastError> {
        let archived = lead
            .routing
            .as_ref()
            .map(|routing| routing.route == Route::Archive)
            .unwrap_or(false);
        if archived {
            return Err(BlastError::LeadArchived {
                lead_id: lead.id.clone(),
            });
        }
        Ok(())
    }

    /// Active template for the request, honouring any channel restriction.
    pub fn ensure_template<'a>(
        &self,
        request: &BlastRequest,
        template: Option<&'a MessageTemplate>,
    ) -> Result<&'a MessageTemplate, BlastError> {
        let template = template
            .filter(|candidate| candidate.status == TemplateStatus::Active)
            .ok_or_else(|| BlastError::TemplateUnavailable {
                key: request.template_key.0.clone(),
            })?;
        if !template.supports(request.channel) {
            return Err(BlastError::TemplateChannel {
                key: template.key.0.clone(),
                channel: request.channel.label(),
            });
        }
        Ok(template)
    }

    /// Build the draft blast and one queued recipient per ranked match.
    #[allow(clippy::too_many_arguments)]
    pub fn draft(
        &self,
        id: BlastId,
        request: &BlastRequest,
        lead: &Lead,
        template: Option<&MessageTemplate>,
        report: MatchReport,
        created_by: UserId,
        now: DateTime<Utc>,
        mut next_recipient_id: impl FnMut() -> RecipientId,
    ) -> Result<(DealBlast, Vec<DealBlastRecipient>), BlastError> {
        self.ensure_not_archived(lead)?;
        self.ensure_template(request, template)?;

        let max_recipients = self.recipient_limit(request.max_recipients);
        if report.matches.is_empty() {
            return Err(BlastError::NoEligibleBuyers {
                lead_id: lead.id.clone(),
            });
        }

        let recipients: Vec<DealBlastRecipient> = report
            .matches
            .into_iter()
            .take(max_recipients)
            .enumerate()
            .map(|(index, candidate)| DealBlastRecipient {
                id: next_recipient_id(),
                blast_id: id.clone(),
                buyer_id: candidate.buyer_id,
                buyer_name: candidate.buyer_name,
                rank: index + 1,
                match_score: candidate.score,
                match_reasons: candidate.reasons,
                status: RecipientStatus::Queued,
                delivered_via: None,
                message_id: None,
                provider: None,
                error: None,
                sent_at: None,
                response_text: None,
                responded_at: None,
            })
            .collect();

        let blast = DealBlast {
            id,
            lead_id: lead.id.clone(),
            channel: request.channel,
            template_key: request.template_key.clone(),
            created_by,
            status: BlastStatus::Draft,
            grade_snapshot: GradeSnapshot::capture(lead, now),
            max_recipients,
            mask_address: request.mask_address,
            stats: BlastStats::tally(&recipients),
            created_at: now,
            sent_at: None,
            canceled_at: None,
        };

        Ok((blast, recipients))
    }

    /// Guards checked right before delivery starts.
    pub fn ensure_sendable(
        &self,
        blast: &DealBlast,
        lead: &Lead,
        sent_by_creator: &[DealBlast],
        now: DateTime<Utc>,
    ) -> Result<(), BlastError> {
        if blast.status != BlastStatus::Draft {
            return Err(BlastError::NotDraft {
                current: blast.status,
                action: "sent",
            });
        }
        self.ensure_not_archived(lead)?;

        let window_start = now - Duration::hours(1);
        let recent = sent_by_creator
            .iter()
            .filter(|other| other.id != blast.id && other.created_by == blast.created_by)
            .filter(|other| {
                other
                    .sent_at
                    .map(|sent_at| sent_at > window_start)
                    .unwrap_or(false)
            })
            .count();
        if recent >= self.config.max_blasts_per_hour {
            return Err(BlastError::RateLimited {
                limit: self.config.max_blasts_per_hour,
            });
        }

        Ok(())
    }

    pub fn outbound_message(
        &self,
        blast: &DealBlast,
        recipient: &DealBlastRecipient,
        destination: &str,
        rendered: &RenderedMessage,
    ) -> OutboundMessage {
        let mut metadata = BTreeMap::new();
        metadata.insert("blast_id".to_string(), blast.id.to_string());
        metadata.insert("recipient_id".to_string(), recipient.id.to_string());
        metadata.insert("lead_id".to_string(), blast.lead_id.to_string());
        metadata.insert("buyer_id".to_string(), recipient.buyer_id.to_string());

        OutboundMessage {
            to: destination.to_string(),
            subject: rendered.subject.clone(),
            body: rendered.body.clone(),
            html: None,
            metadata,
        }
    }

    /// Deliver to one recipient. Failures stay on the recipient row.
    pub fn deliver(
        &self,
        blast: &DealBlast,
        recipient: &mut DealBlastRecipient,
        buyer: Option<&mut Buyer>,
        rendered: &RenderedMessage,
        providers: &OutboundProviders,
        now: DateTime<Utc>,
    ) -> DeliveryOutcome {
        let outcome = match buyer {
            None => DeliveryOutcome::Failed {
                error: format!("buyer {} not found", recipient.buyer_id),
            },
            Some(buyer) => {
                let outcome = self.attempt(blast, recipient, buyer, rendered, providers);
                if matches!(outcome, DeliveryOutcome::Sent { .. }) {
                    buyer.last_blast_at = Some(now);
                    buyer.last_contacted_at = Some(now);
                }
                outcome
            }
        };

        match &outcome {
            DeliveryOutcome::Sent { via, receipt } => {
                recipient.status = RecipientStatus::Sent;
                recipient.delivered_via = Some(*via);
                recipient.message_id = Some(receipt.message_id.clone());
                recipient.provider = Some(receipt.provider.clone());
                recipient.error = None;
                recipient.sent_at = Some(now);
            }
            DeliveryOutcome::Failed { error } => {
                warn!(
                    blast_id = %blast.id,
                    recipient_id = %recipient.id,
                    buyer_id = %recipient.buyer_id,
                    error = %error,
                    "deal blast delivery failed"
                );
                recipient.status = RecipientStatus::Failed;
                recipient.error = Some(error.clone());
            }
            DeliveryOutcome::OptedOut => {
                recipient.status = RecipientStatus::OptedOut;
                recipient.error = Some(format!(
                    "buyer opted out of {} before send",
                    blast.channel.label()
                ));
            }
        }

        outcome
    }

    fn attempt(
        &self,
        blast: &DealBlast,
        recipient: &DealBlastRecipient,
        buyer: &Buyer,
        rendered: &RenderedMessage,
        providers: &OutboundProviders,
    ) -> DeliveryOutcome {
        let channel = blast.channel;
        if buyer.opt_outs.is_opted_out(channel) {
            return DeliveryOutcome::OptedOut;
        }

        let (via, provider, destination) = match providers.for_channel(channel) {
            Some(provider) => match buyer.contact.destination(channel) {
                Some(destination) => (channel, provider, destination),
                None => {
                    return DeliveryOutcome::Failed {
                        error: format!("no {} destination on file", channel.label()),
                    }
                }
            },
            None => {
                let fallback = buyer
                    .contact
                    .destination(Channel::Internal)
                    .filter(|_| channel != Channel::Internal)
                    .filter(|_| !buyer.opt_outs.is_opted_out(Channel::Internal));
                match fallback {
                    Some(destination) => (Channel::Internal, providers.internal(), destination),
                    None => {
                        return DeliveryOutcome::Failed {
                            error: format!("{} provider not configured", channel.label()),
                        }
                    }
                }
            }
        };

        let message = self.outbound_message(blast, recipient, destination, rendered);
        match provider.send(&message) {
            Ok(receipt) => DeliveryOutcome::Sent { via, receipt },
            Err(error) => DeliveryOutcome::Failed {
                error: error.to_string(),
            },
        }
    }

    /// Close out a send pass and refresh stats.
    pub fn complete_send(
        &self,
        blast: &mut DealBlast,
        recipients: &[DealBlastRecipient],
        now: DateTime<Utc>,
    ) {
        blast.status = BlastStatus::Sent;
        blast.sent_at = Some(now);
        blast.stats = BlastStats::tally(recipients);
    }

    /// Record a buyer reply. Opt-out keywords always win over the supplied status,
    /// and an opted-out recipient stays opted out.
    pub fn record_response(
        &self,
        blast: &DealBlast,
        recipient: &mut DealBlastRecipient,
        buyer: Option<&mut Buyer>,
        response_text: &str,
        status: Option<RecipientStatus>,
        now: DateTime<Utc>,
    ) -> Result<RecipientStatus, BlastError> {
        if blast.status != BlastStatus::Sent {
            return Err(BlastError::NotSent {
                current: blast.status,
            });
        }
        if matches!(
            recipient.status,
            RecipientStatus::Queued | RecipientStatus::Failed | RecipientStatus::OptedOut
        ) {
            return Err(BlastError::NotAwaitingResponse {
                current: recipient.status,
            });
        }

        let resolved = match detect_opt_out(response_text) {
            Some(_) => {
                if let Some(buyer) = buyer {
                    buyer.opt_outs.opt_out(blast.channel);
                }
                RecipientStatus::OptedOut
            }
            None => {
                let status = status.ok_or(BlastError::ResponseStatusRequired)?;
                if !status.is_response() {
                    return Err(BlastError::InvalidResponseStatus { status });
                }
                status
            }
        };

        recipient.status = resolved;
        recipient.response_text = Some(response_text.to_string());
        recipient.responded_at = Some(now);
        Ok(resolved)
    }

    /// Cancel a draft; queued recipients are closed out as opted out.
    pub fn cancel(
        &self,
        blast: &mut DealBlast,
        recipients: &mut [DealBlastRecipient],
        now: DateTime<Utc>,
    ) -> Result<usize, BlastError> {
        if blast.status != BlastStatus::Draft {
            return Err(BlastError::NotDraft {
                current: blast.status,
                action: "canceled",
            });
        }

        let mut closed = 0;
        for recipient in recipients.iter_mut() {
            if recipient.status == RecipientStatus::Queued {
                recipient.status = RecipientStatus::OptedOut;
                recipient.error = Some("blast canceled".to_string());
                closed += 1;
            }
        }

        blast.status = BlastStatus::Canceled;
        blast.canceled_at = Some(now);
        blast.stats = BlastStats::tally(recipients);
        Ok(closed)
    }
}
