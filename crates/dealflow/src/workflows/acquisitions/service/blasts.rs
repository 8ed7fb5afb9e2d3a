use std::collections::BTreeMap;

use chrono::Duration;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::super::blast::{
    BlastRequest, BlastStats, DealBlast, DealBlastRecipient, DealPackage, DeliveryOutcome,
    RecipientStatus,
};
use super::super::domain::{BlastId, RecipientId, UserId};
use super::super::repository::{Notifier, PipelineStore};
use super::{DealPipelineService, PipelineError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlastView {
    pub blast: DealBlast,
    pub recipients: Vec<DealBlastRecipient>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipientResponse {
    pub recipient_id: RecipientId,
    pub response_text: String,
    #[serde(default)]
    pub status: Option<RecipientStatus>,
}

impl<S, N> DealPipelineService<S, N>
where
    S: PipelineStore + 'static,
    N: Notifier + 'static,
{
    /// Draft a blast from a fresh match run.
    pub fn create_blast(
        &self,
        request: BlastRequest,
        created_by: UserId,
    ) -> Result<BlastView, PipelineError> {
        let lead = self.fetch_lead(&request.lead_id)?;
        self.blasts.ensure_not_archived(&lead)?;
        let template = self.store.fetch_template(&request.template_key)?;
        let buyers = self.store.buyers_in_market(&lead.market_key())?;

        let now = self.now();
        let limit = self.blasts.recipient_limit(request.max_recipients);
        let report = self
            .matcher
            .match_buyers(&lead, &buyers, request.channel, limit, now);

        let blast_id = BlastId(self.next_id("blast"));
        let (blast, recipients) = self.blasts.draft(
            blast_id,
            &request,
            &lead,
            template.as_ref(),
            report,
            created_by,
            now,
            || RecipientId(self.next_id("rcpt")),
        )?;

        self.store.insert_blast(blast.clone(), recipients.clone())?;
        info!(
            blast_id = %blast.id,
            lead_id = %blast.lead_id,
            channel = blast.channel.label(),
            recipients = recipients.len(),
            "deal blast drafted"
        );

        Ok(BlastView { blast, recipients })
    }

    pub fn get_blast(&self, blast_id: &BlastId) -> Result<BlastView, PipelineError> {
        let blast = self.fetch_blast(blast_id)?;
        let recipients = self.store.recipients(blast_id)?;
        Ok(BlastView { blast, recipients })
    }

    /// Deliver a draft to each queued recipient in rank order.
    ///
    /// Each recipient is persisted as soon as it is attempted. A store error
    /// aborts the pass with the blast still `draft`; sending again resumes with
    /// the recipients that are still `queued`.
    pub fn send_blast(&self, blast_id: &BlastId) -> Result<BlastView, PipelineError> {
        let mut blast = self.fetch_blast(blast_id)?;
        let lead = self.fetch_lead(&blast.lead_id)?;
        let now = self.now();

        let recent = self
            .store
            .blasts_sent_since(&blast.created_by, now - Duration::hours(1))?;
        self.blasts.ensure_sendable(&blast, &lead, &recent, now)?;

        let template = self.store.fetch_template(&blast.template_key)?;
        let request = BlastRequest {
            lead_id: blast.lead_id.clone(),
            channel: blast.channel,
            template_key: blast.template_key.clone(),
            max_recipients: Some(blast.max_recipients),
            mask_address: blast.mask_address,
        };
        let template = self.blasts.ensure_template(&request, template.as_ref())?;
        let rendered = DealPackage::from_lead(&lead, blast.mask_address).render(template);

        let mut recipients = self.store.recipients(blast_id)?;
        for recipient in recipients
            .iter_mut()
            .filter(|recipient| recipient.status == RecipientStatus::Queued)
        {
            let mut buyer = self.store.fetch_buyer(&recipient.buyer_id)?;
            let outcome = self.blasts.deliver(
                &blast,
                recipient,
                buyer.as_mut(),
                &rendered,
                &self.providers,
                now,
            );
            if let (DeliveryOutcome::Sent { .. }, Some(buyer)) = (&outcome, buyer) {
                self.store.save_buyer(buyer)?;
            }
            self.store.update_recipient(recipient.clone())?;
        }

        self.blasts.complete_send(&mut blast, &recipients, now);
        self.store.update_blast(blast.clone())?;
        info!(
            blast_id = %blast.id,
            sent = blast.stats.sent,
            failed = blast.stats.failed,
            opted_out = blast.stats.opted_out,
            "deal blast sent"
        );

        Ok(BlastView { blast, recipients })
    }

    /// Record a buyer reply against a delivered recipient.
    pub fn record_response(
        &self,
        blast_id: &BlastId,
        response: RecipientResponse,
    ) -> Result<DealBlastRecipient, PipelineError> {
        let mut blast = self.fetch_blast(blast_id)?;
        let mut recipient = self
            .store
            .fetch_recipient(&response.recipient_id)?
            .filter(|recipient| &recipient.blast_id == blast_id)
            .ok_or_else(|| PipelineError::not_found("recipient", &response.recipient_id))?;
        let mut buyer = self.store.fetch_buyer(&recipient.buyer_id)?;
        let now = self.now();

        let status = self.blasts.record_response(
            &blast,
            &mut recipient,
            buyer.as_mut(),
            &response.response_text,
            response.status,
            now,
        )?;

        if status == RecipientStatus::OptedOut {
            if let Some(buyer) = buyer.clone() {
                self.store.save_buyer(buyer)?;
            }
        }
        self.store.update_recipient(recipient.clone())?;

        let recipients = self.store.recipients(blast_id)?;
        blast.stats = BlastStats::tally(&recipients);
        self.store.update_blast(blast.clone())?;
        info!(
            blast_id = %blast.id,
            recipient_id = %recipient.id,
            status = status.label(),
            "blast response recorded"
        );

        if status == RecipientStatus::Interested {
            let mut details = BTreeMap::new();
            details.insert("blast_id".to_string(), blast.id.to_string());
            details.insert("buyer_id".to_string(), recipient.buyer_id.to_string());
            details.insert("buyer_name".to_string(), recipient.buyer_name.clone());
            details.insert("response".to_string(), response.response_text.clone());
            self.notify(
                "buyer_interested",
                Some(blast.created_by.clone()),
                Some(blast.lead_id.clone()),
                details,
            );
        }

        Ok(recipient)
    }

    pub fn cancel_blast(&self, blast_id: &BlastId) -> Result<BlastView, PipelineError> {
        let mut blast = self.fetch_blast(blast_id)?;
        let mut recipients = self.store.recipients(blast_id)?;
        let closed = self
            .blasts
            .cancel(&mut blast, &mut recipients, self.now())?;

        for recipient in &recipients {
            self.store.update_recipient(recipient.clone())?;
        }
        self.store.update_blast(blast.clone())?;
        info!(blast_id = %blast.id, closed, "deal blast canceled");

        Ok(BlastView { blast, recipients })
    }

    fn fetch_blast(&self, blast_id: &BlastId) -> Result<DealBlast, PipelineError> {
        self.store
            .fetch_blast(blast_id)?
            .ok_or_else(|| PipelineError::not_found("blast", blast_id))
    }
}
