use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::super::domain::{Channel, Lead};
use super::compliance::COMPLIANCE_DISCLAIMER;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TemplateKey(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateStatus {
    Draft,
    Active,
    Archived,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageTemplate {
    pub key: TemplateKey,
    pub status: TemplateStatus,
    #[serde(default)]
    pub channel: Option<Channel>,
    #[serde(default)]
    pub subject: Option<String>,
    pub body: String,
}

impl MessageTemplate {
    pub fn supports(&self, channel: Channel) -> bool {
        self.channel.map(|only| only == channel).unwrap_or(true)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedMessage {
    pub subject: Option<String>,
    pub body: String,
}

/// Placeholder values describing the deal.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DealPackage {
    fields: BTreeMap<&'static str, String>,
}

impl DealPackage {
    pub fn from_lead(lead: &Lead, mask_address: bool) -> Self {
        let mut fields = BTreeMap::new();
        let location = &lead.location;
        let address = match (&location.street_address, mask_address) {
            (Some(street), false) => format!("{street}, {}, {}", location.city, location.state),
            _ => format!("{}, {} (address on request)", location.city, location.state),
        };
        fields.insert("address", address);
        fields.insert("city", location.city.clone());
        fields.insert("county", location.county.clone());
        fields.insert("state", location.state.clone());
        fields.insert("price", money(Some(lead.terms.asking_price)));
        fields.insert("arv", money(lead.terms.arv));
        fields.insert("rehab", money(lead.terms.estimated_rehab));
        fields.insert("rent", money(lead.terms.estimated_rent));
        fields.insert("property_type", lead.facts.property_type.label().to_string());
        fields.insert("beds", optional(lead.facts.beds));
        fields.insert("baths", optional(lead.facts.baths));
        fields.insert("sqft", optional(lead.facts.sqft));
        fields.insert("year_built", optional(lead.facts.year_built));
        fields.insert(
            "condition",
            lead.facts
                .condition
                .map(|tier| tier.label().to_string())
                .unwrap_or_else(|| "TBD".to_string()),
        );

        let score = lead.score.as_ref();
        fields.insert(
            "strategy",
            score
                .and_then(|value| value.strategy)
                .or(lead.strategy)
                .map(|strategy| strategy.label().to_string())
                .unwrap_or_else(|| "TBD".to_string()),
        );
        fields.insert(
            "grade",
            score
                .map(|value| value.effective_grade().label().to_string())
                .unwrap_or_else(|| "TBD".to_string()),
        );
        fields.insert(
            "cash_flow",
            money(
                score
                    .and_then(|value| value.cash_flow.as_ref())
                    .filter(|result| result.error.is_none())
                    .map(|result| result.monthly_cash_flow),
            ),
        );

        Self { fields }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    /// Substitute `{{key}}` tokens; unknown tokens are left untouched.
    pub fn fill(&self, text: &str) -> String {
        let mut output = String::with_capacity(text.len());
        let mut rest = text;
        while let Some(start) = rest.find("{{") {
            output.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            match after.find("}}") {
                Some(end) => {
                    let key = after[..end].trim();
                    match self.fields.get(key) {
                        Some(value) => output.push_str(value),
                        None => output.push_str(&rest[start..start + 2 + end + 2]),
                    }
                    rest = &after[end + 2..];
                }
                None => {
                    output.push_str(&rest[start..]);
                    rest = "";
                }
            }
        }
        output.push_str(rest);
        output
    }

    pub fn render(&self, template: &MessageTemplate) -> RenderedMessage {
        let mut body = self.fill(&template.body);
        if !body.ends_with('\n') {
            body.push_str("\n\n");
        }
        body.push_str(COMPLIANCE_DISCLAIMER);

        RenderedMessage {
            subject: template.subject.as_deref().map(|subject| self.fill(subject)),
            body,
        }
    }
}

fn money(value: Option<f64>) -> String {
    value
        .map(|amount| format!("${}", thousands(amount.round() as i64)))
        .unwrap_or_else(|| "TBD".to_string())
}

fn thousands(value: i64) -> String {
    let digits = value.unsigned_abs().to_string();
    let mut grouped = String::new();
    for (index, ch) in digits.chars().enumerate() {
        if index > 0 && (digits.len() - index) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    if value < 0 {
        format!("-{grouped}")
    } else {
        grouped
    }
}

fn optional<T: ToString>(value: Option<T>) -> String {
    value
        .map(|inner| inner.to_string())
        .unwrap_or_else(|| "TBD".to_string())
}
