use super::super::domain::{BuyBox, Grade, Lead};
use super::super::underwriting::{
    calculate, CashFlowInputs, CashFlowResult, ReserveOverrides, UnderwritingDefaults,
};

/// Underwriting inputs for a lead under a buy box's financing (or the defaults).
pub fn cash_flow_inputs(
    lead: &Lead,
    buy_box: Option<&BuyBox>,
    defaults: &UnderwritingDefaults,
) -> CashFlowInputs {
    let financing = buy_box
        .and_then(|candidate| candidate.financing.clone())
        .unwrap_or_else(|| defaults.default_financing());
    let reserves = ReserveOverrides {
        vacancy_rate: financing.vacancy_rate,
        maintenance_rate: financing.maintenance_rate,
        management_rate: financing.management_rate,
    };

    CashFlowInputs {
        purchase_price: lead.terms.asking_price,
        rehab_cost: lead.terms.estimated_rehab.unwrap_or(0.0),
        estimated_rent: lead.terms.estimated_rent,
        target_noi: lead.terms.target_noi,
        annual_taxes: lead.terms.annual_taxes.unwrap_or(0.0),
        annual_insurance: lead.terms.annual_insurance.unwrap_or(0.0),
        financing,
        reserves,
    }
}

pub fn underwrite(
    lead: &Lead,
    buy_box: Option<&BuyBox>,
    defaults: &UnderwritingDefaults,
) -> CashFlowResult {
    calculate(&cash_flow_inputs(lead, buy_box, defaults), defaults)
}

/// Caps the letter grade by the cash-flow outcome.
///
/// A and B fall to C without positive cash flow; A additionally needs the
/// coverage ratio to hold.
pub(crate) fn gate_grade(grade: Grade, cash_flow: &CashFlowResult) -> (Grade, Option<String>) {
    if !grade.is_top_tier() {
        return (grade, None);
    }

    if cash_flow.error.is_some() || !cash_flow.cash_flow_pass {
        let detail = cash_flow
            .failure()
            .map(|failure| failure.summary())
            .unwrap_or_else(|| "cash flow check failed".to_string());
        return (
            Grade::C,
            Some(format!("grade {} capped at C: {}", grade, detail)),
        );
    }

    if grade == Grade::A && !cash_flow.dscr_pass {
        return (
            Grade::B,
            Some(format!(
                "grade A lowered to B: DSCR {:.2} below required {:.2}",
                cash_flow.dscr.unwrap_or(0.0),
                cash_flow.required_dscr
            )),
        );
    }

    (grade, None)
}
