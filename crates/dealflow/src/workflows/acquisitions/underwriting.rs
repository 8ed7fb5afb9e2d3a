//! Rental underwriting: debt service, net operating income, and debt coverage.
//!
//! [`calculate`] is pure. Missing inputs never panic or return `Err`; the
//! result carries an `error` instead so scoring can degrade the affected check
//! without aborting the pass.

use serde::{Deserialize, Serialize};

use super::domain::CashFlowFailure;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoanType {
    #[default]
    Amortizing,
    InterestOnly,
    Cash,
}

/// Financing assumptions attached to a buy box.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinancingTerms {
    #[serde(default)]
    pub loan_type: LoanType,
    pub loan_to_value: f64,
    /// Annual rate as a fraction; `None` uses the configured base rate plus buffer.
    #[serde(default)]
    pub interest_rate: Option<f64>,
    pub amortization_years: u32,
    pub required_dscr: f64,
    #[serde(default)]
    pub vacancy_rate: Option<f64>,
    #[serde(default)]
    pub maintenance_rate: Option<f64>,
    #[serde(default)]
    pub management_rate: Option<f64>,
}

impl FinancingTerms {
    pub fn reserve_overrides(&self) -> ReserveOverrides {
        ReserveOverrides {
            vacancy_rate: self.vacancy_rate,
            maintenance_rate: self.maintenance_rate,
            management_rate: self.management_rate,
        }
    }
}

/// Process-wide underwriting defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnderwritingDefaults {
    pub vacancy_rate: f64,
    pub maintenance_rate: f64,
    pub management_rate: f64,
    pub base_interest_rate: f64,
    pub rate_buffer: f64,
    pub loan_to_value: f64,
    pub amortization_years: u32,
    pub required_dscr: f64,
}

impl Default for UnderwritingDefaults {
    fn default() -> Self {
        Self {
            vacancy_rate: 0.08,
            maintenance_rate: 0.05,
            management_rate: 0.08,
            base_interest_rate: 0.07,
            rate_buffer: 0.005,
            loan_to_value: 0.75,
            amortization_years: 30,
            required_dscr: 1.25,
        }
    }
}

impl UnderwritingDefaults {
    pub fn default_financing(&self) -> FinancingTerms {
        FinancingTerms {
            loan_type: LoanType::Amortizing,
            loan_to_value: self.loan_to_value,
            interest_rate: None,
            amortization_years: self.amortization_years,
            required_dscr: self.required_dscr,
            vacancy_rate: None,
            maintenance_rate: None,
            management_rate: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ReserveOverrides {
    pub vacancy_rate: Option<f64>,
    pub maintenance_rate: Option<f64>,
    pub management_rate: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CashFlowInputs {
    pub purchase_price: f64,
    pub rehab_cost: f64,
    /// Expected gross monthly rent.
    pub estimated_rent: Option<f64>,
    /// Target annual net operating income, used when rent is unknown.
    pub target_noi: Option<f64>,
    pub annual_taxes: f64,
    pub annual_insurance: f64,
    pub financing: FinancingTerms,
    pub reserves: ReserveOverrides,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CashFlowResult {
    pub monthly_gross_income: f64,
    pub monthly_vacancy: f64,
    pub monthly_maintenance: f64,
    pub monthly_management: f64,
    pub monthly_taxes: f64,
    pub monthly_insurance: f64,
    pub monthly_noi: f64,
    pub monthly_debt_service: f64,
    pub monthly_cash_flow: f64,
    pub annual_cash_flow: f64,
    pub loan_amount: f64,
    pub total_investment: f64,
    pub interest_rate: f64,
    pub dscr: Option<f64>,
    pub required_dscr: f64,
    pub cash_flow_pass: bool,
    pub dscr_pass: bool,
    pub assumptions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CashFlowResult {
    fn failed(message: impl Into<String>, required_dscr: f64, assumptions: Vec<String>) -> Self {
        Self {
            monthly_gross_income: 0.0,
            monthly_vacancy: 0.0,
            monthly_maintenance: 0.0,
            monthly_management: 0.0,
            monthly_taxes: 0.0,
            monthly_insurance: 0.0,
            monthly_noi: 0.0,
            monthly_debt_service: 0.0,
            monthly_cash_flow: 0.0,
            annual_cash_flow: 0.0,
            loan_amount: 0.0,
            total_investment: 0.0,
            interest_rate: 0.0,
            dscr: None,
            required_dscr,
            cash_flow_pass: false,
            dscr_pass: false,
            assumptions,
            error: Some(message.into()),
        }
    }

    pub fn passes(&self) -> bool {
        self.error.is_none() && self.cash_flow_pass && self.dscr_pass
    }

    /// First failing sub-check, cash flow before coverage.
    pub fn failure(&self) -> Option<CashFlowFailure> {
        if let Some(error) = &self.error {
            return Some(CashFlowFailure::NotUnderwritten(error.clone()));
        }
        if !self.cash_flow_pass {
            return Some(CashFlowFailure::NegativeCashFlow {
                monthly_cash_flow: self.monthly_cash_flow,
            });
        }
        if !self.dscr_pass {
            return Some(CashFlowFailure::DscrBelowRequired {
                dscr: self.dscr.unwrap_or(0.0),
                required: self.required_dscr,
            });
        }
        None
    }
}

/// Longest amortization honoured; longer terms are treated as this many years.
pub const MAX_AMORTIZATION_YEARS: u32 = 50;

/// Amortized monthly payment for `principal` at `annual_rate` over `years`.
pub fn monthly_payment(principal: f64, annual_rate: f64, years: u32) -> f64 {
    let periods = f64::from(years.clamp(1, MAX_AMORTIZATION_YEARS)) * 12.0;
    let monthly_rate = annual_rate / 12.0;
    if principal <= 0.0 {
        return 0.0;
    }
    if monthly_rate.abs() < f64::EPSILON {
        return principal / periods;
    }

    let growth = (1.0 + monthly_rate).powf(periods);
    principal * monthly_rate * growth / (growth - 1.0)
}

pub fn calculate(inputs: &CashFlowInputs, defaults: &UnderwritingDefaults) -> CashFlowResult {
    let financing = &inputs.financing;
    let required_dscr = financing.required_dscr;
    let mut assumptions = Vec::new();

    let vacancy_rate = inputs
        .reserves
        .vacancy_rate
        .or(financing.vacancy_rate)
        .unwrap_or(defaults.vacancy_rate);
    let maintenance_rate = inputs
        .reserves
        .maintenance_rate
        .or(financing.maintenance_rate)
        .unwrap_or(defaults.maintenance_rate);
    let management_rate = inputs
        .reserves
        .management_rate
        .or(financing.management_rate)
        .unwrap_or(defaults.management_rate);
    assumptions.push(format!(
        "reserves: vacancy {:.1}%, maintenance {:.1}%, management {:.1}% of gross rent",
        vacancy_rate * 100.0,
        maintenance_rate * 100.0,
        management_rate * 100.0
    ));

    let monthly_taxes = inputs.annual_taxes / 12.0;
    let monthly_insurance = inputs.annual_insurance / 12.0;
    assumptions.push(format!(
        "taxes ${:.2}/yr, insurance ${:.2}/yr",
        inputs.annual_taxes, inputs.annual_insurance
    ));

    let reserve_share = vacancy_rate + maintenance_rate + management_rate;
    let monthly_gross_income = match (inputs.estimated_rent, inputs.target_noi) {
        (Some(rent), _) => {
            assumptions.push(format!("gross rent ${:.2}/mo from rent estimate", rent));
            rent
        }
        (None, Some(noi)) => {
            if reserve_share >= 1.0 {
                return CashFlowResult::failed(
                    "reserve rates consume all gross income; cannot back out rent from NOI",
                    required_dscr,
                    assumptions,
                );
            }
            let gross = (noi / 12.0 + monthly_taxes + monthly_insurance) / (1.0 - reserve_share);
            assumptions.push(format!(
                "gross rent ${:.2}/mo backed out of target NOI ${:.2}/yr",
                gross, noi
            ));
            gross
        }
        (None, None) => {
            return CashFlowResult::failed(
                "either estimated rent or target NOI is required",
                required_dscr,
                assumptions,
            );
        }
    };

    let monthly_vacancy = monthly_gross_income * vacancy_rate;
    let monthly_maintenance = monthly_gross_income * maintenance_rate;
    let monthly_management = monthly_gross_income * management_rate;
    let monthly_noi = monthly_gross_income
        - monthly_vacancy
        - monthly_maintenance
        - monthly_management
        - monthly_taxes
        - monthly_insurance;

    let interest_rate = financing
        .interest_rate
        .unwrap_or(defaults.base_interest_rate + defaults.rate_buffer);
    let (loan_amount, monthly_debt_service) = match financing.loan_type {
        LoanType::Cash => {
            assumptions.push("all-cash purchase, no debt service".to_string());
            (0.0, 0.0)
        }
        LoanType::Amortizing => {
            let loan = inputs.purchase_price * financing.loan_to_value;
            assumptions.push(format!(
                "loan ${:.2} at {:.0}% LTV, {:.3}% over {} years amortizing",
                loan,
                financing.loan_to_value * 100.0,
                interest_rate * 100.0,
                financing.amortization_years
            ));
            (
                loan,
                monthly_payment(loan, interest_rate, financing.amortization_years),
            )
        }
        LoanType::InterestOnly => {
            let loan = inputs.purchase_price * financing.loan_to_value;
            assumptions.push(format!(
                "loan ${:.2} at {:.0}% LTV, {:.3}% interest only",
                loan,
                financing.loan_to_value * 100.0,
                interest_rate * 100.0
            ));
            (loan, loan * interest_rate / 12.0)
        }
    };
    if financing.interest_rate.is_none() && loan_amount > 0.0 {
        assumptions.push(format!(
            "rate from base {:.3}% plus {:.3}% buffer",
            defaults.base_interest_rate * 100.0,
            defaults.rate_buffer * 100.0
        ));
    }

    let monthly_cash_flow = monthly_noi - monthly_debt_service;
    let annual_cash_flow = monthly_cash_flow * 12.0;
    let dscr = if monthly_debt_service > 0.0 {
        Some((monthly_noi * 12.0) / (monthly_debt_service * 12.0))
    } else {
        None
    };
    let dscr_pass = dscr.map(|ratio| ratio >= required_dscr).unwrap_or(true);
    assumptions.push(format!("required DSCR {:.2}", required_dscr));
    assumptions.push(format!(
        "rehab ${:.2} funded in cash, total investment ${:.2}",
        inputs.rehab_cost,
        inputs.purchase_price + inputs.rehab_cost
    ));

    CashFlowResult {
        monthly_gross_income,
        monthly_vacancy,
        monthly_maintenance,
        monthly_management,
        monthly_taxes,
        monthly_insurance,
        monthly_noi,
        monthly_debt_service,
        monthly_cash_flow,
        annual_cash_flow,
        loan_amount,
        total_investment: inputs.purchase_price + inputs.rehab_cost,
        interest_rate,
        dscr,
        required_dscr,
        cash_flow_pass: monthly_cash_flow > 0.0,
        dscr_pass,
        assumptions,
        error: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn financing() -> FinancingTerms {
        FinancingTerms {
            loan_type: LoanType::Amortizing,
            loan_to_value: 0.75,
            interest_rate: Some(0.07),
            amortization_years: 30,
            required_dscr: 1.25,
            vacancy_rate: None,
            maintenance_rate: None,
            management_rate: None,
        }
    }

    fn inputs(rent: Option<f64>, noi: Option<f64>) -> CashFlowInputs {
        CashFlowInputs {
            purchase_price: 150_000.0,
            rehab_cost: 10_000.0,
            estimated_rent: rent,
            target_noi: noi,
            annual_taxes: 2_400.0,
            annual_insurance: 1_200.0,
            financing: financing(),
            reserves: ReserveOverrides::default(),
        }
    }

    #[test]
    fn monthly_payment_matches_annuity_formula() {
        let payment = monthly_payment(112_500.0, 0.07, 30);
        assert!((payment - 748.47).abs() < 0.01, "payment was {payment}");
        assert!((monthly_payment(12_000.0, 0.0, 1) - 1_000.0).abs() < 1e-9);
    }

    #[test]
    fn oversized_amortization_is_capped() {
        let capped = monthly_payment(120_000.0, 0.06, MAX_AMORTIZATION_YEARS);
        let payment = monthly_payment(120_000.0, 0.06, u32::MAX);
        assert!(payment.is_finite());
        assert!((payment - capped).abs() < 1e-9);
        assert!((monthly_payment(12_000.0, 0.0, 0) - 1_000.0).abs() < 1e-9);
    }

    #[test]
    fn strong_rent_passes_both_checks() {
        let result = calculate(&inputs(Some(2_200.0), None), &UnderwritingDefaults::default());
        assert!(result.error.is_none());
        assert!(result.cash_flow_pass);
        assert!(result.monthly_cash_flow > 0.0);
        let dscr = result.dscr.expect("leveraged deal has dscr");
        assert_eq!(result.dscr_pass, dscr >= result.required_dscr);
        assert!(!result.assumptions.is_empty());
    }

    #[test]
    fn weak_rent_fails_cash_flow() {
        let result = calculate(&inputs(Some(1_000.0), None), &UnderwritingDefaults::default());
        assert!(!result.cash_flow_pass);
        assert!(!result.dscr_pass);
        assert!(matches!(
            result.failure(),
            Some(CashFlowFailure::NegativeCashFlow { .. })
        ));
    }

    #[test]
    fn noi_backs_out_gross_income() {
        let defaults = UnderwritingDefaults::default();
        let result = calculate(&inputs(None, Some(18_000.0)), &defaults);
        assert!(result.error.is_none());
        assert!((result.monthly_noi - 1_500.0).abs() < 1e-6);
        assert!(result.monthly_gross_income > 1_500.0);
    }

    #[test]
    fn missing_rent_and_noi_reports_error() {
        let result = calculate(&inputs(None, None), &UnderwritingDefaults::default());
        assert!(result.error.is_some());
        assert!(!result.cash_flow_pass);
        assert!(!result.dscr_pass);
        assert!(!result.passes());
    }

    #[test]
    fn cash_purchase_has_no_dscr_and_passes_coverage() {
        let mut cash = inputs(Some(1_400.0), None);
        cash.financing.loan_type = LoanType::Cash;
        let result = calculate(&cash, &UnderwritingDefaults::default());
        assert_eq!(result.monthly_debt_service, 0.0);
        assert!(result.dscr.is_none());
        assert!(result.dscr_pass);
    }

    #[test]
    fn defaults_supply_rate_when_missing() {
        let mut unpriced = inputs(Some(2_000.0), None);
        unpriced.financing.interest_rate = None;
        let defaults = UnderwritingDefaults::default();
        let result = calculate(&unpriced, &defaults);
        assert!((result.interest_rate - 0.075).abs() < 1e-9);
        assert!(result.assumptions.iter().any(|line| line.contains("buffer")));
    }

    #[test]
    fn calculation_is_deterministic() {
        let defaults = UnderwritingDefaults::default();
        let first = calculate(&inputs(Some(1_750.0), None), &defaults);
        let second = calculate(&inputs(Some(1_750.0), None), &defaults);
        assert_eq!(first, second);
    }

    #[test]
    fn reserve_overrides_take_precedence() {
        let mut heavy = inputs(Some(2_000.0), None);
        heavy.reserves.vacancy_rate = Some(0.20);
        let defaults = UnderwritingDefaults::default();
        let light = calculate(&inputs(Some(2_000.0), None), &defaults);
        let result = calculate(&heavy, &defaults);
        assert!((result.monthly_vacancy - 400.0).abs() < 1e-9);
        assert!(result.monthly_noi < light.monthly_noi);
    }
}
