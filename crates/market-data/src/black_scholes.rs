//! Black-Scholes pricing for equity options.
//!
//! Used to price synthetic chains when live data is unavailable. Greeks are
//! returned in the provider's quoting convention: theta per calendar day,
//! vega and rho per one percentage point.

use crate::types::{BSInputs, ContractType, Greeks};
use std::f64::consts::PI;

pub const DAYS_PER_YEAR: f64 = 365.0;

pub fn norm_pdf(x: f64) -> f64 {
    (1.0 / (2.0 * PI).sqrt()) * (-0.5 * x * x).exp()
}

/// Abramowitz-Stegun approximation of the standard normal CDF.
pub fn norm_cdf(x: f64) -> f64 {
    let k = 1.0 / (1.0 + 0.2316419 * x.abs());
    let poly = k
        * (0.319381530
            + k * (-0.356563782 + k * (1.781477937 + k * (-1.821255978 + k * 1.330274429))));

    let approx = 1.0 - norm_pdf(x) * poly;

    if x >= 0.0 {
        approx
    } else {
        1.0 - approx
    }
}

fn d1_d2(input: &BSInputs) -> (f64, f64) {
    let sqrt_t = input.time.sqrt();
    let d1 = ((input.spot / input.strike).ln()
        + (input.rate + 0.5 * input.vol * input.vol) * input.time)
        / (input.vol * sqrt_t);
    (d1, d1 - input.vol * sqrt_t)
}

/// Years until expiry for a day count, floored at one day.
pub fn years_from_days(days: i64) -> f64 {
    (days.max(1) as f64) / DAYS_PER_YEAR
}

pub fn black_scholes_price(mut input: BSInputs) -> f64 {
    input.validate();

    let (d1, d2) = d1_d2(&input);
    let discount = (-input.rate * input.time).exp();

    let price = match input.contract_type {
        ContractType::Call => input.spot * norm_cdf(d1) - input.strike * discount * norm_cdf(d2),
        ContractType::Put => input.strike * discount * norm_cdf(-d2) - input.spot * norm_cdf(-d1),
    };

    price.max(0.0)
}

pub fn intrinsic_value(spot: f64, strike: f64, contract_type: ContractType) -> f64 {
    match contract_type {
        ContractType::Call => (spot - strike).max(0.0),
        ContractType::Put => (strike - spot).max(0.0),
    }
}

pub fn black_scholes_greeks(mut input: BSInputs) -> Greeks {
    input.validate();

    let (d1, d2) = d1_d2(&input);
    let s = input.spot;
    let k = input.strike;
    let t = input.time;
    let v = input.vol;
    let r = input.rate;

    let pdf = norm_pdf(d1);
    let sqrt_t = t.sqrt();
    let discount = (-r * t).exp();

    let (delta, theta_annual, rho_unit) = match input.contract_type {
        ContractType::Call => (
            norm_cdf(d1),
            -(s * pdf * v) / (2.0 * sqrt_t) - r * k * discount * norm_cdf(d2),
            k * t * discount * norm_cdf(d2),
        ),
        ContractType::Put => (
            norm_cdf(d1) - 1.0,
            -(s * pdf * v) / (2.0 * sqrt_t) + r * k * discount * norm_cdf(-d2),
            -k * t * discount * norm_cdf(-d2),
        ),
    };

    Greeks {
        delta,
        gamma: pdf / (s * v * sqrt_t),
        theta: theta_annual / DAYS_PER_YEAR,
        vega: s * pdf * sqrt_t / 100.0,
        rho: rho_unit / 100.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spy_input(strike: f64, contract_type: ContractType) -> BSInputs {
        BSInputs {
            spot: 550.0,
            strike,
            time: 30.0 / DAYS_PER_YEAR,
            vol: 0.2,
            rate: 0.045,
            contract_type,
        }
    }

    #[test]
    fn test_itm_call_worth_at_least_intrinsic() {
        let price = black_scholes_price(spy_input(500.0, ContractType::Call));
        assert!(price >= intrinsic_value(550.0, 500.0, ContractType::Call));
    }

    #[test]
    fn test_otm_put_is_cheap() {
        let price = black_scholes_price(spy_input(480.0, ContractType::Put));
        assert!(price > 0.0 && price < 2.0);
    }

    #[test]
    fn test_put_call_parity() {
        let call = black_scholes_price(spy_input(550.0, ContractType::Call));
        let put = black_scholes_price(spy_input(550.0, ContractType::Put));
        let t = 30.0 / DAYS_PER_YEAR;

        let rhs = 550.0 - 550.0 * (-0.045 * t).exp();
        assert!((call - put - rhs).abs() < 0.05);
    }

    #[test]
    fn test_atm_greeks_signs() {
        let call = black_scholes_greeks(spy_input(550.0, ContractType::Call));
        let put = black_scholes_greeks(spy_input(550.0, ContractType::Put));

        assert!(call.delta > 0.45 && call.delta < 0.6);
        assert!(put.delta < 0.0);
        assert!(call.gamma > 0.0);
        assert!(call.theta < 0.0);
        assert!(call.vega > 0.0);
        assert!(call.rho > 0.0 && put.rho < 0.0);
    }

    #[test]
    fn test_theta_is_per_day() {
        // ATM SPY theta is tens of cents per day, not hundreds of dollars.
        let greeks = black_scholes_greeks(spy_input(550.0, ContractType::Call));
        assert!(greeks.theta > -1.0);
    }

    #[test]
    fn test_intrinsic_value() {
        assert_eq!(intrinsic_value(560.0, 550.0, ContractType::Call), 10.0);
        assert_eq!(intrinsic_value(540.0, 550.0, ContractType::Put), 10.0);
        assert_eq!(intrinsic_value(540.0, 550.0, ContractType::Call), 0.0);
        assert_eq!(intrinsic_value(560.0, 550.0, ContractType::Put), 0.0);
    }

    #[test]
    fn test_norm_cdf_symmetry() {
        assert!((norm_cdf(0.5) + norm_cdf(-0.5) - 1.0).abs() < 1e-10);
        assert!((norm_cdf(10.0) - 1.0).abs() < 1e-10);
    }

    #[test]
    fn test_zero_day_expiry_is_floored() {
        assert_eq!(years_from_days(0), 1.0 / DAYS_PER_YEAR);
        assert_eq!(years_from_days(-3), 1.0 / DAYS_PER_YEAR);
        let price = black_scholes_price(BSInputs {
            time: years_from_days(0),
            ..spy_input(540.0, ContractType::Call)
        });
        assert!((price - 10.0).abs() < 1.5);
    }
}
