//! Contract normalization: raw descriptor + snapshot into a [`LiveOptionsContract`].
//!
//! Pure functions, no I/O. Safe to run across contracts in parallel.

use crate::error::{ChainError, ChainResult};
use crate::types::LiveOptionsContract;
use market_data::black_scholes::intrinsic_value;
use market_data::{ContractDescriptor, SnapshotRecord};

/// Mark price: bid/ask midpoint when both sides are quoted, else last.
pub fn mark_price(bid: f64, ask: f64, last: f64) -> f64 {
    if bid > 0.0 && ask > 0.0 {
        (bid + ask) / 2.0
    } else {
        last
    }
}

/// Build the stored contract record.
///
/// A missing snapshot is not an error: every market field defaults to zero.
/// Returns [`ChainError::InvalidStrike`] or [`ChainError::NonFiniteValue`] for
/// input that must not be persisted.
pub fn normalize(
    descriptor: &ContractDescriptor,
    snapshot: Option<&SnapshotRecord>,
    underlying_price: f64,
) -> ChainResult<LiveOptionsContract> {
    let ticker = descriptor.ticker.trim();
    if ticker.is_empty() {
        return Err(ChainError::InvalidContract(format!(
            "empty contract ticker for underlying {}",
            descriptor.underlying_ticker
        )));
    }

    let strike = descriptor.strike_price;
    if !strike.is_finite() || strike <= 0.0 {
        return Err(ChainError::InvalidStrike {
            ticker: ticker.to_string(),
            strike,
        });
    }
    ensure_finite(ticker, "underlying_price", underlying_price)?;

    let snap = snapshot.cloned().unwrap_or_default();
    let bid = field(ticker, "bid", snap.bid)?;
    let ask = field(ticker, "ask", snap.ask)?;
    let last = match snap.last_price.or(snap.day_close) {
        Some(v) => field(ticker, "last", Some(v))?,
        None => 0.0,
    };
    let volume = field(ticker, "volume", snap.volume)?;
    let open_interest = field(ticker, "open_interest", snap.open_interest)?;
    let implied_volatility = field(ticker, "implied_volatility", snap.implied_volatility)?;

    let greeks = snap.greeks.unwrap_or_default();
    let delta = field(ticker, "delta", Some(greeks.delta))?;
    let gamma = field(ticker, "gamma", Some(greeks.gamma))?;
    let theta = field(ticker, "theta", Some(greeks.theta))?;
    let vega = field(ticker, "vega", Some(greeks.vega))?;
    let rho = field(ticker, "rho", Some(greeks.rho))?;

    let intrinsic = intrinsic_value(underlying_price, strike, descriptor.contract_type);

    Ok(LiveOptionsContract {
        contract_ticker: ticker.to_string(),
        underlying_ticker: descriptor.underlying_ticker.clone(),
        contract_type: descriptor.contract_type,
        strike_price: strike,
        expiration_date: descriptor.expiration_date,
        bid,
        ask,
        last,
        mark: mark_price(bid, ask, last),
        volume: to_count(volume),
        open_interest: to_count(open_interest),
        implied_volatility,
        delta,
        gamma,
        theta,
        vega,
        rho,
        intrinsic_value: intrinsic,
        time_value: (last - intrinsic).max(0.0),
        bid_ask_spread: ask - bid,
        last_trade_timestamp: snap.last_trade_timestamp,
    })
}

fn ensure_finite(ticker: &str, field: &'static str, value: f64) -> ChainResult<f64> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(ChainError::NonFiniteValue {
            ticker: ticker.to_string(),
            field,
        })
    }
}

fn field(ticker: &str, name: &'static str, value: Option<f64>) -> ChainResult<f64> {
    ensure_finite(ticker, name, value.unwrap_or(0.0))
}

// Negative counts from the provider are clamped.
fn to_count(value: f64) -> u64 {
    value.max(0.0).round() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use market_data::{ContractType, Greeks};

    fn descriptor(contract_type: ContractType, strike: f64) -> ContractDescriptor {
        ContractDescriptor {
            ticker: "O:SPY250620C00550000".to_string(),
            underlying_ticker: "SPY".to_string(),
            contract_type,
            strike_price: strike,
            expiration_date: NaiveDate::from_ymd_opt(2025, 6, 20).unwrap(),
            shares_per_contract: Some(100),
            exercise_style: Some("american".to_string()),
        }
    }

    fn quoted(bid: f64, ask: f64, last: f64) -> SnapshotRecord {
        SnapshotRecord {
            contract_ticker: "O:SPY250620C00550000".to_string(),
            bid: Some(bid),
            ask: Some(ask),
            last_price: Some(last),
            volume: Some(1200.0),
            open_interest: Some(8000.0),
            implied_volatility: Some(0.18),
            greeks: Some(Greeks {
                delta: 0.52,
                gamma: 0.01,
                theta: -0.2,
                vega: 0.6,
                rho: 0.0,
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_mark_uses_midpoint_when_both_sides_quoted() {
        let c = normalize(&descriptor(ContractType::Call, 550.0), Some(&quoted(4.0, 4.4, 4.3)), 552.0).unwrap();
        assert!((c.mark - 4.2).abs() < 1e-9);
        assert!((c.bid_ask_spread - 0.4).abs() < 1e-9);
        assert_eq!(c.volume, 1200);
        assert_eq!(c.open_interest, 8000);
        assert_eq!(c.delta, 0.52);
    }

    #[test]
    fn test_mark_falls_back_to_last() {
        let c = normalize(&descriptor(ContractType::Call, 550.0), Some(&quoted(0.0, 4.4, 4.3)), 552.0).unwrap();
        assert_eq!(c.mark, 4.3);

        let c = normalize(&descriptor(ContractType::Call, 550.0), Some(&quoted(4.0, 0.0, 4.3)), 552.0).unwrap();
        assert_eq!(c.mark, 4.3);
    }

    #[test]
    fn test_intrinsic_and_time_value() {
        let call = normalize(&descriptor(ContractType::Call, 540.0), Some(&quoted(12.0, 12.5, 12.2)), 550.0).unwrap();
        assert!((call.intrinsic_value - 10.0).abs() < 1e-9);
        assert!((call.time_value - 2.2).abs() < 1e-9);

        let put = normalize(&descriptor(ContractType::Put, 540.0), Some(&quoted(1.0, 1.2, 1.1)), 550.0).unwrap();
        assert_eq!(put.intrinsic_value, 0.0);
        assert!((put.time_value - 1.1).abs() < 1e-9);

        // last below intrinsic never yields negative time value
        let deep = normalize(&descriptor(ContractType::Put, 600.0), Some(&quoted(0.0, 0.0, 45.0)), 550.0).unwrap();
        assert_eq!(deep.intrinsic_value, 50.0);
        assert_eq!(deep.time_value, 0.0);
    }

    #[test]
    fn test_missing_snapshot_defaults_to_zero() {
        let c = normalize(&descriptor(ContractType::Call, 540.0), None, 550.0).unwrap();
        assert_eq!(c.bid, 0.0);
        assert_eq!(c.ask, 0.0);
        assert_eq!(c.last, 0.0);
        assert_eq!(c.mark, 0.0);
        assert_eq!(c.volume, 0);
        assert_eq!(c.bid_ask_spread, 0.0);
        assert_eq!(c.intrinsic_value, 10.0);
        assert_eq!(c.time_value, 0.0);
        assert!(c.last_trade_timestamp.is_none());
    }

    #[test]
    fn test_last_falls_back_to_day_close() {
        let snap = SnapshotRecord {
            contract_ticker: "O:SPY250620C00550000".to_string(),
            day_close: Some(3.1),
            ..Default::default()
        };
        let c = normalize(&descriptor(ContractType::Call, 550.0), Some(&snap), 545.0).unwrap();
        assert_eq!(c.last, 3.1);
        assert_eq!(c.mark, 3.1);
    }

    #[test]
    fn test_crossed_quote_spread_is_not_clamped() {
        let c = normalize(&descriptor(ContractType::Call, 550.0), Some(&quoted(4.5, 4.0, 4.2)), 550.0).unwrap();
        assert!((c.bid_ask_spread + 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_invalid_strike_is_fatal() {
        for strike in [0.0, -5.0, f64::NAN] {
            let err = normalize(&descriptor(ContractType::Call, strike), None, 550.0).unwrap_err();
            assert!(matches!(err, ChainError::InvalidStrike { .. }));
            assert!(err.is_fatal());
        }
    }

    #[test]
    fn test_non_finite_field_is_fatal() {
        let mut snap = quoted(4.0, 4.4, 4.3);
        snap.implied_volatility = Some(f64::INFINITY);

        let err = normalize(&descriptor(ContractType::Call, 550.0), Some(&snap), 550.0).unwrap_err();
        assert!(matches!(
            err,
            ChainError::NonFiniteValue { field: "implied_volatility", .. }
        ));
        assert!(err.is_fatal());

        let err = normalize(&descriptor(ContractType::Call, 550.0), None, f64::NAN).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_negative_counts_clamped() {
        let mut snap = quoted(4.0, 4.4, 4.3);
        snap.volume = Some(-3.0);
        let c = normalize(&descriptor(ContractType::Call, 550.0), Some(&snap), 550.0).unwrap();
        assert_eq!(c.volume, 0);
    }
}
