//! Synthetic chains, expiries and tickers served when live data is unavailable.
//!
//! Output is deterministic for a given (ticker, expiry, today): volumes come
//! from a seeded RNG and prices from Black-Scholes at a fixed volatility.

use crate::classifier::classify_by_days;
use crate::normalizer::normalize;
use crate::types::{
    days_between, ExpiryAggregate, ExpiryType, LiquidTicker, LiveOptionsContract, OptionsExpiry,
};
use chrono::{Datelike, Duration, NaiveDate, Utc, Weekday};
use market_data::black_scholes::{black_scholes_greeks, black_scholes_price, years_from_days};
use market_data::{BSInputs, ContractDescriptor, ContractType, SnapshotRecord};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeSet;
use tracing::warn;

/// Strikes generated on each side of the at-the-money strike.
pub const STRIKES_EACH_SIDE: i64 = 15;
pub const DEFAULT_PRICE: f64 = 100.0;

const SYNTHETIC_VOL: f64 = 0.25;
const SYNTHETIC_RATE: f64 = 0.045;

struct KnownUnderlying {
    ticker: &'static str,
    name: &'static str,
    sector: &'static str,
    price: f64,
    avg_volume: u64,
    avg_open_interest: u64,
}

const KNOWN: &[KnownUnderlying] = &[
    KnownUnderlying { ticker: "SPY", name: "SPDR S&P 500 ETF Trust", sector: "ETF", price: 550.0, avg_volume: 75_000_000, avg_open_interest: 18_000_000 },
    KnownUnderlying { ticker: "QQQ", name: "Invesco QQQ Trust", sector: "ETF", price: 480.0, avg_volume: 45_000_000, avg_open_interest: 9_000_000 },
    KnownUnderlying { ticker: "IWM", name: "iShares Russell 2000 ETF", sector: "ETF", price: 220.0, avg_volume: 30_000_000, avg_open_interest: 7_500_000 },
    KnownUnderlying { ticker: "DIA", name: "SPDR Dow Jones Industrial Average ETF", sector: "ETF", price: 400.0, avg_volume: 3_500_000, avg_open_interest: 900_000 },
    KnownUnderlying { ticker: "AAPL", name: "Apple Inc.", sector: "Technology", price: 225.0, avg_volume: 55_000_000, avg_open_interest: 5_000_000 },
    KnownUnderlying { ticker: "MSFT", name: "Microsoft Corporation", sector: "Technology", price: 420.0, avg_volume: 20_000_000, avg_open_interest: 2_500_000 },
    KnownUnderlying { ticker: "NVDA", name: "NVIDIA Corporation", sector: "Technology", price: 120.0, avg_volume: 250_000_000, avg_open_interest: 12_000_000 },
    KnownUnderlying { ticker: "AMD", name: "Advanced Micro Devices, Inc.", sector: "Technology", price: 160.0, avg_volume: 45_000_000, avg_open_interest: 4_000_000 },
    KnownUnderlying { ticker: "TSLA", name: "Tesla, Inc.", sector: "Consumer Discretionary", price: 250.0, avg_volume: 95_000_000, avg_open_interest: 8_000_000 },
    KnownUnderlying { ticker: "AMZN", name: "Amazon.com, Inc.", sector: "Consumer Discretionary", price: 185.0, avg_volume: 40_000_000, avg_open_interest: 3_500_000 },
    KnownUnderlying { ticker: "GOOGL", name: "Alphabet Inc.", sector: "Communication Services", price: 165.0, avg_volume: 25_000_000, avg_open_interest: 2_000_000 },
    KnownUnderlying { ticker: "META", name: "Meta Platforms, Inc.", sector: "Communication Services", price: 520.0, avg_volume: 15_000_000, avg_open_interest: 1_800_000 },
];

/// Listed strike increments, widest first.
const STANDARD_STEPS: &[f64] = &[25.0, 10.0, 5.0, 2.5, 1.0, 0.5, 0.25, 0.1, 0.05, 0.01];

fn band_step(price: f64) -> f64 {
    if price < 200.0 {
        5.0
    } else if price < 1_000.0 {
        10.0
    } else {
        25.0
    }
}

fn lowest_strike(price: f64, step: f64) -> f64 {
    (price / step).round() * step - STRIKES_EACH_SIDE as f64 * step
}

/// Strike increment for an underlying price.
///
/// 5 below 200, 10 below 1000, else 25, narrowed to the next standard
/// increment until all [`STRIKES_EACH_SIDE`] strikes below the money stay
/// positive.
pub fn strike_step(price: f64) -> f64 {
    let band = band_step(price);
    STANDARD_STEPS
        .iter()
        .copied()
        .filter(|step| *step <= band)
        .find(|step| lowest_strike(price, *step) > 0.0)
        .unwrap_or(0.01)
}

/// OCC-style contract ticker, e.g. `O:SPY251219C00550000`.
pub fn occ_ticker(underlying: &str, expiration: NaiveDate, contract_type: ContractType, strike: f64) -> String {
    format!(
        "O:{}{}{}{:08}",
        underlying,
        expiration.format("%y%m%d"),
        contract_type.code(),
        (strike * 1_000.0).round() as u64
    )
}

/// First Friday strictly after `today`.
pub fn next_friday(today: NaiveDate) -> NaiveDate {
    let wd = today.weekday().num_days_from_monday() as i64;
    let fri = Weekday::Fri.num_days_from_monday() as i64;
    let ahead = (fri - wd).rem_euclid(7);
    today + Duration::days(if ahead == 0 { 7 } else { ahead })
}

/// Next weekday after `today`. Holidays are not modelled.
pub fn next_trading_day(today: NaiveDate) -> NaiveDate {
    let mut day = today + Duration::days(1);
    while matches!(day.weekday(), Weekday::Sat | Weekday::Sun) {
        day += Duration::days(1);
    }
    day
}

/// Third Friday of a month, the standard monthly expiration.
pub fn third_friday(year: i32, month: u32) -> Option<NaiveDate> {
    NaiveDate::from_weekday_of_month_opt(year, month, Weekday::Fri, 3)
}

fn month_after(year: i32, month: u32, offset: u32) -> (i32, u32) {
    let index = (month - 1) + offset;
    (year + (index / 12) as i32, index % 12 + 1)
}

fn monthly_expirations(today: NaiveDate, months: u32) -> impl Iterator<Item = NaiveDate> {
    (0..months)
        .map(move |offset| month_after(today.year(), today.month(), offset))
        .filter_map(|(year, month)| third_friday(year, month))
}

// Smallest day count in each bucket of the local rule.
fn bucket_floor(expiry_type: ExpiryType) -> i64 {
    match expiry_type {
        ExpiryType::ZeroDte => 0,
        ExpiryType::Daily => 1,
        ExpiryType::Weekly => 4,
        ExpiryType::Monthly => 8,
        ExpiryType::Quarterly => 46,
        ExpiryType::Leaps => 121,
    }
}

/// An expiration that classifies as `wanted` relative to `today`.
///
/// Today for 0DTE, the next trading day for Daily, a Friday (else a weekday)
/// 4 to 7 days out for Weekly, a third Friday for Monthly and Quarterly, and
/// the January third Friday two years out for LEAPS.
pub fn expiration_in_bucket(wanted: ExpiryType, today: NaiveDate) -> NaiveDate {
    let in_bucket = |date: &NaiveDate| classify_by_days(days_between(today, *date)) == wanted;

    let candidate = match wanted {
        ExpiryType::ZeroDte => Some(today),
        ExpiryType::Daily => Some(next_trading_day(today)),
        ExpiryType::Weekly => {
            let window: Vec<NaiveDate> = (4..=7).map(|d| today + Duration::days(d)).collect();
            window
                .iter()
                .copied()
                .find(|d| d.weekday() == Weekday::Fri)
                .or_else(|| {
                    window
                        .iter()
                        .copied()
                        .find(|d| !matches!(d.weekday(), Weekday::Sat | Weekday::Sun))
                })
        }
        ExpiryType::Monthly => monthly_expirations(today, 3).find(|d| in_bucket(d)),
        ExpiryType::Quarterly => monthly_expirations(today, 6)
            .filter(|d| d.month() % 3 == 0)
            .find(|d| in_bucket(d))
            .or_else(|| monthly_expirations(today, 6).find(|d| in_bucket(d))),
        ExpiryType::Leaps => third_friday(today.year() + 2, 1),
    };

    candidate
        .filter(|d| in_bucket(d))
        .unwrap_or_else(|| today + Duration::days(bucket_floor(wanted)))
}

fn seed_for(ticker: &str, expiration: NaiveDate) -> u64 {
    ticker
        .bytes()
        .fold(0xcbf2_9ce4_8422_2325_u64, |h, b| (h ^ b as u64).wrapping_mul(0x0100_0000_01b3))
        ^ expiration.num_days_from_ce() as u64
}

fn cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[derive(Debug, Clone)]
pub struct FallbackSynthesizer {
    volatility: f64,
    rate: f64,
}

impl Default for FallbackSynthesizer {
    fn default() -> Self {
        Self {
            volatility: SYNTHETIC_VOL,
            rate: SYNTHETIC_RATE,
        }
    }
}

impl FallbackSynthesizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Table price for known symbols, [`DEFAULT_PRICE`] otherwise.
    pub fn price_for(&self, ticker: &str) -> f64 {
        KNOWN
            .iter()
            .find(|k| k.ticker.eq_ignore_ascii_case(ticker))
            .map(|k| k.price)
            .unwrap_or(DEFAULT_PRICE)
    }

    pub fn is_known(&self, ticker: &str) -> bool {
        KNOWN.iter().any(|k| k.ticker.eq_ignore_ascii_case(ticker))
    }

    pub fn synthetic_tickers(&self) -> Vec<LiquidTicker> {
        let now = Utc::now();
        KNOWN
            .iter()
            .map(|k| LiquidTicker {
                ticker: k.ticker.to_string(),
                name: k.name.to_string(),
                sector: k.sector.to_string(),
                current_price: k.price,
                avg_volume: k.avg_volume,
                avg_open_interest: k.avg_open_interest,
                is_active: true,
                last_update: now,
            })
            .collect()
    }

    /// Calls and puts at 31 strikes centered on the table price, all positive.
    ///
    /// Defaults to the next Friday when no expiry is given. Sorted by strike,
    /// calls before puts.
    pub fn synthetic_chain(
        &self,
        ticker: &str,
        expiry: Option<NaiveDate>,
        today: NaiveDate,
    ) -> Vec<LiveOptionsContract> {
        let underlying = ticker.trim().to_ascii_uppercase();
        let expiration = expiry.unwrap_or_else(|| next_friday(today));
        let spot = self.price_for(&underlying);
        let step = strike_step(spot);
        let atm = (spot / step).round() * step;
        let days = days_between(today, expiration);
        let mut rng = StdRng::seed_from_u64(seed_for(&underlying, expiration));

        let mut contracts = Vec::with_capacity((2 * STRIKES_EACH_SIDE as usize + 1) * 2);
        for offset in -STRIKES_EACH_SIDE..=STRIKES_EACH_SIDE {
            let strike = atm + offset as f64 * step;
            if strike <= 0.0 {
                continue;
            }
            for contract_type in [ContractType::Call, ContractType::Put] {
                let descriptor = ContractDescriptor {
                    ticker: occ_ticker(&underlying, expiration, contract_type, strike),
                    underlying_ticker: underlying.clone(),
                    contract_type,
                    strike_price: strike,
                    expiration_date: expiration,
                    shares_per_contract: Some(100),
                    exercise_style: Some("american".to_string()),
                };
                let snapshot = self.synthetic_snapshot(&descriptor, spot, days, &mut rng);

                match normalize(&descriptor, Some(&snapshot), spot) {
                    Ok(contract) => contracts.push(contract),
                    Err(e) => warn!(ticker = %underlying, error = %e, "Skipping synthetic contract"),
                }
            }
        }
        contracts
    }

    fn synthetic_snapshot(
        &self,
        descriptor: &ContractDescriptor,
        spot: f64,
        days: i64,
        rng: &mut StdRng,
    ) -> SnapshotRecord {
        let inputs = BSInputs {
            spot,
            strike: descriptor.strike_price,
            time: years_from_days(days),
            vol: self.volatility,
            rate: self.rate,
            contract_type: descriptor.contract_type,
        };
        let price = cents(black_scholes_price(inputs));
        let greeks = black_scholes_greeks(inputs);

        let in_the_money = match descriptor.contract_type {
            ContractType::Call => spot > descriptor.strike_price,
            ContractType::Put => spot < descriptor.strike_price,
        };
        let volume: u64 = if in_the_money {
            rng.gen_range(500..5_000)
        } else {
            rng.gen_range(10..800)
        };
        let open_interest = volume * rng.gen_range(2..10);
        let half_spread = (price * 0.02).max(0.01);

        SnapshotRecord {
            contract_ticker: descriptor.ticker.clone(),
            bid: Some(cents((price - half_spread).max(0.0))),
            ask: Some(cents(price + half_spread)),
            last_price: Some(price),
            day_close: Some(price),
            volume: Some(volume as f64),
            open_interest: Some(open_interest as f64),
            implied_volatility: Some(self.volatility),
            greeks: Some(greeks),
            underlying_price: Some(spot),
            last_trade_timestamp: None,
        }
    }

    /// Next trading day, next Friday, the monthly, a quarterly and a LEAPS
    /// expiration, classified with the local rule and aggregated from the
    /// synthetic chain for each date.
    pub fn synthetic_expiries(&self, ticker: &str, today: NaiveDate) -> Vec<OptionsExpiry> {
        self.expiries_for(ticker, self.synthetic_expiration_dates(today), today)
    }

    /// Synthetic expiries of one type. Never empty: when none of the standard
    /// dates falls in the bucket, a date inside it is generated.
    pub fn synthetic_expiries_of_type(
        &self,
        ticker: &str,
        wanted: ExpiryType,
        today: NaiveDate,
    ) -> Vec<OptionsExpiry> {
        self.expiries_for(ticker, self.expiration_dates_of_type(wanted, today), today)
    }

    /// Standard dates classifying as `wanted`, else [`expiration_in_bucket`].
    pub fn expiration_dates_of_type(&self, wanted: ExpiryType, today: NaiveDate) -> Vec<NaiveDate> {
        let dates: Vec<NaiveDate> = self
            .synthetic_expiration_dates(today)
            .into_iter()
            .filter(|d| classify_by_days(days_between(today, *d)) == wanted)
            .collect();

        if dates.is_empty() {
            vec![expiration_in_bucket(wanted, today)]
        } else {
            dates
        }
    }

    fn expiries_for(&self, ticker: &str, dates: Vec<NaiveDate>, today: NaiveDate) -> Vec<OptionsExpiry> {
        let underlying = ticker.trim().to_ascii_uppercase();

        dates
            .into_iter()
            .map(|expiration| {
                let chain = self.synthetic_chain(&underlying, Some(expiration), today);
                let days = days_between(today, expiration);
                OptionsExpiry::new(
                    &underlying,
                    expiration,
                    classify_by_days(days),
                    days,
                    ExpiryAggregate::from_contracts(&chain),
                )
            })
            .collect()
    }

    pub fn synthetic_expiration_dates(&self, today: NaiveDate) -> Vec<NaiveDate> {
        let mut dates = BTreeSet::new();
        dates.insert(next_trading_day(today));
        dates.insert(next_friday(today));

        let (y, m) = month_after(today.year(), today.month(), 1);
        if let Some(monthly) = third_friday(y, m) {
            dates.insert(monthly);
        }

        let quarterly = (1..=6)
            .map(|offset| month_after(today.year(), today.month(), offset))
            .filter(|(_, month)| month % 3 == 0)
            .filter_map(|(year, month)| third_friday(year, month))
            .find(|date| days_between(today, *date) > 45);
        if let Some(quarterly) = quarterly {
            dates.insert(quarterly);
        }

        if let Some(leaps) = third_friday(today.year() + 2, 1) {
            dates.insert(leaps);
        }

        dates.into_iter().collect()
    }
}
