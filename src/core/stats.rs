//! Rolling high/low bounds and log-linear trend over a daily candle series.

use super::error::{ServiceError, ServiceResult};
use super::models::Candle;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

/// Trading days per year used to annualize the daily growth rate.
pub const TRADING_DAYS_PER_YEAR: f64 = 252.0;

const MILLIS_PER_DAY: f64 = 86_400_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct PriceBounds {
    pub high: Option<f64>,
    pub low: Option<f64>,
}

/// Lookback window in fixed 365-day years.
pub fn window(years: u32) -> Duration {
    Duration::days(365 * years as i64)
}

/// High and low over candles closing within `years` of `now`.
///
/// Both bounds are `None` when no candle falls inside the window.
pub fn stats(candles: &[Candle], years: u32, now: DateTime<Utc>) -> PriceBounds {
    let start = now - window(years);
    candles
        .iter()
        .filter(|c| c.close_time >= start)
        .fold(PriceBounds::default(), |bounds, c| PriceBounds {
            high: Some(bounds.high.map_or(c.high_or_close(), |h| h.max(c.high_or_close()))),
            low: Some(bounds.low.map_or(c.low_or_close(), |l| l.min(c.low_or_close()))),
        })
}

/// Annualized return, in percent, of a least-squares fit of `ln(close)`
/// against elapsed days since the first candle.
pub fn trend(candles: &[Candle]) -> ServiceResult<f64> {
    let first = candles
        .first()
        .ok_or_else(|| ServiceError::Computation("trend of an empty series".to_string()))?;

    let mut points = Vec::with_capacity(candles.len());
    for candle in candles {
        if !(candle.close.is_finite() && candle.close > 0.0) {
            return Err(ServiceError::Computation(format!(
                "non-positive close {} at {}",
                candle.close, candle.close_time
            )));
        }
        let days = (candle.close_time - first.close_time).num_milliseconds() as f64 / MILLIS_PER_DAY;
        points.push((days, candle.close.ln()));
    }

    let n = points.len() as f64;
    let mean_x = points.iter().map(|(x, _)| x).sum::<f64>() / n;
    let mean_y = points.iter().map(|(_, y)| y).sum::<f64>() / n;
    let (covariance, variance) = points.iter().fold((0.0, 0.0), |(cov, var), (x, y)| {
        let dx = x - mean_x;
        (cov + dx * (y - mean_y), var + dx * dx)
    });

    if variance <= f64::EPSILON {
        return Err(ServiceError::Computation(
            "trend needs candles on at least two distinct days".to_string(),
        ));
    }

    let slope = covariance / variance;
    Ok(((slope * TRADING_DAYS_PER_YEAR).exp() - 1.0) * 100.0)
}
