use serde::{Deserialize, Serialize};

use crate::record::{Dataset, PredictionRequest, TEMPERATURE_RANGE};

/// Pattern learner knobs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PatternConfig {
    /// Temperature rows needed before a fitted coefficient is trusted.
    pub min_temperature_samples: usize,
    /// Coefficient (fraction of base demand per °C) used when the fit is not trusted.
    pub default_temperature_coefficient: f64,
    /// Base demand of the empty-dataset profile, MW.
    pub default_base_demand: f64,
    /// Mean temperature of the empty-dataset profile, °C.
    pub default_mean_temperature: f64,
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self {
            min_temperature_samples: 10,
            default_temperature_coefficient: 0.004,
            default_base_demand: 3500.0,
            default_mean_temperature: 25.0,
        }
    }
}

/// Deterministic statistical demand profile.
///
/// Prediction is
/// `base_demand * hour_factor[h] * day_factor[d] * (1 + temperature_coefficient * (t - mean_temperature))`,
/// floored at zero. `temperature_coefficient` is the fitted slope divided by
/// `base_demand`, so the bracket stays dimensionless.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternProfile {
    hour_factor: [f64; 24],
    day_factor: [f64; 7],
    temperature_coefficient: f64,
    temperature_slope_mw: f64,
    base_demand: f64,
    mean_temperature: f64,
    sample_count: usize,
}

#[derive(Default, Clone, Copy)]
struct Bucket {
    sum: f64,
    count: u32,
}

impl Bucket {
    fn push(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
    }

    fn mean(self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / f64::from(self.count))
    }
}

// running covariance of (temperature, demand)
#[derive(Default)]
struct Comoment {
    count: u32,
    mean_t: f64,
    mean_d: f64,
    co: f64,
    m2: f64,
}

impl Comoment {
    fn push(&mut self, temperature: f64, demand: f64) {
        self.count += 1;
        let n = f64::from(self.count);
        let dt = temperature - self.mean_t;
        self.mean_t += dt / n;
        self.mean_d += (demand - self.mean_d) / n;
        self.co += dt * (demand - self.mean_d);
        self.m2 += dt * (temperature - self.mean_t);
    }
}

impl PatternProfile {
    /// Safe profile used when there is nothing to learn from.
    #[must_use]
    pub fn fallback(config: &PatternConfig) -> Self {
        Self {
            hour_factor: [1.0; 24],
            day_factor: [1.0; 7],
            temperature_coefficient: 0.0,
            temperature_slope_mw: 0.0,
            base_demand: config.default_base_demand,
            mean_temperature: config.default_mean_temperature,
            sample_count: 0,
        }
    }

    /// Learns a profile from the whole dataset in a single pass.
    #[must_use]
    pub fn learn(dataset: &Dataset, config: &PatternConfig) -> Self {
        let mut overall = Bucket::default();
        let mut hours = [Bucket::default(); 24];
        let mut days = [Bucket::default(); 7];
        let mut temperature = Comoment::default();
        for record in dataset.records() {
            let demand = record.demand_mw;
            overall.push(demand);
            if let Some(bucket) = hours.get_mut(usize::from(record.hour)) {
                bucket.push(demand);
            }
            if let Some(bucket) = days.get_mut(usize::from(record.day_of_week)) {
                bucket.push(demand);
            }
            if let Some(t) = record.temperature {
                temperature.push(t, demand);
            }
        }

        let base_demand = match overall.mean() {
            Some(mean) if mean.is_finite() && mean > 0.0 => mean,
            _ => return Self::fallback(config),
        };
        let factor = |bucket: Bucket| bucket.mean().map_or(1.0, |mean| mean / base_demand);

        let variance_ok = temperature.m2 > f64::EPSILON * f64::from(temperature.count.max(1));
        let samples_ok =
            usize::try_from(temperature.count).is_ok_and(|n| n >= config.min_temperature_samples);
        let (temperature_slope_mw, temperature_coefficient) = if variance_ok && samples_ok {
            let slope = temperature.co / temperature.m2;
            (slope, slope / base_demand)
        } else {
            let coefficient = config.default_temperature_coefficient;
            (coefficient * base_demand, coefficient)
        };
        let mean_temperature = if temperature.count > 0 {
            temperature.mean_t
        } else {
            config.default_mean_temperature
        };

        Self {
            hour_factor: hours.map(factor),
            day_factor: days.map(factor),
            temperature_coefficient,
            temperature_slope_mw,
            base_demand,
            mean_temperature,
            sample_count: dataset.len(),
        }
    }

    /// Pattern prediction for raw inputs; always finite and non-negative.
    #[must_use]
    pub fn estimate(&self, temperature: f64, hour: u8, day_of_week: u8) -> f64 {
        let hour_factor = self.hour_factor.get(usize::from(hour)).copied().unwrap_or(1.0);
        let day_factor = self
            .day_factor
            .get(usize::from(day_of_week))
            .copied()
            .unwrap_or(1.0);
        let temperature = if temperature.is_finite() {
            temperature.clamp(TEMPERATURE_RANGE.0, TEMPERATURE_RANGE.1)
        } else {
            self.mean_temperature
        };
        let adjustment =
            1.0 + self.temperature_coefficient * (temperature - self.mean_temperature);
        let value = self.base_demand * hour_factor * day_factor * adjustment;
        if value.is_finite() {
            value.max(0.0)
        } else {
            0.0
        }
    }

    /// Pattern prediction for a validated request.
    #[must_use]
    pub fn predict(&self, request: &PredictionRequest) -> f64 {
        self.estimate(request.temperature(), request.hour(), request.day_of_week())
    }

    /// Per-hour multipliers.
    #[must_use]
    pub const fn hour_factor(&self) -> &[f64; 24] {
        &self.hour_factor
    }

    /// Per-weekday multipliers (Monday first).
    #[must_use]
    pub const fn day_factor(&self) -> &[f64; 7] {
        &self.day_factor
    }

    /// Fraction of base demand per °C.
    #[must_use]
    pub const fn temperature_coefficient(&self) -> f64 {
        self.temperature_coefficient
    }

    /// Demand slope in MW per °C.
    #[must_use]
    pub const fn temperature_slope_mw(&self) -> f64 {
        self.temperature_slope_mw
    }

    /// Mean demand, MW.
    #[must_use]
    pub const fn base_demand(&self) -> f64 {
        self.base_demand
    }

    /// Mean observed temperature, °C.
    #[must_use]
    pub const fn mean_temperature(&self) -> f64 {
        self.mean_temperature
    }

    /// Rows the profile was learned from.
    #[must_use]
    pub const fn sample_count(&self) -> usize {
        self.sample_count
    }
}
