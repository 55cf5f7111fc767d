/// Intensity stretches and the percentile function used for default display ranges
use std::str::FromStr;

/// Non-linear remapping applied to pixel values before colour mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stretch {
    #[default]
    Linear,
    Log,
    Sqrt,
    Arcsinh,
    /// Raise to the colorscale `exponent`
    Power,
}

impl Stretch {
    /// Apply the stretch to one value. Values outside the domain (log of a
    /// non-positive number, sqrt of a negative one) become NaN.
    pub fn apply(self, value: f64, exponent: f64) -> f64 {
        match self {
            Stretch::Linear => value,
            Stretch::Log => {
                if value > 0.0 {
                    value.log10()
                } else {
                    f64::NAN
                }
            }
            Stretch::Sqrt => value.sqrt(),
            Stretch::Arcsinh => value.asinh(),
            Stretch::Power => value.powf(exponent),
        }
    }

    pub fn apply_all(self, data: &[f64], exponent: f64) -> Vec<f64> {
        data.iter().map(|&v| self.apply(v, exponent)).collect()
    }
}

impl FromStr for Stretch {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "linear" => Ok(Stretch::Linear),
            "log" => Ok(Stretch::Log),
            "sqrt" => Ok(Stretch::Sqrt),
            "arcsinh" | "asinh" => Ok(Stretch::Arcsinh),
            "power" => Ok(Stretch::Power),
            _ => Err(format!("unknown stretch: {}", s)),
        }
    }
}

/// Interpolating percentile lookup over the finite pixels of an image
#[derive(Debug, Clone)]
pub struct PercentileFunction {
    sorted: Vec<f64>,
}

impl PercentileFunction {
    pub fn new(data: &[f64]) -> Self {
        let mut sorted: Vec<f64> = data.iter().copied().filter(|v| v.is_finite()).collect();
        sorted.sort_by(|a, b| a.total_cmp(b));
        Self { sorted }
    }

    pub fn is_empty(&self) -> bool {
        self.sorted.is_empty()
    }

    /// Value below which `fraction` (0-1) of the finite pixels fall.
    ///
    /// Linearly interpolates between order statistics; NaN for an image with
    /// no finite pixels.
    pub fn value_at(&self, fraction: f64) -> f64 {
        let n = self.sorted.len();
        if n == 0 {
            return f64::NAN;
        }
        if n == 1 {
            return self.sorted[0];
        }

        let position = fraction.clamp(0.0, 1.0) * (n - 1) as f64;
        let lower = position.floor() as usize;
        let upper = (lower + 1).min(n - 1);
        let weight = position - lower as f64;
        self.sorted[lower] * (1.0 - weight) + self.sorted[upper] * weight
    }
}

/// Lower/upper percentile used for automatic display limits
pub const AUTO_LOWER_FRACTION: f64 = 0.0025;
pub const AUTO_UPPER_FRACTION: f64 = 0.9975;

/// Default `(vmin, vmax)` for a stretch: the 0.25% and 99.75% percentiles,
/// stretched, then padded by a tenth of their difference on each side.
///
/// Returns `None` when either stretched percentile is not finite.
pub fn auto_limits(
    percentiles: &PercentileFunction,
    stretch: Stretch,
    exponent: f64,
) -> Option<(f64, f64)> {
    let lo = stretch.apply(percentiles.value_at(AUTO_LOWER_FRACTION), exponent);
    let hi = stretch.apply(percentiles.value_at(AUTO_UPPER_FRACTION), exponent);
    if !lo.is_finite() || !hi.is_finite() {
        return None;
    }
    let pad = (hi - lo) / 10.0;
    Some((lo - pad, hi + pad))
}

/// Finite range of already-stretched data
pub fn finite_range(data: &[f64]) -> Option<(f64, f64)> {
    data.iter()
        .copied()
        .filter(|v| v.is_finite())
        .fold(None, |acc, v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
}
