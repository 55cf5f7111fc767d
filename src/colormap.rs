/// Colour maps for scalar images and contour levels
use std::str::FromStr;

use crate::style::Color;

/// Piecewise-linear channel: `(x, value)` anchors with x increasing from 0 to 1
type Channel = &'static [(f64, f64)];

const JET_RED: Channel = &[(0.0, 0.0), (0.35, 0.0), (0.66, 1.0), (0.89, 1.0), (1.0, 0.5)];
const JET_GREEN: Channel = &[
    (0.0, 0.0),
    (0.125, 0.0),
    (0.375, 1.0),
    (0.64, 1.0),
    (0.91, 0.0),
    (1.0, 0.0),
];
const JET_BLUE: Channel = &[(0.0, 0.5), (0.11, 1.0), (0.34, 1.0), (0.65, 0.0), (1.0, 0.0)];

const HOT_RED: Channel = &[(0.0, 0.0416), (0.365079, 1.0), (1.0, 1.0)];
const HOT_GREEN: Channel = &[(0.0, 0.0), (0.365079, 0.0), (0.746032, 1.0), (1.0, 1.0)];
const HOT_BLUE: Channel = &[(0.0, 0.0), (0.746032, 0.0), (1.0, 1.0)];

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Colormap {
    Gray,
    /// Inverted gray: white for low values
    GistYarg,
    Jet,
    GistHeat,
    Hot,
    /// Black -> blue -> cyan -> yellow -> white
    Heat,
}

impl Colormap {
    pub fn name(self) -> &'static str {
        match self {
            Colormap::Gray => "gray",
            Colormap::GistYarg => "gist_yarg",
            Colormap::Jet => "jet",
            Colormap::GistHeat => "gist_heat",
            Colormap::Hot => "hot",
            Colormap::Heat => "heat",
        }
    }

    /// Colour for a normalized value; `t` is clamped to [0, 1]
    pub fn sample(self, t: f64) -> Color {
        let t = if t.is_nan() { 0.0 } else { t.clamp(0.0, 1.0) };
        let (r, g, b) = match self {
            Colormap::Gray => (t, t, t),
            Colormap::GistYarg => (1.0 - t, 1.0 - t, 1.0 - t),
            Colormap::Jet => (
                interpolate(JET_RED, t),
                interpolate(JET_GREEN, t),
                interpolate(JET_BLUE, t),
            ),
            Colormap::GistHeat => (
                (1.5 * t).min(1.0),
                (2.0 * t - 1.0).clamp(0.0, 1.0),
                (4.0 * t - 3.0).clamp(0.0, 1.0),
            ),
            Colormap::Hot => (
                interpolate(HOT_RED, t),
                interpolate(HOT_GREEN, t),
                interpolate(HOT_BLUE, t),
            ),
            Colormap::Heat => return heat(t),
        };
        Color::rgb(to_byte(r), to_byte(g), to_byte(b))
    }

    /// Precomputed lookup table with `n` entries spanning the map
    pub fn lut(self, n: usize) -> Vec<Color> {
        let n = n.max(2);
        (0..n)
            .map(|i| self.sample(i as f64 / (n - 1) as f64))
            .collect()
    }
}

impl FromStr for Colormap {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "gray" | "grey" => Ok(Colormap::Gray),
            "gist_yarg" | "gray_r" | "grey_r" => Ok(Colormap::GistYarg),
            "jet" => Ok(Colormap::Jet),
            "gist_heat" => Ok(Colormap::GistHeat),
            "hot" => Ok(Colormap::Hot),
            "heat" => Ok(Colormap::Heat),
            _ => Err(format!("unknown colormap: {}", s)),
        }
    }
}

fn interpolate(channel: Channel, t: f64) -> f64 {
    for pair in channel.windows(2) {
        let (x0, y0) = pair[0];
        let (x1, y1) = pair[1];
        if t <= x1 {
            if x1 <= x0 {
                return y1;
            }
            return y0 + (y1 - y0) * (t - x0) / (x1 - x0);
        }
    }
    channel.last().map(|&(_, y)| y).unwrap_or(0.0)
}

fn to_byte(v: f64) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}

// Four-segment heat ramp
fn heat(i: f64) -> Color {
    if i < 0.25 {
        let t = i * 4.0;
        Color::rgb(0, 0, to_byte(t))
    } else if i < 0.5 {
        let t = (i - 0.25) * 4.0;
        Color::rgb(0, to_byte(t), 255)
    } else if i < 0.75 {
        let t = (i - 0.5) * 4.0;
        Color::rgb(to_byte(t), 255, to_byte(1.0 - t))
    } else {
        let t = (i - 0.75) * 4.0;
        Color::rgb(255, 255, to_byte(t))
    }
}
