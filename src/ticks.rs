//! Tick spacing, tick placement along the view edges and tick label formats.

use std::fmt;
use std::str::FromStr;

use crate::display::ViewLimits;
use crate::wcs::WorldCoordinates;

/// How tick values along one axis are written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelFormat {
    /// `hh`, `hh:mm`, `hh:mm:ss` or `hh:mm:ss.s...` (`hours`), or the same
    /// with degrees (`dd:mm:ss`). `fields` is 1 to 3; `precision` counts the
    /// decimals of the last field.
    Sexagesimal {
        hours: bool,
        fields: u8,
        precision: usize,
    },
    /// Decimal degrees with `precision` decimals (`ddd.dddd`)
    Decimal { precision: usize },
}

impl LabelFormat {
    pub const HMS: LabelFormat = LabelFormat::Sexagesimal {
        hours: true,
        fields: 3,
        precision: 0,
    };
    pub const DMS: LabelFormat = LabelFormat::Sexagesimal {
        hours: false,
        fields: 3,
        precision: 0,
    };

    /// Format a world coordinate given in degrees
    pub fn format(&self, degrees: f64) -> String {
        match *self {
            LabelFormat::Decimal { precision } => format!("{:.*}", precision, degrees),
            LabelFormat::Sexagesimal {
                hours,
                fields,
                precision,
            } => {
                let value = if hours {
                    degrees.rem_euclid(360.0) / 15.0
                } else {
                    degrees
                };
                let negative = value < 0.0;
                let fields = fields.clamp(1, 3) as i32;

                // Integer count of the smallest unit, so rounding carries
                let unit_scale = 60f64.powi(fields - 1) * 10f64.powi(precision as i32);
                let mut units = (value.abs() * unit_scale).round() as u64;
                if hours {
                    units %= (24.0 * unit_scale) as u64;
                }

                let frac_scale = 10u64.pow(precision as u32);
                let frac = units % frac_scale;
                let mut whole = units / frac_scale;

                let mut parts = Vec::with_capacity(3);
                for _ in 1..fields {
                    parts.push(whole % 60);
                    whole /= 60;
                }
                parts.push(whole);
                parts.reverse();

                let mut out = String::new();
                if negative && units > 0 {
                    out.push('-');
                }
                for (i, part) in parts.iter().enumerate() {
                    if i > 0 {
                        out.push(':');
                    }
                    out.push_str(&format!("{:02}", part));
                }
                if precision > 0 {
                    out.push_str(&format!(".{:0width$}", frac, width = precision));
                }
                out
            }
        }
    }

    pub fn is_sexagesimal(&self) -> bool {
        matches!(self, LabelFormat::Sexagesimal { .. })
    }
}

impl FromStr for LabelFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let form = s.trim();
        let invalid = || format!("invalid label format: {:?}", s);

        if form.contains(':') || form == "hh" || form == "dd" {
            let (main, decimals) = match form.split_once('.') {
                Some((main, decimals)) => (main, decimals),
                None => (form, ""),
            };
            let fields: Vec<&str> = main.split(':').collect();
            let hours = match fields[0] {
                "hh" => true,
                "dd" => false,
                _ => return Err(invalid()),
            };
            let rest_ok = match fields.len() {
                1 => true,
                2 => fields[1] == "mm",
                3 => fields[1] == "mm" && fields[2] == "ss",
                _ => false,
            };
            if !rest_ok || decimals.chars().any(|c| c != 's') {
                return Err(invalid());
            }
            if !decimals.is_empty() && fields.len() != 3 {
                return Err(invalid());
            }
            return Ok(LabelFormat::Sexagesimal {
                hours,
                fields: fields.len() as u8,
                precision: decimals.len(),
            });
        }

        let (whole, decimals) = match form.split_once('.') {
            Some((whole, decimals)) => (whole, decimals),
            None => (form, ""),
        };
        if whole.is_empty() || whole.chars().any(|c| c != 'd') || decimals.chars().any(|c| c != 'd')
        {
            return Err(invalid());
        }
        Ok(LabelFormat::Decimal {
            precision: decimals.len(),
        })
    }
}

impl fmt::Display for LabelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            LabelFormat::Decimal { precision } => {
                write!(f, "ddd")?;
                if precision > 0 {
                    write!(f, ".{}", "d".repeat(precision))?;
                }
                Ok(())
            }
            LabelFormat::Sexagesimal {
                hours,
                fields,
                precision,
            } => {
                write!(f, "{}", if hours { "hh" } else { "dd" })?;
                if fields >= 2 {
                    write!(f, ":mm")?;
                }
                if fields >= 3 {
                    write!(f, ":ss")?;
                    if precision > 0 {
                        write!(f, ".{}", "s".repeat(precision))?;
                    }
                }
                Ok(())
            }
        }
    }
}

/// World coordinate ranges covered by a view
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorldExtent {
    /// Longitude range; unwrapped around the view centre so `min < max`
    /// even across 0/360
    pub lon: (f64, f64),
    pub lat: (f64, f64),
}

/// Sample the world coordinates over the view on a regular grid
pub fn world_extent(wcs: &dyn WorldCoordinates, view: &ViewLimits) -> Option<WorldExtent> {
    const SAMPLES: usize = 12;
    let (cx, cy) = view.centre();
    let (lon_centre, _) = wcs.pixel_to_world(cx, cy)?;
    let wraps = wcs.wraps_longitude();

    let mut lon = (f64::INFINITY, f64::NEG_INFINITY);
    let mut lat = (f64::INFINITY, f64::NEG_INFINITY);
    for i in 0..=SAMPLES {
        for j in 0..=SAMPLES {
            let x = view.x.0 + (view.x.1 - view.x.0) * i as f64 / SAMPLES as f64;
            let y = view.y.0 + (view.y.1 - view.y.0) * j as f64 / SAMPLES as f64;
            let Some((l, b)) = wcs.pixel_to_world(x, y) else {
                continue;
            };
            let l = if wraps {
                lon_centre + wrap_difference(l, lon_centre)
            } else {
                l
            };
            lon = (lon.0.min(l), lon.1.max(l));
            lat = (lat.0.min(b), lat.1.max(b));
        }
    }

    if !lon.0.is_finite() || !lat.0.is_finite() {
        return None;
    }
    Some(WorldExtent { lon, lat })
}

/// Signed difference `a - b` folded into (-180, 180]
pub fn wrap_difference(a: f64, b: f64) -> f64 {
    let d = (a - b).rem_euclid(360.0);
    if d > 180.0 {
        d - 360.0
    } else {
        d
    }
}

// Nice angular steps in arcseconds, and in seconds of time for hour axes
const ARCSEC_STEPS: &[f64] = &[
    0.01, 0.02, 0.05, 0.1, 0.2, 0.5, 1.0, 2.0, 5.0, 10.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0,
    900.0, 1800.0, 3600.0, 7200.0, 18000.0, 36000.0, 54000.0, 108000.0, 162000.0, 324000.0,
];
const TIME_SECOND_STEPS: &[f64] = &[
    0.001, 0.002, 0.005, 0.01, 0.02, 0.05, 0.1, 0.2, 0.5, 1.0, 2.0, 5.0, 10.0, 15.0, 30.0, 60.0,
    120.0, 300.0, 600.0, 900.0, 1800.0, 3600.0, 7200.0, 10800.0, 21600.0,
];

/// Target number of major ticks across the view
pub const TARGET_TICKS: f64 = 5.0;

/// Smallest nice spacing (degrees) giving no more than about
/// `TARGET_TICKS` ticks across `span` degrees
pub fn nice_spacing(span: f64, format: &LabelFormat) -> f64 {
    let raw = (span / TARGET_TICKS).abs();
    if !(raw > 0.0) || !raw.is_finite() {
        return 1.0;
    }
    match format {
        LabelFormat::Sexagesimal { hours: true, .. } => {
            let seconds = raw * 3600.0 / 15.0;
            let step = pick_step(TIME_SECOND_STEPS, seconds);
            step * 15.0 / 3600.0
        }
        LabelFormat::Sexagesimal { hours: false, .. } => {
            let arcsec = raw * 3600.0;
            pick_step(ARCSEC_STEPS, arcsec) / 3600.0
        }
        LabelFormat::Decimal { .. } => {
            let magnitude = 10f64.powf(raw.log10().floor());
            let normalized = raw / magnitude;
            let nice = [1.0, 2.0, 5.0, 10.0]
                .into_iter()
                .find(|&n| normalized <= n + 1e-9)
                .unwrap_or(10.0);
            nice * magnitude
        }
    }
}

fn pick_step(steps: &[f64], raw: f64) -> f64 {
    steps
        .iter()
        .copied()
        .find(|&s| s >= raw)
        .unwrap_or_else(|| steps.last().copied().unwrap_or(1.0))
}

/// Default `(x, y)` tick spacing for a view, in degrees
pub fn default_spacing(
    wcs: &dyn WorldCoordinates,
    view: &ViewLimits,
    x_format: &LabelFormat,
    y_format: &LabelFormat,
) -> (f64, f64) {
    match world_extent(wcs, view) {
        Some(extent) => (
            nice_spacing(extent.lon.1 - extent.lon.0, x_format),
            nice_spacing(extent.lat.1 - extent.lat.0, y_format),
        ),
        None => (1.0, 1.0),
    }
}

/// Multiples of `spacing` inside `[min, max]`
pub fn tick_values(min: f64, max: f64, spacing: f64) -> Vec<f64> {
    if !(spacing > 0.0) || !(max >= min) {
        return vec![];
    }
    let start = (min / spacing).ceil() as i64;
    let end = (max / spacing).floor() as i64;
    // Guard against absurdly fine spacings
    if end - start > 1000 {
        return vec![];
    }
    (start..=end).map(|k| k as f64 * spacing).collect()
}

/// Edge of the view that carries ticks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    Bottom,
    Top,
    Left,
    Right,
}

impl Edge {
    /// Whether ticks on this edge mark longitude (x) values
    pub fn is_horizontal(self) -> bool {
        matches!(self, Edge::Bottom | Edge::Top)
    }
}

/// A tick mark where a constant-world line crosses a view edge
#[derive(Debug, Clone, PartialEq)]
pub struct Tick {
    pub edge: Edge,
    /// Pixel coordinate along the edge (x for bottom/top, y for left/right)
    pub position: f64,
    /// World value in degrees
    pub value: f64,
    pub label: String,
}

/// Ticks on one edge: longitude ticks on the bottom and top edges, latitude
/// ticks on the left and right edges
pub fn edge_ticks(
    wcs: &dyn WorldCoordinates,
    view: &ViewLimits,
    edge: Edge,
    spacing: f64,
    format: &LabelFormat,
) -> Vec<Tick> {
    const SAMPLES: usize = 200;
    let Some(extent) = world_extent(wcs, view) else {
        return vec![];
    };
    let wraps = wcs.wraps_longitude();
    let (range, world_index) = if edge.is_horizontal() {
        (extent.lon, 0)
    } else {
        (extent.lat, 1)
    };

    let point_at = |t: f64| -> (f64, f64) {
        match edge {
            Edge::Bottom => (view.x.0 + (view.x.1 - view.x.0) * t, view.y.0),
            Edge::Top => (view.x.0 + (view.x.1 - view.x.0) * t, view.y.1),
            Edge::Left => (view.x.0, view.y.0 + (view.y.1 - view.y.0) * t),
            Edge::Right => (view.x.1, view.y.0 + (view.y.1 - view.y.0) * t),
        }
    };
    let world_at = |t: f64| -> Option<f64> {
        let (x, y) = point_at(t);
        wcs.pixel_to_world(x, y)
            .map(|w| if world_index == 0 { w.0 } else { w.1 })
    };

    let mut ticks = Vec::new();
    for value in tick_values(range.0, range.1, spacing) {
        let offset = |t: f64| -> Option<f64> {
            world_at(t).map(|w| {
                if wraps && world_index == 0 {
                    wrap_difference(w, value)
                } else {
                    w - value
                }
            })
        };

        let mut previous: Option<(f64, f64)> = None;
        for i in 0..=SAMPLES {
            let t = i as f64 / SAMPLES as f64;
            let Some(d) = offset(t) else {
                previous = None;
                continue;
            };
            if let Some((t0, d0)) = previous {
                // Sign change away from the wrap discontinuity
                if (d0 <= 0.0) != (d <= 0.0) && (d - d0).abs() < 90.0 {
                    let crossing = refine_crossing(&offset, t0, t, d0);
                    let (x, y) = point_at(crossing);
                    ticks.push(Tick {
                        edge,
                        position: if edge.is_horizontal() { x } else { y },
                        value: if wraps && world_index == 0 {
                            value.rem_euclid(360.0)
                        } else {
                            value
                        },
                        label: format.format(value),
                    });
                }
            }
            previous = Some((t, d));
        }
    }

    ticks.sort_by(|a, b| a.position.total_cmp(&b.position));
    ticks
}

fn refine_crossing(offset: &dyn Fn(f64) -> Option<f64>, mut lo: f64, mut hi: f64, d_lo: f64) -> f64 {
    let lo_positive = d_lo > 0.0;
    for _ in 0..40 {
        let mid = 0.5 * (lo + hi);
        match offset(mid) {
            Some(d) if (d > 0.0) == lo_positive => lo = mid,
            Some(_) => hi = mid,
            None => break,
        }
    }
    0.5 * (lo + hi)
}
