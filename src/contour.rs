//! Contour lines and filled bands using the marching squares algorithm.
//!
//! Contours are computed on the contour image's own pixel grid and returned
//! in FITS pixel coordinates of that grid; the figure reprojects them into the
//! displayed image frame.

use std::collections::HashMap;

/// A point in FITS pixel coordinates
pub type Point = (f64, f64);

/// One connected isoline
#[derive(Debug, Clone, PartialEq)]
pub struct Polyline {
    pub points: Vec<Point>,
    pub closed: bool,
}

/// All isolines of one contour level
#[derive(Debug, Clone, PartialEq)]
pub struct ContourLevel {
    pub level: f64,
    pub lines: Vec<Polyline>,
}

/// Requested contour levels
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Levels {
    /// Roughly this many nicely rounded levels across the data range
    Count(usize),
    /// Exactly these levels
    Values(Vec<f64>),
}

impl Default for Levels {
    fn default() -> Self {
        Levels::Count(5)
    }
}

/// Round a raw step up to 1, 2, 2.5 or 5 times a power of ten
pub fn nice_step(raw: f64) -> f64 {
    if !(raw > 0.0) || !raw.is_finite() {
        return 1.0;
    }
    let magnitude = 10f64.powf(raw.log10().floor());
    let normalized = raw / magnitude;
    let nice = [1.0, 2.0, 2.5, 5.0, 10.0]
        .into_iter()
        .find(|&n| normalized <= n + 1e-9)
        .unwrap_or(10.0);
    nice * magnitude
}

/// Generate contour levels as multiples of `interval` inside `[min, max]`
pub fn generate_contour_levels(min_value: f64, max_value: f64, interval: f64) -> Vec<f64> {
    if interval <= 0.0 || max_value <= min_value {
        return vec![];
    }

    let start = (min_value / interval).ceil() as i64;
    let end = (max_value / interval).floor() as i64;
    (start..=end).map(|k| k as f64 * interval).collect()
}

/// Line levels for a data range: nicely spaced and strictly inside the range
pub fn line_levels(levels: &Levels, min_value: f64, max_value: f64) -> Vec<f64> {
    match levels {
        Levels::Values(values) => values.clone(),
        Levels::Count(n) => {
            let interval = nice_step((max_value - min_value) / (*n.max(&1) + 1) as f64);
            generate_contour_levels(min_value, max_value, interval)
                .into_iter()
                .filter(|&l| l > min_value && l < max_value)
                .collect()
        }
    }
}

/// Band boundaries for filled contours; the outer boundaries enclose the data
pub fn band_boundaries(levels: &Levels, min_value: f64, max_value: f64) -> Vec<f64> {
    match levels {
        Levels::Values(values) => values.clone(),
        Levels::Count(n) => {
            let interval = nice_step((max_value - min_value) / (*n.max(&1) + 1) as f64);
            let lo = (min_value / interval).floor() * interval;
            let hi = (max_value / interval).ceil() * interval;
            generate_contour_levels(lo - interval * 1e-9, hi + interval * 1e-9, interval)
        }
    }
}

/// Index of the band containing `value`, if any.
///
/// Band `i` spans `[boundaries[i], boundaries[i + 1])`; the last band also
/// includes its upper boundary.
pub fn band_index(boundaries: &[f64], value: f64) -> Option<usize> {
    if !value.is_finite() || boundaries.len() < 2 {
        return None;
    }
    let last = boundaries.len() - 2;
    for i in 0..=last {
        let (lo, hi) = (boundaries[i], boundaries[i + 1]);
        if value >= lo && (value < hi || (i == last && value <= hi)) {
            return Some(i);
        }
    }
    None
}

/// Cell edge identity: horizontal edges run from (x, y) to (x + 1, y),
/// vertical ones from (x, y) to (x, y + 1), in zero-based grid indices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Edge {
    Horizontal(usize, usize),
    Vertical(usize, usize),
}

struct Segment {
    start: Edge,
    end: Edge,
}

/// Trace the isolines of one level.
///
/// `data` is row-major with row 0 at the bottom. Cells touching a NaN are
/// skipped, so contours stop at blank regions.
pub fn trace_level(data: &[f64], width: usize, height: usize, level: f64) -> ContourLevel {
    let mut result = ContourLevel {
        level,
        lines: Vec::new(),
    };
    if width < 2 || height < 2 || data.len() != width * height {
        return result;
    }

    let at = |x: usize, y: usize| data[y * width + x];
    let mut points: HashMap<Edge, Point> = HashMap::new();
    let mut segments: Vec<Segment> = Vec::new();

    for y in 0..height - 1 {
        for x in 0..width - 1 {
            let bl = at(x, y);
            let br = at(x + 1, y);
            let tr = at(x + 1, y + 1);
            let tl = at(x, y + 1);
            if bl.is_nan() || br.is_nan() || tr.is_nan() || tl.is_nan() {
                continue;
            }

            let corners = [
                (Edge::Horizontal(x, y), bl, br, (x, y), (x + 1, y)),
                (Edge::Vertical(x + 1, y), br, tr, (x + 1, y), (x + 1, y + 1)),
                (Edge::Horizontal(x, y + 1), tl, tr, (x, y + 1), (x + 1, y + 1)),
                (Edge::Vertical(x, y), bl, tl, (x, y), (x, y + 1)),
            ];

            let mut crossings: Vec<Edge> = Vec::with_capacity(4);
            for &(edge, va, vb, a, b) in &corners {
                if (va >= level) != (vb >= level) {
                    points
                        .entry(edge)
                        .or_insert_with(|| interpolate_edge(a, b, va, vb, level));
                    crossings.push(edge);
                }
            }

            match crossings.len() {
                2 => segments.push(Segment {
                    start: crossings[0],
                    end: crossings[1],
                }),
                4 => {
                    // Saddle: crossings are [bottom, right, top, left]
                    let centre = (bl + br + tr + tl) / 4.0;
                    let bl_above = bl >= level;
                    let centre_above = centre >= level;
                    let (first, second) = if bl_above == centre_above {
                        // bl joins the centre: cut off br and tl
                        ((0, 1), (2, 3))
                    } else {
                        // bl is isolated: cut off bl and tr
                        ((0, 3), (1, 2))
                    };
                    segments.push(Segment {
                        start: crossings[first.0],
                        end: crossings[first.1],
                    });
                    segments.push(Segment {
                        start: crossings[second.0],
                        end: crossings[second.1],
                    });
                }
                _ => {}
            }
        }
    }

    result.lines = join_segments(&segments, &points);
    result
}

/// Trace several levels
pub fn trace_levels(data: &[f64], width: usize, height: usize, levels: &[f64]) -> Vec<ContourLevel> {
    levels
        .iter()
        .map(|&level| trace_level(data, width, height, level))
        .collect()
}

fn interpolate_edge(
    a: (usize, usize),
    b: (usize, usize),
    va: f64,
    vb: f64,
    level: f64,
) -> Point {
    let t = if (vb - va).abs() < f64::EPSILON {
        0.5
    } else {
        ((level - va) / (vb - va)).clamp(0.0, 1.0)
    };
    // Grid index i is FITS pixel i + 1
    (
        a.0 as f64 + 1.0 + t * (b.0 as f64 - a.0 as f64),
        a.1 as f64 + 1.0 + t * (b.1 as f64 - a.1 as f64),
    )
}

/// Chain segments sharing edges into polylines
fn join_segments(segments: &[Segment], points: &HashMap<Edge, Point>) -> Vec<Polyline> {
    let mut by_edge: HashMap<Edge, Vec<usize>> = HashMap::new();
    for (i, seg) in segments.iter().enumerate() {
        by_edge.entry(seg.start).or_default().push(i);
        by_edge.entry(seg.end).or_default().push(i);
    }

    let mut used = vec![false; segments.len()];
    let mut lines = Vec::new();

    for first in 0..segments.len() {
        if used[first] {
            continue;
        }
        used[first] = true;

        let mut chain: Vec<Edge> = vec![segments[first].start, segments[first].end];

        // Extend forward from the tail, then backward from the head
        for forward in [true, false] {
            loop {
                let tip = if forward { chain[chain.len() - 1] } else { chain[0] };
                let next = by_edge
                    .get(&tip)
                    .and_then(|ids| ids.iter().copied().find(|&id| !used[id]));
                let Some(id) = next else { break };
                used[id] = true;
                let seg = &segments[id];
                let other = if seg.start == tip { seg.end } else { seg.start };
                if forward {
                    chain.push(other);
                } else {
                    chain.insert(0, other);
                }
            }
        }

        let closed = chain.len() > 2 && chain[0] == chain[chain.len() - 1];
        if closed {
            chain.pop();
        }
        let points = chain.iter().filter_map(|e| points.get(e).copied()).collect();
        lines.push(Polyline { points, closed });
    }

    lines
}
