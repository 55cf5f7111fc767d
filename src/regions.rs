//! DS9 region files: parsing into drawable shapes in pixel coordinates.

use anyhow::{anyhow, bail, Context, Result};
use regex::Regex;
use std::fs;
use std::path::Path;
use tracing::debug;

use crate::style::Color;
use crate::wcs::{local_pixel_scale, WorldCoordinates};

/// Geometry of a region shape in target pixel coordinates
#[derive(Debug, Clone, PartialEq)]
pub enum ShapeKind {
    Circle {
        centre: (f64, f64),
        radius: f64,
    },
    Ellipse {
        centre: (f64, f64),
        radii: (f64, f64),
        /// Counter-clockwise from the +x axis, degrees
        angle: f64,
    },
    Polygon {
        points: Vec<(f64, f64)>,
    },
    Point {
        position: (f64, f64),
    },
    Line {
        start: (f64, f64),
        end: (f64, f64),
    },
    Text {
        position: (f64, f64),
        text: String,
    },
}

/// A region patch: drawn over the image, outside the layer registry
#[derive(Debug, Clone, PartialEq)]
pub struct Shape {
    pub kind: ShapeKind,
    pub color: Color,
    pub width: f64,
    /// Label attached with `text={...}`
    pub label: Option<String>,
    /// Exclusion regions are drawn like the others
    pub exclude: bool,
}

/// Parses a region file against a world coordinate system
pub trait RegionParser {
    fn parse(&self, path: &Path, wcs: &dyn WorldCoordinates) -> Result<Vec<Shape>>;
}

/// Parser for the DS9 region format
#[derive(Debug, Default, Clone, Copy)]
pub struct Ds9RegionParser;

impl RegionParser for Ds9RegionParser {
    fn parse(&self, path: &Path, wcs: &dyn WorldCoordinates) -> Result<Vec<Shape>> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read region file: {}", path.display()))?;
        parse_regions(&text, wcs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Frame {
    Image,
    /// Any sky frame; coordinates are passed to the WCS as given
    Sky,
}

#[derive(Debug, Clone)]
struct Properties {
    color: Color,
    width: f64,
    text: Option<String>,
}

impl Default for Properties {
    fn default() -> Self {
        Self {
            color: Color::GREEN,
            width: 1.0,
            text: None,
        }
    }
}

struct Grammar {
    shape: Regex,
    property: Regex,
    braces: Regex,
}

impl Grammar {
    fn new() -> Result<Self> {
        Ok(Self {
            shape: Regex::new(r"^([+-]?)\s*([A-Za-z]+)\s*\(([^)]*)\)\s*$")?,
            property: Regex::new(r#"(\w+)\s*=\s*(\{[^}]*\}|"[^"]*"|'[^']*'|[^\s]+)"#)?,
            braces: Regex::new(r"\{([^}]*)\}")?,
        })
    }
}

/// Parse the text of a region file.
///
/// Lines that are neither a frame, a `global` line nor a known shape are
/// skipped.
pub fn parse_regions(text: &str, wcs: &dyn WorldCoordinates) -> Result<Vec<Shape>> {
    let grammar = Grammar::new()?;
    let mut frame = Frame::Sky;
    let mut defaults = Properties::default();
    let mut shapes = Vec::new();

    for (line_no, raw_line) in text.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        // Properties follow the first '#' that is not inside braces
        let (body, comment) = split_comment(line);

        if let Some(rest) = body.trim().strip_prefix("global") {
            apply_properties(&grammar, rest, &mut defaults);
            continue;
        }

        for command in body.split(';') {
            let command = command.trim();
            if command.is_empty() {
                continue;
            }
            if let Some(f) = parse_frame(command) {
                frame = f;
                continue;
            }

            let mut props = defaults.clone();
            props.text = None;
            if let Some(comment) = comment {
                apply_properties(&grammar, comment, &mut props);
            }

            match parse_shape(&grammar, command, frame, &props, wcs) {
                Ok(Some(shape)) => shapes.push(shape),
                Ok(None) => debug!("Skipping region line {}: {}", line_no + 1, raw_line),
                Err(e) => debug!("Skipping region line {}: {:#}", line_no + 1, e),
            }
        }
    }

    debug!("Parsed {} region shapes", shapes.len());
    Ok(shapes)
}

fn split_comment(line: &str) -> (&str, Option<&str>) {
    let mut depth = 0;
    for (i, c) in line.char_indices() {
        match c {
            '{' => depth += 1,
            '}' => depth -= 1,
            '#' if depth == 0 => return (&line[..i], Some(&line[i + 1..])),
            _ => {}
        }
    }
    (line, None)
}

fn parse_frame(command: &str) -> Option<Frame> {
    match command.to_lowercase().as_str() {
        "image" | "physical" => Some(Frame::Image),
        "fk5" | "fk4" | "icrs" | "j2000" | "b1950" | "galactic" | "ecliptic" | "wcs" => {
            Some(Frame::Sky)
        }
        _ => None,
    }
}

fn apply_properties(grammar: &Grammar, text: &str, props: &mut Properties) {
    for cap in grammar.property.captures_iter(text) {
        let value = cap[2].trim_matches(|c| matches!(c, '{' | '}' | '"' | '\''));
        match cap[1].to_lowercase().as_str() {
            "color" => match value.parse::<Color>() {
                Ok(color) => props.color = color,
                Err(e) => debug!("Ignoring region colour: {}", e),
            },
            "width" => {
                if let Ok(width) = value.parse::<f64>() {
                    props.width = width;
                }
            }
            "text" => props.text = Some(value.to_string()),
            _ => {}
        }
    }
}

fn parse_shape(
    grammar: &Grammar,
    command: &str,
    frame: Frame,
    props: &Properties,
    wcs: &dyn WorldCoordinates,
) -> Result<Option<Shape>> {
    // Text given inside the argument list
    let mut inline_text = None;
    let command = grammar.braces.replace_all(command, |cap: &regex::Captures| {
        inline_text = Some(cap[1].to_string());
        ""
    });

    let Some(cap) = grammar.shape.captures(&command) else {
        return Ok(None);
    };
    let exclude = &cap[1] == "-";
    let name = cap[2].to_lowercase();
    let args: Vec<&str> = cap[3]
        .split(',')
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .collect();

    let point = |i: usize| -> Result<(f64, f64)> {
        let x = args.get(i).ok_or_else(|| anyhow!("missing coordinate"))?;
        let y = args.get(i + 1).ok_or_else(|| anyhow!("missing coordinate"))?;
        to_pixel(x, y, frame, wcs)
    };
    let need = |n: usize| -> Result<()> {
        if args.len() < n {
            bail!("{} needs {} arguments, got {}", name, n, args.len());
        }
        Ok(())
    };

    let kind = match name.as_str() {
        "circle" => {
            need(3)?;
            let centre = point(0)?;
            ShapeKind::Circle {
                centre,
                radius: to_pixel_size(args[2], frame, centre, wcs)?,
            }
        }
        "ellipse" => {
            need(4)?;
            let centre = point(0)?;
            ShapeKind::Ellipse {
                centre,
                radii: (
                    to_pixel_size(args[2], frame, centre, wcs)?,
                    to_pixel_size(args[3], frame, centre, wcs)?,
                ),
                angle: parse_angle(args.get(4))?,
            }
        }
        "box" => {
            need(4)?;
            let centre = point(0)?;
            let w = to_pixel_size(args[2], frame, centre, wcs)?;
            let h = to_pixel_size(args[3], frame, centre, wcs)?;
            ShapeKind::Polygon {
                points: box_corners(centre, w, h, parse_angle(args.get(4))?),
            }
        }
        "polygon" => {
            if args.len() < 6 || args.len() % 2 != 0 {
                bail!("polygon needs an even number of at least 6 arguments");
            }
            let points = (0..args.len())
                .step_by(2)
                .map(point)
                .collect::<Result<Vec<_>>>()?;
            ShapeKind::Polygon { points }
        }
        "point" => {
            need(2)?;
            ShapeKind::Point { position: point(0)? }
        }
        "line" => {
            need(4)?;
            ShapeKind::Line {
                start: point(0)?,
                end: point(2)?,
            }
        }
        "text" => {
            need(2)?;
            let text = inline_text
                .clone()
                .or_else(|| props.text.clone())
                .ok_or_else(|| anyhow!("text region without text"))?;
            ShapeKind::Text {
                position: point(0)?,
                text,
            }
        }
        _ => return Ok(None),
    };

    let label = match kind {
        ShapeKind::Text { .. } => None,
        _ => props.text.clone(),
    };

    Ok(Some(Shape {
        kind,
        color: props.color,
        width: props.width,
        label,
        exclude,
    }))
}

fn to_pixel(x: &str, y: &str, frame: Frame, wcs: &dyn WorldCoordinates) -> Result<(f64, f64)> {
    match frame {
        Frame::Image => Ok((parse_number(x)?, parse_number(y)?)),
        Frame::Sky => {
            let lon = parse_sky_coordinate(x, true)?;
            let lat = parse_sky_coordinate(y, false)?;
            wcs.world_to_pixel(lon, lat)
                .ok_or_else(|| anyhow!("({}, {}) does not project onto the image", x, y))
        }
    }
}

fn parse_number(s: &str) -> Result<f64> {
    s.trim()
        .parse::<f64>()
        .with_context(|| format!("invalid number: {}", s))
}

/// Sky coordinate in degrees: decimal degrees, `hh:mm:ss` / `dd:mm:ss`, or
/// `12h34m56s` / `+12d34m56s`
pub fn parse_sky_coordinate(s: &str, longitude: bool) -> Result<f64> {
    let s = s.trim();
    if let Ok(v) = s.parse::<f64>() {
        return Ok(v);
    }

    let hours = longitude && (s.contains(':') || s.contains('h'));
    let negative = s.starts_with('-');
    let fields: Vec<f64> = s
        .trim_start_matches(['+', '-'])
        .split(|c: char| matches!(c, ':' | 'h' | 'd' | 'm' | 's' | '\'' | '"'))
        .filter(|f| !f.is_empty())
        .map(parse_number)
        .collect::<Result<_>>()?;
    if fields.is_empty() || fields.len() > 3 {
        bail!("invalid sexagesimal value: {}", s);
    }

    let value = fields
        .iter()
        .enumerate()
        .map(|(i, v)| v / 60f64.powi(i as i32))
        .sum::<f64>();
    let value = if hours { value * 15.0 } else { value };
    Ok(if negative { -value } else { value })
}

/// Size in pixels: `"` arcsec, `'` arcmin, `d` degrees, `p`/`i` pixels; bare
/// numbers are pixels in image frames and degrees in sky frames
fn to_pixel_size(
    s: &str,
    frame: Frame,
    at: (f64, f64),
    wcs: &dyn WorldCoordinates,
) -> Result<f64> {
    let s = s.trim();
    let (number, degrees_per_unit) = match s.chars().last() {
        Some('"') => (&s[..s.len() - 1], Some(1.0 / 3600.0)),
        Some('\'') => (&s[..s.len() - 1], Some(1.0 / 60.0)),
        Some('d') => (&s[..s.len() - 1], Some(1.0)),
        Some('p') | Some('i') => (&s[..s.len() - 1], None),
        _ => match frame {
            Frame::Image => (s, None),
            Frame::Sky => (s, Some(1.0)),
        },
    };
    let value = parse_number(number)?;

    match degrees_per_unit {
        None => Ok(value),
        Some(unit) => {
            let scale = local_pixel_scale(wcs, at.0, at.1)
                .filter(|s| *s > 0.0)
                .ok_or_else(|| anyhow!("no pixel scale at ({}, {})", at.0, at.1))?;
            Ok(value * unit / scale)
        }
    }
}

fn parse_angle(arg: Option<&&str>) -> Result<f64> {
    match arg {
        Some(a) => parse_number(a),
        None => Ok(0.0),
    }
}

/// Corners of a `w` x `h` box rotated by `angle` degrees about `centre`
pub fn box_corners(centre: (f64, f64), w: f64, h: f64, angle: f64) -> Vec<(f64, f64)> {
    let (sin, cos) = angle.to_radians().sin_cos();
    [(-0.5, -0.5), (0.5, -0.5), (0.5, 0.5), (-0.5, 0.5)]
        .iter()
        .map(|&(u, v)| {
            let dx = u * w;
            let dy = v * h;
            (
                centre.0 + dx * cos - dy * sin,
                centre.1 + dx * sin + dy * cos,
            )
        })
        .collect()
}
