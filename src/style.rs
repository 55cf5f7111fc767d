//! Colours, paints and font settings shared by the display methods and the renderer.

use image::Rgba;
use std::str::FromStr;

/// An RGBA colour
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const BLACK: Color = Color::rgb(0, 0, 0);
    pub const WHITE: Color = Color::rgb(255, 255, 255);
    pub const RED: Color = Color::rgb(255, 0, 0);
    pub const GREEN: Color = Color::rgb(0, 255, 0);
    pub const BLUE: Color = Color::rgb(0, 0, 255);
    pub const YELLOW: Color = Color::rgb(255, 255, 0);
    pub const CYAN: Color = Color::rgb(0, 255, 255);
    pub const MAGENTA: Color = Color::rgb(255, 0, 255);

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    /// Same colour with alpha scaled by `alpha` (0-1)
    pub fn with_alpha(self, alpha: f64) -> Self {
        let a = (self.a as f64 * alpha.clamp(0.0, 1.0)).round() as u8;
        Self { a, ..self }
    }

    pub fn to_rgba(self) -> Rgba<u8> {
        Rgba([self.r, self.g, self.b, self.a])
    }
}

impl From<Rgba<u8>> for Color {
    fn from(p: Rgba<u8>) -> Self {
        Self {
            r: p[0],
            g: p[1],
            b: p[2],
            a: p[3],
        }
    }
}

impl FromStr for Color {
    type Err = String;

    /// Accepts the basic colour names, their single-letter codes and `#rrggbb`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_lowercase();
        if let Some(hex) = name.strip_prefix('#') {
            if hex.len() != 6 {
                return Err(format!("invalid hex colour: {}", s));
            }
            let channel = |i: usize| {
                u8::from_str_radix(&hex[i..i + 2], 16).map_err(|_| format!("invalid hex colour: {}", s))
            };
            return Ok(Color::rgb(channel(0)?, channel(2)?, channel(4)?));
        }

        let color = match name.as_str() {
            "red" | "r" => Color::RED,
            "green" | "g" => Color::rgb(0, 128, 0),
            "lime" => Color::GREEN,
            "blue" | "b" => Color::BLUE,
            "yellow" | "y" => Color::YELLOW,
            "cyan" | "c" => Color::CYAN,
            "magenta" | "m" => Color::MAGENTA,
            "white" | "w" => Color::WHITE,
            "black" | "k" => Color::BLACK,
            "gray" | "grey" => Color::rgb(128, 128, 128),
            "orange" => Color::rgb(255, 165, 0),
            _ => return Err(format!("unknown colour: {}", s)),
        };
        Ok(color)
    }
}

/// A fill or stroke: either nothing or a solid colour
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Paint {
    None,
    Solid(Color),
}

impl Paint {
    pub fn color(self) -> Option<Color> {
        match self {
            Paint::None => None,
            Paint::Solid(c) => Some(c),
        }
    }
}

impl FromStr for Paint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("none") {
            Ok(Paint::None)
        } else {
            s.parse().map(Paint::Solid)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FontStyle {
    #[default]
    Normal,
    Italic,
    Oblique,
}

/// Font used for the axis labels
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Font {
    /// serif, sans-serif, cursive, fantasy or monospace; the raster renderer
    /// only has one face
    pub family: String,
    /// Size in points
    pub size: f64,
    pub style: FontStyle,
}

impl Default for Font {
    fn default() -> Self {
        Self {
            family: "serif".to_string(),
            size: 12.0,
            style: FontStyle::Normal,
        }
    }
}

/// Marker glyph for scatter sets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub enum MarkerShape {
    #[default]
    Circle,
    Square,
    Plus,
    Cross,
}
