//! Display configuration: per-axis tick and grid settings plus the
//! figure-wide frame, grid, font and theme state.

use std::ops::{Index, IndexMut};
use std::str::FromStr;

use crate::colormap::Colormap;
use crate::style::{Color, Font};
use crate::ticks::LabelFormat;

/// One of the four coordinate axes: the primary view's axes and the twin
/// view's far-side axes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AxisId {
    PrimaryX,
    PrimaryY,
    TwinX,
    TwinY,
}

impl AxisId {
    pub const ALL: [AxisId; 4] = [
        AxisId::PrimaryX,
        AxisId::PrimaryY,
        AxisId::TwinX,
        AxisId::TwinY,
    ];

    fn index(self) -> usize {
        match self {
            AxisId::PrimaryX => 0,
            AxisId::PrimaryY => 1,
            AxisId::TwinX => 2,
            AxisId::TwinY => 3,
        }
    }

    pub fn is_x(self) -> bool {
        matches!(self, AxisId::PrimaryX | AxisId::TwinX)
    }
}

/// Tick or grid spacing in degrees
#[derive(Debug, Clone, Copy, PartialEq, Default, serde::Serialize, serde::Deserialize)]
pub enum Spacing {
    /// Follow the default spacing computed from the view
    #[default]
    Auto,
    Fixed(f64),
}

impl Spacing {
    pub fn resolve(self, default: f64) -> f64 {
        match self {
            Spacing::Auto => default,
            Spacing::Fixed(v) => v,
        }
    }
}

impl FromStr for Spacing {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("auto") {
            return Ok(Spacing::Auto);
        }
        match s.trim().parse::<f64>() {
            Ok(v) if v > 0.0 => Ok(Spacing::Fixed(v)),
            _ => Err(format!("invalid spacing: {}", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AxisConfig {
    pub tick_spacing: Spacing,
    pub grid_spacing: Spacing,
    /// Spacing computed by the view-change listener
    pub default_spacing: f64,
    pub label_format: LabelFormat,
    pub tick_color: Color,
    /// Tick length in points
    pub tick_size: f64,
}

impl Default for AxisConfig {
    fn default() -> Self {
        Self {
            tick_spacing: Spacing::Auto,
            grid_spacing: Spacing::Auto,
            default_spacing: 1.0,
            label_format: LabelFormat::Decimal { precision: 4 },
            tick_color: Color::WHITE,
            tick_size: 7.0,
        }
    }
}

impl AxisConfig {
    pub fn tick_step(&self) -> f64 {
        self.tick_spacing.resolve(self.default_spacing)
    }

    pub fn grid_step(&self) -> f64 {
        self.grid_spacing.resolve(self.default_spacing)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Pretty,
    Publication,
}

impl FromStr for Theme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(Theme::Pretty),
            "publication" => Ok(Theme::Publication),
            _ => Err(format!("unknown theme: {}", s)),
        }
    }
}

/// Defaults a theme hands to later display calls
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThemeDefaults {
    pub invert_grayscale: bool,
    pub colormap: Colormap,
    pub grid_color: Color,
    pub grid_alpha: f64,
}

impl Theme {
    pub fn defaults(self) -> ThemeDefaults {
        match self {
            Theme::Pretty => ThemeDefaults {
                invert_grayscale: false,
                colormap: Colormap::Jet,
                grid_color: Color::WHITE,
                grid_alpha: 0.5,
            },
            Theme::Publication => ThemeDefaults {
                invert_grayscale: true,
                colormap: Colormap::GistHeat,
                grid_color: Color::BLACK,
                grid_alpha: 1.0,
            },
        }
    }

    pub fn frame_color(self) -> Color {
        match self {
            Theme::Pretty => Color::WHITE,
            Theme::Publication => Color::BLACK,
        }
    }

    pub fn tick_color(self) -> Color {
        self.frame_color()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DisplayConfig {
    axes: [AxisConfig; 4],
    pub frame_color: Color,
    pub show_grid: bool,
    /// Grid colour set through `grid`, taking precedence over the theme
    pub grid_color: Option<Color>,
    pub grid_alpha: Option<f64>,
    pub theme: ThemeDefaults,
    pub label_font: Font,
    pub x_label: String,
    pub y_label: String,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            axes: Default::default(),
            frame_color: Theme::Pretty.frame_color(),
            show_grid: false,
            grid_color: None,
            grid_alpha: None,
            theme: Theme::Pretty.defaults(),
            label_font: Font::default(),
            x_label: String::new(),
            y_label: String::new(),
        }
    }
}

impl DisplayConfig {
    pub fn apply_theme(&mut self, theme: Theme) {
        self.frame_color = theme.frame_color();
        for axis in AxisId::ALL {
            self[axis].tick_color = theme.tick_color();
            self[axis].tick_size = 7.0;
        }
        self.theme = theme.defaults();
    }

    pub fn effective_grid_color(&self) -> Color {
        self.grid_color.unwrap_or(self.theme.grid_color)
    }

    pub fn effective_grid_alpha(&self) -> f64 {
        self.grid_alpha.unwrap_or(self.theme.grid_alpha)
    }

    /// Set a value on the primary axis and its twin
    pub fn set_pair(&mut self, x: bool, f: impl Fn(&mut AxisConfig)) {
        let (primary, twin) = if x {
            (AxisId::PrimaryX, AxisId::TwinX)
        } else {
            (AxisId::PrimaryY, AxisId::TwinY)
        };
        f(&mut self[primary]);
        f(&mut self[twin]);
    }

    pub fn for_all_axes(&mut self, f: impl Fn(&mut AxisConfig)) {
        for axis in AxisId::ALL {
            f(&mut self[axis]);
        }
    }
}

impl Index<AxisId> for DisplayConfig {
    type Output = AxisConfig;

    fn index(&self, axis: AxisId) -> &AxisConfig {
        &self.axes[axis.index()]
    }
}

impl IndexMut<AxisId> for DisplayConfig {
    fn index_mut(&mut self, axis: AxisId) -> &mut AxisConfig {
        &mut self.axes[axis.index()]
    }
}

/// Visible region in pixel coordinates, shared by both views
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewLimits {
    pub x: (f64, f64),
    pub y: (f64, f64),
}

impl ViewLimits {
    /// The whole image: pixel centres sit on integers, so the outer pixel
    /// edges are at 0.5 and n + 0.5
    pub fn full(nx: usize, ny: usize) -> Self {
        Self {
            x: (0.5, nx as f64 + 0.5),
            y: (0.5, ny as f64 + 0.5),
        }
    }

    pub fn width(&self) -> f64 {
        self.x.1 - self.x.0
    }

    pub fn height(&self) -> f64 {
        self.y.1 - self.y.0
    }

    pub fn centre(&self) -> (f64, f64) {
        (0.5 * (self.x.0 + self.x.1), 0.5 * (self.y.0 + self.y.1))
    }
}
