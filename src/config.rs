use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::display::Theme;

/// Options fixed when a figure is opened
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FigureOptions {
    /// Figure width in inches
    pub width_in: f64,
    /// Figure height in inches
    pub height_in: f64,
    /// Resolution of the interactive canvas and of raster exports without an
    /// explicit dpi
    pub dpi: f64,
    /// Header/data unit holding the image
    pub hdu: usize,
    /// Block-average factor applied after loading
    pub downsample: Option<usize>,
    /// Reproject so north is up and east left
    pub north: bool,
    pub theme: Theme,
}

impl Default for FigureOptions {
    fn default() -> Self {
        Self {
            width_in: 10.0,
            height_in: 10.0,
            dpi: 100.0,
            hdu: 0,
            downsample: None,
            north: false,
            theme: Theme::Pretty,
        }
    }
}

impl FigureOptions {
    /// Read options from a JSON file; missing fields take their defaults
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }
}
