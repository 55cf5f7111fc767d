pub mod colormap;
pub mod config;
pub mod contour;
pub mod display;
pub mod error;
pub mod export;
pub mod figure;
pub mod fits;
pub mod grid;
pub mod header;
pub mod layers;
pub mod regions;
pub mod render;
pub mod resample;
pub mod stretch;
pub mod style;
pub mod text;
pub mod ticks;
pub mod wcs;

#[cfg(test)]
mod testing;

// Re-export commonly used items
pub use colormap::Colormap;
pub use config::FigureOptions;
pub use contour::Levels;
pub use display::{AxisId, DisplayConfig, Spacing, Theme, ViewLimits};
pub use error::{FigureError, Result};
pub use figure::{
    Collaborators, ColorscaleOptions, ContourOptions, FitsFigure, FontOptions, FrameOptions,
    GridOptions, LabelOptions, MarkerOptions, SaveOptions, TickOptions,
};
pub use layers::{Artist, LayerRegistry, LayerReport};
pub use render::{Interpolation, RasterRenderer, Renderer, Scene};
pub use stretch::Stretch;
