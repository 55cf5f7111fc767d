use clap::{Parser, Subcommand};
use std::path::PathBuf;

use fits_figure::style::Color;
use fits_figure::{FigureOptions, Interpolation, Levels, Spacing, Stretch, Theme};

#[derive(Parser)]
#[command(name = "fitsfig")]
#[command(about = "Plot astronomical FITS images with coordinate grids, contours and markers", long_about = None)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// JSON file with figure options; command-line flags override it
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Render a FITS image with overlays to PNG, JPEG, TIFF, PS or EPS
    Render {
        /// FITS image to display
        fits: PathBuf,

        /// Output file; the format follows the extension (default: <fits>.png)
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[command(flatten)]
        figure: FigureArgs,

        #[command(flatten)]
        scale: ScaleArgs,

        #[command(flatten)]
        overlays: OverlayArgs,
    },

    /// Show image size, coordinate system and the normalized header
    Info {
        /// FITS image to inspect
        fits: PathBuf,

        /// Header/data unit to read
        #[arg(long, default_value = "0")]
        hdu: usize,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },
}

#[derive(Parser, Debug, Clone)]
pub struct FigureArgs {
    /// Figure width in inches
    #[arg(long)]
    pub width: Option<f64>,

    /// Figure height in inches
    #[arg(long)]
    pub height: Option<f64>,

    /// Output resolution
    #[arg(long)]
    pub dpi: Option<f64>,

    /// Header/data unit holding the image
    #[arg(long)]
    pub hdu: Option<usize>,

    /// Block-average the image by this factor
    #[arg(long)]
    pub downsample: Option<usize>,

    /// Rotate the image so north is up
    #[arg(long)]
    pub north: bool,

    /// Color theme (pretty, publication)
    #[arg(long)]
    pub theme: Option<Theme>,

    /// Make the figure background transparent
    #[arg(long)]
    pub transparent: bool,
}

impl FigureArgs {
    /// Overlay the flags that were given on options read from a file
    pub fn apply(&self, mut options: FigureOptions) -> FigureOptions {
        if let Some(width) = self.width {
            options.width_in = width;
        }
        if let Some(height) = self.height {
            options.height_in = height;
        }
        if let Some(dpi) = self.dpi {
            options.dpi = dpi;
        }
        if let Some(hdu) = self.hdu {
            options.hdu = hdu;
        }
        if self.downsample.is_some() {
            options.downsample = self.downsample;
        }
        if self.north {
            options.north = true;
        }
        if let Some(theme) = self.theme {
            options.theme = theme;
        }
        options
    }
}

#[derive(Parser, Debug, Clone)]
pub struct ScaleArgs {
    /// Use a grayscale colormap instead of the theme colormap
    #[arg(long)]
    pub grayscale: bool,

    /// Invert the grayscale colormap (with --grayscale)
    #[arg(long)]
    pub invert: bool,

    /// Intensity stretch (linear, log, sqrt, arcsinh, power)
    #[arg(long, default_value = "linear")]
    pub stretch: Stretch,

    /// Exponent for the power stretch
    #[arg(long)]
    pub exponent: Option<f64>,

    /// Lower display limit, in stretched units
    #[arg(long, allow_hyphen_values = true)]
    pub vmin: Option<f64>,

    /// Upper display limit, in stretched units
    #[arg(long, allow_hyphen_values = true)]
    pub vmax: Option<f64>,

    /// Colormap (gray, gist_yarg, jet, gist_heat, hot, heat)
    #[arg(long)]
    pub cmap: Option<String>,

    /// Pixel interpolation (nearest, bilinear)
    #[arg(long, default_value = "nearest")]
    pub interpolation: Interpolation,

    /// Gaussian smoothing sigma in pixels
    #[arg(long)]
    pub smooth: Option<f64>,
}

#[derive(Parser, Debug, Clone)]
pub struct OverlayArgs {
    /// FITS image to contour over the main image
    #[arg(long)]
    pub contour: Option<PathBuf>,

    /// Contour levels: a count or a comma-separated list of values
    #[arg(long, default_value = "5", value_parser = parse_levels)]
    pub levels: Levels,

    /// Draw filled contours
    #[arg(long)]
    pub filled: bool,

    /// Comma-separated contour colors, cycled over the levels
    #[arg(long, value_delimiter = ',', requires = "contour")]
    pub contour_colors: Vec<Color>,

    /// Colormap sampled over the contour levels
    #[arg(long, requires = "contour")]
    pub contour_cmap: Option<String>,

    /// Show the coordinate grid
    #[arg(long)]
    pub grid: bool,

    /// Grid spacing in degrees, or "auto"
    #[arg(long, default_value = "auto")]
    pub grid_spacing: Spacing,

    /// DS9 region file to overlay
    #[arg(long)]
    pub regions: Option<PathBuf>,

    /// Marker at RA,DEC in degrees; may be repeated
    #[arg(long = "marker", value_parser = parse_position, allow_hyphen_values = true)]
    pub markers: Vec<(f64, f64)>,

    /// Marker edge color
    #[arg(long)]
    pub marker_color: Option<Color>,

    /// Marker area in points squared
    #[arg(long)]
    pub marker_size: Option<f64>,

    /// Tick label format for the x axis, e.g. hh:mm:ss or ddd.dd
    #[arg(long)]
    pub xform: Option<String>,

    /// Tick label format for the y axis, e.g. dd:mm:ss or dd.dd
    #[arg(long)]
    pub yform: Option<String>,
}

fn parse_levels(s: &str) -> Result<Levels, String> {
    if !s.contains(',') {
        if let Ok(count) = s.trim().parse::<usize>() {
            return Ok(Levels::Count(count));
        }
    }
    s.split(',')
        .map(|v| {
            v.trim()
                .parse::<f64>()
                .map_err(|_| format!("invalid contour level: {}", v))
        })
        .collect::<Result<Vec<_>, _>>()
        .map(Levels::Values)
}

fn parse_position(s: &str) -> Result<(f64, f64), String> {
    let (ra, dec) = s
        .split_once(',')
        .ok_or_else(|| format!("expected RA,DEC but got {}", s))?;
    let ra = ra
        .trim()
        .parse::<f64>()
        .map_err(|_| format!("invalid RA: {}", ra))?;
    let dec = dec
        .trim()
        .parse::<f64>()
        .map_err(|_| format!("invalid Dec: {}", dec))?;
    Ok((ra, dec))
}
