//! The figure controller: one FITS image, its overlays and display settings.

use image::{ImageBuffer, Luma, RgbaImage};
use imageproc::filter::gaussian_blur_f32;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::colormap::Colormap;
use crate::config::FigureOptions;
use crate::contour::{band_boundaries, band_index, line_levels, trace_levels, Levels, Polyline};
use crate::display::{AxisId, DisplayConfig, Spacing, Theme, ViewLimits};
use crate::error::{FigureError, Result};
use crate::export::{self, ExportFormat};
use crate::fits::{DecodedImage, FitsDecoder, ImageDecoder};
use crate::grid::grid_lines;
use crate::header::{Header, HeaderNormalizer, StandardHeaderNormalizer};
use crate::layers::{Artist, BandGrid, LayerRegistry, LayerReport, PrimitiveId, ResolvedMarkerStyle};
use crate::regions::{Ds9RegionParser, RegionParser, Shape};
use crate::render::{
    axes_box, GridArtist, ImageArtist, Interpolation, RasterRenderer, Renderer, Scene, TickArtist,
};
use crate::resample::{block_average, downsample_header, reproject_north, sample_bilinear};
use crate::stretch::{auto_limits, finite_range, PercentileFunction, Stretch};
use crate::style::{Color, Font, FontStyle, MarkerShape, Paint};
use crate::ticks::{default_spacing, edge_ticks, Edge, LabelFormat};
use crate::wcs::{StandardWcsEngine, WcsEngine, WorldCoordinates};

/// Layer that collects primitives nobody named
pub const USER_LAYER: &str = "user";

const X_LABEL: &str = "(R.A. J2000)";
const Y_LABEL: &str = "(Dec. J2000)";

const DEFAULT_EXPONENT: f64 = 2.0;
const DEFAULT_MARKER_SIZE: f64 = 30.0;
const DEFAULT_LINEWIDTH: f64 = 1.0;
const COLORMAP_ENTRIES: usize = 1000;

/// Pluggable collaborators of a figure
pub struct Collaborators {
    pub decoder: Box<dyn ImageDecoder>,
    pub normalizer: Box<dyn HeaderNormalizer>,
    pub engine: Box<dyn WcsEngine>,
    pub renderer: Box<dyn Renderer>,
    pub regions: Box<dyn RegionParser>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            decoder: Box::new(FitsDecoder),
            normalizer: Box::new(StandardHeaderNormalizer),
            engine: Box::new(StandardWcsEngine),
            renderer: Box::new(RasterRenderer),
            regions: Box::new(Ds9RegionParser),
        }
    }
}

/// The loaded image, fixed after construction
#[derive(Clone)]
pub struct ImageData {
    /// Row-major, row 0 at the bottom
    pub data: Vec<f64>,
    pub header: Header,
    pub wcs: Arc<dyn WorldCoordinates>,
    pub nx: usize,
    pub ny: usize,
}

#[derive(Debug, Clone, Default)]
pub struct ColorscaleOptions {
    pub stretch: Stretch,
    /// Exponent of the power stretch, 2 when unset
    pub exponent: Option<f64>,
    /// Lower display bound in stretched units
    pub vmin: Option<f64>,
    pub vmax: Option<f64>,
    /// Colormap name; the theme's colormap when unset
    pub cmap: Option<String>,
    pub interpolation: Interpolation,
    /// Gaussian smoothing sigma in pixels
    pub smooth: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridOptions {
    pub show: bool,
    pub xspacing: Spacing,
    pub yspacing: Spacing,
    pub color: Option<Color>,
    pub alpha: Option<f64>,
}

impl Default for GridOptions {
    fn default() -> Self {
        Self {
            show: true,
            xspacing: Spacing::Auto,
            yspacing: Spacing::Auto,
            color: None,
            alpha: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FrameOptions {
    pub color: Option<Color>,
}

#[derive(Debug, Clone, Default)]
pub struct LabelOptions {
    pub xform: Option<String>,
    pub yform: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct FontOptions {
    pub family: Option<String>,
    pub size: Option<f64>,
    pub style: Option<FontStyle>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TickOptions {
    pub xspacing: Option<Spacing>,
    pub yspacing: Option<Spacing>,
    pub color: Option<Color>,
    /// Tick length in points
    pub size: Option<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct ContourOptions {
    /// Existing layer whose primitives the new contours take over
    pub replace: Option<String>,
    pub levels: Levels,
    pub filled: bool,
    /// Colours cycled over the levels; overrides `cmap`
    pub colors: Option<Vec<Color>>,
    /// Colormap sampled over the levels, `jet` when unset
    pub cmap: Option<String>,
    pub linewidth: Option<f64>,
    pub alpha: Option<f64>,
    /// Header/data unit of the contour image
    pub hdu: usize,
}

#[derive(Debug, Clone, Default)]
pub struct MarkerOptions {
    pub replace: Option<String>,
    pub edgecolor: Option<Paint>,
    pub facecolor: Option<Paint>,
    /// Fill colour; also the edge colour when no edge colour is given
    pub color: Option<Color>,
    /// Marker area in points squared
    pub size: Option<f64>,
    pub marker: Option<MarkerShape>,
    pub linewidth: Option<f64>,
    pub alpha: Option<f64>,
}

impl MarkerOptions {
    fn resolve(&self) -> ResolvedMarkerStyle {
        let edge = self
            .edgecolor
            .unwrap_or_else(|| Paint::Solid(self.color.unwrap_or(Color::RED)));
        let face = self
            .facecolor
            .unwrap_or_else(|| self.color.map(Paint::Solid).unwrap_or(Paint::None));
        ResolvedMarkerStyle {
            edge,
            face,
            size: self.size.unwrap_or(DEFAULT_MARKER_SIZE),
            marker: self.marker.unwrap_or_default(),
            linewidth: self.linewidth.unwrap_or(DEFAULT_LINEWIDTH),
            alpha: self.alpha.unwrap_or(1.0),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SaveOptions {
    /// Output resolution; PostScript output defaults to one image pixel per
    /// device pixel, other formats to the figure dpi
    pub dpi: Option<f64>,
    pub transparent: bool,
}

/// A figure of one FITS image with overlays
pub struct FitsFigure {
    path: PathBuf,
    options: FigureOptions,
    decoder: Box<dyn ImageDecoder>,
    normalizer: Box<dyn HeaderNormalizer>,
    engine: Box<dyn WcsEngine>,
    renderer: Box<dyn Renderer>,
    region_parser: Box<dyn RegionParser>,
    image: ImageData,
    percentiles: PercentileFunction,
    registry: LayerRegistry,
    display: DisplayConfig,
    view: ViewLimits,
    in_view_change: bool,
    listener_runs: usize,
    image_artist: Option<ImageArtist>,
    image_limits: Option<(f64, f64)>,
    grid: Vec<Vec<(f64, f64)>>,
    patches: Vec<Shape>,
    canvas: RgbaImage,
    draw_count: usize,
}

impl FitsFigure {
    /// Open a FITS image with the default collaborators
    pub fn open(path: impl AsRef<Path>, options: FigureOptions) -> Result<Self> {
        Self::with_collaborators(path, options, Collaborators::default())
    }

    pub fn with_collaborators(
        path: impl AsRef<Path>,
        options: FigureOptions,
        collaborators: Collaborators,
    ) -> Result<Self> {
        let path = path.as_ref();
        let Collaborators {
            decoder,
            normalizer,
            engine,
            renderer,
            regions,
        } = collaborators;

        let mut decoded = load_image(decoder.as_ref(), normalizer.as_ref(), path, options.hdu)?;
        if options.north {
            decoded = reproject_north(&decoded, engine.as_ref()).map_err(FigureError::Wcs)?;
            debug!(
                "Reprojected {} to north-up: {}x{}",
                path.display(),
                decoded.width,
                decoded.height
            );
        }
        let mut wcs = engine.build(&decoded.header).map_err(FigureError::Wcs)?;

        if let Some(factor) = options.downsample.filter(|&f| f > 1) {
            let (data, width, height) =
                block_average(&decoded.data, decoded.width, decoded.height, factor);
            let load_error = |source| FigureError::Load {
                path: path.to_path_buf(),
                source,
            };
            if width == 0 || height == 0 {
                return Err(load_error(anyhow::anyhow!(
                    "downsample factor {} exceeds the image size {}x{}",
                    factor,
                    decoded.width,
                    decoded.height
                )));
            }
            let header = downsample_header(&decoded.header, factor, width, height);
            wcs = engine.build(&header).map_err(FigureError::Wcs)?;
            decoded = DecodedImage::new(width, height, data, header).map_err(load_error)?;
            debug!("Downsampled by {} to {}x{}", factor, width, height);
        }

        let percentiles = PercentileFunction::new(&decoded.data);
        let image = ImageData {
            data: decoded.data,
            header: decoded.header,
            wcs,
            nx: decoded.width,
            ny: decoded.height,
        };
        info!(
            "Opened {}: {}x{} pixels, {} coordinates",
            path.display(),
            image.nx,
            image.ny,
            image.wcs.system()
        );

        let mut figure = Self {
            path: path.to_path_buf(),
            view: ViewLimits::full(image.nx, image.ny),
            options,
            decoder,
            normalizer,
            engine,
            renderer,
            region_parser: regions,
            image,
            percentiles,
            registry: LayerRegistry::new(),
            display: DisplayConfig::default(),
            in_view_change: false,
            listener_runs: 0,
            image_artist: None,
            image_limits: None,
            grid: Vec::new(),
            patches: Vec::new(),
            canvas: RgbaImage::new(0, 0),
            draw_count: 0,
        };

        figure.reset_view();
        figure.display.for_all_axes(|axis| axis.tick_spacing = Spacing::Auto);
        let (x_format, y_format) = if figure.image.wcs.system().is_equatorial() {
            (LabelFormat::HMS, LabelFormat::DMS)
        } else {
            let decimal = LabelFormat::Decimal { precision: 4 };
            (decimal, decimal)
        };
        figure.display.set_pair(true, |axis| axis.label_format = x_format);
        figure.display.set_pair(false, |axis| axis.label_format = y_format);
        figure.update_default_spacing();
        figure.display.show_grid = false;
        figure.display.for_all_axes(|axis| axis.grid_spacing = Spacing::Auto);
        figure.theme(figure.options.theme, false)?;
        Ok(figure)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn options(&self) -> &FigureOptions {
        &self.options
    }

    pub fn image(&self) -> &ImageData {
        &self.image
    }

    pub fn wcs(&self) -> &dyn WorldCoordinates {
        self.image.wcs.as_ref()
    }

    pub fn nx(&self) -> usize {
        self.image.nx
    }

    pub fn ny(&self) -> usize {
        self.image.ny
    }

    pub fn display(&self) -> &DisplayConfig {
        &self.display
    }

    pub fn registry(&self) -> &LayerRegistry {
        &self.registry
    }

    pub fn patches(&self) -> &[Shape] {
        &self.patches
    }

    /// The last rendered canvas
    pub fn canvas(&self) -> &RgbaImage {
        &self.canvas
    }

    /// Number of completed redraws
    pub fn draw_count(&self) -> usize {
        self.draw_count
    }

    pub fn view_limits(&self) -> ViewLimits {
        self.view
    }

    /// `(vmin, vmax)` of the current colour scale, in stretched units
    pub fn image_limits(&self) -> Option<(f64, f64)> {
        self.image_limits
    }

    // ---- view ----

    /// Show the whole image
    pub fn reset_view(&mut self) {
        self.apply_view(ViewLimits::full(self.image.nx, self.image.ny));
    }

    /// Change the extent of both views and redraw
    pub fn set_view(&mut self, view: ViewLimits) -> Result<()> {
        self.apply_view(view);
        self.refresh()
    }

    fn apply_view(&mut self, view: ViewLimits) {
        self.view = view;
        if self.in_view_change {
            return;
        }
        self.in_view_change = true;
        self.on_view_change();
        self.in_view_change = false;
    }

    fn on_view_change(&mut self) {
        self.listener_runs += 1;
        self.update_default_spacing();
    }

    fn update_default_spacing(&mut self) {
        let (x, y) = default_spacing(
            self.image.wcs.as_ref(),
            &self.view,
            &self.display[AxisId::PrimaryX].label_format,
            &self.display[AxisId::PrimaryY].label_format,
        );
        self.display.set_pair(true, |axis| axis.default_spacing = x);
        self.display.set_pair(false, |axis| axis.default_spacing = y);
        if self.display.show_grid {
            self.update_grid();
        }
    }

    fn update_grid(&mut self) {
        self.grid = grid_lines(
            self.image.wcs.as_ref(),
            &self.view,
            self.display[AxisId::PrimaryX].grid_step(),
            self.display[AxisId::PrimaryY].grid_step(),
        );
    }

    // ---- display ----

    pub fn theme(&mut self, theme: Theme, refresh: bool) -> Result<()> {
        self.display.apply_theme(theme);
        debug!("Applied theme {:?}", theme);
        self.maybe_refresh(refresh)
    }

    /// Grayscale rendering; `invert` defaults to the theme's preference
    pub fn grayscale(&mut self, invert: Option<bool>, mut options: ColorscaleOptions) -> Result<()> {
        let invert = invert.unwrap_or(self.display.theme.invert_grayscale);
        let cmap = if invert {
            Colormap::GistYarg
        } else {
            Colormap::Gray
        };
        options.cmap = Some(cmap.name().to_string());
        self.colorscale(options)
    }

    pub fn colorscale(&mut self, options: ColorscaleOptions) -> Result<()> {
        let cmap = match &options.cmap {
            Some(name) => name
                .parse::<Colormap>()
                .map_err(|_| FigureError::UnknownColormap(name.clone()))?,
            None => self.display.theme.colormap,
        };
        let exponent = options.exponent.unwrap_or(DEFAULT_EXPONENT);

        let stretched = match options.smooth.filter(|&s| s > 0.0) {
            Some(sigma) => {
                let smoothed = smooth(&self.image.data, self.image.nx, self.image.ny, sigma);
                options.stretch.apply_all(&smoothed, exponent)
            }
            None => options.stretch.apply_all(&self.image.data, exponent),
        };

        let (vmin, vmax) = match (options.vmin, options.vmax) {
            (Some(lo), Some(hi)) => (lo, hi),
            (lo, hi) => {
                let auto = self.auto_limits(options.stretch, exponent, &stretched);
                (lo.unwrap_or(auto.0), hi.unwrap_or(auto.1))
            }
        };
        debug!(
            "Colour scale {:?} with {}: vmin={} vmax={}",
            options.stretch,
            cmap.name(),
            vmin,
            vmax
        );

        let lut = cmap.lut(COLORMAP_ENTRIES);
        let span = vmax - vmin;
        let nx = self.image.nx;
        let pixels = RgbaImage::from_fn(self.image.nx as u32, self.image.ny as u32, |x, y| {
            let v = stretched[y as usize * nx + x as usize];
            if !v.is_finite() {
                return image::Rgba([0, 0, 0, 0]);
            }
            let t = if span > 0.0 { (v - vmin) / span } else { 0.0 };
            let index = (t.clamp(0.0, 1.0) * (lut.len() - 1) as f64).round() as usize;
            lut[index].to_rgba()
        });

        self.image_artist = Some(ImageArtist {
            pixels,
            extent: ViewLimits::full(self.image.nx, self.image.ny),
            interpolation: options.interpolation,
        });
        self.image_limits = Some((vmin, vmax));
        self.display.x_label = X_LABEL.to_string();
        self.display.y_label = Y_LABEL.to_string();
        self.refresh()
    }

    fn auto_limits(&self, stretch: Stretch, exponent: f64, stretched: &[f64]) -> (f64, f64) {
        if let Some(limits) = auto_limits(&self.percentiles, stretch, exponent) {
            return limits;
        }
        warn!(
            "Stretched percentile is not finite for {:?}, using the finite data range",
            stretch
        );
        finite_range(stretched).unwrap_or((0.0, 1.0))
    }

    /// Show a pre-rendered colour picture over the image extent
    pub fn rgb(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let picture = image::open(path).map_err(|e| FigureError::Load {
            path: path.to_path_buf(),
            source: e.into(),
        })?;
        let pixels = image::imageops::flip_vertical(&picture.to_rgba8());

        self.image_artist = Some(ImageArtist {
            pixels,
            extent: ViewLimits::full(self.image.nx, self.image.ny),
            interpolation: Interpolation::Nearest,
        });
        self.display.x_label = X_LABEL.to_string();
        self.display.y_label = Y_LABEL.to_string();
        self.refresh()
    }

    pub fn grid(&mut self, options: GridOptions) -> Result<()> {
        self.display.show_grid = options.show;
        self.display
            .set_pair(true, |axis| axis.grid_spacing = options.xspacing);
        self.display
            .set_pair(false, |axis| axis.grid_spacing = options.yspacing);
        if let Some(color) = options.color {
            self.display.grid_color = Some(color);
        }
        if let Some(alpha) = options.alpha {
            self.display.grid_alpha = Some(alpha);
        }
        if options.show {
            self.update_grid();
        } else {
            self.grid.clear();
        }
        self.refresh()
    }

    pub fn frame(&mut self, options: FrameOptions, refresh: bool) -> Result<()> {
        if let Some(color) = options.color {
            self.display.frame_color = color;
        }
        self.maybe_refresh(refresh)
    }

    pub fn labels(&mut self, options: LabelOptions, refresh: bool) -> Result<()> {
        let parse = |form: &Option<String>| -> Result<Option<LabelFormat>> {
            form.as_deref()
                .map(|f| {
                    f.parse::<LabelFormat>()
                        .map_err(|_| FigureError::InvalidLabelFormat(f.to_string()))
                })
                .transpose()
        };
        let x_format = parse(&options.xform)?;
        let y_format = parse(&options.yform)?;

        if let Some(format) = x_format {
            self.display.set_pair(true, |axis| axis.label_format = format);
        }
        if let Some(format) = y_format {
            self.display.set_pair(false, |axis| axis.label_format = format);
        }
        self.update_default_spacing();
        self.maybe_refresh(refresh)
    }

    pub fn xylabels(&mut self, options: FontOptions, refresh: bool) -> Result<()> {
        self.display.label_font = Font {
            family: options.family.unwrap_or_else(|| Font::default().family),
            size: options.size.unwrap_or(Font::default().size),
            style: options.style.unwrap_or_default(),
        };
        self.display.x_label = X_LABEL.to_string();
        self.display.y_label = Y_LABEL.to_string();
        self.maybe_refresh(refresh)
    }

    pub fn ticks(&mut self, options: TickOptions, refresh: bool) -> Result<()> {
        if let Some(spacing) = options.xspacing {
            self.display.set_pair(true, |axis| axis.tick_spacing = spacing);
        }
        if let Some(spacing) = options.yspacing {
            self.display.set_pair(false, |axis| axis.tick_spacing = spacing);
        }
        if let Some(color) = options.color {
            self.display.for_all_axes(|axis| axis.tick_color = color);
        }
        if let Some(size) = options.size {
            self.display.for_all_axes(|axis| axis.tick_size = size);
        }
        self.maybe_refresh(refresh)
    }

    // ---- layers ----

    /// Contour another image over this one
    pub fn contour(&mut self, path: impl AsRef<Path>, options: ContourOptions) -> Result<()> {
        let path = path.as_ref();
        self.check_replace(options.replace.as_deref())?;
        let cmap = match &options.cmap {
            Some(name) => name
                .parse::<Colormap>()
                .map_err(|_| FigureError::UnknownColormap(name.clone()))?,
            None => Colormap::Jet,
        };

        let source = load_image(
            self.decoder.as_ref(),
            self.normalizer.as_ref(),
            path,
            options.hdu,
        )?;
        let source_wcs = self.engine.build(&source.header).map_err(FigureError::Wcs)?;

        if let Some(name) = &options.replace {
            self.registry.remove(name)?;
        }
        self.registry.sweep(USER_LAYER);

        let artists = match finite_range(&source.data) {
            Some((min, max)) if options.filled => {
                self.filled_contours(&source, source_wcs.as_ref(), &options, cmap, min, max)
            }
            Some((min, max)) => {
                self.line_contours(&source, source_wcs.as_ref(), &options, cmap, min, max)
            }
            None => {
                warn!("Contour image {} has no finite pixels", path.display());
                Vec::new()
            }
        };
        for artist in artists {
            self.registry.add(artist);
        }

        let name = match options.replace {
            Some(name) => name,
            None => self.registry.next_contour_name(),
        };
        self.registry.sweep(&name);
        self.refresh()
    }

    fn line_contours(
        &self,
        source: &DecodedImage,
        source_wcs: &dyn WorldCoordinates,
        options: &ContourOptions,
        cmap: Colormap,
        min: f64,
        max: f64,
    ) -> Vec<Artist> {
        let levels = line_levels(&options.levels, min, max);
        let colors = level_colors(&levels, options.colors.as_deref(), cmap);
        let alpha = options.alpha.unwrap_or(1.0);
        let linewidth = options.linewidth.unwrap_or(DEFAULT_LINEWIDTH);

        trace_levels(&source.data, source.width, source.height, &levels)
            .into_iter()
            .zip(colors)
            .filter_map(|(traced, color)| {
                let mut paths = Vec::new();
                let mut closed = Vec::new();
                for line in &traced.lines {
                    let runs = reproject_line(line, source_wcs, self.image.wcs.as_ref());
                    let whole = runs.len() == 1 && runs[0].len() == line.points.len();
                    for run in runs {
                        closed.push(line.closed && whole);
                        paths.push(run);
                    }
                }
                if paths.is_empty() {
                    return None;
                }
                Some(Artist::ContourLines {
                    level: traced.level,
                    paths,
                    closed,
                    color: color.with_alpha(alpha),
                    linewidth,
                })
            })
            .collect()
    }

    fn filled_contours(
        &self,
        source: &DecodedImage,
        source_wcs: &dyn WorldCoordinates,
        options: &ContourOptions,
        cmap: Colormap,
        min: f64,
        max: f64,
    ) -> Vec<Artist> {
        let boundaries = band_boundaries(&options.levels, min, max);
        if boundaries.len() < 2 {
            return Vec::new();
        }

        // Band index of every target pixel, sampled through the sky
        let (nx, ny) = (self.image.nx, self.image.ny);
        let target = self.image.wcs.as_ref();
        let mut bands = Vec::with_capacity(nx * ny);
        for y in 0..ny {
            for x in 0..nx {
                let band = target
                    .pixel_to_world(x as f64 + 1.0, y as f64 + 1.0)
                    .and_then(|(lon, lat)| source_wcs.world_to_pixel(lon, lat))
                    .map(|(sx, sy)| sample_bilinear(source, sx, sy))
                    .and_then(|v| band_index(&boundaries, v));
                bands.push(band);
            }
        }
        let grid = Arc::new(BandGrid {
            width: nx,
            height: ny,
            bands,
        });

        let mids: Vec<f64> = boundaries.windows(2).map(|b| 0.5 * (b[0] + b[1])).collect();
        let colors = level_colors(&mids, options.colors.as_deref(), cmap);
        let alpha = options.alpha.unwrap_or(1.0);
        boundaries
            .windows(2)
            .zip(colors)
            .enumerate()
            .map(|(band, (bounds, color))| Artist::ContourFill {
                band,
                lower: bounds[0],
                upper: bounds[1],
                grid: Arc::clone(&grid),
                color: color.with_alpha(alpha),
            })
            .collect()
    }

    /// Scatter markers at sky positions, in degrees
    pub fn markers(&mut self, xw: &[f64], yw: &[f64], options: MarkerOptions) -> Result<()> {
        if xw.len() != yw.len() {
            return Err(FigureError::CoordinateMismatch {
                xw: xw.len(),
                yw: yw.len(),
            });
        }
        self.check_replace(options.replace.as_deref())?;

        let wcs = self.image.wcs.as_ref();
        let points: Vec<(f64, f64)> = xw
            .iter()
            .zip(yw)
            .filter_map(|(&lon, &lat)| wcs.world_to_pixel(lon, lat))
            .filter(|(x, y)| x.is_finite() && y.is_finite())
            .collect();
        if points.len() < xw.len() {
            debug!("Dropped {} markers outside the projection", xw.len() - points.len());
        }

        if let Some(name) = &options.replace {
            self.registry.remove(name)?;
        }
        self.registry.sweep(USER_LAYER);
        self.registry.add(Artist::Scatter {
            points,
            style: options.resolve(),
        });
        let name = match options.replace {
            Some(name) => name,
            None => self.registry.next_scatter_name(),
        };
        self.registry.sweep(&name);
        self.refresh()
    }

    fn check_replace(&self, replace: Option<&str>) -> Result<()> {
        match replace {
            Some(name) if !self.registry.exists(name) => {
                Err(FigureError::LayerNotFound(name.to_string()))
            }
            _ => Ok(()),
        }
    }

    /// Draw directly on the axes; the primitive joins a layer at the next sweep
    pub fn add_primitive(&mut self, artist: Artist) -> PrimitiveId {
        self.registry.add(artist)
    }

    pub fn name_empty_layers(&mut self, name: &str) -> bool {
        self.registry.sweep(name)
    }

    pub fn layers(&self) -> LayerReport {
        self.registry.report()
    }

    pub fn layer_exists(&self, name: &str) -> bool {
        self.registry.exists(name)
    }

    pub fn remove(&mut self, name: &str) -> Result<()> {
        self.registry.remove(name)?;
        self.refresh()
    }

    pub fn hide(&mut self, name: &str) -> Result<()> {
        self.registry.hide(name)?;
        self.refresh()
    }

    pub fn show(&mut self, name: &str) -> Result<()> {
        self.registry.show(name)?;
        self.refresh()
    }

    // ---- regions ----

    /// Overlay the shapes of a DS9 region file
    pub fn ds9(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let shapes = self
            .region_parser
            .parse(path, self.image.wcs.as_ref())
            .map_err(|source| FigureError::Regions {
                path: path.to_path_buf(),
                source,
            })?;
        debug!("Loaded {} region shapes from {}", shapes.len(), path.display());
        self.patches.extend(shapes);
        self.refresh()
    }

    // ---- drawing ----

    /// Everything the renderer needs to draw the figure
    pub fn scene(&self, transparent: bool) -> Scene {
        let wcs = self.image.wcs.as_ref();
        let mut ticks = Vec::new();
        for (edge, axis, labelled) in [
            (Edge::Bottom, AxisId::PrimaryX, true),
            (Edge::Left, AxisId::PrimaryY, true),
            (Edge::Top, AxisId::TwinX, false),
            (Edge::Right, AxisId::TwinY, false),
        ] {
            let config = &self.display[axis];
            ticks.extend(
                edge_ticks(wcs, &self.view, edge, config.tick_step(), &config.label_format)
                    .into_iter()
                    .map(|tick| TickArtist {
                        tick,
                        color: config.tick_color,
                        size: config.tick_size,
                        labelled,
                    }),
            );
        }

        let grid = self.display.show_grid.then(|| GridArtist {
            lines: self.grid.clone(),
            color: self.display.effective_grid_color(),
            alpha: self.display.effective_grid_alpha(),
        });

        Scene {
            width_in: self.options.width_in,
            height_in: self.options.height_in,
            transparent,
            view: self.view,
            image: self.image_artist.clone(),
            artists: self
                .registry
                .visible_primitives()
                .map(|p| p.artist.clone())
                .collect(),
            patches: self.patches.clone(),
            grid,
            ticks,
            frame_color: self.display.frame_color,
            x_label: self.display.x_label.clone(),
            y_label: self.display.y_label.clone(),
            label_font: self.display.label_font.clone(),
        }
    }

    /// Redraw the canvas
    pub fn refresh(&mut self) -> Result<()> {
        let scene = self.scene(false);
        self.canvas = self
            .renderer
            .render(&scene, self.options.dpi)
            .map_err(FigureError::Render)?;
        self.draw_count += 1;
        Ok(())
    }

    fn maybe_refresh(&mut self, refresh: bool) -> Result<()> {
        if refresh {
            self.refresh()
        } else {
            Ok(())
        }
    }

    /// Resolution at which one image pixel covers one output pixel
    pub fn native_dpi(&self) -> f64 {
        let (_, _, width, _) = axes_box(self.options.width_in, self.options.height_in, &self.view);
        self.view.width() / width
    }

    /// Render the figure and write it to `path`; the format follows the
    /// extension
    pub fn save(&mut self, path: impl AsRef<Path>, options: SaveOptions) -> Result<()> {
        let path = path.as_ref();
        let format = ExportFormat::from_path(path)
            .ok_or_else(|| FigureError::UnsupportedFormat(path.to_path_buf()))?;

        let dpi = match options.dpi {
            Some(dpi) => dpi,
            None if format.is_postscript() => {
                let dpi = self.native_dpi();
                info!("Auto-setting resolution to {:.2} dpi", dpi);
                dpi
            }
            None => self.options.dpi,
        };

        let scene = self.scene(options.transparent);
        let rendered = self
            .renderer
            .render(&scene, dpi)
            .map_err(FigureError::Render)?;
        export::write_image(&rendered, path, format, dpi).map_err(|source| {
            FigureError::Export {
                path: path.to_path_buf(),
                source,
            }
        })?;
        info!(
            "Saved {} ({}x{} at {:.1} dpi)",
            path.display(),
            rendered.width(),
            rendered.height(),
            dpi
        );
        Ok(())
    }
}

fn load_image(
    decoder: &dyn ImageDecoder,
    normalizer: &dyn HeaderNormalizer,
    path: &Path,
    hdu: usize,
) -> Result<DecodedImage> {
    let load_error = |source| FigureError::Load {
        path: path.to_path_buf(),
        source,
    };
    let mut decoded = decoder.decode(path, hdu).map_err(load_error)?;
    decoded.header = normalizer
        .normalize(std::mem::take(&mut decoded.header))
        .map_err(load_error)?;
    Ok(decoded)
}

/// Map a contour polyline from its own pixel frame into the target frame,
/// splitting it where a point has no counterpart
fn reproject_line(
    line: &Polyline,
    from: &dyn WorldCoordinates,
    to: &dyn WorldCoordinates,
) -> Vec<Vec<(f64, f64)>> {
    let mut runs = Vec::new();
    let mut current = Vec::new();
    for &(x, y) in &line.points {
        let mapped = from
            .pixel_to_world(x, y)
            .and_then(|(lon, lat)| to.world_to_pixel(lon, lat))
            .filter(|(tx, ty)| tx.is_finite() && ty.is_finite());
        match mapped {
            Some(point) => current.push(point),
            None => {
                if current.len() > 1 {
                    runs.push(std::mem::take(&mut current));
                } else {
                    current.clear();
                }
            }
        }
    }
    if current.len() > 1 {
        runs.push(current);
    }
    runs
}

/// Colour per level: explicit colours cycle, otherwise the map is sampled
/// across the level values
fn level_colors(levels: &[f64], colors: Option<&[Color]>, cmap: Colormap) -> Vec<Color> {
    if let Some(colors) = colors.filter(|c| !c.is_empty()) {
        return colors.iter().copied().cycle().take(levels.len()).collect();
    }
    let (first, last) = match (levels.first(), levels.last()) {
        (Some(&first), Some(&last)) => (first, last),
        _ => return Vec::new(),
    };
    levels
        .iter()
        .map(|&level| {
            let t = if last > first {
                (level - first) / (last - first)
            } else {
                0.5
            };
            cmap.sample(t)
        })
        .collect()
}

/// Gaussian smoothing; blank pixels stay blank
fn smooth(data: &[f64], width: usize, height: usize, sigma: f64) -> Vec<f64> {
    let buffer: ImageBuffer<Luma<f32>, Vec<f32>> =
        ImageBuffer::from_fn(width as u32, height as u32, |x, y| {
            let v = data[y as usize * width + x as usize];
            Luma([if v.is_finite() { v as f32 } else { 0.0 }])
        });
    let blurred = gaussian_blur_f32(&buffer, sigma as f32);
    data.iter()
        .zip(blurred.pixels())
        .map(|(&orig, p)| if orig.is_finite() { p[0] as f64 } else { f64::NAN })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        gaussian_image, linear_header, tan_cards, tan_header, write_fits_f32, CountingRenderer,
        FakeDecoder,
    };
    use std::cell::Cell;
    use std::fs;
    use std::rc::Rc;
    use tempfile::tempdir;

    const N: usize = 20;

    fn sky_image() -> DecodedImage {
        DecodedImage::new(N, N, gaussian_image(N, N, 3.0), tan_header(N, N, (10.0, 20.0), 0.001))
            .unwrap()
    }

    fn figure_with(decoder: FakeDecoder) -> (FitsFigure, Rc<Cell<usize>>) {
        let renderer = CountingRenderer::new();
        let count = Rc::clone(&renderer.count);
        let collaborators = Collaborators {
            decoder: Box::new(decoder),
            renderer: Box::new(renderer),
            ..Collaborators::default()
        };
        let figure =
            FitsFigure::with_collaborators("main.fits", FigureOptions::default(), collaborators)
                .unwrap();
        (figure, count)
    }

    fn figure() -> (FitsFigure, Rc<Cell<usize>>) {
        figure_with(
            FakeDecoder::new()
                .with_image("main.fits", sky_image())
                .with_image("contour.fits", sky_image()),
        )
    }

    fn owned_primitives(figure: &FitsFigure, name: &str) -> Vec<PrimitiveId> {
        figure.registry().primitives_in(name).map(|p| p.id).collect()
    }

    #[test]
    fn test_initial_view_covers_image() {
        let (figure, count) = figure();
        assert_eq!(figure.view_limits(), ViewLimits::full(N, N));
        assert_eq!(figure.view_limits().x, (0.5, N as f64 + 0.5));
        assert_eq!(figure.draw_count(), 0);
        assert_eq!(count.get(), 0);

        let rect = DecodedImage::new(15, 7, vec![1.0; 105], linear_header(15, 7)).unwrap();
        let (figure, _) = figure_with(FakeDecoder::new().with_image("main.fits", rect));
        assert_eq!(figure.view_limits().x, (0.5, 15.5));
        assert_eq!(figure.view_limits().y, (0.5, 7.5));
    }

    #[test]
    fn test_label_formats_follow_coordinate_system() {
        let (figure, _) = figure();
        assert_eq!(figure.display()[AxisId::PrimaryX].label_format, LabelFormat::HMS);
        assert_eq!(figure.display()[AxisId::TwinY].label_format, LabelFormat::DMS);
        assert!(!figure.display().show_grid);

        let flat = DecodedImage::new(4, 4, vec![0.0; 16], linear_header(4, 4)).unwrap();
        let (figure, _) = figure_with(FakeDecoder::new().with_image("main.fits", flat));
        assert!(!figure.display()[AxisId::PrimaryX].label_format.is_sexagesimal());
    }

    #[test]
    fn test_missing_image_is_load_error() {
        let err = FitsFigure::with_collaborators(
            "absent.fits",
            FigureOptions::default(),
            Collaborators {
                decoder: Box::new(FakeDecoder::new()),
                ..Collaborators::default()
            },
        )
        .err()
        .unwrap();
        assert!(matches!(err, FigureError::Load { .. }));
    }

    #[test]
    fn test_downsample_shrinks_grid_and_keeps_sky() {
        let options = FigureOptions {
            downsample: Some(3),
            ..FigureOptions::default()
        };
        let collaborators = Collaborators {
            decoder: Box::new(FakeDecoder::new().with_image("main.fits", sky_image())),
            renderer: Box::new(CountingRenderer::new()),
            ..Collaborators::default()
        };
        let figure = FitsFigure::with_collaborators("main.fits", options, collaborators).unwrap();
        assert_eq!((figure.nx(), figure.ny()), (6, 6));
        assert_eq!(figure.view_limits(), ViewLimits::full(6, 6));

        // The downsampled grid still spans the same patch of sky
        let (lon, lat) = figure.wcs().pixel_to_world(0.5, 0.5).unwrap();
        let full = StandardWcsEngine.build(&tan_header(N, N, (10.0, 20.0), 0.001)).unwrap();
        let (lon0, lat0) = full.pixel_to_world(0.5, 0.5).unwrap();
        assert!((lon - lon0).abs() < 1e-6 && (lat - lat0).abs() < 1e-6);
    }

    #[test]
    fn test_hide_show_flags_follow_last_call() {
        let (mut figure, _) = figure();
        figure.markers(&[10.0], &[20.0], MarkerOptions::default()).unwrap();

        figure.hide("scatter_set_1").unwrap();
        assert!(!figure.registry().layer("scatter_set_1").unwrap().visible);
        assert!(figure.registry().primitives_in("scatter_set_1").all(|p| !p.visible));
        assert_eq!(figure.scene(false).artists.len(), 0);

        figure.show("scatter_set_1").unwrap();
        assert!(figure.registry().layer("scatter_set_1").unwrap().visible);
        assert_eq!(figure.scene(false).artists.len(), 1);
    }

    #[test]
    fn test_remove_leaves_nothing_behind() {
        let (mut figure, _) = figure();
        figure.contour("contour.fits", ContourOptions::default()).unwrap();
        assert!(!owned_primitives(&figure, "contour_set_1").is_empty());

        figure.remove("contour_set_1").unwrap();
        assert!(!figure.layer_exists("contour_set_1"));
        assert!(owned_primitives(&figure, "contour_set_1").is_empty());
        assert!(figure.registry().is_empty());
    }

    #[test]
    fn test_unknown_layer_is_an_error() {
        let (mut figure, count) = figure();
        for result in [
            figure.hide("nope"),
            figure.show("nope"),
            figure.remove("nope"),
        ] {
            assert!(matches!(result, Err(FigureError::LayerNotFound(ref n)) if n == "nope"));
        }
        assert_eq!(count.get(), 0);
    }

    #[test]
    fn test_contour_names_never_reused() {
        let (mut figure, _) = figure();
        figure.contour("contour.fits", ContourOptions::default()).unwrap();
        figure.contour("contour.fits", ContourOptions::default()).unwrap();
        assert!(figure.layer_exists("contour_set_1"));
        assert!(figure.layer_exists("contour_set_2"));

        figure.remove("contour_set_1").unwrap();
        figure.contour("contour.fits", ContourOptions::default()).unwrap();
        assert!(figure.layer_exists("contour_set_3"));
        assert!(!figure.layer_exists("contour_set_1"));
    }

    #[test]
    fn test_contour_replace_swaps_primitives() {
        let (mut figure, _) = figure();
        figure.contour("contour.fits", ContourOptions::default()).unwrap();
        figure.contour("contour.fits", ContourOptions::default()).unwrap();
        let before = owned_primitives(&figure, "contour_set_1");
        let layer_count = figure.registry().layers().len();

        figure
            .contour(
                "contour.fits",
                ContourOptions {
                    replace: Some("contour_set_1".to_string()),
                    levels: Levels::Values(vec![50.0]),
                    ..ContourOptions::default()
                },
            )
            .unwrap();

        let after = owned_primitives(&figure, "contour_set_1");
        assert_eq!(after.len(), 1);
        assert!(after.iter().all(|id| !before.contains(id)));
        assert_eq!(figure.registry().layers().len(), layer_count);
        assert!(!figure.layer_exists("contour_set_3"));
    }

    #[test]
    fn test_contour_replace_missing_layer_changes_nothing() {
        let (mut figure, count) = figure();
        figure.contour("contour.fits", ContourOptions::default()).unwrap();
        let layers = figure.registry().layers().to_vec();
        let primitives = figure.registry().primitives().len();
        let draws = count.get();

        let result = figure.contour(
            "contour.fits",
            ContourOptions {
                replace: Some("nonexistent".to_string()),
                ..ContourOptions::default()
            },
        );
        assert!(matches!(result, Err(FigureError::LayerNotFound(_))));
        assert_eq!(figure.registry().layers(), layers.as_slice());
        assert_eq!(figure.registry().primitives().len(), primitives);
        assert_eq!(count.get(), draws);
    }

    #[test]
    fn test_contour_colors_cycle() {
        let (mut figure, _) = figure();
        figure
            .contour(
                "contour.fits",
                ContourOptions {
                    levels: Levels::Values(vec![20.0, 40.0, 60.0]),
                    colors: Some(vec![Color::WHITE, Color::BLUE]),
                    ..ContourOptions::default()
                },
            )
            .unwrap();
        let colors: Vec<Color> = figure
            .registry()
            .primitives()
            .iter()
            .filter_map(|p| match &p.artist {
                Artist::ContourLines { color, .. } => Some(*color),
                _ => None,
            })
            .collect();
        assert_eq!(colors, vec![Color::WHITE, Color::BLUE, Color::WHITE]);
    }

    #[test]
    fn test_filled_contours_cover_the_peak() {
        let (mut figure, _) = figure();
        figure
            .contour(
                "contour.fits",
                ContourOptions {
                    filled: true,
                    levels: Levels::Values(vec![0.0, 50.0, 200.0]),
                    ..ContourOptions::default()
                },
            )
            .unwrap();
        let fills: Vec<_> = figure
            .registry()
            .primitives_in("contour_set_1")
            .filter_map(|p| match &p.artist {
                Artist::ContourFill { band, grid, .. } => Some((*band, Arc::clone(grid))),
                _ => None,
            })
            .collect();
        assert_eq!(fills.len(), 2);
        let grid = &fills[0].1;
        // Centre above 50, corner below
        assert_eq!(grid.band_at(N / 2, N / 2), Some(1));
        assert_eq!(grid.band_at(0, 0), Some(0));
    }

    #[test]
    fn test_contour_unknown_colormap() {
        let (mut figure, _) = figure();
        let result = figure.contour(
            "contour.fits",
            ContourOptions {
                cmap: Some("viridis".to_string()),
                ..ContourOptions::default()
            },
        );
        assert!(matches!(result, Err(FigureError::UnknownColormap(_))));
        assert!(figure.registry().is_empty());
    }

    #[test]
    fn test_colorscale_default_limits() {
        let (mut figure, count) = figure();
        figure.colorscale(ColorscaleOptions::default()).unwrap();
        assert_eq!(count.get(), 1);

        let expected = auto_limits(
            &PercentileFunction::new(&gaussian_image(N, N, 3.0)),
            Stretch::Linear,
            2.0,
        )
        .unwrap();
        let (vmin, vmax) = figure.image_limits().unwrap();
        assert!((vmin - expected.0).abs() < 1e-12);
        assert!((vmax - expected.1).abs() < 1e-12);
        assert!(vmin < 1.0 && vmax > 98.0);
        assert_eq!(figure.display().x_label, "(R.A. J2000)");

        figure
            .colorscale(ColorscaleOptions {
                vmin: Some(5.0),
                ..ColorscaleOptions::default()
            })
            .unwrap();
        assert_eq!(figure.image_limits(), Some((5.0, expected.1)));
    }

    #[test]
    fn test_colorscale_log_falls_back_to_finite_range() {
        let mut data = gaussian_image(N, N, 3.0);
        for v in data.iter_mut().take(N * 2) {
            *v = -1.0;
        }
        let peak = data.iter().copied().fold(f64::MIN, f64::max);
        let image = DecodedImage::new(N, N, data, tan_header(N, N, (10.0, 20.0), 0.001)).unwrap();
        let (mut figure, _) = figure_with(FakeDecoder::new().with_image("main.fits", image));
        figure
            .colorscale(ColorscaleOptions {
                stretch: Stretch::Log,
                ..ColorscaleOptions::default()
            })
            .unwrap();
        let (vmin, vmax) = figure.image_limits().unwrap();
        assert!(vmin.is_finite() && vmax.is_finite());
        assert!((vmax - peak.log10()).abs() < 1e-12);
    }

    #[test]
    fn test_colorscale_unknown_colormap() {
        let (mut figure, count) = figure();
        let result = figure.colorscale(ColorscaleOptions {
            cmap: Some("rainbow".into()),
            ..ColorscaleOptions::default()
        });
        assert!(matches!(result, Err(FigureError::UnknownColormap(ref n)) if n == "rainbow"));
        assert_eq!(count.get(), 0);
        assert!(figure.image_limits().is_none());
    }

    #[test]
    fn test_grayscale_inversion_follows_theme() {
        let (mut figure, _) = figure();
        figure.grayscale(None, ColorscaleOptions::default()).unwrap();
        let pixels = &figure.scene(false).image.unwrap().pixels;
        // Faint corner is dark when not inverted
        assert!(pixels.get_pixel(0, 0)[0] < 40);

        figure.theme(Theme::Publication, false).unwrap();
        figure.grayscale(None, ColorscaleOptions::default()).unwrap();
        let pixels = &figure.scene(false).image.unwrap().pixels;
        assert!(pixels.get_pixel(0, 0)[0] > 215);
    }

    #[test]
    fn test_smoothing_lowers_the_peak() {
        let (mut figure, _) = figure();
        let options = ColorscaleOptions {
            vmin: Some(0.0),
            vmax: Some(101.0),
            cmap: Some("gray".into()),
            ..ColorscaleOptions::default()
        };
        figure.colorscale(options.clone()).unwrap();
        let sharp = figure.scene(false).image.unwrap().pixels;
        figure
            .colorscale(ColorscaleOptions {
                smooth: Some(3.0),
                ..options
            })
            .unwrap();
        let smooth = figure.scene(false).image.unwrap().pixels;
        let centre = (N as u32 / 2, N as u32 / 2);
        assert!(smooth.get_pixel(centre.0, centre.1)[0] < sharp.get_pixel(centre.0, centre.1)[0]);
    }

    #[test]
    fn test_markers_default_style() {
        let (mut figure, _) = figure();
        figure.markers(&[10.0], &[20.0], MarkerOptions::default()).unwrap();

        assert!(figure.layer_exists("scatter_set_1"));
        let owned: Vec<_> = figure.registry().primitives_in("scatter_set_1").collect();
        assert_eq!(owned.len(), 1);
        match &owned[0].artist {
            Artist::Scatter { points, style } => {
                assert_eq!(points.len(), 1);
                let (x, y) = points[0];
                assert!((x - 10.5).abs() < 1e-6 && (y - 10.5).abs() < 1e-6);
                assert_eq!(style.edge, Paint::Solid(Color::RED));
                assert_eq!(style.face, Paint::None);
                assert_eq!(style.size, 30.0);
            }
            other => panic!("unexpected artist {:?}", other),
        }
    }

    #[test]
    fn test_marker_fill_colour_and_explicit_edge() {
        let options = MarkerOptions {
            color: Some(Color::BLUE),
            ..MarkerOptions::default()
        };
        let style = options.resolve();
        assert_eq!(style.face, Paint::Solid(Color::BLUE));
        assert_eq!(style.edge, Paint::Solid(Color::BLUE));

        let options = MarkerOptions {
            color: Some(Color::BLUE),
            edgecolor: Some(Paint::None),
            size: Some(5.0),
            ..MarkerOptions::default()
        };
        let style = options.resolve();
        assert_eq!(style.edge, Paint::None);
        assert_eq!(style.size, 5.0);
    }

    #[test]
    fn test_direct_primitives_swept_into_user() {
        let (mut figure, _) = figure();
        let id = figure.add_primitive(Artist::Scatter {
            points: vec![(3.0, 3.0)],
            style: MarkerOptions::default().resolve(),
        });
        figure.markers(&[10.0], &[20.0], MarkerOptions::default()).unwrap();

        assert!(figure.layer_exists(USER_LAYER));
        assert_eq!(owned_primitives(&figure, USER_LAYER), vec![id]);
        assert_eq!(owned_primitives(&figure, "scatter_set_1").len(), 1);
        assert_eq!(
            figure.layers().to_string(),
            "There are 2 layers in this figure:\n\n   -> user\n   -> scatter_set_1"
        );
    }

    #[test]
    fn test_markers_replace_keeps_name() {
        let (mut figure, _) = figure();
        figure.markers(&[10.0], &[20.0], MarkerOptions::default()).unwrap();
        let before = owned_primitives(&figure, "scatter_set_1");
        let layer_count = figure.registry().layers().len();

        figure
            .markers(
                &[10.0, 10.001],
                &[20.0, 20.001],
                MarkerOptions {
                    replace: Some("scatter_set_1".to_string()),
                    ..MarkerOptions::default()
                },
            )
            .unwrap();

        let after = owned_primitives(&figure, "scatter_set_1");
        assert_eq!(after.len(), 1);
        assert!(after.iter().all(|id| !before.contains(id)));
        assert_eq!(figure.registry().layers().len(), layer_count);
        assert_eq!(figure.registry().len(), 1);
        match &figure.registry().primitives_in("scatter_set_1").next().unwrap().artist {
            Artist::Scatter { points, .. } => assert_eq!(points.len(), 2),
            other => panic!("unexpected artist {other:?}"),
        }

        // Replacing does not consume a scatter name
        figure.markers(&[10.0], &[20.0], MarkerOptions::default()).unwrap();
        assert!(figure.layer_exists("scatter_set_2"));
        assert!(!figure.layer_exists("scatter_set_3"));
    }

    #[test]
    fn test_markers_replace_missing_layer_changes_nothing() {
        let (mut figure, count) = figure();
        figure.markers(&[10.0], &[20.0], MarkerOptions::default()).unwrap();
        let layers = figure.registry().layers().to_vec();
        let primitives = figure.registry().primitives().len();
        let draws = count.get();

        let result = figure.markers(
            &[10.0],
            &[20.0],
            MarkerOptions {
                replace: Some("nonexistent".to_string()),
                ..MarkerOptions::default()
            },
        );
        assert!(matches!(result, Err(FigureError::LayerNotFound(ref n)) if n == "nonexistent"));
        assert_eq!(figure.registry().layers(), layers.as_slice());
        assert_eq!(figure.registry().primitives().len(), primitives);
        assert_eq!(count.get(), draws);
    }

    #[test]
    fn test_markers_length_mismatch() {
        let (mut figure, _) = figure();
        let result = figure.markers(&[1.0, 2.0], &[1.0], MarkerOptions::default());
        assert!(matches!(
            result,
            Err(FigureError::CoordinateMismatch { xw: 2, yw: 1 })
        ));
        assert!(figure.registry().is_empty());
    }

    #[test]
    fn test_invalid_label_format_changes_nothing() {
        let (mut figure, _) = figure();
        let result = figure.labels(
            LabelOptions {
                xform: Some("dd.ddd".into()),
                yform: Some("banana".into()),
            },
            true,
        );
        assert!(matches!(result, Err(FigureError::InvalidLabelFormat(ref f)) if f == "banana"));
        assert_eq!(figure.display()[AxisId::PrimaryX].label_format, LabelFormat::HMS);

        figure
            .labels(
                LabelOptions {
                    xform: Some("ddd.dd".into()),
                    yform: None,
                },
                false,
            )
            .unwrap();
        assert_eq!(
            figure.display()[AxisId::TwinX].label_format,
            LabelFormat::Decimal { precision: 2 }
        );
        assert_eq!(figure.display()[AxisId::PrimaryY].label_format, LabelFormat::DMS);
    }

    #[test]
    fn test_refresh_flag_controls_redraw() {
        let (mut figure, count) = figure();
        figure.frame(FrameOptions { color: Some(Color::RED) }, false).unwrap();
        figure
            .ticks(
                TickOptions {
                    xspacing: Some(Spacing::Fixed(0.005)),
                    size: Some(3.0),
                    ..TickOptions::default()
                },
                false,
            )
            .unwrap();
        assert_eq!(count.get(), 0);
        assert_eq!(figure.display().frame_color, Color::RED);
        assert_eq!(figure.display()[AxisId::TwinX].tick_step(), 0.005);
        assert_eq!(figure.display()[AxisId::TwinY].tick_size, 3.0);

        figure
            .xylabels(
                FontOptions {
                    size: Some(16.0),
                    ..FontOptions::default()
                },
                true,
            )
            .unwrap();
        assert_eq!(count.get(), 1);
        assert_eq!(figure.draw_count(), 1);
        assert_eq!(figure.display().label_font.family, "serif");
        assert_eq!(figure.display().label_font.size, 16.0);
    }

    #[test]
    fn test_theme_switch() {
        let (mut figure, _) = figure();
        figure.theme(Theme::Publication, true).unwrap();
        assert_eq!(figure.display().frame_color, Color::BLACK);
        assert_eq!(figure.display()[AxisId::PrimaryY].tick_color, Color::BLACK);
        assert!(figure.display().theme.invert_grayscale);
        assert_eq!(figure.draw_count(), 1);
    }

    #[test]
    fn test_grid_overrides_and_lines() {
        let (mut figure, _) = figure();
        figure
            .grid(GridOptions {
                color: Some(Color::YELLOW),
                ..GridOptions::default()
            })
            .unwrap();
        let grid = figure.scene(false).grid.unwrap();
        assert!(!grid.lines.is_empty());
        assert_eq!(grid.color, Color::YELLOW);
        assert_eq!(grid.alpha, 0.5);

        figure
            .grid(GridOptions {
                show: false,
                ..GridOptions::default()
            })
            .unwrap();
        assert!(figure.scene(false).grid.is_none());
    }

    #[test]
    fn test_set_view_runs_listener_once() {
        let (mut figure, count) = figure();
        let runs = figure.listener_runs;
        let half = ViewLimits {
            x: (0.5, 10.5),
            y: (0.5, 10.5),
        };
        figure.set_view(half).unwrap();
        assert_eq!(figure.listener_runs, runs + 1);
        assert_eq!(figure.view_limits(), half);
        assert_eq!(count.get(), 1);

        // A nested change only moves the limits
        figure.in_view_change = true;
        figure.apply_view(ViewLimits::full(N, N));
        assert_eq!(figure.listener_runs, runs + 1);
        assert_eq!(figure.view_limits(), ViewLimits::full(N, N));
        figure.in_view_change = false;

        figure.reset_view();
        assert_eq!(figure.listener_runs, runs + 2);
    }

    #[test]
    fn test_scene_ticks_labelled_on_primary_edges_only() {
        let (figure, _) = figure();
        let scene = figure.scene(false);
        assert!(!scene.ticks.is_empty());
        for tick in &scene.ticks {
            let primary = matches!(tick.tick.edge, Edge::Bottom | Edge::Left);
            assert_eq!(tick.labelled, primary);
            assert_eq!(tick.size, 7.0);
        }
    }

    #[test]
    fn test_ds9_regions_become_patches() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("stars.reg");
        fs::write(&path, "image\ncircle(5,5,2) # color=red\npoint(8,8)\n").unwrap();

        let (mut figure, count) = figure();
        figure.ds9(&path).unwrap();
        assert_eq!(figure.patches().len(), 2);
        assert_eq!(figure.patches()[0].color, Color::RED);
        assert!(figure.registry().is_empty());
        assert_eq!(count.get(), 1);

        let missing = figure.ds9(dir.path().join("missing.reg"));
        assert!(matches!(missing, Err(FigureError::Regions { .. })));
    }

    #[test]
    fn test_save_unsupported_format() {
        let (mut figure, count) = figure();
        let result = figure.save("figure.xyz", SaveOptions::default());
        assert!(matches!(result, Err(FigureError::UnsupportedFormat(_))));
        assert_eq!(count.get(), 0);
    }

    #[test]
    fn test_native_dpi_maps_pixels_one_to_one() {
        let (figure, _) = figure();
        // Square image in a square figure: axes are 0.775 of 10 inches wide
        assert!((figure.native_dpi() - N as f64 / 7.75).abs() < 1e-9);
    }

    #[test]
    fn test_end_to_end_from_fits_file() {
        let dir = tempdir().unwrap();
        let fits = dir.path().join("field.fits");
        let data: Vec<f32> = gaussian_image(32, 32, 4.0).iter().map(|&v| v as f32).collect();
        let cards = tan_cards(32, 32, (150.0, 2.0), 0.0005);
        let cards: Vec<(&str, &str)> = cards.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        write_fits_f32(&fits, 32, 32, &data, &cards).unwrap();

        let options = FigureOptions {
            width_in: 3.0,
            height_in: 3.0,
            dpi: 40.0,
            ..FigureOptions::default()
        };
        let mut figure = FitsFigure::open(&fits, options).unwrap();
        assert_eq!((figure.nx(), figure.ny()), (32, 32));
        assert!(figure.wcs().system().is_equatorial());

        figure.colorscale(ColorscaleOptions::default()).unwrap();
        figure.contour(&fits, ContourOptions::default()).unwrap();
        figure.markers(&[150.0], &[2.0], MarkerOptions::default()).unwrap();
        figure.grid(GridOptions::default()).unwrap();
        assert_eq!(figure.canvas().dimensions(), (120, 120));

        let png = dir.path().join("field.png");
        figure.save(&png, SaveOptions::default()).unwrap();
        assert_eq!(image::open(&png).unwrap().width(), 120);

        let eps = dir.path().join("field.EPS");
        figure.save(&eps, SaveOptions::default()).unwrap();
        let text = fs::read_to_string(&eps).unwrap();
        assert!(text.starts_with("%!PS-Adobe-3.0 EPSF-3.0"));
    }
}
