//! Scene description and the raster renderer.
//!
//! The figure controller assembles a [`Scene`] from its state; a [`Renderer`]
//! turns it into pixels. Overlays are drawn into a transparent buffer the size
//! of the axes so they are clipped to the frame, then composited.

use anyhow::{bail, Result};
use image::{Rgba, RgbaImage};
use imageproc::drawing::{
    draw_filled_circle_mut, draw_filled_rect_mut, draw_hollow_circle_mut, draw_line_segment_mut,
    Blend,
};
use imageproc::rect::Rect;
use std::str::FromStr;

use crate::display::ViewLimits;
use crate::layers::{Artist, BandGrid, ResolvedMarkerStyle};
use crate::regions::{Shape, ShapeKind};
use crate::style::{Color, Font, MarkerShape};
use crate::text::{
    draw_text, draw_text_centered, draw_text_vertical, scale_for_points, text_height, text_width,
};
use crate::ticks::{Edge, Tick};

/// Fractions of the figure reserved around the axes
const SUBPLOT_LEFT: f64 = 0.125;
const SUBPLOT_RIGHT: f64 = 0.9;
const SUBPLOT_BOTTOM: f64 = 0.1;
const SUBPLOT_TOP: f64 = 0.9;

/// Size of tick labels in points
const TICK_LABEL_POINTS: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interpolation {
    #[default]
    Nearest,
    Bilinear,
}

impl FromStr for Interpolation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "nearest" => Ok(Interpolation::Nearest),
            "bilinear" => Ok(Interpolation::Bilinear),
            _ => Err(format!("unknown interpolation: {}", s)),
        }
    }
}

/// Colour image stretched over a pixel-coordinate extent.
///
/// `pixels` is stored in FITS order: row 0 is the bottom of the extent.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageArtist {
    pub pixels: RgbaImage,
    pub extent: ViewLimits,
    pub interpolation: Interpolation,
}

/// Constant-world lines of the coordinate grid
#[derive(Debug, Clone, PartialEq)]
pub struct GridArtist {
    pub lines: Vec<Vec<(f64, f64)>>,
    pub color: Color,
    pub alpha: f64,
}

/// A tick with its style; only ticks of the primary axes carry labels
#[derive(Debug, Clone, PartialEq)]
pub struct TickArtist {
    pub tick: Tick,
    pub color: Color,
    /// Length in points
    pub size: f64,
    pub labelled: bool,
}

/// Everything needed to draw one frame of the figure
#[derive(Debug, Clone, PartialEq)]
pub struct Scene {
    pub width_in: f64,
    pub height_in: f64,
    pub transparent: bool,
    pub view: ViewLimits,
    pub image: Option<ImageArtist>,
    /// Visible layer primitives in creation order
    pub artists: Vec<Artist>,
    pub patches: Vec<Shape>,
    pub grid: Option<GridArtist>,
    pub ticks: Vec<TickArtist>,
    pub frame_color: Color,
    pub x_label: String,
    pub y_label: String,
    pub label_font: Font,
}

/// Draws a scene at a resolution
pub trait Renderer {
    fn render(&mut self, scene: &Scene, dpi: f64) -> Result<RgbaImage>;
}

/// Axes placement on the canvas
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Layout {
    pub canvas_width: u32,
    pub canvas_height: u32,
    /// Top-left corner and size of the axes, canvas pixels
    pub axes_x: f64,
    pub axes_y: f64,
    pub axes_width: f64,
    pub axes_height: f64,
    pub view: ViewLimits,
}

impl Layout {
    pub fn new(width_in: f64, height_in: f64, dpi: f64, view: ViewLimits) -> Self {
        let canvas_width = (width_in * dpi).round().max(1.0) as u32;
        let canvas_height = (height_in * dpi).round().max(1.0) as u32;
        let (x, y, w, h) = axes_box(width_in, height_in, &view);
        Self {
            canvas_width,
            canvas_height,
            axes_x: x * dpi,
            axes_y: y * dpi,
            axes_width: w * dpi,
            axes_height: h * dpi,
            view,
        }
    }

    /// Pixel coordinate to a position inside the axes buffer
    pub fn to_axes(&self, x: f64, y: f64) -> (f64, f64) {
        let fx = (x - self.view.x.0) / self.view.width();
        let fy = (y - self.view.y.0) / self.view.height();
        (fx * self.axes_width, (1.0 - fy) * self.axes_height)
    }

    /// Inverse of `to_axes`
    pub fn to_data(&self, ax: f64, ay: f64) -> (f64, f64) {
        (
            self.view.x.0 + ax / self.axes_width * self.view.width(),
            self.view.y.0 + (1.0 - ay / self.axes_height) * self.view.height(),
        )
    }

    pub fn to_canvas(&self, x: f64, y: f64) -> (f64, f64) {
        let (ax, ay) = self.to_axes(x, y);
        (ax + self.axes_x, ay + self.axes_y)
    }
}

/// Axes rectangle `(left, top, width, height)` in inches from the top-left of
/// the figure.
///
/// The subplot area is shrunk to the aspect ratio of the view so image pixels
/// stay square, and centred in the space it had.
pub fn axes_box(width_in: f64, height_in: f64, view: &ViewLimits) -> (f64, f64, f64, f64) {
    let avail_w = width_in * (SUBPLOT_RIGHT - SUBPLOT_LEFT);
    let avail_h = height_in * (SUBPLOT_TOP - SUBPLOT_BOTTOM);
    let aspect = view.height() / view.width();

    let (w, h) = if avail_h / avail_w > aspect {
        (avail_w, avail_w * aspect)
    } else {
        (avail_h / aspect, avail_h)
    };

    let left = width_in * SUBPLOT_LEFT + (avail_w - w) / 2.0;
    let top = height_in * (1.0 - SUBPLOT_TOP) + (avail_h - h) / 2.0;
    (left, top, w, h)
}

/// Software renderer on `image` and `imageproc`
#[derive(Debug, Default, Clone, Copy)]
pub struct RasterRenderer;

impl Renderer for RasterRenderer {
    fn render(&mut self, scene: &Scene, dpi: f64) -> Result<RgbaImage> {
        if !(dpi > 0.0) || !(scene.width_in > 0.0) || !(scene.height_in > 0.0) {
            bail!(
                "invalid figure size {}x{} in at {} dpi",
                scene.width_in,
                scene.height_in,
                dpi
            );
        }
        if !(scene.view.width() > 0.0) || !(scene.view.height() > 0.0) {
            bail!("empty view");
        }

        let layout = Layout::new(scene.width_in, scene.height_in, dpi, scene.view);
        let background = if scene.transparent {
            Rgba([255, 255, 255, 0])
        } else {
            Rgba([255, 255, 255, 255])
        };
        let mut canvas = RgbaImage::from_pixel(layout.canvas_width, layout.canvas_height, background);

        let axes_w = layout.axes_width.round().max(1.0) as u32;
        let axes_h = layout.axes_height.round().max(1.0) as u32;
        let mut overlay = Blend(RgbaImage::new(axes_w, axes_h));

        if let Some(image) = &scene.image {
            draw_image(&mut overlay.0, image, &layout);
        }

        for artist in &scene.artists {
            match artist {
                Artist::ContourFill {
                    band, grid, color, ..
                } => draw_band(&mut overlay.0, grid, *band, *color, &layout),
                Artist::ContourLines {
                    paths,
                    closed,
                    color,
                    linewidth,
                    ..
                } => {
                    let width = points_to_px(*linewidth, dpi);
                    for (i, path) in paths.iter().enumerate() {
                        let closed = closed.get(i).copied().unwrap_or(false);
                        draw_path(&mut overlay, path, closed, &layout, color.to_rgba(), width);
                    }
                }
                Artist::Scatter { points, style } => {
                    for &(x, y) in points {
                        draw_marker(&mut overlay, layout.to_axes(x, y), style, dpi);
                    }
                }
            }
        }

        if let Some(grid) = &scene.grid {
            let color = grid.color.with_alpha(grid.alpha).to_rgba();
            for line in &grid.lines {
                draw_path(&mut overlay, line, false, &layout, color, 1.0);
            }
        }

        for shape in &scene.patches {
            draw_shape(&mut overlay, shape, &layout, dpi);
        }

        image::imageops::overlay(
            &mut canvas,
            &overlay.0,
            layout.axes_x.round() as i64,
            layout.axes_y.round() as i64,
        );

        draw_frame(&mut canvas, scene, &layout, dpi);
        Ok(canvas)
    }
}

fn points_to_px(points: f64, dpi: f64) -> f64 {
    (points * dpi / 72.0).max(1.0)
}

fn draw_image(buffer: &mut RgbaImage, image: &ImageArtist, layout: &Layout) {
    let (iw, ih) = image.pixels.dimensions();
    if iw == 0 || ih == 0 {
        return;
    }
    let ext = &image.extent;

    for ay in 0..buffer.height() {
        for ax in 0..buffer.width() {
            let (x, y) = layout.to_data(ax as f64 + 0.5, ay as f64 + 0.5);
            // Fractional position in image pixels, 0 at the extent's lower edge
            let fx = (x - ext.x.0) / ext.width() * iw as f64;
            let fy = (y - ext.y.0) / ext.height() * ih as f64;
            if fx < 0.0 || fy < 0.0 || fx >= iw as f64 || fy >= ih as f64 {
                continue;
            }
            let pixel = match image.interpolation {
                Interpolation::Nearest => *image.pixels.get_pixel(fx as u32, fy as u32),
                Interpolation::Bilinear => bilinear_rgba(&image.pixels, fx - 0.5, fy - 0.5),
            };
            buffer.put_pixel(ax, ay, pixel);
        }
    }
}

fn bilinear_rgba(pixels: &RgbaImage, fx: f64, fy: f64) -> Rgba<u8> {
    let (w, h) = pixels.dimensions();
    let x0 = fx.floor().clamp(0.0, (w - 1) as f64) as u32;
    let y0 = fy.floor().clamp(0.0, (h - 1) as f64) as u32;
    let x1 = (x0 + 1).min(w - 1);
    let y1 = (y0 + 1).min(h - 1);
    let tx = (fx - x0 as f64).clamp(0.0, 1.0);
    let ty = (fy - y0 as f64).clamp(0.0, 1.0);

    let p00 = pixels.get_pixel(x0, y0);
    let p10 = pixels.get_pixel(x1, y0);
    let p01 = pixels.get_pixel(x0, y1);
    let p11 = pixels.get_pixel(x1, y1);
    let mut out = [0u8; 4];
    for c in 0..4 {
        let top = p00[c] as f64 * (1.0 - tx) + p10[c] as f64 * tx;
        let bottom = p01[c] as f64 * (1.0 - tx) + p11[c] as f64 * tx;
        out[c] = (top * (1.0 - ty) + bottom * ty).round() as u8;
    }
    Rgba(out)
}

fn draw_band(buffer: &mut RgbaImage, grid: &BandGrid, band: usize, color: Color, layout: &Layout) {
    let rgba = color.to_rgba();
    for ay in 0..buffer.height() {
        for ax in 0..buffer.width() {
            let (x, y) = layout.to_data(ax as f64 + 0.5, ay as f64 + 0.5);
            // Target pixel p covers [p - 0.5, p + 0.5]
            let gx = (x - 0.5).floor();
            let gy = (y - 0.5).floor();
            if gx < 0.0 || gy < 0.0 {
                continue;
            }
            if grid.band_at(gx as usize, gy as usize) == Some(band) {
                blend_pixel(buffer, ax, ay, rgba);
            }
        }
    }
}

fn blend_pixel(buffer: &mut RgbaImage, x: u32, y: u32, color: Rgba<u8>) {
    use image::Pixel;
    buffer.get_pixel_mut(x, y).blend(&color);
}

/// Polyline in pixel coordinates, `width` in canvas pixels
fn draw_path(
    overlay: &mut Blend<RgbaImage>,
    path: &[(f64, f64)],
    closed: bool,
    layout: &Layout,
    color: Rgba<u8>,
    width: f64,
) {
    let points: Vec<(f32, f32)> = path
        .iter()
        .map(|&(x, y)| {
            let (ax, ay) = layout.to_axes(x, y);
            (ax as f32, ay as f32)
        })
        .collect();
    draw_polyline(overlay, &points, closed, color, width);
}

fn draw_polyline(
    overlay: &mut Blend<RgbaImage>,
    points: &[(f32, f32)],
    closed: bool,
    color: Rgba<u8>,
    width: f64,
) {
    if points.len() < 2 {
        return;
    }
    for pair in points.windows(2) {
        draw_thick_segment(overlay, pair[0], pair[1], color, width);
    }
    if closed {
        draw_thick_segment(overlay, points[points.len() - 1], points[0], color, width);
    }
}

/// Thick lines are drawn as parallel one-pixel segments
fn draw_thick_segment(
    overlay: &mut Blend<RgbaImage>,
    start: (f32, f32),
    end: (f32, f32),
    color: Rgba<u8>,
    width: f64,
) {
    let passes = width.round().max(1.0) as i32;
    if passes == 1 {
        draw_line_segment_mut(overlay, start, end, color);
        return;
    }

    let dx = end.0 - start.0;
    let dy = end.1 - start.1;
    let len = (dx * dx + dy * dy).sqrt();
    if len == 0.0 {
        return;
    }
    let (nx, ny) = (-dy / len, dx / len);
    for i in 0..passes {
        let offset = i as f32 - (passes - 1) as f32 / 2.0;
        draw_line_segment_mut(
            overlay,
            (start.0 + nx * offset, start.1 + ny * offset),
            (end.0 + nx * offset, end.1 + ny * offset),
            color,
        );
    }
}

fn draw_marker(
    overlay: &mut Blend<RgbaImage>,
    (x, y): (f64, f64),
    style: &ResolvedMarkerStyle,
    dpi: f64,
) {
    // `size` is the marker area in points squared
    let radius = style.size.max(0.0).sqrt() / 2.0 * dpi / 72.0;
    let r = radius.round().max(1.0) as i32;
    let (cx, cy) = (x.round() as i32, y.round() as i32);
    let face = style.face.color().map(|c| c.with_alpha(style.alpha).to_rgba());
    let edge = style.edge.color().map(|c| c.with_alpha(style.alpha).to_rgba());
    let line_px = points_to_px(style.linewidth, dpi);

    match style.marker {
        MarkerShape::Circle => {
            if let Some(face) = face {
                draw_filled_circle_mut(overlay, (cx, cy), r, face);
            }
            if let Some(edge) = edge {
                let passes = line_px.round().max(1.0) as i32;
                for k in 0..passes {
                    let rr = r - passes / 2 + k;
                    if rr > 0 {
                        draw_hollow_circle_mut(overlay, (cx, cy), rr, edge);
                    }
                }
            }
        }
        MarkerShape::Square => {
            let side = (2 * r).max(1) as u32;
            let rect = Rect::at(cx - r, cy - r).of_size(side, side);
            if let Some(face) = face {
                draw_filled_rect_mut(overlay, rect, face);
            }
            if let Some(edge) = edge {
                let (x0, y0) = ((cx - r) as f32, (cy - r) as f32);
                let (x1, y1) = ((cx + r) as f32, (cy + r) as f32);
                let corners = [(x0, y0), (x1, y0), (x1, y1), (x0, y1)];
                draw_polyline(overlay, &corners, true, edge, line_px);
            }
        }
        MarkerShape::Plus | MarkerShape::Cross => {
            // Line markers take their colour from the face when there is no edge
            let Some(color) = edge.or(face) else {
                return;
            };
            let (fx, fy, fr) = (cx as f32, cy as f32, r as f32);
            let (a, b) = if style.marker == MarkerShape::Plus {
                (
                    ((fx - fr, fy), (fx + fr, fy)),
                    ((fx, fy - fr), (fx, fy + fr)),
                )
            } else {
                (
                    ((fx - fr, fy - fr), (fx + fr, fy + fr)),
                    ((fx - fr, fy + fr), (fx + fr, fy - fr)),
                )
            };
            draw_thick_segment(overlay, a.0, a.1, color, line_px);
            draw_thick_segment(overlay, b.0, b.1, color, line_px);
        }
    }
}

fn draw_shape(overlay: &mut Blend<RgbaImage>, shape: &Shape, layout: &Layout, dpi: f64) {
    let color = shape.color.to_rgba();
    let width = points_to_px(shape.width, dpi);
    let px_per_pixel = layout.axes_width / layout.view.width();

    let label_at = match &shape.kind {
        ShapeKind::Circle { centre, radius } => {
            let points = ellipse_points(*centre, (*radius, *radius), 0.0);
            draw_path(overlay, &points, true, layout, color, width);
            Some((centre.0, centre.1 + radius))
        }
        ShapeKind::Ellipse {
            centre,
            radii,
            angle,
        } => {
            let points = ellipse_points(*centre, *radii, *angle);
            draw_path(overlay, &points, true, layout, color, width);
            Some((centre.0, centre.1 + radii.0.max(radii.1)))
        }
        ShapeKind::Polygon { points } => {
            draw_path(overlay, points, true, layout, color, width);
            points
                .iter()
                .copied()
                .max_by(|a, b| a.1.total_cmp(&b.1))
        }
        ShapeKind::Point { position } => {
            let (ax, ay) = layout.to_axes(position.0, position.1);
            let half = (3.0 * dpi / 72.0).max(2.0) as f32;
            let (fx, fy) = (ax as f32, ay as f32);
            let corners = [
                (fx - half, fy - half),
                (fx + half, fy - half),
                (fx + half, fy + half),
                (fx - half, fy + half),
            ];
            draw_polyline(overlay, &corners, true, color, width);
            Some(*position)
        }
        ShapeKind::Line { start, end } => {
            draw_path(overlay, &[*start, *end], false, layout, color, width);
            Some(*start)
        }
        ShapeKind::Text { position, text } => {
            let (ax, ay) = layout.to_axes(position.0, position.1);
            let scale = scale_for_points(TICK_LABEL_POINTS, dpi);
            draw_text_centered(&mut overlay.0, ax as i32, ay as i32, text, color, scale);
            None
        }
    };

    if let (Some(label), Some((x, y))) = (&shape.label, label_at) {
        let (ax, ay) = layout.to_axes(x, y);
        let scale = scale_for_points(TICK_LABEL_POINTS, dpi);
        let lift = text_height(scale) as f64 + px_per_pixel.min(4.0);
        draw_text_centered(
            &mut overlay.0,
            ax as i32,
            (ay - lift) as i32,
            label,
            color,
            scale,
        );
    }
}

fn ellipse_points(centre: (f64, f64), radii: (f64, f64), angle: f64) -> Vec<(f64, f64)> {
    const STEPS: usize = 72;
    let (sin, cos) = angle.to_radians().sin_cos();
    (0..STEPS)
        .map(|i| {
            let t = i as f64 / STEPS as f64 * std::f64::consts::TAU;
            let (u, v) = (radii.0 * t.cos(), radii.1 * t.sin());
            (centre.0 + u * cos - v * sin, centre.1 + u * sin + v * cos)
        })
        .collect()
}

/// Frame, ticks, tick labels and axis labels, drawn outside the clip buffer
fn draw_frame(canvas: &mut RgbaImage, scene: &Scene, layout: &Layout, dpi: f64) {
    let mut blend = Blend(std::mem::take(canvas));
    let (x0, y0) = (layout.axes_x as f32, layout.axes_y as f32);
    let (x1, y1) = (
        (layout.axes_x + layout.axes_width) as f32,
        (layout.axes_y + layout.axes_height) as f32,
    );

    let mut label_rows = (0u32, 0u32);
    let tick_scale = scale_for_points(TICK_LABEL_POINTS, dpi);
    let text_color = Color::BLACK.to_rgba();

    for tick in &scene.ticks {
        let length = (tick.size * dpi / 72.0) as f32;
        let color = tick.color.to_rgba();
        let (start, end) = match tick.tick.edge {
            Edge::Bottom | Edge::Top => {
                let (cx, _) = layout.to_canvas(tick.tick.position, scene.view.y.0);
                let cx = cx as f32;
                if tick.tick.edge == Edge::Bottom {
                    ((cx, y1), (cx, y1 - length))
                } else {
                    ((cx, y0), (cx, y0 + length))
                }
            }
            Edge::Left | Edge::Right => {
                let (_, cy) = layout.to_canvas(scene.view.x.0, tick.tick.position);
                let cy = cy as f32;
                if tick.tick.edge == Edge::Left {
                    ((x0, cy), (x0 + length, cy))
                } else {
                    ((x1, cy), (x1 - length, cy))
                }
            }
        };
        draw_line_segment_mut(&mut blend, start, end, color);

        if !tick.labelled {
            continue;
        }
        let pad = (4.0 * dpi / 72.0) as i32;
        match tick.tick.edge {
            Edge::Bottom => {
                let top = y1 as i32 + pad;
                draw_text_centered(
                    &mut blend.0,
                    start.0 as i32,
                    top + text_height(tick_scale) as i32 / 2,
                    &tick.tick.label,
                    text_color,
                    tick_scale,
                );
                label_rows.0 = label_rows.0.max(text_height(tick_scale) + pad as u32);
            }
            Edge::Left => {
                let w = text_width(&tick.tick.label, tick_scale);
                draw_text(
                    &mut blend.0,
                    x0 as i32 - pad - w as i32,
                    start.1 as i32 - text_height(tick_scale) as i32 / 2,
                    &tick.tick.label,
                    text_color,
                    tick_scale,
                );
                label_rows.1 = label_rows.1.max(w + pad as u32);
            }
            _ => {}
        }
    }

    let frame_px = points_to_px(1.0, dpi);
    let corners = [(x0, y0), (x1, y0), (x1, y1), (x0, y1)];
    draw_polyline(&mut blend, &corners, true, scene.frame_color.to_rgba(), frame_px);

    let label_scale = scale_for_points(scene.label_font.size, dpi);
    let gap = (6.0 * dpi / 72.0) as u32;
    if !scene.x_label.is_empty() {
        let cy = y1 as u32 + label_rows.0 + gap + text_height(label_scale) / 2;
        draw_text_centered(
            &mut blend.0,
            ((x0 + x1) / 2.0) as i32,
            cy as i32,
            &scene.x_label,
            text_color,
            label_scale,
        );
    }
    if !scene.y_label.is_empty() {
        let cx = x0 as i32 - (label_rows.1 + gap + text_height(label_scale) / 2) as i32;
        draw_text_vertical(
            &mut blend.0,
            cx,
            ((y0 + y1) / 2.0) as i32,
            &scene.y_label,
            text_color,
            label_scale,
        );
    }

    *canvas = blend.0;
}
