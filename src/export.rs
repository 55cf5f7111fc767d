//! Writing rendered figures to disk.

use anyhow::{Context, Result};
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{DynamicImage, ExtendedColorType, ImageEncoder, ImageFormat, RgbaImage};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Output format chosen from a file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Png,
    /// PostScript or encapsulated PostScript with the raster embedded
    PostScript { encapsulated: bool },
    /// Any other raster format the `image` crate writes
    Raster(ImageFormat),
}

impl ExportFormat {
    /// Format for a path, `None` when the extension is missing or unknown
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_lowercase();
        match ext.as_str() {
            "png" => Some(ExportFormat::Png),
            "eps" => Some(ExportFormat::PostScript { encapsulated: true }),
            "ps" => Some(ExportFormat::PostScript {
                encapsulated: false,
            }),
            other => ImageFormat::from_extension(other)
                .filter(|f| f.writing_enabled())
                .map(ExportFormat::Raster),
        }
    }

    pub fn is_postscript(self) -> bool {
        matches!(self, ExportFormat::PostScript { .. })
    }
}

/// Write a rendered canvas in the given format
pub fn write_image(image: &RgbaImage, path: &Path, format: ExportFormat, dpi: f64) -> Result<()> {
    match format {
        ExportFormat::Png => write_png(image, path),
        ExportFormat::PostScript { encapsulated } => write_postscript(image, path, dpi, encapsulated),
        ExportFormat::Raster(format) => {
            // Formats without alpha get the image flattened to RGB
            let dynamic = DynamicImage::ImageRgba8(image.clone());
            let result = match format {
                ImageFormat::Jpeg | ImageFormat::Bmp | ImageFormat::Pnm => {
                    dynamic.to_rgb8().save_with_format(path, format)
                }
                _ => dynamic.save_with_format(path, format),
            };
            result.with_context(|| format!("Failed to write image to {}", path.display()))
        }
    }
}

fn write_png(image: &RgbaImage, path: &Path) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("Failed to create output file: {}", path.display()))?;
    let writer = BufWriter::new(file);

    // Create PNG encoder with best compression
    let encoder = PngEncoder::new_with_quality(writer, CompressionType::Best, FilterType::Adaptive);

    encoder
        .write_image(
            image,
            image.width(),
            image.height(),
            ExtendedColorType::Rgba8,
        )
        .with_context(|| format!("Failed to write PNG image to {}", path.display()))?;
    Ok(())
}

/// PostScript page showing the canvas at `dpi`, composited onto white
fn write_postscript(image: &RgbaImage, path: &Path, dpi: f64, encapsulated: bool) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("Failed to create output file: {}", path.display()))?;
    let mut out = BufWriter::new(file);
    write_postscript_to(&mut out, image, dpi, encapsulated)
        .with_context(|| format!("Failed to write PostScript to {}", path.display()))?;
    out.flush()?;
    Ok(())
}

pub(crate) fn write_postscript_to<W: Write>(
    out: &mut W,
    image: &RgbaImage,
    dpi: f64,
    encapsulated: bool,
) -> std::io::Result<()> {
    let (w, h) = image.dimensions();
    let width_pt = w as f64 * 72.0 / dpi;
    let height_pt = h as f64 * 72.0 / dpi;

    if encapsulated {
        writeln!(out, "%!PS-Adobe-3.0 EPSF-3.0")?;
    } else {
        writeln!(out, "%!PS-Adobe-3.0")?;
    }
    writeln!(
        out,
        "%%BoundingBox: 0 0 {} {}",
        width_pt.ceil() as i64,
        height_pt.ceil() as i64
    )?;
    writeln!(out, "%%HiResBoundingBox: 0 0 {:.3} {:.3}", width_pt, height_pt)?;
    writeln!(out, "%%Creator: fits-figure")?;
    writeln!(out, "%%Pages: 1")?;
    writeln!(out, "%%EndComments")?;
    writeln!(out, "%%Page: 1 1")?;
    writeln!(out, "gsave")?;
    writeln!(out, "{:.4} {:.4} scale", width_pt, height_pt)?;
    writeln!(out, "/row {} string def", w * 3)?;
    writeln!(out, "{} {} 8 [{} 0 0 -{} 0 {}]", w, h, w, h, h)?;
    writeln!(out, "{{currentfile row readhexstring pop}} false 3 colorimage")?;

    let mut line = String::with_capacity(80);
    for pixel in image.pixels() {
        let alpha = pixel[3] as u32;
        for c in 0..3 {
            // Composite onto white
            let v = (pixel[c] as u32 * alpha + 255 * (255 - alpha)) / 255;
            line.push_str(&format!("{:02x}", v));
        }
        if line.len() >= 72 {
            writeln!(out, "{}", line)?;
            line.clear();
        }
    }
    if !line.is_empty() {
        writeln!(out, "{}", line)?;
    }

    writeln!(out, "grestore")?;
    writeln!(out, "showpage")?;
    writeln!(out, "%%EOF")?;
    Ok(())
}
