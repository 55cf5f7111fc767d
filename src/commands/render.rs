use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use fits_figure::style::Paint;
use fits_figure::{
    ColorscaleOptions, ContourOptions, FigureOptions, FitsFigure, GridOptions, LabelOptions,
    MarkerOptions, SaveOptions,
};

use crate::cli::{OverlayArgs, ScaleArgs};

pub fn render_figure(
    fits_path: &Path,
    output: Option<PathBuf>,
    options: FigureOptions,
    transparent: bool,
    scale: &ScaleArgs,
    overlays: &OverlayArgs,
) -> Result<()> {
    println!("Loading FITS file: {}", fits_path.display());
    let mut figure = FitsFigure::open(fits_path, options)
        .with_context(|| format!("Failed to open FITS file: {}", fits_path.display()))?;
    println!("Image dimensions: {}x{}", figure.nx(), figure.ny());

    if overlays.xform.is_some() || overlays.yform.is_some() {
        figure.labels(
            LabelOptions {
                xform: overlays.xform.clone(),
                yform: overlays.yform.clone(),
            },
            false,
        )?;
    }

    let colorscale = ColorscaleOptions {
        stretch: scale.stretch,
        exponent: scale.exponent,
        vmin: scale.vmin,
        vmax: scale.vmax,
        cmap: scale.cmap.clone(),
        interpolation: scale.interpolation,
        smooth: scale.smooth,
    };
    if scale.grayscale {
        figure.grayscale(scale.invert.then_some(true), colorscale)?;
    } else {
        figure.colorscale(colorscale)?;
    }
    if let Some((vmin, vmax)) = figure.image_limits() {
        println!("Display range: {:.4} to {:.4}", vmin, vmax);
    }

    if let Some(contour_path) = &overlays.contour {
        println!("Contouring: {}", contour_path.display());
        let colors = (!overlays.contour_colors.is_empty()).then(|| overlays.contour_colors.clone());
        figure.contour(
            contour_path,
            ContourOptions {
                levels: overlays.levels.clone(),
                filled: overlays.filled,
                colors,
                cmap: overlays.contour_cmap.clone(),
                ..ContourOptions::default()
            },
        )?;
    }

    if overlays.grid {
        figure.grid(GridOptions {
            xspacing: overlays.grid_spacing,
            yspacing: overlays.grid_spacing,
            ..GridOptions::default()
        })?;
    }

    if let Some(regions) = &overlays.regions {
        figure.ds9(regions)?;
        println!("Region shapes: {}", figure.patches().len());
    }

    if !overlays.markers.is_empty() {
        let (ra, dec): (Vec<f64>, Vec<f64>) = overlays.markers.iter().copied().unzip();
        figure.markers(
            &ra,
            &dec,
            MarkerOptions {
                edgecolor: overlays.marker_color.map(Paint::Solid),
                size: overlays.marker_size,
                ..MarkerOptions::default()
            },
        )?;
    }

    let output_path = match output {
        Some(path) => path,
        None => {
            let mut path = fits_path.to_path_buf();
            path.set_extension("png");
            path
        }
    };
    figure.save(
        &output_path,
        SaveOptions {
            dpi: None,
            transparent,
        },
    )?;

    println!("{}", figure.layers());
    println!("Saved figure to: {}", output_path.display());
    Ok(())
}
