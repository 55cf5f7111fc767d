use anyhow::{Context, Result};
use serde::Serialize;
use std::path::Path;

use fits_figure::header::Header;
use fits_figure::ticks::LabelFormat;
use fits_figure::wcs::{CoordinateSystem, WorldCoordinates};
use fits_figure::{FigureOptions, FitsFigure};

#[derive(Debug, Serialize)]
struct PositionInfo {
    name: &'static str,
    x: f64,
    y: f64,
    /// `None` where the pixel has no world coordinates
    world: Option<(f64, f64)>,
}

#[derive(Debug, Serialize)]
struct ImageInfo<'a> {
    path: String,
    width: usize,
    height: usize,
    system: CoordinateSystem,
    positions: Vec<PositionInfo>,
    header: &'a Header,
}

pub fn show_info(fits_path: &Path, hdu: usize, format: &str) -> Result<()> {
    let options = FigureOptions {
        hdu,
        ..FigureOptions::default()
    };
    let figure = FitsFigure::open(fits_path, options)
        .with_context(|| format!("Failed to open FITS file: {}", fits_path.display()))?;

    let positions = sample_positions(figure.wcs(), figure.nx(), figure.ny());
    let info = ImageInfo {
        path: fits_path.display().to_string(),
        width: figure.nx(),
        height: figure.ny(),
        system: figure.wcs().system(),
        positions,
        header: &figure.image().header,
    };

    match format.to_lowercase().as_str() {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&info)?);
        }
        _ => {
            println!("{}", format_info(&info));
        }
    }
    Ok(())
}

fn sample_positions(wcs: &dyn WorldCoordinates, nx: usize, ny: usize) -> Vec<PositionInfo> {
    let (w, h) = (nx as f64, ny as f64);
    [
        ("bottom-left", 0.5, 0.5),
        ("bottom-right", w + 0.5, 0.5),
        ("top-left", 0.5, h + 0.5),
        ("top-right", w + 0.5, h + 0.5),
        ("centre", (w + 1.0) / 2.0, (h + 1.0) / 2.0),
    ]
    .into_iter()
    .map(|(name, x, y)| PositionInfo {
        name,
        x,
        y,
        world: wcs.pixel_to_world(x, y),
    })
    .collect()
}

fn format_info(info: &ImageInfo) -> String {
    let mut out = String::new();
    out.push_str(&format!("File: {}\n", info.path));
    out.push_str(&format!("Dimensions: {}x{}\n", info.width, info.height));
    out.push_str(&format!("Coordinate system: {}\n\n", info.system));

    let (lon_format, lat_format) = if info.system.is_equatorial() {
        (
            LabelFormat::Sexagesimal {
                hours: true,
                fields: 3,
                precision: 2,
            },
            LabelFormat::Sexagesimal {
                hours: false,
                fields: 3,
                precision: 1,
            },
        )
    } else {
        let decimal = LabelFormat::Decimal { precision: 6 };
        (decimal, decimal)
    };

    out.push_str("Positions:\n");
    for position in &info.positions {
        let world = match position.world {
            Some((lon, lat)) => format!("{}  {}", lon_format.format(lon), lat_format.format(lat)),
            None => "-".to_string(),
        };
        out.push_str(&format!(
            "  {:<13} ({:>8.1}, {:>8.1})  {}\n",
            position.name, position.x, position.y, world
        ));
    }

    out.push_str("\nHeader:\n");
    for (key, value) in info.header.iter() {
        out.push_str(&format!("  {:<8} = {}\n", key, value));
    }
    out
}
