//! Coordinate grid: lines of constant longitude and latitude traced in pixel
//! coordinates over the current view.

use crate::display::ViewLimits;
use crate::ticks::{tick_values, world_extent};
use crate::wcs::WorldCoordinates;

/// Points per grid line
const LINE_SAMPLES: usize = 100;

/// Trace the grid over a view.
///
/// Each returned polyline is a run of consecutive points that project onto the
/// sky; a line is split wherever the projection fails or jumps across the
/// view.
pub fn grid_lines(
    wcs: &dyn WorldCoordinates,
    view: &ViewLimits,
    lon_spacing: f64,
    lat_spacing: f64,
) -> Vec<Vec<(f64, f64)>> {
    let Some(extent) = world_extent(wcs, view) else {
        return vec![];
    };
    // Pad so lines reach the view corners
    let lon_pad = (extent.lon.1 - extent.lon.0) * 0.05;
    let lat_pad = (extent.lat.1 - extent.lat.0) * 0.05;
    let lon_range = (extent.lon.0 - lon_pad, extent.lon.1 + lon_pad);
    let lat_range = (
        (extent.lat.0 - lat_pad).max(-90.0),
        (extent.lat.1 + lat_pad).min(90.0),
    );

    let max_jump = view.width().max(view.height()) * 0.5;
    let mut lines = Vec::new();

    for lon in tick_values(extent.lon.0, extent.lon.1, lon_spacing) {
        let points = (0..=LINE_SAMPLES).map(|i| {
            let lat = lat_range.0 + (lat_range.1 - lat_range.0) * i as f64 / LINE_SAMPLES as f64;
            wcs.world_to_pixel(lon, lat)
        });
        lines.extend(split_runs(points, max_jump));
    }

    for lat in tick_values(extent.lat.0, extent.lat.1, lat_spacing) {
        let points = (0..=LINE_SAMPLES).map(|i| {
            let lon = lon_range.0 + (lon_range.1 - lon_range.0) * i as f64 / LINE_SAMPLES as f64;
            wcs.world_to_pixel(lon, lat)
        });
        lines.extend(split_runs(points, max_jump));
    }

    lines
}

fn split_runs(
    points: impl Iterator<Item = Option<(f64, f64)>>,
    max_jump: f64,
) -> Vec<Vec<(f64, f64)>> {
    let mut runs = Vec::new();
    let mut current: Vec<(f64, f64)> = Vec::new();

    for point in points {
        match point {
            Some(p) => {
                if let Some(&last) = current.last() {
                    let jump = ((p.0 - last.0).powi(2) + (p.1 - last.1).powi(2)).sqrt();
                    if jump > max_jump {
                        runs.push(std::mem::take(&mut current));
                    }
                }
                current.push(p);
            }
            None => runs.push(std::mem::take(&mut current)),
        }
    }
    runs.push(current);

    runs.retain(|run| run.len() >= 2);
    runs
}
