//! Image resampling: block averaging and north-up reprojection.

use anyhow::{bail, Result};

use crate::fits::DecodedImage;
use crate::header::{Header, HeaderValue};
use crate::wcs::{local_pixel_scale, WcsEngine};

/// Block-average an image by `factor` in both axes.
///
/// Dimensions are first truncated to a multiple of `factor`, dropping the
/// trailing columns and rows. NaN pixels are excluded from each block mean;
/// a block with no finite pixels stays NaN.
pub fn block_average(
    data: &[f64],
    width: usize,
    height: usize,
    factor: usize,
) -> (Vec<f64>, usize, usize) {
    if factor <= 1 {
        return (data.to_vec(), width, height);
    }

    let out_w = width / factor;
    let out_h = height / factor;
    let mut out = vec![f64::NAN; out_w * out_h];

    for oy in 0..out_h {
        for ox in 0..out_w {
            let mut sum = 0.0;
            let mut count = 0usize;
            for dy in 0..factor {
                let row = (oy * factor + dy) * width;
                for dx in 0..factor {
                    let v = data[row + ox * factor + dx];
                    if v.is_finite() {
                        sum += v;
                        count += 1;
                    }
                }
            }
            if count > 0 {
                out[oy * out_w + ox] = sum / count as f64;
            }
        }
    }

    (out, out_w, out_h)
}

/// Header describing the same sky after block averaging: the reference pixel
/// and the pixel scale follow the coarser grid.
pub fn downsample_header(header: &Header, factor: usize, width: usize, height: usize) -> Header {
    let mut out = header.clone();
    let f = factor as f64;

    out.set("NAXIS1", HeaderValue::Integer(width as i64));
    out.set("NAXIS2", HeaderValue::Integer(height as i64));

    for axis in 1..=2 {
        let key = format!("CRPIX{}", axis);
        if let Some(crpix) = header.get_f64(&key) {
            // Pixel p of the fine grid sits at (p - 0.5) / f + 0.5 on the coarse one
            out.set(&key, HeaderValue::Float((crpix - 0.5) / f + 0.5));
        }
        let key = format!("CDELT{}", axis);
        if let Some(cdelt) = header.get_f64(&key) {
            out.set(&key, HeaderValue::Float(cdelt * f));
        }
    }

    for key in ["CD1_1", "CD1_2", "CD2_1", "CD2_2"] {
        if let Some(v) = header.get_f64(key) {
            out.set(key, HeaderValue::Float(v * f));
        }
    }

    // SIP terms act on pixel offsets from CRPIX: a term of order p+q scales
    // by f^(p+q-1) when offsets shrink by f
    for (key, value) in header.iter() {
        if let Some(order) = sip_term_order(key) {
            if let Some(v) = value.as_f64() {
                out.set(key, HeaderValue::Float(v * f.powi(order as i32 - 1)));
            }
        }
    }

    out
}

/// Total order `p + q` of a SIP coefficient keyword such as `A_2_1` or `BP_0_3`
fn sip_term_order(key: &str) -> Option<u32> {
    let (prefix, rest) = key.split_once('_')?;
    if !matches!(prefix, "A" | "B" | "AP" | "BP") {
        return None;
    }
    let (p, q) = rest.split_once('_')?;
    Some(p.parse::<u32>().ok()? + q.parse::<u32>().ok()?)
}

/// Polynomial distortion keywords (SIP and TPV)
fn is_distortion_keyword(key: &str) -> bool {
    sip_term_order(key).is_some()
        || matches!(key, "A_ORDER" | "B_ORDER" | "AP_ORDER" | "BP_ORDER")
        || key.starts_with("PV1_")
        || key.starts_with("PV2_")
}

/// Bilinear sample at a FITS pixel position (1-based, pixel centres on integers).
///
/// Returns NaN outside the image or when any contributing pixel is NaN.
pub fn sample_bilinear(image: &DecodedImage, x: f64, y: f64) -> f64 {
    let fx = x - 1.0;
    let fy = y - 1.0;
    if !(fx >= -0.5 && fy >= -0.5 && fx <= image.width as f64 - 0.5 && fy <= image.height as f64 - 0.5) {
        return f64::NAN;
    }

    let max_x = image.width.saturating_sub(1);
    let max_y = image.height.saturating_sub(1);
    let x0 = fx.floor().max(0.0) as usize;
    let y0 = fy.floor().max(0.0) as usize;
    let x1 = (x0 + 1).min(max_x);
    let y1 = (y0 + 1).min(max_y);
    let tx = (fx - x0 as f64).clamp(0.0, 1.0);
    let ty = (fy - y0 as f64).clamp(0.0, 1.0);

    let v00 = image.value(x0, y0);
    let v10 = image.value(x1, y0);
    let v01 = image.value(x0, y1);
    let v11 = image.value(x1, y1);

    let top = v00 * (1.0 - tx) + v10 * tx;
    let bottom = v01 * (1.0 - tx) + v11 * tx;
    top * (1.0 - ty) + bottom * ty
}

/// Reproject an image so that celestial north is up and east is left.
///
/// The output uses a TAN projection centred on the same reference value with
/// the mean input pixel scale. Its size is the bounding box of the input
/// footprint, so no input pixel is lost; output pixels outside the footprint
/// are NaN.
pub fn reproject_north(image: &DecodedImage, engine: &dyn WcsEngine) -> Result<DecodedImage> {
    let source = engine.build(&image.header)?;
    if !source.system().is_celestial() {
        bail!("cannot rotate a non-celestial image to north");
    }

    let cx = (image.width as f64 + 1.0) / 2.0;
    let cy = (image.height as f64 + 1.0) / 2.0;
    let Some((lon0, lat0)) = source.pixel_to_world(cx, cy) else {
        bail!("image centre has no world coordinates");
    };
    let Some(scale) = local_pixel_scale(source.as_ref(), cx, cy) else {
        bail!("cannot determine pixel scale at image centre");
    };

    let mut header = north_header(&image.header, lon0, lat0, scale, 0.0, 0.0, 1, 1);
    let provisional = engine.build(&header)?;

    // Bounding box of the input footprint in the new frame
    let (mut min_x, mut max_x) = (f64::INFINITY, f64::NEG_INFINITY);
    let (mut min_y, mut max_y) = (f64::INFINITY, f64::NEG_INFINITY);
    let w = image.width as f64;
    let h = image.height as f64;
    let steps = 16;
    for i in 0..=steps {
        let t = i as f64 / steps as f64;
        let edge = [
            (0.5 + t * w, 0.5),
            (0.5 + t * w, h + 0.5),
            (0.5, 0.5 + t * h),
            (w + 0.5, 0.5 + t * h),
        ];
        for (x, y) in edge {
            let projected = source
                .pixel_to_world(x, y)
                .and_then(|(lon, lat)| provisional.world_to_pixel(lon, lat));
            if let Some((px, py)) = projected {
                min_x = min_x.min(px);
                max_x = max_x.max(px);
                min_y = min_y.min(py);
                max_y = max_y.max(py);
            }
        }
    }
    if !min_x.is_finite() || !min_y.is_finite() {
        bail!("image footprint could not be projected north-up");
    }

    let out_w = (max_x - min_x).ceil().max(1.0) as usize;
    let out_h = (max_y - min_y).ceil().max(1.0) as usize;
    // Shift so the footprint starts at pixel 0.5
    header = north_header(
        &image.header,
        lon0,
        lat0,
        scale,
        0.5 - min_x,
        0.5 - min_y,
        out_w,
        out_h,
    );
    let target = engine.build(&header)?;

    let mut data = vec![f64::NAN; out_w * out_h];
    for oy in 0..out_h {
        for ox in 0..out_w {
            let value = target
                .pixel_to_world(ox as f64 + 1.0, oy as f64 + 1.0)
                .and_then(|(lon, lat)| source.world_to_pixel(lon, lat))
                .map(|(sx, sy)| sample_bilinear(image, sx, sy))
                .unwrap_or(f64::NAN);
            data[oy * out_w + ox] = value;
        }
    }

    tracing::debug!(
        "Reprojected {}x{} image north-up to {}x{}",
        image.width,
        image.height,
        out_w,
        out_h
    );

    DecodedImage::new(out_w, out_h, data, header)
}

#[allow(clippy::too_many_arguments)]
fn north_header(
    original: &Header,
    lon0: f64,
    lat0: f64,
    scale: f64,
    shift_x: f64,
    shift_y: f64,
    width: usize,
    height: usize,
) -> Header {
    let mut header = original.clone();
    header.retain(|key| !is_distortion_keyword(key));
    for key in [
        "CD1_1", "CD1_2", "CD2_1", "CD2_2", "PC1_1", "PC1_2", "PC2_1", "PC2_2", "CROTA1", "CROTA2",
    ] {
        header.remove(key);
    }

    let (lon_prefix, lat_prefix) = match original.get_str("CTYPE1").unwrap_or("") {
        c if c.starts_with("GLON") => ("GLON", "GLAT"),
        c if c.starts_with("ELON") => ("ELON", "ELAT"),
        _ => ("RA--", "DEC-"),
    };

    header.set("NAXIS1", HeaderValue::Integer(width as i64));
    header.set("NAXIS2", HeaderValue::Integer(height as i64));
    header.set("CTYPE1", HeaderValue::Text(format!("{}-TAN", lon_prefix)));
    header.set("CTYPE2", HeaderValue::Text(format!("{}-TAN", lat_prefix)));
    header.set("CRVAL1", HeaderValue::Float(lon0));
    header.set("CRVAL2", HeaderValue::Float(lat0));
    header.set("CRPIX1", HeaderValue::Float(shift_x));
    header.set("CRPIX2", HeaderValue::Float(shift_y));
    header.set("CDELT1", HeaderValue::Float(-scale));
    header.set("CDELT2", HeaderValue::Float(scale));
    header
}
