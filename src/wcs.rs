//! World coordinate systems.
//!
//! Pixel coordinates follow the FITS convention: the first pixel is centred on
//! `(1.0, 1.0)` and spans `[0.5, 1.5]`. World coordinates are degrees.

use anyhow::{anyhow, bail, Context, Result};
use nalgebra::{Matrix2, Vector2};
use regex::Regex;
use serde_json::{Map, Value};
use std::f64::consts::PI;
use std::fmt;
use std::sync::Arc;
use wcs::{ImgXY, LonLat, WCSParams, WCS};

use crate::header::Header;

const R2D: f64 = 180.0 / PI;
const D2R: f64 = PI / 180.0;

/// Celestial frame of the world axes
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum CoordinateSystem {
    Fk5,
    Fk4,
    Icrs,
    Galactic,
    Ecliptic,
    /// No celestial frame: linear or pixel axes
    Pixel,
}

impl CoordinateSystem {
    pub fn is_equatorial(self) -> bool {
        matches!(
            self,
            CoordinateSystem::Fk5 | CoordinateSystem::Fk4 | CoordinateSystem::Icrs
        )
    }

    pub fn is_celestial(self) -> bool {
        self != CoordinateSystem::Pixel
    }
}

impl fmt::Display for CoordinateSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CoordinateSystem::Fk5 => "fk5",
            CoordinateSystem::Fk4 => "fk4",
            CoordinateSystem::Icrs => "icrs",
            CoordinateSystem::Galactic => "galactic",
            CoordinateSystem::Ecliptic => "ecliptic",
            CoordinateSystem::Pixel => "pixel",
        };
        f.write_str(name)
    }
}

/// Pixel <-> world transform for one image
pub trait WorldCoordinates {
    /// Convert a pixel position to `(lon, lat)` in degrees
    fn pixel_to_world(&self, x: f64, y: f64) -> Option<(f64, f64)>;

    /// Convert `(lon, lat)` in degrees to a pixel position
    fn world_to_pixel(&self, lon: f64, lat: f64) -> Option<(f64, f64)>;

    fn system(&self) -> CoordinateSystem;

    /// Whether the first world axis is an angle that wraps at 360 degrees
    fn wraps_longitude(&self) -> bool {
        self.system().is_celestial()
    }
}

/// Builds a transform from a (normalized) header
pub trait WcsEngine {
    fn build(&self, header: &Header) -> Result<Arc<dyn WorldCoordinates>>;
}

/// Default engine producing [`Wcs`] transforms
#[derive(Debug, Default, Clone, Copy)]
pub struct StandardWcsEngine;

impl WcsEngine for StandardWcsEngine {
    fn build(&self, header: &Header) -> Result<Arc<dyn WorldCoordinates>> {
        Ok(Arc::new(Wcs::from_header(header)?))
    }
}

/// Projected or linear WCS for one image.
///
/// Celestial headers are handed to the `wcs` crate, which also applies SIP and
/// TPV distortion. Headers without a celestial CTYPE get an affine transform.
pub struct Wcs {
    kind: WcsKind,
    system: CoordinateSystem,
}

enum WcsKind {
    Celestial(Box<WCS>),
    Linear {
        crpix: Vector2<f64>,
        crval: Vector2<f64>,
        cd: Matrix2<f64>,
        cd_inv: Matrix2<f64>,
    },
}

impl fmt::Debug for Wcs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.kind {
            WcsKind::Celestial(_) => "celestial",
            WcsKind::Linear { .. } => "linear",
        };
        f.debug_struct("Wcs")
            .field("kind", &kind)
            .field("system", &self.system)
            .finish()
    }
}

impl Wcs {
    pub fn from_header(header: &Header) -> Result<Self> {
        let ctype1 = header.get_str("CTYPE1").unwrap_or("").trim().to_ascii_uppercase();
        let ctype2 = header.get_str("CTYPE2").unwrap_or("").trim().to_ascii_uppercase();
        let system = detect_system(header, &ctype1);

        let cd = linear_matrix(header);
        let cd_inv = cd
            .try_inverse()
            .ok_or_else(|| anyhow!("WCS linear transformation matrix is singular"))?;

        let kind = if is_projected(&ctype1) {
            if !is_projected(&ctype2) || ctype1[4..] != ctype2[4..] {
                bail!("CTYPE1 '{}' and CTYPE2 '{}' disagree on projection", ctype1, ctype2);
            }
            let params = projection_params(header, &ctype1, &ctype2)?;
            let wcs = WCS::new(&params)
                .map_err(|e| anyhow!("{}", e))
                .with_context(|| format!("Failed to build {} projection", &ctype1[4..]))?;
            WcsKind::Celestial(Box::new(wcs))
        } else {
            WcsKind::Linear {
                crpix: Vector2::new(
                    header.get_f64("CRPIX1").unwrap_or(0.0),
                    header.get_f64("CRPIX2").unwrap_or(0.0),
                ),
                crval: Vector2::new(
                    header.get_f64("CRVAL1").unwrap_or(0.0),
                    header.get_f64("CRVAL2").unwrap_or(0.0),
                ),
                cd,
                cd_inv,
            }
        };

        Ok(Self { kind, system })
    }

    /// Whether pixel positions go through a sky projection
    pub fn is_projected(&self) -> bool {
        matches!(self.kind, WcsKind::Celestial(_))
    }
}

impl WorldCoordinates for Wcs {
    fn pixel_to_world(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        match &self.kind {
            WcsKind::Celestial(wcs) => {
                let lonlat = wcs.unproj(&ImgXY::new(x, y))?;
                let (lon, lat) = (lonlat.lon() * R2D, lonlat.lat() * R2D);
                if lon.is_finite() && lat.is_finite() {
                    Some((normalize_lon(lon), lat))
                } else {
                    None
                }
            }
            WcsKind::Linear { crpix, crval, cd, .. } => {
                let world = cd * (Vector2::new(x, y) - crpix) + crval;
                let lon = if self.wraps_longitude() { normalize_lon(world.x) } else { world.x };
                Some((lon, world.y))
            }
        }
    }

    fn world_to_pixel(&self, lon: f64, lat: f64) -> Option<(f64, f64)> {
        let (px, py) = match &self.kind {
            WcsKind::Celestial(wcs) => {
                let pixel = wcs.proj(&LonLat::new(normalize_lon(lon) * D2R, lat * D2R))?;
                (pixel.x(), pixel.y())
            }
            WcsKind::Linear { crpix, crval, cd_inv, .. } => {
                let mut offset = Vector2::new(lon, lat) - crval;
                if self.wraps_longitude() {
                    offset.x = (offset.x + 180.0).rem_euclid(360.0) - 180.0;
                }
                let pixel = cd_inv * offset + crpix;
                (pixel.x, pixel.y)
            }
        };
        if px.is_finite() && py.is_finite() {
            Some((px, py))
        } else {
            None
        }
    }

    fn system(&self) -> CoordinateSystem {
        self.system
    }
}

/// CTYPE of a sky axis with a projection code, e.g. `RA---TAN` or `GLON-TAN-SIP`
fn is_projected(ctype: &str) -> bool {
    ctype.len() >= 8
        && ctype.is_ascii()
        && ["RA--", "DEC-", "GLON", "GLAT", "ELON", "ELAT"].contains(&&ctype[..4])
}

/// Projection parameters in the native frame of the image.
///
/// The sky axes are presented as ICRS so that the `wcs` crate returns native
/// longitude and latitude; the frame itself is tracked by [`CoordinateSystem`].
fn projection_params(header: &Header, ctype1: &str, ctype2: &str) -> Result<WCSParams> {
    let keyword = Regex::new(
        r"^(NAXIS[12]|CRPIX[12]|CRVAL[12]|CDELT[12]|CROTA[12]|CD[12]_[12]|PC[12]_[12]|PV[12]_\d{1,2}|LONPOLE|LATPOLE|(A|B|AP|BP)_ORDER|(A|B|AP|BP)_\d_\d)$",
    )?;

    let mut cards = Map::new();
    for (key, value) in header.iter() {
        if !keyword.is_match(key) {
            continue;
        }
        let value = if key.starts_with("NAXIS") || key.ends_with("_ORDER") {
            value.as_i64().map(Value::from)
        } else {
            value.as_f64().map(Value::from)
        };
        if let Some(value) = value {
            cards.insert(key.to_string(), value);
        }
    }

    cards.insert("NAXIS".into(), Value::from(2));
    cards.insert("CTYPE1".into(), Value::from(format!("RA--{}", &ctype1[4..])));
    cards.insert("CTYPE2".into(), Value::from(format!("DEC-{}", &ctype2[4..])));
    cards.insert("RADESYS".into(), Value::from("ICRS"));

    serde_json::from_value(Value::Object(cards)).context("Invalid WCS keywords")
}

/// Build the CD matrix from CD, PC+CDELT or CDELT+CROTA2 keywords
fn linear_matrix(header: &Header) -> Matrix2<f64> {
    let cd_keys = ["CD1_1", "CD1_2", "CD2_1", "CD2_2"];
    if cd_keys.iter().any(|k| header.contains(k)) {
        let get = |k: &str| header.get_f64(k).unwrap_or(0.0);
        return Matrix2::new(get("CD1_1"), get("CD1_2"), get("CD2_1"), get("CD2_2"));
    }

    let cdelt1 = header.get_f64("CDELT1").unwrap_or(1.0);
    let cdelt2 = header.get_f64("CDELT2").unwrap_or(1.0);

    let pc_keys = ["PC1_1", "PC1_2", "PC2_1", "PC2_2"];
    if pc_keys.iter().any(|k| header.contains(k)) {
        let pc = Matrix2::new(
            header.get_f64("PC1_1").unwrap_or(1.0),
            header.get_f64("PC1_2").unwrap_or(0.0),
            header.get_f64("PC2_1").unwrap_or(0.0),
            header.get_f64("PC2_2").unwrap_or(1.0),
        );
        return Matrix2::from_diagonal(&Vector2::new(cdelt1, cdelt2)) * pc;
    }

    let rho = header.get_f64("CROTA2").unwrap_or(0.0) * D2R;
    Matrix2::new(
        cdelt1 * rho.cos(),
        -cdelt2 * rho.sin(),
        cdelt1 * rho.sin(),
        cdelt2 * rho.cos(),
    )
}

fn detect_system(header: &Header, ctype1: &str) -> CoordinateSystem {
    if ctype1.starts_with("RA") {
        let radesys = header
            .get_str("RADESYS")
            .map(|s| s.trim().to_ascii_uppercase());
        match radesys.as_deref() {
            Some("ICRS") => CoordinateSystem::Icrs,
            Some("FK4") | Some("FK4-NO-E") => CoordinateSystem::Fk4,
            Some(_) => CoordinateSystem::Fk5,
            None => match header.get_f64("EQUINOX") {
                Some(eq) if eq < 1984.0 => CoordinateSystem::Fk4,
                _ => CoordinateSystem::Fk5,
            },
        }
    } else if ctype1.starts_with("GLON") {
        CoordinateSystem::Galactic
    } else if ctype1.starts_with("ELON") {
        CoordinateSystem::Ecliptic
    } else {
        CoordinateSystem::Pixel
    }
}

fn normalize_lon(lon: f64) -> f64 {
    lon.rem_euclid(360.0)
}

/// Local pixel scale in degrees per pixel around `(x, y)`
pub fn local_pixel_scale(wcs: &dyn WorldCoordinates, x: f64, y: f64) -> Option<f64> {
    let (lon0, lat0) = wcs.pixel_to_world(x, y)?;
    let (lon1, lat1) = wcs.pixel_to_world(x, y + 1.0)?;
    if wcs.system().is_celestial() {
        Some(angular_separation(lon0, lat0, lon1, lat1))
    } else {
        Some(((lon1 - lon0).powi(2) + (lat1 - lat0).powi(2)).sqrt())
    }
}

/// Great-circle separation in degrees
pub fn angular_separation(lon1: f64, lat1: f64, lon2: f64, lat2: f64) -> f64 {
    let (l1, b1, l2, b2) = (lon1 * D2R, lat1 * D2R, lon2 * D2R, lat2 * D2R);
    let sdlat = ((b2 - b1) / 2.0).sin();
    let sdlon = ((l2 - l1) / 2.0).sin();
    let a = sdlat * sdlat + b1.cos() * b2.cos() * sdlon * sdlon;
    2.0 * a.sqrt().min(1.0).asin() * R2D
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::HeaderValue;

    fn tan_header(crval: (f64, f64), cdelt: f64) -> Header {
        let mut header = Header::new();
        header.set("NAXIS1", HeaderValue::Integer(100));
        header.set("NAXIS2", HeaderValue::Integer(100));
        header.set("CTYPE1", HeaderValue::Text("RA---TAN".into()));
        header.set("CTYPE2", HeaderValue::Text("DEC--TAN".into()));
        header.set("CRPIX1", HeaderValue::Float(50.5));
        header.set("CRPIX2", HeaderValue::Float(50.5));
        header.set("CRVAL1", HeaderValue::Float(crval.0));
        header.set("CRVAL2", HeaderValue::Float(crval.1));
        header.set("CDELT1", HeaderValue::Float(-cdelt));
        header.set("CDELT2", HeaderValue::Float(cdelt));
        header
    }

    #[test]
    fn test_reference_pixel_maps_to_reference_value() {
        let wcs = Wcs::from_header(&tan_header((150.0, 30.0), 0.001)).unwrap();
        assert!(wcs.is_projected());
        let (lon, lat) = wcs.pixel_to_world(50.5, 50.5).unwrap();
        assert!((lon - 150.0).abs() < 1e-9);
        assert!((lat - 30.0).abs() < 1e-9);
        assert_eq!(wcs.system(), CoordinateSystem::Fk5);
    }

    #[test]
    fn test_tan_round_trip() {
        let wcs = Wcs::from_header(&tan_header((10.0, -45.0), 0.01)).unwrap();
        for &(x, y) in &[(1.0, 1.0), (100.0, 1.0), (25.3, 77.9), (100.0, 100.0)] {
            let (lon, lat) = wcs.pixel_to_world(x, y).unwrap();
            let (px, py) = wcs.world_to_pixel(lon, lat).unwrap();
            assert!((px - x).abs() < 1e-6, "x {} -> {}", x, px);
            assert!((py - y).abs() < 1e-6, "y {} -> {}", y, py);
        }
    }

    #[test]
    fn test_tan_matches_gnomonic_offset() {
        // One axis offset of n pixels lands atan(n * cdelt) away from the tangent point
        let wcs = Wcs::from_header(&tan_header((0.0, 0.0), 0.5)).unwrap();
        let (_, lat) = wcs.pixel_to_world(50.5, 70.5).unwrap();
        assert!((lat - (10.0 * D2R).atan() * R2D).abs() < 1e-9);
    }

    #[test]
    fn test_east_is_left() {
        // Negative CDELT1: RA increases to the left
        let wcs = Wcs::from_header(&tan_header((150.0, 0.0), 0.01)).unwrap();
        let (lon_left, _) = wcs.pixel_to_world(40.5, 50.5).unwrap();
        let (lon_right, _) = wcs.pixel_to_world(60.5, 50.5).unwrap();
        assert!(lon_left > lon_right);
    }

    #[test]
    fn test_ra_wraps_at_zero() {
        let wcs = Wcs::from_header(&tan_header((0.0, 0.0), 0.01)).unwrap();
        let (lon, _) = wcs.pixel_to_world(60.5, 50.5).unwrap();
        assert!(lon > 359.0 && lon < 360.0);
        let (px, _) = wcs.world_to_pixel(lon - 360.0, 0.0).unwrap();
        assert!((px - 60.5).abs() < 1e-6);
    }

    #[test]
    fn test_sip_distortion_is_applied() {
        let plain = Wcs::from_header(&tan_header((10.0, 20.0), 0.001)).unwrap();

        let mut header = tan_header((10.0, 20.0), 0.001);
        header.set("CTYPE1", HeaderValue::Text("RA---TAN-SIP".into()));
        header.set("CTYPE2", HeaderValue::Text("DEC--TAN-SIP".into()));
        header.set("A_ORDER", HeaderValue::Integer(2));
        header.set("B_ORDER", HeaderValue::Integer(2));
        header.set("A_2_0", HeaderValue::Float(1e-3));
        let sip = Wcs::from_header(&header).unwrap();

        // At the reference pixel the polynomial vanishes
        let a = plain.pixel_to_world(50.5, 50.5).unwrap();
        let b = sip.pixel_to_world(50.5, 50.5).unwrap();
        assert!((a.0 - b.0).abs() < 1e-9 && (a.1 - b.1).abs() < 1e-9);

        // 49.5 pixels out, A_2_0 * u^2 shifts x by about 2.45 pixels
        let a = plain.pixel_to_world(100.0, 100.0).unwrap();
        let b = sip.pixel_to_world(100.0, 100.0).unwrap();
        assert!(
            angular_separation(a.0, a.1, b.0, b.1) > 0.001,
            "plain {:?} sip {:?}",
            a,
            b
        );
    }

    #[test]
    fn test_sip_survives_header_normalization() {
        use crate::header::{HeaderNormalizer, StandardHeaderNormalizer};

        let mut header = tan_header((10.0, 20.0), 0.001);
        header.set("CTYPE1", HeaderValue::Text("RA---TAN-SIP".into()));
        header.set("CTYPE2", HeaderValue::Text("DEC--TAN-SIP".into()));
        header.set("A_ORDER", HeaderValue::Integer(2));
        header.set("B_ORDER", HeaderValue::Integer(2));
        header.set("A_2_0", HeaderValue::Float(1e-3));
        let header = StandardHeaderNormalizer.normalize(header).unwrap();

        let plain = StandardWcsEngine
            .build(&tan_header((10.0, 20.0), 0.001))
            .unwrap();
        let sip = StandardWcsEngine.build(&header).unwrap();

        let a = plain.pixel_to_world(100.0, 100.0).unwrap();
        let b = sip.pixel_to_world(100.0, 100.0).unwrap();
        assert!(angular_separation(a.0, a.1, b.0, b.1) > 0.001);
    }

    #[test]
    fn test_galactic_stays_in_native_frame() {
        let mut header = tan_header((120.0, -5.0), 0.01);
        header.set("CTYPE1", HeaderValue::Text("GLON-TAN".into()));
        header.set("CTYPE2", HeaderValue::Text("GLAT-TAN".into()));
        let wcs = Wcs::from_header(&header).unwrap();

        assert_eq!(wcs.system(), CoordinateSystem::Galactic);
        let (l, b) = wcs.pixel_to_world(50.5, 50.5).unwrap();
        assert!((l - 120.0).abs() < 1e-9 && (b + 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_linear_wcs() {
        let mut header = Header::new();
        header.set("CRPIX1", HeaderValue::Float(1.0));
        header.set("CRPIX2", HeaderValue::Float(1.0));
        header.set("CRVAL1", HeaderValue::Float(100.0));
        header.set("CRVAL2", HeaderValue::Float(200.0));
        header.set("CDELT1", HeaderValue::Float(2.0));
        header.set("CDELT2", HeaderValue::Float(0.5));
        let wcs = Wcs::from_header(&header).unwrap();

        assert!(!wcs.is_projected());
        assert_eq!(wcs.system(), CoordinateSystem::Pixel);
        assert_eq!(wcs.pixel_to_world(3.0, 5.0), Some((104.0, 202.0)));
        assert_eq!(wcs.world_to_pixel(104.0, 202.0), Some((3.0, 5.0)));
    }

    #[test]
    fn test_crota_matches_cd_matrix() {
        let mut rotated = tan_header((30.0, 10.0), 0.01);
        rotated.set("CROTA2", HeaderValue::Float(30.0));
        let crota = Wcs::from_header(&rotated).unwrap();

        let rho = 30.0 * D2R;
        let mut cd = tan_header((30.0, 10.0), 0.01);
        cd.set("CD1_1", HeaderValue::Float(-0.01 * rho.cos()));
        cd.set("CD1_2", HeaderValue::Float(-0.01 * rho.sin()));
        cd.set("CD2_1", HeaderValue::Float(-0.01 * rho.sin()));
        cd.set("CD2_2", HeaderValue::Float(0.01 * rho.cos()));
        let cd = Wcs::from_header(&cd).unwrap();

        let a = crota.pixel_to_world(10.0, 90.0).unwrap();
        let b = cd.pixel_to_world(10.0, 90.0).unwrap();
        assert!((a.0 - b.0).abs() < 1e-9 && (a.1 - b.1).abs() < 1e-9);
    }

    #[test]
    fn test_singular_matrix_rejected() {
        let mut header = tan_header((0.0, 0.0), 0.01);
        header.set("CD1_1", HeaderValue::Float(0.0));
        header.set("CD2_2", HeaderValue::Float(0.0));
        assert!(Wcs::from_header(&header).is_err());
    }

    #[test]
    fn test_system_detection() {
        let mut header = tan_header((0.0, 0.0), 0.01);
        header.set("RADESYS", HeaderValue::Text("ICRS".into()));
        assert_eq!(Wcs::from_header(&header).unwrap().system(), CoordinateSystem::Icrs);

        header.remove("RADESYS");
        header.set("EQUINOX", HeaderValue::Float(1950.0));
        assert_eq!(Wcs::from_header(&header).unwrap().system(), CoordinateSystem::Fk4);

        header.set("CTYPE1", HeaderValue::Text("GLON-TAN".into()));
        header.set("CTYPE2", HeaderValue::Text("GLAT-TAN".into()));
        assert_eq!(
            Wcs::from_header(&header).unwrap().system(),
            CoordinateSystem::Galactic
        );
    }

    #[test]
    fn test_unsupported_projection() {
        let mut header = tan_header((0.0, 0.0), 0.01);
        header.set("CTYPE1", HeaderValue::Text("RA---XYZ".into()));
        header.set("CTYPE2", HeaderValue::Text("DEC--XYZ".into()));
        assert!(Wcs::from_header(&header).is_err());
    }

    #[test]
    fn test_mismatched_projections() {
        let mut header = tan_header((0.0, 0.0), 0.01);
        header.set("CTYPE2", HeaderValue::Text("DEC--SIN".into()));
        assert!(Wcs::from_header(&header).is_err());
    }

    #[test]
    fn test_local_pixel_scale() {
        let wcs = Wcs::from_header(&tan_header((0.0, 0.0), 0.002)).unwrap();
        let local = local_pixel_scale(&wcs, 50.5, 50.5).unwrap();
        assert!((local - 0.002).abs() < 1e-6);
    }
}
