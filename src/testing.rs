//! Test fixtures: FITS writers, synthetic headers and fake collaborators.

use anyhow::{anyhow, Result};
use byteorder::{BigEndian, WriteBytesExt};
use image::RgbaImage;
use std::cell::Cell;
use std::collections::HashMap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::fits::{DecodedImage, ImageDecoder};
use crate::header::{Header, HeaderValue, BLOCK_SIZE, CARD_SIZE};
use crate::render::{Renderer, Scene};

fn card(key: &str, value: &str) -> String {
    format!("{:<8}= {:<70}", key, value)
}

/// Write a single-HDU BITPIX=-32 FITS file.
///
/// `extra` holds raw value fields, so strings carry their quotes:
/// `("CTYPE1", "'RA---TAN'")`.
pub fn write_fits_f32(
    path: &Path,
    width: usize,
    height: usize,
    data: &[f32],
    extra: &[(&str, &str)],
) -> Result<()> {
    let mut cards = vec![
        card("SIMPLE", "T"),
        card("BITPIX", "-32"),
        card("NAXIS", "2"),
        card("NAXIS1", &width.to_string()),
        card("NAXIS2", &height.to_string()),
    ];
    for (key, value) in extra {
        cards.push(card(key, value));
    }
    cards.push(format!("{:<80}", "END"));

    let mut bytes: Vec<u8> = cards.concat().into_bytes();
    debug_assert!(bytes.len() % CARD_SIZE == 0);
    bytes.resize(bytes.len().div_ceil(BLOCK_SIZE) * BLOCK_SIZE, b' ');

    let mut payload = Vec::with_capacity(data.len() * 4);
    for &v in data {
        payload.write_f32::<BigEndian>(v)?;
    }
    payload.resize(payload.len().div_ceil(BLOCK_SIZE) * BLOCK_SIZE, 0);

    let mut file = File::create(path)?;
    file.write_all(&bytes)?;
    file.write_all(&payload)?;
    Ok(())
}

/// Header cards of a north-up TAN image as raw FITS value fields
pub fn tan_cards(nx: usize, ny: usize, crval: (f64, f64), cdelt: f64) -> Vec<(String, String)> {
    vec![
        ("CTYPE1".into(), "'RA---TAN'".into()),
        ("CTYPE2".into(), "'DEC--TAN'".into()),
        ("CRPIX1".into(), format!("{:.1}", (nx as f64 + 1.0) / 2.0)),
        ("CRPIX2".into(), format!("{:.1}", (ny as f64 + 1.0) / 2.0)),
        ("CRVAL1".into(), format!("{:e}", crval.0)),
        ("CRVAL2".into(), format!("{:e}", crval.1)),
        ("CDELT1".into(), format!("{:e}", -cdelt)),
        ("CDELT2".into(), format!("{:e}", cdelt)),
        ("RADESYS".into(), "'FK5'".into()),
        ("EQUINOX".into(), "2000.0".into()),
    ]
}

/// Header of a north-up TAN image with the reference pixel at the centre
pub fn tan_header(nx: usize, ny: usize, crval: (f64, f64), cdelt: f64) -> Header {
    let mut header = Header::new();
    header.set("NAXIS", HeaderValue::Integer(2));
    header.set("NAXIS1", HeaderValue::Integer(nx as i64));
    header.set("NAXIS2", HeaderValue::Integer(ny as i64));
    header.set("CTYPE1", HeaderValue::Text("RA---TAN".into()));
    header.set("CTYPE2", HeaderValue::Text("DEC--TAN".into()));
    header.set("CRPIX1", HeaderValue::Float((nx as f64 + 1.0) / 2.0));
    header.set("CRPIX2", HeaderValue::Float((ny as f64 + 1.0) / 2.0));
    header.set("CRVAL1", HeaderValue::Float(crval.0));
    header.set("CRVAL2", HeaderValue::Float(crval.1));
    header.set("CDELT1", HeaderValue::Float(-cdelt));
    header.set("CDELT2", HeaderValue::Float(cdelt));
    header.set("RADESYS", HeaderValue::Text("FK5".into()));
    header.set("EQUINOX", HeaderValue::Float(2000.0));
    header
}

/// Header with pixel coordinates only
pub fn linear_header(nx: usize, ny: usize) -> Header {
    let mut header = Header::new();
    header.set("NAXIS", HeaderValue::Integer(2));
    header.set("NAXIS1", HeaderValue::Integer(nx as i64));
    header.set("NAXIS2", HeaderValue::Integer(ny as i64));
    header
}

/// Gaussian bump on a flat background, peak 100 at the image centre
pub fn gaussian_image(nx: usize, ny: usize, sigma: f64) -> Vec<f64> {
    let cx = (nx as f64 - 1.0) / 2.0;
    let cy = (ny as f64 - 1.0) / 2.0;
    let mut data = Vec::with_capacity(nx * ny);
    for y in 0..ny {
        for x in 0..nx {
            let r2 = (x as f64 - cx).powi(2) + (y as f64 - cy).powi(2);
            data.push(1.0 + 100.0 * (-r2 / (2.0 * sigma * sigma)).exp());
        }
    }
    data
}

/// Decoder serving in-memory images keyed by path
#[derive(Debug, Default, Clone)]
pub struct FakeDecoder {
    images: HashMap<PathBuf, DecodedImage>,
}

impl FakeDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_image(mut self, path: &str, image: DecodedImage) -> Self {
        self.images.insert(PathBuf::from(path), image);
        self
    }
}

impl ImageDecoder for FakeDecoder {
    fn decode(&self, path: &Path, _hdu: usize) -> Result<DecodedImage> {
        self.images
            .get(path)
            .cloned()
            .ok_or_else(|| anyhow!("no such image: {}", path.display()))
    }
}

/// Renderer that records how often it was called and the last scene
#[derive(Debug, Default, Clone)]
pub struct CountingRenderer {
    pub count: Rc<Cell<usize>>,
    pub last_scene: Rc<std::cell::RefCell<Option<Scene>>>,
}

impl CountingRenderer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Renderer for CountingRenderer {
    fn render(&mut self, scene: &Scene, _dpi: f64) -> Result<RgbaImage> {
        self.count.set(self.count.get() + 1);
        *self.last_scene.borrow_mut() = Some(scene.clone());
        Ok(RgbaImage::new(1, 1))
    }
}
