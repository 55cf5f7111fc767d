use anyhow::{anyhow, bail, Context, Result};
use fitrs::{Fits, FitsData};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use crate::header::{Header, BLOCK_SIZE};

/// Safety limit on header size per HDU (100 blocks, ~288 KB)
const MAX_HEADER_BLOCKS: usize = 100;

/// A decoded 2D image plane and the header of the HDU it came from.
///
/// Pixels are stored in FITS order: `data[y * width + x]`, with `y = 0` the
/// bottom row. Blank pixels are NaN.
#[derive(Debug, Clone)]
pub struct DecodedImage {
    pub width: usize,
    pub height: usize,
    pub data: Vec<f64>,
    pub header: Header,
}

impl DecodedImage {
    pub fn new(width: usize, height: usize, data: Vec<f64>, header: Header) -> Result<Self> {
        if data.len() != width * height {
            bail!(
                "Data size mismatch: expected {} pixels, got {}",
                width * height,
                data.len()
            );
        }
        Ok(Self {
            width,
            height,
            data,
            header,
        })
    }

    /// Value at zero-based `(x, y)`, NaN outside the grid
    pub fn value(&self, x: usize, y: usize) -> f64 {
        if x < self.width && y < self.height {
            self.data[y * self.width + x]
        } else {
            f64::NAN
        }
    }
}

/// Reads one image HDU from a source
pub trait ImageDecoder {
    fn decode(&self, path: &Path, hdu: usize) -> Result<DecodedImage>;
}

/// FITS decoder backed by `fitrs` for pixel data.
///
/// Headers are scanned directly from the 2880-byte records so that every card
/// (including WCS keywords fitrs does not surface) is kept.
#[derive(Debug, Default, Clone, Copy)]
pub struct FitsDecoder;

impl ImageDecoder for FitsDecoder {
    fn decode(&self, path: &Path, hdu: usize) -> Result<DecodedImage> {
        let header = read_header(path, hdu)?;

        let (width, height) = header
            .image_size()
            .ok_or_else(|| anyhow!("HDU {} does not contain 2D image data", hdu))?;

        let bscale = header.get_f64("BSCALE").unwrap_or(1.0);
        let bzero = header.get_f64("BZERO").unwrap_or(0.0);

        let fits = Fits::open(path)
            .with_context(|| format!("Failed to open FITS file: {}", path.display()))?;
        let unit = fits
            .get(hdu)
            .ok_or_else(|| anyhow!("No HDU {} found in FITS file", hdu))?;

        let raw = unit.read_data();
        let mut data: Vec<f64> = match raw {
            FitsData::Characters(_) => {
                bail!("FITS file contains character data, not image data");
            }
            FitsData::IntegersI32(array) => array
                .data
                .iter()
                .copied()
                .map(|v| match v {
                    Some(raw) => raw as f64 * bscale + bzero,
                    None => f64::NAN,
                })
                .collect(),
            // fitrs already applies the unsigned BZERO offset for this variant
            FitsData::IntegersU32(array) => array
                .data
                .iter()
                .copied()
                .map(|v| match v {
                    Some(raw) => raw as f64 * bscale,
                    None => f64::NAN,
                })
                .collect(),
            FitsData::FloatingPoint32(array) => array
                .data
                .iter()
                .copied()
                .map(|v| v as f64 * bscale + bzero)
                .collect(),
            FitsData::FloatingPoint64(array) => array
                .data
                .iter()
                .copied()
                .map(|v| v * bscale + bzero)
                .collect(),
        };

        let plane = width * height;
        if data.len() < plane {
            bail!(
                "Data size mismatch: expected {} pixels, got {}",
                plane,
                data.len()
            );
        }
        // Cubes: keep the first plane only
        data.truncate(plane);

        DecodedImage::new(width, height, data, header)
    }
}

/// Read the header of HDU `hdu` by walking the file record by record
pub fn read_header(path: &Path, hdu: usize) -> Result<Header> {
    let mut file =
        File::open(path).with_context(|| format!("Failed to open FITS file: {}", path.display()))?;

    for index in 0..=hdu {
        let mut header_data = Vec::new();
        let header = loop {
            let mut block = vec![0u8; BLOCK_SIZE];
            file.read_exact(&mut block)
                .with_context(|| format!("Unexpected end of file reading HDU {}", index))?;
            header_data.extend_from_slice(&block);

            if let Ok((header, _)) = Header::parse(&header_data) {
                break header;
            }
            if header_data.len() >= MAX_HEADER_BLOCKS * BLOCK_SIZE {
                bail!("HDU {} header exceeds {} blocks", index, MAX_HEADER_BLOCKS);
            }
        };

        if index == hdu {
            return Ok(header);
        }

        let padded = header.data_bytes().div_ceil(BLOCK_SIZE) * BLOCK_SIZE;
        file.seek(SeekFrom::Current(padded as i64))?;
    }

    Err(anyhow!("No HDU {} found in FITS file", hdu))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::write_fits_f32;

    #[test]
    fn test_decode_float_image() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ramp.fits");
        let data: Vec<f32> = (0..12).map(|i| i as f32).collect();
        write_fits_f32(&path, 4, 3, &data, &[("CTYPE1", "'RA---TAN'")]).unwrap();

        let image = FitsDecoder.decode(&path, 0).unwrap();

        assert_eq!(image.width, 4);
        assert_eq!(image.height, 3);
        assert_eq!(image.value(0, 0), 0.0);
        assert_eq!(image.value(3, 0), 3.0);
        assert_eq!(image.value(0, 2), 8.0);
        assert!(image.value(4, 0).is_nan());
        assert_eq!(image.header.get_str("CTYPE1"), Some("RA---TAN"));
    }

    #[test]
    fn test_read_header_missing_hdu() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("single.fits");
        write_fits_f32(&path, 2, 2, &[1.0, 2.0, 3.0, 4.0], &[]).unwrap();

        assert!(read_header(&path, 0).is_ok());
        assert!(read_header(&path, 1).is_err());
    }

    #[test]
    fn test_decode_missing_file() {
        let result = FitsDecoder.decode(Path::new("/nonexistent/file.fits"), 0);
        assert!(result.is_err());
    }

    #[test]
    fn test_decoded_image_size_check() {
        assert!(DecodedImage::new(2, 2, vec![0.0; 3], Header::new()).is_err());
    }
}
