use anyhow::{bail, Result};
use std::fmt;

/// Size of one FITS record
pub const BLOCK_SIZE: usize = 2880;
/// Size of one header card
pub const CARD_SIZE: usize = 80;

/// A typed FITS header value
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(untagged)]
pub enum HeaderValue {
    Integer(i64),
    Float(f64),
    Logical(bool),
    Text(String),
}

impl HeaderValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            HeaderValue::Integer(n) => Some(*n as f64),
            HeaderValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            HeaderValue::Integer(n) => Some(*n),
            HeaderValue::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            HeaderValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            HeaderValue::Logical(b) => Some(*b),
            _ => None,
        }
    }

    /// Parse the value field of a card (the text between `=` and the comment)
    fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }

        if let Some(rest) = raw.strip_prefix('\'') {
            // Quoted strings use '' as an escaped quote and may contain '/'
            let mut text = String::new();
            let mut chars = rest.chars().peekable();
            while let Some(c) = chars.next() {
                if c == '\'' {
                    if chars.peek() == Some(&'\'') {
                        text.push('\'');
                        chars.next();
                    } else {
                        break;
                    }
                } else {
                    text.push(c);
                }
            }
            return Some(HeaderValue::Text(text.trim_end().to_string()));
        }

        let value = raw.split('/').next().unwrap_or("").trim();
        match value {
            "T" => return Some(HeaderValue::Logical(true)),
            "F" => return Some(HeaderValue::Logical(false)),
            _ => {}
        }

        if let Ok(n) = value.parse::<i64>() {
            return Some(HeaderValue::Integer(n));
        }

        // Fortran-style exponents are legal in FITS
        let normalized = value.replace(['D', 'd'], "E");
        if let Ok(f) = normalized.parse::<f64>() {
            return Some(HeaderValue::Float(f));
        }

        if value.is_empty() {
            None
        } else {
            Some(HeaderValue::Text(value.to_string()))
        }
    }
}

impl fmt::Display for HeaderValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeaderValue::Integer(n) => write!(f, "{}", n),
            HeaderValue::Float(v) => write!(f, "{}", v),
            HeaderValue::Logical(b) => write!(f, "{}", if *b { "T" } else { "F" }),
            HeaderValue::Text(s) => write!(f, "'{}'", s),
        }
    }
}

/// Ordered keyword/value cards of one HDU.
///
/// COMMENT, HISTORY and blank cards are dropped on parse.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct Header {
    cards: Vec<(String, HeaderValue)>,
}

impl Header {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse header cards up to (and excluding) the END card.
    ///
    /// Returns the header and the number of bytes consumed, rounded up to a
    /// whole 2880-byte block.
    pub fn parse(data: &[u8]) -> Result<(Self, usize)> {
        let mut header = Header::new();

        for (index, chunk) in data.chunks(CARD_SIZE).enumerate() {
            if chunk.len() < CARD_SIZE {
                break;
            }
            let keyword = String::from_utf8_lossy(&chunk[..8]);
            let keyword = keyword.trim();

            if keyword == "END" {
                let consumed = (index + 1) * CARD_SIZE;
                let padded = consumed.div_ceil(BLOCK_SIZE) * BLOCK_SIZE;
                return Ok((header, padded));
            }

            if keyword.is_empty() || keyword == "COMMENT" || keyword == "HISTORY" {
                continue;
            }

            // Value indicator lives in columns 9-10
            if &chunk[8..10] == b"= " {
                if let Some(value) = HeaderValue::parse(&String::from_utf8_lossy(&chunk[10..])) {
                    header.set(keyword, value);
                }
            }
        }

        bail!("header has no END card")
    }

    pub fn get(&self, key: &str) -> Option<&HeaderValue> {
        self.cards.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(HeaderValue::as_f64)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(HeaderValue::as_i64)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(HeaderValue::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Insert or overwrite a card, keeping the original position on overwrite
    pub fn set(&mut self, key: &str, value: HeaderValue) {
        let key = key.to_ascii_uppercase();
        match self.cards.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => *existing = value,
            None => self.cards.push((key, value)),
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<HeaderValue> {
        let index = self.cards.iter().position(|(k, _)| k == key)?;
        Some(self.cards.remove(index).1)
    }

    /// Keep only the cards whose keyword passes `keep`
    pub fn retain(&mut self, mut keep: impl FnMut(&str) -> bool) {
        self.cards.retain(|(k, _)| keep(k));
    }

    /// Move a card to a new keyword unless the target already exists
    pub fn rename(&mut self, from: &str, to: &str) {
        if self.contains(to) {
            return;
        }
        if let Some(value) = self.remove(from) {
            self.set(to, value);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &HeaderValue)> {
        self.cards.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }

    /// Image axis sizes `(NAXIS1, NAXIS2)`
    pub fn image_size(&self) -> Option<(usize, usize)> {
        let nx = self.get_i64("NAXIS1")?;
        let ny = self.get_i64("NAXIS2")?;
        if nx <= 0 || ny <= 0 {
            return None;
        }
        Some((nx as usize, ny as usize))
    }

    /// Number of data bytes that follow this header, excluding block padding
    pub fn data_bytes(&self) -> usize {
        let bitpix = self.get_i64("BITPIX").unwrap_or(8).unsigned_abs() as usize;
        let naxis = self.get_i64("NAXIS").unwrap_or(0).max(0) as usize;
        if naxis == 0 {
            return 0;
        }
        let elements: usize = (1..=naxis)
            .map(|i| self.get_i64(&format!("NAXIS{}", i)).unwrap_or(0).max(0) as usize)
            .product();
        let pcount = self.get_i64("PCOUNT").unwrap_or(0).max(0) as usize;
        let gcount = self.get_i64("GCOUNT").unwrap_or(1).max(1) as usize;
        bitpix / 8 * gcount * (pcount + elements)
    }
}

/// Repairs header conventions before a WCS is built from it
pub trait HeaderNormalizer {
    fn normalize(&self, header: Header) -> Result<Header>;
}

/// Default header repairs.
///
/// Legacy keywords are renamed to their current form, CTYPE values are
/// trimmed and upper-cased, and missing reference keywords get their FITS
/// defaults. Distortion suffixes (`-SIP`, `-TPV`) are kept for the WCS engine.
#[derive(Debug, Default, Clone, Copy)]
pub struct StandardHeaderNormalizer;

impl HeaderNormalizer for StandardHeaderNormalizer {
    fn normalize(&self, mut header: Header) -> Result<Header> {
        if header.image_size().is_none() {
            bail!("header does not describe a 2D image (NAXIS1/NAXIS2 missing or empty)");
        }

        header.rename("RADECSYS", "RADESYS");
        header.rename("EPOCH", "EQUINOX");

        for axis in 1..=2 {
            let ctype_key = format!("CTYPE{}", axis);
            if let Some(ctype) = header.get_str(&ctype_key).map(str::to_string) {
                let cleaned = ctype.trim().to_ascii_uppercase();
                if cleaned != ctype {
                    tracing::debug!("Normalizing {} = '{}'", ctype_key, ctype);
                    header.set(&ctype_key, HeaderValue::Text(cleaned));
                }
            }

            let crpix = format!("CRPIX{}", axis);
            if !header.contains(&crpix) {
                header.set(&crpix, HeaderValue::Float(0.0));
            }
            let crval = format!("CRVAL{}", axis);
            if !header.contains(&crval) {
                header.set(&crval, HeaderValue::Float(0.0));
            }
        }

        let has_cd = ["CD1_1", "CD1_2", "CD2_1", "CD2_2"]
            .iter()
            .any(|k| header.contains(k));
        if !has_cd {
            for key in ["CDELT1", "CDELT2"] {
                match header.get_f64(key) {
                    Some(v) if v != 0.0 => {}
                    _ => header.set(key, HeaderValue::Float(1.0)),
                }
            }
        }

        Ok(header)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn card(text: &str) -> String {
        format!("{:<80}", text)
    }

    fn header_bytes(cards: &[&str]) -> Vec<u8> {
        let mut text: String = cards.iter().map(|c| card(c)).collect();
        text.push_str(&card("END"));
        let mut bytes = text.into_bytes();
        bytes.resize(bytes.len().div_ceil(BLOCK_SIZE) * BLOCK_SIZE, b' ');
        bytes
    }

    #[test]
    fn test_parse_typed_values() {
        let bytes = header_bytes(&[
            "SIMPLE  =                    T / conforms",
            "BITPIX  =                  -32",
            "NAXIS   =                    2",
            "NAXIS1  =                  100",
            "NAXIS2  =                   50",
            "CRVAL1  =           1.2345D+02 / fortran exponent",
            "CTYPE1  = 'RA---TAN'           / projection",
            "OBJECT  = 'M31 / core'",
            "COMMENT this is ignored",
        ]);
        let (header, consumed) = Header::parse(&bytes).unwrap();

        assert_eq!(consumed, BLOCK_SIZE);
        assert_eq!(header.get("SIMPLE"), Some(&HeaderValue::Logical(true)));
        assert_eq!(header.get_i64("BITPIX"), Some(-32));
        assert_eq!(header.image_size(), Some((100, 50)));
        assert!((header.get_f64("CRVAL1").unwrap() - 123.45).abs() < 1e-9);
        assert_eq!(header.get_str("CTYPE1"), Some("RA---TAN"));
        assert_eq!(header.get_str("OBJECT"), Some("M31 / core"));
        assert!(!header.contains("COMMENT"));
    }

    #[test]
    fn test_parse_without_end_fails() {
        let bytes = card("NAXIS   =                    2").into_bytes();
        assert!(Header::parse(&bytes).is_err());
    }

    #[test]
    fn test_data_bytes() {
        let mut header = Header::new();
        header.set("BITPIX", HeaderValue::Integer(-32));
        header.set("NAXIS", HeaderValue::Integer(2));
        header.set("NAXIS1", HeaderValue::Integer(10));
        header.set("NAXIS2", HeaderValue::Integer(20));
        assert_eq!(header.data_bytes(), 800);
    }

    #[test]
    fn test_normalize_legacy_keywords() {
        let mut header = Header::new();
        header.set("NAXIS1", HeaderValue::Integer(10));
        header.set("NAXIS2", HeaderValue::Integer(10));
        header.set("RADECSYS", HeaderValue::Text("FK5".into()));
        header.set("EPOCH", HeaderValue::Float(2000.0));
        header.set("CTYPE1", HeaderValue::Text("ra---tan ".into()));
        header.set("CDELT1", HeaderValue::Float(-0.001));

        let header = StandardHeaderNormalizer.normalize(header).unwrap();

        assert_eq!(header.get_str("RADESYS"), Some("FK5"));
        assert!(!header.contains("RADECSYS"));
        assert_eq!(header.get_f64("EQUINOX"), Some(2000.0));
        assert_eq!(header.get_str("CTYPE1"), Some("RA---TAN"));
        assert_eq!(header.get_f64("CDELT1"), Some(-0.001));
        assert_eq!(header.get_f64("CDELT2"), Some(1.0));
        assert_eq!(header.get_f64("CRPIX1"), Some(0.0));
    }

    #[test]
    fn test_normalize_keeps_distortion_suffix() {
        let mut header = Header::new();
        header.set("NAXIS1", HeaderValue::Integer(10));
        header.set("NAXIS2", HeaderValue::Integer(10));
        header.set("CTYPE1", HeaderValue::Text("RA---TAN-SIP".into()));
        header.set("CTYPE2", HeaderValue::Text("DEC--TAN-SIP".into()));
        header.set("A_ORDER", HeaderValue::Integer(2));

        let header = StandardHeaderNormalizer.normalize(header).unwrap();

        assert_eq!(header.get_str("CTYPE1"), Some("RA---TAN-SIP"));
        assert_eq!(header.get_str("CTYPE2"), Some("DEC--TAN-SIP"));
        assert_eq!(header.get_i64("A_ORDER"), Some(2));
    }

    #[test]
    fn test_normalize_rejects_missing_axes() {
        let mut header = Header::new();
        header.set("NAXIS1", HeaderValue::Integer(10));
        assert!(StandardHeaderNormalizer.normalize(header).is_err());
    }
}
