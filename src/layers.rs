//! Layer registry: named groups of drawable primitives that can be hidden,
//! shown or removed together.

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::error::{FigureError, Result};
use crate::style::{Color, MarkerShape, Paint};

/// Band index per target pixel, shared by all bands of one filled contour set
#[derive(Debug, Clone, PartialEq)]
pub struct BandGrid {
    pub width: usize,
    pub height: usize,
    /// Row-major, row 0 at the bottom; `None` outside the contour image
    pub bands: Vec<Option<usize>>,
}

impl BandGrid {
    pub fn band_at(&self, x: usize, y: usize) -> Option<usize> {
        if x < self.width && y < self.height {
            self.bands[y * self.width + x]
        } else {
            None
        }
    }
}

/// Scatter style with every option filled in
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedMarkerStyle {
    pub edge: Paint,
    pub face: Paint,
    /// Marker area in points squared
    pub size: f64,
    pub marker: MarkerShape,
    pub linewidth: f64,
    pub alpha: f64,
}

/// Drawable payload of a primitive
#[derive(Debug, Clone, PartialEq)]
pub enum Artist {
    /// One contour level; polylines are in target pixel coordinates
    ContourLines {
        level: f64,
        paths: Vec<Vec<(f64, f64)>>,
        closed: Vec<bool>,
        color: Color,
        linewidth: f64,
    },
    /// One filled band: target pixels whose band index equals `band`
    ContourFill {
        band: usize,
        lower: f64,
        upper: f64,
        grid: Arc<BandGrid>,
        color: Color,
    },
    Scatter {
        points: Vec<(f64, f64)>,
        style: ResolvedMarkerStyle,
    },
}

/// Layer membership of a primitive
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayerTag {
    Unassigned,
    Named(String),
}

impl LayerTag {
    pub fn is(&self, name: &str) -> bool {
        matches!(self, LayerTag::Named(n) if n == name)
    }
}

pub type PrimitiveId = u64;

#[derive(Debug, Clone, PartialEq)]
pub struct Primitive {
    pub id: PrimitiveId,
    pub layer: LayerTag,
    pub visible: bool,
    pub artist: Artist,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layer {
    pub name: String,
    pub visible: bool,
}

/// Ordered overlays and their primitives
#[derive(Debug, Default)]
pub struct LayerRegistry {
    layers: Vec<Layer>,
    primitives: Vec<Primitive>,
    next_id: PrimitiveId,
    contour_counter: usize,
    scatter_counter: usize,
}

impl LayerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a visible, unassigned primitive
    pub fn add(&mut self, artist: Artist) -> PrimitiveId {
        self.next_id += 1;
        let id = self.next_id;
        self.primitives.push(Primitive {
            id,
            layer: LayerTag::Unassigned,
            visible: true,
            artist,
        });
        id
    }

    /// Tag every unassigned primitive with `name`, in creation order.
    ///
    /// Registers the layer when something was swept. An existing layer of the
    /// same name absorbs the swept primitives, which take its visibility.
    /// Returns whether any primitive was swept.
    pub fn sweep(&mut self, name: &str) -> bool {
        let visible = self.layer(name).map(|l| l.visible).unwrap_or(true);
        let mut swept = 0;
        for primitive in &mut self.primitives {
            if primitive.layer == LayerTag::Unassigned {
                primitive.layer = LayerTag::Named(name.to_string());
                primitive.visible = visible;
                swept += 1;
            }
        }

        if swept == 0 {
            return false;
        }
        if !self.exists(name) {
            self.layers.push(Layer {
                name: name.to_string(),
                visible: true,
            });
        }
        debug!("Swept {} primitives into layer {}", swept, name);
        true
    }

    pub fn exists(&self, name: &str) -> bool {
        self.layer(name).is_some()
    }

    pub fn layer(&self, name: &str) -> Option<&Layer> {
        self.layers.iter().find(|l| l.name == name)
    }

    /// Delete the layer and every primitive tagged with it
    pub fn remove(&mut self, name: &str) -> Result<()> {
        if !self.exists(name) {
            return Err(FigureError::LayerNotFound(name.to_string()));
        }
        let before = self.primitives.len();
        self.primitives.retain(|p| !p.layer.is(name));
        self.layers.retain(|l| l.name != name);
        debug!(
            "Removed layer {} with {} primitives",
            name,
            before - self.primitives.len()
        );
        Ok(())
    }

    pub fn hide(&mut self, name: &str) -> Result<()> {
        self.set_visible(name, false)
    }

    pub fn show(&mut self, name: &str) -> Result<()> {
        self.set_visible(name, true)
    }

    fn set_visible(&mut self, name: &str, visible: bool) -> Result<()> {
        let layer = self
            .layers
            .iter_mut()
            .find(|l| l.name == name)
            .ok_or_else(|| FigureError::LayerNotFound(name.to_string()))?;
        layer.visible = visible;
        for primitive in self.primitives.iter_mut().filter(|p| p.layer.is(name)) {
            primitive.visible = visible;
        }
        debug!("Layer {} visible={}", name, visible);
        Ok(())
    }

    /// Next automatic contour set name; numbers are never reused
    pub fn next_contour_name(&mut self) -> String {
        self.contour_counter += 1;
        format!("contour_set_{}", self.contour_counter)
    }

    /// Next automatic scatter set name; numbers are never reused
    pub fn next_scatter_name(&mut self) -> String {
        self.scatter_counter += 1;
        format!("scatter_set_{}", self.scatter_counter)
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn primitives(&self) -> &[Primitive] {
        &self.primitives
    }

    pub fn primitives_in<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Primitive> + 'a {
        self.primitives.iter().filter(move |p| p.layer.is(name))
    }

    pub fn visible_primitives(&self) -> impl Iterator<Item = &Primitive> {
        self.primitives.iter().filter(|p| p.visible)
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn report(&self) -> LayerReport {
        LayerReport {
            layers: self.layers.clone(),
        }
    }
}

/// Snapshot of the registry for display
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerReport {
    pub layers: Vec<Layer>,
}

impl fmt::Display for LayerReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.layers.len() {
            0 => write!(f, "There are no layers in this figure"),
            1 => write!(
                f,
                "There is one layer in this figure: {}{}",
                self.layers[0].name,
                hidden_suffix(&self.layers[0])
            ),
            n => {
                writeln!(f, "There are {} layers in this figure:", n)?;
                for layer in &self.layers {
                    write!(f, "\n   -> {}{}", layer.name, hidden_suffix(layer))?;
                }
                Ok(())
            }
        }
    }
}

fn hidden_suffix(layer: &Layer) -> &'static str {
    if layer.visible {
        ""
    } else {
        " (hidden)"
    }
}
