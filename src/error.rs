use std::path::PathBuf;

/// Errors surfaced by the figure controller.
///
/// Collaborators report failures as `anyhow::Error`; the controller wraps them
/// into the variant matching the operation that failed and keeps the chain as
/// the source.
#[derive(Debug, thiserror::Error)]
pub enum FigureError {
    #[error("failed to load image {path}: check that the file is a valid FITS file")]
    Load {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("invalid world coordinate system")]
    Wcs(#[source] anyhow::Error),

    #[error("layer {0} does not exist")]
    LayerNotFound(String),

    #[error("coordinate arrays differ in length ({xw} vs {yw})")]
    CoordinateMismatch { xw: usize, yw: usize },

    #[error("invalid label format '{0}'")]
    InvalidLabelFormat(String),

    #[error("unknown colormap '{0}'")]
    UnknownColormap(String),

    #[error("unsupported output format for {0}")]
    UnsupportedFormat(PathBuf),

    #[error("rendering failed")]
    Render(#[source] anyhow::Error),

    #[error("failed to write {path}")]
    Export {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to read region file {path}")]
    Regions {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },
}

pub type Result<T, E = FigureError> = std::result::Result<T, E>;
