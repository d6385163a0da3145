pub mod error;
pub mod options;

pub use error::{FatImageError, Result};
pub use options::{FatWidth, FloppyPreset, ImageConfig, ImageOptions};
