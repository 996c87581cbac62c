// Cache keys and image classification

use std::path::{Path, PathBuf};

/// Representation a path was loaded as
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// One texture, image within the GPU limit
    Texture,
    /// Grid of textures covering an image of any size
    Tiled,
}

/// Key of the texture / tile grid cache.
///
/// The same file may be cached once per representation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceKey {
    pub path: PathBuf,
    pub kind: ResourceKind,
}

impl ResourceKey {
    pub fn texture(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            kind: ResourceKind::Texture,
        }
    }

    pub fn tiled(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            kind: ResourceKind::Tiled,
        }
    }
}

/// Whether a file should be shown as a still or an animation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Still,
    Animated,
}

impl ImageKind {
    /// Extensions treated as animated sources
    pub const ANIMATED_EXTENSIONS: &'static [&'static str] = &["gif"];

    /// Classify a path by its extension (case-insensitive)
    pub fn from_path(path: &Path) -> Self {
        let animated = path
            .extension()
            .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
            .is_some_and(|ext| Self::ANIMATED_EXTENSIONS.contains(&ext.as_str()));

        if animated {
            ImageKind::Animated
        } else {
            ImageKind::Still
        }
    }
}
