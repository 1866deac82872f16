//! SPIR-V shader library for the Grayforge engine.
//!
//! Shaders are compiled ahead of time and shipped next to the executable.
//! A shader named `noise_perlin` with a compute stage lives at
//! `<root>/noise_perlin_comp.spv`.

use std::path::{Path, PathBuf};
use thiserror::Error;

/// SPIR-V magic number (little-endian first word).
pub const SPIRV_MAGIC: u32 = 0x0723_0203;

#[derive(Error, Debug)]
pub enum ShaderError {
    #[error("Failed to read shader {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid SPIR-V in {0}: {1}")]
    InvalidSpirv(String, &'static str),

    #[error("Could not locate executable directory: {0}")]
    ExecutableDir(String),
}

pub type Result<T> = std::result::Result<T, ShaderError>;

/// Programmable pipeline stage a SPIR-V module is compiled for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    TessControl,
    TessEvaluation,
    Geometry,
    Fragment,
    Compute,
}

impl ShaderStage {
    /// Graphics stages in pipeline order.
    pub const GRAPHICS: [Self; 5] = [
        Self::Vertex,
        Self::TessControl,
        Self::TessEvaluation,
        Self::Geometry,
        Self::Fragment,
    ];

    /// File name suffix for this stage.
    pub const fn suffix(self) -> &'static str {
        match self {
            Self::Vertex => "vert",
            Self::TessControl => "tesc",
            Self::TessEvaluation => "tese",
            Self::Geometry => "geom",
            Self::Fragment => "frag",
            Self::Compute => "comp",
        }
    }
}

/// Directory of precompiled SPIR-V modules.
#[derive(Debug, Clone)]
pub struct ShaderLibrary {
    root: PathBuf,
}

impl ShaderLibrary {
    /// Create a library rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Library in the `shaders` directory next to the running executable.
    pub fn from_exe_dir() -> Result<Self> {
        let exe = std::env::current_exe().map_err(|e| ShaderError::ExecutableDir(e.to_string()))?;
        let dir = exe
            .parent()
            .ok_or_else(|| ShaderError::ExecutableDir(exe.display().to_string()))?;
        Ok(Self::new(dir.join("shaders")))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the SPIR-V file for `name` at `stage`.
    pub fn path(&self, name: &str, stage: ShaderStage) -> PathBuf {
        self.root.join(format!("{name}_{}.spv", stage.suffix()))
    }

    /// Whether the SPIR-V file for `name` at `stage` is present.
    pub fn exists(&self, name: &str, stage: ShaderStage) -> bool {
        self.path(name, stage).is_file()
    }

    /// Load and validate a SPIR-V module.
    pub fn load(&self, name: &str, stage: ShaderStage) -> Result<Vec<u32>> {
        let path = self.path(name, stage);
        let bytes = std::fs::read(&path).map_err(|source| ShaderError::Io {
            path: path.clone(),
            source,
        })?;
        tracing::debug!("Loaded shader {} ({} bytes)", path.display(), bytes.len());
        bytes_to_spirv(&bytes)
            .map_err(|reason| ShaderError::InvalidSpirv(path.display().to_string(), reason))
    }
}

/// Convert a byte slice to SPIR-V words (SPIR-V requires 4-byte alignment).
pub fn bytes_to_spirv(bytes: &[u8]) -> std::result::Result<Vec<u32>, &'static str> {
    if bytes.is_empty() {
        return Err("empty module");
    }
    if bytes.len() % 4 != 0 {
        return Err("length is not a multiple of 4");
    }
    let words: Vec<u32> = bytes
        .chunks_exact(4)
        .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect();
    if words[0] != SPIRV_MAGIC {
        return Err("bad magic number");
    }
    Ok(words)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn module_bytes(words: &[u32]) -> Vec<u8> {
        words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    #[test]
    fn stage_file_names() {
        let lib = ShaderLibrary::new("/opt/shaders");
        assert_eq!(
            lib.path("noise_perlin", ShaderStage::Compute),
            PathBuf::from("/opt/shaders/noise_perlin_comp.spv")
        );
        assert_eq!(
            lib.path("mesh", ShaderStage::TessEvaluation),
            PathBuf::from("/opt/shaders/mesh_tese.spv")
        );
        let suffixes: Vec<_> = ShaderStage::GRAPHICS.iter().map(|s| s.suffix()).collect();
        assert_eq!(suffixes, ["vert", "tesc", "tese", "geom", "frag"]);
    }

    #[test]
    fn spirv_parse() {
        let words = bytes_to_spirv(&module_bytes(&[SPIRV_MAGIC, 0x0001_0000, 7])).unwrap();
        assert_eq!(words, vec![SPIRV_MAGIC, 0x0001_0000, 7]);
    }

    #[test]
    fn spirv_rejects_bad_input() {
        assert!(bytes_to_spirv(&[]).is_err());
        assert!(bytes_to_spirv(&[0x03, 0x02, 0x23]).is_err());
        assert!(bytes_to_spirv(&module_bytes(&[0xDEAD_BEEF])).is_err());
    }

    #[test]
    fn load_reads_from_disk() {
        let dir = std::env::temp_dir().join(format!("grayforge-shaders-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let lib = ShaderLibrary::new(&dir);
        std::fs::write(
            lib.path("blit", ShaderStage::Fragment),
            module_bytes(&[SPIRV_MAGIC, 1, 2]),
        )
        .unwrap();

        assert!(lib.exists("blit", ShaderStage::Fragment));
        assert!(!lib.exists("blit", ShaderStage::Vertex));
        assert_eq!(lib.load("blit", ShaderStage::Fragment).unwrap().len(), 3);
        assert!(matches!(
            lib.load("blit", ShaderStage::Vertex),
            Err(ShaderError::Io { .. })
        ));

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
