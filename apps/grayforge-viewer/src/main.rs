//! Grayforge Viewer
//!
//! Loads a Wavefront OBJ mesh, generates a procedural noise texture on the
//! GPU and renders the textured mesh with an orbiting camera.
//!
//! ## Usage
//!
//! ```bash
//! cargo run -p grayforge-viewer -- [OPTIONS]
//! ```
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: Set log level (e.g., info, debug, trace)

mod app;

use std::path::PathBuf;
use std::sync::OnceLock;

use anyhow::{bail, Context as _};
use grayforge_app::{run_app, AppConfig};
use grayforge_render::{random_seed, NoiseKind};

use crate::app::Viewer;

const TITLE: &str = "Grayforge Viewer";
const WIDTH: u32 = 1280;
const HEIGHT: u32 = 720;

static ARGS: OnceLock<ViewerArgs> = OnceLock::new();

/// Noise texture applied to the mesh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoiseChoice {
    Perlin,
    Worley,
    WorleyPerlin,
    Checkerboard,
    Solid,
}

impl NoiseChoice {
    fn parse(name: &str) -> anyhow::Result<Self> {
        Ok(match name {
            "perlin" => Self::Perlin,
            "worley" => Self::Worley,
            "worley-perlin" => Self::WorleyPerlin,
            "checkerboard" => Self::Checkerboard,
            "solid" => Self::Solid,
            other => bail!("Unknown noise '{other}'"),
        })
    }
}

/// Command line options of the viewer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewerArgs {
    /// OBJ file to display; a unit cube when absent.
    pub mesh: Option<PathBuf>,
    /// Compiled shader directory.
    pub shaders: Option<PathBuf>,
    pub noise: NoiseChoice,
    /// Texture edge length in texels.
    pub size: u32,
    pub frequency: u32,
    pub octaves: u32,
    pub seed: Option<u32>,
    pub vsync: bool,
    pub validation: bool,
}

impl Default for ViewerArgs {
    fn default() -> Self {
        Self {
            mesh: None,
            shaders: None,
            noise: NoiseChoice::Perlin,
            size: 256,
            frequency: 4,
            octaves: 4,
            seed: None,
            vsync: false,
            validation: cfg!(debug_assertions),
        }
    }
}

impl ViewerArgs {
    /// Parse arguments, excluding the program name. `None` when help was requested.
    pub fn parse<I>(args: I) -> anyhow::Result<Option<Self>>
    where
        I: IntoIterator<Item = String>,
    {
        let mut parsed = Self::default();
        let mut args = args.into_iter();

        while let Some(arg) = args.next() {
            let mut value = |flag: &str| {
                args.next()
                    .with_context(|| format!("{flag} expects a value"))
            };
            match arg.as_str() {
                "-h" | "--help" => return Ok(None),
                "--mesh" => parsed.mesh = Some(PathBuf::from(value("--mesh")?)),
                "--shaders" => parsed.shaders = Some(PathBuf::from(value("--shaders")?)),
                "--noise" => parsed.noise = NoiseChoice::parse(&value("--noise")?)?,
                "--size" => parsed.size = parse_number("--size", &value("--size")?)?,
                "--frequency" => {
                    parsed.frequency = parse_number("--frequency", &value("--frequency")?)?;
                }
                "--octaves" => parsed.octaves = parse_number("--octaves", &value("--octaves")?)?,
                "--seed" => parsed.seed = Some(parse_number("--seed", &value("--seed")?)?),
                "--vsync" => parsed.vsync = true,
                "--no-validation" => parsed.validation = false,
                other => bail!("Unknown argument '{other}' (see --help)"),
            }
        }

        if parsed.size == 0 {
            bail!("--size must be positive");
        }
        Ok(Some(parsed))
    }

    /// Noise kind for the selected texture.
    pub fn noise_kind(&self, seed: u32) -> NoiseKind {
        let (frequency, octaves) = (self.frequency, self.octaves);
        match self.noise {
            NoiseChoice::Perlin => NoiseKind::Perlin { frequency, octaves },
            NoiseChoice::Worley => NoiseKind::Worley { frequency, octaves },
            NoiseChoice::WorleyPerlin => NoiseKind::WorleyPerlin {
                frequency,
                worley_octaves: octaves,
                perlin_octaves: octaves,
            },
            NoiseChoice::Checkerboard => NoiseKind::Checkerboard { frequency },
            NoiseChoice::Solid => NoiseKind::SolidColor {
                rgba: seed.to_le_bytes().map(|c| c | 0x40),
            },
        }
    }

    /// The requested seed, or one drawn from the clock.
    pub fn seed_or_random(&self) -> u32 {
        self.seed.unwrap_or_else(random_seed)
    }

    fn app_config(&self) -> AppConfig {
        let config = AppConfig::new(TITLE)
            .with_size(WIDTH, HEIGHT)
            .with_vsync(self.vsync)
            .with_validation(self.validation)
            .with_clear_color([0.05, 0.05, 0.08, 1.0]);
        match &self.shaders {
            Some(dir) => config.with_shader_dir(dir),
            None => config,
        }
    }
}

fn parse_number(flag: &str, value: &str) -> anyhow::Result<u32> {
    value
        .parse()
        .with_context(|| format!("{flag} expects a non-negative integer, got '{value}'"))
}

/// Arguments the viewer was started with.
pub fn args() -> &'static ViewerArgs {
    ARGS.get_or_init(ViewerArgs::default)
}

fn main() -> anyhow::Result<()> {
    let Some(args) = ViewerArgs::parse(std::env::args().skip(1))? else {
        print_help();
        return Ok(());
    };
    let config = args.app_config();
    let _ = ARGS.set(args);

    run_app::<Viewer>(config)
}

fn print_help() {
    eprintln!(
        "Grayforge Viewer

USAGE:
    cargo run -p grayforge-viewer -- [OPTIONS]

OPTIONS:
    --mesh <PATH>           Wavefront OBJ file to display (default: unit cube)
    --shaders <DIR>         Compiled shader directory (default: <exe dir>/shaders)
    --noise <KIND>          perlin | worley | worley-perlin | checkerboard | solid
                            (default: perlin)
    --size <N>              Texture size in texels (default: 256)
    --frequency <N>         Noise frequency (default: 4)
    --octaves <N>           Noise octaves (default: 4)
    --seed <N>              Seed for solid colors and the CPU fallback (default: random)
    --vsync                 Enable vsync
    --no-validation         Disable Vulkan validation layers
    -h, --help              Print this help message

ENVIRONMENT VARIABLES:
    RUST_LOG                Set log level (e.g., info, debug, trace)"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> anyhow::Result<Option<ViewerArgs>> {
        ViewerArgs::parse(args.iter().map(|s| (*s).to_string()))
    }

    #[test]
    fn defaults_without_arguments() {
        let args = parse(&[]).unwrap().unwrap();
        assert_eq!(args, ViewerArgs::default());
        assert_eq!(args.noise, NoiseChoice::Perlin);
        assert_eq!(args.size, 256);
    }

    #[test]
    fn all_flags() {
        let args = parse(&[
            "--mesh",
            "teapot.obj",
            "--shaders",
            "out/shaders",
            "--noise",
            "worley-perlin",
            "--size",
            "128",
            "--frequency",
            "8",
            "--octaves",
            "3",
            "--seed",
            "42",
            "--vsync",
            "--no-validation",
        ])
        .unwrap()
        .unwrap();
        assert_eq!(args.mesh, Some(PathBuf::from("teapot.obj")));
        assert_eq!(args.shaders, Some(PathBuf::from("out/shaders")));
        assert_eq!(args.size, 128);
        assert_eq!(args.seed, Some(42));
        assert!(args.vsync);
        assert!(!args.validation);
        assert_eq!(
            args.noise_kind(42),
            NoiseKind::WorleyPerlin {
                frequency: 8,
                worley_octaves: 3,
                perlin_octaves: 3
            }
        );
    }

    #[test]
    fn help_short_circuits() {
        assert!(parse(&["--size", "64", "-h"]).unwrap().is_none());
        assert!(parse(&["--help", "--bogus"]).unwrap().is_none());
    }

    #[test]
    fn bad_input_rejected() {
        assert!(parse(&["--size"]).is_err());
        assert!(parse(&["--size", "0"]).is_err());
        assert!(parse(&["--octaves", "-1"]).is_err());
        assert!(parse(&["--noise", "simplex"]).is_err());
        assert!(parse(&["--bogus"]).is_err());
    }

    #[test]
    fn solid_color_derived_from_seed() {
        let args = ViewerArgs {
            noise: NoiseChoice::Solid,
            ..ViewerArgs::default()
        };
        let NoiseKind::SolidColor { rgba } = args.noise_kind(0) else {
            panic!("expected a solid color");
        };
        assert_eq!(rgba, [0x40; 4]);
    }
}
