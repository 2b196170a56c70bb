//! Voxelizes a Wavefront OBJ file into a span heightfield and writes it out as JSON.

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context as _, bail};
use glam::{UVec3, Vec3A};
use spanfield::{AreaType, Heightfield, OutputMode, RasterizationConfig, TriMesh};
use tracing_subscriber::EnvFilter;

const USAGE: &str = "Usage: spanfield <input.obj> <output.json> [config.json] [spans|voxels|span_points|voxel_points]";

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse(std::env::args().skip(1))?;
    let trimesh = load_trimesh(&args.input)?;
    let config = match &args.config {
        Some(path) => {
            let json = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config {}", path.display()))?;
            serde_json::from_str(&json)
                .with_context(|| format!("Failed to parse config {}", path.display()))?
        }
        None => RasterizationConfig::default(),
    };
    tracing::debug!("Using {config:?}");

    let heightfield = Heightfield::from_trimesh(&trimesh, &config)
        .with_context(|| format!("Failed to voxelize {}", args.input.display()))?;
    tracing::info!(
        "Voxelized {} triangles into {}x{} columns with {} spans in {} pool blocks",
        trimesh.triangle_count(),
        heightfield.width(),
        heightfield.height(),
        heightfield.span_count(),
        heightfield.allocated_spans().block_count()
    );

    let output = heightfield.output(args.mode);
    let json = serde_json::to_string_pretty(&output).context("Failed to serialize heightfield")?;
    fs::write(&args.output, json)
        .with_context(|| format!("Failed to write {}", args.output.display()))?;
    tracing::info!(
        "Wrote {} {:?} entries to {}",
        output.geometry.len(),
        args.mode,
        args.output.display()
    );
    Ok(())
}

struct Args {
    input: PathBuf,
    output: PathBuf,
    config: Option<PathBuf>,
    mode: OutputMode,
}

impl Args {
    fn parse(mut args: impl Iterator<Item = String>) -> anyhow::Result<Self> {
        let (Some(input), Some(output)) = (args.next(), args.next()) else {
            bail!("{USAGE}");
        };
        let mut config = None;
        let mut mode = OutputMode::default();
        for arg in args {
            match parse_mode(&arg) {
                Some(parsed) => mode = parsed,
                None if config.is_none() => config = Some(PathBuf::from(arg)),
                None => bail!("Unexpected argument {arg}\n{USAGE}"),
            }
        }
        Ok(Self {
            input: input.into(),
            output: output.into(),
            config,
            mode,
        })
    }
}

fn parse_mode(arg: &str) -> Option<OutputMode> {
    match arg {
        "spans" => Some(OutputMode::Spans),
        "voxels" => Some(OutputMode::Voxels),
        "span_points" => Some(OutputMode::SpanPoints),
        "voxel_points" => Some(OutputMode::VoxelPoints),
        _ => None,
    }
}

/// Loads every model of an OBJ file into a single walkable [`TriMesh`].
fn load_trimesh(path: &Path) -> anyhow::Result<TriMesh> {
    let (models, _materials) = tobj::load_obj(
        path,
        &tobj::LoadOptions {
            triangulate: true,
            single_index: true,
            ..Default::default()
        },
    )
    .with_context(|| format!("Failed to load {}", path.display()))?;

    let mut trimesh = TriMesh::default();
    for model in models {
        let vertices: Vec<_> = model
            .mesh
            .positions
            .chunks_exact(3)
            .map(|position| Vec3A::new(position[0], position[1], position[2]))
            .collect();
        let indices: Vec<_> = model
            .mesh
            .indices
            .chunks_exact(3)
            .map(|triangle| UVec3::new(triangle[0], triangle[1], triangle[2]))
            .collect();
        tracing::debug!(
            "Loaded model {:?} with {} vertices and {} triangles",
            model.name,
            vertices.len(),
            indices.len()
        );
        trimesh.extend(TriMesh::with_area_type(
            vertices,
            indices,
            AreaType::DEFAULT_WALKABLE,
        ));
    }
    if trimesh.triangle_count() == 0 {
        bail!("{} contains no triangles", path.display());
    }
    Ok(trimesh)
}
