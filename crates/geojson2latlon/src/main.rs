//! geojson2latlon: post-process one mosaic's text detections.
//!
//! Reads the detector's GeoJSON (polygons in mosaic-pixel coordinates),
//! merges labels split across tile seams, geocodes every polygon to WGS-84
//! lon/lat, and writes the corrected GeoJSON next to the basename of the
//! input into the output directory. The tile grid the mosaic was stitched
//! from arrives as a JSON object on the command line, the way the
//! map-tile-picker UI serializes it.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use log::info;

use mapstitch::{
    convert_feature_collection, merge_adjacent_seam_polygons, FeatureCollection, MergeConfig,
    ScorePolicy, TileGrid,
};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ScoreArg {
    /// Absent scores count as 0 in the merged average (source-compatible).
    Zero,
    /// Absent scores are left out of the merged average.
    Exclude,
}

impl From<ScoreArg> for ScorePolicy {
    fn from(arg: ScoreArg) -> Self {
        match arg {
            ScoreArg::Zero => ScorePolicy::CountMissingAsZero,
            ScoreArg::Exclude => ScorePolicy::ExcludeMissing,
        }
    }
}

#[derive(Parser, Debug, Clone)]
#[command(name = "geojson2latlon", version)]
struct Args {
    /// Detector GeoJSON file, coordinates in mosaic pixels.
    #[arg(long)]
    in_geojson_file: PathBuf,

    /// Directory the corrected GeoJSON is written to (created if missing).
    #[arg(long)]
    out_geojson_dir: PathBuf,

    /// Tile info as a JSON object: {"zoom": z, "x_tiles": [..], "y_tiles": [..]}
    #[arg(long)]
    tile_info: String,

    /// Distance (px) within which a vertex counts as touching a seam.
    #[arg(long, default_value_t = 5.0)]
    edge_threshold: f64,

    /// Tile-boundary spacing unit of the stitched mosaic (px).
    #[arg(long, default_value_t = 1000.0)]
    seam_spacing: f64,

    /// Skip the seam-merge pass and only geocode.
    #[arg(long, default_value_t = false)]
    no_merge: bool,

    /// Also require merge partners' y-ranges within this distance (px).
    #[arg(long)]
    strict_y: Option<f64>,

    /// How absent confidence scores enter a merged average.
    #[arg(long, value_enum, default_value_t = ScoreArg::Zero)]
    score_policy: ScoreArg,
}

fn main() -> Result<()> {
    env_logger::init();
    run(Args::parse())
}

fn run(args: Args) -> Result<()> {
    // Descriptor problems are fatal before any feature is touched.
    let grid = TileGrid::from_json(&args.tile_info).context("parsing --tile-info")?;

    let raw = fs::read_to_string(&args.in_geojson_file)
        .with_context(|| format!("reading {}", args.in_geojson_file.display()))?;
    let collection: FeatureCollection = serde_json::from_str(&raw)
        .with_context(|| format!("parsing {}", args.in_geojson_file.display()))?;
    let features_in = collection.len();

    let merged = if args.no_merge {
        collection
    } else {
        let cfg = MergeConfig {
            edge_threshold: args.edge_threshold,
            seam_spacing: args.seam_spacing,
            y_threshold: args.strict_y,
            score_policy: args.score_policy.into(),
        };
        merge_adjacent_seam_polygons(&collection, &cfg)?
    };
    let pairs_merged = features_in - merged.len();

    let (converted, stats) = convert_feature_collection(&grid, &merged);

    fs::create_dir_all(&args.out_geojson_dir)
        .with_context(|| format!("creating {}", args.out_geojson_dir.display()))?;
    let filename = args
        .in_geojson_file
        .file_name()
        .context("--in-geojson-file has no file name")?;
    let out_path = args.out_geojson_dir.join(filename);
    let output = serde_json::to_string(&converted).context("serializing output GeoJSON")?;
    fs::write(&out_path, output).with_context(|| format!("writing {}", out_path.display()))?;

    info!(
        "{features_in} features in, {} out ({pairs_merged} seam merges, {} non-Polygon dropped, {} skipped) -> {}",
        converted.len(),
        stats.dropped_non_polygon,
        stats.skipped_invalid,
        out_path.display()
    );

    Ok(())
}
