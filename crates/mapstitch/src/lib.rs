//! mapstitch: post-processing for text detections on stitched slippy-map
//! tile mosaics.
//!
//! A text-detection pipeline runs over a mosaic of Web-Mercator tiles and
//! emits polygon detections in mosaic-pixel coordinates. Two corrections are
//! needed before the results are usable:
//!
//! 1. **Seam merge** – a word cut by a tile seam is detected as two (or
//!    more) polygons; [`merge_adjacent_seam_polygons`] finds polygons near a
//!    tile-boundary multiple, tests pairs for x-axis adjacency, and merges
//!    each matched pair into one axis-aligned box with concatenated text and
//!    averaged score.
//! 2. **Geocoding** – [`convert_feature_collection`] maps every polygon
//!    vertex from mosaic-pixel space through fractional tile coordinates to
//!    WGS-84 lon/lat, attaching the geographic ring alongside the pixel ring.
//!
//! Both transforms are pure and synchronous: they read one
//! [`FeatureCollection`] and allocate a new one, holding no state across
//! calls. Independent collections may be processed in parallel by the
//! caller; a single merge pass is order-dependent (first unconsumed match
//! wins) and must stay sequential.
//!
//! All configuration is explicit: a [`TileGrid`] descriptor per mosaic and a
//! [`MergeConfig`] per merge pass. There is no process-wide state.

pub mod error;
pub mod feature;
pub mod merge;
pub mod tiles;

pub use error::{Error, Result};
pub use feature::{Feature, FeatureCollection, Geometry, Properties, Ring, RingIssue};
pub use merge::{merge_adjacent_seam_polygons, MergeConfig, ScorePolicy};
pub use tiles::{
    convert_feature_collection, mosaic_pixel_to_tile, tile_to_lon_lat, ConvertStats, GeoPoint,
    MosaicCorners, MosaicPoint, TileGrid, DEFAULT_TILE_SIZE_PX,
};
