//! Slippy-map tile arithmetic and mosaic geocoding.
//!
//! Standard Web-Mercator tile pyramid, leaflet convention: tile `(0, 0)` is
//! the north-west corner, `y` grows southward, `n = 2^zoom` tiles per axis.
//! A mosaic is a contiguous rectangular block of tiles stitched into one
//! raster; pixel offsets are measured from the top-left tile's top-left
//! corner.

use log::{info, warn};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::feature::{Feature, FeatureCollection, Ring};

pub const DEFAULT_TILE_SIZE_PX: u32 = 256;

/// Zoom levels beyond this have sub-millimetre tiles and overflow nothing we
/// care about, but reject them as descriptor garbage.
const MAX_ZOOM: u32 = 30;

/// Geographic point, WGS-84 degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoPoint {
    pub lon: f64,
    pub lat: f64,
}

/// Pixel offset from the mosaic's top-left origin. Stored image-style
/// (y grows downward); the signed corner helpers negate y to give a
/// Cartesian-style offset.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MosaicPoint {
    pub x: f64,
    pub y: f64,
}

/// The four corners of a mosaic in some coordinate space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MosaicCorners<T> {
    pub top_left: T,
    pub top_right: T,
    pub bottom_left: T,
    pub bottom_right: T,
}

/// Inverse Web-Mercator projection of fractional tile coordinates.
///
/// `tile_x` / `tile_y` need not be integers: `(100.5, 200.25)` is a point
/// inside tile `(100, 200)`. No bounds clamping is performed; coordinates
/// outside `[0, 2^zoom]` extrapolate to geographically meaningless values.
/// This is a pure projection, not a validator.
pub fn tile_to_lon_lat(zoom: u32, tile_x: f64, tile_y: f64) -> GeoPoint {
    let n = 2f64.powi(zoom as i32);
    let lon = tile_x / n * 360.0 - 180.0;
    let lat = (std::f64::consts::PI * (1.0 - 2.0 * tile_y / n)).sinh().atan().to_degrees();
    GeoPoint { lon, lat }
}

/// Fractional tile coordinates of a mosaic pixel, given the origin (minimum)
/// tile indices of the mosaic.
///
/// The pixel offset is folded through `abs`, so callers must supply
/// magnitudes from the origin; image rings that store y downward as negative
/// values land on the correct tile row. Points above/left of the origin are
/// not representable (see [`convert_feature_collection`], which rejects
/// out-of-mosaic pixels up front instead of silently mirroring them).
pub fn mosaic_pixel_to_tile(
    pixel_x: f64,
    pixel_y: f64,
    origin_tile_x: u32,
    origin_tile_y: u32,
    tile_size_px: u32,
) -> (f64, f64) {
    let size = tile_size_px as f64;
    (
        origin_tile_x as f64 + (pixel_x / size).abs(),
        origin_tile_y as f64 + (pixel_y / size).abs(),
    )
}

/// Immutable per-job descriptor of one stitched mosaic.
///
/// Built from caller-supplied job metadata (in the source system, a JSON
/// object from the map-tile-picker UI). The `x_tiles` / `y_tiles` lists are
/// the boundary indices of the block: the minimum entry is the first tile
/// column/row and the maximum entry is the far edge (exclusive), so
/// `x_tiles = [100, 101]` describes a mosaic one tile wide.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileGrid {
    zoom: u32,
    x_start: u32,
    x_stop: u32,
    y_start: u32,
    y_stop: u32,
    tile_size_px: u32,
}

impl TileGrid {
    pub fn new(zoom: i64, x_tiles: &[i64], y_tiles: &[i64]) -> Result<Self> {
        if !(0..=MAX_ZOOM as i64).contains(&zoom) {
            return Err(Error::Config(format!(
                "zoom {zoom} outside [0, {MAX_ZOOM}]"
            )));
        }
        let zoom = zoom as u32;
        let (x_start, x_stop) = axis_range("x_tiles", x_tiles, zoom)?;
        let (y_start, y_stop) = axis_range("y_tiles", y_tiles, zoom)?;
        Ok(Self {
            zoom,
            x_start,
            x_stop,
            y_start,
            y_stop,
            tile_size_px: DEFAULT_TILE_SIZE_PX,
        })
    }

    pub fn with_tile_size(mut self, tile_size_px: u32) -> Result<Self> {
        if tile_size_px == 0 {
            return Err(Error::Config("tile_size_px must be positive".to_owned()));
        }
        self.tile_size_px = tile_size_px;
        Ok(self)
    }

    /// Parse the `tile_info` JSON object the caller ships as job metadata:
    /// `{"zoom": z, "x_tiles": [..], "y_tiles": [..]}`. Numeric strings are
    /// accepted where the UI serializes numbers as text.
    pub fn from_json(tile_info: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(tile_info)
            .map_err(|e| Error::Config(format!("tile_info is not valid JSON: {e}")))?;
        let zoom = field_as_i64(&value, "zoom")?;
        let x_tiles = field_as_i64_list(&value, "x_tiles")?;
        let y_tiles = field_as_i64_list(&value, "y_tiles")?;
        Self::new(zoom, &x_tiles, &y_tiles)
    }

    pub fn zoom(&self) -> u32 {
        self.zoom
    }

    pub fn tile_size_px(&self) -> u32 {
        self.tile_size_px
    }

    /// Mosaic width in pixels.
    pub fn width_px(&self) -> f64 {
        ((self.x_stop - self.x_start) * self.tile_size_px) as f64
    }

    /// Mosaic height in pixels.
    pub fn height_px(&self) -> f64 {
        ((self.y_stop - self.y_start) * self.tile_size_px) as f64
    }

    /// Geographic corners of the whole mosaic: the near edge of the first
    /// tile through the far edge of the last.
    pub fn corner_geo_coordinates(&self) -> MosaicCorners<GeoPoint> {
        let (x0, x1) = (self.x_start as f64, self.x_stop as f64);
        let (y0, y1) = (self.y_start as f64, self.y_stop as f64);
        MosaicCorners {
            top_left: tile_to_lon_lat(self.zoom, x0, y0),
            top_right: tile_to_lon_lat(self.zoom, x1, y0),
            bottom_left: tile_to_lon_lat(self.zoom, x0, y1),
            bottom_right: tile_to_lon_lat(self.zoom, x1, y1),
        }
    }

    /// The same corners in signed pixel space: `(0, 0)` top-left, y negated
    /// so the bottom edge sits at `-height_px`.
    pub fn corner_pixel_coordinates(&self) -> MosaicCorners<MosaicPoint> {
        let w = self.width_px();
        let h = self.height_px();
        MosaicCorners {
            top_left: MosaicPoint { x: 0.0, y: 0.0 },
            top_right: MosaicPoint { x: w, y: 0.0 },
            bottom_left: MosaicPoint { x: 0.0, y: -h },
            bottom_right: MosaicPoint { x: w, y: -h },
        }
    }

    /// Geocode one mosaic pixel.
    pub fn pixel_to_geo(&self, pixel_x: f64, pixel_y: f64) -> GeoPoint {
        let (tile_x, tile_y) = mosaic_pixel_to_tile(
            pixel_x,
            pixel_y,
            self.x_start,
            self.y_start,
            self.tile_size_px,
        );
        tile_to_lon_lat(self.zoom, tile_x, tile_y)
    }

    /// Whether a pixel's magnitude falls inside the mosaic extent. Signs are
    /// ignored, matching the `abs` fold in the tile back-conversion.
    fn contains_pixel(&self, pixel_x: f64, pixel_y: f64) -> bool {
        pixel_x.is_finite()
            && pixel_y.is_finite()
            && pixel_x.abs() <= self.width_px()
            && pixel_y.abs() <= self.height_px()
    }
}

fn axis_range(name: &str, tiles: &[i64], zoom: u32) -> Result<(u32, u32)> {
    let (Some(&min), Some(&max)) = (tiles.iter().min(), tiles.iter().max()) else {
        return Err(Error::Config(format!("{name} is empty")));
    };
    if min < 0 {
        return Err(Error::Config(format!("{name} contains negative index {min}")));
    }
    // The far-edge index may equal 2^zoom (bottom/right edge of the world).
    let limit = 1i64 << zoom;
    if max > limit {
        return Err(Error::Config(format!(
            "{name} index {max} exceeds 2^{zoom} = {limit}"
        )));
    }
    if min == max {
        return Err(Error::Config(format!(
            "{name} must span at least one tile (got [{min}, {max}])"
        )));
    }
    Ok((min as u32, max as u32))
}

fn field_as_i64(value: &Value, name: &str) -> Result<i64> {
    let field = value
        .get(name)
        .ok_or_else(|| Error::Config(format!("tile_info is missing '{name}'")))?;
    coerce_i64(field).ok_or_else(|| Error::Config(format!("tile_info '{name}' is not an integer")))
}

fn field_as_i64_list(value: &Value, name: &str) -> Result<Vec<i64>> {
    let field = value
        .get(name)
        .ok_or_else(|| Error::Config(format!("tile_info is missing '{name}'")))?;
    let items = field
        .as_array()
        .ok_or_else(|| Error::Config(format!("tile_info '{name}' is not a list")))?;
    items
        .iter()
        .map(|item| {
            coerce_i64(item)
                .ok_or_else(|| Error::Config(format!("tile_info '{name}' holds a non-integer")))
        })
        .collect()
}

/// The picker UI sometimes serializes numbers as strings; accept both.
fn coerce_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Counts from one [`convert_feature_collection`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConvertStats {
    /// Polygon features annotated with a `latlon` ring.
    pub converted: usize,
    /// Non-Polygon features dropped from the output.
    pub dropped_non_polygon: usize,
    /// Polygon features skipped for malformed or out-of-mosaic coordinates.
    pub skipped_invalid: usize,
}

/// Annotate every Polygon feature with a geographic `latlon` ring computed
/// from its pixel ring; the pixel ring is retained unchanged, properties are
/// copied through.
///
/// Non-Polygon features are dropped (only Polygon geometries are supported
/// by this pipeline stage); malformed features and features with a vertex
/// outside the mosaic are skipped. Both conditions are logged and counted,
/// never fatal — descriptor problems were already rejected when the
/// [`TileGrid`] was built.
pub fn convert_feature_collection(
    grid: &TileGrid,
    collection: &FeatureCollection,
) -> (FeatureCollection, ConvertStats) {
    let mut stats = ConvertStats::default();
    let mut features = Vec::with_capacity(collection.features.len());

    for (index, feature) in collection.features.iter().enumerate() {
        let ring = match feature.geometry.outer_ring() {
            Ok(ring) => ring,
            Err(issue) => {
                let error = Error::SkippedFeature {
                    index,
                    reason: issue.to_string(),
                };
                warn!("{error}");
                if feature.geometry.is_polygon() {
                    stats.skipped_invalid += 1;
                } else {
                    stats.dropped_non_polygon += 1;
                }
                continue;
            }
        };
        if ring.is_empty() {
            warn!("{}", Error::EmptyGeometry { index });
            stats.skipped_invalid += 1;
            continue;
        }
        if let Some(vertex) = ring.iter().find(|p| !grid.contains_pixel(p[0], p[1])) {
            let error = Error::SkippedFeature {
                index,
                reason: format!(
                    "vertex ({}, {}) outside the {}x{} px mosaic",
                    vertex[0],
                    vertex[1],
                    grid.width_px(),
                    grid.height_px()
                ),
            };
            warn!("{error}");
            stats.skipped_invalid += 1;
            continue;
        }

        let latlon: Ring = ring
            .iter()
            .map(|p| {
                let geo = grid.pixel_to_geo(p[0], p[1]);
                [geo.lon, geo.lat]
            })
            .collect();

        let mut geometry = feature.geometry.clone();
        geometry.latlon = Some(vec![latlon]);
        features.push(Feature {
            kind: feature.kind.clone(),
            geometry,
            properties: feature.properties.clone(),
        });
        stats.converted += 1;
    }

    if stats.dropped_non_polygon > 0 || stats.skipped_invalid > 0 {
        info!(
            "geocoding kept {} features, dropped {} non-Polygon, skipped {} invalid",
            stats.converted, stats.dropped_non_polygon, stats.skipped_invalid
        );
    }
    (FeatureCollection::new(features), stats)
}
