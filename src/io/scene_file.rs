//! Intermediate scene files
//!
//! A scene file is a gzip stream holding the magic bytes, the length of a
//! JSON header as a little-endian `u32`, the header itself, then every array
//! as raw little-endian values in row-major order, in header order. Fill
//! values are stored as IEEE-754 bit patterns so NaN survives the trip.

use crate::core::gridded_scene::{assemble_scene, GriddedProduct, GriddedScene};
use crate::types::{
    GridDefinition, RemapError, RemapResult, ScanGeometry, SwathDefinition, SwathProduct, SwathScene,
};
use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

const MAGIC: &[u8; 8] = b"S2GSCENE";
const FORMAT_VERSION: u32 = 1;
const MAX_HEADER_BYTES: u32 = 64 * 1024 * 1024;

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
enum SceneHeader {
    Gridded(GriddedHeader),
    Swath(SwathHeader),
}

#[derive(Debug, Serialize, Deserialize)]
struct GriddedHeader {
    version: u32,
    grid: GridDefinition,
    fill_value_bits: u32,
    begin_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    products: Vec<ProductHeader>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SwathHeader {
    version: u32,
    scan_geometry: ScanGeometry,
    swaths: Vec<SwathEntry>,
    products: Vec<ProductHeader>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SwathEntry {
    swath_name: String,
    fill_value_bits: u64,
    rows_per_scan: usize,
    shape: [usize; 2],
}

#[derive(Debug, Serialize, Deserialize)]
struct ProductHeader {
    product_name: String,
    description: String,
    units: String,
    satellite: String,
    instrument: String,
    data_kind: String,
    begin_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    swath_name: String,
    fill_value_bits: u32,
    shape: [usize; 2],
}

/// Reader and writer for intermediate scene files
pub struct SceneFile;

impl SceneFile {
    pub fn write_gridded<P: AsRef<Path>>(path: P, scene: &GriddedScene) -> RemapResult<()> {
        log::info!("Writing gridded scene: {}", path.as_ref().display());
        let file = File::create(path.as_ref())?;
        let mut encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
        Self::write_gridded_to(&mut encoder, scene)?;
        encoder.finish()?.flush()?;
        Ok(())
    }

    pub fn read_gridded<P: AsRef<Path>>(path: P) -> RemapResult<GriddedScene> {
        log::info!("Reading gridded scene: {}", path.as_ref().display());
        let file = File::open(path.as_ref())?;
        Self::read_gridded_from(GzDecoder::new(BufReader::new(file)))
    }

    pub fn write_swath<P: AsRef<Path>>(path: P, scene: &SwathScene) -> RemapResult<()> {
        log::info!("Writing swath scene: {}", path.as_ref().display());
        let file = File::create(path.as_ref())?;
        let mut encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
        Self::write_swath_to(&mut encoder, scene)?;
        encoder.finish()?.flush()?;
        Ok(())
    }

    pub fn read_swath<P: AsRef<Path>>(path: P) -> RemapResult<SwathScene> {
        log::info!("Reading swath scene: {}", path.as_ref().display());
        let file = File::open(path.as_ref())?;
        Self::read_swath_from(GzDecoder::new(BufReader::new(file)))
    }

    /// Write the uncompressed payload of a gridded scene
    pub fn write_gridded_to<W: Write>(writer: &mut W, scene: &GriddedScene) -> RemapResult<()> {
        let header = SceneHeader::Gridded(GriddedHeader {
            version: FORMAT_VERSION,
            grid: scene.grid().clone(),
            fill_value_bits: scene.fill_value().to_bits(),
            begin_time: scene.begin_time(),
            end_time: scene.end_time(),
            products: scene
                .products()
                .map(|p| ProductHeader {
                    product_name: p.product_name.clone(),
                    description: p.description.clone(),
                    units: p.units.clone(),
                    satellite: p.satellite.clone(),
                    instrument: p.instrument.clone(),
                    data_kind: p.data_kind.clone(),
                    begin_time: p.begin_time,
                    end_time: p.end_time,
                    swath_name: p.source_swath.clone(),
                    fill_value_bits: scene.fill_value().to_bits(),
                    shape: [p.data.nrows(), p.data.ncols()],
                })
                .collect(),
        });
        write_header(writer, &header)?;
        for product in scene.products() {
            write_f32_array(writer, &product.data)?;
        }
        Ok(())
    }

    /// Read the uncompressed payload of a gridded scene
    pub fn read_gridded_from<R: Read>(mut reader: R) -> RemapResult<GriddedScene> {
        let header = match read_header(&mut reader)? {
            SceneHeader::Gridded(header) => header,
            SceneHeader::Swath(_) => {
                return Err(RemapError::InvalidFormat("expected a gridded scene, found a swath scene".to_string()))
            }
        };
        check_version(header.version)?;
        header.grid.validate()?;
        let (rows, cols) = header.grid.shape();

        let mut products = Vec::with_capacity(header.products.len());
        for entry in header.products {
            if entry.shape != [rows, cols] {
                return Err(RemapError::InvalidFormat(format!(
                    "product '{}' has shape {:?}, grid '{}' is {:?}",
                    entry.product_name,
                    entry.shape,
                    header.grid.grid_name,
                    [rows, cols]
                )));
            }
            let data = read_f32_array(&mut reader, entry.shape)?;
            products.push(GriddedProduct {
                product_name: entry.product_name,
                description: entry.description,
                units: entry.units,
                satellite: entry.satellite,
                instrument: entry.instrument,
                data_kind: entry.data_kind,
                begin_time: entry.begin_time,
                end_time: entry.end_time,
                source_swath: entry.swath_name,
                data,
            });
        }

        assemble_scene(
            header.grid,
            f32::from_bits(header.fill_value_bits),
            header.begin_time,
            header.end_time,
            products,
        )
    }

    /// Write the uncompressed payload of a swath scene
    pub fn write_swath_to<W: Write>(writer: &mut W, scene: &SwathScene) -> RemapResult<()> {
        let header = SceneHeader::Swath(SwathHeader {
            version: FORMAT_VERSION,
            scan_geometry: scene.scan_geometry,
            swaths: scene
                .swath_definitions()
                .map(|s| {
                    let (rows, cols) = s.dim();
                    SwathEntry {
                        swath_name: s.swath_name.clone(),
                        fill_value_bits: s.fill_value.to_bits(),
                        rows_per_scan: s.rows_per_scan,
                        shape: [rows, cols],
                    }
                })
                .collect(),
            products: scene
                .products()
                .map(|p| ProductHeader {
                    product_name: p.product_name.clone(),
                    description: p.description.clone(),
                    units: p.units.clone(),
                    satellite: p.satellite.clone(),
                    instrument: p.instrument.clone(),
                    data_kind: p.data_kind.clone(),
                    begin_time: p.begin_time,
                    end_time: p.end_time,
                    swath_name: p.swath_name.clone(),
                    fill_value_bits: p.fill_value.to_bits(),
                    shape: [p.data.nrows(), p.data.ncols()],
                })
                .collect(),
        });
        write_header(writer, &header)?;
        for swath in scene.swath_definitions() {
            write_f64_array(writer, &swath.longitude)?;
            write_f64_array(writer, &swath.latitude)?;
        }
        for product in scene.products() {
            write_f32_array(writer, &product.data)?;
        }
        Ok(())
    }

    /// Read the uncompressed payload of a swath scene
    pub fn read_swath_from<R: Read>(mut reader: R) -> RemapResult<SwathScene> {
        let header = match read_header(&mut reader)? {
            SceneHeader::Swath(header) => header,
            SceneHeader::Gridded(_) => {
                return Err(RemapError::InvalidFormat("expected a swath scene, found a gridded scene".to_string()))
            }
        };
        check_version(header.version)?;

        let mut scene = SwathScene::new(header.scan_geometry);
        let swath_shapes: BTreeMap<String, [usize; 2]> =
            header.swaths.iter().map(|s| (s.swath_name.clone(), s.shape)).collect();
        for entry in header.swaths {
            let longitude = read_f64_array(&mut reader, entry.shape)?;
            let latitude = read_f64_array(&mut reader, entry.shape)?;
            scene.add_swath_definition(SwathDefinition::new(
                entry.swath_name,
                longitude,
                latitude,
                f64::from_bits(entry.fill_value_bits),
                entry.rows_per_scan,
            )?)?;
        }
        for entry in header.products {
            if swath_shapes.get(&entry.swath_name) != Some(&entry.shape) {
                return Err(RemapError::InvalidFormat(format!(
                    "product '{}' of shape {:?} does not match swath '{}'",
                    entry.product_name, entry.shape, entry.swath_name
                )));
            }
            let data = read_f32_array(&mut reader, entry.shape)?;
            let mut product = SwathProduct::new(
                entry.product_name,
                entry.swath_name,
                data,
                f32::from_bits(entry.fill_value_bits),
                entry.begin_time,
                entry.end_time,
            );
            product.description = entry.description;
            product.units = entry.units;
            product.satellite = entry.satellite;
            product.instrument = entry.instrument;
            product.data_kind = entry.data_kind;
            scene.add_product(product)?;
        }

        Ok(scene)
    }
}

fn check_version(version: u32) -> RemapResult<()> {
    if version != FORMAT_VERSION {
        return Err(RemapError::InvalidFormat(format!(
            "unsupported scene file version {} (expected {})",
            version, FORMAT_VERSION
        )));
    }
    Ok(())
}

fn write_header<W: Write>(writer: &mut W, header: &SceneHeader) -> RemapResult<()> {
    let json = serde_json::to_vec(header)?;
    let length = u32::try_from(json.len())
        .ok()
        .filter(|&n| n <= MAX_HEADER_BYTES)
        .ok_or_else(|| RemapError::InvalidFormat(format!("header of {} bytes is too large", json.len())))?;
    writer.write_all(MAGIC)?;
    writer.write_all(&length.to_le_bytes())?;
    writer.write_all(&json)?;
    Ok(())
}

fn read_header<R: Read>(reader: &mut R) -> RemapResult<SceneHeader> {
    let mut magic = [0u8; 8];
    reader.read_exact(&mut magic)?;
    if &magic != MAGIC {
        return Err(RemapError::InvalidFormat("not a scene file".to_string()));
    }

    let mut length = [0u8; 4];
    reader.read_exact(&mut length)?;
    let length = u32::from_le_bytes(length);
    if length > MAX_HEADER_BYTES {
        return Err(RemapError::InvalidFormat(format!("header length {} is implausible", length)));
    }

    let json = read_bytes(reader, length as usize, "header")?;
    log::debug!("Scene file header: {} bytes", length);
    Ok(serde_json::from_slice(&json)?)
}

/// Read exactly `len` bytes; the buffer grows with the data actually present
fn read_bytes<R: Read>(reader: &mut R, len: usize, what: &str) -> RemapResult<Vec<u8>> {
    let mut bytes = Vec::new();
    reader.by_ref().take(len as u64).read_to_end(&mut bytes)?;
    if bytes.len() != len {
        return Err(RemapError::InvalidFormat(format!(
            "truncated {}: expected {} bytes, found {}",
            what,
            len,
            bytes.len()
        )));
    }
    Ok(bytes)
}

fn element_count(shape: [usize; 2], element_size: usize) -> RemapResult<usize> {
    shape[0]
        .checked_mul(shape[1])
        .and_then(|n| n.checked_mul(element_size).map(|_| n))
        .ok_or_else(|| RemapError::InvalidFormat(format!("array shape {:?} is too large", shape)))
}

fn write_f32_array<W: Write>(writer: &mut W, array: &Array2<f32>) -> RemapResult<()> {
    let mut bytes = Vec::with_capacity(array.len() * 4);
    for value in array.iter() {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    writer.write_all(&bytes)?;
    Ok(())
}

fn write_f64_array<W: Write>(writer: &mut W, array: &Array2<f64>) -> RemapResult<()> {
    let mut bytes = Vec::with_capacity(array.len() * 8);
    for value in array.iter() {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    writer.write_all(&bytes)?;
    Ok(())
}

fn read_f32_array<R: Read>(reader: &mut R, shape: [usize; 2]) -> RemapResult<Array2<f32>> {
    let count = element_count(shape, 4)?;
    let bytes = read_bytes(reader, count * 4, "array")?;
    let values: Vec<f32> = bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    Array2::from_shape_vec((shape[0], shape[1]), values)
        .map_err(|e| RemapError::InvalidFormat(format!("array of shape {:?}: {}", shape, e)))
}

fn read_f64_array<R: Read>(reader: &mut R, shape: [usize; 2]) -> RemapResult<Array2<f64>> {
    let count = element_count(shape, 8)?;
    let bytes = read_bytes(reader, count * 8, "array")?;
    let values: Vec<f64> = bytes
        .chunks_exact(8)
        .map(|c| f64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
        .collect();
    Array2::from_shape_vec((shape[0], shape[1]), values)
        .map_err(|e| RemapError::InvalidFormat(format!("array of shape {:?}: {}", shape, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::gridded_scene::GriddedSceneBuilder;
    use ndarray::array;

    fn epoch() -> DateTime<Utc> {
        DateTime::from_timestamp(1_600_000_000, 0).unwrap()
    }

    #[test]
    fn test_gridded_payload_keeps_nan_fill() {
        let grid = GridDefinition::new("g", "+proj=latlong", -10.0, 5.0, 0.5, -0.5, 2, 2).unwrap();
        let mut builder = GriddedSceneBuilder::new(grid, f32::NAN, epoch(), epoch());
        let product = SwathProduct::new("bt", "nav", array![[0.0f32]], f32::NAN, epoch(), epoch());
        builder.add_product(&product, array![[1.5, f32::NAN], [f32::NAN, -2.0]]).unwrap();
        let scene = builder.build();

        let mut payload = Vec::new();
        SceneFile::write_gridded_to(&mut payload, &scene).unwrap();
        let loaded = SceneFile::read_gridded_from(payload.as_slice()).unwrap();

        assert!(loaded.fill_value().is_nan());
        assert_eq!(loaded.grid(), scene.grid());
        let data = &loaded.product("bt").unwrap().data;
        assert_eq!(data[[0, 0]], 1.5);
        assert!(data[[0, 1]].is_nan());
        assert_eq!(data[[1, 1]], -2.0);
    }

    #[test]
    fn test_rejects_wrong_kind_and_magic() {
        let scene = SwathScene::new(ScanGeometry::default());
        let mut payload = Vec::new();
        SceneFile::write_swath_to(&mut payload, &scene).unwrap();
        assert!(matches!(
            SceneFile::read_gridded_from(payload.as_slice()),
            Err(RemapError::InvalidFormat(_))
        ));

        payload[0] = b'X';
        assert!(matches!(
            SceneFile::read_swath_from(payload.as_slice()),
            Err(RemapError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_truncated_payload_is_an_error() {
        let grid = GridDefinition::new("g", "+proj=latlong", 0.0, 0.0, 1.0, 1.0, 3, 3).unwrap();
        let mut builder = GriddedSceneBuilder::new(grid, -1.0, epoch(), epoch());
        let product = SwathProduct::new("bt", "nav", array![[0.0f32]], -1.0, epoch(), epoch());
        builder.add_product(&product, Array2::from_elem((3, 3), 7.0)).unwrap();

        let mut payload = Vec::new();
        SceneFile::write_gridded_to(&mut payload, &builder.build()).unwrap();
        payload.truncate(payload.len() - 4);
        assert!(matches!(
            SceneFile::read_gridded_from(payload.as_slice()),
            Err(RemapError::InvalidFormat(_))
        ));
    }

    fn product_header(swath_name: &str, shape: [usize; 2]) -> ProductHeader {
        ProductHeader {
            product_name: "bt".to_string(),
            description: String::new(),
            units: "K".to_string(),
            satellite: String::new(),
            instrument: String::new(),
            data_kind: String::new(),
            begin_time: epoch(),
            end_time: epoch(),
            swath_name: swath_name.to_string(),
            fill_value_bits: f32::NAN.to_bits(),
            shape,
        }
    }

    #[test]
    fn test_huge_shapes_fail_without_allocating() {
        let huge = [1 << 30, 1 << 30];

        // Product shape disagreeing with its grid
        let grid = GridDefinition::new("g", "+proj=latlong", 0.0, 0.0, 1.0, 1.0, 2, 2).unwrap();
        let mut payload = Vec::new();
        write_header(
            &mut payload,
            &SceneHeader::Gridded(GriddedHeader {
                version: FORMAT_VERSION,
                grid,
                fill_value_bits: f32::NAN.to_bits(),
                begin_time: epoch(),
                end_time: epoch(),
                products: vec![product_header("nav", huge)],
            }),
        )
        .unwrap();
        assert!(matches!(
            SceneFile::read_gridded_from(payload.as_slice()),
            Err(RemapError::InvalidFormat(_))
        ));

        // Consistent but enormous grid with no data behind the header
        let grid = GridDefinition::new("g", "+proj=latlong", 0.0, 0.0, 1.0, 1.0, huge[0], huge[1]).unwrap();
        let mut payload = Vec::new();
        write_header(
            &mut payload,
            &SceneHeader::Gridded(GriddedHeader {
                version: FORMAT_VERSION,
                grid,
                fill_value_bits: f32::NAN.to_bits(),
                begin_time: epoch(),
                end_time: epoch(),
                products: vec![product_header("nav", huge)],
            }),
        )
        .unwrap();
        assert!(matches!(
            SceneFile::read_gridded_from(payload.as_slice()),
            Err(RemapError::InvalidFormat(_))
        ));

        // Swath navigation of the same size
        let mut payload = Vec::new();
        write_header(
            &mut payload,
            &SceneHeader::Swath(SwathHeader {
                version: FORMAT_VERSION,
                scan_geometry: ScanGeometry::default(),
                swaths: vec![SwathEntry {
                    swath_name: "nav".to_string(),
                    fill_value_bits: f64::NAN.to_bits(),
                    rows_per_scan: 1,
                    shape: huge,
                }],
                products: vec![product_header("nav", huge)],
            }),
        )
        .unwrap();
        assert!(matches!(
            SceneFile::read_swath_from(payload.as_slice()),
            Err(RemapError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_swath_product_shape_must_match_navigation() {
        let mut payload = Vec::new();
        write_header(
            &mut payload,
            &SceneHeader::Swath(SwathHeader {
                version: FORMAT_VERSION,
                scan_geometry: ScanGeometry::default(),
                swaths: vec![SwathEntry {
                    swath_name: "nav".to_string(),
                    fill_value_bits: f64::NAN.to_bits(),
                    rows_per_scan: 1,
                    shape: [1, 1],
                }],
                products: vec![product_header("nav", [1 << 30, 1 << 30])],
            }),
        )
        .unwrap();
        write_f64_array(&mut payload, &array![[10.0]]).unwrap();
        write_f64_array(&mut payload, &array![[45.0]]).unwrap();
        assert!(matches!(
            SceneFile::read_swath_from(payload.as_slice()),
            Err(RemapError::InvalidFormat(_))
        ));
    }
}
