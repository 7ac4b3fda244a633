//! PLY vertex codec on top of `ply-rs`.
//!
//! Any encoding `ply-rs` reads is accepted. Only the `vertex` element is
//! turned into a cloud; faces and other elements are parsed and dropped.
//! Clouds are written with double precision positions and normals.

use std::fs::File;
use std::io::{BufReader, BufWriter, Cursor, Read, Write};
use std::path::Path;

use ply_rs::parser::Parser;
use ply_rs::ply::{
    Addable, DefaultElement, ElementDef, Encoding, Header, Ply, Property, PropertyDef,
    PropertyType, ScalarType,
};
use ply_rs::writer::Writer;

use super::{MeshIoError, PointCloud};

const FORMAT: &str = "PLY";
const VERTEX: &str = "vertex";

/// Encoding used when writing a PLY file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlyFormat {
    Ascii,
    BinaryLittleEndian,
    BinaryBigEndian,
}

impl From<PlyFormat> for Encoding {
    fn from(format: PlyFormat) -> Self {
        match format {
            PlyFormat::Ascii => Encoding::Ascii,
            PlyFormat::BinaryLittleEndian => Encoding::BinaryLittleEndian,
            PlyFormat::BinaryBigEndian => Encoding::BinaryBigEndian,
        }
    }
}

fn malformed(message: impl Into<String>) -> MeshIoError {
    MeshIoError::Malformed {
        format: FORMAT,
        message: message.into(),
    }
}

fn scalar_size(scalar: &ScalarType) -> usize {
    match scalar {
        ScalarType::Char | ScalarType::UChar => 1,
        ScalarType::Short | ScalarType::UShort => 2,
        ScalarType::Int | ScalarType::UInt | ScalarType::Float => 4,
        ScalarType::Double => 8,
    }
}

/// Smallest number of payload bytes one record of `element` can occupy.
fn min_record_size(element: &ElementDef, encoding: &Encoding) -> usize {
    let size = match encoding {
        // one character per value, separated by single spaces
        Encoding::Ascii => (2 * element.properties.len()).saturating_sub(1),
        Encoding::BinaryLittleEndian | Encoding::BinaryBigEndian => element
            .properties
            .values()
            .map(|p| match &p.data_type {
                PropertyType::Scalar(scalar) => scalar_size(scalar),
                PropertyType::List(index, _) => scalar_size(index),
            })
            .sum(),
    };
    size.max(1)
}

/// Rejects headers declaring more records than the remaining bytes can hold,
/// so element counts never drive an allocation on their own.
fn check_declared_counts(header: &Header, payload_len: usize) -> Result<(), MeshIoError> {
    let mut needed: usize = 0;
    for element in header.elements.values() {
        let bytes = element
            .count
            .checked_mul(min_record_size(element, &header.encoding))
            .and_then(|b| needed.checked_add(b));
        needed = match bytes {
            Some(total) if total <= payload_len => total,
            _ => {
                return Err(malformed(format!(
                    "element '{}' declares {} records but only {} payload bytes follow",
                    element.name, element.count, payload_len
                )))
            }
        };
    }
    Ok(())
}

fn scalar(element: &DefaultElement, key: &str) -> Option<f64> {
    match element.get(key)? {
        Property::Char(v) => Some(f64::from(*v)),
        Property::UChar(v) => Some(f64::from(*v)),
        Property::Short(v) => Some(f64::from(*v)),
        Property::UShort(v) => Some(f64::from(*v)),
        Property::Int(v) => Some(f64::from(*v)),
        Property::UInt(v) => Some(f64::from(*v)),
        Property::Float(v) => Some(f64::from(*v)),
        Property::Double(v) => Some(*v),
        _ => None,
    }
}

fn triple(element: &DefaultElement, keys: [&str; 3]) -> Option<[f64; 3]> {
    Some([
        scalar(element, keys[0])?,
        scalar(element, keys[1])?,
        scalar(element, keys[2])?,
    ])
}

const COLOR_KEYS: [[&str; 3]; 3] = [
    ["red", "green", "blue"],
    ["r", "g", "b"],
    ["diffuse_red", "diffuse_green", "diffuse_blue"],
];

/// Which optional vertex attributes the header declares.
struct VertexLayout {
    has_normals: bool,
    color: Option<([&'static str; 3], bool)>,
}

impl VertexLayout {
    fn from_header(header: &Header) -> Result<Self, MeshIoError> {
        let vertex = header
            .elements
            .get(VERTEX)
            .ok_or_else(|| malformed("missing vertex element"))?;
        let has = |keys: &[&str; 3]| keys.iter().all(|k| vertex.properties.contains_key(*k));

        if !has(&["x", "y", "z"]) {
            return Err(malformed("vertex element lacks x/y/z"));
        }

        let color = COLOR_KEYS.iter().find(|keys| has(*keys)).map(|keys| {
            let is_float = matches!(
                vertex.properties.get(keys[0]).map(|p| &p.data_type),
                Some(PropertyType::Scalar(ScalarType::Float | ScalarType::Double))
            );
            (*keys, is_float)
        });

        Ok(Self {
            has_normals: has(&["nx", "ny", "nz"]),
            color,
        })
    }
}

/// Decodes the vertex element of a PLY stream.
pub fn decode_ply<R: Read>(mut reader: R) -> Result<PointCloud, MeshIoError> {
    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes)?;
    let mut cursor = Cursor::new(bytes.as_slice());

    let parser = Parser::<DefaultElement>::new();
    let header = parser
        .read_header(&mut cursor)
        .map_err(|e| malformed(format!("failed to parse header: {}", e)))?;
    let layout = VertexLayout::from_header(&header)?;
    let consumed = usize::try_from(cursor.position()).unwrap_or(bytes.len());
    check_declared_counts(&header, bytes.len().saturating_sub(consumed))?;

    let payload = parser
        .read_payload(&mut cursor, &header)
        .map_err(|e| malformed(format!("failed to read payload: {}", e)))?;
    let vertices = payload.get(VERTEX).map(Vec::as_slice).unwrap_or_default();

    let mut points = Vec::with_capacity(vertices.len());
    let mut normals = Vec::new();
    let mut colors = Vec::new();

    for (index, element) in vertices.iter().enumerate() {
        let point = triple(element, ["x", "y", "z"])
            .ok_or_else(|| malformed(format!("vertex {} has non-scalar coordinates", index)))?;
        points.push(point);

        if layout.has_normals {
            normals.push(
                triple(element, ["nx", "ny", "nz"])
                    .ok_or_else(|| malformed(format!("vertex {} has non-scalar normal", index)))?,
            );
        }

        if let Some((keys, is_float)) = layout.color {
            let rgb = triple(element, keys)
                .ok_or_else(|| malformed(format!("vertex {} has non-scalar color", index)))?;
            let channel = |v: f64| {
                let v = if is_float { v * 255.0 } else { v };
                v.round().clamp(0.0, 255.0) as u8
            };
            colors.push([channel(rgb[0]), channel(rgb[1]), channel(rgb[2])]);
        }
    }

    let normals = layout.has_normals.then_some(normals);
    let colors = layout.color.map(|_| colors);
    Ok(PointCloud::new(points, normals, colors)?)
}

fn vertex_definition(cloud: &PointCloud) -> ElementDef {
    let mut vertex = ElementDef::new(VERTEX.to_string());
    let mut add = |name: &str, scalar: ScalarType| {
        vertex
            .properties
            .add(PropertyDef::new(name.to_string(), PropertyType::Scalar(scalar)));
    };

    for axis in ["x", "y", "z"] {
        add(axis, ScalarType::Double);
    }
    if cloud.normals().is_some() {
        for axis in ["nx", "ny", "nz"] {
            add(axis, ScalarType::Double);
        }
    }
    if cloud.colors().is_some() {
        for channel in COLOR_KEYS[0] {
            add(channel, ScalarType::UChar);
        }
    }
    vertex.count = cloud.len();
    vertex
}

/// Encodes a cloud as PLY with double precision positions and normals.
pub fn encode_ply<W: Write>(
    cloud: &PointCloud,
    format: PlyFormat,
    mut writer: W,
) -> Result<(), MeshIoError> {
    let mut ply = Ply::<DefaultElement>::new();
    ply.header.encoding = format.into();
    ply.header
        .comments
        .push("written by scan-prealign".to_string());
    ply.header.elements.add(vertex_definition(cloud));

    let mut elements = Vec::with_capacity(cloud.len());
    for (index, point) in cloud.points().iter().enumerate() {
        let mut element = DefaultElement::new();
        for (key, value) in ["x", "y", "z"].into_iter().zip(point) {
            element.insert(key.to_string(), Property::Double(*value));
        }
        if let Some(normals) = cloud.normals() {
            for (key, value) in ["nx", "ny", "nz"].into_iter().zip(&normals[index]) {
                element.insert(key.to_string(), Property::Double(*value));
            }
        }
        if let Some(colors) = cloud.colors() {
            for (key, value) in COLOR_KEYS[0].into_iter().zip(&colors[index]) {
                element.insert(key.to_string(), Property::UChar(*value));
            }
        }
        elements.push(element);
    }
    ply.payload.insert(VERTEX.to_string(), elements);

    Writer::new().write_ply(&mut writer, &mut ply)?;
    writer.flush()?;
    Ok(())
}

/// Reads a PLY file from disk.
pub fn read_ply(path: impl AsRef<Path>) -> Result<PointCloud, MeshIoError> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|source| MeshIoError::Read {
        path: path.display().to_string(),
        source,
    })?;
    decode_ply(BufReader::new(file))
}

/// Writes a PLY file to disk, replacing any existing file.
pub fn write_ply(
    path: impl AsRef<Path>,
    cloud: &PointCloud,
    format: PlyFormat,
) -> Result<(), MeshIoError> {
    let path = path.as_ref();
    let file = File::create(path).map_err(|source| MeshIoError::Write {
        path: path.display().to_string(),
        source,
    })?;
    encode_ply(cloud, format, BufWriter::new(file))
}
