//! Little endian binary format of a localized object point map.
//!
//! ```text
//! u32 version, u32 point count
//! per point: u32 id, f32 x, f32 y, f32 z, u32 last observation frame, u8 precision,
//!            u32 observation count, then per observation u32 frame, f32 x, f32 y
//! ```
//!
//! Points are written in ascending id order, a point without a position stores `f32::MIN` for
//! each coordinate.

use std::collections::BTreeMap;
use std::io::{Read, Write};

use anyhow::Context;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use super::localized_object_point::{
    LocalizationPrecision, LocalizedObjectPoint, LocalizedObjectPointMap,
};
use crate::global_types::{FrameIndex, ObjectPointId, Vector2, Vector3};

pub const MAP_FORMAT_VERSION: u32 = 1;

const UNKNOWN_COORDINATE: f32 = f32::MIN;

/// Upper bound for the pre-allocation, the point count of a stream is not trusted.
const MAX_RESERVED_POINTS: usize = 1 << 16;

pub fn serialize_map<W: Write + ?Sized>(
    localized_object_points: &LocalizedObjectPointMap,
    writer: &mut W,
) -> anyhow::Result<()> {
    let count = u32::try_from(localized_object_points.len()).context("too many object points")?;

    writer.write_u32::<LittleEndian>(MAP_FORMAT_VERSION)?;
    writer.write_u32::<LittleEndian>(count)?;

    let mut ids: Vec<ObjectPointId> = localized_object_points.keys().copied().collect();
    ids.sort_unstable();

    for id in ids {
        writer.write_u32::<LittleEndian>(id)?;
        write_object_point(&localized_object_points[&id], writer)?;
    }

    Ok(())
}

pub fn deserialize_map<R: Read + ?Sized>(reader: &mut R) -> anyhow::Result<LocalizedObjectPointMap> {
    let version = reader
        .read_u32::<LittleEndian>()
        .context("missing map header")?;
    if version != MAP_FORMAT_VERSION {
        anyhow::bail!("unsupported map version {}", version);
    }
    let count = reader.read_u32::<LittleEndian>()?;

    let mut localized_object_points =
        LocalizedObjectPointMap::with_capacity((count as usize).min(MAX_RESERVED_POINTS));
    for n in 0..count {
        let id = reader
            .read_u32::<LittleEndian>()
            .with_context(|| format!("truncated map at point {} of {}", n, count))?;
        let object_point =
            read_object_point(reader).with_context(|| format!("invalid object point {}", id))?;
        if localized_object_points.insert(id, object_point).is_some() {
            anyhow::bail!("object point {} stored twice", id);
        }
    }

    Ok(localized_object_points)
}

fn write_object_point<W: Write + ?Sized>(
    object_point: &LocalizedObjectPoint,
    writer: &mut W,
) -> anyhow::Result<()> {
    let position = object_point
        .position()
        .map(|p| [p.x as f32, p.y as f32, p.z as f32])
        .unwrap_or([UNKNOWN_COORDINATE; 3]);
    for value in position {
        writer.write_f32::<LittleEndian>(value)?;
    }

    writer.write_u32::<LittleEndian>(object_point.last_observation_frame_index())?;
    writer.write_u8(object_point.localization_precision() as u8)?;

    let observations = object_point.observations();
    writer.write_u32::<LittleEndian>(u32::try_from(observations.len())?)?;
    for (frame_index, image_point) in observations {
        writer.write_u32::<LittleEndian>(*frame_index)?;
        writer.write_f32::<LittleEndian>(image_point.x as f32)?;
        writer.write_f32::<LittleEndian>(image_point.y as f32)?;
    }

    Ok(())
}

fn read_object_point<R: Read + ?Sized>(reader: &mut R) -> anyhow::Result<LocalizedObjectPoint> {
    let x = reader.read_f32::<LittleEndian>()?;
    let y = reader.read_f32::<LittleEndian>()?;
    let z = reader.read_f32::<LittleEndian>()?;
    let position = if x == UNKNOWN_COORDINATE && y == UNKNOWN_COORDINATE && z == UNKNOWN_COORDINATE {
        None
    } else {
        Some(Vector3::new(x as f64, y as f64, z as f64))
    };

    let last_observation_frame_index: FrameIndex = reader.read_u32::<LittleEndian>()?;

    let precision_value = reader.read_u8()?;
    let Some(localization_precision) = LocalizationPrecision::from_u8(precision_value) else {
        anyhow::bail!("invalid localization precision {}", precision_value);
    };

    let number_observations = reader.read_u32::<LittleEndian>()?;
    let mut observations = BTreeMap::new();
    for _ in 0..number_observations {
        let frame_index = reader.read_u32::<LittleEndian>()?;
        let image_x = reader.read_f32::<LittleEndian>()?;
        let image_y = reader.read_f32::<LittleEndian>()?;
        observations.insert(frame_index, Vector2::new(image_x as f64, image_y as f64));
    }
    if observations.len() != number_observations as usize {
        anyhow::bail!("duplicated observation frame");
    }

    Ok(LocalizedObjectPoint::from_parts(
        position,
        observations,
        last_observation_frame_index,
        localization_precision,
    ))
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn example_map() -> LocalizedObjectPointMap {
        let precisions = [
            LocalizationPrecision::Invalid,
            LocalizationPrecision::Unknown,
            LocalizationPrecision::Low,
            LocalizationPrecision::Medium,
            LocalizationPrecision::High,
        ];
        let observation_counts = [2u32, 4, 10, 3, 7];

        let mut map = LocalizedObjectPointMap::new();
        for (n, (&precision, &count)) in precisions.iter().zip(observation_counts.iter()).enumerate() {
            let first_frame = 5 * n as u32;
            let observations: BTreeMap<FrameIndex, Vector2> = (0..count)
                .map(|i| {
                    (
                        first_frame + i,
                        Vector2::new(10.25 * i as f64 + n as f64, 480.5 - 3.0 * i as f64),
                    )
                })
                .collect();
            let position = if n == 1 {
                None
            } else {
                Some(Vector3::new(0.1 * n as f64, -2.5, 7.125 + n as f64))
            };
            let id = 100 + 7 * n as u32;
            let point = LocalizedObjectPoint::from_parts(
                position,
                observations,
                first_frame + count - 1,
                precision,
            );
            map.insert(id, point);
        }
        map
    }

    #[test]
    fn test_map_serialization() {
        let map = example_map();

        let mut buffer = Vec::new();
        serialize_map(&map, &mut buffer).unwrap();

        assert_eq!(&buffer[0..4], &1u32.to_le_bytes());
        assert_eq!(&buffer[4..8], &5u32.to_le_bytes());
        // the smallest id comes first
        assert_eq!(&buffer[8..12], &100u32.to_le_bytes());

        let read = deserialize_map(&mut Cursor::new(&buffer)).unwrap();
        assert_eq!(read.len(), map.len());

        for (id, point) in &map {
            let other = &read[id];
            match (point.position(), other.position()) {
                (Some(a), Some(b)) => {
                    let expected = Vector3::new(a.x as f32 as f64, a.y as f32 as f64, a.z as f32 as f64);
                    assert_eq!(&expected, b);
                }
                (None, None) => {}
                _ => panic!("position of point {} differs", id),
            }
            assert_eq!(point.last_observation_frame_index(), other.last_observation_frame_index());
            assert_eq!(point.localization_precision(), other.localization_precision());

            let a: Vec<_> = point.observations().iter().collect();
            let b: Vec<_> = other.observations().iter().collect();
            assert_eq!(a, b);
        }
    }

    #[test]
    fn test_map_deserialization_errors() {
        let mut buffer = Vec::new();
        serialize_map(&example_map(), &mut buffer).unwrap();

        let mut wrong_version = buffer.clone();
        wrong_version[0] = 2;
        assert!(deserialize_map(&mut Cursor::new(&wrong_version)).is_err());

        let truncated = &buffer[..buffer.len() - 3];
        assert!(deserialize_map(&mut Cursor::new(truncated)).is_err());

        // precision byte of the first point
        let mut bad_precision = buffer.clone();
        bad_precision[8 + 4 + 12 + 4] = 9;
        assert!(deserialize_map(&mut Cursor::new(&bad_precision)).is_err());

        // header only, announcing far more points than the stream holds
        let mut header_only = Vec::new();
        header_only.write_u32::<LittleEndian>(MAP_FORMAT_VERSION).unwrap();
        header_only.write_u32::<LittleEndian>(u32::MAX).unwrap();
        let error = deserialize_map(&mut Cursor::new(&header_only)).unwrap_err();
        assert!(error.to_string().contains("truncated map"));

        let mut empty = Vec::new();
        serialize_map(&LocalizedObjectPointMap::new(), &mut empty).unwrap();
        assert!(deserialize_map(&mut Cursor::new(&empty)).unwrap().is_empty());
    }
}
