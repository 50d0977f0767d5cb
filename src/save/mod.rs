//! File exports of the tracking results.

pub mod trajectory;

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use anyhow::Context;

use crate::tracking::serialization::{deserialize_map, serialize_map};
use crate::tracking::LocalizedObjectPointMap;

pub fn write_map_file(path: impl AsRef<Path>, localized_object_points: &LocalizedObjectPointMap) -> anyhow::Result<()> {
    let path = path.as_ref();
    let file = File::create(path).with_context(|| format!("failed to create map file {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    serialize_map(localized_object_points, &mut writer)?;
    writer.flush()?;
    Ok(())
}

pub fn read_map_file(path: impl AsRef<Path>) -> anyhow::Result<LocalizedObjectPointMap> {
    let path = path.as_ref();
    let file = File::open(path).with_context(|| format!("failed to open map file {}", path.display()))?;
    deserialize_map(&mut BufReader::new(file)).with_context(|| format!("failed to read map file {}", path.display()))
}
