//! Text-file readings logged by the boat's GPS and IMU.
//!
//! Each source holds one numeric value per line. The logging tool appends two
//! characters to every line (the line terminator counts), so the last two
//! characters of each line are discarded unconditionally before parsing.
//! `\r\n` and lone `\r` terminators are first folded into `\n`, so a CRLF
//! line also loses its last payload character.
//!
//! Position source: line 1 = easting, line 2 = northing (meters, UTM).
//! Orientation source: lines x, y, z.

use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use crate::error::{GeolocationError, Result};
use crate::types::{Hemisphere, OrientationReading, PositionReading};

/// Characters appended to every line by the logger
const LEGACY_SUFFIX_LEN: usize = 2;

const POSITION_FIELDS: [&str; 2] = ["easting", "northing"];
const ORIENTATION_FIELDS: [&str; 3] = ["x", "y", "z"];

/// Read a UTM position reading from a two-line text file
pub fn read_position<P: AsRef<Path>>(
    path: P,
    zone: u8,
    hemisphere: Hemisphere,
) -> Result<PositionReading> {
    let origin = path.as_ref().display().to_string();
    let reader = open(path.as_ref(), &origin)?;
    parse_position(reader, &origin, zone, hemisphere)
}

/// Read an orientation reading from a three-line text file
pub fn read_orientation<P: AsRef<Path>>(path: P) -> Result<OrientationReading> {
    let origin = path.as_ref().display().to_string();
    let reader = open(path.as_ref(), &origin)?;
    parse_orientation(reader, &origin)
}

/// Parse a position reading from any line source.
///
/// `origin` names the source in error messages.
pub fn parse_position<R: BufRead>(
    reader: R,
    origin: &str,
    zone: u8,
    hemisphere: Hemisphere,
) -> Result<PositionReading> {
    let values = read_fields(reader, origin, &POSITION_FIELDS)?;
    PositionReading::new(values[0], values[1], zone, hemisphere)
}

pub fn parse_orientation<R: BufRead>(reader: R, origin: &str) -> Result<OrientationReading> {
    let values = read_fields(reader, origin, &ORIENTATION_FIELDS)?;
    Ok(OrientationReading {
        x: values[0],
        y: values[1],
        z: values[2],
    })
}

fn open(path: &Path, origin: &str) -> Result<BufReader<File>> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|e| GeolocationError::parse(origin, e))
}

/// Read one value per line for each named field; extra lines are ignored.
fn read_fields<R: BufRead>(mut reader: R, origin: &str, fields: &[&str]) -> Result<Vec<f64>> {
    let mut content = String::new();
    reader
        .read_to_string(&mut content)
        .map_err(|e| GeolocationError::parse(origin, e))?;
    let content = normalize_newlines(&content);
    let mut lines = content.split_inclusive('\n');
    let mut values = Vec::with_capacity(fields.len());

    for (index, field) in fields.iter().enumerate() {
        let line = lines.next().ok_or_else(|| {
            GeolocationError::parse(origin, format!("missing line {} ({})", index + 1, field))
        })?;

        let value = parse_legacy_value(line).map_err(|reason| {
            GeolocationError::parse(origin, format!("line {} ({}): {}", index + 1, field, reason))
        })?;
        values.push(value);
    }

    Ok(values)
}

fn normalize_newlines(content: &str) -> String {
    content.replace("\r\n", "\n").replace('\r', "\n")
}

/// Strip the logger suffix and parse what remains
fn parse_legacy_value(line: &str) -> std::result::Result<f64, String> {
    let char_count = line.chars().count();
    if char_count < LEGACY_SUFFIX_LEN {
        return Err(format!("line too short: {:?}", line));
    }

    let keep = char_count - LEGACY_SUFFIX_LEN;
    let end = line
        .char_indices()
        .nth(keep)
        .map(|(i, _)| i)
        .unwrap_or(line.len());
    let literal = line[..end].trim();

    literal
        .parse::<f64>()
        .map_err(|e| format!("invalid number {:?}: {}", literal, e))
}
