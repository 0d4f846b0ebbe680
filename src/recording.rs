// Recorded accelerometer logs
// Accepts the step tracker's own sample dumps and the motion tracker's
// comparison logs, plain or gzipped

use crate::error::{Result, StepTrackerError};
use crate::sensors::{MotionSample, STANDARD_GRAVITY};
use flate2::read::GzDecoder;
use serde::Deserialize;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// Accelerometer entry of a motion-tracker log (m/s², seconds)
#[derive(Deserialize)]
struct AccelData {
    timestamp: f64,
    x: f64,
    y: f64,
    z: f64,
}

#[derive(Deserialize)]
struct Reading {
    accel: Option<AccelData>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LogFile {
    Samples(Vec<MotionSample>),
    Wrapped { samples: Vec<MotionSample> },
    Readings { readings: Vec<Reading> },
}

impl LogFile {
    fn into_samples(self) -> Vec<MotionSample> {
        match self {
            LogFile::Samples(samples) | LogFile::Wrapped { samples } => samples,
            LogFile::Readings { readings } => readings
                .into_iter()
                .filter_map(|r| r.accel)
                .map(|a| MotionSample {
                    x: a.x / STANDARD_GRAVITY,
                    y: a.y / STANDARD_GRAVITY,
                    z: a.z / STANDARD_GRAVITY,
                    timestamp_ms: (a.timestamp * 1000.0).round() as i64,
                })
                .collect(),
        }
    }
}

/// Parse a JSON log from any reader.
///
/// Accepted shapes:
/// - `[ {x, y, z, timestamp_ms}, ... ]` in g and milliseconds
/// - `{ "samples": [ ... ] }`, same units
/// - `{ "readings": [ { "accel": {timestamp, x, y, z} }, ... ] }` in m/s² and
///   seconds; converted to g and milliseconds, entries without `accel` skipped
pub fn parse_log<R: Read>(reader: R) -> Result<Vec<MotionSample>> {
    let log: LogFile = serde_json::from_reader(reader)
        .map_err(|e| StepTrackerError::InvalidParameters(format!("unrecognised log: {}", e)))?;
    Ok(log.into_samples())
}

/// Load a log file, gunzipping it when the extension is `.gz`
pub fn load_log(path: &Path) -> Result<Vec<MotionSample>> {
    let file = File::open(path)
        .map_err(|e| StepTrackerError::Io(format!("opening {}: {}", path.display(), e)))?;

    if path.extension().map(|e| e == "gz").unwrap_or(false) {
        parse_log(BufReader::new(GzDecoder::new(file)))
    } else {
        parse_log(BufReader::new(file))
    }
}
