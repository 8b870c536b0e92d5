//! # Export Module
//!
//! Flattens the recordings set into one CSV document, one row per sample:
//!
//! ```text
//! Motion Name,Timestamp,Accel_X,Accel_Y,Accel_Z,Gyro_X,Gyro_Y,Gyro_Z,Temperature
//! walk,2024-05-01T10:00:00.000Z,1.0000,2.0000,3.0000,0.1000,0.2000,0.3000,25.50
//! ```
//!
//! Acceleration and rotation use 4 decimals, temperature 2. Rows end in `\n`.

use crate::error::ExportError;
use crate::session::RecordedMotion;
use chrono::{DateTime, SecondsFormat, Utc};
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

pub const HEADER: &str =
    "Motion Name,Timestamp,Accel_X,Accel_Y,Accel_Z,Gyro_X,Gyro_Y,Gyro_Z,Temperature";

/// Encode every sample of every recording, in recording then capture order
pub fn encode(recordings: &[RecordedMotion]) -> Result<String, ExportError> {
    if recordings.is_empty() {
        return Err(ExportError::NothingToExport);
    }

    let mut out = String::with_capacity(HEADER.len() + 1 + row_estimate(recordings));
    out.push_str(HEADER);
    out.push('\n');

    for motion in recordings {
        let name = quote(&motion.motion_name);
        for sample in &motion.data {
            // Writing into a String cannot fail
            let _ = writeln!(
                out,
                "{},{},{},{},{},{},{},{},{}",
                name,
                motion.timestamp,
                fixed(sample.accel.x, 4),
                fixed(sample.accel.y, 4),
                fixed(sample.accel.z, 4),
                fixed(sample.gyro.x, 4),
                fixed(sample.gyro.y, 4),
                fixed(sample.gyro.z, 4),
                fixed(sample.temp, 2),
            );
        }
    }

    Ok(out)
}

/// `motion_data_2024-05-01T10-00-00.000Z.csv`
pub fn export_filename(at: DateTime<Utc>) -> String {
    let stamp = at.to_rfc3339_opts(SecondsFormat::Millis, true).replace(':', "-");
    format!("motion_data_{}.csv", stamp)
}

/// Encode `recordings` and write them into `dir`, creating it if needed
pub fn write_export(
    dir: &Path,
    recordings: &[RecordedMotion],
    at: DateTime<Utc>,
) -> Result<PathBuf, ExportError> {
    let contents = encode(recordings)?;

    fs::create_dir_all(dir).map_err(ExportError::WriteFailed)?;
    let path = dir.join(export_filename(at));
    fs::write(&path, contents).map_err(ExportError::WriteFailed)?;

    log::info!("Exported {} recordings to {}", recordings.len(), path.display());
    Ok(path)
}

fn fixed(value: f64, decimals: usize) -> String {
    let text = format!("{:.*}", decimals, value);
    // -0.00004 rounds to "-0.0000"
    if text.starts_with('-') && text[1..].chars().all(|c| c == '0' || c == '.') {
        text[1..].to_string()
    } else {
        text
    }
}

fn quote(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn row_estimate(recordings: &[RecordedMotion]) -> usize {
    recordings.iter().map(|m| m.data.len() * 96).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor::{SensorSample, Vec3};
    use chrono::TimeZone;

    fn motion(name: &str, samples: Vec<SensorSample>) -> RecordedMotion {
        RecordedMotion {
            motion_name: name.to_string(),
            timestamp: "2024-05-01T10:00:00.000Z".to_string(),
            data: samples,
        }
    }

    fn sample(accel_x: f64, temp: f64) -> SensorSample {
        SensorSample::new(
            Vec3::new(accel_x, 2.0, 3.0),
            Vec3::new(0.1, 0.2, 0.3),
            temp,
        )
    }

    #[test]
    fn test_rows_follow_recording_order() {
        let recordings = vec![
            motion("walk", vec![sample(1.0, 25.5), sample(1.5, 25.25)]),
            motion("run", vec![sample(-2.0, 26.0)]),
        ];
        let csv = encode(&recordings).unwrap();
        let lines: Vec<&str> = csv.lines().collect();

        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], HEADER);
        assert_eq!(
            lines[1],
            "walk,2024-05-01T10:00:00.000Z,1.0000,2.0000,3.0000,0.1000,0.2000,0.3000,25.50"
        );
        assert!(lines[2].starts_with("walk,"));
        assert!(lines[3].starts_with("run,2024-05-01T10:00:00.000Z,-2.0000,"));
        assert!(csv.ends_with('\n'));
        assert!(!csv.contains('\r'));
    }

    #[test]
    fn test_empty_recordings_are_rejected() {
        assert!(matches!(encode(&[]), Err(ExportError::NothingToExport)));
    }

    #[test]
    fn test_negative_zero_is_written_as_zero() {
        assert_eq!(fixed(-0.0, 4), "0.0000");
        assert_eq!(fixed(-0.00004, 4), "0.0000");
        assert_eq!(fixed(-0.0001, 4), "-0.0001");
        assert_eq!(fixed(25.456, 2), "25.46");
    }

    #[test]
    fn test_motion_names_are_quoted_when_needed() {
        assert_eq!(quote("squat"), "squat");
        assert_eq!(quote("left, right"), "\"left, right\"");
        assert_eq!(quote("the \"big\" one"), "\"the \"\"big\"\" one\"");

        let csv = encode(&[motion("a,b", vec![sample(0.0, 20.0)])]).unwrap();
        assert!(csv.lines().nth(1).unwrap().starts_with("\"a,b\",2024"));
    }

    #[test]
    fn test_export_filename() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 10, 30, 15).unwrap();
        assert_eq!(
            export_filename(at),
            "motion_data_2024-05-01T10-30-15.000Z.csv"
        );
    }

    #[test]
    fn test_write_export_creates_directory() {
        let temp = tempfile::tempdir().unwrap();
        let dir = temp.path().join("exports");
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 10, 30, 15).unwrap();

        let path = write_export(&dir, &[motion("walk", vec![sample(1.0, 25.5)])], at).unwrap();

        assert!(path.starts_with(&dir));
        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(written.lines().count(), 2);
    }

    #[test]
    fn test_write_export_with_nothing_writes_no_file() {
        let temp = tempfile::tempdir().unwrap();
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 10, 30, 15).unwrap();

        assert!(write_export(temp.path(), &[], at).is_err());
        assert_eq!(std::fs::read_dir(temp.path()).unwrap().count(), 0);
    }
}
