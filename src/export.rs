use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context as AnyhowContext, Result};
use tracing::info;

use crate::my_types::*;
use crate::path::Track;

/// `value` printed the way C's `%.18e` prints it, e.g. `1.000000000000000000e+01`
pub fn format_exp(value: f64) -> String {
    if value.is_nan() {
        return "nan".to_string();
    }
    if value.is_infinite() {
        return if value > 0. { "inf" } else { "-inf" }.to_string();
    }
    let rust = format!("{:.18e}", value);
    match rust.split_once('e') {
        Some((mantissa, exponent)) => {
            let exponent: i32 = exponent.parse().unwrap_or(0);
            let sign = if exponent < 0 { '-' } else { '+' };
            format!("{}e{}{:02}", mantissa, sign, exponent.abs())
        }
        None => rust,
    }
}

/// One `frame,x,y` row per point
pub fn write_track<W: Write>(writer: &mut W, track: &Track) -> Result<()> {
    for (frame_number, centroid) in track.centroids() {
        writeln!(
            writer,
            "{},{},{}",
            format_exp(frame_number as f64),
            format_exp(centroid.x),
            format_exp(centroid.y)
        )?;
    }
    Ok(())
}

/// Write each track to `path_NNN.csv` in `dir`, returning the files written
pub fn write_tracks(dir: &Path, tracks: &[Track]) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    let mut written = vec![];
    for (i, track) in tracks.iter().enumerate() {
        let path = dir.join(format!("path_{:03}.csv", i));
        let mut writer = BufWriter::new(
            File::create(&path).with_context(|| format!("Failed to create {}", path.display()))?,
        );
        write_track(&mut writer, track)?;
        writer.flush()?;
        written.push(path);
    }
    info!("wrote {} paths to {}", written.len(), dir.display());
    Ok(written)
}

/// Read back a path file as (frame, centroid) rows
pub fn read_track(path: &Path) -> Result<Vec<(FrameIndex, Vector2d)>> {
    let reader = BufReader::new(File::open(path).with_context(|| format!("Failed to open {}", path.display()))?);
    let mut rows = vec![];
    for (line_number, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let values = line
            .split(',')
            .map(|v| v.trim().parse::<f64>())
            .collect::<Result<Vec<_>, _>>()
            .with_context(|| format!("{}:{}: not a number", path.display(), line_number + 1))?;
        if values.len() != 3 {
            return Err(anyhow!(
                "{}:{}: expected 3 columns, found {}",
                path.display(),
                line_number + 1,
                values.len()
            ));
        }
        let frame = values[0];
        if !(frame >= 0. && frame.fract() == 0. && frame < usize::MAX as f64) {
            bail!("{}:{}: bad frame number {}", path.display(), line_number + 1, frame);
        }
        rows.push((frame as FrameIndex, Vector2d::new(values[1], values[2])));
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::Detection;

    #[test]
    fn test_format_matches_c() {
        assert_eq!(format_exp(0.), "0.000000000000000000e+00");
        assert_eq!(format_exp(10.), "1.000000000000000000e+01");
        assert_eq!(format_exp(-0.0025), "-2.500000000000000052e-03");
        assert_eq!(format_exp(1.5e123), "1.500000000000000040e+123");
        assert_eq!(format_exp(0.1), "1.000000000000000056e-01");
        assert_eq!(format_exp(f64::NAN), "nan");
    }

    #[test]
    fn test_write_and_read_tracks() {
        let mut track = Track::new(4, Detection::from_point(Vector2d::new(12.25, 7.)));
        track.points.push(crate::path::TrackPoint {
            frame_number: 5,
            detection: Detection::from_point(Vector2d::new(13.5, 7.75)),
        });

        let mut text = vec![];
        write_track(&mut text, &track).unwrap();
        assert_eq!(
            String::from_utf8(text).unwrap().lines().next().unwrap(),
            "4.000000000000000000e+00,1.225000000000000000e+01,7.000000000000000000e+00"
        );

        let dir = std::env::temp_dir().join(format!("hvtrack-export-{}", std::process::id()));
        let files = write_tracks(&dir, &[track.clone(), track]).unwrap();
        assert_eq!(files.len(), 2);
        assert!(files[1].ends_with("path_001.csv"));
        let rows = read_track(&files[0]).unwrap();
        std::fs::remove_dir_all(&dir).unwrap();
        assert_eq!(rows, vec![(4, Vector2d::new(12.25, 7.)), (5, Vector2d::new(13.5, 7.75))]);
    }

    #[test]
    fn test_read_rejects_bad_frame_column() {
        let dir = std::env::temp_dir().join(format!("hvtrack-badframe-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let negative = dir.join("negative.csv");
        std::fs::write(&negative, "-1.0,2.0,3.0\n").unwrap();
        let fractional = dir.join("fractional.csv");
        std::fs::write(&fractional, "0.0,2.0,3.0\n2.5,2.0,3.0\n").unwrap();

        let errors: Vec<String> = [&negative, &fractional]
            .iter()
            .map(|p| format!("{:#}", read_track(p).unwrap_err()))
            .collect();
        std::fs::remove_dir_all(&dir).unwrap();
        assert!(errors[0].contains("bad frame number"));
        assert!(errors[1].contains(":2:"));
    }
}
