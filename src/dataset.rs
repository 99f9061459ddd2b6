use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use anyhow::{anyhow, bail, Result, Context as AnyhowContext};
use serde::{Deserialize, Serialize};
use log::warn;

use crate::contour::Contour;
use crate::detection::Detection;
use crate::my_types::*;

/// Largest run of missing frames `read_all` will fill in
pub const MAX_FRAME_GAP: usize = 1_000_000;

/// Contours found in one frame, as stored in a contour log line:
/// `{"frame": 3, "contours": [[[x, y], ...], ...]}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogFrame {
    pub frame: FrameIndex,
    #[serde(default)]
    pub contours: Vec<Vec<[f64; 2]>>,
}

impl LogFrame {
    pub fn from_contours(frame: FrameIndex, contours: &[Contour]) -> Self {
        LogFrame {
            frame,
            contours: contours
                .iter()
                .map(|c| c.points.iter().map(|p| [p.x, p.y]).collect())
                .collect(),
        }
    }

    pub fn detections(&self) -> Vec<Detection> {
        self.contours
            .iter()
            .map(|points| {
                Detection::from_contour(Contour::new(
                    points.iter().map(|p| Vector2d::new(p[0], p[1])).collect(),
                ))
            })
            .collect()
    }
}

/// Reads a JSON lines contour log one frame at a time
pub struct ContourLog {
    reader: Box<dyn BufRead>,
    line: String,
    line_number: usize,
}

impl ContourLog {
    pub fn open(path: &Path) -> Result<ContourLog> {
        let file: File = File::open(path)
            .with_context(|| format!("Failed to open contour log {}", path.display()))?;
        Ok(ContourLog::from_reader(BufReader::new(file)))
    }

    pub fn from_reader<R: BufRead + 'static>(reader: R) -> ContourLog {
        ContourLog {
            reader: Box::new(reader),
            line: String::new(),
            line_number: 0,
        }
    }

    pub fn next(&mut self) -> Result<Option<LogFrame>> {
        loop {
            self.line.clear();
            self.line_number += 1;
            match self.reader.read_line(&mut self.line) {
                Ok(0) => return Ok(None),
                Err(err) => bail!("Failed to read line {}: {}", self.line_number, err),
                _ => {},
            }
            if self.line.trim().is_empty() {
                continue;
            }

            let value: serde_json::Value = serde_json::from_str(&self.line)
                .with_context(|| format!("JSON deserialization failed for line {}: {}", self.line_number, self.line.trim()))?;
            let map = value.as_object().ok_or(anyhow!("JSON line {} is not a map", self.line_number))?;

            if map.contains_key("frame") {
                let frame: LogFrame = serde_json::from_value(value)
                    .with_context(|| format!("Malformed frame on line {}", self.line_number))?;
                return Ok(Some(frame));
            } else {
                warn!("Unrecognised data format on line {}: {}", self.line_number, self.line.trim());
                continue;
            }
        }
    }

    /// Detections for every frame up to the last one logged. Frames the log
    /// skips are empty, and repeated frames are merged.
    pub fn read_all(&mut self) -> Result<Vec<Vec<Detection>>> {
        let mut frames: Vec<Vec<Detection>> = vec![];
        while let Some(log_frame) = self.next()? {
            if frames.len() <= log_frame.frame {
                if log_frame.frame - frames.len() >= MAX_FRAME_GAP {
                    bail!(
                        "Frame {} on line {} skips more than {} frames",
                        log_frame.frame,
                        self.line_number,
                        MAX_FRAME_GAP
                    );
                }
                frames.resize_with(log_frame.frame + 1, Vec::new);
            }
            frames[log_frame.frame].extend(log_frame.detections());
        }
        Ok(frames)
    }
}

/// Appends frames to a contour log
pub struct ContourLogWriter<W: Write> {
    writer: W,
}

impl ContourLogWriter<BufWriter<File>> {
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)
            .with_context(|| format!("Failed to create contour log {}", path.display()))?;
        Ok(ContourLogWriter { writer: BufWriter::new(file) })
    }
}

impl<W: Write> ContourLogWriter<W> {
    pub fn new(writer: W) -> Self {
        ContourLogWriter { writer }
    }

    pub fn write(&mut self, frame: FrameIndex, contours: &[Contour]) -> Result<()> {
        let line = serde_json::to_string(&LogFrame::from_contours(frame, contours))?;
        writeln!(self.writer, "{}", line)?;
        Ok(())
    }

    pub fn finish(mut self) -> Result<W> {
        self.writer.flush()?;
        Ok(self.writer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn square(x: f64, y: f64) -> Contour {
        Contour::new(vec![
            Vector2d::new(x, y),
            Vector2d::new(x + 2., y),
            Vector2d::new(x + 2., y + 2.),
            Vector2d::new(x, y + 2.),
        ])
    }

    #[test]
    fn test_write_then_read_log() {
        let mut writer = ContourLogWriter::new(vec![]);
        writer.write(0, &[square(0., 0.)]).unwrap();
        writer.write(2, &[square(10., 10.), square(20., 0.)]).unwrap();
        let bytes = writer.finish().unwrap();

        let mut log = ContourLog::from_reader(Cursor::new(bytes));
        let frames = log.read_all().unwrap();
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0][0].centroid, Vector2d::new(1., 1.));
        assert!(frames[1].is_empty());
        assert_eq!(frames[2].len(), 2);
        assert_eq!(frames[2][1].centroid, Vector2d::new(21., 1.));
    }

    #[test]
    fn test_unknown_lines_skipped_and_frames_merged() {
        let text = "{\"frame\": 1, \"contours\": [[[4.0, 5.0]]]}\n\
                    \n\
                    {\"comment\": \"made by hand\"}\n\
                    {\"frame\": 1, \"contours\": [[[8.0, 5.0]]]}\n\
                    {\"frame\": 0}\n";
        let mut log = ContourLog::from_reader(Cursor::new(text.as_bytes().to_vec()));
        let frames = log.read_all().unwrap();
        assert_eq!(frames.len(), 2);
        assert!(frames[0].is_empty());
        assert_eq!(frames[1].len(), 2);
        assert_eq!(frames[1][1].centroid, Vector2d::new(8., 5.));
    }

    #[test]
    fn test_garbled_line_is_an_error() {
        let mut log = ContourLog::from_reader(Cursor::new(b"{\"frame\": 0}\nnot json\n".to_vec()));
        assert!(log.next().unwrap().is_some());
        let error = log.next().unwrap_err();
        assert!(format!("{:#}", error).contains("line 2"));
    }

    #[test]
    fn test_huge_frame_number_is_an_error() {
        let text = format!("{{\"frame\": 0, \"contours\": []}}\n{{\"frame\": {}, \"contours\": []}}\n", usize::MAX);
        let mut log = ContourLog::from_reader(Cursor::new(text.into_bytes()));
        let error = log.read_all().unwrap_err();
        assert!(format!("{:#}", error).contains("line 2"));

        let text = format!("{{\"frame\": {}, \"contours\": []}}\n", MAX_FRAME_GAP);
        assert!(ContourLog::from_reader(Cursor::new(text.into_bytes())).read_all().is_err());
    }
}
