//! Archive codec: the on-disk packet framing the recorder writes and the
//! playback engine reads back.
//!
//! Each minute produces `<MM>.codecs` (a `bincode`-encoded codec list) plus
//! one `<MM>.<idx>.packets` file per substream. Records inside a `.packets`
//! file are `bincode`-encoded and delimited by a 5-byte sentinel rather than
//! a length prefix, since the writer does not know a record's length at the
//! time it starts the write. This supersedes the length-prefixed framing
//! seen in one archive branch, and stands in for the original's `gob`
//! envelope (exact-bit format compatibility is out of scope).

use std::error::Error as StdError;
use std::fmt;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::model::{CodecData, Packet};

/// `. \n . \n .`
pub const DELIMITER: [u8; 5] = [0x2E, 0x0A, 0x2E, 0x0A, 0x2E];
/// Scanner refuses to buffer a record larger than this before seeing the
/// delimiter; a real recorder never writes records anywhere near this size.
pub const MAX_RECORD_BYTES: usize = 1 << 30;

#[derive(Debug)]
pub enum ArchiveError {
    Io(String),
    Encode(String),
    Decode(String),
    RecordTooLarge,
}

impl fmt::Display for ArchiveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArchiveError::Io(msg) => write!(f, "archive I/O error: {}", msg),
            ArchiveError::Encode(msg) => write!(f, "archive encode error: {}", msg),
            ArchiveError::Decode(msg) => write!(f, "archive decode error: {}", msg),
            ArchiveError::RecordTooLarge => write!(f, "archive record exceeds maximum size"),
        }
    }
}

impl StdError for ArchiveError {}

impl From<std::io::Error> for ArchiveError {
    fn from(e: std::io::Error) -> Self {
        ArchiveError::Io(e.to_string())
    }
}

/// One packet plus the wall-clock instant the recorder observed it at.
/// `record_time` (not `packet.time`) is the authority playback paces against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordPacket {
    pub packet: Packet,
    #[serde(with = "micros")]
    pub record_time: SystemTime,
}

mod micros {
    use super::*;
    use crate::timing;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(time: &SystemTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(timing::to_micros(*time))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<SystemTime, D::Error> {
        let micros = u64::deserialize(d)?;
        Ok(timing::from_micros(micros))
    }
}

/// Decimal, non-zero-padded minute folder path:
/// `<root>/<cameraId>/<YYYY>/<M>/<D>/<H>/`.
pub fn minute_folder(root: &Path, camera_id: &str, time: SystemTime) -> PathBuf {
    let (y, m, d, h, _minute) = crate::timing::minute_path_components(time);
    root.join(camera_id)
        .join(y.to_string())
        .join(m.to_string())
        .join(d.to_string())
        .join(h.to_string())
}

pub fn codecs_file(folder: &Path, time: SystemTime) -> PathBuf {
    let (_, _, _, _, minute) = crate::timing::minute_path_components(time);
    folder.join(format!("{minute}.codecs"))
}

pub fn packets_file(folder: &Path, time: SystemTime, substream: usize) -> PathBuf {
    let (_, _, _, _, minute) = crate::timing::minute_path_components(time);
    folder.join(format!("{minute}.{substream}.packets"))
}

pub fn write_codecs(path: &Path, codecs: &[CodecData]) -> Result<(), ArchiveError> {
    let bytes = bincode::serialize(codecs).map_err(|e| ArchiveError::Encode(e.to_string()))?;
    std::fs::write(path, bytes)?;
    Ok(())
}

pub fn read_codecs(path: &Path) -> Result<Vec<CodecData>, ArchiveError> {
    let bytes = std::fs::read(path)?;
    bincode::deserialize(&bytes).map_err(|e| ArchiveError::Decode(e.to_string()))
}

/// An append-only writer for one `<MM>.<idx>.packets` file.
pub struct RecordWriter {
    file: std::fs::File,
}

impl RecordWriter {
    pub fn create(path: &Path) -> Result<Self, ArchiveError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        Ok(Self { file })
    }

    pub fn write(&mut self, record: &RecordPacket) -> Result<(), ArchiveError> {
        let bytes = bincode::serialize(record).map_err(|e| ArchiveError::Encode(e.to_string()))?;
        self.file.write_all(&bytes)?;
        self.file.write_all(&DELIMITER)?;
        Ok(())
    }
}

/// A forward-only scanner over a `<MM>.<idx>.packets` file.
pub struct RecordScanner {
    buf: Vec<u8>,
    cursor: usize,
}

impl RecordScanner {
    pub fn open(path: &Path) -> Result<Self, ArchiveError> {
        let mut file = std::fs::File::open(path)?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;
        Ok(Self { buf, cursor: 0 })
    }

    /// Returns the next record, `Ok(None)` at a clean end of file, or an
    /// error for a record exceeding [`MAX_RECORD_BYTES`] or a corrupt tail.
    pub fn next(&mut self) -> Result<Option<RecordPacket>, ArchiveError> {
        if self.cursor >= self.buf.len() {
            return Ok(None);
        }

        let remaining = &self.buf[self.cursor..];
        let delim_pos = find_delimiter(remaining);

        let record_bytes = match delim_pos {
            Some(pos) => {
                if pos > MAX_RECORD_BYTES {
                    return Err(ArchiveError::RecordTooLarge);
                }
                &remaining[..pos]
            }
            None => {
                // Truncated tail: no trailing delimiter. Treat as end of
                // readable data rather than an error.
                self.cursor = self.buf.len();
                return Ok(None);
            }
        };

        let record: RecordPacket =
            bincode::deserialize(record_bytes).map_err(|e| ArchiveError::Decode(e.to_string()))?;
        self.cursor += record_bytes.len() + DELIMITER.len();
        Ok(Some(record))
    }
}

fn find_delimiter(haystack: &[u8]) -> Option<usize> {
    if haystack.len() < DELIMITER.len() {
        return None;
    }
    haystack
        .windows(DELIMITER.len())
        .position(|window| window == DELIMITER)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn sample(i: u8) -> RecordPacket {
        RecordPacket {
            packet: Packet {
                substream: 0,
                is_keyframe: i == 0,
                duration: Duration::from_millis(40),
                time: SystemTime::now(),
                payload: vec![i; 4],
            },
            record_time: SystemTime::now(),
        }
    }

    #[test]
    fn framing_round_trips_a_sequence_of_records() {
        let dir = std::env::temp_dir().join(format!("gw-archive-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("34.0.packets");

        let mut writer = RecordWriter::create(&path).unwrap();
        for i in 0..5 {
            writer.write(&sample(i)).unwrap();
        }
        drop(writer);

        let mut scanner = RecordScanner::open(&path).unwrap();
        let mut count = 0;
        while let Some(record) = scanner.next().unwrap() {
            assert_eq!(record.packet.payload, vec![count as u8; 4]);
            count += 1;
        }
        assert_eq!(count, 5);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn truncated_tail_stops_cleanly() {
        let dir = std::env::temp_dir().join(format!("gw-archive-trunc-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("34.0.packets");

        let mut writer = RecordWriter::create(&path).unwrap();
        writer.write(&sample(0)).unwrap();
        drop(writer);

        // Append a partial record with no delimiter to simulate a crash
        // mid-write.
        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&[1, 2, 3]).unwrap();
        drop(file);

        let mut scanner = RecordScanner::open(&path).unwrap();
        assert!(scanner.next().unwrap().is_some());
        assert!(scanner.next().unwrap().is_none());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn codecs_file_round_trips() {
        let dir = std::env::temp_dir().join(format!("gw-archive-codecs-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("34.codecs");

        let codecs = vec![CodecData::H264 {
            sps: vec![1, 2],
            pps: vec![3, 4],
        }];
        write_codecs(&path, &codecs).unwrap();
        let read_back = read_codecs(&path).unwrap();
        assert_eq!(read_back, codecs);

        std::fs::remove_dir_all(&dir).ok();
    }
}
