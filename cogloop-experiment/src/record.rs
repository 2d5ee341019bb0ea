//! Persistence of finished trials.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use cogloop_core::{DataWriteError, TrialRecord};

pub trait RecordWriter: Send {
    fn write(&mut self, record: &TrialRecord) -> Result<(), DataWriteError>;

    fn flush(&mut self) -> Result<(), DataWriteError>;

    fn path(&self) -> Option<&Path> {
        None
    }
}

/// One JSON object per line, appended as each trial finishes.
#[derive(Debug)]
pub struct JsonLinesWriter {
    path: PathBuf,
    file: Option<File>,
}

impl JsonLinesWriter {
    /// `{folder}/{base}_data.jsonl`. The folder is created if needed.
    pub fn create(folder: impl AsRef<Path>, base: &str) -> Result<Self, DataWriteError> {
        let folder = folder.as_ref();
        fs::create_dir_all(folder).map_err(|source| DataWriteError::Io {
            path: folder.to_path_buf(),
            source,
        })?;
        Ok(Self {
            path: folder.join(format!("{base}_data.jsonl")),
            file: None,
        })
    }

    fn file(&mut self) -> io::Result<&mut File> {
        if self.file.is_none() {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)?;
            self.file = Some(file);
        }
        // just opened above if it was missing
        self.file
            .as_mut()
            .ok_or_else(|| io::Error::other("data file unavailable"))
    }
}

/// Append target that can cut itself back to a known length.
trait Truncate: Write {
    fn len(&self) -> io::Result<u64>;

    fn truncate(&mut self, len: u64) -> io::Result<()>;
}

impl Truncate for File {
    fn len(&self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }
}

/// Writes `line` in one call. On failure the target is cut back to its
/// previous length so a retry never follows a partial line.
fn append_line(out: &mut impl Truncate, line: &[u8]) -> io::Result<()> {
    let good = out.len()?;
    let Err(err) = out.write_all(line) else {
        return Ok(());
    };
    if let Err(cut) = out.truncate(good) {
        log::error!("could not drop partial line: {cut}");
    }
    Err(err)
}

impl RecordWriter for JsonLinesWriter {
    fn write(&mut self, record: &TrialRecord) -> Result<(), DataWriteError> {
        let mut line = serde_json::to_vec(record).map_err(|source| DataWriteError::Serialize {
            trial: record.id,
            source,
        })?;
        line.push(b'\n');
        let result = self.file().and_then(|file| append_line(file, &line));
        result.map_err(|source| {
            // reopen on the next attempt
            self.file = None;
            DataWriteError::Io {
                path: self.path.clone(),
                source,
            }
        })
    }

    fn flush(&mut self) -> Result<(), DataWriteError> {
        match self.file.as_mut() {
            Some(file) => file.sync_data().map_err(|source| DataWriteError::Io {
                path: self.path.clone(),
                source,
            }),
            None => Ok(()),
        }
    }

    fn path(&self) -> Option<&Path> {
        Some(&self.path)
    }
}

/// Keeps records in memory. Clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct MemoryWriter {
    records: Arc<Mutex<Vec<TrialRecord>>>,
}

impl MemoryWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<TrialRecord> {
        self.records
            .lock()
            .map(|r| r.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }
}

impl RecordWriter for MemoryWriter {
    fn write(&mut self, record: &TrialRecord) -> Result<(), DataWriteError> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(record.clone());
        Ok(())
    }

    fn flush(&mut self) -> Result<(), DataWriteError> {
        Ok(())
    }
}

/// Writes `record`, retrying I/O failures up to `attempts` times in total.
pub fn persist_with_retry(
    writer: &mut dyn RecordWriter,
    record: &TrialRecord,
    attempts: u32,
) -> Result<(), DataWriteError> {
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match writer.write(record) {
            Ok(()) => return Ok(()),
            Err(DataWriteError::Io { path, source }) if attempt >= attempts => {
                return Err(DataWriteError::Exhausted {
                    trial: record.id,
                    path,
                    attempts,
                    source,
                });
            }
            Err(DataWriteError::Io { source, .. }) => {
                log::warn!(
                    "trial {}: write attempt {attempt}/{attempts} failed: {source}",
                    record.id
                );
                attempt += 1;
            }
            Err(other) => return Err(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cogloop_core::{ParameterSet, Trial};

    struct Flaky {
        failures: u32,
        calls: u32,
    }

    impl RecordWriter for Flaky {
        fn write(&mut self, _record: &TrialRecord) -> Result<(), DataWriteError> {
            self.calls += 1;
            if self.calls <= self.failures {
                return Err(DataWriteError::Io {
                    path: PathBuf::from("flaky"),
                    source: std::io::Error::other("disk full"),
                });
            }
            Ok(())
        }

        fn flush(&mut self) -> Result<(), DataWriteError> {
            Ok(())
        }
    }

    fn record(id: u64) -> TrialRecord {
        Trial::new(id, ParameterSet::new(), false).to_record()
    }

    #[test]
    fn retries_until_success() {
        let mut writer = Flaky {
            failures: 2,
            calls: 0,
        };
        persist_with_retry(&mut writer, &record(1), 3).unwrap();
        assert_eq!(writer.calls, 3);
    }

    #[test]
    fn gives_up_after_bounded_attempts() {
        let mut writer = Flaky {
            failures: 10,
            calls: 0,
        };
        let err = persist_with_retry(&mut writer, &record(9), 3).unwrap_err();
        assert!(matches!(
            err,
            DataWriteError::Exhausted {
                trial: 9,
                attempts: 3,
                ..
            }
        ));
        assert_eq!(writer.calls, 3);
    }

    /// Accepts `budget` bytes, then fails every write.
    struct ShortDisk {
        bytes: Vec<u8>,
        budget: usize,
    }

    impl Write for ShortDisk {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let room = self.budget.saturating_sub(self.bytes.len());
            if room == 0 {
                return Err(io::Error::other("disk full"));
            }
            let n = room.min(buf.len());
            self.bytes.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Truncate for ShortDisk {
        fn len(&self) -> io::Result<u64> {
            Ok(self.bytes.len() as u64)
        }

        fn truncate(&mut self, len: u64) -> io::Result<()> {
            self.bytes.truncate(len as usize);
            Ok(())
        }
    }

    #[test]
    fn failed_append_leaves_no_partial_line() {
        let mut disk = ShortDisk {
            bytes: b"{\"id\":1}\n".to_vec(),
            budget: 14,
        };
        assert!(append_line(&mut disk, b"{\"id\":2}\n").is_err());
        assert_eq!(disk.bytes, b"{\"id\":1}\n");

        disk.budget = 64;
        append_line(&mut disk, b"{\"id\":2}\n").unwrap();
        assert_eq!(disk.bytes, b"{\"id\":1}\n{\"id\":2}\n");
    }

    #[test]
    fn json_lines_append() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = JsonLinesWriter::create(dir.path().join("out"), "p_e_1").unwrap();
        writer.write(&record(1)).unwrap();
        writer.write(&record(2)).unwrap();
        writer.flush().unwrap();

        let path = writer.path().unwrap().to_path_buf();
        assert!(path.ends_with("p_e_1_data.jsonl"));
        let text = fs::read_to_string(path).unwrap();
        let ids: Vec<u64> = text
            .lines()
            .map(|l| serde_json::from_str::<TrialRecord>(l).unwrap().id)
            .collect();
        assert_eq!(ids, [1, 2]);
    }
}
