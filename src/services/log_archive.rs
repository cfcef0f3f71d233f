//! Archiving of per-run logs into the session directory.
//!
//! Logs land in `logs/pass_logs/` or `logs/no_pass_logs/`, gzip-compressed
//! unless disabled. The returned [`ArchiveReceipt`] is what allows a slot to
//! be handed back to the pool.

use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use crate::domain::errors::{RegressionError, RegressionResult};
use crate::domain::models::{JobStatus, SlotId};

/// Proof that a slot's log has been copied out (or that there was none).
#[derive(Debug)]
#[must_use = "a slot can only be released with its archive receipt"]
pub struct ArchiveReceipt {
    slot: SlotId,
    archived: Option<PathBuf>,
}

impl ArchiveReceipt {
    pub const fn slot(&self) -> SlotId {
        self.slot
    }

    pub fn archived_path(&self) -> Option<&Path> {
        self.archived.as_deref()
    }
}

#[derive(Debug, Clone)]
pub struct LogArchiver {
    pass_dir: PathBuf,
    no_pass_dir: PathBuf,
    compress: bool,
}

impl LogArchiver {
    /// Create `logs/pass_logs` and `logs/no_pass_logs` under `session_dir`.
    pub fn create(session_dir: &Path, compress: bool) -> RegressionResult<Self> {
        let logs = session_dir.join("logs");
        let pass_dir = logs.join("pass_logs");
        let no_pass_dir = logs.join("no_pass_logs");
        for dir in [&pass_dir, &no_pass_dir] {
            std::fs::create_dir_all(dir).map_err(|e| RegressionError::io(dir, e))?;
        }
        Ok(Self {
            pass_dir,
            no_pass_dir,
            compress,
        })
    }

    pub fn destination(&self, name: &str, status: JobStatus) -> PathBuf {
        let dir = if status.is_pass() {
            &self.pass_dir
        } else {
            &self.no_pass_dir
        };
        if self.compress {
            dir.join(format!("{name}.log.gz"))
        } else {
            dir.join(format!("{name}.log"))
        }
    }

    /// Copy the log of run `name` out of `slot`.
    ///
    /// Failures are logged and produce a receipt without an archived path.
    pub async fn archive(
        &self,
        slot: SlotId,
        source: Option<&Path>,
        name: &str,
        status: JobStatus,
    ) -> ArchiveReceipt {
        let Some(source) = source.filter(|p| p.is_file()) else {
            tracing::warn!(test = %name, slot = %slot, "No log to archive");
            return ArchiveReceipt {
                slot,
                archived: None,
            };
        };

        let dest = self.destination(name, status);
        let result = if self.compress {
            let (src, dst) = (source.to_path_buf(), dest.clone());
            tokio::task::spawn_blocking(move || gzip_file(&src, &dst))
                .await
                .unwrap_or_else(|e| Err(std::io::Error::other(e)))
        } else {
            tokio::fs::copy(source, &dest).await.map(|_| ())
        };

        match result {
            Ok(()) => {
                tracing::debug!(test = %name, dest = %dest.display(), "Archived log");
                ArchiveReceipt {
                    slot,
                    archived: Some(dest),
                }
            }
            Err(e) => {
                tracing::warn!(
                    test = %name,
                    source = %source.display(),
                    error = %e,
                    "Failed to archive log"
                );
                ArchiveReceipt {
                    slot,
                    archived: None,
                }
            }
        }
    }
}

fn gzip_file(src: &Path, dst: &Path) -> std::io::Result<()> {
    let mut reader = BufReader::new(File::open(src)?);
    let mut encoder = GzEncoder::new(BufWriter::new(File::create(dst)?), Compression::default());
    std::io::copy(&mut reader, &mut encoder)?;
    encoder.finish()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::io::Read;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_archive_compresses_into_status_dir() {
        let tmp = TempDir::new().unwrap();
        let log = tmp.path().join("t1.log");
        std::fs::write(&log, "UVM_FATAL @ 1: boom\n").unwrap();

        let archiver = LogArchiver::create(tmp.path(), true).unwrap();
        let receipt = archiver
            .archive(SlotId(0), Some(&log), "t1_2", JobStatus::Fail)
            .await;

        let archived = receipt.archived_path().unwrap();
        assert!(archived.ends_with("logs/no_pass_logs/t1_2.log.gz"));
        let mut text = String::new();
        GzDecoder::new(File::open(archived).unwrap())
            .read_to_string(&mut text)
            .unwrap();
        assert_eq!(text, "UVM_FATAL @ 1: boom\n");
        assert!(log.exists(), "source log must stay in place");
    }

    #[tokio::test]
    async fn test_archive_plain_copy() {
        let tmp = TempDir::new().unwrap();
        let log = tmp.path().join("t1.log");
        std::fs::write(&log, "TEST PASSED\n").unwrap();

        let archiver = LogArchiver::create(tmp.path(), false).unwrap();
        let receipt = archiver
            .archive(SlotId(3), Some(&log), "t1", JobStatus::Pass)
            .await;

        assert_eq!(receipt.slot(), SlotId(3));
        let archived = receipt.archived_path().unwrap();
        assert!(archived.ends_with("logs/pass_logs/t1.log"));
        assert_eq!(std::fs::read_to_string(archived).unwrap(), "TEST PASSED\n");
    }

    #[tokio::test]
    async fn test_missing_log_still_yields_receipt() {
        let tmp = TempDir::new().unwrap();
        let archiver = LogArchiver::create(tmp.path(), true).unwrap();
        let receipt = archiver
            .archive(SlotId(1), Some(&tmp.path().join("absent.log")), "t1", JobStatus::Error)
            .await;
        assert!(receipt.archived_path().is_none());
        assert_eq!(receipt.slot(), SlotId(1));
    }
}
