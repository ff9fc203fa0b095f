use std::{
    collections::VecDeque,
    fs::{self, File},
    io::{BufRead, BufReader, BufWriter, Write},
    path::{Path, PathBuf},
    sync::Arc,
};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::{
    error::{ForecastError, ForecastResult},
    record::{Dataset, DemandRecord, MergeSummary},
};

const DATASET_FILE: &str = "dataset.jsonl";
const BACKUP_DIR: &str = "backups";

/// Snapshot of a prior dataset state.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Backup {
    seq: u64,
    taken_at: DateTime<Utc>,
    dataset: Arc<Dataset>,
}

/// Public description of a retained backup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupInfo {
    /// Monotonic backup sequence number.
    pub seq: u64,
    /// When the snapshot was taken.
    pub taken_at: DateTime<Utc>,
    /// Row count captured by the snapshot.
    pub records: usize,
}

impl From<&Backup> for BackupInfo {
    fn from(backup: &Backup) -> Self {
        Self {
            seq: backup.seq,
            taken_at: backup.taken_at,
            records: backup.dataset.len(),
        }
    }
}

/// Result of a committed append.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendOutcome {
    /// Merge counts.
    pub merge: MergeSummary,
    /// Dataset size after the append.
    pub total_records: usize,
    /// Backup holding the pre-append state.
    pub backup: BackupInfo,
}

/// Result of a restore.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreOutcome {
    /// The backup that became authoritative.
    pub restored: BackupInfo,
    /// Dataset size before the restore.
    pub replaced_records: usize,
    /// Backups still retained.
    pub remaining_backups: usize,
}

#[derive(Debug)]
struct Journal {
    backups: VecDeque<Backup>,
    next_seq: u64,
}

/// Backup file that could not be read when the store was opened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedBackup {
    /// File location.
    pub path: PathBuf,
    /// Read or decode error.
    pub reason: String,
}

/// Authoritative dataset plus a bounded stack of backups.
///
/// Readers take an `Arc<Dataset>` snapshot and never wait on a writer's merge
/// or disk I/O; the pointer swap at the end of a commit is the only exclusive
/// section they can observe. Writers serialize on the journal lock.
#[derive(Debug)]
pub struct DatasetStore {
    current: RwLock<Arc<Dataset>>,
    journal: Mutex<Journal>,
    retention: usize,
    dir: Option<PathBuf>,
    skipped: Vec<SkippedBackup>,
}

impl DatasetStore {
    /// Creates a store kept only in memory.
    #[must_use]
    pub fn in_memory(retention: usize) -> Self {
        Self {
            current: RwLock::new(Arc::new(Dataset::default())),
            journal: Mutex::new(Journal {
                backups: VecDeque::new(),
                next_seq: 1,
            }),
            retention: retention.max(1),
            dir: None,
            skipped: Vec::new(),
        }
    }

    /// Opens a file-backed store in `dir`, reloading the dataset and retained backups.
    pub fn open(dir: impl Into<PathBuf>, retention: usize) -> ForecastResult<Self> {
        let dir = dir.into();
        let backup_dir = dir.join(BACKUP_DIR);
        fs::create_dir_all(&backup_dir).map_err(|err| {
            ForecastError::storage(format!("creating {}", backup_dir.display()), err)
        })?;

        let dataset_path = dir.join(DATASET_FILE);
        let dataset = if dataset_path.exists() {
            read_records(&dataset_path)?
        } else {
            Dataset::default()
        };

        let retention = retention.max(1);
        let (mut backups, skipped) = read_backups(&backup_dir)?;
        while backups.len() > retention {
            if let Some(evicted) = backups.pop_front() {
                let _ = fs::remove_file(backup_path(&dir, evicted.seq));
            }
        }
        let next_seq = backups.back().map_or(1, |b| b.seq + 1);

        Ok(Self {
            current: RwLock::new(Arc::new(dataset)),
            journal: Mutex::new(Journal { backups, next_seq }),
            retention,
            dir: Some(dir),
            skipped,
        })
    }

    /// Backup files ignored by [`Self::open`] because they could not be decoded.
    #[must_use]
    pub fn skipped_backups(&self) -> &[SkippedBackup] {
        &self.skipped
    }

    /// Current dataset snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Arc<Dataset> {
        Arc::clone(&self.current.read())
    }

    /// Current row count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.current.read().len()
    }

    /// Whether the dataset is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.current.read().is_empty()
    }

    /// Directory backing the store, if persistent.
    #[must_use]
    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    /// Maximum number of retained backups.
    #[must_use]
    pub const fn retention(&self) -> usize {
        self.retention
    }

    /// Retained backups, oldest first.
    #[must_use]
    pub fn backups(&self) -> Vec<BackupInfo> {
        self.journal.lock().backups.iter().map(BackupInfo::from).collect()
    }

    /// Number of retained backups.
    #[must_use]
    pub fn backup_count(&self) -> usize {
        self.journal.lock().backups.len()
    }

    /// Snapshots the current state, merges `records` and commits the result.
    ///
    /// Nothing becomes visible unless both the backup and the new dataset were
    /// persisted; on error the prior dataset stays authoritative.
    pub fn append(&self, records: &[DemandRecord]) -> ForecastResult<AppendOutcome> {
        let mut journal = self.journal.lock();
        let previous = self.snapshot();
        let (next, merge) = previous.merged(records);
        let backup = Backup {
            seq: journal.next_seq,
            taken_at: Utc::now(),
            dataset: previous,
        };

        if let Some(dir) = &self.dir {
            let path = backup_path(dir, backup.seq);
            write_atomic(&path, |writer| {
                serde_json::to_writer(writer, &backup)?;
                Ok(())
            })?;
            if let Err(err) = write_records(&dir.join(DATASET_FILE), &next) {
                let _ = fs::remove_file(&path);
                return Err(err);
            }
        }

        let info = BackupInfo::from(&backup);
        journal.next_seq += 1;
        journal.backups.push_back(backup);
        while journal.backups.len() > self.retention {
            if let (Some(evicted), Some(dir)) = (journal.backups.pop_front(), &self.dir) {
                let _ = fs::remove_file(backup_path(dir, evicted.seq));
            }
        }

        let total_records = next.len();
        *self.current.write() = Arc::new(next);
        Ok(AppendOutcome {
            merge,
            total_records,
            backup: info,
        })
    }

    /// Makes the most recent backup authoritative again and drops it from the stack.
    ///
    /// Returns `Ok(None)` when no backup is retained.
    pub fn restore_latest(&self) -> ForecastResult<Option<RestoreOutcome>> {
        let mut journal = self.journal.lock();
        let Some(backup) = journal.backups.pop_back() else {
            return Ok(None);
        };

        if let Some(dir) = &self.dir {
            if let Err(err) = write_records(&dir.join(DATASET_FILE), &backup.dataset) {
                journal.backups.push_back(backup);
                return Err(err);
            }
            let _ = fs::remove_file(backup_path(dir, backup.seq));
        }

        let replaced_records = self.len();
        *self.current.write() = Arc::clone(&backup.dataset);
        Ok(Some(RestoreOutcome {
            restored: BackupInfo::from(&backup),
            replaced_records,
            remaining_backups: journal.backups.len(),
        }))
    }
}

fn backup_path(dir: &Path, seq: u64) -> PathBuf {
    dir.join(BACKUP_DIR).join(format!("backup-{seq:08}.json"))
}

fn write_atomic(
    path: &Path,
    fill: impl FnOnce(&mut BufWriter<File>) -> ForecastResult<()>,
) -> ForecastResult<()> {
    let tmp = path.with_extension("tmp");
    let file = File::create(&tmp)
        .map_err(|err| ForecastError::storage(format!("creating {}", tmp.display()), err))?;
    let mut writer = BufWriter::new(file);
    fill(&mut writer)?;
    writer
        .flush()
        .map_err(|err| ForecastError::storage(format!("writing {}", tmp.display()), err))?;
    fs::rename(&tmp, path).map_err(|err| {
        ForecastError::storage(format!("replacing {}", path.display()), err)
    })
}

fn write_records(path: &Path, dataset: &Dataset) -> ForecastResult<()> {
    write_atomic(path, |writer| {
        for record in dataset.records() {
            serde_json::to_writer(&mut *writer, record)?;
            writer
                .write_all(b"\n")
                .map_err(|err| ForecastError::storage("writing dataset line", err))?;
        }
        Ok(())
    })
}

fn read_records(path: &Path) -> ForecastResult<Dataset> {
    let file = File::open(path)
        .map_err(|err| ForecastError::storage(format!("opening {}", path.display()), err))?;
    let mut records = Vec::new();
    for line in BufReader::new(file).lines() {
        let line =
            line.map_err(|err| ForecastError::storage(format!("reading {}", path.display()), err))?;
        if line.trim().is_empty() {
            continue;
        }
        records.push(serde_json::from_str::<DemandRecord>(&line)?);
    }
    Ok(Dataset::new(records))
}

// undecodable backup files are returned separately and left on disk
fn read_backups(dir: &Path) -> ForecastResult<(VecDeque<Backup>, Vec<SkippedBackup>)> {
    let entries = fs::read_dir(dir)
        .map_err(|err| ForecastError::storage(format!("listing {}", dir.display()), err))?;
    let mut backups = Vec::new();
    let mut skipped = Vec::new();
    for entry in entries {
        let path = entry
            .map_err(|err| ForecastError::storage(format!("listing {}", dir.display()), err))?
            .path();
        let is_backup = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.starts_with("backup-") && name.ends_with(".json"));
        if !is_backup {
            continue;
        }
        let decoded = File::open(&path)
            .map_err(|err| err.to_string())
            .and_then(|file| {
                serde_json::from_reader::<_, Backup>(BufReader::new(file))
                    .map_err(|err| err.to_string())
            });
        match decoded {
            Ok(backup) => backups.push(backup),
            Err(reason) => skipped.push(SkippedBackup { path, reason }),
        }
    }
    backups.sort_by_key(|backup| backup.seq);
    skipped.sort_by(|a, b| a.path.cmp(&b.path));
    Ok((backups.into(), skipped))
}
