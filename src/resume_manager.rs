use chrono::Local;
use log::{error, info, warn};
use serde::Serialize;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::error::{CheckError, Result};
use crate::input_loader::{self, RecordTable};
use crate::record::{Identity, PersonRecord, VerificationResult};

/// Where a run reads from and checkpoints to.
#[derive(Debug, Clone)]
pub struct CheckpointPaths {
    pub input: PathBuf,
    pub output: PathBuf,
    pub absentee_output: PathBuf,
}

impl CheckpointPaths {
    /// The JSON progress summary lives next to the checkpoint.
    pub fn progress_file(&self) -> PathBuf {
        let mut name = self
            .output
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "checkpoint".into());
        name.push(".progress.json");
        self.output.with_file_name(name)
    }
}

/// Run-level counters, always recomputed from the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct RunStats {
    pub total: usize,
    pub checked: usize,
    pub registered: usize,
    pub voted: usize,
}

impl RunStats {
    pub fn from_records(records: &[PersonRecord]) -> Self {
        records.iter().fold(
            RunStats {
                total: records.len(),
                ..Default::default()
            },
            |mut s, r| {
                s.checked += r.checked as usize;
                s.registered += r.result.registered as usize;
                s.voted += r.result.absentee_requested as usize;
                s
            },
        )
    }
}

#[derive(Serialize)]
struct ProgressSummary<'a> {
    input: &'a Path,
    output: &'a Path,
    updated_at: String,
    #[serde(flatten)]
    stats: RunStats,
}

/// Persist after `every_completions` completions or `every_interval` since the
/// last persist, whichever comes first.
#[derive(Debug, Clone)]
pub struct CheckpointPolicy {
    every_completions: usize,
    every_interval: Duration,
    since_persist: usize,
    last_persist: Instant,
}

impl CheckpointPolicy {
    pub fn new(every_completions: usize, every_interval: Duration) -> Self {
        Self::starting_at(every_completions, every_interval, Instant::now())
    }

    pub fn starting_at(every_completions: usize, every_interval: Duration, now: Instant) -> Self {
        CheckpointPolicy {
            every_completions: every_completions.max(1),
            every_interval,
            since_persist: 0,
            last_persist: now,
        }
    }

    pub fn record_completion(&mut self) {
        self.since_persist += 1;
    }

    pub fn pending(&self) -> usize {
        self.since_persist
    }

    /// Nothing is due without at least one unpersisted completion.
    pub fn is_due(&self, now: Instant) -> bool {
        if self.since_persist == 0 {
            return false;
        }
        self.since_persist >= self.every_completions
            || now.saturating_duration_since(self.last_persist) >= self.every_interval
    }

    pub fn mark_persisted(&mut self, now: Instant) {
        self.since_persist = 0;
        self.last_persist = now;
    }
}

impl Default for CheckpointPolicy {
    fn default() -> Self {
        CheckpointPolicy::new(50, Duration::from_secs(60))
    }
}

/// Owns the result table. The scheduler's collector loop is its only writer.
pub struct CheckpointStore {
    table: RecordTable,
    paths: CheckpointPaths,
    skip_checked: bool,
}

impl CheckpointStore {
    /// Resumes from the checkpoint file when one exists, otherwise starts
    /// from the input file.
    pub fn load(paths: CheckpointPaths, skip_checked: bool) -> Result<Self> {
        let source = if paths.output.exists() {
            info!("Resuming from checkpoint {:?}", paths.output);
            &paths.output
        } else {
            info!("No checkpoint at {:?}. Starting from {:?}.", paths.output, paths.input);
            &paths.input
        };
        let table = input_loader::load_table(source)?;
        let store = CheckpointStore {
            table,
            paths,
            skip_checked,
        };

        let stats = store.stats();
        info!(
            "Loaded {} records ({} already checked, {} to verify).",
            stats.total,
            stats.checked,
            store.unresolved_count()
        );
        Ok(store)
    }

    pub fn from_table(table: RecordTable, paths: CheckpointPaths, skip_checked: bool) -> Self {
        CheckpointStore {
            table,
            paths,
            skip_checked,
        }
    }

    pub fn records(&self) -> &[PersonRecord] {
        &self.table.records
    }

    pub fn paths(&self) -> &CheckpointPaths {
        &self.paths
    }

    pub fn stats(&self) -> RunStats {
        RunStats::from_records(&self.table.records)
    }

    fn needs_verification(&self, record: &PersonRecord) -> bool {
        !self.skip_checked || !record.checked
    }

    pub fn unresolved_count(&self) -> usize {
        self.table
            .records
            .iter()
            .filter(|r| self.needs_verification(r))
            .count()
    }

    /// The records still to verify, by table index.
    pub fn unresolved_snapshot(&self) -> Vec<(usize, Identity)> {
        self.table
            .records
            .iter()
            .enumerate()
            .filter(|(_, r)| self.needs_verification(r))
            .map(|(id, r)| (id, r.identity.clone()))
            .collect()
    }

    /// Records a terminal result. Unknown ids are ignored with an error log.
    pub fn apply(&mut self, record_id: usize, result: VerificationResult) {
        match self.table.records.get_mut(record_id) {
            Some(record) => {
                record.result = result;
                record.checked = true;
            }
            None => error!("Ignoring result for unknown record #{}", record_id),
        }
    }

    /// Rows with an absentee application on record.
    pub fn absentee_records(&self) -> impl Iterator<Item = &PersonRecord> {
        absentee_projection(&self.table.records)
    }

    /// Writes the full table, the absentee subset and the progress summary.
    pub fn persist(&self) -> Result<RunStats> {
        write_atomically(&self.paths.output, |file| {
            self.table.write_csv(file, &self.table.records)
        })?;
        write_atomically(&self.paths.absentee_output, |file| {
            self.table.write_csv(file, self.absentee_records())
        })?;

        let stats = self.stats();
        let summary = ProgressSummary {
            input: &self.paths.input,
            output: &self.paths.output,
            updated_at: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            stats,
        };
        write_atomically(&self.paths.progress_file(), |file| {
            serde_json::to_writer_pretty(file, &summary)?;
            Ok(())
        })?;

        info!(
            "Checkpoint saved: Total {} / Checked {} / Registered {} / Voted {}",
            stats.total, stats.checked, stats.registered, stats.voted
        );
        Ok(stats)
    }
}

pub fn absentee_projection(records: &[PersonRecord]) -> impl Iterator<Item = &PersonRecord> {
    records.iter().filter(|r| r.result.absentee_requested)
}

/// Writes to a sibling temp file and renames it over `path`, so a crash
/// mid-write leaves the previous checkpoint intact.
fn write_atomically<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(&mut BufWriter<File>) -> Result<()>,
{
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| CheckError::io(parent, e))?;
    }
    let mut tmp_name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);

    let file = File::create(&tmp).map_err(|e| CheckError::io(&tmp, e))?;
    let mut writer = BufWriter::new(file);
    if let Err(e) = write(&mut writer) {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }
    let file = writer
        .into_inner()
        .map_err(|e| CheckError::io(&tmp, e.into_error()))?;
    file.sync_all().map_err(|e| CheckError::io(&tmp, e))?;
    drop(file);

    fs::rename(&tmp, path).map_err(|e| {
        warn!("Could not move {:?} into place", tmp);
        CheckError::io(path, e)
    })
}
