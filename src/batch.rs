use crate::analyzer::{self, MeasurementRecord};
use crate::gain::{self, GainPlan, Mode};
use crate::normalizer::{NormalizationOutcome, Normalizer};
use crate::scanner::{self, FileRecord};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BatchError {
    #[error("a batch run is already in progress")]
    AlreadyRunning,
    #[error("scan failed: {0}")]
    Scan(#[from] scanner::ScanError),
}

/// Where a batch run currently is. Individual file failures never push the
/// machine into a failure state; every run ends back at Idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Discovering,
    Analyzing,
    Planning,
    Selecting,
    Normalizing,
    ReAnalyzing,
}

/// Knobs for one batch run.
#[derive(Debug, Clone, Copy)]
pub struct BatchOptions {
    pub mode: Mode,
    pub target_db: f64,
    pub threshold_db: f64,
    /// Analysis workers; 0 = one per file.
    pub jobs: usize,
}

/// Everything a caller needs to report on a finished run.
pub struct BatchReport {
    pub files: Vec<FileRecord>,
    /// Post-run measurements: mutated files carry their re-analysis record.
    pub records: Vec<MeasurementRecord>,
    pub plan: GainPlan,
    pub selected: BTreeSet<PathBuf>,
    /// One outcome per selected file, in submission order.
    pub outcomes: Vec<NormalizationOutcome>,
    pub succeeded: usize,
    pub failed: usize,
}

/// Sequences one batch run: discover, analyze (parallel), plan, select,
/// normalize (strictly sequential), re-analyze what changed.
///
/// The album reference is computed from the pre-mutation snapshot before any
/// write begins, and encodes run one at a time, so no locking beyond the
/// re-entrancy guard is needed.
pub struct Orchestrator {
    ffmpeg: String,
    in_progress: AtomicBool,
    phase: Mutex<Phase>,
}

/// Clears the in-progress flag however the run ends.
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Orchestrator {
    pub fn new(ffmpeg: impl Into<String>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            in_progress: AtomicBool::new(false),
            phase: Mutex::new(Phase::Idle),
        }
    }

    pub fn phase(&self) -> Phase {
        *self.phase.lock().unwrap()
    }

    /// Full pipeline from a root folder, selection driven by the threshold.
    pub fn run(&self, root: &Path, opts: &BatchOptions) -> Result<BatchReport, BatchError> {
        let _guard = self.begin()?;

        self.enter(Phase::Discovering);
        let files = scanner::scan(root)?;
        log::info!("Discovered {} files under {}", files.len(), root.display());

        self.enter(Phase::Analyzing);
        let records = analyzer::analyze_batch(&self.ffmpeg, &files, opts.jobs);

        self.enter(Phase::Planning);
        let pairs = pair(&files, &records);
        let plan = gain::plan(&pairs, opts.target_db, opts.mode);

        self.enter(Phase::Selecting);
        let selected = gain::select(&pairs, opts.target_db, opts.threshold_db, opts.mode);
        log::info!("Selected {} of {} files", selected.len(), files.len());

        let report = self.mutate(files, records, plan, selected, opts.jobs);
        self.enter(Phase::Idle);
        Ok(report)
    }

    /// Pipeline over an externally-supplied batch: every measurable file in
    /// it is treated as already selected, deltas come from the supplied
    /// measurements.
    pub fn normalize_files(
        &self,
        batch: Vec<(FileRecord, MeasurementRecord)>,
        opts: &BatchOptions,
    ) -> Result<BatchReport, BatchError> {
        let _guard = self.begin()?;

        let (files, records): (Vec<_>, Vec<_>) = batch.into_iter().unzip();

        self.enter(Phase::Planning);
        let pairs = pair(&files, &records);
        let plan = gain::plan(&pairs, opts.target_db, opts.mode);

        self.enter(Phase::Selecting);
        // Caller already decided; everything with a planned delta goes.
        let selected: BTreeSet<PathBuf> = plan.keys().cloned().collect();

        let report = self.mutate(files, records, plan, selected, opts.jobs);
        self.enter(Phase::Idle);
        Ok(report)
    }

    /// Normalizing + ReAnalyzing phases. Strictly sequential: one encode in
    /// flight at a time, outcomes in submission order.
    fn mutate(
        &self,
        files: Vec<FileRecord>,
        mut records: Vec<MeasurementRecord>,
        plan: GainPlan,
        selected: BTreeSet<PathBuf>,
        jobs: usize,
    ) -> BatchReport {
        self.enter(Phase::Normalizing);
        let normalizer = Normalizer::new(self.ffmpeg.clone());
        let mut outcomes = Vec::new();

        let pb = ProgressBar::new(selected.len() as u64);
        pb.set_style(
            ProgressStyle::with_template(
                "{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
            )
            .unwrap()
            .progress_chars("#>-"),
        );

        for (file, record) in files.iter().zip(records.iter()) {
            if !selected.contains(&file.path) {
                continue;
            }
            // Selection without a plan entry means the measurement was
            // unusable; never normalize such a file.
            let Some(delta) = plan.get(&file.path) else {
                continue;
            };
            pb.set_message(file.name.clone());
            outcomes.push(normalizer.normalize(file, record, *delta));
            let ok = outcomes.iter().filter(|o| o.succeeded()).count();
            log::info!(
                "Normalization ongoing: {} of {} done, {} succeeded, {} failed",
                outcomes.len(),
                selected.len(),
                ok,
                outcomes.len() - ok
            );
            pb.inc(1);
        }

        let succeeded = outcomes.iter().filter(|o| o.succeeded()).count();
        let failed = outcomes.len() - succeeded;
        pb.finish_with_message(format!("Done: {succeeded} succeeded, {failed} failed"));

        self.enter(Phase::ReAnalyzing);
        let mutated: Vec<FileRecord> = files
            .iter()
            .filter(|f| outcomes.iter().any(|o| o.mutated() && o.path == f.path))
            .cloned()
            .collect();
        if !mutated.is_empty() {
            log::info!("Re-analyzing {} mutated files", mutated.len());
            let fresh = analyzer::analyze_batch(&self.ffmpeg, &mutated, jobs);
            for (file, record) in mutated.iter().zip(fresh) {
                if let Some(idx) = files.iter().position(|f| f.path == file.path) {
                    records[idx] = record;
                }
            }
        }

        BatchReport { files, records, plan, selected, outcomes, succeeded, failed }
    }

    fn begin(&self) -> Result<RunGuard<'_>, BatchError> {
        if self.in_progress.swap(true, Ordering::SeqCst) {
            return Err(BatchError::AlreadyRunning);
        }
        Ok(RunGuard(&self.in_progress))
    }

    fn enter(&self, phase: Phase) {
        log::debug!("Phase: {:?}", phase);
        *self.phase.lock().unwrap() = phase;
    }
}

fn pair<'a>(
    files: &'a [FileRecord],
    records: &'a [MeasurementRecord],
) -> Vec<(&'a Path, &'a MeasurementRecord)> {
    files.iter().map(|f| f.path.as_path()).zip(records.iter()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const NO_FFMPEG: &str = "librarygain-test-no-such-ffmpeg";

    fn opts(mode: Mode) -> BatchOptions {
        BatchOptions { mode, target_db: -7.0, threshold_db: 1.0, jobs: 1 }
    }

    fn batch_entry(dir: &Path, name: &str, max_db: f64) -> (FileRecord, MeasurementRecord) {
        let path = dir.join(name);
        fs::write(&path, name.as_bytes()).unwrap();
        let file = FileRecord {
            name: name.to_string(),
            path,
            size: name.len() as u64,
            created: None,
            modified: Some("2026-08-25 12:00:00".to_string()),
            folder: dir.to_path_buf(),
            rel_folder: String::new(),
        };
        let record = MeasurementRecord { max_db: Some(max_db), ..Default::default() };
        (file, record)
    }

    #[test]
    fn test_overlapping_runs_are_rejected_not_queued() {
        let orch = Orchestrator::new(NO_FFMPEG);
        let _held = orch.begin().unwrap();
        assert!(matches!(orch.begin(), Err(BatchError::AlreadyRunning)));
    }

    #[test]
    fn test_guard_resets_on_drop_so_next_run_can_start() {
        let orch = Orchestrator::new(NO_FFMPEG);
        drop(orch.begin().unwrap());
        assert!(orch.begin().is_ok());
    }

    #[test]
    fn test_run_rejects_missing_root_and_returns_to_ready() {
        let dir = tempfile::tempdir().unwrap();
        let orch = Orchestrator::new(NO_FFMPEG);
        let missing = dir.path().join("nope");
        assert!(matches!(orch.run(&missing, &opts(Mode::Independent)), Err(BatchError::Scan(_))));
        // Guard released even though the run failed early
        assert!(orch.begin().is_ok());
    }

    #[test]
    fn test_failures_are_isolated_per_file_and_order_preserved() {
        let dir = tempfile::tempdir().unwrap();
        let batch = vec![
            batch_entry(dir.path(), "01.mp3", -10.0),
            batch_entry(dir.path(), "02.mp3", -7.0), // already at target: no-op
            batch_entry(dir.path(), "03.mp3", -20.0),
        ];
        let orch = Orchestrator::new(NO_FFMPEG);
        let report = orch.normalize_files(batch, &opts(Mode::Independent)).unwrap();

        // All three had valid measurements, so all three were submitted
        assert_eq!(report.outcomes.len(), 3);
        assert_eq!(report.outcomes[0].path.file_name().unwrap(), "01.mp3");
        assert_eq!(report.outcomes[1].path.file_name().unwrap(), "02.mp3");
        assert_eq!(report.outcomes[2].path.file_name().unwrap(), "03.mp3");

        // The zero-delta file succeeds without an engine; the others fail
        // (no ffmpeg here) but never abort their siblings.
        assert!(!report.outcomes[0].succeeded());
        assert!(report.outcomes[1].succeeded());
        assert!(!report.outcomes[1].mutated());
        assert!(!report.outcomes[2].succeeded());
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.failed, 2);

        // Originals untouched on failure
        assert_eq!(fs::read(&report.files[0].path).unwrap(), b"01.mp3");
        assert_eq!(fs::read(&report.files[2].path).unwrap(), b"03.mp3");

        // Machine came back to rest
        assert_eq!(orch.phase(), Phase::Idle);
    }

    #[test]
    fn test_failed_measurements_are_never_submitted() {
        let dir = tempfile::tempdir().unwrap();
        let (file, _) = batch_entry(dir.path(), "01.mp3", -10.0);
        let failed = MeasurementRecord { failed: true, ..Default::default() };

        let orch = Orchestrator::new(NO_FFMPEG);
        let report = orch
            .normalize_files(vec![(file, failed)], &opts(Mode::Album))
            .unwrap();
        assert!(report.plan.is_empty());
        assert!(report.outcomes.is_empty());
        assert_eq!(report.failed, 0);
    }
}
