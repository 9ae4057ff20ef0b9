//! Trace replay and timing
//!
//! [`run_trace`] replays one trace against one allocator and tallies what
//! was accepted and rejected. [`Experiment`] repeats that on fresh volumes,
//! times each run, and produces an [`ExperimentReport`].

use crate::allocator::{FileAllocator, Strategy};
use crate::config::VolumeConfig;
use crate::core::FileId;
use crate::error::{AllocError, HarnessResult};
use crate::trace::{Operation, Trace};
use comfy_table::{Cell, Table};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info};

/// Attempted and rejected operation counts from one replay
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationTally {
    pub create: usize,
    pub create_rejected: usize,
    pub extend: usize,
    pub extend_rejected: usize,
    pub access: usize,
    pub access_rejected: usize,
    pub shrink: usize,
    pub shrink_rejected: usize,

    /// Rejections by reason
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub reasons: BTreeMap<String, usize>,
}

impl OperationTally {
    fn record(&mut self, op: &Operation, outcome: &Result<(), AllocError>) {
        let rejected = outcome.is_err();
        let (attempts, rejections) = match op {
            Operation::Create { .. } => (&mut self.create, &mut self.create_rejected),
            Operation::Extend { .. } => (&mut self.extend, &mut self.extend_rejected),
            Operation::Access { .. } => (&mut self.access, &mut self.access_rejected),
            Operation::Shrink { .. } => (&mut self.shrink, &mut self.shrink_rejected),
        };
        *attempts += 1;
        if rejected {
            *rejections += 1;
        }
        if let Err(e) = outcome {
            *self.reasons.entry(e.kind().to_string()).or_default() += 1;
        }
    }

    pub fn attempted(&self) -> usize {
        self.create + self.extend + self.access + self.shrink
    }

    pub fn rejected(&self) -> usize {
        self.create_rejected + self.extend_rejected + self.access_rejected + self.shrink_rejected
    }
}

/// Replay `trace` against `allocator`
///
/// Creates receive ids 1, 2, 3, ... in order; the id only advances when a
/// create succeeds. Rejections are counted, never fatal, except a
/// bookkeeping defect which aborts the replay.
pub fn run_trace(allocator: &mut dyn FileAllocator, trace: &Trace) -> HarnessResult<OperationTally> {
    let mut tally = OperationTally::default();
    let mut next_id: FileId = 1;

    for op in trace.operations() {
        let outcome = match *op {
            Operation::Create { length } => {
                let outcome = allocator.create_file(next_id, length);
                if outcome.is_ok() {
                    next_id += 1;
                }
                outcome
            }
            Operation::Extend { file, blocks } => allocator.extend(file, blocks),
            Operation::Access { file, offset } => allocator.access(file, offset).map(|_| ()),
            Operation::Shrink { file, blocks } => allocator.shrink(file, blocks),
        };

        if let Err(AllocError::Inconsistent(message)) = &outcome {
            return Err(AllocError::Inconsistent(message.clone()).into());
        }
        if let Err(e) = &outcome {
            debug!("Rejected {}: {}", op, e);
        }
        tally.record(op, &outcome);
    }

    Ok(tally)
}

/// Repeated timed replays of traces on fresh volumes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Experiment {
    pub config: VolumeConfig,
    pub repetitions: usize,
}

impl Experiment {
    pub const DEFAULT_REPETITIONS: usize = 5;

    pub fn new(config: VolumeConfig) -> Self {
        Experiment {
            config,
            repetitions: Self::DEFAULT_REPETITIONS,
        }
    }

    pub fn with_repetitions(mut self, repetitions: usize) -> Self {
        self.repetitions = repetitions;
        self
    }

    /// Replay `trace` `repetitions` times with `strategy`
    pub fn run(&self, strategy: Strategy, trace: &Trace) -> HarnessResult<ExperimentReport> {
        if self.repetitions == 0 {
            return Err(AllocError::InvalidArgument(
                "an experiment needs at least one repetition".to_string(),
            )
            .into());
        }

        info!(
            "Running {} x{} with {} allocation (block size {})",
            trace.name, self.repetitions, strategy, self.config.block_size
        );

        let mut timings = Vec::with_capacity(self.repetitions);
        let mut last = None;

        for run in 0..self.repetitions {
            let mut allocator = self.config.build(strategy)?;

            let start = Instant::now();
            let tally = run_trace(allocator.as_mut(), trace)?;
            let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

            allocator.check_consistency()?;
            debug!("Run {} finished in {:.3} ms", run + 1, elapsed_ms);

            timings.push(elapsed_ms);
            last = Some((allocator, tally));
        }

        let (allocator, tally) = last.ok_or_else(|| {
            AllocError::InvalidArgument("experiment produced no runs".to_string())
        })?;

        let report = ExperimentReport {
            trace: trace.name.clone(),
            strategy,
            block_size: self.config.block_size,
            block_count: self.config.block_count,
            repetitions: self.repetitions,
            mean_ms: timings.iter().sum::<f64>() / timings.len() as f64,
            min_ms: timings.iter().copied().fold(f64::INFINITY, f64::min),
            max_ms: timings.iter().copied().fold(0.0, f64::max),
            tally,
            files: allocator.file_count(),
            capacity: allocator.capacity(),
            size: allocator.size(),
            reserved_blocks: allocator.reserved_blocks(),
            fragmentation: allocator.fragmentation_score(),
        };

        info!(
            "{} / {}: {} of {} operations rejected, mean {:.3} ms",
            report.trace,
            strategy,
            report.tally.rejected(),
            report.tally.attempted(),
            report.mean_ms
        );
        Ok(report)
    }

    /// Run every trace under every listed strategy
    pub fn run_all(&self, strategies: &[Strategy], traces: &[Trace]) -> HarnessResult<Vec<ExperimentReport>> {
        let mut reports = Vec::with_capacity(strategies.len() * traces.len());
        for &strategy in strategies {
            for trace in traces {
                reports.push(self.run(strategy, trace)?);
            }
        }
        Ok(reports)
    }
}

/// Outcome of one experiment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentReport {
    pub trace: String,
    pub strategy: Strategy,
    pub block_size: u64,
    pub block_count: usize,
    pub repetitions: usize,

    /// Wall-clock replay time in milliseconds
    pub mean_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,

    /// Counts from one replay (replays are deterministic)
    pub tally: OperationTally,

    /// Final volume state
    pub files: usize,
    pub capacity: usize,
    pub size: usize,
    pub reserved_blocks: usize,
    pub fragmentation: f64,
}

pub fn to_json(reports: &[ExperimentReport]) -> HarnessResult<String> {
    Ok(serde_json::to_string_pretty(reports)?)
}

pub fn write_json<P: AsRef<Path>>(reports: &[ExperimentReport], path: P) -> HarnessResult<()> {
    std::fs::write(path, to_json(reports)?)?;
    Ok(())
}

#[derive(Serialize)]
struct TimeRow<'a> {
    #[serde(rename = "File")]
    file: &'a str,
    #[serde(rename = "Strategy")]
    strategy: Strategy,
    #[serde(rename = "Time")]
    mean_ms: f64,
}

#[derive(Serialize)]
struct OperationsRow<'a> {
    #[serde(rename = "File")]
    file: &'a str,
    #[serde(rename = "Strategy")]
    strategy: Strategy,
    #[serde(rename = "Create")]
    create: usize,
    #[serde(rename = "Access")]
    access: usize,
    #[serde(rename = "Extend")]
    extend: usize,
    #[serde(rename = "Shrink")]
    shrink: usize,
    #[serde(rename = "Create Rejected")]
    create_rejected: usize,
    #[serde(rename = "Access Rejected")]
    access_rejected: usize,
    #[serde(rename = "Extend Rejected")]
    extend_rejected: usize,
    #[serde(rename = "Shrink Rejected")]
    shrink_rejected: usize,
}

/// Mean replay time per trace and strategy as CSV
pub fn write_time_csv<W: Write>(reports: &[ExperimentReport], writer: W) -> HarnessResult<()> {
    let mut out = csv::Writer::from_writer(writer);
    for report in reports {
        out.serialize(TimeRow {
            file: &report.trace,
            strategy: report.strategy,
            mean_ms: report.mean_ms,
        })?;
    }
    out.flush()?;
    Ok(())
}

/// Operation and rejection counts per trace and strategy as CSV
pub fn write_operations_csv<W: Write>(reports: &[ExperimentReport], writer: W) -> HarnessResult<()> {
    let mut out = csv::Writer::from_writer(writer);
    for report in reports {
        let t = &report.tally;
        out.serialize(OperationsRow {
            file: &report.trace,
            strategy: report.strategy,
            create: t.create,
            access: t.access,
            extend: t.extend,
            shrink: t.shrink,
            create_rejected: t.create_rejected,
            access_rejected: t.access_rejected,
            extend_rejected: t.extend_rejected,
            shrink_rejected: t.shrink_rejected,
        })?;
    }
    out.flush()?;
    Ok(())
}

/// Write `time.csv` and `operations.csv` into `dir`, creating it if needed
pub fn export_csv<P: AsRef<Path>>(reports: &[ExperimentReport], dir: P) -> HarnessResult<()> {
    let dir = dir.as_ref();
    std::fs::create_dir_all(dir)?;
    write_time_csv(reports, std::fs::File::create(dir.join("time.csv"))?)?;
    write_operations_csv(reports, std::fs::File::create(dir.join("operations.csv"))?)?;
    Ok(())
}

/// Render reports as a plain text table
pub fn render_table(reports: &[ExperimentReport]) -> String {
    let mut table = Table::new();
    table.set_header(vec![
        Cell::new("Trace"),
        Cell::new("Strategy"),
        Cell::new("Mean ms"),
        Cell::new("Create (rej)"),
        Cell::new("Extend (rej)"),
        Cell::new("Access (rej)"),
        Cell::new("Shrink (rej)"),
        Cell::new("Free"),
        Cell::new("Frag"),
    ]);

    for report in reports {
        let t = &report.tally;
        table.add_row(vec![
            Cell::new(&report.trace),
            Cell::new(report.strategy),
            Cell::new(format!("{:.3}", report.mean_ms)),
            Cell::new(format!("{} ({})", t.create, t.create_rejected)),
            Cell::new(format!("{} ({})", t.extend, t.extend_rejected)),
            Cell::new(format!("{} ({})", t.access, t.access_rejected)),
            Cell::new(format!("{} ({})", t.shrink, t.shrink_rejected)),
            Cell::new(report.capacity),
            Cell::new(format!("{:.4}", report.fragmentation)),
        ]);
    }

    table.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::contiguous::ContiguousAllocator;
    use crate::allocator::linked::LinkedAllocator;

    fn sample_trace() -> Trace {
        Trace::parse(
            "sample",
            "c:20\nc:30\nc:1000\nc:30\na:1:20\na:1:21\ne:2:2\nsh:3:4\nsh:2:1\ne:9:1\n",
        )
        .unwrap()
    }

    #[test]
    fn test_run_trace_contiguous() {
        let mut dt = ContiguousAllocator::new(5, 30).unwrap();
        let tally = run_trace(&mut dt, &sample_trace()).unwrap();

        assert_eq!(tally.create, 4);
        assert_eq!(tally.create_rejected, 1); // c:1000 needs 200 blocks
        assert_eq!(tally.access, 2);
        assert_eq!(tally.access_rejected, 1); // past the end of file 1
        assert_eq!(tally.extend, 2);
        assert_eq!(tally.extend_rejected, 1); // file 9 never created
        assert_eq!(tally.shrink, 2);
        assert_eq!(tally.shrink_rejected, 0);
        assert_eq!(tally.reasons.get("insufficient_capacity"), Some(&1));
        assert_eq!(tally.reasons.get("unknown_file"), Some(&1));

        // The rejected create did not consume an id
        assert_eq!(dt.file_count(), 3);
        assert!(dt.contains(3));
        dt.check_consistency().unwrap();
    }

    #[test]
    fn test_run_trace_linked() {
        let mut fat = LinkedAllocator::new(5, 30, 1).unwrap();
        let tally = run_trace(&mut fat, &sample_trace()).unwrap();

        assert_eq!(tally.attempted(), 10);
        assert_eq!(tally.create_rejected, 1);
        assert_eq!(tally.access_rejected, 1);
        assert_eq!(tally.extend_rejected, 1);
        assert_eq!(tally.shrink_rejected, 0);
        fat.check_consistency().unwrap();
    }

    #[test]
    fn test_run_trace_huge_shrink_is_rejected() {
        let trace = Trace::parse("huge", "c:40\nsh:1:18446744073709551615\na:1:40\n").unwrap();

        for strategy in Strategy::ALL {
            let mut allocator = VolumeConfig::new(16)
                .with_block_count(16)
                .build(strategy)
                .unwrap();
            let tally = run_trace(allocator.as_mut(), &trace).unwrap();

            assert_eq!(tally.shrink_rejected, 1);
            assert_eq!(tally.reasons.get("shrink_too_large"), Some(&1));
            assert_eq!(tally.access_rejected, 0);
            assert_eq!(allocator.blocks_used(1), Ok(3));
            allocator.check_consistency().unwrap();
        }
    }

    #[test]
    fn test_experiment_report() {
        let config = VolumeConfig::new(5).with_block_count(30).with_fat_entry_size(1);
        let experiment = Experiment::new(config).with_repetitions(3);

        let report = experiment.run(Strategy::Contiguous, &sample_trace()).unwrap();
        assert_eq!(report.repetitions, 3);
        assert_eq!(report.trace, "sample");
        assert_eq!(report.tally.rejected(), 3);
        assert_eq!(report.capacity + report.size, 30);
        assert!(report.min_ms <= report.mean_ms && report.mean_ms <= report.max_ms);
    }

    #[test]
    fn test_experiment_zero_repetitions() {
        let experiment = Experiment::new(VolumeConfig::new(5)).with_repetitions(0);
        assert!(experiment.run(Strategy::Linked, &sample_trace()).is_err());
    }

    #[test]
    fn test_run_all_and_export() {
        let config = VolumeConfig::new(5).with_block_count(30).with_fat_entry_size(1);
        let reports = Experiment::new(config)
            .with_repetitions(1)
            .run_all(&Strategy::ALL, &[sample_trace()])
            .unwrap();
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].strategy, Strategy::Contiguous);
        assert_eq!(reports[1].strategy, Strategy::Linked);
        assert_eq!(reports[1].reserved_blocks, 6);

        let json = to_json(&reports).unwrap();
        let back: Vec<ExperimentReport> = serde_json::from_str(&json).unwrap();
        assert_eq!(back.len(), 2);
        assert_eq!(back[0].tally, reports[0].tally);

        let table = render_table(&reports);
        assert!(table.contains("sample"));
        assert!(table.contains("linked"));
    }

    #[test]
    fn test_csv_export() {
        let config = VolumeConfig::new(5).with_block_count(30).with_fat_entry_size(1);
        let reports = Experiment::new(config)
            .with_repetitions(1)
            .run_all(&Strategy::ALL, &[sample_trace()])
            .unwrap();

        let mut operations = Vec::new();
        write_operations_csv(&reports, &mut operations).unwrap();
        let operations = String::from_utf8(operations).unwrap();
        let lines: Vec<&str> = operations.lines().collect();
        assert_eq!(
            lines[0],
            "File,Strategy,Create,Access,Extend,Shrink,\
             Create Rejected,Access Rejected,Extend Rejected,Shrink Rejected"
        );
        assert_eq!(lines[1], "sample,contiguous,4,2,2,2,1,1,1,0");
        assert_eq!(lines[2], "sample,linked,4,2,2,2,1,1,1,0");

        let mut time = Vec::new();
        write_time_csv(&reports, &mut time).unwrap();
        let time = String::from_utf8(time).unwrap();
        let lines: Vec<&str> = time.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "File,Strategy,Time");
        assert!(lines[2].starts_with("sample,linked,"));

        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("output");
        export_csv(&reports, &out).unwrap();
        assert!(out.join("time.csv").exists());
        assert_eq!(
            std::fs::read_to_string(out.join("operations.csv")).unwrap(),
            operations
        );
    }
}
