//! Per-batch audit trail: one CSV row per control-loop step.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use crate::scaler::DataPoint;

pub(crate) struct AuditWriter {
    out: BufWriter<File>,
}

impl AuditWriter {
    pub(crate) fn create(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out = BufWriter::new(File::create(path)?);
        writeln!(
            out,
            "Time,ExpectedWorker,RunningWorker,TotalWorker,NewJob,OngoingJob,CompletedJob,AvgDuration,AvgDelay,Reward"
        )?;
        out.flush()?;
        Ok(Self { out })
    }

    /// Rows are flushed as written so a download mid-run sees every
    /// completed step.
    pub(crate) fn append(&mut self, elapsed_secs: u64, dp: &DataPoint) -> io::Result<()> {
        writeln!(
            self.out,
            "{},{},{},{},{},{},{},{:.2},{:.2},{:.8}",
            elapsed_secs,
            dp.expected_worker,
            dp.running_worker,
            dp.total_worker,
            dp.new_job,
            dp.ongoing_job,
            dp.completed_job,
            dp.avg_duration_ms,
            dp.avg_delay_ms,
            dp.reward,
        )?;
        self.out.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_header_and_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("batch-audit.csv");
        let mut audit = AuditWriter::create(&path).unwrap();
        audit
            .append(
                10,
                &DataPoint {
                    expected_worker: 2,
                    running_worker: 2,
                    total_worker: 3,
                    new_job: 14,
                    ongoing_job: 5,
                    completed_job: 9,
                    avg_duration_ms: 1234.5,
                    avg_delay_ms: 2000.0,
                    reward: 0.03,
                },
            )
            .unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("Time,ExpectedWorker"));
        assert_eq!(lines[1], "10,2,2,3,14,5,9,1234.50,2000.00,0.03000000");
    }

    #[test]
    fn creates_missing_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/out/batch-audit.csv");
        AuditWriter::create(&path).unwrap();
        assert!(path.exists());
    }
}
