//! Per-batch result file: one CSV row per terminal job.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use loadgrid_core::Job;

pub(crate) struct ResultWriter {
    out: BufWriter<File>,
}

impl ResultWriter {
    pub(crate) fn create(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out = BufWriter::new(File::create(path)?);
        writeln!(out, "Id,Success,Retry,RequestTime,EndTime,Duration,Latency")?;
        out.flush()?;
        Ok(Self { out })
    }

    /// Timestamps are epoch milliseconds; duration and latency are
    /// milliseconds.
    pub(crate) fn append(&mut self, job: &Job) -> io::Result<()> {
        writeln!(
            self.out,
            "{},{},{},{},{},{},{}",
            job.id,
            job.success,
            job.retry,
            job.request_time,
            job.end_time,
            job.duration_ms(),
            job.latency_ms(),
        )?;
        self.out.flush()
    }
}
