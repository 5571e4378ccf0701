use crate::app::result::{SequenceResult, Status};
use crate::app::suspension::Suspension;
use crate::configuration::constants::cargo_env::CARGO_PKG_VERSION;
use chrono::{DateTime, Utc};
use serde_derive::Serialize;
use std::fs::File;
use std::io::{self, BufWriter};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("Cannot write report: {0}")]
    Io(#[from] io::Error),
    #[error("Cannot serialize report: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub sequences: usize,
    pub passed: usize,
    pub failed: usize,
    pub errored: usize,
    pub waiting: usize,
    /// Failed or errored tests that are not required.
    pub optional_failures: usize,
}

#[derive(Debug, Serialize)]
pub struct Report {
    pub name: String,
    pub version: &'static str,
    pub generated_at: DateTime<Utc>,
    pub summary: Summary,
    pub sequences: Vec<SequenceResult>,
}

impl Summary {
    fn collect(sequences: &[SequenceResult]) -> Self {
        let mut summary = Summary {
            sequences: sequences.len(),
            ..Summary::default()
        };
        for sequence in sequences {
            match sequence.status {
                Status::Wait => summary.waiting += 1,
                Status::Error => summary.errored += 1,
                Status::Fail => summary.failed += 1,
                _ => summary.passed += 1,
            }
            summary.optional_failures += sequence
                .results
                .iter()
                .filter(|test| !test.required && matches!(test.status, Status::Fail | Status::Error))
                .count();
        }
        summary
    }
}

impl Report {
    /// Completed runs first, then runs still waiting for a callback.
    pub fn new(name: impl Into<String>, completed: Vec<SequenceResult>, pending: Vec<Suspension>) -> Self {
        let mut sequences = completed;
        sequences.extend(pending.into_iter().map(|suspension| suspension.result));
        Self {
            name: name.into(),
            version: CARGO_PKG_VERSION,
            generated_at: Utc::now(),
            summary: Summary::collect(&sequences),
            sequences,
        }
    }

    /// No required test failed or errored and nothing is left waiting.
    pub fn succeeded(&self) -> bool {
        self.summary.waiting == 0
            && self.sequences.iter().all(|sequence| {
                sequence
                    .results
                    .iter()
                    .filter(|test| test.required)
                    .all(|test| !matches!(test.status, Status::Fail | Status::Error))
            })
    }

    pub fn save_into_file(&self, path: &Path) -> Result<(), ReportError> {
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(writer, self)?;
        info!("Report written to {}", path.display());
        Ok(())
    }

    pub fn log_summary(&self) {
        info!(
            "Session '{}': {} sequences, {} passed, {} failed, {} errored, {} waiting",
            self.name,
            self.summary.sequences,
            self.summary.passed,
            self.summary.failed,
            self.summary.errored,
            self.summary.waiting
        );
        if self.summary.optional_failures > 0 {
            warn!("{} optional tests did not pass", self.summary.optional_failures);
        }
    }
}
