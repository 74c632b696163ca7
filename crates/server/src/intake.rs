// crates/server/src/intake.rs
//! Local FASTA intake: the job runner behind every start request.
//!
//! Each job gets a fresh results folder named after its id. Ids can repeat
//! across restarts or once a job has been reaped, so an existing folder is
//! never written into: the new folder gets a numeric suffix (`run-1-2`) and
//! the `folder` event reports the name actually used. The raw submission is
//! kept as `inputs.fasta` and a per-record summary as `sequences.csv`, both
//! downloadable later through `/download`.

use std::fmt::Write as _;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use serde_json::json;
use seqrelay_broker::{EventKind, JobRunner, Notifier};
use thiserror::Error;
use tracing::{debug, info};

pub const INPUTS_FILE: &str = "inputs.fasta";
pub const SEQUENCES_FILE: &str = "sequences.csv";

const MAX_FOLDER_ATTEMPTS: usize = 1000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FastaError {
    #[error("no sequences in input")]
    Empty,
    #[error("record {index} ('{header}') has no sequence")]
    EmptyRecord { index: usize, header: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FastaRecord {
    /// Header text after `>`; empty for headerless input.
    pub header: String,
    pub sequence: String,
}

impl FastaRecord {
    pub fn len(&self) -> usize {
        self.sequence.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequence.is_empty()
    }

    /// Fraction of G and C bases, rounded to four decimals.
    pub fn gc_content(&self) -> f64 {
        if self.sequence.is_empty() {
            return 0.0;
        }
        let gc = self
            .sequence
            .bytes()
            .filter(|b| matches!(b.to_ascii_uppercase(), b'G' | b'C'))
            .count();
        let ratio = gc as f64 / self.sequence.len() as f64;
        (ratio * 10_000.0).round() / 10_000.0
    }
}

/// Split FASTA text into records.
///
/// Sequence lines before the first header form one unnamed record.
/// Whitespace inside sequence lines is dropped.
pub fn parse_fasta(input: &str) -> Result<Vec<FastaRecord>, FastaError> {
    let mut records: Vec<FastaRecord> = Vec::new();
    for line in input.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if let Some(header) = line.strip_prefix('>') {
            records.push(FastaRecord {
                header: header.trim().to_string(),
                sequence: String::new(),
            });
            continue;
        }
        if records.is_empty() {
            records.push(FastaRecord {
                header: String::new(),
                sequence: String::new(),
            });
        }
        if let Some(current) = records.last_mut() {
            current
                .sequence
                .extend(line.chars().filter(|c| !c.is_whitespace()));
        }
    }

    if records.is_empty() {
        return Err(FastaError::Empty);
    }
    if let Some((index, record)) = records.iter().enumerate().find(|(_, r)| r.is_empty()) {
        return Err(FastaError::EmptyRecord {
            index,
            header: record.header.clone(),
        });
    }
    Ok(records)
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// `index,header,length,gc_content` summary, one row per record.
pub fn sequences_csv(records: &[FastaRecord]) -> String {
    let mut out = String::from("index,header,length,gc_content\n");
    for (index, record) in records.iter().enumerate() {
        // writing to a String cannot fail
        let _ = writeln!(
            out,
            "{},{},{},{}",
            index,
            csv_field(&record.header),
            record.len(),
            record.gc_content()
        );
    }
    out
}

/// Create a results folder that did not exist before, returning its id and path.
async fn create_results_folder(results_dir: &Path, job_id: &str) -> anyhow::Result<(String, PathBuf)> {
    tokio::fs::create_dir_all(results_dir)
        .await
        .with_context(|| format!("creating results dir {}", results_dir.display()))?;

    for attempt in 1..=MAX_FOLDER_ATTEMPTS {
        let folder_id = match attempt {
            1 => job_id.to_string(),
            n => format!("{job_id}-{n}"),
        };
        let folder = results_dir.join(&folder_id);
        match tokio::fs::create_dir(&folder).await {
            Ok(()) => return Ok((folder_id, folder)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                debug!(job_id = %job_id, folder = %folder_id, "results folder taken");
            }
            Err(e) => {
                return Err(e).with_context(|| format!("creating results folder {}", folder.display()))
            }
        }
    }
    anyhow::bail!("no free results folder for job {job_id}")
}

pub struct FastaIntakeRunner {
    results_dir: PathBuf,
}

impl FastaIntakeRunner {
    pub fn new(results_dir: impl Into<PathBuf>) -> Self {
        Self {
            results_dir: results_dir.into(),
        }
    }
}

#[async_trait]
impl JobRunner for FastaIntakeRunner {
    async fn run(&self, input: String, notifier: Notifier) -> anyhow::Result<()> {
        let records = parse_fasta(&input)?;

        let (folder_id, folder) = create_results_folder(&self.results_dir, notifier.job_id()).await?;
        tokio::fs::write(folder.join(INPUTS_FILE), &input)
            .await
            .context("writing inputs.fasta")?;
        notifier.notify(EventKind::Folder, json!({ "folderId": folder_id }))?;

        let total = records.len();
        for (index, record) in records.iter().enumerate() {
            notifier.notify(
                EventKind::Progress,
                json!({
                    "stage": "sequence",
                    "index": index,
                    "total": total,
                    "header": record.header,
                    "length": record.len(),
                    "gcContent": record.gc_content(),
                }),
            )?;
            tokio::task::yield_now().await;
        }

        tokio::fs::write(folder.join(SEQUENCES_FILE), sequences_csv(&records))
            .await
            .context("writing sequences.csv")?;
        notifier.notify(
            EventKind::Complete,
            json!({ "folderId": folder_id, "sequences": total }),
        )?;
        info!(job_id = %notifier.job_id(), folder = %folder_id, sequences = total, "intake finished");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use seqrelay_broker::{spawn_job, Broker, ConnectionHandle, JobEvent, JobStatus};
    use std::sync::Arc;

    #[test]
    fn test_parse_multiple_records() {
        let records = parse_fasta(">seq1 first\nACGT\nGG CC\n\n>seq2\nAAAA\n").unwrap();
        assert_eq!(
            records,
            vec![
                FastaRecord {
                    header: "seq1 first".into(),
                    sequence: "ACGTGGCC".into()
                },
                FastaRecord {
                    header: "seq2".into(),
                    sequence: "AAAA".into()
                },
            ]
        );
    }

    #[test]
    fn test_parse_headerless_input() {
        let records = parse_fasta("acgt\nacgt\n").unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].header, "");
        assert_eq!(records[0].sequence, "acgtacgt");
    }

    #[test]
    fn test_parse_rejects_empty_input() {
        assert_eq!(parse_fasta(""), Err(FastaError::Empty));
        assert_eq!(parse_fasta("  \n\t\n"), Err(FastaError::Empty));
    }

    #[test]
    fn test_parse_rejects_header_without_sequence() {
        assert_eq!(
            parse_fasta(">a\nACGT\n>b\n"),
            Err(FastaError::EmptyRecord {
                index: 1,
                header: "b".into()
            })
        );
    }

    #[test]
    fn test_gc_content() {
        let record = |s: &str| FastaRecord {
            header: String::new(),
            sequence: s.into(),
        };
        assert_eq!(record("GGCC").gc_content(), 1.0);
        assert_eq!(record("acgt").gc_content(), 0.5);
        assert_eq!(record("AAT").gc_content(), 0.0);
        assert_eq!(record("GAA").gc_content(), 0.3333);
    }

    #[test]
    fn test_sequences_csv_quotes_headers() {
        let records = vec![FastaRecord {
            header: "sp|P1|x, \"y\"".into(),
            sequence: "GC".into(),
        }];
        assert_eq!(
            sequences_csv(&records),
            "index,header,length,gc_content\n0,\"sp|P1|x, \"\"y\"\"\",2,1\n"
        );
    }

    /// Run one intake job to completion on a fresh broker.
    async fn run_job_in(
        dir: &Path,
        suggested_id: Option<&str>,
        input: &str,
    ) -> (Broker, String, Vec<JobEvent>) {
        let broker = Broker::default();
        let (conn, mut rx) = ConnectionHandle::channel();
        let job_id = broker
            .start_job(&conn, suggested_id, json!({}))
            .unwrap()
            .job_id;
        let runner = Arc::new(FastaIntakeRunner::new(dir));
        spawn_job(&broker, runner, job_id.clone(), input.to_string())
            .await
            .unwrap();

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        (broker, job_id, events)
    }

    async fn run_job(input: &str) -> (tempfile::TempDir, Broker, String, Vec<JobEvent>) {
        let dir = tempfile::tempdir().unwrap();
        let (broker, job_id, events) = run_job_in(dir.path(), None, input).await;
        (dir, broker, job_id, events)
    }

    #[tokio::test]
    async fn test_runner_emits_folder_progress_complete() {
        let (dir, broker, job_id, events) = run_job(">a\nGGCC\n>b\nATAT\n").await;

        let kinds: Vec<String> = events.iter().map(|e| e.kind.to_string()).collect();
        assert_eq!(
            kinds,
            vec!["job_started", "folder", "progress", "progress", "complete"]
        );
        assert_eq!(events[1].payload["folderId"], job_id.as_str());
        assert_eq!(events[2].payload["header"], "a");
        assert_eq!(events[2].payload["gcContent"], 1.0);
        assert_eq!(events[3].payload["index"], 1);
        assert_eq!(events[3].payload["total"], 2);
        assert_eq!(events[4].payload["sequences"], 2);
        assert_eq!(broker.status(&job_id), Some(JobStatus::Completed));

        let folder = dir.path().join(&job_id);
        assert_eq!(
            std::fs::read_to_string(folder.join(INPUTS_FILE)).unwrap(),
            ">a\nGGCC\n>b\nATAT\n"
        );
        let csv = std::fs::read_to_string(folder.join(SEQUENCES_FILE)).unwrap();
        assert_eq!(csv.lines().count(), 3);
    }

    #[tokio::test]
    async fn test_runner_reports_parse_failure_as_error() {
        let (dir, broker, job_id, events) = run_job("   ").await;

        let last = events.last().unwrap();
        assert_eq!(last.kind, EventKind::Error);
        assert_eq!(last.payload["message"], "no sequences in input");
        assert_eq!(broker.status(&job_id), Some(JobStatus::Error));
        assert!(!dir.path().join(&job_id).exists());
    }

    #[tokio::test]
    async fn test_repeated_job_id_never_reuses_a_results_folder() {
        let dir = tempfile::tempdir().unwrap();
        let (_, first_id, _) = run_job_in(dir.path(), Some("run-1"), ">orig\nAAAA\n").await;
        assert_eq!(first_id, "run-1");
        let first = dir.path().join("run-1");
        std::fs::write(first.join("hits.csv"), "query,subject\n").unwrap();

        // a restarted broker has no record of the first job and honors the id again
        let (broker, second_id, events) =
            run_job_in(dir.path(), Some("run-1"), ">other\nCCCC\n").await;
        assert_eq!(second_id, "run-1");
        assert_eq!(events[1].kind, EventKind::Folder);
        assert_eq!(events[1].payload["folderId"], "run-1-2");
        assert_eq!(events.last().unwrap().payload["folderId"], "run-1-2");
        assert_eq!(
            broker.snapshot("run-1").unwrap().result_location.as_deref(),
            Some("run-1-2")
        );

        assert_eq!(
            std::fs::read_to_string(first.join(INPUTS_FILE)).unwrap(),
            ">orig\nAAAA\n"
        );
        assert!(first.join("hits.csv").is_file());
        let second = dir.path().join("run-1-2");
        assert_eq!(
            std::fs::read_to_string(second.join(INPUTS_FILE)).unwrap(),
            ">other\nCCCC\n"
        );
        assert!(!second.join("hits.csv").exists());

        let (_, _, events) = run_job_in(dir.path(), Some("run-1"), "GGGG").await;
        assert_eq!(events[1].payload["folderId"], "run-1-3");
    }

    #[tokio::test]
    async fn test_results_dir_is_created_on_demand() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("blast_res");
        let (broker, job_id, _) = run_job_in(&nested, None, "ACGT").await;
        assert_eq!(broker.status(&job_id), Some(JobStatus::Completed));
        assert!(nested.join(&job_id).join(SEQUENCES_FILE).is_file());
    }
}
