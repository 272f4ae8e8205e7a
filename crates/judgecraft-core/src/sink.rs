use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use judgecraft_types::{EvaluationResult, RunSummary};

/// Destination for per-case records and the end-of-run summary.
#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn append_result(&self, result: &EvaluationResult) -> Result<()>;
    async fn write_summary(&self, results: &[EvaluationResult], summary: &RunSummary) -> Result<()>;
}

/// Appends one JSON record per line to `results.jsonl` and writes
/// `summary.json` at the end of each run, both under `dir`.
pub struct JsonlSink {
    dir: PathBuf,
    lock: tokio::sync::Mutex<()>,
}

impl JsonlSink {
    pub async fn create(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create output directory {:?}", dir))?;
        Ok(Self {
            dir,
            lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn results_path(&self) -> PathBuf {
        self.dir.join("results.jsonl")
    }

    pub fn summary_path(&self) -> PathBuf {
        self.dir.join("summary.json")
    }
}

#[async_trait]
impl ResultSink for JsonlSink {
    async fn append_result(&self, result: &EvaluationResult) -> Result<()> {
        let mut line = serde_json::to_string(&result.to_record())?;
        line.push('\n');

        // Concurrent cases append whole lines only.
        let _guard = self.lock.lock().await;
        let path = self.results_path();
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("Failed to open {:?}", path))?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    async fn write_summary(&self, _results: &[EvaluationResult], summary: &RunSummary) -> Result<()> {
        let json = serde_json::to_string_pretty(summary)?;
        write_file(&self.summary_path(), json).await
    }
}

async fn write_file(path: &Path, contents: String) -> Result<()> {
    tokio::fs::write(path, contents)
        .await
        .with_context(|| format!("Failed to write {:?}", path))
}

/// Keeps everything in memory; handy for tests and embedding.
#[derive(Default)]
pub struct MemorySink {
    results: Mutex<Vec<EvaluationResult>>,
    summaries: Mutex<Vec<RunSummary>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn results(&self) -> Vec<EvaluationResult> {
        self.results.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn summaries(&self) -> Vec<RunSummary> {
        self.summaries.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ResultSink for MemorySink {
    async fn append_result(&self, result: &EvaluationResult) -> Result<()> {
        self.results
            .lock()
            .map_err(|_| anyhow::anyhow!("memory sink poisoned"))?
            .push(result.clone());
        Ok(())
    }

    async fn write_summary(&self, _results: &[EvaluationResult], summary: &RunSummary) -> Result<()> {
        self.summaries
            .lock()
            .map_err(|_| anyhow::anyhow!("memory sink poisoned"))?
            .push(summary.clone());
        Ok(())
    }
}

/// Forwards to every inner sink. Each sink is tried even if an earlier one fails;
/// the first error is returned.
pub struct MultiSink {
    sinks: Vec<Arc<dyn ResultSink>>,
}

impl MultiSink {
    pub fn new(sinks: Vec<Arc<dyn ResultSink>>) -> Self {
        Self { sinks }
    }
}

#[async_trait]
impl ResultSink for MultiSink {
    async fn append_result(&self, result: &EvaluationResult) -> Result<()> {
        let mut first_err = None;
        for sink in &self.sinks {
            if let Err(err) = sink.append_result(result).await {
                first_err.get_or_insert(err);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    async fn write_summary(&self, results: &[EvaluationResult], summary: &RunSummary) -> Result<()> {
        let mut first_err = None;
        for sink in &self.sinks {
            if let Err(err) = sink.write_summary(results, summary).await {
                first_err.get_or_insert(err);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

/// Persists runs through `judgecraft-store`.
#[cfg(feature = "persistence")]
pub struct StoreSink {
    store: judgecraft_store::Store,
    run_id: i64,
}

#[cfg(feature = "persistence")]
impl StoreSink {
    pub fn new(store: judgecraft_store::Store, metadata: Option<serde_json::Value>) -> Result<Self> {
        let run_id = store.create_run(metadata)?;
        Ok(Self { store, run_id })
    }

    pub fn run_id(&self) -> i64 {
        self.run_id
    }

    pub fn store(&self) -> &judgecraft_store::Store {
        &self.store
    }
}

#[cfg(feature = "persistence")]
#[async_trait]
impl ResultSink for StoreSink {
    async fn append_result(&self, result: &EvaluationResult) -> Result<()> {
        self.store.save_result(self.run_id, result)?;
        Ok(())
    }

    async fn write_summary(&self, _results: &[EvaluationResult], summary: &RunSummary) -> Result<()> {
        self.store.finish_run(self.run_id, summary)?;
        Ok(())
    }
}
