//! Strategic paper downloader: deeper extraction of ledger papers.
//!
//! Unevaluated ledger rows are processed in impact-score order. Each
//! paper's PDF is streamed to disk, registered as a File plus a pdf_text
//! IngestionSource, and the ledger row flips `evaluated` exactly once —
//! including when the download or extraction fails, so a broken URL can
//! never wedge the loop.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::store::SqliteStore;
use crate::types::{EngineError, ExtractError, FetchError, FileOrigin, JobId, SourceType};

/// Byte source for paper URLs. The HTTP implementation is the default;
/// tests inject a static map.
#[async_trait]
pub trait ContentFetcher: Send + Sync {
    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}

pub struct HttpContentFetcher {
    client: reqwest::Client,
    max_retries: u32,
}

impl HttpContentFetcher {
    pub fn new(timeout: std::time::Duration, max_retries: u32) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
            max_retries: max_retries.max(1),
        }
    }
}

#[async_trait]
impl ContentFetcher for HttpContentFetcher {
    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let mut last_error = String::new();
        for attempt in 0..self.max_retries {
            match self.client.get(url).send().await {
                Ok(response) if response.status().is_success() => {
                    return response.bytes().await.map(|b| b.to_vec()).map_err(|e| {
                        FetchError::DownloadFailed {
                            url: url.to_string(),
                            reason: e.to_string(),
                        }
                    });
                }
                Ok(response) => {
                    last_error = format!("status {}", response.status());
                }
                Err(e) => {
                    last_error = e.to_string();
                }
            }
            tracing::warn!(
                "Download attempt {}/{} failed for {url}: {last_error}",
                attempt + 1,
                self.max_retries
            );
            tokio::time::sleep(std::time::Duration::from_secs(2)).await;
        }
        Err(FetchError::DownloadFailed {
            url: url.to_string(),
            reason: last_error,
        })
    }
}

/// Static URL → bytes map for tests.
pub struct StaticContentFetcher {
    contents: HashMap<String, Vec<u8>>,
}

impl StaticContentFetcher {
    pub fn new() -> Self {
        Self {
            contents: HashMap::new(),
        }
    }

    pub fn with(mut self, url: impl Into<String>, bytes: Vec<u8>) -> Self {
        self.contents.insert(url.into(), bytes);
        self
    }
}

impl Default for StaticContentFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContentFetcher for StaticContentFetcher {
    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        self.contents
            .get(url)
            .cloned()
            .ok_or_else(|| FetchError::DownloadFailed {
                url: url.to_string(),
                reason: "not found".to_string(),
            })
    }
}

/// Text extraction from downloaded document files. The real PDF parser
/// lives outside the engine; tests and plain-text files go through the
/// passthrough implementation.
#[async_trait]
pub trait FileTextExtractor: Send + Sync {
    async fn extract_text(&self, path: &Path) -> Result<String, ExtractError>;
}

/// Reads the file as UTF-8, which covers text fixtures and pre-converted
/// documents. Binary PDFs need an external extractor implementation.
pub struct PassthroughTextExtractor;

#[async_trait]
impl FileTextExtractor for PassthroughTextExtractor {
    async fn extract_text(&self, path: &Path) -> Result<String, ExtractError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| ExtractError::FileNotFound(format!("{}: {e}", path.display())))?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

/// Summary of one download pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadSummary {
    pub downloaded: usize,
    pub skipped: usize,
    pub sources_created: usize,
}

pub struct PaperDownloader {
    store: Arc<SqliteStore>,
    fetcher: Arc<dyn ContentFetcher>,
    extractor: Arc<dyn FileTextExtractor>,
    base_dir: PathBuf,
}

impl PaperDownloader {
    pub fn new(
        store: Arc<SqliteStore>,
        fetcher: Arc<dyn ContentFetcher>,
        extractor: Arc<dyn FileTextExtractor>,
        base_dir: PathBuf,
    ) -> Self {
        Self {
            store,
            fetcher,
            extractor,
            base_dir,
        }
    }

    /// Download every unevaluated ledger paper, highest impact first.
    pub async fn process_job_downloads(&self, job_id: JobId) -> Result<DownloadSummary, EngineError> {
        let pending = self.store.unevaluated_evidence_by_impact(job_id).await?;
        tracing::info!(
            "Strategic download for job {job_id}: {} pending paper(s)",
            pending.len()
        );

        let mut summary = DownloadSummary::default();
        for evidence in pending {
            let outcome = self.download_one(job_id, &evidence).await;
            match outcome {
                Ok(true) => {
                    summary.downloaded += 1;
                    summary.sources_created += 1;
                }
                Ok(false) => summary.skipped += 1,
                Err(e) => {
                    tracing::error!(
                        "Download failed for paper {} of job {job_id}: {e}",
                        evidence.paper_id
                    );
                    summary.skipped += 1;
                }
            }
            // Evaluated flips regardless of outcome so the loop converges.
            self.store.mark_evidence_evaluated(evidence.id).await?;
        }
        tracing::info!(
            "Download pass for job {job_id}: {} downloaded, {} skipped",
            summary.downloaded,
            summary.skipped
        );
        Ok(summary)
    }

    async fn download_one(
        &self,
        job_id: JobId,
        evidence: &crate::store::JobPaperEvidence,
    ) -> Result<bool, EngineError> {
        let Some(paper) = self.store.get_paper(evidence.paper_id).await? else {
            tracing::warn!("Ledger references missing paper {}", evidence.paper_id);
            return Ok(false);
        };
        let Some(pdf_url) = paper.pdf_url.as_deref().filter(|u| !u.trim().is_empty()) else {
            tracing::debug!("Paper {} has no PDF URL; skipping", paper.id);
            return Ok(false);
        };

        let bytes = match self.fetcher.fetch_bytes(pdf_url).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!("Could not download {pdf_url}: {e}");
                return Ok(false);
            }
        };

        let job_dir = self.base_dir.join(job_id.to_string()).join("original");
        tokio::fs::create_dir_all(&job_dir)
            .await
            .map_err(|e| EngineError::Internal(format!("create download dir: {e}")))?;
        let safe_title: String = paper
            .title
            .chars()
            .take(30)
            .map(|c| if c.is_alphanumeric() { c } else { '_' })
            .collect();
        let filename = format!(
            "{}_{}_{}.pdf",
            evidence.impact_score as i64, paper.id, safe_title
        );
        let file_path = job_dir.join(&filename);
        tokio::fs::write(&file_path, &bytes)
            .await
            .map_err(|e| EngineError::Internal(format!("write download: {e}")))?;

        let raw_text = match self.extractor.extract_text(&file_path).await {
            Ok(text) => text,
            Err(e) => {
                // Download succeeded; extraction can still be retried by a
                // different extractor later, so keep the file.
                tracing::error!("Text extraction failed for {}: {e}", file_path.display());
                String::new()
            }
        };

        let file_record = self
            .store
            .create_file(
                job_id,
                Some(paper.id),
                FileOrigin::PaperDownload,
                &file_path.display().to_string(),
                "pdf",
                &filename,
            )
            .await?;
        self.store
            .create_source(
                job_id,
                SourceType::PdfText,
                &format!("file:{}", file_record.id),
                &raw_text,
            )
            .await?;
        tracing::info!(
            "Registered paper {} as file {} with ingestion source",
            paper.id,
            file_record.id
        );
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JobConfig;
    use crate::store::PaperCandidate;
    use crate::types::{JobMode, UserId};

    async fn setup(pdf_url: Option<&str>) -> (Arc<SqliteStore>, JobId, crate::types::PaperId) {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let job = store
            .create_job(UserId(1), JobMode::Discovery, &JobConfig::default(), None, None)
            .await
            .unwrap();
        let paper = store
            .insert_paper(
                &PaperCandidate {
                    title: "Downloadable paper".into(),
                    pdf_url: pdf_url.map(String::from),
                    source: "static".into(),
                    ..Default::default()
                },
                "fp-dl",
            )
            .await
            .unwrap();
        store.upsert_evidence(job.id, paper.id, None).await.unwrap();
        (store, job.id, paper.id)
    }

    #[tokio::test]
    async fn downloads_register_file_and_source() {
        let (store, job_id, _) = setup(Some("https://host/p.pdf")).await;
        let dir = tempfile::tempdir().unwrap();
        let fetcher = StaticContentFetcher::new()
            .with("https://host/p.pdf", b"Extracted paper body text.".to_vec());
        let downloader = PaperDownloader::new(
            store.clone(),
            Arc::new(fetcher),
            Arc::new(PassthroughTextExtractor),
            dir.path().to_path_buf(),
        );

        let summary = downloader.process_job_downloads(job_id).await.unwrap();
        assert_eq!(summary.downloaded, 1);
        assert_eq!(store.count_unevaluated_evidence(job_id).await.unwrap(), 0);

        let sources = store.unprocessed_sources(job_id).await.unwrap();
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].source_type, SourceType::PdfText);
        assert!(sources[0].raw_text.contains("Extracted paper body"));

        let files = store.list_files(job_id).await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].origin, FileOrigin::PaperDownload);
    }

    #[tokio::test]
    async fn missing_url_still_flips_evaluated() {
        let (store, job_id, _) = setup(None).await;
        let dir = tempfile::tempdir().unwrap();
        let downloader = PaperDownloader::new(
            store.clone(),
            Arc::new(StaticContentFetcher::new()),
            Arc::new(PassthroughTextExtractor),
            dir.path().to_path_buf(),
        );

        let summary = downloader.process_job_downloads(job_id).await.unwrap();
        assert_eq!(summary.downloaded, 0);
        assert_eq!(summary.skipped, 1);
        // The ledger row is consumed even without a download.
        assert_eq!(store.count_unevaluated_evidence(job_id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn failed_download_still_flips_evaluated() {
        let (store, job_id, _) = setup(Some("https://host/missing.pdf")).await;
        let dir = tempfile::tempdir().unwrap();
        let downloader = PaperDownloader::new(
            store.clone(),
            Arc::new(StaticContentFetcher::new()),
            Arc::new(PassthroughTextExtractor),
            dir.path().to_path_buf(),
        );
        downloader.process_job_downloads(job_id).await.unwrap();
        assert_eq!(store.count_unevaluated_evidence(job_id).await.unwrap(), 0);
    }
}
