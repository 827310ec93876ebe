//! HTTP paper providers.
//!
//! Each provider enforces a minimum inter-call delay and retries 429s
//! with exponential backoff, normalizing responses onto the shared
//! candidate shape.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use super::{FetchRequest, PaperProvider};
use crate::config::FetchProviderPolicy;
use crate::store::PaperCandidate;
use crate::types::FetchError;

const MAX_ATTEMPTS: u32 = 3;

/// Shared rate-limit / retry plumbing.
struct HttpProviderCore {
    client: reqwest::Client,
    base_url: String,
    rate_limit_wait: Duration,
    last_call: tokio::sync::Mutex<Option<Instant>>,
    api_key: Option<String>,
}

impl HttpProviderCore {
    fn new(policy: &FetchProviderPolicy) -> Self {
        let api_key = policy
            .api_key_env
            .as_ref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|k| !k.is_empty());
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            base_url: policy.base_url.clone(),
            rate_limit_wait: policy.rate_limit_wait,
            last_call: tokio::sync::Mutex::new(None),
            api_key,
        }
    }

    async fn respect_rate_limit(&self) {
        let mut last = self.last_call.lock().await;
        if let Some(at) = *last {
            let elapsed = at.elapsed();
            if elapsed < self.rate_limit_wait {
                tokio::time::sleep(self.rate_limit_wait - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    /// GET with backoff on 429; other HTTP failures surface immediately.
    async fn get_json(
        &self,
        provider: &str,
        params: &[(&str, String)],
    ) -> Result<serde_json::Value, FetchError> {
        self.respect_rate_limit().await;

        for attempt in 0..MAX_ATTEMPTS {
            let mut request = self.client.get(&self.base_url).query(params);
            if let Some(key) = &self.api_key {
                request = request.header("x-api-key", key);
            }
            let response = request.send().await.map_err(|e| FetchError::RequestFailed {
                provider: provider.to_string(),
                reason: e.to_string(),
            })?;

            if response.status().as_u16() == 429 {
                if attempt + 1 < MAX_ATTEMPTS {
                    let delay = Duration::from_secs(2u64.pow(attempt + 1));
                    tracing::warn!(
                        "{provider}: rate limited (429), retrying in {delay:?} \
                         (attempt {}/{MAX_ATTEMPTS})",
                        attempt + 1
                    );
                    tokio::time::sleep(delay).await;
                    continue;
                }
                return Err(FetchError::RateLimited {
                    provider: provider.to_string(),
                    attempts: MAX_ATTEMPTS,
                });
            }

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(FetchError::RequestFailed {
                    provider: provider.to_string(),
                    reason: format!("{status}: {body}"),
                });
            }

            return response.json().await.map_err(|e| FetchError::RequestFailed {
                provider: provider.to_string(),
                reason: format!("invalid JSON: {e}"),
            });
        }
        Err(FetchError::RateLimited {
            provider: provider.to_string(),
            attempts: MAX_ATTEMPTS,
        })
    }
}

/// Semantic Scholar graph API provider.
pub struct SemanticScholarProvider {
    core: HttpProviderCore,
}

impl SemanticScholarProvider {
    pub fn new(policy: &FetchProviderPolicy) -> Self {
        Self {
            core: HttpProviderCore::new(policy),
        }
    }

    fn normalize(item: &serde_json::Value) -> PaperCandidate {
        let external: BTreeMap<String, String> = item
            .get("externalIds")
            .and_then(|e| e.as_object())
            .map(|obj| {
                obj.iter()
                    .filter_map(|(k, v)| {
                        let value = match v {
                            serde_json::Value::String(s) => s.clone(),
                            serde_json::Value::Number(n) => n.to_string(),
                            _ => return None,
                        };
                        Some((k.clone(), value))
                    })
                    .collect()
            })
            .unwrap_or_default();

        let authors = item
            .get("authors")
            .and_then(|a| a.as_array())
            .map(|list| {
                list.iter()
                    .filter_map(|a| a.get("name").and_then(|n| n.as_str()))
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        let pdf_url = item
            .get("openAccessPdf")
            .and_then(|p| p.get("url"))
            .and_then(|u| u.as_str())
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .map(String::from);

        PaperCandidate {
            title: item
                .get("title")
                .and_then(|t| t.as_str())
                .unwrap_or("Untitled")
                .to_string(),
            abstract_text: item
                .get("abstract")
                .and_then(|a| a.as_str())
                .map(String::from),
            authors,
            year: item.get("year").and_then(|y| y.as_i64()),
            venue: item.get("venue").and_then(|v| v.as_str()).map(String::from),
            doi: external.get("DOI").cloned(),
            external_ids: external,
            pdf_url,
            source: "semantic_scholar".to_string(),
        }
    }
}

#[async_trait]
impl PaperProvider for SemanticScholarProvider {
    async fn fetch(&self, request: &FetchRequest) -> Result<Vec<PaperCandidate>, FetchError> {
        if request.query.is_empty() {
            return Ok(Vec::new());
        }
        tracing::info!(
            "semantic_scholar: fetching {:?} (limit {})",
            request.query,
            request.batch_size
        );
        let params = [
            ("query", request.query.clone()),
            ("limit", request.batch_size.to_string()),
            (
                "fields",
                "title,abstract,authors,year,venue,externalIds,openAccessPdf".to_string(),
            ),
        ];
        let body = self.core.get_json(self.name(), &params).await?;
        let items = body
            .get("data")
            .and_then(|d| d.as_array())
            .cloned()
            .unwrap_or_default();
        Ok(items.iter().map(Self::normalize).collect())
    }

    fn name(&self) -> &str {
        "semantic_scholar"
    }
}

/// Crossref works API provider.
pub struct CrossrefProvider {
    core: HttpProviderCore,
}

impl CrossrefProvider {
    pub fn new(policy: &FetchProviderPolicy) -> Self {
        Self {
            core: HttpProviderCore::new(policy),
        }
    }

    fn normalize(item: &serde_json::Value) -> PaperCandidate {
        let title = item
            .get("title")
            .and_then(|t| t.as_array())
            .and_then(|a| a.first())
            .and_then(|t| t.as_str())
            .unwrap_or("Untitled")
            .to_string();

        let authors = item
            .get("author")
            .and_then(|a| a.as_array())
            .map(|list| {
                list.iter()
                    .map(|a| {
                        let given = a.get("given").and_then(|g| g.as_str()).unwrap_or("");
                        let family = a.get("family").and_then(|f| f.as_str()).unwrap_or("");
                        format!("{given} {family}").trim().to_string()
                    })
                    .filter(|name| !name.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let year = item
            .get("issued")
            .and_then(|i| i.get("date-parts"))
            .and_then(|p| p.as_array())
            .and_then(|p| p.first())
            .and_then(|p| p.as_array())
            .and_then(|p| p.first())
            .and_then(|y| y.as_i64());

        let doi = item.get("DOI").and_then(|d| d.as_str()).map(String::from);
        let mut external = BTreeMap::new();
        if let Some(doi) = &doi {
            external.insert("DOI".to_string(), doi.clone());
        }

        PaperCandidate {
            title,
            abstract_text: item
                .get("abstract")
                .and_then(|a| a.as_str())
                .map(String::from),
            authors,
            year,
            venue: item
                .get("container-title")
                .and_then(|c| c.as_array())
                .and_then(|a| a.first())
                .and_then(|c| c.as_str())
                .map(String::from),
            doi,
            external_ids: external,
            pdf_url: item
                .get("link")
                .and_then(|l| l.as_array())
                .and_then(|links| {
                    links.iter().find(|l| {
                        l.get("content-type").and_then(|c| c.as_str())
                            == Some("application/pdf")
                    })
                })
                .and_then(|l| l.get("URL"))
                .and_then(|u| u.as_str())
                .map(String::from),
            source: "crossref".to_string(),
        }
    }
}

#[async_trait]
impl PaperProvider for CrossrefProvider {
    async fn fetch(&self, request: &FetchRequest) -> Result<Vec<PaperCandidate>, FetchError> {
        if request.query.is_empty() {
            return Ok(Vec::new());
        }
        tracing::info!(
            "crossref: fetching {:?} (limit {})",
            request.query,
            request.batch_size
        );
        let params = [
            ("query", request.query.clone()),
            ("rows", request.batch_size.to_string()),
        ];
        let body = self.core.get_json(self.name(), &params).await?;
        let items = body
            .get("message")
            .and_then(|m| m.get("items"))
            .and_then(|i| i.as_array())
            .cloned()
            .unwrap_or_default();
        Ok(items.iter().map(Self::normalize).collect())
    }

    fn name(&self) -> &str {
        "crossref"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn semantic_scholar_normalization() {
        let item = serde_json::json!({
            "title": "CRISPR screens in neurons",
            "abstract": "We screen genes.",
            "year": 2021,
            "venue": "Nature",
            "authors": [{"name": "A. Researcher"}, {"name": "B. Scientist"}],
            "externalIds": {"DOI": "10.1/xyz", "PubMed": 12345},
            "openAccessPdf": {"url": "https://host/p.pdf"}
        });
        let paper = SemanticScholarProvider::normalize(&item);
        assert_eq!(paper.title, "CRISPR screens in neurons");
        assert_eq!(paper.doi.as_deref(), Some("10.1/xyz"));
        assert_eq!(paper.external_ids.get("PubMed").map(String::as_str), Some("12345"));
        assert_eq!(paper.authors.len(), 2);
        assert_eq!(paper.pdf_url.as_deref(), Some("https://host/p.pdf"));
        assert_eq!(paper.year, Some(2021));
    }

    #[test]
    fn semantic_scholar_empty_pdf_url_is_none() {
        let item = serde_json::json!({
            "title": "No pdf",
            "openAccessPdf": {"url": "  "}
        });
        let paper = SemanticScholarProvider::normalize(&item);
        assert_eq!(paper.pdf_url, None);
    }

    #[test]
    fn crossref_normalization() {
        let item = serde_json::json!({
            "title": ["Deep learning for chemistry"],
            "DOI": "10.5/abc",
            "author": [{"given": "Ada", "family": "Lovelace"}],
            "issued": {"date-parts": [[2019, 5]]},
            "container-title": ["JCIM"],
        });
        let paper = CrossrefProvider::normalize(&item);
        assert_eq!(paper.title, "Deep learning for chemistry");
        assert_eq!(paper.doi.as_deref(), Some("10.5/abc"));
        assert_eq!(paper.authors, vec!["Ada Lovelace".to_string()]);
        assert_eq!(paper.year, Some(2019));
        assert_eq!(paper.venue.as_deref(), Some("JCIM"));
    }
}
