//! Mock backend for testing
//!
//! Returns canned or deterministic responses, can simulate an unreachable
//! service or a slow one, and counts calls per capability so tests can
//! assert which path was taken.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::model_router::TaskType;
use crate::models::StatementPeriod;
use crate::trends::SynthesisDigest;

use super::types::{ClassificationRequest, RawAlert, RawExtraction, RawSynthesis, RouterInfo};
use super::AIBackend;

/// Call counters shared between clones of a mock
#[derive(Debug, Default)]
pub struct MockCalls {
    extraction: AtomicUsize,
    classification: AtomicUsize,
    synthesis: AtomicUsize,
}

impl MockCalls {
    pub fn extraction(&self) -> usize {
        self.extraction.load(Ordering::SeqCst)
    }

    pub fn classification(&self) -> usize {
        self.classification.load(Ordering::SeqCst)
    }

    pub fn synthesis(&self) -> usize {
        self.synthesis.load(Ordering::SeqCst)
    }
}

/// Mock AI backend for testing
#[derive(Clone)]
pub struct MockBackend {
    /// Whether health_check should return true
    pub healthy: bool,
    reachable: bool,
    extraction: Option<RawExtraction>,
    /// Lowercase needle to category id
    classifications: Vec<(String, i64)>,
    synthesis: Option<RawSynthesis>,
    latency: Option<Duration>,
    timeout: Duration,
    calls: Arc<MockCalls>,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBackend {
    /// Create a new mock backend (healthy by default)
    pub fn new() -> Self {
        Self {
            healthy: true,
            reachable: true,
            extraction: None,
            classifications: Vec::new(),
            synthesis: None,
            latency: None,
            timeout: Duration::from_secs(5),
            calls: Arc::new(MockCalls::default()),
        }
    }

    /// Every call fails as if the service were down
    pub fn unreachable() -> Self {
        Self {
            healthy: false,
            reachable: false,
            ..Self::new()
        }
    }

    /// Return this extraction for every statement
    pub fn with_extraction(mut self, extraction: RawExtraction) -> Self {
        self.extraction = Some(extraction);
        self
    }

    /// Answer `category_id` for descriptions containing `needle`
    pub fn with_classification(mut self, needle: &str, category_id: i64) -> Self {
        self.classifications.push((needle.to_lowercase(), category_id));
        self
    }

    /// Return this synthesis instead of the generated one
    pub fn with_synthesis(mut self, synthesis: RawSynthesis) -> Self {
        self.synthesis = Some(synthesis);
        self
    }

    /// Sleep before answering
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Timeout reported for every task
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn calls(&self) -> Arc<MockCalls> {
        self.calls.clone()
    }

    async fn simulate(&self, counter: &AtomicUsize) -> Result<()> {
        counter.fetch_add(1, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if !self.reachable {
            return Err(Error::IntelligenceService(
                "mock backend unreachable".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl AIBackend for MockBackend {
    async fn extract_transactions(
        &self,
        _text: &str,
        _hint: Option<&StatementPeriod>,
    ) -> Result<RawExtraction> {
        self.simulate(&self.calls.extraction).await?;
        Ok(self.extraction.clone().unwrap_or_default())
    }

    async fn classify_transaction(&self, request: &ClassificationRequest<'_>) -> Result<i64> {
        self.simulate(&self.calls.classification).await?;

        let description = request.description.to_lowercase();
        if let Some((_, id)) = self
            .classifications
            .iter()
            .find(|(needle, _)| description.contains(needle.as_str()))
        {
            return Ok(*id);
        }

        request
            .categories
            .first()
            .map(|c| c.id)
            .ok_or_else(|| Error::IntelligenceService("no categories offered".to_string()))
    }

    async fn synthesize_insights(&self, digest: &SynthesisDigest) -> Result<RawSynthesis> {
        self.simulate(&self.calls.synthesis).await?;

        if let Some(ref synthesis) = self.synthesis {
            return Ok(synthesis.clone());
        }

        let alerts = digest
            .groups
            .iter()
            .flat_map(|group| {
                group.anomalies.iter().map(move |a| RawAlert {
                    alert_type: a.alert_type.clone(),
                    severity: a.severity.clone(),
                    title: format!("Mock insight for {}", a.category.as_deref().unwrap_or("spending")),
                    description: format!(
                        "Observed {:.2} {} against a baseline of {:.2}",
                        a.observed,
                        group.currency,
                        a.baseline.unwrap_or(0.0)
                    ),
                    recommendation: Some("Review these transactions".to_string()),
                })
            })
            .collect();

        Ok(RawSynthesis {
            summary: Some(format!("{} currency group(s) analyzed", digest.groups.len())),
            alerts,
            recommendations: vec!["Keep categories up to date".to_string()],
        })
    }

    async fn health_check(&self) -> bool {
        self.healthy
    }

    fn timeout_for(&self, _task: TaskType) -> Duration {
        self.timeout
    }

    fn model(&self) -> &str {
        "mock"
    }

    fn host(&self) -> &str {
        "mock://localhost"
    }

    fn router_info(&self) -> RouterInfo {
        RouterInfo {
            default_model: "mock".to_string(),
            fallback_model: None,
            task_models: Vec::new(),
        }
    }
}
