//! Ordered model fallback with a memoized selection.
//!
//! A [`ProviderChain`] holds one candidate per configured model id. The
//! first call to [`ProviderChain::active`] probes candidates in order and
//! keeps the first that answers; every later call returns the same
//! candidate for the rest of the process. Candidates whose probe fails are
//! logged and skipped; a permanent probe failure marks the model exhausted
//! and it is never probed or handed out again.
//!
//! The same chain type serves embedding models and generation models via
//! the [`Candidate`] trait.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::OnceCell;
use tracing::{info, warn};

use qa_harness_core::embedding::{EmbeddingProvider, ProviderError};

use crate::generate::Generator;

/// Something a [`ProviderChain`] can probe and select.
#[async_trait]
pub trait Candidate: Send + Sync {
    fn model_id(&self) -> &str;
    async fn check(&self) -> Result<(), ProviderError>;
}

#[async_trait]
impl Candidate for dyn EmbeddingProvider {
    fn model_id(&self) -> &str {
        self.model_name()
    }

    async fn check(&self) -> Result<(), ProviderError> {
        self.probe().await
    }
}

#[async_trait]
impl Candidate for dyn Generator {
    fn model_id(&self) -> &str {
        self.model_name()
    }

    async fn check(&self) -> Result<(), ProviderError> {
        self.probe().await
    }
}

pub struct ProviderChain<P: ?Sized> {
    /// Label used in logs and errors (`"embedding"`, `"generation"`).
    kind: &'static str,
    candidates: Vec<Arc<P>>,
    active: OnceCell<Arc<P>>,
    /// Probe outcome per model id: `true` usable, `false` exhausted.
    probed: Mutex<HashMap<String, bool>>,
}

impl<P: Candidate + ?Sized> ProviderChain<P> {
    pub fn new(kind: &'static str, candidates: Vec<Arc<P>>) -> Self {
        Self {
            kind,
            candidates,
            active: OnceCell::new(),
            probed: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// Configured model ids, in fallback order.
    pub fn models(&self) -> Vec<String> {
        self.candidates
            .iter()
            .map(|c| c.model_id().to_string())
            .collect()
    }

    /// The selected model id, if selection already happened.
    pub fn selected_model(&self) -> Option<String> {
        self.active.get().map(|c| c.model_id().to_string())
    }

    /// The session's active candidate, selecting it on first use.
    ///
    /// A failed selection is not memoized; the next call probes again.
    ///
    /// # Errors
    ///
    /// [`ProviderError::Permanent`] when no candidate is configured or
    /// every candidate fails its probe.
    pub async fn active(&self) -> Result<Arc<P>, ProviderError> {
        self.active
            .get_or_try_init(|| self.select())
            .await
            .map(Arc::clone)
    }

    async fn select(&self) -> Result<Arc<P>, ProviderError> {
        if self.candidates.is_empty() {
            return Err(ProviderError::Permanent(format!(
                "{} provider is disabled or has no models configured",
                self.kind
            )));
        }

        let mut failures = Vec::new();
        for candidate in &self.candidates {
            match self.probe(candidate).await {
                Ok(()) => {
                    info!(kind = self.kind, model = candidate.model_id(), "model selected");
                    return Ok(Arc::clone(candidate));
                }
                Err(e) => {
                    warn!(
                        kind = self.kind,
                        model = candidate.model_id(),
                        transient = e.is_transient(),
                        error = %e,
                        "model failed initialization probe, skipping"
                    );
                    failures.push(format!("{}: {}", candidate.model_id(), e.message()));
                }
            }
        }
        Err(ProviderError::Permanent(format!(
            "no usable {} model ({})",
            self.kind,
            failures.join("; ")
        )))
    }

    /// Probe `candidate` once; the outcome of a successful or permanently
    /// failed probe is remembered.
    async fn probe(&self, candidate: &Arc<P>) -> Result<(), ProviderError> {
        let model = candidate.model_id();
        match self.outcome(model) {
            Some(true) => return Ok(()),
            Some(false) => {
                return Err(ProviderError::Permanent(format!(
                    "{} model '{}' failed initialization",
                    self.kind, model
                )))
            }
            None => {}
        }

        let result = candidate.check().await;
        match &result {
            Ok(()) => self.record(model, true),
            Err(e) if !e.is_transient() => self.record(model, false),
            Err(_) => {}
        }
        result
    }

    fn outcome(&self, model: &str) -> Option<bool> {
        self.probed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(model)
            .copied()
    }

    fn record(&self, model: &str, usable: bool) {
        self.probed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(model.to_string(), usable);
    }

    /// The candidate serving `model`, which must pass its own probe.
    ///
    /// Used to embed with the model an existing index was built with. Fails
    /// when the chain has no usable model at all, when `model` is not
    /// configured, or when `model` is exhausted.
    pub async fn provider_for(&self, model: &str) -> Result<Arc<P>, ProviderError> {
        self.active().await?;
        let candidate = self
            .candidates
            .iter()
            .find(|c| c.model_id() == model)
            .cloned()
            .ok_or_else(|| {
                ProviderError::Permanent(format!(
                    "{} model '{}' is not configured (configured: {})",
                    self.kind,
                    model,
                    self.models().join(", ")
                ))
            })?;
        self.probe(&candidate).await?;
        Ok(candidate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    struct Scripted {
        model: String,
        result: Result<(), ProviderError>,
        probes: AtomicUsize,
    }

    impl Scripted {
        fn new(model: &str, result: Result<(), ProviderError>) -> Arc<Self> {
            Arc::new(Self {
                model: model.to_string(),
                result,
                probes: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Candidate for Scripted {
        fn model_id(&self) -> &str {
            &self.model
        }

        async fn check(&self) -> Result<(), ProviderError> {
            self.probes.fetch_add(1, Ordering::SeqCst);
            self.result.clone()
        }
    }

    #[tokio::test]
    async fn test_first_healthy_candidate_is_selected_once() {
        let retired = Scripted::new("old-model", Err(ProviderError::Permanent("unsupported".into())));
        let good = Scripted::new("good-model", Ok(()));
        let spare = Scripted::new("spare-model", Ok(()));
        let chain = ProviderChain::new(
            "embedding",
            vec![retired.clone(), good.clone(), spare.clone()],
        );

        assert_eq!(chain.active().await.unwrap().model_id(), "good-model");
        assert_eq!(chain.active().await.unwrap().model_id(), "good-model");
        assert_eq!(chain.selected_model().as_deref(), Some("good-model"));
        assert_eq!(retired.probes.load(Ordering::SeqCst), 1);
        assert_eq!(good.probes.load(Ordering::SeqCst), 1);
        assert_eq!(spare.probes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_all_candidates_failing_is_permanent() {
        let chain = ProviderChain::new(
            "embedding",
            vec![
                Scripted::new("a", Err(ProviderError::Permanent("gone".into()))),
                Scripted::new("b", Err(ProviderError::Transient("429".into()))),
            ],
        );
        let err = chain.active().await.unwrap_err();
        assert!(!err.is_transient());
        assert!(err.message().contains("a: gone"));
        assert!(err.message().contains("b: 429"));
        assert!(chain.selected_model().is_none());
    }

    #[tokio::test]
    async fn test_exhausted_model_is_not_probed_again() {
        let retired = Scripted::new("a", Err(ProviderError::Permanent("gone".into())));
        let busy = Scripted::new("b", Err(ProviderError::Transient("429".into())));
        let chain = ProviderChain::new("embedding", vec![retired.clone(), busy.clone()]);

        assert!(chain.active().await.is_err());
        assert!(chain.active().await.is_err());
        assert_eq!(retired.probes.load(Ordering::SeqCst), 1);
        assert_eq!(busy.probes.load(Ordering::SeqCst), 2);
        assert!(chain.provider_for("a").await.is_err());
    }

    #[tokio::test]
    async fn test_empty_chain() {
        let chain: ProviderChain<Scripted> = ProviderChain::new("generation", Vec::new());
        assert!(chain.is_empty());
        assert!(chain.active().await.is_err());
    }

    #[tokio::test]
    async fn test_provider_for() {
        let a = Scripted::new("a", Ok(()));
        let b = Scripted::new("b", Ok(()));
        let chain = ProviderChain::new("embedding", vec![a.clone(), b.clone()]);
        assert_eq!(chain.provider_for("b").await.unwrap().model_id(), "b");
        assert_eq!(chain.provider_for("b").await.unwrap().model_id(), "b");
        assert_eq!(a.probes.load(Ordering::SeqCst), 1);
        assert_eq!(b.probes.load(Ordering::SeqCst), 1);
        assert!(chain
            .provider_for("c")
            .await
            .unwrap_err()
            .message()
            .contains("'c'"));
        assert_eq!(chain.models(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_provider_for_refuses_failed_model() {
        let chain = ProviderChain::new(
            "embedding",
            vec![
                Scripted::new("good", Ok(())),
                Scripted::new("broken", Err(ProviderError::Permanent("unsupported".into()))),
            ],
        );
        let err = chain.provider_for("broken").await.unwrap_err();
        assert!(!err.is_transient());
        assert!(chain.provider_for("broken").await.is_err());
        assert_eq!(chain.provider_for("good").await.unwrap().model_id(), "good");
    }

    #[tokio::test]
    async fn test_provider_for_needs_a_usable_chain() {
        let only = Scripted::new("a", Err(ProviderError::Permanent("init failed".into())));
        let chain = ProviderChain::new("embedding", vec![only]);
        let err = chain.provider_for("a").await.unwrap_err();
        assert!(err.message().contains("no usable embedding model"));
    }
}
