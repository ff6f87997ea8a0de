//! Content collaborator contract
//!
//! The external content provider hands the engine an opaque, versioned
//! bundle per (world, cultural context) plus a declared minimum completion
//! score. The engine never interprets bundle internals; cultural variants
//! are resolved once at load time through the descriptor, not branched on
//! inside the state machine.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::timeout;
use tracing::warn;

use cq_common::config::EngineConfig;
use cq_common::types::CulturalContext;
use cq_common::{Error, Result};

/// Descriptor naming which content variant a load resolved to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentDescriptor {
    pub world_index: u8,
    pub context: CulturalContext,
    pub version: String,
}

/// Opaque, versioned content bundle returned by the provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentBundle {
    pub descriptor: ContentDescriptor,
    /// Bundle payload; never inspected by the engine
    pub payload: Vec<u8>,
    /// True for the reduced-fidelity variant served on constrained networks
    pub reduced_fidelity: bool,
}

/// External content provider interface
#[async_trait]
pub trait ContentProvider: Send + Sync {
    /// Minimum score required to count the world as completed for unlock
    /// purposes; declared by the content, not hard-coded in the engine
    fn min_score(&self, world_index: u8) -> i64;

    /// Full-fidelity bundle for a world in a cultural context
    async fn load_bundle(&self, world_index: u8, context: &CulturalContext) -> Result<ContentBundle>;

    /// Reduced-fidelity variant used when the full bundle misses the load ceiling
    async fn load_reduced(&self, world_index: u8, context: &CulturalContext) -> Result<ContentBundle>;
}

/// Load a bundle under the configured wall-clock ceiling.
///
/// On timeout the reduced-fidelity variant is substituted (under the same
/// ceiling) so the session proceeds; `ContentLoadTimeout` surfaces only when
/// the reduced variant also fails.
pub async fn load_with_ceiling(
    provider: &dyn ContentProvider,
    config: &EngineConfig,
    world_index: u8,
    context: &CulturalContext,
) -> Result<ContentBundle> {
    let ceiling = config.load_ceiling();

    match timeout(ceiling, provider.load_bundle(world_index, context)).await {
        Ok(result) => result,
        Err(_) => {
            warn!(
                world_index,
                ceiling_ms = config.load_ceiling_ms,
                "Content bundle missed load ceiling, degrading to reduced fidelity"
            );
            match timeout(ceiling, provider.load_reduced(world_index, context)).await {
                Ok(result) => result,
                Err(_) => Err(Error::ContentLoadTimeout(world_index)),
            }
        }
    }
}

/// Deterministic in-process provider for tests and local runs
#[derive(Debug, Clone)]
pub struct StaticContentProvider {
    /// Per-world minimum completion scores, index 0 is world 1
    pub thresholds: [i64; cq_common::WORLD_COUNT as usize],
}

impl StaticContentProvider {
    pub fn with_thresholds(thresholds: [i64; cq_common::WORLD_COUNT as usize]) -> Self {
        Self { thresholds }
    }
}

impl Default for StaticContentProvider {
    fn default() -> Self {
        Self {
            thresholds: [80, 80, 80, 80, 80],
        }
    }
}

#[async_trait]
impl ContentProvider for StaticContentProvider {
    fn min_score(&self, world_index: u8) -> i64 {
        self.thresholds
            .get((world_index.saturating_sub(1)) as usize)
            .copied()
            .unwrap_or(i64::MAX)
    }

    async fn load_bundle(&self, world_index: u8, context: &CulturalContext) -> Result<ContentBundle> {
        Ok(ContentBundle {
            descriptor: ContentDescriptor {
                world_index,
                context: context.clone(),
                version: "static-1".to_string(),
            },
            payload: format!("{{\"world\":{},\"market\":\"{}\"}}", world_index, context.as_str())
                .into_bytes(),
            reduced_fidelity: false,
        })
    }

    async fn load_reduced(&self, world_index: u8, context: &CulturalContext) -> Result<ContentBundle> {
        let mut bundle = self.load_bundle(world_index, context).await?;
        bundle.reduced_fidelity = true;
        Ok(bundle)
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::SlowContentProvider;
    use super::*;
    use std::time::Duration;

    fn fast_config() -> EngineConfig {
        EngineConfig {
            load_ceiling_ms: 50,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn fast_bundle_loads_at_full_fidelity() {
        let provider = StaticContentProvider::default();
        let bundle = load_with_ceiling(&provider, &fast_config(), 1, &CulturalContext::default())
            .await
            .unwrap();
        assert!(!bundle.reduced_fidelity);
        assert_eq!(bundle.descriptor.world_index, 1);
    }

    #[tokio::test]
    async fn slow_bundle_degrades_to_reduced_fidelity() {
        let provider = SlowContentProvider {
            inner: StaticContentProvider::default(),
            full_delay: Duration::from_millis(500),
            reduced_delay: Duration::ZERO,
        };
        let bundle = load_with_ceiling(&provider, &fast_config(), 2, &CulturalContext::default())
            .await
            .unwrap();
        assert!(bundle.reduced_fidelity);
    }

    #[tokio::test]
    async fn timeout_on_both_variants_is_fatal() {
        let provider = SlowContentProvider {
            inner: StaticContentProvider::default(),
            full_delay: Duration::from_millis(500),
            reduced_delay: Duration::from_millis(500),
        };
        let err = load_with_ceiling(&provider, &fast_config(), 3, &CulturalContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ContentLoadTimeout(3)));
    }
}
