//! assets::mock
//!
//! Recording generator for deterministic testing.
//!
//! # Example
//!
//! ```
//! use casework::assets::mock::MockGenerator;
//! use casework::assets::{AssetGenerator, AssetRequest};
//! use casework::core::types::{Language, NodeId};
//!
//! # tokio_test::block_on(async {
//! let generator = MockGenerator::new();
//! let request = AssetRequest::Voice { node: NodeId::new(7), language: Language::english() };
//! generator.generate(&request).await.unwrap();
//! assert_eq!(generator.requests(), vec![request]);
//! # });
//! ```

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::traits::{AssetError, AssetGenerator, AssetRequest};
use crate::core::types::NodeId;

/// Mock generator for testing.
///
/// Clones share the same recorded state.
#[derive(Debug, Clone, Default)]
pub struct MockGenerator {
    inner: Arc<Mutex<MockGeneratorInner>>,
}

#[derive(Debug, Default)]
struct MockGeneratorInner {
    requests: Vec<AssetRequest>,
    fail_for: HashSet<NodeId>,
}

impl MockGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every request for `node`.
    pub fn fail_for(self, node: NodeId) -> Self {
        self.inner.lock().fail_for.insert(node);
        self
    }

    /// Every request received, in order, failed ones included.
    pub fn requests(&self) -> Vec<AssetRequest> {
        self.inner.lock().requests.clone()
    }

    /// Requests received for one node.
    pub fn requests_for(&self, node: NodeId) -> Vec<AssetRequest> {
        self.inner
            .lock()
            .requests
            .iter()
            .filter(|r| r.node() == node)
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.inner.lock().requests.clear();
    }
}

#[async_trait]
impl AssetGenerator for MockGenerator {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn generate(&self, request: &AssetRequest) -> Result<(), AssetError> {
        let mut inner = self.inner.lock();
        inner.requests.push(request.clone());
        if inner.fail_for.contains(&request.node()) {
            return Err(AssetError::Failed {
                node: request.node(),
                message: "mock failure".into(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::dispatch;
    use crate::core::types::Language;

    fn voice(node: u64) -> AssetRequest {
        AssetRequest::Voice {
            node: NodeId::new(node),
            language: Language::english(),
        }
    }

    #[tokio::test]
    async fn records_in_order() {
        let generator = MockGenerator::new();
        dispatch(&generator, &[voice(1), voice(2)]).await;
        assert_eq!(generator.requests(), vec![voice(1), voice(2)]);
        assert_eq!(generator.requests_for(NodeId::new(2)), vec![voice(2)]);
    }

    #[tokio::test]
    async fn failures_are_counted_and_recorded() {
        let generator = MockGenerator::new().fail_for(NodeId::new(2));
        let failures = dispatch(&generator, &[voice(1), voice(2), voice(3)]).await;
        assert_eq!(failures, 1);
        assert_eq!(generator.requests().len(), 3);
    }

    #[tokio::test]
    async fn clones_share_state() {
        let generator = MockGenerator::new();
        let clone = generator.clone();
        clone.generate(&voice(9)).await.unwrap();
        assert_eq!(generator.requests().len(), 1);
        generator.clear();
        assert!(clone.requests().is_empty());
    }
}
