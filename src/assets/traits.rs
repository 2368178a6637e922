//! assets::traits
//!
//! Generator trait and the requests the sync engine emits.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::core::graph::{FileKind, NodeContent};
use crate::core::types::{Language, NodeId};

/// Errors from asset generation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AssetError {
    /// The generator could not be reached.
    #[error("generator unavailable: {0}")]
    Unavailable(String),

    /// The generator rejected the request.
    #[error("generation failed for {node}: {message}")]
    Failed { node: NodeId, message: String },
}

/// One unit of work for an external generator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AssetRequest {
    /// Machine translation of a node's text into other languages.
    Translation { node: NodeId, language: Language },

    /// Render or fetch one image file.
    Image {
        node: NodeId,
        language: Language,
        file_name: String,
    },

    /// Synthesize speech for a voiced node.
    Voice { node: NodeId, language: Language },
}

impl AssetRequest {
    pub fn node(&self) -> NodeId {
        match self {
            AssetRequest::Translation { node, .. }
            | AssetRequest::Image { node, .. }
            | AssetRequest::Voice { node, .. } => *node,
        }
    }

    /// Requests implied by publishing `content` for `node`.
    ///
    /// One translation request per language, one image request per image
    /// file, and one voice request per language for voiced kinds.
    pub fn for_content(node: NodeId, content: &NodeContent) -> Vec<AssetRequest> {
        let voiced = content.entity_type.is_voiced();
        let mut requests = Vec::new();

        for (language, translation) in &content.translations {
            requests.push(AssetRequest::Translation {
                node,
                language: language.clone(),
            });
            for file in &translation.files {
                if file.kind == FileKind::Image {
                    requests.push(AssetRequest::Image {
                        node,
                        language: language.clone(),
                        file_name: file.file_name.clone(),
                    });
                }
            }
            if voiced {
                requests.push(AssetRequest::Voice {
                    node,
                    language: language.clone(),
                });
            }
        }
        requests
    }
}

/// An external media generator.
///
/// Implementations must be safe to call concurrently.
#[async_trait]
pub trait AssetGenerator: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Generate one asset.
    async fn generate(&self, request: &AssetRequest) -> Result<(), AssetError>;
}

/// A generator that accepts everything and does nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopGenerator;

#[async_trait]
impl AssetGenerator for NoopGenerator {
    fn name(&self) -> &'static str {
        "noop"
    }

    async fn generate(&self, _request: &AssetRequest) -> Result<(), AssetError> {
        Ok(())
    }
}

/// Hand every request to `generator`, logging failures.
///
/// Returns the number of requests that failed.
pub async fn dispatch(generator: &dyn AssetGenerator, requests: &[AssetRequest]) -> usize {
    let mut failures = 0;
    for request in requests {
        match generator.generate(request).await {
            Ok(()) => debug!(generator = generator.name(), node = %request.node(), "asset generated"),
            Err(e) => {
                failures += 1;
                warn!(generator = generator.name(), error = %e, ?request, "asset generation failed");
            }
        }
    }
    failures
}
