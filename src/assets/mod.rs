//! assets
//!
//! Seam to the external media generators (translation, image, voice).
//!
//! # Architecture
//!
//! After a root is published the sync engine derives [`AssetRequest`]s from
//! the created and updated nodes and hands them to an [`AssetGenerator`].
//! Generators run after the published write lock is released:
//! - A generator failure is logged, never retried by the engine
//! - A generator failure never touches published state
//!
//! # Modules
//!
//! - `traits`: the `AssetGenerator` trait and request types
//! - [`mock`]: a recording generator for deterministic tests
//!
//! # Example
//!
//! ```
//! use casework::assets::{AssetGenerator, AssetRequest, NoopGenerator};
//! use casework::core::types::{Language, NodeId};
//!
//! # tokio_test::block_on(async {
//! let generator = NoopGenerator;
//! let request = AssetRequest::Translation {
//!     node: NodeId::new(1),
//!     language: Language::english(),
//! };
//! assert!(generator.generate(&request).await.is_ok());
//! # });
//! ```

pub mod mock;
mod traits;

pub use traits::*;
