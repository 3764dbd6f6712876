//! Local rehearsal provider for TierFlow
//!
//! Implements [`CloudProvider`](tierflow_cloud::CloudProvider) against a JSON file
//! instead of a cloud API, so a topology can be applied, changed and destroyed end
//! to end without credentials.
//!
//! # Example
//!
//! ```ignore
//! use tierflow_cloud::{Engine, StateManager, synthesize};
//! use tierflow_cloud_local::{LocalProvider, store_path};
//!
//! let provider = LocalProvider::open(store_path(root, "dev"), "ap-northeast-1").await?;
//! let engine = Engine::new(Box::new(provider), StateManager::new(root, Some("dev")));
//!
//! let (graph, _) = synthesize(&topology)?;
//! let plan = engine.plan(&graph).await?;
//! engine.apply(&graph, &plan).await?;
//! ```

pub mod error;
pub mod provider;
pub mod store;

pub use error::{LocalError, Result};
pub use provider::{LocalProvider, store_path};
pub use store::{Store, StoreData, StoredResource};
