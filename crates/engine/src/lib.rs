//! # Castor Engine
//!
//! The Castor Engine runs composite templates: ordered run-tasks that read,
//! create, patch, delete and list cluster resources, carry their results
//! forward in a shared value context, roll back what they created when a
//! later task fails and render a final output document.
//!
//! ## Key Features
//!
//! - **Templated tasks**: meta, body and post documents are handlebars
//!   templates with JSONPath, value-store and run-command helpers
//! - **Typed dispatch**: `(action, apiVersion, kind)` resolves through a table
//!   to a cluster operation
//! - **Projection and verification**: JSONPath queries store aliases under
//!   `TaskResult.<id>` and may verify element counts, retrying reads
//! - **Rollback and fallback**: created objects are deleted in reverse on
//!   failure; version mismatches hand over to a fallback template
//!
//! ## Usage
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use castor_api::KubeClient;
//! use castor_engine::{ClusterTaskFetcher, CompositeEngine, EngineSettings};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let settings = EngineSettings::load()?;
//! let cluster = Arc::new(KubeClient::from_env()?);
//! let fetcher = Arc::new(ClusterTaskFetcher::new(cluster.clone(), settings.fetch_strategy));
//! let cancel = CancellationToken::new();
//!
//! let engine = CompositeEngine::load("jiva-volume-read-default", fetcher, cluster, &cancel)
//!     .await?
//!     .with_settings(settings);
//! let output = engine.run(&cancel).await?;
//! println!("{}", String::from_utf8_lossy(&output));
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - **`context`**: the value context and its reserved keys
//! - **`template`**: the handlebars pipeline and its helpers
//! - **`jsonpath`**: the path language used by queries and helpers
//! - **`query`**: projection and verification of task payloads
//! - **`meta`** / **`dispatch`**: meta decoding, retry and cluster dispatch
//! - **`dsl`**: run-commands for HTTP and block-volume RPC targets
//! - **`task`** / **`group`** / **`engine`**: task, group and template runs

pub mod cluster;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod dsl;
pub mod engine;
mod error;
pub mod fetch;
pub mod group;
pub mod jsonpath;
pub mod meta;
pub mod patch;
pub mod post;
pub mod query;
pub mod settings;
pub mod task;
pub mod template;
pub mod version;

pub use cluster::{ClusterClient, ClusterProvider};
pub use config::{config_to_map, merge_config};
pub use context::ValueContext;
pub use engine::CompositeEngine;
pub use error::EngineError;
pub use fetch::{ClusterTaskFetcher, StaticTaskFetcher, TaskSpecFetcher};
pub use group::{GroupContext, GroupOutcome, TaskGroupRunner};
pub use meta::{MetaExecutor, MetaTask, RetryPolicy};
pub use patch::{PatchType, TaskPatch};
pub use settings::{EngineSettings, FetchStrategy};
pub use task::{TaskExecutor, TaskOutcome};
pub use template::TemplatePipeline;
