//! Shared data model for composite templates, run-tasks and their meta sections.
//!
//! Everything in this crate is plain serde data. The engine renders the YAML
//! documents held by [`RunTaskSpec`] before deserializing them into [`MetaSpec`]
//! and [`PostSpec`], so these types describe the *rendered* shape.

use thiserror::Error;

pub mod meta;
pub mod post;
pub mod template;

pub use meta::{MetaProps, MetaSpec, PatchSpec, QuerySpec, RepeatWith, TaskAction, VerifySpec};
pub use post::{PostOperation, PostSpec};
pub use template::validation::validate_composite_template;
pub use template::{CompositeTemplate, ConfigEntry, RunTaskSpec};

/// Error surfaced when a document cannot be decoded into the data model.
#[derive(Debug, Error)]
pub enum TypesError {
    /// The YAML payload could not be parsed.
    #[error("yaml decode error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    /// The payload parsed but does not describe a valid document.
    #[error("invalid document: {0}")]
    Invalid(String),
}
