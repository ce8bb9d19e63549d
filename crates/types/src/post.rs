//! Post section of a run-task.
//!
//! Post operations run after a task has dispatched. Each one names a run
//! function (for example `getTupleList`), flag-style arguments describing the
//! object it applies to, filters, outputs, and the value-context path the
//! derived data is saved at.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PostOperation {
    /// Operation to run, e.g. `getTupleList`.
    pub run: String,
    /// Flags describing the target: `--kind`, `--objectPath`, `--jsonPath`.
    #[serde(default, rename = "for")]
    pub for_flags: Vec<String>,
    /// Filter flags, e.g. `--isLabel=app=jiva`.
    #[serde(default)]
    pub with_filter: Vec<String>,
    /// Output flags, e.g. `--name`, `--namespace`.
    #[serde(default)]
    pub with_output: Vec<String>,
    /// Dotted value-context path the result is stored at.
    #[serde(default, rename = "as")]
    pub save_as: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PostSpec {
    #[serde(default)]
    pub operations: Vec<PostOperation>,
}

impl PostSpec {
    /// Decode a rendered post document. Blank documents yield no operations.
    pub fn from_yaml(document: &str) -> Result<Self, serde_yaml::Error> {
        let trimmed = document.trim();
        if trimmed.is_empty() || trimmed == "''" {
            return Ok(Self::default());
        }
        serde_yaml::from_str(trimmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_operations() {
        let post = PostSpec::from_yaml(
            r#"
operations:
  - run: getTupleList
    for: ["--kind=deploymentlist"]
    withFilter: ["--isLabel=app=jiva"]
    withOutput: ["--name", "--namespace"]
    as: TaskResult.ctrl.tuples
"#,
        )
        .expect("post");
        assert_eq!(post.operations.len(), 1);
        assert_eq!(post.operations[0].save_as, "TaskResult.ctrl.tuples");
        assert_eq!(post.operations[0].with_output, vec!["--name", "--namespace"]);
    }

    #[test]
    fn blank_document_has_no_operations() {
        assert!(PostSpec::from_yaml("  \n").expect("blank").operations.is_empty());
        assert!(PostSpec::from_yaml("''").expect("quoted blank").operations.is_empty());
    }
}
