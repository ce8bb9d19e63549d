//! Post operations run after a task has dispatched.
//!
//! Each operation carries flag lists (`for`, `withFilter`, `withOutput`) that
//! are parsed with clap. The only run function is `getTupleList` over a
//! deployment list:
//!
//! ```yaml
//! operations:
//!   - run: getTupleList
//!     for: ["--kind=deploymentlist"]
//!     withFilter: ["--isLabel=openebs.io/controller=jiva-controller"]
//!     withOutput: ["--name", "--namespace"]
//!     as: TaskResult.ctrl.tuples
//! ```

use castor_types::{PostOperation, PostSpec};
use clap::Parser;
use serde_json::{Map, Value};
use tracing::debug;

use crate::EngineError;
use crate::context::{RUNTIME_OBJECT_KEY, ValueContext};

const GET_TUPLE_LIST: &str = "gettuplelist";
const DEPLOYMENT_LIST: &str = "deploymentlist";

#[derive(Debug, Default, Parser)]
#[command(name = "for", no_binary_name = true, disable_help_flag = true)]
struct ForFlags {
    /// Kind of the target, e.g. `deploymentlist`.
    #[arg(long)]
    kind: Option<String>,
    /// Value-context path of a parsed object.
    #[arg(long = "objectPath")]
    object_path: Option<String>,
    /// Value-context path of a raw payload.
    #[arg(long = "jsonPath")]
    json_path: Option<String>,
}

#[derive(Debug, Default, Parser)]
#[command(name = "withFilter", no_binary_name = true, disable_help_flag = true)]
struct FilterFlags {
    /// `key=value` label an item must carry; repeatable.
    #[arg(long = "isLabel")]
    is_label: Vec<String>,
}

#[derive(Debug, Default, Parser)]
#[command(name = "withOutput", no_binary_name = true, disable_help_flag = true)]
struct OutputFlags {
    #[arg(long)]
    name: bool,
    #[arg(long)]
    namespace: bool,
}

fn parse_flags<P: Parser>(group: &str, flags: &[String]) -> Result<P, EngineError> {
    P::try_parse_from(flags.iter().map(|flag| flag.trim()).filter(|flag| !flag.is_empty()))
        .map_err(|error| EngineError::Parse(format!("invalid {} flags {:?}: {}", group, flags, error.render())))
}

/// Identity of the task the post section belongs to.
#[derive(Debug, Clone, Copy)]
pub struct PostTarget<'a> {
    pub kind: &'a str,
    pub action: &'a str,
}

/// Run every operation of `spec`, saving results into `values`.
pub fn execute(spec: &PostSpec, target: PostTarget<'_>, values: &mut ValueContext) -> Result<(), EngineError> {
    for operation in &spec.operations {
        execute_operation(operation, target, values)?;
    }
    Ok(())
}

fn execute_operation(
    operation: &PostOperation,
    target: PostTarget<'_>,
    values: &mut ValueContext,
) -> Result<(), EngineError> {
    let for_flags: ForFlags = parse_flags("for", &operation.for_flags)?;
    let kind = match for_flags.kind.as_deref().map(str::trim).filter(|kind| !kind.is_empty()) {
        Some(kind) => kind.to_ascii_lowercase(),
        None => {
            if target.kind.trim().is_empty() || target.action.trim().is_empty() {
                return Err(EngineError::Parse(format!(
                    "post operation needs a kind: task kind '{}', action '{}'",
                    target.kind, target.action
                )));
            }
            let mut kind = target.kind.trim().to_ascii_lowercase();
            if target.action.trim().eq_ignore_ascii_case("list") {
                kind.push_str("list");
            }
            kind
        }
    };
    let data_path = for_flags
        .json_path
        .or(for_flags.object_path)
        .map(|path| path.trim().trim_matches('.').to_string())
        .filter(|path| !path.is_empty())
        .unwrap_or_else(|| RUNTIME_OBJECT_KEY.to_string());

    if kind != DEPLOYMENT_LIST {
        return Err(EngineError::Parse(format!("unsupported kind for post operation: '{}'", kind)));
    }
    let run = operation.run.trim().to_ascii_lowercase();
    if run != GET_TUPLE_LIST {
        return Err(EngineError::Parse(format!(
            "unsupported post operation '{}' for {}",
            operation.run, DEPLOYMENT_LIST
        )));
    }

    let filters: FilterFlags = parse_flags("withFilter", &operation.with_filter)?;
    let outputs: OutputFlags = parse_flags("withOutput", &operation.with_output)?;
    let list = match values.get(&data_path) {
        Some(Value::String(raw)) => serde_json::from_str::<Value>(raw)
            .map_err(|error| EngineError::Parse(format!("data at '{}' is not a list: {}", data_path, error)))?,
        Some(value) => value.clone(),
        None => return Err(EngineError::NotFound(format!("no list found at '{}'", data_path))),
    };
    let tuples = tuple_list(&list, &filters, &outputs)?;
    debug!(path = %data_path, tuples = tuples.len(), save_as = %operation.save_as, "post tuple list built");

    if !operation.save_as.trim().is_empty() {
        values.set(operation.save_as.trim(), Value::Array(tuples));
    }
    Ok(())
}

fn tuple_list(list: &Value, filters: &FilterFlags, outputs: &OutputFlags) -> Result<Vec<Value>, EngineError> {
    let Some(items) = list.get("items").and_then(Value::as_array) else {
        return Err(EngineError::Parse("failed to get tuple list: given data is not a list".into()));
    };
    let labels: Vec<(&str, &str)> = filters
        .is_label
        .iter()
        .filter_map(|label| label.split_once('='))
        .map(|(key, value)| (key.trim(), value.trim()))
        .collect();

    Ok(items
        .iter()
        .filter(|item| {
            labels.iter().all(|(key, value)| {
                item.pointer("/metadata/labels")
                    .and_then(|found| found.get(*key))
                    .and_then(Value::as_str)
                    == Some(*value)
            })
        })
        .map(|item| {
            let mut tuple = Map::new();
            let metadata = item.get("metadata");
            if outputs.name {
                let name = metadata.and_then(|meta| meta.get("name")).cloned().unwrap_or(Value::Null);
                tuple.insert("name".into(), name);
            }
            if outputs.namespace {
                let namespace = metadata
                    .and_then(|meta| meta.get("namespace"))
                    .cloned()
                    .unwrap_or(Value::Null);
                tuple.insert("namespace".into(), namespace);
            }
            Value::Object(tuple)
        })
        .collect())
}
