//! Run-command helpers.
//!
//! Action helpers fold their arguments into a command:
//! `(delete (jiva) (volume) (select "{.status}"))`. Category helpers return
//! `{"category": ..}` tags and `select` returns `{"select": [..]}`; bare
//! category strings are accepted too. Commands travel between helpers as JSON.

use castor_util::{block_on_future, get_nested, set_nested};
use serde_json::{Map, Value, json};

use super::{Param, RenderState, StateFn, context_segments, path_segments, text};
use crate::dsl::{Category, RunAction, RunCommand, run_stored};

pub(crate) const STATE_HELPERS: &[(&str, StateFn)] = &[
    ("get", get),
    ("list", list),
    ("lst", list),
    ("create", create),
    ("update", update),
    ("patch", patch),
    ("delete", delete),
    ("post", post),
    ("put", put),
    ("jiva", jiva),
    ("cstor", cstor),
    ("volume", volume),
    ("snapshot", snapshot),
    ("pool", pool),
    ("http", http),
    ("select", select),
    ("withoption", with_option),
    ("withOption", with_option),
    ("runAlways", run_always),
    ("run", run),
    ("runlog", run_log),
    ("runas", run_as),
];

const CATEGORY_TAG: &str = "category";
const SELECT_TAG: &str = "select";
const RUN_ALWAYS_TAG: &str = "runAlways";

fn build(action: RunAction, params: &[Param]) -> Result<Value, String> {
    let mut command = RunCommand::new(action);
    for param in params {
        command = apply(command, &param.value)?;
    }
    Ok(command.to_value())
}

fn apply(command: RunCommand, middleware: &Value) -> Result<RunCommand, String> {
    match middleware {
        Value::String(raw) => Ok(command.with_category(raw.parse::<Category>()?)),
        Value::Object(tag) if tag.contains_key(CATEGORY_TAG) => {
            Ok(command.with_category(text(&tag[CATEGORY_TAG]).parse::<Category>()?))
        }
        Value::Object(tag) if tag.contains_key(SELECT_TAG) => {
            let paths = tag[SELECT_TAG].as_array().cloned().unwrap_or_default();
            Ok(command.with_select(paths.iter().map(text)))
        }
        Value::Null => Ok(command),
        other => Err(format!("unexpected run command argument '{}'", other)),
    }
}

fn get(_: &RenderState, params: &[Param]) -> Result<Value, String> {
    build(RunAction::Get, params)
}

fn list(_: &RenderState, params: &[Param]) -> Result<Value, String> {
    build(RunAction::List, params)
}

fn create(_: &RenderState, params: &[Param]) -> Result<Value, String> {
    build(RunAction::Create, params)
}

fn update(_: &RenderState, params: &[Param]) -> Result<Value, String> {
    build(RunAction::Update, params)
}

fn patch(_: &RenderState, params: &[Param]) -> Result<Value, String> {
    build(RunAction::Patch, params)
}

fn delete(_: &RenderState, params: &[Param]) -> Result<Value, String> {
    build(RunAction::Delete, params)
}

fn post(_: &RenderState, params: &[Param]) -> Result<Value, String> {
    build(RunAction::Post, params)
}

fn put(_: &RenderState, params: &[Param]) -> Result<Value, String> {
    build(RunAction::Put, params)
}

fn tag(category: Category) -> Result<Value, String> {
    Ok(json!({ CATEGORY_TAG: category.as_str() }))
}

fn jiva(_: &RenderState, _: &[Param]) -> Result<Value, String> {
    tag(Category::Jiva)
}

fn cstor(_: &RenderState, _: &[Param]) -> Result<Value, String> {
    tag(Category::Cstor)
}

fn volume(_: &RenderState, _: &[Param]) -> Result<Value, String> {
    tag(Category::Volume)
}

fn snapshot(_: &RenderState, _: &[Param]) -> Result<Value, String> {
    tag(Category::Snapshot)
}

fn pool(_: &RenderState, _: &[Param]) -> Result<Value, String> {
    tag(Category::Pool)
}

fn http(_: &RenderState, _: &[Param]) -> Result<Value, String> {
    tag(Category::Http)
}

/// `select path...`; `"<path> as <alias>"` names the projected field.
fn select(_: &RenderState, params: &[Param]) -> Result<Value, String> {
    let paths: Vec<String> = params.iter().map(|param| text(&param.value)).collect();
    Ok(json!({ SELECT_TAG: paths }))
}

fn run_always(_: &RenderState, _: &[Param]) -> Result<Value, String> {
    Ok(json!({ RUN_ALWAYS_TAG: true }))
}

fn command_at(params: &[Param], index: usize) -> Result<RunCommand, String> {
    let value = params.get(index).map(|param| &param.value).unwrap_or(&Value::Null);
    RunCommand::from_value(value)
}

/// `withoption key value cmd`
fn with_option(_: &RenderState, params: &[Param]) -> Result<Value, String> {
    let key = params.first().map(|param| text(&param.value)).unwrap_or_default();
    if key.trim().is_empty() {
        return Err("missing option key".into());
    }
    let value = params.get(1).map(|param| param.value.clone()).unwrap_or(Value::Null);
    Ok(command_at(params, 2)?.with_data(key.trim(), value).to_value())
}

fn execute(state: &RenderState, command: RunCommand) -> Result<Value, String> {
    let runtime = state.runtime()?.clone();
    let outcome = block_on_future(async move { Ok(runtime.run(command).await) }).map_err(|error| error.to_string())?;
    Ok(outcome.to_value())
}

/// `run cmd`: `{result, error, debug}` of the executed command.
fn run(state: &RenderState, params: &[Param]) -> Result<Value, String> {
    execute(state, command_at(params, 0)?)
}

/// `runlog resultPath debugPath ctx cmd`
fn run_log(state: &RenderState, params: &[Param]) -> Result<Value, String> {
    let result_path = path_segments(&params.first().map(|param| text(&param.value)).unwrap_or_default());
    let debug_path = path_segments(&params.get(1).map(|param| text(&param.value)).unwrap_or_default());
    let root = params
        .get(2)
        .map(context_segments)
        .transpose()?
        .ok_or("missing context argument")?;
    let outcome = execute(state, command_at(params, 3)?)?;

    state.write(|values| {
        for (relative, key) in [(result_path, "result"), (debug_path, "debug")] {
            if relative.is_empty() {
                continue;
            }
            let keys: Vec<&str> = root.iter().chain(relative.iter()).map(String::as_str).collect();
            set_nested(values, &keys, outcome[key].clone());
        }
    });
    Ok(outcome)
}

/// `runas id store cmd [runAlways]`: run and keep the outcome in the bucket `id` of `store`.
fn run_as(state: &RenderState, params: &[Param]) -> Result<Value, String> {
    let id = params.first().map(|param| text(&param.value)).unwrap_or_default();
    let store_keys = params
        .get(1)
        .map(context_segments)
        .transpose()?
        .ok_or("missing store argument")?;
    let command = command_at(params, 2)?;
    let always = params
        .get(3)
        .and_then(|param| param.value.get(RUN_ALWAYS_TAG))
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let runtime = state.runtime()?.clone();

    let keys: Vec<&str> = store_keys.iter().map(String::as_str).collect();
    let mut store = if keys.is_empty() {
        state.values().clone()
    } else {
        match get_nested(&state.values(), &keys) {
            Some(Value::Object(existing)) => existing.clone(),
            _ => Map::new(),
        }
    };

    let (outcome, store) = block_on_future(async move {
        let outcome = run_stored(&runtime, &mut store, &id, command, always).await;
        Ok((outcome, store))
    })
    .map_err(|error| error.to_string())?;

    state.write(|values| {
        if keys.is_empty() {
            *values = store;
        } else {
            set_nested(values, &keys, Value::Object(store));
        }
    });
    Ok(outcome.to_value())
}
