//! Template pipeline.
//!
//! Task documents are handlebars templates rendered against the value
//! context. Besides plain lookups (`{{TaskResult.pvc.name}}`) the pipeline
//! registers helpers that query payloads, write back into the context, raise
//! typed errors and build and run run-commands:
//!
//! ```text
//! {{noop (saveAs "TaskResult.vol.size" this (jsonpath JsonResult "{.spec.capacity}"))}}
//! {{noop (verifyErr "no replicas" (isLen 0 (splitList "," TaskResult.ctrl.names)))}}
//! {{noop (runlog "TaskResult.del.result" "TaskResult.del.debug" this (withoption "url" Config.JivaURL.value (delete (jiva) (volume))))}}
//! ```
//!
//! Helpers that write take a context argument naming where, relative to the
//! root, their path is anchored (`this` for the root). Writes are visible to
//! the rest of the same template and are copied back into the caller's
//! context once rendering finishes.

mod commands;
mod funcs;
mod store;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use handlebars::{Context, Handlebars, Helper, HelperDef, RenderContext, RenderError, ScopedJson, Template};
use serde_json::{Map, Value};
use tracing::debug;

use crate::EngineError;
use crate::context::ValueContext;
use crate::dsl::CommandRuntime;

/// Helper without access to the value context.
pub(crate) type PureFn = fn(&[Value]) -> Result<Value, String>;

/// Helper that reads or writes the value context.
pub(crate) type StateFn = fn(&RenderState, &[Param]) -> Result<Value, String>;

/// Evaluated helper argument, with the path it was looked up at if any.
#[derive(Debug, Clone)]
pub(crate) struct Param {
    pub path: Option<String>,
    pub value: Value,
}

/// Mutable state shared by the helpers of one render.
pub(crate) struct RenderState {
    values: Mutex<Map<String, Value>>,
    dirty: AtomicBool,
    fault: Mutex<Option<EngineError>>,
    runtime: Option<CommandRuntime>,
}

impl RenderState {
    fn new(values: Map<String, Value>, runtime: Option<CommandRuntime>) -> Self {
        Self {
            values: Mutex::new(values),
            dirty: AtomicBool::new(false),
            fault: Mutex::new(None),
            runtime,
        }
    }

    pub(crate) fn values(&self) -> MutexGuard<'_, Map<String, Value>> {
        self.values.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `update` against the values and mark the render context stale.
    pub(crate) fn write<R>(&self, update: impl FnOnce(&mut Map<String, Value>) -> R) -> R {
        let mut values = self.values();
        let outcome = update(&mut values);
        self.dirty.store(true, Ordering::SeqCst);
        outcome
    }

    /// Keep the first fault raised by an error marker.
    pub(crate) fn raise(&self, fault: EngineError) {
        let mut slot = self.fault.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            debug!(error = %fault, "template raised error marker");
            *slot = Some(fault);
        }
    }

    pub(crate) fn runtime(&self) -> Result<&CommandRuntime, String> {
        self.runtime
            .as_ref()
            .ok_or_else(|| "run commands are not available in this template".to_string())
    }

    fn take_dirty(&self) -> bool {
        self.dirty.swap(false, Ordering::SeqCst)
    }

    fn into_parts(self) -> (Map<String, Value>, Option<EngineError>) {
        let values = self.values.into_inner().unwrap_or_else(PoisonError::into_inner);
        let fault = self.fault.into_inner().unwrap_or_else(PoisonError::into_inner);
        (values, fault)
    }
}

struct PureHelper {
    name: &'static str,
    func: PureFn,
}

impl HelperDef for PureHelper {
    fn call_inner<'reg: 'rc, 'rc>(
        &self,
        h: &Helper<'reg, 'rc>,
        _: &'reg Handlebars<'reg>,
        _: &'rc Context,
        _: &mut RenderContext<'reg, 'rc>,
    ) -> Result<ScopedJson<'reg, 'rc>, RenderError> {
        let params: Vec<Value> = h.params().iter().map(|param| param.value().clone()).collect();
        (self.func)(&params)
            .map(ScopedJson::Derived)
            .map_err(|error| RenderError::new(format!("{}: {}", self.name, error)))
    }
}

struct StatefulHelper {
    name: &'static str,
    func: StateFn,
    state: Arc<RenderState>,
}

impl HelperDef for StatefulHelper {
    fn call_inner<'reg: 'rc, 'rc>(
        &self,
        h: &Helper<'reg, 'rc>,
        _: &'reg Handlebars<'reg>,
        _: &'rc Context,
        rc: &mut RenderContext<'reg, 'rc>,
    ) -> Result<ScopedJson<'reg, 'rc>, RenderError> {
        let params: Vec<Param> = h
            .params()
            .iter()
            .map(|param| Param {
                path: param.relative_path().cloned(),
                value: param.value().clone(),
            })
            .collect();
        let value = (self.func)(&self.state, &params)
            .map_err(|error| RenderError::new(format!("{}: {}", self.name, error)))?;

        if self.state.take_dirty() {
            let refreshed = Value::Object(self.state.values().clone());
            rc.set_context(Context::wraps(refreshed)?);
        }
        Ok(ScopedJson::Derived(value))
    }
}

/// Renders task documents against a value context.
#[derive(Clone, Default)]
pub struct TemplatePipeline {
    runtime: Option<CommandRuntime>,
}

impl TemplatePipeline {
    /// Pipeline without run-command support.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_runtime(runtime: CommandRuntime) -> Self {
        Self { runtime: Some(runtime) }
    }

    /// Render `source` against `values`.
    ///
    /// # Arguments
    /// * `name` - template name used in errors
    /// * `source` - handlebars source
    /// * `values` - value context; receives every write made by helpers
    ///
    /// # Returns
    /// The rendered text.
    ///
    /// # Notes
    /// - Syntax errors are [`EngineError::Parse`], helper failures [`EngineError::Template`].
    /// - Error markers (`notFoundErr`, `verifyErr`, `versionMismatchErr`) do not
    ///   interrupt rendering; the first one raised is returned once rendering
    ///   finishes, after the writes are copied back.
    /// - Missing values render as an empty string.
    pub fn render(&self, name: &str, source: &str, values: &mut ValueContext) -> Result<String, EngineError> {
        let template = Template::compile(source)
            .map_err(|error| EngineError::Parse(format!("template '{}': {}", name, error)))?;

        let state = Arc::new(RenderState::new(values.as_map().clone(), self.runtime.clone()));
        let mut registry = Handlebars::new();
        registry.set_strict_mode(false);
        registry.register_escape_fn(handlebars::no_escape);
        for (helper, func) in funcs::PURE_HELPERS {
            registry.register_helper(helper, Box::new(PureHelper { name: *helper, func: *func }));
        }
        for (helper, func) in store::STATE_HELPERS.iter().chain(commands::STATE_HELPERS) {
            registry.register_helper(
                helper,
                Box::new(StatefulHelper {
                    name: *helper,
                    func: *func,
                    state: Arc::clone(&state),
                }),
            );
        }
        registry.register_template(name, template);

        let rendered = registry.render(name, &values.to_value());
        drop(registry);

        let Ok(state) = Arc::try_unwrap(state) else {
            return Err(EngineError::Template(format!("template '{}': render state still shared", name)));
        };
        let (updated, fault) = state.into_parts();
        values.replace(updated);

        let rendered = rendered.map_err(|error| EngineError::Template(format!("template '{}': {}", name, error)))?;
        match fault {
            Some(fault) => Err(fault),
            None => Ok(rendered),
        }
    }
}

/// Context path named by a helper argument, as map keys from the root.
pub(crate) fn context_segments(param: &Param) -> Result<Vec<String>, String> {
    let raw = match (&param.path, &param.value) {
        (Some(path), _) => path.clone(),
        (None, Value::String(text)) => text.clone(),
        (None, _) => return Err("expected a context argument such as 'this'".into()),
    };
    let mut trimmed = raw.trim();
    if trimmed == "this" || trimmed == "@root" {
        return Ok(Vec::new());
    }
    for prefix in ["@root.", "@root/", "this.", "this/", "./", "."] {
        if let Some(rest) = trimmed.strip_prefix(prefix) {
            trimmed = rest;
        }
    }
    Ok(trimmed
        .split(['.', '/'])
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .collect())
}

/// Dotted path argument split into map keys.
pub(crate) fn path_segments(path: &str) -> Vec<String> {
    path.trim()
        .trim_start_matches('.')
        .split('.')
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .collect()
}

/// Printable text of a value; null is empty.
pub(crate) fn text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Loose emptiness: null, false, zero, and empty strings, arrays and maps.
pub(crate) fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(flag) => !flag,
        Value::Number(number) => number.as_f64() == Some(0.0),
        Value::String(text) => text.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(entries) => entries.is_empty(),
    }
}

/// Loose truthiness, the inverse of [`is_empty`] except that "false" is false.
pub(crate) fn is_truthy(value: &Value) -> bool {
    match value {
        Value::String(text) => !text.is_empty() && !text.trim().eq_ignore_ascii_case("false"),
        other => !is_empty(other),
    }
}

pub(crate) fn param(params: &[Value], index: usize) -> &Value {
    params.get(index).unwrap_or(&Value::Null)
}

/// String list from an array, a single string, or null.
pub(crate) fn string_list(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items.iter().map(text).collect(),
        Value::Null => Vec::new(),
        other => vec![text(other)],
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn render(source: &str, values: &mut ValueContext) -> Result<String, EngineError> {
        TemplatePipeline::new().render("test", source, values)
    }

    #[test]
    fn renders_lookups_without_escaping() {
        let mut values = ValueContext::new();
        values.set("Config.Image.value", json!("openebs/jiva:<0.7>"));
        let out = render("image: {{Config.Image.value}}", &mut values).expect("render");
        assert_eq!(out, "image: openebs/jiva:<0.7>");
    }

    #[test]
    fn missing_values_render_empty() {
        let mut values = ValueContext::new();
        assert_eq!(render("[{{TaskResult.none.name}}]", &mut values).expect("render"), "[]");
    }

    #[test]
    fn syntax_error_is_a_parse_error() {
        let mut values = ValueContext::new();
        let error = render("{{#if}}", &mut values).expect_err("bad syntax");
        assert!(matches!(error, EngineError::Parse(_)), "unexpected error: {error}");
    }

    #[test]
    fn saves_are_visible_later_in_the_template_and_to_the_caller() {
        let mut values = ValueContext::new();
        let out = render(
            r#"{{noop (saveAs "TaskResult.msg" this "Hi")}}{{TaskResult.msg}}"#,
            &mut values,
        )
        .expect("render");
        assert_eq!(out, "Hi");
        assert_eq!(values.get_text("TaskResult.msg"), "Hi");
    }

    #[test]
    fn context_argument_anchors_the_path() {
        let mut values = ValueContext::new();
        values.set("TaskResult.vol", json!({}));
        render(r#"{{noop (saveAs "size" TaskResult.vol "5G")}}"#, &mut values).expect("render");
        assert_eq!(values.get_text("TaskResult.vol.size"), "5G");
    }

    #[test]
    fn error_marker_surfaces_after_render() {
        let mut values = ValueContext::new();
        let error = render(
            r#"{{noop (saveAs "seen" this "yes")}}{{noop (notFoundErr "pool missing" TaskResult.pool.name)}}"#,
            &mut values,
        )
        .expect_err("marker raised");
        assert!(matches!(error, EngineError::NotFound(ref message) if message == "pool missing"), "unexpected error: {error}");
        assert_eq!(values.get_text("seen"), "yes");
    }

    #[test]
    fn context_segments_accept_root_aliases() {
        let this = Param {
            path: Some("this".into()),
            value: json!({}),
        };
        assert!(context_segments(&this).expect("root").is_empty());
        let nested = Param {
            path: Some("TaskResult.vol".into()),
            value: Value::Null,
        };
        assert_eq!(context_segments(&nested).expect("nested"), vec!["TaskResult", "vol"]);
        let literal = Param {
            path: None,
            value: json!("Values.target"),
        };
        assert_eq!(context_segments(&literal).expect("literal"), vec!["Values", "target"]);
    }
}
