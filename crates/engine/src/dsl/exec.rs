//! Execution of run commands against volume controllers and HTTP endpoints.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow, bail};
use castor_volume::VolumeRequest;
use reqwest::Method;
use serde_json::Value;
use tracing::{debug, warn};

use super::command::{
    CommandTarget, ERR_NOT_SUPPORTED_ACTION, ERR_NOT_SUPPORTED_CATEGORY, RunAction, RunCommand, RunCommandResult,
};
use super::messages::Messages;
use super::transport::{HttpTransport, ReqwestTransport, TcpVolumeConnector, VolumeConnector};
use crate::jsonpath;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Collaborators a run command may reach.
#[derive(Clone)]
pub struct CommandRuntime {
    http: Arc<dyn HttpTransport>,
    volumes: Arc<dyn VolumeConnector>,
}

impl CommandRuntime {
    pub fn new(http: Arc<dyn HttpTransport>, volumes: Arc<dyn VolumeConnector>) -> Self {
        Self { http, volumes }
    }

    /// Runtime with a reqwest transport and TCP volume connections.
    pub fn with_defaults() -> Result<Self> {
        Ok(Self::new(
            Arc::new(ReqwestTransport::new(DEFAULT_TIMEOUT)?),
            Arc::new(TcpVolumeConnector::new(DEFAULT_TIMEOUT)),
        ))
    }

    /// Execute a command and project its result through the select list.
    ///
    /// Failures never escape: they are recorded as error messages and
    /// surface through [`RunCommandResult::error`].
    pub async fn run(&self, mut command: RunCommand) -> RunCommandResult {
        command.pre_run();
        let description = command.describe();
        command.messages.info(description.as_str());
        if !command.will_run {
            return RunCommandResult::new(Value::Null, command.messages.clone());
        }

        let outcome = match command.target() {
            CommandTarget::JivaVolume => self.run_jiva_volume(&command).await,
            CommandTarget::Http => self.run_http(&command).await,
            CommandTarget::CstorSnapshot => self.run_cstor_snapshot(&command).await,
            CommandTarget::CstorVolume => self.run_cstor_volume(&command).await,
            CommandTarget::Unsupported => Err(anyhow!(ERR_NOT_SUPPORTED_CATEGORY)),
        };

        let mut messages = command.messages.clone();
        let result = match outcome {
            Ok(value) => value,
            Err(error) => {
                warn!(command = %description, error = %error, "run command failed");
                messages.error(error.to_string());
                Value::Null
            }
        };
        command.post_run(RunCommandResult::new(result, messages))
    }

    async fn run_jiva_volume(&self, command: &RunCommand) -> Result<Value> {
        if command.action != Some(RunAction::Delete) {
            bail!(ERR_NOT_SUPPORTED_ACTION);
        }
        let base = required(command, "url")?;
        let name = required(command, "name")?;

        let volumes_url = format!("{}/v1/volumes", base.trim_end_matches('/'));
        let listing = self.http.send(Method::GET, &volumes_url, None).await?;
        if !listing.is_success() {
            bail!("failed to list jiva volumes at '{}': status {}: {}", volumes_url, listing.status, listing.text());
        }
        let volumes: Value = serde_json::from_slice(&listing.body)?;
        let link_path = format!("{{.data[?(@.name=='{}')].actions.deletevolume}}", name);
        let link = jsonpath::query(&volumes, &link_path)?;
        let link = link.trim();
        if link.is_empty() {
            bail!("jiva volume '{}' not found at '{}'", name, volumes_url);
        }

        debug!(volume = %name, link, "deleting jiva volume");
        let reply = self.http.send(Method::DELETE, link, None).await?;
        if !reply.is_success() {
            bail!("failed to delete jiva volume '{}': status {}: {}", name, reply.status, reply.text());
        }
        Ok(decode_body(&reply.body, true))
    }

    async fn run_http(&self, command: &RunCommand) -> Result<Value> {
        let method = match command.action {
            Some(RunAction::Get) | Some(RunAction::List) => Method::GET,
            Some(RunAction::Create) | Some(RunAction::Post) => Method::POST,
            Some(RunAction::Update) | Some(RunAction::Put) => Method::PUT,
            Some(RunAction::Patch) => Method::PATCH,
            Some(RunAction::Delete) => Method::DELETE,
            None => bail!(ERR_NOT_SUPPORTED_ACTION),
        };
        let base = required(command, "url")?;
        let name = command.text("name");
        let url = if name.is_empty() {
            base
        } else {
            format!("{}/{}", base.trim_end_matches('/'), name)
        };
        let body = match command.data.get("body") {
            None | Some(Value::Null) => None,
            Some(Value::String(text)) => Some(text.clone().into_bytes()),
            Some(other) => Some(serde_json::to_vec(other)?),
        };
        let unmarshal = match command.data.get("unmarshal") {
            Some(Value::Bool(flag)) => *flag,
            Some(Value::String(text)) => !text.trim().eq_ignore_ascii_case("false"),
            _ => true,
        };

        let reply = self.http.send(method.clone(), &url, body).await?;
        if !reply.is_success() {
            bail!("{} {} failed: status {}: {}", method, url, reply.status, reply.text());
        }
        Ok(decode_body(&reply.body, unmarshal))
    }

    async fn run_cstor_snapshot(&self, command: &RunCommand) -> Result<Value> {
        let ip = required(command, "ip")?;
        let volume = required(command, "volname")?;
        let snapshot = required(command, "snapname")?;
        let request = match command.action {
            Some(RunAction::Create) => VolumeRequest::create_snapshot(volume, snapshot),
            Some(RunAction::Delete) => VolumeRequest::delete_snapshot(volume, snapshot),
            _ => bail!(ERR_NOT_SUPPORTED_ACTION),
        };
        self.call_volume(&ip, request).await
    }

    async fn run_cstor_volume(&self, command: &RunCommand) -> Result<Value> {
        if command.action != Some(RunAction::Update) {
            bail!(ERR_NOT_SUPPORTED_ACTION);
        }
        let ip = required(command, "ip")?;
        let volume = required(command, "volname")?;
        let capacity = required(command, "capacity")?;
        self.call_volume(&ip, VolumeRequest::resize(volume, capacity)).await
    }

    async fn call_volume(&self, host: &str, request: VolumeRequest) -> Result<Value> {
        let method = request.method();
        let response = self.volumes.connect(host).call(request).await?;
        if response.is_failure() {
            match &response.error {
                Some(error) => bail!("{} failed on '{}': {}", method, host, error),
                None => bail!("{} failed on '{}': {}", method, host, response.status.response),
            }
        }
        Ok(serde_json::to_value(&response)?)
    }
}

fn required(command: &RunCommand, key: &str) -> Result<String> {
    let value = command.text(key);
    if value.is_empty() {
        bail!("missing '{}': can not execute run command", key);
    }
    Ok(value)
}

fn decode_body(body: &[u8], unmarshal: bool) -> Value {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Value::Null;
    }
    if unmarshal && let Ok(value) = serde_json::from_slice::<Value>(body) {
        return value;
    }
    Value::String(String::from_utf8_lossy(body).to_string())
}

/// Result carrying only messages, for commands that never reached execution.
pub(crate) fn message_result(messages: Messages) -> RunCommandResult {
    RunCommandResult::new(Value::Null, messages)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use castor_volume::{VolumeError, VolumeResponse, VolumeRpc};
    use serde_json::json;

    use super::*;
    use crate::dsl::{Category, HttpReply, RunAction};

    struct NoHttp;

    #[async_trait]
    impl HttpTransport for NoHttp {
        async fn send(&self, method: Method, url: &str, _body: Option<Vec<u8>>) -> Result<HttpReply> {
            bail!("unexpected {} {}", method, url)
        }
    }

    /// Answers volume calls from a queue and records `(host, request)`.
    #[derive(Default)]
    struct ScriptedVolumes {
        replies: Mutex<Vec<VolumeResponse>>,
        calls: Arc<Mutex<Vec<(String, VolumeRequest)>>>,
    }

    impl ScriptedVolumes {
        fn replying(replies: Vec<VolumeResponse>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into_iter().rev().collect()),
                calls: Arc::default(),
            })
        }

        fn calls(&self) -> Vec<(String, VolumeRequest)> {
            self.calls.lock().expect("calls").clone()
        }
    }

    struct ScriptedRpc {
        host: String,
        reply: VolumeResponse,
        calls: Arc<Mutex<Vec<(String, VolumeRequest)>>>,
    }

    #[async_trait]
    impl VolumeRpc for ScriptedRpc {
        async fn call(&self, request: VolumeRequest) -> Result<VolumeResponse, VolumeError> {
            self.calls.lock().expect("calls").push((self.host.clone(), request));
            Ok(self.reply.clone())
        }
    }

    impl VolumeConnector for ScriptedVolumes {
        fn connect(&self, host: &str) -> Arc<dyn VolumeRpc> {
            let reply = self
                .replies
                .lock()
                .expect("replies")
                .pop()
                .unwrap_or_else(|| VolumeResponse::failed("no scripted reply"));
            Arc::new(ScriptedRpc {
                host: host.to_string(),
                reply,
                calls: Arc::clone(&self.calls),
            })
        }
    }

    fn snapshot_command(action: RunAction) -> RunCommand {
        RunCommand::new(action)
            .with_category(Category::Cstor)
            .with_category(Category::Snapshot)
            .with_data("ip", json!("10.0.0.5"))
            .with_data("volname", json!("vol1"))
            .with_data("snapname", json!("s1"))
    }

    #[tokio::test]
    async fn cstor_snapshot_create_returns_the_controller_reply() {
        let volumes = ScriptedVolumes::replying(vec![VolumeResponse::new("SNAPCREATE vol1@s1 done")]);
        let runtime = CommandRuntime::new(Arc::new(NoHttp), volumes.clone());

        let outcome = runtime
            .run(snapshot_command(RunAction::Create).with_select(["{.status.response} as reply"]))
            .await;

        assert_eq!(outcome.error(), None);
        assert_eq!(outcome.result["reply"], "SNAPCREATE vol1@s1 done");
        assert_eq!(
            volumes.calls(),
            vec![("10.0.0.5".to_string(), VolumeRequest::create_snapshot("vol1", "s1"))]
        );
    }

    #[tokio::test]
    async fn cstor_err_status_becomes_the_command_error() {
        let refused = VolumeResponse::new("ERR snapshot s1 not found");
        let volumes = ScriptedVolumes::replying(vec![refused]);
        let runtime = CommandRuntime::new(Arc::new(NoHttp), volumes.clone());

        let outcome = runtime.run(snapshot_command(RunAction::Delete)).await;

        let error = outcome.error().expect("err status");
        assert!(error.contains("DeleteSnapshot failed on '10.0.0.5'"), "unexpected error: {error}");
        assert!(error.contains("ERR snapshot s1 not found"), "unexpected error: {error}");
        assert!(outcome.result.is_null());
        assert_eq!(
            volumes.calls(),
            vec![("10.0.0.5".to_string(), VolumeRequest::delete_snapshot("vol1", "s1"))]
        );
    }

    #[tokio::test]
    async fn cstor_volume_update_resizes() {
        let volumes = ScriptedVolumes::replying(vec![VolumeResponse::new("RESIZE done")]);
        let runtime = CommandRuntime::new(Arc::new(NoHttp), volumes.clone());
        let command = RunCommand::new(RunAction::Update)
            .with_category(Category::Cstor)
            .with_category(Category::Volume)
            .with_data("ip", json!("10.0.0.6"))
            .with_data("volname", json!("vol2"))
            .with_data("capacity", json!("10G"));

        let outcome = runtime.run(command).await;

        assert_eq!(outcome.error(), None);
        assert_eq!(outcome.result["status"]["response"], "RESIZE done");
        assert_eq!(volumes.calls(), vec![("10.0.0.6".to_string(), VolumeRequest::resize("vol2", "10G"))]);
    }

    #[tokio::test]
    async fn cstor_volume_rejects_other_actions() {
        let volumes = ScriptedVolumes::replying(Vec::new());
        let runtime = CommandRuntime::new(Arc::new(NoHttp), volumes.clone());
        let command = RunCommand::new(RunAction::Delete)
            .with_category(Category::Cstor)
            .with_category(Category::Volume);

        let outcome = runtime.run(command).await;

        assert_eq!(outcome.error(), Some(ERR_NOT_SUPPORTED_ACTION));
        assert!(volumes.calls().is_empty());
    }

    #[test]
    fn body_decoding_honors_unmarshal_flag() {
        assert_eq!(decode_body(br#"{"a":1}"#, true)["a"], 1);
        assert_eq!(decode_body(br#"{"a":1}"#, false), Value::String(r#"{"a":1}"#.into()));
        assert_eq!(decode_body(b"plain", true), Value::String("plain".into()));
        assert!(decode_body(b"  ", true).is_null());
    }
}
