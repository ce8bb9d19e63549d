use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use castor_api::{ClusterError, ListOptions, ResourceRef};
use castor_engine::{
    ClusterClient, ClusterProvider, ClusterTaskFetcher, CompositeEngine, EngineError, FetchStrategy, StaticTaskFetcher,
    TaskPatch, TaskSpecFetcher, ValueContext,
};
use castor_types::{CompositeTemplate, ConfigEntry, RunTaskSpec};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

type ObjectKey = (String, String, String);

#[derive(Default)]
struct ClusterState {
    objects: Mutex<BTreeMap<ObjectKey, Value>>,
    calls: Mutex<Vec<String>>,
    failing_kinds: Mutex<Vec<String>>,
}

/// In-memory control plane that records every call.
#[derive(Clone, Default)]
struct MemoryCluster {
    state: Arc<ClusterState>,
}

impl MemoryCluster {
    fn seed(&self, kind: &str, namespace: &str, name: &str, object: Value) {
        self.state
            .objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((kind.to_string(), namespace.to_string(), name.to_string()), object);
    }

    fn fail_creates_of(&self, kind: &str) {
        self.state
            .failing_kinds
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(kind.to_string());
    }

    fn calls(&self) -> Vec<String> {
        self.state.calls.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn contains(&self, kind: &str, namespace: &str, name: &str) -> bool {
        self.state
            .objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&(kind.to_string(), namespace.to_string(), name.to_string()))
    }
}

impl ClusterProvider for MemoryCluster {
    fn scoped(&self, namespace: &str) -> Arc<dyn ClusterClient> {
        Arc::new(ScopedCluster {
            state: Arc::clone(&self.state),
            namespace: namespace.to_string(),
        })
    }
}

struct ScopedCluster {
    state: Arc<ClusterState>,
    namespace: String,
}

impl ScopedCluster {
    fn record(&self, call: String) {
        self.state.calls.lock().unwrap_or_else(PoisonError::into_inner).push(call);
    }

    fn key(&self, resource: &ResourceRef, name: &str) -> ObjectKey {
        (resource.kind.to_string(), self.namespace.clone(), name.to_string())
    }

    fn not_found(resource: &ResourceRef, name: &str) -> ClusterError {
        ClusterError::NotFound {
            kind: resource.kind.to_string(),
            name: name.to_string(),
        }
    }
}

#[async_trait]
impl ClusterClient for ScopedCluster {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn create(&self, resource: &ResourceRef, body: &Value, _: &CancellationToken) -> Result<Vec<u8>, ClusterError> {
        let name = body.pointer("/metadata/name").and_then(Value::as_str).unwrap_or_default().to_string();
        self.record(format!("create {} {}/{}", resource.kind, self.namespace, name));
        let failing = self.state.failing_kinds.lock().unwrap_or_else(PoisonError::into_inner).clone();
        if failing.iter().any(|kind| kind == resource.kind) {
            return Err(ClusterError::Status {
                status: 500,
                message: "admission webhook unavailable".into(),
            });
        }
        self.state
            .objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(self.key(resource, &name), body.clone());
        Ok(serde_json::to_vec(body).unwrap_or_default())
    }

    async fn patch(
        &self,
        resource: &ResourceRef,
        name: &str,
        patch: &TaskPatch,
        _: &CancellationToken,
    ) -> Result<Vec<u8>, ClusterError> {
        self.record(format!(
            "patch {} {}/{} {} {}",
            resource.kind,
            self.namespace,
            name,
            patch.patch_type.media_type(),
            String::from_utf8_lossy(&patch.body)
        ));
        let objects = self.state.objects.lock().unwrap_or_else(PoisonError::into_inner);
        let object = objects
            .get(&self.key(resource, name))
            .ok_or_else(|| Self::not_found(resource, name))?;
        Ok(serde_json::to_vec(object).unwrap_or_default())
    }

    async fn delete(&self, resource: &ResourceRef, name: &str, _: &CancellationToken) -> Result<(), ClusterError> {
        self.record(format!("delete {} {}/{}", resource.kind, self.namespace, name));
        self.state
            .objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key(resource, name))
            .map(|_| ())
            .ok_or_else(|| Self::not_found(resource, name))
    }

    async fn get(&self, resource: &ResourceRef, name: &str, _: &CancellationToken) -> Result<Vec<u8>, ClusterError> {
        self.record(format!("get {} {}/{}", resource.kind, self.namespace, name));
        let objects = self.state.objects.lock().unwrap_or_else(PoisonError::into_inner);
        let object = objects
            .get(&self.key(resource, name))
            .ok_or_else(|| Self::not_found(resource, name))?;
        Ok(serde_json::to_vec(object).unwrap_or_default())
    }

    async fn list(&self, resource: &ResourceRef, _: &ListOptions, _: &CancellationToken) -> Result<Vec<u8>, ClusterError> {
        self.record(format!("list {} {}", resource.kind, self.namespace));
        let objects = self.state.objects.lock().unwrap_or_else(PoisonError::into_inner);
        let items: Vec<Value> = objects
            .iter()
            .filter(|((kind, namespace, _), _)| kind == resource.kind && namespace == &self.namespace)
            .map(|(_, object)| object.clone())
            .collect();
        Ok(serde_json::to_vec(&json!({ "items": items })).unwrap_or_default())
    }
}

fn engine(template: CompositeTemplate, fetcher: StaticTaskFetcher, cluster: &MemoryCluster) -> CompositeEngine {
    CompositeEngine::new(template, Arc::new(fetcher), Arc::new(cluster.clone()))
}

fn template(name: &str, tasks: &[&str], output: Option<&str>) -> CompositeTemplate {
    CompositeTemplate {
        name: name.into(),
        task_namespace: "openebs".into(),
        run_tasks: tasks.iter().map(|task| task.to_string()).collect(),
        output_task: output.map(str::to_string),
        ..CompositeTemplate::default()
    }
}

fn pvc() -> Value {
    json!({
        "metadata": {
            "name": "kubectl-tester",
            "annotations": {"controller.openebs.io/affinity": "mypin"}
        },
        "spec": {"containers": [{"name": "bb"}, {"name": "kubectl"}]}
    })
}

const READ_PVC_META: &str = r#"
id: mypod
apiVersion: v1
kind: PersistentVolumeClaim
action: get
runNamespace: default
objectName: kubectl-tester
queries:
  - alias: name
    path: "{.metadata.name}"
  - alias: affinity
    path: '{.metadata.annotations.controller\.openebs\.io/affinity}'
"#;

const PUT_DEPLOY_META: &str = r#"
id: ctrl
apiVersion: apps/v1beta1
kind: Deployment
action: put
runNamespace: openebs
"#;

const PUT_DEPLOY_TASK: &str = r#"
apiVersion: apps/v1beta1
kind: Deployment
metadata:
  name: {{Config.ControllerName.value}}
"#;

#[tokio::test]
async fn projection_results_reach_the_output_task() {
    let cluster = MemoryCluster::default();
    cluster.seed("PersistentVolumeClaim", "default", "kubectl-tester", pvc());
    let fetcher = StaticTaskFetcher::new()
        .with_task(RunTaskSpec::new("read-pvc", READ_PVC_META, ""))
        .with_task(RunTaskSpec::new(
            "read-output",
            "id: out\naction: output\n",
            "name: {{TaskResult.mypod.name}}\naffinity: {{TaskResult.mypod.affinity}}",
        ));

    let output = engine(template("read", &["read-pvc"], Some("read-output")), fetcher, &cluster)
        .run(&CancellationToken::new())
        .await
        .expect("run");
    assert_eq!(String::from_utf8(output).expect("utf8"), "name: kubectl-tester\naffinity: mypin");
}

#[tokio::test]
async fn verify_failure_exhausts_the_retry_budget() {
    let cluster = MemoryCluster::default();
    cluster.seed("PersistentVolumeClaim", "default", "kubectl-tester", pvc());
    let meta = r#"
id: mypod
apiVersion: v1
kind: PersistentVolumeClaim
action: get
runNamespace: default
objectName: kubectl-tester
retry: "2,0s"
queries:
  - alias: containerCount
    path: "{range .spec.containers[*]}{.name},{end}"
    verify:
      count: "3"
      split: ","
"#;
    let fetcher = StaticTaskFetcher::new().with_task(RunTaskSpec::new("read-pvc", meta, ""));

    let error = engine(template("read", &["read-pvc"], None), fetcher, &cluster)
        .run(&CancellationToken::new())
        .await
        .expect_err("verify failure");
    assert!(error.is_verify(), "unexpected error: {error}");
    let gets = cluster.calls().iter().filter(|call| call.starts_with("get ")).count();
    assert_eq!(gets, 2);
}

#[tokio::test]
async fn failed_task_rolls_back_created_objects() {
    let cluster = MemoryCluster::default();
    let read_pool = r#"
id: pool
apiVersion: openebs.io/v1alpha1
kind: StoragePool
action: get
objectName: missing
"#;
    let fetcher = StaticTaskFetcher::new()
        .with_task(RunTaskSpec::new("put-ctrl", PUT_DEPLOY_META, PUT_DEPLOY_TASK))
        .with_task(RunTaskSpec::new("read-pool", read_pool, ""));
    let mut template = template("create", &["put-ctrl", "read-pool"], None);
    template.defaults = vec![ConfigEntry::new("ControllerName", "d1")];

    let error = engine(template, fetcher, &cluster)
        .run(&CancellationToken::new())
        .await
        .expect_err("missing pool");
    assert!(
        matches!(error.root(), EngineError::Cluster(ClusterError::NotFound { .. })),
        "unexpected error: {error}"
    );
    assert!(error.to_string().contains("task 'read-pool' failed"), "unexpected error: {error}");
    assert_eq!(
        cluster.calls(),
        vec![
            "create Deployment openebs/d1".to_string(),
            "get StoragePool openebs/missing".to_string(),
            "delete Deployment openebs/d1".to_string(),
        ]
    );
    assert!(!cluster.contains("Deployment", "openebs", "d1"));
}

#[tokio::test]
async fn failed_create_leaves_nothing_to_roll_back() {
    let cluster = MemoryCluster::default();
    cluster.fail_creates_of("Deployment");
    let fetcher = StaticTaskFetcher::new().with_task(RunTaskSpec::new("put-ctrl", PUT_DEPLOY_META, PUT_DEPLOY_TASK));
    let mut template = template("create", &["put-ctrl"], None);
    template.defaults = vec![ConfigEntry::new("ControllerName", "d1")];

    let error = engine(template, fetcher, &cluster)
        .run(&CancellationToken::new())
        .await
        .expect_err("create fails");
    assert!(matches!(error.root(), EngineError::Cluster(_)), "unexpected error: {error}");
    assert!(!cluster.calls().iter().any(|call| call.starts_with("delete ")));
}

fn create_template(tasks: &[&str], output: Option<&str>) -> CompositeTemplate {
    let mut template = template("create", tasks, output);
    template.defaults = vec![ConfigEntry::new("ControllerName", "d1")];
    template
}

#[tokio::test]
async fn failing_post_rolls_back_the_same_task_create() {
    let cluster = MemoryCluster::default();
    let fetcher = StaticTaskFetcher::new().with_task(
        RunTaskSpec::new("put-ctrl", PUT_DEPLOY_META, PUT_DEPLOY_TASK)
            .with_post(r#"{{noop (notFoundErr "controller service is missing" "")}}"#),
    );

    let error = engine(create_template(&["put-ctrl"], None), fetcher, &cluster)
        .run(&CancellationToken::new())
        .await
        .expect_err("post fails");
    assert!(matches!(error.root(), EngineError::NotFound(_)), "unexpected error: {error}");
    assert_eq!(
        cluster.calls(),
        vec!["create Deployment openebs/d1".to_string(), "delete Deployment openebs/d1".to_string()]
    );
    assert!(!cluster.contains("Deployment", "openebs", "d1"));
}

#[tokio::test]
async fn failing_verify_on_create_response_rolls_back() {
    let cluster = MemoryCluster::default();
    let meta = r#"
id: ctrl
apiVersion: apps/v1beta1
kind: Deployment
action: put
runNamespace: openebs
queries:
  - alias: replicas
    path: "{.spec.replicas}"
    verify:
      count: "3"
"#;
    let task = "apiVersion: apps/v1beta1\nkind: Deployment\nmetadata:\n  name: d1\nspec:\n  replicas: 1\n";
    let fetcher = StaticTaskFetcher::new().with_task(RunTaskSpec::new("put-ctrl", meta, task));

    let error = engine(create_template(&["put-ctrl"], None), fetcher, &cluster)
        .run(&CancellationToken::new())
        .await
        .expect_err("verify fails");
    assert!(error.is_verify(), "unexpected error: {error}");
    assert_eq!(
        cluster.calls(),
        vec!["create Deployment openebs/d1".to_string(), "delete Deployment openebs/d1".to_string()]
    );
}

#[tokio::test]
async fn failing_output_task_rolls_back() {
    let cluster = MemoryCluster::default();
    let fetcher = StaticTaskFetcher::new()
        .with_task(RunTaskSpec::new("put-ctrl", PUT_DEPLOY_META, PUT_DEPLOY_TASK))
        .with_task(RunTaskSpec::new(
            "create-output",
            "id: out\n",
            r#"ip: {{notFoundErr "controller ip is missing" TaskResult.ctrl.ip}}"#,
        ));

    let error = engine(create_template(&["put-ctrl"], Some("create-output")), fetcher, &cluster)
        .run(&CancellationToken::new())
        .await
        .expect_err("output fails");
    assert!(matches!(error.root(), EngineError::NotFound(_)), "unexpected error: {error}");
    assert_eq!(cluster.calls().last().map(String::as_str), Some("delete Deployment openebs/d1"));
    assert!(!cluster.contains("Deployment", "openebs", "d1"));
}

#[tokio::test]
async fn cancellation_interrupts_retry_and_still_rolls_back() {
    let cluster = MemoryCluster::default();
    cluster.seed("PersistentVolumeClaim", "default", "kubectl-tester", pvc());
    let read_meta = r#"
id: mypod
apiVersion: v1
kind: PersistentVolumeClaim
action: get
runNamespace: default
objectName: kubectl-tester
retry: "3,10s"
queries:
  - alias: containerCount
    path: "{range .spec.containers[*]}{.name},{end}"
    verify:
      count: "3"
      split: ","
"#;
    let fetcher = StaticTaskFetcher::new()
        .with_task(RunTaskSpec::new("put-ctrl", PUT_DEPLOY_META, PUT_DEPLOY_TASK))
        .with_task(RunTaskSpec::new("read-pvc", read_meta, ""));
    let engine = engine(create_template(&["put-ctrl", "read-pvc"], None), fetcher, &cluster);

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let error = engine.run(&cancel).await.expect_err("cancelled");
    assert!(error.is_cancelled(), "unexpected error: {error}");
    assert!(started.elapsed() < Duration::from_secs(5), "retry sleep ignored the token");
    assert_eq!(
        cluster.calls(),
        vec![
            "create Deployment openebs/d1".to_string(),
            "get PersistentVolumeClaim default/kubectl-tester".to_string(),
            "delete Deployment openebs/d1".to_string(),
        ]
    );
}

#[tokio::test]
async fn strategic_patch_is_sent_as_json() {
    let cluster = MemoryCluster::default();
    cluster.seed("Deployment", "openebs", "vol-ctrl", json!({"metadata": {"name": "vol-ctrl"}}));
    let meta = r#"
id: upgrade
apiVersion: apps/v1beta1
kind: Deployment
action: patch
runNamespace: openebs
objectName: vol-ctrl
queries:
  - alias: name
    path: "{.metadata.name}"
patch:
  type: strategic
  specs:
    spec:
      replicas: 2
"#;
    let fetcher = StaticTaskFetcher::new().with_task(RunTaskSpec::new("patch-ctrl", meta, ""));
    let engine = engine(template("upgrade", &["patch-ctrl"], None), fetcher, &cluster);
    let mut values = engine.initial_values().expect("values");

    engine
        .run_with(&mut values, &CancellationToken::new())
        .await
        .expect("run");
    assert_eq!(
        cluster.calls(),
        vec![r#"patch Deployment openebs/vol-ctrl application/strategic-merge-patch+json {"spec":{"replicas":2}}"#.to_string()]
    );
    assert_eq!(values.get_text("TaskResult.upgrade.name"), "vol-ctrl");
    assert_eq!(values.get_text("JsonResult"), "--redacted--");
}

#[tokio::test]
async fn list_across_namespaces_keys_results_by_namespace() {
    let cluster = MemoryCluster::default();
    cluster.seed("Pod", "a", "p1", json!({"metadata": {"name": "p1", "namespace": "a"}}));
    cluster.seed("Pod", "b", "p2", json!({"metadata": {"name": "p2", "namespace": "b"}}));
    let meta = r#"
id: pods
apiVersion: v1
kind: Pod
action: list
runNamespace: "a,b"
queries:
  - alias: names
    path: "{.items[*].metadata.name}"
"#;
    let fetcher = StaticTaskFetcher::new().with_task(RunTaskSpec::new("list-pods", meta, ""));
    let engine = engine(template("pods", &["list-pods"], None), fetcher, &cluster);
    let mut values = engine.initial_values().expect("values");

    engine
        .run_with(&mut values, &CancellationToken::new())
        .await
        .expect("run");
    assert_eq!(values.get_text("TaskResult.pods.a.names"), "p1");
    assert_eq!(values.get_text("TaskResult.pods.b.names"), "p2");
    assert_eq!(values.get_text("ListItems.pods.b.items"), r#"[{"metadata":{"name":"p2","namespace":"b"}}]"#);
    assert_eq!(cluster.calls(), vec!["list Pod a".to_string(), "list Pod b".to_string()]);
}

#[tokio::test]
async fn version_mismatch_hands_over_to_the_fallback_template() {
    let cluster = MemoryCluster::default();
    cluster.seed("PersistentVolumeClaim", "default", "kubectl-tester", pvc());
    cluster.seed("Pod", "openebs", "p1", json!({"metadata": {"name": "p1"}}));
    let legacy_meta = r#"
id: legacypods
apiVersion: v1
kind: Pod
action: list
runNamespace: openebs
queries:
  - alias: names
    path: "{.items[*].metadata.name}"
"#;
    let fetcher = StaticTaskFetcher::new()
        .with_task(RunTaskSpec::new("put-ctrl", PUT_DEPLOY_META, PUT_DEPLOY_TASK))
        .with_task(
            RunTaskSpec::new("read-pvc", READ_PVC_META, "").with_post(
                r#"{{noop (versionMismatchErr "cluster runs an unsupported version" (kubeVersionLt "v1.9.0" "v1.10.0"))}}"#,
            ),
        )
        .with_task(RunTaskSpec::new("legacy-pods", legacy_meta, ""))
        .with_task(RunTaskSpec::new("legacy-output", "id: out\n", "legacy: {{TaskResult.legacypods.names}}"))
        .with_template(template("legacy", &["legacy-pods"], Some("legacy-output")));

    let mut current = template("current", &["put-ctrl", "read-pvc"], None);
    current.fallback = Some("legacy".into());
    current.defaults = vec![ConfigEntry::new("ControllerName", "d1")];

    let output = engine(current, fetcher, &cluster)
        .run(&CancellationToken::new())
        .await
        .expect("fallback output");
    assert_eq!(String::from_utf8(output).expect("utf8"), "legacy: p1");
    assert!(cluster.calls().contains(&"delete Deployment openebs/d1".to_string()));
}

#[tokio::test]
async fn fallback_cycle_surfaces_the_mismatch() {
    let cluster = MemoryCluster::default();
    let meta = "id: check\napiVersion: v1\nkind: Pod\naction: list\n";
    let fetcher = StaticTaskFetcher::new()
        .with_task(RunTaskSpec::new("check", meta, "").with_post(r#"{{noop (versionMismatchErr "" true)}}"#))
        .with_template({
            let mut looping = template("looping", &["check"], None);
            looping.fallback = Some("looping".into());
            looping
        });
    let mut start = template("looping", &["check"], None);
    start.fallback = Some("looping".into());

    let error = engine(start, fetcher, &cluster)
        .run(&CancellationToken::new())
        .await
        .expect_err("cycle");
    assert!(error.is_version_mismatch(), "unexpected error: {error}");
    assert!(error.to_string().contains("version mismatch"), "unexpected error: {error}");
}

#[tokio::test]
async fn duplicate_task_ids_are_rejected_case_insensitively() {
    let cluster = MemoryCluster::default();
    let fetcher = StaticTaskFetcher::new()
        .with_task(RunTaskSpec::new("first", "id: Pods\napiVersion: v1\nkind: Pod\naction: list\n", ""))
        .with_task(RunTaskSpec::new("second", "id: pods\napiVersion: v1\nkind: Pod\naction: list\n", ""));

    let error = engine(template("dup", &["first", "second"], None), fetcher, &cluster)
        .run(&CancellationToken::new())
        .await
        .expect_err("duplicate");
    assert!(error.to_string().contains("duplicate task id 'pods'"), "unexpected error: {error}");
    assert_eq!(cluster.calls(), vec!["list Pod openebs".to_string()]);
}

#[tokio::test]
async fn disabled_and_repeated_tasks() {
    let cluster = MemoryCluster::default();
    cluster.seed("Service", "a", "s1", json!({"metadata": {"name": "s1"}}));
    let disabled = "id: skipped\napiVersion: v1\nkind: Pod\naction: list\ndisable: true\n";
    let repeated = r#"
id: svc
apiVersion: v1
kind: Service
action: list
repeatWith:
  resources: [first, second]
  metas:
    - runNamespace: a
    - runNamespace: b
"#;
    let fetcher = StaticTaskFetcher::new()
        .with_task(RunTaskSpec::new("skip", disabled, ""))
        .with_task(RunTaskSpec::new("repeat", repeated, ""));
    let engine = engine(template("repeat", &["skip", "repeat"], None), fetcher, &cluster);
    let mut values: ValueContext = engine.initial_values().expect("values");

    engine
        .run_with(&mut values, &CancellationToken::new())
        .await
        .expect("run");
    assert_eq!(cluster.calls(), vec!["list Service a".to_string(), "list Service b".to_string()]);
    assert!(values.get("RepeatResource").is_none());
    assert!(values.get("TaskResult.skipped").is_none());
}

#[tokio::test]
async fn cluster_fetcher_prefers_the_run_task_resource() {
    let cluster = MemoryCluster::default();
    cluster.seed(
        "ConfigMap",
        "openebs",
        "read-pvc",
        json!({"data": {"meta": "id: from-configmap", "task": ""}}),
    );
    let fetcher = ClusterTaskFetcher::new(Arc::new(cluster.clone()), FetchStrategy::ResourceFirst);
    let cancel = CancellationToken::new();

    let task = fetcher.fetch("openebs", "read-pvc", &cancel).await.expect("configmap");
    assert_eq!(task.meta, "id: from-configmap");

    cluster.seed("RunTask", "openebs", "read-pvc", json!({"spec": {"meta": "id: from-resource"}}));
    let task = fetcher.fetch("openebs", "read-pvc", &cancel).await.expect("resource");
    assert_eq!(task.meta, "id: from-resource");

    let configmap_only = ClusterTaskFetcher::new(Arc::new(cluster.clone()), FetchStrategy::ConfigmapOnly);
    let task = configmap_only.fetch("openebs", "read-pvc", &cancel).await.expect("configmap only");
    assert_eq!(task.meta, "id: from-configmap");

    let error = fetcher.fetch("openebs", "absent", &cancel).await.expect_err("absent");
    assert!(matches!(error, EngineError::Fetch(_)), "unexpected error: {error}");
}
