use super::*;
use feature_service_core::{
    config::{Config, LegacyConfig},
    notify::{Notification, Notifier},
    persistence::{BoxError, Persistence},
    EditableFields, InMemory, Notifying, SharedPersistence,
};
use maplit::hashmap;
use parking_lot::Mutex;
use prometheus_client::registry::Registry;
use std::collections::HashMap;

#[derive(Default)]
struct Recording(Mutex<Vec<Notification>>);

struct Failing;

/// A store that cannot be reached.
struct Unreachable;

/// A store whose writes succeed but which cannot be counted.
#[derive(Default)]
struct Uncountable(InMemory);

#[async_trait::async_trait]
impl Notifier for Recording {
    async fn notify(&self, n: Notification) -> Result<(), BoxError> {
        self.0.lock().push(n);
        Ok(())
    }
}

#[async_trait::async_trait]
impl Notifier for Failing {
    async fn notify(&self, _: Notification) -> Result<(), BoxError> {
        Err("sink unavailable".into())
    }
}

#[async_trait::async_trait]
impl Persistence for Unreachable {
    async fn get_all(&self) -> persistence::Result<Vec<KeyValue>> {
        Err(persistence::Error::backend("connection refused"))
    }
    async fn get(&self, _: &str) -> persistence::Result<KeyValue> {
        Err(persistence::Error::backend("connection refused"))
    }
    async fn set(&self, _: KeyValue) -> persistence::Result<()> {
        Err(persistence::Error::backend("connection refused"))
    }
    async fn pre_set(&self, _: KeyValue) -> persistence::Result<()> {
        Err(persistence::Error::backend("connection refused"))
    }
    async fn delete(&self, _: &str) -> persistence::Result<()> {
        Err(persistence::Error::backend("connection refused"))
    }
    async fn count(&self) -> persistence::Result<usize> {
        Err(persistence::Error::backend("connection refused"))
    }
}

#[async_trait::async_trait]
impl Persistence for Uncountable {
    async fn get_all(&self) -> persistence::Result<Vec<KeyValue>> {
        self.0.get_all().await
    }
    async fn get(&self, key: &str) -> persistence::Result<KeyValue> {
        self.0.get(key).await
    }
    async fn set(&self, kv: KeyValue) -> persistence::Result<()> {
        self.0.set(kv).await
    }
    async fn pre_set(&self, kv: KeyValue) -> persistence::Result<()> {
        self.0.pre_set(kv).await
    }
    async fn delete(&self, key: &str) -> persistence::Result<()> {
        self.0.delete(key).await
    }
    async fn count(&self) -> persistence::Result<usize> {
        Err(persistence::Error::backend("count unavailable"))
    }
}

struct Fixture {
    svc: FeatureService,
    metrics: FeatureMetrics,
    notifications: Arc<Recording>,
}

impl Fixture {
    fn legacy(editable: &str) -> Self {
        let legacy = LegacyConfig {
            editable: EditableFields::parse(editable),
            ..Default::default()
        };
        Self::load(legacy, HashMap::new())
    }

    fn multi(env: HashMap<&str, &str>) -> Self {
        let env = env
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Self::load(LegacyConfig::default(), env)
    }

    fn load(legacy: LegacyConfig, env: HashMap<String, String>) -> Self {
        let notifications = Arc::new(Recording::default());
        let config = Config::load(legacy, &env).expect("configuration must be valid");
        let apps = Applications::build(config, |_| {
            let store = Notifying::new(InMemory::new(), notifications.clone());
            Ok(Arc::new(store) as SharedPersistence)
        })
        .expect("applications must build");
        let (svc, metrics) = service(apps);
        Self {
            svc,
            metrics,
            notifications,
        }
    }

    fn with_store(store: SharedPersistence) -> Self {
        let config = Config::load(LegacyConfig::default(), &HashMap::new()).unwrap();
        let apps = Applications::build(config, |_| Ok(store.clone())).unwrap();
        let (svc, metrics) = service(apps);
        Self {
            svc,
            metrics,
            notifications: Default::default(),
        }
    }

    fn notifications(&self) -> Vec<Notification> {
        self.notifications.0.lock().clone()
    }

    async fn set(&self, app: &str, key: &str, value: &str) -> Result<(), tonic::Status> {
        self.svc
            .set(tonic::Request::new(kv(app, key, value)))
            .await
            .map(tonic::Response::into_inner)
    }

    async fn pre_set(&self, app: &str, key: &str, value: &str) -> Result<(), tonic::Status> {
        self.svc
            .pre_set(tonic::Request::new(kv(app, key, value)))
            .await
            .map(tonic::Response::into_inner)
    }

    async fn get(&self, app: &str, key: &str) -> Result<String, tonic::Status> {
        self.svc
            .get(tonic::Request::new(proto::Key {
                name: key.to_string(),
                application: app.to_string(),
            }))
            .await
            .map(|rsp| rsp.into_inner().value)
    }

    async fn delete(&self, app: &str, key: &str) -> Result<(), tonic::Status> {
        self.svc
            .delete(tonic::Request::new(proto::Key {
                name: key.to_string(),
                application: app.to_string(),
            }))
            .await
            .map(tonic::Response::into_inner)
    }

    async fn get_all(&self, app: &str) -> Result<Vec<proto::KeyValue>, tonic::Status> {
        let rsp = self
            .svc
            .get_all(tonic::Request::new(proto::GetAllRequest {
                application: app.to_string(),
            }))
            .await?;
        let mut items = rsp
            .into_inner()
            .try_collect::<Vec<_>>()
            .await
            .expect("stream must not fail");
        items.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(items)
    }
}

fn service(apps: Applications) -> (FeatureService, FeatureMetrics) {
    let mut reg = Registry::default();
    let metrics = FeatureMetrics::register(reg.sub_registry_with_prefix("feature"));
    let grpc = GrpcServerMetricsFamily::register(reg.sub_registry_with_prefix("grpc_server"));
    let svc = FeatureService::new(Arc::new(apps), metrics.clone(), grpc);
    (svc, metrics)
}

fn kv(application: &str, key: &str, value: &str) -> proto::KeyValue {
    proto::KeyValue {
        key: key.to_string(),
        value: value.to_string(),
        editable: false,
        application: application.to_string(),
    }
}

fn entry(application: &str, key: &str, value: &str, editable: bool) -> proto::KeyValue {
    proto::KeyValue {
        editable,
        ..kv(application, key, value)
    }
}

#[tokio::test]
async fn unrestricted_set_then_get() {
    let f = Fixture::legacy("");
    f.set("", "color", "red").await.unwrap();

    assert_eq!(f.get("", "color").await.unwrap(), "red");
    assert_eq!(
        f.get_all("").await.unwrap(),
        vec![entry("default", "color", "red", true)]
    );
}

#[tokio::test]
async fn unrestricted_delete() {
    let f = Fixture::legacy("");
    f.set("", "color", "red").await.unwrap();
    f.delete("", "color").await.unwrap();
    // Deleting again is not an error.
    f.delete("", "color").await.unwrap();

    let status = f.get("", "color").await.expect_err("key must be gone");
    assert_eq!(status.code(), tonic::Code::NotFound);
}

#[tokio::test]
async fn restricted_set_cannot_create() {
    let f = Fixture::legacy("THEME");

    let status = f
        .set("", "THEME", "dark")
        .await
        .expect_err("creation must be denied");
    assert_eq!(status.code(), tonic::Code::PermissionDenied);
    assert_eq!(
        status.message(),
        "creating new fields is not allowed when editable restrictions are active"
    );
    assert!(f.get_all("").await.unwrap().is_empty());
    assert!(f.notifications().is_empty());
}

#[tokio::test]
async fn restricted_set_edits_seeded_member() {
    let f = Fixture::legacy("THEME");

    f.pre_set("", "THEME", "light").await.unwrap();
    f.set("", "THEME", "dark").await.unwrap();
    assert_eq!(f.get("", "THEME").await.unwrap(), "dark");

    let status = f
        .set("", "OTHER", "x")
        .await
        .expect_err("creation must be denied");
    assert_eq!(status.code(), tonic::Code::PermissionDenied);
}

#[tokio::test]
async fn restricted_set_rejects_non_members() {
    let f = Fixture::legacy("THEME");
    f.pre_set("", "OTHER", "x").await.unwrap();

    let status = f
        .set("", "OTHER", "y")
        .await
        .expect_err("edit must be denied");
    assert_eq!(status.code(), tonic::Code::PermissionDenied);
    assert_eq!(status.message(), "field 'OTHER' is not editable");
    assert_eq!(f.get("", "OTHER").await.unwrap(), "x");
}

#[tokio::test]
async fn restricted_delete_is_always_denied() {
    let f = Fixture::legacy("THEME");
    f.pre_set("", "THEME", "light").await.unwrap();
    f.pre_set("", "OTHER", "x").await.unwrap();

    for key in ["THEME", "OTHER", "ABSENT"] {
        let status = f.delete("", key).await.expect_err("delete must be denied");
        assert_eq!(status.code(), tonic::Code::PermissionDenied);
        assert_eq!(
            status.message(),
            "deleting fields is not allowed when editable restrictions are active"
        );
    }
    assert_eq!(f.get_all("").await.unwrap().len(), 2);
}

#[tokio::test]
async fn pre_set_bypasses_restrictions() {
    let f = Fixture::legacy("THEME");
    f.pre_set("", "OTHER", "x").await.unwrap();
    // Seeding never overwrites.
    f.pre_set("", "OTHER", "y").await.unwrap();
    assert_eq!(f.get("", "OTHER").await.unwrap(), "x");
}

#[tokio::test]
async fn get_all_reports_editability() {
    let f = Fixture::legacy("THEME");
    f.pre_set("", "THEME", "light").await.unwrap();
    f.pre_set("", "OTHER", "x").await.unwrap();

    assert_eq!(
        f.get_all("").await.unwrap(),
        vec![
            entry("default", "OTHER", "x", false),
            entry("default", "THEME", "light", true),
        ]
    );
}

#[tokio::test]
async fn mutations_notify() {
    let f = Fixture::legacy("");
    f.pre_set("", "seed", "1").await.unwrap();
    f.set("", "color", "red").await.unwrap();
    f.delete("", "color").await.unwrap();
    f.get_all("").await.unwrap();

    assert_eq!(
        f.notifications(),
        vec![
            Notification::update("color", "red"),
            Notification::delete("color"),
        ]
    );
}

#[tokio::test]
async fn applications_are_isolated() {
    let f = Fixture::multi(hashmap! { "APPLICATIONS" => "app1,app2" });
    f.set("app2", "k", "v").await.unwrap();

    assert!(f.get_all("app1").await.unwrap().is_empty());
    // The first application is the default.
    assert!(f.get_all("").await.unwrap().is_empty());
    assert_eq!(
        f.get_all("app2").await.unwrap(),
        vec![entry("app2", "k", "v", true)]
    );
}

#[tokio::test]
async fn per_application_restrictions() {
    let f = Fixture::multi(hashmap! {
        "APPLICATIONS" => "open,locked",
        "LOCKED_EDITABLE" => "THEME",
    });
    f.set("open", "k", "v").await.unwrap();
    let status = f.set("locked", "k", "v").await.expect_err("must be denied");
    assert_eq!(status.code(), tonic::Code::PermissionDenied);
}

#[tokio::test]
async fn unknown_application_is_not_found() {
    let f = Fixture::legacy("");
    let status = f.set("nope", "k", "v").await.expect_err("must fail");
    assert_eq!(status.code(), tonic::Code::NotFound);
    assert_eq!(status.message(), "application not found: nope");

    let status = f.get_all("nope").await.expect_err("must fail");
    assert_eq!(status.code(), tonic::Code::NotFound);
}

#[tokio::test]
async fn missing_key_is_not_found() {
    let f = Fixture::legacy("");
    let status = f.get("", "missing").await.expect_err("must fail");
    assert_eq!(status.code(), tonic::Code::NotFound);
}

#[tokio::test]
async fn lists_applications_in_order() {
    let f = Fixture::multi(hashmap! {
        "APPLICATIONS" => "web,api",
        "WEB_NAMESPACE" => "frontend",
        "API_STORAGE_TYPE" => "inmemory",
    });
    let rsp = f
        .svc
        .get_applications(tonic::Request::new(proto::ApplicationsRequest {}))
        .await
        .unwrap();
    let apps = rsp.into_inner().try_collect::<Vec<_>>().await.unwrap();

    assert_eq!(
        apps,
        vec![
            proto::Application {
                name: "web".to_string(),
                namespace: "frontend".to_string(),
                storage_type: "inmemory".to_string(),
            },
            proto::Application {
                name: "api".to_string(),
                namespace: "default".to_string(),
                storage_type: "inmemory".to_string(),
            },
        ]
    );
}

#[tokio::test]
async fn backend_failure_is_unavailable() {
    let f = Fixture::with_store(Arc::new(Unreachable));
    let status = f.get_all("").await.expect_err("must fail");
    assert_eq!(status.code(), tonic::Code::Unavailable);
    assert_eq!(status.message(), "connection refused");

    let status = f.set("", "k", "v").await.expect_err("must fail");
    assert_eq!(status.code(), tonic::Code::Unavailable);
}

#[tokio::test]
async fn count_failure_fails_committed_mutation() {
    let store = Arc::new(Uncountable::default());
    let f = Fixture::with_store(store.clone());

    let status = f.set("", "k", "v").await.expect_err("must fail");
    assert_eq!(status.code(), tonic::Code::Unavailable);
    // The write itself was applied.
    assert_eq!(store.0.get("k").await.unwrap().value, "v");
}

#[tokio::test]
async fn notify_failure_is_internal() {
    let store = Notifying::new(InMemory::new(), Arc::new(Failing));
    let f = Fixture::with_store(Arc::new(store));

    let status = f.set("", "k", "v").await.expect_err("must fail");
    assert_eq!(status.code(), tonic::Code::Internal);
    assert_eq!(f.get("", "k").await.unwrap(), "v");
}

#[tokio::test]
async fn records_requests_and_sizes() {
    let f = Fixture::multi(hashmap! { "APPLICATIONS" => "app1" });
    f.set("", "a", "1").await.unwrap();
    f.set("app1", "b", "2").await.unwrap();
    f.get("app1", "a").await.unwrap();

    assert_eq!(f.metrics.requests("app1", Operation::Set), 2);
    assert_eq!(f.metrics.requests("app1", Operation::Get), 1);
    assert_eq!(f.metrics.active("app1"), 2);

    f.delete("app1", "a").await.unwrap();
    assert_eq!(f.metrics.active("app1"), 1);
}

#[tokio::test]
async fn records_grpc_status_codes() {
    let f = Fixture::legacy("THEME");
    f.set("", "THEME", "dark").await.unwrap_err();
    f.pre_set("", "THEME", "light").await.unwrap();

    assert_eq!(f.svc.rpc.set.handled(tonic::Code::PermissionDenied), 1);
    assert_eq!(f.svc.rpc.pre_set.handled(tonic::Code::Ok), 1);
}
