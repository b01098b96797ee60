use crate::{
    core::{
        config::{split_presets, Config, LegacyConfig},
        Applications, EditableFields, NotifierKind, RestartConfig, StorageKind, WorkloadKind,
    },
    grpc::{
        api::feature::v1::feature_server::FeatureServer,
        auth::{AuthLayer, BasicAuth},
        feature::FeatureService,
        meta::MetaService,
        metrics::{FeatureMetrics, GrpcServerMetricsFamily},
    },
};
use anyhow::{bail, Result};
use clap::Parser;
use futures::prelude::*;
use prometheus_client::registry::Registry;
use std::{collections::HashMap, net::SocketAddr, sync::Arc};
use tonic::transport::Server;
use tracing::{info, instrument};

const SERVICE_NAME: &str = "feature-service";

#[derive(Debug, Parser)]
#[clap(name = "feature-service", about = "A feature flag store")]
pub struct Args {
    #[clap(
        long,
        default_value = "feature_service=info,warn",
        env = "FEATURE_SERVICE_LOG"
    )]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    #[clap(long, default_value = "0.0.0.0:8080", env = "FEATURE_SERVICE_GRPC_ADDR")]
    grpc_addr: SocketAddr,

    /// Backend of the default application: `inmemory` or `configmap`.
    #[clap(long, default_value = "inmemory", env = "STORAGE_TYPE")]
    storage_type: StorageKind,

    #[clap(long, env = "CONFIGMAP_NAME")]
    configmap_name: Option<String>,

    /// Comma-separated `key=value` pairs applied at start-up without overwriting.
    #[clap(long, env = "PRESET")]
    preset: Option<String>,

    /// Comma-separated keys that may be changed at runtime. Empty permits every key.
    #[clap(long, env = "EDITABLE")]
    editable: Option<String>,

    #[clap(long, env = "RESTART_ENABLED")]
    restart_enabled: bool,

    #[clap(long, default_value = "deployment", env = "RESTART_TYPE")]
    restart_type: WorkloadKind,

    #[clap(long, env = "RESTART_NAME")]
    restart_name: Option<String>,

    #[clap(long, env = "NOTIFICATION_ENABLED")]
    notification_enabled: bool,

    #[clap(long, default_value = "log", env = "NOTIFICATION_TYPE")]
    notification_type: NotifierKind,

    #[clap(long, env = "AUTH_ENABLED")]
    auth_enabled: bool,

    #[clap(long, default_value = "", env = "AUTH_USERNAME")]
    auth_username: String,

    #[clap(long, default_value = "", env = "AUTH_PASSWORD", hide_env_values = true)]
    auth_password: String,

    #[clap(long, default_value = "default", env = "POD_NAMESPACE")]
    pod_namespace: String,
}

/// The non-runtime settings, split out of [`Args`] so they can be checked before anything starts.
#[derive(Debug)]
struct Settings {
    legacy: LegacyConfig,
    notifier: NotifierKind,
    notification_enabled: bool,
    auth: BasicAuth,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            log_level,
            log_format,
            client,
            admin,
            grpc_addr,
            storage_type,
            configmap_name,
            preset,
            editable,
            restart_enabled,
            restart_type,
            restart_name,
            notification_enabled,
            notification_type,
            auth_enabled,
            auth_username,
            auth_password,
            pod_namespace,
        } = self;

        let Settings {
            legacy,
            notifier,
            notification_enabled,
            auth,
        } = Settings::new(
            LegacyConfig {
                namespace: Some(pod_namespace),
                storage: storage_type,
                config_map_name: configmap_name,
                presets: preset.as_deref().map(split_presets).unwrap_or_default(),
                editable: editable
                    .as_deref()
                    .map(EditableFields::parse)
                    .unwrap_or_default(),
                restart: RestartConfig {
                    enabled: restart_enabled,
                    kind: restart_type,
                    name: restart_name,
                },
            },
            (notification_type, notification_enabled),
            (auth_enabled, auth_username, auth_password),
        )?;

        let mut prom = <Registry>::default();
        let feature_metrics = FeatureMetrics::register(prom.sub_registry_with_prefix("feature"));
        let grpc_metrics =
            GrpcServerMetricsFamily::register(prom.sub_registry_with_prefix("grpc_server"));
        let rt_metrics = kubert::RuntimeMetrics::register(prom.sub_registry_with_prefix("kube"));

        let runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_metrics(rt_metrics)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .build()
            .await?;

        let notifier = notifier.build(notification_enabled);
        let env = std::env::vars().collect::<HashMap<_, _>>();
        let config = Config::load(legacy, &env)?;
        info!(
            applications = config.applications.len(),
            default = %config.default,
            "Loaded configuration"
        );

        let client = runtime.client();
        let applications = Applications::build(config, |app| {
            crate::mk_store(app, &client, &notifier)
        })?;
        applications.preset_all().await?;
        for app in applications.iter() {
            info!(
                application = %app.name,
                namespace = %app.namespace,
                storage = %app.storage,
                editable = ?app.editable.keys(),
                restart = app.restart.enabled,
                "Application ready"
            );
        }

        tokio::spawn(grpc(
            grpc_addr,
            Arc::new(applications),
            feature_metrics,
            grpc_metrics,
            auth,
            runtime.shutdown_handle(),
        ));

        // Block the main thread on the shutdown signal. Once it fires, wait for the background tasks to
        // complete before exiting.
        if runtime.run().await.is_err() {
            bail!("Aborted");
        }

        Ok(())
    }
}

// === impl Settings ===

impl Settings {
    fn new(
        legacy: LegacyConfig,
        (notifier, notification_enabled): (NotifierKind, bool),
        (auth_enabled, username, password): (bool, String, String),
    ) -> Result<Self> {
        let auth = if auth_enabled {
            if username.is_empty() {
                bail!("--auth-username must be set when authentication is enabled");
            }
            BasicAuth::new(username, password)
        } else {
            BasicAuth::disabled()
        };

        Ok(Self {
            legacy,
            notifier,
            notification_enabled,
            auth,
        })
    }
}

#[instrument(skip_all, fields(port = %addr.port()))]
async fn grpc(
    addr: SocketAddr,
    applications: Arc<Applications>,
    metrics: FeatureMetrics,
    grpc_metrics: GrpcServerMetricsFamily,
    auth: BasicAuth,
    drain: kubert::shutdown::Watch,
) -> Result<()> {
    let (health, health_svc) = tonic_health::server::health_reporter();
    health.set_serving::<FeatureServer<FeatureService>>().await;

    let feature_svc = FeatureService::new(applications, metrics, grpc_metrics).svc();
    let meta_svc = MetaService::new(SERVICE_NAME, env!("CARGO_PKG_VERSION")).svc();

    if auth.is_enabled() {
        info!("Basic authentication required for feature calls");
    }

    let (close_tx, close_rx) = tokio::sync::oneshot::channel();
    tokio::pin! {
        let srv = Server::builder()
            .layer(AuthLayer::new(auth))
            .add_service(health_svc)
            .add_service(meta_svc)
            .add_service(feature_svc)
            .serve_with_shutdown(addr, close_rx.map(|_| {}));
    }

    info!(%addr, "feature gRPC server listening");
    tokio::select! {
        res = (&mut srv) => res?,
        handle = drain.signaled() => {
            let _ = close_tx.send(());
            handle.release_after(srv).await?
        }
    }
    Ok(())
}
