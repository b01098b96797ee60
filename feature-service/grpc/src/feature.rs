use crate::{
    api::feature::v1::{
        self as proto,
        feature_server::{Feature, FeatureServer},
    },
    metrics::{FeatureMetrics, GrpcServerMetricsFamily, GrpcServerRpcMetrics, Operation},
};
use feature_service_core::{
    application, editable::Denied, persistence, Application, Applications, KeyValue,
};
use futures::prelude::*;
use std::{pin::Pin, sync::Arc};

/// Serves the `feature.v1.Feature` API from the application table.
#[derive(Clone, Debug)]
pub struct FeatureService {
    applications: Arc<Applications>,
    metrics: FeatureMetrics,
    rpc: RpcMetrics,
}

#[derive(Clone, Debug)]
struct RpcMetrics {
    get_all: GrpcServerRpcMetrics,
    get: GrpcServerRpcMetrics,
    set: GrpcServerRpcMetrics,
    pre_set: GrpcServerRpcMetrics,
    delete: GrpcServerRpcMetrics,
    get_applications: GrpcServerRpcMetrics,
}

type BoxStream<T> = Pin<Box<dyn Stream<Item = Result<T, tonic::Status>> + Send + Sync>>;

// === impl FeatureService ===

impl FeatureService {
    pub fn new(
        applications: Arc<Applications>,
        metrics: FeatureMetrics,
        grpc: GrpcServerMetricsFamily,
    ) -> Self {
        Self {
            applications,
            metrics,
            rpc: RpcMetrics::new(grpc),
        }
    }

    pub fn svc(self) -> FeatureServer<Self> {
        FeatureServer::new(self)
    }

    fn application(&self, name: &str) -> Result<&Arc<Application>, tonic::Status> {
        self.applications.get(name).map_err(application_status)
    }

    /// Reads the store size after a mutation and publishes it.
    async fn report_count(&self, app: &Application) -> Result<(), tonic::Status> {
        let count = app
            .persistence
            .count()
            .await
            .map_err(|e| persistence_status(&app.name, e))?;
        self.metrics.set_active(&app.name, count);
        Ok(())
    }

    async fn list_features(
        &self,
        application: &str,
    ) -> Result<Vec<proto::KeyValue>, tonic::Status> {
        let app = self.application(application)?;
        self.metrics.request(&app.name, Operation::GetAll);

        let kvs = app
            .persistence
            .get_all()
            .await
            .map_err(|e| persistence_status(&app.name, e))?;
        self.metrics.set_active(&app.name, kvs.len());
        tracing::debug!(application = %app.name, count = kvs.len(), "Listing features");

        Ok(kvs
            .into_iter()
            .map(|KeyValue { key, value }| proto::KeyValue {
                editable: app.editable.is_editable(&key),
                key,
                value,
                application: app.name.clone(),
            })
            .collect())
    }

    async fn get_feature(
        &self,
        proto::Key { name, application }: proto::Key,
    ) -> Result<proto::Value, tonic::Status> {
        let app = self.application(&application)?;
        self.metrics.request(&app.name, Operation::Get);

        let KeyValue { value, .. } = app
            .persistence
            .get(&name)
            .await
            .map_err(|e| persistence_status(&app.name, e))?;
        Ok(proto::Value { value })
    }

    async fn set_feature(&self, kv: proto::KeyValue) -> Result<(), tonic::Status> {
        let proto::KeyValue {
            key,
            value,
            application,
            ..
        } = kv;
        let app = self.application(&application)?;
        self.metrics.request(&app.name, Operation::Set);

        if app.editable.is_restricted() {
            // Keys absent from the current snapshot would be created.
            let exists = app
                .persistence
                .get_all()
                .await
                .map_err(|e| persistence_status(&app.name, e))?
                .iter()
                .any(|kv| kv.key == key);
            app.editable
                .check_set(&key, exists)
                .map_err(|denied| denied_status(&app.name, &key, denied))?;
        }

        tracing::info!(application = %app.name, %key, %value, "Setting feature");
        app.persistence
            .set(KeyValue::new(key, value))
            .await
            .map_err(|e| persistence_status(&app.name, e))?;
        self.report_count(app).await
    }

    async fn pre_set_feature(&self, kv: proto::KeyValue) -> Result<(), tonic::Status> {
        let proto::KeyValue {
            key,
            value,
            application,
            ..
        } = kv;
        let app = self.application(&application)?;
        self.metrics.request(&app.name, Operation::PreSet);

        tracing::info!(application = %app.name, %key, %value, "Pre-setting feature");
        app.persistence
            .pre_set(KeyValue::new(key, value))
            .await
            .map_err(|e| persistence_status(&app.name, e))?;
        self.report_count(app).await
    }

    async fn delete_feature(
        &self,
        proto::Key { name, application }: proto::Key,
    ) -> Result<(), tonic::Status> {
        let app = self.application(&application)?;
        self.metrics.request(&app.name, Operation::Delete);

        app.editable
            .check_delete()
            .map_err(|denied| denied_status(&app.name, &name, denied))?;

        tracing::info!(application = %app.name, key = %name, "Deleting feature");
        app.persistence
            .delete(&name)
            .await
            .map_err(|e| persistence_status(&app.name, e))?;
        self.report_count(app).await
    }

    fn list_applications(&self) -> Vec<proto::Application> {
        self.applications
            .iter()
            .map(|app| proto::Application {
                name: app.name.clone(),
                namespace: app.namespace.clone(),
                storage_type: app.storage.to_string(),
            })
            .collect()
    }
}

#[async_trait::async_trait]
impl Feature for FeatureService {
    type GetAllStream = BoxStream<proto::KeyValue>;

    async fn get_all(
        &self,
        req: tonic::Request<proto::GetAllRequest>,
    ) -> Result<tonic::Response<Self::GetAllStream>, tonic::Status> {
        let observer = self.rpc.get_all.start();
        let proto::GetAllRequest { application } = req.into_inner();
        match self.list_features(&application).await {
            Ok(items) => Ok(tonic::Response::new(Box::pin(async_stream::stream! {
                for item in items {
                    observer.msg_sent();
                    yield Ok::<_, tonic::Status>(item);
                }
                observer.end(tonic::Code::Ok);
            }))),
            Err(status) => {
                observer.end(status.code());
                Err(status)
            }
        }
    }

    async fn get(
        &self,
        req: tonic::Request<proto::Key>,
    ) -> Result<tonic::Response<proto::Value>, tonic::Status> {
        let observer = self.rpc.get.start();
        let res = self.get_feature(req.into_inner()).await;
        observer.observe(res.map(tonic::Response::new))
    }

    async fn set(
        &self,
        req: tonic::Request<proto::KeyValue>,
    ) -> Result<tonic::Response<()>, tonic::Status> {
        let observer = self.rpc.set.start();
        let res = self.set_feature(req.into_inner()).await;
        observer.observe(res.map(tonic::Response::new))
    }

    async fn pre_set(
        &self,
        req: tonic::Request<proto::KeyValue>,
    ) -> Result<tonic::Response<()>, tonic::Status> {
        let observer = self.rpc.pre_set.start();
        let res = self.pre_set_feature(req.into_inner()).await;
        observer.observe(res.map(tonic::Response::new))
    }

    async fn delete(
        &self,
        req: tonic::Request<proto::Key>,
    ) -> Result<tonic::Response<()>, tonic::Status> {
        let observer = self.rpc.delete.start();
        let res = self.delete_feature(req.into_inner()).await;
        observer.observe(res.map(tonic::Response::new))
    }

    type GetApplicationsStream = BoxStream<proto::Application>;

    async fn get_applications(
        &self,
        _req: tonic::Request<proto::ApplicationsRequest>,
    ) -> Result<tonic::Response<Self::GetApplicationsStream>, tonic::Status> {
        let observer = self.rpc.get_applications.start();
        let apps = self.list_applications();
        Ok(tonic::Response::new(Box::pin(async_stream::stream! {
            for app in apps {
                observer.msg_sent();
                yield Ok::<_, tonic::Status>(app);
            }
            observer.end(tonic::Code::Ok);
        })))
    }
}

// === impl RpcMetrics ===

impl RpcMetrics {
    fn new(family: GrpcServerMetricsFamily) -> Self {
        const SVC: &str = "feature.v1.Feature";
        Self {
            get_all: family.server_stream_rpc(SVC, "GetAll"),
            get: family.unary_rpc(SVC, "Get"),
            set: family.unary_rpc(SVC, "Set"),
            pre_set: family.unary_rpc(SVC, "PreSet"),
            delete: family.unary_rpc(SVC, "Delete"),
            get_applications: family.server_stream_rpc(SVC, "GetApplications"),
        }
    }
}

fn application_status(error: application::Error) -> tonic::Status {
    match error {
        application::Error::ApplicationNotFound(_) => tonic::Status::not_found(error.to_string()),
        error => tonic::Status::internal(error.to_string()),
    }
}

fn persistence_status(application: &str, error: persistence::Error) -> tonic::Status {
    match error {
        persistence::Error::KeyNotFound(_) => tonic::Status::not_found(error.to_string()),
        persistence::Error::Backend(ref source) => {
            tracing::warn!(%application, error = %source, "Storage backend failed");
            tonic::Status::unavailable(source.to_string())
        }
        persistence::Error::Notify(_) => {
            tracing::warn!(%application, %error, "Notification failed");
            tonic::Status::internal(error.to_string())
        }
    }
}

fn denied_status(application: &str, key: &str, denied: Denied) -> tonic::Status {
    tracing::info!(%application, %key, reason = %denied, "Edit denied");
    tonic::Status::permission_denied(denied.to_string())
}

#[cfg(test)]
mod tests;
