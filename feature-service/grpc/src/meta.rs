use crate::api::meta::v1::{
    meta_server::{Meta, MetaServer},
    MetaRequest, MetaResponse,
};

/// Reports the name and version of the running service.
#[derive(Clone, Debug)]
pub struct MetaService {
    service_name: String,
    version: String,
}

// === impl MetaService ===

impl MetaService {
    pub fn new(service_name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            version: version.into(),
        }
    }

    pub fn svc(self) -> MetaServer<Self> {
        MetaServer::new(self)
    }
}

#[async_trait::async_trait]
impl Meta for MetaService {
    async fn meta(
        &self,
        _req: tonic::Request<MetaRequest>,
    ) -> Result<tonic::Response<MetaResponse>, tonic::Status> {
        Ok(tonic::Response::new(MetaResponse {
            service_name: self.service_name.clone(),
            version: self.version.clone(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reports_name_and_version() {
        let svc = MetaService::new("feature-service", "1.2.3");
        let rsp = svc
            .meta(tonic::Request::new(MetaRequest {}))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(
            rsp,
            MetaResponse {
                service_name: "feature-service".to_string(),
                version: "1.2.3".to_string(),
            }
        );
    }
}
