//! Selective HTTP Basic authentication for gRPC calls.
//!
//! Only calls whose path starts with one of the [`PROTECTED`] service prefixes are checked; health,
//! reflection and meta calls always pass through. Failures are answered with an `UNAUTHENTICATED`
//! status before the call reaches its service.

use base64::{engine::general_purpose, Engine as _};
use futures::future;
use std::{
    fmt,
    sync::Arc,
    task::{Context, Poll},
};
use tower::{Layer, Service};

/// Path prefixes of the services that require credentials.
pub const PROTECTED: &[&str] = &["/feature.v1.Feature/", "/workload.v1.Workload/"];

#[derive(Clone, Default, PartialEq, Eq)]
pub struct BasicAuth {
    enabled: bool,
    username: String,
    password: String,
}

#[derive(Clone, Debug)]
pub struct AuthLayer(Arc<BasicAuth>);

#[derive(Clone, Debug)]
pub struct Authenticate<S> {
    inner: S,
    auth: Arc<BasicAuth>,
}

// === impl BasicAuth ===

impl BasicAuth {
    /// Requires the given credentials on protected calls.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            enabled: true,
            username: username.into(),
            password: password.into(),
        }
    }

    /// Permits every call.
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Checks the credentials carried by a call to `path`.
    pub fn check(&self, path: &str, headers: &http::HeaderMap) -> Result<(), tonic::Status> {
        if !self.enabled || !is_protected(path) {
            return Ok(());
        }

        let Some(header) = headers.get(http::header::AUTHORIZATION) else {
            tracing::warn!(%path, "Missing authorization header");
            return Err(tonic::Status::unauthenticated("missing authorization header"));
        };

        let Some(credentials) = header
            .to_str()
            .ok()
            .and_then(|h| h.strip_prefix("Basic "))
            .and_then(|encoded| general_purpose::STANDARD.decode(encoded).ok())
            .and_then(|decoded| String::from_utf8(decoded).ok())
        else {
            tracing::warn!(%path, "Invalid authorization header");
            return Err(tonic::Status::unauthenticated("invalid authorization header"));
        };

        let Some((username, password)) = credentials.split_once(':') else {
            tracing::warn!(%path, "Invalid credentials format");
            return Err(tonic::Status::unauthenticated("invalid credentials format"));
        };

        if username != self.username || password != self.password {
            tracing::warn!(%path, %username, "Invalid credentials");
            return Err(tonic::Status::unauthenticated("invalid credentials"));
        }

        tracing::debug!(%path, %username, "Authenticated");
        Ok(())
    }
}

impl fmt::Debug for BasicAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicAuth")
            .field("enabled", &self.enabled)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

fn is_protected(path: &str) -> bool {
    PROTECTED.iter().any(|prefix| path.starts_with(prefix))
}

// === impl AuthLayer ===

impl AuthLayer {
    pub fn new(auth: BasicAuth) -> Self {
        Self(Arc::new(auth))
    }
}

impl<S> Layer<S> for AuthLayer {
    type Service = Authenticate<S>;

    fn layer(&self, inner: S) -> Self::Service {
        Authenticate {
            inner,
            auth: self.0.clone(),
        }
    }
}

// === impl Authenticate ===

impl<S, B, RspB> Service<http::Request<B>> for Authenticate<S>
where
    S: Service<http::Request<B>, Response = http::Response<RspB>>,
    RspB: Default,
{
    type Response = http::Response<RspB>;
    type Error = S::Error;
    type Future = future::Either<S::Future, future::Ready<Result<Self::Response, S::Error>>>;

    #[inline]
    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), S::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: http::Request<B>) -> Self::Future {
        match self.auth.check(req.uri().path(), req.headers()) {
            Ok(()) => future::Either::Left(self.inner.call(req)),
            Err(status) => future::Either::Right(future::ok(status.into_http())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;
    use tower::ServiceExt;

    const FEATURE_SET: &str = "/feature.v1.Feature/Set";

    fn basic(credentials: &str) -> String {
        format!("Basic {}", general_purpose::STANDARD.encode(credentials))
    }

    fn headers(authorization: Option<&str>) -> http::HeaderMap {
        let mut headers = http::HeaderMap::new();
        if let Some(value) = authorization {
            headers.insert(http::header::AUTHORIZATION, value.parse().unwrap());
        }
        headers
    }

    async fn call(auth: BasicAuth, path: &str, authorization: Option<&str>) -> http::Response<String> {
        let svc = AuthLayer::new(auth).layer(tower::service_fn(|_: http::Request<()>| async {
            Ok::<_, Infallible>(http::Response::new("handled".to_string()))
        }));

        let mut req = http::Request::builder().uri(path);
        if let Some(value) = authorization {
            req = req.header(http::header::AUTHORIZATION, value);
        }
        svc.oneshot(req.body(()).unwrap()).await.unwrap()
    }

    fn grpc_status(rsp: &http::Response<String>) -> Option<&str> {
        rsp.headers()
            .get("grpc-status")
            .and_then(|v| v.to_str().ok())
    }

    #[tokio::test]
    async fn disabled_passes_everything() {
        for authorization in [None, Some("Basic garbage"), Some(basic("x:y").as_str())] {
            let rsp = call(BasicAuth::disabled(), FEATURE_SET, authorization).await;
            assert_eq!(rsp.body(), "handled");
        }
    }

    #[tokio::test]
    async fn protected_calls_require_credentials() {
        let auth = BasicAuth::new("admin", "secret");

        let rsp = call(auth.clone(), FEATURE_SET, None).await;
        assert_eq!(grpc_status(&rsp), Some("16"));
        assert_eq!(rsp.body(), "");

        let rsp = call(auth.clone(), FEATURE_SET, Some(&basic("admin:wrong"))).await;
        assert_eq!(grpc_status(&rsp), Some("16"));

        let rsp = call(auth.clone(), "/workload.v1.Workload/Restart", None).await;
        assert_eq!(grpc_status(&rsp), Some("16"));

        let rsp = call(auth, FEATURE_SET, Some(&basic("admin:secret"))).await;
        assert_eq!(rsp.body(), "handled");
    }

    #[tokio::test]
    async fn streaming_calls_require_credentials() {
        let auth = BasicAuth::new("admin", "secret");
        for path in [
            "/feature.v1.Feature/GetAll",
            "/feature.v1.Feature/GetApplications",
        ] {
            let rsp = call(auth.clone(), path, None).await;
            assert_eq!(grpc_status(&rsp), Some("16"), "{path}");
            assert_eq!(rsp.body(), "", "{path}");

            let rsp = call(auth.clone(), path, Some(&basic("admin:wrong"))).await;
            assert_eq!(grpc_status(&rsp), Some("16"), "{path}");

            let rsp = call(auth.clone(), path, Some(&basic("admin:secret"))).await;
            assert_eq!(rsp.body(), "handled", "{path}");
        }
    }

    #[tokio::test]
    async fn unprotected_calls_pass_without_credentials() {
        let auth = BasicAuth::new("admin", "secret");
        for path in [
            "/grpc.health.v1.Health/Check",
            "/meta.v1.Meta/Meta",
            "/grpc.reflection.v1.ServerReflection/ServerReflectionInfo",
        ] {
            let rsp = call(auth.clone(), path, Some(&basic("admin:wrong"))).await;
            assert_eq!(rsp.body(), "handled", "{path}");
        }
    }

    #[test]
    fn rejection_messages() {
        let auth = BasicAuth::new("admin", "secret");
        let cases = [
            (None, "missing authorization header"),
            (Some("Bearer token".to_string()), "invalid authorization header"),
            (Some("Basic !!!".to_string()), "invalid authorization header"),
            (Some(basic("admin")), "invalid credentials format"),
            (Some(basic("admin:wrong")), "invalid credentials"),
            (Some(basic("other:secret")), "invalid credentials"),
        ];
        for (authorization, message) in cases {
            let status = auth
                .check(FEATURE_SET, &headers(authorization.as_deref()))
                .expect_err("must be rejected");
            assert_eq!(status.code(), tonic::Code::Unauthenticated);
            assert_eq!(status.message(), message);
        }
    }

    #[test]
    fn password_may_contain_colons() {
        let auth = BasicAuth::new("admin", "se:cret");
        auth.check(FEATURE_SET, &headers(Some(&basic("admin:se:cret"))))
            .expect("credentials must be accepted");
    }

    #[test]
    fn debug_hides_password() {
        let auth = BasicAuth::new("admin", "secret");
        assert!(!format!("{auth:?}").contains("secret"));
    }
}
