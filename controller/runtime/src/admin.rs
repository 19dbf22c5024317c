use anyhow::{Context, Result};
use bytes::Bytes;
use hyper::{
    body::Incoming,
    header::{self, HeaderValue},
    server::conn::http1,
    service::service_fn,
    Method, Request, Response, StatusCode,
};
use hyper_util::rt::TokioIo;
use prometheus_client::{encoding::text::encode, registry::Registry};
use std::{
    convert::Infallible,
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

type Body = http_body_util::Full<Bytes>;

const OPENMETRICS: &str = "application/openmetrics-text; version=1.0.0; charset=utf-8";

/// Serves `/metrics`, `/ready` and `/live`.
#[derive(Clone, Debug)]
pub struct Admin {
    registry: Arc<Registry>,
    ready: Readiness,
}

/// Flips the admin server's `/ready` endpoint.
#[derive(Clone, Debug, Default)]
pub struct Readiness(Arc<AtomicBool>);

// === impl Admin ===

impl Admin {
    pub fn new(registry: Registry) -> Self {
        Self {
            registry: Arc::new(registry),
            ready: Readiness::default(),
        }
    }

    pub fn readiness(&self) -> Readiness {
        self.ready.clone()
    }

    pub async fn serve(self, addr: SocketAddr) -> Result<()> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind admin server on {addr}"))?;
        info!(addr = %listener.local_addr()?, "Admin server listening");

        loop {
            let (io, peer) = match listener.accept().await {
                Ok(conn) => conn,
                Err(error) => {
                    warn!(%error, "Failed to accept admin connection");
                    continue;
                }
            };

            let admin = self.clone();
            tokio::spawn(async move {
                let svc = service_fn(move |req: Request<Incoming>| {
                    let rsp = admin.route(req.method(), req.uri().path());
                    async move { Ok::<_, Infallible>(rsp) }
                });
                if let Err(error) = http1::Builder::new()
                    .serve_connection(TokioIo::new(io), svc)
                    .await
                {
                    debug!(%error, %peer, "Admin connection failed");
                }
            });
        }
    }

    fn route(&self, method: &Method, path: &str) -> Response<Body> {
        match path {
            "/metrics" | "/ready" | "/live" if *method != Method::GET => {
                respond(StatusCode::METHOD_NOT_ALLOWED, "method not allowed\n")
            }
            "/metrics" => self.metrics(),
            "/ready" if self.ready.is_ready() => respond(StatusCode::OK, "ready\n"),
            "/ready" => respond(StatusCode::INTERNAL_SERVER_ERROR, "not ready\n"),
            "/live" => respond(StatusCode::OK, "live\n"),
            _ => respond(StatusCode::NOT_FOUND, "not found\n"),
        }
    }

    fn metrics(&self) -> Response<Body> {
        let mut text = String::new();
        if let Err(error) = encode(&mut text, &self.registry) {
            warn!(%error, "Failed to encode metrics");
            return respond(StatusCode::INTERNAL_SERVER_ERROR, "failed to encode metrics\n");
        }
        let mut rsp = Response::new(Body::from(text));
        rsp.headers_mut()
            .insert(header::CONTENT_TYPE, HeaderValue::from_static(OPENMETRICS));
        rsp
    }
}

fn respond(status: StatusCode, body: &'static str) -> Response<Body> {
    let mut rsp = Response::new(Body::from(body));
    *rsp.status_mut() = status;
    rsp.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    rsp
}

// === impl Readiness ===

impl Readiness {
    pub fn set(&self, ready: bool) {
        self.0.store(ready, Ordering::Release);
    }

    pub fn is_ready(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use pretty_assertions::assert_eq;
    use prometheus_client::metrics::counter::Counter;

    async fn body(rsp: Response<Body>) -> String {
        let bytes = rsp.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn ready_once_set() {
        let admin = Admin::new(Registry::default());
        assert_eq!(
            admin.route(&Method::GET, "/ready").status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );

        admin.readiness().set(true);
        let rsp = admin.route(&Method::GET, "/ready");
        assert_eq!(rsp.status(), StatusCode::OK);
        assert_eq!(body(rsp).await, "ready\n");
    }

    #[test]
    fn live_regardless_of_readiness() {
        let admin = Admin::new(Registry::default());
        assert_eq!(admin.route(&Method::GET, "/live").status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn metrics_are_encoded() {
        let mut registry = Registry::default();
        let sweeps = Counter::<u64>::default();
        registry
            .sub_registry_with_prefix("resolver")
            .register("sweeps", "Total number of completed address sweeps", sweeps.clone());
        sweeps.inc_by(3);

        let rsp = Admin::new(registry).route(&Method::GET, "/metrics");
        assert_eq!(rsp.status(), StatusCode::OK);
        assert_eq!(
            rsp.headers().get(header::CONTENT_TYPE).unwrap(),
            OPENMETRICS
        );
        let text = body(rsp).await;
        assert!(text.contains("resolver_sweeps_total 3"), "{text}");
        assert!(text.ends_with("# EOF\n"), "{text}");
    }

    #[test]
    fn unknown_paths_and_methods() {
        let admin = Admin::new(Registry::default());
        assert_eq!(
            admin.route(&Method::GET, "/debug").status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            admin.route(&Method::POST, "/metrics").status(),
            StatusCode::METHOD_NOT_ALLOWED
        );
        assert_eq!(
            admin.route(&Method::DELETE, "/ready").status(),
            StatusCode::METHOD_NOT_ALLOWED
        );
    }

    #[test]
    fn readiness_is_shared() {
        let admin = Admin::new(Registry::default());
        let ready = admin.readiness();
        ready.set(true);
        assert_eq!(admin.route(&Method::GET, "/ready").status(), StatusCode::OK);
        ready.set(false);
        assert!(!admin.readiness().is_ready());
    }
}
