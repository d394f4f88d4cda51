//! The HTTP control plane: the four `/cluster/v1/...` endpoints, bearer
//! auth, body-size limiting, and the refuse-to-start check for a
//! non-loopback bind without an auth token.

mod auth;
mod cache;
mod error;
mod routes;

use std::net::{IpAddr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

use axum::middleware;
use axum::Router;
use hive_election::Election;
use snafu::{ResultExt, Snafu};
use tokio::net::TcpListener;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

pub use cache::DeltaCache;
pub use error::{ApiError, ErrorBody};

const LOG_TARGET: &str = "hive::server";
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub election: Arc<Election>,
    pub cache: DeltaCache,
    pub auth_token: Option<String>,
}

#[derive(Debug, Snafu)]
pub enum ServerError {
    #[snafu(display("refusing to bind non-loopback host {host} without an auth_token"))]
    NonLoopbackWithoutAuth { host: String },
    #[snafu(display("failed to bind {addr}: {source}"))]
    Bind { addr: SocketAddr, source: std::io::Error },
    #[snafu(display("invalid listen address: {source}"))]
    InvalidAddr { source: std::io::Error },
    #[snafu(display("server error: {source}"))]
    Serve { source: std::io::Error },
}

pub type ServerResult<T> = std::result::Result<T, ServerError>;

fn is_loopback_host(host: &str) -> bool {
    host == "localhost"
        || host
            .parse::<IpAddr>()
            .map(|ip| ip.is_loopback())
            .unwrap_or(false)
}

pub struct Server {
    listener: TcpListener,
    router: Router,
}

impl Server {
    /// Binds the listener, refusing to start if `host` is not loopback and
    /// no `auth_token` is configured.
    pub async fn bind(host: &str, port: u16, state: AppState) -> ServerResult<Self> {
        if !is_loopback_host(host) && state.auth_token.is_none() {
            return NonLoopbackWithoutAuthSnafu { host: host.to_owned() }.fail();
        }

        let ip: IpAddr = host
            .parse()
            .or_else(|_| if host == "localhost" { Ok(IpAddr::V6(Ipv6Addr::LOCALHOST)) } else { Err(()) })
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "invalid listen host"))
            .context(InvalidAddrSnafu)?;
        let addr = SocketAddr::new(ip, port);

        let listener = TcpListener::bind(addr).await.context(BindSnafu { addr })?;
        tracing::info!(target: LOG_TARGET, %addr, "listening");

        let router = routes::router(state.clone())
            .layer(middleware::from_fn_with_state(state, auth::require_bearer_token))
            .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
            .layer(TraceLayer::new_for_http())
            .fallback(error::not_found);

        Ok(Self { listener, router })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn run(self, mut shutdown: tokio::sync::watch::Receiver<()>) -> ServerResult<()> {
        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.changed().await;
            })
            .await
            .context(ServeSnafu)
    }
}

#[cfg(test)]
mod tests {
    use hive_election::{Election, ElectionConfig};

    use super::*;

    fn disabled_state(auth_token: Option<String>) -> AppState {
        AppState {
            election: Arc::new(Election::disabled(ElectionConfig::default())),
            cache: DeltaCache::new(),
            auth_token,
        }
    }

    #[tokio::test]
    async fn refuses_non_loopback_host_without_auth_token() {
        let result = Server::bind("0.0.0.0", 0, disabled_state(None)).await;
        assert!(matches!(result, Err(ServerError::NonLoopbackWithoutAuth { .. })));
    }

    #[tokio::test]
    async fn non_loopback_host_with_auth_token_is_allowed() {
        let result = Server::bind("0.0.0.0", 0, disabled_state(Some("secret".into()))).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn loopback_host_without_auth_token_is_allowed() {
        let result = Server::bind("127.0.0.1", 0, disabled_state(None)).await;
        assert!(result.is_ok());
    }
}
