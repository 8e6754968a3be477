pub mod api;
pub mod auth;
pub mod bootstrap;
pub mod config;
pub mod credential;
pub mod loghub;
pub mod queue;
pub mod registry;
pub mod repo;
pub mod service;

pub use krepro_common::logingest;

use crate::api::Apis;
use crate::bootstrap::Services;
use crate::config::CoordinatorConfig;
use anyhow::Context;
use include_dir::{include_dir, Dir};
use poem::listener::{Acceptor, Listener, TcpListener};
use poem::middleware::Cors;
use poem::{EndpointExt, Route};
use poem_openapi::OpenApiService;
use std::net::{Ipv4Addr, SocketAddrV4};
use tokio::task::JoinSet;
use tracing::info;

#[cfg(test)]
test_r::enable!();

static DB_MIGRATIONS: Dir = include_dir!("$CARGO_MANIFEST_DIR/db/migrations");

/// Runs every embedded migration file, in path order, against `pool`. Exposed
/// so integration tests can bring up a disposable database the same way the
/// binary entrypoint does.
pub async fn run_migrations(pool: &sqlx::PgPool) -> anyhow::Result<()> {
    for file in DB_MIGRATIONS.files() {
        let sql = file.contents_utf8().expect("migration file is utf8");
        sqlx::raw_sql(sql)
            .execute(pool)
            .await
            .with_context(|| format!("running migration {}", file.path().display()))?;
    }
    Ok(())
}

pub struct RunDetails {
    pub http_port: u16,
    pub grpc_port: u16,
}

#[derive(Clone)]
pub struct Coordinator {
    config: CoordinatorConfig,
    services: Services,
}

impl Coordinator {
    pub async fn new(config: CoordinatorConfig) -> anyhow::Result<Self> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(config.db.max_connections())
            .connect(&config.db.connection_string())
            .await
            .context("connecting to postgres")?;

        run_migrations(&pool).await?;

        let services = Services::new(&config, pool).await?;

        Ok(Coordinator { config, services })
    }

    pub fn http_service(&self) -> OpenApiService<Apis, ()> {
        api::make_open_api_service(&self.services, &self.config)
    }

    pub async fn run(&self, join_set: &mut JoinSet<anyhow::Result<()>>) -> anyhow::Result<RunDetails> {
        let grpc_port = self.start_grpc_server(join_set).await?;
        let http_port = self.start_http_server(join_set).await?;
        info!(http_port, grpc_port, "coordinator started");
        Ok(RunDetails {
            http_port,
            grpc_port,
        })
    }

    async fn start_grpc_server(&self, join_set: &mut JoinSet<anyhow::Result<()>>) -> anyhow::Result<u16> {
        let addr: std::net::SocketAddr =
            SocketAddrV4::new(Ipv4Addr::new(0, 0, 0, 0), self.config.grpc_port).into();
        let listener = tokio::net::TcpListener::bind(addr).await?;
        let port = listener.local_addr()?.port();
        let grpc_service = crate::api::logs_grpc::LogIngestService::new(self.services.log_hub.clone());

        join_set.spawn(async move {
            tonic::transport::Server::builder()
                .add_service(crate::logingest::log_ingest_server::LogIngestServer::new(
                    grpc_service,
                ))
                .serve_with_incoming(tokio_stream::wrappers::TcpListenerStream::new(listener))
                .await
                .map_err(Into::into)
        });

        Ok(port)
    }

    async fn start_http_server(&self, join_set: &mut JoinSet<anyhow::Result<()>>) -> anyhow::Result<u16> {
        let api_service = self.http_service();
        let ui = api_service.swagger_ui();
        let spec = api_service.spec_endpoint_yaml();

        let cors = Cors::new()
            .allow_methods(["GET", "POST", "PUT", "PATCH", "DELETE", "OPTIONS"])
            .expose_header("content-length");

        let app = Route::new()
            .nest("/", api_service)
            .nest("/docs", ui)
            .nest("/specs", spec)
            .at("/api/v1/tasks/:id/artifact", poem::post(api::artifacts::upload_artifact))
            .at("/api/v1/artifacts/:id", poem::get(api::artifacts::download_artifact))
            .at("/api/v1/logs/ws", poem::get(api::logs_ws::logs_ws))
            .with(cors)
            .data(self.services.clone());

        let listener = TcpListener::bind(format!("0.0.0.0:{}", self.config.http_port));
        let acceptor = listener.into_acceptor().await?;
        let port = acceptor.local_addr()[0]
            .as_socket_addr()
            .expect("socket address")
            .port();

        join_set.spawn(async move {
            poem::Server::new_with_acceptor(acceptor)
                .run(app)
                .await
                .map_err(Into::into)
        });

        Ok(port)
    }
}
