use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Result;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use clap::Parser;
use myinfo_api::{AppConfig, AppIdentity, MyInfoApi, API_CONTRACT_VERSION};
use myinfo_core::{Category, FieldDefinition};
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

const SERVICE_CONTRACT_VERSION: &str = "service.v1";
const OPENAPI_YAML: &str = include_str!("../../../openapi/openapi.yaml");

#[derive(Debug, Clone)]
struct ServiceState {
    api: MyInfoApi,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceEnvelope<T>
where
    T: Serialize,
{
    service_contract_version: &'static str,
    api_contract_version: &'static str,
    data: T,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceError {
    service_contract_version: &'static str,
    error: String,
    #[serde(skip)]
    status: StatusCode,
}

#[derive(Debug, Clone, Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Debug, Clone, Deserialize)]
struct FieldsQuery {
    category: Option<String>,
}

#[derive(Debug, Parser)]
#[command(name = "myinfo-service")]
#[command(about = "Local HTTP service exposing the MyInfo field catalog")]
struct Args {
    /// Keep every file under this directory instead of the per-user data dir.
    #[arg(long)]
    data_dir: Option<PathBuf>,
    #[arg(long, default_value = "127.0.0.1:8080")]
    bind: SocketAddr,
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status;
        (status, Json(self)).into_response()
    }
}

impl ServiceState {
    fn error(status: StatusCode, message: impl Into<String>) -> ServiceError {
        ServiceError {
            service_contract_version: SERVICE_CONTRACT_VERSION,
            error: message.into(),
            status,
        }
    }

    fn internal(err: &anyhow::Error) -> ServiceError {
        tracing::error!(error = %format!("{err:#}"), "catalog request failed");
        Self::error(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
    }
}

fn envelope<T>(data: T) -> ServiceEnvelope<T>
where
    T: Serialize,
{
    ServiceEnvelope {
        service_contract_version: SERVICE_CONTRACT_VERSION,
        api_contract_version: API_CONTRACT_VERSION,
        data,
    }
}

fn app(state: ServiceState) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/openapi", get(openapi))
        .route("/v1/fields", get(list_fields))
        .route("/v1/fields/:id", get(get_field))
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();

    let args = Args::parse();
    let config = match args.data_dir {
        Some(dir) => AppConfig::rooted_at(dir),
        None => AppConfig::default_for_platform(&AppIdentity::default())?,
    };
    let api = MyInfoApi::new(config);
    api.initialize()?;

    let listener = tokio::net::TcpListener::bind(args.bind).await?;
    tracing::info!(bind = %args.bind, "myinfo service listening");
    axum::serve(listener, app(ServiceState { api })).await?;
    Ok(())
}

async fn health() -> Json<ServiceEnvelope<HealthResponse>> {
    Json(envelope(HealthResponse { status: "ok" }))
}

async fn openapi() -> impl IntoResponse {
    (StatusCode::OK, [("content-type", "application/yaml; charset=utf-8")], OPENAPI_YAML)
}

async fn list_fields(
    State(state): State<ServiceState>,
    Query(query): Query<FieldsQuery>,
) -> Result<Json<ServiceEnvelope<Vec<FieldDefinition>>>, ServiceError> {
    let fields = match query.category.as_deref() {
        Some(raw) => {
            let category = Category::parse(raw).ok_or_else(|| {
                ServiceState::error(StatusCode::BAD_REQUEST, format!("unknown category: {raw}"))
            })?;
            state.api.get_fields_by_category(category)
        }
        None => state.api.get_all_fields(),
    }
    .map_err(|err| ServiceState::internal(&err))?;
    Ok(Json(envelope(fields)))
}

async fn get_field(
    State(state): State<ServiceState>,
    Path(id): Path<i64>,
) -> Result<Json<ServiceEnvelope<FieldDefinition>>, ServiceError> {
    let field = state.api.get_field_by_id(id).map_err(|err| ServiceState::internal(&err))?;
    field.map(|field| Json(envelope(field))).ok_or_else(|| {
        ServiceState::error(StatusCode::NOT_FOUND, format!("field {id} does not exist"))
    })
}
