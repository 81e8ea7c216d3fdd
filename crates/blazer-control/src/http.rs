use axum::{
    Extension, Json, Router,
    body::Bytes,
    extract::{
        Path, State,
        rejection::{JsonRejection, PathRejection},
    },
    http::{HeaderMap, StatusCode, header},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use blazer_agent::{CreateInstance, LifecycleError};
use blazer_process::{Instance, InstanceId, LaunchConfig, StopReport};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::namespace::NamespaceOptions;
use crate::security::{self, RequestMeta};
use crate::state::AppState;

const DEFAULT_IP_ADDRESS: &str = "localhost";
const DEFAULT_SPARQL_CONTENT_TYPE: &str = "application/sparql-query";

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/create_instance", post(create_instance))
        .route("/start_instance", post(start_instance))
        .route("/stop_instance", post(stop_instance))
        .route("/get_all_instances", get(get_all_instances))
        .route("/instances/:id", get(get_instance))
        .route(
            "/instances/:id/namespaces",
            get(list_namespaces).post(create_namespace),
        )
        .route(
            "/instances/:id/namespaces/:namespace/sparql",
            post(forward_sparql),
        )
        .layer(middleware::from_fn_with_state(
            state.clone(),
            security::read_only_guard,
        ))
        .layer(middleware::from_fn(security::request_id))
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct HealthzResponse {
    status: &'static str,
    version: &'static str,
    read_only: bool,
}

async fn healthz(State(state): State<AppState>) -> Json<HealthzResponse> {
    Json(HealthzResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        read_only: state.read_only,
    })
}

/// Body of `POST /create_instance`. Everything is optional at the serde level
/// so that missing fields come back as `invalid` rather than a bare 422.
#[derive(Debug, Default, Deserialize)]
pub struct CreateInstanceBody {
    pub instance_name: Option<String>,
    pub port: Option<i64>,
    pub install_path: Option<String>,
    pub min_memory: Option<String>,
    pub max_memory: Option<String>,
    pub ip_address: Option<String>,
}

fn non_empty(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

impl CreateInstanceBody {
    pub fn into_request(self) -> Result<CreateInstance, String> {
        let (Some(name), Some(port), Some(install_path)) = (
            non_empty(self.instance_name),
            self.port,
            non_empty(self.install_path),
        ) else {
            return Err("instance_name, port, and install_path are required".to_string());
        };
        let port = u16::try_from(port)
            .map_err(|_| format!("port must be between 1 and 65535, got {port}"))?;

        Ok(CreateInstance {
            name,
            port,
            config: LaunchConfig {
                install_path,
                min_memory: non_empty(self.min_memory),
                max_memory: non_empty(self.max_memory),
                ip_address: non_empty(self.ip_address)
                    .unwrap_or_else(|| DEFAULT_IP_ADDRESS.to_string()),
            },
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct IdBody {
    pub id: Option<i32>,
}

fn parse_id(body: Result<Json<IdBody>, JsonRejection>, rid: &str) -> Result<InstanceId, ApiError> {
    let Json(body) = body.map_err(|e| ApiError::invalid(e.body_text(), rid))?;
    body.id
        .map(InstanceId)
        .ok_or_else(|| ApiError::invalid("Instance ID is required", rid))
}

fn path_id(path: Result<Path<i32>, PathRejection>, rid: &str) -> Result<InstanceId, ApiError> {
    let Path(id) = path.map_err(|e| ApiError::invalid(e.body_text(), rid))?;
    Ok(InstanceId(id))
}

fn lifecycle(rid: &str) -> impl Fn(LifecycleError) -> ApiError + '_ {
    move |err| {
        tracing::warn!(request_id = rid, code = err.code(), error = %err, "lifecycle request failed");
        ApiError::from_lifecycle(&err, rid)
    }
}

async fn create_instance(
    State(state): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    body: Result<Json<CreateInstanceBody>, JsonRejection>,
) -> Result<(StatusCode, Json<Instance>), ApiError> {
    let rid = meta.request_id.as_str();
    let Json(body) = body.map_err(|e| ApiError::invalid(e.body_text(), rid))?;
    let req = body
        .into_request()
        .map_err(|msg| ApiError::invalid(msg, rid))?;

    tracing::info!(request_id = rid, instance = %req.name, port = req.port, "create_instance");
    let inst = state
        .manager
        .create_and_run(req)
        .await
        .map_err(lifecycle(rid))?;
    Ok((StatusCode::CREATED, Json(inst)))
}

async fn start_instance(
    State(state): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    body: Result<Json<IdBody>, JsonRejection>,
) -> Result<Json<Instance>, ApiError> {
    let rid = meta.request_id.as_str();
    let id = parse_id(body, rid)?;
    tracing::info!(request_id = rid, %id, "start_instance");
    let inst = state.manager.start(id).await.map_err(lifecycle(rid))?;
    Ok(Json(inst))
}

async fn stop_instance(
    State(state): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    body: Result<Json<IdBody>, JsonRejection>,
) -> Result<Json<StopReport>, ApiError> {
    let rid = meta.request_id.as_str();
    let id = parse_id(body, rid)?;
    tracing::info!(request_id = rid, %id, "stop_instance");
    let report = state.manager.stop(id).await.map_err(lifecycle(rid))?;
    Ok(Json(report))
}

async fn get_all_instances(
    State(state): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
) -> Result<Json<Vec<Instance>>, ApiError> {
    let rid = meta.request_id.as_str();
    let all = state.manager.list_all().await.map_err(lifecycle(rid))?;
    Ok(Json(all))
}

async fn find_instance(state: &AppState, id: InstanceId, rid: &str) -> Result<Instance, ApiError> {
    state
        .manager
        .get_by_id(id)
        .await
        .map_err(lifecycle(rid))?
        .ok_or_else(|| ApiError::from_lifecycle(&LifecycleError::NotFound(id), rid))
}

async fn get_instance(
    State(state): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    path: Result<Path<i32>, PathRejection>,
) -> Result<Json<Instance>, ApiError> {
    let rid = meta.request_id.as_str();
    let id = path_id(path, rid)?;
    Ok(Json(find_instance(&state, id, rid).await?))
}

#[derive(Debug, Serialize)]
struct MessageBody {
    message: String,
}

#[derive(Debug, Serialize)]
struct NamespaceList {
    namespaces: Vec<String>,
}

async fn list_namespaces(
    State(state): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    path: Result<Path<i32>, PathRejection>,
) -> Result<Json<NamespaceList>, ApiError> {
    let rid = meta.request_id.as_str();
    let id = path_id(path, rid)?;
    let inst = find_instance(&state, id, rid).await?;

    let namespaces = state
        .namespaces
        .list(&inst)
        .await
        .map_err(|e| ApiError::from_namespace(&e, rid))?;
    Ok(Json(NamespaceList { namespaces }))
}

async fn create_namespace(
    State(state): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    path: Result<Path<i32>, PathRejection>,
    body: Result<Json<NamespaceOptions>, JsonRejection>,
) -> Result<Json<MessageBody>, ApiError> {
    let rid = meta.request_id.as_str();
    let id = path_id(path, rid)?;
    let Json(opts) = body.map_err(|e| ApiError::invalid(e.body_text(), rid))?;
    let inst = find_instance(&state, id, rid).await?;

    let message = state
        .namespaces
        .create(&inst, &opts)
        .await
        .map_err(|e| ApiError::from_namespace(&e, rid))?;
    Ok(Json(MessageBody { message }))
}

async fn forward_sparql(
    State(state): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    path: Result<Path<(i32, String)>, PathRejection>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let rid = meta.request_id.as_str();
    let Path((id, namespace)) = path.map_err(|e| ApiError::invalid(e.body_text(), rid))?;
    let inst = find_instance(&state, InstanceId(id), rid).await?;

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or(DEFAULT_SPARQL_CONTENT_TYPE);
    let reply = state
        .namespaces
        .forward_sparql(&inst, &namespace, content_type, body.to_vec())
        .await
        .map_err(|e| ApiError::from_namespace(&e, rid))?;

    let status = StatusCode::from_u16(reply.status).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut resp = (status, reply.body).into_response();
    if let Some(ct) = reply
        .content_type
        .and_then(|v| header::HeaderValue::from_str(&v).ok())
    {
        resp.headers_mut().insert(header::CONTENT_TYPE, ct);
    }
    Ok(resp)
}
