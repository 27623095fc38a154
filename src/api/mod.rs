//! HTTP API under `/gis/v1`.
//!
//! Provides:
//! - `/gis/v1/automation` - automation states
//! - `/gis/v1/automation/:type` - get or set (`?run=bool`) one automation
//! - `/gis/v1/geodata` - geo data of all assets (`?assetType=`)
//! - `/gis/v1/geodata/:assetName` - get, set or delete geo data of one asset
//! - `/gis/v1/geodata/:assetName/distanceTo` - distance to an asset or coordinate
//! - `/gis/v1/geodata/:assetName/withinRange` - range check
//! - `/gis/v1/geodata/cellularPower` - cellular signal at coordinates
//! - `/health` - liveness

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};

use crate::automation::{AutomationState, AutomationType};
use crate::config::ApiConfig;
use crate::engine::{Engine, GeoDataAsset, Target};
use crate::error::{Error, ValidationError};
use crate::geo::Point;
use crate::selection::CoordinatePower;

/// Base path of every engine route.
pub const BASE_PATH: &str = "/gis/v1";

/// Error response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// An engine error mapped to an HTTP status.
#[derive(Debug)]
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl From<ValidationError> for ApiError {
    fn from(e: ValidationError) -> Self {
        Self(e.into())
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        if self.0.is_validation() {
            StatusCode::BAD_REQUEST
        } else if self.0.is_not_found() {
            StatusCode::NOT_FOUND
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {}", self.0);
        } else {
            debug!("Request rejected: {}", self.0);
        }
        (
            status,
            Json(ErrorResponse {
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

/// Run a store-backed engine call on the blocking pool.
async fn with_engine<T, F>(engine: Arc<Engine>, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&Arc<Engine>) -> crate::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(move || f(&engine))
        .await
        .map_err(|e| Error::Internal(format!("engine call failed: {e}")))?
        .map_err(ApiError::from)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomationStateList {
    pub states: Vec<AutomationState>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeoDataAssetList {
    pub geo_data_assets: Vec<GeoDataAsset>,
}

/// Target of a distance or range query: an asset, or a coordinate.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetParameters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub radius: Option<f64>,
}

impl TargetParameters {
    fn target(&self) -> Result<Target, ValidationError> {
        match (&self.asset_name, self.latitude, self.longitude) {
            (Some(name), _, _) if !name.is_empty() => Ok(Target::Asset(name.clone())),
            (_, Some(lat), Some(lon)) => Ok(Target::Coordinates(Point::new(lon, lat))),
            (_, None, _) => Err(ValidationError::MissingField("latitude")),
            (_, _, None) => Err(ValidationError::MissingField("longitude")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistanceResponse {
    pub distance: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithinRangeResponse {
    pub within: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatePowerRequest {
    pub coordinates: Vec<Coordinate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoordinatePowerList {
    pub coordinates_power: Vec<CoordinatePower>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scenario: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RunQuery {
    #[serde(default)]
    run: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AssetTypeQuery {
    asset_type: Option<String>,
}

/// Build the API router over an engine.
pub fn router(engine: Arc<Engine>, enable_cors: bool) -> Router {
    let api = Router::new()
        .route("/automation", get(get_automation_states))
        .route(
            "/automation/:automation_type",
            get(get_automation_state).post(set_automation_state),
        )
        .route("/geodata", get(list_geodata))
        .route("/geodata/cellularPower", post(cellular_power))
        .route(
            "/geodata/:asset_name",
            get(get_geodata).post(set_geodata).delete(delete_geodata),
        )
        .route("/geodata/:asset_name/distanceTo", post(distance_to))
        .route("/geodata/:asset_name/withinRange", post(within_range));

    let router = Router::new()
        .nest(BASE_PATH, api)
        .route("/health", get(health))
        .with_state(engine);

    if enable_cors {
        router
            .layer(CorsLayer::new().allow_origin(Any))
            .layer(TraceLayer::new_for_http())
    } else {
        router.layer(TraceLayer::new_for_http())
    }
}

/// HTTP API server.
pub struct ApiServer {
    config: ApiConfig,
    engine: Arc<Engine>,
    shutdown_tx: broadcast::Sender<()>,
}

impl ApiServer {
    pub fn new(config: ApiConfig, engine: Arc<Engine>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            engine,
            shutdown_tx,
        }
    }

    /// Serve until [`ApiServer::stop`] is called.
    pub async fn start(&self) -> Result<(), std::io::Error> {
        let app = router(self.engine.clone(), self.config.enable_cors);
        let addr = self.config.bind_addr;

        info!("Starting GIS API on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
            })
            .await
    }

    /// Stop the server.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

async fn health(State(engine): State<Arc<Engine>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".to_string(),
            version: crate::VERSION.to_string(),
            scenario: engine.scenario_name(),
        }),
    )
}

async fn get_automation_states(
    State(engine): State<Arc<Engine>>,
) -> ApiResult<AutomationStateList> {
    Ok(Json(AutomationStateList {
        states: engine.automation_states(),
    }))
}

async fn get_automation_state(
    State(engine): State<Arc<Engine>>,
    Path(automation_type): Path<String>,
) -> ApiResult<AutomationState> {
    let kind: AutomationType = automation_type.parse()?;
    Ok(Json(engine.automation_state(kind)))
}

async fn set_automation_state(
    State(engine): State<Arc<Engine>>,
    Path(automation_type): Path<String>,
    Query(query): Query<RunQuery>,
) -> ApiResult<AutomationState> {
    let kind: AutomationType = automation_type.parse()?;
    let state = with_engine(engine, move |engine| {
        engine.set_automation(kind, query.run)?;
        Ok(engine.automation_state(kind))
    })
    .await?;
    Ok(Json(state))
}

async fn list_geodata(
    State(engine): State<Arc<Engine>>,
    Query(query): Query<AssetTypeQuery>,
) -> ApiResult<GeoDataAssetList> {
    let geo_data_assets =
        with_engine(engine, move |engine| engine.list_geodata(query.asset_type.as_deref())).await?;
    Ok(Json(GeoDataAssetList { geo_data_assets }))
}

async fn get_geodata(
    State(engine): State<Arc<Engine>>,
    Path(asset_name): Path<String>,
) -> ApiResult<GeoDataAsset> {
    let asset = with_engine(engine, move |engine| engine.get_geodata(&asset_name)).await?;
    Ok(Json(asset))
}

async fn set_geodata(
    State(engine): State<Arc<Engine>>,
    Path(asset_name): Path<String>,
    Json(asset): Json<GeoDataAsset>,
) -> Result<StatusCode, ApiError> {
    with_engine(engine, move |engine| engine.set_geodata(&asset_name, asset)).await?;
    Ok(StatusCode::OK)
}

async fn delete_geodata(
    State(engine): State<Arc<Engine>>,
    Path(asset_name): Path<String>,
) -> Result<StatusCode, ApiError> {
    with_engine(engine, move |engine| engine.delete_geodata(&asset_name)).await?;
    Ok(StatusCode::OK)
}

async fn distance_to(
    State(engine): State<Arc<Engine>>,
    Path(asset_name): Path<String>,
    Json(params): Json<TargetParameters>,
) -> ApiResult<DistanceResponse> {
    let target = params.target()?;
    let distance = with_engine(engine, move |engine| engine.distance_to(&asset_name, &target)).await?;
    Ok(Json(DistanceResponse { distance }))
}

async fn within_range(
    State(engine): State<Arc<Engine>>,
    Path(asset_name): Path<String>,
    Json(params): Json<TargetParameters>,
) -> ApiResult<WithinRangeResponse> {
    let target = params.target()?;
    let radius = params.radius.ok_or(ValidationError::MissingField("radius"))?;
    let within = with_engine(engine, move |engine| {
        engine.within_range(&asset_name, &target, radius)
    })
    .await?;
    Ok(Json(WithinRangeResponse { within }))
}

async fn cellular_power(
    State(engine): State<Arc<Engine>>,
    Json(request): Json<CoordinatePowerRequest>,
) -> ApiResult<CoordinatePowerList> {
    let points: Vec<Point> = request
        .coordinates
        .iter()
        .map(|c| Point::new(c.longitude, c.latitude))
        .collect();
    let coordinates_power = with_engine(engine, move |engine| engine.cellular_power(&points)).await?;
    Ok(Json(CoordinatePowerList { coordinates_power }))
}
