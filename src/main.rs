use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{Datelike, Local, Weekday};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tracing::info;
use tracing_subscriber::prelude::*;

use riskroute::cache::TtlCache;
use riskroute::collectors::{ContextualCollector, EnvironmentalCollector};
use riskroute::config::{Config, PoiBackend};
use riskroute::events::{EventRecord, EventStore};
use riskroute::fusion::{Fusion, RiskBand, Weights};
use riskroute::hotspots::{HotspotStore, DEFAULT_HOTSPOT_RADIUS_KM, MAX_HOTSPOTS};
use riskroute::model::{parse_day, RiskModel};
use riskroute::poi::{OverpassPoiSource, PbfPoiSource, PoiSource};
use riskroute::spatial::SpatialIndexer;
use riskroute::{Coordinate, RiskEngine, RiskError, Segment, SignalScore};

// Shared State for concurrency
struct AppState {
    engine: Arc<RiskEngine>,
    hotspots: HotspotStore,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Any configuration problem stops the process here, never per request.
    let config = Config::from_env()?;
    let (engine, events) = build_engine(&config)?;
    let hotspots = HotspotStore::open(&config.hotspots_path)?;

    if !config.events_reload.is_zero() {
        let _reloader = events.spawn_reloader(config.events_reload);
    }

    let shared_state = Arc::new(AppState { engine, hotspots });

    let cors = CorsLayer::new()
        .allow_methods(tower_http::cors::Any)
        .allow_origin(tower_http::cors::Any)
        .allow_headers(tower_http::cors::Any);

    let app = Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/predict_risk", post(predict_risk))
        .route("/route_risk", post(route_risk))
        .route("/get_hotspots", get(get_hotspots))
        .layer(cors)
        .with_state(shared_state);

    info!(addr = %config.bind_addr, "API server listening");
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn build_engine(config: &Config) -> riskroute::Result<(Arc<RiskEngine>, Arc<EventStore>)> {
    let indexer = SpatialIndexer::new(config.h3_resolution)?;
    let model = Arc::new(RiskModel::load(&config.model_path, &indexer)?);

    let poi: Arc<dyn PoiSource> = match &config.poi {
        PoiBackend::Overpass { url } => {
            info!(%url, "using Overpass for venue lookups");
            Arc::new(OverpassPoiSource::new(
                url.clone(),
                config.overpass_retries,
                std::time::Duration::from_millis(100),
            ))
        }
        PoiBackend::Pbf { path } => Arc::new(PbfPoiSource::from_pbf(path)?),
    };
    let events = Arc::new(EventStore::open(&config.events_path)?);

    let engine = RiskEngine::new(
        indexer,
        model,
        EnvironmentalCollector::new(poi, config.collector_timeout, config.environmental_ceiling),
        ContextualCollector::new(events.clone(), config.collector_timeout, config.contextual_ceiling),
        Fusion::new(Weights::default(), config.weight_policy),
        Arc::new(TtlCache::new(config.cache_capacity, config.cache_ttl)),
    )
    .with_route_concurrency(config.route_concurrency);

    Ok((Arc::new(engine), events))
}

// --- API DTOs ---

#[derive(Deserialize)]
struct PointRequest {
    latitude: f64,
    longitude: f64,
    day: Option<String>,
    #[serde(default)]
    fast_mode: bool,
}

#[derive(Serialize)]
struct PointResponse {
    score: f64,
    band: RiskBand,
    signals: [SignalScore; 3],
    risk_level: &'static str,
    h3_index: String,
    h3_boundary: Vec<[f64; 2]>, // [lon, lat] for drawing the hexagon
    day: String,
    context_status: String,
    context_data: Vec<ContextReport>,
}

#[derive(Serialize)]
struct ContextReport {
    title: String,
    link: String,
    location: String,
}

impl From<EventRecord> for ContextReport {
    fn from(event: EventRecord) -> Self {
        Self {
            title: event.title,
            link: event.url,
            location: event.location_name,
        }
    }
}

#[derive(Deserialize)]
struct RouteRequest {
    path: Vec<[f64; 2]>, // [lat, lon]
    day: Option<String>,
    #[serde(default)]
    fast_mode: bool,
}

#[derive(Serialize)]
struct RouteResponse {
    segments: Vec<Segment>,
}

#[derive(Deserialize)]
struct HotspotQuery {
    lat: f64,
    lon: f64,
    radius_km: Option<f64>,
}

#[derive(Serialize)]
struct Hotspot {
    lat: f64,
    lon: f64,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Serialize)]
struct HotspotResponse {
    hotspots: Vec<Hotspot>,
}

struct ApiError(RiskError);

impl From<RiskError> for ApiError {
    fn from(err: RiskError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = if self.0.is_invalid_input() {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        (status, Json(serde_json::json!({ "error": self.0.to_string() }))).into_response()
    }
}

fn day_or_today(day: Option<&str>) -> Result<Weekday, RiskError> {
    match day {
        Some(name) => parse_day(name),
        None => Ok(Local::now().weekday()),
    }
}

// --- Handlers ---

async fn predict_risk(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<PointRequest>,
) -> Result<Json<PointResponse>, ApiError> {
    let coordinate = Coordinate::new(payload.latitude, payload.longitude)?;
    let day = day_or_today(payload.day.as_deref())?;

    let result = state.engine.score_point(coordinate, day, payload.fast_mode).await;
    let cell = state.engine.cell_of(&coordinate);

    Ok(Json(PointResponse {
        score: result.score,
        band: result.band,
        signals: result.signals,
        risk_level: result.band.color(),
        h3_index: cell.to_string(),
        h3_boundary: state.engine.indexer().boundary_of(cell),
        day: day.to_string(),
        context_status: result.context_status(),
        context_data: result.context.into_iter().map(ContextReport::from).collect(),
    }))
}

async fn route_risk(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RouteRequest>,
) -> Result<Json<RouteResponse>, ApiError> {
    let path = payload
        .path
        .iter()
        .map(|[lat, lon]| Coordinate::new(*lat, *lon))
        .collect::<Result<Vec<_>, _>>()?;
    let day = day_or_today(payload.day.as_deref())?;

    let segments = state.engine.score_route_on(&path, day, payload.fast_mode).await?;
    Ok(Json(RouteResponse { segments }))
}

async fn get_hotspots(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HotspotQuery>,
) -> Result<Json<HotspotResponse>, ApiError> {
    let center = Coordinate::new(query.lat, query.lon)?;
    let radius_km = query.radius_km.unwrap_or(DEFAULT_HOTSPOT_RADIUS_KM);
    if !(radius_km.is_finite() && radius_km > 0.0) {
        return Err(RiskError::invalid(format!("radius_km must be positive, got {radius_km}")).into());
    }

    let hotspots = state
        .hotspots
        .within(&center, radius_km * 1000.0, MAX_HOTSPOTS)
        .into_iter()
        .map(|r| Hotspot {
            lat: r.latitude,
            lon: r.longitude,
            kind: r.crime_type.clone(),
        })
        .collect();
    Ok(Json(HotspotResponse { hotspots }))
}
