use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::extract::State;
use axum::http::StatusCode;
use axum::{Json, Router, routing::get};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::binder::Param;
use crate::config::Settings;
use crate::database::Database;
use crate::error::{QubusError, Result};
use crate::materialize::{Output, OutputShape};
use crate::registry::Registry;
use crate::worker::{TickReport, Worker};

pub struct CronState {
    pub worker: Arc<Mutex<Worker>>,
    pub database: Arc<Mutex<Database>>,
    pub cron_path: String,
    pub http_timeout: Duration,
}

#[derive(Serialize)]
pub struct TickResponse {
    pub status: String,
    pub elapsed_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<TickReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SiteReport {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Serialize)]
pub struct MasterResponse {
    pub status: String,
    pub elapsed_ms: f64,
    pub sites: Vec<SiteReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Cron URL of every site that is not archived, read from the multisite `site` table.
pub fn site_cron_urls(database: &mut Database, cron_path: &str) -> Result<Vec<String>> {
    let template = format!(
        "select site_domain, site_path from {} where coalesce(site_status, '') <> ? order by site_id",
        database.table("site")?
    );
    let query = database.prepare(Some(&template), vec![Param::from("archive")])?;
    let rows = match database.get_results(query.as_ref(), OutputShape::Object)? {
        Some(Output::Objects(rows)) => rows,
        _ => Vec::new(),
    };
    let cron_path = cron_path.trim_matches('/');
    let mut urls = Vec::with_capacity(rows.len());
    for row in rows {
        let text = |column: &str| match row.get(column) {
            Some(rusqlite::types::Value::Text(s)) => Ok(s.clone()),
            _ => Err(QubusError::InvalidQuery(format!("site row without {column}"))),
        };
        let domain = text("site_domain")?;
        let path = text("site_path")?;
        let path = path.trim_matches('/');
        let url = if path.is_empty() {
            format!("http://{domain}/{cron_path}")
        } else {
            format!("http://{domain}/{path}/{cron_path}")
        };
        urls.push(url);
    }
    Ok(urls)
}

/// Ping each site's cron endpoint in turn.
pub fn fan_out(urls: &[String], timeout: Duration) -> Vec<SiteReport> {
    let agent = ureq::AgentBuilder::new().timeout(timeout).build();
    urls.iter()
        .map(|url| match agent.get(url).call() {
            Ok(response) => SiteReport { url: url.clone(), status: Some(response.status()), error: None },
            Err(ureq::Error::Status(code, _)) => {
                warn!(%url, code, "site cron returned an error status");
                SiteReport { url: url.clone(), status: Some(code), error: None }
            }
            Err(e) => {
                warn!(%url, error = %e, "site cron unreachable");
                SiteReport { url: url.clone(), status: None, error: Some(QubusError::Http(e.to_string()).to_string()) }
            }
        })
        .collect()
}

async fn tick(State(state): State<Arc<CronState>>) -> (StatusCode, Json<TickResponse>) {
    let started = Instant::now();
    let worker = Arc::clone(&state.worker);
    // The worker does blocking file I/O.
    let result = tokio::task::spawn_blocking(move || -> Result<TickReport> {
        let mut worker = worker.lock()?;
        worker.tick()
    })
    .await
    .unwrap_or_else(|e| Err(QubusError::Execution(format!("join error: {e}"))));
    let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
    match result {
        Ok(report) => {
            info!(ms = elapsed_ms, jobs = report.jobs.len(), "cron tick served");
            let body = TickResponse { status: "ok".into(), elapsed_ms, report: Some(report), error: None };
            (StatusCode::OK, Json(body))
        }
        Err(e) => {
            let msg = e.to_string();
            warn!(%msg, "cron tick error");
            let body = TickResponse { status: "error".into(), elapsed_ms, report: None, error: Some(msg) };
            (StatusCode::INTERNAL_SERVER_ERROR, Json(body))
        }
    }
}

async fn master(State(state): State<Arc<CronState>>) -> (StatusCode, Json<MasterResponse>) {
    let started = Instant::now();
    let task_state = Arc::clone(&state);
    let result = tokio::task::spawn_blocking(move || -> Result<Vec<SiteReport>> {
        let urls = {
            let mut database = task_state.database.lock()?;
            site_cron_urls(&mut database, &task_state.cron_path)?
        };
        Ok(fan_out(&urls, task_state.http_timeout))
    })
    .await
    .unwrap_or_else(|e| Err(QubusError::Execution(format!("join error: {e}"))));
    let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
    match result {
        Ok(sites) => {
            info!(ms = elapsed_ms, sites = sites.len(), "master cron served");
            (StatusCode::OK, Json(MasterResponse { status: "ok".into(), elapsed_ms, sites, error: None }))
        }
        Err(e) => {
            let msg = e.to_string();
            warn!(%msg, "master cron error");
            let body = MasterResponse { status: "error".into(), elapsed_ms, sites: Vec::new(), error: Some(msg) };
            (StatusCode::INTERNAL_SERVER_ERROR, Json(body))
        }
    }
}

pub fn router(state: Arc<CronState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([axum::http::Method::GET])
        .allow_headers(Any);
    let cron_path = format!("/{}", state.cron_path.trim_matches('/'));
    let master_path = format!("{cron_path}/master");
    Router::new()
        .route(&cron_path, get(tick))
        .route(&master_path, get(master))
        .layer(cors)
        .with_state(state)
}

/// Serve the cron endpoints until the listener fails.
///
/// Embedding applications register their job callbacks and action hooks on
/// `registry` before calling this; the worker resolves jobs against it.
pub fn serve(settings: &Settings, registry: Registry) -> Result<()> {
    if registry.is_empty() {
        warn!("no job callbacks are registered, jobs will be skipped rather than run");
    }
    let worker = Worker::from_settings(settings, registry)?;
    let database = Database::from_settings(settings)?;
    let state = Arc::new(CronState {
        worker: Arc::new(Mutex::new(worker)),
        database: Arc::new(Mutex::new(database)),
        cron_path: settings.cron_path.clone(),
        http_timeout: Duration::from_secs(settings.http_timeout_seconds),
    });
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| QubusError::Execution(e.to_string()))?;
    let address = settings.bind_address.clone();
    runtime.block_on(async move {
        let listener = tokio::net::TcpListener::bind(&address)
            .await
            .map_err(|e| QubusError::Config(format!("cannot bind {address}: {e}")))?;
        info!(%address, "serving cron endpoints");
        axum::serve(listener, router(state))
            .await
            .map_err(|e| QubusError::Execution(e.to_string()))
    })
}
