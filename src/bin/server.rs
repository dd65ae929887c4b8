use std::net::SocketAddr;

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Json, Router, routing::post};
use base64::Engine;
use image::ImageEncoder;
use image::codecs::png::PngEncoder;
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use gridexpansion::{ErrorKind, ExpansionError, Outcome, Problem, render};

#[derive(Serialize)]
struct SolveResponse {
    label: Vec<Vec<u32>>,
    outcome: Outcome,
    layers: Vec<Layer>,
    timings: Vec<TimingEntry>,
    width: usize,
    height: usize,
}

#[derive(Serialize)]
struct Layer {
    name: String,
    data_url: String,
}

#[derive(Serialize)]
struct TimingEntry {
    name: String,
    ms: f64,
}

#[derive(Serialize)]
struct ErrorBody {
    kind: Option<ErrorKind>,
    message: String,
}

struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl From<ExpansionError> for ApiError {
    fn from(err: ExpansionError) -> Self {
        let status = match err.kind() {
            ErrorKind::MalformedInput => StatusCode::BAD_REQUEST,
            ErrorKind::InfeasibleNetwork | ErrorKind::WorkerPool => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            body: ErrorBody {
                kind: Some(err.kind()),
                message: err.message().to_string(),
            },
        }
    }
}

impl ApiError {
    fn internal(message: String) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            body: ErrorBody { kind: None, message },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

fn encode_png(rgba: &[u8], w: usize, h: usize) -> Result<String, ApiError> {
    let mut buf = Vec::new();
    let encoder = PngEncoder::new(&mut buf);
    encoder
        .write_image(rgba, w as u32, h as u32, image::ExtendedColorType::Rgba8)
        .map_err(|e| ApiError::internal(format!("PNG encode failed: {}", e)))?;
    let b64 = base64::engine::general_purpose::STANDARD.encode(&buf);
    Ok(format!("data:image/png;base64,{}", b64))
}

fn solve(problem: Problem) -> Result<SolveResponse, ApiError> {
    let (solution, timings) = gridexpansion::solve(&problem)?;
    let (width, height) = (solution.labels.w, solution.labels.h);

    let layers = vec![
        Layer {
            name: "labels".into(),
            data_url: encode_png(
                &render::render_labels(&solution.labels, solution.n_labels),
                width,
                height,
            )?,
        },
        Layer {
            name: "energy".into(),
            data_url: encode_png(&render::render_energy(&solution.site_energy), width, height)?,
        },
    ];

    let timing_entries = timings
        .iter()
        .map(|t| TimingEntry {
            name: t.name.to_string(),
            ms: t.ms,
        })
        .collect();

    Ok(SolveResponse {
        label: solution.label_columns(),
        outcome: solution.outcome,
        layers,
        timings: timing_entries,
        width,
        height,
    })
}

async fn solve_handler(payload: Result<Json<Problem>, JsonRejection>) -> Result<Json<SolveResponse>, ApiError> {
    let Json(problem) = payload.map_err(|rejection| ApiError {
        status: StatusCode::BAD_REQUEST,
        body: ErrorBody {
            kind: Some(ErrorKind::MalformedInput),
            message: rejection.body_text(),
        },
    })?;
    info!(
        width = problem.width(),
        height = problem.height(),
        n_labels = problem.n_labels(),
        "solve request"
    );
    let response = tokio::task::spawn_blocking(move || solve(problem))
        .await
        .map_err(|e| ApiError::internal(format!("solver task failed: {}", e)))?;
    match response {
        Ok(r) => Ok(Json(r)),
        Err(e) => {
            error!(status = %e.status, message = %e.body.message, "solve failed");
            Err(e)
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let app = Router::new()
        .route("/api/solve", post(solve_handler))
        .layer(CorsLayer::permissive());

    let addr = SocketAddr::from(([127, 0, 0, 1], 3000));
    info!("gridexpansion server at http://{}", addr);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!(%addr, "cannot bind: {}", e);
            std::process::exit(1);
        }
    };
    if let Err(e) = axum::serve(listener, app).await {
        error!("server error: {}", e);
        std::process::exit(1);
    }
}
