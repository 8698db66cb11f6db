mod advisor;
mod error;
mod features;
mod grid;
mod sources;

use crate::advisor::session::Sessions;
use crate::advisor::{Advisor, OpenAiModel};
use crate::error::Error;
use crate::features::combined::CombinedGrid;
use crate::features::similarity::Method;
use crate::features::{Indicator, PreferenceVector};
use crate::grid::{BoundingBox, Grid, DEFAULT_COLS, DEFAULT_ROWS};
use crate::sources::{Dataset, IngestOptions};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use env_logger::Builder;
use lazy_static::lazy_static;
use log::LevelFilter;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::Arc;
use warp::http::StatusCode;
use warp::reply::{Json, WithStatus};
use warp::{Filter, Rejection, Reply};

#[macro_use]
extern crate log;

lazy_static! {
    static ref DATA_DIR: PathBuf = std::env::var("LAGRID_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("./JSON"));
    static ref PORT: u16 = std::env::var("LAGRID_PORT")
        .ok()
        .and_then(|p| p.parse::<u16>().ok())
        .unwrap_or(5000);
    static ref ALLOW_MISSING: bool = std::env::var("LAGRID_ALLOW_MISSING")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);
    static ref OPENAI_MODEL: String =
        std::env::var("LAGRID_OPENAI_MODEL").unwrap_or_else(|_| "gpt-3.5-turbo".to_string());
    static ref YELP_API_KEY: Option<String> = std::env::var("YELP_API_KEY")
        .ok()
        .filter(|key| !key.trim().is_empty());
}

#[derive(Parser)]
#[command(name = "lagrid")]
#[command(version, about = "Los Angeles livability grid: ingestion and heatmap server")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the combined grid and heatmaps over HTTP
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value_t = *PORT)]
        port: u16,

        /// Directory holding the matrix files
        #[arg(long, default_value_os_t = DATA_DIR.clone())]
        data_dir: PathBuf,

        /// Start even if some indicators have no matrix file
        #[arg(long)]
        allow_missing: bool,
    },

    /// Fetch a dataset and write its normalized matrix file
    Ingest {
        dataset: Dataset,

        /// Output directory
        #[arg(long, default_value_os_t = DATA_DIR.clone())]
        out_dir: PathBuf,

        #[arg(long, default_value_t = DEFAULT_ROWS)]
        rows: usize,

        #[arg(long, default_value_t = DEFAULT_COLS)]
        cols: usize,

        /// FCC broadband csv, required by the connectivity dataset
        #[arg(long)]
        csv: Option<PathBuf>,
    },
}

#[derive(Clone)]
struct AppState {
    combined: Arc<CombinedGrid>,
    advisor: Advisor,
    sessions: Sessions,
}

#[derive(Debug, Deserialize)]
struct GenerateRequest {
    prompt: String,
    session: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HeatmapQuery {
    method: Option<String>,
    session: Option<String>,
    vector: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UpdateVectorRequest {
    vector: Vec<f64>,
    session: Option<String>,
}

#[derive(Serialize)]
struct VectorReply<'a> {
    success: bool,
    session: &'a str,
    vector: PreferenceVector,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<&'a str>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // read .env
    dotenv().ok();

    // init logger
    let log_level = std::env::var("RUST_LOG").unwrap_or_default();

    if log_level == "debug" {
        Builder::new()
            .filter(None, LevelFilter::Off)
            .filter(Some("lagrid"), LevelFilter::Debug)
            .init();
    } else if log_level == "info" {
        Builder::new()
            .filter(None, LevelFilter::Off)
            .filter(Some("lagrid"), LevelFilter::Info)
            .init();
    } else {
        env_logger::init();
    }

    let cli = Cli::parse();
    match cli.command {
        Some(Commands::Ingest {
            dataset,
            out_dir,
            rows,
            cols,
            csv,
        }) => {
            let grid = Grid::new(BoundingBox::los_angeles(), rows, cols)?;
            let options = IngestOptions {
                csv,
                yelp_api_key: YELP_API_KEY.clone(),
            };
            let path = sources::ingest(dataset, &grid, &out_dir, &options).await?;
            info!("{} matrix saved to {}", dataset, path.display());
            Ok(())
        }
        Some(Commands::Serve {
            port,
            data_dir,
            allow_missing,
        }) => serve(port, data_dir, allow_missing || *ALLOW_MISSING).await,
        None => serve(*PORT, DATA_DIR.clone(), *ALLOW_MISSING).await,
    }
}

async fn serve(port: u16, data_dir: PathBuf, allow_missing: bool) -> Result<()> {
    let combined = CombinedGrid::load(&data_dir, Grid::los_angeles(), allow_missing)
        .with_context(|| format!("loading matrix files from {}", data_dir.display()))?;
    info!(
        "combined grid ready: {} of {} indicators loaded",
        combined.loaded_indicators().len(),
        Indicator::ALL.len()
    );

    let state = AppState {
        combined: Arc::new(combined),
        advisor: Advisor::new(Arc::new(OpenAiModel::new(OPENAI_MODEL.clone()))),
        sessions: Sessions::new(),
    };

    info!("server running at port: {}", port);
    warp::serve(routes(state)).run(([0, 0, 0, 0], port)).await;

    Ok(())
}

fn routes(state: AppState) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    let state_for_osm = state.clone();
    let state_for_generate = state.clone();
    let state_for_heatmap = state.clone();

    let osm_data_route = warp::path!("api" / "osm-data")
        .and(warp::get())
        .and(warp::any().map(move || state_for_osm.clone()))
        .and_then(handle_osm_data);

    let generate_route = warp::path!("api" / "generate")
        .and(warp::post())
        .and(warp::body::content_length_limit(64 * 1024))
        .and(warp::body::json())
        .and(warp::any().map(move || state_for_generate.clone()))
        .and_then(handle_generate);

    let heatmap_route = warp::path!("api" / "heatmap")
        .and(warp::get())
        .and(warp::query::<HeatmapQuery>())
        .and(warp::any().map(move || state_for_heatmap.clone()))
        .and_then(handle_heatmap);

    let update_vector_route = warp::path!("api" / "update-vector")
        .and(warp::post())
        .and(warp::body::content_length_limit(16 * 1024))
        .and(warp::body::json())
        .and(warp::any().map(move || state.clone()))
        .and_then(handle_update_vector);

    let cors = warp::cors()
        .allow_any_origin()
        .allow_methods(vec!["GET", "POST"])
        .allow_headers(vec!["content-type"]);

    osm_data_route
        .or(generate_route)
        .or(heatmap_route)
        .or(update_vector_route)
        .recover(handle_rejection)
        .with(cors)
}

async fn handle_osm_data(state: AppState) -> Result<impl Reply, Rejection> {
    info!("get osm-data request");
    let combined = &state.combined;
    let grid = &combined.grid;
    let body = json!({
        "success": true,
        "rectangle": grid.bounds,
        "grid": {
            "rows": grid.rows,
            "cols": grid.cols,
            "vertical_step": grid.lat_step(),
            "horizontal_step": grid.lon_step(),
        },
        "indicators": Indicator::ALL,
        "matrix": combined.cells,
        "sources": combined.sources,
    });
    Ok(reply_json(&body, StatusCode::OK))
}

async fn handle_generate(request: GenerateRequest, state: AppState) -> Result<impl Reply, Rejection> {
    info!("get generate request, session: {:?}", request.session);
    if request.prompt.trim().is_empty() {
        return Ok(reply_error(&Error::InvalidRequest(
            "prompt must not be empty".to_string(),
        )));
    }

    match state.advisor.generate(&request.prompt).await {
        Ok((vector, text)) => {
            let session = state.sessions.store(request.session, vector).await;
            let body = VectorReply {
                success: true,
                session: &session,
                vector,
                text: Some(&text),
            };
            Ok(reply_json(&body, StatusCode::OK))
        }
        Err(e) => {
            warn!("handle generate request failed: {}", e);
            Ok(reply_error(&e))
        }
    }
}

async fn handle_heatmap(query: HeatmapQuery, state: AppState) -> Result<impl Reply, Rejection> {
    let method = Method::parse(query.method.as_deref().unwrap_or_default());
    info!(
        "get heatmap request, method: {}, session: {:?}",
        method.name(),
        query.session
    );

    let preference = match (&query.vector, &query.session) {
        (Some(vector), _) => PreferenceVector::parse_csv(vector),
        (None, Some(session)) => state
            .sessions
            .get(session)
            .await
            .ok_or_else(|| Error::UnknownSession(session.clone())),
        (None, None) => Err(Error::InvalidRequest(
            "no preference vector, pass vector=... or session=...".to_string(),
        )),
    };
    let preference = match preference {
        Ok(preference) => preference,
        Err(e) => return Ok(reply_error(&e)),
    };

    match state.combined.heatmap(&preference, method) {
        Ok(heatmap) => {
            let body = json!({
                "success": true,
                "method": method,
                "rows": state.combined.grid.rows,
                "cols": state.combined.grid.cols,
                "heatmap": heatmap,
            });
            Ok(reply_json(&body, StatusCode::OK))
        }
        Err(e) => {
            error!("heatmap computation failed: {}", e);
            Ok(reply_error(&e))
        }
    }
}

async fn handle_update_vector(
    request: UpdateVectorRequest,
    state: AppState,
) -> Result<impl Reply, Rejection> {
    info!("get update-vector request, session: {:?}", request.session);
    let vector = match PreferenceVector::from_slice(&request.vector) {
        Ok(vector) => vector,
        Err(e) => return Ok(reply_error(&e)),
    };
    let session = state.sessions.store(request.session, vector).await;
    let body = VectorReply {
        success: true,
        session: &session,
        vector,
        text: None,
    };
    Ok(reply_json(&body, StatusCode::OK))
}

async fn handle_rejection(err: Rejection) -> Result<impl Reply, Infallible> {
    let (status, message) = if err.is_not_found() {
        (StatusCode::NOT_FOUND, "not found".to_string())
    } else if let Some(e) = err.find::<warp::filters::body::BodyDeserializeError>() {
        (StatusCode::BAD_REQUEST, e.to_string())
    } else if let Some(e) = err.find::<warp::reject::InvalidQuery>() {
        (StatusCode::BAD_REQUEST, e.to_string())
    } else if err.find::<warp::reject::LengthRequired>().is_some() {
        (StatusCode::LENGTH_REQUIRED, "content-length header required".to_string())
    } else if err.find::<warp::reject::PayloadTooLarge>().is_some() {
        (StatusCode::PAYLOAD_TOO_LARGE, "payload too large".to_string())
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "method not allowed".to_string())
    } else {
        warn!("unhandled rejection: {:?}", err);
        (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
    };
    Ok(reply_json(&json!({ "success": false, "error": message }), status))
}

fn reply_json<T: Serialize>(body: &T, status: StatusCode) -> WithStatus<Json> {
    warp::reply::with_status(warp::reply::json(body), status)
}

fn reply_error(e: &Error) -> WithStatus<Json> {
    let status = match e {
        Error::InvalidVector(_) | Error::InvalidRequest(_) | Error::DimensionMismatch { .. } => {
            StatusCode::BAD_REQUEST
        }
        Error::UnknownSession(_) => StatusCode::NOT_FOUND,
        Error::LlmReply(_) => StatusCode::UNPROCESSABLE_ENTITY,
        Error::Llm(_) | Error::Http(_) | Error::Provider(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    reply_json(&json!({ "success": false, "error": e.to_string() }), status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::advisor::TextModel;
    use async_trait::async_trait;
    use serde_json::Value;

    struct Canned(&'static str);

    #[async_trait]
    impl TextModel for Canned {
        async fn complete(&self, _system: &str, _user: &str) -> error::Result<String> {
            Ok(self.0.to_string())
        }
    }

    struct Unreachable;

    #[async_trait]
    impl TextModel for Unreachable {
        async fn complete(&self, _system: &str, _user: &str) -> error::Result<String> {
            Err(Error::Llm("connection refused".to_string()))
        }
    }

    fn state_with(model: Arc<dyn TextModel>) -> AppState {
        let grid = Grid::los_angeles();
        let mut combined = CombinedGrid::new(grid);
        let mut income = grid.zeros();
        income[0][0] = 1.0;
        income[3][4] = 0.5;
        combined.inject(Indicator::Income, &income).unwrap();
        AppState {
            combined: Arc::new(combined),
            advisor: Advisor::new(model),
            sessions: Sessions::new(),
        }
    }

    fn state() -> AppState {
        state_with(Arc::new(Canned("[1,0,0,0,0,0,0,0,0,0,0]")))
    }

    fn body(res: &warp::http::Response<warp::hyper::body::Bytes>) -> Value {
        serde_json::from_slice(res.body()).unwrap()
    }

    const INCOME_ONLY: &str = "1,0,0,0,0,0,0,0,0,0,0";

    #[tokio::test]
    async fn osm_data_serves_combined_matrix() {
        let res = warp::test::request()
            .method("GET")
            .path("/api/osm-data")
            .reply(&routes(state()))
            .await;
        assert_eq!(res.status(), StatusCode::OK);
        let body = body(&res);
        assert_eq!(body["success"], true);
        assert_eq!(body["grid"]["rows"], 20);
        assert_eq!(body["indicators"].as_array().unwrap().len(), 11);
        assert_eq!(body["indicators"][9], "community_vibe");
        assert_eq!(body["matrix"][3][4][0], 0.5);
        assert_eq!(body["rectangle"]["north"], 34.3344);
        assert_eq!(body["sources"][0]["loaded"], true);
        assert_eq!(body["sources"][1]["loaded"], false);
    }

    #[tokio::test]
    async fn heatmap_with_explicit_vector() {
        let res = warp::test::request()
            .method("GET")
            .path(&format!("/api/heatmap?method=pearson&vector={}", INCOME_ONLY))
            .reply(&routes(state()))
            .await;
        assert_eq!(res.status(), StatusCode::OK);
        let body = body(&res);
        assert_eq!(body["method"], "pearson");
        let heatmap = body["heatmap"].as_array().unwrap();
        assert_eq!(heatmap.len(), 20);
        assert_eq!(heatmap[0].as_array().unwrap().len(), 20);
    }

    #[tokio::test]
    async fn heatmap_unknown_method_uses_cosine() {
        let res = warp::test::request()
            .method("GET")
            .path(&format!("/api/heatmap?method=bogus&vector={}", INCOME_ONLY))
            .reply(&routes(state()))
            .await;
        let body = body(&res);
        assert_eq!(body["method"], "cosine");
        assert_eq!(body["heatmap"][0][0], 1.0);
        assert_eq!(body["heatmap"][10][10], 0.0);
    }

    #[tokio::test]
    async fn heatmap_needs_a_vector() {
        let filter = routes(state());
        let res = warp::test::request()
            .method("GET")
            .path("/api/heatmap")
            .reply(&filter)
            .await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body(&res)["success"], false);

        let res = warp::test::request()
            .method("GET")
            .path("/api/heatmap?session=missing")
            .reply(&filter)
            .await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);

        let res = warp::test::request()
            .method("GET")
            .path("/api/heatmap?vector=0.5,0.5")
            .reply(&filter)
            .await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn update_vector_validates() {
        let filter = routes(state());
        let res = warp::test::request()
            .method("POST")
            .path("/api/update-vector")
            .json(&json!({ "vector": [0.5, 0.5] }))
            .reply(&filter)
            .await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);

        let res = warp::test::request()
            .method("POST")
            .path("/api/update-vector")
            .json(&json!({ "vector": [0.5, 0.5, 0.5, 0.5, 0.5, 1.5, 0.5, 0.5, 0.5, 0.5, 0.5] }))
            .reply(&filter)
            .await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert!(body(&res)["error"]
            .as_str()
            .unwrap()
            .contains("accessibility"));

        let res = warp::test::request()
            .method("POST")
            .path("/api/update-vector")
            .json(&json!({ "vector": ["a"] }))
            .reply(&filter)
            .await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body(&res)["success"], false);
    }

    #[tokio::test]
    async fn session_vector_drives_heatmap() {
        let filter = routes(state());
        let res = warp::test::request()
            .method("POST")
            .path("/api/update-vector")
            .json(&json!({ "vector": [1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0] }))
            .reply(&filter)
            .await;
        assert_eq!(res.status(), StatusCode::OK);
        let session = body(&res)["session"].as_str().unwrap().to_string();

        let res = warp::test::request()
            .method("GET")
            .path(&format!("/api/heatmap?session={}", session))
            .reply(&filter)
            .await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(body(&res)["heatmap"][0][0], 1.0);
    }

    #[tokio::test]
    async fn generate_stores_parsed_vector() {
        let filter = routes(state());
        let res = warp::test::request()
            .method("POST")
            .path("/api/generate")
            .json(&json!({ "prompt": "I earn a lot and want a rich neighbourhood" }))
            .reply(&filter)
            .await;
        assert_eq!(res.status(), StatusCode::OK);
        let body = body(&res);
        assert_eq!(body["vector"][0], 1.0);
        let session = body["session"].as_str().unwrap();

        let res = warp::test::request()
            .method("GET")
            .path(&format!("/api/heatmap?session={}&method=manhattan", session))
            .reply(&filter)
            .await;
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn generate_failures_map_to_status() {
        let res = warp::test::request()
            .method("POST")
            .path("/api/generate")
            .json(&json!({ "prompt": "   " }))
            .reply(&routes(state()))
            .await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        let error = body(&res)["error"].as_str().unwrap().to_string();
        assert!(error.starts_with("invalid request"));
        assert!(!error.contains("vector"));

        let res = warp::test::request()
            .method("POST")
            .path("/api/generate")
            .json(&json!({ "prompt": "anything" }))
            .reply(&routes(state_with(Arc::new(Canned("no numbers here")))))
            .await;
        assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let res = warp::test::request()
            .method("POST")
            .path("/api/generate")
            .json(&json!({ "prompt": "anything" }))
            .reply(&routes(state_with(Arc::new(Unreachable))))
            .await;
        assert_eq!(res.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn post_without_content_length_is_411() {
        for path in ["/api/update-vector", "/api/generate"] {
            let res = warp::test::request()
                .method("POST")
                .path(path)
                .header("content-type", "application/json")
                .reply(&routes(state()))
                .await;
            assert_eq!(res.status(), StatusCode::LENGTH_REQUIRED, "{}", path);
            assert_eq!(body(&res)["success"], false);
        }
    }

    #[tokio::test]
    async fn unknown_path_is_json_404() {
        let res = warp::test::request()
            .method("GET")
            .path("/api/nothing")
            .reply(&routes(state()))
            .await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
        assert_eq!(body(&res)["success"], false);
    }
}
