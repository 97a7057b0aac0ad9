//! Tests for the OpenWeather client and the service against a local fake
//! air-pollution endpoint.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    Json, Router,
    body::Body,
    extract::{Query, State},
    http::{Request, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use http_body_util::BodyExt;
use tower::ServiceExt;

use civicair_core::{
    AqiProvider, OpenWeatherClient, ProviderError, ReconcileOptions, Reconciler, SharedStore,
};
use civicair_service::{AppState, Config, api};
use civicair_store::Store;
use civicair_types::{BoundingBox, GridPoint};

const API_KEY: &str = "test-key";

/// How the fake endpoint answers.
#[derive(Clone, Copy)]
enum Behaviour {
    Ok { aqi: i32, pm25: f64 },
    Unauthorized,
    Garbage,
    Slow(Duration),
}

#[derive(Clone)]
struct Fake {
    behaviour: Behaviour,
    requests: Arc<Mutex<Vec<HashMap<String, String>>>>,
}

async fn air_pollution(
    State(fake): State<Fake>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    fake.requests.lock().unwrap().push(params);

    match fake.behaviour {
        Behaviour::Ok { aqi, pm25 } => Json(serde_json::json!({
            "coord": {"lon": 106.0, "lat": 10.0},
            "list": [{
                "main": {"aqi": aqi},
                "components": {"co": 201.94, "pm2_5": pm25, "pm10": 20.1},
                "dt": 1_700_000_000
            }]
        }))
        .into_response(),
        Behaviour::Unauthorized => (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({"cod": 401, "message": "Invalid API key"})),
        )
            .into_response(),
        Behaviour::Garbage => (StatusCode::OK, "<html>maintenance</html>").into_response(),
        Behaviour::Slow(delay) => {
            tokio::time::sleep(delay).await;
            StatusCode::OK.into_response()
        }
    }
}

/// Serve the fake on an ephemeral port and return its base URL.
async fn spawn_fake(behaviour: Behaviour) -> (String, Fake) {
    let fake = Fake {
        behaviour,
        requests: Arc::new(Mutex::new(Vec::new())),
    };
    let app = Router::new()
        .route("/data/2.5/air_pollution", get(air_pollution))
        .with_state(fake.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{}", addr), fake)
}

fn client(base_url: &str) -> OpenWeatherClient {
    OpenWeatherClient::new(base_url, API_KEY, Duration::from_secs(5)).unwrap()
}

fn scenario_box() -> BoundingBox {
    BoundingBox::new(10.0, 106.0, 10.02, 106.02).unwrap()
}

#[tokio::test]
async fn test_fetch_parses_reading() {
    let (base_url, fake) = spawn_fake(Behaviour::Ok { aqi: 3, pm25: 12.5 }).await;

    let reading = client(&base_url)
        .fetch_aqi(GridPoint::new(10.0, 106.0))
        .await
        .unwrap();

    assert_eq!(reading.aqi, 3);
    assert_eq!(reading.pm25, Some(12.5));

    let requests = fake.requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0]["lat"], "10");
    assert_eq!(requests[0]["lon"], "106");
    assert_eq!(requests[0]["appid"], API_KEY);
}

#[tokio::test]
async fn test_fetch_trailing_slash_base_url() {
    let (base_url, _fake) = spawn_fake(Behaviour::Ok { aqi: 1, pm25: 2.0 }).await;

    let reading = client(&format!("{}/", base_url))
        .fetch_aqi(GridPoint::new(10.0, 106.0))
        .await
        .unwrap();
    assert_eq!(reading.aqi, 1);
}

#[tokio::test]
async fn test_fetch_non_success_status() {
    let (base_url, _fake) = spawn_fake(Behaviour::Unauthorized).await;

    let err = client(&base_url)
        .fetch_aqi(GridPoint::new(10.0, 106.0))
        .await
        .unwrap_err();
    assert_eq!(err, ProviderError::Status { status: 401 });
}

#[tokio::test]
async fn test_fetch_malformed_body() {
    let (base_url, _fake) = spawn_fake(Behaviour::Garbage).await;

    let err = client(&base_url)
        .fetch_aqi(GridPoint::new(10.0, 106.0))
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::Malformed(_)));
}

#[tokio::test]
async fn test_fetch_connection_refused() {
    // Grab a free port, then close it so nothing is listening
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    drop(listener);

    let err = client(&format!("http://{}", addr))
        .fetch_aqi(GridPoint::new(10.0, 106.0))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "transport");
}

#[tokio::test]
async fn test_fetch_times_out() {
    let (base_url, _fake) = spawn_fake(Behaviour::Slow(Duration::from_secs(3))).await;
    let timeout = Duration::from_millis(200);
    let client = OpenWeatherClient::new(&base_url, API_KEY, timeout).unwrap();

    let err = client
        .fetch_aqi(GridPoint::new(10.0, 106.0))
        .await
        .unwrap_err();
    assert_eq!(err, ProviderError::Timeout(timeout));
}

#[tokio::test]
async fn test_reconcile_against_fake_endpoint() {
    let (base_url, fake) = spawn_fake(Behaviour::Ok { aqi: 2, pm25: 15.5 }).await;
    let store = SharedStore::new(Store::open_in_memory().unwrap());
    let reconciler = Reconciler::new(
        Arc::new(client(&base_url)),
        Arc::new(store.clone()),
        ReconcileOptions::default().step_km(2.0),
    );

    let first = reconciler.reconcile(&scenario_box()).await.unwrap();
    assert_eq!(first.cells.len(), 4);
    assert!(first.cells.iter().all(|c| c.aqi == 2 && c.pm25 == Some(15.5)));
    assert_eq!(first.stats.fetched, 4);
    assert_eq!(store.lock().await.count_points().unwrap(), 4);

    // Everything is fresh now; no further upstream calls
    let second = reconciler.reconcile(&scenario_box()).await.unwrap();
    assert_eq!(second.cells, first.cells);
    assert_eq!(second.stats.fresh, 4);
    assert_eq!(fake.requests.lock().unwrap().len(), 4);
}

#[tokio::test]
async fn test_service_fetch_endpoint_end_to_end() {
    let (base_url, _fake) = spawn_fake(Behaviour::Ok { aqi: 4, pm25: 60.0 }).await;

    let mut config = Config::default();
    config.grid.step_km = 2.0;
    let state = AppState::new(
        Store::open_in_memory().unwrap(),
        config,
        Arc::new(client(&base_url)),
    );
    let app = api::router().with_state(Arc::clone(&state));

    let body = serde_json::json!({
        "lat_min": 10.0,
        "lon_min": 106.0,
        "lat_max": 10.02,
        "lon_max": 106.02,
    });
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/aqi/fetch/")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let cells: Vec<(f64, f64, i32, Option<f64>)> = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(cells.len(), 4);
    assert_eq!(cells[0], (10.0, 106.0, 4, Some(60.0)));
}
