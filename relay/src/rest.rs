use crate::classify::Fields;
use crate::model::TelemetryResponse;
use crate::relay::Relay;
use axum::{
    body::Bytes,
    extract::{FromRequest, Path, Query, Request, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Form, Json, Router,
};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, error, info, warn};

/// Acknowledgement every device report gets, whatever happened to it
pub const ACK: &str = "Data received successfully";

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

#[derive(Debug, Deserialize)]
pub struct OperationsQuery {
    limit: Option<usize>,
    offset: Option<usize>,
}

pub fn create_router(relay: Relay) -> Router {
    Router::new()
        .route("/api/esp32data", get(poll).post(ingest))
        .route("/api/v1/devices/:sim_number/operations", get(get_operations))
        .with_state(relay)
}

async fn ingest(State(relay): State<Relay>, request: Request) -> (StatusCode, &'static str) {
    match read_fields(request).await {
        Some(fields) => {
            debug!("Report received: {:?}", fields);
            let outcome = relay.ingest(&fields).await;
            debug!("Report outcome: {:?}", outcome);
        }
        None => warn!("Unreadable report body, acknowledging anyway"),
    }
    (StatusCode::OK, ACK)
}

/// Device poll. The query is read as raw pairs so no query string can turn
/// into a rejection; the first `simNumber` wins.
async fn poll(
    State(relay): State<Relay>,
    query: Option<Query<Vec<(String, String)>>>,
) -> impl IntoResponse {
    let Query(pairs) = query.unwrap_or_else(|| Query(Vec::new()));
    let sim_number = pairs
        .iter()
        .find(|(key, _)| key == "simNumber")
        .map(|(_, value)| value.as_str());
    debug!("Poll from SIM {:?}", sim_number);
    let body = relay.poll(sim_number);
    ([(header::CONTENT_TYPE, FORM_CONTENT_TYPE)], body)
}

async fn get_operations(
    State(relay): State<Relay>,
    Path(sim_number): Path<String>,
    Query(params): Query<OperationsQuery>,
) -> Result<Response, AppError> {
    let limit = params.limit.unwrap_or(100).min(1000);
    let offset = params.offset.unwrap_or(0);

    let Some(device) = relay.registry().find_by_sim(&sim_number).await? else {
        info!("Operations requested for unknown SIM {}", sim_number);
        return Ok((StatusCode::NOT_FOUND, "Machine not found").into_response());
    };

    let data = relay
        .store()
        .list_for_device(device.id, limit, offset)
        .await?;

    Ok(Json(TelemetryResponse {
        total: data.len(),
        data,
        limit,
        offset,
    })
    .into_response())
}

/// Reads a report body as form pairs or JSON object, depending on its content type
async fn read_fields(request: Request) -> Option<Fields> {
    if is_form(request.headers()) {
        let Form(pairs) = Form::<Vec<(String, String)>>::from_request(request, &())
            .await
            .map_err(|e| debug!("Form body rejected: {}", e))
            .ok()?;
        return Some(
            pairs
                .into_iter()
                .map(|(key, value)| (key, Value::String(value)))
                .collect(),
        );
    }

    let body = Bytes::from_request(request, &())
        .await
        .map_err(|e| debug!("Body rejected: {}", e))
        .ok()?;
    serde_json::from_slice::<Fields>(&body)
        .map_err(|e| debug!("JSON body rejected: {}", e))
        .ok()
}

fn is_form(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with(FORM_CONTENT_TYPE))
}

struct AppError(anyhow::Error);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        error!("API error: {}", self.0);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Internal server error: {}", self.0),
        )
            .into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{DownTelemetryStore, MemoryRegistry, MemoryTelemetryStore};
    use crate::model::DeviceRecord;
    use crate::queue::CommandQueues;
    use crate::store::DeviceRegistry;
    use axum::body::{to_bytes, Body};
    use axum::http::Request as HttpRequest;
    use std::sync::Arc;
    use tower::ServiceExt;

    struct TestApp {
        router: Router,
        registry: Arc<MemoryRegistry>,
    }

    fn app() -> TestApp {
        let registry = Arc::new(MemoryRegistry::new());
        let relay = Relay::new(
            Arc::new(CommandQueues::default()),
            registry.clone(),
            Arc::new(MemoryTelemetryStore::new()),
            "default",
        );
        TestApp {
            router: create_router(relay),
            registry,
        }
    }

    async fn send(router: &Router, request: HttpRequest<Body>) -> (StatusCode, HeaderMap, String) {
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, headers, String::from_utf8(body.to_vec()).unwrap())
    }

    fn post_form(body: &str) -> HttpRequest<Body> {
        HttpRequest::post("/api/esp32data")
            .header(header::CONTENT_TYPE, FORM_CONTENT_TYPE)
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn post_json(body: &str) -> HttpRequest<Body> {
        HttpRequest::post("/api/esp32data")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get_uri(uri: &str) -> HttpRequest<Body> {
        HttpRequest::get(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_form_report_then_poll() {
        let app = app();
        let (status, _, body) = send(
            &app.router,
            post_form("cmd=dir_update&simNumber=0771&count=2&number1=111&number2=222"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, ACK);

        let (status, headers, body) = send(&app.router, get_uri("/api/esp32data?simNumber=0771")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[header::CONTENT_TYPE], FORM_CONTENT_TYPE);
        assert!(body.starts_with(
            "message1=cmd%3Ddir_update%26count%3D2%26number1%3D111%26number2%3D222&timestamp1="
        ));

        let (_, _, body) = send(&app.router, get_uri("/api/esp32data?simNumber=0771")).await;
        assert_eq!(body, "status=no_messages");
    }

    #[tokio::test]
    async fn test_json_message_to_default_channel() {
        let app = app();
        send(&app.router, post_json(r#"{"message":"ping"}"#)).await;

        let (_, _, body) = send(&app.router, get_uri("/api/esp32data")).await;
        assert!(body.starts_with("message1=ping&timestamp1="));
    }

    #[tokio::test]
    async fn test_repeated_sim_number_uses_first() {
        let app = app();
        send(&app.router, post_json(r#"{"message":"for a","simNumber":"a"}"#)).await;

        let (status, headers, body) =
            send(&app.router, get_uri("/api/esp32data?simNumber=a&simNumber=b")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[header::CONTENT_TYPE], FORM_CONTENT_TYPE);
        assert!(body.starts_with("message1=for%20a&timestamp1="));

        let (status, _, body) = send(&app.router, get_uri("/api/esp32data?simNumber=b&junk")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "status=no_messages");
    }

    #[tokio::test]
    async fn test_garbage_is_still_acknowledged() {
        let app = app();
        let (status, _, body) = send(&app.router, post_json("not json at all")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, ACK);

        let (status, _, body) = send(&app.router, post_json(r#"{"cmd":"STATUS_UPDATE","simNumber":"0999"}"#)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, ACK);
        assert!(app.registry.find_by_sim("0999").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_store_failure_is_still_acknowledged() {
        let registry = Arc::new(MemoryRegistry::new());
        registry.insert(DeviceRecord::new("press-1", "0771")).await;
        let router = create_router(Relay::new(
            Arc::new(CommandQueues::default()),
            registry,
            Arc::new(DownTelemetryStore),
            "default",
        ));

        let (status, _, body) = send(
            &router,
            post_form("cmd=JOB&simNumber=0771&fuelConsumption=1&pressure=2&processTime=3"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, ACK);

        let (status, _, _) = send(&router, get_uri("/api/v1/devices/0771/operations")).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_job_report_visible_in_operations() {
        let app = app();
        app.registry.insert(DeviceRecord::new("press-1", "0771")).await;

        send(
            &app.router,
            post_form("cmd=JOB&simNumber=0771&fuelConsumption=4.5&pressure=abc&processTime=12&location=Yard"),
        )
        .await;

        let (status, _, body) = send(&app.router, get_uri("/api/v1/devices/0771/operations")).await;
        assert_eq!(status, StatusCode::OK);
        let json: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["total"], 1);
        assert_eq!(json["limit"], 100);
        assert_eq!(json["data"][0]["fuel_consumption"], 4.5);
        assert_eq!(json["data"][0]["pressure"], 0.0);
        assert_eq!(json["data"][0]["location"], "Yard");
    }

    #[tokio::test]
    async fn test_operations_unknown_device() {
        let app = app();
        let (status, _, _) = send(&app.router, get_uri("/api/v1/devices/0999/operations")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
