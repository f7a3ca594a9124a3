use std::{borrow::Cow, sync::Arc, time::Duration};

use axum::{
    error_handling::HandleErrorLayer,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing, Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower::{BoxError, ServiceBuilder};
use tower_http::trace::TraceLayer;
use tracing::instrument;

use crate::auth::SessionAuthorization;
use crate::clock::VectorClock;
use crate::error::ClepsydraError;
use crate::gossip::Document;
use crate::service::{Client, OperationContext, ServiceContext, SessionTags};
use crate::settings::{APP_NAME, APP_VERSION};

/// Header internal cluster peers set on their requests. On a full deployment
/// the peer class comes from the transport session; the HTTP host reads it
/// from here.
pub const INTERNAL_CLIENT_HEADER: &str = "x-clepsydra-internal";

#[derive(Clone)]
pub(crate) struct AppState {
    pub service: Arc<ServiceContext>,
}

pub async fn api(service: Arc<ServiceContext>) -> anyhow::Result<Router> {
    let state = AppState { service };
    let api = Router::new()
        .route("/", routing::get(root))
        .route("/health", routing::get(health))
        .route("/about", routing::get(about))
        .route("/time", routing::get(time))
        .route("/gossip", routing::post(gossip))
        .layer(
            ServiceBuilder::new()
                // Handle errors from middleware
                .layer(HandleErrorLayer::new(handle_error))
                .load_shed()
                .timeout(Duration::from_secs(10))
                .layer(TraceLayer::new_for_http()),
        )
        .with_state(state);
    Ok(api)
}

// basic handler that responds with a static string
async fn root() -> &'static str {
    "Welcome to Clepsydra"
}

async fn health() -> &'static str {
    "OK"
}

#[derive(Serialize, Deserialize)]
struct AboutResponse {
    name: String,
    version: String,
    node_name: String,
    node_id: u32,
}

#[instrument(skip(state))]
async fn about(State(state): State<AppState>) -> axum::Json<AboutResponse> {
    let settings = state.service.settings();
    axum::Json(AboutResponse {
        name: APP_NAME.to_string(),
        version: APP_VERSION.to_string(),
        node_name: settings.node_name.clone(),
        node_id: settings.node_id(),
    })
}

/// Current vector time of this node.
#[instrument(skip(state))]
async fn time(State(state): State<AppState>) -> axum::Json<Value> {
    let now = VectorClock::get(&state.service).get_time();
    axum::Json(json!({
        "clusterTime": now.cluster_time().to_wire(),
        "configTime": now.config_time().to_wire(),
    }))
}

/// Accepts a peer's message fields, advances the clock from them, and replies
/// with this node's own gossiped fields.
#[instrument(skip(state, headers, body))]
async fn gossip(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<axum::Json<Value>, ClepsydraError> {
    let Some(input) = body.as_object() else {
        return Err(ClepsydraError::BadValue {
            field: "body",
            detail: "expected a JSON object".to_string(),
        });
    };

    let op_ctx = operation_context_for(&headers);
    let clock = VectorClock::get(&state.service);
    clock.gossip_in(Some(&op_ctx), input, true, SessionTags::EMPTY)?;

    let mut reply = Document::new();
    reply.insert("ok".to_string(), json!(1));
    clock.gossip_out(Some(&op_ctx), &mut reply, SessionTags::EMPTY);
    Ok(axum::Json(Value::Object(reply)))
}

/// Builds the operation context for an HTTP request. Internal peers identify
/// themselves with a header and get a privileged session; everyone else is
/// an unauthenticated external client.
fn operation_context_for(headers: &HeaderMap) -> OperationContext {
    let client = if headers.contains_key(INTERNAL_CLIENT_HEADER) {
        Client::with_auth_session(
            SessionTags::INTERNAL_CLIENT,
            Arc::new(SessionAuthorization::privileged()),
        )
    } else {
        Client::with_auth_session(
            SessionTags::EMPTY,
            Arc::new(SessionAuthorization::unauthenticated()),
        )
    };
    OperationContext::for_client(Arc::new(client))
}

async fn handle_error(error: BoxError) -> impl IntoResponse {
    if error.is::<tower::timeout::error::Elapsed>() {
        return (StatusCode::REQUEST_TIMEOUT, Cow::from("request timed out"));
    }

    if error.is::<tower::load_shed::error::Overloaded>() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Cow::from("service is overloaded, try again later"),
        );
    }

    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Cow::from(format!("Unhandled internal error: {}", error)),
    )
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::Request;
    use tower::util::ServiceExt;

    use super::*;
    use crate::service::FeatureVersion;
    use crate::settings::Settings;

    async fn test_router() -> Router {
        let service = ServiceContext::new(Settings::default());
        VectorClock::register(&service, VectorClock::new());
        service
            .feature_compatibility()
            .set_version(FeatureVersion::FullyUpgraded);
        api(service).await.unwrap()
    }

    fn gossip_request(body: Value, internal: bool) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/gossip")
            .header("content-type", "application/json");
        if internal {
            builder = builder.header(INTERNAL_CLIENT_HEADER, "1");
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let router = test_router().await;
        let response = router
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_gossip_advances_clock_and_replies_with_time() {
        let router = test_router().await;

        let body = json!({
            "$clusterTime": {
                "clusterTime": {"t": 100, "i": 5},
                "signature": {
                    "hash": crate::clock::TimeProof::DUMMY.to_base64(),
                    "keyId": 0,
                },
            },
            "$configTime": {"t": 50, "i": 2},
        });
        let response = router
            .clone()
            .oneshot(gossip_request(body, true))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let reply = body_json(response).await;
        assert_eq!(reply["ok"], json!(1));
        assert_eq!(reply["$clusterTime"]["clusterTime"], json!({"t": 100, "i": 5}));
        assert_eq!(reply["$configTime"], json!({"t": 50, "i": 2}));

        let response = router
            .oneshot(Request::get("/time").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let times = body_json(response).await;
        assert_eq!(times["clusterTime"], json!({"t": 100, "i": 5}));
        assert_eq!(times["configTime"], json!({"t": 50, "i": 2}));
    }

    #[tokio::test]
    async fn test_external_gossip_omits_config_time() {
        let router = test_router().await;

        let body = json!({
            "$clusterTime": {
                "clusterTime": {"t": 100, "i": 5},
                "signature": {
                    "hash": crate::clock::TimeProof::DUMMY.to_base64(),
                    "keyId": 0,
                },
            },
        });
        let response = router.oneshot(gossip_request(body, false)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let reply = body_json(response).await;
        assert!(reply.get("$clusterTime").is_some());
        assert!(reply.get("$configTime").is_none());
    }

    #[tokio::test]
    async fn test_gossip_rejects_malformed_fields() {
        let router = test_router().await;

        let body = json!({"$clusterTime": "not a document"});
        let response = router.oneshot(gossip_request(body, true)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let reply = body_json(response).await;
        assert_eq!(reply["error"]["type"], json!("bad_value"));
    }
}
