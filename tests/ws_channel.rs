use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::{Request, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use rider_flow::api::rest::router;
use rider_flow::channel::ws::WsConnector;
use rider_flow::client::api::HttpRiderApi;
use rider_flow::config::Config;
use rider_flow::location::{DeviceReport, PermissionStatus};
use rider_flow::models::order::GeoPoint;
use rider_flow::models::step::FlowStep;
use rider_flow::state::AppState;
use rider_flow::store::session::SessionStore;
use rider_flow::store::{KeyValueStore, MemoryStore};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tower::ServiceExt;

type Seen = mpsc::UnboundedSender<Value>;

async fn socket_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<HashMap<String, String>>,
    State(seen): State<Seen>,
) -> impl IntoResponse {
    let _ = seen.send(json!({ "event": "connect", "data": query }));
    ws.on_upgrade(move |socket| fake_backend(socket, seen))
}

/// Records every client frame and assigns an order once the rider registers.
async fn fake_backend(mut socket: WebSocket, seen: Seen) {
    while let Some(Ok(message)) = socket.recv().await {
        let Message::Text(text) = message else {
            continue;
        };
        let Ok(frame) = serde_json::from_str::<Value>(&text) else {
            continue;
        };
        let registered = frame["event"] == "registerRider";
        let _ = seen.send(frame);

        if registered {
            let assignment = json!({
                "event": "orderAssigned",
                "data": {
                    "orderId": "ord-ws",
                    "orderPayload": {
                        "_doc": { "merchantId": { "shopName": "Corner Store" } },
                        "deliveryAmount": "75"
                    }
                }
            });
            if socket
                .send(Message::Text(assignment.to_string()))
                .await
                .is_err()
            {
                break;
            }
        }
    }
}

async fn start_fake_backend() -> (String, mpsc::UnboundedReceiver<Value>) {
    let (seen_tx, seen_rx) = mpsc::unbounded_channel();
    let app = Router::new()
        .route("/socket", get(socket_handler))
        .with_state(seen_tx);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (format!("http://{addr}"), seen_rx)
}

async fn next_event(seen: &mut mpsc::UnboundedReceiver<Value>, name: &str) -> Value {
    timeout(Duration::from_secs(5), async {
        loop {
            let frame = seen.recv().await.expect("fake backend running");
            if frame["event"] == name {
                return frame;
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("no {name} frame within deadline"))
}

fn post_request(uri: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn online_rider_receives_assignment_over_websocket() {
    let (backend_url, mut seen) = start_fake_backend().await;
    let config = Config {
        backend_url: backend_url.clone(),
        reconnect_delay: Duration::from_millis(50),
        ..Config::default()
    };
    let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let session = SessionStore::new(store.clone());
    session.save("token-1", "rider-1", true).await.unwrap();

    let api = Arc::new(
        HttpRiderApi::new(&backend_url, config.api_timeout, session.clone()).unwrap(),
    );
    let connector = Arc::new(WsConnector::new(&backend_url).unwrap());
    let state = Arc::new(AppState::new(&config, store, api, connector).await.unwrap());
    state
        .device
        .report(DeviceReport {
            permission: Some(PermissionStatus::Granted),
            services_enabled: Some(true),
            position: Some(GeoPoint {
                lat: 14.68,
                lng: 77.6,
            }),
        })
        .await;
    let app = router(state.clone());

    let res = app
        .clone()
        .oneshot(post_request("/presence/online"))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let connect = next_event(&mut seen, "connect").await;
    assert_eq!(connect["data"]["riderId"], "rider-1");
    assert_eq!(connect["data"]["role"], "deliveryRider");

    let register = next_event(&mut seen, "registerRider").await;
    assert_eq!(register["data"]["riderId"], "rider-1");

    let join = next_event(&mut seen, "joinOrderRoom").await;
    assert_eq!(join["data"]["orderId"], "ord-ws");

    let active = state.flow.current().await.unwrap().unwrap();
    assert_eq!(active.step, FlowStep::Accept);
    assert_eq!(active.order.shop_name, "Corner Store");
    assert_eq!(active.order.delivery_amount, 75.0);

    let res = app
        .clone()
        .oneshot(post_request("/presence/offline"))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert!(!state.presence.status().await.online);
}

#[tokio::test]
async fn location_updates_reach_the_backend() {
    let (backend_url, mut seen) = start_fake_backend().await;
    let config = Config {
        backend_url: backend_url.clone(),
        ..Config::default()
    };
    let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let session = SessionStore::new(store.clone());
    session.save("token-1", "rider-9", true).await.unwrap();

    let api = Arc::new(
        HttpRiderApi::new(&backend_url, config.api_timeout, session).unwrap(),
    );
    let connector = Arc::new(WsConnector::new(&backend_url).unwrap());
    let state = AppState::new(&config, store, api, connector).await.unwrap();
    state
        .device
        .report(DeviceReport {
            permission: Some(PermissionStatus::Granted),
            services_enabled: Some(true),
            position: Some(GeoPoint {
                lat: 14.68,
                lng: 77.6,
            }),
        })
        .await;

    state.presence.go_online().await.unwrap();

    let update = next_event(&mut seen, "updateLocation").await;
    assert_eq!(update["data"]["riderId"], "rider-9");
    assert_eq!(update["data"]["lat"], 14.68);
    assert_eq!(update["data"]["lng"], 77.6);

    state.presence.go_offline().await;
}
