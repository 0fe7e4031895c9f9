#![allow(non_snake_case)]
use axum::{
    Json,
    Router,
    extract::{
        Path,
        State,
    },
    http::StatusCode,
    routing::{
        get,
        post,
    },
};
use ludo_session_sync::{
    Action,
    ActionResult,
    ActorId,
    GameSession,
    HttpSessionAuthority,
    SessionAuthority,
    SessionId,
    TransportError,
    test_helpers::*,
};
use serde_json::{
    Value,
    json,
};
use std::{
    net::SocketAddr,
    sync::{
        Arc,
        Mutex,
    },
};
use tokio::task::JoinHandle;

async fn serve_router(router: Router) -> (String, JoinHandle<()>) {
    let addr = SocketAddr::from(([127, 0, 0, 1], 0));
    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    let actual_addr = listener.local_addr().unwrap();
    let base_url = format!("http://{actual_addr}");

    let handle = tokio::spawn(async move {
        axum::serve(listener, router.into_make_service())
            .await
            .unwrap();
    });

    (base_url, handle)
}

fn game_router() -> Router {
    Router::new().route(
        "/games/:id",
        get(|Path(id): Path<String>| async move {
            match id.as_str() {
                "game-1" => Ok(Json(arb_game_session())),
                "broken" => Err((StatusCode::INTERNAL_SERVER_ERROR, "database offline")),
                "garbled" => Err((StatusCode::OK, "{ not json")),
                _ => Err((StatusCode::NOT_FOUND, "no such game")),
            }
        }),
    )
}

async fn fetch(
    authority: &HttpSessionAuthority,
    session: &str,
) -> Result<Option<GameSession>, TransportError> {
    SessionAuthority::<GameSession>::fetch_session_state(authority, &SessionId::new(session))
        .await
}

async fn submit(
    authority: &HttpSessionAuthority,
    action: Action,
) -> Result<ActionResult<GameSession>, TransportError> {
    SessionAuthority::<GameSession>::submit_action(
        authority,
        &SessionId::new("game-1"),
        &ActorId::new("red"),
        &action,
    )
    .await
}

#[tokio::test]
async fn fetch_session_state__known_game__returns_session() {
    // given
    let (base_url, handle) = serve_router(game_router()).await;
    let authority = HttpSessionAuthority::new(format!("{base_url}/")).unwrap();

    // when
    let fetched = fetch(&authority, "game-1").await.unwrap();

    // then
    assert_eq!(fetched, Some(arb_game_session()));
    handle.abort();
}

#[tokio::test]
async fn fetch_session_state__unknown_game__returns_none() {
    // given
    let (base_url, handle) = serve_router(game_router()).await;
    let authority = HttpSessionAuthority::new(base_url).unwrap();

    // when
    let fetched = fetch(&authority, "game-404").await.unwrap();

    // then
    assert_eq!(fetched, None);
    handle.abort();
}

#[tokio::test]
async fn fetch_session_state__server_error__reports_status_and_body() {
    // given
    let (base_url, handle) = serve_router(game_router()).await;
    let authority = HttpSessionAuthority::new(base_url).unwrap();

    // when
    let err = fetch(&authority, "broken").await.unwrap_err();

    // then
    let TransportError::Status { status, body } = err else {
        panic!("expected a status error");
    };
    assert_eq!(status, reqwest::StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, "database offline");
    handle.abort();
}

#[tokio::test]
async fn fetch_session_state__malformed_payload__reports_decode_error() {
    // given
    let (base_url, handle) = serve_router(game_router()).await;
    let authority = HttpSessionAuthority::new(base_url).unwrap();

    // when
    let err = fetch(&authority, "garbled").await.unwrap_err();

    // then
    assert!(matches!(err, TransportError::Decode(_)));
    handle.abort();
}

#[tokio::test]
async fn fetch_session_state__nothing_listening__reports_http_error() {
    // given
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let authority = HttpSessionAuthority::new(format!("http://{addr}")).unwrap();

    // when
    let err = fetch(&authority, "game-1").await.unwrap_err();

    // then
    assert!(matches!(err, TransportError::Http(_)));
}

#[tokio::test]
async fn submit_action__accepted_with_state__posts_actor_and_action() {
    // given
    let received = Arc::new(Mutex::new(None::<Value>));
    let moved = arb_game_session().with_piece_at("red", 0, 4).unwrap();
    let response = json!({ "state": moved });
    let router = Router::new()
        .route(
            "/games/:id/actions",
            post(
                move |State(received): State<Arc<Mutex<Option<Value>>>>,
                      Json(body): Json<Value>| async move {
                    *received.lock().unwrap() = Some(body);
                    Json(response)
                },
            ),
        )
        .with_state(received.clone());
    let (base_url, handle) = serve_router(router).await;
    let authority = HttpSessionAuthority::new(base_url).unwrap();

    // when
    let result = submit(&authority, Action::MovePiece { piece: 0, steps: 4 })
        .await
        .unwrap();

    // then
    assert_eq!(result, ActionResult::Accepted(Some(moved)));
    let body = received.lock().unwrap().clone().unwrap();
    assert_eq!(
        body,
        json!({
            "actor": "red",
            "action": { "type": "movePiece", "piece": 0, "steps": 4 }
        })
    );
    handle.abort();
}

#[tokio::test]
async fn submit_action__empty_success__accepts_without_state() {
    // given
    let router = Router::new().route(
        "/games/:id/actions",
        post(|| async { StatusCode::NO_CONTENT }),
    );
    let (base_url, handle) = serve_router(router).await;
    let authority = HttpSessionAuthority::new(base_url).unwrap();

    // when
    let result = submit(&authority, Action::RollDice).await.unwrap();

    // then
    assert_eq!(result, ActionResult::Accepted(None));
    handle.abort();
}

#[tokio::test]
async fn submit_action__conflict__is_rejected_with_reason() {
    // given
    let router = Router::new().route(
        "/games/:id/actions",
        post(|| async { (StatusCode::CONFLICT, "not your turn") }),
    );
    let (base_url, handle) = serve_router(router).await;
    let authority = HttpSessionAuthority::new(base_url).unwrap();

    // when
    let result = submit(&authority, Action::RollDice).await.unwrap();

    // then
    assert_eq!(result, ActionResult::Rejected("not your turn".to_string()));
    handle.abort();
}

#[tokio::test]
async fn submit_action__server_error__is_transport_error() {
    // given
    let router = Router::new().route(
        "/games/:id/actions",
        post(|| async { (StatusCode::BAD_GATEWAY, "upstream down") }),
    );
    let (base_url, handle) = serve_router(router).await;
    let authority = HttpSessionAuthority::new(base_url).unwrap();

    // when
    let err = submit(&authority, Action::Leave).await.unwrap_err();

    // then
    assert!(matches!(
        err,
        TransportError::Status { status, .. } if status == reqwest::StatusCode::BAD_GATEWAY
    ));
    handle.abort();
}
