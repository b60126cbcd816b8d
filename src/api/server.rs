//! Console HTTP server setup and route wiring.

use super::state::ApiState;
use super::{media, memories, queue};
use crate::config::AdminConsoleConfig;
use axum::Router;
use axum::routing::{get, post, put};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

fn router(state: Arc<ApiState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/queue", get(queue::get_queue))
        .route("/api/agents/{agent}/xsend", post(queue::create_xsend))
        .route(
            "/api/agents/{agent}/conversations/{channel}/clear-queue",
            post(queue::clear_conversation_queue),
        )
        .route(
            "/api/agents/{agent}/schedule",
            get(memories::get_schedule).put(memories::put_schedule),
        )
        .route(
            "/api/agents/{agent}/conversations/{channel}/summaries",
            get(memories::list_summaries).delete(memories::clear_summaries),
        )
        .route(
            "/api/agents/{agent}/conversations/{channel}/gagged",
            put(memories::put_gagged),
        )
        .route(
            "/api/agents/{agent}/conversations/{channel}/{table}",
            get(memories::list_conversation_entries),
        )
        .route(
            "/api/agents/{agent}/conversations/{channel}/{table}/{id}",
            put(memories::put_conversation_entry),
        )
        .route(
            "/api/agents/{agent}/conversations/{channel}/media/{unique_id}",
            get(media::export_media),
        )
        .route(
            "/api/agents/{agent}/stickers/import",
            post(media::import_sticker_set),
        )
        .route(
            "/api/agents/{agent}/{table}",
            get(memories::list_agent_entries),
        )
        .route(
            "/api/agents/{agent}/{table}/{id}",
            put(memories::put_agent_entry).delete(delete_agent_entry),
        )
        .layer(cors)
        .with_state(state)
}

/// DELETE is sugar for PUT with empty content.
async fn delete_agent_entry(
    state: axum::extract::State<Arc<ApiState>>,
    path: axum::extract::Path<(String, String, String)>,
) -> Result<axum::Json<serde_json::Value>, super::state::ApiError> {
    memories::put_agent_entry(
        state,
        path,
        axum::Json(memories::EntryBody {
            content: String::new(),
        }),
    )
    .await
}

/// Start the console listener. Returns the join handle of the serving
/// task, or None when startup fails (the core keeps running without it).
pub async fn start_admin_console(
    config: &AdminConsoleConfig,
    state: Arc<ApiState>,
) -> Option<tokio::task::JoinHandle<()>> {
    let address: SocketAddr = match format!("{}:{}", config.host, config.port).parse() {
        Ok(address) => address,
        Err(error) => {
            warn!(%error, "invalid admin console address");
            return None;
        }
    };
    if config.ssl_cert.is_some() || config.ssl_key.is_some() {
        // TLS terminates in front of the console; serving it directly is
        // handled by the deployment proxy.
        warn!("SSL cert/key are configured; expecting a terminating proxy in front");
    }

    let listener = match tokio::net::TcpListener::bind(address).await {
        Ok(listener) => listener,
        Err(error) => {
            warn!(%address, %error, "admin console failed to bind");
            return None;
        }
    };
    info!(%address, "admin console listening");

    let app = router(state);
    Some(tokio::spawn(async move {
        if let Err(error) = axum::serve(listener, app).await {
            warn!(%error, "admin console server exited");
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::testing::agent_fixture;
    use crate::chat::testing::RecordingTransport;
    use crate::handlers::testing::ScriptedLlm;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt as _;

    async fn test_app(dir: &std::path::Path) -> (Router, crate::agent::AgentDeps) {
        let (agent, deps) = agent_fixture(dir, ScriptedLlm::empty()).await;
        agent.set_transport(Arc::new(RecordingTransport::new(1)));
        (router(ApiState::new(deps.clone())), deps)
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn memory_put_list_delete_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _deps) = test_app(dir.path()).await;

        let put = Request::builder()
            .method("PUT")
            .uri("/api/agents/Wendy/memories/m1")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"content": "likes tea"}"#))
            .unwrap();
        let response = app.clone().oneshot(put).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let list = Request::builder()
            .uri("/api/agents/Wendy/memories")
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(list).await.unwrap();
        let value = body_json(response).await;
        assert_eq!(value["entries"][0]["content"], "likes tea");

        let delete = Request::builder()
            .method("DELETE")
            .uri("/api/agents/Wendy/memories/m1")
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(delete).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let list = Request::builder()
            .uri("/api/agents/Wendy/memories")
            .body(Body::empty())
            .unwrap();
        let value = body_json(app.clone().oneshot(list).await.unwrap()).await;
        assert_eq!(value["entries"].as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn unknown_agent_is_404() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _deps) = test_app(dir.path()).await;
        let request = Request::builder()
            .uri("/api/agents/Nobody/memories")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let value = body_json(response).await;
        assert!(value["error"].as_str().unwrap().contains("Nobody"));
    }

    #[tokio::test]
    async fn console_xsend_bypasses_gag() {
        let dir = tempfile::tempdir().unwrap();
        let (app, deps) = test_app(dir.path()).await;
        deps.storage.set_gagged(1, 30, true).await.unwrap();

        let request = Request::builder()
            .method("POST")
            .uri("/api/agents/Wendy/xsend")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"target_channel_id": 30, "intent": "say hi"}"#))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let queue = deps.queue.lock().unwrap();
        let graph = queue.graph_for_conversation(1, 30).expect("graph created");
        let received = graph.tasks.iter().find(|t| t.is_received()).unwrap();
        assert_eq!(received.param_str("xsend_intent"), Some("say hi"));
    }

    #[tokio::test]
    async fn clear_queue_removes_the_conversation_graph() {
        let dir = tempfile::tempdir().unwrap();
        let (app, deps) = test_app(dir.path()).await;
        {
            let mut queue = deps.queue.lock().unwrap();
            crate::tasks::insert_received_task(
                &mut queue,
                crate::tasks::ReceivedInsert::new(1, 2),
            );
        }

        let request = Request::builder()
            .method("POST")
            .uri("/api/agents/Wendy/conversations/2/clear-queue")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(deps.queue.lock().unwrap().is_empty());
    }
}
