//! End-to-end framework exercise: model registration, CRUD synthesis, route
//! binding, listen/close, and provider substitution through the instance.

use axum::body::Body;
use axum::extract::Request;
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tsubaki::prelude::*;

#[derive(Default, Serialize, Deserialize, Clone)]
struct Task {
    #[serde(skip)]
    id: Option<DocumentId>,
    title: String,
    done: bool,
}

impl Model for Task {
    fn id(&self) -> Option<&DocumentId> {
        self.id.as_ref()
    }
    fn set_id(&mut self, id: DocumentId) {
        self.id = Some(id);
    }
}

async fn raw_request(addr: SocketAddr, request: String) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    response
}

async fn http_get(addr: SocketAddr, path: &str) -> String {
    raw_request(
        addr,
        format!("GET {path} HTTP/1.1\r\nhost: localhost\r\nconnection: close\r\n\r\n"),
    )
    .await
}

async fn http_post(addr: SocketAddr, path: &str, body: &str) -> String {
    raw_request(
        addr,
        format!(
            "POST {path} HTTP/1.1\r\nhost: localhost\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
            body.len()
        ),
    )
    .await
}

#[tokio::test]
async fn full_lifecycle_round_trip() {
    model::<Task>()
        .db("taskDb", "tasks")
        .promiscuous(true)
        .field(FieldRule::new("title").store_as("t"))
        .register()
        .unwrap();

    let store = Arc::new(MemoryStore::new());

    // the handlers talk to the same backing store the instance manages
    let connections = StoreConnections::new();
    connections.add("taskDb", store.clone());
    let crud = Arc::new(Crud::<Task>::synthesize(&connections).unwrap());

    let create = {
        let crud = crud.clone();
        Route::new("create", move |req: Request<Body>| {
            let crud = crud.clone();
            async move {
                let bytes = axum::body::to_bytes(req.into_body(), 1024 * 1024)
                    .await
                    .unwrap();
                let mut task: Task = serde_json::from_slice(&bytes).unwrap();
                crud.create(&mut task).await.unwrap();
                let id = task.id().unwrap().as_str().to_string();
                (StatusCode::CREATED, Json(json!({ "id": id })))
            }
        })
        .method("post")
    };

    let list = {
        let crud = crud.clone();
        Route::new("list", move |_req: Request<Body>| {
            let crud = crud.clone();
            async move {
                let tasks = crud.get(Document::new()).await.unwrap();
                let titles: Vec<String> = tasks.into_iter().map(|t| t.title).collect();
                Json(titles)
            }
        })
    };

    let app = Tsubaki::builder()
        .store("taskDb", store.clone())
        .routable(
            Routable::new("TaskApi")
                .base_path("/task")
                .route(create)
                .route(list),
        )
        .build()
        .unwrap();

    app.listen(ListenOptions {
        address: Some("127.0.0.1".to_string()),
        port: Some(0),
        boot_message: Some(String::new()),
    })
    .await
    .unwrap();
    let addr = app.local_addr().unwrap();
    assert!(store.is_connected());

    let response = http_post(addr, "/task", r#"{"title":"write tests","done":false}"#).await;
    assert!(response.contains("201 Created"), "got: {response}");

    let response = http_get(addr, "/task").await;
    assert!(response.contains("200 OK"), "got: {response}");
    assert!(response.contains("write tests"));

    // the renamed field landed in storage, not the source name
    let mut cursor = crud.get_cursor(Document::new(), None).unwrap();
    let stored = cursor.to_array().await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0]["t"], "write tests");
    assert!(!stored[0].contains_key("title"));

    app.close().await.unwrap();
    assert!(!store.is_connected());
    // closing again is still success
    app.close().await.unwrap();
}

#[tokio::test]
async fn provider_substitution_through_the_instance() {
    trait Notifier: Send + Sync {
        fn channel(&self) -> &'static str;
    }

    struct EmailNotifier;
    impl Notifier for EmailNotifier {
        fn channel(&self) -> &'static str {
            "email"
        }
    }

    struct RecordingNotifier;
    impl Notifier for RecordingNotifier {
        fn channel(&self) -> &'static str {
            "recording"
        }
    }

    struct AlertService {
        notifier: Arc<dyn Notifier>,
    }

    injectable::<EmailNotifier>()
        .provides::<dyn Notifier, _>(|n| n)
        .construct(|_| Ok(EmailNotifier));
    injectable::<RecordingNotifier>()
        .provides::<dyn Notifier, _>(|n| n)
        .construct(|_| Ok(RecordingNotifier));
    injectable::<AlertService>()
        .depends_on::<dyn Notifier>()
        .construct(|deps| {
            Ok(AlertService {
                notifier: deps.get_as::<dyn Notifier>()?,
            })
        });

    let app = Tsubaki::builder()
        .provider(Provide::using::<dyn Notifier, EmailNotifier>())
        .provider(Provide::class::<AlertService>())
        .build()
        .unwrap();
    let service = app.get_provider::<AlertService>().unwrap();
    assert_eq!(service.notifier.channel(), "email");
    assert_eq!(
        app.get_provider_as::<dyn Notifier>().unwrap().channel(),
        "email"
    );
    app.deregister_dependencies();

    // same graph, substituted binding: the mock reaches the consumer too
    let mocked = Tsubaki::builder()
        .provider(Provide::using::<dyn Notifier, RecordingNotifier>())
        .provider(Provide::class::<AlertService>())
        .build()
        .unwrap();
    let service = mocked.get_provider::<AlertService>().unwrap();
    assert_eq!(service.notifier.channel(), "recording");
    mocked.deregister_dependencies();
}
