//! HTTP listener tests: ephemeral ports, reload, handler freezing, stop, grace.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use axum::routing::get;

use service_host::component::Component;
use service_host::config::ListenerConfig;
use service_host::http::{HttpListener, ListenerError, X_REQUEST_ID};

mod common;

fn local(port: u16) -> ListenerConfig {
    ListenerConfig {
        port,
        bind_address: "127.0.0.1".into(),
        shutdown_grace: Duration::from_secs(2),
        ..ListenerConfig::default()
    }
}

/// Start `listener.run()` on its own task and wait until it serves.
async fn spawn_run(
    listener: &HttpListener,
) -> tokio::task::JoinHandle<Result<(), service_host::ComponentError>> {
    let runner = listener.clone();
    let handle = tokio::spawn(async move { runner.run().await });
    common::wait_until_serving(listener).await;
    handle
}

/// A port that is free right now.
fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

#[tokio::test]
async fn disabled_listener_binds_nothing() {
    let port = free_port();
    let listener = HttpListener::new("api").with_config(local(port));

    listener.run().await.unwrap();
    assert!(!listener.is_running());
    assert!(!common::accepts(port).await);
}

#[tokio::test]
async fn ephemeral_port_is_reported_and_reachable() {
    let listener = HttpListener::new("api").with_config(local(0));
    listener.route("/ping", get(|| async { "pong" })).unwrap();
    let run = spawn_run(&listener).await;

    let port = listener.port();
    assert_ne!(port, 0);
    assert_eq!(listener.local_addr().unwrap().port(), port);

    let response = common::http_client()
        .get(format!("{}/ping", listener.uri()))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key(X_REQUEST_ID.as_str()));
    assert_eq!(response.text().await.unwrap(), "pong");

    listener.stop().await.unwrap();
    run.await.unwrap().unwrap();
}

#[tokio::test]
async fn late_handler_is_rejected_and_never_served() {
    let listener = HttpListener::new("api").with_config(local(0));
    listener.route("/early", get(|| async { "early" })).unwrap();
    let run = spawn_run(&listener).await;

    let late = listener.route("/late", get(|| async { "late" }));
    assert!(matches!(late, Err(ListenerError::HandlersFrozen)));

    let client = common::http_client();
    let early = client
        .get(format!("{}/early", listener.uri()))
        .send()
        .await
        .unwrap();
    assert_eq!(early.status(), StatusCode::OK);
    let late = client
        .get(format!("{}/late", listener.uri()))
        .send()
        .await
        .unwrap();
    assert_eq!(late.status(), StatusCode::NOT_FOUND);

    listener.stop().await.unwrap();
    run.await.unwrap().unwrap();
}

#[tokio::test]
async fn stop_releases_the_port() {
    let listener = HttpListener::new("api").with_config(local(0));
    listener.route("/", get(|| async { "root" })).unwrap();
    let run = spawn_run(&listener).await;
    let port = listener.port();
    assert!(common::accepts(port).await);

    listener.stop().await.unwrap();
    run.await.unwrap().unwrap();

    assert!(!listener.is_running());
    assert!(!common::accepts(port).await);
    // Stopping again is harmless.
    listener.stop().await.unwrap();
}

#[tokio::test]
async fn reload_moves_to_the_new_port() {
    let first = free_port();
    let listener = HttpListener::new("api").with_config(local(first));
    listener.route("/ping", get(|| async { "pong" })).unwrap();
    let run = spawn_run(&listener).await;
    assert_eq!(listener.port(), first);

    let second = free_port();
    listener.reload(local(second)).await.unwrap();

    assert_eq!(listener.port(), second);
    assert!(listener.is_running());
    assert!(!common::accepts(first).await);
    let body = common::http_client()
        .get(format!("http://127.0.0.1:{second}/ping"))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(body, "pong");

    // `run` keeps waiting across the reload.
    assert!(!run.is_finished());
    listener.stop().await.unwrap();
    run.await.unwrap().unwrap();
    assert!(!common::accepts(second).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn port_reads_during_reload_see_old_or_new() {
    let listener = HttpListener::new("api").with_config(local(0));
    listener.route("/", get(|| async { "" })).unwrap();
    let run = spawn_run(&listener).await;
    let old = listener.port();

    let reader = listener.clone();
    let readers = tokio::spawn(async move {
        let mut seen = Vec::new();
        for _ in 0..200 {
            seen.push(reader.port());
            tokio::task::yield_now().await;
        }
        seen
    });

    let new = free_port();
    listener.reload(local(new)).await.unwrap();

    for port in readers.await.unwrap() {
        assert!(port == old || port == new, "torn port read: {port}");
    }
    listener.stop().await.unwrap();
    run.await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn port_reads_during_ephemeral_reload_never_see_zero() {
    let listener = HttpListener::new("api").with_config(local(0));
    listener.route("/", get(|| async { "" })).unwrap();
    let run = spawn_run(&listener).await;
    let old = listener.port();

    let reader = listener.clone();
    let done = Arc::new(AtomicBool::new(false));
    let finished = Arc::clone(&done);
    let readers = tokio::spawn(async move {
        let mut seen = Vec::new();
        while !finished.load(Ordering::Acquire) {
            seen.push(reader.port());
            tokio::task::yield_now().await;
        }
        seen
    });

    listener.reload(local(0)).await.unwrap();
    done.store(true, Ordering::Release);
    let new = listener.port();
    assert_ne!(new, 0);

    for port in readers.await.unwrap() {
        assert!(port == old || port == new, "port read during reload: {port}");
    }
    listener.stop().await.unwrap();
    run.await.unwrap().unwrap();
}

#[tokio::test]
async fn slow_request_exceeding_grace_is_reported_and_cut_off() {
    let listener = HttpListener::new("api").with_config(ListenerConfig {
        shutdown_grace: Duration::from_millis(100),
        ..local(0)
    });
    listener
        .route(
            "/slow",
            get(|| async {
                tokio::time::sleep(Duration::from_millis(1500)).await;
                "done"
            }),
        )
        .unwrap();
    let run = spawn_run(&listener).await;

    let url = format!("{}/slow", listener.uri());
    let request = tokio::spawn(async move {
        let response = common::http_client().get(url).send().await?;
        response.text().await
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    let outcome = listener.stop().await;
    assert!(matches!(
        outcome,
        Err(service_host::component::StopError::GraceExceeded { .. })
    ));
    assert!(!listener.is_running());
    run.await.unwrap().unwrap();

    // The connection is torn down with the server, well before the handler would answer.
    let answered = tokio::time::timeout(Duration::from_millis(1000), request)
        .await
        .expect("in-flight request outlived the grace period")
        .unwrap();
    assert!(answered.is_err(), "request completed after abort: {answered:?}");
}

#[tokio::test]
async fn request_within_grace_completes_during_stop() {
    let listener = HttpListener::new("api").with_config(local(0));
    listener
        .route(
            "/slow",
            get(|| async {
                tokio::time::sleep(Duration::from_millis(300)).await;
                "done"
            }),
        )
        .unwrap();
    let run = spawn_run(&listener).await;

    let url = format!("{}/slow", listener.uri());
    let request = tokio::spawn(async move {
        let response = common::http_client().get(url).send().await?;
        response.text().await
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    listener.stop().await.unwrap();
    run.await.unwrap().unwrap();
    assert_eq!(request.await.unwrap().unwrap(), "done");
}

#[tokio::test]
async fn configure_reads_prefixed_options() {
    use service_host::config::{FlagSet, ConfigLoader};

    let listener = HttpListener::with_prefix("public", "web");
    let mut flags = FlagSet::new();
    listener
        .init_flags(&mut flags.scoped(listener.name(), listener.prefix()))
        .unwrap();
    assert!(flags.get("web.port").is_some());

    let resolved = ConfigLoader::new()
        .with_env_vars(Vec::<(String, String)>::new())
        .with_overrides(["web.port=8089", "web.bind_address=::1"])
        .resolve(&flags)
        .unwrap();
    listener.configure(&resolved.view("web")).unwrap();

    assert_eq!(listener.port(), 8089);
    assert_eq!(listener.uri(), "http://[::1]:8089");

    let bad = ConfigLoader::new()
        .with_env_vars(Vec::<(String, String)>::new())
        .with_overrides(["web.port=70000"])
        .resolve(&flags)
        .unwrap();
    assert!(listener.configure(&bad.view("web")).is_err());
}
