#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use classdeck_core::config::Config;
use classdeck_core::engine::CreateSessionParams;
use classdeck_core::engine::EndpointCtx;
use classdeck_core::engine::SessionEngine;
use classdeck_core::registry::CHANNEL_CAPACITY;
use classdeck_protocol::ServerEvent;
use classdeck_protocol::SessionDoc;
use tokio::sync::mpsc;

pub const RECV_TIMEOUT: Duration = Duration::from_secs(2);

/// An endpoint as the engine sees one: a context plus the receiving half of
/// its outbound channel.
pub struct TestEndpoint {
    pub ctx: EndpointCtx,
    pub rx: mpsc::Receiver<ServerEvent>,
}

impl TestEndpoint {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        Self {
            ctx: EndpointCtx::new(tx),
            rx,
        }
    }

    /// Next event or panic; generous timeout so CI hiccups do not flake.
    pub async fn recv(&mut self) -> ServerEvent {
        tokio::time::timeout(RECV_TIMEOUT, self.rx.recv())
            .await
            .expect("timed out waiting for an event")
            .expect("event channel closed")
    }

    /// Assert silence for `window`.
    pub async fn expect_nothing(&mut self, window: Duration) {
        if let Ok(event) = tokio::time::timeout(window, self.rx.recv()).await {
            panic!("expected no event, got {event:?}");
        }
    }
}

pub fn test_config(scratch_root: &std::path::Path) -> Config {
    Config {
        temp_dir: scratch_root.join("scratch"),
        // Keep the scheduler quiet unless a test opts in with a short
        // interval of its own.
        summary_interval: Duration::from_secs(60),
        disconnect_grace: Duration::from_millis(200),
        ..Config::default()
    }
}

pub fn engine(scratch_root: &std::path::Path) -> Arc<SessionEngine> {
    engine_with(test_config(scratch_root))
}

pub fn engine_with(config: Config) -> Arc<SessionEngine> {
    SessionEngine::new(config).expect("engine must build")
}

pub async fn create_session(engine: &Arc<SessionEngine>) -> String {
    engine
        .create_session(CreateSessionParams {
            title: "Intro to Python".to_string(),
            language: "python".to_string(),
            ..Default::default()
        })
        .await
        .expect("create session")
        .to_string()
}

pub fn session_data(event: ServerEvent) -> (SessionDoc, Option<String>) {
    match event {
        ServerEvent::SessionData(data) => (data.session, data.reconnect_token),
        other => panic!("expected session-data, got {other:?}"),
    }
}

pub fn python_available() -> bool {
    std::process::Command::new("python3")
        .arg("--version")
        .output()
        .is_ok()
}
