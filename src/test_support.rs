//! Shared helpers for unit tests.

use std::sync::{Arc, Mutex};

use axum::Router;
use reqwest::Url;
use tokio::net::TcpListener;
use tracing::Level;

use crate::logging::LogSink;

/// Serve `router` on a random local port and return its base URL.
pub async fn spawn_upstream(router: Router) -> Url {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind random port");
    let addr = listener.local_addr().expect("Failed to get local addr");

    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    Url::parse(&format!("http://{}", addr)).unwrap()
}

/// [`LogSink`] that keeps every message in memory.
#[derive(Debug, Default)]
pub struct RecordingLog {
    entries: Mutex<Vec<(Level, String)>>,
}

impl RecordingLog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn entries(&self) -> Vec<(Level, String)> {
        self.entries.lock().unwrap().clone()
    }
}

impl LogSink for RecordingLog {
    fn log(&self, level: Level, message: &str) {
        self.entries.lock().unwrap().push((level, message.to_string()));
    }
}
