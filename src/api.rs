//! Health & Status API endpoints
//!
//! Provides HTTP endpoints for monitoring and status:
//! - GET /health - Simple health check
//! - GET /metrics - Prometheus metrics
//! - GET /status - Queue depths, dead-letter count, uptime
//! - GET /dead-letters - Most recent dead-lettered items

#![allow(dead_code)]

use eyre::Result;
use prometheus::{Encoder, TextEncoder};
use serde::Serialize;
use sqlx::{PgPool, Row};
use std::net::SocketAddr;
use std::sync::OnceLock;
use std::time::Instant;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;

use crate::db;
use crate::metrics;
use crate::queue::{ATTESTATION_QUEUE, VALIDATION_QUEUE};

static START_TIME: OnceLock<Instant> = OnceLock::new();

#[derive(Serialize)]
struct StatusResponse {
    status: String,
    uptime_seconds: u64,
    queues: QueueStatus,
    dead_letters: u64,
}

#[derive(Serialize)]
struct QueueStatus {
    pending_validation: i64,
    pending_attestation: i64,
}

#[derive(Serialize)]
struct DeadLetterInfo {
    id: i64,
    queue: String,
    reason: String,
    created_at: String,
    payload: serde_json::Value,
}

async fn queue_depth(db: &PgPool, key: &str) -> Result<i64> {
    let row = sqlx::query("SELECT COUNT(*) AS n FROM queue_items WHERE queue_key = $1")
        .bind(key)
        .fetch_one(db)
        .await?;
    Ok(row.get("n"))
}

/// Start the API server (combines metrics and status endpoints)
pub async fn start_api_server(addr: SocketAddr, db: PgPool) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "API server started");

    START_TIME.get_or_init(Instant::now);
    metrics::UP.set(1.0);

    loop {
        let (mut socket, _) = listener.accept().await?;
        let db = db.clone();

        tokio::spawn(async move {
            let mut buf = [0u8; 1024];
            if socket.readable().await.is_ok() {
                let _ = socket.try_read(&mut buf);
            }

            let request = String::from_utf8_lossy(&buf);

            if request.contains("GET /metrics") {
                let encoder = TextEncoder::new();
                let metric_families = prometheus::gather();
                let mut buffer = Vec::new();
                let _ = encoder.encode(&metric_families, &mut buffer);

                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: {}\r\n\r\n",
                    buffer.len()
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.write_all(&buffer).await;
            } else if request.contains("GET /health") {
                let response =
                    "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: 2\r\n\r\nOK";
                let _ = socket.write_all(response.as_bytes()).await;
            } else if request.contains("GET /status") {
                let status = build_status_response(&db).await;
                let body = serde_json::to_string(&status).unwrap_or_else(|_| "{}".to_string());
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
            } else if request.contains("GET /dead-letters") {
                let dead = build_dead_letter_response(&db).await;
                let body = serde_json::to_string(&dead).unwrap_or_else(|_| "[]".to_string());
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
            } else {
                let response = "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n";
                let _ = socket.write_all(response.as_bytes()).await;
            }
        });
    }
}

async fn build_status_response(db: &PgPool) -> StatusResponse {
    let uptime = START_TIME.get().map(|t| t.elapsed().as_secs()).unwrap_or(0);
    let dead = db::dead_letter_count(db).await.unwrap_or(0);
    metrics::DEAD_LETTER_COUNT.set(dead as f64);

    StatusResponse {
        status: "ok".to_string(),
        uptime_seconds: uptime,
        queues: QueueStatus {
            pending_validation: queue_depth(db, VALIDATION_QUEUE).await.unwrap_or(0),
            pending_attestation: queue_depth(db, ATTESTATION_QUEUE).await.unwrap_or(0),
        },
        dead_letters: dead,
    }
}

async fn build_dead_letter_response(db: &PgPool) -> Vec<DeadLetterInfo> {
    db::list_dead_letters(db, 50)
        .await
        .unwrap_or_default()
        .into_iter()
        .map(|record| DeadLetterInfo {
            id: record.id,
            queue: record.queue_key,
            reason: record.reason,
            created_at: record.created_at.to_rfc3339(),
            payload: record.payload,
        })
        .collect()
}
