//! HTTP client for the recorder API.
//!
//! This module provides the production [`TrackerApi`]:
//! - Connection pooling with keep-alive (polls reuse one connection)
//! - Per-request timeout from [`TrackerConfig::request_timeout`]
//! - Retry with exponential backoff on 429 only; anything else is left to the poll schedule
//! - Non-2xx bodies are still decoded so `success: false` reaches the caller as a protocol failure

use log::{debug, info, warn};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use crate::api::{
    Acknowledged, DetectRange, DetectResponse, PollRequest, PollResponse, SessionResponse,
    StartRequest, StatusResponse, TrackKind, TrackResponse, TrackerApi,
};
use crate::{Result, TrackerConfig, TrackerError};

/// Reply to `POST /api/live/stop`.
#[derive(Debug, Deserialize)]
struct StopResponse {
    success: bool,
    #[serde(default)]
    error: Option<String>,
}

impl Acknowledged for StopResponse {
    fn success(&self) -> bool {
        self.success
    }

    fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }
}

/// Backoff after the `attempt`-th consecutive 429: 1s, 2s, 4s max.
fn backoff_for(attempt: u32) -> Duration {
    Duration::from_millis(500 * (1 << attempt.min(3)))
}

/// Recorder client over HTTP/JSON.
pub struct HttpTrackerApi {
    client: Client,
    base_url: String,
    max_retries: u32,
    consecutive_429s: AtomicU32,
}

impl HttpTrackerApi {
    pub fn new(config: &TrackerConfig) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .tcp_keepalive(Duration::from_secs(30))
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| TrackerError::Transport(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            max_retries: config.max_retries,
            consecutive_429s: AtomicU32::new(0),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send<T, F>(&self, label: &str, build: F) -> Result<T>
    where
        T: DeserializeOwned,
        F: Fn() -> RequestBuilder,
    {
        let mut retries = 0;
        let req_start = Instant::now();

        loop {
            let resp = build().send().await.map_err(|e| {
                warn!("[TrackerHttp {}] Request error after {:?}: {}", label, req_start.elapsed(), e);
                TrackerError::Transport(format!("Request error: {}", e))
            })?;
            let status = resp.status();

            if status == StatusCode::TOO_MANY_REQUESTS {
                retries += 1;
                if retries > self.max_retries {
                    return Err(TrackerError::Transport("Max retries exceeded (429)".to_string()));
                }
                let count = self.consecutive_429s.fetch_add(1, Ordering::Relaxed) + 1;
                let wait = backoff_for(count);
                warn!(
                    "[TrackerHttp {}] 429 Too Many Requests, retry {} with {:?} backoff",
                    label, retries, wait
                );
                tokio::time::sleep(wait).await;
                continue;
            }
            self.consecutive_429s.store(0, Ordering::Relaxed);

            let bytes = resp
                .bytes()
                .await
                .map_err(|e| TrackerError::Transport(format!("Body download error: {}", e)))?;

            if !status.is_success() {
                // The recorder reports its own failures as JSON with `success: false`.
                return match serde_json::from_slice::<T>(&bytes) {
                    Ok(body) => {
                        debug!("[TrackerHttp {}] HTTP {} with decodable body", label, status);
                        Ok(body)
                    }
                    Err(_) => Err(TrackerError::Transport(format!("HTTP {}", status))),
                };
            }

            let body = serde_json::from_slice::<T>(&bytes)?;
            debug!(
                "[TrackerHttp {}] {} in {:?} ({:.1}KB)",
                label,
                status,
                req_start.elapsed(),
                bytes.len() as f64 / 1024.0
            );
            return Ok(body);
        }
    }
}

impl TrackerApi for HttpTrackerApi {
    async fn session_status(&self) -> Result<StatusResponse> {
        let url = self.url("/api/live/status");
        self.send("status", || self.client.get(&url)).await
    }

    async fn start_session(&self, request: StartRequest) -> Result<SessionResponse> {
        let url = self.url("/api/live/start");
        info!("[TrackerHttp] Starting session (resume={}, reset={})", request.resume, request.reset);
        self.send("start", || self.client.post(&url).json(&request)).await
    }

    async fn poll(&self, request: PollRequest) -> Result<PollResponse> {
        let url = self.url("/api/live/poll");
        self.send("poll", || self.client.post(&url).json(&request)).await
    }

    async fn track(&self, kind: TrackKind) -> Result<TrackResponse> {
        let url = self.url(&format!("/api/live/track/{}", kind.path_segment()));
        self.send(kind.path_segment(), || self.client.get(&url)).await
    }

    async fn stop_session(&self) -> Result<()> {
        let url = self.url("/api/live/stop");
        let reply: StopResponse = self.send("stop", || self.client.post(&url)).await?;
        reply.into_result().map(|_| ())
    }

    async fn detect(&self, range: DetectRange) -> Result<DetectResponse> {
        let url = self.url("/api/detect");
        info!(
            "[TrackerHttp] Detecting rides {} {} .. {} {}",
            range.start_date, range.start_time, range.end_date, range.end_time
        );
        self.send("detect", || self.client.post(&url).json(&range)).await
    }

    async fn history_track(&self, kind: TrackKind) -> Result<TrackResponse> {
        let url = self.url(&format!("/api/track/{}", kind.path_segment()));
        self.send("history", || self.client.get(&url)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ActivityKind, PlaybackData};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    /// Serve the canned `(status, body)` replies one connection at a time.
    /// Resolves to the raw requests received.
    async fn serve(replies: Vec<(u16, &'static str)>) -> (String, JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());

        let task = tokio::spawn(async move {
            let mut seen = Vec::new();
            for (code, body) in replies {
                let (mut socket, _) = listener.accept().await.unwrap();
                seen.push(read_request(&mut socket).await);
                let response = format!(
                    "HTTP/1.1 {} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    code,
                    body.len(),
                    body
                );
                socket.write_all(response.as_bytes()).await.unwrap();
                socket.shutdown().await.unwrap();
            }
            seen
        });
        (base, task)
    }

    async fn read_request(socket: &mut tokio::net::TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&buf).to_string();
            if let Some(end) = text.find("\r\n\r\n") {
                let length = text[..end]
                    .lines()
                    .find_map(|l| {
                        let lower = l.to_ascii_lowercase();
                        lower
                            .strip_prefix("content-length:")
                            .map(|v| v.trim().parse::<usize>().unwrap_or(0))
                    })
                    .unwrap_or(0);
                if buf.len() >= end + 4 + length {
                    break;
                }
            }
        }
        String::from_utf8_lossy(&buf).to_string()
    }

    fn api(base: &str) -> HttpTrackerApi {
        HttpTrackerApi::new(&TrackerConfig::with_base_url(base)).unwrap()
    }

    #[test]
    fn test_backoff_schedule() {
        assert_eq!(backoff_for(1), Duration::from_millis(1000));
        assert_eq!(backoff_for(2), Duration::from_millis(2000));
        assert_eq!(backoff_for(3), Duration::from_millis(4000));
        assert_eq!(backoff_for(10), Duration::from_millis(4000));
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let api = api("http://tracker.local:5000/");
        assert_eq!(api.url("/api/live/status"), "http://tracker.local:5000/api/live/status");
    }

    #[tokio::test]
    async fn test_status_request() {
        let (base, server) = serve(vec![(
            200,
            r#"{"success": true, "has_session": true, "is_active": false, "is_stale": true, "age_days": 9.0, "start_timestamp": 1700000000, "total_points": 12}"#,
        )])
        .await;

        let status = api(&base).session_status().await.unwrap();
        assert!(status.has_session);
        assert_eq!(status.is_stale, Some(true));
        assert_eq!(status.total_points, 12);

        let requests = server.await.unwrap();
        assert!(requests[0].starts_with("GET /api/live/status "));
    }

    #[tokio::test]
    async fn test_poll_sends_watermark() {
        let (base, server) = serve(vec![(200, r#"{"success": true, "points_to_draw": []}"#)]).await;

        let poll = api(&base)
            .poll(PollRequest { last_drawn_timestamp: 1_700_000_123 })
            .await
            .unwrap();
        assert!(poll.success);

        let requests = server.await.unwrap();
        assert!(requests[0].starts_with("POST /api/live/poll "));
        assert!(requests[0].contains(r#"{"last_drawn_timestamp":1700000123}"#));
    }

    #[tokio::test]
    async fn test_error_status_with_json_body_is_protocol_failure() {
        let (base, _server) =
            serve(vec![(400, r#"{"success": false, "error": "Live mode not active"}"#)]).await;

        let poll = api(&base).poll(PollRequest { last_drawn_timestamp: 0 }).await.unwrap();
        assert!(!poll.success);
        assert!(matches!(poll.into_result(), Err(TrackerError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_error_status_without_body_is_transport_failure() {
        let (base, _server) = serve(vec![(502, "bad gateway")]).await;

        let err = api(&base).session_status().await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_connection_refused_is_transport_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);

        let err = api(&base).session_status().await.unwrap_err();
        assert!(matches!(err, TrackerError::Transport(_)));
    }

    #[tokio::test]
    async fn test_retries_after_429() {
        let (base, server) = serve(vec![
            (429, r#"{"success": false}"#),
            (200, r#"{"success": true}"#),
        ])
        .await;

        api(&base).stop_session().await.unwrap();
        assert_eq!(server.await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_track_path() {
        let (base, server) = serve(vec![(
            200,
            r#"{"success": true, "mode": "basic", "points": [{"lat": 45.5, "lng": -73.5, "tst": 1}]}"#,
        )])
        .await;

        let track = api(&base).track(TrackKind::All).await.unwrap();
        assert_eq!(track.points.len(), 1);
        assert!(server.await.unwrap()[0].starts_with("GET /api/live/track/all "));
    }

    #[tokio::test]
    async fn test_detect_then_fetch_rides() {
        let (base, server) = serve(vec![
            (
                200,
                r#"{"success": true, "timezone": "Europe/London", "total_points": 4,
                    "stats": {"bike": {"count": 1, "total_points": 4}}, "rides": [], "timeline": []}"#,
            ),
            (
                200,
                r##"{"success": true, "activity_type": "bike", "mode": "rich",
                    "rides": [{"ride_number": 1, "start_timestamp": 10, "end_timestamp": 40,
                               "points": [{"lat": 51.50, "lng": -0.12, "tst": 10},
                                          {"lat": 51.51, "lng": -0.12, "tst": 40}],
                               "distance": 1.2, "duration": 30, "avg_speed": 144.0, "color": "#228B22"}]}"##,
            ),
        ])
        .await;

        let api = api(&base);
        let data = PlaybackData::fetch_detected(&api, DetectRange::days("2024-06-01", "2024-06-01"))
            .await
            .unwrap();
        let PlaybackData::Rich(rides) = data else {
            panic!("expected rides");
        };
        assert_eq!(rides.len(), 1);
        assert_eq!(rides[0].kind, Some(ActivityKind::Bike));
        assert_eq!(rides[0].points.len(), 2);

        let requests = server.await.unwrap();
        assert!(requests[0].starts_with("POST /api/detect "));
        assert!(requests[0].contains(r#""start_date":"2024-06-01""#));
        assert!(requests[1].starts_with("GET /api/track/bike "));
    }

    #[tokio::test]
    async fn test_detect_without_data() {
        let (base, _server) =
            serve(vec![(404, r#"{"success": false, "error": "No data found for 2024-06-01"}"#)]).await;

        let err = PlaybackData::fetch_detected(&api(&base), DetectRange::days("2024-06-01", "2024-06-01"))
            .await
            .unwrap_err();
        assert!(matches!(err, TrackerError::Protocol(msg) if msg.starts_with("No data found")));
    }
}
