//! Follow a live session on a running recorder and print what arrives.
//!
//! Run with: cargo run --example follow_live -- http://localhost:5000

use std::sync::Arc;
use std::time::Duration;

use ride_tracker::{
    HttpTrackerApi, LiveEvent, LiveSessionController, NoopSurface, SessionPrompt, StartIntent,
    TrackerConfig,
};

#[tokio::main]
async fn main() -> ride_tracker::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let base_url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "http://localhost:5000".to_string());
    let config = TrackerConfig {
        poll_interval: Duration::from_secs(10),
        ..TrackerConfig::with_base_url(base_url)
    };

    let api = HttpTrackerApi::new(&config)?;
    let controller = LiveSessionController::new(api, config, Arc::new(NoopSurface));

    let status = controller.check_status().await?;
    let intent = match status.prompt() {
        SessionPrompt::Fresh => StartIntent::Fresh,
        SessionPrompt::Join => StartIntent::Join,
        SessionPrompt::Resume { stale: true } => {
            println!("Session from {:?} is stale, starting over", status.start_time);
            StartIntent::Reset
        }
        SessionPrompt::Resume { stale: false } => StartIntent::Resume,
    };

    let snapshot = controller.start(intent).await?;
    println!(
        "Session {:?} started {} ({} points)",
        snapshot.mode,
        snapshot.start_time_str.as_deref().unwrap_or("?"),
        snapshot.total_points
    );

    controller.start_polling()?;
    for _ in 0..12 {
        tokio::time::sleep(Duration::from_secs(10)).await;
        for event in controller.drain_events() {
            match event {
                LiveEvent::PointsAppended { count, watermark } => {
                    println!("+{} points (watermark {})", count, watermark)
                }
                LiveEvent::LayerRedrawn { kind, rides, .. } => {
                    println!("{} layer: {} rides", kind, rides.len())
                }
                LiveEvent::BacklogReplay { points } => {
                    println!("{} points to replay", points.len())
                }
            }
        }
        let history = controller.history();
        let view = history.lock().ok().and_then(|h| h.current_view());
        if let Some(view) = view {
            println!(
                "  {:.2} km over {}s",
                view.stat.distance_km, view.stat.duration_s
            );
        }
    }

    // Leave the session running on the recorder
    controller.stop_polling();
    Ok(())
}
