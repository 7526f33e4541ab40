//! Replay a synthetic track with pause and step controls.
//!
//! Run with: cargo run --example replay_track

use std::sync::Arc;
use std::time::Duration;

use ride_tracker::playback::CompletionCallback;
use ride_tracker::{
    GeoPoint, NoopSurface, PlaybackCommand, PlaybackConfig, PlaybackData, PlaybackEngine,
    Progress, TokioScheduler,
};
use tokio::sync::{mpsc, oneshot};

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // Along the Thames embankment, one fix every 15 seconds
    let points: Vec<GeoPoint> = (0..40)
        .map(|i| {
            GeoPoint::new(
                51.5007 + i as f64 * 0.0004,
                -0.1246 - i as f64 * 0.0006,
                1_700_000_000 + i * 15,
            )
        })
        .collect();

    let config = PlaybackConfig {
        ms_per_point: 50,
        ..PlaybackConfig::default()
    };

    let (scheduler, tickets) = TokioScheduler::new();
    let mut engine = PlaybackEngine::new(config, Arc::new(NoopSurface), Box::new(scheduler));
    engine.set_observer(Box::new(|p: &Progress| {
        println!(
            "  {:>2}/{} {:>6.3} km {:>4}s {:>5.1} km/h ({:.4}, {:.4})",
            p.point_index, p.total_points, p.distance_km, p.duration_s, p.speed_kmh, p.lat, p.lng
        );
    }));

    let (commands, rx) = mpsc::channel(8);
    let driver = tokio::spawn(async move { engine.drive(tickets, rx).await });

    let (done_tx, done_rx) = oneshot::channel();
    let on_complete: CompletionCallback = Box::new(move || {
        let _ = done_tx.send(());
    });

    println!("Replaying {} points\n", points.len());
    let script = [
        (PlaybackCommand::Start { data: PlaybackData::Basic(points), on_complete: Some(on_complete) }, 600),
        (PlaybackCommand::Pause, 300),
        (PlaybackCommand::StepBack, 100),
        (PlaybackCommand::StepBack, 100),
        (PlaybackCommand::StepForward, 300),
        (PlaybackCommand::Resume, 0),
    ];
    for (command, wait_ms) in script {
        println!("-> {:?}", command);
        if commands.send(command).await.is_err() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(wait_ms)).await;
    }

    let _ = done_rx.await;
    println!("\nReplay complete");
    drop(commands);
    let _ = driver.await;
}
