//! UVC Stream Simulator - Main Entry Point

use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use uvc_sim::capture::{run_capture, run_observer};
use uvc_sim::config::SimConfig;
use uvc_sim::pump::run_pump;
use uvc_sim::{init_logging, SimError};
use uvc_stream::{BufType, MockTransport, Stream};

#[tokio::main]
async fn main() -> Result<(), SimError> {
    let path = std::env::args().nth(1);
    let config = SimConfig::load(path.as_deref())?;
    init_logging(&config.log_level)?;

    info!("=== UVC stream simulator v{} ===", env!("CARGO_PKG_VERSION"));

    let caps = config.capabilities()?;
    let transport = Arc::new(MockTransport::new(caps.clone()));
    let stream = Arc::new(Stream::new(
        "video0",
        BufType::VideoCapture,
        caps,
        config.device.clone(),
        transport,
    ));

    let (stop, stop_rx) = watch::channel(false);
    let pump = tokio::spawn(run_pump(stream.clone(), stop_rx));

    let (frames_tx, mut frames_rx) = mpsc::channel(64);
    let capture = {
        let stream = stream.clone();
        let capture_config = config.capture.clone();
        tokio::task::spawn_blocking(move || run_capture(stream, &capture_config, frames_tx))
    };

    // Give the capture session time to take ownership before observers show up
    let first = frames_rx.recv().await;
    let mut observers = Vec::new();
    for _ in 0..config.capture.observers {
        let stream = stream.clone();
        let capture_config = config.capture.clone();
        observers.push(tokio::task::spawn_blocking(move || {
            run_observer(stream, &capture_config)
        }));
    }

    let mut received = 0;
    let mut next = first;
    while let Some(frame) = next {
        received += 1;
        info!(
            "frame: session {} buffer {} seq {} {} bytes{}",
            frame.session,
            frame.index,
            frame.sequence,
            frame.bytes_used,
            if frame.still { " (still)" } else { "" }
        );
        next = frames_rx.recv().await;
    }

    for observer in observers {
        match observer.await? {
            Ok(true) => {}
            Ok(false) => warn!("observer got the stream: capture had already finished"),
            Err(e) => warn!("observer failed: {}", e),
        }
    }

    let report = capture.await??;
    if let Err(e) = stop.send(true) {
        debug!("pump already gone at shutdown: {}", e);
    }
    let stats = pump.await?;

    info!(
        "Captured {} frames ({} received, {} delivered, {} underruns) as {} {}x{} at {}",
        report.frames,
        received,
        stats.frames,
        stats.underruns,
        report.format.fourcc,
        report.format.width,
        report.format.height,
        report.time_per_frame
    );
    Ok(())
}
