//! Simulated device data path
//!
//! Stands in for the isochronous completion handler: at every frame
//! interval it fills the oldest queued video buffer, and it answers still
//! triggers by filling a still buffer.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};
use uvc_stream::Stream;

/// Interval used before any format has been negotiated (30 fps)
const FALLBACK_INTERVAL: u32 = 333_333;

/// Synthetic frame of `len` bytes, each byte carrying the low byte of `seq`
fn synth_frame(len: usize, seq: u32) -> Vec<u8> {
    vec![seq as u8; len]
}

/// Frames delivered by a pump run
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PumpStats {
    pub frames: u64,
    pub stills: u64,
    /// Ticks with no video buffer queued while streaming
    pub underruns: u64,
}

/// Run the data path until `shutdown` flips to true
pub async fn run_pump(stream: Arc<Stream>, mut shutdown: watch::Receiver<bool>) -> PumpStats {
    let started = Instant::now();
    let mut stats = PumpStats::default();
    let mut seq: u32 = 0;
    info!("{}: frame pump started", stream.name());

    loop {
        let interval = stream
            .control()
            .map(|ctrl| ctrl.frame_interval)
            .filter(|&interval| interval > 0)
            .unwrap_or(FALLBACK_INTERVAL);
        let period = Duration::from_nanos(u64::from(interval) * 100);

        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            _ = tokio::time::sleep(period) => {}
        }

        if stream.is_disconnected() {
            warn!("{}: device gone, pump stopping", stream.name());
            break;
        }

        let timestamp_ns = started.elapsed().as_nanos() as u64;

        if stream.take_still_request() && deliver_still(&stream, timestamp_ns) {
            stats.stills += 1;
        }

        if stream.is_streaming() {
            if deliver_frame(&stream, seq, timestamp_ns) {
                stats.frames += 1;
                seq = seq.wrapping_add(1);
            } else {
                stats.underruns += 1;
            }
        }
    }

    info!(
        "{}: frame pump stopped ({} frames, {} stills, {} underruns)",
        stream.name(),
        stats.frames,
        stats.stills,
        stats.underruns
    );
    stats
}

fn deliver_frame(stream: &Stream, seq: u32, timestamp_ns: u64) -> bool {
    let Some(slot) = stream.queue().start_fill() else {
        trace!("{}: no video buffer queued", stream.name());
        return false;
    };

    let size = stream
        .control()
        .map(|ctrl| ctrl.max_video_frame_size as usize)
        .unwrap_or(slot.capacity)
        .min(slot.capacity);

    match stream
        .queue()
        .complete(slot.index, &synth_frame(size, seq), timestamp_ns)
    {
        Ok(()) => true,
        Err(e) => {
            warn!("{}: failed to complete buffer {}: {}", stream.name(), slot.index, e);
            false
        }
    }
}

fn deliver_still(stream: &Stream, timestamp_ns: u64) -> bool {
    let Some(ctrl) = stream.still_control() else {
        warn!("{}: still triggered without still format", stream.name());
        return false;
    };

    stream.begin_still_decode();
    let delivered = match stream.still_queue().start_fill() {
        Some(slot) => {
            let size = (ctrl.max_video_frame_size as usize).min(slot.capacity);
            debug!("{}: delivering {} byte still image", stream.name(), size);
            stream
                .still_queue()
                .complete(slot.index, &synth_frame(size, 0xff), timestamp_ns)
                .is_ok()
        }
        None => {
            warn!("{}: still triggered with no still buffer queued", stream.name());
            false
        }
    };
    stream.end_still_decode();
    delivered
}
