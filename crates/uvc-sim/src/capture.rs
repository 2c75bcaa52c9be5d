//! Blocking capture clients
//!
//! Each client behaves like an application holding an open handle: it runs
//! on its own thread and blocks in dequeue while the pump fills buffers.

use crate::config::CaptureConfig;
use crate::error::SimError;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uvc_format::Fraction;
use uvc_stream::{
    BufferRequest, BufferSpec, BufferStatus, FormatRequest, Memory, PixFormat, Request, Response,
    Session, Stream, UvcError, STILL_MAGIC,
};

/// One delivered frame, as seen by the client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSummary {
    pub session: u64,
    pub index: usize,
    pub sequence: u32,
    pub bytes_used: usize,
    pub timestamp_ns: u64,
    pub still: bool,
}

impl FrameSummary {
    fn new(session: u64, status: &BufferStatus) -> Self {
        Self {
            session,
            index: status.info.index,
            sequence: status.info.sequence,
            bytes_used: status.info.bytes_used,
            timestamp_ns: status.info.timestamp_ns,
            still: status.flags == STILL_MAGIC,
        }
    }
}

/// Result of a capture run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureReport {
    pub format: PixFormat,
    pub time_per_frame: Fraction,
    pub buffers: u32,
    pub frames: u32,
    pub still: Option<FrameSummary>,
}

fn expect_format(response: Response) -> Result<PixFormat, SimError> {
    match response {
        Response::Format(pix) => Ok(pix),
        other => Err(SimError::UnexpectedResponse(format!("{:?}", other))),
    }
}

fn expect_buffer(response: Response) -> Result<BufferStatus, SimError> {
    match response {
        Response::Buffer(status) => Ok(status),
        other => Err(SimError::UnexpectedResponse(format!("{:?}", other))),
    }
}

/// Negotiate, stream `config.frames` frames, optionally grab a still image,
/// then tear down. Every frame is reported on `frames`.
pub fn run_capture(
    stream: Arc<Stream>,
    config: &CaptureConfig,
    frames: mpsc::Sender<FrameSummary>,
) -> Result<CaptureReport, SimError> {
    let buf_type = stream.buf_type();
    let mut session = Session::open(stream, false)?;
    let id = session.id();

    let format = expect_format(session.dispatch(Request::SetFormat(FormatRequest::new(
        buf_type,
        config.fourcc,
        config.width,
        config.height,
    )))?)?;
    info!(
        "session {}: negotiated {} {}x{} ({} bytes/frame)",
        id, format.fourcc, format.width, format.height, format.size_image
    );

    let time_per_frame = match session.dispatch(Request::SetStreamParm {
        buf_type,
        time_per_frame: Fraction::new(1, config.fps.max(1)),
    })? {
        Response::StreamParm(parm) => parm.time_per_frame,
        other => return Err(SimError::UnexpectedResponse(format!("{:?}", other))),
    };
    info!("session {}: time per frame {}", id, time_per_frame);

    let buffers = match session.dispatch(Request::RequestBuffers(BufferRequest {
        buf_type,
        memory: Memory::Mmap,
        count: config.buffers,
        reserved: 0,
    }))? {
        Response::Buffers(count) => count,
        other => return Err(SimError::UnexpectedResponse(format!("{:?}", other))),
    };
    for index in 0..buffers {
        session.dispatch(Request::QueueBuffer(BufferSpec::main(buf_type, index)))?;
    }
    session.dispatch(Request::StreamOn(buf_type))?;

    let mut captured = 0;
    while captured < config.frames {
        let status = expect_buffer(
            session.dispatch(Request::DequeueBuffer(BufferSpec::main(buf_type, 0)))?,
        )?;
        let summary = FrameSummary::new(id, &status);
        if status.info.error {
            warn!("session {}: frame {} completed with error", id, summary.sequence);
        }
        if frames.blocking_send(summary).is_err() {
            debug!("session {}: frame receiver gone", id);
        }
        session.dispatch(Request::QueueBuffer(BufferSpec::main(
            buf_type,
            status.info.index as u32,
        )))?;
        captured += 1;
    }

    session.dispatch(Request::StreamOff(buf_type))?;
    session.dispatch(Request::RequestBuffers(BufferRequest {
        buf_type,
        memory: Memory::Mmap,
        count: 0,
        reserved: 0,
    }))?;

    let still = match config.still {
        Some(size) => {
            let summary = capture_still(&mut session, config, size.width, size.height)?;
            if frames.blocking_send(summary).is_err() {
                debug!("session {}: frame receiver gone", id);
            }
            Some(summary)
        }
        None => None,
    };

    session.close();
    Ok(CaptureReport {
        format,
        time_per_frame,
        buffers,
        frames: captured,
        still,
    })
}

fn capture_still(
    session: &mut Session,
    config: &CaptureConfig,
    width: u32,
    height: u32,
) -> Result<FrameSummary, SimError> {
    let buf_type = session.stream().buf_type();
    let format = expect_format(session.dispatch(Request::SetFormat(
        FormatRequest::new(buf_type, config.fourcc, width, height).still(),
    ))?)?;
    info!(
        "session {}: still format {}x{} ({} bytes)",
        session.id(),
        format.width,
        format.height,
        format.size_image
    );

    session.dispatch(Request::RequestBuffers(BufferRequest {
        buf_type,
        memory: Memory::Mmap,
        count: 1,
        reserved: STILL_MAGIC,
    }))?;
    session.dispatch(Request::QueueBuffer(BufferSpec::still(buf_type, 0)))?;
    let status = expect_buffer(
        session.dispatch(Request::DequeueBuffer(BufferSpec::still(buf_type, 0)))?,
    )?;
    Ok(FrameSummary::new(session.id(), &status))
}

/// Open a session and try to take over the stream. Returns true when the
/// attempt was refused because another session owns it.
pub fn run_observer(stream: Arc<Stream>, config: &CaptureConfig) -> Result<bool, SimError> {
    let buf_type = stream.buf_type();
    let mut session = Session::open(stream, true)?;

    // Reads never need the privilege
    let current = session.dispatch(Request::GetStreamParm(buf_type))?;
    debug!("observer {}: {:?}", session.id(), current);

    let attempt = session.dispatch(Request::SetFormat(FormatRequest::new(
        buf_type,
        config.fourcc,
        config.width,
        config.height,
    )));
    match attempt {
        Err(UvcError::Busy(reason)) => {
            info!("observer {}: refused ({})", session.id(), reason);
            Ok(true)
        }
        Err(e) => Err(e.into()),
        Ok(_) => {
            info!("observer {}: stream was free", session.id());
            Ok(false)
        }
    }
}
