//! Session request dispatcher
//!
//! Validates each request, routes it to the main or still path and applies
//! the privilege gate. Still requests (marked with [`STILL_MAGIC`]) never
//! need the privilege; main requests that change configuration or buffers
//! acquire it, the others only check it.

use crate::error::UvcError;
use crate::negotiator::{CropCap, FormatRequest, PixFormat};
use crate::session::Session;
use crate::xu::XuQuery;
use crate::{BufType, Memory, STILL_MAGIC};
use frame_queue::{BufferInfo, QueueError, QueueKind};
use tracing::{debug, trace};
use uvc_format::{FourCc, Fraction, IntervalDesc};

/// Stream parameter capability bit: time per frame can be set
pub const CAP_TIMEPERFRAME: u32 = 0x1000;

/// Buffer allocation request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferRequest {
    pub buf_type: BufType,
    pub memory: Memory,
    pub count: u32,
    /// [`STILL_MAGIC`] targets the still queue
    pub reserved: u32,
}

/// Buffer addressed by query, queue and dequeue requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferSpec {
    pub buf_type: BufType,
    pub memory: Memory,
    pub index: u32,
    /// [`STILL_MAGIC`] targets the still queue
    pub flags: u32,
}

impl BufferSpec {
    pub fn main(buf_type: BufType, index: u32) -> Self {
        Self {
            buf_type,
            memory: Memory::Mmap,
            index,
            flags: 0,
        }
    }

    pub fn still(buf_type: BufType, index: u32) -> Self {
        Self {
            flags: STILL_MAGIC,
            ..Self::main(buf_type, index)
        }
    }

    pub fn is_still(&self) -> bool {
        self.flags == STILL_MAGIC
    }
}

/// Buffer snapshot returned to the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferStatus {
    pub info: BufferInfo,
    /// [`STILL_MAGIC`] for still buffers
    pub flags: u32,
}

impl From<BufferInfo> for BufferStatus {
    fn from(info: BufferInfo) -> Self {
        let flags = match info.kind {
            QueueKind::Still => STILL_MAGIC,
            QueueKind::Video => 0,
        };
        Self { info, flags }
    }
}

/// Enumerated format
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatDesc {
    pub index: u32,
    pub fourcc: FourCc,
    pub description: String,
    pub compressed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamParm {
    pub capability: u32,
    pub time_per_frame: Fraction,
}

/// Requests with no meaning for a digital camera
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegacyRequest {
    EnumStd,
    QueryStd,
    GetStd,
    SetStd,
    Overlay,
    EnumAudio,
    EnumAudioOut,
    EnumOutput,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    EnumFormat { buf_type: BufType, index: u32 },
    EnumFrameSizes { fourcc: FourCc, index: u32 },
    EnumFrameIntervals { fourcc: FourCc, width: u32, height: u32, index: u32 },
    TryFormat(FormatRequest),
    SetFormat(FormatRequest),
    /// `private` set to [`STILL_MAGIC`] reads the still format
    GetFormat { buf_type: BufType, private: u32 },
    GetStreamParm(BufType),
    SetStreamParm { buf_type: BufType, time_per_frame: Fraction },
    CropCap(BufType),
    GetCrop(BufType),
    SetCrop(BufType),
    GetInput,
    SetInput(u32),
    RequestBuffers(BufferRequest),
    QueryBuffer(BufferSpec),
    QueueBuffer(BufferSpec),
    DequeueBuffer(BufferSpec),
    StreamOn(BufType),
    StreamOff(BufType),
    XuGet(XuQuery),
    XuSet(XuQuery),
    Legacy(LegacyRequest),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Done,
    FormatDesc(FormatDesc),
    FrameSize { width: u32, height: u32 },
    FrameInterval(IntervalDesc),
    Format(PixFormat),
    StreamParm(StreamParm),
    CropCap(CropCap),
    Input(u32),
    /// Number of buffers actually allocated
    Buffers(u32),
    Buffer(BufferStatus),
    Control(Vec<u8>),
}

fn check_memory(memory: Memory) -> Result<(), UvcError> {
    if memory != Memory::Mmap {
        return Err(UvcError::InvalidArgument(format!(
            "memory type {:?} not supported",
            memory
        )));
    }
    Ok(())
}

fn not_found(what: &str) -> UvcError {
    UvcError::InvalidArgument(format!("no {}", what))
}

impl Session {
    /// Execute one client request
    pub fn dispatch(&mut self, request: Request) -> Result<Response, UvcError> {
        trace!("session {}: {:?}", self.id(), request);
        let stream = self.stream().clone();

        match request {
            Request::EnumFormat { buf_type, index } => {
                stream.check_type(buf_type)?;
                let format = stream
                    .capabilities()
                    .get(index as usize)
                    .ok_or_else(|| not_found("such format"))?;
                Ok(Response::FormatDesc(FormatDesc {
                    index,
                    fourcc: format.fourcc,
                    description: format.name.clone(),
                    compressed: format.compressed,
                }))
            }

            Request::EnumFrameSizes { fourcc, index } => stream
                .capabilities()
                .frame_size_at(fourcc, index as usize)
                .map(|(width, height)| Response::FrameSize {
                    width: u32::from(width),
                    height: u32::from(height),
                })
                .ok_or_else(|| not_found("such frame size")),

            Request::EnumFrameIntervals {
                fourcc,
                width,
                height,
                index,
            } => stream
                .capabilities()
                .frame_interval_at(fourcc, width, height, index as usize)
                .map(Response::FrameInterval)
                .ok_or_else(|| not_found("such frame interval")),

            Request::TryFormat(format) => stream.try_format(&format).map(Response::Format),

            Request::SetFormat(format) => {
                if format.is_still() {
                    return stream.set_still_format(&format).map(Response::Format);
                }
                self.acquire_privileges()?;
                stream.set_format(&format).map(Response::Format)
            }

            Request::GetFormat { buf_type, private } => {
                if private == STILL_MAGIC {
                    stream.get_still_format(buf_type).map(Response::Format)
                } else {
                    stream.get_format(buf_type).map(Response::Format)
                }
            }

            Request::GetStreamParm(buf_type) => {
                let time_per_frame = stream.get_stream_parm(buf_type)?;
                Ok(Response::StreamParm(StreamParm {
                    capability: CAP_TIMEPERFRAME,
                    time_per_frame,
                }))
            }

            Request::SetStreamParm {
                buf_type,
                time_per_frame,
            } => {
                self.acquire_privileges()?;
                let time_per_frame = stream.set_stream_parm(buf_type, time_per_frame)?;
                Ok(Response::StreamParm(StreamParm {
                    capability: CAP_TIMEPERFRAME,
                    time_per_frame,
                }))
            }

            Request::CropCap(buf_type) => stream.crop_cap(buf_type).map(Response::CropCap),

            Request::GetCrop(_) | Request::SetCrop(_) => Err(UvcError::InvalidArgument(
                "cropping not supported".to_string(),
            )),

            Request::GetInput => stream.get_input().map(Response::Input),

            Request::SetInput(index) => {
                self.acquire_privileges()?;
                stream.set_input(index)?;
                Ok(Response::Done)
            }

            Request::RequestBuffers(req) => {
                check_memory(req.memory)?;
                if req.reserved == STILL_MAGIC {
                    let count = stream.allocate_still_buffers(req.count as usize)?;
                    debug!("session {}: {} still buffers", self.id(), count);
                    return Ok(Response::Buffers(count as u32));
                }

                stream.check_type(req.buf_type)?;
                self.acquire_privileges()?;
                let count = stream.allocate_buffers(req.count as usize)?;
                if count == 0 {
                    self.dismiss_privileges();
                }
                debug!("session {}: {} video buffers", self.id(), count);
                Ok(Response::Buffers(count as u32))
            }

            Request::QueryBuffer(buf) => {
                if buf.is_still() {
                    let info = stream.still_queue().query(buf.index as usize)?;
                    return Ok(Response::Buffer(info.into()));
                }
                stream.check_type(buf.buf_type)?;
                self.require_privilege()?;
                let info = stream.queue().query(buf.index as usize)?;
                Ok(Response::Buffer(info.into()))
            }

            Request::QueueBuffer(buf) => {
                check_memory(buf.memory)?;
                if buf.is_still() {
                    stream.still_queue().enqueue(buf.index as usize)?;
                    return Ok(Response::Done);
                }
                stream.check_type(buf.buf_type)?;
                self.require_privilege()?;
                stream.queue().enqueue(buf.index as usize)?;
                Ok(Response::Done)
            }

            Request::DequeueBuffer(buf) => {
                check_memory(buf.memory)?;
                if buf.is_still() {
                    stream.request_still()?;
                    return match stream.still_queue().dequeue(self.is_non_blocking()) {
                        Ok(info) => Ok(Response::Buffer(info.into())),
                        // The capture is still on its way to the queued buffer
                        Err(QueueError::WouldBlock) => Err(UvcError::WouldBlock),
                        Err(e) => {
                            stream.cancel_still_request();
                            Err(e.into())
                        }
                    };
                }
                stream.check_type(buf.buf_type)?;
                self.require_privilege()?;
                let info = stream.queue().dequeue(self.is_non_blocking())?;
                Ok(Response::Buffer(info.into()))
            }

            Request::StreamOn(buf_type) => {
                stream.check_type(buf_type)?;
                self.require_privilege()?;
                stream.stream_on()?;
                Ok(Response::Done)
            }

            Request::StreamOff(buf_type) => {
                stream.check_type(buf_type)?;
                self.require_privilege()?;
                stream.stream_off()?;
                Ok(Response::Done)
            }

            Request::XuGet(query) => stream.xu_get(&query).map(Response::Control),

            Request::XuSet(query) => stream.xu_set(&query).map(Response::Control),

            Request::Legacy(legacy) => {
                debug!("session {}: unsupported request {:?}", self.id(), legacy);
                Err(UvcError::InvalidArgument(format!("{:?} not supported", legacy)))
            }
        }
    }
}
