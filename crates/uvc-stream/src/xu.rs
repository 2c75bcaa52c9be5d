//! Extension unit raw control passthrough

use crate::error::UvcError;
use crate::stream::Stream;
use crate::transport::ControlQuery;
use tracing::debug;

/// Raw access to one extension unit control
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XuQuery {
    /// Extension unit ID
    pub unit: u8,
    /// Video control interface number
    pub interface: u8,
    pub selector: u8,
    /// Value to write (set) or scratch space (get)
    pub data: Vec<u8>,
}

impl Stream {
    fn xu_len(&self, query: &XuQuery) -> Result<usize, UvcError> {
        let mut len = [0u8; 2];
        self.transport().query_ctrl(
            ControlQuery::GetLen,
            query.unit,
            query.interface,
            query.selector,
            &mut len,
        )?;
        Ok(usize::from(u16::from_le_bytes(len)))
    }

    /// Read the current value of an extension unit control
    pub fn xu_get(&self, query: &XuQuery) -> Result<Vec<u8>, UvcError> {
        let len = self.xu_len(query)?;
        let mut data = vec![0u8; len];
        self.transport().query_ctrl(
            ControlQuery::GetCur,
            query.unit,
            query.interface,
            query.selector,
            &mut data,
        )?;
        debug!("XU {}/{}: read {} bytes", query.unit, query.selector, len);
        Ok(data)
    }

    /// Write an extension unit control and read it back.
    ///
    /// The write length is what the device reports for the control; the
    /// caller must supply at least that many bytes.
    pub fn xu_set(&self, query: &XuQuery) -> Result<Vec<u8>, UvcError> {
        let len = self.xu_len(query)?;
        let mut data = query
            .data
            .get(..len)
            .ok_or_else(|| {
                UvcError::Fault(format!(
                    "control needs {} bytes, {} supplied",
                    len,
                    query.data.len()
                ))
            })?
            .to_vec();

        self.transport().query_ctrl(
            ControlQuery::SetCur,
            query.unit,
            query.interface,
            query.selector,
            &mut data,
        )?;
        debug!("XU {}/{}: wrote {} bytes", query.unit, query.selector, len);

        self.xu_get(query)
    }
}
