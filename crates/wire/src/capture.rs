//! Session capture files.
//!
//! Every record is `u32` milliseconds since the capture started, then the
//! message exactly as framed on the wire: `u16` length, `u16` code and the
//! payload. All integers are big-endian.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::time::Instant;

use crate::codes::MsgCode;
use crate::message::MAX_PACKET_LEN;
use crate::pack::{self, Unpacker};

const RECORD_HEADER_LEN: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureRecord {
    pub millis: u32,
    pub code: MsgCode,
    pub payload: Vec<u8>,
}

pub struct CaptureWriter<W: Write> {
    out: W,
    start: Instant,
    records: u64,
}

impl CaptureWriter<BufWriter<File>> {
    pub fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        Ok(Self::new(BufWriter::new(File::create(path)?)))
    }
}

impl<W: Write> CaptureWriter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            start: Instant::now(),
            records: 0,
        }
    }

    pub fn records(&self) -> u64 {
        self.records
    }

    pub fn record(&mut self, code: u16, payload: &[u8]) -> io::Result<()> {
        let millis = self.start.elapsed().as_millis().min(u32::MAX as u128) as u32;
        self.record_at(millis, code, payload)
    }

    pub fn record_at(&mut self, millis: u32, code: u16, payload: &[u8]) -> io::Result<()> {
        if payload.len() > MAX_PACKET_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "payload exceeds maximum packet size",
            ));
        }

        let mut record = Vec::with_capacity(RECORD_HEADER_LEN + payload.len());
        pack::pack_u32(&mut record, millis);
        pack::pack_u16(&mut record, payload.len() as u16);
        pack::pack_u16(&mut record, code);
        record.extend_from_slice(payload);

        self.out.write_all(&record)?;
        self.out.flush()?;
        self.records += 1;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

pub struct CaptureReader<R: Read> {
    input: R,
}

impl CaptureReader<BufReader<File>> {
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        Ok(Self::new(BufReader::new(File::open(path)?)))
    }
}

impl<R: Read> CaptureReader<R> {
    pub fn new(input: R) -> Self {
        Self { input }
    }

    /// `Ok(None)` at a clean end of file; a record cut short is an
    /// `UnexpectedEof` error.
    pub fn next_record(&mut self) -> io::Result<Option<CaptureRecord>> {
        let mut header = [0u8; RECORD_HEADER_LEN];
        let mut filled = 0;
        while filled < header.len() {
            match self.input.read(&mut header[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        if filled == 0 {
            return Ok(None);
        }
        if filled < header.len() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "truncated capture record header",
            ));
        }

        let mut reader = Unpacker::new(&header);
        let millis = reader.unpack_u32();
        let len = reader.unpack_u16() as usize;
        let code = MsgCode::from_u16(reader.unpack_u16());

        let mut payload = vec![0u8; len];
        self.input.read_exact(&mut payload)?;

        Ok(Some(CaptureRecord {
            millis,
            code,
            payload,
        }))
    }
}

impl<R: Read> Iterator for CaptureReader<R> {
    type Item = io::Result<CaptureRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_layout() {
        let mut writer = CaptureWriter::new(Vec::new());
        writer
            .record_at(0x0102_0304, MsgCode::Killed.as_u16(), &[9, 8])
            .unwrap();
        assert_eq!(writer.records(), 1);
        assert_eq!(
            writer.into_inner(),
            vec![1, 2, 3, 4, 0, 2, b'k', b'l', 9, 8]
        );
    }

    #[test]
    fn test_read_back() {
        let mut writer = CaptureWriter::new(Vec::new());
        writer.record_at(5, MsgCode::Accept.as_u16(), &[]).unwrap();
        writer
            .record_at(17, MsgCode::Message.as_u16(), b"hello")
            .unwrap();
        let bytes = writer.into_inner();

        let records: Vec<CaptureRecord> = CaptureReader::new(bytes.as_slice())
            .collect::<io::Result<_>>()
            .unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].code, MsgCode::Accept);
        assert!(records[0].payload.is_empty());
        assert_eq!(records[1].millis, 17);
        assert_eq!(records[1].payload, b"hello");
    }

    #[test]
    fn test_truncated_record() {
        let bytes = [0u8, 0, 0, 1, 0, 4, b'm', b'g', 1];
        let mut reader = CaptureReader::new(&bytes[..]);
        let err = reader.next_record().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);

        let mut reader = CaptureReader::new(&bytes[..3]);
        let err = reader.next_record().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let mut writer = CaptureWriter::new(Vec::new());
        let payload = vec![0u8; MAX_PACKET_LEN + 1];
        assert!(writer.record_at(0, 0, &payload).is_err());
        assert_eq!(writer.records(), 0);
    }
}
