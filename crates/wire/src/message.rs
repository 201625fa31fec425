use std::cell::RefCell;
use std::io;
use std::ops::{Deref, DerefMut};

use glam::{Vec2, Vec3, Vec4};

use crate::codes::MsgCode;
use crate::dispatch::Transfer;
use crate::error::{MessageError, PackError};
use crate::pack::{self, Unpacker};

/// `u16` payload length followed by `u16` message code.
pub const HEADER_LEN: usize = 4;
pub const MAX_PACKET_LEN: usize = 1024;
/// Buffers grow in whole steps and never shrink.
pub const GROWTH_STEP: usize = 256;

/// One wire message: a four byte header, then the payload.
///
/// The write cursor is the end of `data`. Reads go through an independent
/// cursor that starts just past the header; a read past the end yields zero
/// and sets a sticky error that the consumer checks once it is done.
#[derive(Debug, Clone)]
pub struct NetMessage {
    data: Vec<u8>,
    capacity: usize,
    code: u16,
    read_index: usize,
    read_error: Option<PackError>,
}

impl Default for NetMessage {
    fn default() -> Self {
        Self::new()
    }
}

impl NetMessage {
    pub fn new() -> Self {
        Self::with_size_hint(0)
    }

    pub fn with_size_hint(payload_len: usize) -> Self {
        let capacity = round_up(HEADER_LEN + payload_len);
        let mut data = Vec::with_capacity(capacity);
        data.resize(HEADER_LEN, 0);
        Self {
            data,
            capacity,
            code: 0,
            read_index: HEADER_LEN,
            read_error: None,
        }
    }

    /// Rebuilds a received message. `len` must equal the payload size.
    pub fn from_parts(len: u16, code: u16, payload: &[u8]) -> Result<Self, MessageError> {
        if len as usize != payload.len() {
            return Err(MessageError::LengthMismatch {
                declared: len as usize,
                actual: payload.len(),
            });
        }
        if payload.len() > MAX_PACKET_LEN {
            return Err(MessageError::TooLarge(payload.len()));
        }

        let mut message = Self::with_size_hint(payload.len());
        message.data.extend_from_slice(payload);
        message.write_header(code);
        Ok(message)
    }

    pub fn len(&self) -> usize {
        self.data.len() - HEADER_LEN
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn code(&self) -> MsgCode {
        MsgCode::from_u16(self.code)
    }

    pub fn raw_code(&self) -> u16 {
        self.code
    }

    pub fn payload(&self) -> &[u8] {
        &self.data[HEADER_LEN..]
    }

    /// Header plus payload, as last finalized.
    pub fn frame(&self) -> &[u8] {
        &self.data
    }

    /// Drops the payload and rewinds both cursors. Capacity is kept.
    pub fn clear(&mut self) {
        self.data.truncate(HEADER_LEN);
        self.data[..HEADER_LEN].fill(0);
        self.code = 0;
        self.read_index = HEADER_LEN;
        self.read_error = None;
    }

    /// Writes the true payload length and `code` into the header.
    pub fn finalize(&mut self, code: impl Into<u16>) -> Result<&[u8], MessageError> {
        if self.len() > MAX_PACKET_LEN {
            return Err(MessageError::TooLarge(self.len()));
        }
        self.write_header(code.into());
        Ok(&self.data)
    }

    fn write_header(&mut self, code: u16) {
        let len = self.len() as u16;
        self.code = code;
        self.data[0..2].copy_from_slice(&len.to_be_bytes());
        self.data[2..4].copy_from_slice(&code.to_be_bytes());
    }

    pub fn send<T: Transfer>(
        &mut self,
        transfer: &mut T,
        to: &T::Handle,
        code: MsgCode,
    ) -> io::Result<()> {
        let frame = self.finalize(code).map_err(invalid_data)?;
        transfer.send(to, frame)
    }

    pub fn broadcast<T: Transfer>(
        &mut self,
        transfer: &mut T,
        code: MsgCode,
        to_admins: bool,
    ) -> io::Result<()> {
        let frame = self.finalize(code).map_err(invalid_data)?;
        transfer.broadcast(frame, to_admins)
    }

    fn reserve(&mut self, size: usize) {
        let needed = self.data.len() + size;
        if needed > self.capacity {
            self.capacity = round_up(needed);
            self.data.reserve_exact(self.capacity - self.data.len());
        }
    }

    pub fn pack_u8(&mut self, value: u8) {
        self.reserve(1);
        pack::pack_u8(&mut self.data, value);
    }

    pub fn pack_i8(&mut self, value: i8) {
        self.reserve(1);
        pack::pack_i8(&mut self.data, value);
    }

    pub fn pack_u16(&mut self, value: u16) {
        self.reserve(2);
        pack::pack_u16(&mut self.data, value);
    }

    pub fn pack_i16(&mut self, value: i16) {
        self.reserve(2);
        pack::pack_i16(&mut self.data, value);
    }

    pub fn pack_u32(&mut self, value: u32) {
        self.reserve(4);
        pack::pack_u32(&mut self.data, value);
    }

    pub fn pack_i32(&mut self, value: i32) {
        self.reserve(4);
        pack::pack_i32(&mut self.data, value);
    }

    pub fn pack_u64(&mut self, value: u64) {
        self.reserve(8);
        pack::pack_u64(&mut self.data, value);
    }

    pub fn pack_i64(&mut self, value: i64) {
        self.reserve(8);
        pack::pack_i64(&mut self.data, value);
    }

    pub fn pack_f32(&mut self, value: f32) {
        self.reserve(4);
        pack::pack_f32(&mut self.data, value);
    }

    pub fn pack_f64(&mut self, value: f64) {
        self.reserve(8);
        pack::pack_f64(&mut self.data, value);
    }

    pub fn pack_fvec2(&mut self, value: Vec2) {
        self.reserve(8);
        pack::pack_fvec2(&mut self.data, value);
    }

    pub fn pack_fvec3(&mut self, value: Vec3) {
        self.reserve(12);
        pack::pack_fvec3(&mut self.data, value);
    }

    pub fn pack_fvec4(&mut self, value: Vec4) {
        self.reserve(16);
        pack::pack_fvec4(&mut self.data, value);
    }

    pub fn pack_string(&mut self, data: &[u8]) {
        self.reserve(data.len());
        pack::pack_string(&mut self.data, data);
    }

    pub fn pack_padded(&mut self, text: &str, width: usize) {
        self.reserve(width);
        pack::pack_padded(&mut self.data, text, width);
    }

    pub fn pack_std_string(&mut self, text: &str) {
        self.reserve(pack::std_string_size(text.len()));
        pack::pack_std_string(&mut self.data, text);
    }

    pub fn pack_std_bytes(&mut self, data: &[u8]) {
        self.reserve(pack::std_string_size(data.len()));
        pack::pack_std_bytes(&mut self.data, data);
    }

    /// Runs `f` against the unread payload and advances the read cursor by
    /// whatever it consumed. Any decode error becomes sticky on the message.
    pub fn unpack_with<R>(&mut self, f: impl FnOnce(&mut Unpacker<'_>) -> R) -> R {
        let mut reader = Unpacker::new(&self.data[self.read_index..]);
        let value = f(&mut reader);
        self.read_index += reader.position();
        if let Some(err) = reader.take_error() {
            self.read_error.get_or_insert(err);
        }
        value
    }

    pub fn read_remaining(&self) -> usize {
        self.data.len() - self.read_index
    }

    pub fn read_error(&self) -> Option<PackError> {
        self.read_error
    }

    pub fn take_read_error(&mut self) -> Option<PackError> {
        self.read_error.take()
    }

    /// Ends a decode session: a message with any failed field is malformed
    /// as a whole.
    pub fn finish_reading(&mut self) -> Result<(), MessageError> {
        match self.read_error.take() {
            Some(err) => Err(MessageError::Malformed(err)),
            None => Ok(()),
        }
    }

    pub fn rewind(&mut self) {
        self.read_index = HEADER_LEN;
        self.read_error = None;
    }

    pub fn unpack_u8(&mut self) -> u8 {
        self.unpack_with(|r| r.unpack_u8())
    }

    pub fn unpack_i8(&mut self) -> i8 {
        self.unpack_with(|r| r.unpack_i8())
    }

    pub fn unpack_u16(&mut self) -> u16 {
        self.unpack_with(|r| r.unpack_u16())
    }

    pub fn unpack_i16(&mut self) -> i16 {
        self.unpack_with(|r| r.unpack_i16())
    }

    pub fn unpack_u32(&mut self) -> u32 {
        self.unpack_with(|r| r.unpack_u32())
    }

    pub fn unpack_i32(&mut self) -> i32 {
        self.unpack_with(|r| r.unpack_i32())
    }

    pub fn unpack_u64(&mut self) -> u64 {
        self.unpack_with(|r| r.unpack_u64())
    }

    pub fn unpack_i64(&mut self) -> i64 {
        self.unpack_with(|r| r.unpack_i64())
    }

    pub fn unpack_f32(&mut self) -> f32 {
        self.unpack_with(|r| r.unpack_f32())
    }

    pub fn unpack_f64(&mut self) -> f64 {
        self.unpack_with(|r| r.unpack_f64())
    }

    pub fn unpack_fvec2(&mut self) -> Vec2 {
        self.unpack_with(|r| r.unpack_fvec2())
    }

    pub fn unpack_fvec3(&mut self) -> Vec3 {
        self.unpack_with(|r| r.unpack_fvec3())
    }

    pub fn unpack_fvec4(&mut self) -> Vec4 {
        self.unpack_with(|r| r.unpack_fvec4())
    }

    pub fn unpack_string(&mut self, len: usize) -> Vec<u8> {
        self.unpack_with(|r| r.unpack_string(len).to_vec())
    }

    pub fn unpack_padded(&mut self, width: usize) -> String {
        self.unpack_with(|r| r.unpack_padded(width))
    }

    pub fn unpack_std_string(&mut self) -> String {
        self.unpack_with(|r| r.unpack_std_string())
    }

    pub fn unpack_std_bytes(&mut self) -> Vec<u8> {
        self.unpack_with(|r| r.unpack_std_bytes())
    }
}

/// Splits one framed message off the front of `bytes`, returning it with
/// the number of bytes it used. `Ok(None)` means the frame is incomplete.
pub fn split_frame(bytes: &[u8]) -> Result<Option<(NetMessage, usize)>, MessageError> {
    if bytes.len() < HEADER_LEN {
        return Ok(None);
    }
    let mut header = Unpacker::new(&bytes[..HEADER_LEN]);
    let len = header.unpack_u16();
    let code = header.unpack_u16();
    if len as usize > MAX_PACKET_LEN {
        return Err(MessageError::TooLarge(len as usize));
    }

    let end = HEADER_LEN + len as usize;
    if bytes.len() < end {
        return Ok(None);
    }
    let message = NetMessage::from_parts(len, code, &bytes[HEADER_LEN..end])?;
    Ok(Some((message, end)))
}

fn round_up(size: usize) -> usize {
    size.div_ceil(GROWTH_STEP).max(1) * GROWTH_STEP
}

fn invalid_data(err: MessageError) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, err)
}

/// Free list of reusable message buffers. Checked-out buffers come back
/// cleared when their guard drops, whatever path the caller leaves by.
#[derive(Debug)]
pub struct MessagePool {
    free: RefCell<Vec<NetMessage>>,
    max_free: usize,
}

impl MessagePool {
    pub fn new(max_free: usize) -> Self {
        Self {
            free: RefCell::new(Vec::with_capacity(max_free)),
            max_free,
        }
    }

    pub fn checkout(&self) -> PooledMessage<'_> {
        let message = self.free.borrow_mut().pop().unwrap_or_default();
        PooledMessage {
            pool: self,
            message: Some(message),
        }
    }

    pub fn available(&self) -> usize {
        self.free.borrow().len()
    }

    fn release(&self, mut message: NetMessage) {
        message.clear();
        let mut free = self.free.borrow_mut();
        if free.len() < self.max_free {
            free.push(message);
        }
    }
}

#[derive(Debug)]
pub struct PooledMessage<'a> {
    pool: &'a MessagePool,
    message: Option<NetMessage>,
}

impl PooledMessage<'_> {
    /// Keeps the buffer instead of returning it to the pool.
    pub fn detach(mut self) -> NetMessage {
        self.message.take().unwrap_or_default()
    }
}

impl Deref for PooledMessage<'_> {
    type Target = NetMessage;

    fn deref(&self) -> &NetMessage {
        match &self.message {
            Some(message) => message,
            None => unreachable!("pooled message used after detach"),
        }
    }
}

impl DerefMut for PooledMessage<'_> {
    fn deref_mut(&mut self) -> &mut NetMessage {
        match &mut self.message {
            Some(message) => message,
            None => unreachable!("pooled message used after detach"),
        }
    }
}

impl Drop for PooledMessage<'_> {
    fn drop(&mut self) {
        if let Some(message) = self.message.take() {
            self.pool.release(message);
        }
    }
}
