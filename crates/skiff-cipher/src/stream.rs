//! The framed cipher stream and its split read/write halves.
//!
//! A [`CipherStream`] owns a raw transport and a pair of directional
//! cipher states. Reads decode one frame at a time and yield a typed
//! [`ReadStatus`]; writes seal payload into DAT frames or emit zero-length
//! control frames.
//!
//! # Terminal statuses
//!
//! Control frames terminate the read direction:
//!
//! - `Rst` and `Ack` are sticky: once observed, every later read returns
//!   the same status without touching the transport.
//! - `Fin` ends payload delivery permanently, but the decoder keeps
//!   running underneath: a later control frame (the reuse ACK, or an
//!   abort) still surfaces, and any payload frames in that window are
//!   discarded. This is what allows the post-FIN reuse negotiation.

use bytes::{Buf, BytesMut};
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};

use crate::error::CipherError;
use crate::frame::{Flag, LEN_SIZE, MAX_PAYLOAD, MAX_SEALED, TAG_SIZE};
use crate::key::SessionKeys;
use crate::nonce::{Direction, construct_nonce};

/// Result of one cipher-stream read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    /// Payload bytes were copied into the caller's buffer.
    Data(usize),
    /// The peer half-closed this direction.
    Fin,
    /// The peer aborted the stream.
    Rst,
    /// The peer acknowledged a reuse boundary.
    Ack,
}

impl ReadStatus {
    /// True for the non-data statuses that end a direction.
    pub const fn is_terminal(self) -> bool {
        !matches!(self, ReadStatus::Data(_))
    }
}

/// Sealing (outbound) state for one direction.
struct SealState {
    cipher: XChaCha20Poly1305,
    direction: Direction,
    counter: u64,
    half_closed: bool,
}

impl SealState {
    fn new(keys: &SessionKeys, direction: Direction) -> Self {
        Self {
            cipher: XChaCha20Poly1305::new(Key::from_slice(keys.key(direction))),
            direction,
            counter: 0,
            half_closed: false,
        }
    }

    fn seal(&mut self, flag: Flag, payload: &[u8]) -> Result<Vec<u8>, CipherError> {
        debug_assert!(payload.len() <= MAX_PAYLOAD);
        let counter = self.counter;
        self.counter = counter.checked_add(1).ok_or(CipherError::NonceExhausted)?;
        let nonce = construct_nonce(self.direction, counter);

        let mut plain = Vec::with_capacity(1 + payload.len());
        plain.push(flag.bits());
        plain.extend_from_slice(payload);

        self.cipher
            .encrypt(XNonce::from_slice(&nonce), plain.as_slice())
            .map_err(|_| CipherError::BadSeal)
    }
}

/// Opening (inbound) state for one direction.
struct OpenState {
    cipher: XChaCha20Poly1305,
    direction: Direction,
    counter: u64,
    /// Sticky terminal status for this direction.
    terminal: Option<ReadStatus>,
    /// Plaintext decoded but not yet delivered to the caller.
    carry: BytesMut,
}

impl OpenState {
    fn new(keys: &SessionKeys, direction: Direction) -> Self {
        Self {
            cipher: XChaCha20Poly1305::new(Key::from_slice(keys.key(direction))),
            direction,
            counter: 0,
            terminal: None,
            carry: BytesMut::new(),
        }
    }

    fn open(&mut self, sealed: &[u8]) -> Result<(Flag, Vec<u8>), CipherError> {
        let counter = self.counter;
        self.counter = counter.checked_add(1).ok_or(CipherError::NonceExhausted)?;
        let nonce = construct_nonce(self.direction, counter);

        let plain = self
            .cipher
            .decrypt(XNonce::from_slice(&nonce), sealed)
            .map_err(|_| CipherError::BadSeal)?;
        let Some(&bits) = plain.first() else {
            return Err(CipherError::Malformed("missing flag byte"));
        };
        let flag = Flag::from_bits(bits).ok_or(CipherError::InvalidFlag(bits))?;
        if flag.is_control() && plain.len() > 1 {
            return Err(CipherError::Malformed("control frame with payload"));
        }
        Ok((flag, plain))
    }
}

/// Read the next frame off the wire and open it.
async fn read_frame<R>(io: &mut R, st: &mut OpenState) -> Result<(Flag, Vec<u8>), CipherError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; LEN_SIZE];
    io.read_exact(&mut len_buf).await?;
    let len = u16::from_be_bytes(len_buf) as usize;
    if len <= TAG_SIZE {
        return Err(CipherError::Malformed("sealed record too short"));
    }
    if len > MAX_SEALED {
        return Err(CipherError::Oversized(len));
    }

    let mut sealed = vec![0u8; len];
    io.read_exact(&mut sealed).await?;
    st.open(&sealed)
}

/// Shared read path for the whole stream and its read half.
async fn read_into<R>(
    io: &mut R,
    st: &mut OpenState,
    buf: &mut [u8],
) -> Result<ReadStatus, CipherError>
where
    R: AsyncRead + Unpin,
{
    // Serve plaintext left over from a frame larger than the caller's
    // buffer first.
    if !st.carry.is_empty() {
        let n = st.carry.len().min(buf.len());
        buf[..n].copy_from_slice(&st.carry[..n]);
        st.carry.advance(n);
        return Ok(ReadStatus::Data(n));
    }

    match st.terminal {
        Some(ReadStatus::Rst) => return Ok(ReadStatus::Rst),
        Some(ReadStatus::Ack) => return Ok(ReadStatus::Ack),
        _ => {}
    }

    loop {
        let (flag, plain) = read_frame(io, st).await?;
        match flag {
            Flag::Dat => {
                let payload = &plain[1..];
                // Payload after FIN belongs to no session; drop it.
                if st.terminal == Some(ReadStatus::Fin) || payload.is_empty() {
                    continue;
                }
                let n = payload.len().min(buf.len());
                buf[..n].copy_from_slice(&payload[..n]);
                if n < payload.len() {
                    st.carry.extend_from_slice(&payload[n..]);
                }
                return Ok(ReadStatus::Data(n));
            }
            Flag::Fin => {
                st.terminal = Some(ReadStatus::Fin);
                return Ok(ReadStatus::Fin);
            }
            Flag::Rst => {
                st.terminal = Some(ReadStatus::Rst);
                return Ok(ReadStatus::Rst);
            }
            Flag::Ack => {
                st.terminal = Some(ReadStatus::Ack);
                return Ok(ReadStatus::Ack);
            }
        }
    }
}

/// Read and discard payload until a terminal status arrives.
async fn drain_into<R>(
    io: &mut R,
    st: &mut OpenState,
    buf: &mut [u8],
) -> Result<ReadStatus, CipherError>
where
    R: AsyncRead + Unpin,
{
    loop {
        match read_into(io, st, buf).await? {
            ReadStatus::Data(_) => continue,
            status => return Ok(status),
        }
    }
}

/// Seal one frame and write it out.
async fn write_frame<W>(
    io: &mut W,
    st: &mut SealState,
    flag: Flag,
    payload: &[u8],
) -> Result<(), CipherError>
where
    W: AsyncWrite + Unpin,
{
    let sealed = st.seal(flag, payload)?;
    let mut wire = BytesMut::with_capacity(LEN_SIZE + sealed.len());
    wire.extend_from_slice(&(sealed.len() as u16).to_be_bytes());
    wire.extend_from_slice(&sealed);
    io.write_all(&wire).await?;
    io.flush().await?;
    Ok(())
}

/// Shared payload-write path.
async fn write_payload<W>(io: &mut W, st: &mut SealState, payload: &[u8]) -> Result<usize, CipherError>
where
    W: AsyncWrite + Unpin,
{
    if st.half_closed {
        return Err(CipherError::WriteAfterFin);
    }
    for chunk in payload.chunks(MAX_PAYLOAD) {
        write_frame(io, st, Flag::Dat, chunk).await?;
    }
    Ok(payload.len())
}

/// Shared control-write path. FIN half-closes the write side; control
/// frames (including ACK after FIN) stay allowed.
async fn write_control<W>(io: &mut W, st: &mut SealState, flag: Flag) -> Result<(), CipherError>
where
    W: AsyncWrite + Unpin,
{
    debug_assert!(flag.is_control());
    write_frame(io, st, flag, &[]).await?;
    if flag == Flag::Fin {
        st.half_closed = true;
    }
    Ok(())
}

/// A framed AEAD duplex stream over a raw transport.
pub struct CipherStream<S> {
    io: S,
    seal: SealState,
    open: OpenState,
}

impl<S> CipherStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap the client end of a transport: seals client-to-server frames,
    /// opens server-to-client frames.
    pub fn client(io: S, keys: &SessionKeys) -> Self {
        Self::with_direction(io, keys, Direction::ClientToServer)
    }

    /// Wrap the server end of a transport.
    pub fn server(io: S, keys: &SessionKeys) -> Self {
        Self::with_direction(io, keys, Direction::ServerToClient)
    }

    fn with_direction(io: S, keys: &SessionKeys, seal_direction: Direction) -> Self {
        Self {
            io,
            seal: SealState::new(keys, seal_direction),
            open: OpenState::new(keys, seal_direction.opposite()),
        }
    }

    /// Read decrypted payload into `buf`, or a terminal status.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<ReadStatus, CipherError> {
        read_into(&mut self.io, &mut self.open, buf).await
    }

    /// Read and discard payload until a terminal status arrives.
    pub async fn drain(&mut self, buf: &mut [u8]) -> Result<ReadStatus, CipherError> {
        drain_into(&mut self.io, &mut self.open, buf).await
    }

    /// Seal `payload` into one or more DAT frames.
    pub async fn write(&mut self, payload: &[u8]) -> Result<usize, CipherError> {
        write_payload(&mut self.io, &mut self.seal, payload).await
    }

    /// Emit a zero-payload control frame.
    pub async fn write_control(&mut self, flag: Flag) -> Result<(), CipherError> {
        write_control(&mut self.io, &mut self.seal, flag).await
    }

    /// The sticky terminal status of the read direction, if any.
    pub fn read_terminal(&self) -> Option<ReadStatus> {
        self.open.terminal
    }

    /// True once a FIN control frame has been sent.
    pub fn is_write_half_closed(&self) -> bool {
        self.seal.half_closed
    }

    /// Return the stream to a session boundary after a successful reuse
    /// negotiation: clears the read terminal latch and the write
    /// half-close so a new session can start. Frame counters keep
    /// running, so nonces never repeat across sessions.
    pub fn reset_session(&mut self) {
        debug_assert!(self.open.carry.is_empty());
        self.open.terminal = None;
        self.seal.half_closed = false;
    }

    /// Borrowed split into independently usable read and write halves.
    /// Dropping the halves returns exclusive use of the whole stream.
    pub fn split(&mut self) -> (CipherReadHalf<'_, S>, CipherWriteHalf<'_, S>) {
        let (read_io, write_io) = tokio::io::split(&mut self.io);
        (
            CipherReadHalf {
                io: read_io,
                state: &mut self.open,
            },
            CipherWriteHalf {
                io: write_io,
                state: &mut self.seal,
            },
        )
    }

    /// Reference to the underlying transport.
    pub fn get_ref(&self) -> &S {
        &self.io
    }

    /// Consume the stream, returning the underlying transport.
    pub fn into_inner(self) -> S {
        self.io
    }
}

/// Read half of a split [`CipherStream`].
pub struct CipherReadHalf<'a, S> {
    io: ReadHalf<&'a mut S>,
    state: &'a mut OpenState,
}

impl<S> CipherReadHalf<'_, S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// See [`CipherStream::read`].
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<ReadStatus, CipherError> {
        read_into(&mut self.io, self.state, buf).await
    }

    /// See [`CipherStream::drain`].
    pub async fn drain(&mut self, buf: &mut [u8]) -> Result<ReadStatus, CipherError> {
        drain_into(&mut self.io, self.state, buf).await
    }
}

/// Write half of a split [`CipherStream`].
pub struct CipherWriteHalf<'a, S> {
    io: WriteHalf<&'a mut S>,
    state: &'a mut SealState,
}

impl<S> CipherWriteHalf<'_, S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// See [`CipherStream::write`].
    pub async fn write(&mut self, payload: &[u8]) -> Result<usize, CipherError> {
        write_payload(&mut self.io, self.state, payload).await
    }

    /// See [`CipherStream::write_control`].
    pub async fn write_control(&mut self, flag: Flag) -> Result<(), CipherError> {
        write_control(&mut self.io, self.state, flag).await
    }
}
