//! A single TCP connection tracked by an I/O worker.
//!
//! Grounded on `netcore/components/tcp/impl/session.cpp`: length-prefixed
//! framing (`[u16 big-endian length][payload]`), a bounded outbound queue
//! drained in batches of up to 10 with a soft warning past 5, and an idle
//! read timeout reported as a [`crate::message::NetworkErrorCategory::SocketReadTimeout`]
//! logic error rather than a hard disconnect. Adapted from the reference's
//! asio async-handler chain to mio 0.6's edge-triggered readiness model, the
//! way `neutronium::net::channel::Channel` adapts the same framing idea to
//! mio in this workspace.

use crate::buffer::{Buffer, FLAG_LENGTH_PREFIXED};
use crate::id::SessionId;
use crate::message::{Message, NetworkErrorCategory};
use byteorder::{BigEndian, ByteOrder};
use mio::net::TcpStream;
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::time::{Duration, Instant};
use weave::logging::{self, Logger};

/// Frames over this many bytes are rejected with
/// [`NetworkErrorCategory::MessageSizeMax`] rather than buffered - matches the
/// reference's `MAX_NMSG_SIZE`.
pub const MAX_MSG_SIZE: usize = 8192;
const LENGTH_PREFIX_SIZE: usize = 2;
const SEND_QUEUE_BATCH: usize = 10;
const SEND_QUEUE_WARN_THRESHOLD: usize = 5;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SessionState {
    /// Outbound connect in flight, waiting for the first writable readiness.
    Connecting,
    Open,
    /// `close()` has run once; further operations are no-ops.
    Closed,
}

pub struct Session {
    id: SessionId,
    owner: crate::id::ServiceId,
    stream: TcpStream,
    state: SessionState,
    remote_addr: String,
    read_buf: Buffer,
    send_queue: VecDeque<Buffer>,
    sending: Option<Buffer>,
    idle_timeout: Option<Duration>,
    last_recv: Instant,
    log: Logger,
}

impl Session {
    pub fn new(
        id: SessionId,
        owner: crate::id::ServiceId,
        stream: TcpStream,
        state: SessionState,
        idle_timeout: Option<Duration>,
        log: Logger,
    ) -> Session {
        let remote_addr = stream
            .peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| "?".to_string());

        Session {
            id,
            owner,
            stream,
            state,
            remote_addr,
            read_buf: Buffer::with_capacity(4096, 0),
            send_queue: VecDeque::new(),
            sending: None,
            idle_timeout,
            last_recv: Instant::now(),
            log,
        }
    }

    #[inline]
    pub fn id(&self) -> SessionId {
        self.id
    }

    #[inline]
    pub fn owner(&self) -> crate::id::ServiceId {
        self.owner
    }

    #[inline]
    pub fn stream(&self) -> &TcpStream {
        &self.stream
    }

    #[inline]
    pub fn remote_addr(&self) -> &str {
        &self.remote_addr
    }

    #[inline]
    pub fn state(&self) -> SessionState {
        self.state
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.state == SessionState::Closed
    }

    /// Called once the connect readiness (or the accept itself) confirms the
    /// socket is usable. Produces the `network_connect` event.
    pub fn connected(&mut self) -> Message {
        self.state = SessionState::Open;
        self.last_recv = Instant::now();
        logging::debug!(self.log, "session connected"; "id" => %self.id, "remote" => %self.remote_addr);
        Message::network_event(
            crate::message::MessageType::NetworkConnect,
            self.id,
            Buffer::from_slice(self.remote_addr.as_bytes(), 0),
        )
    }

    /// Drains as many complete frames as are currently buffered, reading more
    /// off the socket first. Returns `network_recv` events in arrival order,
    /// or a single `network_logic_error`/`network_close` event if the session
    /// should be torn down.
    pub fn on_readable(&mut self) -> Vec<Message> {
        let mut out = Vec::new();
        if self.state != SessionState::Open {
            return out;
        }

        loop {
            let chunk = self.read_buf.prepare(4096);
            match self.stream.read(chunk) {
                Ok(0) => {
                    out.push(self.close());
                    return out;
                }
                Ok(n) => {
                    self.read_buf.commit(n);
                    self.last_recv = Instant::now();
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    out.extend(self.network_error(&err));
                    return out;
                }
            }
        }

        loop {
            match self.try_extract_frame() {
                Ok(Some(payload)) => out.push(Message::network_event(
                    crate::message::MessageType::NetworkRecv,
                    self.id,
                    payload,
                )),
                Ok(None) => break,
                Err(category) => {
                    out.push(Message::network_logic_error(self.id, category));
                    out.push(self.close());
                    return out;
                }
            }
        }

        out
    }

    /// Pulls one complete frame out of `read_buf` if enough bytes are buffered.
    fn try_extract_frame(&mut self) -> Result<Option<Buffer>, NetworkErrorCategory> {
        if self.read_buf.len() < LENGTH_PREFIX_SIZE {
            return Ok(None);
        }

        let header = &self.read_buf.as_slice()[..LENGTH_PREFIX_SIZE];
        let declared = BigEndian::read_u16(header) as usize;

        if declared > MAX_MSG_SIZE {
            return Err(NetworkErrorCategory::MessageSizeMax);
        }

        if self.read_buf.len() < LENGTH_PREFIX_SIZE + declared {
            return Ok(None);
        }

        let mut skip = [0u8; LENGTH_PREFIX_SIZE];
        self.read_buf.read(&mut skip);

        let mut payload = vec![0u8; declared];
        self.read_buf.read(&mut payload);

        Ok(Some(Buffer::from_slice(&payload, 0)))
    }

    /// Queues `payload` for sending. Checks the buffer's length-prefixed flag
    /// first: if it's already set (the caller already framed this buffer,
    /// e.g. a retried send), the buffer is queued as-is; otherwise the 2-byte
    /// big-endian length is prepended via the head reserve and the flag is
    /// set, so a buffer only ever gets framed once no matter how many times
    /// it passes back through here. Starts writing immediately if nothing
    /// else is in flight.
    pub fn send(&mut self, mut payload: Buffer) -> Result<(), NetworkErrorCategory> {
        if !payload.has_flag(FLAG_LENGTH_PREFIXED) {
            if payload.len() > MAX_MSG_SIZE {
                return Err(NetworkErrorCategory::MessageSizeMax);
            }

            let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
            BigEndian::write_u16(&mut prefix, payload.len() as u16);

            if !payload.write_front(&prefix) {
                // No head reserve to write the prefix into - rebuild with one
                // rather than fail the send outright.
                let mut framed = Buffer::with_capacity(payload.len() + LENGTH_PREFIX_SIZE, LENGTH_PREFIX_SIZE);
                framed.write_back(payload.as_slice());
                framed.write_front(&prefix);
                payload = framed;
            }
            payload.set_flag(FLAG_LENGTH_PREFIXED);
        }

        self.send_queue.push_back(payload);

        if self.send_queue.len() > SEND_QUEUE_WARN_THRESHOLD {
            logging::warn!(self.log, "session send queue backing up"; "id" => %self.id, "depth" => self.send_queue.len());
        }

        if self.sending.is_none() {
            self.pump_send();
        }

        Ok(())
    }

    /// Flushes as much as the socket will currently take. Call on every
    /// writable readiness as well as right after a fresh `send`.
    pub fn on_writable(&mut self) -> Vec<Message> {
        if self.state != SessionState::Open {
            return Vec::new();
        }
        self.pump_send()
    }

    fn pump_send(&mut self) -> Vec<Message> {
        loop {
            if self.sending.is_none() {
                if self.send_queue.is_empty() {
                    return Vec::new();
                }
                let mut batch = Buffer::new();
                for _ in 0..SEND_QUEUE_BATCH {
                    match self.send_queue.pop_front() {
                        Some(buf) => batch.write_back(buf.as_slice()),
                        None => break,
                    }
                }
                self.sending = Some(batch);
            }

            let buf = self.sending.as_mut().unwrap();
            match self.stream.write(buf.as_slice()) {
                Ok(0) => return Vec::new(),
                Ok(n) => {
                    buf.seek(n, crate::buffer::SeekFrom::Current);
                    if buf.is_empty() {
                        self.sending = None;
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Vec::new(),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return self.network_error(&err),
            }
        }
    }

    /// Checks whether the configured idle timeout has elapsed since the last
    /// received byte, emitting a `network_logic_error` without closing the
    /// session - matches `session::check` in the reference, which reports and
    /// leaves the connection for the caller to decide on.
    pub fn check_idle(&mut self, now: Instant) -> Option<Message> {
        let timeout = self.idle_timeout?;
        if self.state != SessionState::Open {
            return None;
        }
        if now.saturating_duration_since(self.last_recv) > timeout {
            return Some(Message::network_logic_error(self.id, NetworkErrorCategory::SocketReadTimeout));
        }
        None
    }

    /// A transport error is a terminal transition same as any other close:
    /// reports `network_error` then `network_close`, in that order, so the
    /// owning I/O worker can drop the session from its directory the same
    /// way it does for a plain `close()` (`spec.md` §3/§4.D - `network_close`
    /// fires "once, exactly on terminal transition").
    fn network_error(&mut self, err: &io::Error) -> Vec<Message> {
        logging::debug!(self.log, "session network error"; "id" => %self.id, "error" => %err);
        let error_msg = Message::network_event(
            crate::message::MessageType::NetworkError,
            self.id,
            Buffer::from_slice(err.to_string().as_bytes(), 0),
        );
        let close_msg = self.close();
        vec![error_msg, close_msg]
    }

    /// Idempotent: the first call reports `network_close` and marks the
    /// session closed, every later call is a no-op that still hands back a
    /// `network_close` so callers don't have to special-case repeats.
    pub fn close(&mut self) -> Message {
        if self.state != SessionState::Closed {
            logging::debug!(self.log, "session closed"; "id" => %self.id);
            let _ = self.stream.shutdown(std::net::Shutdown::Both);
            self.state = SessionState::Closed;
        }
        Message::network_event(
            crate::message::MessageType::NetworkClose,
            self.id,
            Buffer::from_slice(self.remote_addr.as_bytes(), 0),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mio::net::TcpListener;
    use std::net::TcpStream as StdTcpStream;

    fn make_pair() -> (Session, StdTcpStream) {
        let listener = TcpListener::bind(&"127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = listener.local_addr().unwrap();
        let client = StdTcpStream::connect(addr).unwrap();
        let (stream, _) = loop {
            if let Ok(pair) = listener.accept() {
                break pair;
            }
        };
        let session = Session::new(
            SessionId::new(0, 1),
            crate::id::ServiceId::new(0, 1),
            stream,
            SessionState::Open,
            None,
            logging::discard(),
        );
        (session, client)
    }

    #[test]
    fn test_frame_roundtrip() {
        let (mut session, mut client) = make_pair();

        let mut frame = Vec::new();
        frame.extend_from_slice(&[0x00, 0x05]);
        frame.extend_from_slice(b"hello");
        client.write_all(&frame).unwrap();

        std::thread::sleep(std::time::Duration::from_millis(20));
        let events = session.on_readable();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].bytes(), b"hello");
    }

    #[test]
    fn test_oversized_frame_is_rejected() {
        let (mut session, mut client) = make_pair();

        let mut frame = Vec::new();
        let len = (MAX_MSG_SIZE + 1) as u16;
        frame.extend_from_slice(&len.to_be_bytes());
        client.write_all(&frame).unwrap();

        std::thread::sleep(std::time::Duration::from_millis(20));
        let events = session.on_readable();
        assert!(events
            .iter()
            .any(|m| m.network_error() == Some(NetworkErrorCategory::MessageSizeMax)));
        assert!(session.is_closed());
    }

    #[test]
    fn test_close_is_idempotent() {
        let (mut session, _client) = make_pair();
        let _ = session.close();
        let second = session.close();
        assert_eq!(second.msg_type(), crate::message::MessageType::NetworkClose);
    }

    #[test]
    fn test_check_idle_reports_without_closing() {
        let (mut session, _client) = make_pair();
        session.idle_timeout = Some(std::time::Duration::from_millis(50));

        assert!(session.check_idle(Instant::now()).is_none());

        std::thread::sleep(std::time::Duration::from_millis(80));
        let msg = session.check_idle(Instant::now());
        assert_eq!(
            msg.map(|m| m.network_error()),
            Some(Some(NetworkErrorCategory::SocketReadTimeout))
        );
        // Reporting the timeout does not itself close the session.
        assert!(!session.is_closed());
    }

    #[test]
    fn test_check_idle_resets_after_new_data() {
        let (mut session, mut client) = make_pair();
        session.idle_timeout = Some(std::time::Duration::from_millis(80));

        std::thread::sleep(std::time::Duration::from_millis(50));
        client.write_all(&[0x00, 0x01, b'x']).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));
        session.on_readable();

        // A fresh byte within the window resets the idle clock.
        assert!(session.check_idle(Instant::now()).is_none());
    }
}
