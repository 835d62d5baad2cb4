//! Transport wrapper for one peer.
//!
//! A [`Connection`] is split into a cloneable [`ConnectionHandle`] used for
//! writes and a [`ConnectionReader`] owned by the session that drives it.
//! Nothing in here knows about players or events.

use std::{pin::Pin, sync::Arc, time::Duration};

use axum::extract::ws::{Message, WebSocket};
use futures::{Sink, SinkExt, Stream, StreamExt, future};
use thiserror::Error;
use tokio::{
    select,
    sync::{Mutex, MutexGuard, Notify},
    time::timeout,
};

type BoxError = Box<dyn std::error::Error + Send + Sync>;
type FrameSink = Pin<Box<dyn Sink<Frame, Error = ConnectionError> + Send>>;
type FrameStream = Pin<Box<dyn Stream<Item = Result<Frame, ConnectionError>> + Send>>;

/// One transport-level message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
}

impl From<Frame> for Message {
    fn from(frame: Frame) -> Self {
        match frame {
            Frame::Text(text) => Message::Text(text),
            Frame::Binary(bytes) => Message::Binary(bytes),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("connection closed")]
    Closed,
    #[error("write timed out after {0:?}")]
    TimedOut(Duration),
    #[error("transport failure: {0}")]
    Transport(#[source] BoxError),
}

impl ConnectionError {
    fn transport<E>(err: E) -> Self
    where
        E: Into<BoxError>,
    {
        ConnectionError::Transport(err.into())
    }
}

pub struct Connection {
    sink: FrameSink,
    stream: FrameStream,
    write_timeout: Duration,
}

impl Connection {
    pub fn new<S, R>(sink: S, stream: R, write_timeout: Duration) -> Self
    where
        S: Sink<Frame, Error = ConnectionError> + Send + 'static,
        R: Stream<Item = Result<Frame, ConnectionError>> + Send + 'static,
    {
        Self {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
            write_timeout,
        }
    }

    /// Wraps an upgraded WebSocket. Ping/pong frames are answered by the
    /// transport and never surface here; a close frame ends the stream.
    pub fn from_websocket(socket: WebSocket, write_timeout: Duration) -> Self {
        let (sink, stream) = socket.split();

        let sink = sink
            .with(|frame: Frame| future::ready(Ok::<_, axum::Error>(Message::from(frame))))
            .sink_map_err(ConnectionError::transport);

        let stream = stream
            .take_while(|message| future::ready(!matches!(message, Ok(Message::Close(_)))))
            .filter_map(|message| {
                future::ready(match message {
                    Ok(Message::Text(text)) => Some(Ok(Frame::Text(text))),
                    Ok(Message::Binary(bytes)) => Some(Ok(Frame::Binary(bytes))),
                    Ok(Message::Ping(_) | Message::Pong(_) | Message::Close(_)) => None,
                    Err(err) => Some(Err(ConnectionError::transport(err))),
                })
            });

        Self::new(sink, stream, write_timeout)
    }

    pub fn split(self) -> (ConnectionHandle, ConnectionReader) {
        let closed = Arc::new(Notify::new());
        let handle = ConnectionHandle {
            sink: Arc::new(Mutex::new(self.sink)),
            closed: Arc::clone(&closed),
            write_timeout: self.write_timeout,
        };
        let reader = ConnectionReader {
            stream: self.stream,
            closed,
        };
        (handle, reader)
    }
}

/// Write side of a connection. Clones share the same underlying sink, so
/// writes from the dispatcher and the owning session never interleave.
#[derive(Clone)]
pub struct ConnectionHandle {
    sink: Arc<Mutex<FrameSink>>,
    closed: Arc<Notify>,
    write_timeout: Duration,
}

impl ConnectionHandle {
    pub async fn write_message(&self, frame: Frame) -> Result<(), ConnectionError> {
        self.lock().await.write_message(frame).await
    }

    /// Holds the write side exclusively until the returned writer is dropped.
    pub async fn lock(&self) -> ConnectionWriter<'_> {
        ConnectionWriter {
            sink: self.sink.lock().await,
            write_timeout: self.write_timeout,
        }
    }

    /// Closes the sink and wakes the reader. Safe to call more than once.
    pub async fn close(&self) {
        self.closed.notify_one();
        let mut sink = self.sink.lock().await;
        let _ = timeout(self.write_timeout, sink.close()).await;
    }
}

pub struct ConnectionWriter<'a> {
    sink: MutexGuard<'a, FrameSink>,
    write_timeout: Duration,
}

impl ConnectionWriter<'_> {
    pub async fn write_message(&mut self, frame: Frame) -> Result<(), ConnectionError> {
        match timeout(self.write_timeout, self.sink.send(frame)).await {
            Ok(result) => result,
            Err(_) => Err(ConnectionError::TimedOut(self.write_timeout)),
        }
    }
}

/// Read side of a connection, owned by exactly one session.
pub struct ConnectionReader {
    stream: FrameStream,
    closed: Arc<Notify>,
}

impl ConnectionReader {
    /// Returns the next frame, or `Closed` once the peer goes away or the
    /// handle was closed locally.
    pub async fn read_message(&mut self) -> Result<Frame, ConnectionError> {
        select! {
            biased;
            _ = self.closed.notified() => Err(ConnectionError::Closed),
            next = self.stream.next() => next.unwrap_or(Err(ConnectionError::Closed)),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reader_ends_when_peer_hangs_up() {
        let (conn, peer) = memory::connection();
        let (_handle, mut reader) = conn.split();

        peer.send_text("hello");
        assert_eq!(reader.read_message().await.expect("frame"), Frame::Text("hello".into()));

        drop(peer);
        assert!(matches!(reader.read_message().await, Err(ConnectionError::Closed)));
    }

    #[tokio::test]
    async fn close_wakes_a_pending_reader() {
        let (conn, _peer) = memory::connection();
        let (handle, mut reader) = conn.split();

        let read = tokio::spawn(async move { reader.read_message().await });
        handle.close().await;

        let result = read.await.expect("reader task");
        assert!(matches!(result, Err(ConnectionError::Closed)));
    }

    #[tokio::test]
    async fn write_fails_once_peer_is_gone() {
        let (conn, peer) = memory::connection();
        let (handle, _reader) = conn.split();
        drop(peer);

        let result = handle.write_message(Frame::Text("x".into())).await;
        assert!(matches!(result, Err(ConnectionError::Transport(_))));
    }

    #[tokio::test]
    async fn locked_writer_delays_other_clones() {
        let (conn, mut peer) = memory::connection();
        let (handle, _reader) = conn.split();
        let other = handle.clone();

        let mut writer = handle.lock().await;
        let queued = tokio::spawn(async move { other.write_message(Frame::Text("2".into())).await });
        tokio::task::yield_now().await;
        writer.write_message(Frame::Text("1".into())).await.expect("first write");
        drop(writer);
        queued.await.expect("writer task").expect("second write");

        assert_eq!(peer.outbound.try_next().ok().flatten(), Some(Frame::Text("1".into())));
        assert_eq!(peer.outbound.try_next().ok().flatten(), Some(Frame::Text("2".into())));
    }

    #[tokio::test]
    async fn write_times_out_when_peer_stops_reading() {
        let (conn, _peer) = memory::stalled_connection(Duration::from_millis(50));
        let (handle, _reader) = conn.split();

        handle.write_message(Frame::Text("1".into())).await.expect("buffered write");
        let result = handle.write_message(Frame::Text("2".into())).await;

        assert!(matches!(
            result,
            Err(ConnectionError::TimedOut(limit)) if limit == Duration::from_millis(50)
        ));
    }
}
