use std::io;
use std::time::Duration;

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use streams_store::{LogStream, RecordFrames};
use tokio::sync::mpsc;
use tokio::time::{sleep_until, timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::state::AppState;

/// How a replay session came to an end.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Ending {
    /// Every record of the snapshot was sent.
    Done,
    /// Reading the stream failed.
    Failed,
    /// The connection outlived its maximum lifetime.
    Expired,
    /// The server is shutting down.
    Shutdown,
    /// The transport broke; no close frame is sent.
    Aborted,
}

impl Ending {
    fn close_frame(self) -> Option<CloseFrame<'static>> {
        let (code, reason) = match self {
            Ending::Done => (close_code::NORMAL, "done"),
            Ending::Failed => (close_code::ERROR, "storage failure"),
            Ending::Expired => (close_code::POLICY, "max connection lifetime reached"),
            Ending::Shutdown => (close_code::AWAY, "server shutting down"),
            Ending::Aborted => return None,
        };
        Some(CloseFrame {
            code,
            reason: reason.into(),
        })
    }
}

/// One websocket replay of a single stream.
pub struct ReplaySession {
    stream: LogStream,
    shutdown: CancellationToken,
    max_lifetime: Duration,
    close_timeout: Duration,
    capacity: usize,
}

impl ReplaySession {
    pub fn new(stream: LogStream, state: &AppState) -> Self {
        Self {
            stream,
            shutdown: state.shutdown.clone(),
            max_lifetime: state.max_lifetime,
            close_timeout: state.close_timeout,
            capacity: state.channel_capacity,
        }
    }

    /// Send every record value of the stream, in key order, then close.
    pub async fn run(self, mut socket: WebSocket) -> Ending {
        let name = self.stream.name().to_owned();
        let (tx, mut rx) = mpsc::channel(self.capacity);
        let stream = self.stream.clone();
        let producer = tokio::task::spawn_blocking(move || produce(stream, tx));

        let expires_at = Instant::now() + self.max_lifetime;
        let deadline = sleep_until(expires_at);
        tokio::pin!(deadline);

        let mut sent = 0u64;
        let mut ending = loop {
            let value = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break Ending::Shutdown,
                _ = &mut deadline => break Ending::Expired,
                next = rx.recv() => match next {
                    None => break Ending::Done,
                    Some(Err(e)) => {
                        error!(stream = %name, error = %e, "replay read failed");
                        break Ending::Failed;
                    }
                    Some(Ok(value)) => value,
                },
            };
            if Instant::now() >= expires_at {
                break Ending::Expired;
            }

            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break Ending::Shutdown,
                _ = &mut deadline => break Ending::Expired,
                result = socket.send(into_message(value)) => {
                    if let Err(e) = result {
                        warn!(stream = %name, error = %e, "replay client went away");
                        break Ending::Aborted;
                    }
                    sent += 1;
                }
            }
        };

        // Dropping the receiver stops a producer still walking the snapshot.
        drop(rx);
        if let Err(e) = producer.await {
            error!(stream = %name, error = %e, "replay producer panicked");
            if ending == Ending::Done {
                ending = Ending::Failed;
            }
        }

        // A stalled client keeps earlier frames queued ahead of the close.
        if let Some(frame) = ending.close_frame() {
            match timeout(self.close_timeout, socket.send(Message::Close(Some(frame)))).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!(stream = %name, error = %e, "close frame not delivered"),
                Err(_) => warn!(
                    stream = %name,
                    after = ?self.close_timeout,
                    "close frame not flushed in time; dropping connection"
                ),
            }
        }
        drop(socket);
        info!(stream = %name, sent, ending = ?ending, "replay session ended");
        ending
    }
}

/// Walk a fresh snapshot of `stream` on the blocking pool, forwarding values.
fn produce(stream: LogStream, tx: mpsc::Sender<io::Result<Vec<u8>>>) {
    let reader = stream.read();
    for record in RecordFrames::from_reader(reader) {
        let failed = record.is_err();
        if tx.blocking_send(record.map(|r| r.value)).is_err() {
            debug!(stream = stream.name(), "replay receiver dropped; producer stopping");
            return;
        }
        if failed {
            return;
        }
    }
}

fn into_message(value: Vec<u8>) -> Message {
    match String::from_utf8(value) {
        Ok(text) => Message::Text(text),
        Err(e) => Message::Binary(e.into_bytes()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_codes_per_ending() {
        let code = |ending: Ending| ending.close_frame().map(|f| f.code);
        assert_eq!(code(Ending::Done), Some(1000));
        assert_eq!(code(Ending::Failed), Some(1011));
        assert_eq!(code(Ending::Expired), Some(1008));
        assert_eq!(code(Ending::Shutdown), Some(1001));
        assert_eq!(code(Ending::Aborted), None);
        assert_eq!(Ending::Done.close_frame().unwrap().reason, "done");
    }

    #[test]
    fn utf8_values_are_text() {
        assert!(matches!(into_message(b"x".to_vec()), Message::Text(t) if t == "x"));
        assert!(matches!(into_message(vec![0xff, 0x00]), Message::Binary(b) if b == [0xff, 0x00]));
    }
}
