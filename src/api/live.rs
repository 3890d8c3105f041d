//! Live run updates over server-sent events.
//!
//! Framing, `Last-Event-ID` replay and `retry:` handling come from
//! `reqwest-eventsource`. Once a connection has been open, drops are retried
//! after the reconnect delay and every retry is reported as an `Error`
//! followed by `Open` when it succeeds. A failure before the first `Open` ends
//! the channel.

use super::client::ApiClient;
use super::error::TransportError;
use crate::transport::{ChannelSignal, LiveChannel, LiveUpdates};
use futures::StreamExt;
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use reqwest_eventsource::retry::Constant;
use reqwest_eventsource::{Error as EventSourceError, Event, EventSource};
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedSender};
use tracing::{debug, info, warn};

const DEFAULT_EVENT_TYPE: &str = "message";

impl LiveUpdates for ApiClient {
    fn open(&self, run_id: &str) -> LiveChannel {
        let (tx, rx) = mpsc::unbounded_channel();
        let request = self
            .http
            .get(self.stream_url(run_id))
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache");
        let task = tokio::spawn(run_event_stream(request, self.cfg.reconnect_delay, tx));
        LiveChannel::new(rx, task)
    }
}

/// Human-readable detail for a stream error, reading the body of rejected
/// responses.
async fn error_detail(err: EventSourceError) -> String {
    match err {
        EventSourceError::InvalidStatusCode(status, resp) => {
            let body = resp.text().await.unwrap_or_default();
            TransportError::from_status(status, &body).detail()
        }
        EventSourceError::InvalidContentType(content_type, _) => {
            format!("unexpected content type {content_type:?}")
        }
        EventSourceError::Transport(e) => TransportError::from(e).detail(),
        EventSourceError::StreamEnded => "stream closed by server".to_string(),
        other => other.to_string(),
    }
}

async fn run_event_stream(
    request: reqwest::RequestBuilder,
    reconnect_delay: Duration,
    tx: UnboundedSender<ChannelSignal>,
) {
    let mut source = match EventSource::new(request) {
        Ok(source) => source,
        Err(e) => {
            let _ = tx.send(ChannelSignal::Error(e.to_string()));
            return;
        }
    };
    source.set_retry_policy(Box::new(Constant::new(reconnect_delay, None)));
    let mut has_opened = false;

    while let Some(event) = source.next().await {
        let signal = match event {
            Ok(Event::Open) => {
                has_opened = true;
                info!("live channel open");
                ChannelSignal::Open
            }
            Ok(Event::Message(msg)) if msg.event == DEFAULT_EVENT_TYPE => {
                ChannelSignal::Message(msg.data)
            }
            Ok(Event::Message(msg)) => {
                debug!(event = %msg.event, "ignoring typed event");
                continue;
            }
            Err(err) => {
                let detail = error_detail(err).await;
                if has_opened {
                    warn!(%detail, "live channel dropped, reconnecting");
                } else {
                    warn!(%detail, "live channel connect failed");
                    source.close();
                    let _ = tx.send(ChannelSignal::Error(detail));
                    return;
                }
                ChannelSignal::Error(detail)
            }
        };
        if tx.send(signal).is_err() {
            source.close();
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ApiConfig;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    async fn read_request(sock: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = sock.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
        }
        String::from_utf8_lossy(&buf).to_lowercase()
    }

    async fn client_for(listener: &TcpListener) -> ApiClient {
        let addr = listener.local_addr().unwrap();
        ApiClient::new(ApiConfig {
            base_url: format!("http://{addr}"),
            reconnect_delay: Duration::from_millis(20),
            ..ApiConfig::default()
        })
        .unwrap()
    }

    async fn next(channel: &mut LiveChannel) -> Option<ChannelSignal> {
        tokio::time::timeout(Duration::from_secs(10), channel.recv())
            .await
            .expect("no signal in time")
    }

    #[tokio::test]
    async fn failure_before_open_ends_the_channel() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let client = client_for(&listener).await;
        let mut channel = client.open("r1");

        let (mut sock, _) = listener.accept().await.unwrap();
        let request = read_request(&mut sock).await;
        assert!(request.starts_with("get /analysis/runs/r1/stream?client=cli "));
        assert!(request.contains("accept: text/event-stream"));
        sock.write_all(
            b"HTTP/1.1 503 Service Unavailable\r\ncontent-length: 4\r\nconnection: close\r\n\r\ndown",
        )
        .await
        .unwrap();

        assert_eq!(next(&mut channel).await, Some(ChannelSignal::Error("down".into())));
        assert_eq!(next(&mut channel).await, None);
    }

    #[tokio::test]
    async fn reconnects_after_drop_with_last_event_id() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let client = client_for(&listener).await;
        let mut channel = client.open("r1");

        let (mut sock, _) = listener.accept().await.unwrap();
        read_request(&mut sock).await;
        sock.write_all(
            b"HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\nconnection: close\r\n\r\n\
              retry: 10\nid: 7\ndata: {\"run_id\":\"r1\",\"status\":\"running\"}\n\n\
              event: heartbeat\ndata: ping\n\n",
        )
        .await
        .unwrap();
        sock.shutdown().await.unwrap();
        drop(sock);

        assert_eq!(next(&mut channel).await, Some(ChannelSignal::Open));
        assert_eq!(
            next(&mut channel).await,
            Some(ChannelSignal::Message(
                "{\"run_id\":\"r1\",\"status\":\"running\"}".into()
            ))
        );
        assert!(matches!(next(&mut channel).await, Some(ChannelSignal::Error(_))));

        let (mut sock, _) = listener.accept().await.unwrap();
        let request = read_request(&mut sock).await;
        assert!(request.contains("last-event-id: 7"));
        sock.write_all(b"HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\n\r\n")
            .await
            .unwrap();
        assert_eq!(next(&mut channel).await, Some(ChannelSignal::Open));

        channel.close();
        assert_eq!(channel.recv().await, None);
    }

    #[tokio::test]
    async fn empty_event_id_is_not_replayed() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let client = client_for(&listener).await;
        let mut channel = client.open("r1");

        let (mut sock, _) = listener.accept().await.unwrap();
        read_request(&mut sock).await;
        sock.write_all(
            b"HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\nconnection: close\r\n\r\n\
              id: 7\ndata: a\n\nid:\ndata: b\n\n",
        )
        .await
        .unwrap();
        sock.shutdown().await.unwrap();
        drop(sock);

        assert_eq!(next(&mut channel).await, Some(ChannelSignal::Open));
        assert_eq!(next(&mut channel).await, Some(ChannelSignal::Message("a".into())));
        assert_eq!(next(&mut channel).await, Some(ChannelSignal::Message("b".into())));
        assert!(matches!(next(&mut channel).await, Some(ChannelSignal::Error(_))));

        let (mut sock, _) = listener.accept().await.unwrap();
        let request = read_request(&mut sock).await;
        assert!(!request.contains("last-event-id"));
        channel.close();
    }

    #[tokio::test]
    async fn wrong_content_type_is_an_open_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let client = client_for(&listener).await;
        let mut channel = client.open("r1");

        let (mut sock, _) = listener.accept().await.unwrap();
        read_request(&mut sock).await;
        sock.write_all(
            b"HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: 2\r\n\r\n{}",
        )
        .await
        .unwrap();

        assert!(matches!(
            next(&mut channel).await,
            Some(ChannelSignal::Error(detail)) if detail.contains("application/json")
        ));
        assert_eq!(next(&mut channel).await, None);
    }
}
