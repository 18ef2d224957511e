use super::factory::{WebSocketFactory, WsStream};
use crate::backend::{BackendSignal, CancelFn, RealtimeBackend};
use crate::types::{DEFAULT_PING_INTERVAL, Frame, RealtimeError, Result, ServerFrame};
use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

/// [`RealtimeBackend`] over the hosted backend's realtime socket.
///
/// Each subscription gets its own socket at `{endpoint}/realtime?project=..&channels[]=..`.
/// The `connected` frame acknowledges the channel; `event` and `error` frames are forwarded
/// as signals, and any socket failure ends the subscription with an error signal.
pub struct SocketBackend {
    endpoint: String,
    project: String,
    session: Option<String>,
    ping_interval: Duration,
}

impl SocketBackend {
    pub fn new(endpoint: impl Into<String>, project: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            project: project.into(),
            session: None,
            ping_interval: Duration::from_millis(DEFAULT_PING_INTERVAL),
        }
    }

    /// Authenticate each socket with a session secret once it opens
    pub fn with_session(mut self, session: impl Into<String>) -> Self {
        self.session = Some(session.into());
        self
    }

    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    pub fn channel_url(&self, channel: &str) -> Result<Url> {
        let mut url = Url::parse(&self.endpoint)?;
        url.path_segments_mut()
            .map_err(|_| RealtimeError::Config(format!("invalid endpoint: {}", self.endpoint)))?
            .pop_if_empty()
            .push("realtime");
        url.query_pairs_mut()
            .append_pair("project", &self.project)
            .append_pair("channels[]", channel);
        Ok(url)
    }
}

#[async_trait]
impl RealtimeBackend for SocketBackend {
    async fn subscribe(
        &self,
        channel: &str,
        sink: mpsc::Sender<BackendSignal>,
    ) -> Result<CancelFn> {
        let url = self.channel_url(channel)?;
        tracing::info!("Opening realtime socket for {}", channel);

        let stream = WebSocketFactory::create(url.as_str()).await?;
        let (mut write, read) = stream.split();

        if let Some(session) = &self.session {
            let frame = serde_json::to_string(&Frame::authentication(session))?;
            write.send(Message::Text(frame.into())).await?;
        }

        let handle = tokio::spawn(run_socket(
            write,
            read,
            sink,
            self.ping_interval,
            channel.to_string(),
        ));
        Ok(Box::new(move || handle.abort()))
    }
}

async fn run_socket(
    mut write: SplitSink<WsStream, Message>,
    mut read: SplitStream<WsStream>,
    sink: mpsc::Sender<BackendSignal>,
    ping_interval: Duration,
    channel: String,
) {
    let mut ping = time::interval(ping_interval);
    ping.set_missed_tick_behavior(time::MissedTickBehavior::Skip);
    ping.tick().await;

    loop {
        tokio::select! {
            _ = ping.tick() => {
                if let Err(err) = send_ping(&mut write).await {
                    tracing::warn!("Ping failed on {}: {}", channel, err);
                    let _ = sink.send(BackendSignal::Error(err)).await;
                    break;
                }
            }
            message = read.next() => {
                let signal = match message {
                    Some(Ok(Message::Text(text))) => match ServerFrame::parse(text.as_str()) {
                        Ok(frame) => frame_signal(frame),
                        Err(err) => {
                            tracing::error!("Failed to parse frame: {} - Raw: {}", err, text.as_str());
                            None
                        }
                    },
                    Some(Ok(Message::Close(frame))) => {
                        let reason = frame
                            .map(|frame| frame.reason.as_str().to_string())
                            .unwrap_or_default();
                        tracing::warn!("Server closed socket for {}: '{}'", channel, reason);
                        let _ = sink
                            .send(BackendSignal::Error(RealtimeError::Network(format!(
                                "socket closed by server: {}",
                                reason
                            ))))
                            .await;
                        break;
                    }
                    Some(Ok(other)) => {
                        tracing::debug!("Ignoring {} byte control frame", other.len());
                        None
                    }
                    Some(Err(err)) => {
                        tracing::error!("WebSocket read error on {}: {}", channel, err);
                        let _ = sink.send(BackendSignal::Error(err.into())).await;
                        break;
                    }
                    None => {
                        let _ = sink
                            .send(BackendSignal::Error(RealtimeError::Network(
                                "socket stream ended".to_string(),
                            )))
                            .await;
                        break;
                    }
                };

                if let Some(signal) = signal
                    && sink.send(signal).await.is_err()
                {
                    break;
                }
            }
        }
    }
    tracing::debug!("Socket task for {} finished", channel);
}

async fn send_ping(write: &mut SplitSink<WsStream, Message>) -> Result<()> {
    let frame = serde_json::to_string(&Frame::ping())?;
    write.send(Message::Text(frame.into())).await?;
    Ok(())
}

fn frame_signal(frame: ServerFrame) -> Option<BackendSignal> {
    match frame {
        ServerFrame::Connected => Some(BackendSignal::Ack),
        ServerFrame::Event(event) => Some(BackendSignal::Event(event)),
        ServerFrame::Error(err) => Some(BackendSignal::Error(err.into())),
        ServerFrame::Pong => None,
        ServerFrame::Response(data) => {
            tracing::debug!("Response frame: {}", data);
            None
        }
        ServerFrame::Unknown(kind) => {
            tracing::debug!("Unknown frame type: {}", kind);
            None
        }
    }
}
