use std::sync::Arc;
use tokio::{
    sync::{broadcast::error::RecvError, mpsc},
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};

use super::player::HostPlayer;
use super::publisher::StatePublisher;
use super::responder::RangeResponder;
use crate::protocol::{wire, Command, PlaybackCommand, Priority, QueueRangeRequest};
use crate::transport::{Envelope, Transport};

/// Host endpoint: executes companion commands and serves queue requests.
pub struct HostService {
    player: Arc<dyn HostPlayer>,
    publisher: Arc<StatePublisher>,
    responder: Arc<RangeResponder>,
    transport: Arc<dyn Transport>,
}

impl HostService {
    pub fn new(
        player: Arc<dyn HostPlayer>,
        publisher: Arc<StatePublisher>,
        responder: Arc<RangeResponder>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            player,
            publisher,
            responder,
            transport,
        }
    }

    /// Starts the state publisher, the request worker and the receive loop.
    pub fn spawn(self) -> Vec<JoinHandle<()>> {
        let publisher_task = self.publisher.clone().spawn(self.player.watch_state());

        let (high_tx, high_rx) = mpsc::unbounded_channel();
        let (normal_tx, normal_rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(serve_requests(self.responder.clone(), high_rx, normal_rx));

        let mut inbound = self.transport.subscribe();
        let receiver = tokio::spawn(async move {
            info!("🎧 Host listening for companion commands");
            loop {
                match inbound.recv().await {
                    Ok(envelope) => self.handle(envelope, &high_tx, &normal_tx),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("⚠️ Host lagged behind, {} messages skipped", skipped)
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            debug!("Host receive loop finished");
        });

        vec![publisher_task, worker, receiver]
    }

    fn handle(
        &self,
        envelope: Envelope,
        high_tx: &mpsc::UnboundedSender<QueueRangeRequest>,
        normal_tx: &mpsc::UnboundedSender<QueueRangeRequest>,
    ) {
        if envelope.topic.is_host_to_companion() {
            debug!("Ignoring `{}` echoed to the host", envelope.topic);
            return;
        }

        let command = match wire::decode_command(envelope.topic, &envelope.payload) {
            Ok(command) => command,
            Err(e) => {
                warn!("🚫 Discarding companion message: {}", e);
                return;
            }
        };

        match command {
            Command::Playback(PlaybackCommand::Next) => self.player.next(),
            Command::Playback(PlaybackCommand::Previous) => self.player.previous(),
            Command::Playback(PlaybackCommand::PlayPause) => self.player.toggle_play_pause(),
            Command::Playback(PlaybackCommand::RequestState) => {
                self.publisher.publish_now(self.player.state());
            }
            Command::SeekTo(index) => {
                if !self.player.seek_to(index) {
                    warn!("🚫 Seek to {} ignored, outside the queue", index);
                }
            }
            Command::RequestQueue(indices) => {
                let current = self.player.state().current_index;
                let priority = if indices.contains(&current) {
                    Priority::High
                } else {
                    Priority::Normal
                };
                let request = QueueRangeRequest::new(indices, priority);
                let queue = match priority {
                    Priority::High => high_tx,
                    Priority::Normal => normal_tx,
                };
                if queue.send(request).is_err() {
                    error!("❌ Request worker is gone, dropping queue request");
                }
            }
        }
    }
}

/// Serves queued requests one at a time, high priority first.
async fn serve_requests(
    responder: Arc<RangeResponder>,
    mut high_rx: mpsc::UnboundedReceiver<QueueRangeRequest>,
    mut normal_rx: mpsc::UnboundedReceiver<QueueRangeRequest>,
) {
    loop {
        let request = tokio::select! {
            biased;
            Some(request) = high_rx.recv() => request,
            Some(request) = normal_rx.recv() => request,
            else => break,
        };
        debug!("📨 Serving {:?} request for {:?}", request.priority, request.indices());
        responder.handle(request.indices()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ArtworkCache;
    use crate::host::artwork::PassthroughResizer;
    use crate::host::player::{sample_tracks, MemoryPlayer};
    use crate::protocol::Topic;
    use crate::transport::{LocalEndpoint, LocalLink};
    use bytes::Bytes;
    use std::time::Duration;

    fn start(player: Arc<MemoryPlayer>) -> (LocalEndpoint, Vec<JoinHandle<()>>) {
        let (host, companion) = LocalLink::pair(1 << 20, 0.0);
        let transport: Arc<dyn Transport> = Arc::new(host);
        let publisher = Arc::new(StatePublisher::new(transport.clone(), Duration::from_millis(50)));
        let responder = Arc::new(RangeResponder::new(
            player.clone(),
            player.clone(),
            Arc::new(PassthroughResizer),
            ArtworkCache::new(8, Duration::from_secs(60)),
            transport.clone(),
            400,
        ));
        let handles = HostService::new(player, publisher, responder, transport).spawn();
        (companion, handles)
    }

    async fn next_on(
        rx: &mut tokio::sync::broadcast::Receiver<Envelope>,
        topic: Topic,
    ) -> Envelope {
        loop {
            let envelope = rx.recv().await.unwrap();
            if envelope.topic == topic {
                return envelope;
            }
        }
    }

    #[tokio::test]
    async fn test_commands_drive_the_player() {
        let player = Arc::new(MemoryPlayer::new(sample_tracks(10, "q")));
        let (companion, _handles) = start(player.clone());
        let mut rx = companion.subscribe();
        tokio::task::yield_now().await;

        companion
            .send(Topic::RequestSeek, Bytes::from_static(b"SEEK_TO:6"))
            .unwrap();
        companion
            .send(Topic::PlaybackCommand, Bytes::from_static(b"NEXT"))
            .unwrap();

        loop {
            let envelope = next_on(&mut rx, Topic::CurrentState).await;
            let state = wire::decode_state(&envelope.payload).unwrap();
            if state.current_index == 7 {
                assert!(state.is_playing);
                break;
            }
        }
        assert_eq!(player.state().current_index, 7);
    }

    #[tokio::test]
    async fn test_queue_request_is_answered() {
        let player = Arc::new(MemoryPlayer::new(sample_tracks(10, "q")));
        let (companion, _handles) = start(player.clone());
        let mut rx = companion.subscribe();
        tokio::task::yield_now().await;

        companion
            .send(Topic::RequestQueue, Bytes::from_static(b"2,3,4"))
            .unwrap();

        let envelope = next_on(&mut rx, Topic::QueueResponse).await;
        let response = wire::decode_response(&envelope.payload).unwrap();
        assert_eq!(response.tracks.keys().copied().collect::<Vec<_>>(), vec![2, 3, 4]);
        assert_eq!(response.queue_hash, player.state().queue_hash);
    }

    #[tokio::test]
    async fn test_malformed_and_out_of_range_requests_are_dropped() {
        let player = Arc::new(MemoryPlayer::new(sample_tracks(3, "q")));
        let (companion, _handles) = start(player.clone());
        let mut rx = companion.subscribe();
        tokio::task::yield_now().await;

        companion
            .send(Topic::RequestQueue, Bytes::from_static(b"1,99"))
            .unwrap();
        companion
            .send(Topic::PlaybackCommand, Bytes::from_static(b"SHUFFLE"))
            .unwrap();
        companion
            .send(Topic::RequestSeek, Bytes::from_static(b"SEEK_TO:50"))
            .unwrap();
        companion
            .send(Topic::PlaybackCommand, Bytes::from_static(b"REQUEST_STATE"))
            .unwrap();

        // only state snapshots come back
        let envelope = rx.recv().await.unwrap();
        assert_eq!(envelope.topic, Topic::CurrentState);
        assert_eq!(player.state().current_index, 0);
        tokio::time::sleep(Duration::from_millis(100)).await;
        while let Ok(extra) = rx.try_recv() {
            assert_ne!(extra.topic, Topic::QueueResponse);
        }
    }
}
