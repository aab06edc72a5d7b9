use std::sync::Arc;
use tokio::{
    sync::{broadcast::error::RecvError, watch},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use super::cache::WindowedCache;
use super::commands::CommandDispatcher;
use crate::error::SyncError;
use crate::protocol::{wire, CurrentState, Topic};
use crate::transport::{Envelope, Transport};

/// Companion endpoint: feeds host messages into the [`WindowedCache`].
pub struct CompanionService {
    cache: Arc<WindowedCache>,
    dispatcher: CommandDispatcher,
    transport: Arc<dyn Transport>,
}

impl CompanionService {
    pub fn new(cache: Arc<WindowedCache>, dispatcher: CommandDispatcher, transport: Arc<dyn Transport>) -> Self {
        Self {
            cache,
            dispatcher,
            transport,
        }
    }

    /// Starts the receive loop and the state worker, then pulls the host state.
    ///
    /// States go through a watch channel to a single worker, so a burst
    /// while the cache waits for a response collapses into the latest one
    /// and the receive loop keeps merging responses meanwhile.
    pub fn spawn(self) -> Vec<JoinHandle<()>> {
        let (state_tx, state_rx) = watch::channel(None);
        let worker = tokio::spawn(ingest_states(self.cache.clone(), state_rx));

        let mut inbound = self.transport.subscribe();
        self.dispatcher.request_state();

        let receiver = tokio::spawn(async move {
            info!("⌚ Companion listening for host updates");
            loop {
                match inbound.recv().await {
                    Ok(envelope) => self.handle(envelope, &state_tx).await,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("⚠️ Companion lagged behind, {} messages skipped", skipped);
                        self.dispatcher.request_state();
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            debug!("Companion receive loop finished");
        });

        vec![worker, receiver]
    }

    async fn handle(&self, envelope: Envelope, state_tx: &watch::Sender<Option<CurrentState>>) {
        match envelope.topic {
            Topic::CurrentState => match wire::decode_state(&envelope.payload) {
                Ok(state) => {
                    state_tx.send_replace(Some(state));
                }
                Err(e) => warn!("🚫 Discarding host state: {}", e),
            },
            Topic::QueueResponse => {
                let response = match wire::decode_response(&envelope.payload) {
                    Ok(response) => response,
                    Err(e) => {
                        warn!("🚫 Discarding queue response: {}", e);
                        return;
                    }
                };
                match self.cache.merge_response(response).await {
                    Ok(merged) => debug!("Merged response with {} tracks", merged),
                    Err(e @ SyncError::StaleGeneration { .. }) => debug!("🗑️ {}", e),
                    Err(e) => warn!("⚠️ Queue response rejected: {}", e),
                }
            }
            other => debug!("Ignoring `{}` sent to the companion", other),
        }
    }
}

async fn ingest_states(cache: Arc<WindowedCache>, mut states: watch::Receiver<Option<CurrentState>>) {
    while states.changed().await.is_ok() {
        let latest = *states.borrow_and_update();
        let Some(state) = latest else {
            continue;
        };
        if let Err(e) = cache.ingest_state(state).await {
            warn!("🚫 Host state rejected: {}", e);
        }
    }
    debug!("State source closed, ingest worker stopping");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::companion::artwork::RawDecoder;
    use crate::companion::cache::CachePhase;
    use crate::config::SyncConfig;
    use crate::protocol::{Command, PlaybackCommand, QueueRangeResponse, TrackDescriptor};
    use crate::transport::LocalLink;
    use bytes::Bytes;
    use std::time::Duration;

    const HASH: i64 = 77;

    #[tokio::test(start_paused = true)]
    async fn test_companion_pulls_state_and_follows_host_messages() {
        let (host, companion) = LocalLink::pair(1 << 20, 0.0);
        let mut from_companion = host.subscribe();
        let transport: Arc<dyn Transport> = Arc::new(companion);
        let dispatcher = CommandDispatcher::new(transport.clone());
        let cache = Arc::new(WindowedCache::new(
            SyncConfig::default(),
            dispatcher.clone(),
            Arc::new(RawDecoder),
        ));
        let _handles = CompanionService::new(cache.clone(), dispatcher, transport).spawn();

        let pull = from_companion.recv().await.unwrap();
        assert_eq!(
            wire::decode_command(pull.topic, &pull.payload).unwrap(),
            Command::Playback(PlaybackCommand::RequestState)
        );

        let state = CurrentState::new(HASH, 20, 2, true);
        host.send(Topic::CurrentState, wire::encode_state(&state).unwrap())
            .unwrap();

        let request = from_companion.recv().await.unwrap();
        let Command::RequestQueue(indices) = wire::decode_command(request.topic, &request.payload).unwrap() else {
            panic!("expected a queue request");
        };
        assert_eq!(indices, (0..7).collect::<Vec<_>>());

        let mut response = QueueRangeResponse::new(HASH);
        for index in indices {
            response
                .tracks
                .insert(index, TrackDescriptor::new(format!("Song {}", index), "A", "B", ""));
        }
        host.send(Topic::QueueResponse, wire::encode_response(&response).unwrap())
            .unwrap();

        // garbage is dropped without stopping the loop
        host.send(Topic::QueueResponse, Bytes::from_static(b"{not json"))
            .unwrap();

        let mut views = cache.subscribe();
        tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                let ready = {
                    let view = views.borrow_and_update();
                    view.phase == CachePhase::Ready && view.state == Some(state)
                };
                if ready {
                    break;
                }
                views.changed().await.unwrap();
            }
        })
        .await
        .unwrap();

        assert_eq!(cache.displayed_indices(), (0..7).collect::<Vec<_>>());
        assert_eq!(cache.view().loading(), 0);
    }
}
