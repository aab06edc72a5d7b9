use bytes::Bytes;
use pretty_assertions::assert_eq;
use std::{sync::Arc, time::Duration};
use tokio::task::JoinHandle;

use queue_mirror::cache::ArtworkCache;
use queue_mirror::companion::{CommandDispatcher, CompanionService, QueueView, RawDecoder, WindowedCache};
use queue_mirror::host::{
    HostPlayer, HostService, HostTrack, MemoryPlayer, PassthroughResizer, RangeResponder, StatePublisher,
};
use queue_mirror::{LocalLink, SyncConfig, TrackDescriptor, Transport};

struct Harness {
    player: Arc<MemoryPlayer>,
    cache: Arc<WindowedCache>,
    dispatcher: CommandDispatcher,
    handles: Vec<JoinHandle<()>>,
}

impl Drop for Harness {
    fn drop(&mut self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}

fn tracks(prefix: &str, count: usize, cover_size: usize) -> Vec<HostTrack> {
    (0..count)
        .map(|index| {
            let album = index / 4;
            let descriptor = TrackDescriptor::new(
                format!("{} song {}", prefix, index),
                "Artist",
                format!("{} album {}", prefix, album),
                format!("test://{}/{}", prefix, album),
            );
            HostTrack::new(format!("{}-{}", prefix, index), descriptor)
                .with_artwork(Bytes::from(vec![album as u8 + 1; cover_size]))
        })
        .collect()
}

fn start(queue: Vec<HostTrack>, max_payload: usize) -> Harness {
    let config = SyncConfig {
        debounce: Duration::from_millis(20),
        response_timeout: Duration::from_millis(500),
        ..SyncConfig::default()
    };
    let (host_link, companion_link) = LocalLink::pair(max_payload, 0.0);
    let host_link: Arc<dyn Transport> = Arc::new(host_link);
    let companion_link: Arc<dyn Transport> = Arc::new(companion_link);

    let player = Arc::new(MemoryPlayer::new(queue));
    let responder = Arc::new(RangeResponder::new(
        player.clone(),
        player.clone(),
        Arc::new(PassthroughResizer),
        ArtworkCache::from_config(&config),
        host_link.clone(),
        config.artwork_max_dimension,
    ));
    let publisher = Arc::new(StatePublisher::new(host_link.clone(), config.debounce));
    let mut handles = HostService::new(player.clone(), publisher, responder, host_link).spawn();

    let dispatcher = CommandDispatcher::new(companion_link.clone());
    let cache = Arc::new(WindowedCache::new(config, dispatcher.clone(), Arc::new(RawDecoder)));
    handles.extend(CompanionService::new(cache.clone(), dispatcher.clone(), companion_link).spawn());

    Harness {
        player,
        cache,
        dispatcher,
        handles,
    }
}

async fn wait_for(cache: &WindowedCache, done: impl Fn(&QueueView) -> bool) -> QueueView {
    let mut views = cache.subscribe();
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let view = views.borrow_and_update().clone();
            if done(&view) {
                return view;
            }
            views.changed().await.unwrap();
        }
    })
    .await
    .unwrap_or_else(|_| panic!("companion never settled, last view: {:?}", cache.view()))
}

fn settled_on(player: &MemoryPlayer) -> impl Fn(&QueueView) -> bool + '_ {
    move |view| view.state == Some(player.state()) && view.loading() == 0 && !view.window.is_empty()
}

#[tokio::test]
async fn test_companion_mirrors_the_page_around_the_current_track() {
    let harness = start(tracks("a", 30, 64), 1 << 20);

    let view = wait_for(&harness.cache, settled_on(&harness.player)).await;

    assert_eq!(view.indices(), (0..7).collect::<Vec<_>>());
    let current = view.current_entry().unwrap();
    assert_eq!(current.track.as_ref().unwrap().title, "a song 0");
    assert_eq!(current.artwork.as_ref().unwrap().data.len(), 64);
}

#[tokio::test]
async fn test_companion_commands_drive_the_host_and_the_window_follows() {
    let harness = start(tracks("a", 30, 64), 1 << 20);
    wait_for(&harness.cache, settled_on(&harness.player)).await;

    harness.dispatcher.next();
    harness.dispatcher.next();
    let view = wait_for(&harness.cache, |view| {
        view.state.is_some_and(|state| state.current_index == 2)
    })
    .await;
    assert_eq!(view.indices(), (0..7).collect::<Vec<_>>());

    harness.dispatcher.seek_to(20);
    let view = wait_for(&harness.cache, |view| {
        view.state.is_some_and(|state| state.current_index == 20)
            && view.loading() == 0
            && view.current_entry().is_some()
    })
    .await;

    assert_eq!(harness.player.state().current_index, 20);
    assert_eq!(
        view.current_entry().unwrap().track.as_ref().unwrap().title,
        "a song 20"
    );
    // earlier tracks stay cached while the window moved
    assert!(harness.cache.track(0).is_some());
}

#[tokio::test]
async fn test_queue_replacement_reloads_the_companion() {
    let harness = start(tracks("a", 30, 64), 1 << 20);
    wait_for(&harness.cache, settled_on(&harness.player)).await;

    harness.player.replace_queue(tracks("b", 12, 64), 5);
    let view = wait_for(&harness.cache, settled_on(&harness.player)).await;

    assert_eq!(view.indices(), (2..9).collect::<Vec<_>>());
    for entry in &view.window {
        assert!(entry.track.as_ref().unwrap().title.starts_with("b song"));
    }
    assert!(harness
        .cache
        .artwork_refs()
        .iter()
        .all(|artwork_ref| artwork_ref.starts_with("test://b/")));
}

#[tokio::test]
async fn test_oversized_artwork_is_left_behind() {
    let harness = start(tracks("a", 30, 3000), 2048);

    let view = wait_for(&harness.cache, settled_on(&harness.player)).await;

    assert_eq!(view.indices(), (0..7).collect::<Vec<_>>());
    assert!(view.window.iter().all(|entry| entry.artwork.is_none()));
}
