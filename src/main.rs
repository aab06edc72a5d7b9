use anyhow::Result;
use bytes::Bytes;
use image::{ImageFormat, Rgb, RgbImage};
use std::{io::Cursor, sync::Arc, time::Duration};
use tracing::{debug, info, warn};

use queue_mirror::cache::ArtworkCache;
use queue_mirror::companion::{
    CachePhase, CommandDispatcher, CompanionService, ImageDecoder, QueueView, WindowedCache,
};
use queue_mirror::host::{
    HostPlayer, HostService, HostTrack, JpegResizer, MemoryPlayer, RangeResponder, StatePublisher,
};
use queue_mirror::{LocalLink, SyncConfig, TrackDescriptor, Transport};

/// Share of messages the demo link drops.
const DEMO_LOSS: f64 = 0.05;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("queue_mirror=debug".parse()?),
        )
        .init();

    info!("🎵 Starting queue-mirror demo v{}", env!("CARGO_PKG_VERSION"));

    let config = SyncConfig::load()?;
    info!("{}", config.summary());

    let (host_link, companion_link) = LocalLink::pair(config.max_payload_bytes, DEMO_LOSS);
    let host_link: Arc<dyn Transport> = Arc::new(host_link);
    let companion_link: Arc<dyn Transport> = Arc::new(companion_link);

    // Host side
    let player = Arc::new(MemoryPlayer::new(demo_tracks("morning", 60)?));
    player.set_playing(true);
    let artwork_cache = ArtworkCache::from_config(&config);
    let responder = Arc::new(RangeResponder::new(
        player.clone(),
        player.clone(),
        Arc::new(JpegResizer::new(config.artwork_quality)),
        artwork_cache.clone(),
        host_link.clone(),
        config.artwork_max_dimension,
    ));
    let publisher = Arc::new(StatePublisher::new(host_link.clone(), config.debounce));
    let mut handles = HostService::new(player.clone(), publisher, responder, host_link).spawn();

    let cleanup_cache = artwork_cache.clone();
    handles.push(tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            cleanup_cache.cleanup_old_entries();
        }
    }));

    // Companion side
    let dispatcher = CommandDispatcher::new(companion_link.clone());
    let cache = Arc::new(WindowedCache::new(
        config.clone(),
        dispatcher.clone(),
        Arc::new(ImageDecoder),
    ));
    handles.extend(CompanionService::new(cache.clone(), dispatcher.clone(), companion_link).spawn());

    let pause = config.debounce * 2;

    info!("▶️ Initial sync");
    settle(&cache, player.as_ref(), pause).await;

    info!("⏭️ Skipping forward twice");
    dispatcher.next();
    dispatcher.next();
    settle(&cache, player.as_ref(), pause).await;

    info!("🎯 Seeking far away");
    dispatcher.seek_to(40);
    settle(&cache, player.as_ref(), pause).await;

    info!("📜 Scrolling past the end of the window");
    cache.on_scroll(queue_mirror::companion::Edge::Trailing);
    settle(&cache, player.as_ref(), pause).await;

    info!("📋 Replacing the host queue");
    player.replace_queue(demo_tracks("evening", 25)?, 3);
    settle(&cache, player.as_ref(), pause).await;

    info!("⏯️ Pausing");
    dispatcher.play_pause();
    settle(&cache, player.as_ref(), pause).await;

    let metrics = artwork_cache.metrics();
    info!(
        "🖼️ Artwork cache: {} entries, hit rate {:.1}%, {} evictions",
        artwork_cache.len(),
        metrics.hit_rate() * 100.0,
        metrics.evictions
    );

    for handle in handles {
        handle.abort();
    }
    info!("👋 Demo finished");
    Ok(())
}

/// Waits until the companion shows the host state with every row loaded.
async fn settle(cache: &WindowedCache, player: &MemoryPlayer, pause: Duration) {
    tokio::time::sleep(pause).await;

    let mut views = cache.subscribe();
    let settled = tokio::time::timeout(Duration::from_secs(8), async {
        loop {
            let done = {
                let view = views.borrow_and_update();
                view.phase == CachePhase::Ready
                    && view.state == Some(player.state())
                    && view.loading() == 0
            };
            if done || views.changed().await.is_err() {
                return;
            }
        }
    })
    .await;

    if settled.is_err() {
        warn!("⏱️ Companion did not settle, showing what it has");
    }
    log_view(&cache.view());
}

fn log_view(view: &QueueView) {
    let Some(state) = view.state else {
        info!("📺 Companion view: no state yet ({:?})", view.phase);
        return;
    };
    info!(
        "📺 Companion view: track {}/{} ({}), window {:?}, {} loading",
        state.current_index + 1,
        state.queue_size,
        if state.is_playing { "playing" } else { "paused" },
        view.indices(),
        view.loading()
    );
    for entry in &view.window {
        let marker = if entry.index == state.current_index { "▶" } else { " " };
        match &entry.track {
            Some(track) => debug!(
                "{} {:>3} {} - {} [{}]",
                marker,
                entry.index,
                track.artist,
                track.title,
                entry
                    .artwork
                    .as_ref()
                    .map(|art| format!("{}x{}", art.width, art.height))
                    .unwrap_or_else(|| "no art".to_string())
            ),
            None => debug!("{} {:>3} …", marker, entry.index),
        }
    }
}

/// Builds a queue whose albums of four tracks share one cover.
fn demo_tracks(prefix: &str, count: usize) -> Result<Vec<HostTrack>> {
    let mut tracks = Vec::with_capacity(count);
    let mut cover = Bytes::new();

    for index in 0..count {
        let album = index / 4;
        if index % 4 == 0 {
            cover = album_cover(album)?;
        }
        let descriptor = TrackDescriptor::new(
            format!("{} song {}", prefix, index + 1),
            format!("Artist {}", album % 7),
            format!("{} album {}", prefix, album),
            format!("demo://{}/{}", prefix, album),
        );
        tracks.push(HostTrack::new(format!("{}-{}", prefix, index), descriptor).with_artwork(cover.clone()));
    }

    Ok(tracks)
}

fn album_cover(album: usize) -> Result<Bytes> {
    let shade = (album * 37 % 256) as u8;
    let image = RgbImage::from_fn(800, 800, |x, y| Rgb([shade, (x % 256) as u8, (y % 256) as u8]));
    let mut out = Cursor::new(Vec::new());
    image.write_to(&mut out, ImageFormat::Png)?;
    Ok(Bytes::from(out.into_inner()))
}
