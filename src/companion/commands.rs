use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::TransportError;
use crate::protocol::{wire, Command, PlaybackCommand};
use crate::transport::Transport;

/// Translates user intents into host messages. Fire and forget.
#[derive(Clone)]
pub struct CommandDispatcher {
    transport: Arc<dyn Transport>,
}

impl CommandDispatcher {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Sends `command` and reports the transport outcome.
    pub fn try_dispatch(&self, command: &Command) -> Result<(), TransportError> {
        let payload = wire::encode_command(command);
        self.transport.send(command.topic(), payload)?;
        debug!("📤 Sent {:?} on `{}`", command, command.topic());
        Ok(())
    }

    /// Sends `command`; failures are logged and otherwise ignored.
    pub fn dispatch(&self, command: Command) {
        if let Err(e) = self.try_dispatch(&command) {
            warn!("⚠️ Command {:?} dropped: {}", command, e);
        }
    }

    pub fn next(&self) {
        self.dispatch(Command::Playback(PlaybackCommand::Next));
    }

    pub fn previous(&self) {
        self.dispatch(Command::Playback(PlaybackCommand::Previous));
    }

    pub fn play_pause(&self) {
        self.dispatch(Command::Playback(PlaybackCommand::PlayPause));
    }

    pub fn seek_to(&self, index: usize) {
        self.dispatch(Command::SeekTo(index));
    }

    /// Asks the host to publish its state right away.
    pub fn request_state(&self) {
        self.dispatch(Command::Playback(PlaybackCommand::RequestState));
    }

    pub fn request_queue(&self, indices: &[usize]) -> Result<(), TransportError> {
        self.try_dispatch(&Command::RequestQueue(indices.to_vec()))
    }
}
