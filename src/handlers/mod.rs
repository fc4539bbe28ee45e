// Handlers - Multi-step control operations kept off the audio thread

pub mod mixer_handler;
pub mod rec_manager;

use thiserror::Error;

use crate::model::channel::ChannelId;

pub use mixer_handler::MixerHandler;
pub use rec_manager::RecManager;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HandlerError {
    #[error("unknown channel {0}")]
    UnknownChannel(ChannelId),

    #[error("channel {0} is not a sample channel")]
    NotASampleChannel(ChannelId),

    #[error("no armed channel to record into")]
    NothingToRecord,
}
