//! Per-source preprocessors and processors (component G/I).

pub mod discord;
pub mod google_chat;
pub mod google_photos;
pub mod google_voice;
pub mod imessage_imazing;
pub mod instagram_messages;
pub mod instagram_public_media;
pub mod snapchat_memories;
pub mod snapchat_messages;

use crate::config::RunConfig;
use crate::error::AppResult;
use std::path::Path;

/// Common shape shared by every preprocessor: validate, then produce
/// `media/` + `metadata.json` (+ optional triage trees) under `output_dir`.
pub trait Preprocessor {
    fn run(&self, input_dir: &Path, output_dir: &Path, config: &RunConfig) -> AppResult<()>;
}

/// Registers every built-in processor with `registry`.
pub fn register_all(registry: &mut crate::registry::Registry) {
    registry.register(Box::new(google_photos::GooglePhotosProcessor));
    registry.register(Box::new(google_chat::GoogleChatProcessor));
    registry.register(Box::new(google_voice::GoogleVoiceProcessor));
    registry.register(Box::new(snapchat_messages::SnapchatMessagesProcessor));
    registry.register(Box::new(snapchat_memories::SnapchatMemoriesProcessor));
    registry.register(Box::new(instagram_messages::InstagramMessagesProcessor));
    registry.register(Box::new(instagram_public_media::InstagramPublicMediaProcessor));
    registry.register(Box::new(discord::DiscordProcessor));
    registry.register(Box::new(imessage_imazing::IMessageImazingProcessor));
}
