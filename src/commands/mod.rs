//! This module aggregates all the command modules for the bot.

use crate::{Data, Error};

/// Bot upkeep: self-update, script sandbox, avatars.
pub mod admin;
/// Bulk message and channel tools (create, nuke, deletebot).
pub mod channels;
/// File, media and npm package downloads.
pub mod downloads;
/// General purpose commands (e.g., help, roll).
pub mod general;
/// Direct messages and webhook posts.
pub mod messaging;
/// Member moderation (kick, ban, timeouts, roles).
pub mod moderation;
/// Plugin lifecycle commands.
pub mod plugins;
/// The bot's own status and activity.
pub mod presence;
/// Voice channel playback and phone calls.
pub mod voice;

/// Every command the bot registers, prefix and slash alike.
pub fn all() -> Vec<poise::Command<Data, Error>> {
    vec![
        // General
        general::help(),
        general::register(),
        general::test(),
        general::roll(),
        admin::avatar(),
        // Moderation
        moderation::kick(),
        moderation::ban(),
        moderation::timeout(),
        moderation::untimeout(),
        moderation::mutevoice(),
        moderation::unmutevoice(),
        moderation::role(),
        moderation::rank(),
        moderation::say(),
        moderation::alert(),
        // Channels
        channels::create(),
        channels::createchannels(),
        channels::nuke(),
        channels::nukeflood(),
        channels::nukeclean(),
        channels::deletebot(),
        // Messaging
        messaging::sendmessage(),
        messaging::messagecall(),
        messaging::fakemessage(),
        messaging::fakemessage_slash(),
        // Voice
        voice::call(),
        voice::callvoice(),
        voice::playsound(),
        voice::listsounds(),
        voice::ytplay(),
        voice::enqueue(),
        voice::queue(),
        voice::livestream(),
        voice::playvideo(),
        voice::listvideos(),
        voice::stop(),
        voice::phone(),
        // Plugins
        plugins::plugin(),
        // Presence
        presence::control(),
        // Downloads
        downloads::download(),
        downloads::downloadvideo(),
        downloads::downloadsound(),
        downloads::npmdownload(),
        // Diagnostics
        admin::update(),
        admin::eval(),
        admin::setavatar(),
    ]
}
