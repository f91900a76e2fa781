//! This module aggregates various utility submodules used throughout the application.

/// Splitting long replies and formatting subprocess output for chat.
pub mod messages;
/// Failure reporting into a text channel.
pub mod reporter;
/// URL checks for user-supplied links.
pub mod urls;
