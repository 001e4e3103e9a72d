//! Status delivery channel implementations.

pub mod webhook;

use async_trait::async_trait;

use crate::error::ChannelError;
use crate::events::StatusUpdate;

/// Trait for status delivery channels.
#[async_trait]
pub trait NotifyChannel: Send + Sync {
    /// Get the name of this channel.
    fn name(&self) -> &'static str;

    /// Check if this channel is enabled/configured.
    fn enabled(&self) -> bool;

    /// Deliver a status update through this channel.
    async fn send(&self, update: &StatusUpdate) -> Result<(), ChannelError>;
}
