//! Session provider seam.
//!
//! The relay never talks to the network directly. It asks a
//! [`SessionProvider`] for a fresh [`DeviceSession`] per tool call and closes
//! it before returning. The production provider is
//! [`SshProvider`](crate::ssh::SshProvider); tests use [`mock::MockProvider`].

use async_trait::async_trait;

use crate::devices::DeviceRecord;
use crate::error::{SendFailure, SessionError};

/// Opens authenticated CLI sessions to devices.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    async fn open(
        &self,
        name: &str,
        record: &DeviceRecord,
    ) -> Result<Box<dyn DeviceSession>, SessionError>;
}

/// A live CLI session owned by a single tool call.
#[async_trait]
pub trait DeviceSession: Send {
    /// Run one exec-mode command and return its output.
    async fn send_exec(&mut self, command: &str) -> Result<String, SendFailure>;

    /// Enter config mode, send `commands` in order, leave config mode.
    async fn send_config(&mut self, commands: &[String]) -> Result<String, SendFailure>;

    /// Persist the running configuration.
    async fn save(&mut self) -> Result<String, SendFailure>;

    async fn close(&mut self) -> Result<(), SessionError>;
}
