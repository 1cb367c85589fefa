//! The device command relay.
//!
//! [`Relay`] owns the immutable [`Inventory`] and a [`SessionProvider`]. Each
//! operation opens its own session, does its work, and closes the session
//! before returning, whatever the outcome. Nothing is cached between calls,
//! so concurrent calls (even against the same device) never share a session.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::SavePolicy;
use crate::devices::Inventory;
use crate::error::{RelayError, SendFailure, SessionError};
use crate::session::{DeviceSession, SessionProvider};

#[derive(Debug, Serialize)]
pub struct DeviceList {
    pub devices: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct CommandResult {
    pub device: String,
    pub command: String,
    pub output: String,
}

#[derive(Debug, Serialize)]
pub struct ConfigResult {
    pub device: String,
    pub commands: Vec<String>,
    pub output: String,
    /// Echo of the `save` input: the save was attempted, not confirmed.
    pub saved: bool,
}

pub struct Relay {
    inventory: Arc<Inventory>,
    provider: Arc<dyn SessionProvider>,
    save_policy: SavePolicy,
}

impl Relay {
    pub fn new(
        inventory: Arc<Inventory>,
        provider: Arc<dyn SessionProvider>,
        save_policy: SavePolicy,
    ) -> Self {
        Self {
            inventory,
            provider,
            save_policy,
        }
    }

    /// Names of all configured devices. Credentials are never included.
    pub fn list_devices(&self) -> DeviceList {
        DeviceList {
            devices: self.inventory.names(),
        }
    }

    /// Run one exec-mode command on `device`.
    pub async fn run_command(
        &self,
        command: &str,
        device: &str,
    ) -> Result<CommandResult, RelayError> {
        info!(device, command, "run_command");
        let mut session = self.open_session(device).await?;
        let sent = session.send_exec(command).await;
        let closed = session.close().await;
        let output = finish(device, sent, closed)?;

        Ok(CommandResult {
            device: device.to_string(),
            command: command.to_string(),
            output,
        })
    }

    /// Apply `commands` in config mode on `device`, optionally saving afterwards.
    pub async fn run_config(
        &self,
        commands: &[String],
        device: &str,
        save: bool,
    ) -> Result<ConfigResult, RelayError> {
        info!(device, count = commands.len(), save, "run_config");
        let mut session = self.open_session(device).await?;
        let applied = self.apply_config(session.as_mut(), commands, save).await;
        let closed = session.close().await;
        let output = finish(device, applied, closed)?;

        Ok(ConfigResult {
            device: device.to_string(),
            commands: commands.to_vec(),
            output,
            saved: save,
        })
    }

    /// Look up `device` and open a fresh session to it.
    async fn open_session(&self, device: &str) -> Result<Box<dyn DeviceSession>, RelayError> {
        let record = self
            .inventory
            .get(device)
            .ok_or_else(|| RelayError::DeviceNotFound {
                device: device.to_string(),
            })?;

        debug!(device, host = %record.host, port = record.port, "opening session");
        self.provider
            .open(device, record)
            .await
            .map_err(|source| RelayError::Connection {
                device: device.to_string(),
                source,
            })
    }

    async fn apply_config(
        &self,
        session: &mut dyn DeviceSession,
        commands: &[String],
        save: bool,
    ) -> Result<String, SendFailure> {
        let mut output = match session.send_config(commands).await {
            Ok(output) => output,
            Err(mut failure) => {
                if save && self.save_policy == SavePolicy::Always {
                    warn!("config push failed, saving anyway (save policy: always)");
                    let saved = match session.save().await {
                        Ok(saved) => saved,
                        Err(save_failure) => save_failure.partial_output,
                    };
                    append_line(&mut failure.partial_output, &saved);
                }
                return Err(failure);
            }
        };

        if save {
            match session.save().await {
                Ok(saved) => append_line(&mut output, &saved),
                Err(mut failure) => {
                    append_line(&mut output, &failure.partial_output);
                    failure.partial_output = output;
                    return Err(failure);
                }
            }
        }
        Ok(output)
    }
}

fn append_line(output: &mut String, more: &str) {
    output.push('\n');
    output.push_str(more);
}

/// Combine the outcome of the work with the outcome of closing the session.
///
/// A send failure wins over a close failure. A close failure after a
/// successful send still fails the call, with the output kept as partial.
fn finish(
    device: &str,
    sent: Result<String, SendFailure>,
    closed: Result<(), SessionError>,
) -> Result<String, RelayError> {
    match (sent, closed) {
        (Ok(output), Ok(())) => Ok(output),
        (Ok(output), Err(cause)) => Err(RelayError::execution(
            device,
            SendFailure::new(cause, output),
        )),
        (Err(failure), closed) => {
            if let Err(e) = closed {
                warn!(device, error = %e, "failed to close session after send failure");
            }
            Err(RelayError::execution(device, failure))
        }
    }
}
