//! SSH session provider.
//!
//! Each session is an interactive shell on a PTY, driven the way a human
//! would drive the device CLI: wait for the prompt, send a line, read until
//! the prompt comes back. Exec output has the echoed command and the trailing
//! prompt stripped; config output is returned raw, prompts included. A config
//! push fails if config mode is refused or a line is rejected by the device
//! (per-dialect error markers such as `% Invalid input`).
//!
//! Every network step is bounded by the configured timeout. A timeout while
//! opening surfaces as a connection failure; a timeout while waiting for
//! output surfaces as a [`SendFailure`] carrying whatever had been read.
//!
//! The prompt logic lives in [`Shell`], which reads from any [`ShellIo`]; the
//! russh channel is one such source.
//!
//! Server host keys are accepted without verification (the fingerprint is
//! logged at debug level).

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client;
use russh::{ChannelMsg, Disconnect};
use russh_keys::key::PublicKey;
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::devices::DeviceRecord;
use crate::dialect::{self, Dialect};
use crate::error::{SendFailure, SessionError};
use crate::session::{DeviceSession, SessionProvider};

/// Newline probes sent after login before giving up on a stable prompt.
const PROMPT_ATTEMPTS: usize = 4;

/// Wide enough that devices do not wrap long lines.
const TERMINAL_COLS: u32 = 511;
const TERMINAL_ROWS: u32 = 24;

/// Opens password-authenticated SSH shell sessions.
pub struct SshProvider {
    timeout: Duration,
}

impl SshProvider {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl SessionProvider for SshProvider {
    async fn open(
        &self,
        name: &str,
        record: &DeviceRecord,
    ) -> Result<Box<dyn DeviceSession>, SessionError> {
        let dialect = dialect::lookup(&record.device_type)
            .ok_or_else(|| SessionError::UnsupportedDeviceType(record.device_type.clone()))?;
        let session = SshSession::connect(name, record, dialect, self.timeout).await?;
        Ok(Box::new(session))
    }
}

struct ClientHandler {
    host: String,
}

#[async_trait]
impl client::Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        debug!(
            host = %self.host,
            fingerprint = %server_public_key.fingerprint(),
            "accepting server host key"
        );
        Ok(true)
    }
}

/// Await `fut`, failing with [`SessionError::Timeout`] after `after`.
async fn bounded<T, E>(
    after: Duration,
    stage: &'static str,
    fut: impl Future<Output = Result<T, E>>,
) -> Result<T, SessionError>
where
    E: Into<SessionError>,
{
    match tokio::time::timeout(after, fut).await {
        Ok(result) => result.map_err(Into::into),
        Err(_) => Err(SessionError::Timeout { after, stage }),
    }
}

/// Byte transport under an interactive shell.
#[async_trait]
trait ShellIo: Send {
    async fn send_bytes(&mut self, data: &[u8]) -> Result<(), SessionError>;

    /// Next chunk of terminal output, `None` once the channel has closed.
    async fn recv_chunk(&mut self) -> Option<Vec<u8>>;
}

#[async_trait]
impl ShellIo for russh::Channel<client::Msg> {
    async fn send_bytes(&mut self, data: &[u8]) -> Result<(), SessionError> {
        self.data(data).await.map_err(SessionError::from)
    }

    async fn recv_chunk(&mut self) -> Option<Vec<u8>> {
        loop {
            match self.wait().await {
                Some(ChannelMsg::Data { data }) => return Some(data.to_vec()),
                Some(ChannelMsg::Eof | ChannelMsg::Close) | None => return None,
                Some(_) => {}
            }
        }
    }
}

/// Prompt-driven line protocol over a [`ShellIo`].
struct Shell<C> {
    io: C,
    dialect: &'static Dialect,
    timeout: Duration,
    base_prompt: String,
}

impl<C: ShellIo> Shell<C> {
    fn new(io: C, dialect: &'static Dialect, timeout: Duration) -> Self {
        Self {
            io,
            dialect,
            timeout,
            base_prompt: String::new(),
        }
    }

    /// Learn the base prompt, then turn paging off.
    async fn start(&mut self) -> Result<(), SessionError> {
        self.find_prompt().await?;
        if let Some(disable_paging) = self.dialect.disable_paging {
            self.send_line(disable_paging, "disable paging")
                .await
                .map_err(|failure| failure.cause)?;
        }
        Ok(())
    }

    /// Send bare newlines until the same prompt line comes back twice in a row.
    ///
    /// A login banner may end in `#` or `>` and arrive in its own packet, so
    /// the first prompt-like line is only a candidate.
    async fn find_prompt(&mut self) -> Result<(), SessionError> {
        let first = self
            .read_until_prompt("", "login prompt")
            .await
            .map_err(|failure| failure.cause)?;
        let mut candidate = dialect::last_line(&first).to_string();

        for _ in 0..PROMPT_ATTEMPTS {
            let echoed = self
                .send_line("", "login prompt")
                .await
                .map_err(|failure| failure.cause)?;
            let prompt = dialect::last_line(&echoed);
            if prompt == candidate {
                self.base_prompt = self.dialect.base_prompt(prompt).to_string();
                return Ok(());
            }
            candidate = prompt.to_string();
        }
        Err(SessionError::PromptNotFound)
    }

    /// Read until a prompt follows the echo of `echo`.
    ///
    /// Anything before the echo (a prompt left over from an earlier line) is
    /// kept in the returned text but never ends the read.
    async fn read_until_prompt(
        &mut self,
        echo: &str,
        stage: &'static str,
    ) -> Result<String, SendFailure> {
        let deadline = tokio::time::Instant::now() + self.timeout;
        let echo = echo.trim().as_bytes();
        let mut bytes: Vec<u8> = Vec::new();
        let mut after_echo = echo.is_empty().then_some(0);

        loop {
            let chunk = match tokio::time::timeout_at(deadline, self.io.recv_chunk()).await {
                Ok(Some(chunk)) => chunk,
                Ok(None) => {
                    return Err(SendFailure::new(SessionError::ChannelClosed, lossy(&bytes)));
                }
                Err(_) => {
                    let cause = SessionError::Timeout {
                        after: self.timeout,
                        stage,
                    };
                    return Err(SendFailure::new(cause, lossy(&bytes)));
                }
            };

            let scanned = bytes.len();
            bytes.extend_from_slice(&chunk);
            if after_echo.is_none() {
                let from = scanned.saturating_sub(echo.len());
                after_echo = find_bytes(&bytes[from..], echo).map(|at| from + at + echo.len());
            }
            if let Some(start) = after_echo {
                if self.at_prompt(&bytes[start..]) {
                    return Ok(String::from_utf8_lossy(&bytes).into_owned());
                }
            }
        }
    }

    /// Whether the last line of `bytes` is a prompt. Only that line is decoded.
    fn at_prompt(&self, bytes: &[u8]) -> bool {
        let line_start = bytes
            .iter()
            .rposition(|b| matches!(b, b'\n' | b'\r'))
            .map_or(0, |at| at + 1);
        let tail = String::from_utf8_lossy(&bytes[line_start..]);
        self.dialect.ends_with_prompt(&tail, &self.base_prompt)
    }

    /// Send one line and return everything up to and including the next prompt.
    async fn send_line(&mut self, line: &str, stage: &'static str) -> Result<String, SendFailure> {
        let payload = format!("{line}\n");
        self.io
            .send_bytes(payload.as_bytes())
            .await
            .map_err(|cause| SendFailure::new(cause, ""))?;
        self.read_until_prompt(line, stage).await
    }

    async fn exec(&mut self, command: &str) -> Result<String, SendFailure> {
        let raw = self.send_line(command, "command output").await?;
        Ok(dialect::clean_exec_output(&raw, command, &self.base_prompt))
    }

    /// Enter config mode, send `commands` in order, leave config mode.
    ///
    /// Stops at the first line the device rejects and leaves config mode
    /// before reporting it. Nothing is sent if config mode was refused.
    async fn configure(&mut self, commands: &[String]) -> Result<String, SendFailure> {
        let mut output = String::new();

        let entered = self
            .send_line(self.dialect.enter_config, "config mode")
            .await?;
        output.push_str(&dialect::normalize_newlines(&entered));
        if !self.dialect.in_config_mode(dialect::last_line(&entered)) {
            return Err(SendFailure::new(SessionError::ConfigModeRefused, output));
        }

        for command in commands {
            let chunk = match self.send_line(command, "config output").await {
                Ok(chunk) => chunk,
                Err(failure) => return Err(failure.preceded_by(output)),
            };
            output.push_str(&dialect::normalize_newlines(&chunk));
            if let Some(reason) = self.dialect.rejection(&chunk) {
                let cause = SessionError::ConfigRejected {
                    line: command.clone(),
                    reason: reason.to_string(),
                };
                self.leave_config(&mut output).await;
                return Err(SendFailure::new(cause, output));
            }
        }

        match self
            .send_line(self.dialect.exit_config, "config exit")
            .await
        {
            Ok(chunk) => output.push_str(&dialect::normalize_newlines(&chunk)),
            Err(failure) => return Err(failure.preceded_by(output)),
        }
        Ok(output)
    }

    async fn leave_config(&mut self, output: &mut String) {
        match self
            .send_line(self.dialect.exit_config, "config exit")
            .await
        {
            Ok(chunk) => output.push_str(&dialect::normalize_newlines(&chunk)),
            Err(failure) => {
                warn!(error = %failure, "could not leave config mode");
                output.push_str(&failure.partial_output);
            }
        }
    }
}

fn find_bytes(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn lossy(bytes: &[u8]) -> String {
    dialect::normalize_newlines(&String::from_utf8_lossy(bytes))
}

struct SshSession {
    device: String,
    handle: client::Handle<ClientHandler>,
    shell: Shell<russh::Channel<client::Msg>>,
    timeout: Duration,
}

impl SshSession {
    async fn connect(
        name: &str,
        record: &DeviceRecord,
        dialect: &'static Dialect,
        timeout: Duration,
    ) -> Result<Self, SessionError> {
        debug!(device = name, host = %record.host, port = record.port, "connecting");

        let stream = bounded(
            timeout,
            "tcp connect",
            TcpStream::connect((record.host.as_str(), record.port)),
        )
        .await?;

        let config = Arc::new(client::Config {
            inactivity_timeout: Some(timeout),
            ..Default::default()
        });
        let handler = ClientHandler {
            host: record.host.clone(),
        };
        let mut handle = bounded(
            timeout,
            "ssh handshake",
            client::connect_stream(config, stream, handler),
        )
        .await?;

        let authenticated = bounded(
            timeout,
            "authentication",
            handle.authenticate_password(record.username.clone(), record.password.clone()),
        )
        .await?;
        if !authenticated {
            return Err(SessionError::AuthRejected(record.username.clone()));
        }

        let channel = bounded(timeout, "channel open", handle.channel_open_session()).await?;
        bounded(
            timeout,
            "pty request",
            channel.request_pty(false, "vt100", TERMINAL_COLS, TERMINAL_ROWS, 0, 0, &[]),
        )
        .await?;
        bounded(timeout, "shell request", channel.request_shell(false)).await?;

        let mut shell = Shell::new(channel, dialect, timeout);
        shell.start().await?;
        debug!(device = name, prompt = %shell.base_prompt, "logged in");

        Ok(Self {
            device: name.to_string(),
            handle,
            shell,
            timeout,
        })
    }
}

#[async_trait]
impl DeviceSession for SshSession {
    async fn send_exec(&mut self, command: &str) -> Result<String, SendFailure> {
        debug!(device = %self.device, command, "exec");
        self.shell.exec(command).await
    }

    async fn send_config(&mut self, commands: &[String]) -> Result<String, SendFailure> {
        debug!(device = %self.device, count = commands.len(), "config");
        self.shell.configure(commands).await
    }

    async fn save(&mut self) -> Result<String, SendFailure> {
        let save = self.shell.dialect.save;
        debug!(device = %self.device, command = save, "save");
        self.shell.exec(save).await
    }

    async fn close(&mut self) -> Result<(), SessionError> {
        debug!(device = %self.device, "closing session");
        bounded(
            self.timeout,
            "disconnect",
            self.handle.disconnect(Disconnect::ByApplication, "", "en"),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;

    /// Plays back canned terminal output: one batch of chunks per line sent.
    struct ScriptedShell {
        sent: Vec<String>,
        replies: VecDeque<Vec<&'static str>>,
        pending: VecDeque<Vec<u8>>,
        /// Stall instead of closing once the script runs out.
        hang: bool,
    }

    impl ScriptedShell {
        fn new(login: &[&'static str], replies: Vec<Vec<&'static str>>) -> Self {
            Self {
                sent: Vec::new(),
                replies: replies.into(),
                pending: login.iter().map(|c| c.as_bytes().to_vec()).collect(),
                hang: true,
            }
        }
    }

    #[async_trait]
    impl ShellIo for ScriptedShell {
        async fn send_bytes(&mut self, data: &[u8]) -> Result<(), SessionError> {
            let line = String::from_utf8_lossy(data);
            self.sent.push(line.trim_end_matches('\n').to_string());
            if let Some(batch) = self.replies.pop_front() {
                self.pending
                    .extend(batch.into_iter().map(|c| c.as_bytes().to_vec()));
            }
            Ok(())
        }

        async fn recv_chunk(&mut self) -> Option<Vec<u8>> {
            if let Some(chunk) = self.pending.pop_front() {
                return Some(chunk);
            }
            if self.hang {
                std::future::pending::<()>().await;
            }
            None
        }
    }

    const TIMEOUT: Duration = Duration::from_millis(50);

    fn ios() -> &'static Dialect {
        dialect::lookup("cisco_ios").unwrap()
    }

    /// A shell already past login and paging, with `replies` for later lines.
    async fn logged_in(replies: Vec<Vec<&'static str>>) -> Shell<ScriptedShell> {
        let mut script = vec![vec!["\r\nr1#"], vec!["terminal length 0\r\nr1#"]];
        script.extend(replies);
        let mut shell = Shell::new(ScriptedShell::new(&["\r\nr1#"], script), ios(), TIMEOUT);
        shell.start().await.unwrap();
        shell
    }

    fn sent_after_login(shell: &Shell<ScriptedShell>) -> Vec<&str> {
        shell.io.sent[2..].iter().map(String::as_str).collect()
    }

    #[tokio::test]
    async fn login_learns_base_prompt_and_disables_paging() {
        let shell = logged_in(vec![]).await;
        assert_eq!(shell.base_prompt, "r1");
        assert_eq!(shell.io.sent, vec!["", "terminal length 0"]);
    }

    #[tokio::test]
    async fn banner_line_is_not_taken_as_prompt() {
        let io = ScriptedShell::new(
            &["\r\n# Authorized access only #", "\r\nr1#"],
            vec![
                vec!["\r\nr1#"],
                vec!["\r\nr1#"],
                vec!["terminal length 0\r\nr1#"],
                vec!["show clock\r\n10:02 UTC\r\nr1#"],
            ],
        );
        let mut shell = Shell::new(io, ios(), TIMEOUT);
        shell.start().await.unwrap();
        assert_eq!(shell.base_prompt, "r1");
        assert_eq!(shell.io.sent, vec!["", "", "terminal length 0"]);

        // the answer to the second probe arrived ahead of the paging echo
        assert_eq!(shell.exec("show clock").await.unwrap(), "10:02 UTC");
    }

    #[tokio::test]
    async fn login_without_stable_prompt_fails() {
        let io = ScriptedShell::new(
            &["a#"],
            vec![vec!["\r\nb#"], vec!["\r\nc#"], vec!["\r\nd#"], vec!["\r\ne#"]],
        );
        let mut shell = Shell::new(io, ios(), TIMEOUT);
        assert!(matches!(
            shell.start().await,
            Err(SessionError::PromptNotFound)
        ));
    }

    #[tokio::test]
    async fn prompt_split_across_chunks() {
        let mut shell = logged_in(vec![vec![
            "show ver",
            "sion\r\nCisco IOS 15.2\r\nr1",
            "#",
        ]])
        .await;
        assert_eq!(shell.exec("show version").await.unwrap(), "Cisco IOS 15.2");
    }

    #[tokio::test]
    async fn prompt_like_line_before_echo_does_not_end_read() {
        let mut shell = logged_in(vec![vec!["\r\nr1#", "show clock\r\n10:02 UTC\r\nr1#"]]).await;
        assert_eq!(shell.exec("show clock").await.unwrap(), "10:02 UTC");
    }

    #[tokio::test]
    async fn silent_device_times_out_with_partial_output() {
        let mut shell = logged_in(vec![vec!["show tech\r\n--- show version ---\r\n"]]).await;
        let failure = shell.exec("show tech").await.unwrap_err();
        assert!(matches!(
            failure.cause,
            SessionError::Timeout { after, stage: "command output" } if after == TIMEOUT
        ));
        assert_eq!(failure.partial_output, "show tech\n--- show version ---\n");
    }

    #[tokio::test]
    async fn closed_channel_keeps_partial_output() {
        let mut shell = logged_in(vec![vec!["show run\r\nhostname r1\r\n"]]).await;
        shell.io.hang = false;
        let failure = shell.exec("show run").await.unwrap_err();
        assert!(matches!(failure.cause, SessionError::ChannelClosed));
        assert_eq!(failure.partial_output, "show run\nhostname r1\n");
    }

    #[tokio::test]
    async fn config_is_framed_by_enter_and_exit() {
        let mut shell = logged_in(vec![
            vec!["configure terminal\r\nEnter configuration commands.\r\nr1(config)#"],
            vec!["interface Gi0/1\r\nr1(config-if)#"],
            vec!["description uplink\r\nr1(config-if)#"],
            vec!["end\r\nr1#"],
        ])
        .await;
        let commands = vec!["interface Gi0/1".to_string(), "description uplink".to_string()];

        let output = shell.configure(&commands).await.unwrap();
        assert_eq!(
            sent_after_login(&shell),
            vec!["configure terminal", "interface Gi0/1", "description uplink", "end"]
        );
        assert!(output.starts_with("configure terminal\n"));
        assert!(output.contains("description uplink\nr1(config-if)#"));
        assert!(output.ends_with("end\nr1#"));
    }

    #[tokio::test]
    async fn refused_config_mode_sends_no_lines() {
        let mut shell = logged_in(vec![vec![
            "configure terminal\r\n% Invalid input detected at '^' marker.\r\nr1>",
        ]])
        .await;
        let commands = vec!["hostname edge".to_string()];

        let failure = shell.configure(&commands).await.unwrap_err();
        assert!(matches!(failure.cause, SessionError::ConfigModeRefused));
        assert!(failure.partial_output.contains("% Invalid input"));
        assert_eq!(sent_after_login(&shell), vec!["configure terminal"]);
    }

    #[tokio::test]
    async fn rejected_line_stops_push_and_leaves_config_mode() {
        let mut shell = logged_in(vec![
            vec!["configure terminal\r\nr1(config)#"],
            vec!["vlan 10\r\nr1(config-vlan)#"],
            vec!["name us ers\r\n% Invalid input detected at '^' marker.\r\nr1(config-vlan)#"],
            vec!["end\r\nr1#"],
        ])
        .await;
        let commands = vec![
            "vlan 10".to_string(),
            "name us ers".to_string(),
            "exit".to_string(),
        ];

        let failure = shell.configure(&commands).await.unwrap_err();
        match &failure.cause {
            SessionError::ConfigRejected { line, reason } => {
                assert_eq!(line, "name us ers");
                assert_eq!(reason, "% Invalid input detected at '^' marker.");
            }
            other => panic!("unexpected cause: {other:?}"),
        }
        assert_eq!(
            sent_after_login(&shell),
            vec!["configure terminal", "vlan 10", "name us ers", "end"]
        );
        assert!(failure.partial_output.contains("vlan 10\nr1(config-vlan)#"));
        assert!(failure.partial_output.ends_with("end\nr1#"));
    }

    #[tokio::test]
    async fn config_timeout_keeps_earlier_lines() {
        let mut shell = logged_in(vec![
            vec!["configure terminal\r\nr1(config)#"],
            vec!["vlan 10\r\nr1(config-vlan)#"],
            vec!["name users\r\n"],
        ])
        .await;
        let commands = vec!["vlan 10".to_string(), "name users".to_string()];

        let failure = shell.configure(&commands).await.unwrap_err();
        assert!(matches!(failure.cause, SessionError::Timeout { .. }));
        assert_eq!(
            failure.partial_output,
            "configure terminal\nr1(config)#vlan 10\nr1(config-vlan)#name users\n"
        );
    }

    #[test]
    fn find_bytes_locates_needle() {
        assert_eq!(find_bytes(b"r1#show clock\r\n", b"show clock"), Some(3));
        assert_eq!(find_bytes(b"show", b"show clock"), None);
    }
}
