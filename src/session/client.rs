use std::time::Duration;

use async_ssh2_tokio::Config;
use async_ssh2_tokio::client::{AuthMethod, Client};
use log::{debug, trace};
use russh::client::Msg;
use russh::{Channel, ChannelMsg};
use secrecy::ExposeSecret;
use tokio::sync::mpsc::{self, Receiver, Sender};

use super::{ConnectionSecurityOptions, ShellStream};
use crate::error::ConnectError;
use crate::fleet::Credentials;

/// Depth of the queues between the shell task and the session.
const QUEUE_DEPTH: usize = 256;

/// Grace period for the device to act on `exit` before the client drops.
const EXIT_GRACE: Duration = Duration::from_millis(100);

/// A PTY shell on one device.
///
/// A background task bridges the SSH channel to a pair of mpsc queues; the
/// task ends when the device closes the channel or this value is dropped.
pub struct SshShell {
    client: Client,
    to_shell: Sender<String>,
    from_shell: Receiver<String>,
    device_addr: String,
}

impl SshShell {
    pub async fn connect(
        addr: &str,
        port: u16,
        credentials: &Credentials,
        security: &ConnectionSecurityOptions,
        inactivity_timeout: Duration,
    ) -> Result<Self, ConnectError> {
        let device_addr = format!("{}@{addr}:{port}", credentials.username);
        let config = Config {
            preferred: security.preferred(),
            inactivity_timeout: Some(inactivity_timeout),
            ..Default::default()
        };

        let client = Client::connect_with_config(
            (addr.to_string(), port),
            &credentials.username,
            AuthMethod::with_password(credentials.password.expose_secret()),
            security.server_check.clone(),
            config,
        )
        .await?;
        debug!("{device_addr}: authenticated ({:?})", security.level);

        let channel = client.get_channel().await?;
        channel
            .request_pty(false, "vt100", 200, 50, 0, 0, &[])
            .await?;
        channel.request_shell(false).await?;
        debug!("{device_addr}: shell open");

        let (to_shell, from_shell) = spawn_bridge(channel, device_addr.clone());
        Ok(Self {
            client,
            to_shell,
            from_shell,
            device_addr,
        })
    }

    pub fn device_addr(&self) -> &str {
        &self.device_addr
    }

    pub fn is_connected(&self) -> bool {
        !self.client.is_closed()
    }
}

/// Moves text between the SSH channel and two queues until either side ends.
fn spawn_bridge(mut channel: Channel<Msg>, device_addr: String) -> (Sender<String>, Receiver<String>) {
    let (to_shell, mut outgoing) = mpsc::channel::<String>(QUEUE_DEPTH);
    let (incoming, from_shell) = mpsc::channel::<String>(QUEUE_DEPTH);

    tokio::spawn(async move {
        loop {
            tokio::select! {
                Some(data) = outgoing.recv() => {
                    if let Err(err) = channel.data(data.as_bytes()).await {
                        debug!("{device_addr}: write failed: {err}");
                        break;
                    }
                }
                Some(msg) = channel.wait() => match msg {
                    ChannelMsg::Data { ref data } => {
                        // Old firmware prints Latin-1 banners.
                        let text = String::from_utf8_lossy(data).into_owned();
                        trace!("{device_addr}: <- {text:?}");
                        if incoming.send(text).await.is_err() {
                            break;
                        }
                    }
                    ChannelMsg::ExitStatus { exit_status } => {
                        debug!("{device_addr}: shell exited with {exit_status}");
                        let _ = channel.eof().await;
                        break;
                    }
                    ChannelMsg::Eof | ChannelMsg::Close => break,
                    _ => {}
                },
                else => break,
            }
        }
        debug!("{device_addr}: shell bridge stopped");
    });

    (to_shell, from_shell)
}

impl ShellStream for SshShell {
    async fn send(&mut self, data: &str) -> Result<(), ConnectError> {
        self.to_shell.send(data.to_string()).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<String>, ConnectError> {
        Ok(self.from_shell.recv().await)
    }

    /// Asks the device to log out; the connection drops with the client.
    async fn close(&mut self) -> Result<(), ConnectError> {
        self.from_shell.close();
        if self.is_connected() && self.to_shell.send("exit\n".to_string()).await.is_ok() {
            tokio::time::sleep(EXIT_GRACE).await;
        }
        debug!("{}: shell closed", self.device_addr);
        Ok(())
    }
}
