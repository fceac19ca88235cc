use anyhow::{Context, Result, anyhow};
use tokio::{
    io::{
        self, AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
        Lines,
    },
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    select,
    time::timeout,
};
use tracing::{info, warn};

use crate::config::{ClientConfig, EXIT_COMMAND, is_exit_command};

/// Wire form of a chat line. The server relays it as opaque bytes.
pub fn format_message(username: &str, text: &str) -> String {
    format!("{username}: {text}")
}

/// Connects, then runs the chat loop on the process's stdin and stdout.
/// Asks for a username first when the config does not carry one.
pub async fn run(mut config: ClientConfig) -> Result<()> {
    let mut input = BufReader::new(tokio::io::stdin()).lines();
    let mut output = tokio::io::stdout();

    if config.username.trim().is_empty() {
        write_line(&mut output, "Please enter your username:").await?;
        config.username = input
            .next_line()
            .await?
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .context("no username entered")?;
    }

    let client = ChatClient::connect(config).await?;
    client.run(input, output).await
}

pub struct ChatClient {
    config: ClientConfig,
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
}

impl ChatClient {
    /// Opens the connection, giving up after the configured connect timeout.
    /// Nothing is kept when the attempt fails.
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        let server = config.server;
        let stream = timeout(config.connect_timeout, TcpStream::connect(server))
            .await
            .map_err(|_| {
                anyhow!(
                    "timed out after {:?} connecting to {server}",
                    config.connect_timeout
                )
            })?
            .with_context(|| format!("failed to connect to {server}"))?;

        info!("connected to {}", server);
        let (reader, writer) = stream.into_split();
        Ok(Self {
            config,
            reader,
            writer,
        })
    }

    /// Forwards each input line as `"<username>: <line>"` while printing
    /// every inbound chunk on its own line. Returns when the user types
    /// `exit`, input ends, or the server goes away.
    pub async fn run<I, O>(self, mut input: Lines<I>, mut output: O) -> Result<()>
    where
        I: AsyncBufRead + Unpin,
        O: AsyncWrite + Unpin,
    {
        let ChatClient {
            config,
            mut reader,
            mut writer,
        } = self;
        let mut buffer = vec![0u8; config.read_buffer.max(1)];

        write_line(&mut output, &format!("*** connected to {}", config.server)).await?;
        write_line(
            &mut output,
            &format!("*** enter '{EXIT_COMMAND}' to close the program"),
        )
        .await?;

        loop {
            select! {
                received = reader.read(&mut buffer) => {
                    if !handle_inbound(received, &buffer, &mut output).await? {
                        break;
                    }
                }
                line = input.next_line() => {
                    if !handle_input(line?, &config.username, &mut writer).await? {
                        break;
                    }
                }
                ctrl_c = tokio::signal::ctrl_c() => {
                    if let Err(error) = ctrl_c {
                        warn!(?error, "ctrl-c handler failed");
                    }
                    break;
                }
            }
        }

        if let Err(error) = writer.shutdown().await {
            warn!(?error, "failed to shutdown client writer cleanly");
        }
        Ok(())
    }
}

async fn handle_inbound<O>(
    received: io::Result<usize>,
    buffer: &[u8],
    output: &mut O,
) -> Result<bool>
where
    O: AsyncWrite + Unpin,
{
    match received {
        Ok(0) => {
            write_line(output, "*** connection closed").await?;
            Ok(false)
        }
        Ok(len) => {
            output.write_all(&buffer[..len]).await?;
            output.write_all(b"\n").await?;
            output.flush().await?;
            Ok(true)
        }
        Err(error) => {
            warn!(?error, "failed to receive from server");
            write_line(output, "*** failed to receive from server; disconnecting").await?;
            Ok(false)
        }
    }
}

async fn handle_input(
    line: Option<String>,
    username: &str,
    writer: &mut OwnedWriteHalf,
) -> Result<bool> {
    let Some(line) = line else {
        return Ok(false);
    };

    if is_exit_command(&line) {
        return Ok(false);
    }
    let text = line.trim_end_matches('\r');
    if text.trim().is_empty() {
        return Ok(true);
    }

    writer
        .write_all(format_message(username, text).as_bytes())
        .await
        .context("failed to send message to server")?;
    Ok(true)
}

async fn write_line<O>(output: &mut O, line: &str) -> io::Result<()>
where
    O: AsyncWrite + Unpin,
{
    output.write_all(line.as_bytes()).await?;
    output.write_all(b"\n").await?;
    output.flush().await
}
