use std::{path::Path, process::Stdio, time::Duration};

use anyhow::{Context, Result, anyhow};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    process::{Child, ChildStdin, ChildStdout, Command},
    time::timeout,
};

const READ_TIMEOUT: Duration = Duration::from_secs(3);

#[tokio::test]
async fn cli_chat_end_to_end() -> Result<()> {
    let binary = assert_cmd::cargo::cargo_bin!("terminal_chat");

    let mut server = spawn_server(&binary).await?;
    let addr = read_server_addr(&mut server.stdout).await?;

    let mut alice = spawn_client(&binary, "alice", &addr).await?;
    wait_for_log(&mut server.stdout, "client connected").await?;
    let mut bob = spawn_client(&binary, "bob", &addr).await?;
    wait_for_log(&mut server.stdout, "client connected").await?;

    // Alice's line reaches Bob tagged with her name; the operator sees it too.
    alice.send_line("hi").await.context("alice send line")?;
    let bob_hears_alice =
        read_line_expect(&mut bob.stdout, "waiting for bob to hear alice").await?;
    assert_eq!(bob_hears_alice, "alice: hi");
    let logged = wait_for_log(&mut server.stdout, "message received").await?;
    assert!(logged.contains("alice: hi"), "unexpected log line: {logged}");

    bob.send_line("hello alice").await.context("bob send line")?;
    let alice_hears_bob =
        read_line_expect(&mut alice.stdout, "waiting for alice to hear bob").await?;
    assert_eq!(alice_hears_bob, "bob: hello alice");
    wait_for_log(&mut server.stdout, "message received").await?;

    // Alice leaves; the server notices and drops her.
    alice.send_line("exit").await.context("alice send exit")?;
    ensure_success(&mut alice.child, "alice client").await?;
    wait_for_log(&mut server.stdout, "client disconnected").await?;

    bob.send_line("exit").await.context("bob send exit")?;
    ensure_success(&mut bob.child, "bob client").await?;

    // Typing `exit` at the server console shuts it down cleanly.
    server.send_line("exit").await.context("server send exit")?;
    wait_for_log(&mut server.stdout, "server shutting down").await?;
    ensure_success(&mut server.child, "server").await?;

    Ok(())
}

#[tokio::test]
async fn client_reports_unreachable_server() -> Result<()> {
    let binary = assert_cmd::cargo::cargo_bin!("terminal_chat");
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    let addr = listener.local_addr()?.to_string();
    drop(listener);

    let mut child = Command::new(&binary)
        .arg("client")
        .arg("--username")
        .arg("alice")
        .arg("--server")
        .arg(&addr)
        .arg("--connect-timeout-secs")
        .arg("1")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .context("failed to spawn client")?;

    let status = timeout(READ_TIMEOUT, child.wait())
        .await
        .context("client hung on an unreachable server")??;
    assert!(!status.success());
    Ok(())
}

struct Process {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl Process {
    async fn send_line(&mut self, line: &str) -> Result<()> {
        self.stdin
            .write_all(line.as_bytes())
            .await
            .with_context(|| format!("failed to send line '{line}'"))?;
        self.stdin.write_all(b"\n").await?;
        self.stdin.flush().await?;
        Ok(())
    }
}

fn spawn(mut cmd: Command, name: &str) -> Result<Process> {
    cmd.env("RUST_LOG_STYLE", "never")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .with_context(|| format!("failed to spawn {name}"))?;
    let stdin = child
        .stdin
        .take()
        .with_context(|| format!("{name} stdin missing after spawn"))?;
    let stdout = child
        .stdout
        .take()
        .with_context(|| format!("{name} stdout missing after spawn"))?;

    Ok(Process {
        child,
        stdin,
        stdout: BufReader::new(stdout),
    })
}

async fn spawn_server(binary: &Path) -> Result<Process> {
    let mut cmd = Command::new(binary);
    cmd.arg("server")
        .arg("--listen")
        .arg("127.0.0.1:0")
        .env("RUST_LOG", "info");
    spawn(cmd, "server")
}

async fn read_server_addr(reader: &mut BufReader<ChildStdout>) -> Result<String> {
    let line = wait_for_log(reader, "server listening on").await?;
    let trimmed = line.trim();
    let addr = trimmed
        .split_whitespace()
        .last()
        .context("unexpected server banner format")?;
    if !addr.contains(':') {
        return Err(anyhow!("server banner missing socket: {trimmed}"));
    }
    Ok(addr.to_string())
}

async fn spawn_client(binary: &Path, username: &str, addr: &str) -> Result<Process> {
    let mut cmd = Command::new(binary);
    cmd.arg("client")
        .arg("--username")
        .arg(username)
        .arg("--server")
        .arg(addr)
        .env("RUST_LOG", "warn");
    let mut process = spawn(cmd, &format!("client {username}"))?;

    let banner = read_line_expect(&mut process.stdout, "waiting for connect banner").await?;
    if banner != format!("*** connected to {addr}") {
        return Err(anyhow!(
            "expected connect banner for {username}, got '{banner}'"
        ));
    }
    let hint = read_line_expect(&mut process.stdout, "waiting for exit hint").await?;
    assert_eq!(hint, "*** enter 'exit' to close the program");

    Ok(process)
}

/// Skips log lines until one contains `needle`.
async fn wait_for_log(reader: &mut BufReader<ChildStdout>, needle: &str) -> Result<String> {
    loop {
        let description = format!("waiting for '{needle}' in server log");
        let line = read_line_expect(reader, &description).await?;
        if line.contains(needle) {
            return Ok(line);
        }
    }
}

async fn read_line_expect(
    reader: &mut BufReader<ChildStdout>,
    description: &str,
) -> Result<String> {
    match read_line(reader).await {
        Ok(Some(line)) => Ok(line),
        Ok(None) => Err(anyhow!("{description}: stream closed")),
        Err(err) => Err(err.context(format!("{description}: failed to read line"))),
    }
}

async fn read_line(reader: &mut BufReader<ChildStdout>) -> Result<Option<String>> {
    let mut line = String::new();
    let read_future = reader.read_line(&mut line);
    let bytes_io = match timeout(READ_TIMEOUT, read_future).await {
        Ok(result) => result,
        Err(_) => return Err(anyhow!("timed out waiting for line")),
    };
    let byte_count = bytes_io?;
    if byte_count == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
}

async fn ensure_success(child: &mut Child, name: &str) -> Result<()> {
    let status = timeout(READ_TIMEOUT, child.wait())
        .await
        .with_context(|| format!("timed out waiting for {name} to exit"))?
        .with_context(|| format!("failed to await {name} process"))?;
    if !status.success() {
        return Err(anyhow!("{name} exited with status {status}"));
    }
    Ok(())
}
