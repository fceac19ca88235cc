use std::io::IsTerminal;

use anyhow::Result;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::warn;

use terminal_chat::{
    cli::{Cli, Command},
    client,
    config::is_exit_command,
    server::ChatServer,
};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(std::io::stdout().is_terminal())
        .try_init();
}

fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let runtime = tokio::runtime::Runtime::new()?;
    let result = runtime.block_on(run(cli));
    // A pending stdin read sits on a blocking thread that cannot be
    // cancelled, so do not wait for it on the way out.
    runtime.shutdown_background();
    result
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Server(args) => {
            let server = ChatServer::new(args.into());
            if let Err(err) = server.run_until(exit_requested()).await {
                warn!("server exited with error: {err:?}");
                return Err(err.into());
            }
        }
        Command::Client(args) => client::run(args.into()).await?,
    }

    Ok(())
}

/// Resolves on ctrl-c or when the operator types `exit`. End of stdin is
/// ignored so the server keeps running when started without a terminal.
async fn exit_requested() {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let typed_exit = async {
        loop {
            match lines.next_line().await {
                Ok(Some(line)) if is_exit_command(&line) => return,
                Ok(Some(_)) => continue,
                Ok(None) | Err(_) => std::future::pending::<()>().await,
            }
        }
    };

    tokio::select! {
        _ = typed_exit => {}
        ctrl_c = tokio::signal::ctrl_c() => {
            if let Err(error) = ctrl_c {
                warn!(?error, "failed to install ctrl-c handler");
            }
        }
    }
}
