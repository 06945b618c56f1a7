use std::sync::Arc;

use clap::Parser;
use color_eyre::Result;
use serial_monitor::{
    actions::Action,
    cli::{self, Commands, Examples},
    config::Config,
    logging,
    ports::SystemPorts,
    server, SerialConnector,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

#[cfg(unix)]
async fn hangup() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    signal(SignalKind::hangup())?.recv().await;
    Ok(())
}

#[cfg(not(unix))]
async fn hangup() -> std::io::Result<()> {
    std::future::pending().await
}

fn handle_command(command: Commands) -> Result<()> {
    match command {
        Commands::Examples(example) => match example {
            Examples::Config => println!("{}", Config::example().serialize_pretty()?),
            Examples::Reconfigure => {
                println!("{}", Action::reconfigure("/dev/ttyACM0", 115_200).serialize())
            }
            Examples::Command => println!("{}", Action::command("PING").serialize()),
        },
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let mut cli = cli::Cli::parse();

    if let Some(command) = cli.command.take() {
        return handle_command(command);
    }

    logging::init(cli.stdout_level(), cli.file_logging()).await;

    let mut config = if let Some(config_path) = &cli.config {
        debug!(?config_path, "Config from path");
        Config::new_from_path(config_path)?
    } else {
        debug!("Default config");
        Config::default()
    };
    cli.apply(&mut config);

    let shutdown = CancellationToken::new();

    let server = server::run(
        config,
        Arc::new(SerialConnector::default()),
        Some(Arc::new(SystemPorts)),
        shutdown.clone(),
    );
    tokio::pin!(server);

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl-C, quitting")
        }
        result = hangup() => match result {
            Ok(()) => info!("Told to hang up, quitting"),
            Err(e) => error!(%e, "Could not listen for hangup, quitting"),
        },
        result = &mut server => {
            error!("Server returned");
            result?;
            return Err(color_eyre::eyre::eyre!("Server stopped unexpectedly"));
        }
    }

    shutdown.cancel();
    let result = server.await;

    logging::shutdown();

    Ok(result?)
}
