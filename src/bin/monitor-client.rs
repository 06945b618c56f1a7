use clap::Parser;
use color_eyre::Result;
use serial_monitor::client::ClientHandle;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, Level};

/// Connects to a relay, prints everything it broadcasts and sends each stdin line as a command.
///
/// A line of the form `/port <name> <baud>` switches ports instead.
#[derive(Parser, Debug)]
struct Args {
    /// The relay to connect to.
    #[arg(default_value = "ws://127.0.0.1:8080/serialmonitor")]
    url: String,
}

async fn run(args: Args) -> Result<()> {
    let client = ClientHandle::new(&args.url).await?;
    let (mut tx, mut rx) = client.split();

    info!(url = %args.url, "Connected");

    tokio::spawn(async move {
        while let Ok(text) = rx.next_text().await {
            println!("{text}");
        }
        info!("Relay closed the connection");
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        let words = line.split_whitespace().collect::<Vec<_>>();

        match words.as_slice() {
            ["/port", port, baud] => match baud.parse() {
                Ok(baud) => tx.reconfigure(port, baud).await?,
                Err(e) => eprintln!("Bad baud rate `{baud}`: {e}"),
            },
            _ => tx.command(&line).await?,
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    serial_monitor::logging::init(Level::INFO, None).await;

    let args = Args::parse();

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl-C, quitting");
            Ok(())
        }
        result = run(args) => result,
    }
}
