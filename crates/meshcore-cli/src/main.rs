//! meshcore worker
//!
//! Spawned by the supervisor with two pipe descriptors. Reads its
//! configuration over the pipe, brings the node up and serves admin
//! requests until told to exit.

mod invocation;

use clap::Parser;
use clap::error::ErrorKind;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

use meshcore_core::{BootstrapOptions, Core, FatalError, LogSwitch, SupervisorChannel};

/// meshcore worker process (launched by the supervisor)
#[derive(Parser)]
#[command(name = "meshcore-core")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Outbound and inbound supervisor pipe descriptors
    descriptors: Vec<String>,
}

fn init_logging(switch: &LogSwitch, verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "info" }));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_filter(switch.clone().stdout_filter()))
        .with(switch.layer())
        .init();
}

async fn serve(args: &[String], switch: &LogSwitch) -> Result<i32, FatalError> {
    let fds = invocation::descriptors(args)?;
    let channel = SupervisorChannel::from_descriptors(fds.to_angel, fds.from_angel)?;
    let options = BootstrapOptions::default().with_log_switch(switch.clone());
    let core = Core::bootstrap(channel, options).await?;
    core.run().await
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let parsed = match Cli::try_parse() {
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            e.exit()
        }
        other => other,
    };

    let switch = LogSwitch::new();
    init_logging(&switch, parsed.as_ref().is_ok_and(|cli| cli.verbose));

    let outcome = match parsed {
        Ok(cli) => serve(&cli.descriptors, &switch).await,
        Err(e) => Err(FatalError::InvalidInvocation(
            e.kind().as_str().unwrap_or("unrecognized arguments").into(),
        )),
    };

    match outcome {
        Ok(status) => std::process::exit(status),
        Err(e) => {
            // Failures after the handshake were already sent to the
            // supervisor; this copy goes to stdout.
            switch.detach();
            tracing::error!("{}", e);
            Err(e.into())
        }
    }
}
