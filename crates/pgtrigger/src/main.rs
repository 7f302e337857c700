//! pgtrigger - install notify triggers and stream row changes.

use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pgtrigger::{
    Args, Command, Consumer, Error, JsonLines, ListenArgs, Listener, ListenerState, TargetArgs,
    TriggerAdmin,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Logs go to stderr so stdout carries only change messages
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pgtrigger=info,pgtrigger_client=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let result = match args.command {
        Command::Install(target) => install(&args.database_url, &target).await,
        Command::Uninstall(target) => uninstall(&args.database_url, &target).await,
        Command::Listen(listen) => run_listener(args.database_url, listen).await,
    };

    if let Err(e) = result {
        tracing::error!(error = %e, "pgtrigger failed");
        return Err(e.into());
    }

    Ok(())
}

async fn install(database_url: &str, target: &TargetArgs) -> Result<(), Error> {
    let target = target.to_target()?;
    let admin = TriggerAdmin::connect(database_url).await?;
    let result = admin.install(&target).await;
    admin.close().await;
    result
}

async fn uninstall(database_url: &str, target: &TargetArgs) -> Result<(), Error> {
    let target = target.to_target()?;
    let admin = TriggerAdmin::connect(database_url).await?;
    let result = admin.uninstall(&target).await;
    admin.close().await;
    result
}

async fn run_listener(database_url: String, args: ListenArgs) -> Result<(), Error> {
    let target = args.target.to_target()?;
    let config = args.into_config(database_url)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        subscription = %target,
        channel = %target.channel(),
        "starting listener"
    );

    let listener = Listener::new(target, config);
    let printer: Arc<dyn Consumer> = Arc::new(JsonLines::new(std::io::stdout()));
    listener.start(vec![printer]).await?;

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                tracing::error!(error = %e, "failed to listen for ctrl+c");
            } else {
                tracing::info!("received shutdown signal");
            }
            listener.stop().await?;
        }
        state = listener.wait() => {
            tracing::debug!(state = %state, "listener ended");
        }
    }

    let status = listener.status();
    let metrics = listener.metrics();
    tracing::info!(
        state = %status.state,
        received = metrics.received(),
        dispatched = metrics.dispatched(),
        decode_errors = metrics.decode_failures(),
        consumer_errors = metrics.consumer_failures(),
        "listener finished"
    );

    match status.state {
        ListenerState::Faulted | ListenerState::CallbackFaulted => Err(Error::Terminated {
            state: status.state,
            reason: status.last_error.unwrap_or_default(),
        }),
        _ => Ok(()),
    }
}
