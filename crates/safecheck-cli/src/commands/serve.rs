use clap::Args;
use safecheck_core::Config;
use tokio::sync::watch;

use super::{CmdResult, Context};

#[derive(Args)]
pub struct ServeArgs {
    /// Do not create check-ins from timings; only drive existing ones
    #[arg(long)]
    pub no_materialize: bool,
}

pub async fn run(args: ServeArgs) -> CmdResult {
    let mut config = Config::load()?;
    if args.no_materialize {
        config.scheduler.materialize = false;
    }
    let ctx = Context::from_config(config)?;

    let scheduler = ctx.service.scheduler();
    let recovered = scheduler.recover()?;
    tracing::info!(
        recovered,
        channel = %ctx.config.notifications.channel,
        database = %ctx.config.storage.database_file,
        "serving"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(async move { scheduler.run(shutdown_rx).await });

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown requested");
    let _ = shutdown_tx.send(true);
    handle.await?;
    ctx.service.drain_background().await;
    Ok(())
}
