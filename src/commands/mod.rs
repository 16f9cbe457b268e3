mod audit;
mod list;
mod migrate;
mod rewrite;
mod rollback;

use crate::cli::{Cli, Command};
use crate::error::{ErrorKind, Result};
use crate::services::Services;
use exn::ResultExt;
use offload_config::Config;

/// Load the configuration, connect, run the command, disconnect.
pub async fn run(cli: Cli) -> Result<()> {
    let config = Config::load(cli.config.as_deref()).or_raise(|| ErrorKind::Config)?;
    crate::logging::init(config.log_file.as_deref())?;

    let dry_run = cli.dry_run || matches!(cli.command, Command::DryRun(_));
    let services = Services::build(&config, dry_run).await?;
    let result = match cli.command {
        Command::Migrate(batch) | Command::DryRun(batch) => migrate::run(&services, &config, batch).await,
        Command::Rollback { id, elementor } => rollback::run(&services, id, elementor).await,
        Command::Audit { yes } => audit::run(&services, yes).await,
        Command::List => list::run(&services).await,
        Command::RewriteLinks { apply } => rewrite::run(&services, apply).await,
    };
    services.shutdown().await;
    result
}
