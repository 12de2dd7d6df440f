mod cli;
mod commands;
mod output;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Command};
use podlab_provisioner::Stage;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Identities { stage, csv_out } => {
            commands::run_stage(
                Stage::Identity,
                stage.students,
                stage.assume_existing,
                csv_out,
                cli.config,
                cli.tenant_id,
                cli.domain,
                cli.offline,
            )
            .await
        }
        Command::ScopeTags { stage } => {
            commands::run_stage(
                Stage::ScopeTags,
                stage.students,
                stage.assume_existing,
                None,
                cli.config,
                cli.tenant_id,
                cli.domain,
                cli.offline,
            )
            .await
        }
        Command::AdminUnits { stage } => {
            commands::run_stage(
                Stage::AdminUnits,
                stage.students,
                stage.assume_existing,
                None,
                cli.config,
                cli.tenant_id,
                cli.domain,
                cli.offline,
            )
            .await
        }
        Command::Roles { stage } => {
            commands::run_stage(
                Stage::DelegatedRoles,
                stage.students,
                stage.assume_existing,
                None,
                cli.config,
                cli.tenant_id,
                cli.domain,
                cli.offline,
            )
            .await
        }
        Command::Provision { stage, csv_out } => {
            commands::provision(
                stage.students,
                stage.assume_existing,
                csv_out,
                cli.config,
                cli.tenant_id,
                cli.domain,
                cli.offline,
            )
            .await
        }
        Command::Status { students } => {
            commands::status(students, cli.config, cli.tenant_id, cli.domain, cli.offline).await
        }
    }
}
