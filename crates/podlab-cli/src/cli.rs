use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "podlab",
    about = "Provision isolated per-student lab pods in a Microsoft Entra tenant",
    version
)]
pub struct Cli {
    /// Path to the lab config file.
    #[arg(long, env = "PODLAB_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Tenant id; overrides the config file.
    #[arg(long, env = "PODLAB_TENANT_ID", global = true)]
    pub tenant_id: Option<String>,

    /// Verified UPN domain for the lab accounts; overrides the config file.
    #[arg(long, env = "PODLAB_DOMAIN", global = true)]
    pub domain: Option<String>,

    /// Run against an in-memory directory instead of the live tenant.
    #[arg(long, global = true)]
    pub offline: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Stage 1: accounts, security groups and memberships.
    Identities {
        #[command(flatten)]
        stage: StageArgs,

        /// Also write issued credentials to this CSV file.
        #[arg(long)]
        csv_out: Option<PathBuf>,
    },

    /// Stage 2: one device-management scope tag per student.
    ScopeTags {
        #[command(flatten)]
        stage: StageArgs,
    },

    /// Stage 3: hidden administrative units with a scoped role grant.
    AdminUnits {
        #[command(flatten)]
        stage: StageArgs,
    },

    /// Stage 4: the shared Intune role and per-student assignments.
    Roles {
        #[command(flatten)]
        stage: StageArgs,
    },

    /// All four stages, in order.
    Provision {
        #[command(flatten)]
        stage: StageArgs,

        /// Also write issued credentials to this CSV file.
        #[arg(long)]
        csv_out: Option<PathBuf>,
    },

    /// Audit what each pod actually has. Writes nothing.
    Status {
        /// Number of students to audit.
        #[arg(long)]
        students: Option<u32>,
    },
}

#[derive(Debug, Args)]
pub struct StageArgs {
    /// Number of students to provision, starting from 1.
    #[arg(long)]
    pub students: Option<u32>,

    /// Never create missing objects; only wire up ones that already exist.
    #[arg(long)]
    pub assume_existing: bool,
}
