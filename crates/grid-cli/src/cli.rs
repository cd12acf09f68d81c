use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// Cloud provider to provision builder instances against. `Local` needs no
/// external credentials and is the default for a single-machine bootstrap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "lower")]
pub enum CloudArg {
    Local,
    Aws,
    Gcp,
    Aliyun,
    Pve,
}

#[derive(Debug, Parser)]
#[command(name = "grid", about = "Portage build grid client and bootstrap tool")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the control-plane server in-process.
    Bootstrap {
        #[arg(long, default_value = "0.0.0.0")]
        bind: String,
        #[arg(long, default_value_t = 8080)]
        port: u16,
        /// Reuse/generate the bearer token at ~/.grid/token unless given explicitly.
        #[arg(long, env = "GRID_TOKEN")]
        token: Option<String>,
        #[arg(long)]
        rotate_token: bool,
        /// Use an in-memory job/instance store instead of the redb-backed default.
        #[arg(long)]
        ephemeral: bool,
        #[arg(long)]
        store_path: Option<String>,
        /// Cloud provider the Capacity manager provisions builder instances
        /// against; `local` (the default) needs no --cloud-config.
        #[arg(long, value_enum, default_value = "local")]
        cloud: CloudArg,
        /// Path to a JSON file matching the chosen provider's driver config
        /// (e.g. `AwsDriverConfig`'s fields); required unless --cloud=local.
        #[arg(long)]
        cloud_config: Option<PathBuf>,
    },

    /// Submit a build to a running server.
    Submit {
        /// `category/name` atom; mutually exclusive with --config/--portage-dir.
        #[arg(long)]
        package: Option<String>,
        #[arg(long)]
        version: Option<String>,
        /// A pre-built bundle, as JSON matching the `Bundle` schema.
        #[arg(long)]
        config: Option<PathBuf>,
        /// A Portage system-configuration tree (make.conf, package.use, …).
        #[arg(long)]
        portage_dir: Option<PathBuf>,
        /// Comma-separated use flags, applied to --package only.
        #[arg(long)]
        r#use: Option<String>,
        /// Comma-separated keywords, applied to --package only.
        #[arg(long)]
        keywords: Option<String>,
        #[arg(long, default_value = "amd64")]
        arch: String,
        #[arg(long, default_value = "default/linux/amd64/23.0")]
        profile: String,
        #[arg(long, default_value = "http://localhost:8080")]
        server: String,
        /// Write the encoded bundle archive to this path instead of submitting it.
        #[arg(long)]
        output: Option<PathBuf>,
        #[arg(long, env = "GRID_TOKEN")]
        token: Option<String>,
    },

    /// Print a job's full record.
    Status {
        job_id: String,
        #[arg(long, default_value = "http://localhost:8080")]
        server: String,
        #[arg(long, env = "GRID_TOKEN")]
        token: Option<String>,
    },

    /// Print a job's accumulated build log.
    Logs {
        job_id: String,
        #[arg(long, default_value = "http://localhost:8080")]
        server: String,
        #[arg(long, env = "GRID_TOKEN")]
        token: Option<String>,
    },

    /// List recent jobs.
    List {
        #[arg(long)]
        limit: Option<u32>,
        #[arg(long, default_value = "http://localhost:8080")]
        server: String,
        #[arg(long, env = "GRID_TOKEN")]
        token: Option<String>,
    },

    /// Cancel a queued or in-flight job.
    Cancel {
        job_id: String,
        #[arg(long, default_value = "http://localhost:8080")]
        server: String,
        #[arg(long, env = "GRID_TOKEN")]
        token: Option<String>,
    },
}
