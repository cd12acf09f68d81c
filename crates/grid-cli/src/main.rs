mod cli;
mod commands;
mod output;

use clap::Parser;
use cli::{Cli, Command};
use commands::CliExit;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Command::Bootstrap {
            bind,
            port,
            token,
            rotate_token,
            ephemeral,
            store_path,
            cloud,
            cloud_config,
        } => {
            match commands::bootstrap(
                bind, port, token, rotate_token, ephemeral, store_path, cloud, cloud_config,
            )
            .await
            {
                Ok(()) => Ok(CliExit::Success),
                Err(e) => Ok(CliExit::Transport(e.to_string())),
            }
        }
        Command::Submit {
            package,
            version,
            config,
            portage_dir,
            r#use,
            keywords,
            arch,
            profile,
            server,
            output,
            token,
        } => {
            commands::submit(
                package, version, config, portage_dir, r#use, keywords, arch, profile, server,
                output, token,
            )
            .await
        }
        Command::Status { job_id, server, token } => commands::status(job_id, server, token).await,
        Command::Logs { job_id, server, token } => commands::logs(job_id, server, token).await,
        Command::List { limit, server, token } => commands::list(limit, server, token).await,
        Command::Cancel { job_id, server, token } => commands::cancel(job_id, server, token).await,
    };

    let exit = match result {
        Ok(exit) => exit,
        Err(e) => CliExit::Transport(e.to_string()),
    };
    if let Some(message) = exit.message() {
        eprintln!("error: {message}");
    }
    std::process::exit(exit.code());
}
