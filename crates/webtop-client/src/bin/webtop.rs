//! Webtop CLI - talk to a webtop server from the terminal
//!
//! Usage:
//!   webtop call <method> [json]      Issue a raw API or FS: call
//!   webtop ls <dir>                  List a directory
//!   webtop cat <file>                Print a file
//!   webtop put <path> <local>        Upload a local file
//!   webtop mkdir <dir>               Create a directory
//!   webtop rm <path>                 Delete a file or directory
//!   webtop mounts                    Show the mount table
//!   webtop sample-config             Print a sample configuration

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use webtop_client::WebtopClient;
use webtop_core::{Config, FileRef};

#[derive(Parser)]
#[command(name = "webtop")]
#[command(about = "Webtop server client", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (default: platform config dir)
    #[arg(short, long, global = true, env = "WEBTOP_CONFIG")]
    config: Option<PathBuf>,

    /// Work without a server connection
    #[arg(long, global = true)]
    standalone: bool,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Issue a raw API or FS: call
    Call {
        /// Method name (e.g. "packages" or "FS:scandir")
        method: String,

        /// Arguments as a JSON object
        #[arg(default_value = "{}")]
        args: String,
    },

    /// List a directory
    Ls {
        /// Directory path (e.g. home:///)
        dir: String,
    },

    /// Print a file to stdout
    Cat {
        file: String,
    },

    /// Upload a local file into a directory
    Put {
        /// Destination directory
        dest: String,

        /// Local file to upload
        local: PathBuf,
    },

    /// Create a directory
    Mkdir {
        dir: String,
    },

    /// Delete a file or directory
    Rm {
        path: String,
    },

    /// Show the mount table
    Mounts,

    /// Print a sample configuration file
    SampleConfig,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Set up logging
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if let Commands::SampleConfig = cli.command {
        print!("{}", Config::sample());
        return Ok(());
    }

    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load(),
    };
    if cli.standalone {
        config.connection.standalone = true;
    }

    let client = WebtopClient::new(config)?;
    client.init().await?;
    let result = run(&client, cli.command).await;
    client.destroy().await;
    result
}

async fn run(client: &WebtopClient, command: Commands) -> Result<(), Box<dyn std::error::Error>> {
    let vfs = client.vfs();
    match command {
        Commands::Call { method, args } => {
            let args: Value = serde_json::from_str(&args)?;
            let result = client.call(&method, args).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Commands::Ls { dir } => {
            for entry in vfs.scandir(&FileRef::dir(dir)).await? {
                let marker = if entry.is_dir() { "/" } else { "" };
                println!("{:>10}  {}{}", entry.size(), entry.filename(), marker);
            }
        }
        Commands::Cat { file } => {
            let data = vfs.read(&FileRef::file(file)).await?;
            print!("{}", String::from_utf8_lossy(&data));
        }
        Commands::Put { dest, local } => {
            let data = tokio::fs::read(&local).await?;
            let filename = local
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .ok_or("local path has no file name")?;
            let uploaded = vfs.upload(&FileRef::dir(dest), &filename, &data).await?;
            info!("Uploaded {} ({} bytes)", uploaded.path(), data.len());
        }
        Commands::Mkdir { dir } => {
            vfs.mkdir(&FileRef::dir(dir)).await?;
        }
        Commands::Rm { path } => {
            vfs.unlink(&FileRef::from(path.as_str())).await?;
        }
        Commands::Mounts => {
            for mount in client.router().mounts().iter() {
                let mode = if mount.is_read_only() { "ro" } else { "rw" };
                println!("{:<12} {:<24} {:?} {}", mount.name(), mount.prefix(), mount.config.transport, mode);
            }
        }
        Commands::SampleConfig => print!("{}", Config::sample()),
    }
    Ok(())
}
