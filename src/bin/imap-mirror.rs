#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]

//! CLI for mirroring IMAP folders into local mbox archives

use clap::{Parser, Subcommand};
use imap_mirror::{FolderBackup, FolderStatus, MirrorClient, MirrorConfig};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "imap-mirror")]
#[command(about = "Incrementally mirror IMAP folders into local mbox files")]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Download new messages into the local mirror
    Backup {
        /// Folders to mirror (default: `MIRROR_FOLDERS`, or all)
        #[arg(long, value_delimiter = ',')]
        folders: Vec<String>,

        /// Mirror directory (default: `MIRROR_PATH`)
        #[arg(long)]
        path: Option<PathBuf>,

        /// UIDs per fetch until the first failed fetch
        #[arg(long)]
        batch_size: Option<usize>,
    },

    /// Show how many messages each folder is missing locally
    Status {
        /// Folders to check (default: `MIRROR_FOLDERS`, or all)
        #[arg(long, value_delimiter = ',')]
        folders: Vec<String>,

        /// Mirror directory (default: `MIRROR_PATH`)
        #[arg(long)]
        path: Option<PathBuf>,
    },

    /// List available IMAP folders
    Folders,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let mut config = MirrorConfig::from_env()?;

    match &args.command {
        Command::Backup {
            folders,
            path,
            batch_size,
        } => {
            override_config(&mut config, folders, path.as_ref());
            if let Some(size) = batch_size {
                config.batch_size = (*size).max(1);
            }
            cmd_backup(&MirrorClient::new(config), &args).await?;
        }
        Command::Status { folders, path } => {
            override_config(&mut config, folders, path.as_ref());
            cmd_status(&MirrorClient::new(config), &args).await?;
        }
        Command::Folders => {
            cmd_folders(&MirrorClient::new(config), &args).await?;
        }
    }

    Ok(())
}

fn override_config(config: &mut MirrorConfig, folders: &[String], path: Option<&PathBuf>) {
    if !folders.is_empty() {
        config.folders = folders.to_vec();
    }
    if let Some(path) = path {
        config.local_path.clone_from(path);
    }
}

async fn cmd_backup(client: &MirrorClient, args: &Args) -> anyhow::Result<()> {
    let backups = client.backup().await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&backups)?);
    } else {
        print_backups(&backups);
    }

    Ok(())
}

async fn cmd_status(client: &MirrorClient, args: &Args) -> anyhow::Result<()> {
    let statuses = client.status().await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&statuses)?);
    } else {
        print_statuses(&statuses);
    }

    Ok(())
}

async fn cmd_folders(client: &MirrorClient, args: &Args) -> anyhow::Result<()> {
    let folders = client.list_folders().await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&folders)?);
    } else {
        for folder in &folders {
            println!("{folder}");
        }
    }

    Ok(())
}

fn print_backups(backups: &[FolderBackup]) {
    if backups.is_empty() {
        println!("No folders mirrored.");
        return;
    }

    println!("{:<30} {:>8} {:>8} {:>8}", "Folder", "New", "Fetched", "Skipped");
    println!("{}", "-".repeat(57));

    for backup in backups {
        println!(
            "{:<30} {:>8} {:>8} {:>8}",
            truncate(&backup.folder, 30),
            backup.report.missing,
            backup.report.fetched,
            backup.report.skipped.len(),
        );
        if let Some(moved_to) = &backup.moved_to {
            println!("  UIDVALIDITY changed, previous copy kept as {moved_to}");
        }
    }
}

fn print_statuses(statuses: &[FolderStatus]) {
    for status in statuses {
        println!("{}: {}", status.folder, status.missing);
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{truncated}...")
    }
}
