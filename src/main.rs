//! Mailsift command line.
//!
//! Usage:
//!   mailsift sync-account <ACCOUNT_ID> --secret <SECRET>
//!   mailsift sync-all --secret <SECRET>
//!   mailsift digest <USER_ID>
//!   mailsift serve
//!
//! Exit codes: 0 on success, 1 on error or when any sync report failed.

use clap::{Parser, Subcommand};
use mailsift::config::AppConfig;
use mailsift::Engine;
use serde::Serialize;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "mailsift", about = "Incremental mail sync, categorization and weekly digests")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Sync one account and print its report
    SyncAccount {
        account_id: i64,
        #[arg(long, env = "MAILSIFT_SCHEDULER_SECRET", hide_env_values = true)]
        secret: String,
    },
    /// Sync every active account concurrently
    SyncAll {
        #[arg(long, env = "MAILSIFT_SCHEDULER_SECRET", hide_env_values = true)]
        secret: String,
    },
    /// Compile and send the weekly digests of one user
    Digest { user_id: String },
    /// Run the background scheduler until Ctrl-C
    Serve,
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => log::error!("Failed to serialize output: {}", e),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("FATAL: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let engine = match Engine::from_config(&config) {
        Ok(engine) => engine,
        Err(e) => {
            log::error!("Failed to initialize: {}", e);
            eprintln!("FATAL: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        Command::SyncAccount { account_id, secret } => match engine.sync_account(&secret, account_id).await {
            Ok(report) => {
                print_json(&report);
                if report.success {
                    ExitCode::SUCCESS
                } else {
                    ExitCode::FAILURE
                }
            }
            Err(e) => {
                eprintln!("Sync failed: {}", e);
                ExitCode::FAILURE
            }
        },
        Command::SyncAll { secret } => match engine.sync_all(&secret).await {
            Ok(reports) => {
                print_json(&reports);
                if reports.iter().all(|r| r.success) {
                    ExitCode::SUCCESS
                } else {
                    ExitCode::FAILURE
                }
            }
            Err(e) => {
                eprintln!("Sync failed: {}", e);
                ExitCode::FAILURE
            }
        },
        Command::Digest { user_id } => match engine.compile_digests(&user_id).await {
            Ok(digests) => {
                print_json(&digests);
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("Digest failed: {}", e);
                ExitCode::FAILURE
            }
        },
        Command::Serve => {
            let scheduler = engine.scheduler();
            if let Err(e) = scheduler.start().await {
                eprintln!("Failed to start scheduler: {}", e);
                return ExitCode::FAILURE;
            }

            if let Err(e) = tokio::signal::ctrl_c().await {
                log::error!("Failed to listen for Ctrl-C: {}", e);
            }
            log::info!("Shutting down");
            if let Err(e) = scheduler.stop() {
                log::error!("Failed to stop scheduler: {}", e);
            }
            ExitCode::SUCCESS
        }
    }
}
