use anyhow::Context;
use colored::Colorize;
use session_engine::{ReloadOutcome, SessionConfig, env_opt_bool, open_session, telemetry};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env is fine; variables may come from the shell.
    let _ = dotenvy::dotenv();

    let engine_level = telemetry::level_from_env().context("reading WEBDIFF_LOG")?;
    tracing_subscriber::registry()
        .with(telemetry::env_filter(engine_level))
        .with(telemetry::host_layer())
        .with(telemetry::layer())
        .init();

    let cfg = SessionConfig::from_env().context("reading WEBDIFF_* configuration")?;
    let auto_reload = env_opt_bool("WEBDIFF_AUTO_RELOAD")?.unwrap_or(false);

    let session = open_session(cfg).await.context("opening diff session")?;
    println!(
        "{} {} ({} files, args: {})",
        "Viewing".green().bold(),
        session.label().as_str().bold(),
        session.file_count(),
        display_args(&session.current_args()),
    );

    if !session.start_watching() {
        println!("{}", "Change watching is disabled on the server.".yellow());
    }

    let mut updates = session.status().subscribe();
    let mut reported_error: Option<String> = None;
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let status = updates.borrow_and_update().clone();
                if status.last_error != reported_error {
                    if let Some(error) = &status.last_error {
                        println!("{}", error.red());
                    }
                    reported_error = status.last_error.clone();
                }
                if !status.show_changed_banner() {
                    continue;
                }

                println!("{}", "Changes detected on disk.".yellow().bold());
                if !auto_reload {
                    continue;
                }
                match session.reload(None).await {
                    ReloadOutcome::Reloaded => println!(
                        "{} {} files",
                        "Reloaded:".green(),
                        session.file_count()
                    ),
                    ReloadOutcome::AlreadyInProgress => {}
                    ReloadOutcome::Failed { message } => warn!(%message, "auto reload failed"),
                }
            }
        }
    }

    session.stop_watching();
    info!("shutting down");
    Ok(())
}

fn display_args(args: &[String]) -> String {
    if args.is_empty() {
        "working changes".to_string()
    } else {
        args.join(" ")
    }
}

async fn shutdown_signal() {
    if let Err(e) = signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
