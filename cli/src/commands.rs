use std::{process::ExitCode, str::FromStr, time::Duration};

use anyhow::{Context, Result};
use console::style;
use daemon::{providers::ProviderRegistry, Dispatcher};
use hop_core::models::{JobStatus, TransferRequest};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use crate::{config::Config, render};

/// How long to wait for the engine to finish bookkeeping after the final event.
const SETTLE_TIMEOUT: Duration = Duration::from_secs(10);

/// `ACCOUNT:PATH` on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub account: String,
    pub path: String,
}

impl FromStr for Endpoint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (account, path) = s
            .split_once(':')
            .ok_or_else(|| format!("expected ACCOUNT:PATH, got {s:?}"))?;
        if account.is_empty() {
            return Err(format!("missing account in {s:?}"));
        }
        if path.is_empty() {
            return Err(format!("missing path in {s:?}"));
        }
        Ok(Endpoint { account: account.to_string(), path: path.to_string() })
    }
}

pub async fn transfer(
    dispatcher: &Dispatcher,
    user: String,
    from: Endpoint,
    to: Endpoint,
    name: Option<String>,
) -> Result<ExitCode> {
    // Subscribe first so no event of this job can slip past.
    let mut events = dispatcher.subscribe();
    let ticket = dispatcher
        .create_transfer(TransferRequest {
            user_id: user.clone(),
            source_account_id: from.account,
            destination_account_id: to.account,
            source_path: from.path,
            destination_path: to.path,
            file_name: name,
        })
        .await?;
    let id = ticket.transfer_id;

    let bar = render::progress_bar();
    bar.set_message(format!("{} queued", style(&id).dim()));

    let mut interrupted = false;
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c(), if !interrupted => {
                signal.context("listening for ctrl-c")?;
                interrupted = true;
                bar.set_message("cancelling");
                if let Err(err) = dispatcher.cancel_transfer(&id, &user).await {
                    warn!(job_id = %id, %err, "cancel failed");
                }
            }
            event = events.recv() => match event {
                Ok(event) if event.job_id == id => {
                    render::update_bar(&bar, &event);
                    if event.status.is_terminal() {
                        break;
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => debug!(skipped, "progress stream lagged"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    settle(dispatcher).await;
    bar.finish_and_clear();

    let stats = dispatcher.get_transfer_status(&id, &user).await?;
    println!("{}", render::summary(&stats));
    Ok(match stats.status {
        JobStatus::Completed => ExitCode::SUCCESS,
        _ => ExitCode::FAILURE,
    })
}

/// Wait for the finished job to leave the active set, which happens only
/// after its final state is written.
async fn settle(dispatcher: &Dispatcher) {
    let idle = async {
        while dispatcher.get_queue_status().total > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    };
    if tokio::time::timeout(SETTLE_TIMEOUT, idle).await.is_err() {
        warn!("engine still busy, stored history may lag");
    }
}

pub async fn status(dispatcher: &Dispatcher, id: &str, user: &str, json: bool) -> Result<()> {
    let stats = dispatcher.get_transfer_status(id, user).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        print!("{}", render::details(&stats));
    }
    Ok(())
}

pub async fn history(dispatcher: &Dispatcher, user: &str) -> Result<()> {
    let transfers = dispatcher.list_transfers(user).await?;
    if transfers.is_empty() {
        println!("{}", style("no transfers").dim());
        return Ok(());
    }
    for stats in &transfers {
        println!("{}", render::history_line(stats));
    }
    Ok(())
}

pub fn accounts(config: &Config, user: Option<&str>) {
    let registry = ProviderRegistry::with_defaults();
    let supported = registry.kinds();

    let mut shown = 0;
    for account in config.accounts.iter().filter(|a| user.map_or(true, |u| a.user_id == u)) {
        let provider = if supported.contains(&account.provider.as_str()) {
            style(account.provider.as_str()).green()
        } else {
            style(account.provider.as_str()).red()
        };
        println!("{:<20} {:<10} {}", style(&account.id).bold(), provider, style(&account.user_id).dim());
        shown += 1;
    }
    if shown == 0 {
        println!("{}", style("no accounts configured").dim());
    }
}
