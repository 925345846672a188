use std::{fmt::Write as _, time::Duration};

use chrono::{DateTime, Local, Utc};
use console::{style, StyledObject};
use hop_core::models::{eta_secs, JobStatus, ProgressEvent, TransferStats};
use indicatif::{HumanBytes, ProgressBar, ProgressStyle};

const BAR_TEMPLATE: &str = "{spinner:.green} [{bar:40.cyan/blue}] {pos:>3}% {msg}";

pub fn progress_bar() -> ProgressBar {
    let bar = ProgressBar::new(100);
    let bar_style = ProgressStyle::with_template(BAR_TEMPLATE)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ");
    bar.set_style(bar_style);
    bar.enable_steady_tick(Duration::from_millis(120));
    bar
}

pub fn update_bar(bar: &ProgressBar, event: &ProgressEvent) {
    bar.set_position(u64::from(event.progress));

    let mut msg = format!("{} {}", status(event.status), HumanBytes(event.transferred));
    if event.total > 0 {
        let _ = write!(msg, " / {}", HumanBytes(event.total));
    }
    if event.speed > 0.0 {
        let _ = write!(msg, " {}/s", HumanBytes(event.speed as u64));
        if let Some(eta) = eta_secs(event.total, event.transferred, event.speed) {
            let _ = write!(msg, " eta {}", duration((eta * 1000.0) as i64));
        }
    }
    bar.set_message(msg);
}

pub fn status(status: JobStatus) -> StyledObject<&'static str> {
    let s = style(status.as_str());
    match status {
        JobStatus::Queued => s.dim(),
        JobStatus::Running => s.cyan(),
        JobStatus::Completed => s.green(),
        JobStatus::Failed => s.red(),
        JobStatus::Cancelled => s.yellow(),
    }
}

/// Human-readable milliseconds: `850ms`, `4.2s`, `3m 07s`, `1h 02m`.
pub fn duration(ms: i64) -> String {
    let ms = ms.max(0);
    if ms < 1000 {
        return format!("{ms}ms");
    }
    let secs = ms / 1000;
    if secs < 60 {
        return format!("{:.1}s", ms as f64 / 1000.0);
    }
    if secs < 3600 {
        return format!("{}m {:02}s", secs / 60, secs % 60);
    }
    format!("{}h {:02}m", secs / 3600, (secs % 3600) / 60)
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string()
}

/// One line printed when `hop transfer` returns.
pub fn summary(stats: &TransferStats) -> String {
    let mut line = format!("{} {}", status(stats.status), style(&stats.file_name).bold());
    match stats.status {
        JobStatus::Completed => {
            let _ = write!(line, " ({}", HumanBytes(stats.file_size));
            if let Some(ms) = stats.elapsed_ms {
                let _ = write!(line, " in {}", duration(ms));
            }
            line.push(')');
        }
        JobStatus::Failed => {
            if let Some(err) = &stats.error {
                let _ = write!(line, ": {}", style(err).red());
            }
        }
        _ => {
            let _ = write!(line, " at {}%", stats.progress);
        }
    }
    line
}

pub fn details(stats: &TransferStats) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "id           {}", stats.id);
    let _ = writeln!(out, "status       {}", status(stats.status));
    let _ = writeln!(out, "file         {}", stats.file_name);
    let _ = writeln!(out, "from         {}:{}", stats.source_account_id, stats.source_path);
    let _ = writeln!(out, "to           {}:{}", stats.destination_account_id, stats.destination_path);
    let _ = writeln!(
        out,
        "progress     {}% ({} / {})",
        stats.progress,
        HumanBytes(stats.transferred_bytes),
        HumanBytes(stats.file_size)
    );
    if stats.transfer_speed > 0.0 {
        let _ = writeln!(out, "speed        {}/s", HumanBytes(stats.transfer_speed as u64));
    }
    let _ = writeln!(out, "created      {}", timestamp(stats.created_at));
    if let Some(at) = stats.started_at {
        let _ = writeln!(out, "started      {}", timestamp(at));
    }
    if let Some(at) = stats.completed_at {
        let _ = writeln!(out, "finished     {}", timestamp(at));
    }
    if let Some(ms) = stats.elapsed_ms {
        let _ = writeln!(out, "elapsed      {}", duration(ms));
    }
    if let Some(eta) = stats.eta_secs {
        let _ = writeln!(out, "eta          {}", duration((eta * 1000.0) as i64));
    }
    if let Some(err) = &stats.error {
        let _ = writeln!(out, "error        {}", style(err).red());
    }
    out
}

pub fn history_line(stats: &TransferStats) -> String {
    format!(
        "{}  {}  {:<9}  {:>3}%  {:>10}  {}",
        style(&stats.id).dim(),
        timestamp(stats.created_at),
        status(stats.status),
        stats.progress,
        HumanBytes(stats.file_size).to_string(),
        stats.file_name,
    )
}
