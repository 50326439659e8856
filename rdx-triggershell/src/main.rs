mod command;

use anyhow::{Context, Result};
use chrono::Utc;
use colored::Colorize;
use command::{ShellCommand, HELP};
use rustyline::highlight::Highlighter;
use rustyline::Editor;
use rustyline_derive::{Completer, Helper, Hinter, Validator};
use std::borrow::Cow;
use std::env;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::info;
use tracing_subscriber::EnvFilter;
use triggerclock::prelude::*;
use triggerclock::time::shift_by_nanos;
use triggerclock::{ENGINE_NAME, VERSION as LIB_VERSION};

const SHELL_VERSION: &str = env!("CARGO_PKG_VERSION");

/// A custom helper struct for rustyline that enables syntax highlighting.
#[derive(Completer, Helper, Hinter, Validator)]
struct MyHighlighter;

impl Highlighter for MyHighlighter {
    fn highlight<'l>(&self, line: &'l str, _pos: usize) -> Cow<'l, str> {
        if let Some((command, rest)) = line.split_once(' ') {
            let colored_command = command.yellow().bold();
            let colored_rest = rest.yellow();
            Cow::Owned(format!("{} {}", colored_command, colored_rest))
        } else {
            Cow::Owned(line.yellow().bold().to_string())
        }
    }
    fn highlight_char(&self, _line: &str, _pos: usize, _forced: bool) -> bool {
        true
    }
}

fn print_banner() {
    if env::var("QUIET_MODE").is_ok() {
        return;
    }
    let rule = "-".repeat(79);
    println!("{}", rule.dimmed());
    println!("{}", format!("  {} shell", ENGINE_NAME).cyan().bold());
    println!(
        "          Shell   v{:<8} Library   v{:<8}",
        SHELL_VERSION, LIB_VERSION
    );
    let license_blurb = "
    This software is provided 'as is', without warranty of any kind.
    Distributed under the MIT OR Apache-2.0 license. Use at your own risk.
    ";
    println!("{}", license_blurb.dimmed());
    println!("{}", rule.dimmed());
}

/// Prints the scheduler's decisions as they happen.
fn spawn_event_listener(scheduler: &Scheduler) {
    let mut events = scheduler.subscribe_events();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => println!("\n<-- [SCHEDULER EVENT] {:?}", event),
                Err(RecvError::Lagged(skipped)) => {
                    println!("\n<-- [SCHEDULER EVENT] {} events skipped", skipped)
                }
                Err(RecvError::Closed) => break,
            }
        }
    });
}

/// Builds a callback that announces itself with a shell-local handle.
fn announce(handle: usize, trigger: Trigger) -> impl FnOnce() + Send + 'static {
    move || println!("\n<-- [CALLBACK #{}] fired for {:?}", handle, trigger)
}

fn schedule(scheduler: &Scheduler, next_handle: &AtomicUsize, trigger: Trigger) {
    let handle = next_handle.fetch_add(1, Ordering::Relaxed);
    match scheduler.schedule(trigger, announce(handle, trigger)) {
        Ok(()) => println!("--> Scheduled callback #{} for {:?}", handle, trigger),
        Err(err) => println!("--> Error: {}", err),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    print_banner();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let config = match env::args().nth(1) {
        Some(path) => SchedulerConfig::load(path)?,
        None => SchedulerConfig::default(),
    };
    let scheduler = Arc::new(Scheduler::new(config).context("failed to start the scheduler")?);
    spawn_event_listener(&scheduler);
    info!("{} is running. Type 'help' for commands or 'exit' to quit.", ENGINE_NAME.cyan());

    let next_handle = AtomicUsize::new(0);
    let mut rl = Editor::new()?;
    rl.set_helper(Some(MyHighlighter));

    loop {
        let prompt = format!("{}", ">> ".cyan().bold());
        let line = match rl.readline(&prompt) {
            Ok(line) => line,
            Err(_) => {
                println!("Exiting triggershell...");
                break;
            }
        };
        rl.add_history_entry(line.as_str())?;

        let command = match command::parse(&line) {
            Ok(command) => command,
            Err(message) => {
                println!("{}", message);
                continue;
            }
        };

        match command {
            ShellCommand::Immediate => schedule(&scheduler, &next_handle, Trigger::immediate()),
            ShellCommand::At {
                seconds,
                nanoseconds,
            } => schedule(
                &scheduler,
                &next_handle,
                Trigger::absolute(seconds, nanoseconds),
            ),
            ShellCommand::In { millis } => {
                let deadline = shift_by_nanos(Utc::now(), millis.saturating_mul(1_000_000));
                schedule(&scheduler, &next_handle, Trigger::at(deadline))
            }
            ShellCommand::On {
                source,
                origin,
                count,
                time_shift_ns,
            } => schedule(
                &scheduler,
                &next_handle,
                Trigger::event_based(source, origin, count, time_shift_ns),
            ),
            ShellCommand::Event(source) => {
                scheduler.notify_event(source);
                println!(
                    "--> {} occurrence #{}",
                    source,
                    scheduler.occurrence_count(source)
                );
            }
            ShellCommand::Count(source) => println!(
                "--> {}: {} occurrence(s), {} callback(s) waiting",
                source,
                scheduler.occurrence_count(source),
                scheduler.pending_count(source)
            ),
            ShellCommand::Clock => {
                let now = scheduler.to_absolute(Utc::now());
                println!("--> {} s {} ns since 2000-01-01T00:00:00Z", now.seconds, now.nanoseconds);
            }
            ShellCommand::Stop => {
                let stopping = scheduler.clone();
                tokio::task::spawn_blocking(move || stopping.stop()).await?;
                println!("--> Scheduler stopped.");
            }
            ShellCommand::Help => {
                println!("Available commands:");
                for (usage, description) in HELP {
                    println!("  {:<28} - {}", usage, description);
                }
            }
            ShellCommand::Exit => break,
            ShellCommand::Empty => {}
        }
    }

    let stopping = scheduler.clone();
    tokio::task::spawn_blocking(move || stopping.stop()).await?;
    Ok(())
}
