//! Rotor demo binary - a delay-counter driven from stdin.
//!
//! Reads one command per line (`inc`, `dec`, `reset`, `delay [ms]`,
//! `cancel`, `quit`), injects the matching action into the runtime loop, and
//! prints the state after every dispatch cycle. The count survives restarts
//! through the file-backed store capability; delayed increments arrive
//! through the tokio timer capability.

mod app;
mod store;

use std::env;
use std::io::{self, BufRead};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use rotor_engine::{Action, ActionSender, App, Capabilities, Timer, TokioTimer};

use crate::app::{CounterState, Payload, counter_table};
use crate::store::{JsonStore, Store};

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("warn"))
        .unwrap_or_else(|_| EnvFilter::default());
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(io::stderr)
        .init();
}

fn render(state: &CounterState) {
    println!("count: {} (delayed: {})", state.count, state.delayed);
}

enum Input {
    Act(Action<Payload>),
    Quit,
}

fn parse_line(line: &str) -> Option<Input> {
    let mut words = line.split_whitespace();
    let command = words.next()?;
    let input = match command {
        "inc" | "+" => Input::Act(Action::new("inc", Payload::None)),
        "dec" | "-" => Input::Act(Action::new("dec", Payload::None)),
        "reset" => Input::Act(Action::new("reset", Payload::None)),
        "delay" => {
            let millis = words.next().and_then(|raw| raw.parse().ok()).unwrap_or(1000);
            Input::Act(Action::new(
                "delay",
                Payload::After(Duration::from_millis(millis)),
            ))
        }
        "cancel" => Input::Act(Action::new("cancel-delays", Payload::None)),
        "quit" | "exit" => Input::Quit,
        _ => return None,
    };
    Some(input)
}

fn read_stdin(sender: &ActionSender<Payload>) {
    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match parse_line(trimmed) {
            Some(Input::Act(action)) => sender.send(action),
            Some(Input::Quit) => {
                sender.stop();
                return;
            }
            None => eprintln!("unrecognized command: {trimmed}"),
        }
    }
    sender.stop();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let path = env::args()
        .nth(1)
        .map_or_else(|| PathBuf::from("rotor-counter.json"), PathBuf::from);
    tracing::info!(path = %path.display(), "using store file");

    let capabilities = Capabilities::new()
        .with::<dyn Timer>(Arc::new(TokioTimer))
        .with::<dyn Store>(Arc::new(JsonStore::new(path)));

    let table = counter_table().context("assembling the handler table")?;
    let app = App::new(table, capabilities, CounterState::default(), render)
        .context("capability record does not cover the handler table")?
        .with_boot_effects(vec![store::load()]);

    let sender = app.sender();
    thread::spawn(move || read_stdin(&sender));

    let final_state = app.run().await;
    println!("final count: {}", final_state.count);
    Ok(())
}
