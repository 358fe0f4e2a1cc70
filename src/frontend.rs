use std::io::{self, BufRead, Write};
use std::sync::mpsc::{self, Receiver};
use std::thread;
use std::time::Duration;

use anyhow::Result;
use chrono::Local;
use log::debug;
use rand::seq::SliceRandom;

use crate::acquisition::{AcquisitionPipeline, Session};
use crate::types::PipelineEvent;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Debug, PartialEq)]
enum Command {
    Start { label: Option<String>, secs: Option<u32> },
    Random,
    Cancel,
    Counts,
    Help,
    Quit,
    Unknown(String),
}

fn parse_command(line: &str) -> Command {
    let mut words = line.split_whitespace();
    match words.next() {
        Some("start") => {
            let label = words.next().map(str::to_string);
            let secs = words.next().and_then(|w| w.parse().ok());
            Command::Start { label, secs }
        }
        Some("random") => Command::Random,
        Some("cancel") | Some("stop") => Command::Cancel,
        Some("counts") | Some("status") => Command::Counts,
        Some("help") => Command::Help,
        Some("quit") | Some("exit") => Command::Quit,
        Some(other) => Command::Unknown(other.to_string()),
        None => Command::Help,
    }
}

/// Picks a random class whose combined session count is still below the
/// configured cap; `None` once every class is full.
fn pick_random_class(pipeline: &AcquisitionPipeline) -> Option<String> {
    let cap = pipeline.config().random_session_cap;
    let candidates: Vec<&String> = pipeline
        .config()
        .classes
        .iter()
        .filter(|class| pipeline.next_iter(class) < cap)
        .collect();
    candidates
        .choose(&mut rand::thread_rng())
        .map(|s| s.to_string())
}

enum Mode {
    Idle,
    Recording,
    AwaitSave(Session),
}

/// Console operator loop: forwards commands into the pipeline and prints
/// pipeline events as they arrive. Stdin is read on its own thread so event
/// printing never blocks on the operator.
pub fn run(mut pipeline: AcquisitionPipeline, events: Receiver<PipelineEvent>) -> Result<()> {
    let (line_tx, line_rx) = mpsc::channel::<String>();
    thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if line_tx.send(line).is_err() {
                break;
            }
        }
        debug!("stdin closed");
    });

    println!("neurotag ready; type `help` for commands");
    print_counts(&pipeline);
    let mut mode = Mode::Idle;
    let mut active_label = String::new();

    loop {
        for event in events.try_iter() {
            print_event(&event, &active_label);
        }

        if matches!(mode, Mode::Recording) && pipeline.session_finished() {
            if let Some(session) = pipeline.finish_session() {
                println!(
                    "recording finished: {} samples for {:?}; save? [y/n]",
                    session.len(),
                    session.label
                );
                mode = Mode::AwaitSave(session);
            } else {
                mode = Mode::Idle;
            }
        }

        match line_rx.try_recv() {
            Ok(line) => {
                mode = match mode {
                    Mode::AwaitSave(session) => handle_save_answer(&mut pipeline, session, &line),
                    current => {
                        match handle_command(&mut pipeline, parse_command(&line), &mut active_label)
                        {
                            Outcome::Continue => current,
                            Outcome::Started => Mode::Recording,
                            Outcome::Quit => break,
                        }
                    }
                };
            }
            Err(mpsc::TryRecvError::Empty) => {}
            Err(mpsc::TryRecvError::Disconnected) => break,
        }

        thread::sleep(POLL_INTERVAL);
    }

    pipeline.shutdown();
    Ok(())
}

enum Outcome {
    Continue,
    Started,
    Quit,
}

fn handle_command(
    pipeline: &mut AcquisitionPipeline,
    command: Command,
    active_label: &mut String,
) -> Outcome {
    match command {
        Command::Start { label, secs } => {
            let label = label.unwrap_or_else(|| {
                pipeline
                    .config()
                    .classes
                    .first()
                    .cloned()
                    .unwrap_or_default()
            });
            start_with_countdown(pipeline, &label, secs, active_label)
        }
        Command::Random => match pick_random_class(pipeline) {
            Some(label) => start_with_countdown(pipeline, &label, None, active_label),
            None => {
                println!(
                    "every class already has {} sessions",
                    pipeline.config().random_session_cap
                );
                Outcome::Continue
            }
        },
        Command::Cancel => {
            pipeline.cancel_session();
            Outcome::Continue
        }
        Command::Counts => {
            print_counts(pipeline);
            println!(
                "recording: {}, offline: {}",
                pipeline.is_recording(),
                pipeline.is_offline()
            );
            Outcome::Continue
        }
        Command::Help => {
            println!("commands: start [class] [secs] | random | cancel | counts | quit");
            Outcome::Continue
        }
        Command::Quit => Outcome::Quit,
        Command::Unknown(word) => {
            println!("unknown command {word:?}; type `help`");
            Outcome::Continue
        }
    }
}

fn start_with_countdown(
    pipeline: &mut AcquisitionPipeline,
    label: &str,
    secs: Option<u32>,
    active_label: &mut String,
) -> Outcome {
    let secs = secs.unwrap_or(pipeline.config().default_session_secs);
    for n in (1..=3u8).rev() {
        print!("{n}.. ");
        let _ = io::stdout().flush();
        thread::sleep(Duration::from_secs(1));
    }
    println!();
    match pipeline.start_session(label, secs) {
        Ok(()) => {
            *active_label = label.to_string();
            println!("recording {label:?} for {secs}s");
            Outcome::Started
        }
        Err(err) => {
            println!("cannot start: {err}");
            Outcome::Continue
        }
    }
}

fn handle_save_answer(pipeline: &mut AcquisitionPipeline, session: Session, line: &str) -> Mode {
    match line.trim() {
        "y" | "yes" => match pipeline.save_session(&session) {
            Ok(()) => Mode::Idle,
            Err(_) => {
                // data is still in memory; let the operator retry or discard
                println!("save failed; retry? [y/n]");
                Mode::AwaitSave(session)
            }
        },
        "n" | "no" => {
            pipeline.discard_session(session);
            Mode::Idle
        }
        _ => {
            println!("save? [y/n]");
            Mode::AwaitSave(session)
        }
    }
}

fn print_event(event: &PipelineEvent, active_label: &str) {
    match event {
        PipelineEvent::Predicted(label) => {
            println!(
                "{}\t{}\t{}",
                Local::now().format("%H:%M:%S%.3f"),
                active_label,
                label
            );
        }
        PipelineEvent::HealthChanged(ok) => {
            println!("data source {}", if *ok { "ok" } else { "NOT ok" });
        }
        PipelineEvent::RecordingStatus(on) => {
            debug!("recording status: {on}");
        }
        PipelineEvent::Message(text) => println!("{text}"),
    }
}

fn print_counts(pipeline: &AcquisitionPipeline) {
    for class in &pipeline.config().classes {
        let count = pipeline
            .class_counts()
            .get(class)
            .copied()
            .unwrap_or_default();
        println!("  {class}: {} + {}", count.old, count.new);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_operator_commands() {
        assert_eq!(
            parse_command("start left 3"),
            Command::Start {
                label: Some("left".into()),
                secs: Some(3)
            }
        );
        assert_eq!(
            parse_command("start"),
            Command::Start {
                label: None,
                secs: None
            }
        );
        assert_eq!(parse_command("random"), Command::Random);
        assert_eq!(parse_command("stop"), Command::Cancel);
        assert_eq!(parse_command("status"), Command::Counts);
        assert_eq!(parse_command("exit"), Command::Quit);
        assert_eq!(parse_command(""), Command::Help);
        assert_eq!(parse_command("bogus"), Command::Unknown("bogus".into()));
    }
}
