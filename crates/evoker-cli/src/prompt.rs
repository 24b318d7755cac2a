//! Interactive gates between generations.
//!
//! Both prompts read single key presses through `crossterm` so they work
//! inside the raw-mode-free terminal the loop otherwise runs in. The
//! resume prompt is bounded: an operator who walks away gets the safe
//! default (resume) after the timeout.

use std::time::{Duration, Instant};

use anyhow::Context as _;
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind},
    terminal,
};
use evoker_scheduler::{PauseGate, SchedulerError};
use tracing::warn;

/// Asks whether to resume the saved run, defaulting to yes on timeout.
pub fn confirm_resume(loop_ix: u32, timeout: Duration) -> anyhow::Result<bool> {
    eprintln!(
        "Found a saved run after loop {loop_ix}. Resume? [Y/n] \
         (resuming in {}s)",
        timeout.as_secs()
    );
    let answer = match wait_for_key(Some(timeout))? {
        Some(KeyCode::Char('n' | 'N')) => false,
        Some(_) => true,
        None => {
            eprintln!("No answer, resuming.");
            true
        }
    };
    Ok(answer)
}

/// Gate that holds the loop at a generation boundary until a key press.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyPauseGate;

impl PauseGate for KeyPauseGate {
    fn wait(&mut self, loop_ix: u32) -> Result<(), SchedulerError> {
        eprintln!("Paused after loop {loop_ix}; press any key to continue.");
        if let Err(err) = wait_for_key(None) {
            // Without a usable terminal the gate cannot hold the loop.
            warn!(%err, "pause gate unavailable, continuing");
        }
        Ok(())
    }
}

fn wait_for_key(timeout: Option<Duration>) -> anyhow::Result<Option<KeyCode>> {
    terminal::enable_raw_mode().context("Failed to enter raw terminal mode")?;
    let key = read_key(timeout);
    terminal::disable_raw_mode().context("Failed to leave raw terminal mode")?;
    key
}

fn read_key(timeout: Option<Duration>) -> anyhow::Result<Option<KeyCode>> {
    let deadline = timeout.map(|timeout| Instant::now() + timeout);
    loop {
        let wait = match deadline {
            Some(deadline) => match deadline.checked_duration_since(Instant::now()) {
                Some(remaining) => remaining,
                None => return Ok(None),
            },
            None => Duration::from_secs(60),
        };
        if !event::poll(wait).context("Failed to poll terminal events")? {
            continue;
        }
        if let Event::Key(key) = event::read().context("Failed to read terminal event")?
            && key.kind == KeyEventKind::Press
        {
            return Ok(Some(key.code));
        }
    }
}
