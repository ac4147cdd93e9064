//! Console prompts: colored status lines and the final key-press wait.

use std::io::{self, Write};

use anyhow::Result;
use crossterm::event::{self, Event, KeyEventKind};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use is_terminal::IsTerminal;
use owo_colors::OwoColorize;

pub const EXIT_PROMPT: &str = "Hit any key to exit...";

pub fn print_error(err: &anyhow::Error) {
    eprintln!("{} {:#}", "error:".red(), err);
}

/// Print `prompt` and block until one key is pressed. Returns immediately
/// when stdin is not a terminal.
pub fn wait_for_key(prompt: &str) -> Result<()> {
    println!("{}", prompt.yellow());
    io::stdout().flush()?;
    if !io::stdin().is_terminal() {
        return Ok(());
    }

    enable_raw_mode()?;
    let pressed = loop {
        match event::read() {
            Ok(Event::Key(key)) if key.kind == KeyEventKind::Press => break Ok(()),
            Ok(_) => continue,
            Err(e) => break Err(e),
        }
    };
    disable_raw_mode()?;
    Ok(pressed?)
}
