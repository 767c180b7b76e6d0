//! Password entry without echo.

use std::io::{self, BufRead, IsTerminal, Write};

use anyhow::{anyhow, Context, Result};
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    terminal,
};

/// What a key press does to the password being typed.
#[derive(Debug, PartialEq, Eq)]
enum Step {
    Continue,
    Done,
    Cancelled,
}

fn apply_key(buffer: &mut String, key: KeyEvent) -> Step {
    if key.kind != KeyEventKind::Press {
        return Step::Continue;
    }
    match key.code {
        KeyCode::Enter => Step::Done,
        KeyCode::Esc => Step::Cancelled,
        KeyCode::Char('c' | 'd') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            Step::Cancelled
        }
        KeyCode::Char(c) => {
            buffer.push(c);
            Step::Continue
        }
        KeyCode::Backspace => {
            buffer.pop();
            Step::Continue
        }
        _ => Step::Continue,
    }
}

fn read_hidden() -> Result<String> {
    terminal::enable_raw_mode().context("failed to switch terminal to raw mode")?;
    let mut buffer = String::new();
    let outcome = loop {
        match event::read() {
            Ok(Event::Key(key)) => match apply_key(&mut buffer, key) {
                Step::Continue => {}
                Step::Done => break Ok(()),
                Step::Cancelled => break Err(anyhow!("password entry cancelled")),
            },
            Ok(Event::Paste(text)) => buffer.push_str(&text),
            Ok(_) => {}
            Err(err) => break Err(anyhow::Error::new(err).context("failed to read password")),
        }
    };
    terminal::disable_raw_mode().context("failed to restore terminal")?;
    println!();
    outcome.map(|()| buffer)
}

fn read_piped() -> Result<String> {
    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .context("failed to read password")?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

/// Prompts on stdout and reads a password from stdin. Typed characters are not echoed when
/// stdin is a terminal; piped input is read as one line.
pub async fn prompt(label: &str) -> Result<String> {
    print!("{label}");
    io::stdout().flush()?;

    let password = tokio::task::spawn_blocking(|| {
        if io::stdin().is_terminal() {
            read_hidden()
        } else {
            read_piped()
        }
    })
    .await
    .context("password prompt task failed")??;

    if password.is_empty() {
        return Err(anyhow!("password must not be empty"));
    }
    Ok(password)
}
