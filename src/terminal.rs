use std::io::{self, Write};
use std::sync::Arc;

use crossterm::{
    cursor::{self, Hide, MoveTo, Show},
    execute, queue,
    style::Print,
    terminal::{Clear, ClearType},
    tty::IsTty,
};
use parking_lot::Mutex;
use thiserror::Error;

use crate::display::Display;

#[derive(Error, Debug)]
pub enum TerminalError {
    #[error("failed to hide cursor: {0}")]
    HideCursor(#[source] io::Error),

    #[error("failed to query cursor position: {0}")]
    CursorPosition(#[source] io::Error),

    #[error("failed to reserve display rows: {0}")]
    Reserve(#[source] io::Error),
}

/// Writer shared by every row of the terminal display.
pub type SharedWriter = Arc<Mutex<Box<dyn Write + Send>>>;

pub fn stdout_writer() -> SharedWriter {
    Arc::new(Mutex::new(Box::new(io::stdout())))
}

/// RAII guard that hides the cursor while counters are drawn.
///
/// When dropped (even on panic), shows the cursor again.
pub struct CursorGuard {
    _private: (),
}

impl CursorGuard {
    pub fn new() -> Result<Self, TerminalError> {
        execute!(io::stdout(), Hide).map_err(TerminalError::HideCursor)?;
        Ok(Self { _private: () })
    }
}

impl Drop for CursorGuard {
    fn drop(&mut self) {
        let _ = execute!(io::stdout(), Show, Print("\n"));
    }
}

/// Scroll the terminal so `rows` blank lines sit below the prompt and return
/// the absolute row of the first one.
///
/// When stdout is not a terminal nothing is written and rows start at 0, so
/// redirected output still gets each run's row escape sequences.
pub fn reserve_rows(rows: u16) -> Result<u16, TerminalError> {
    let mut out = io::stdout();
    let is_tty = out.is_tty();
    reserve_rows_on(&mut out, rows, is_tty, cursor::position)
}

fn reserve_rows_on<W, P>(
    out: &mut W,
    rows: u16,
    is_tty: bool,
    position: P,
) -> Result<u16, TerminalError>
where
    W: Write,
    P: FnOnce() -> io::Result<(u16, u16)>,
{
    if !is_tty {
        tracing::debug!(rows, "stdout is not a terminal, drawing from row 0");
        return Ok(0);
    }
    for _ in 0..rows {
        queue!(out, Print("\n")).map_err(TerminalError::Reserve)?;
    }
    out.flush().map_err(TerminalError::Reserve)?;
    let (_, bottom) = position().map_err(TerminalError::CursorPosition)?;
    Ok(bottom.saturating_sub(rows))
}

/// One terminal row rendering `label: count`.
pub struct TerminalDisplay {
    row: u16,
    label: String,
    out: SharedWriter,
}

impl TerminalDisplay {
    pub fn new(row: u16, label: impl Into<String>, out: SharedWriter) -> Self {
        Self {
            row,
            label: label.into(),
            out,
        }
    }

    fn draw(&self, text: &str) -> io::Result<()> {
        let mut out = self.out.lock();
        queue!(
            out,
            MoveTo(0, self.row),
            Clear(ClearType::CurrentLine),
            Print(format!("{}: {}", self.label, text))
        )?;
        out.flush()
    }
}

impl Display for TerminalDisplay {
    fn set_text(&self, text: &str) {
        if let Err(e) = self.draw(text) {
            tracing::debug!(row = self.row, error = %e, "terminal write failed");
        }
    }
}
