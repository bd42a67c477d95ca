//! Non-blocking key polling while the terminal waits on hardware.

use std::io::stdout;
use std::time::Duration;

use crossterm::{
    cursor::{Hide, MoveToColumn, Show},
    event::{poll, read, Event, KeyCode, KeyEvent, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode},
    Result,
};

/// Keys the waiting loops care about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum KeyPress {
    /// `ESC`: give up waiting and pick something else.
    Escape,
    /// `Ctrl+C`, which raw mode turns into a plain key event.
    Interrupt,
    Other,
}

/// Wait at most `timeout` for a key press.
pub(crate) fn poll_key(timeout: Duration) -> Result<Option<KeyPress>> {
    enable_raw_mode()?;
    execute!(stdout(), Hide)?;
    let ready = poll(timeout);
    // Leave raw mode even when polling failed.
    execute!(stdout(), MoveToColumn(0), Show)?;
    disable_raw_mode()?;

    if !ready? {
        return Ok(None);
    }

    // It's guaranteed that read() wont block if `poll` returns `Ok(true)`
    let key = match read()? {
        Event::Key(KeyEvent {
            code: KeyCode::Esc, ..
        }) => KeyPress::Escape,
        Event::Key(KeyEvent {
            modifiers: KeyModifiers::CONTROL,
            code: KeyCode::Char('c'),
        }) => KeyPress::Interrupt,
        _ => KeyPress::Other,
    };
    Ok(Some(key))
}
