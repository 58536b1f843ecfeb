//! Keyboard thread
//!
//! crossterm events are read on their own thread and forwarded to the
//! dashboard loop. A second Ctrl-C exits from this thread directly, so a
//! stuck loop can always be killed.

use crate::term;
use crossbeam::channel::Sender;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use pipsqueak::dash::Key;
use std::thread;

/// Exit status after a forced quit, as for SIGINT.
pub const FORCED_EXIT_CODE: i32 = 130;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Key(Key),
    Resize(u16, u16),
}

pub fn map_key(ev: &KeyEvent) -> Option<Key> {
    if ev.kind == KeyEventKind::Release {
        return None;
    }
    if ev.modifiers.contains(KeyModifiers::CONTROL) {
        return match ev.code {
            KeyCode::Char('c') | KeyCode::Char('C') => Some(Key::Interrupt),
            _ => None,
        };
    }
    Some(match ev.code {
        KeyCode::Up => Key::Up,
        KeyCode::Down => Key::Down,
        KeyCode::PageUp => Key::PageUp,
        KeyCode::PageDown => Key::PageDown,
        KeyCode::Home => Key::Home,
        KeyCode::End => Key::End,
        KeyCode::Enter => Key::Enter,
        KeyCode::Esc => Key::Esc,
        KeyCode::Backspace => Key::Backspace,
        KeyCode::Delete => Key::Delete,
        KeyCode::Char(c) => Key::Char(c),
        _ => return None,
    })
}

pub fn map_event(ev: &Event) -> Option<Control> {
    match ev {
        Event::Key(k) => map_key(k).map(Control::Key),
        Event::Resize(cols, rows) => Some(Control::Resize(*cols, *rows)),
        _ => None,
    }
}

pub fn spawn(tx: Sender<Control>) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let mut interrupts = 0;
        loop {
            let ev = match event::read() {
                Ok(ev) => ev,
                Err(e) => {
                    log::error!("keyboard input failed: {}", e);
                    break;
                }
            };
            let Some(ctl) = map_event(&ev) else {
                continue;
            };
            if ctl == Control::Key(Key::Interrupt) {
                interrupts += 1;
                if interrupts > 1 {
                    log::warn!("forced exit");
                    term::restore();
                    std::process::exit(FORCED_EXIT_CODE);
                }
            }
            if tx.send(ctl).is_err() {
                break;
            }
        }
    })
}
