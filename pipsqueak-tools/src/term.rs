//! crossterm implementation of the dashboard `Renderer`

use crossterm::style::{
    Attribute, Color, Print, ResetColor, SetAttribute, SetBackgroundColor, SetForegroundColor,
};
use crossterm::{cursor, terminal, ExecutableCommand, QueueableCommand};
use pipsqueak::dash::{Renderer, Span, Style, Tone};
use std::io::{self, Write};

pub struct Term {
    stdout: io::Stdout,
    cols: u16,
    rows: u16,
}

impl Term {
    pub fn setup() -> io::Result<Self> {
        let mut stdout = io::stdout();
        terminal::enable_raw_mode()?;
        stdout.execute(terminal::EnterAlternateScreen)?;
        stdout.execute(cursor::Hide)?;
        stdout.execute(terminal::Clear(terminal::ClearType::All))?;
        let (cols, rows) = terminal::size()?;
        Ok(Self { stdout, cols, rows })
    }

    pub fn teardown(&mut self) {
        restore();
    }

    /// Picks up a new terminal size.
    pub fn set_size(&mut self, cols: u16, rows: u16) -> io::Result<()> {
        self.cols = cols;
        self.rows = rows;
        self.stdout.queue(terminal::Clear(terminal::ClearType::All))?;
        Ok(())
    }

    fn apply(&mut self, style: Style) -> io::Result<()> {
        self.stdout.queue(SetAttribute(Attribute::Reset))?;
        self.stdout.queue(ResetColor)?;
        if style.bold {
            self.stdout.queue(SetAttribute(Attribute::Bold))?;
        }
        if style.reverse {
            self.stdout.queue(SetAttribute(Attribute::Reverse))?;
        }
        match style.tone {
            Tone::Plain => {}
            Tone::Bad => {
                self.stdout.queue(SetForegroundColor(Color::Red))?;
            }
            Tone::Fair | Tone::Bright => {
                self.stdout.queue(SetForegroundColor(Color::Yellow))?;
            }
            Tone::Good => {
                self.stdout.queue(SetForegroundColor(Color::Green))?;
            }
            Tone::Marker => {
                self.stdout.queue(SetForegroundColor(Color::White))?;
                self.stdout.queue(SetBackgroundColor(Color::Blue))?;
            }
        }
        Ok(())
    }
}

/// Puts the terminal back in cooked mode. Safe to call more than once.
pub fn restore() {
    let mut stdout = io::stdout();
    let _ = stdout.execute(SetAttribute(Attribute::Reset));
    let _ = stdout.execute(cursor::Show);
    let _ = stdout.execute(terminal::LeaveAlternateScreen);
    let _ = terminal::disable_raw_mode();
    let _ = stdout.flush();
}

/// Restores the terminal before the default panic message is printed.
pub fn install_panic_hook() {
    let original_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        restore();
        original_hook(panic_info);
    }));
}

impl Renderer for Term {
    fn size(&self) -> (usize, usize) {
        (self.cols as usize, self.rows as usize)
    }

    fn draw_row(&mut self, y: usize, spans: &[Span]) -> io::Result<()> {
        if y >= self.rows as usize {
            return Ok(());
        }
        self.stdout.queue(cursor::MoveTo(0, y as u16))?;
        self.stdout
            .queue(terminal::Clear(terminal::ClearType::CurrentLine))?;
        let mut room = self.cols as usize;
        for span in spans {
            if room == 0 {
                break;
            }
            let text: String = span.text.chars().take(room).collect();
            room -= text.chars().count();
            self.apply(span.style)?;
            self.stdout.queue(Print(text))?;
        }
        self.stdout.queue(SetAttribute(Attribute::Reset))?;
        self.stdout.queue(ResetColor)?;
        Ok(())
    }

    fn clear_region(&mut self, top: usize, bottom: usize) -> io::Result<()> {
        let bottom = bottom.min((self.rows as usize).saturating_sub(1));
        for y in top..=bottom {
            self.stdout.queue(cursor::MoveTo(0, y as u16))?;
            self.stdout
                .queue(terminal::Clear(terminal::ClearType::CurrentLine))?;
        }
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stdout.flush()
    }
}

impl Drop for Term {
    fn drop(&mut self) {
        self.teardown();
    }
}
