/// Bouncing banner shown while the dashboard is idle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Saver {
    x: usize,
    y: usize,
    right: bool,
    down: bool,
    /// Screen row drawn on the previous frame, to be blanked.
    drawn: Option<usize>,
}

impl Default for Saver {
    fn default() -> Self {
        Saver::new()
    }
}

impl Saver {
    pub fn new() -> Saver {
        Saver {
            x: 0,
            y: 0,
            right: true,
            down: true,
            drawn: None,
        }
    }

    /// Moves the banner one step inside a `cols` x `rows` screen, bouncing
    /// off the edges. Returns the new top left corner.
    pub fn advance(&mut self, text_width: usize, cols: usize, rows: usize) -> (usize, usize) {
        let max_x = cols.saturating_sub(text_width);
        let max_y = rows.saturating_sub(1);
        (self.x, self.right) = bounce(self.x, self.right, max_x);
        (self.y, self.down) = bounce(self.y, self.down, max_y);
        (self.x, self.y)
    }

    /// Records the row drawn this frame and returns the one drawn before.
    pub fn swap_drawn(&mut self, row: usize) -> Option<usize> {
        self.drawn.replace(row)
    }
}

fn bounce(pos: usize, forward: bool, max: usize) -> (usize, bool) {
    if max == 0 {
        return (0, forward);
    }
    let pos = pos.min(max);
    match forward {
        true if pos >= max => (pos - 1, false),
        true => (pos + 1, true),
        false if pos == 0 => (1, true),
        false => (pos - 1, false),
    }
}
