/// Visible row range of a scrolling list.
///
/// Bounds are inclusive row indices and always span exactly `max_row - min_row`
/// rows past `first`, even when the list is shorter than the viewport. Rows past
/// the end of the list are simply not drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScrollWindow {
    first: usize,
    last: usize,
    height: Option<usize>,
}

impl ScrollWindow {
    pub fn new() -> ScrollWindow {
        ScrollWindow::default()
    }

    pub fn first(&self) -> usize {
        self.first
    }

    pub fn last(&self) -> usize {
        self.last
    }

    pub fn contains(&self, row: usize) -> bool {
        row >= self.first && row <= self.last
    }

    /// Screen row of list row `row`, if visible.
    pub fn screen_row(&self, row: usize, min_row: usize) -> Option<usize> {
        self.contains(row).then(|| min_row + row - self.first)
    }

    /// Forces the next `recompute` to treat the viewport as new.
    pub fn invalidate(&mut self) {
        self.height = None;
    }

    /// Fits the window to a viewport spanning screen rows `min_row..=max_row`
    /// and scrolls the least amount needed to show `highlighted`.
    /// Returns `(first, last, changed)`.
    pub fn recompute(
        &mut self,
        table_size: usize,
        min_row: usize,
        max_row: usize,
        highlighted: Option<usize>,
    ) -> (usize, usize, bool) {
        let before = (self.first, self.last);
        let h = max_row.saturating_sub(min_row);

        match self.height {
            Some(prev) if prev == h => {}
            Some(prev) if h < prev => {
                self.first = table_size.saturating_sub(h);
                self.last = self.first + h;
            }
            _ => {
                self.first = 0;
                self.last = h;
            }
        }
        self.height = Some(h);

        if let Some(hi) = highlighted {
            if hi < self.first {
                self.first = hi;
                self.last = hi + h;
            } else if hi > self.last {
                self.last = hi;
                self.first = hi - h;
            }
        }

        (self.first, self.last, (self.first, self.last) != before)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_at_top() {
        let mut w = ScrollWindow::new();
        assert_eq!(w.recompute(50, 1, 10, None), (0, 9, true));
        assert_eq!(w.recompute(50, 1, 10, Some(3)), (0, 9, false));
    }

    #[test]
    fn follows_highlight_by_minimum_shift() {
        let mut w = ScrollWindow::new();
        w.recompute(50, 1, 10, Some(0));
        assert_eq!(w.recompute(50, 1, 10, Some(10)), (1, 10, true));
        assert_eq!(w.recompute(50, 1, 10, Some(25)), (16, 25, true));
        assert_eq!(w.recompute(50, 1, 10, Some(20)), (16, 25, false));
        assert_eq!(w.recompute(50, 1, 10, Some(12)), (12, 21, true));
        assert_eq!(w.screen_row(12, 1), Some(1));
        assert_eq!(w.screen_row(11, 1), None);
    }

    #[test]
    fn grow_snaps_to_top_and_shrink_to_bottom() {
        let mut w = ScrollWindow::new();
        w.recompute(50, 1, 10, Some(30));
        assert_eq!(w.recompute(50, 1, 20, None), (0, 19, true));
        assert_eq!(w.recompute(50, 1, 5, None), (46, 50, true));
        assert_eq!(w.recompute(3, 1, 2, None), (2, 3, true));
        assert_eq!(w.recompute(2, 1, 1, None), (2, 2, true));
        assert_eq!(w.recompute(2, 1, 1, Some(0)), (0, 0, true));
    }

    #[test]
    fn invalidate_resets_to_top() {
        let mut w = ScrollWindow::new();
        w.recompute(50, 1, 10, Some(40));
        w.invalidate();
        assert_eq!(w.recompute(50, 1, 10, None), (0, 9, true));
    }

    #[test]
    fn bounds_hold_for_all_sizes() {
        for n in 0..24usize {
            for h in 0..8usize {
                let mut w = ScrollWindow::new();
                let steps = (0..n).chain((0..n).rev()).chain([n / 2, 0, n.saturating_sub(1)]);
                for (i, hi) in steps.enumerate() {
                    let rows = if i % 5 == 4 { h + 2 } else { h };
                    let hi = (n > 0).then_some(hi);
                    let (first, last, _) = w.recompute(n, 1, 1 + rows, hi);
                    assert!(first <= last);
                    assert_eq!(last - first, rows, "n={} h={} step={}", n, h, i);
                    if let Some(hi) = hi {
                        assert!(first <= hi && hi <= last, "n={} h={} hi={}", n, h, hi);
                    }
                }
            }
        }
    }
}
