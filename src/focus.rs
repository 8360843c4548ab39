use crate::widgets::{Page, RowRef, WidgetRef};
use std::collections::HashMap;

/// Keyboard/gamepad focus: the current row and, per row, the remembered item.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Focus {
    rows: Vec<RowRef>,
    index: usize,
    item_of: HashMap<RowRef, usize>,
}

impl Focus {
    pub fn new(page: &Page) -> Self {
        let mut f = Focus::default();
        f.rebuild(page);
        f
    }

    /// Recompute the focusable rows after visibility changed. The current row
    /// stays focused when it is still there.
    pub fn rebuild(&mut self, page: &Page) {
        let current = self.current();
        self.rows = page.focusable_rows();
        self.index = match current.and_then(|c| self.rows.iter().position(|r| *r == c)) {
            Some(i) => i,
            None => self.index.min(self.rows.len().saturating_sub(1)),
        };
    }

    /// Back to the first row, e.g. after switching tabs.
    pub fn reset(&mut self, page: &Page) {
        self.rows = page.focusable_rows();
        self.index = 0;
    }

    pub fn rows(&self) -> &[RowRef] {
        &self.rows
    }

    pub fn current(&self) -> Option<RowRef> {
        self.rows.get(self.index).copied()
    }

    /// Move by `delta` rows, wrapping at both ends.
    pub fn move_by(&mut self, delta: i32) {
        let n = self.rows.len() as i64;
        if n == 0 {
            return;
        }
        self.index = (self.index as i64 + delta as i64).rem_euclid(n) as usize;
    }

    fn item_index(&self, page: &Page, row: RowRef) -> Option<usize> {
        let n = page.items(row).len();
        if n == 0 {
            return None;
        }
        Some(self.item_of.get(&row).copied().unwrap_or(0).min(n - 1))
    }

    /// The selected item of the focused row.
    pub fn current_item(&self, page: &Page) -> Option<WidgetRef> {
        let row = self.current()?;
        let idx = self.item_index(page, row)?;
        page.items(row).get(idx).copied()
    }

    pub fn left(&mut self, page: &Page) {
        if let Some(row) = self.current() {
            if let Some(i) = self.item_index(page, row) {
                self.item_of.insert(row, i.saturating_sub(1));
            }
        }
    }

    pub fn right(&mut self, page: &Page) {
        if let Some(row) = self.current() {
            if let Some(i) = self.item_index(page, row) {
                let last = page.items(row).len() - 1;
                self.item_of.insert(row, (i + 1).min(last));
            }
        }
    }

    /// Focus a row directly (mouse). Returns false when it cannot take focus.
    pub fn focus_row(&mut self, row: RowRef) -> bool {
        match self.rows.iter().position(|r| *r == row) {
            Some(i) => {
                self.index = i;
                true
            }
            None => false,
        }
    }

    /// Focus a specific item (mouse).
    pub fn focus_item(&mut self, page: &Page, item: WidgetRef) -> bool {
        let Some(pos) = page.items(item.row).iter().position(|w| *w == item) else {
            return false;
        };
        if !self.focus_row(item.row) {
            return false;
        }
        self.item_of.insert(item.row, pos);
        true
    }
}
