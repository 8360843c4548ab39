//! Modal overlays drawn on top of the panel.

use crate::doc::DocViewer;
use crate::input::Nav;
use crate::widgets::ChoiceEntry;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DialogOutcome {
    Stay,
    Close,
    /// Run this action, then close.
    Run(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConfirmDialog {
    pub message: String,
    pub action: String,
    /// Cancel is selected until the user moves to Confirm.
    pub confirm_selected: bool,
}

impl ConfirmDialog {
    pub fn new(message: impl Into<String>, action: impl Into<String>) -> Self {
        ConfirmDialog {
            message: message.into(),
            action: action.into(),
            confirm_selected: false,
        }
    }

    pub fn handle(&mut self, nav: Nav) -> DialogOutcome {
        match nav {
            Nav::Left => self.confirm_selected = false,
            Nav::Right => self.confirm_selected = true,
            Nav::Activate => return self.choose(self.confirm_selected),
            Nav::Back => return DialogOutcome::Close,
            _ => {}
        }
        DialogOutcome::Stay
    }

    /// Outcome of pressing one of the two buttons.
    pub fn choose(&self, confirm: bool) -> DialogOutcome {
        if confirm {
            DialogOutcome::Run(self.action.clone())
        } else {
            DialogOutcome::Close
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChoicePopup {
    pub title: String,
    pub entries: Vec<ChoiceEntry>,
    pub selected: usize,
}

impl ChoicePopup {
    pub fn new(title: impl Into<String>, entries: Vec<ChoiceEntry>) -> Self {
        ChoicePopup {
            title: title.into(),
            entries,
            selected: 0,
        }
    }

    pub fn handle(&mut self, nav: Nav) -> DialogOutcome {
        match nav {
            Nav::Up => self.selected = self.selected.saturating_sub(1),
            Nav::Down => {
                if self.selected + 1 < self.entries.len() {
                    self.selected += 1;
                }
            }
            Nav::Activate => return self.pick(self.selected),
            Nav::Back => return DialogOutcome::Close,
            _ => {}
        }
        DialogOutcome::Stay
    }

    pub fn pick(&self, index: usize) -> DialogOutcome {
        match self.entries.get(index) {
            Some(e) if !e.action.is_empty() => DialogOutcome::Run(e.action.clone()),
            _ => DialogOutcome::Close,
        }
    }
}

#[derive(Debug, Default)]
pub enum Overlay {
    #[default]
    None,
    Confirm(ConfirmDialog),
    Choice(ChoicePopup),
    Doc(DocViewer),
}

impl Overlay {
    pub fn is_open(&self) -> bool {
        !matches!(self, Overlay::None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn entries() -> Vec<ChoiceEntry> {
        ["HDMI", "Jack", "Bluetooth"]
            .iter()
            .map(|l| ChoiceEntry {
                label: l.to_string(),
                action: format!("set {}", l.to_lowercase()),
            })
            .collect()
    }

    #[test]
    fn confirm_defaults_to_cancel() {
        let mut d = ConfirmDialog::new("Reboot?", "reboot");
        assert_eq!(d.handle(Nav::Activate), DialogOutcome::Close);
        assert_eq!(d.handle(Nav::Right), DialogOutcome::Stay);
        assert_eq!(d.handle(Nav::Activate), DialogOutcome::Run("reboot".into()));
        d.handle(Nav::Left);
        assert!(!d.confirm_selected);
        assert_eq!(d.handle(Nav::Back), DialogOutcome::Close);
    }

    #[test]
    fn choice_selection_clamps() {
        let mut c = ChoicePopup::new("Choose Output:", entries());
        c.handle(Nav::Up);
        assert_eq!(c.selected, 0);
        for _ in 0..5 {
            c.handle(Nav::Down);
        }
        assert_eq!(c.selected, 2);
        assert_eq!(c.handle(Nav::Activate), DialogOutcome::Run("set bluetooth".into()));
        assert_eq!(c.handle(Nav::Back), DialogOutcome::Close);
        assert_eq!(c.pick(1), DialogOutcome::Run("set jack".into()));
        assert_eq!(c.pick(9), DialogOutcome::Close);
    }
}
