//! Application state driven by the main loop: focus, overlays, refresh
//! results, timers. Nothing in here touches SDL, the renderer only reads it.

use crate::dialog::{ChoicePopup, ConfirmDialog, DialogOutcome, Overlay};
use crate::doc::DocViewer;
use crate::focus::Focus;
use crate::input::{Nav, Repeater};
use crate::refresh::{Debouncer, RefreshTask, Refresher, ValueSource};
use crate::shell;
use crate::widgets::{Page, RowRef, WidgetKind, WidgetRef};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Grace period between losing window focus and closing.
pub const FOCUS_LOSS_DELAY: Duration = Duration::from_millis(100);

/// Runs actions and resolves values on behalf of the app.
pub trait Launcher {
    fn run(&mut self, action: &str);
    fn resolve(&mut self, source: &ValueSource) -> String;
}

/// Launcher backed by real shell commands.
pub struct ShellLauncher {
    pub timeout: Duration,
}

impl Launcher for ShellLauncher {
    fn run(&mut self, action: &str) {
        shell::spawn_action(action, self.timeout);
    }

    fn resolve(&mut self, source: &ValueSource) -> String {
        source.resolve(self.timeout)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AppOptions {
    pub shell_timeout: Duration,
    pub action_debounce: Duration,
    pub gamepad_debounce: Duration,
    /// Quit after this long without interaction.
    pub auto_close: Option<Duration>,
}

/// What a mouse click landed on, as reported by the renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hit {
    Item(WidgetRef),
    Row(RowRef),
    Tab(usize),
    /// Confirm dialog button: true for Confirm.
    Confirm(bool),
    Entry(usize),
    /// Anywhere on the document viewer.
    Viewer,
}

pub struct App {
    pub page: Page,
    pub focus: Focus,
    pub overlay: Overlay,
    pub visible: bool,
    pub quit: bool,
    refresher: Refresher,
    actions: Debouncer,
    gamepad: Debouncer,
    repeater: Repeater,
    launcher: Box<dyn Launcher>,
    auto_close: Option<Duration>,
    last_interaction: Instant,
    focus_lost_at: Option<Instant>,
}

impl App {
    pub fn new(
        page: Page,
        tasks: Vec<RefreshTask>,
        opts: AppOptions,
        launcher: Box<dyn Launcher>,
        now: Instant,
    ) -> Self {
        let focus = Focus::new(&page);
        App {
            page,
            focus,
            overlay: Overlay::None,
            visible: true,
            quit: false,
            refresher: Refresher::new(tasks, opts.shell_timeout),
            actions: Debouncer::new(opts.action_debounce),
            gamepad: Debouncer::new(opts.gamepad_debounce),
            repeater: Repeater::default(),
            launcher,
            auto_close: opts.auto_close.filter(|d| !d.is_zero()),
            last_interaction: now,
            focus_lost_at: None,
        }
    }

    pub fn touch(&mut self, now: Instant) {
        self.last_interaction = now;
    }

    /// Controller buttons and sticks go through a per-action debounce.
    pub fn pad_nav(&mut self, nav: Nav, now: Instant) {
        if self.gamepad.allow_at(&format!("{nav:?}"), now) {
            self.handle_nav(nav, now);
        }
    }

    pub fn handle_nav(&mut self, nav: Nav, now: Instant) {
        self.touch(now);
        self.repeater.arm(nav, now);
        if self.overlay.is_open() {
            self.overlay_nav(nav);
            return;
        }
        match nav {
            Nav::Up => self.focus.move_by(-1),
            Nav::Down => self.focus.move_by(1),
            Nav::Left => self.focus.left(&self.page),
            Nav::Right => self.focus.right(&self.page),
            Nav::Activate => {
                if let Some(item) = self.focus.current_item(&self.page) {
                    self.activate(item, now);
                }
            }
            Nav::Back => {
                info!("closing on back");
                self.quit = true;
            }
            Nav::PrevTab => self.switch_tab(-1),
            Nav::NextTab => self.switch_tab(1),
            Nav::PanUp | Nav::PanDown | Nav::PanLeft | Nav::PanRight => {}
        }
    }

    pub fn release(&mut self, nav: Nav) {
        self.repeater.release(nav);
    }

    /// Repeat held actions. Only the document viewer has continuous actions.
    pub fn repeat_held(&mut self, held: &[Nav], now: Instant) {
        let Overlay::Doc(viewer) = &self.overlay else {
            return;
        };
        let due: Vec<Nav> = held
            .iter()
            .copied()
            .filter(|n| {
                viewer
                    .repeat_interval(*n)
                    .map_or(false, |iv| self.repeater.due(*n, iv, now))
            })
            .collect();
        for nav in due {
            self.touch(now);
            self.overlay_nav(nav);
        }
    }

    fn overlay_nav(&mut self, nav: Nav) {
        let outcome = match &mut self.overlay {
            Overlay::None => return,
            Overlay::Confirm(d) => d.handle(nav),
            Overlay::Choice(c) => c.handle(nav),
            Overlay::Doc(v) => {
                if v.handle(nav) {
                    DialogOutcome::Close
                } else {
                    DialogOutcome::Stay
                }
            }
        };
        self.finish_overlay(outcome);
    }

    fn finish_overlay(&mut self, outcome: DialogOutcome) {
        match outcome {
            DialogOutcome::Stay => {}
            DialogOutcome::Close => self.close_overlay(),
            DialogOutcome::Run(action) => {
                self.launcher.run(&action);
                self.close_overlay();
            }
        }
    }

    fn close_overlay(&mut self) {
        self.overlay = Overlay::None;
        self.repeater.clear();
    }

    fn switch_tab(&mut self, delta: i32) {
        if self.page.cycle_tab(delta) {
            debug!("tab {}", self.page.active_tab);
            self.focus.reset(&self.page);
        }
    }

    /// Trigger a widget: run, flip, or open its dialog.
    pub fn activate(&mut self, item: WidgetRef, now: Instant) {
        let Some(widget) = self.page.widget(item) else {
            return;
        };
        match &widget.kind {
            WidgetKind::Button { action, .. } => {
                let action = action.clone();
                if !action.is_empty() && self.actions.allow_at(&item.key(), now) {
                    self.launcher.run(&action);
                }
            }
            WidgetKind::ConfirmButton { label, action } => {
                let message = self.page.value(*label).to_string();
                self.overlay = Overlay::Confirm(ConfirmDialog::new(message, action.clone()));
            }
            WidgetKind::Toggle(t) => {
                if t.action_on.is_empty() && t.action_off.is_empty() {
                    return;
                }
                if !self.actions.allow_at(&item.key(), now) {
                    return;
                }
                let action = match self.page.widget_mut(item).map(|w| &mut w.kind) {
                    Some(WidgetKind::Toggle(t)) => t.flip(now),
                    _ => None,
                };
                if let Some(a) = action {
                    self.launcher.run(&a);
                }
            }
            WidgetKind::Choice { title, entries } => {
                self.overlay = Overlay::Choice(ChoicePopup::new(title.clone(), entries.clone()));
            }
            WidgetKind::Doc { label, content } => {
                let title = self.page.value(*label).to_string();
                let content = content.clone();
                let location = self.launcher.resolve(&content);
                debug!("opening document {}", location);
                self.overlay = Overlay::Doc(DocViewer::open(&title, &location));
            }
            _ => {}
        }
    }

    pub fn click(&mut self, hit: Hit, now: Instant) {
        self.touch(now);
        match (&self.overlay, hit) {
            (Overlay::Confirm(d), Hit::Confirm(yes)) => {
                let outcome = d.choose(yes);
                self.finish_overlay(outcome);
            }
            (Overlay::Choice(c), Hit::Entry(i)) => {
                let outcome = c.pick(i);
                self.finish_overlay(outcome);
            }
            (Overlay::Doc(_), Hit::Viewer) => self.close_overlay(),
            (Overlay::None, Hit::Item(w)) => {
                if self.focus.focus_item(&self.page, w) {
                    self.activate(w, now);
                }
            }
            (Overlay::None, Hit::Row(r)) => {
                if self.focus.focus_row(r) {
                    if let Some(w) = self.focus.current_item(&self.page) {
                        self.activate(w, now);
                    }
                }
            }
            (Overlay::None, Hit::Tab(i)) => {
                if self.page.set_tab(i) {
                    self.focus.reset(&self.page);
                }
            }
            _ => {}
        }
    }

    /// Ignored while an overlay is open; the pad keeps working without focus.
    pub fn focus_lost(&mut self, now: Instant) {
        if self.overlay.is_open() {
            debug!("focus lost with an overlay open, staying");
            return;
        }
        self.focus_lost_at = Some(now);
    }

    pub fn focus_gained(&mut self) {
        self.focus_lost_at = None;
    }

    /// Flip window visibility, returns the new state.
    pub fn toggle_visibility(&mut self, now: Instant) -> bool {
        self.visible = !self.visible;
        self.focus_lost_at = None;
        self.touch(now);
        info!("window {}", if self.visible { "shown" } else { "hidden" });
        self.visible
    }

    /// Apply refresh results, start due refreshes, evaluate timers.
    pub fn tick(&mut self, now: Instant) {
        let mut changed = false;
        for u in self.refresher.drain() {
            changed |= self.page.apply_update(u.slot, u.value, now);
        }
        if changed {
            self.focus.rebuild(&self.page);
        }
        self.refresher.pump(now);
        self.check_timers(now);
    }

    fn check_timers(&mut self, now: Instant) {
        if !self.visible || self.overlay.is_open() {
            return;
        }
        if let Some(t) = self.focus_lost_at {
            if now.saturating_duration_since(t) >= FOCUS_LOSS_DELAY {
                info!("focus lost, closing");
                self.quit = true;
            }
        }
        if let Some(limit) = self.auto_close {
            if now.saturating_duration_since(self.last_interaction) >= limit {
                info!("no interaction for {:?}, closing", limit);
                self.quit = true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::parse_layout_str;
    use pretty_assertions::assert_eq;
    use std::cell::RefCell;
    use std::rc::Rc;

    const LAYOUT: &str = r#"<features>
  <tab display="Main" target="main"/>
  <tab display="More" target="more"/>
  <hgroup id="main" display="Main">
    <feature display="Power">
      <button display="Suspend" action="suspend"/>
      <button_confirm display="Reboot?" action="reboot"/>
    </feature>
    <feature display="Wifi">
      <toggle value="off" action_on="wifi on" action_off="wifi off"/>
    </feature>
    <feature display="Output">
      <choice display="HDMI" action="out hdmi"/>
      <choice display="Jack" action="out jack"/>
    </feature>
  </hgroup>
  <hgroup id="more" display="More">
    <feature display="Manual"><doc display="Read" content="${manual-path}"/></feature>
  </hgroup>
</features>"#;

    #[derive(Default)]
    struct Fake {
        ran: Vec<String>,
        doc: String,
    }

    struct FakeLauncher(Rc<RefCell<Fake>>);

    impl Launcher for FakeLauncher {
        fn run(&mut self, action: &str) {
            self.0.borrow_mut().ran.push(action.to_string());
        }

        fn resolve(&mut self, source: &ValueSource) -> String {
            match source {
                ValueSource::Literal(s) => s.clone(),
                _ => self.0.borrow().doc.clone(),
            }
        }
    }

    fn opts(auto_close: Option<Duration>) -> AppOptions {
        AppOptions {
            shell_timeout: Duration::from_secs(1),
            action_debounce: Duration::from_millis(100),
            gamepad_debounce: Duration::from_millis(150),
            auto_close,
        }
    }

    fn app(auto_close: Option<Duration>) -> (App, Rc<RefCell<Fake>>, Instant) {
        let root = parse_layout_str(LAYOUT).unwrap();
        let now = Instant::now();
        let mut resolve = |s: &ValueSource| match s {
            ValueSource::Literal(l) => l.clone(),
            _ => String::new(),
        };
        let (page, tasks) = Page::build(&root, &mut resolve, now);
        let fake = Rc::new(RefCell::new(Fake::default()));
        let app = App::new(
            page,
            tasks,
            opts(auto_close),
            Box::new(FakeLauncher(fake.clone())),
            now,
        );
        (app, fake, now)
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn buttons_run_their_action_with_debounce() {
        let (mut app, fake, t0) = app(None);
        app.handle_nav(Nav::Activate, t0);
        app.handle_nav(Nav::Activate, t0 + ms(50));
        app.handle_nav(Nav::Activate, t0 + ms(200));
        assert_eq!(fake.borrow().ran, vec!["suspend", "suspend"]);
    }

    #[test]
    fn confirm_button_asks_first() {
        let (mut app, fake, t0) = app(None);
        app.handle_nav(Nav::Right, t0);
        app.handle_nav(Nav::Activate, t0);
        match &app.overlay {
            Overlay::Confirm(d) => assert_eq!(d.message, "Reboot?"),
            other => panic!("expected confirm dialog, got {other:?}"),
        }
        // cancel is the default
        app.handle_nav(Nav::Activate, t0);
        assert!(!app.overlay.is_open());
        assert!(fake.borrow().ran.is_empty());

        app.handle_nav(Nav::Activate, t0);
        app.handle_nav(Nav::Right, t0);
        app.handle_nav(Nav::Activate, t0);
        assert_eq!(fake.borrow().ran, vec!["reboot"]);
        assert!(!app.quit);
    }

    #[test]
    fn toggles_flip_and_choices_pop_up() {
        let (mut app, fake, t0) = app(None);
        app.handle_nav(Nav::Down, t0);
        app.handle_nav(Nav::Activate, t0);
        assert_eq!(fake.borrow().ran, vec!["wifi on"]);

        app.handle_nav(Nav::Down, t0);
        app.handle_nav(Nav::Activate, t0);
        match &app.overlay {
            Overlay::Choice(c) => assert_eq!(c.title, "Choose Output:"),
            other => panic!("expected choice popup, got {other:?}"),
        }
        app.handle_nav(Nav::Down, t0);
        app.handle_nav(Nav::Activate, t0);
        assert_eq!(fake.borrow().ran, vec!["wifi on", "out jack"]);
        assert!(!app.overlay.is_open());
    }

    #[test]
    fn back_closes_overlay_before_quitting() {
        let (mut app, _, t0) = app(None);
        app.handle_nav(Nav::Right, t0);
        app.handle_nav(Nav::Activate, t0);
        app.handle_nav(Nav::Back, t0);
        assert!(!app.overlay.is_open());
        assert!(!app.quit);
        app.handle_nav(Nav::Back, t0);
        assert!(app.quit);
    }

    #[test]
    fn tabs_switch_sections_and_reset_focus() {
        let (mut app, _, t0) = app(None);
        app.handle_nav(Nav::Down, t0);
        app.handle_nav(Nav::NextTab, t0);
        assert_eq!(app.page.active_tab, 1);
        assert_eq!(app.focus.rows(), &[RowRef { section: 1, row: 0 }]);
        app.click(Hit::Tab(0), t0);
        assert_eq!(app.page.active_tab, 0);
        assert_eq!(app.focus.current(), Some(RowRef { section: 0, row: 0 }));
    }

    #[test]
    fn doc_button_opens_the_viewer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manual.txt");
        std::fs::write(&path, "page one\npage two\n").unwrap();

        let (mut app, fake, t0) = app(None);
        fake.borrow_mut().doc = path.to_string_lossy().into_owned();
        app.handle_nav(Nav::NextTab, t0);
        app.handle_nav(Nav::Activate, t0);
        match &app.overlay {
            Overlay::Doc(v) => assert_eq!(v.title, "Read"),
            other => panic!("expected viewer, got {other:?}"),
        }
        app.click(Hit::Viewer, t0);
        assert!(!app.overlay.is_open());
    }

    #[test]
    fn held_actions_repeat_only_in_the_viewer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.txt");
        let body: String = (0..100).map(|i| format!("{i}\n")).collect();
        std::fs::write(&path, body).unwrap();

        let (mut app, fake, t0) = app(None);
        app.repeat_held(&[Nav::Down], t0 + ms(500));
        assert_eq!(app.focus.current(), Some(RowRef { section: 0, row: 0 }));

        fake.borrow_mut().doc = path.to_string_lossy().into_owned();
        app.handle_nav(Nav::NextTab, t0);
        app.handle_nav(Nav::Activate, t0);
        app.handle_nav(Nav::Down, t0);
        app.repeat_held(&[Nav::Down], t0 + ms(100));
        app.repeat_held(&[Nav::Down], t0 + ms(160));
        app.repeat_held(&[Nav::Down], t0 + ms(320));
        match &app.overlay {
            Overlay::Doc(v) => match &v.body {
                crate::doc::DocBody::Text { top, .. } => assert_eq!(*top, 3),
                other => panic!("expected text, got {other:?}"),
            },
            other => panic!("expected viewer, got {other:?}"),
        }
    }

    #[test]
    fn gamepad_actions_are_debounced() {
        let (mut app, _, t0) = app(None);
        app.pad_nav(Nav::Down, t0);
        app.pad_nav(Nav::Down, t0 + ms(100));
        assert_eq!(app.focus.current(), Some(RowRef { section: 0, row: 1 }));
        app.pad_nav(Nav::Down, t0 + ms(200));
        assert_eq!(app.focus.current(), Some(RowRef { section: 0, row: 2 }));
    }

    #[test]
    fn focus_loss_closes_unless_a_dialog_is_open() {
        let (mut app, _, t0) = app(None);
        app.handle_nav(Nav::Right, t0);
        app.handle_nav(Nav::Activate, t0);
        app.focus_lost(t0);
        app.tick(t0 + ms(200));
        assert!(!app.quit);

        app.handle_nav(Nav::Back, t0);
        app.focus_lost(t0);
        app.tick(t0 + ms(50));
        assert!(!app.quit);
        app.focus_gained();
        app.tick(t0 + ms(200));
        assert!(!app.quit);
        app.focus_lost(t0);
        app.tick(t0 + ms(150));
        assert!(app.quit);
    }

    #[test]
    fn focus_loss_under_a_dialog_is_forgotten_once_it_closes() {
        let (mut app, _, t0) = app(None);
        app.handle_nav(Nav::Right, t0);
        app.handle_nav(Nav::Activate, t0);
        app.focus_lost(t0);
        app.tick(t0 + Duration::from_secs(5));
        app.pad_nav(Nav::Back, t0 + Duration::from_secs(10));
        assert!(!app.overlay.is_open());
        app.tick(t0 + Duration::from_secs(10));
        assert!(!app.quit);
    }

    #[test]
    fn inactivity_timeout() {
        let (mut app, _, t0) = app(Some(Duration::from_secs(5)));
        app.tick(t0 + Duration::from_secs(4));
        assert!(!app.quit);
        app.handle_nav(Nav::Down, t0 + Duration::from_secs(4));
        app.tick(t0 + Duration::from_secs(8));
        assert!(!app.quit);
        app.tick(t0 + Duration::from_secs(9));
        assert!(app.quit);
    }

    #[test]
    fn hidden_window_ignores_timers() {
        let (mut app, _, t0) = app(Some(Duration::from_secs(1)));
        assert!(!app.toggle_visibility(t0));
        app.focus_lost(t0);
        app.tick(t0 + Duration::from_secs(5));
        assert!(!app.quit);
    }
}
