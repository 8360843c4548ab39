//! Widget tree built from a validated layout.
//!
//! The page is a list of sections holding rows of cells. Every piece of text
//! that may change at runtime lives in a value slot; widgets refer to slots
//! by index and refresh results are written back into them.

use crate::layout::Element;
use crate::refresh::{parse_interval, RefreshTask, Slot, ValueSource};
use crate::shell::{condition_holds, is_command, is_truthy};
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

/// Refresh results for a toggle are ignored for this long after the user
/// flipped it.
pub const TOGGLE_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Align {
    Left,
    #[default]
    Center,
    Right,
}

impl Align {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "left" => Align::Left,
            "right" => Align::Right,
            _ => Align::Center,
        }
    }

    /// x of an item `w` wide placed in `[x, x + avail)`.
    pub fn place(self, x: i32, avail: i32, w: i32) -> i32 {
        match self {
            Align::Left => x,
            Align::Center => x + (avail - w).max(0) / 2,
            Align::Right => x + (avail - w).max(0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Dimension {
    Px(u32),
    Percent(f32),
}

impl Dimension {
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        if let Some(p) = s.strip_suffix('%') {
            let p: f32 = p.trim().parse().ok()?;
            (p > 0.0).then_some(Dimension::Percent(p))
        } else {
            let v: u32 = s.parse().ok()?;
            (v > 0).then_some(Dimension::Px(v))
        }
    }

    /// Pixels, percentages taken of `basis`.
    pub fn resolve(self, basis: u32) -> u32 {
        match self {
            Dimension::Px(v) => v,
            Dimension::Percent(p) => ((basis as f32) * p / 100.0).round().max(1.0) as u32,
        }
    }
}

/// An `if` attribute, resolved into a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Condition(pub Slot);

#[derive(Debug, Clone, PartialEq)]
pub struct ChoiceEntry {
    pub label: String,
    pub action: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToggleState {
    pub active: bool,
    pub action_on: String,
    pub action_off: String,
    /// Slot of the status command, when there is one.
    pub status: Option<Slot>,
    /// Show the raw status output next to the switch.
    pub show_status: bool,
    pub changed_at: Option<Instant>,
}

impl ToggleState {
    /// Flip the switch and return the action to run, if any.
    pub fn flip(&mut self, now: Instant) -> Option<String> {
        self.active = !self.active;
        self.changed_at = Some(now);
        let act = if self.active {
            &self.action_on
        } else {
            &self.action_off
        };
        (!act.is_empty()).then(|| act.clone())
    }

    pub fn accepts_refresh(&self, now: Instant) -> bool {
        self.changed_at
            .map_or(true, |t| now.saturating_duration_since(t) >= TOGGLE_GRACE)
    }

    pub fn caption(&self) -> &'static str {
        if self.active {
            "ON"
        } else {
            "OFF"
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WidgetKind {
    Text {
        value: Slot,
    },
    Button {
        label: Slot,
        action: String,
    },
    ConfirmButton {
        label: Slot,
        action: String,
    },
    Toggle(ToggleState),
    Choice {
        title: String,
        entries: Vec<ChoiceEntry>,
    },
    Image {
        source: Slot,
        width: Option<Dimension>,
        height: Option<Dimension>,
    },
    QrCode {
        payload: Slot,
        width: Option<Dimension>,
        height: Option<Dimension>,
    },
    Doc {
        label: Slot,
        content: ValueSource,
    },
    ProgressBar {
        value: Slot,
        min: f64,
        max: f64,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Widget {
    pub kind: WidgetKind,
    pub align: Align,
    pub conds: Vec<Condition>,
}

impl Widget {
    pub fn is_interactive(&self) -> bool {
        matches!(
            self.kind,
            WidgetKind::Button { .. }
                | WidgetKind::ConfirmButton { .. }
                | WidgetKind::Toggle(_)
                | WidgetKind::Choice { .. }
                | WidgetKind::Doc { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Cell {
    pub label: Option<String>,
    pub widgets: Vec<Widget>,
    pub conds: Vec<Condition>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowKind {
    /// Label on the left, controls after it.
    Feature,
    /// Cells side by side.
    Group,
    /// A single bare widget.
    Plain,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub kind: RowKind,
    pub cells: Vec<Cell>,
    pub conds: Vec<Condition>,
}

impl Row {
    fn plain(w: Widget) -> Self {
        Row {
            kind: RowKind::Plain,
            cells: vec![Cell {
                label: None,
                widgets: vec![w],
                conds: Vec::new(),
            }],
            conds: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Section {
    pub title: Option<String>,
    pub id: Option<String>,
    /// Header rows are drawn above the scroll area and never take focus.
    pub header: bool,
    pub rows: Vec<Row>,
    pub conds: Vec<Condition>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Tab {
    pub label: String,
    pub target: String,
    pub align: Align,
    pub conds: Vec<Condition>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RowRef {
    pub section: usize,
    pub row: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WidgetRef {
    pub row: RowRef,
    pub cell: usize,
    pub widget: usize,
}

impl WidgetRef {
    pub fn key(&self) -> String {
        format!(
            "{}:{}:{}:{}",
            self.row.section, self.row.row, self.cell, self.widget
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub sections: Vec<Section>,
    pub tabs: Vec<Tab>,
    pub active_tab: usize,
    values: Vec<String>,
    /// Per slot, the update count when it was last written; 0 until then.
    stamps: Vec<u64>,
    updates: u64,
    cond_slots: HashSet<Slot>,
    toggles: HashMap<Slot, WidgetRef>,
}

impl Page {
    /// Build the page. `resolve` evaluates `if` conditions and toggle states
    /// right away; every other dynamic value is returned as a refresh task due
    /// at `now`.
    pub fn build(
        root: &Element,
        resolve: &mut dyn FnMut(&ValueSource) -> String,
        now: Instant,
    ) -> (Page, Vec<RefreshTask>) {
        let mut b = Builder {
            values: Vec::new(),
            cond_slots: HashSet::new(),
            tasks: Vec::new(),
            resolve,
            now,
        };

        let root_refresh = refresh_of(root, None);
        let root_conds: Vec<Condition> = b.condition(root, root_refresh).into_iter().collect();

        let mut header_rows = Vec::new();
        let mut group_sections = Vec::new();
        let mut default_rows = Vec::new();
        let mut tabs = Vec::new();

        for child in &root.children {
            match child.kind.as_str() {
                "tab" => {
                    let conds = b.condition(child, root_refresh).into_iter().collect();
                    tabs.push(Tab {
                        label: child.label().to_string(),
                        target: child.attr_or_empty("target").to_string(),
                        align: Align::parse(child.attr_or_empty("align")),
                        conds,
                    });
                }
                "vgroup" if child.is_header() => header_rows.push(b.group_row(child, root_refresh)),
                "hgroup" => group_sections.push(b.section(child, root_refresh)),
                "vgroup" => default_rows.push(b.group_row(child, root_refresh)),
                "feature" => default_rows.push(b.feature_row(child, root_refresh)),
                "choice" => {}
                _ => {
                    if let Some(w) = b.widget(child, root_refresh) {
                        default_rows.push(Row::plain(w));
                    }
                }
            }
        }

        let mut sections = Vec::new();
        if !header_rows.is_empty() {
            sections.push(Section {
                title: None,
                id: None,
                header: true,
                rows: header_rows,
                conds: Vec::new(),
            });
        }
        sections.extend(group_sections);
        if !default_rows.is_empty() {
            sections.push(Section {
                title: None,
                id: None,
                header: false,
                rows: default_rows,
                conds: Vec::new(),
            });
        }
        for s in &mut sections {
            s.conds.splice(0..0, root_conds.iter().copied());
        }

        let mut page = Page {
            sections,
            tabs,
            active_tab: 0,
            stamps: vec![0; b.values.len()],
            updates: 0,
            values: b.values,
            cond_slots: b.cond_slots,
            toggles: HashMap::new(),
        };
        page.index_toggles();
        (page, b.tasks)
    }

    fn index_toggles(&mut self) {
        for (si, s) in self.sections.iter().enumerate() {
            for (ri, r) in s.rows.iter().enumerate() {
                for (ci, c) in r.cells.iter().enumerate() {
                    for (wi, w) in c.widgets.iter().enumerate() {
                        if let WidgetKind::Toggle(ToggleState {
                            status: Some(slot), ..
                        }) = w.kind
                        {
                            self.toggles.insert(
                                slot,
                                WidgetRef {
                                    row: RowRef {
                                        section: si,
                                        row: ri,
                                    },
                                    cell: ci,
                                    widget: wi,
                                },
                            );
                        }
                    }
                }
            }
        }
    }

    pub fn value(&self, slot: Slot) -> &str {
        self.values.get(slot).map(String::as_str).unwrap_or("")
    }

    /// Changes on every write to `slot`, even when the text stays the same.
    pub fn stamp(&self, slot: Slot) -> u64 {
        self.stamps.get(slot).copied().unwrap_or(0)
    }

    pub fn holds(&self, conds: &[Condition]) -> bool {
        conds.iter().all(|c| condition_holds(self.value(c.0)))
    }

    /// Store a refresh result. Returns true when a condition flipped, so the
    /// caller knows visibility changed.
    pub fn apply_update(&mut self, slot: Slot, value: String, now: Instant) -> bool {
        if slot >= self.values.len() {
            return false;
        }
        if let Some(wr) = self.toggles.get(&slot).copied() {
            if let Some(Widget {
                kind: WidgetKind::Toggle(t),
                ..
            }) = self.widget_mut(wr)
            {
                if !t.accepts_refresh(now) {
                    return false;
                }
                t.active = is_truthy(&value);
            }
        }
        self.updates += 1;
        self.stamps[slot] = self.updates;
        let is_cond = self.cond_slots.contains(&slot);
        let before = is_cond && condition_holds(&self.values[slot]);
        self.values[slot] = value;
        is_cond && before != condition_holds(&self.values[slot])
    }

    fn active_target(&self) -> Option<&str> {
        self.tabs.get(self.active_tab).map(|t| t.target.as_str())
    }

    pub fn tab_visible(&self, i: usize) -> bool {
        self.tabs.get(i).map_or(false, |t| self.holds(&t.conds))
    }

    pub fn section_visible(&self, i: usize) -> bool {
        let Some(s) = self.sections.get(i) else {
            return false;
        };
        if !self.holds(&s.conds) {
            return false;
        }
        match &s.id {
            Some(id) if self.tabs.iter().any(|t| &t.target == id) => {
                self.active_target() == Some(id.as_str())
            }
            _ => true,
        }
    }

    pub fn row(&self, r: RowRef) -> Option<&Row> {
        self.sections.get(r.section)?.rows.get(r.row)
    }

    pub fn row_visible(&self, r: RowRef) -> bool {
        self.section_visible(r.section) && self.row(r).map_or(false, |row| self.holds(&row.conds))
    }

    pub fn cell_visible(&self, r: RowRef, cell: usize) -> bool {
        self.row_visible(r)
            && self
                .row(r)
                .and_then(|row| row.cells.get(cell))
                .map_or(false, |c| self.holds(&c.conds))
    }

    pub fn widget(&self, w: WidgetRef) -> Option<&Widget> {
        self.row(w.row)?.cells.get(w.cell)?.widgets.get(w.widget)
    }

    pub fn widget_mut(&mut self, w: WidgetRef) -> Option<&mut Widget> {
        self.sections
            .get_mut(w.row.section)?
            .rows
            .get_mut(w.row.row)?
            .cells
            .get_mut(w.cell)?
            .widgets
            .get_mut(w.widget)
    }

    /// Visible interactive widgets of a row, left to right.
    pub fn items(&self, r: RowRef) -> Vec<WidgetRef> {
        let mut out = Vec::new();
        let Some(section) = self.sections.get(r.section) else {
            return out;
        };
        if section.header || !self.row_visible(r) {
            return out;
        }
        let Some(row) = section.rows.get(r.row) else {
            return out;
        };
        for (ci, cell) in row.cells.iter().enumerate() {
            if !self.holds(&cell.conds) {
                continue;
            }
            for (wi, w) in cell.widgets.iter().enumerate() {
                if w.is_interactive() && self.holds(&w.conds) {
                    out.push(WidgetRef {
                        row: r,
                        cell: ci,
                        widget: wi,
                    });
                }
            }
        }
        out
    }

    /// Rows that can take focus, in drawing order.
    pub fn focusable_rows(&self) -> Vec<RowRef> {
        let mut out = Vec::new();
        for (si, s) in self.sections.iter().enumerate() {
            for ri in 0..s.rows.len() {
                let r = RowRef {
                    section: si,
                    row: ri,
                };
                if !self.items(r).is_empty() {
                    out.push(r);
                }
            }
        }
        out
    }

    /// Move to the next visible tab in `delta` direction. Returns true when the
    /// active tab changed.
    pub fn cycle_tab(&mut self, delta: i32) -> bool {
        let n = self.tabs.len();
        if n == 0 {
            return false;
        }
        let step = if delta < 0 { n - 1 } else { 1 };
        let mut i = self.active_tab;
        for _ in 0..n {
            i = (i + step) % n;
            if self.tab_visible(i) {
                break;
            }
        }
        self.set_tab(i)
    }

    pub fn set_tab(&mut self, i: usize) -> bool {
        if i >= self.tabs.len() || i == self.active_tab || !self.tab_visible(i) {
            return false;
        }
        self.active_tab = i;
        true
    }

    /// Text shown for a widget.
    pub fn caption(&self, w: &Widget) -> String {
        match &w.kind {
            WidgetKind::Text { value } => self.value(*value).to_string(),
            WidgetKind::Button { label, .. }
            | WidgetKind::ConfirmButton { label, .. }
            | WidgetKind::Doc { label, .. } => self.value(*label).to_string(),
            WidgetKind::Toggle(t) => t.caption().to_string(),
            WidgetKind::Choice { .. } => "Select".to_string(),
            WidgetKind::Image { .. } => String::new(),
            WidgetKind::QrCode { payload, .. } => self.value(*payload).to_string(),
            WidgetKind::ProgressBar { value, .. } => self.value(*value).to_string(),
        }
    }
}

/// Position of `raw` between `min` and `max`, clamped to 0..=1.
pub fn progress_fraction(raw: &str, min: f64, max: f64) -> f64 {
    let raw = raw.trim().trim_end_matches('%').trim();
    match raw.parse::<f64>() {
        Ok(v) if max > min && v.is_finite() => ((v - min) / (max - min)).clamp(0.0, 1.0),
        _ => 0.0,
    }
}

fn refresh_of(el: &Element, inherited: Option<Duration>) -> Option<Duration> {
    let raw = el.attr_or_empty("refresh");
    if raw.is_empty() {
        return inherited;
    }
    parse_interval(raw).unwrap_or(inherited)
}

fn or_default<'a>(s: &'a str, default: &'a str) -> &'a str {
    if s.is_empty() {
        default
    } else {
        s
    }
}

fn is_value_kind(kind: &str) -> bool {
    matches!(kind, "text" | "img" | "progressbar" | "qrcode")
}

struct Builder<'r> {
    values: Vec<String>,
    cond_slots: HashSet<Slot>,
    tasks: Vec<RefreshTask>,
    resolve: &'r mut dyn FnMut(&ValueSource) -> String,
    now: Instant,
}

impl Builder<'_> {
    fn value(&mut self, raw: &str, refresh: Option<Duration>) -> Slot {
        let source = ValueSource::parse(raw);
        let slot = self.values.len();
        match source {
            ValueSource::Literal(s) => self.values.push(s),
            dynamic => {
                self.values.push(String::new());
                self.tasks
                    .push(RefreshTask::new(slot, dynamic, refresh, self.now));
            }
        }
        slot
    }

    /// A value resolved right away, re-read later only when it has a refresh.
    fn resolved(&mut self, raw: &str, refresh: Option<Duration>) -> Slot {
        let source = ValueSource::parse(raw);
        let slot = self.values.len();
        self.values.push((self.resolve)(&source));
        if let (true, Some(iv)) = (source.is_dynamic(), refresh) {
            self.tasks
                .push(RefreshTask::new(slot, source, Some(iv), self.now + iv));
        }
        slot
    }

    fn condition(&mut self, el: &Element, refresh: Option<Duration>) -> Option<Condition> {
        let raw = el.attr_or_empty("if");
        if raw.is_empty() {
            return None;
        }
        let slot = self.resolved(raw, refresh);
        self.cond_slots.insert(slot);
        Some(Condition(slot))
    }

    fn section(&mut self, hg: &Element, inherited: Option<Duration>) -> Section {
        let refresh = refresh_of(hg, inherited);
        let conds = self.condition(hg, refresh).into_iter().collect();
        let title = hg.attr_or_empty("display");
        let id = hg.attr_or_empty("id");
        let mut rows = Vec::new();
        self.section_rows(hg, refresh, &[], &mut rows);
        Section {
            title: (!title.is_empty()).then(|| title.to_string()),
            id: (!id.is_empty()).then(|| id.to_string()),
            header: false,
            rows,
            conds,
        }
    }

    fn section_rows(
        &mut self,
        hg: &Element,
        refresh: Option<Duration>,
        outer: &[Condition],
        rows: &mut Vec<Row>,
    ) {
        for sub in &hg.children {
            let mut row = match sub.kind.as_str() {
                "vgroup" => self.group_row(sub, refresh),
                "feature" => self.feature_row(sub, refresh),
                "hgroup" => {
                    let r = refresh_of(sub, refresh);
                    let mut conds = outer.to_vec();
                    conds.extend(self.condition(sub, r));
                    self.section_rows(sub, r, &conds, rows);
                    continue;
                }
                "tab" | "choice" => continue,
                _ => match self.widget(sub, refresh) {
                    Some(w) => Row::plain(w),
                    None => continue,
                },
            };
            row.conds.splice(0..0, outer.iter().copied());
            rows.push(row);
        }
    }

    fn feature_row(&mut self, feat: &Element, inherited: Option<Duration>) -> Row {
        let refresh = refresh_of(feat, inherited);
        let conds = self.condition(feat, refresh).into_iter().collect();
        let cell = self.feature_cell(feat, refresh);
        Row {
            kind: RowKind::Feature,
            cells: vec![cell],
            conds,
        }
    }

    fn feature_cell(&mut self, feat: &Element, refresh: Option<Duration>) -> Cell {
        let label = feat.label();
        let mut widgets = Vec::new();
        for sub in feat.children.iter().filter(|c| c.kind != "choice") {
            if let Some(w) = self.widget(sub, refresh) {
                widgets.push(w);
            }
        }

        let entries: Vec<ChoiceEntry> = feat
            .children
            .iter()
            .filter(|c| c.kind == "choice")
            .map(|c| ChoiceEntry {
                label: c.label().to_string(),
                action: c.attr_or_empty("action").to_string(),
            })
            .collect();
        if !entries.is_empty() {
            widgets.push(Widget {
                kind: WidgetKind::Choice {
                    title: format!("Choose {}:", or_default(label, "Option")),
                    entries,
                },
                align: Align::Center,
                conds: Vec::new(),
            });
        }

        Cell {
            label: (!label.is_empty()).then(|| label.to_string()),
            widgets,
            conds: Vec::new(),
        }
    }

    fn group_row(&mut self, vg: &Element, inherited: Option<Duration>) -> Row {
        let refresh = refresh_of(vg, inherited);
        let conds = self.condition(vg, refresh).into_iter().collect();
        let mut cells = Vec::new();
        for child in &vg.children {
            match child.kind.as_str() {
                "feature" => {
                    let r = refresh_of(child, refresh);
                    let fc = self.condition(child, r);
                    let mut cell = self.feature_cell(child, r);
                    cell.conds.extend(fc);
                    cells.push(cell);
                }
                "vgroup" | "hgroup" => cells.push(self.inline_cell(child, refresh)),
                "tab" | "choice" => {}
                _ => {
                    if let Some(w) = self.widget(child, refresh) {
                        cells.push(Cell {
                            label: None,
                            widgets: vec![w],
                            conds: Vec::new(),
                        });
                    }
                }
            }
        }
        Row {
            kind: RowKind::Group,
            cells,
            conds,
        }
    }

    /// A nested group squeezed into one cell: feature labels and values only.
    fn inline_cell(&mut self, group: &Element, inherited: Option<Duration>) -> Cell {
        let refresh = refresh_of(group, inherited);
        let conds = self.condition(group, refresh).into_iter().collect();
        let mut widgets = Vec::new();
        for child in &group.children {
            if child.kind == "feature" {
                let r = refresh_of(child, refresh);
                let fc: Vec<Condition> = self.condition(child, r).into_iter().collect();
                let label = child.label();
                if !label.is_empty() {
                    let value = self.value(label, None);
                    widgets.push(Widget {
                        kind: WidgetKind::Text { value },
                        align: Align::Left,
                        conds: fc.clone(),
                    });
                }
                for sub in child.children.iter().filter(|s| is_value_kind(&s.kind)) {
                    if let Some(mut w) = self.widget(sub, r) {
                        w.conds.splice(0..0, fc.iter().copied());
                        widgets.push(w);
                    }
                }
            } else if is_value_kind(&child.kind) {
                if let Some(w) = self.widget(child, refresh) {
                    widgets.push(w);
                }
            }
        }
        Cell {
            label: None,
            widgets,
            conds,
        }
    }

    fn widget(&mut self, el: &Element, inherited: Option<Duration>) -> Option<Widget> {
        let refresh = refresh_of(el, inherited);
        let display = el.attr_or_empty("display");
        let kind = match el.kind.as_str() {
            "text" => WidgetKind::Text {
                value: self.value(display, refresh),
            },
            "button" => WidgetKind::Button {
                label: self.value(or_default(display, "Button"), refresh),
                action: el.attr_or_empty("action").to_string(),
            },
            "button_confirm" => WidgetKind::ConfirmButton {
                label: self.value(or_default(display, "Confirm?"), refresh),
                action: el.attr_or_empty("action").to_string(),
            },
            "toggle" | "switch" => WidgetKind::Toggle(self.toggle(el, refresh)),
            "img" => WidgetKind::Image {
                source: self.value(display, refresh),
                width: Dimension::parse(el.attr_or_empty("width")),
                height: Dimension::parse(el.attr_or_empty("height")),
            },
            "qrcode" => WidgetKind::QrCode {
                payload: self.value(display, refresh),
                width: Dimension::parse(el.attr_or_empty("width")),
                height: Dimension::parse(el.attr_or_empty("height")),
            },
            "doc" => WidgetKind::Doc {
                label: self.value(or_default(display, "Open"), refresh),
                content: ValueSource::parse(el.attr_or_empty("content")),
            },
            "progressbar" => WidgetKind::ProgressBar {
                value: self.value(display, refresh),
                min: el.attr_or_empty("min").parse().unwrap_or(0.0),
                max: el.attr_or_empty("max").parse().unwrap_or(100.0),
            },
            _ => return None,
        };
        let conds = self.condition(el, refresh).into_iter().collect();
        Some(Widget {
            kind,
            align: Align::parse(el.attr_or_empty("align")),
            conds,
        })
    }

    fn toggle(&mut self, el: &Element, refresh: Option<Duration>) -> ToggleState {
        let display = el.attr_or_empty("display");
        let value = el.attr_or_empty("value");
        let status_raw = if is_command(value) {
            Some(value)
        } else if is_command(display) {
            Some(display)
        } else {
            None
        };
        let status = status_raw.map(|raw| self.resolved(raw, refresh));
        let active = match status {
            Some(slot) => is_truthy(&self.values[slot]),
            None => is_truthy(value),
        };
        ToggleState {
            active,
            action_on: el.attr_or_empty("action_on").to_string(),
            action_off: el.attr_or_empty("action_off").to_string(),
            status,
            show_status: status.is_some() && is_command(display),
            changed_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::parse_layout_str;
    use pretty_assertions::assert_eq;

    const LAYOUT: &str = r#"<features>
  <vgroup role="header">
    <feature display="Batocera"><text display="${cat /etc/version}"/></feature>
  </vgroup>
  <tab display="Audio" target="audio"/>
  <tab display="Video" target="video"/>
  <hgroup display="Audio" id="audio" refresh="2">
    <feature display="Volume">
      <button display="-" action="vol -5"/>
      <text display="${vol get}%"/>
      <button display="+" action="vol +5"/>
    </feature>
    <feature display="Output">
      <text display="${audio current}"/>
      <choice display="HDMI" action="audio hdmi"/>
      <choice display="Jack" action="audio jack"/>
    </feature>
    <text display="static note"/>
  </hgroup>
  <hgroup display="Video" id="video">
    <feature display="Mode"><button display="Reset" action="reset"/></feature>
  </hgroup>
  <feature display="Wifi" if="${has-wifi}" refresh="5">
    <toggle display="${wifi state}" action_on="wifi on" action_off="wifi off"/>
  </feature>
  <feature display="Bluetooth" if="${has-bt}">
    <switch value="${bt state}" action_on="bt on"/>
  </feature>
</features>"#;

    fn fake(src: &ValueSource) -> String {
        match src {
            ValueSource::Literal(s) => s.clone(),
            ValueSource::Command(c) if c == "has-wifi" => "yes".into(),
            _ => String::new(),
        }
    }

    fn build(xml: &str) -> (Page, Vec<RefreshTask>) {
        let root = parse_layout_str(xml).unwrap();
        Page::build(&root, &mut fake, Instant::now())
    }

    fn rr(section: usize, row: usize) -> RowRef {
        RowRef { section, row }
    }

    #[test]
    fn sections_follow_the_layout() {
        let (page, _) = build(LAYOUT);
        let titles: Vec<Option<&str>> = page.sections.iter().map(|s| s.title.as_deref()).collect();
        assert_eq!(titles, vec![None, Some("Audio"), Some("Video"), None]);
        assert!(page.sections[0].header);
        assert_eq!(page.tabs.len(), 2);
        assert_eq!(page.sections[1].rows.len(), 3);
        assert_eq!(page.sections[1].rows[2].kind, RowKind::Plain);
    }

    #[test]
    fn choices_collapse_into_one_select_button() {
        let (page, _) = build(LAYOUT);
        let cell = &page.sections[1].rows[1].cells[0];
        assert_eq!(cell.label.as_deref(), Some("Output"));
        assert_eq!(cell.widgets.len(), 2);
        match &cell.widgets[1].kind {
            WidgetKind::Choice { title, entries } => {
                assert_eq!(title, "Choose Output:");
                let labels: Vec<&str> = entries.iter().map(|e| e.label.as_str()).collect();
                assert_eq!(labels, vec!["HDMI", "Jack"]);
            }
            other => panic!("expected a choice, got {other:?}"),
        }
        assert_eq!(page.caption(&cell.widgets[1]), "Select");
    }

    #[test]
    fn dynamic_values_become_tasks_with_inherited_refresh() {
        let (page, tasks) = build(LAYOUT);
        let vol = tasks
            .iter()
            .find(|t| t.source == ValueSource::Template("${vol get}%".into()))
            .unwrap();
        assert_eq!(vol.interval, Some(Duration::from_secs(2)));
        let version = tasks
            .iter()
            .find(|t| t.source == ValueSource::Command("cat /etc/version".into()))
            .unwrap();
        assert_eq!(version.interval, None);
        // the wifi condition is re-checked with its feature's refresh
        assert!(tasks
            .iter()
            .any(|t| t.source == ValueSource::Command("has-wifi".into())
                && t.interval == Some(Duration::from_secs(5))));
        // without refresh the bluetooth condition is only checked once
        assert!(!tasks
            .iter()
            .any(|t| t.source == ValueSource::Command("has-bt".into())));
        assert_eq!(page.value(vol.slot), "");
    }

    #[test]
    fn tabs_gate_their_target_sections() {
        let (mut page, _) = build(LAYOUT);
        assert!(page.section_visible(0));
        assert!(page.section_visible(1));
        assert!(!page.section_visible(2));
        assert!(page.section_visible(3));
        assert!(page.cycle_tab(1));
        assert!(!page.section_visible(1));
        assert!(page.section_visible(2));
        assert!(page.cycle_tab(1));
        assert_eq!(page.active_tab, 0);
    }

    #[test]
    fn focus_candidates_skip_headers_and_hidden_rows() {
        let (page, _) = build(LAYOUT);
        // bluetooth is hidden by its condition, the header never focuses
        assert_eq!(page.focusable_rows(), vec![rr(1, 0), rr(1, 1), rr(3, 0)]);
        let items = page.items(rr(1, 0));
        assert_eq!(items.len(), 2);
        assert_eq!(items[1].widget, 2);
    }

    #[test]
    fn condition_updates_report_visibility_changes() {
        let (mut page, tasks) = build(LAYOUT);
        let cond = tasks
            .iter()
            .find(|t| t.source == ValueSource::Command("has-wifi".into()))
            .unwrap()
            .slot;
        let now = Instant::now();
        assert!(!page.apply_update(cond, "true".into(), now));
        assert!(page.apply_update(cond, "0".into(), now));
        assert!(!page.row_visible(rr(3, 0)));
        assert!(page.apply_update(cond, "present".into(), now));
        assert!(page.row_visible(rr(3, 0)));
    }

    #[test]
    fn toggle_status_and_grace_period() {
        let (mut page, _) = build(LAYOUT);
        let wr = WidgetRef {
            row: rr(3, 0),
            cell: 0,
            widget: 0,
        };
        let slot = match &page.widget(wr).unwrap().kind {
            WidgetKind::Toggle(t) => {
                assert!(t.show_status);
                t.status.unwrap()
            }
            other => panic!("expected toggle, got {other:?}"),
        };
        let t0 = Instant::now();
        page.apply_update(slot, "on".into(), t0);
        let action = match &mut page.widget_mut(wr).unwrap().kind {
            WidgetKind::Toggle(t) => {
                assert!(t.active);
                t.flip(t0)
            }
            _ => unreachable!(),
        };
        assert_eq!(action.as_deref(), Some("wifi off"));

        // a stale "on" arriving right after the flip is ignored
        page.apply_update(slot, "on".into(), t0 + Duration::from_millis(500));
        let active = |p: &Page| match &p.widget(wr).unwrap().kind {
            WidgetKind::Toggle(t) => t.active,
            _ => unreachable!(),
        };
        assert!(!active(&page));
        page.apply_update(slot, "on".into(), t0 + Duration::from_millis(1500));
        assert!(active(&page));
    }

    #[test]
    fn toggle_state_is_known_before_the_first_refresh() {
        let root = parse_layout_str(
            r#"<features><feature display="Wifi" refresh="3"><toggle value="${wifi state}" action_on="wifi on" action_off="wifi off"/></feature></features>"#,
        )
        .unwrap();
        let t0 = Instant::now();
        let mut resolve = |s: &ValueSource| match s {
            ValueSource::Command(c) if c == "wifi state" => "enabled\n".to_string(),
            _ => String::new(),
        };
        let (mut page, tasks) = Page::build(&root, &mut resolve, t0);
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].interval, Some(Duration::from_secs(3)));
        let wr = WidgetRef {
            row: rr(0, 0),
            cell: 0,
            widget: 0,
        };
        match &mut page.widget_mut(wr).unwrap().kind {
            WidgetKind::Toggle(t) => {
                assert!(t.active);
                assert!(!t.show_status);
                assert_eq!(t.flip(t0).as_deref(), Some("wifi off"));
            }
            other => panic!("expected toggle, got {other:?}"),
        }
    }

    #[test]
    fn rewriting_a_slot_with_the_same_text_changes_its_stamp() {
        let (mut page, tasks) = build(
            r#"<features><img display="${ls -t /userdata/screenshots | head -1}" refresh="5"/></features>"#,
        );
        let slot = tasks[0].slot;
        let t0 = Instant::now();
        assert_eq!(page.stamp(slot), 0);
        page.apply_update(slot, "/tmp/shot.png".into(), t0);
        let first = page.stamp(slot);
        page.apply_update(slot, "/tmp/shot.png".into(), t0 + Duration::from_secs(5));
        assert_eq!(page.value(slot), "/tmp/shot.png");
        assert!(page.stamp(slot) > first);
    }

    #[test]
    fn read_only_toggle_without_command() {
        let (page, tasks) = build(r#"<features><feature display="x"><toggle value="on"/></feature></features>"#);
        assert!(tasks.is_empty());
        match &page.sections[0].rows[0].cells[0].widgets[0].kind {
            WidgetKind::Toggle(t) => {
                assert!(t.active);
                assert_eq!(t.status, None);
                assert_eq!(t.caption(), "ON");
            }
            other => panic!("expected toggle, got {other:?}"),
        }
    }

    #[test]
    fn vgroup_rows_inline_nested_groups() {
        let (page, _) = build(
            r#"<features>
  <vgroup>
    <text display="CPU"/>
    <vgroup>
      <feature display="Temp"><text display="${temp}"/><button display="x" action="y"/></feature>
    </vgroup>
    <feature display="Fan"><button display="Max" action="fan max"/></feature>
  </vgroup>
</features>"#,
        );
        let row = &page.sections[0].rows[0];
        assert_eq!(row.kind, RowKind::Group);
        assert_eq!(row.cells.len(), 3);
        // nested feature contributes label and value, not its button
        assert_eq!(row.cells[1].widgets.len(), 2);
        assert_eq!(page.caption(&row.cells[1].widgets[0]), "Temp");
        assert_eq!(page.items(rr(0, 0)).len(), 1);
    }

    #[test]
    fn dimensions_and_alignment() {
        assert_eq!(Dimension::parse("120"), Some(Dimension::Px(120)));
        assert_eq!(Dimension::parse("25%"), Some(Dimension::Percent(25.0)));
        assert_eq!(Dimension::parse("0"), None);
        assert_eq!(Dimension::Percent(25.0).resolve(800), 200);
        assert_eq!(Align::parse("RIGHT"), Align::Right);
        assert_eq!(Align::parse(""), Align::Center);
        assert_eq!(Align::Center.place(10, 100, 40), 40);
        assert_eq!(Align::Right.place(10, 100, 40), 70);
    }

    #[test]
    fn progress_is_clamped() {
        assert_eq!(progress_fraction("50", 0.0, 100.0), 0.5);
        assert_eq!(progress_fraction("75%", 50.0, 100.0), 0.5);
        assert_eq!(progress_fraction("150", 0.0, 100.0), 1.0);
        assert_eq!(progress_fraction("n/a", 0.0, 100.0), 0.0);
        assert_eq!(progress_fraction("5", 10.0, 10.0), 0.0);
    }
}
