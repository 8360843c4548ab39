use crate::app::{App, Hit};
use crate::dialog::{ChoicePopup, ConfirmDialog, Overlay};
use crate::doc::{fetch_bytes, DocBody, DocViewer, View};
use crate::style::StyleConfig;
use crate::widgets::{progress_fraction, Align, Dimension, Page, RowKind, RowRef, Widget, WidgetKind, WidgetRef};
use sdl2::image::{ImageRWops, LoadTexture};
use sdl2::pixels::Color;
use sdl2::rect::Rect;
use sdl2::render::{BlendMode, Texture, TextureCreator, WindowCanvas};
use sdl2::rwops::RWops;
use sdl2::ttf::Font;
use sdl2::video::WindowContext;
use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, Sender};
use tracing::{debug, warn};

const PAD: i32 = 12;
const GAP: i32 = 10;
const ROW_PAD: i32 = 8;
const BTN_PAD: i32 = 14;
const TOGGLE_W: i32 = 64;
const SCROLL_STEP: i32 = 40;
const TEXT_CACHE_MAX: usize = 512;
const IMAGE_CACHE_MAX: usize = 64;

pub struct UIColors {
    pub bg: Color,
    pub frame: Color,
    pub title_text: Color,
    pub text_primary: Color,
    pub text_value: Color,
    pub row_focused: Color,
    pub item_focused: Color,
    pub button_bg: Color,
    pub button_text: Color,
    pub confirm_bg: Color,
    pub toggle_on: Color,
    pub toggle_off: Color,
    pub progress_bg: Color,
    pub progress_fill: Color,
    pub separator: Color,
    pub tab_active: Color,
    pub dialog_box: Color,
    pub overlay_rgba: Color,
}

impl UIColors {
    pub fn from_style(s: &StyleConfig) -> Self {
        let d = StyleConfig::defaults();
        let c = |v: Option<[u8; 3]>, fallback: Option<[u8; 3]>| {
            let [r, g, b] = v.or(fallback).unwrap_or([128, 128, 128]);
            Color::RGB(r, g, b)
        };
        UIColors {
            bg: c(s.background, d.background),
            frame: c(s.frame, d.frame),
            title_text: c(s.title_text, d.title_text),
            text_primary: c(s.text_primary, d.text_primary),
            text_value: c(s.text_value, d.text_value),
            row_focused: c(s.row_focused, d.row_focused),
            item_focused: c(s.item_focused, d.item_focused),
            button_bg: c(s.button_bg, d.button_bg),
            button_text: c(s.button_text, d.button_text),
            confirm_bg: c(s.confirm_bg, d.confirm_bg),
            toggle_on: c(s.toggle_on, d.toggle_on),
            toggle_off: c(s.toggle_off, d.toggle_off),
            progress_bg: c(s.progress_bg, d.progress_bg),
            progress_fill: c(s.progress_fill, d.progress_fill),
            separator: c(s.separator, d.separator),
            tab_active: c(s.tab_active, d.tab_active),
            dialog_box: c(s.dialog_box, d.dialog_box),
            overlay_rgba: Color::RGBA(0, 0, 0, s.overlay_alpha.unwrap_or(190)),
        }
    }
}

enum Picture<T> {
    Loading,
    Ready(T),
    Failed,
}

/// `<img>` pictures by location. A location is fetched again when a newer
/// stamp of its value slot asks for it; the old picture stays up meanwhile.
struct PictureCache<T> {
    entries: HashMap<String, (u64, Picture<T>)>,
}

impl<T> PictureCache<T> {
    fn new() -> Self {
        PictureCache {
            entries: HashMap::new(),
        }
    }

    /// True when a fetch for `location` has to be started.
    fn request(&mut self, location: &str, stamp: u64) -> bool {
        match self.entries.get_mut(location) {
            Some((wanted, _)) if *wanted >= stamp => false,
            Some((wanted, _)) => {
                *wanted = stamp;
                true
            }
            None => {
                if self.entries.len() >= IMAGE_CACHE_MAX {
                    self.entries.clear();
                }
                self.entries
                    .insert(location.to_string(), (stamp, Picture::Loading));
                true
            }
        }
    }

    /// Results of older fetches than the latest request are dropped.
    fn store(&mut self, location: &str, stamp: u64, picture: Picture<T>) {
        if let Some((wanted, slot)) = self.entries.get_mut(location) {
            if stamp >= *wanted {
                *slot = picture;
            }
        }
    }

    fn get(&self, location: &str) -> Option<&T> {
        match self.entries.get(location) {
            Some((_, Picture::Ready(t))) => Some(t),
            _ => None,
        }
    }
}

type Fetched = (String, u64, Option<Vec<u8>>);

/// One laid out part of a row, relative to the row's top-left corner.
enum Piece {
    Label(String, Rect),
    Widget(WidgetRef, Rect),
}

/// Draws the app and remembers where things landed for mouse hit-testing.
pub struct Renderer<'a> {
    creator: &'a TextureCreator<WindowContext>,
    colors: UIColors,
    texts: HashMap<(String, (u8, u8, u8, u8)), Texture<'a>>,
    pictures: PictureCache<Texture<'a>>,
    picture_tx: Sender<Fetched>,
    picture_rx: Receiver<Fetched>,
    /// Viewer id and page of the texture shown by the document viewer.
    doc_picture: Option<((u64, usize), Option<Texture<'a>>)>,
    hits: Vec<(Rect, Hit)>,
    scroll: i32,
    content_h: i32,
    view_h: i32,
    last_focus: Option<RowRef>,
}

impl<'a> Renderer<'a> {
    pub fn new(creator: &'a TextureCreator<WindowContext>, colors: UIColors) -> Self {
        let (picture_tx, picture_rx) = mpsc::channel();
        Renderer {
            creator,
            colors,
            texts: HashMap::new(),
            pictures: PictureCache::new(),
            picture_tx,
            picture_rx,
            doc_picture: None,
            hits: Vec::new(),
            scroll: 0,
            content_h: 0,
            view_h: 0,
            last_focus: None,
        }
    }

    /// Mouse wheel; positive `dy` scrolls up.
    pub fn scroll_by(&mut self, dy: i32) {
        self.scroll -= dy * SCROLL_STEP;
        self.clamp_scroll();
    }

    fn clamp_scroll(&mut self) {
        let max = (self.content_h - self.view_h).max(0);
        self.scroll = self.scroll.clamp(0, max);
    }

    /// The topmost target under the pointer.
    pub fn hit_test(&self, x: i32, y: i32) -> Option<Hit> {
        self.hits
            .iter()
            .rev()
            .find(|(r, _)| r.contains_point((x, y)))
            .map(|(_, h)| *h)
    }

    pub fn draw(&mut self, canvas: &mut WindowCanvas, font: &Font, app: &mut App) {
        self.receive_pictures();
        self.hits.clear();
        let (w, h) = canvas.output_size().unwrap_or((1280, 720));
        let (w, h) = (w as i32, h as i32);

        canvas.set_draw_color(self.colors.bg);
        canvas.clear();

        if let Overlay::Doc(viewer) = &mut app.overlay {
            self.draw_viewer(canvas, font, viewer, w, h);
            return;
        }
        self.doc_picture = None;

        canvas.set_draw_color(self.colors.frame);
        let _ = canvas.draw_rect(Rect::new(0, 0, w as u32, h as u32));

        let win = (w as u32, h as u32);
        let page = &app.page;
        let focused_row = app.focus.current();
        let focused_item = app.focus.current_item(page);
        let mut y = PAD;

        // header rows stay above the scroll area
        let mut had_header = false;
        for (si, s) in page.sections.iter().enumerate() {
            if !s.header || !page.section_visible(si) {
                continue;
            }
            for ri in 0..s.rows.len() {
                let r = RowRef { section: si, row: ri };
                if !page.row_visible(r) {
                    continue;
                }
                let (rh, pieces) = self.layout_row(font, page, r, PAD, w - 2 * PAD, win);
                self.paint_row(canvas, font, page, &pieces, (0, y), None, false);
                y += rh;
                had_header = true;
            }
        }
        if had_header {
            canvas.set_draw_color(self.colors.separator);
            let _ = canvas.fill_rect(Rect::new(PAD, y + GAP / 2, (w - 2 * PAD) as u32, 1));
            y += GAP;
        }

        if page.tabs.iter().enumerate().any(|(i, _)| page.tab_visible(i)) {
            y += self.draw_tabs(canvas, font, page, y, w) + GAP;
        }

        let view = Rect::new(0, y, w as u32, (h - y - PAD).max(1) as u32);
        self.view_h = view.height() as i32;
        canvas.set_clip_rect(view);

        let mut cy = 0;
        let mut focus_span: Option<(i32, i32)> = None;
        let line_h = font.height();
        for (si, s) in page.sections.iter().enumerate() {
            if s.header || !page.section_visible(si) {
                continue;
            }
            let start = cy;
            if let Some(title) = &s.title {
                self.draw_text(canvas, font, title, self.colors.title_text, PAD * 2, y + cy - self.scroll + 4);
                cy += line_h + 8;
            }
            for ri in 0..s.rows.len() {
                let r = RowRef { section: si, row: ri };
                if !page.row_visible(r) {
                    continue;
                }
                let (rh, pieces) = self.layout_row(font, page, r, PAD * 2, w - 4 * PAD, win);
                let top = y + cy - self.scroll;
                if Some(r) == focused_row {
                    focus_span = Some((cy, rh));
                }
                if top + rh >= view.y() && top < view.bottom() {
                    let row_rect = Rect::new(PAD, top, (w - 2 * PAD) as u32, rh as u32);
                    let is_focused = Some(r) == focused_row;
                    if is_focused {
                        canvas.set_draw_color(self.colors.row_focused);
                        let _ = canvas.fill_rect(row_rect);
                    }
                    if !page.items(r).is_empty() {
                        if let Some(vis) = row_rect.intersection(view) {
                            self.hits.push((vis, Hit::Row(r)));
                        }
                    }
                    self.paint_row(canvas, font, page, &pieces, (0, top), focused_item, true);
                    for p in &pieces {
                        if let Piece::Widget(at, rect) = p {
                            if page.widget(*at).map_or(false, Widget::is_interactive) {
                                let abs = Rect::new(rect.x(), rect.y() + top, rect.width(), rect.height());
                                if let Some(vis) = abs.intersection(view) {
                                    self.hits.push((vis, Hit::Item(*at)));
                                }
                            }
                        }
                    }
                }
                cy += rh;
            }
            if s.title.is_some() {
                canvas.set_draw_color(self.colors.frame);
                let _ = canvas.draw_rect(Rect::new(
                    PAD,
                    y + start - self.scroll,
                    (w - 2 * PAD) as u32,
                    (cy - start + 4).max(1) as u32,
                ));
            }
            cy += GAP;
        }
        canvas.set_clip_rect(None);
        self.content_h = cy;

        if focused_row != self.last_focus {
            self.last_focus = focused_row;
            if let Some((fy, fh)) = focus_span {
                if fy < self.scroll {
                    self.scroll = fy;
                } else if fy + fh > self.scroll + self.view_h {
                    self.scroll = fy + fh - self.view_h;
                }
            }
        }
        self.clamp_scroll();

        match &app.overlay {
            Overlay::Confirm(d) => self.draw_confirm(canvas, font, d, w, h),
            Overlay::Choice(c) => self.draw_choice(canvas, font, c, w, h),
            _ => {}
        }
    }

    fn draw_tabs(&mut self, canvas: &mut WindowCanvas, font: &Font, page: &Page, y: i32, w: i32) -> i32 {
        let tab_h = font.height() + 12;
        let visible: Vec<(usize, i32)> = page
            .tabs
            .iter()
            .enumerate()
            .filter(|(i, _)| page.tab_visible(*i))
            .map(|(i, t)| (i, text_width(font, &t.label) + 2 * BTN_PAD))
            .collect();

        let width_of = |align: Align| -> i32 {
            visible
                .iter()
                .filter(|(i, _)| page.tabs[*i].align == align)
                .map(|(_, tw)| tw + GAP)
                .sum::<i32>()
                - GAP
        };
        let mut left_x = PAD;
        let mut center_x = (w - width_of(Align::Center).max(0)) / 2;
        let mut right_x = w - PAD - width_of(Align::Right).max(0);

        for (i, tw) in visible {
            let tab = &page.tabs[i];
            let cursor = match tab.align {
                Align::Left => &mut left_x,
                Align::Center => &mut center_x,
                Align::Right => &mut right_x,
            };
            let rect = Rect::new(*cursor, y, tw as u32, tab_h as u32);
            *cursor += tw + GAP;
            canvas.set_draw_color(if i == page.active_tab {
                self.colors.tab_active
            } else {
                self.colors.button_bg
            });
            let _ = canvas.fill_rect(rect);
            if i == page.active_tab {
                canvas.set_draw_color(self.colors.item_focused);
                let _ = canvas.fill_rect(Rect::new(rect.x(), rect.bottom() - 3, rect.width(), 3));
            }
            self.draw_text(canvas, font, &tab.label, self.colors.button_text, rect.x() + BTN_PAD, y + 6);
            self.hits.push((rect, Hit::Tab(i)));
        }
        tab_h
    }

    /// Place the cells and widgets of a row. Returns the row height and the
    /// pieces positioned relative to the row top.
    fn layout_row(
        &mut self,
        font: &Font,
        page: &Page,
        r: RowRef,
        x: i32,
        width: i32,
        win: (u32, u32),
    ) -> (i32, Vec<Piece>) {
        let line_h = font.height();
        let mut pieces = Vec::new();
        let mut sized: Vec<(WidgetRef, i32, i32, i32)> = Vec::new();
        let Some(row) = page.row(r) else {
            return (0, pieces);
        };

        let cells: Vec<usize> = (0..row.cells.len())
            .filter(|ci| page.cell_visible(r, *ci))
            .collect();
        if cells.is_empty() {
            return (0, pieces);
        }
        let n = cells.len() as i32;
        let cell_w = (width - GAP * (n - 1)) / n;

        for (k, ci) in cells.iter().enumerate() {
            let cell = &row.cells[*ci];
            let cx = x + k as i32 * (cell_w + GAP);
            let mut wx = cx;
            let mut ww = cell_w;
            if let Some(label) = &cell.label {
                let frac = if row.kind == RowKind::Feature { 0.35 } else { 0.4 };
                let lw = ((cell_w as f32) * frac) as i32;
                let text = fit_text(font, label, lw.max(1) as u32);
                pieces.push(Piece::Label(text, Rect::new(cx, 0, lw.max(1) as u32, line_h as u32)));
                wx += lw + GAP;
                ww -= lw + GAP;
            }

            let widgets: Vec<usize> = (0..cell.widgets.len())
                .filter(|wi| page.holds(&cell.widgets[*wi].conds))
                .collect();
            if widgets.is_empty() {
                continue;
            }
            let m = widgets.len() as i32;
            let slot_w = ((ww - GAP * (m - 1)) / m).max(1);
            for (j, wi) in widgets.iter().enumerate() {
                let at = WidgetRef {
                    row: r,
                    cell: *ci,
                    widget: *wi,
                };
                let widget = &cell.widgets[*wi];
                let (nw, nh) = self.widget_size(font, page, widget, slot_w, win);
                let nw = nw.min(slot_w);
                let sx = wx + j as i32 * (slot_w + GAP);
                sized.push((at, widget.align.place(sx, slot_w, nw), nw, nh));
            }
        }

        let content_h = sized
            .iter()
            .map(|s| s.3)
            .chain(std::iter::once(line_h))
            .max()
            .unwrap_or(line_h);
        let row_h = content_h + 2 * ROW_PAD;
        for p in pieces.iter_mut() {
            if let Piece::Label(_, rect) = p {
                rect.set_y((row_h - line_h) / 2);
            }
        }
        for (at, sx, nw, nh) in sized {
            let rect = Rect::new(sx, (row_h - nh) / 2, nw.max(1) as u32, nh.max(1) as u32);
            pieces.push(Piece::Widget(at, rect));
        }
        (row_h, pieces)
    }

    fn widget_size(&mut self, font: &Font, page: &Page, w: &Widget, slot_w: i32, win: (u32, u32)) -> (i32, i32) {
        let line_h = font.height();
        let button_h = line_h + 8;
        match &w.kind {
            WidgetKind::Text { value } => {
                let text = page.value(*value);
                let lines = text.lines().count().max(1) as i32;
                let width = text.lines().map(|l| text_width(font, l)).max().unwrap_or(0);
                (width, lines * line_h)
            }
            WidgetKind::Button { .. }
            | WidgetKind::ConfirmButton { .. }
            | WidgetKind::Doc { .. }
            | WidgetKind::Choice { .. } => (text_width(font, &page.caption(w)) + 2 * BTN_PAD, button_h),
            WidgetKind::Toggle(t) => {
                let status = match (t.show_status, t.status) {
                    (true, Some(slot)) => text_width(font, page.value(slot)) + GAP,
                    _ => 0,
                };
                (TOGGLE_W + status, button_h)
            }
            WidgetKind::Image { source, width, height } => {
                let loc = page.value(*source).to_string();
                let natural = match self.picture(&loc, page.stamp(*source)) {
                    Some(tex) => {
                        let q = tex.query();
                        (q.width as i32, q.height as i32)
                    }
                    None => (0, line_h),
                };
                image_size(natural, *width, *height, win, line_h * 4)
            }
            WidgetKind::QrCode { width, height, .. } => {
                let side = width
                    .or(*height)
                    .map(|d| d.resolve(win.0) as i32)
                    .unwrap_or(line_h * 5);
                (side, side)
            }
            WidgetKind::ProgressBar { .. } => (slot_w, line_h * 2 / 3),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn paint_row(
        &mut self,
        canvas: &mut WindowCanvas,
        font: &Font,
        page: &Page,
        pieces: &[Piece],
        origin: (i32, i32),
        focused_item: Option<WidgetRef>,
        interactive: bool,
    ) {
        for p in pieces {
            match p {
                Piece::Label(text, rect) => {
                    self.draw_text(canvas, font, text, self.colors.text_primary, rect.x() + origin.0, rect.y() + origin.1);
                }
                Piece::Widget(at, rect) => {
                    let Some(widget) = page.widget(*at) else {
                        continue;
                    };
                    let abs = Rect::new(rect.x() + origin.0, rect.y() + origin.1, rect.width(), rect.height());
                    let focused = interactive && focused_item == Some(*at);
                    self.paint_widget(canvas, font, page, widget, abs, focused);
                }
            }
        }
    }

    fn paint_widget(&mut self, canvas: &mut WindowCanvas, font: &Font, page: &Page, w: &Widget, rect: Rect, focused: bool) {
        let line_h = font.height();
        match &w.kind {
            WidgetKind::Text { value } => {
                let mut y = rect.y();
                for line in page.value(*value).lines() {
                    let text = fit_text(font, line, rect.width());
                    self.draw_text(canvas, font, &text, self.colors.text_value, rect.x(), y);
                    y += line_h;
                }
            }
            WidgetKind::Button { .. }
            | WidgetKind::ConfirmButton { .. }
            | WidgetKind::Doc { .. }
            | WidgetKind::Choice { .. } => {
                let bg = if matches!(w.kind, WidgetKind::ConfirmButton { .. }) {
                    self.colors.confirm_bg
                } else {
                    self.colors.button_bg
                };
                canvas.set_draw_color(bg);
                let _ = canvas.fill_rect(rect);
                let caption = fit_text(font, &page.caption(w), rect.width().saturating_sub(2 * BTN_PAD as u32).max(1));
                let tw = text_width(font, &caption);
                let tx = rect.x() + (rect.width() as i32 - tw) / 2;
                self.draw_text(canvas, font, &caption, self.colors.button_text, tx, rect.y() + 4);
            }
            WidgetKind::Toggle(t) => {
                let pill = Rect::new(rect.x(), rect.y(), TOGGLE_W as u32, rect.height());
                canvas.set_draw_color(if t.active {
                    self.colors.toggle_on
                } else {
                    self.colors.toggle_off
                });
                let _ = canvas.fill_rect(pill);
                let knob_x = if t.active {
                    pill.right() - pill.height() as i32
                } else {
                    pill.x()
                };
                canvas.set_draw_color(self.colors.button_text);
                let _ = canvas.fill_rect(Rect::new(knob_x + 3, pill.y() + 3, pill.height().saturating_sub(6), pill.height().saturating_sub(6)));
                let caption = t.caption();
                let tw = text_width(font, caption);
                let tx = if t.active { pill.x() + 6 } else { pill.right() - tw - 6 };
                self.draw_text(canvas, font, caption, self.colors.button_text, tx, pill.y() + 4);
                if let (true, Some(slot)) = (t.show_status, t.status) {
                    let status = page.value(slot).to_string();
                    self.draw_text(canvas, font, &status, self.colors.text_value, pill.right() + GAP, pill.y() + 4);
                }
                if focused {
                    self.outline(canvas, pill);
                }
                return;
            }
            WidgetKind::Image { source, .. } => {
                let loc = page.value(*source).to_string();
                if let Some(tex) = self.picture(&loc, page.stamp(*source)) {
                    let _ = canvas.copy(tex, None, rect);
                }
            }
            WidgetKind::QrCode { payload, .. } => {
                canvas.set_draw_color(self.colors.button_text);
                let _ = canvas.fill_rect(rect);
                canvas.set_draw_color(self.colors.frame);
                let _ = canvas.draw_rect(rect);
                let text = fit_text(font, page.value(*payload), rect.width().saturating_sub(8).max(1));
                let tw = text_width(font, &text);
                let ty = rect.y() + (rect.height() as i32 - line_h) / 2;
                self.draw_text(canvas, font, &text, self.colors.bg, rect.x() + (rect.width() as i32 - tw) / 2, ty);
            }
            WidgetKind::ProgressBar { value, min, max } => {
                canvas.set_draw_color(self.colors.progress_bg);
                let _ = canvas.fill_rect(rect);
                let frac = progress_fraction(page.value(*value), *min, *max);
                let fill = ((rect.width() as f64) * frac).round() as u32;
                if fill > 0 {
                    canvas.set_draw_color(self.colors.progress_fill);
                    let _ = canvas.fill_rect(Rect::new(rect.x(), rect.y(), fill, rect.height()));
                }
            }
        }
        if focused {
            self.outline(canvas, rect);
        }
    }

    fn outline(&self, canvas: &mut WindowCanvas, rect: Rect) {
        canvas.set_draw_color(self.colors.item_focused);
        let _ = canvas.draw_rect(rect);
        let _ = canvas.draw_rect(Rect::new(rect.x() - 1, rect.y() - 1, rect.width() + 2, rect.height() + 2));
    }

    fn dim(&self, canvas: &mut WindowCanvas, w: i32, h: i32) {
        canvas.set_blend_mode(BlendMode::Blend);
        canvas.set_draw_color(self.colors.overlay_rgba);
        let _ = canvas.fill_rect(Rect::new(0, 0, w as u32, h as u32));
        canvas.set_blend_mode(BlendMode::None);
    }

    fn draw_confirm(&mut self, canvas: &mut WindowCanvas, font: &Font, d: &ConfirmDialog, w: i32, h: i32) {
        self.dim(canvas, w, h);
        let line_h = font.height();
        let box_w = (text_width(font, &d.message) + 4 * PAD).clamp(320, (w * 3 / 5).max(320));
        let box_h = line_h * 3 + 4 * PAD;
        let box_x = (w - box_w) / 2;
        let box_y = (h - box_h) / 2;
        canvas.set_draw_color(self.colors.dialog_box);
        let _ = canvas.fill_rect(Rect::new(box_x, box_y, box_w as u32, box_h as u32));
        canvas.set_draw_color(self.colors.frame);
        let _ = canvas.draw_rect(Rect::new(box_x, box_y, box_w as u32, box_h as u32));

        let msg = fit_text(font, &d.message, (box_w - 2 * PAD) as u32);
        let mw = text_width(font, &msg);
        self.draw_text(canvas, font, &msg, self.colors.text_primary, box_x + (box_w - mw) / 2, box_y + PAD);

        let bw = 120;
        let by = box_y + box_h - PAD - line_h - 8;
        let cancel = Rect::new(box_x + box_w / 2 - bw - GAP, by, bw as u32, (line_h + 8) as u32);
        let confirm = Rect::new(box_x + box_w / 2 + GAP, by, bw as u32, (line_h + 8) as u32);
        for (rect, label, is_confirm) in [(cancel, "Cancel", false), (confirm, "Confirm", true)] {
            canvas.set_draw_color(if is_confirm {
                self.colors.confirm_bg
            } else {
                self.colors.button_bg
            });
            let _ = canvas.fill_rect(rect);
            let tw = text_width(font, label);
            self.draw_text(canvas, font, label, self.colors.button_text, rect.x() + (bw - tw) / 2, by + 4);
            if d.confirm_selected == is_confirm {
                self.outline(canvas, rect);
            }
            self.hits.push((rect, Hit::Confirm(is_confirm)));
        }
    }

    fn draw_choice(&mut self, canvas: &mut WindowCanvas, font: &Font, c: &ChoicePopup, w: i32, h: i32) {
        self.dim(canvas, w, h);
        let entry_h = font.height() + 12;
        let max_rows = ((h * 3 / 4 - entry_h - 3 * PAD) / entry_h).max(1) as usize;
        let shown = c.entries.len().min(max_rows);
        let first = (c.selected + 1).saturating_sub(shown);

        let widest = c
            .entries
            .iter()
            .map(|e| text_width(font, &e.label))
            .chain(std::iter::once(text_width(font, &c.title)))
            .max()
            .unwrap_or(0);
        let box_w = (widest + 4 * PAD).clamp(280, (w * 3 / 5).max(280));
        let box_h = entry_h * (shown as i32 + 1) + 3 * PAD;
        let box_x = (w - box_w) / 2;
        let box_y = (h - box_h) / 2;
        canvas.set_draw_color(self.colors.dialog_box);
        let _ = canvas.fill_rect(Rect::new(box_x, box_y, box_w as u32, box_h as u32));
        canvas.set_draw_color(self.colors.frame);
        let _ = canvas.draw_rect(Rect::new(box_x, box_y, box_w as u32, box_h as u32));
        let title = fit_text(font, &c.title, (box_w - 2 * PAD) as u32);
        self.draw_text(canvas, font, &title, self.colors.title_text, box_x + PAD, box_y + PAD);

        let mut y = box_y + PAD * 2 + entry_h;
        for (i, e) in c.entries.iter().enumerate().skip(first).take(shown) {
            let rect = Rect::new(box_x + PAD, y, (box_w - 2 * PAD) as u32, entry_h as u32);
            if i == c.selected {
                canvas.set_draw_color(self.colors.row_focused);
                let _ = canvas.fill_rect(rect);
                self.outline(canvas, rect);
            }
            let label = fit_text(font, &e.label, rect.width().saturating_sub(2 * PAD as u32).max(1));
            self.draw_text(canvas, font, &label, self.colors.text_primary, rect.x() + PAD, y + 6);
            self.hits.push((rect, Hit::Entry(i)));
            y += entry_h;
        }
    }

    fn draw_viewer(&mut self, canvas: &mut WindowCanvas, font: &Font, viewer: &mut DocViewer, w: i32, h: i32) {
        let line_h = font.height();
        let bar_h = line_h + 2 * ROW_PAD;
        canvas.set_draw_color(self.colors.dialog_box);
        let _ = canvas.fill_rect(Rect::new(0, 0, w as u32, bar_h as u32));
        let title = fit_text(font, &viewer.title, (w - 2 * PAD) as u32);
        self.draw_text(canvas, font, &title, self.colors.title_text, PAD, ROW_PAD);
        self.hits.push((Rect::new(0, 0, w as u32, h as u32), Hit::Viewer));

        let body = Rect::new(PAD, bar_h + PAD, (w - 2 * PAD).max(1) as u32, (h - bar_h - 2 * PAD).max(1) as u32);
        match &viewer.body {
            DocBody::Text { lines, top } => {
                let page_lines = (body.height() as i32 / line_h.max(1)).max(1) as usize;
                let mut y = body.y();
                for line in lines.iter().skip(*top).take(page_lines) {
                    let text = fit_text(font, line, body.width());
                    self.draw_text(canvas, font, &text, self.colors.text_primary, body.x(), y);
                    y += line_h;
                }
                viewer.page_lines = page_lines;
            }
            DocBody::Image { path, view } => {
                let creator = self.creator;
                self.doc_texture((viewer.id, 0), || {
                    creator
                        .load_texture(path)
                        .map_err(|e| format!("{}: {e}", path.display()))
                });
                self.draw_zoomed(canvas, font, *view, body, "Cannot display image");
            }
            DocBody::Pages(doc) => {
                let label = format!("{} / {}", doc.current + 1, doc.count);
                let lw = text_width(font, &label);
                self.draw_text(canvas, font, &label, self.colors.text_value, w - PAD - lw, ROW_PAD);
                match &doc.picture {
                    Ok(bytes) => {
                        let creator = self.creator;
                        self.doc_texture((viewer.id, doc.current), || {
                            texture_from_bytes(creator, bytes)
                        });
                        self.draw_zoomed(canvas, font, doc.view, body, "Cannot display page");
                    }
                    Err(msg) => self.centered(canvas, font, msg, body),
                }
            }
            DocBody::Message(msg) => self.centered(canvas, font, msg, body),
        }
    }

    /// Make the viewer texture for `key` current, loading it when the key changed.
    fn doc_texture(&mut self, key: (u64, usize), load: impl FnOnce() -> Result<Texture<'a>, String>) {
        if self.doc_picture.as_ref().map_or(false, |(k, _)| *k == key) {
            return;
        }
        let tex = match load() {
            Ok(t) => Some(t),
            Err(e) => {
                warn!("cannot display document picture: {}", e);
                None
            }
        };
        self.doc_picture = Some((key, tex));
    }

    fn draw_zoomed(&mut self, canvas: &mut WindowCanvas, font: &Font, view: View, body: Rect, missing: &str) {
        let Some(tex) = self.doc_picture.as_ref().and_then(|(_, t)| t.as_ref()) else {
            self.centered(canvas, font, missing, body);
            return;
        };
        let q = tex.query();
        let fit = (body.width() as f32 / q.width.max(1) as f32).min(body.height() as f32 / q.height.max(1) as f32);
        let scale = fit * view.zoom;
        let dw = ((q.width as f32) * scale).max(1.0) as i32;
        let dh = ((q.height as f32) * scale).max(1.0) as i32;
        let dx = body.x() + (body.width() as i32 - dw) / 2 - view.pan.0;
        let dy = body.y() + (body.height() as i32 - dh) / 2 - view.pan.1;
        canvas.set_clip_rect(body);
        let _ = canvas.copy(tex, None, Rect::new(dx, dy, dw as u32, dh as u32));
        canvas.set_clip_rect(None);
    }

    fn centered(&mut self, canvas: &mut WindowCanvas, font: &Font, text: &str, area: Rect) {
        let text = fit_text(font, text, area.width());
        let tw = text_width(font, &text);
        let x = area.x() + (area.width() as i32 - tw) / 2;
        let y = area.y() + (area.height() as i32 - font.height()) / 2;
        self.draw_text(canvas, font, &text, self.colors.text_primary, x, y);
    }

    fn draw_text(&mut self, canvas: &mut WindowCanvas, font: &Font, s: &str, color: Color, x: i32, y: i32) -> (u32, u32) {
        if s.is_empty() {
            return (0, 0);
        }
        let key = (s.to_string(), color.rgba());
        if !self.texts.contains_key(&key) {
            if self.texts.len() >= TEXT_CACHE_MAX {
                self.texts.clear();
            }
            let Ok(surface) = font.render(s).blended(color) else {
                return (0, 0);
            };
            let Ok(tex) = self.creator.create_texture_from_surface(&surface) else {
                return (0, 0);
            };
            self.texts.insert(key.clone(), tex);
        }
        match self.texts.get(&key) {
            Some(tex) => {
                let q = tex.query();
                let _ = canvas.copy(tex, None, Rect::new(x, y, q.width, q.height));
                (q.width, q.height)
            }
            None => (0, 0),
        }
    }

    /// Texture for an `<img>` location, fetched in the background on first
    /// use and again whenever `stamp` moves past the last fetch.
    fn picture(&mut self, location: &str, stamp: u64) -> Option<&Texture<'a>> {
        if location.trim().is_empty() {
            return None;
        }
        if self.pictures.request(location, stamp) {
            let tx = self.picture_tx.clone();
            let loc = location.to_string();
            let spawned = std::thread::Builder::new()
                .name("image".into())
                .spawn(move || {
                    let bytes = fetch_bytes(&loc);
                    let _ = tx.send((loc, stamp, bytes));
                });
            if let Err(e) = spawned {
                warn!("could not start image thread: {}", e);
                self.pictures.store(location, stamp, Picture::Failed);
            }
        }
        self.pictures.get(location)
    }

    fn receive_pictures(&mut self) {
        let arrived: Vec<Fetched> = self.picture_rx.try_iter().collect();
        for (loc, stamp, bytes) in arrived {
            let entry = match bytes.map(|b| texture_from_bytes(self.creator, &b)) {
                Some(Ok(tex)) => Picture::Ready(tex),
                Some(Err(e)) => {
                    debug!("cannot decode image {}: {}", loc, e);
                    Picture::Failed
                }
                None => Picture::Failed,
            };
            self.pictures.store(&loc, stamp, entry);
        }
    }
}

fn texture_from_bytes<'t>(creator: &'t TextureCreator<WindowContext>, bytes: &[u8]) -> Result<Texture<'t>, String> {
    let surface = RWops::from_bytes(bytes)?.load()?;
    creator
        .create_texture_from_surface(&surface)
        .map_err(|e| e.to_string())
}

fn text_width(font: &Font, s: &str) -> i32 {
    if s.is_empty() {
        return 0;
    }
    font.size_of(s).map(|(w, _)| w as i32).unwrap_or(0)
}

/// Longest prefix of `s` that fits in `max_w` pixels, with "..." when cut.
fn fit_text(font: &Font, s: &str, max_w: u32) -> String {
    let width_of = |s: &str| -> u32 { font.size_of(s).map(|(w, _)| w).unwrap_or(0) };
    if s.is_empty() || width_of(s) <= max_w {
        return s.to_string();
    }
    let ell = "...";
    let chars: Vec<char> = s.chars().collect();
    let mut lo = 0usize;
    let mut hi = chars.len();
    while lo < hi {
        let mid = (lo + hi + 1) / 2;
        let cand: String = chars.iter().take(mid).collect::<String>() + ell;
        if width_of(&cand) <= max_w {
            lo = mid;
        } else {
            hi = mid - 1;
        }
    }
    let kept: String = chars.iter().take(lo).collect();
    kept + ell
}

/// Size of a picture given its natural size and optional requested
/// dimensions. Without any, it is scaled down to `max_h`.
fn image_size(
    natural: (i32, i32),
    width: Option<Dimension>,
    height: Option<Dimension>,
    win: (u32, u32),
    max_h: i32,
) -> (i32, i32) {
    let (nw, nh) = natural;
    let aspect = if nh > 0 { nw as f32 / nh as f32 } else { 1.0 };
    match (width, height) {
        (Some(w), Some(h)) => (w.resolve(win.0) as i32, h.resolve(win.1) as i32),
        (Some(w), None) => {
            let w = w.resolve(win.0) as i32;
            (w, (w as f32 / aspect.max(0.01)) as i32)
        }
        (None, Some(h)) => {
            let h = h.resolve(win.1) as i32;
            ((h as f32 * aspect) as i32, h)
        }
        (None, None) if nh > max_h => (((max_h as f32) * aspect) as i32, max_h),
        (None, None) => (nw, nh),
    }
}
