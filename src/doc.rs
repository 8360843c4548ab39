//! Document viewer opened by `<doc>` buttons.

use crate::error::DocError;
use crate::input::Nav;
use std::cmp::Ordering;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::Duration;
use tempfile::TempPath;
use tracing::{debug, warn};

pub const ZOOM_STEP: f32 = 1.25;
pub const ZOOM_MIN: f32 = 0.1;
pub const ZOOM_MAX: f32 = 8.0;
pub const PAN_STEP: i32 = 50;

const DOWNLOAD_TIMEOUT_SECS: u64 = 10;
const PDF_DPI: &str = "120";

const TEXT_EXTS: [&str; 10] = [
    "txt", "log", "md", "conf", "cfg", "ini", "json", "xml", "yaml", "yml",
];
const IMAGE_EXTS: [&str; 6] = ["jpg", "jpeg", "png", "gif", "bmp", "webp"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocKind {
    Text,
    Image,
    Pdf,
    Cbz,
}

pub fn is_url(s: &str) -> bool {
    let s = s.trim();
    s.starts_with("http://") || s.starts_with("https://")
}

pub fn kind_from_extension(path: &str) -> Option<DocKind> {
    let ext = Path::new(path).extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "pdf" => Some(DocKind::Pdf),
        "cbz" => Some(DocKind::Cbz),
        e if IMAGE_EXTS.contains(&e) => Some(DocKind::Image),
        e if TEXT_EXTS.contains(&e) => Some(DocKind::Text),
        _ => None,
    }
}

pub fn kind_from_magic(head: &[u8]) -> Option<DocKind> {
    if head.starts_with(b"%PDF") {
        Some(DocKind::Pdf)
    } else if head.starts_with(b"PK\x03\x04") || head.starts_with(b"PK\x05\x06") {
        Some(DocKind::Cbz)
    } else if head.starts_with(b"\x89PNG")
        || head.starts_with(b"\xff\xd8\xff")
        || head.starts_with(b"GIF87a")
        || head.starts_with(b"GIF89a")
        || head.starts_with(b"BM")
        || (head.len() >= 12 && head.starts_with(b"RIFF") && &head[8..12] == b"WEBP")
    {
        Some(DocKind::Image)
    } else {
        match std::str::from_utf8(head) {
            Ok(_) => Some(DocKind::Text),
            // cut short at the end of the sample
            Err(e) if e.error_len().is_none() => Some(DocKind::Text),
            Err(_) => None,
        }
    }
}

/// Extension first, then the first bytes of the file.
pub fn detect_kind(path: &Path) -> Option<DocKind> {
    if let Some(k) = path.to_str().and_then(kind_from_extension) {
        return Some(k);
    }
    let mut head = Vec::with_capacity(16);
    let f = std::fs::File::open(path).ok()?;
    f.take(16).read_to_end(&mut head).ok()?;
    kind_from_magic(&head)
}

/// Download `url` with curl into a temp file removed on drop.
pub fn download(url: &str) -> Result<TempPath, DocError> {
    let err = |reason: String| DocError::Download {
        url: url.to_string(),
        reason,
    };
    let suffix = url
        .split(['?', '#'])
        .next()
        .and_then(|u| Path::new(u).extension())
        .and_then(|e| e.to_str())
        .map(|e| format!(".{e}"))
        .unwrap_or_else(|| ".tmp".to_string());
    let tmp = tempfile::Builder::new()
        .prefix("controlcenter-")
        .suffix(&suffix)
        .tempfile()
        .map_err(|e| err(e.to_string()))?
        .into_temp_path();

    let status = Command::new("curl")
        .arg("-fsSL")
        .arg("--max-time")
        .arg(DOWNLOAD_TIMEOUT_SECS.to_string())
        .arg("-o")
        .arg(&*tmp)
        .arg(url)
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map_err(|e| err(e.to_string()))?;
    if !status.success() {
        return Err(err(format!("curl exited with {status}")));
    }
    Ok(tmp)
}

/// Raw bytes of a local file or URL, for small pictures inside the panel.
pub fn fetch_bytes(location: &str) -> Option<Vec<u8>> {
    let location = location.trim();
    if location.is_empty() {
        return None;
    }
    if is_url(location) {
        let out = Command::new("curl")
            .args(["-fsSL", "--max-time", "5", location])
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .output()
            .ok()?;
        if !out.status.success() || out.stdout.is_empty() {
            debug!("download of {} failed", location);
            return None;
        }
        return Some(out.stdout);
    }
    match std::fs::read(location) {
        Ok(b) => Some(b),
        Err(e) => {
            debug!("cannot read image {}: {}", location, e);
            None
        }
    }
}

/// Zoom and pan of a picture, zoom relative to the size that fits the viewer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct View {
    pub zoom: f32,
    pub pan: (i32, i32),
}

impl Default for View {
    fn default() -> Self {
        View {
            zoom: 1.0,
            pan: (0, 0),
        }
    }
}

impl View {
    fn handle(&mut self, nav: Nav) {
        match nav {
            Nav::Up => self.zoom = (self.zoom * ZOOM_STEP).min(ZOOM_MAX),
            Nav::Down => self.zoom = (self.zoom / ZOOM_STEP).max(ZOOM_MIN),
            Nav::PanUp => self.pan.1 -= PAN_STEP,
            Nav::PanDown => self.pan.1 += PAN_STEP,
            Nav::PanLeft => self.pan.0 -= PAN_STEP,
            Nav::PanRight => self.pan.0 += PAN_STEP,
            _ => {}
        }
    }
}

/// Where the pages of a multi-page document come from.
#[derive(Debug)]
pub enum PageSource {
    /// Rendered one page at a time by `pdftoppm`.
    Pdf(PathBuf),
    /// Picture entries of a comic book archive, in reading order.
    Cbz { archive: PathBuf, entries: Vec<String> },
}

impl PageSource {
    fn render(&self, index: usize) -> Result<Vec<u8>, DocError> {
        match self {
            PageSource::Pdf(path) => render_pdf_page(path, index),
            PageSource::Cbz { archive, entries } => {
                let name = entries.get(index).ok_or_else(|| DocError::Render {
                    page: index + 1,
                    reason: "no such page".to_string(),
                })?;
                read_archive_entry(archive, name)
            }
        }
    }
}

#[derive(Debug)]
pub struct PagedDoc {
    pub source: PageSource,
    pub count: usize,
    /// 0-based.
    pub current: usize,
    /// Encoded picture of the current page, or why there is none.
    pub picture: Result<Vec<u8>, String>,
    pub view: View,
}

impl PagedDoc {
    fn new(source: PageSource, count: usize) -> Self {
        let mut doc = PagedDoc {
            source,
            count: count.max(1),
            current: 0,
            picture: Err(String::new()),
            view: View::default(),
        };
        doc.load();
        doc
    }

    fn load(&mut self) {
        self.picture = self.source.render(self.current).map_err(|e| {
            warn!("{}", e);
            e.to_string()
        });
    }

    /// Move by `delta` pages; zoom is kept, pan starts over.
    pub fn turn(&mut self, delta: i32) -> bool {
        let target = self.current as i64 + delta as i64;
        if target < 0 || target >= self.count as i64 {
            return false;
        }
        self.current = target as usize;
        self.view.pan = (0, 0);
        self.load();
        true
    }
}

#[derive(Debug)]
pub enum DocBody {
    Text {
        lines: Vec<String>,
        top: usize,
    },
    Image {
        path: PathBuf,
        view: View,
    },
    Pages(PagedDoc),
    Message(String),
}

static NEXT_VIEWER_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug)]
pub struct DocViewer {
    /// Distinct for every opened viewer, so cached pictures are never mixed up.
    pub id: u64,
    pub title: String,
    pub body: DocBody,
    /// Lines that fit on screen; set by the renderer.
    pub page_lines: usize,
    _download: Option<TempPath>,
}

impl DocViewer {
    /// Open `location` (path or URL). Failures become a message body.
    pub fn open(title: &str, location: &str) -> Self {
        let location = location.trim();
        let (download, path) = if is_url(location) {
            match download(location) {
                Ok(tmp) => {
                    let p = tmp.to_path_buf();
                    (Some(tmp), p)
                }
                Err(e) => {
                    warn!("{}", e);
                    return DocViewer::with_body(title, DocBody::Message(e.to_string()), None);
                }
            }
        } else {
            (None, PathBuf::from(location))
        };

        let body = match load_body(&path) {
            Ok(b) => b,
            Err(e) => {
                warn!("{}", e);
                DocBody::Message(e.to_string())
            }
        };
        DocViewer::with_body(title, body, download)
    }

    fn with_body(title: &str, body: DocBody, download: Option<TempPath>) -> Self {
        DocViewer {
            id: NEXT_VIEWER_ID.fetch_add(1, AtomicOrdering::Relaxed),
            title: title.to_string(),
            body,
            page_lines: 20,
            _download: download,
        }
    }

    /// Apply a navigation action. Returns true when the viewer should close.
    pub fn handle(&mut self, nav: Nav) -> bool {
        if nav == Nav::Back {
            return true;
        }
        let page = self.page_lines.max(1);
        match &mut self.body {
            DocBody::Text { lines, top } => {
                let max_top = lines.len().saturating_sub(page);
                *top = match nav {
                    Nav::Activate => return true,
                    Nav::Up | Nav::PanUp => top.saturating_sub(1),
                    Nav::Down | Nav::PanDown => (*top + 1).min(max_top),
                    Nav::Left => top.saturating_sub(page),
                    Nav::Right => (*top + page).min(max_top),
                    _ => *top,
                };
            }
            DocBody::Image { view, .. } => {
                if nav == Nav::Activate {
                    return true;
                }
                view.handle(nav);
            }
            DocBody::Pages(doc) => match nav {
                Nav::Activate | Nav::Right => {
                    doc.turn(1);
                }
                Nav::Left => {
                    doc.turn(-1);
                }
                other => doc.view.handle(other),
            },
            DocBody::Message(_) => return nav == Nav::Activate,
        }
        false
    }

    /// How often a held action repeats; `None` for one-shot actions.
    pub fn repeat_interval(&self, nav: Nav) -> Option<Duration> {
        let ms = match (&self.body, nav) {
            (_, n) if n.is_pan() => 100,
            (DocBody::Image { .. } | DocBody::Pages(_), Nav::Up | Nav::Down) => 200,
            (DocBody::Text { .. } | DocBody::Pages(_), Nav::Left | Nav::Right) => 300,
            (_, Nav::Up | Nav::Down | Nav::Left | Nav::Right) => 150,
            _ => return None,
        };
        Some(Duration::from_millis(ms))
    }
}

fn load_body(path: &Path) -> Result<DocBody, DocError> {
    let read_err = |source| DocError::Read {
        path: path.to_path_buf(),
        source,
    };
    if !path.exists() {
        return Err(read_err(std::io::Error::from(std::io::ErrorKind::NotFound)));
    }
    match detect_kind(path) {
        Some(DocKind::Text) => {
            let bytes = std::fs::read(path).map_err(read_err)?;
            let lines = String::from_utf8_lossy(&bytes)
                .lines()
                .map(|l| l.replace('\t', "    "))
                .collect();
            Ok(DocBody::Text { lines, top: 0 })
        }
        Some(DocKind::Image) => Ok(DocBody::Image {
            path: path.to_path_buf(),
            view: View::default(),
        }),
        Some(DocKind::Pdf) => {
            let count = pdf_page_count(path).unwrap_or(1);
            Ok(DocBody::Pages(PagedDoc::new(
                PageSource::Pdf(path.to_path_buf()),
                count,
            )))
        }
        Some(DocKind::Cbz) => {
            let entries = archive_pictures(path)?;
            if entries.is_empty() {
                return Err(DocError::EmptyArchive(path.to_path_buf()));
            }
            let count = entries.len();
            Ok(DocBody::Pages(PagedDoc::new(
                PageSource::Cbz {
                    archive: path.to_path_buf(),
                    entries,
                },
                count,
            )))
        }
        None => Err(DocError::Unknown(path.to_path_buf())),
    }
}

/// Number of pages `pdfinfo` reports.
fn pdf_page_count(path: &Path) -> Option<usize> {
    let out = Command::new("pdfinfo")
        .arg(path)
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output()
        .map_err(|e| debug!("pdfinfo: {}", e))
        .ok()?;
    parse_page_count(&String::from_utf8_lossy(&out.stdout))
}

fn parse_page_count(info: &str) -> Option<usize> {
    info.lines()
        .find_map(|l| l.strip_prefix("Pages:"))
        .and_then(|n| n.trim().parse().ok())
        .filter(|n| *n > 0)
}

/// PNG of one page (0-based), rendered by `pdftoppm` into a scratch directory.
fn render_pdf_page(path: &Path, index: usize) -> Result<Vec<u8>, DocError> {
    let page = index + 1;
    let err = |reason: String| DocError::Render { page, reason };
    let scratch = tempfile::Builder::new()
        .prefix("controlcenter-pdf-")
        .tempdir()
        .map_err(|e| err(e.to_string()))?;
    let n = page.to_string();
    let status = Command::new("pdftoppm")
        .args(["-png", "-r", PDF_DPI, "-f", &n, "-l", &n])
        .arg(path)
        .arg(scratch.path().join("page"))
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map_err(|e| err(format!("pdftoppm: {e}")))?;
    if !status.success() {
        return Err(err(format!("pdftoppm exited with {status}")));
    }
    // the page number in the output name is zero-padded to the page count
    let produced = std::fs::read_dir(scratch.path())
        .map_err(|e| err(e.to_string()))?
        .filter_map(Result::ok)
        .map(|e| e.path())
        .find(|p| p.extension().map_or(false, |x| x == "png"))
        .ok_or_else(|| err("pdftoppm produced no image".to_string()))?;
    std::fs::read(&produced).map_err(|e| err(e.to_string()))
}

/// Picture entries of a zip archive in natural order.
fn archive_pictures(path: &Path) -> Result<Vec<String>, DocError> {
    let file = std::fs::File::open(path).map_err(|source| DocError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let archive = zip::ZipArchive::new(file)?;
    let mut names: Vec<String> = archive
        .file_names()
        .filter(|n| !n.ends_with('/'))
        .filter(|n| matches!(kind_from_extension(n), Some(DocKind::Image)))
        .map(str::to_string)
        .collect();
    names.sort_by(|a, b| natural_cmp(a, b));
    Ok(names)
}

fn read_archive_entry(path: &Path, name: &str) -> Result<Vec<u8>, DocError> {
    let file = std::fs::File::open(path).map_err(|source| DocError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let mut archive = zip::ZipArchive::new(file)?;
    let mut entry = archive.by_name(name)?;
    let mut bytes = Vec::with_capacity(entry.size() as usize);
    entry
        .read_to_end(&mut bytes)
        .map_err(|source| DocError::Read {
            path: path.join(name),
            source,
        })?;
    Ok(bytes)
}

/// Compare names with digit runs taken as numbers, letters case-insensitive,
/// so `page2` sorts before `page10`.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let (mut a, mut b) = (a, b);
    loop {
        match (a.is_empty(), b.is_empty()) {
            (true, true) => return Ordering::Equal,
            (true, false) => return Ordering::Less,
            (false, true) => return Ordering::Greater,
            _ => {}
        }
        let (ca, ra) = split_chunk(a);
        let (cb, rb) = split_chunk(b);
        let a_num = ca.starts_with(|c: char| c.is_ascii_digit());
        let b_num = cb.starts_with(|c: char| c.is_ascii_digit());
        let ord = match (a_num, b_num) {
            (true, true) => {
                let (ta, tb) = (ca.trim_start_matches('0'), cb.trim_start_matches('0'));
                ta.len().cmp(&tb.len()).then_with(|| ta.cmp(tb))
            }
            // digits before letters
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            (false, false) => ca.to_lowercase().cmp(&cb.to_lowercase()),
        };
        if ord != Ordering::Equal {
            return ord;
        }
        a = ra;
        b = rb;
    }
}

/// Leading run of digits or of non-digits, and the rest.
fn split_chunk(s: &str) -> (&str, &str) {
    let digits = s.starts_with(|c: char| c.is_ascii_digit());
    let end = s
        .find(|c: char| c.is_ascii_digit() != digits)
        .unwrap_or(s.len());
    s.split_at(end)
}
