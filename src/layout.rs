//! XML layout model.
//!
//! The layout file is a tree of elements rooted at `<features>`. Only tags
//! and attributes matter; text content is ignored.

use crate::error::LayoutError;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::path::Path;

#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub kind: String,
    /// Attributes in document order.
    pub attrs: Vec<(String, String)>,
    pub children: Vec<Element>,
    /// 1-based line of the start tag.
    pub line: usize,
}

impl Element {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Trimmed attribute value, `""` when absent.
    pub fn attr_or_empty(&self, name: &str) -> &str {
        self.attr(name).map(str::trim).unwrap_or("")
    }

    pub fn has_attr(&self, name: &str) -> bool {
        self.attr(name).is_some()
    }

    /// Label for a feature or group: `display`, else `name`.
    pub fn label(&self) -> &str {
        let display = self.attr_or_empty("display");
        if display.is_empty() {
            self.attr_or_empty("name")
        } else {
            display
        }
    }

    pub fn is_header(&self) -> bool {
        self.kind == "vgroup" && self.attr_or_empty("role").eq_ignore_ascii_case("header")
    }
}

pub fn parse_layout(path: &Path) -> Result<Element, LayoutError> {
    let xml = std::fs::read_to_string(path).map_err(|source| LayoutError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_layout_str(&xml)
}

pub fn parse_layout_str(xml: &str) -> Result<Element, LayoutError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut buf = Vec::new();
    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        let pos = reader.buffer_position();
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                stack.push(element_from(e, line_at(xml, pos))?);
            }
            Ok(Event::Empty(ref e)) => {
                let el = element_from(e, line_at(xml, pos))?;
                attach(&mut stack, &mut root, el)?;
            }
            Ok(Event::End(_)) => {
                if let Some(el) = stack.pop() {
                    attach(&mut stack, &mut root, el)?;
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(LayoutError::Xml {
                    line: line_at(xml, reader.buffer_position()),
                    message: e.to_string(),
                })
            }
        }
        buf.clear();
    }

    if let Some(open) = stack.last() {
        return Err(LayoutError::Xml {
            line: open.line,
            message: format!("unclosed <{}>", open.kind),
        });
    }
    root.ok_or(LayoutError::Empty)
}

fn element_from(e: &BytesStart<'_>, line: usize) -> Result<Element, LayoutError> {
    let kind = String::from_utf8_lossy(e.name().as_ref()).into_owned();
    let mut attrs = Vec::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|err| LayoutError::Xml {
            line,
            message: err.to_string(),
        })?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|err| LayoutError::Xml {
                line,
                message: err.to_string(),
            })?
            .into_owned();
        attrs.push((key, value));
    }
    Ok(Element {
        kind,
        attrs,
        children: Vec::new(),
        line,
    })
}

fn attach(
    stack: &mut [Element],
    root: &mut Option<Element>,
    el: Element,
) -> Result<(), LayoutError> {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(el);
        return Ok(());
    }
    if root.is_some() {
        return Err(LayoutError::Xml {
            line: el.line,
            message: format!("second root element <{}>", el.kind),
        });
    }
    *root = Some(el);
    Ok(())
}

/// Line of the first non-blank byte at or after `pos`.
fn line_at(xml: &str, pos: usize) -> usize {
    let pos = pos.min(xml.len());
    let rest = xml.get(pos..).unwrap_or("");
    let skip = rest.len() - rest.trim_start().len();
    let upto = xml.get(..pos + skip).unwrap_or(xml);
    upto.bytes().filter(|b| *b == b'\n').count() + 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SAMPLE: &str = r#"<?xml version="1.0"?>
<features name="root">
  <vgroup role="header">
    <text display="Batocera ${cat /etc/version}"/>
  </vgroup>
  <hgroup display="Audio" id="audio">
    <feature name="volume" display="Volume" refresh="1.5">
      <button display="-" action="batocera-audio setSystemVolume -5"/>
      <text display="${batocera-audio getSystemVolume}%"/>
      <button display="+" action="batocera-audio setSystemVolume +5"/>
    </feature>
  </hgroup>
</features>
"#;

    #[test]
    fn parses_tree_with_attributes_and_lines() {
        let root = parse_layout_str(SAMPLE).unwrap();
        assert_eq!(root.kind, "features");
        assert_eq!(root.line, 2);
        assert_eq!(root.children.len(), 2);

        let header = &root.children[0];
        assert!(header.is_header());
        assert_eq!(header.line, 3);
        assert_eq!(
            header.children[0].attr("display"),
            Some("Batocera ${cat /etc/version}")
        );

        let feature = &root.children[1].children[0];
        assert_eq!(feature.kind, "feature");
        assert_eq!(feature.line, 7);
        assert_eq!(feature.label(), "Volume");
        assert_eq!(feature.attr("refresh"), Some("1.5"));
        let kinds: Vec<&str> = feature.children.iter().map(|c| c.kind.as_str()).collect();
        assert_eq!(kinds, vec!["button", "text", "button"]);
    }

    #[test]
    fn escaped_attributes_are_decoded() {
        let root =
            parse_layout_str(r#"<features><button action="a &amp;&amp; b &lt; c"/></features>"#)
                .unwrap();
        assert_eq!(root.children[0].attr("action"), Some("a && b < c"));
    }

    #[test]
    fn label_falls_back_to_name() {
        let root = parse_layout_str(r#"<feature name="wifi" display="  "/>"#).unwrap();
        assert_eq!(root.label(), "wifi");
        assert_eq!(root.attr_or_empty("missing"), "");
    }

    #[test]
    fn malformed_xml_reports_a_line() {
        let err = parse_layout_str("<features>\n  <hgroup>\n</features>\n").unwrap_err();
        match err {
            LayoutError::Xml { line, .. } => assert!(line >= 2),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn unclosed_root_is_an_error() {
        assert!(matches!(
            parse_layout_str("<features>\n<text display=\"x\"/>\n"),
            Err(LayoutError::Xml { .. })
        ));
    }

    #[test]
    fn empty_document_is_an_error() {
        assert!(matches!(
            parse_layout_str("<?xml version=\"1.0\"?>\n"),
            Err(LayoutError::Empty)
        ));
    }
}
