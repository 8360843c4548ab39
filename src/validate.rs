//! Static checks on a parsed layout. Errors stop startup, warnings are only
//! reported.

use crate::layout::Element;
use std::collections::HashSet;

pub const ALLOWED_TAGS: [&str; 15] = [
    "features",
    "vgroup",
    "hgroup",
    "feature",
    "text",
    "button",
    "button_confirm",
    "toggle",
    "switch",
    "choice",
    "img",
    "qrcode",
    "doc",
    "tab",
    "progressbar",
];

fn required_attrs(kind: &str) -> &'static [&'static str] {
    match kind {
        "button" => &["action"],
        "button_confirm" => &["display", "action"],
        "choice" => &["display", "action"],
        "doc" => &["display", "content"],
        _ => &[],
    }
}

fn known_attrs(kind: &str) -> &'static [&'static str] {
    match kind {
        "features" => &["name"],
        "vgroup" | "hgroup" => &["name", "role", "display"],
        "feature" => &["name", "group", "refresh", "display", "if"],
        "text" => &["display", "refresh", "align"],
        "button" | "button_confirm" => &["display", "action", "refresh", "align"],
        "toggle" | "switch" => &[
            "display",
            "value",
            "action_on",
            "action_off",
            "refresh",
            "align",
        ],
        "choice" => &["display", "action"],
        "img" => &["display", "width", "height", "refresh", "align"],
        "qrcode" => &[
            "display", "width", "height", "refresh", "align", "bg", "style", "logo", "font",
        ],
        "doc" => &["display", "content", "refresh"],
        "tab" => &["display", "align", "target"],
        "progressbar" => &["display", "min", "max", "refresh", "align"],
        _ => &[],
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct Report {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl Report {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

pub fn validate(root: &Element) -> Report {
    let mut report = Report::default();
    let mut stack: Vec<&Element> = Vec::new();
    check_node(root, &mut stack, &mut report);

    if root.kind != "features" {
        report.errors.push(format!(
            "[line {}] Root element must be <features>; found <{}>",
            root.line, root.kind
        ));
    }

    check_tab_targets(root, &mut report);
    report
}

fn path_str(stack: &[&Element]) -> String {
    stack
        .iter()
        .map(|e| match e.attr("name").filter(|n| !n.is_empty()) {
            Some(name) => format!("{}({})", e.kind, name),
            None => e.kind.clone(),
        })
        .collect::<Vec<_>>()
        .join(" > ")
}

fn check_node<'a>(node: &'a Element, stack: &mut Vec<&'a Element>, report: &mut Report) {
    let line = node.line;
    let kind = node.kind.as_str();
    let at = path_str(stack);

    if !ALLOWED_TAGS.contains(&kind) {
        report
            .errors
            .push(format!("[line {line}] Unknown tag <{kind}> at {at}"));
        return;
    }

    for r in required_attrs(kind) {
        if node.attr_or_empty(r).is_empty() {
            report.errors.push(format!(
                "[line {line}] Missing required '{r}' on <{kind}> at {at}"
            ));
        }
    }

    let known = known_attrs(kind);
    for (k, _) in &node.attrs {
        if k != "id" && k != "if" && !known.contains(&k.as_str()) {
            report.warnings.push(format!(
                "[line {line}] Unknown attribute '{k}' on <{kind}> at {at}"
            ));
        }
    }

    let refresh = node.attr_or_empty("refresh");
    if !refresh.is_empty() {
        match refresh.parse::<f64>() {
            Ok(v) if v < 0.0 => report.errors.push(format!(
                "[line {line}] refresh must be >= 0 on <{kind}> at {at}"
            )),
            Ok(v) if !v.is_finite() => report.errors.push(format!(
                "[line {line}] refresh must be a number on <{kind}> at {at}"
            )),
            Ok(_) => {}
            Err(_) => report.errors.push(format!(
                "[line {line}] refresh must be a number on <{kind}> at {at}"
            )),
        }
    }

    if node.has_attr("display") {
        let disp = node.attr_or_empty("display");
        if disp.is_empty() {
            report.errors.push(format!(
                "[line {line}] 'display' cannot be empty on <{kind}> at {at}"
            ));
        }
        if disp.contains("${") && !braces_balanced(disp) {
            report.errors.push(format!(
                "[line {line}] Malformed command in display; mismatched ${{...}} brackets at {at}"
            ));
        }
    }

    if kind == "toggle" || kind == "switch" {
        if node.attr_or_empty("display").is_empty() && node.attr_or_empty("value").is_empty() {
            report.errors.push(format!(
                "[line {line}] <{kind}> must have either 'display' or 'value' attribute at {at}"
            ));
        }
        if node.attr_or_empty("action_on").is_empty() && node.attr_or_empty("action_off").is_empty()
        {
            report.warnings.push(format!(
                "[line {line}] <{kind}> missing 'action_on'/'action_off'; {kind} will be read-only at {at}"
            ));
        }
    }

    if kind == "img" || kind == "qrcode" {
        for attr in ["width", "height"] {
            let val = node.attr_or_empty(attr);
            if val.is_empty() {
                continue;
            }
            if let Some(pct) = val.strip_suffix('%') {
                match pct.trim().parse::<f64>() {
                    Ok(p) if p > 0.0 => {}
                    Ok(_) => report.errors.push(format!(
                        "[line {line}] {attr} percentage must be > 0 on <{kind}> at {at}"
                    )),
                    Err(_) => report.errors.push(format!(
                        "[line {line}] {attr} must be a valid percentage (e.g., '20%') on <{kind}> at {at}"
                    )),
                }
            } else {
                match val.parse::<i64>() {
                    Ok(v) if v > 0 => {}
                    Ok(_) => report.errors.push(format!(
                        "[line {line}] {attr} must be > 0 on <{kind}> at {at}"
                    )),
                    Err(_) => report.errors.push(format!(
                        "[line {line}] {attr} must be an integer or percentage (e.g., '200' or '20%') on <{kind}> at {at}"
                    )),
                }
            }
        }
    }

    stack.push(node);
    for c in &node.children {
        check_node(c, stack, report);
    }
    stack.pop();
}

/// `${` opens, `}` closes an open `${`; any other brace is plain text.
pub fn braces_balanced(s: &str) -> bool {
    let bytes = s.as_bytes();
    let mut depth = 0usize;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' && bytes.get(i + 1) == Some(&b'{') {
            depth += 1;
            i += 2;
        } else {
            if bytes[i] == b'}' && depth > 0 {
                depth -= 1;
            }
            i += 1;
        }
    }
    depth == 0
}

fn collect_ids<'a>(node: &'a Element, ids: &mut HashSet<&'a str>) {
    let id = node.attr_or_empty("id");
    if !id.is_empty() {
        ids.insert(id);
    }
    for c in &node.children {
        collect_ids(c, ids);
    }
}

fn check_tab_targets(root: &Element, report: &mut Report) {
    let mut ids = HashSet::new();
    collect_ids(root, &mut ids);
    for tab in root.children.iter().filter(|c| c.kind == "tab") {
        let target = tab.attr_or_empty("target");
        if !target.is_empty() && !ids.contains(target) {
            report.warnings.push(format!(
                "[line {}] <tab> target '{}' does not match any element id",
                tab.line, target
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::parse_layout_str;
    use pretty_assertions::assert_eq;

    fn report_for(xml: &str) -> Report {
        validate(&parse_layout_str(xml).unwrap())
    }

    #[test]
    fn valid_layout_has_no_findings() {
        let r = report_for(
            r#"<features>
  <tab display="Audio" target="audio"/>
  <hgroup display="Audio" id="audio">
    <feature display="Volume" refresh="2">
      <text display="${batocera-audio getSystemVolume}%"/>
      <toggle value="${cat /tmp/mute}" action_on="mute" action_off="unmute"/>
      <choice display="HDMI" action="set hdmi"/>
    </feature>
  </hgroup>
  <feature display="Docs" if="${test -f /tmp/doc}">
    <doc display="Manual" content="/usr/share/manual.pdf"/>
    <img display="/tmp/logo.png" width="20%" height="64"/>
  </feature>
</features>"#,
        );
        assert_eq!(r, Report::default());
        assert!(r.is_ok());
    }

    #[test]
    fn unknown_tag_is_an_error_with_path() {
        let r = report_for(
            "<features>\n<hgroup name=\"sys\">\n<slider/>\n</hgroup>\n</features>",
        );
        assert_eq!(
            r.errors,
            vec!["[line 3] Unknown tag <slider> at features > hgroup(sys)".to_string()]
        );
    }

    #[test]
    fn unknown_tag_subtree_is_skipped() {
        let r = report_for(
            r#"<features>
  <panel>
    <button display="no action"/>
    <feature><slider/><toggle display="x"/></feature>
  </panel>
  <text display="fine"/>
</features>"#,
        );
        assert_eq!(
            r.errors,
            vec!["[line 2] Unknown tag <panel> at features".to_string()]
        );
        assert!(r.warnings.is_empty());
        assert!(!r.is_ok());
    }

    #[test]
    fn required_and_unknown_attributes() {
        let r = report_for(
            r#"<features><button display="Go" colour="red"/><doc display="d"/></features>"#,
        );
        assert_eq!(r.errors.len(), 2);
        assert!(r.errors[0].contains("Missing required 'action' on <button>"));
        assert!(r.errors[1].contains("Missing required 'content' on <doc>"));
        assert_eq!(r.warnings.len(), 1);
        assert!(r.warnings[0].contains("Unknown attribute 'colour' on <button>"));
    }

    #[test]
    fn refresh_must_be_a_non_negative_number() {
        let r = report_for(
            r#"<features><text display="a" refresh="-1"/><text display="b" refresh="soon"/><text display="c" refresh="0.5"/></features>"#,
        );
        assert_eq!(r.errors.len(), 2);
        assert!(r.errors[0].contains("refresh must be >= 0"));
        assert!(r.errors[1].contains("refresh must be a number"));
    }

    #[test]
    fn display_brackets_and_emptiness() {
        let r = report_for(
            r#"<features><text display="${date"/><text display=" "/><text display="${a ${b}} {x}"/></features>"#,
        );
        assert_eq!(r.errors.len(), 2);
        assert!(r.errors[0].contains("mismatched ${...} brackets"));
        assert!(r.errors[1].contains("'display' cannot be empty"));
    }

    #[test]
    fn toggle_rules() {
        let r = report_for(r#"<features><toggle/><switch display="${x}" action_on="y"/></features>"#);
        assert_eq!(r.errors.len(), 1);
        assert!(r.errors[0].contains("must have either 'display' or 'value'"));
        assert_eq!(r.warnings.len(), 1);
        assert!(r.warnings[0].contains("read-only"));
    }

    #[test]
    fn image_dimensions() {
        let r = report_for(
            r#"<features><img width="0"/><img height="abc"/><qrcode width="0%"/><qrcode width="x%"/><img width="50%" height="10"/></features>"#,
        );
        assert_eq!(r.errors.len(), 4);
        assert!(r.errors[0].contains("width must be > 0"));
        assert!(r.errors[1].contains("height must be an integer or percentage"));
        assert!(r.errors[2].contains("width percentage must be > 0"));
        assert!(r.errors[3].contains("width must be a valid percentage"));
    }

    #[test]
    fn root_must_be_features() {
        let r = report_for(r#"<hgroup/>"#);
        assert_eq!(
            r.errors,
            vec!["[line 1] Root element must be <features>; found <hgroup>".to_string()]
        );
    }

    #[test]
    fn dangling_tab_target_warns() {
        let r = report_for(r#"<features><tab display="X" target="nowhere"/></features>"#);
        assert!(r.is_ok());
        assert_eq!(r.warnings.len(), 1);
        assert!(r.warnings[0].contains("target 'nowhere'"));
    }

    #[test]
    fn brace_balance() {
        assert!(braces_balanced("${a} and ${b}"));
        assert!(braces_balanced("${awk '{print $1}'}"));
        assert!(!braces_balanced("${a"));
        assert!(braces_balanced("plain } text"));
    }
}
