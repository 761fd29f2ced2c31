//! Reference-closure extraction: keeps one object plus everything it needs to
//! render (gradients, markers, clip paths, `use` targets) and prunes the rest.

use std::collections::{HashMap, HashSet};

use crate::debug::DebugLogger;
use crate::dom::{Document, NodeId};
use crate::error::ExtractError;

/// Always dropped, even when referenced.
const REMOVE_TAGS: &[&str] = &[
    "animate",
    "animateColor",
    "animateMotion",
    "animateTransform",
    "cursor",
    "script",
    "set",
];
/// Kept whole in every extraction.
const PRESERVE_TAGS: &[&str] = &["color-profile", "font"];
/// Links here are navigation, not rendering dependencies.
const IGNORE_TAGS: &[&str] = &["a", "altGlyph"];
const FUNC_IRI_PROPERTIES: &[&str] = &[
    "clip-path",
    "marker",
    "marker-start",
    "marker-mid",
    "marker-end",
    "mask",
    "fill",
    "stroke",
];

#[derive(Debug, Clone, Copy, Default)]
struct ReferenceMark {
    needed: bool,
    ancestor_of_needed: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct ExtractStats {
    pub kept: usize,
    pub removed: usize,
    pub missing_refs: usize,
}

/// Returns a standalone copy of `source` reduced to `target` and its
/// reference closure. `source` is left untouched.
pub fn extract(source: &Document, target: &str) -> Result<Document, ExtractError> {
    let mut clone = source.clone();
    extract_with_log(&mut clone, target, None)?;
    Ok(clone.compacted())
}

/// Prunes `document` in place. Callers pass a clone.
pub(crate) fn extract_with_log(
    document: &mut Document,
    target: &str,
    debug: Option<&DebugLogger>,
) -> Result<ExtractStats, ExtractError> {
    if resolve(document, target).is_none() {
        return Err(ExtractError::IdNotFound(target.to_string()));
    }

    let mut closure = Closure {
        document,
        marks: HashMap::new(),
        visited: HashSet::new(),
        missing: Vec::new(),
    };
    closure.anchor_preserved();
    closure.mark(target);
    let Closure { marks, missing, .. } = closure;

    let mut stats = ExtractStats {
        missing_refs: missing.len(),
        ..ExtractStats::default()
    };
    let root = document.root();
    sweep(document, &marks, root, &mut stats);

    if let Some(debug) = debug {
        for id in &missing {
            debug.log_event("extract.missing_ref", &[("id", target), ("ref", id.as_str())]);
        }
        debug.log_event(
            "extract.result",
            &[
                ("id", target),
                ("kept", stats.kept.to_string().as_str()),
                ("removed", stats.removed.to_string().as_str()),
            ],
        );
        debug.increment("extract.removed", stats.removed as u64);
    }
    Ok(stats)
}

struct Closure<'a> {
    document: &'a Document,
    marks: HashMap<NodeId, ReferenceMark>,
    visited: HashSet<String>,
    missing: Vec<String>,
}

impl Closure<'_> {
    // Preserved elements survive wherever they sit, so their containers must too.
    fn anchor_preserved(&mut self) {
        let root = self.document.root();
        for node in self.document.elements(root) {
            if is_tag(self.document, node, PRESERVE_TAGS) && !self.has_preserved_ancestor(node) {
                self.mark_ancestors(node);
            }
        }
    }

    fn mark(&mut self, target: &str) {
        let mut pending = vec![target.to_string()];
        while let Some(id) = pending.pop() {
            let Some(node) = resolve(self.document, &id) else {
                if !self.missing.contains(&id) {
                    self.missing.push(id);
                }
                continue;
            };
            if self.has_preserved_ancestor(node) {
                continue;
            }
            if !self.visited.insert(id) {
                continue;
            }
            self.marks.entry(node).or_default().needed = true;
            self.mark_ancestors(node);

            let mut scanned = self.document.descendants(node);
            scanned.extend(self.document.ancestors(node));
            for candidate in scanned {
                if self.document.element(candidate).is_none()
                    || is_tag(self.document, candidate, REMOVE_TAGS)
                    || is_tag(self.document, candidate, IGNORE_TAGS)
                    || is_tag(self.document, candidate, PRESERVE_TAGS)
                {
                    continue;
                }
                for reference in references(self.document, candidate) {
                    if !self.visited.contains(&reference) {
                        pending.push(reference);
                    }
                }
            }
        }
    }

    fn mark_ancestors(&mut self, node: NodeId) {
        for ancestor in self.document.ancestors(node) {
            self.marks.entry(ancestor).or_default().ancestor_of_needed = true;
        }
    }

    fn has_preserved_ancestor(&self, node: NodeId) -> bool {
        self.document
            .ancestors(node)
            .into_iter()
            .any(|ancestor| is_tag(self.document, ancestor, PRESERVE_TAGS))
    }
}

fn sweep(
    document: &mut Document,
    marks: &HashMap<NodeId, ReferenceMark>,
    node: NodeId,
    stats: &mut ExtractStats,
) {
    for child in document.children(node).to_vec() {
        if document.element(child).is_none() {
            continue;
        }
        if is_tag(document, child, PRESERVE_TAGS) {
            stats.kept += 1;
            continue;
        }
        let mark = marks.get(&child).copied().unwrap_or_default();
        if is_tag(document, child, REMOVE_TAGS) {
            document.detach(child);
            stats.removed += 1;
        } else if mark.ancestor_of_needed && !mark.needed {
            sweep(document, marks, child, stats);
        } else if !mark.needed {
            document.detach(child);
            stats.removed += 1;
        } else {
            stats.removed += strip_removable(document, child);
            stats.kept += 1;
        }
    }
}

// Drops REMOVE-tagged elements below a kept subtree, leaving preserved ones alone.
fn strip_removable(document: &mut Document, node: NodeId) -> usize {
    let mut removed = 0usize;
    let mut stack = document.element_children(node);
    while let Some(current) = stack.pop() {
        if is_tag(document, current, PRESERVE_TAGS) {
            continue;
        }
        if is_tag(document, current, REMOVE_TAGS) {
            document.detach(current);
            removed += 1;
            continue;
        }
        stack.extend(document.element_children(current));
    }
    removed
}

// The root itself is the canvas, never an extraction target.
fn resolve(document: &Document, id: &str) -> Option<NodeId> {
    let root = document.root();
    document
        .element_children(root)
        .into_iter()
        .find_map(|child| document.element_by_id(child, id))
}

fn is_tag(document: &Document, node: NodeId, tags: &[&str]) -> bool {
    document
        .local_name(node)
        .is_some_and(|name| tags.contains(&name))
}

/// Ids referenced by `node` through `href`/`xlink:href` or a functional IRI.
fn references(document: &Document, node: NodeId) -> Vec<String> {
    let mut out = Vec::new();
    for name in ["xlink:href", "href"] {
        if let Some(id) = document
            .attribute(node, name)
            .and_then(|href| href.trim().strip_prefix('#'))
            .filter(|id| !id.is_empty())
        {
            out.push(id.to_string());
        }
    }
    for property in FUNC_IRI_PROPERTIES {
        if let Some(value) = document.presentation_value(node, property) {
            out.extend(url_refs(&value));
        }
    }
    out
}

// Every `url(#id)` in a value; paints may carry a fallback after the IRI.
fn url_refs(value: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut rest = value;
    while let Some(start) = rest.to_ascii_lowercase().find("url(") {
        let after = &rest[start + 4..];
        let Some(close) = after.find(')') else {
            break;
        };
        let inner = after[..close].trim().trim_matches('"').trim_matches('\'');
        if let Some(id) = inner.strip_prefix('#').filter(|id| !id.is_empty()) {
            out.push(id.to_string());
        }
        rest = &after[close + 1..];
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Document {
        Document::parse(text).expect("parse svg")
    }

    fn has_id(doc: &Document, id: &str) -> bool {
        doc.element_by_id(doc.root(), id).is_some()
    }

    const MARKERS: &str = r#"<svg xmlns="http://www.w3.org/2000/svg"><defs><marker id="m"><path d="M0 0"/></marker></defs><g id="x" marker-end="url(#m)"/><rect id="y"/></svg>"#;

    #[test]
    fn keeps_referenced_marker() {
        let doc = parse(MARKERS);
        let out = extract(&doc, "x").expect("extract x");
        assert!(has_id(&out, "x"));
        assert!(has_id(&out, "m"));
        assert!(!has_id(&out, "y"));

        let out = extract(&doc, "y").expect("extract y");
        assert!(has_id(&out, "y"));
        assert!(!has_id(&out, "x"));
        assert!(!has_id(&out, "m"));
        assert!(out.elements_by_tag("defs").is_empty());
    }

    #[test]
    fn source_document_is_untouched() {
        let doc = parse(MARKERS);
        let before = doc.to_xml();
        extract(&doc, "x").expect("extract");
        assert_eq!(doc.to_xml(), before);
    }

    #[test]
    fn follows_href_chains_and_cycles() {
        let doc = parse(
            r##"<svg xmlns="http://www.w3.org/2000/svg" xmlns:xlink="http://www.w3.org/1999/xlink">
<defs>
<symbol id="s"><use xlink:href="#p"/></symbol>
<path id="p" fill="url(#a)"/>
<linearGradient id="a" href="#b"/>
<linearGradient id="b" xlink:href="#a"/>
<path id="unused"/>
</defs>
<use id="u" xlink:href="#s"/>
</svg>"##,
        );
        let out = extract(&doc, "u").expect("extract");
        for id in ["u", "s", "p", "a", "b"] {
            assert!(has_id(&out, id), "missing {id}");
        }
        assert!(!has_id(&out, "unused"));
    }

    #[test]
    fn animation_is_always_removed() {
        let doc = parse(
            r#"<svg xmlns="http://www.w3.org/2000/svg"><g id="x"><animate id="an" attributeName="x"/><rect id="r"/></g><set id="s"/></svg>"#,
        );
        let out = extract(&doc, "x").expect("extract");
        assert!(has_id(&out, "r"));
        assert!(!has_id(&out, "an"));
        assert!(!has_id(&out, "s"));
        let animate = extract(&doc, "an").expect("extract animate");
        assert!(animate.elements_by_tag("animate").is_empty());
    }

    #[test]
    fn preserved_elements_appear_whole() {
        let doc = parse(
            r#"<svg xmlns="http://www.w3.org/2000/svg"><defs><font id="f"><glyph id="gl"/></font><path id="other"/></defs><font id="top"/><rect id="y"/></svg>"#,
        );
        let out = extract(&doc, "y").expect("extract");
        assert!(has_id(&out, "f"));
        assert!(has_id(&out, "gl"));
        assert!(has_id(&out, "top"));
        assert!(!has_id(&out, "other"));
    }

    #[test]
    fn ancestor_references_and_inline_style_count() {
        let doc = parse(
            r#"<svg xmlns="http://www.w3.org/2000/svg"><defs><linearGradient id="g"/><clipPath id="c1"/><clipPath id="c2"/></defs><g id="wrap" fill="url(#g) red"><rect id="x" clip-path="url(#c1)" style="clip-path: url(&quot;#c2&quot;)"/><rect id="sibling"/></g></svg>"#,
        );
        let out = extract(&doc, "x").expect("extract");
        assert!(has_id(&out, "wrap"));
        assert!(has_id(&out, "g"));
        assert!(has_id(&out, "c2"));
        assert!(!has_id(&out, "c1"));
        assert!(!has_id(&out, "sibling"));
    }

    #[test]
    fn anchor_links_are_not_dependencies() {
        let doc = parse(
            r##"<svg xmlns="http://www.w3.org/2000/svg" xmlns:xlink="http://www.w3.org/1999/xlink"><g id="x"><a xlink:href="#y"><rect/></a></g><rect id="y"/></svg>"##,
        );
        let out = extract(&doc, "x").expect("extract");
        assert!(!has_id(&out, "y"));
    }

    #[test]
    fn unknown_or_root_id_is_not_found() {
        let doc = parse(
            r#"<svg xmlns="http://www.w3.org/2000/svg" id="root"><rect id="y"/></svg>"#,
        );
        assert_eq!(
            extract(&doc, "nope").map(|_| ()),
            Err(ExtractError::IdNotFound("nope".to_string()))
        );
        assert!(matches!(
            extract(&doc, "root"),
            Err(ExtractError::IdNotFound(_))
        ));
    }

    #[test]
    fn dangling_references_are_counted() {
        let mut doc = parse(
            r#"<svg xmlns="http://www.w3.org/2000/svg"><rect id="x" fill="url(#gone)"/></svg>"#,
        );
        let stats = extract_with_log(&mut doc, "x", None).expect("extract");
        assert_eq!(stats.missing_refs, 1);
        assert_eq!(stats.kept, 1);
    }

    #[test]
    fn url_refs_handle_quotes_and_fallbacks() {
        assert_eq!(url_refs("url(#a)"), vec!["a"]);
        assert_eq!(url_refs("URL( '#b' ) none"), vec!["b"]);
        assert_eq!(url_refs("url(\"#c\")"), vec!["c"]);
        assert!(url_refs("url(image.png)").is_empty());
        assert!(url_refs("red").is_empty());
    }
}
