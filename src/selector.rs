//! Selector matching over the arena document. Selectors arrive from
//! lightningcss already parsed and unescaped; each one is lowered into owned
//! compounds and matched right to left.

use lightningcss::selector::{Combinator as ParsedCombinator, Component, Selector, SelectorList};
use lightningcss::stylesheet::ParserOptions;
use lightningcss::traits::ParseWithOptions;
use parcel_selectors::attr::{
    AttrSelectorOperator, NamespaceConstraint, ParsedAttrSelectorOperation, ParsedCaseSensitivity,
};
use parcel_selectors::parser::{NthSelectorData, NthType};

use crate::dom::{Document, NodeId, NodeKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Specificity(pub u16, pub u16, pub u16);

impl Specificity {
    // Packed as `ids << 20 | classes << 10 | types`, ten bits each.
    fn from_packed(packed: u32) -> Self {
        const MASK: u32 = (1 << 10) - 1;
        Self(
            ((packed >> 20) & MASK) as u16,
            ((packed >> 10) & MASK) as u16,
            (packed & MASK) as u16,
        )
    }
}

#[derive(Debug, Clone, Default)]
struct Compound {
    tag: Option<String>,
    ids: Vec<String>,
    classes: Vec<String>,
    attrs: Vec<AttrSelector>,
    pseudos: Vec<PseudoClass>,
}

impl Compound {
    fn push(&mut self, component: &Component<'_>) {
        match component {
            Component::LocalName(name) => self.tag = Some(name.name.to_string()),
            Component::ID(id) => self.ids.push(id.to_string()),
            Component::Class(class) => self.classes.push(class.to_string()),
            Component::AttributeInNoNamespaceExists { local_name, .. } => {
                self.attrs.push(AttrSelector::exists(local_name.to_string(), false));
            }
            Component::AttributeInNoNamespace {
                local_name,
                operator,
                value,
                case_sensitivity,
                never_matches,
            } => {
                if *never_matches {
                    self.pseudos.push(PseudoClass::Never);
                } else {
                    self.attrs.push(AttrSelector {
                        name: local_name.to_string(),
                        any_namespace: false,
                        op: attr_op(operator),
                        value: value.to_string(),
                        case_insensitive: ascii_insensitive(case_sensitivity),
                    });
                }
            }
            Component::AttributeOther(attr) => {
                if attr.never_matches {
                    self.pseudos.push(PseudoClass::Never);
                    return;
                }
                // Prefixed attributes are stored under their qualified name.
                let name = match &attr.namespace {
                    Some(NamespaceConstraint::Specific((prefix, _))) if !prefix.is_empty() => {
                        format!("{prefix}:{}", attr.local_name)
                    }
                    _ => attr.local_name.to_string(),
                };
                let any_namespace = matches!(attr.namespace, Some(NamespaceConstraint::Any));
                self.attrs.push(match &attr.operation {
                    ParsedAttrSelectorOperation::Exists => {
                        AttrSelector::exists(name, any_namespace)
                    }
                    ParsedAttrSelectorOperation::WithValue {
                        operator,
                        case_sensitivity,
                        expected_value,
                    } => AttrSelector {
                        name,
                        any_namespace,
                        op: attr_op(operator),
                        value: expected_value.to_string(),
                        case_insensitive: ascii_insensitive(case_sensitivity),
                    },
                });
            }
            Component::Negation(list) => self.pseudos.push(PseudoClass::Not(lower_all(list))),
            Component::Is(list) | Component::Where(list) | Component::Any(_, list) => {
                self.pseudos.push(PseudoClass::Is(lower_all(list)));
            }
            Component::Root | Component::Scope => self.pseudos.push(PseudoClass::Root),
            Component::Empty => self.pseudos.push(PseudoClass::Empty),
            Component::Nth(data) => self.pseudos.push(PseudoClass::from_nth(data)),
            Component::ExplicitUniversalType
            | Component::ExplicitAnyNamespace
            | Component::ExplicitNoNamespace
            | Component::DefaultNamespace(_)
            | Component::Namespace(..) => {}
            // Dynamic states (`:hover`), pseudo-elements, `:has()`, `:nth-child(.. of S)`
            // and shadow-tree selectors never match a static tree.
            _ => self.pseudos.push(PseudoClass::Never),
        }
    }

    fn matches(&self, doc: &Document, node: NodeId) -> bool {
        let Some(element) = doc.element(node) else {
            return false;
        };
        if let Some(tag) = &self.tag {
            if tag != &element.name && tag != element.local_name() {
                return false;
            }
        }
        if self.ids.iter().any(|id| element.id() != Some(id.as_str())) {
            return false;
        }
        for class in &self.classes {
            let has_class = element
                .attribute("class")
                .is_some_and(|value| value.split_whitespace().any(|c| c == class));
            if !has_class {
                return false;
            }
        }
        if !self.attrs.iter().all(|attr| attr.matches(doc, node)) {
            return false;
        }
        self.pseudos.iter().all(|pseudo| pseudo.matches(doc, node))
    }
}

fn lower_all(list: &[Selector<'_>]) -> Vec<SelectorPattern> {
    list.iter().map(SelectorPattern::from_parsed).collect()
}

#[derive(Debug, Clone)]
enum PseudoClass {
    Root,
    Empty,
    Nth {
        of_type: bool,
        from_end: bool,
        a: i32,
        b: i32,
    },
    Only {
        of_type: bool,
    },
    Not(Vec<SelectorPattern>),
    Is(Vec<SelectorPattern>),
    Never,
}

impl PseudoClass {
    fn from_nth(data: &NthSelectorData) -> Self {
        let nth = |of_type, from_end| PseudoClass::Nth {
            of_type,
            from_end,
            a: data.a,
            b: data.b,
        };
        match data.ty {
            NthType::Child => nth(false, false),
            NthType::LastChild => nth(false, true),
            NthType::OfType => nth(true, false),
            NthType::LastOfType => nth(true, true),
            NthType::OnlyChild => PseudoClass::Only { of_type: false },
            NthType::OnlyOfType => PseudoClass::Only { of_type: true },
            NthType::Col | NthType::LastCol => PseudoClass::Never,
        }
    }

    fn matches(&self, doc: &Document, node: NodeId) -> bool {
        match self {
            PseudoClass::Root => node == doc.root(),
            PseudoClass::Empty => doc.children(node).iter().all(|child| {
                matches!(
                    doc.kind(*child),
                    NodeKind::Comment(_) | NodeKind::ProcessingInstruction { .. }
                )
            }),
            PseudoClass::Nth {
                of_type,
                from_end,
                a,
                b,
            } => {
                let (index, count) = sibling_position(doc, node, *of_type);
                let position = if *from_end { count + 1 - index } else { index };
                nth_matches(*a, *b, position as i32)
            }
            PseudoClass::Only { of_type } => sibling_position(doc, node, *of_type).1 == 1,
            PseudoClass::Not(list) => !list.iter().any(|pattern| pattern.matches(doc, node)),
            PseudoClass::Is(list) => list.iter().any(|pattern| pattern.matches(doc, node)),
            PseudoClass::Never => false,
        }
    }
}

// True when `position = a*n + b` for some n >= 0.
fn nth_matches(a: i32, b: i32, position: i32) -> bool {
    if a == 0 {
        return position == b;
    }
    let offset = position - b;
    offset % a == 0 && offset / a >= 0
}

// 1-based index among element siblings (of the same name when `of_type`), and
// the number of such siblings.
fn sibling_position(doc: &Document, node: NodeId, of_type: bool) -> (usize, usize) {
    let Some(parent) = doc.parent(node) else {
        return (1, 1);
    };
    let name = doc.element(node).map(|element| element.name.as_str());
    let siblings: Vec<NodeId> = doc
        .element_children(parent)
        .into_iter()
        .filter(|sibling| !of_type || doc.element(*sibling).map(|e| e.name.as_str()) == name)
        .collect();
    let index = siblings
        .iter()
        .position(|sibling| *sibling == node)
        .map(|pos| pos + 1)
        .unwrap_or(0);
    (index, siblings.len())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AttrOp {
    Exists,
    Equals,
    Includes,
    DashMatch,
    Prefix,
    Suffix,
    Substring,
}

fn attr_op(operator: &AttrSelectorOperator) -> AttrOp {
    match operator {
        AttrSelectorOperator::Equal => AttrOp::Equals,
        AttrSelectorOperator::Includes => AttrOp::Includes,
        AttrSelectorOperator::DashMatch => AttrOp::DashMatch,
        AttrSelectorOperator::Prefix => AttrOp::Prefix,
        AttrSelectorOperator::Substring => AttrOp::Substring,
        AttrSelectorOperator::Suffix => AttrOp::Suffix,
    }
}

fn ascii_insensitive(case_sensitivity: &ParsedCaseSensitivity) -> bool {
    matches!(case_sensitivity, ParsedCaseSensitivity::AsciiCaseInsensitive)
}

#[derive(Debug, Clone)]
struct AttrSelector {
    name: String,
    any_namespace: bool,
    op: AttrOp,
    value: String,
    case_insensitive: bool,
}

impl AttrSelector {
    fn exists(name: String, any_namespace: bool) -> Self {
        Self {
            name,
            any_namespace,
            op: AttrOp::Exists,
            value: String::new(),
            case_insensitive: false,
        }
    }

    fn matches(&self, doc: &Document, node: NodeId) -> bool {
        let Some(element) = doc.element(node) else {
            return false;
        };
        let value = if self.any_namespace {
            element
                .attributes
                .iter()
                .find(|attr| {
                    attr.name == self.name
                        || attr
                            .name
                            .split_once(':')
                            .is_some_and(|(_, local)| local == self.name)
                })
                .map(|attr| attr.value.as_str())
        } else {
            element.attribute(&self.name)
        };
        let Some(value) = value else {
            return false;
        };
        if self.op == AttrOp::Exists {
            return true;
        }
        let (value, expected) = if self.case_insensitive {
            (value.to_ascii_lowercase(), self.value.to_ascii_lowercase())
        } else {
            (value.to_string(), self.value.clone())
        };
        match self.op {
            AttrOp::Exists => true,
            AttrOp::Equals => value == expected,
            AttrOp::Includes => value.split_whitespace().any(|part| part == expected),
            AttrOp::DashMatch => value == expected || value.starts_with(&format!("{expected}-")),
            AttrOp::Prefix => !expected.is_empty() && value.starts_with(&expected),
            AttrOp::Suffix => !expected.is_empty() && value.ends_with(&expected),
            AttrOp::Substring => !expected.is_empty() && value.contains(&expected),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Combinator {
    Descendant,
    Child,
    AdjacentSibling,
    GeneralSibling,
}

impl From<ParsedCombinator> for Combinator {
    fn from(combinator: ParsedCombinator) -> Self {
        match combinator {
            ParsedCombinator::Descendant
            | ParsedCombinator::DeepDescendant
            | ParsedCombinator::Deep => Combinator::Descendant,
            ParsedCombinator::NextSibling => Combinator::AdjacentSibling,
            ParsedCombinator::LaterSibling => Combinator::GeneralSibling,
            // Pseudo-element and shadow jumps; the compound on their right
            // never matches anyway.
            ParsedCombinator::Child
            | ParsedCombinator::PseudoElement
            | ParsedCombinator::SlotAssignment
            | ParsedCombinator::Part => Combinator::Child,
        }
    }
}

/// A complex selector: compounds joined by combinators, matched right to left.
#[derive(Debug, Clone)]
pub struct SelectorPattern {
    parts: Vec<Compound>,
    combinators: Vec<Combinator>,
    specificity: Specificity,
}

impl SelectorPattern {
    /// Parses one complex selector. Lists and invalid selectors give `None`.
    pub fn parse(selector: &str) -> Option<Self> {
        let mut patterns = parse_selector_list(selector)?;
        if patterns.len() != 1 {
            return None;
        }
        patterns.pop()
    }

    pub(crate) fn from_parsed(selector: &Selector<'_>) -> Self {
        // Components come rightmost compound first, split by combinators.
        let mut parts = vec![Compound::default()];
        let mut combinators = Vec::new();
        for component in selector.iter_raw_match_order() {
            if let Component::Combinator(combinator) = component {
                combinators.push(Combinator::from(*combinator));
                parts.push(Compound::default());
            } else if let Some(compound) = parts.last_mut() {
                compound.push(component);
            }
        }
        parts.reverse();
        combinators.reverse();
        Self {
            parts,
            combinators,
            specificity: Specificity::from_packed(selector.specificity()),
        }
    }

    pub fn matches(&self, doc: &Document, node: NodeId) -> bool {
        let Some((last, rest)) = self.parts.split_last() else {
            return false;
        };
        if !last.matches(doc, node) {
            return false;
        }
        self.matches_from(doc, node, rest, self.combinators.len())
    }

    // Backtracking match of the remaining compounds, right to left.
    fn matches_from(
        &self,
        doc: &Document,
        current: NodeId,
        parts: &[Compound],
        comb_len: usize,
    ) -> bool {
        let Some((part, rest)) = parts.split_last() else {
            return true;
        };
        let combinator = comb_len
            .checked_sub(1)
            .and_then(|idx| self.combinators.get(idx))
            .copied()
            .unwrap_or(Combinator::Descendant);
        let next_len = comb_len.saturating_sub(1);
        match combinator {
            Combinator::Child => match doc.parent(current) {
                Some(parent) if doc.element(parent).is_some() => {
                    part.matches(doc, parent) && self.matches_from(doc, parent, rest, next_len)
                }
                _ => false,
            },
            Combinator::Descendant => doc.ancestors(current).into_iter().any(|ancestor| {
                part.matches(doc, ancestor) && self.matches_from(doc, ancestor, rest, next_len)
            }),
            Combinator::AdjacentSibling => match previous_element_siblings(doc, current).first() {
                Some(prev) => {
                    part.matches(doc, *prev) && self.matches_from(doc, *prev, rest, next_len)
                }
                None => false,
            },
            Combinator::GeneralSibling => previous_element_siblings(doc, current)
                .into_iter()
                .any(|prev| {
                    part.matches(doc, prev) && self.matches_from(doc, prev, rest, next_len)
                }),
        }
    }

    pub fn specificity(&self) -> Specificity {
        self.specificity
    }
}

// Element siblings before `node`, nearest first.
fn previous_element_siblings(doc: &Document, node: NodeId) -> Vec<NodeId> {
    let Some(parent) = doc.parent(node) else {
        return Vec::new();
    };
    let siblings = doc.element_children(parent);
    let Some(pos) = siblings.iter().position(|sibling| *sibling == node) else {
        return Vec::new();
    };
    siblings[..pos].iter().rev().copied().collect()
}

/// Parses a comma-separated selector list. `None` when any selector in it is
/// invalid.
pub fn parse_selector_list(list: &str) -> Option<Vec<SelectorPattern>> {
    let parsed = SelectorList::parse_string_with_options(list, ParserOptions::default()).ok()?;
    Some(parsed.0.iter().map(SelectorPattern::from_parsed).collect())
}

/// Elements matching any selector of `selector`, in document order. `None`
/// when the list cannot be parsed.
pub fn select(doc: &Document, selector: &str) -> Option<Vec<NodeId>> {
    let patterns = parse_selector_list(selector)?;
    Some(
        doc.elements(doc.document_node())
            .into_iter()
            .filter(|node| patterns.iter().any(|pattern| pattern.matches(doc, *node)))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc() -> Document {
        Document::parse(
            r##"<svg id="root">
  <defs><linearGradient id="grad" class="paint"/></defs>
  <g id="a" class="icon big">
    <rect id="r1" class="shape"/>
    <circle id="c1" class="shape" data-kind="dot-small"/>
    <path id="p1"/>
  </g>
</svg>"##,
        )
        .expect("parse")
    }

    fn ids(doc: &Document, selector: &str) -> Vec<String> {
        select(doc, selector)
            .expect("selector parses")
            .into_iter()
            .filter_map(|node| doc.attribute(node, "id").map(|v| v.to_string()))
            .collect()
    }

    #[test]
    fn matches_type_id_and_class_selectors() {
        let doc = doc();
        assert_eq!(ids(&doc, "rect"), vec!["r1"]);
        assert_eq!(ids(&doc, "#a"), vec!["a"]);
        assert_eq!(ids(&doc, ".shape"), vec!["r1", "c1"]);
        assert_eq!(ids(&doc, "g.icon.big"), vec!["a"]);
        assert_eq!(ids(&doc, "linearGradient"), vec!["grad"]);
        assert!(ids(&doc, "lineargradient").is_empty());
        assert_eq!(ids(&doc, "rect, #p1"), vec!["r1", "p1"]);
    }

    #[test]
    fn matches_combinators() {
        let doc = doc();
        assert_eq!(ids(&doc, "svg .shape"), vec!["r1", "c1"]);
        assert_eq!(ids(&doc, "#a > path"), vec!["p1"]);
        assert_eq!(ids(&doc, "svg > rect"), Vec::<String>::new());
        assert_eq!(ids(&doc, "rect + circle"), vec!["c1"]);
        assert_eq!(ids(&doc, "rect ~ path"), vec!["p1"]);
    }

    #[test]
    fn matches_attribute_and_structural_pseudos() {
        let doc = doc();
        assert_eq!(ids(&doc, "[data-kind|=dot]"), vec!["c1"]);
        assert_eq!(ids(&doc, "[data-kind*=\"small\"]"), vec!["c1"]);
        assert_eq!(ids(&doc, "[data-kind^=DOT i]"), vec!["c1"]);
        assert_eq!(ids(&doc, "g > :first-child"), vec!["r1"]);
        assert_eq!(ids(&doc, "g > :last-child"), vec!["p1"]);
        assert_eq!(ids(&doc, "g > :nth-child(2n+1)"), vec!["r1", "p1"]);
        assert_eq!(ids(&doc, "g > :nth-last-child(1)"), vec!["p1"]);
        assert_eq!(ids(&doc, "g > circle:only-of-type"), vec!["c1"]);
        assert_eq!(ids(&doc, "defs > :only-child"), vec!["grad"]);
        assert_eq!(ids(&doc, "path:empty"), vec!["p1"]);
        assert_eq!(ids(&doc, ".shape:not(rect)"), vec!["c1"]);
        assert_eq!(ids(&doc, ":root"), vec!["root"]);
        assert!(ids(&doc, "rect:hover").is_empty());
        assert!(ids(&doc, "rect::before").is_empty());
    }

    #[test]
    fn matches_escaped_identifiers() {
        let doc = Document::parse(
            r#"<svg><rect id="a.b"/><rect id="x:y" class="c#1"/></svg>"#,
        )
        .expect("parse");
        assert_eq!(ids(&doc, r"#a\.b"), vec!["a.b"]);
        assert_eq!(ids(&doc, r"#x\:y"), vec!["x:y"]);
        assert_eq!(ids(&doc, r".c\#1"), vec!["x:y"]);
    }

    #[test]
    fn matches_compounds_after_pseudo_classes() {
        let doc = Document::parse(r#"<svg><g><rect id="r" class="c"/></g></svg>"#)
            .expect("parse");
        assert_eq!(ids(&doc, "rect:first-child.c"), vec!["r"]);
        assert_eq!(ids(&doc, ":is(rect, circle)"), vec!["r"]);
        assert_eq!(ids(&doc, "g :where(.c)"), vec!["r"]);
        assert!(ids(&doc, "rect:first-child.d").is_empty());
    }

    #[test]
    fn computes_specificity_vectors() {
        let spec = |s: &str| SelectorPattern::parse(s).expect("parse").specificity();
        assert_eq!(spec("#a"), Specificity(1, 0, 0));
        assert_eq!(spec(".cls"), Specificity(0, 1, 0));
        assert_eq!(spec("g rect"), Specificity(0, 0, 2));
        assert_eq!(spec("g#a > rect.shape[data-x]:first-child"), Specificity(1, 3, 2));
        assert_eq!(spec("*"), Specificity(0, 0, 0));
        assert_eq!(spec(":not(#a)"), Specificity(1, 0, 0));
        assert_eq!(spec(":is(#a, rect)"), Specificity(1, 0, 0));
        assert_eq!(spec(":where(#a)"), Specificity(0, 0, 0));
        assert!(spec("#a") > spec(".cls.other.third"));
    }

    #[test]
    fn rejects_unparsable_selectors() {
        let doc = doc();
        assert!(select(&doc, "").is_none());
        assert!(select(&doc, "#").is_none());
        assert!(select(&doc, "a >").is_none());
        assert!(select(&doc, "a,,b").is_none());
        assert!(SelectorPattern::parse("a, b").is_none());
    }

    #[test]
    fn parses_selector_lists() {
        let list = parse_selector_list("a, .b:not(c, d), [x=\",\"]").expect("list");
        assert_eq!(list.len(), 3);
    }
}
