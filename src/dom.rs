//! Arena-backed mutable XML tree for SVG documents.
//!
//! roxmltree is read-only, so the parsed tree is copied into a flat arena where
//! nodes are addressed by [`NodeId`]. Detached nodes stay in the arena but are no
//! longer reachable from the document node; cloning a [`Document`] keeps every
//! `NodeId` valid in the clone.

use crate::error::DocumentError;

pub const SVG_NS: &str = "http://www.w3.org/2000/svg";
pub const XLINK_NS: &str = "http://www.w3.org/1999/xlink";
const XML_NS: &str = "http://www.w3.org/XML/1998/namespace";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub name: String,
    pub attributes: Vec<Attribute>,
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
        }
    }

    /// Tag name without a namespace prefix (`svg:g` -> `g`).
    pub fn local_name(&self) -> &str {
        local_part(&self.name)
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|attr| attr.name == name)
            .map(|attr| attr.value.as_str())
    }

    pub fn id(&self) -> Option<&str> {
        self.attribute("id")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Document,
    Element(Element),
    Text(String),
    CData(String),
    Comment(String),
    ProcessingInstruction {
        target: String,
        value: Option<String>,
    },
}

#[derive(Debug, Clone)]
struct NodeData {
    kind: NodeKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

#[derive(Debug, Clone)]
pub struct Document {
    nodes: Vec<NodeData>,
    root: NodeId,
}

impl Document {
    /// Creates a document holding a single empty root element.
    pub fn with_root(name: impl Into<String>) -> Self {
        let mut doc = Self {
            nodes: vec![NodeData {
                kind: NodeKind::Document,
                parent: None,
                children: Vec::new(),
            }],
            root: NodeId(0),
        };
        let root = doc.create_element(name);
        doc.append(doc.document_node(), root);
        doc.root = root;
        doc
    }

    pub fn parse(text: &str) -> Result<Self, DocumentError> {
        let options = roxmltree::ParsingOptions {
            allow_dtd: true,
            ..roxmltree::ParsingOptions::default()
        };
        let parsed = roxmltree::Document::parse_with_options(text, options)
            .map_err(|err| DocumentError::Xml(err.to_string()))?;

        let mut doc = Self {
            nodes: vec![NodeData {
                kind: NodeKind::Document,
                parent: None,
                children: Vec::new(),
            }],
            root: NodeId(0),
        };
        let document_node = doc.document_node();
        for child in parsed.root().children() {
            if let Some(id) = doc.import_node(child) {
                doc.append(document_node, id);
            }
        }

        let root_xml = parsed.root_element();
        let root = doc
            .children(document_node)
            .iter()
            .copied()
            .find(|id| doc.element(*id).is_some())
            .ok_or_else(|| DocumentError::Xml("document has no root element".to_string()))?;
        if root_xml.tag_name().name() != "svg" {
            return Err(DocumentError::NoSvgRoot(
                root_xml.tag_name().name().to_string(),
            ));
        }
        doc.root = root;
        Ok(doc)
    }

    fn import_node(&mut self, node: roxmltree::Node<'_, '_>) -> Option<NodeId> {
        match node.node_type() {
            roxmltree::NodeType::Element => {
                let mut element = Element::new(qualified_name(
                    node,
                    node.tag_name().namespace(),
                    node.tag_name().name(),
                ));
                for (prefix, uri) in declared_namespaces(node) {
                    let name = match prefix {
                        Some(prefix) => format!("xmlns:{prefix}"),
                        None => "xmlns".to_string(),
                    };
                    element.attributes.push(Attribute { name, value: uri });
                }
                for attr in node.attributes() {
                    element.attributes.push(Attribute {
                        name: qualified_name(node, attr.namespace(), attr.name()),
                        value: attr.value().to_string(),
                    });
                }
                let id = self.push(NodeKind::Element(element));
                for child in node.children() {
                    if let Some(child_id) = self.import_node(child) {
                        self.append(id, child_id);
                    }
                }
                Some(id)
            }
            roxmltree::NodeType::Text => {
                let text = node.text().unwrap_or_default().to_string();
                Some(self.push(NodeKind::Text(text)))
            }
            roxmltree::NodeType::Comment => {
                let text = node.text().unwrap_or_default().to_string();
                Some(self.push(NodeKind::Comment(text)))
            }
            roxmltree::NodeType::PI => {
                let pi = node.pi()?;
                Some(self.push(NodeKind::ProcessingInstruction {
                    target: pi.target.to_string(),
                    value: pi.value.map(|v| v.to_string()),
                }))
            }
            roxmltree::NodeType::Root => None,
        }
    }

    fn push(&mut self, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(NodeData {
            kind,
            parent: None,
            children: Vec::new(),
        });
        id
    }

    pub fn document_node(&self) -> NodeId {
        NodeId(0)
    }

    /// The root `<svg>` element.
    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.nodes[id.0].kind
    }

    pub fn element(&self, id: NodeId) -> Option<&Element> {
        match &self.nodes[id.0].kind {
            NodeKind::Element(element) => Some(element),
            _ => None,
        }
    }

    pub fn element_mut(&mut self, id: NodeId) -> Option<&mut Element> {
        match &mut self.nodes[id.0].kind {
            NodeKind::Element(element) => Some(element),
            _ => None,
        }
    }

    pub fn local_name(&self, id: NodeId) -> Option<&str> {
        self.element(id).map(|el| el.local_name())
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.0].parent
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.0].children
    }

    pub fn element_children(&self, id: NodeId) -> Vec<NodeId> {
        self.children(id)
            .iter()
            .copied()
            .filter(|child| self.element(*child).is_some())
            .collect()
    }

    /// Element ancestors, nearest first. The node itself is not included.
    pub fn ancestors(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut cursor = self.parent(id);
        while let Some(parent) = cursor {
            if self.element(parent).is_some() {
                out.push(parent);
            }
            cursor = self.parent(parent);
        }
        out
    }

    /// The node and everything below it, in document order.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            out.push(current);
            for child in self.children(current).iter().rev() {
                stack.push(*child);
            }
        }
        out
    }

    /// Elements below `scope` (inclusive), in document order.
    pub fn elements(&self, scope: NodeId) -> Vec<NodeId> {
        self.descendants(scope)
            .into_iter()
            .filter(|id| self.element(*id).is_some())
            .collect()
    }

    pub fn elements_by_tag(&self, local_name: &str) -> Vec<NodeId> {
        self.elements(self.document_node())
            .into_iter()
            .filter(|id| self.local_name(*id) == Some(local_name))
            .collect()
    }

    /// First element below `scope` (inclusive) carrying `id`.
    pub fn element_by_id(&self, scope: NodeId, id: &str) -> Option<NodeId> {
        self.elements(scope)
            .into_iter()
            .find(|node| self.element(*node).and_then(|el| el.id()) == Some(id))
    }

    pub fn attribute(&self, id: NodeId, name: &str) -> Option<&str> {
        self.element(id)?.attribute(name)
    }

    pub fn attributes(&self, id: NodeId) -> &[Attribute] {
        match self.element(id) {
            Some(element) => &element.attributes,
            None => &[],
        }
    }

    pub fn set_attributes(&mut self, id: NodeId, attributes: Vec<Attribute>) {
        if let Some(element) = self.element_mut(id) {
            element.attributes = attributes;
        }
    }

    /// Sets an attribute, keeping its position when it already exists.
    pub fn set_attribute(&mut self, id: NodeId, name: &str, value: impl Into<String>) {
        let value = value.into();
        let Some(element) = self.element_mut(id) else {
            return;
        };
        if let Some(attr) = element.attributes.iter_mut().find(|a| a.name == name) {
            attr.value = value;
        } else {
            element.attributes.push(Attribute {
                name: name.to_string(),
                value,
            });
        }
    }

    pub fn remove_attribute(&mut self, id: NodeId, name: &str) -> Option<String> {
        let element = self.element_mut(id)?;
        let pos = element.attributes.iter().position(|a| a.name == name)?;
        Some(element.attributes.remove(pos).value)
    }

    pub fn text_content(&self, id: NodeId) -> String {
        let mut out = String::new();
        for node in self.descendants(id) {
            match self.kind(node) {
                NodeKind::Text(text) | NodeKind::CData(text) => out.push_str(text),
                _ => {}
            }
        }
        out
    }

    pub fn create_element(&mut self, name: impl Into<String>) -> NodeId {
        self.push(NodeKind::Element(Element::new(name)))
    }

    pub fn create_text(&mut self, text: impl Into<String>) -> NodeId {
        self.push(NodeKind::Text(text.into()))
    }

    pub fn create_cdata(&mut self, text: impl Into<String>) -> NodeId {
        self.push(NodeKind::CData(text.into()))
    }

    pub fn append(&mut self, parent: NodeId, child: NodeId) {
        self.detach(child);
        self.nodes[child.0].parent = Some(parent);
        self.nodes[parent.0].children.push(child);
    }

    pub fn prepend(&mut self, parent: NodeId, child: NodeId) {
        self.detach(child);
        self.nodes[child.0].parent = Some(parent);
        self.nodes[parent.0].children.insert(0, child);
    }

    /// Unlinks a node (and its subtree) from its parent.
    pub fn detach(&mut self, id: NodeId) {
        let Some(parent) = self.nodes[id.0].parent.take() else {
            return;
        };
        self.nodes[parent.0].children.retain(|child| *child != id);
    }

    /// Whether the node is still reachable from the document node.
    pub fn is_attached(&self, id: NodeId) -> bool {
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            if current == self.document_node() {
                return true;
            }
            cursor = self.parent(current);
        }
        false
    }

    /// Value of a property in the element's `style` attribute.
    pub fn style_property(&self, id: NodeId, name: &str) -> Option<String> {
        let style = self.attribute(id, "style")?;
        parse_style_declarations(style)
            .into_iter()
            .find(|(property, _)| property == name)
            .map(|(_, value)| value)
    }

    pub fn set_style_property(&mut self, id: NodeId, name: &str, value: &str) {
        let mut declarations = self
            .attribute(id, "style")
            .map(parse_style_declarations)
            .unwrap_or_default();
        match declarations.iter_mut().find(|(property, _)| property == name) {
            Some(existing) => existing.1 = value.to_string(),
            None => declarations.push((name.to_string(), value.to_string())),
        }
        self.set_attribute(id, "style", serialize_style_declarations(&declarations));
    }

    /// Effective presentation value: inline style first, then the attribute.
    pub fn presentation_value(&self, id: NodeId, name: &str) -> Option<String> {
        self.style_property(id, name)
            .or_else(|| self.attribute(id, name).map(|v| v.to_string()))
    }

    /// Copy holding only nodes reachable from the document node.
    pub fn compacted(&self) -> Document {
        let mut out = Document {
            nodes: vec![NodeData {
                kind: NodeKind::Document,
                parent: None,
                children: Vec::new(),
            }],
            root: NodeId(0),
        };
        for child in self.children(self.document_node()) {
            let copied = out.copy_from(self, *child);
            out.append(out.document_node(), copied);
            if *child == self.root {
                out.root = copied;
            }
        }
        out
    }

    fn copy_from(&mut self, source: &Document, id: NodeId) -> NodeId {
        let copied = self.push(source.kind(id).clone());
        for child in source.children(id) {
            let child_copy = self.copy_from(source, *child);
            self.append(copied, child_copy);
        }
        copied
    }

    pub fn to_xml(&self) -> String {
        let mut out = String::new();
        for (idx, child) in self.children(self.document_node()).iter().enumerate() {
            if idx > 0 {
                out.push('\n');
            }
            self.write_xml(*child, &mut out);
        }
        out
    }

    pub fn node_to_xml(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.write_xml(id, &mut out);
        out
    }

    /// Indented serialization. Whitespace-only text between elements is
    /// dropped; elements with mixed content are written on one line.
    pub fn to_xml_pretty(&self) -> String {
        let mut out = String::new();
        for child in self.children(self.document_node()) {
            self.write_xml_pretty(*child, 0, &mut out);
        }
        out
    }

    fn write_xml(&self, id: NodeId, out: &mut String) {
        match self.kind(id) {
            NodeKind::Document => {
                for child in self.children(id) {
                    self.write_xml(*child, out);
                }
            }
            NodeKind::Element(element) => {
                write_start_tag(element, out);
                let children = self.children(id);
                if children.is_empty() {
                    out.push_str("/>");
                    return;
                }
                out.push('>');
                for child in children {
                    self.write_xml(*child, out);
                }
                out.push_str("</");
                out.push_str(&element.name);
                out.push('>');
            }
            NodeKind::Text(text) => escape_xml_text(text, out),
            NodeKind::CData(text) => {
                out.push_str("<![CDATA[");
                out.push_str(&text.replace("]]>", "]]]]><![CDATA[>"));
                out.push_str("]]>");
            }
            NodeKind::Comment(text) => {
                out.push_str("<!--");
                out.push_str(text);
                out.push_str("-->");
            }
            NodeKind::ProcessingInstruction { target, value } => {
                out.push_str("<?");
                out.push_str(target);
                if let Some(value) = value {
                    out.push(' ');
                    out.push_str(value);
                }
                out.push_str("?>");
            }
        }
    }

    fn write_xml_pretty(&self, id: NodeId, depth: usize, out: &mut String) {
        let indent = "  ".repeat(depth);
        match self.kind(id) {
            NodeKind::Text(text) if text.trim().is_empty() => {}
            NodeKind::Element(element) => {
                let children = self.children(id);
                let mixed = children.iter().any(|child| match self.kind(*child) {
                    NodeKind::Text(text) => !text.trim().is_empty(),
                    NodeKind::CData(_) => true,
                    _ => false,
                });
                out.push_str(&indent);
                if mixed || children.is_empty() {
                    self.write_xml(id, out);
                    out.push('\n');
                    return;
                }
                write_start_tag(element, out);
                out.push_str(">\n");
                for child in children {
                    self.write_xml_pretty(*child, depth + 1, out);
                }
                out.push_str(&indent);
                out.push_str("</");
                out.push_str(&element.name);
                out.push_str(">\n");
            }
            _ => {
                out.push_str(&indent);
                self.write_xml(id, out);
                out.push('\n');
            }
        }
    }
}

fn local_part(name: &str) -> &str {
    name.rsplit_once(':').map(|(_, local)| local).unwrap_or(name)
}

fn qualified_name(node: roxmltree::Node<'_, '_>, namespace: Option<&str>, local: &str) -> String {
    let Some(uri) = namespace else {
        return local.to_string();
    };
    let prefix = node.lookup_prefix(uri).or(match uri {
        XML_NS => Some("xml"),
        _ => None,
    });
    match prefix {
        Some(prefix) if !prefix.is_empty() => format!("{prefix}:{local}"),
        _ if uri == XLINK_NS => format!("xlink:{local}"),
        _ => local.to_string(),
    }
}

// Namespace bindings introduced on this element rather than inherited.
fn declared_namespaces(node: roxmltree::Node<'_, '_>) -> Vec<(Option<String>, String)> {
    let parent = node.parent_element();
    node.namespaces()
        .filter(|ns| ns.name() != Some("xml"))
        .filter(|ns| match parent {
            Some(parent) => !parent
                .namespaces()
                .any(|p| p.name() == ns.name() && p.uri() == ns.uri()),
            None => true,
        })
        .map(|ns| (ns.name().map(|n| n.to_string()), ns.uri().to_string()))
        .collect()
}

fn write_start_tag(element: &Element, out: &mut String) {
    out.push('<');
    out.push_str(&element.name);
    for attr in &element.attributes {
        out.push(' ');
        out.push_str(&attr.name);
        out.push_str("=\"");
        escape_xml_attr(&attr.value, out);
        out.push('"');
    }
}

fn escape_xml_attr(input: &str, out: &mut String) {
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
}

fn escape_xml_text(input: &str, out: &mut String) {
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(ch),
        }
    }
}

/// Splits a `style` attribute into `(property, value)` pairs. Semicolons inside
/// quotes or parentheses (data URIs) do not end a declaration.
pub fn parse_style_declarations(input: &str) -> Vec<(String, String)> {
    let mut out: Vec<(String, String)> = Vec::new();
    let mut push_decl = |decl: &str| {
        let decl = decl.trim();
        if decl.is_empty() {
            return;
        }
        let Some((k, v)) = decl.split_once(':') else {
            return;
        };
        let key = k.trim();
        let key = if key.starts_with("--") {
            key.to_string()
        } else {
            key.to_ascii_lowercase()
        };
        let val = v.trim().to_string();
        if key.is_empty() {
            return;
        }
        match out.iter_mut().find(|(property, _)| *property == key) {
            Some(existing) => existing.1 = val,
            None => out.push((key, val)),
        }
    };

    let mut start = 0usize;
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    for (idx, ch) in input.char_indices() {
        if let Some(q) = quote {
            if ch == q {
                quote = None;
            }
            continue;
        }
        match ch {
            '"' | '\'' => quote = Some(ch),
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ';' if depth == 0 => {
                push_decl(&input[start..idx]);
                start = idx + 1;
            }
            _ => {}
        }
    }
    push_decl(&input[start..]);
    out
}

pub fn serialize_style_declarations(declarations: &[(String, String)]) -> String {
    declarations
        .iter()
        .map(|(property, value)| format!("{property}: {value}"))
        .collect::<Vec<_>>()
        .join("; ")
}
