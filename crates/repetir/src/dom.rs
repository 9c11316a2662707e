//! Document abstraction for element capture and resolution.
//!
//! The bundle builder and element finder never touch a live browser page
//! directly: they operate on [`DomDocument`], a read-only view of one
//! document (main frame, same-origin iframe, or shadow root). Any conforming
//! implementation works; [`MemoryDocument`] is the in-memory implementation
//! used by tests and embedders that mirror a page snapshot.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A point in 2D space
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// X coordinate
    pub x: f32,
    /// Y coordinate
    pub y: f32,
}

impl Point {
    /// Create a new point
    #[must_use]
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to another point
    #[must_use]
    pub fn distance_to(&self, other: &Self) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx.hypot(dy)
    }
}

/// Bounding box for an element (last known on-screen position)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// X position
    pub x: f32,
    /// Y position
    pub y: f32,
    /// Width
    pub width: f32,
    /// Height
    pub height: f32,
}

impl BoundingBox {
    /// Create a new bounding box
    #[must_use]
    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Get the center point
    #[must_use]
    pub fn center(&self) -> Point {
        Point::new(self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    /// Check if a point is inside this bounding box
    #[must_use]
    pub fn contains(&self, point: &Point) -> bool {
        point.x >= self.x
            && point.x <= self.x + self.width
            && point.y >= self.y
            && point.y <= self.y + self.height
    }
}

/// Opaque handle to one element within a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ElementId(usize);

/// Result of descending into a child frame.
pub enum FrameAccess<'a> {
    /// Same-origin frame; search continues in its document
    Document(&'a dyn DomDocument),
    /// Cross-origin frame; resolution must fail fast, not retry
    CrossOrigin,
    /// No frame with this identifier (may not have loaded yet)
    Missing,
}

impl std::fmt::Debug for FrameAccess<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Document(_) => f.write_str("Document(..)"),
            Self::CrossOrigin => f.write_str("CrossOrigin"),
            Self::Missing => f.write_str("Missing"),
        }
    }
}

/// Result of piercing into a shadow root.
pub enum ShadowAccess<'a> {
    /// Open shadow root; search continues in its document
    Root(&'a dyn DomDocument),
    /// Closed shadow root; resolution must fail fast, not retry
    Closed,
    /// No shadow host with this identifier
    Missing,
}

impl std::fmt::Debug for ShadowAccess<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Root(_) => f.write_str("Root(..)"),
            Self::Closed => f.write_str("Closed"),
            Self::Missing => f.write_str("Missing"),
        }
    }
}

/// Read-only view of one document.
pub trait DomDocument {
    /// Origin/path of the page this document belongs to
    fn page_url(&self) -> &str;

    /// The document root element
    fn root(&self) -> ElementId;

    /// All elements in document order
    fn all_elements(&self) -> Vec<ElementId>;

    /// Element tag name, lowercase
    fn tag(&self, el: ElementId) -> Option<&str>;

    /// A single attribute value
    fn attribute(&self, el: ElementId, name: &str) -> Option<&str>;

    /// All attributes as name/value pairs
    fn attributes(&self, el: ElementId) -> Vec<(String, String)>;

    /// Visible text content of the element and its descendants
    fn text(&self, el: ElementId) -> String;

    /// Live layout box, if the element is rendered
    fn bounding_box(&self, el: ElementId) -> Option<BoundingBox>;

    /// Parent element, `None` at the root
    fn parent(&self, el: ElementId) -> Option<ElementId>;

    /// Child elements in order
    fn children(&self, el: ElementId) -> Vec<ElementId>;

    /// Elements matching a CSS selector
    fn query_css(&self, selector: &str) -> Vec<ElementId>;

    /// Elements matching an XPath expression
    fn query_xpath(&self, xpath: &str) -> Vec<ElementId>;

    /// Frame identifiers from outermost to innermost, `None` in the main document
    fn frame_chain(&self) -> Option<&[String]>;

    /// Shadow-host identifiers from innermost to outermost, `None` outside shadow content
    fn shadow_chain(&self) -> Option<&[String]>;

    /// Descend into a child frame by identifier
    fn enter_frame(&self, frame_id: &str) -> FrameAccess<'_>;

    /// Pierce into a shadow root by host identifier
    fn enter_shadow(&self, host_id: &str) -> ShadowAccess<'_>;
}

/// Class tokens of an element, split from its `class` attribute.
#[must_use]
pub fn classes_of(doc: &dyn DomDocument, el: ElementId) -> Vec<String> {
    doc.attribute(el, "class")
        .map(|c| c.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default()
}

// =============================================================================
// IN-MEMORY IMPLEMENTATION
// =============================================================================

/// Element description used to grow a [`MemoryDocument`].
#[derive(Debug, Clone, Default)]
pub struct MemoryElement {
    tag: String,
    attributes: BTreeMap<String, String>,
    text: String,
    bounding: Option<BoundingBox>,
}

impl MemoryElement {
    /// Create a new element with the given tag
    #[must_use]
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into().to_lowercase(),
            ..Self::default()
        }
    }

    /// Set an attribute
    #[must_use]
    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// Set the `class` attribute
    #[must_use]
    pub fn with_class(self, classes: impl Into<String>) -> Self {
        self.with_attr("class", classes)
    }

    /// Set the text content
    #[must_use]
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    /// Set the layout box
    #[must_use]
    pub const fn with_bounding(mut self, bounding: BoundingBox) -> Self {
        self.bounding = Some(bounding);
        self
    }
}

#[derive(Debug, Clone)]
struct Node {
    tag: String,
    attributes: BTreeMap<String, String>,
    text: String,
    bounding: Option<BoundingBox>,
    parent: Option<ElementId>,
    children: Vec<ElementId>,
}

#[derive(Debug)]
enum FrameSlot {
    SameOrigin(MemoryDocument),
    CrossOrigin,
}

#[derive(Debug)]
enum ShadowSlot {
    Open(MemoryDocument),
    Closed,
}

/// In-memory [`DomDocument`] implementation.
///
/// Elements live in an arena indexed by [`ElementId`]; the document is
/// created with an `html` root and grown with [`MemoryDocument::append_child`].
/// Child frames and shadow roots are themselves `MemoryDocument`s attached by
/// identifier.
#[derive(Debug)]
pub struct MemoryDocument {
    url: String,
    nodes: Vec<Node>,
    frame_path: Vec<String>,
    shadow_path: Vec<String>,
    frames: BTreeMap<String, FrameSlot>,
    shadows: BTreeMap<String, ShadowSlot>,
}

impl MemoryDocument {
    /// Create an empty document with an `html` root
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            nodes: vec![Node {
                tag: "html".to_string(),
                attributes: BTreeMap::new(),
                text: String::new(),
                bounding: None,
                parent: None,
                children: Vec::new(),
            }],
            frame_path: Vec::new(),
            shadow_path: Vec::new(),
            frames: BTreeMap::new(),
            shadows: BTreeMap::new(),
        }
    }

    /// Append an element under `parent`, returning its handle
    pub fn append_child(&mut self, parent: ElementId, element: MemoryElement) -> ElementId {
        let id = ElementId(self.nodes.len());
        self.nodes.push(Node {
            tag: element.tag,
            attributes: element.attributes,
            text: element.text,
            bounding: element.bounding,
            parent: Some(parent),
            children: Vec::new(),
        });
        self.nodes[parent.0].children.push(id);
        id
    }

    /// Attach a same-origin child frame
    pub fn attach_frame(&mut self, frame_id: impl Into<String>, mut doc: MemoryDocument) {
        let frame_id = frame_id.into();
        let mut path = self.frame_path.clone();
        path.push(frame_id.clone());
        doc.frame_path = path;
        self.frames.insert(frame_id, FrameSlot::SameOrigin(doc));
    }

    /// Attach a cross-origin child frame (inaccessible to resolution)
    pub fn attach_cross_origin_frame(&mut self, frame_id: impl Into<String>) {
        self.frames.insert(frame_id.into(), FrameSlot::CrossOrigin);
    }

    /// Attach an open shadow root under the given host identifier
    pub fn attach_shadow(&mut self, host_id: impl Into<String>, mut doc: MemoryDocument) {
        let host_id = host_id.into();
        let mut path = vec![host_id.clone()];
        path.extend(self.shadow_path.iter().cloned());
        doc.shadow_path = path;
        doc.frame_path.clone_from(&self.frame_path);
        self.shadows.insert(host_id, ShadowSlot::Open(doc));
    }

    /// Attach a closed shadow root (unpierceable by resolution)
    pub fn attach_closed_shadow(&mut self, host_id: impl Into<String>) {
        self.shadows.insert(host_id.into(), ShadowSlot::Closed);
    }

    /// Mutate an element's bounding box (simulating layout changes)
    pub fn set_bounding_box(&mut self, el: ElementId, bounding: Option<BoundingBox>) {
        if let Some(node) = self.nodes.get_mut(el.0) {
            node.bounding = bounding;
        }
    }

    /// Mutate an element's attribute (simulating markup changes)
    pub fn set_attribute(
        &mut self,
        el: ElementId,
        name: impl Into<String>,
        value: impl Into<String>,
    ) {
        if let Some(node) = self.nodes.get_mut(el.0) {
            node.attributes.insert(name.into(), value.into());
        }
    }

    /// Remove an element's attribute
    pub fn remove_attribute(&mut self, el: ElementId, name: &str) {
        if let Some(node) = self.nodes.get_mut(el.0) {
            node.attributes.remove(name);
        }
    }

    fn node(&self, el: ElementId) -> Option<&Node> {
        self.nodes.get(el.0)
    }

    /// 1-based index among same-tag siblings
    fn sibling_index(&self, el: ElementId) -> usize {
        let Some(node) = self.node(el) else { return 1 };
        let Some(parent) = node.parent else { return 1 };
        let mut index = 0;
        for sibling in &self.nodes[parent.0].children {
            if self.nodes[sibling.0].tag == node.tag {
                index += 1;
            }
            if *sibling == el {
                break;
            }
        }
        index.max(1)
    }

    fn matches_compound(&self, el: ElementId, sel: &CompoundSelector) -> bool {
        let Some(node) = self.node(el) else {
            return false;
        };
        if let Some(tag) = &sel.tag {
            if node.tag != *tag {
                return false;
            }
        }
        if let Some(id) = &sel.id {
            if node.attributes.get("id") != Some(id) {
                return false;
            }
        }
        if !sel.classes.is_empty() {
            let class_attr = node.attributes.get("class").map(String::as_str).unwrap_or("");
            let classes: Vec<&str> = class_attr.split_whitespace().collect();
            if !sel.classes.iter().all(|c| classes.contains(&c.as_str())) {
                return false;
            }
        }
        for (name, value) in &sel.attrs {
            if node.attributes.get(name) != Some(value) {
                return false;
            }
        }
        true
    }

    fn has_matching_ancestors(&self, el: ElementId, compounds: &[CompoundSelector]) -> bool {
        let mut remaining = compounds;
        let mut current = self.node(el).and_then(|n| n.parent);
        while let Some(ancestor) = current {
            if remaining.is_empty() {
                return true;
            }
            if self.matches_compound(ancestor, remaining.last().expect("non-empty")) {
                remaining = &remaining[..remaining.len() - 1];
            }
            current = self.node(ancestor).and_then(|n| n.parent);
        }
        remaining.is_empty()
    }
}

impl DomDocument for MemoryDocument {
    fn page_url(&self) -> &str {
        &self.url
    }

    fn root(&self) -> ElementId {
        ElementId(0)
    }

    fn all_elements(&self) -> Vec<ElementId> {
        (0..self.nodes.len()).map(ElementId).collect()
    }

    fn tag(&self, el: ElementId) -> Option<&str> {
        self.node(el).map(|n| n.tag.as_str())
    }

    fn attribute(&self, el: ElementId, name: &str) -> Option<&str> {
        self.node(el)
            .and_then(|n| n.attributes.get(name))
            .map(String::as_str)
    }

    fn attributes(&self, el: ElementId) -> Vec<(String, String)> {
        self.node(el)
            .map(|n| {
                n.attributes
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn text(&self, el: ElementId) -> String {
        let Some(node) = self.node(el) else {
            return String::new();
        };
        let mut out = node.text.clone();
        for child in &node.children {
            let child_text = self.text(*child);
            if !child_text.is_empty() {
                if !out.is_empty() {
                    out.push(' ');
                }
                out.push_str(&child_text);
            }
        }
        out
    }

    fn bounding_box(&self, el: ElementId) -> Option<BoundingBox> {
        self.node(el).and_then(|n| n.bounding)
    }

    fn parent(&self, el: ElementId) -> Option<ElementId> {
        self.node(el).and_then(|n| n.parent)
    }

    fn children(&self, el: ElementId) -> Vec<ElementId> {
        self.node(el).map(|n| n.children.clone()).unwrap_or_default()
    }

    fn query_css(&self, selector: &str) -> Vec<ElementId> {
        let compounds: Vec<CompoundSelector> = selector
            .split_whitespace()
            .filter_map(parse_compound)
            .collect();
        let Some((target, ancestors)) = compounds.split_last() else {
            return Vec::new();
        };
        self.all_elements()
            .into_iter()
            .filter(|el| self.matches_compound(*el, target))
            .filter(|el| ancestors.is_empty() || self.has_matching_ancestors(*el, ancestors))
            .collect()
    }

    fn query_xpath(&self, xpath: &str) -> Vec<ElementId> {
        if let Some(rest) = xpath.strip_prefix("//") {
            let Some((tag, predicate)) = parse_xpath_step(rest) else {
                return Vec::new();
            };
            return self
                .all_elements()
                .into_iter()
                .filter(|el| {
                    let Some(node) = self.node(*el) else {
                        return false;
                    };
                    if tag != "*" && node.tag != tag {
                        return false;
                    }
                    match &predicate {
                        XPathPredicate::None => true,
                        XPathPredicate::Attr(name, value) => {
                            node.attributes.get(name) == Some(value)
                        }
                        XPathPredicate::Index(i) => self.sibling_index(*el) == *i,
                    }
                })
                .collect();
        }

        if !xpath.starts_with('/') {
            return Vec::new();
        }
        let mut segments = xpath.split('/').filter(|s| !s.is_empty());
        let Some(first) = segments.next().and_then(parse_positional_step) else {
            return Vec::new();
        };
        let root = self.root();
        let root_tag = self.tag(root).unwrap_or_default();
        if first.0 != root_tag || first.1.is_some_and(|i| i != 1) {
            return Vec::new();
        }
        let mut current = vec![root];
        for segment in segments {
            let Some((tag, index)) = parse_positional_step(segment) else {
                return Vec::new();
            };
            let mut next = Vec::new();
            for el in &current {
                for child in self.children(*el) {
                    if self.tag(child) == Some(tag.as_str())
                        && index.map_or(true, |i| self.sibling_index(child) == i)
                    {
                        next.push(child);
                    }
                }
            }
            current = next;
        }
        current
    }

    fn frame_chain(&self) -> Option<&[String]> {
        if self.frame_path.is_empty() {
            None
        } else {
            Some(&self.frame_path)
        }
    }

    fn shadow_chain(&self) -> Option<&[String]> {
        if self.shadow_path.is_empty() {
            None
        } else {
            Some(&self.shadow_path)
        }
    }

    fn enter_frame(&self, frame_id: &str) -> FrameAccess<'_> {
        match self.frames.get(frame_id) {
            Some(FrameSlot::SameOrigin(doc)) => FrameAccess::Document(doc),
            Some(FrameSlot::CrossOrigin) => FrameAccess::CrossOrigin,
            None => FrameAccess::Missing,
        }
    }

    fn enter_shadow(&self, host_id: &str) -> ShadowAccess<'_> {
        match self.shadows.get(host_id) {
            Some(ShadowSlot::Open(doc)) => ShadowAccess::Root(doc),
            Some(ShadowSlot::Closed) => ShadowAccess::Closed,
            None => ShadowAccess::Missing,
        }
    }
}

// =============================================================================
// SELECTOR PARSING (CSS and XPath subsets)
// =============================================================================

#[derive(Debug, Default)]
struct CompoundSelector {
    tag: Option<String>,
    id: Option<String>,
    classes: Vec<String>,
    attrs: Vec<(String, String)>,
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '-' || c == '_'
}

fn parse_compound(input: &str) -> Option<CompoundSelector> {
    let mut sel = CompoundSelector::default();
    let mut chars = input.chars().peekable();
    let mut saw_any = false;

    while let Some(&c) = chars.peek() {
        match c {
            '#' => {
                chars.next();
                let ident: String = take_ident(&mut chars);
                if ident.is_empty() {
                    return None;
                }
                sel.id = Some(ident);
            }
            '.' => {
                chars.next();
                let ident: String = take_ident(&mut chars);
                if ident.is_empty() {
                    return None;
                }
                sel.classes.push(ident);
            }
            '[' => {
                chars.next();
                let body: String = chars.by_ref().take_while(|&c| c != ']').collect();
                let (name, value) = body.split_once('=')?;
                let value = value.trim_matches(|c| c == '"' || c == '\'');
                sel.attrs.push((name.trim().to_string(), value.to_string()));
            }
            _ if is_ident_char(c) && sel.tag.is_none() && !saw_any => {
                sel.tag = Some(take_ident(&mut chars).to_lowercase());
            }
            _ => return None,
        }
        saw_any = true;
    }

    if saw_any {
        Some(sel)
    } else {
        None
    }
}

fn take_ident(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> String {
    let mut ident = String::new();
    while let Some(&c) = chars.peek() {
        if is_ident_char(c) {
            ident.push(c);
            chars.next();
        } else {
            break;
        }
    }
    ident
}

#[derive(Debug)]
enum XPathPredicate {
    None,
    Attr(String, String),
    Index(usize),
}

/// Parse `tag`, `tag[@attr='value']`, `*[@attr='value']`, or `tag[3]`.
fn parse_xpath_step(input: &str) -> Option<(String, XPathPredicate)> {
    let (name, rest) = match input.find('[') {
        Some(pos) => (&input[..pos], Some(&input[pos..])),
        None => (input, None),
    };
    if name.is_empty() {
        return None;
    }
    let Some(rest) = rest else {
        return Some((name.to_lowercase(), XPathPredicate::None));
    };
    let body = rest.strip_prefix('[')?.strip_suffix(']')?;
    if let Some(attr) = body.strip_prefix('@') {
        let (attr_name, value) = attr.split_once('=')?;
        let value = value.trim_matches('\'').trim_matches('"');
        return Some((
            name.to_lowercase(),
            XPathPredicate::Attr(attr_name.to_string(), value.to_string()),
        ));
    }
    let index: usize = body.parse().ok()?;
    Some((name.to_lowercase(), XPathPredicate::Index(index)))
}

/// Parse a positional path step (`tag` or `tag[3]`)
fn parse_positional_step(input: &str) -> Option<(String, Option<usize>)> {
    match parse_xpath_step(input)? {
        (tag, XPathPredicate::None) => Some((tag, None)),
        (tag, XPathPredicate::Index(i)) => Some((tag, Some(i))),
        _ => None,
    }
}
