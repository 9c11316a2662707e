//! Locator bundle capture.
//!
//! At record time every targeted element is captured once as a
//! [`LocatorBundle`]: a redundant, ranked set of identification signals
//! (id, data attributes, name, accessible label, text, classes, two
//! independently generated structural selectors, and a last-known layout
//! box). The bundle is consumed many times by the finder, which tries the
//! signals in priority order when the page has changed.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use crate::dom::{classes_of, BoundingBox, DomDocument, ElementId};

/// Default cap on captured text length
pub const DEFAULT_MAX_TEXT_LENGTH: usize = 100;

/// Default cap on captured class tokens
pub const DEFAULT_MAX_CLASSES: usize = 10;

/// Default cap on captured `data-*` attributes
pub const DEFAULT_MAX_DATA_ATTRS: usize = 10;

/// Options controlling bundle capture
#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Maximum captured text length
    pub max_text_length: usize,
    /// Maximum number of class tokens
    pub max_classes: usize,
    /// Maximum number of `data-*` attributes
    pub max_data_attrs: usize,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            max_text_length: DEFAULT_MAX_TEXT_LENGTH,
            max_classes: DEFAULT_MAX_CLASSES,
            max_data_attrs: DEFAULT_MAX_DATA_ATTRS,
        }
    }
}

impl BuildOptions {
    /// Create options with defaults
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the text length cap
    #[must_use]
    pub const fn with_max_text_length(mut self, max: usize) -> Self {
        self.max_text_length = max;
        self
    }

    /// Set the class token cap
    #[must_use]
    pub const fn with_max_classes(mut self, max: usize) -> Self {
        self.max_classes = max;
        self
    }

    /// Set the data-attribute cap
    #[must_use]
    pub const fn with_max_data_attrs(mut self, max: usize) -> Self {
        self.max_data_attrs = max;
        self
    }
}

/// The redundant identity record for one element.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocatorBundle {
    /// Element tag name (required; a bundle without it is invalid)
    pub tag: String,
    /// Element id attribute
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Element name attribute
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Placeholder attribute
    #[serde(skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
    /// Accessible label (explicit `aria-label`, else associated `<label for=…>`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aria: Option<String>,
    /// Text content, truncated to the configured cap
    pub text: String,
    /// Custom `data-*` attributes, capped count
    pub data_attrs: BTreeMap<String, String>,
    /// Class tokens in document order, capped count
    pub classes: Vec<String>,
    /// Generated CSS selector (self-sufficient)
    pub css: String,
    /// Generated XPath selector (self-sufficient, independent of `css`)
    pub xpath: String,
    /// Page origin/path at capture time
    pub page_url: String,
    /// Last known on-screen position
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bounding: Option<BoundingBox>,
    /// Frame identifiers outermost→innermost, `None` in the main document
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iframe_chain: Option<Vec<String>>,
    /// Shadow-host identifiers innermost→outermost, `None` outside shadow content
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shadow_hosts: Option<Vec<String>>,
}

impl LocatorBundle {
    /// A bundle missing its tag is invalid and must never be resolved
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.tag.is_empty()
    }

    /// Whether the finder has at least one usable path to the element:
    /// one of id/xpath/css, or data-attrs/name/text combined with a
    /// bounding box.
    #[must_use]
    pub fn is_resolvable(&self) -> bool {
        if !self.is_valid() {
            return false;
        }
        if self.id.as_ref().is_some_and(|v| !v.is_empty())
            || !self.xpath.is_empty()
            || !self.css.is_empty()
        {
            return true;
        }
        let has_weak_signal = !self.data_attrs.is_empty()
            || self.name.as_ref().is_some_and(|v| !v.is_empty())
            || !self.text.is_empty();
        has_weak_signal && self.bounding.is_some()
    }
}

/// Result of one bundle capture.
#[derive(Debug, Clone)]
pub struct BuildOutcome {
    /// The captured bundle
    pub bundle: LocatorBundle,
    /// Stability score 0–100, monotone in the number of independent signals
    pub quality_score: u8,
    /// Non-fatal capture warnings (e.g. ambiguous selectors)
    pub warnings: Vec<String>,
    /// Capture duration
    pub duration: Duration,
}

/// Captures [`LocatorBundle`]s from live elements.
#[derive(Debug, Clone, Default)]
pub struct BundleBuilder {
    options: BuildOptions,
}

impl BundleBuilder {
    /// Create a builder with default options
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a builder with custom options
    #[must_use]
    pub fn with_options(options: BuildOptions) -> Self {
        Self { options }
    }

    /// Capture a bundle for one element.
    ///
    /// Returns `None` when the handle does not refer to an element in the
    /// document (e.g. an event fired on a non-element target).
    #[must_use]
    pub fn build(&self, doc: &dyn DomDocument, el: ElementId) -> Option<BuildOutcome> {
        let start = Instant::now();
        let tag = doc.tag(el)?.to_string();

        let id = non_empty(doc.attribute(el, "id"));
        let name = non_empty(doc.attribute(el, "name"));
        let placeholder = non_empty(doc.attribute(el, "placeholder"));
        let aria = self.accessible_label(doc, el, id.as_deref());

        let mut text = doc.text(el);
        truncate_at_boundary(&mut text, self.options.max_text_length);

        let data_attrs: BTreeMap<String, String> = doc
            .attributes(el)
            .into_iter()
            .filter(|(k, _)| k.starts_with("data-"))
            .take(self.options.max_data_attrs)
            .collect();

        let mut classes = classes_of(doc, el);
        classes.truncate(self.options.max_classes);

        let css = self.css_selector(&tag, id.as_deref(), &classes);
        let xpath = self.xpath_selector(doc, el, id.as_deref());

        let bundle = LocatorBundle {
            tag,
            id,
            name,
            placeholder,
            aria,
            text,
            data_attrs,
            classes,
            css,
            xpath,
            page_url: doc.page_url().to_string(),
            bounding: doc.bounding_box(el),
            iframe_chain: doc.frame_chain().map(|chain| chain.to_vec()),
            shadow_hosts: doc.shadow_chain().map(|chain| chain.to_vec()),
        };

        let quality_score = quality_score(&bundle);
        let warnings = self.capture_warnings(doc, el, &bundle);
        for warning in &warnings {
            tracing::debug!(target: "repetir::bundle", %warning, "capture warning");
        }

        Some(BuildOutcome {
            bundle,
            quality_score,
            warnings,
            duration: start.elapsed(),
        })
    }

    /// Refresh position and page url on an existing bundle.
    ///
    /// Hand-set `css`/`xpath` selectors are preserved verbatim; everything
    /// else already captured stays untouched.
    #[must_use]
    pub fn enhance_bundle(
        &self,
        mut bundle: LocatorBundle,
        doc: &dyn DomDocument,
        el: ElementId,
    ) -> LocatorBundle {
        bundle.bounding = doc.bounding_box(el);
        bundle.page_url = doc.page_url().to_string();
        bundle
    }

    /// Merge two bundles: the primary's non-empty fields win, empty fields
    /// fall back to the secondary, and data attributes union (primary wins
    /// on key conflicts).
    #[must_use]
    pub fn merge_bundles(primary: &LocatorBundle, secondary: &LocatorBundle) -> LocatorBundle {
        let mut merged = primary.clone();
        if merged.tag.is_empty() {
            merged.tag.clone_from(&secondary.tag);
        }
        merged.id = pick_option(&merged.id, &secondary.id);
        merged.name = pick_option(&merged.name, &secondary.name);
        merged.placeholder = pick_option(&merged.placeholder, &secondary.placeholder);
        merged.aria = pick_option(&merged.aria, &secondary.aria);
        if merged.text.is_empty() {
            merged.text.clone_from(&secondary.text);
        }
        if merged.css.is_empty() {
            merged.css.clone_from(&secondary.css);
        }
        if merged.xpath.is_empty() {
            merged.xpath.clone_from(&secondary.xpath);
        }
        if merged.page_url.is_empty() {
            merged.page_url.clone_from(&secondary.page_url);
        }
        if merged.classes.is_empty() {
            merged.classes.clone_from(&secondary.classes);
        }
        if merged.bounding.is_none() {
            merged.bounding = secondary.bounding;
        }
        if merged.iframe_chain.is_none() {
            merged.iframe_chain.clone_from(&secondary.iframe_chain);
        }
        if merged.shadow_hosts.is_none() {
            merged.shadow_hosts.clone_from(&secondary.shadow_hosts);
        }
        for (k, v) in &secondary.data_attrs {
            merged
                .data_attrs
                .entry(k.clone())
                .or_insert_with(|| v.clone());
        }
        merged
    }

    /// Explicit label attribute first, else an associated `<label for=…>`.
    fn accessible_label(
        &self,
        doc: &dyn DomDocument,
        el: ElementId,
        id: Option<&str>,
    ) -> Option<String> {
        if let Some(label) = non_empty(doc.attribute(el, "aria-label")) {
            return Some(label);
        }
        let id = id?;
        doc.all_elements().into_iter().find_map(|candidate| {
            if doc.tag(candidate) == Some("label") && doc.attribute(candidate, "for") == Some(id) {
                let mut text = doc.text(candidate);
                truncate_at_boundary(&mut text, self.options.max_text_length);
                non_empty(Some(&text))
            } else {
                None
            }
        })
    }

    /// Id-first CSS selector, else a class-qualified one.
    fn css_selector(&self, tag: &str, id: Option<&str>, classes: &[String]) -> String {
        if let Some(id) = id {
            return format!("{tag}#{id}");
        }
        if classes.is_empty() {
            return tag.to_string();
        }
        let qualified: String = classes.iter().map(|c| format!(".{c}")).collect();
        format!("{tag}{qualified}")
    }

    /// Id-based XPath when an id exists, else a positional ancestor walk
    /// with 1-based same-tag sibling indices.
    fn xpath_selector(&self, doc: &dyn DomDocument, el: ElementId, id: Option<&str>) -> String {
        if let Some(id) = id {
            return format!("//*[@id='{id}']");
        }
        let mut segments = Vec::new();
        let mut current = Some(el);
        while let Some(node) = current {
            let tag = doc.tag(node).unwrap_or("*");
            let index = sibling_index(doc, node);
            segments.push(format!("{tag}[{index}]"));
            current = doc.parent(node);
        }
        segments.reverse();
        format!("/{}", segments.join("/"))
    }

    fn capture_warnings(
        &self,
        doc: &dyn DomDocument,
        el: ElementId,
        bundle: &LocatorBundle,
    ) -> Vec<String> {
        let mut warnings = Vec::new();
        let has_stable_signal =
            bundle.id.is_some() || bundle.name.is_some() || !bundle.data_attrs.is_empty();
        if !has_stable_signal {
            let css_matches = doc.query_css(&bundle.css);
            if css_matches.len() > 1 && doc.query_xpath(&bundle.xpath) != [el] {
                warnings.push(format!(
                    "selector '{}' matches {} elements and nothing else disambiguates this <{}>",
                    bundle.css,
                    css_matches.len(),
                    bundle.tag
                ));
            }
        }
        if bundle.bounding.is_none() {
            warnings.push("element has no layout box; positional fallback unavailable".to_string());
        }
        warnings
    }
}

/// 1-based index of an element among its same-tag siblings.
fn sibling_index(doc: &dyn DomDocument, el: ElementId) -> usize {
    let Some(parent) = doc.parent(el) else {
        return 1;
    };
    let tag = doc.tag(el);
    let mut index = 0;
    for sibling in doc.children(parent) {
        if doc.tag(sibling) == tag {
            index += 1;
        }
        if sibling == el {
            break;
        }
    }
    index.max(1)
}

/// Weighted stability score, capped at 100.
///
/// Signal tiers: id > data attribute > name/aria > text/class > position-only.
/// Adding an independent signal never lowers the score.
#[must_use]
pub fn quality_score(bundle: &LocatorBundle) -> u8 {
    let mut score = 0u32;
    if bundle.id.as_ref().is_some_and(|v| !v.is_empty()) {
        score += 40;
    }
    if !bundle.data_attrs.is_empty() {
        score += 20;
    }
    if bundle.name.as_ref().is_some_and(|v| !v.is_empty()) {
        score += 12;
    }
    if bundle.aria.as_ref().is_some_and(|v| !v.is_empty()) {
        score += 8;
    }
    if !bundle.text.is_empty() {
        score += 8;
    }
    if !bundle.classes.is_empty() {
        score += 5;
    }
    if !bundle.css.is_empty() {
        score += 2;
    }
    if !bundle.xpath.is_empty() {
        score += 2;
    }
    if bundle.bounding.is_some() {
        score += 3;
    }
    score.min(100) as u8
}

/// Byte-cap a string without splitting a multibyte character.
fn truncate_at_boundary(text: &mut String, max: usize) {
    if text.len() <= max {
        return;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text.truncate(end);
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value.filter(|v| !v.is_empty()).map(str::to_string)
}

fn pick_option(primary: &Option<String>, secondary: &Option<String>) -> Option<String> {
    match primary {
        Some(v) if !v.is_empty() => Some(v.clone()),
        _ => secondary.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::{MemoryDocument, MemoryElement};

    fn login_page() -> (MemoryDocument, ElementId, ElementId) {
        let mut doc = MemoryDocument::new("https://example.test/login");
        let root = doc.root();
        let body = doc.append_child(root, MemoryElement::new("body"));
        let form = doc.append_child(body, MemoryElement::new("form"));
        doc.append_child(
            form,
            MemoryElement::new("label")
                .with_attr("for", "username")
                .with_text("User name"),
        );
        let username = doc.append_child(
            form,
            MemoryElement::new("input")
                .with_attr("id", "username")
                .with_attr("name", "user")
                .with_attr("data-testid", "login-user")
                .with_class("field")
                .with_bounding(BoundingBox::new(10.0, 20.0, 200.0, 30.0)),
        );
        let button = doc.append_child(
            form,
            MemoryElement::new("button")
                .with_text("Sign in")
                .with_bounding(BoundingBox::new(10.0, 70.0, 100.0, 30.0)),
        );
        (doc, username, button)
    }

    mod build_tests {
        use super::*;

        #[test]
        fn test_captures_core_signals() {
            let (doc, username, _) = login_page();
            let outcome = BundleBuilder::new().build(&doc, username).unwrap();
            let bundle = &outcome.bundle;

            assert_eq!(bundle.tag, "input");
            assert_eq!(bundle.id.as_deref(), Some("username"));
            assert_eq!(bundle.name.as_deref(), Some("user"));
            assert_eq!(
                bundle.data_attrs.get("data-testid").map(String::as_str),
                Some("login-user")
            );
            assert_eq!(bundle.classes, ["field"]);
            assert_eq!(bundle.page_url, "https://example.test/login");
            assert!(bundle.bounding.is_some());
            assert!(bundle.iframe_chain.is_none());
            assert!(bundle.shadow_hosts.is_none());
        }

        #[test]
        fn test_id_based_selectors() {
            let (doc, username, _) = login_page();
            let outcome = BundleBuilder::new().build(&doc, username).unwrap();

            assert_eq!(outcome.bundle.css, "input#username");
            assert_eq!(outcome.bundle.xpath, "//*[@id='username']");
            // Both generated selectors must independently resolve.
            assert_eq!(doc.query_css(&outcome.bundle.css), [username]);
            assert_eq!(doc.query_xpath(&outcome.bundle.xpath), [username]);
        }

        #[test]
        fn test_positional_selectors_without_id() {
            let (doc, _, button) = login_page();
            let outcome = BundleBuilder::new().build(&doc, button).unwrap();

            assert_eq!(outcome.bundle.css, "button");
            assert_eq!(outcome.bundle.xpath, "/html[1]/body[1]/form[1]/button[1]");
            assert_eq!(doc.query_xpath(&outcome.bundle.xpath), [button]);
        }

        #[test]
        fn test_associated_label_fallback() {
            let (doc, username, _) = login_page();
            let outcome = BundleBuilder::new().build(&doc, username).unwrap();
            assert_eq!(outcome.bundle.aria.as_deref(), Some("User name"));
        }

        #[test]
        fn test_explicit_aria_label_wins() {
            let (mut doc, username, _) = login_page();
            doc.set_attribute(username, "aria-label", "Account");
            let outcome = BundleBuilder::new().build(&doc, username).unwrap();
            assert_eq!(outcome.bundle.aria.as_deref(), Some("Account"));
        }

        #[test]
        fn test_text_truncated_to_cap() {
            let mut doc = MemoryDocument::new("https://example.test/");
            let root = doc.root();
            let el = doc.append_child(root, MemoryElement::new("p").with_text("x".repeat(500)));

            let builder = BundleBuilder::with_options(BuildOptions::new().with_max_text_length(20));
            let outcome = builder.build(&doc, el).unwrap();
            assert_eq!(outcome.bundle.text.len(), 20);
        }

        #[test]
        fn test_frame_and_shadow_chains_copied() {
            let mut inner = MemoryDocument::new("https://example.test/inner");
            let inner_root = inner.root();
            inner.append_child(inner_root, MemoryElement::new("span"));

            let mut outer = MemoryDocument::new("https://example.test/");
            outer.attach_frame("frame-1", inner);

            let crate::dom::FrameAccess::Document(framed) = outer.enter_frame("frame-1") else {
                panic!("frame should be accessible");
            };
            let el = framed.all_elements()[1];
            let outcome = BundleBuilder::new().build(framed, el).unwrap();
            assert_eq!(
                outcome.bundle.iframe_chain.as_deref(),
                Some(["frame-1".to_string()].as_slice())
            );
        }

        #[test]
        fn test_missing_element_yields_none() {
            let (doc, username, _) = login_page();
            let _ = username;
            // Fabricate a handle past the arena end via a second document.
            let mut bigger = MemoryDocument::new("https://example.test/");
            let root = bigger.root();
            let mut last = root;
            for _ in 0..20 {
                last = bigger.append_child(last, MemoryElement::new("div"));
            }
            assert!(BundleBuilder::new().build(&doc, last).is_none());
        }
    }

    mod quality_tests {
        use super::*;

        #[test]
        fn test_id_outranks_weaker_signals() {
            let with_id = LocatorBundle {
                tag: "input".to_string(),
                id: Some("username".to_string()),
                ..LocatorBundle::default()
            };
            let with_text_and_classes = LocatorBundle {
                tag: "input".to_string(),
                text: "Sign in".to_string(),
                classes: vec!["field".to_string()],
                ..LocatorBundle::default()
            };
            assert!(quality_score(&with_id) > quality_score(&with_text_and_classes));
        }

        #[test]
        fn test_score_monotone_in_signals() {
            let mut bundle = LocatorBundle {
                tag: "input".to_string(),
                ..LocatorBundle::default()
            };
            let base = quality_score(&bundle);
            bundle.name = Some("user".to_string());
            let with_name = quality_score(&bundle);
            bundle.id = Some("username".to_string());
            let with_id = quality_score(&bundle);
            assert!(base <= with_name && with_name <= with_id);
        }

        #[test]
        fn test_score_capped_at_100() {
            let bundle = LocatorBundle {
                tag: "input".to_string(),
                id: Some("a".to_string()),
                name: Some("b".to_string()),
                aria: Some("c".to_string()),
                text: "d".to_string(),
                classes: vec!["e".to_string()],
                css: "#a".to_string(),
                xpath: "//*[@id='a']".to_string(),
                data_attrs: [("data-x".to_string(), "y".to_string())].into(),
                bounding: Some(BoundingBox::new(0.0, 0.0, 1.0, 1.0)),
                ..LocatorBundle::default()
            };
            assert!(quality_score(&bundle) <= 100);
        }
    }

    mod validity_tests {
        use super::*;

        #[test]
        fn test_missing_tag_is_invalid() {
            let bundle = LocatorBundle::default();
            assert!(!bundle.is_valid());
            assert!(!bundle.is_resolvable());
        }

        #[test]
        fn test_selector_only_bundle_is_resolvable() {
            let bundle = LocatorBundle {
                tag: "button".to_string(),
                css: "button.primary".to_string(),
                ..LocatorBundle::default()
            };
            assert!(bundle.is_resolvable());
        }

        #[test]
        fn test_weak_signals_need_bounding() {
            let mut bundle = LocatorBundle {
                tag: "span".to_string(),
                text: "Deeply nested".to_string(),
                ..LocatorBundle::default()
            };
            assert!(!bundle.is_resolvable());
            bundle.bounding = Some(BoundingBox::new(0.0, 0.0, 10.0, 10.0));
            assert!(bundle.is_resolvable());
        }
    }

    mod enhance_tests {
        use super::*;

        #[test]
        fn test_enhance_refreshes_position_and_url_only() {
            let (mut doc, username, _) = login_page();
            let outcome = BundleBuilder::new().build(&doc, username).unwrap();
            let mut bundle = outcome.bundle;

            // Hand-set selectors must survive enhancement.
            bundle.css = "input[data-testid=\"login-user\"]".to_string();
            bundle.xpath = "//input[@name='user']".to_string();

            doc.set_bounding_box(username, Some(BoundingBox::new(50.0, 60.0, 200.0, 30.0)));
            let enhanced = BundleBuilder::new().enhance_bundle(bundle, &doc, username);

            assert_eq!(enhanced.css, "input[data-testid=\"login-user\"]");
            assert_eq!(enhanced.xpath, "//input[@name='user']");
            assert_eq!(enhanced.bounding, Some(BoundingBox::new(50.0, 60.0, 200.0, 30.0)));
            assert_eq!(enhanced.page_url, "https://example.test/login");
        }
    }

    mod merge_tests {
        use super::*;

        #[test]
        fn test_primary_non_empty_fields_win() {
            let primary = LocatorBundle {
                tag: "input".to_string(),
                id: Some("username".to_string()),
                text: "primary".to_string(),
                ..LocatorBundle::default()
            };
            let secondary = LocatorBundle {
                tag: "button".to_string(),
                id: Some("other".to_string()),
                name: Some("user".to_string()),
                text: "secondary".to_string(),
                ..LocatorBundle::default()
            };
            let merged = BundleBuilder::merge_bundles(&primary, &secondary);
            assert_eq!(merged.tag, "input");
            assert_eq!(merged.id.as_deref(), Some("username"));
            assert_eq!(merged.name.as_deref(), Some("user"));
            assert_eq!(merged.text, "primary");
        }

        #[test]
        fn test_data_attrs_union_primary_wins() {
            let primary = LocatorBundle {
                tag: "input".to_string(),
                data_attrs: [("data-a".to_string(), "1".to_string())].into(),
                ..LocatorBundle::default()
            };
            let secondary = LocatorBundle {
                tag: "input".to_string(),
                data_attrs: [
                    ("data-a".to_string(), "9".to_string()),
                    ("data-b".to_string(), "2".to_string()),
                ]
                .into(),
                ..LocatorBundle::default()
            };
            let merged = BundleBuilder::merge_bundles(&primary, &secondary);
            assert_eq!(merged.data_attrs.get("data-a").map(String::as_str), Some("1"));
            assert_eq!(merged.data_attrs.get("data-b").map(String::as_str), Some("2"));
        }
    }

    mod warning_tests {
        use super::*;

        #[test]
        fn test_ambiguous_anonymous_element_warns() {
            let mut doc = MemoryDocument::new("https://example.test/");
            let root = doc.root();
            let body = doc.append_child(root, MemoryElement::new("body"));
            let first = doc.append_child(
                body,
                MemoryElement::new("span")
                    .with_text("a")
                    .with_bounding(BoundingBox::new(0.0, 0.0, 10.0, 10.0)),
            );
            doc.append_child(body, MemoryElement::new("span").with_text("b"));

            // Positional xpath still disambiguates, so no warning for `first`…
            let outcome = BundleBuilder::new().build(&doc, first).unwrap();
            assert!(outcome.warnings.is_empty());
            // …but a bundle with neither layout box nor stable signals warns.
            let mut bare = MemoryDocument::new("https://example.test/");
            let bare_root = bare.root();
            let el = bare.append_child(bare_root, MemoryElement::new("div"));
            let outcome = BundleBuilder::new().build(&bare, el).unwrap();
            assert!(!outcome.warnings.is_empty());
        }

        #[test]
        fn test_serde_round_trip() {
            let (doc, username, _) = login_page();
            let bundle = BundleBuilder::new().build(&doc, username).unwrap().bundle;
            let json = serde_json::to_string(&bundle).unwrap();
            let back: LocatorBundle = serde_json::from_str(&json).unwrap();
            assert_eq!(bundle, back);
        }
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        prop_compose! {
            fn arb_bundle()(
                tag in "[a-z]{1,8}",
                id in proptest::option::of("[a-z0-9-]{1,12}"),
                name in proptest::option::of("[a-z0-9-]{1,12}"),
                text in ".{0,30}",
            ) -> LocatorBundle {
                LocatorBundle {
                    tag,
                    id,
                    name,
                    text,
                    ..LocatorBundle::default()
                }
            }
        }

        proptest! {
            #[test]
            fn prop_score_in_range(bundle in arb_bundle()) {
                prop_assert!(quality_score(&bundle) <= 100);
            }

            #[test]
            fn prop_adding_a_signal_never_lowers_score(bundle in arb_bundle()) {
                let base = quality_score(&bundle);
                let mut richer = bundle;
                richer.bounding = Some(BoundingBox::new(0.0, 0.0, 10.0, 10.0));
                richer.data_attrs.insert("data-testid".to_string(), "x".to_string());
                prop_assert!(quality_score(&richer) >= base);
            }
        }
    }
}
