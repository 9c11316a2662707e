//! Element resolution from captured bundles.
//!
//! The finder turns a [`LocatorBundle`] back into a live element against a
//! possibly-changed page. Strategies are tried in priority order within one
//! attempt; attempts repeat on a polling interval until the retry or timeout
//! budget is exhausted. First match wins across strategies — the finder does
//! not globally maximize confidence, it stops at the highest-priority
//! strategy that produces any match.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use crate::bundle::LocatorBundle;
use crate::dom::{classes_of, DomDocument, ElementId, FrameAccess, ShadowAccess};

/// Default overall resolution timeout (2 seconds)
pub const DEFAULT_FIND_TIMEOUT_MS: u64 = 2000;

/// Default interval between resolution attempts (150ms)
pub const DEFAULT_RETRY_INTERVAL_MS: u64 = 150;

/// Default retry budget
pub const DEFAULT_MAX_RETRIES: u32 = 13;

/// Default minimum similarity for a fuzzy text match
pub const DEFAULT_FUZZY_THRESHOLD: f64 = 0.4;

/// Default maximum center distance for the positional fallback (pixels)
pub const DEFAULT_BOUNDING_BOX_THRESHOLD: f64 = 200.0;

/// Options controlling resolution behavior
#[derive(Debug, Clone)]
pub struct FindOptions {
    /// Hard upper bound on total resolution time
    pub find_timeout: Duration,
    /// Sleep between attempts
    pub retry_interval: Duration,
    /// Number of retries after the initial attempt
    pub max_retries: u32,
    /// Minimum accepted fuzzy-text similarity
    pub fuzzy_threshold: f64,
    /// Maximum accepted positional center distance in pixels
    pub bounding_box_threshold: f64,
}

impl Default for FindOptions {
    fn default() -> Self {
        Self {
            find_timeout: Duration::from_millis(DEFAULT_FIND_TIMEOUT_MS),
            retry_interval: Duration::from_millis(DEFAULT_RETRY_INTERVAL_MS),
            max_retries: DEFAULT_MAX_RETRIES,
            fuzzy_threshold: DEFAULT_FUZZY_THRESHOLD,
            bounding_box_threshold: DEFAULT_BOUNDING_BOX_THRESHOLD,
        }
    }
}

impl FindOptions {
    /// Create options with defaults
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the overall timeout
    #[must_use]
    pub const fn with_find_timeout(mut self, timeout: Duration) -> Self {
        self.find_timeout = timeout;
        self
    }

    /// Set the retry interval
    #[must_use]
    pub const fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    /// Set the retry budget
    #[must_use]
    pub const fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Set the fuzzy-match acceptance threshold
    #[must_use]
    pub const fn with_fuzzy_threshold(mut self, threshold: f64) -> Self {
        self.fuzzy_threshold = threshold;
        self
    }

    /// Set the positional distance threshold
    #[must_use]
    pub const fn with_bounding_box_threshold(mut self, threshold: f64) -> Self {
        self.bounding_box_threshold = threshold;
        self
    }
}

/// One specific method for re-locating an element from a bundle,
/// in descending priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Strategy {
    /// Exact `id` attribute match
    Id,
    /// Exact `data-*` attribute match
    DataAttr,
    /// Exact `name` attribute match
    Name,
    /// Exact accessible-label match
    AriaLabel,
    /// Stored CSS selector
    Css,
    /// Stored XPath selector
    XPath,
    /// Normalized text similarity above the fuzzy threshold
    FuzzyText,
    /// Nearest same-tag element within the positional threshold
    Position,
}

impl Strategy {
    /// All strategies in priority order
    pub const ALL: [Self; 8] = [
        Self::Id,
        Self::DataAttr,
        Self::Name,
        Self::AriaLabel,
        Self::Css,
        Self::XPath,
        Self::FuzzyText,
        Self::Position,
    ];

    /// Base confidence tier for a match found by this strategy
    #[must_use]
    pub const fn confidence_tier(&self) -> f64 {
        match self {
            Self::Id => 1.0,
            Self::DataAttr => 0.95,
            Self::Name => 0.9,
            Self::AriaLabel => 0.85,
            Self::Css => 0.8,
            Self::XPath => 0.75,
            Self::FuzzyText => 0.6,
            Self::Position => 0.5,
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Id => "id",
            Self::DataAttr => "data-attr",
            Self::Name => "name",
            Self::AriaLabel => "aria-label",
            Self::Css => "css",
            Self::XPath => "xpath",
            Self::FuzzyText => "fuzzy-text",
            Self::Position => "position",
        };
        write!(f, "{name}")
    }
}

/// A successful resolution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FindOutcome {
    /// The resolved element
    pub element: ElementId,
    /// Strategy that produced the match
    pub strategy: Strategy,
    /// Confidence of the match (strategy tier, scaled for fuzzy/positional)
    pub confidence: f64,
    /// Resolution attempts performed
    pub attempts: u32,
    /// Total time spent resolving
    pub elapsed: Duration,
}

/// Why a resolution failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureReason {
    /// No strategy produced a match within the retry/timeout budget
    NotFound,
    /// The bundle itself cannot be resolved (invalid or signal-free)
    Unresolvable,
    /// A frame on the bundle's chain is cross-origin
    InaccessibleFrame,
    /// A shadow root on the bundle's chain is closed
    ClosedShadowRoot,
}

/// A failed resolution. A value, not an error: the executor records it as a
/// failed step and continues per policy.
#[derive(Debug, Clone, PartialEq)]
pub struct FindFailure {
    /// Failure classification
    pub reason: FailureReason,
    /// Resolution attempts performed
    pub attempts: u32,
    /// Total time spent before giving up
    pub elapsed: Duration,
}

enum Attempt {
    Found { element: ElementId, strategy: Strategy, confidence: f64 },
    NotFound,
    Fatal(FailureReason),
}

/// Resolves bundles to live elements with ordered fallback strategies.
#[derive(Debug, Clone, Default)]
pub struct ElementFinder {
    options: FindOptions,
}

impl ElementFinder {
    /// Create a finder with default options
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a finder with custom options
    #[must_use]
    pub fn with_options(options: FindOptions) -> Self {
        Self { options }
    }

    /// The active options
    #[must_use]
    pub const fn options(&self) -> &FindOptions {
        &self.options
    }

    /// Resolve a bundle against a search root.
    ///
    /// One attempt cycles all strategies in priority order; failed attempts
    /// repeat after `retry_interval` until `max_retries` or `find_timeout`
    /// is exhausted, whichever comes first. Cross-origin frames and closed
    /// shadow roots fail fast without retrying. With `max_retries = 0` and
    /// no immediate match the call returns without sleeping.
    pub async fn locate(
        &self,
        doc: &dyn DomDocument,
        bundle: &LocatorBundle,
    ) -> Result<FindOutcome, FindFailure> {
        let start = Instant::now();
        let deadline = start + self.options.find_timeout;
        let mut attempts = 0u32;

        if !bundle.is_resolvable() {
            return Err(FindFailure {
                reason: FailureReason::Unresolvable,
                attempts,
                elapsed: start.elapsed(),
            });
        }

        loop {
            attempts += 1;
            match self.attempt(doc, bundle) {
                Attempt::Found {
                    element,
                    strategy,
                    confidence,
                } => {
                    tracing::debug!(
                        target: "repetir::finder",
                        %strategy,
                        confidence,
                        attempts,
                        "element resolved"
                    );
                    return Ok(FindOutcome {
                        element,
                        strategy,
                        confidence,
                        attempts,
                        elapsed: start.elapsed(),
                    });
                }
                Attempt::Fatal(reason) => {
                    tracing::debug!(target: "repetir::finder", ?reason, "resolution failed fast");
                    return Err(FindFailure {
                        reason,
                        attempts,
                        elapsed: start.elapsed(),
                    });
                }
                Attempt::NotFound => {}
            }

            let budget_spent = attempts > self.options.max_retries
                || Instant::now() + self.options.retry_interval >= deadline;
            if budget_spent {
                return Err(FindFailure {
                    reason: FailureReason::NotFound,
                    attempts,
                    elapsed: start.elapsed(),
                });
            }
            tokio::time::sleep(self.options.retry_interval).await;
        }
    }

    /// One full pass: descend frames/shadows, then try every strategy.
    fn attempt(&self, root: &dyn DomDocument, bundle: &LocatorBundle) -> Attempt {
        let doc = match self.descend(root, bundle) {
            Ok(doc) => doc,
            Err(outcome) => return outcome,
        };

        for strategy in Strategy::ALL {
            let candidates = self.candidates(doc, bundle, strategy);
            if candidates.is_empty() {
                continue;
            }
            let best = self.pick_best(doc, bundle, candidates);
            let confidence = match strategy {
                Strategy::FuzzyText => {
                    strategy.confidence_tier() * normalized_similarity(&doc.text(best), &bundle.text)
                }
                _ => strategy.confidence_tier(),
            };
            return Attempt::Found {
                element: best,
                strategy,
                confidence,
            };
        }
        Attempt::NotFound
    }

    /// Walk the bundle's frame chain (outermost→innermost) and shadow chain
    /// (stored innermost-first, walked outermost-first).
    fn descend<'a>(
        &self,
        root: &'a dyn DomDocument,
        bundle: &LocatorBundle,
    ) -> Result<&'a dyn DomDocument, Attempt> {
        let mut doc = root;
        if let Some(chain) = &bundle.iframe_chain {
            for frame_id in chain {
                match doc.enter_frame(frame_id) {
                    FrameAccess::Document(next) => doc = next,
                    FrameAccess::CrossOrigin => {
                        return Err(Attempt::Fatal(FailureReason::InaccessibleFrame))
                    }
                    FrameAccess::Missing => return Err(Attempt::NotFound),
                }
            }
        }
        if let Some(hosts) = &bundle.shadow_hosts {
            for host_id in hosts.iter().rev() {
                match doc.enter_shadow(host_id) {
                    ShadowAccess::Root(next) => doc = next,
                    ShadowAccess::Closed => {
                        return Err(Attempt::Fatal(FailureReason::ClosedShadowRoot))
                    }
                    ShadowAccess::Missing => return Err(Attempt::NotFound),
                }
            }
        }
        Ok(doc)
    }

    fn candidates(
        &self,
        doc: &dyn DomDocument,
        bundle: &LocatorBundle,
        strategy: Strategy,
    ) -> Vec<ElementId> {
        match strategy {
            Strategy::Id => match &bundle.id {
                Some(id) if !id.is_empty() => elements_with_attr(doc, "id", id),
                _ => Vec::new(),
            },
            Strategy::DataAttr => bundle
                .data_attrs
                .iter()
                .flat_map(|(name, value)| elements_with_attr(doc, name, value))
                .collect(),
            Strategy::Name => match &bundle.name {
                Some(name) if !name.is_empty() => elements_with_attr(doc, "name", name),
                _ => Vec::new(),
            },
            Strategy::AriaLabel => match &bundle.aria {
                Some(label) if !label.is_empty() => elements_with_attr(doc, "aria-label", label),
                _ => Vec::new(),
            },
            Strategy::Css => {
                if bundle.css.is_empty() {
                    Vec::new()
                } else {
                    doc.query_css(&bundle.css)
                }
            }
            Strategy::XPath => {
                if bundle.xpath.is_empty() {
                    Vec::new()
                } else {
                    doc.query_xpath(&bundle.xpath)
                }
            }
            Strategy::FuzzyText => self.fuzzy_candidates(doc, bundle),
            Strategy::Position => self.positional_candidates(doc, bundle),
        }
    }

    fn fuzzy_candidates(&self, doc: &dyn DomDocument, bundle: &LocatorBundle) -> Vec<ElementId> {
        if bundle.text.is_empty() {
            return Vec::new();
        }
        let mut best: Option<(ElementId, f64)> = None;
        for el in doc.all_elements() {
            if !bundle.tag.is_empty() && doc.tag(el) != Some(bundle.tag.as_str()) {
                continue;
            }
            let similarity = normalized_similarity(&doc.text(el), &bundle.text);
            if similarity < self.options.fuzzy_threshold {
                continue;
            }
            if best.map_or(true, |(_, s)| similarity > s) {
                best = Some((el, similarity));
            }
        }
        best.map(|(el, _)| vec![el]).unwrap_or_default()
    }

    fn positional_candidates(
        &self,
        doc: &dyn DomDocument,
        bundle: &LocatorBundle,
    ) -> Vec<ElementId> {
        let Some(recorded) = bundle.bounding else {
            return Vec::new();
        };
        let target = recorded.center();
        let mut best: Option<(ElementId, f64)> = None;
        for el in doc.all_elements() {
            if doc.tag(el) != Some(bundle.tag.as_str()) {
                continue;
            }
            let Some(bbox) = doc.bounding_box(el) else {
                continue;
            };
            let distance = f64::from(bbox.center().distance_to(&target));
            if distance > self.options.bounding_box_threshold {
                continue;
            }
            if best.map_or(true, |(_, d)| distance < d) {
                best = Some((el, distance));
            }
        }
        best.map(|(el, _)| vec![el]).unwrap_or_default()
    }

    /// Disambiguate multiple candidates from one strategy: exact attribute
    /// agreement outranks fuzzy text similarity, which outranks inverted
    /// positional distance.
    fn pick_best(
        &self,
        doc: &dyn DomDocument,
        bundle: &LocatorBundle,
        candidates: Vec<ElementId>,
    ) -> ElementId {
        if candidates.len() == 1 {
            return candidates[0];
        }
        let mut scored: Vec<(f64, ElementId)> = candidates
            .into_iter()
            .map(|el| (self.candidate_score(doc, bundle, el), el))
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored[0].1
    }

    fn candidate_score(&self, doc: &dyn DomDocument, bundle: &LocatorBundle, el: ElementId) -> f64 {
        let mut score = 0.0;
        if doc.tag(el) == Some(bundle.tag.as_str()) {
            score += 1.0;
        }
        if let Some(id) = &bundle.id {
            if doc.attribute(el, "id") == Some(id.as_str()) {
                score += 4.0;
            }
        }
        if let Some(name) = &bundle.name {
            if doc.attribute(el, "name") == Some(name.as_str()) {
                score += 3.0;
            }
        }
        for (attr, value) in &bundle.data_attrs {
            if doc.attribute(el, attr) == Some(value.as_str()) {
                score += 2.0;
            }
        }
        if !bundle.classes.is_empty() {
            let classes = classes_of(doc, el);
            if bundle.classes.iter().all(|c| classes.contains(c)) {
                score += 1.0;
            }
        }
        if !bundle.text.is_empty() {
            score += normalized_similarity(&doc.text(el), &bundle.text);
        }
        if let (Some(recorded), Some(live)) = (bundle.bounding, doc.bounding_box(el)) {
            let distance = f64::from(live.center().distance_to(&recorded.center()));
            score += 1.0 / (1.0 + distance);
        }
        score
    }
}

fn elements_with_attr(doc: &dyn DomDocument, name: &str, value: &str) -> Vec<ElementId> {
    doc.all_elements()
        .into_iter()
        .filter(|el| doc.attribute(*el, name) == Some(value))
        .collect()
}

/// Case- and whitespace-insensitive token-overlap similarity in `[0, 1]`.
///
/// Symmetric; 1.0 for identical normalized token sets, 0.0 when either side
/// is empty and the other is not.
#[must_use]
pub fn normalized_similarity(a: &str, b: &str) -> f64 {
    let tokens_a = tokenize(a);
    let tokens_b = tokenize(b);
    if tokens_a.is_empty() && tokens_b.is_empty() {
        return 1.0;
    }
    if tokens_a.is_empty() || tokens_b.is_empty() {
        return 0.0;
    }
    let intersection = tokens_a.intersection(&tokens_b).count();
    let union = tokens_a.union(&tokens_b).count();
    intersection as f64 / union as f64
}

fn tokenize(text: &str) -> std::collections::BTreeSet<String> {
    text.split_whitespace()
        .map(str::to_lowercase)
        .collect()
}
