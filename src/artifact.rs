//! Artifact detection over accumulated assistant text.
//!
//! Detection is a pure function of the full text: every call re-runs an
//! ordered list of matcher strategies and the first one that finds something
//! wins. Strategies use plain substring search, so each call is linear in
//! the text length.

use std::fmt;
use std::ops::Range;
use std::sync::LazyLock;

use serde::Serialize;

/// What the preview surface should do with an artifact body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Html,
    Markdown,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::Html => "html",
            ArtifactKind::Markdown => "markdown",
        }
    }

    pub fn file_extension(&self) -> &'static str {
        match self {
            ArtifactKind::Html => "html",
            ArtifactKind::Markdown => "md",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A renderable sub-document. `body` is always a contiguous slice of the
/// text it was detected in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Artifact {
    pub kind: ArtifactKind,
    pub body: String,
}

impl Artifact {
    pub fn new(kind: ArtifactKind, body: impl Into<String>) -> Self {
        Artifact {
            kind,
            body: body.into(),
        }
    }
}

/// One detection strategy.
pub trait ArtifactMatcher: Send + Sync {
    fn name(&self) -> &'static str;
    fn find(&self, text: &str) -> Option<Artifact>;
}

// ---------------------------------------------------------------------------
// Fenced block
// ---------------------------------------------------------------------------

const FENCE: &str = "```";
const FENCE_TAGS: [(&str, ArtifactKind); 3] = [
    ("html", ArtifactKind::Html),
    ("markdown", ArtifactKind::Markdown),
    ("md", ArtifactKind::Markdown),
];

/// Leftmost "```html", "```markdown" or "```md" fence (tag matched
/// case-insensitively) whose tag is followed directly by a newline, up to the
/// next closing fence.
///
/// A fence with anything after the tag on the same line never opens a block,
/// and an unclosed block yields nothing until its closing fence arrives.
#[derive(Debug, Clone, Copy, Default)]
pub struct FencedBlockMatcher;

impl ArtifactMatcher for FencedBlockMatcher {
    fn name(&self) -> &'static str {
        "fenced-block"
    }

    fn find(&self, text: &str) -> Option<Artifact> {
        let (kind, body_start) = find_opening_fence(text)?;
        let body_len = text[body_start..].find(FENCE)?;
        Some(Artifact::new(kind, &text[body_start..body_start + body_len]))
    }
}

/// Returns the fence's kind and the offset just past its newline.
fn find_opening_fence(text: &str) -> Option<(ArtifactKind, usize)> {
    let bytes = text.as_bytes();
    let mut from = 0;
    while let Some(offset) = text[from..].find(FENCE) {
        let fence_at = from + offset;
        let tag_start = fence_at + FENCE.len();
        for (tag, kind) in FENCE_TAGS {
            let tag_end = tag_start + tag.len();
            let tag_matches = bytes
                .get(tag_start..tag_end)
                .is_some_and(|candidate| candidate.eq_ignore_ascii_case(tag.as_bytes()));
            if tag_matches && bytes.get(tag_end) == Some(&b'\n') {
                return Some((kind, tag_end + 1));
            }
        }
        // Fences may overlap ("````html"), so step one byte, not one fence.
        from = fence_at + 1;
    }
    None
}

// ---------------------------------------------------------------------------
// Bare HTML document
// ---------------------------------------------------------------------------

const DOCTYPE_GATE: &str = "<!DOCTYPE html>";
const DOCTYPE: &str = "<!doctype html>";
const HTML_OPEN: &str = "<html";
const HTML_CLOSE: &str = "</html>";

/// An unfenced HTML document.
///
/// Only considered when the text literally contains `<!DOCTYPE html>` or
/// `<html`. The span runs from the first doctype (or, failing that, the first
/// `<html`) to the last `</html>` after it, compared case-insensitively.
#[derive(Debug, Clone, Copy, Default)]
pub struct BareDocumentMatcher;

impl ArtifactMatcher for BareDocumentMatcher {
    fn name(&self) -> &'static str {
        "bare-document"
    }

    fn find(&self, text: &str) -> Option<Artifact> {
        if !text.contains(DOCTYPE_GATE) && !text.contains(HTML_OPEN) {
            return None;
        }
        // ASCII folding keeps byte offsets valid for `text`.
        let folded = text.to_ascii_lowercase();
        let span = span_to_last_close(&folded, DOCTYPE)
            .or_else(|| span_to_last_close(&folded, HTML_OPEN))?;
        Some(Artifact::new(ArtifactKind::Html, &text[span]))
    }
}

fn span_to_last_close(folded: &str, opener: &str) -> Option<Range<usize>> {
    let start = folded.find(opener)?;
    let close = folded.rfind(HTML_CLOSE)?;
    (close >= start + opener.len()).then(|| start..close + HTML_CLOSE.len())
}

// ---------------------------------------------------------------------------
// Detector
// ---------------------------------------------------------------------------

static DEFAULT_DETECTOR: LazyLock<ArtifactDetector> = LazyLock::new(ArtifactDetector::default);

/// Ordered list of matcher strategies; first match wins.
pub struct ArtifactDetector {
    matchers: Vec<Box<dyn ArtifactMatcher>>,
}

impl ArtifactDetector {
    pub fn new(matchers: Vec<Box<dyn ArtifactMatcher>>) -> Self {
        ArtifactDetector { matchers }
    }

    /// Append a lower-priority strategy.
    pub fn with_matcher(mut self, matcher: impl ArtifactMatcher + 'static) -> Self {
        self.matchers.push(Box::new(matcher));
        self
    }

    pub fn matcher_names(&self) -> Vec<&'static str> {
        self.matchers.iter().map(|m| m.name()).collect()
    }

    pub fn detect(&self, text: &str) -> Option<Artifact> {
        self.matchers.iter().find_map(|m| m.find(text))
    }
}

impl Default for ArtifactDetector {
    fn default() -> Self {
        ArtifactDetector::new(vec![Box::new(FencedBlockMatcher), Box::new(BareDocumentMatcher)])
    }
}

impl fmt::Debug for ArtifactDetector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArtifactDetector")
            .field("matchers", &self.matcher_names())
            .finish()
    }
}

/// Run the default strategies (fenced block, then bare document).
pub fn detect(text: &str) -> Option<Artifact> {
    DEFAULT_DETECTOR.detect(text)
}
