//! # Topic Paths and Filters
//!
//! A topic is a `/`-delimited path. Published paths are always literal;
//! subscription filters may contain `+` (exactly one segment) and a final
//! `#` (zero or more trailing segments).

use thiserror::Error;

/// Errors from parsing a topic path or filter.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TopicError {
    /// Empty topic string or empty segment.
    #[error("Empty topic or empty segment in: {0:?}")]
    Empty(String),

    /// `#` somewhere other than the final segment.
    #[error("'#' must be the final segment: {0:?}")]
    RestNotFinal(String),

    /// Wildcard in a published (literal) path.
    #[error("Wildcards are not allowed in published paths: {0:?}")]
    WildcardInPath(String),
}

/// A literal published topic path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicPath {
    segments: Vec<String>,
}

impl TopicPath {
    /// Parse a literal path. Wildcard characters are rejected.
    pub fn parse(path: &str) -> Result<Self, TopicError> {
        let segments = split_segments(path)?;
        if segments.iter().any(|s| s == "+" || s == "#") {
            return Err(TopicError::WildcardInPath(path.to_string()));
        }
        Ok(Self { segments })
    }

    /// The path segments.
    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.segments
    }
}

impl std::fmt::Display for TopicPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.segments.join("/"))
    }
}

/// One filter segment.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    /// `+`
    Single,
    /// `#`, final position only.
    Rest,
}

/// A subscription filter, possibly containing wildcards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicFilter {
    segments: Vec<Segment>,
}

impl TopicFilter {
    /// Parse a filter. `#` is only valid as the final segment.
    pub fn parse(filter: &str) -> Result<Self, TopicError> {
        let raw = split_segments(filter)?;
        let last = raw.len() - 1;
        let mut segments = Vec::with_capacity(raw.len());
        for (i, seg) in raw.into_iter().enumerate() {
            let parsed = match seg.as_str() {
                "+" => Segment::Single,
                "#" if i == last => Segment::Rest,
                "#" => return Err(TopicError::RestNotFinal(filter.to_string())),
                _ => Segment::Literal(seg),
            };
            segments.push(parsed);
        }
        Ok(Self { segments })
    }

    /// True when the filter contains no wildcard segment.
    #[must_use]
    pub fn is_literal(&self) -> bool {
        self.segments
            .iter()
            .all(|s| matches!(s, Segment::Literal(_)))
    }

    fn literal_segments(&self) -> Option<Vec<&str>> {
        self.segments
            .iter()
            .map(|s| match s {
                Segment::Literal(l) => Some(l.as_str()),
                _ => None,
            })
            .collect()
    }
}

impl std::fmt::Display for TopicFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<&str> = self
            .segments
            .iter()
            .map(|s| match s {
                Segment::Literal(l) => l.as_str(),
                Segment::Single => "+",
                Segment::Rest => "#",
            })
            .collect();
        f.write_str(&parts.join("/"))
    }
}

fn split_segments(topic: &str) -> Result<Vec<String>, TopicError> {
    if topic.is_empty() {
        return Err(TopicError::Empty(topic.to_string()));
    }
    let segments: Vec<String> = topic.split('/').map(str::to_string).collect();
    if segments.iter().any(String::is_empty) {
        return Err(TopicError::Empty(topic.to_string()));
    }
    Ok(segments)
}

/// How a filter relates to a published path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchKind {
    /// The filter matches the published path itself.
    Direct,
    /// The filter names an ancestor of the published path; the published
    /// value should be projected *down* under the remaining segments.
    ParentOfPublished {
        /// Path segments below the filter.
        remainder: Vec<String>,
    },
    /// The filter names a direct child of the published path; the published
    /// value should be projected *up* by extracting this field.
    ChildOfPublished {
        /// The child field to extract.
        segment: String,
    },
}

/// Match a subscription filter against a published path.
///
/// `without_wildcards` restricts direct matching to literal equality, the
/// mode used when a manager needs exact-key semantics (retained-data
/// lookups) rather than pattern fan-out. Parent/child relationships are
/// only defined for literal filters.
#[must_use]
pub fn match_topics(
    filter: &TopicFilter,
    path: &TopicPath,
    without_wildcards: bool,
) -> Option<MatchKind> {
    if direct_match(filter, path, !without_wildcards) {
        return Some(MatchKind::Direct);
    }

    let literal = filter.literal_segments()?;
    let published = path.segments();

    if literal.len() < published.len()
        && literal
            .iter()
            .zip(published.iter())
            .all(|(f, p)| *f == p.as_str())
    {
        return Some(MatchKind::ParentOfPublished {
            remainder: published[literal.len()..].to_vec(),
        });
    }

    if literal.len() == published.len() + 1
        && published
            .iter()
            .zip(literal.iter())
            .all(|(p, f)| p.as_str() == *f)
    {
        return Some(MatchKind::ChildOfPublished {
            segment: (*literal.last()?).to_string(),
        });
    }

    None
}

fn direct_match(filter: &TopicFilter, path: &TopicPath, allow_wildcards: bool) -> bool {
    let published = path.segments();
    let mut idx = 0;
    for segment in &filter.segments {
        match segment {
            Segment::Literal(l) => {
                if published.get(idx).map(String::as_str) != Some(l.as_str()) {
                    return false;
                }
                idx += 1;
            }
            Segment::Single => {
                if !allow_wildcards || published.get(idx).is_none() {
                    return false;
                }
                idx += 1;
            }
            // Zero or more trailing segments.
            Segment::Rest => return allow_wildcards,
        }
    }
    idx == published.len()
}
