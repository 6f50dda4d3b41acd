use std::collections::HashSet;

use chrono::{DateTime, Utc};

use crate::document::{ATTACHMENT_DIR, Document};

const MAX_SEGMENT_CHARS: usize = 30;

pub const CATEGORY_FALLBACK: &str = "unnamed";
pub const STEP_FALLBACK: &str = "step";
pub const ALT_FALLBACK: &str = "image";

/// The three content signals an attachment key is built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySignals {
    pub category: String,
    pub step: String,
    pub alt: String,
}

impl KeySignals {
    /// Reads the signals for media `media` of step `step` in a recipe document.
    /// A media index one past the end stands for a media item about to be
    /// appended.
    pub fn extract(document: &Document, step: usize, media: usize) -> Option<Self> {
        let recipe = document.as_recipe()?;
        let target = recipe.walkthrough.get(step)?;
        let alt = match target.media.get(media) {
            Some(item) => item.alt.clone(),
            None if media == target.media.len() => String::new(),
            None => return None,
        };
        Some(Self {
            category: recipe.category.clone(),
            step: target.name.as_str().to_owned(),
            alt,
        })
    }

    pub fn base_name(&self) -> String {
        format!(
            "{}-{}-{}",
            sanitize_segment(&self.category, CATEGORY_FALLBACK),
            sanitize_segment(&self.step, STEP_FALLBACK),
            sanitize_segment(&self.alt, ALT_FALLBACK),
        )
    }
}

/// One key segment: a file-name-safe stem capped at 30 characters.
pub fn sanitize_segment(raw: &str, fallback: &str) -> String {
    sanitize(raw, fallback, Some(MAX_SEGMENT_CHARS))
}

/// Lowercased, hyphenated, file-name-safe stem of any length.
pub fn sanitize_file_stem(raw: &str, fallback: &str) -> String {
    sanitize(raw, fallback, None)
}

fn sanitize(raw: &str, fallback: &str, max_chars: Option<usize>) -> String {
    let lowered = raw.to_lowercase();
    let legal: String = lowered
        .chars()
        .filter(|c| !is_illegal_in_file_name(*c))
        .collect();
    let hyphenated = legal.split_whitespace().collect::<Vec<_>>().join("-");
    let trimmed = hyphenated.trim_matches('-');
    let truncated: String = match max_chars {
        Some(max) => trimmed.chars().take(max).collect(),
        None => trimmed.to_owned(),
    };
    let stem = truncated.trim_end_matches('-');
    if stem.is_empty() || stem == "." || stem == ".." {
        fallback.to_owned()
    } else {
        stem.to_owned()
    }
}

fn is_illegal_in_file_name(c: char) -> bool {
    matches!(c, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*') || c.is_control()
}

pub fn strip_extension(file_name: &str) -> &str {
    match file_name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => file_name,
    }
}

pub fn extension_of(file_name: &str) -> Option<String> {
    match file_name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => Some(ext.to_ascii_lowercase()),
        _ => None,
    }
}

/// Every attachment key already claimed by the given documents, from image
/// URLs under `images/` and from recorded keys.
pub fn used_keys<'a>(documents: impl IntoIterator<Item = &'a Document>) -> HashSet<String> {
    let mut used = HashSet::new();
    for recipe in documents.into_iter().filter_map(Document::as_recipe) {
        for media in recipe.media() {
            if let Some(file_name) = media.url.strip_prefix(ATTACHMENT_DIR)
                && !file_name.is_empty()
            {
                used.insert(strip_extension(file_name).to_owned());
            }
            if let Some(key) = media.blob_key() {
                used.insert(key.to_owned());
            }
        }
    }
    used
}

/// `base` if unused, otherwise the first free `base-2`, `base-3`, ...
pub fn unique_key(base: &str, used: &HashSet<String>) -> String {
    if !used.contains(base) {
        return base.to_owned();
    }
    (2u64..)
        .map(|n| format!("{base}-{n}"))
        .find(|candidate| !used.contains(candidate))
        .unwrap_or_else(|| base.to_owned())
}

pub fn fallback_key(counter: u64, now: DateTime<Utc>) -> String {
    format!("{ALT_FALLBACK}-{counter}-{}", now.timestamp_millis())
}

pub fn attachment_key(
    signals: Option<&KeySignals>,
    used: &HashSet<String>,
    counter: u64,
    now: DateTime<Utc>,
) -> String {
    let base = match signals {
        Some(signals) => signals.base_name(),
        None => {
            tracing::debug!(counter, "attachment signals unavailable; using timestamp key");
            fallback_key(counter, now)
        }
    };
    unique_key(&base, used)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone as _;

    use super::*;
    use crate::document::{MediaItem, MediaType, RecipeDocument, StepName};

    fn demo_document() -> Document {
        let mut recipe = RecipeDocument::empty();
        recipe.title = "Demo".to_owned();
        recipe.category = "setup".to_owned();
        recipe.walkthrough[0].name = StepName::from("Retrieve");
        recipe.walkthrough[0].media[0].alt = "screenshot".to_owned();
        Document::Recipe(recipe)
    }

    #[test]
    fn scenario_key_is_category_step_alt() {
        let doc = demo_document();
        let signals = KeySignals::extract(&doc, 0, 0);
        let now = Utc.timestamp_opt(0, 0).unwrap();
        let key = attachment_key(signals.as_ref(), &used_keys([&doc]), 1, now);
        assert_eq!(key, "setup-retrieve-screenshot");
    }

    #[test]
    fn identical_signals_get_distinct_keys() {
        let mut doc = demo_document();
        let now = Utc.timestamp_opt(0, 0).unwrap();
        let mut keys = Vec::new();
        for _ in 0..3 {
            let signals = KeySignals::extract(&doc, 0, 0);
            let key = attachment_key(signals.as_ref(), &used_keys([&doc]), 1, now);
            if let Some(recipe) = doc.as_recipe_mut() {
                recipe.walkthrough[0].media.push(MediaItem {
                    kind: MediaType::Image,
                    url: format!("images/{key}.png"),
                    alt: "screenshot".to_owned(),
                    attachment_key: Some(key.clone()),
                });
            }
            keys.push(key);
        }
        assert_eq!(
            keys,
            vec![
                "setup-retrieve-screenshot",
                "setup-retrieve-screenshot-2",
                "setup-retrieve-screenshot-3",
            ]
        );
    }

    #[test]
    fn segments_are_sanitized_and_truncated() {
        assert_eq!(sanitize_segment("  Data List(Q) Settings ", "step"), "data-list(q)-settings");
        assert_eq!(sanitize_segment("a/b:c*d?", "x"), "abcd");
        assert_eq!(sanitize_segment(" -- ", "unnamed"), "unnamed");
        assert_eq!(sanitize_segment("", "image"), "image");
        let long = sanitize_segment(&"word ".repeat(20), "x");
        assert!(long.chars().count() <= 30);
        assert!(!long.ends_with('-'));
        assert_eq!(sanitize_file_stem(&"Long Title ".repeat(5), "x").len(), 54);
        assert_eq!(sanitize_file_stem("..", "recipe"), "recipe");
    }

    #[test]
    fn blank_signals_use_fallback_tokens() {
        let signals = KeySignals {
            category: String::new(),
            step: "   ".to_owned(),
            alt: "?".to_owned(),
        };
        assert_eq!(signals.base_name(), "unnamed-step-image");
    }

    #[test]
    fn missing_signals_fall_back_to_timestamp_key() {
        let doc = demo_document();
        assert!(KeySignals::extract(&doc, 5, 0).is_none());
        assert!(KeySignals::extract(&doc, 0, 7).is_none());
        assert!(KeySignals::extract(&Document::empty(crate::document::Variant::Function), 0, 0).is_none());

        let now = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let key = attachment_key(None, &HashSet::new(), 4, now);
        assert_eq!(key, "image-4-1700000000000");
    }

    #[test]
    fn extension_helpers() {
        assert_eq!(strip_extension("shot.png"), "shot");
        assert_eq!(strip_extension("v1.2-shot.jpeg"), "v1.2-shot");
        assert_eq!(strip_extension(".hidden"), ".hidden");
        assert_eq!(extension_of("A.PNG").as_deref(), Some("png"));
        assert_eq!(extension_of("noext"), None);
    }
}
