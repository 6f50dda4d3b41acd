use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{EditorError, EditorResult};

/// Tips nest at most this many levels (root tips are depth 0).
pub const MAX_TIP_DEPTH: usize = 3;

/// Relative path prefix of image attachments inside a recipe folder.
pub const ATTACHMENT_DIR: &str = "images/";

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    Recipe,
    Function,
}

impl Variant {
    pub fn label(self) -> &'static str {
        match self {
            Self::Recipe => "Recipe",
            Self::Function => "Function",
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Recipe => f.write_str("recipe"),
            Self::Function => f.write_str("function"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "docType", rename_all = "lowercase")]
pub enum Document {
    Recipe(RecipeDocument),
    Function(FunctionDocument),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipeDocument {
    pub id: String,
    pub title: String,
    pub category: String,
    #[serde(rename = "DSPVersions")]
    pub dsp_versions: Vec<String>,
    #[serde(rename = "usecase")]
    pub use_case: String,
    pub prerequisites: Vec<Prerequisite>,
    pub direction: String,
    pub connection: String,
    pub walkthrough: Vec<Step>,
    #[serde(rename = "downloadableExecutables")]
    pub downloadables: Vec<LinkItem>,
    #[serde(rename = "relatedRecipes")]
    pub related_docs: Vec<LinkItem>,
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDocument {
    pub id: String,
    pub title: String,
    pub description: String,
    pub syntax: String,
    pub parameters: Vec<Parameter>,
    pub examples: Vec<String>,
    pub tips: Vec<Tip>,
    #[serde(rename = "relatedFormulas")]
    pub related_formulas: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prerequisite {
    pub description: String,
    #[serde(rename = "quickLinks")]
    pub quick_links: Vec<LinkItem>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkItem {
    pub title: String,
    pub url: String,
}

impl LinkItem {
    /// Links without an http(s) URL refer to another document in the same
    /// collection.
    pub fn is_external(&self) -> bool {
        Url::parse(self.url.trim())
            .map(|url| matches!(url.scheme(), "http" | "https"))
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigEntry {
    pub field: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    #[serde(rename = "step")]
    pub name: StepName,
    pub config: Vec<ConfigEntry>,
    pub media: Vec<MediaItem>,
}

impl Step {
    pub fn placeholder() -> Self {
        Self {
            name: StepName::default(),
            config: vec![ConfigEntry::default()],
            media: vec![MediaItem::placeholder()],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepKind {
    CreateExecutable,
    CreatePipeline,
    CreateScheduler,
    Retrieve,
    Scoping,
    Match,
    Mapping,
    Action,
    Verify,
    Preview,
    PreviewTransformed,
    DataListSettings,
    BatchSettings,
    ActionButtonSettings,
    TriggerSettings,
    Variable,
}

impl StepKind {
    pub const ALL: [StepKind; 16] = [
        Self::CreateExecutable,
        Self::CreatePipeline,
        Self::CreateScheduler,
        Self::Retrieve,
        Self::Scoping,
        Self::Match,
        Self::Mapping,
        Self::Action,
        Self::Verify,
        Self::Preview,
        Self::PreviewTransformed,
        Self::DataListSettings,
        Self::BatchSettings,
        Self::ActionButtonSettings,
        Self::TriggerSettings,
        Self::Variable,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Self::CreateExecutable => "Create Executable",
            Self::CreatePipeline => "Create Pipeline",
            Self::CreateScheduler => "Create Scheduler",
            Self::Retrieve => "Retrieve",
            Self::Scoping => "Scoping",
            Self::Match => "Match",
            Self::Mapping => "Mapping",
            Self::Action => "Action",
            Self::Verify => "Verify",
            Self::Preview => "Preview",
            Self::PreviewTransformed => "Preview Transformed",
            Self::DataListSettings => "Data List(Q) Settings",
            Self::BatchSettings => "Batch Settings",
            Self::ActionButtonSettings => "Action Button Settings",
            Self::TriggerSettings => "Trigger Settings",
            Self::Variable => "Variable",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.label() == label)
    }
}

/// A step name from the known vocabulary, or any other string carried over
/// from older files (blank included).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum StepName {
    Known(StepKind),
    Custom(String),
}

impl StepName {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Known(kind) => kind.label(),
            Self::Custom(name) => name,
        }
    }
}

impl Default for StepName {
    fn default() -> Self {
        Self::Custom(String::new())
    }
}

impl From<String> for StepName {
    fn from(name: String) -> Self {
        match StepKind::from_label(&name) {
            Some(kind) => Self::Known(kind),
            None => Self::Custom(name),
        }
    }
}

impl From<&str> for StepName {
    fn from(name: &str) -> Self {
        Self::from(name.to_owned())
    }
}

impl From<StepName> for String {
    fn from(name: StepName) -> Self {
        match name {
            StepName::Known(kind) => kind.label().to_owned(),
            StepName::Custom(name) => name,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    #[default]
    Image,
    Video,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaItem {
    #[serde(rename = "type")]
    pub kind: MediaType,
    pub url: String,
    pub alt: String,
    #[serde(
        rename = "attachmentKey",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub attachment_key: Option<String>,
}

impl MediaItem {
    pub fn placeholder() -> Self {
        Self::default()
    }

    /// The blob key this item resolves to, if it is an uploaded image.
    pub fn blob_key(&self) -> Option<&str> {
        match self.kind {
            MediaType::Image => self
                .attachment_key
                .as_deref()
                .filter(|key| !key.is_empty()),
            MediaType::Video => None,
        }
    }

    /// File name under `images/` implied by `url`.
    pub fn attachment_file_name(&self) -> Option<&str> {
        self.url
            .strip_prefix(ATTACHMENT_DIR)
            .filter(|name| !name.is_empty() && !name.contains('/'))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Required {
    Yes,
    #[default]
    No,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub required: Required,
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tip {
    pub text: String,
    #[serde(default)]
    pub children: Vec<Tip>,
}

impl Tip {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            children: Vec::new(),
        }
    }
}

/// Lowercased title with whitespace runs replaced by `-`; empty for a blank
/// title.
pub fn derive_id(title: &str) -> String {
    title
        .trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
}

fn pad<T>(items: &mut Vec<T>, placeholder: impl FnOnce() -> T) {
    if items.is_empty() {
        items.push(placeholder());
    }
}

impl RecipeDocument {
    pub fn empty() -> Self {
        Self {
            id: String::new(),
            title: String::new(),
            category: String::new(),
            dsp_versions: vec![String::new()],
            use_case: String::new(),
            prerequisites: vec![Prerequisite {
                description: String::new(),
                quick_links: vec![LinkItem::default()],
            }],
            direction: String::new(),
            connection: String::new(),
            walkthrough: vec![Step::placeholder()],
            downloadables: vec![LinkItem::default()],
            related_docs: vec![LinkItem::default()],
            keywords: Vec::new(),
        }
    }

    pub fn add_keyword(&mut self, keyword: &str) -> bool {
        let keyword = keyword.trim();
        if keyword.is_empty() || self.keywords.iter().any(|k| k == keyword) {
            return false;
        }
        self.keywords.push(keyword.to_owned());
        true
    }

    pub fn media(&self) -> impl Iterator<Item = &MediaItem> {
        self.walkthrough.iter().flat_map(|step| step.media.iter())
    }

    pub fn media_mut(&mut self) -> impl Iterator<Item = &mut MediaItem> {
        self.walkthrough
            .iter_mut()
            .flat_map(|step| step.media.iter_mut())
    }

    fn ensure_placeholders(&mut self) {
        pad(&mut self.dsp_versions, String::new);
        pad(&mut self.prerequisites, Prerequisite::default);
        for prerequisite in &mut self.prerequisites {
            pad(&mut prerequisite.quick_links, LinkItem::default);
        }
        pad(&mut self.walkthrough, Step::placeholder);
        for step in &mut self.walkthrough {
            pad(&mut step.config, ConfigEntry::default);
            pad(&mut step.media, MediaItem::placeholder);
        }
        pad(&mut self.downloadables, LinkItem::default);
        pad(&mut self.related_docs, LinkItem::default);

        let mut seen = Vec::with_capacity(self.keywords.len());
        self.keywords.retain(|keyword| {
            if keyword.trim().is_empty() || seen.contains(keyword) {
                return false;
            }
            seen.push(keyword.clone());
            true
        });
    }
}

impl FunctionDocument {
    pub fn empty() -> Self {
        Self {
            id: String::new(),
            title: String::new(),
            description: String::new(),
            syntax: String::new(),
            parameters: vec![Parameter::default()],
            examples: vec![String::new()],
            tips: vec![Tip::default()],
            related_formulas: vec![String::new()],
        }
    }

    pub fn tip(&self, path: &[usize]) -> Option<&Tip> {
        let (first, rest) = path.split_first()?;
        let mut tip = self.tips.get(*first)?;
        for index in rest {
            tip = tip.children.get(*index)?;
        }
        Some(tip)
    }

    pub fn tip_mut(&mut self, path: &[usize]) -> Option<&mut Tip> {
        let (first, rest) = path.split_first()?;
        let mut tip = self.tips.get_mut(*first)?;
        for index in rest {
            tip = tip.children.get_mut(*index)?;
        }
        Some(tip)
    }

    /// Appends a tip under the tip at `parent` (or a root tip for an empty
    /// path) and returns the new tip's path.
    pub fn add_child_tip(&mut self, parent: &[usize], text: &str) -> EditorResult<Vec<usize>> {
        if parent.len() >= MAX_TIP_DEPTH {
            return Err(EditorError::TipDepthExceeded { max: MAX_TIP_DEPTH });
        }
        let siblings = if parent.is_empty() {
            &mut self.tips
        } else {
            let len = self.tips.len();
            &mut self
                .tip_mut(parent)
                .ok_or(EditorError::IndexOutOfRange {
                    index: parent[0],
                    len,
                })?
                .children
        };
        siblings.push(Tip::new(text.trim()));
        let mut path = parent.to_vec();
        path.push(siblings.len() - 1);
        Ok(path)
    }

    pub fn remove_tip(&mut self, path: &[usize]) -> EditorResult<Tip> {
        let Some((last, parent)) = path.split_last() else {
            return Err(EditorError::IndexOutOfRange { index: 0, len: 0 });
        };
        let siblings = if parent.is_empty() {
            &mut self.tips
        } else {
            let len = self.tips.len();
            &mut self
                .tip_mut(parent)
                .ok_or(EditorError::IndexOutOfRange {
                    index: parent[0],
                    len,
                })?
                .children
        };
        if *last >= siblings.len() {
            return Err(EditorError::IndexOutOfRange {
                index: *last,
                len: siblings.len(),
            });
        }
        let removed = siblings.remove(*last);
        pad(&mut self.tips, Tip::default);
        Ok(removed)
    }

    fn ensure_placeholders(&mut self) {
        pad(&mut self.parameters, Parameter::default);
        pad(&mut self.examples, String::new);
        pad(&mut self.tips, Tip::default);
        pad(&mut self.related_formulas, String::new);
    }
}

impl Document {
    pub fn empty(variant: Variant) -> Self {
        match variant {
            Variant::Recipe => Self::Recipe(RecipeDocument::empty()),
            Variant::Function => Self::Function(FunctionDocument::empty()),
        }
    }

    pub fn variant(&self) -> Variant {
        match self {
            Self::Recipe(_) => Variant::Recipe,
            Self::Function(_) => Variant::Function,
        }
    }

    pub fn title(&self) -> &str {
        match self {
            Self::Recipe(doc) => &doc.title,
            Self::Function(doc) => &doc.title,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Self::Recipe(doc) => &doc.id,
            Self::Function(doc) => &doc.id,
        }
    }

    pub fn set_title(&mut self, title: &str) {
        let (slot_title, slot_id) = match self {
            Self::Recipe(doc) => (&mut doc.title, &mut doc.id),
            Self::Function(doc) => (&mut doc.title, &mut doc.id),
        };
        *slot_title = title.to_owned();
        *slot_id = derive_id(title);
    }

    pub fn is_exportable(&self) -> bool {
        !self.title().trim().is_empty()
    }

    pub fn as_recipe(&self) -> Option<&RecipeDocument> {
        match self {
            Self::Recipe(doc) => Some(doc),
            Self::Function(_) => None,
        }
    }

    pub fn as_recipe_mut(&mut self) -> Option<&mut RecipeDocument> {
        match self {
            Self::Recipe(doc) => Some(doc),
            Self::Function(_) => None,
        }
    }

    /// A fresh document of `variant` that keeps only this document's id and
    /// title.
    pub fn with_variant(&self, variant: Variant) -> Self {
        let mut replacement = Self::empty(variant);
        let (id, title) = (self.id().to_owned(), self.title().to_owned());
        match &mut replacement {
            Self::Recipe(doc) => {
                doc.id = id;
                doc.title = title;
            }
            Self::Function(doc) => {
                doc.id = id;
                doc.title = title;
            }
        }
        replacement
    }

    /// Re-derives the id and refills every collection emptied by an edit.
    pub fn canonicalize(&mut self) {
        let id = derive_id(self.title());
        match self {
            Self::Recipe(doc) => {
                doc.id = id;
                doc.ensure_placeholders();
            }
            Self::Function(doc) => {
                doc.id = id;
                doc.ensure_placeholders();
            }
        }
    }

    pub fn attachment_keys(&self) -> Vec<&str> {
        match self {
            Self::Recipe(doc) => doc.media().filter_map(MediaItem::blob_key).collect(),
            Self::Function(_) => Vec::new(),
        }
    }

    /// JSON shown to users and written to archives: no `docType`, no
    /// `attachmentKey`, and no `id` on function documents.
    pub fn to_clean_json(&self) -> serde_json::Result<serde_json::Value> {
        match self {
            Self::Recipe(doc) => {
                let mut doc = doc.clone();
                for media in doc.media_mut() {
                    media.attachment_key = None;
                }
                serde_json::to_value(doc)
            }
            Self::Function(doc) => {
                let mut value = serde_json::to_value(doc)?;
                if let Some(object) = value.as_object_mut() {
                    object.remove("id");
                }
                Ok(value)
            }
        }
    }

    pub fn preview(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.to_clean_json()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_id_lowercases_and_hyphenates() {
        assert_eq!(derive_id("My  First\tRecipe"), "my-first-recipe");
        assert_eq!(derive_id("   "), "");
    }

    #[test]
    fn step_name_preserves_unknown_strings() -> anyhow::Result<()> {
        let known: StepName = serde_json::from_str("\"Retrieve\"")?;
        assert_eq!(known, StepName::Known(StepKind::Retrieve));

        let custom: StepName = serde_json::from_str("\"Legacy Step\"")?;
        assert_eq!(custom, StepName::Custom("Legacy Step".to_owned()));
        assert_eq!(serde_json::to_string(&custom)?, "\"Legacy Step\"");
        Ok(())
    }

    #[test]
    fn link_item_classifies_internal_references() {
        let external = LinkItem {
            title: "Docs".to_owned(),
            url: "https://example.com/docs".to_owned(),
        };
        let internal = LinkItem {
            title: "Other recipe".to_owned(),
            url: "other-recipe".to_owned(),
        };
        let mail = LinkItem {
            title: "Mail".to_owned(),
            url: "mailto:someone@example.com".to_owned(),
        };
        assert!(external.is_external());
        assert!(!internal.is_external());
        assert!(!mail.is_external());
    }

    #[test]
    fn tip_tree_rejects_a_fourth_level() -> anyhow::Result<()> {
        let mut doc = FunctionDocument::empty();
        let child = doc.add_child_tip(&[0], "child")?;
        assert_eq!(child, vec![0, 0]);
        let grandchild = doc.add_child_tip(&child, "grandchild")?;
        assert_eq!(grandchild, vec![0, 0, 0]);

        let err = doc.add_child_tip(&grandchild, "too deep").unwrap_err();
        assert!(matches!(err, EditorError::TipDepthExceeded { max: 3 }));
        assert_eq!(doc.tip(&[0, 0, 0]).map(|t| t.text.as_str()), Some("grandchild"));
        Ok(())
    }

    #[test]
    fn removing_the_only_root_tip_leaves_a_placeholder() -> anyhow::Result<()> {
        let mut doc = FunctionDocument::empty();
        doc.tips[0].text = "only".to_owned();
        let removed = doc.remove_tip(&[0])?;
        assert_eq!(removed.text, "only");
        assert_eq!(doc.tips, vec![Tip::default()]);
        Ok(())
    }

    #[test]
    fn clean_json_strips_internal_fields() -> anyhow::Result<()> {
        let mut recipe = RecipeDocument::empty();
        recipe.title = "Demo".to_owned();
        recipe.walkthrough[0].media[0] = MediaItem {
            kind: MediaType::Image,
            url: "images/a.png".to_owned(),
            alt: "a".to_owned(),
            attachment_key: Some("a".to_owned()),
        };
        let value = Document::Recipe(recipe).to_clean_json()?;
        let text = value.to_string();
        assert!(!text.contains("attachmentKey"));
        assert!(!text.contains("docType"));
        assert_eq!(value["walkthrough"][0]["media"][0]["url"], "images/a.png");

        let mut function = FunctionDocument::empty();
        function.title = "SUM".to_owned();
        function.id = "sum".to_owned();
        let value = Document::Function(function).to_clean_json()?;
        assert!(value.get("id").is_none());
        assert_eq!(value["title"], "SUM");
        Ok(())
    }

    #[test]
    fn with_variant_keeps_only_id_and_title() {
        let mut doc = Document::empty(Variant::Recipe);
        doc.set_title("Sales Report");
        if let Some(recipe) = doc.as_recipe_mut() {
            recipe.category = "reports".to_owned();
        }
        let replaced = doc.with_variant(Variant::Function);
        assert_eq!(replaced.variant(), Variant::Function);
        assert_eq!(replaced.title(), "Sales Report");
        assert_eq!(replaced.id(), "sales-report");
    }
}
