//! Turns arbitrary imported JSON into canonical documents.
//!
//! Only `title` is required. Every other field defaults, unknown fields are
//! dropped, and every collection ends up with at least one element.

use serde_json::{Map, Value};

use crate::document::{
    ConfigEntry, Document, FunctionDocument, LinkItem, MAX_TIP_DEPTH, MediaItem, MediaType,
    Parameter, Prerequisite, RecipeDocument, Required, Step, StepName, Tip, Variant, derive_id,
};
use crate::error::ValidationError;

const FUNCTION_ONLY_FIELDS: [&str; 5] = ["syntax", "parameters", "tips", "relatedFormulas", "examples"];
const RECIPE_ONLY_FIELDS: [&str; 2] = ["walkthrough", "prerequisites"];

pub fn normalize(raw: &Value) -> Result<Document, ValidationError> {
    let object = validate(raw)?;
    normalize_object(object, detect_variant(object))
}

/// Normalizes `raw` into a document of `variant` regardless of its shape.
pub fn normalize_as(raw: &Value, variant: Variant) -> Result<Document, ValidationError> {
    let object = validate(raw)?;
    normalize_object(object, variant)
}

pub fn parse_document(text: &str) -> Result<Document, ValidationError> {
    let raw: Value =
        serde_json::from_str(text).map_err(|err| ValidationError::InvalidJson(err.to_string()))?;
    normalize(&raw)
}

pub fn detect_variant(object: &Map<String, Value>) -> Variant {
    if let Some(tag) = object.get("docType").and_then(Value::as_str) {
        match tag.trim().to_ascii_lowercase().as_str() {
            "recipe" => return Variant::Recipe,
            "function" => return Variant::Function,
            _ => {}
        }
    }

    let has_any = |fields: &[&str]| fields.iter().any(|field| object.contains_key(*field));
    if has_any(&FUNCTION_ONLY_FIELDS) && !has_any(&RECIPE_ONLY_FIELDS) {
        Variant::Function
    } else {
        Variant::Recipe
    }
}

fn validate(raw: &Value) -> Result<&Map<String, Value>, ValidationError> {
    let object = raw.as_object().ok_or(ValidationError::NotAnObject)?;

    match object.get("title") {
        Some(Value::String(title)) if !title.trim().is_empty() => {}
        _ => return Err(ValidationError::MissingField("title")),
    }

    for field in RECIPE_ONLY_FIELDS {
        if let Some(value) = object.get(field)
            && !value.is_array()
        {
            return Err(ValidationError::TypeError(field));
        }
    }

    Ok(object)
}

fn normalize_object(
    object: &Map<String, Value>,
    variant: Variant,
) -> Result<Document, ValidationError> {
    let title = text(object, &["title"]);
    let id = derive_id(&title);

    let document = match variant {
        Variant::Recipe => Document::Recipe(RecipeDocument {
            id,
            title,
            category: text(object, &["category"]),
            dsp_versions: list(object, &["DSPVersions", "dspVersions"], as_text, String::new),
            use_case: text(object, &["usecase", "useCase"]),
            prerequisites: list(object, &["prerequisites"], prerequisite, || Prerequisite {
                description: String::new(),
                quick_links: vec![LinkItem::default()],
            }),
            direction: text(object, &["direction"]),
            connection: text(object, &["connection"]),
            walkthrough: list(object, &["walkthrough"], step, Step::placeholder),
            downloadables: list(
                object,
                &["downloadableExecutables", "downloadables"],
                link,
                LinkItem::default,
            ),
            related_docs: list(
                object,
                &["relatedRecipes", "relatedDocs"],
                link,
                LinkItem::default,
            ),
            keywords: keywords(object),
        }),
        Variant::Function => {
            if let Some(value) = object.get("tips")
                && !value.is_array()
            {
                return Err(ValidationError::TypeError("tips"));
            }
            let mut tips = match object.get("tips") {
                Some(Value::Array(values)) => tip_level(values, 0),
                _ => Vec::new(),
            };
            if tips.is_empty() {
                tips.push(Tip::default());
            }

            Document::Function(FunctionDocument {
                id,
                title,
                description: text(object, &["description"]),
                syntax: text(object, &["syntax"]),
                parameters: list(object, &["parameters"], parameter, Parameter::default),
                examples: list(object, &["examples"], as_text, String::new),
                tips,
                related_formulas: list(object, &["relatedFormulas"], as_text, String::new),
            })
        }
    };

    Ok(document)
}

fn lookup<'a>(object: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|key| object.get(*key))
}

fn text(object: &Map<String, Value>, keys: &[&str]) -> String {
    lookup(object, keys).map(as_text).unwrap_or_default()
}

fn as_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Number(number) => number.to_string(),
        Value::Bool(flag) => flag.to_string(),
        _ => String::new(),
    }
}

fn list<T>(
    object: &Map<String, Value>,
    keys: &[&str],
    element: fn(&Value) -> T,
    placeholder: impl FnOnce() -> T,
) -> Vec<T> {
    let mut items = match lookup(object, keys) {
        Some(Value::Array(values)) => values.iter().map(element).collect(),
        _ => Vec::new(),
    };
    if items.is_empty() {
        items.push(placeholder());
    }
    items
}

fn nested<T>(
    value: &Value,
    key: &str,
    element: fn(&Value) -> T,
    placeholder: impl FnOnce() -> T,
) -> Vec<T> {
    match value.as_object() {
        Some(object) => list(object, &[key], element, placeholder),
        None => vec![placeholder()],
    }
}

fn field(value: &Value, keys: &[&str]) -> String {
    value
        .as_object()
        .map(|object| text(object, keys))
        .unwrap_or_default()
}

fn link(value: &Value) -> LinkItem {
    match value {
        Value::String(title) => LinkItem {
            title: title.clone(),
            url: String::new(),
        },
        _ => LinkItem {
            title: field(value, &["title"]),
            url: field(value, &["url"]),
        },
    }
}

fn prerequisite(value: &Value) -> Prerequisite {
    match value {
        Value::String(description) => Prerequisite {
            description: description.clone(),
            quick_links: vec![LinkItem::default()],
        },
        _ => Prerequisite {
            description: field(value, &["description"]),
            quick_links: nested(value, "quickLinks", link, LinkItem::default),
        },
    }
}

fn config_entry(value: &Value) -> ConfigEntry {
    ConfigEntry {
        field: field(value, &["field"]),
        value: field(value, &["value"]),
    }
}

fn media_item(value: &Value) -> MediaItem {
    let kind = match field(value, &["type"]).trim().to_ascii_lowercase().as_str() {
        "video" => MediaType::Video,
        _ => MediaType::Image,
    };
    let attachment_key = match kind {
        MediaType::Image => Some(field(value, &["attachmentKey"])).filter(|key| !key.is_empty()),
        MediaType::Video => None,
    };
    MediaItem {
        kind,
        url: field(value, &["url"]),
        alt: field(value, &["alt"]),
        attachment_key,
    }
}

fn step(value: &Value) -> Step {
    match value {
        Value::String(name) => Step {
            name: StepName::from(name.clone()),
            config: vec![ConfigEntry::default()],
            media: vec![MediaItem::placeholder()],
        },
        _ => Step {
            name: StepName::from(field(value, &["step", "name"])),
            config: nested(value, "config", config_entry, ConfigEntry::default),
            media: nested(value, "media", media_item, MediaItem::placeholder),
        },
    }
}

fn parameter(value: &Value) -> Parameter {
    let required = match value.get("required") {
        Some(Value::Bool(true)) => Required::Yes,
        Some(Value::String(flag))
            if matches!(flag.trim().to_ascii_lowercase().as_str(), "yes" | "true") =>
        {
            Required::Yes
        }
        _ => Required::No,
    };
    Parameter {
        name: field(value, &["name"]),
        kind: field(value, &["type"]),
        required,
        description: field(value, &["description"]),
    }
}

fn keywords(object: &Map<String, Value>) -> Vec<String> {
    let Some(Value::Array(values)) = object.get("keywords") else {
        return Vec::new();
    };
    let mut keywords: Vec<String> = Vec::with_capacity(values.len());
    for keyword in values.iter().map(as_text) {
        let keyword = keyword.trim();
        if !keyword.is_empty() && !keywords.iter().any(|k| k == keyword) {
            keywords.push(keyword.to_owned());
        }
    }
    keywords
}

fn tip_level(values: &[Value], depth: usize) -> Vec<Tip> {
    let mut tips = Vec::with_capacity(values.len());
    for value in values {
        push_tip(value, depth, &mut tips);
    }
    tips
}

// Tips below the depth cap are hoisted into the deepest allowed level, right
// after their ancestor, so no text is lost.
fn push_tip(value: &Value, depth: usize, out: &mut Vec<Tip>) {
    let (text, children): (String, &[Value]) = match value {
        Value::String(text) => (text.clone(), &[]),
        Value::Object(object) => (
            text_of(object),
            object
                .get("children")
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or(&[]),
        ),
        _ => (String::new(), &[]),
    };

    if depth + 1 < MAX_TIP_DEPTH {
        out.push(Tip {
            text,
            children: tip_level(children, depth + 1),
        });
    } else {
        out.push(Tip::new(text));
        for child in children {
            push_tip(child, depth, out);
        }
    }
}

fn text_of(object: &Map<String, Value>) -> String {
    text(object, &["text"])
}
