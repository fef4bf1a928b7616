// Draft state for a new catalog entry, its validation, and the multipart
// parts the `games` collection expects.

use std::fmt;

use serde::{Deserialize, Serialize};
use wasm_bindgen::prelude::*;

use crate::compressor::WasmCardCropper;
use crate::error::PipelineError;
use crate::pages::WasmPageList;
use crate::prepare::{PreparedPage, WasmPreparedPages};
use crate::types::StagedFile;

pub const GAMES_COLLECTION: &str = "games";

/// Whether the entry is uploaded pages or an embedded link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    #[default]
    Img,
    Link,
}

impl ContentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::Img => "img",
            ContentKind::Link => "link",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagRef {
    pub id: String,
}

/// A tag category and the minimum number of its tags an entry must carry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagCategory {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub min_tags: usize,
    #[serde(default)]
    pub tags: Vec<TagRef>,
}

impl TagCategory {
    pub fn contains(&self, tag_id: &str) -> bool {
        self.tags.iter().any(|tag| tag.id == tag_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormIssue {
    TitleRequired,
    DescriptionRequired,
    CardImageRequired,
    PagesRequired,
    IframeUrlRequired,
    PagesNeedSplit,
    TagMinimum { category: String, min_tags: usize },
}

impl fmt::Display for FormIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormIssue::TitleRequired => write!(f, "Title is required."),
            FormIssue::DescriptionRequired => write!(f, "Description is required."),
            FormIssue::CardImageRequired => write!(f, "Please upload a card image."),
            FormIssue::PagesRequired => write!(f, "Please upload at least one CYOA page image."),
            FormIssue::IframeUrlRequired => write!(f, "Please provide an iframe URL."),
            FormIssue::PagesNeedSplit => {
                write!(f, "Some pages are too tall to process. Split them before submitting.")
            }
            FormIssue::TagMinimum { category, min_tags } => {
                write!(f, "{category} requires at least {min_tags} tag(s)")
            }
        }
    }
}

/// Value of one multipart field.
#[derive(Debug, Clone, PartialEq)]
pub enum PartValue {
    Text(String),
    File(StagedFile),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubmissionPart {
    pub name: &'static str,
    pub value: PartValue,
}

impl SubmissionPart {
    fn text(name: &'static str, value: impl Into<String>) -> Self {
        SubmissionPart {
            name,
            value: PartValue::Text(value.into()),
        }
    }

    fn file(name: &'static str, file: StagedFile) -> Self {
        SubmissionPart {
            name,
            value: PartValue::File(file),
        }
    }
}

/// Everything the form owns. Children report into it through their listeners.
#[derive(Debug, Clone, Default)]
pub struct GameDraft {
    pub title: String,
    pub description: String,
    pub card: Option<StagedFile>,
    pub content: ContentKind,
    pub iframe_url: String,
    pub pages: Vec<StagedFile>,
    /// Set from the page list; blocks submission while true.
    pub pages_need_split: bool,
    pub authors: Vec<String>,
    pub selected_tags: Vec<String>,
    pub tag_categories: Vec<TagCategory>,
}

impl GameDraft {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every issue, in the order the form shows them.
    pub fn validate(&self) -> Vec<FormIssue> {
        let mut issues = Vec::new();
        if self.title.trim().is_empty() {
            issues.push(FormIssue::TitleRequired);
        }
        if self.description.trim().is_empty() {
            issues.push(FormIssue::DescriptionRequired);
        }
        if self.card.is_none() {
            issues.push(FormIssue::CardImageRequired);
        }
        match self.content {
            ContentKind::Img if self.pages.is_empty() => issues.push(FormIssue::PagesRequired),
            ContentKind::Link if self.iframe_url.trim().is_empty() => {
                issues.push(FormIssue::IframeUrlRequired)
            }
            _ => {}
        }
        if self.content == ContentKind::Img && self.pages_need_split {
            issues.push(FormIssue::PagesNeedSplit);
        }
        issues.extend(self.tag_issues());
        issues
    }

    pub fn tag_issues(&self) -> Vec<FormIssue> {
        self.tag_categories
            .iter()
            .filter_map(|category| {
                let chosen = self
                    .selected_tags
                    .iter()
                    .filter(|tag| category.contains(tag))
                    .count();
                (chosen < category.min_tags).then(|| FormIssue::TagMinimum {
                    category: category.name.clone(),
                    min_tags: category.min_tags,
                })
            })
            .collect()
    }

    /// Multipart fields for a `games` record. `prepared` must be the output of
    /// preparing `pages`, in the same order.
    pub fn build_submission(&self, prepared: &[PreparedPage]) -> Result<Vec<SubmissionPart>, PipelineError> {
        let issues = self.validate();
        if !issues.is_empty() {
            let messages: Vec<String> = issues.iter().map(ToString::to_string).collect();
            return Err(PipelineError::InvalidForm(messages.join("; ")));
        }
        let card = self
            .card
            .clone()
            .ok_or(PipelineError::NotReady("card image missing"))?;

        let tags = serde_json::to_string(&self.selected_tags)?;
        let mut parts = vec![
            SubmissionPart::text("title", self.title.trim()),
            SubmissionPart::text("description", self.description.trim()),
            SubmissionPart::text("img_or_link", self.content.as_str()),
        ];
        if self.content == ContentKind::Link {
            parts.push(SubmissionPart::text("iframe_url", self.iframe_url.trim()));
        }
        parts.push(SubmissionPart::text("tags", tags.clone()));
        parts.push(SubmissionPart::text("selected_tags", tags));
        parts.push(SubmissionPart::text("authors", serde_json::to_string(&self.authors)?));
        parts.push(SubmissionPart::file("image", card));

        if self.content == ContentKind::Img {
            if prepared.len() != self.pages.len() {
                return Err(PipelineError::InvalidForm(format!(
                    "{} prepared page(s) for {} selected",
                    prepared.len(),
                    self.pages.len()
                )));
            }
            parts.extend(
                prepared
                    .iter()
                    .map(|page| SubmissionPart::file("cyoa_pages", page.file.clone())),
            );
        }
        log::info!(
            "submission for {GAMES_COLLECTION:?} ready: {} part(s)",
            parts.len()
        );
        Ok(parts)
    }
}

// =============================================================================
// WASM Bindings
// =============================================================================

/// WASM-exposed form state.
#[wasm_bindgen]
pub struct WasmGameForm {
    draft: GameDraft,
}

#[wasm_bindgen]
impl WasmGameForm {
    #[wasm_bindgen(constructor)]
    pub fn new() -> WasmGameForm {
        WasmGameForm {
            draft: GameDraft::new(),
        }
    }

    pub fn set_title(&mut self, title: &str) {
        self.draft.title = title.to_string();
    }

    pub fn set_description(&mut self, description: &str) {
        self.draft.description = description.to_string();
    }

    /// `"img"` or `"link"`.
    pub fn set_content_kind(&mut self, kind: &str) -> Result<(), JsValue> {
        self.draft.content = match kind {
            "img" => ContentKind::Img,
            "link" => ContentKind::Link,
            other => {
                return Err(crate::to_js(PipelineError::InvalidForm(format!(
                    "unknown content kind {other:?}"
                ))))
            }
        };
        Ok(())
    }

    pub fn set_iframe_url(&mut self, url: &str) {
        self.draft.iframe_url = url.to_string();
    }

    /// JSON array of author ids.
    pub fn set_authors_json(&mut self, json: &str) -> Result<(), JsValue> {
        self.draft.authors = serde_json::from_str(json).map_err(|e| crate::to_js(e.into()))?;
        Ok(())
    }

    /// JSON array of tag ids.
    pub fn set_selected_tags_json(&mut self, json: &str) -> Result<(), JsValue> {
        self.draft.selected_tags = serde_json::from_str(json).map_err(|e| crate::to_js(e.into()))?;
        Ok(())
    }

    /// JSON array of `{ id, name, min_tags, tags: [{ id }] }`.
    pub fn set_tag_categories_json(&mut self, json: &str) -> Result<(), JsValue> {
        self.draft.tag_categories = serde_json::from_str(json).map_err(|e| crate::to_js(e.into()))?;
        Ok(())
    }

    /// Take the confirmed card, or clear it if the cropper has none.
    pub fn sync_card(&mut self, cropper: &WasmCardCropper) {
        self.draft.card = cropper.card_file();
    }

    /// Take the current page order and split flag.
    pub fn sync_pages(&mut self, pages: &WasmPageList) {
        self.draft.pages = pages.files();
        self.draft.pages_need_split = pages.any_needs_split();
    }

    /// JSON array of issue messages; empty when the form can be submitted.
    pub fn issues_json(&self) -> Result<String, JsValue> {
        let messages: Vec<String> = self.draft.validate().iter().map(ToString::to_string).collect();
        serde_json::to_string(&messages)
            .map_err(|e| JsValue::from_str(&format!("Serialization error: {}", e)))
    }

    pub fn build(&self, prepared: &WasmPreparedPages) -> Result<WasmSubmission, JsValue> {
        let parts = self
            .draft
            .build_submission(prepared.pages())
            .map_err(crate::to_js)?;
        Ok(WasmSubmission { parts })
    }
}

impl Default for WasmGameForm {
    fn default() -> Self {
        Self::new()
    }
}

/// Multipart fields in order, for appending to a `FormData`.
#[wasm_bindgen]
pub struct WasmSubmission {
    parts: Vec<SubmissionPart>,
}

impl WasmSubmission {
    fn part(&self, index: usize) -> Option<&SubmissionPart> {
        self.parts.get(index)
    }

    fn file(&self, index: usize) -> Option<&StagedFile> {
        match self.part(index).map(|part| &part.value) {
            Some(PartValue::File(file)) => Some(file),
            _ => None,
        }
    }
}

#[wasm_bindgen]
impl WasmSubmission {
    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    pub fn name(&self, index: usize) -> Option<String> {
        self.part(index).map(|part| part.name.to_string())
    }

    pub fn text(&self, index: usize) -> Option<String> {
        match self.part(index).map(|part| &part.value) {
            Some(PartValue::Text(text)) => Some(text.clone()),
            _ => None,
        }
    }

    pub fn file_name(&self, index: usize) -> Option<String> {
        self.file(index).map(|file| file.name.clone())
    }

    pub fn file_mime(&self, index: usize) -> Option<String> {
        self.file(index).map(|file| file.mime.clone())
    }

    pub fn file_bytes(&self, index: usize) -> Option<Vec<u8>> {
        self.file(index).map(|file| file.bytes.to_vec())
    }
}
