pub mod history;
pub mod validation;

pub use history::{HistoryEntry, MAX_HISTORY};
pub use validation::{ValidationError, Violation};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use validation::{
    MAX_NOTES_LEN, MAX_ORIGIN_LEN, MAX_ORIGINS, MAX_PASSWORD_LEN, MAX_TAG_LEN, MAX_TAGS, MAX_TITLE_LEN,
    MAX_USERNAME_LEN, check_len, check_list,
};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoginEntry {
    pub username: String,
    pub password: String,
    pub notes: String,
}

/// Typed secret content. The serialized form carries a `kind` tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Entry {
    Login(LoginEntry),
}

impl Entry {
    #[must_use]
    pub fn login(username: impl Into<String>, password: impl Into<String>) -> Self {
        Entry::Login(LoginEntry {
            username: username.into(),
            password: password.into(),
            notes: String::new(),
        })
    }

    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Entry::Login(_) => "login",
        }
    }

    fn validate(&self, errors: &mut ValidationError) {
        match self {
            Entry::Login(login) => {
                check_len(errors, "entry.username", &login.username, MAX_USERNAME_LEN);
                check_len(errors, "entry.password", &login.password, MAX_PASSWORD_LEN);
                check_len(errors, "entry.notes", &login.notes, MAX_NOTES_LEN);
            }
        }
    }
}

/// A fully normalized item, as stored (encrypted) and returned by the datastore.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    pub title: String,
    pub origins: Vec<String>,
    pub tags: Vec<String>,
    pub entry: Entry,
    pub disabled: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub modified: OffsetDateTime,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub last_used: Option<OffsetDateTime>,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

/// Caller-supplied item content. Unset fields fall back to the previous item on update,
/// or to defaults on add.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ItemDraft {
    pub id: Option<String>,
    pub title: Option<String>,
    pub origins: Option<Vec<String>>,
    pub tags: Option<Vec<String>>,
    pub entry: Option<Entry>,
    pub disabled: Option<bool>,
}

impl ItemDraft {
    #[must_use]
    pub fn new(title: impl Into<String>, entry: Entry) -> Self {
        Self {
            title: Some(title.into()),
            entry: Some(entry),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

impl From<Item> for ItemDraft {
    fn from(item: Item) -> Self {
        Self {
            id: Some(item.id),
            title: Some(item.title),
            origins: Some(item.origins),
            tags: Some(item.tags),
            entry: Some(item.entry),
            disabled: Some(item.disabled),
        }
    }
}

/// Validates `draft` and completes it into an [`Item`].
///
/// With no `previous`, a fresh id and creation timestamp are assigned. With a `previous`
/// item, unset draft fields keep their previous values, the creation time and history are
/// carried over, and a reverse patch of the entry is recorded when the entry changed.
///
/// # Errors
/// Returns a [`ValidationError`] describing every offending field.
pub fn prepare(draft: ItemDraft, previous: Option<&Item>) -> Result<Item, ValidationError> {
    prepare_at(draft, previous, OffsetDateTime::now_utc())
}

/// Same as [`prepare`], with an explicit clock reading.
///
/// # Errors
/// Returns a [`ValidationError`] describing every offending field.
pub fn prepare_at(draft: ItemDraft, previous: Option<&Item>, now: OffsetDateTime) -> Result<Item, ValidationError> {
    let mut errors = ValidationError::new();

    if let (Some(prev), Some(id)) = (previous, draft.id.as_deref()) {
        if prev.id != id {
            errors.insert("id", Violation::Invalid);
        }
    }

    let title = draft
        .title
        .or_else(|| previous.map(|p| p.title.clone()))
        .unwrap_or_default();
    check_len(&mut errors, "title", &title, MAX_TITLE_LEN);

    let origins = draft
        .origins
        .or_else(|| previous.map(|p| p.origins.clone()))
        .unwrap_or_default();
    check_list(&mut errors, "origins", &origins, MAX_ORIGINS, MAX_ORIGIN_LEN);

    let tags = draft
        .tags
        .or_else(|| previous.map(|p| p.tags.clone()))
        .unwrap_or_default();
    check_list(&mut errors, "tags", &tags, MAX_TAGS, MAX_TAG_LEN);

    let entry = draft.entry.or_else(|| previous.map(|p| p.entry.clone()));
    match &entry {
        Some(entry) => entry.validate(&mut errors),
        None => errors.insert("entry", Violation::MissingRequired),
    }

    errors.into_result()?;
    let Some(entry) = entry else {
        return Err(ValidationError::single("entry", Violation::MissingRequired));
    };

    let disabled = draft.disabled.or_else(|| previous.map(|p| p.disabled)).unwrap_or(false);

    let item = match previous {
        None => Item {
            id: draft.id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            title,
            origins,
            tags,
            entry,
            disabled,
            created: now,
            modified: now,
            last_used: None,
            history: Vec::new(),
        },
        Some(prev) => {
            let mut history = prev.history.clone();
            if prev.entry != entry {
                let patch = history::reverse_patch(&entry_json(&entry)?, &entry_json(&prev.entry)?);
                history::record(&mut history, HistoryEntry { created: now, patch });
            }
            Item {
                id: prev.id.clone(),
                title,
                origins,
                tags,
                entry,
                disabled,
                created: prev.created,
                modified: now,
                last_used: prev.last_used,
                history,
            }
        }
    };
    Ok(item)
}

fn entry_json(entry: &Entry) -> Result<serde_json::Value, ValidationError> {
    serde_json::to_value(entry).map_err(|_| ValidationError::single("entry", Violation::Invalid))
}
