use serde::{Deserialize, Serialize};

use crate::constants::{
    APP_NAME, AUTHOR_NOT_SPECIFIED, COLLECTIVE_OF_AUTHORS, FILE_HASH_LEN, MAX_FIELD_LEN,
    MAX_LISTED_AUTHORS, MIN_TERM_LEN,
};
use crate::error::ValidationError;

/// Content of a "book wanted" event. Absent and empty fields impose no
/// constraint on the catalog lookup.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RequestPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub series: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_hash: Option<String>,
    /// Free-form name of the software that sent the request.
    #[serde(default)]
    pub source: String,
}

impl RequestPayload {
    /// Build a payload from user input, trimming fields and dropping empty ones.
    pub fn new(
        author: Option<&str>,
        series: Option<&str>,
        title: Option<&str>,
        file_hash: Option<&str>,
    ) -> Self {
        Self {
            author: clean(author),
            series: clean(series),
            title: clean(title),
            file_hash: clean(file_hash),
            source: APP_NAME.to_string(),
        }
    }

    /// Parse untrusted event content and normalize it the same way
    /// [`RequestPayload::new`] does.
    pub fn from_json(content: &str) -> Result<Self, ValidationError> {
        let raw: RequestPayload = serde_json::from_str(content)
            .map_err(|e| ValidationError::Malformed(e.to_string()))?;
        Ok(Self {
            author: clean(raw.author.as_deref()),
            series: clean(raw.series.as_deref()),
            title: clean(raw.title.as_deref()),
            file_hash: clean(raw.file_hash.as_deref()),
            source: raw.source,
        })
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn is_empty(&self) -> bool {
        self.author.is_none()
            && self.series.is_none()
            && self.title.is_none()
            && self.file_hash.is_none()
    }

    /// Policy shared by the publishing side and the incoming pipeline.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.is_empty() {
            return Err(ValidationError::Empty);
        }

        check_field("author", self.author.as_deref(), 1)?;
        check_field("series", self.series.as_deref(), MIN_TERM_LEN)?;
        check_field("title", self.title.as_deref(), MIN_TERM_LEN)?;

        if let Some(hash) = &self.file_hash {
            if !is_valid_file_hash(hash) {
                return Err(ValidationError::BadFileHash);
            }
        }
        Ok(())
    }
}

/// One book inside a response payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResponseBook {
    /// Book id in the responder's catalog.
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub series: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub series_number: Option<i64>,
    pub file_type: String,
    pub file_hash: String,
    pub file_size: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipfs_cid: Option<String>,
}

/// Parse the content of a response event. Every entry must carry a
/// well-formed fingerprint, otherwise the whole payload is rejected.
pub fn parse_response(content: &str) -> Result<Vec<ResponseBook>, ValidationError> {
    let books: Vec<ResponseBook> =
        serde_json::from_str(content).map_err(|e| ValidationError::Malformed(e.to_string()))?;
    if books.is_empty() {
        return Err(ValidationError::NoBooks);
    }
    if books.iter().any(|b| !is_valid_file_hash(&b.file_hash)) {
        return Err(ValidationError::BadFileHash);
    }
    Ok(books)
}

/// Author list as it goes on the wire.
pub fn collapse_authors(authors: Vec<String>) -> Vec<String> {
    match authors.len() {
        0 => vec![AUTHOR_NOT_SPECIFIED.to_string()],
        n if n > MAX_LISTED_AUTHORS => vec![COLLECTIVE_OF_AUTHORS.to_string()],
        _ => authors,
    }
}

/// Exactly 16 lowercase hex characters.
pub fn is_valid_file_hash(hash: &str) -> bool {
    hash.len() == FILE_HASH_LEN && hash.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

fn clean(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn check_field(name: &'static str, value: Option<&str>, min: usize) -> Result<(), ValidationError> {
    let Some(value) = value else {
        return Ok(());
    };
    let len = value.chars().count();
    if len < min {
        return Err(ValidationError::TooShort { field: name, min });
    }
    if len > MAX_FIELD_LEN {
        return Err(ValidationError::TooLong {
            field: name,
            max: MAX_FIELD_LEN,
        });
    }
    if value.chars().any(char::is_control) {
        return Err(ValidationError::DisallowedCharacters(name));
    }
    Ok(())
}
