use distill_core::FetchError;
use serde::de::DeserializeOwned;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ParseError {
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ParseError::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

impl From<ParseError> for FetchError {
    fn from(err: ParseError) -> Self {
        FetchError::Malformed(err.to_string())
    }
}

/// Checks applied to a response after it decoded successfully.
pub trait Validate {
    fn validate(&self) -> Result<(), ParseError>;
}

pub fn parse<T>(body: &str) -> Result<T, ParseError>
where
    T: DeserializeOwned + Validate,
{
    let value: T = serde_json::from_str(body)?;
    value.validate()?;
    Ok(value)
}

pub(crate) fn non_empty(field: &'static str, value: &str) -> Result<(), ParseError> {
    if value.trim().is_empty() {
        return Err(ParseError::invalid(field, "must not be empty"));
    }
    Ok(())
}

pub(crate) fn page_range(start: u32, end: u32) -> Result<(), ParseError> {
    if start == 0 {
        return Err(ParseError::invalid("start_page", "pages are numbered from 1"));
    }
    if end < start {
        return Err(ParseError::invalid(
            "end_page",
            format!("{} is before start page {}", end, start),
        ));
    }
    Ok(())
}
