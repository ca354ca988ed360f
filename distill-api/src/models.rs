use chrono::{DateTime, NaiveDate, Utc};
use distill_core::{BookId, DistilledPage, Document, Paragraph, Section};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::parse::{non_empty, page_range, ParseError, Validate};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookResponse {
    pub book_id: BookId,
    pub download_url: String,
}

impl Validate for BookResponse {
    fn validate(&self) -> Result<(), ParseError> {
        non_empty("book_id", &self.book_id)?;
        Url::parse(&self.download_url)
            .map_err(|err| ParseError::invalid("download_url", err.to_string()))?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookSummary {
    #[serde(alias = "book_id")]
    pub id: BookId,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub progress: Option<u32>,
    #[serde(default)]
    pub is_uploaded: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetBooksResponse {
    pub books: Vec<BookSummary>,
}

impl Validate for GetBooksResponse {
    fn validate(&self) -> Result<(), ParseError> {
        self.books
            .iter()
            .try_for_each(|book| non_empty("books[].id", &book.id))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostBookRequest {
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostBookResponse {
    pub book_id: BookId,
    pub upload_url: String,
}

impl Validate for PostBookResponse {
    fn validate(&self) -> Result<(), ParseError> {
        non_empty("book_id", &self.book_id)?;
        Url::parse(&self.upload_url)
            .map_err(|err| ParseError::invalid("upload_url", err.to_string()))?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetBookUploadedRequest {
    pub book_id: BookId,
}

/// Page range of the section containing one page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentSectionRange {
    pub start_page: u32,
    pub end_page: u32,
}

impl Validate for ContentSectionRange {
    fn validate(&self) -> Result<(), ParseError> {
        page_range(self.start_page, self.end_page)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentSection {
    pub book_id: BookId,
    #[serde(default)]
    pub user_id: Option<String>,
    pub start_page: u32,
    pub end_page: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllContentSectionsResponse {
    pub content_sections: Vec<ContentSection>,
}

impl Validate for AllContentSectionsResponse {
    // Bad ranges are left for the page mapper to drop.
    fn validate(&self) -> Result<(), ParseError> {
        Ok(())
    }
}

impl AllContentSectionsResponse {
    /// Orders sections by page and numbers them from 0.
    pub fn to_document(&self, book: &BookId) -> Document {
        let mut ranges: Vec<(u32, u32)> = self
            .content_sections
            .iter()
            .map(|section| (section.start_page, section.end_page))
            .collect();
        ranges.sort_unstable();
        ranges.dedup();

        let sections: Vec<Section> = ranges
            .into_iter()
            .enumerate()
            .map(|(index, (start_page, end_page))| Section {
                index,
                start_page,
                end_page,
                title: format!("Pages {}-{}", start_page, end_page),
            })
            .collect();
        let total_pages = sections
            .iter()
            .map(|section| section.end_page)
            .max()
            .unwrap_or(0);

        Document {
            id: book.clone(),
            total_pages,
            sections,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessingStatus {
    InProgress,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistilledPagePayload {
    pub book_id: BookId,
    #[serde(default)]
    pub user_id: Option<String>,
    pub start_page: u32,
    pub end_page: u32,
    pub paragraphs: Vec<Paragraph>,
    #[serde(default)]
    pub created_datetime: Option<DateTime<Utc>>,
    #[serde(default)]
    pub processing_status: Option<ProcessingStatus>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistilledContentResponse {
    pub distilled_page: DistilledPagePayload,
}

impl Validate for DistilledContentResponse {
    fn validate(&self) -> Result<(), ParseError> {
        let page = &self.distilled_page;
        page_range(page.start_page, page.end_page)?;
        if page.processing_status == Some(ProcessingStatus::InProgress) {
            return Err(ParseError::invalid(
                "processing_status",
                "content returned before processing completed",
            ));
        }
        Ok(())
    }
}

impl From<DistilledContentResponse> for DistilledPage {
    fn from(response: DistilledContentResponse) -> Self {
        let page = response.distilled_page;
        DistilledPage {
            start_page: page.start_page,
            end_page: page.end_page,
            paragraphs: page.paragraphs,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckIn {
    pub date: NaiveDate,
    #[serde(default)]
    pub checked_in: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckInResponse {
    pub date: NaiveDate,
}

impl Validate for CheckInResponse {
    fn validate(&self) -> Result<(), ParseError> {
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastCheckInsResponse {
    pub check_ins: Vec<CheckIn>,
}

impl Validate for LastCheckInsResponse {
    fn validate(&self) -> Result<(), ParseError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse;
    use distill_core::ParagraphKind;

    #[test]
    fn distilled_payload_converts_to_page() {
        let body = r#"{
            "distilled_page": {
                "book_id": "b1",
                "user_id": "u1",
                "start_page": 3,
                "end_page": 6,
                "paragraphs": [
                    {"type": "core", "content": "Main idea.", "pages": [3, 4]},
                    {"type": "transition", "content": "Next,", "pages": []}
                ],
                "created_datetime": "2024-05-01T10:00:00Z",
                "processing_status": "COMPLETED"
            }
        }"#;
        let response: DistilledContentResponse = parse(body).unwrap();
        let page = DistilledPage::from(response);
        assert_eq!((page.start_page, page.end_page), (3, 6));
        assert_eq!(page.paragraphs[1].kind, ParagraphKind::Transition);
    }

    #[test]
    fn inverted_distilled_range_is_rejected() {
        let body = r#"{"distilled_page":{"book_id":"b1","start_page":9,"end_page":2,"paragraphs":[]}}"#;
        let err = parse::<DistilledContentResponse>(body).unwrap_err();
        assert!(matches!(err, ParseError::Invalid { field: "end_page", .. }));
    }

    #[test]
    fn negative_pages_fail_to_decode() {
        let body = r#"{"start_page":-1,"end_page":4}"#;
        assert!(matches!(
            parse::<ContentSectionRange>(body),
            Err(ParseError::Json(_))
        ));
    }

    #[test]
    fn sections_become_an_ordered_document() {
        let body = r#"{"content_sections":[
            {"book_id":"b1","user_id":"u","start_page":11,"end_page":20},
            {"book_id":"b1","user_id":"u","start_page":1,"end_page":10},
            {"book_id":"b1","user_id":"u","start_page":1,"end_page":10}
        ]}"#;
        let response: AllContentSectionsResponse = parse(body).unwrap();
        let document = response.to_document(&"b1".to_string());
        assert_eq!(document.total_pages, 20);
        assert_eq!(document.sections.len(), 2);
        assert_eq!(document.sections[0].start_page, 1);
        assert_eq!(document.sections[1].index, 1);
        assert_eq!(document.sections[1].title, "Pages 11-20");
    }

    #[test]
    fn book_urls_are_checked() {
        let ok = r#"{"book_id":"b1","download_url":"https://files.example.com/b1.pdf"}"#;
        assert!(parse::<BookResponse>(ok).is_ok());
        let bad = r#"{"book_id":"b1","download_url":"not a url"}"#;
        assert!(matches!(
            parse::<BookResponse>(bad),
            Err(ParseError::Invalid { field: "download_url", .. })
        ));
    }
}
