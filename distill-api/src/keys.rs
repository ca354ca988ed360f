//! Cache keys, one family per endpoint.

use distill_core::BookId;

pub const ALL_BOOKS: &str = "all_books";

pub fn book(book: &BookId) -> String {
    format!("book_{}", book)
}

pub fn content_section(book: &BookId, page: u32) -> String {
    format!("content_section_{}_{}", book, page)
}

pub fn all_content_sections(book: &BookId) -> String {
    format!("all_content_sections_{}", book)
}

pub fn distilled_content(book: &BookId, start_page: u32, end_page: u32) -> String {
    format!("distilled_content_{}_{}_{}", book, start_page, end_page)
}

pub fn last_check_ins(n: u32) -> String {
    format!("last_{}_check_ins", n)
}

pub fn app_config(key: &str) -> String {
    format!("app_config_{}", key)
}
