//! Client for the remote book, distillation and progress API.

mod client;
pub mod keys;
mod models;
mod parse;
mod transport;

pub use client::ApiClient;
pub use models::{
    AllContentSectionsResponse, BookResponse, BookSummary, CheckIn, CheckInResponse,
    ContentSection, ContentSectionRange, DistilledContentResponse, DistilledPagePayload,
    GetBooksResponse, LastCheckInsResponse, PostBookRequest, PostBookResponse, ProcessingStatus,
    SetBookUploadedRequest,
};
pub use parse::{parse, ParseError, Validate};
pub use transport::{HttpReply, Method, ReqwestTransport, Transport};
