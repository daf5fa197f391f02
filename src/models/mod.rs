//! Data models for BookLibrary

pub mod author;
pub mod binary_file;
pub mod book;
pub mod book_group;
pub mod genre;
pub mod paging;
pub mod user;

// Re-export commonly used types
pub use author::{Author, AuthorRef};
pub use binary_file::BinaryFile;
pub use book::{Book, BookAuthor, BookDetails, BookSummary};
pub use book_group::BookGroup;
pub use genre::Genre;
pub use paging::{PaginatedResponse, Paging};
pub use user::{Role, User, UserClaims};
