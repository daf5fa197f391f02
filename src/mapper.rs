//! Conversions between persisted entities and transfer shapes.
//!
//! Every supported type pair has exactly one conversion here: `From` impls build
//! new entities from create requests and views from entities, `MapOnto` copies an
//! update request onto an entity that was read from the store. Collections that
//! must be reconciled rather than replaced go through [`merge_by_key`].

use std::collections::{HashMap, HashSet};
use std::hash::Hash;

use chrono::Utc;

use crate::models::{
    author::{Author, AuthorRef, CreateAuthor, UpdateAuthor},
    book::{Book, BookAuthor, BookDetails, BookRelations, BookSummary, CreateBook, UpdateBook},
    book_group::{BookGroup, CreateBookGroup, UpdateBookGroup},
    genre::{CreateGenre, Genre, UpdateGenre},
};

/// Copy the editable fields of an update request onto an entity, including the
/// version token the client read.
pub trait MapOnto<E> {
    fn map_onto(&self, entity: &mut E);
}

/// Changes needed to turn one collection into another
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergePlan<T> {
    /// Existing elements whose key is absent from the incoming set
    pub remove: Vec<T>,
    /// Incoming elements whose key is new
    pub add: Vec<T>,
    /// Incoming elements whose key exists but whose value differs
    pub update: Vec<T>,
}

impl<T> MergePlan<T> {
    pub fn is_empty(&self) -> bool {
        self.remove.is_empty() && self.add.is_empty() && self.update.is_empty()
    }
}

/// Reconcile `existing` against `incoming` by equivalence key.
///
/// Duplicate keys in `incoming` keep their first occurrence. Applying the plan and
/// merging the same input again yields an empty plan.
pub fn merge_by_key<T, K, F>(existing: &[T], incoming: &[T], key: F) -> MergePlan<T>
where
    T: Clone + PartialEq,
    K: Eq + Hash,
    F: Fn(&T) -> K,
{
    let incoming = dedup_by_key(incoming, &key);
    let current: HashMap<K, &T> = existing.iter().map(|e| (key(e), e)).collect();
    let wanted: HashSet<K> = incoming.iter().map(&key).collect();

    let remove = existing
        .iter()
        .filter(|e| !wanted.contains(&key(*e)))
        .cloned()
        .collect();

    let mut add = Vec::new();
    let mut update = Vec::new();
    for item in incoming {
        match current.get(&key(&item)) {
            None => add.push(item),
            Some(old) if **old != item => update.push(item),
            Some(_) => {}
        }
    }

    MergePlan { remove, add, update }
}

/// Merge `incoming` into `target` in place and return the plan that was applied.
/// Elements keep the order of `incoming`.
pub fn merge_into<T, K, F>(target: &mut Vec<T>, incoming: &[T], key: F) -> MergePlan<T>
where
    T: Clone + PartialEq,
    K: Eq + Hash,
    F: Fn(&T) -> K,
{
    let plan = merge_by_key(target.as_slice(), incoming, &key);
    if !plan.is_empty() {
        *target = dedup_by_key(incoming, &key);
    }
    plan
}

fn dedup_by_key<T, K, F>(items: &[T], key: F) -> Vec<T>
where
    T: Clone,
    K: Eq + Hash,
    F: Fn(&T) -> K,
{
    let mut seen = HashSet::new();
    items
        .iter()
        .filter(|item| seen.insert(key(*item)))
        .cloned()
        .collect()
}

/// Author association rows for an ordered list of author ids
pub fn book_authors(author_ids: &[i32]) -> Vec<BookAuthor> {
    let mut seen = HashSet::new();
    author_ids
        .iter()
        .filter(|id| seen.insert(**id))
        .enumerate()
        .map(|(position, author_id)| BookAuthor {
            author_id: *author_id,
            position: i16::try_from(position).unwrap_or(i16::MAX),
        })
        .collect()
}

fn trimmed(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

// --- Genre ---

impl From<CreateGenre> for Genre {
    fn from(data: CreateGenre) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            name: data.name.trim().to_string(),
            description: trimmed(&data.description),
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

impl MapOnto<Genre> for UpdateGenre {
    fn map_onto(&self, entity: &mut Genre) {
        entity.name = self.name.trim().to_string();
        entity.description = trimmed(&self.description);
        entity.version = self.version;
    }
}

// --- Author ---

impl From<CreateAuthor> for Author {
    fn from(data: CreateAuthor) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            first_name: trimmed(&data.first_name),
            last_name: data.last_name.trim().to_string(),
            bio: trimmed(&data.bio),
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

impl MapOnto<Author> for UpdateAuthor {
    fn map_onto(&self, entity: &mut Author) {
        entity.first_name = trimmed(&self.first_name);
        entity.last_name = self.last_name.trim().to_string();
        entity.bio = trimmed(&self.bio);
        entity.version = self.version;
    }
}

// --- BookGroup ---

impl From<CreateBookGroup> for BookGroup {
    fn from(data: CreateBookGroup) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            name: data.name.trim().to_string(),
            description: trimmed(&data.description),
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

impl MapOnto<BookGroup> for UpdateBookGroup {
    fn map_onto(&self, entity: &mut BookGroup) {
        entity.name = self.name.trim().to_string();
        entity.description = trimmed(&self.description);
        entity.version = self.version;
    }
}

// --- Book ---

impl From<CreateBook> for Book {
    fn from(data: CreateBook) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            title: data.title.trim().to_string(),
            description: trimmed(&data.description),
            isbn: trimmed(&data.isbn),
            publication_year: data.publication_year,
            language: trimmed(&data.language),
            genre_id: data.genre_id,
            book_group_id: data.book_group_id,
            group_position: data.book_group_id.and(data.group_position),
            binary_file_id: data.binary_file_id,
            version: 0,
            created_at: now,
            updated_at: now,
            authors: book_authors(&data.author_ids),
        }
    }
}

impl MapOnto<Book> for UpdateBook {
    fn map_onto(&self, entity: &mut Book) {
        entity.title = self.title.trim().to_string();
        entity.description = trimmed(&self.description);
        entity.isbn = trimmed(&self.isbn);
        entity.publication_year = self.publication_year;
        entity.language = trimmed(&self.language);
        entity.genre_id = self.genre_id;
        entity.book_group_id = self.book_group_id;
        entity.group_position = self.book_group_id.and(self.group_position);
        entity.binary_file_id = self.binary_file_id;
        entity.version = self.version;
        merge_into(&mut entity.authors, &book_authors(&self.author_ids), |a| a.author_id);
    }
}

impl From<(Book, BookRelations)> for BookDetails {
    fn from((book, relations): (Book, BookRelations)) -> Self {
        Self {
            id: book.id,
            title: book.title,
            description: book.description,
            isbn: book.isbn,
            publication_year: book.publication_year,
            language: book.language,
            authors: relations.authors,
            genre: relations.genre,
            book_group: relations.book_group,
            group_position: book.group_position,
            file: relations.file,
            version: book.version,
            created_at: book.created_at,
            updated_at: book.updated_at,
        }
    }
}

impl From<(Book, Vec<AuthorRef>)> for BookSummary {
    fn from((book, authors): (Book, Vec<AuthorRef>)) -> Self {
        Self {
            id: book.id,
            title: book.title,
            isbn: book.isbn,
            publication_year: book.publication_year,
            genre_id: book.genre_id,
            book_group_id: book.book_group_id,
            group_position: book.group_position,
            has_file: book.binary_file_id.is_some(),
            authors,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ba(author_id: i32, position: i16) -> BookAuthor {
        BookAuthor { author_id, position }
    }

    fn sample_book() -> Book {
        Book::from(CreateBook {
            title: "  War and Peace ".to_string(),
            description: Some("   ".to_string()),
            isbn: None,
            publication_year: Some(1869),
            language: Some("ru".to_string()),
            genre_id: 3,
            book_group_id: None,
            group_position: Some(2),
            binary_file_id: None,
            author_ids: vec![1, 2],
        })
    }

    fn update_for(book: &Book, author_ids: Vec<i32>) -> UpdateBook {
        UpdateBook {
            version: book.version,
            title: book.title.clone(),
            description: book.description.clone(),
            isbn: book.isbn.clone(),
            publication_year: book.publication_year,
            language: book.language.clone(),
            genre_id: book.genre_id,
            book_group_id: book.book_group_id,
            group_position: book.group_position,
            binary_file_id: book.binary_file_id,
            author_ids,
        }
    }

    #[test]
    fn test_merge_adds_and_removes_by_key() {
        let existing = vec![ba(1, 0), ba(2, 1)];
        let incoming = vec![ba(2, 0), ba(3, 1)];
        let plan = merge_by_key(&existing, &incoming, |a| a.author_id);
        assert_eq!(plan.remove, vec![ba(1, 0)]);
        assert_eq!(plan.add, vec![ba(3, 1)]);
        assert_eq!(plan.update, vec![ba(2, 0)]);
    }

    #[test]
    fn test_merge_is_idempotent() {
        let mut authors = vec![ba(1, 0), ba(2, 1)];
        let incoming = book_authors(&[2, 5]);

        let first = merge_into(&mut authors, &incoming, |a| a.author_id);
        assert!(!first.is_empty());
        let after_first = authors.clone();

        let second = merge_into(&mut authors, &incoming, |a| a.author_id);
        assert!(second.is_empty());
        assert_eq!(authors, after_first);
    }

    #[test]
    fn test_merge_ignores_duplicate_incoming_keys() {
        let plan = merge_by_key(&[], &[ba(4, 0), ba(4, 1)], |a| a.author_id);
        assert_eq!(plan.add, vec![ba(4, 0)]);
    }

    #[test]
    fn test_book_authors_positions() {
        assert_eq!(book_authors(&[9, 4, 9, 1]), vec![ba(9, 0), ba(4, 1), ba(1, 2)]);
    }

    #[test]
    fn test_create_book_mapping() {
        let book = sample_book();
        assert_eq!(book.title, "War and Peace");
        assert_eq!(book.description, None);
        // Position without a group is meaningless
        assert_eq!(book.group_position, None);
        assert_eq!(book.author_ids(), vec![1, 2]);
    }

    #[test]
    fn test_update_book_mapping_twice_leaves_same_authors() {
        let mut book = sample_book();
        let update = update_for(&book, vec![2, 7]);

        update.map_onto(&mut book);
        let once = book.clone();
        update.map_onto(&mut book);

        assert_eq!(book, once);
        assert_eq!(book.author_ids(), vec![2, 7]);
    }

    #[test]
    fn test_update_carries_client_version() {
        let mut book = sample_book();
        book.version = 4;
        let mut update = update_for(&book, vec![1]);
        update.version = 2;
        update.map_onto(&mut book);
        assert_eq!(book.version, 2);
    }
}
