//! Repository tests against a real PostgreSQL database
//!
//! Each test gets a fresh database with migrations applied.
//! Run with: DATABASE_URL=postgres://... cargo test -- --ignored

use chrono::Utc;
use sqlx::PgPool;

use booklibrary_server::{
    models::{
        author::Author,
        binary_file::BinaryFile,
        book::{Book, BookAuthor, BookQuery},
        book_group::BookGroup,
        genre::Genre,
        user::{Role, User},
    },
    repository::Repository,
    AppError,
};

fn genre(name: &str) -> Genre {
    Genre {
        id: 0,
        name: name.to_string(),
        description: None,
        version: 0,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

fn author(first_name: &str, last_name: &str) -> Author {
    Author {
        id: 0,
        first_name: Some(first_name.to_string()),
        last_name: last_name.to_string(),
        bio: None,
        version: 0,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

fn group(name: &str) -> BookGroup {
    BookGroup {
        id: 0,
        name: name.to_string(),
        description: None,
        version: 0,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

fn file(key: &str) -> BinaryFile {
    BinaryFile {
        id: 0,
        file_name: format!("{}.txt", key),
        content_type: "text/plain".to_string(),
        size: 5,
        storage_key: key.to_string(),
        sha256: "0".repeat(64),
        created_at: Utc::now(),
    }
}

fn book(title: &str, genre_id: i32, author_ids: &[i32]) -> Book {
    Book {
        id: 0,
        title: title.to_string(),
        description: None,
        isbn: None,
        publication_year: None,
        language: None,
        genre_id,
        book_group_id: None,
        group_position: None,
        binary_file_id: None,
        version: 0,
        created_at: Utc::now(),
        updated_at: Utc::now(),
        authors: author_ids
            .iter()
            .enumerate()
            .map(|(i, id)| BookAuthor {
                author_id: *id,
                position: i as i16,
            })
            .collect(),
    }
}

async fn add_genre(repo: &Repository, name: &str) -> Genre {
    let mut uow = repo.begin().await.unwrap();
    let created = repo.genres.add(&mut uow, &genre(name)).await.unwrap();
    uow.commit().await.unwrap();
    created
}

async fn add_author(repo: &Repository, first_name: &str, last_name: &str) -> Author {
    let mut uow = repo.begin().await.unwrap();
    let created = repo.authors.add(&mut uow, &author(first_name, last_name)).await.unwrap();
    uow.commit().await.unwrap();
    created
}

async fn add_book(repo: &Repository, book: &Book) -> Book {
    let mut uow = repo.begin().await.unwrap();
    let created = repo.books.add(&mut uow, book).await.unwrap();
    uow.commit().await.unwrap();
    created
}

#[sqlx::test(migrations = "./migrations")]
#[ignore]
async fn test_add_then_get(pool: PgPool) {
    let repo = Repository::new(pool);
    let created = add_genre(&repo, "Poetry").await;

    let fetched = repo.genres.get_by_id(created.id).await.unwrap();
    assert_eq!(fetched, created);
    assert!(matches!(repo.genres.get_by_id(created.id + 1000).await, Err(AppError::NotFound(_))));
}

#[sqlx::test(migrations = "./migrations")]
#[ignore]
async fn test_stale_update_is_rejected(pool: PgPool) {
    let repo = Repository::new(pool);
    let created = add_genre(&repo, "Drama").await;

    let mut first = created.clone();
    first.name = "Tragedy".to_string();
    let mut uow = repo.begin().await.unwrap();
    let updated = repo.genres.update(&mut uow, &first).await.unwrap();
    uow.commit().await.unwrap();
    assert_eq!(updated.version, created.version + 1);

    // Second writer still holds the original version
    let mut second = created.clone();
    second.name = "Comedy".to_string();
    let mut uow = repo.begin().await.unwrap();
    let result = repo.genres.update(&mut uow, &second).await;
    assert!(matches!(result, Err(AppError::Concurrency(_))));
    drop(uow);

    assert_eq!(repo.genres.get_by_id(created.id).await.unwrap().name, "Tragedy");
}

#[sqlx::test(migrations = "./migrations")]
#[ignore]
async fn test_genre_in_use_cannot_be_deleted(pool: PgPool) {
    let repo = Repository::new(pool);
    let novel = add_genre(&repo, "Novel").await;
    let tolstoy = add_author(&repo, "Leo", "Tolstoy").await;
    let anna = add_book(&repo, &book("Anna Karenina", novel.id, &[tolstoy.id])).await;

    let mut uow = repo.begin().await.unwrap();
    let result = repo.genres.delete(&mut uow, novel.id).await;
    assert!(matches!(result, Err(AppError::ReferentialIntegrity(_))));
    drop(uow);

    // Once the book is gone the genre is free
    let mut uow = repo.begin().await.unwrap();
    repo.books.delete(&mut uow, anna.id).await.unwrap();
    repo.genres.delete(&mut uow, novel.id).await.unwrap();
    uow.commit().await.unwrap();
    assert!(repo.genres.find(novel.id).await.unwrap().is_none());
}

#[sqlx::test(migrations = "./migrations")]
#[ignore]
async fn test_unreferenced_genre_can_be_deleted(pool: PgPool) {
    let repo = Repository::new(pool);
    let poetry = add_genre(&repo, "Poetry").await;

    let mut uow = repo.begin().await.unwrap();
    repo.genres.delete(&mut uow, poetry.id).await.unwrap();
    uow.commit().await.unwrap();
    assert!(matches!(repo.genres.get_by_id(poetry.id).await, Err(AppError::NotFound(_))));
}

#[sqlx::test(migrations = "./migrations")]
#[ignore]
async fn test_book_add_then_get(pool: PgPool) {
    let repo = Repository::new(pool);
    let novel = add_genre(&repo, "Novel").await;
    let tolstoy = add_author(&repo, "A.", "Tolstoy").await;

    let created = add_book(&repo, &book("War and Peace", novel.id, &[tolstoy.id])).await;
    let fetched = repo.books.get_by_id(created.id).await.unwrap();

    assert_eq!(fetched, created);
    assert_eq!(fetched.title, "War and Peace");
    assert_eq!(fetched.genre_id, novel.id);
    assert_eq!(fetched.authors.len(), 1);
    assert_eq!(fetched.author_ids(), vec![tolstoy.id]);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore]
async fn test_book_with_two_tolstoys(pool: PgPool) {
    let repo = Repository::new(pool);
    let novel = add_genre(&repo, "Novel").await;
    let leo = add_author(&repo, "Leo", "Tolstoy").await;
    let alexei = add_author(&repo, "Alexei", "Tolstoy").await;

    let created = add_book(&repo, &book("Collected Tolstoy", novel.id, &[leo.id, alexei.id])).await;
    assert_eq!(created.author_ids(), vec![leo.id, alexei.id]);

    // Swap the order; both associations survive with new positions
    let mut swapped = created.clone();
    swapped.authors = vec![
        BookAuthor { author_id: alexei.id, position: 0 },
        BookAuthor { author_id: leo.id, position: 1 },
    ];
    let mut uow = repo.begin().await.unwrap();
    let (updated, released) = repo.books.update(&mut uow, &swapped).await.unwrap();
    uow.commit().await.unwrap();
    assert!(released.is_none());
    assert_eq!(updated.author_ids(), vec![alexei.id, leo.id]);

    let refs = repo.authors.refs_for_books(&[created.id]).await.unwrap();
    let names: Vec<String> = refs[&created.id].iter().map(|r| r.name.clone()).collect();
    assert_eq!(names, vec!["Alexei Tolstoy", "Leo Tolstoy"]);

    // An author of a book cannot be removed
    let mut uow = repo.begin().await.unwrap();
    let result = repo.authors.delete(&mut uow, leo.id).await;
    assert!(matches!(result, Err(AppError::ReferentialIntegrity(_))));
    drop(uow);

    let query = BookQuery {
        author_id: Some(alexei.id),
        ..Default::default()
    };
    let (books, total) = repo.books.list(&query).await.unwrap();
    assert_eq!(total, 1);
    assert_eq!(books[0].id, created.id);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore]
async fn test_unchanged_authors_keep_version_semantics(pool: PgPool) {
    let repo = Repository::new(pool);
    let novel = add_genre(&repo, "Novel").await;
    let leo = add_author(&repo, "Leo", "Tolstoy").await;
    let created = add_book(&repo, &book("War and Peace", novel.id, &[leo.id])).await;

    let mut uow = repo.begin().await.unwrap();
    let (once, _) = repo.books.update(&mut uow, &created).await.unwrap();
    let (twice, _) = repo.books.update(&mut uow, &once).await.unwrap();
    uow.commit().await.unwrap();

    assert_eq!(twice.authors, created.authors);
    assert_eq!(twice.version, created.version + 2);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore]
async fn test_book_needs_existing_authors(pool: PgPool) {
    let repo = Repository::new(pool);
    let novel = add_genre(&repo, "Novel").await;

    let mut uow = repo.begin().await.unwrap();
    let result = repo.books.add(&mut uow, &book("Nobody wrote this", novel.id, &[4242])).await;
    assert!(matches!(result, Err(AppError::Validation(_))));

    let mut uow = repo.begin().await.unwrap();
    let result = repo.books.add(&mut uow, &book("Anonymous", novel.id, &[])).await;
    assert!(matches!(result, Err(AppError::Validation(_))));
}

#[sqlx::test(migrations = "./migrations")]
#[ignore]
async fn test_deleting_group_detaches_books(pool: PgPool) {
    let repo = Repository::new(pool);
    let novel = add_genre(&repo, "Novel").await;
    let leo = add_author(&repo, "Leo", "Tolstoy").await;

    let mut uow = repo.begin().await.unwrap();
    let trilogy = repo.book_groups.add(&mut uow, &group("Autobiographical trilogy")).await.unwrap();
    uow.commit().await.unwrap();

    let mut childhood = book("Childhood", novel.id, &[leo.id]);
    childhood.book_group_id = Some(trilogy.id);
    childhood.group_position = Some(1);
    let childhood = add_book(&repo, &childhood).await;

    let mut uow = repo.begin().await.unwrap();
    let detached = repo.book_groups.delete(&mut uow, trilogy.id).await.unwrap();
    uow.commit().await.unwrap();
    assert_eq!(detached, 1);

    let after = repo.books.get_by_id(childhood.id).await.unwrap();
    assert_eq!(after.book_group_id, None);
    assert_eq!(after.group_position, None);
    assert_eq!(after.version, childhood.version + 1);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore]
async fn test_file_owned_by_book(pool: PgPool) {
    let repo = Repository::new(pool);
    let novel = add_genre(&repo, "Novel").await;
    let leo = add_author(&repo, "Leo", "Tolstoy").await;

    let mut uow = repo.begin().await.unwrap();
    let first = repo.binary_files.add(&mut uow, &file("first")).await.unwrap();
    let second = repo.binary_files.add(&mut uow, &file("second")).await.unwrap();
    uow.commit().await.unwrap();

    let mut resurrection = book("Resurrection", novel.id, &[leo.id]);
    resurrection.binary_file_id = Some(first.id);
    let created = add_book(&repo, &resurrection).await;
    assert_eq!(repo.binary_files.owner(first.id).await.unwrap(), Some(created.id));

    let mut uow = repo.begin().await.unwrap();
    let result = repo.binary_files.delete(&mut uow, first.id).await;
    assert!(matches!(result, Err(AppError::ReferentialIntegrity(_))));
    drop(uow);

    // Replacing the file releases the previous row
    let mut replaced = created.clone();
    replaced.binary_file_id = Some(second.id);
    let mut uow = repo.begin().await.unwrap();
    let (_, released) = repo.books.update(&mut uow, &replaced).await.unwrap();
    uow.commit().await.unwrap();
    assert_eq!(released.map(|f| f.id), Some(first.id));
    assert!(repo.binary_files.find(first.id).await.unwrap().is_none());

    // Deleting the book takes its file row along
    let mut uow = repo.begin().await.unwrap();
    let released = repo.books.delete(&mut uow, created.id).await.unwrap();
    uow.commit().await.unwrap();
    assert_eq!(released.map(|f| f.storage_key), Some("second".to_string()));
    assert!(repo.binary_files.find(second.id).await.unwrap().is_none());
}

#[sqlx::test(migrations = "./migrations")]
#[ignore]
async fn test_user_roles_merge(pool: PgPool) {
    let repo = Repository::new(pool);
    let user = User {
        id: 0,
        login: "reader1".to_string(),
        email: None,
        display_name: None,
        password_hash: "x".to_string(),
        locale: None,
        created_at: Utc::now(),
        updated_at: Utc::now(),
        roles: vec![Role::Reader],
    };

    let mut uow = repo.begin().await.unwrap();
    let created = repo.users.create(&mut uow, &user).await.unwrap();
    uow.commit().await.unwrap();
    assert_eq!(created.roles, vec![Role::Reader]);
    assert!(!repo.users.has_admin().await.unwrap());

    let mut uow = repo.begin().await.unwrap();
    repo.users
        .set_roles(&mut uow, created.id, &[Role::Reader, Role::Admin])
        .await
        .unwrap();
    uow.commit().await.unwrap();
    assert!(repo.users.has_admin().await.unwrap());

    let mut uow = repo.begin().await.unwrap();
    let duplicate = repo.users.create(&mut uow, &User { login: "READER1".to_string(), ..user }).await;
    assert!(matches!(duplicate, Err(AppError::Conflict(_))));
}
