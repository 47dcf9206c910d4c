/**
 * Post Lifecycle
 * Slug derivation and validation, uniqueness enforcement, and the
 * draft/published state machine for blog posts.
 */
use regex::Regex;
use sqlx::PgPool;
use std::future::Future;
use std::time::Duration;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;
use uuid::Uuid;

use crate::db::models::{BlogPost, PostStats};

/// Excerpts are capped to keep list cards and meta descriptions sane.
pub const EXCERPT_MAX_CHARS: usize = 300;

/// Upper bound on any single round-trip to the store from a request handler.
pub const STORE_TIMEOUT: Duration = Duration::from_secs(10);

lazy_static::lazy_static! {
    /// Valid slug pattern: lowercase letters, numbers, and hyphens
    static ref SLUG_REGEX: Regex = Regex::new(r"^[a-z0-9-]+$").unwrap();
}

pub fn is_valid_slug(slug: &str) -> bool {
    SLUG_REGEX.is_match(slug)
}

#[derive(Debug, thiserror::Error)]
pub enum PostError {
    #[error("{0}")]
    Validation(String),

    #[error("a post with slug '{0}' already exists")]
    SlugConflict(String),

    #[error("{0}")]
    Conflict(String),

    #[error("post not found")]
    NotFound,

    #[error("storage error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("the storage backend did not respond in time")]
    Timeout,
}

/// Editor-submitted fields for creating or updating a post. A missing slug
/// is derived from the title during normalization.
#[derive(Debug, Clone)]
pub struct PostFields {
    pub title: String,
    pub slug: Option<String>,
    pub excerpt: String,
    pub content: String,
    pub image_url: Option<String>,
    pub published: bool,
}

/// Fields that passed normalization and validation.
#[derive(Debug, Clone)]
pub struct ValidPostFields {
    pub title: String,
    pub slug: String,
    pub excerpt: String,
    pub content: String,
    pub image_url: Option<String>,
    pub published: bool,
}

/// Derive a URL-safe slug from a post title: lowercase, accents stripped,
/// runs of anything outside `[a-z0-9]` collapsed to a single hyphen, no
/// leading or trailing hyphen.
pub fn derive_slug(title: &str) -> String {
    let folded: String = title
        .to_lowercase()
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .collect();

    let mut slug = String::with_capacity(folded.len());
    for c in folded.chars() {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            slug.push(c);
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }

    slug.trim_end_matches('-').to_string()
}

/// Trim inputs, fill in a derived slug where none was given, and enforce the
/// field invariants. Pure; no store access.
pub fn normalize_fields(input: PostFields) -> Result<ValidPostFields, PostError> {
    let title = input.title.trim().to_string();
    let slug = match input.slug.as_deref().map(str::trim) {
        Some(s) if !s.is_empty() => s.to_string(),
        _ => derive_slug(&title),
    };
    let excerpt = input.excerpt.trim().to_string();
    let content = input.content.trim().to_string();
    let image_url = input.image_url.and_then(|u| {
        let u = u.trim().to_string();
        if u.is_empty() {
            None
        } else {
            Some(u)
        }
    });

    if title.is_empty() {
        return Err(PostError::Validation("Title is required".to_string()));
    }
    if slug.is_empty() {
        return Err(PostError::Validation("Slug is required".to_string()));
    }
    if !is_valid_slug(&slug) {
        return Err(PostError::Validation(
            "Slug must contain only lowercase letters, numbers, and hyphens".to_string(),
        ));
    }
    if excerpt.is_empty() {
        return Err(PostError::Validation("Excerpt is required".to_string()));
    }
    if excerpt.chars().count() > EXCERPT_MAX_CHARS {
        return Err(PostError::Validation(format!(
            "Excerpt must be at most {} characters",
            EXCERPT_MAX_CHARS
        )));
    }
    if content.is_empty() {
        return Err(PostError::Validation("Content is required".to_string()));
    }

    Ok(ValidPostFields {
        title,
        slug,
        excerpt,
        content,
        image_url,
        published: input.published,
    })
}

/// Fast-path duplicate check against every other record. Not atomic with the
/// following write; the unique index on lower(slug) catches what this misses.
pub async fn ensure_slug_available(
    pool: &PgPool,
    slug: &str,
    exclude: Option<Uuid>,
) -> Result<(), PostError> {
    let existing: Option<(Uuid,)> = match exclude {
        Some(id) => {
            sqlx::query_as("SELECT id FROM blog_posts WHERE LOWER(slug) = LOWER($1) AND id <> $2")
                .bind(slug)
                .bind(id)
                .fetch_optional(pool)
                .await?
        }
        None => {
            sqlx::query_as("SELECT id FROM blog_posts WHERE LOWER(slug) = LOWER($1)")
                .bind(slug)
                .fetch_optional(pool)
                .await?
        }
    };

    if existing.is_some() {
        return Err(PostError::SlugConflict(slug.to_string()));
    }
    Ok(())
}

pub async fn create(pool: &PgPool, input: PostFields) -> Result<BlogPost, PostError> {
    let fields = normalize_fields(input)?;
    ensure_slug_available(pool, &fields.slug, None).await?;

    sqlx::query_as::<_, BlogPost>(
        r#"
        INSERT INTO blog_posts (title, slug, excerpt, content, image_url, published, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, now(), now())
        RETURNING id, title, slug, excerpt, content, image_url, published, created_at, updated_at
        "#,
    )
    .bind(&fields.title)
    .bind(&fields.slug)
    .bind(&fields.excerpt)
    .bind(&fields.content)
    .bind(&fields.image_url)
    .bind(fields.published)
    .fetch_one(pool)
    .await
    .map_err(|e| map_write_error(e, &fields.slug))
}

/// A failed update leaves the stored record untouched: validation and the
/// slug re-check happen before the single UPDATE statement.
pub async fn update(pool: &PgPool, id: Uuid, input: PostFields) -> Result<BlogPost, PostError> {
    let existing = fetch_by_id(pool, id).await?.ok_or(PostError::NotFound)?;

    let fields = normalize_fields(input)?;
    if fields.slug != existing.slug {
        ensure_slug_available(pool, &fields.slug, Some(id)).await?;
    }

    sqlx::query_as::<_, BlogPost>(
        r#"
        UPDATE blog_posts
        SET title = $1, slug = $2, excerpt = $3, content = $4, image_url = $5, published = $6, updated_at = now()
        WHERE id = $7
        RETURNING id, title, slug, excerpt, content, image_url, published, created_at, updated_at
        "#,
    )
    .bind(&fields.title)
    .bind(&fields.slug)
    .bind(&fields.excerpt)
    .bind(&fields.content)
    .bind(&fields.image_url)
    .bind(fields.published)
    .bind(id)
    .fetch_one(pool)
    .await
    .map_err(|e| map_write_error(e, &fields.slug))
}

/// Flip the published flag only when the caller's view of the current value
/// still matches the store. A stale `expected` fails instead of re-flipping,
/// so two concurrent toggles cannot silently cancel out.
pub async fn toggle_published(
    pool: &PgPool,
    id: Uuid,
    expected: bool,
) -> Result<BlogPost, PostError> {
    let updated = sqlx::query_as::<_, BlogPost>(
        r#"
        UPDATE blog_posts
        SET published = NOT published, updated_at = now()
        WHERE id = $1 AND published = $2
        RETURNING id, title, slug, excerpt, content, image_url, published, created_at, updated_at
        "#,
    )
    .bind(id)
    .bind(expected)
    .fetch_optional(pool)
    .await?;

    match updated {
        Some(post) => Ok(post),
        None => match fetch_by_id(pool, id).await? {
            Some(_) => Err(PostError::Conflict(
                "The post was changed by another session. Reload and try again.".to_string(),
            )),
            None => Err(PostError::NotFound),
        },
    }
}

pub async fn delete(pool: &PgPool, id: Uuid) -> Result<(), PostError> {
    let result = sqlx::query("DELETE FROM blog_posts WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(PostError::NotFound);
    }
    Ok(())
}

pub async fn fetch_by_id(pool: &PgPool, id: Uuid) -> Result<Option<BlogPost>, PostError> {
    let post = sqlx::query_as::<_, BlogPost>(
        r#"
        SELECT id, title, slug, excerpt, content, image_url, published, created_at, updated_at
        FROM blog_posts
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(post)
}

/// Admin view: every post, drafts included, newest first.
pub async fn list_all(pool: &PgPool) -> Result<Vec<BlogPost>, PostError> {
    let posts = sqlx::query_as::<_, BlogPost>(
        r#"
        SELECT id, title, slug, excerpt, content, image_url, published, created_at, updated_at
        FROM blog_posts
        ORDER BY created_at DESC
        "#,
    )
    .fetch_all(pool)
    .await?;
    Ok(posts)
}

/// Public view: published posts only, newest first, with the total published
/// count for pagination.
pub async fn list_published(
    pool: &PgPool,
    limit: i64,
    offset: i64,
) -> Result<(Vec<BlogPost>, i64), PostError> {
    let posts = sqlx::query_as::<_, BlogPost>(
        r#"
        SELECT id, title, slug, excerpt, content, image_url, published, created_at, updated_at
        FROM blog_posts
        WHERE published = true
        ORDER BY created_at DESC
        LIMIT $1 OFFSET $2
        "#,
    )
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;

    let total: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM blog_posts WHERE published = true")
        .fetch_one(pool)
        .await?;

    Ok((posts, total.0))
}

pub async fn get_published_by_slug(
    pool: &PgPool,
    slug: &str,
) -> Result<Option<BlogPost>, PostError> {
    let post = sqlx::query_as::<_, BlogPost>(
        r#"
        SELECT id, title, slug, excerpt, content, image_url, published, created_at, updated_at
        FROM blog_posts
        WHERE slug = $1 AND published = true
        "#,
    )
    .bind(slug)
    .fetch_optional(pool)
    .await?;
    Ok(post)
}

/// Recompute the dashboard counts by scanning the given collection.
pub fn recompute_stats(posts: &[BlogPost]) -> PostStats {
    let published = posts.iter().filter(|p| p.published).count() as i64;
    PostStats {
        total: posts.len() as i64,
        published,
        drafts: posts.len() as i64 - published,
    }
}

/// Run a store operation under [`STORE_TIMEOUT`]. A hung round-trip resolves
/// to `PostError::Timeout` instead of pinning the caller forever.
pub async fn with_timeout<T, F>(fut: F) -> Result<T, PostError>
where
    F: Future<Output = Result<T, PostError>>,
{
    with_timeout_after(STORE_TIMEOUT, fut).await
}

async fn with_timeout_after<T, F>(limit: Duration, fut: F) -> Result<T, PostError>
where
    F: Future<Output = Result<T, PostError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(PostError::Timeout),
    }
}

/// A unique-constraint violation from the slug index is the authoritative
/// duplicate-slug signal under concurrent writers.
fn map_write_error(e: sqlx::Error, slug: &str) -> PostError {
    if e.as_database_error()
        .map_or(false, |db| db.is_unique_violation())
    {
        PostError::SlugConflict(slug.to_string())
    } else {
        PostError::Store(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample_post(published: bool) -> BlogPost {
        BlogPost {
            id: Uuid::new_v4(),
            title: "Sample".to_string(),
            slug: "sample".to_string(),
            excerpt: "An excerpt".to_string(),
            content: "Some content".to_string(),
            image_url: None,
            published,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn sample_fields() -> PostFields {
        PostFields {
            title: "Hello, World! Café".to_string(),
            slug: None,
            excerpt: "A short excerpt".to_string(),
            content: "Body text".to_string(),
            image_url: None,
            published: false,
        }
    }

    #[test]
    fn test_derive_slug_strips_accents_and_punctuation() {
        assert_eq!(derive_slug("Hello, World! Café"), "hello-world-cafe");
    }

    #[test]
    fn test_derive_slug_has_no_edge_hyphens() {
        for title in [
            "  --- Leading junk",
            "Trailing junk !!!",
            "???",
            "Multiple    spaces   here",
            "Ünïcödé Tîtle",
            "123 go",
        ] {
            let slug = derive_slug(title);
            assert!(!slug.starts_with('-'), "leading hyphen in {:?}", slug);
            assert!(!slug.ends_with('-'), "trailing hyphen in {:?}", slug);
            assert!(
                slug.chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'),
                "bad char in {:?}",
                slug
            );
        }
    }

    #[test]
    fn test_derive_slug_on_clean_slug_is_noop() {
        assert_eq!(derive_slug("already-clean-slug-42"), "already-clean-slug-42");
    }

    #[test]
    fn test_derive_slug_collapses_symbol_runs() {
        assert_eq!(derive_slug("a -- b ## c"), "a-b-c");
        assert_eq!(derive_slug("!!!"), "");
    }

    #[test]
    fn test_normalize_derives_slug_when_missing() {
        let fields = normalize_fields(sample_fields()).unwrap();
        assert_eq!(fields.slug, "hello-world-cafe");
    }

    #[test]
    fn test_normalize_keeps_explicit_slug() {
        let mut input = sample_fields();
        input.slug = Some("my-own-slug".to_string());
        let fields = normalize_fields(input).unwrap();
        assert_eq!(fields.slug, "my-own-slug");
    }

    #[test]
    fn test_normalize_rejects_empty_title() {
        let mut input = sample_fields();
        input.title = "   ".to_string();
        assert!(matches!(
            normalize_fields(input),
            Err(PostError::Validation(_))
        ));
    }

    #[test]
    fn test_normalize_rejects_bad_slug() {
        let mut input = sample_fields();
        input.slug = Some("Not A Slug!".to_string());
        assert!(matches!(
            normalize_fields(input),
            Err(PostError::Validation(_))
        ));
    }

    #[test]
    fn test_normalize_rejects_empty_excerpt_and_content() {
        let mut input = sample_fields();
        input.excerpt = String::new();
        assert!(matches!(
            normalize_fields(input),
            Err(PostError::Validation(_))
        ));

        let mut input = sample_fields();
        input.content = "  ".to_string();
        assert!(matches!(
            normalize_fields(input),
            Err(PostError::Validation(_))
        ));
    }

    #[test]
    fn test_normalize_rejects_oversize_excerpt() {
        let mut input = sample_fields();
        input.excerpt = "x".repeat(EXCERPT_MAX_CHARS + 1);
        assert!(matches!(
            normalize_fields(input),
            Err(PostError::Validation(_))
        ));

        let mut input = sample_fields();
        input.excerpt = "x".repeat(EXCERPT_MAX_CHARS);
        assert!(normalize_fields(input).is_ok());
    }

    #[test]
    fn test_normalize_drops_blank_image_url() {
        let mut input = sample_fields();
        input.image_url = Some("   ".to_string());
        let fields = normalize_fields(input).unwrap();
        assert!(fields.image_url.is_none());
    }

    #[test]
    fn test_recompute_stats_counts_membership() {
        let posts = vec![sample_post(true), sample_post(true), sample_post(false)];
        let stats = recompute_stats(&posts);
        assert_eq!(stats.total, 3);
        assert_eq!(stats.published, 2);
        assert_eq!(stats.drafts, 1);
    }

    #[test]
    fn test_recompute_stats_after_delete() {
        let mut posts = vec![sample_post(true), sample_post(false), sample_post(false)];

        let victim = posts
            .iter()
            .position(|p| p.published)
            .expect("one published post");
        posts.remove(victim);
        let stats = recompute_stats(&posts);
        assert_eq!(stats.total, 2);
        assert_eq!(stats.published, 0);
        assert_eq!(stats.drafts, 2);

        posts.pop();
        let stats = recompute_stats(&posts);
        assert_eq!(stats.total, 1);
        assert_eq!(stats.drafts, 1);
    }

    #[test]
    fn test_recompute_stats_after_double_toggle_round_trips() {
        let mut posts = vec![sample_post(false)];
        let before = recompute_stats(&posts);

        posts[0].published = !posts[0].published;
        posts[0].published = !posts[0].published;
        let after = recompute_stats(&posts);
        assert_eq!(before, after);
    }

    #[test]
    fn test_is_valid_slug() {
        assert!(is_valid_slug("my-post-1"));
        assert!(!is_valid_slug(""));
        assert!(!is_valid_slug("My-Post"));
        assert!(!is_valid_slug("post title"));
    }

    #[tokio::test]
    async fn test_with_timeout_passes_through_quick_results() {
        let result = with_timeout(async { Ok::<i32, PostError>(7) }).await;
        assert!(matches!(result, Ok(7)));
    }

    #[tokio::test]
    async fn test_with_timeout_resolves_hung_calls() {
        let slow = async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok::<(), PostError>(())
        };
        let result = with_timeout_after(Duration::from_millis(10), slow).await;
        assert!(matches!(result, Err(PostError::Timeout)));
    }
}
