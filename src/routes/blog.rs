/**
 * Blog Routes
 * Public read surface (published posts only) and the authenticated admin
 * endpoints driving the post lifecycle.
 */
use axum::{
    extract::{Path, Query},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use axum_extra::extract::cookie::CookieJar;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::{
    self,
    models::{BlogPost, PostStats},
};
use crate::posts::{self, PostError, PostFields};
use crate::routes::{verify_admin, ErrorResponse};

// ============================================================================
// Request/Response Types
// ============================================================================

/// Query parameters for GET /api/blog (public list)
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlogListQuery {
    #[serde(default = "default_page")]
    pub page: i64,
    #[serde(default = "default_page_size")]
    pub page_size: i64,
}

fn default_page() -> i64 {
    1
}

fn default_page_size() -> i64 {
    10
}

/// Response for GET /api/blog (public list)
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlogListResponse {
    pub items: Vec<BlogPostSummary>,
    pub page: i64,
    pub page_size: i64,
    pub total: i64,
}

/// Blog post summary (for list view)
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlogPostSummary {
    pub id: Uuid,
    pub title: String,
    pub slug: String,
    pub excerpt: String,
    pub image_url: Option<String>,
    pub published: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<BlogPost> for BlogPostSummary {
    fn from(post: BlogPost) -> Self {
        Self {
            id: post.id,
            title: post.title,
            slug: post.slug,
            excerpt: post.excerpt,
            image_url: post.image_url,
            published: post.published,
            created_at: post.created_at,
            updated_at: post.updated_at,
        }
    }
}

/// Request body for POST /admin/posts and PATCH /admin/posts/:id.
/// The editor always submits the full field set; a blank slug means
/// "derive one from the title".
#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PostPayload {
    pub title: String,
    #[serde(default)]
    pub slug: Option<String>,
    pub excerpt: String,
    pub content: String,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub published: bool,
}

impl From<PostPayload> for PostFields {
    fn from(payload: PostPayload) -> Self {
        PostFields {
            title: payload.title,
            slug: payload.slug,
            excerpt: payload.excerpt,
            content: payload.content,
            image_url: payload.image_url,
            published: payload.published,
        }
    }
}

/// Request body for POST /admin/posts/:id/publish. Carries the caller's view
/// of the CURRENT published value; the flip fails if the store disagrees.
#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TogglePublishRequest {
    pub published: bool,
}

/// Response for GET /admin/posts
#[derive(Debug, Serialize, Deserialize)]
pub struct AdminPostsResponse {
    pub posts: Vec<BlogPost>,
    pub stats: PostStats,
}

/// Response for admin post mutations. `stats` is recomputed from a fresh
/// collection fetch after the mutation; it is omitted (never stale) when
/// that re-fetch fails.
#[derive(Debug, Serialize, Deserialize)]
pub struct PostMutationResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post: Option<BlogPost>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<PostStats>,
}

// ============================================================================
// Public read surface
// ============================================================================

/// GET /api/blog - List published posts with pagination.
/// Store trouble degrades to an empty page; visitors never see raw errors.
pub async fn list_published_posts(Query(query): Query<BlogListQuery>) -> impl IntoResponse {
    let page_size = query.page_size.clamp(1, 100);
    let page = query.page.max(1);
    let offset = (page - 1) * page_size;

    let (items, total) = match db::get_pool() {
        Some(pool) => {
            match posts::with_timeout(posts::list_published(pool.as_ref(), page_size, offset)).await
            {
                Ok((posts, total)) => (posts, total),
                Err(e) => {
                    tracing::error!("failed to list published posts: {}", e);
                    (vec![], 0)
                }
            }
        }
        None => (vec![], 0),
    };

    let items: Vec<BlogPostSummary> = items.into_iter().map(BlogPostSummary::from).collect();

    (
        StatusCode::OK,
        Json(BlogListResponse {
            items,
            page,
            page_size,
            total,
        }),
    )
}

/// GET /api/blog/:slug - Fetch one published post by slug.
pub async fn get_published_post(Path(slug): Path<String>) -> Response {
    if !posts::is_valid_slug(&slug) {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: "Invalid slug".to_string(),
                message: Some(
                    "Slug must contain only lowercase letters, numbers, and hyphens".to_string(),
                ),
            }),
        )
            .into_response();
    }

    let Some(pool) = db::get_pool() else {
        return not_found();
    };

    match posts::with_timeout(posts::get_published_by_slug(pool.as_ref(), &slug)).await {
        Ok(Some(post)) => (StatusCode::OK, Json(post)).into_response(),
        Ok(None) => not_found(),
        Err(e) => {
            // Degrade like an absent post rather than leaking store trouble.
            tracing::error!("failed to fetch published post: {}", e);
            not_found()
        }
    }
}

fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse {
            error: "Not found".to_string(),
            message: None,
        }),
    )
        .into_response()
}

// ============================================================================
// Admin surface
// ============================================================================

/// GET /admin/posts - Every post, drafts included, plus fresh stats.
pub async fn admin_list_posts(headers: HeaderMap, jar: CookieJar) -> Response {
    if let Err(denied) = verify_admin(&headers, &jar) {
        return denied;
    }
    let Some(pool) = db::get_pool() else {
        return store_unavailable();
    };

    match posts::with_timeout(posts::list_all(pool.as_ref())).await {
        Ok(all) => {
            let stats = posts::recompute_stats(&all);
            (StatusCode::OK, Json(AdminPostsResponse { posts: all, stats })).into_response()
        }
        Err(e) => post_error_response(e),
    }
}

/// POST /admin/posts - Create a post (auth required).
pub async fn create_post(
    headers: HeaderMap,
    jar: CookieJar,
    Json(payload): Json<PostPayload>,
) -> Response {
    if let Err(denied) = verify_admin(&headers, &jar) {
        return denied;
    }
    let Some(pool) = db::get_pool() else {
        return store_unavailable();
    };

    match posts::with_timeout(posts::create(pool.as_ref(), payload.into())).await {
        Ok(post) => mutation_response(StatusCode::CREATED, pool.as_ref(), Some(post)).await,
        Err(e) => post_error_response(e),
    }
}

/// PATCH /admin/posts/:id - Update a post (auth required).
pub async fn update_post(
    headers: HeaderMap,
    jar: CookieJar,
    Path(id): Path<Uuid>,
    Json(payload): Json<PostPayload>,
) -> Response {
    if let Err(denied) = verify_admin(&headers, &jar) {
        return denied;
    }
    let Some(pool) = db::get_pool() else {
        return store_unavailable();
    };

    match posts::with_timeout(posts::update(pool.as_ref(), id, payload.into())).await {
        Ok(post) => mutation_response(StatusCode::OK, pool.as_ref(), Some(post)).await,
        Err(e) => post_error_response(e),
    }
}

/// POST /admin/posts/:id/publish - Flip draft/published (auth required).
pub async fn toggle_post_published(
    headers: HeaderMap,
    jar: CookieJar,
    Path(id): Path<Uuid>,
    Json(payload): Json<TogglePublishRequest>,
) -> Response {
    if let Err(denied) = verify_admin(&headers, &jar) {
        return denied;
    }
    let Some(pool) = db::get_pool() else {
        return store_unavailable();
    };

    match posts::with_timeout(posts::toggle_published(pool.as_ref(), id, payload.published)).await {
        Ok(post) => mutation_response(StatusCode::OK, pool.as_ref(), Some(post)).await,
        Err(e) => post_error_response(e),
    }
}

/// DELETE /admin/posts/:id - Delete a post (auth required).
pub async fn delete_post(headers: HeaderMap, jar: CookieJar, Path(id): Path<Uuid>) -> Response {
    if let Err(denied) = verify_admin(&headers, &jar) {
        return denied;
    }
    let Some(pool) = db::get_pool() else {
        return store_unavailable();
    };

    match posts::with_timeout(posts::delete(pool.as_ref(), id)).await {
        Ok(()) => mutation_response(StatusCode::OK, pool.as_ref(), None).await,
        Err(e) => post_error_response(e),
    }
}

async fn mutation_response(status: StatusCode, pool: &PgPool, post: Option<BlogPost>) -> Response {
    let stats = match posts::with_timeout(posts::list_all(pool)).await {
        Ok(all) => Some(posts::recompute_stats(&all)),
        Err(e) => {
            tracing::error!("failed to recompute post stats: {}", e);
            None
        }
    };

    (
        status,
        Json(PostMutationResponse {
            success: true,
            post,
            stats,
        }),
    )
        .into_response()
}

fn store_unavailable() -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(ErrorResponse {
            error: "Database not available".to_string(),
            message: None,
        }),
    )
        .into_response()
}

fn post_error_response(e: PostError) -> Response {
    let (status, error, message) = match &e {
        PostError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone(), None),
        PostError::SlugConflict(_) => (
            StatusCode::CONFLICT,
            "A post with this slug already exists. Please choose a different slug.".to_string(),
            None,
        ),
        PostError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone(), None),
        PostError::NotFound => (StatusCode::NOT_FOUND, "Not found".to_string(), None),
        PostError::Store(err) => {
            tracing::error!("store error in admin post operation: {}", err);
            // Raw store message is admin-facing only; public paths degrade.
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Storage error".to_string(),
                Some(err.to_string()),
            )
        }
        PostError::Timeout => (StatusCode::GATEWAY_TIMEOUT, e.to_string(), None),
    };

    (status, Json(ErrorResponse { error, message })).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use axum::routing::{get, patch, post};
    use axum::Router;
    use tower::ServiceExt;

    fn blog_router() -> Router {
        Router::new()
            .route("/api/blog", get(list_published_posts))
            .route("/api/blog/{slug}", get(get_published_post))
            .route("/admin/posts", get(admin_list_posts).post(create_post))
            .route("/admin/posts/{id}", patch(update_post).delete(delete_post))
            .route("/admin/posts/{id}/publish", post(toggle_post_published))
    }

    fn admin_token() -> String {
        crate::auth::create_access_token("user-1", "owner@example.com").unwrap()
    }

    fn sample_payload() -> PostPayload {
        PostPayload {
            title: "A New Post".to_string(),
            slug: None,
            excerpt: "Short summary".to_string(),
            content: "Body".to_string(),
            image_url: None,
            published: false,
        }
    }

    #[tokio::test]
    async fn test_public_list_degrades_to_empty_without_store() {
        let req = Request::get("/api/blog").body(Body::empty()).unwrap();
        let res = blog_router().oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: BlogListResponse = serde_json::from_slice(&bytes).unwrap();
        assert!(body.items.is_empty());
        assert_eq!(body.total, 0);
    }

    #[tokio::test]
    async fn test_public_list_clamps_page_params() {
        let req = Request::get("/api/blog?page=0&pageSize=9999")
            .body(Body::empty())
            .unwrap();
        let res = blog_router().oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: BlogListResponse = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body.page, 1);
        assert_eq!(body.page_size, 100);
    }

    #[tokio::test]
    async fn test_public_get_rejects_malformed_slug() {
        let req = Request::get("/api/blog/Not%20A%20Slug")
            .body(Body::empty())
            .unwrap();
        let res = blog_router().oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_public_get_unknown_slug_is_not_found() {
        let req = Request::get("/api/blog/some-post")
            .body(Body::empty())
            .unwrap();
        let res = blog_router().oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_admin_list_requires_auth() {
        let req = Request::get("/admin/posts").body(Body::empty()).unwrap();
        let res = blog_router().oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_create_requires_auth() {
        let req = Request::post("/admin/posts")
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&sample_payload()).unwrap()))
            .unwrap();
        let res = blog_router().oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_create_rejects_stale_bearer_token() {
        let req = Request::post("/admin/posts")
            .header("authorization", "Bearer not.a.token")
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&sample_payload()).unwrap()))
            .unwrap();
        let res = blog_router().oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_create_with_auth_but_no_store_is_unavailable() {
        let req = Request::post("/admin/posts")
            .header("authorization", format!("Bearer {}", admin_token()))
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&sample_payload()).unwrap()))
            .unwrap();
        let res = blog_router().oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_admin_routes_accept_cookie_auth() {
        let req = Request::get("/admin/posts")
            .header("cookie", format!("access-token={}", admin_token()))
            .body(Body::empty())
            .unwrap();
        let res = blog_router().oneshot(req).await.unwrap();
        // Token accepted; only the missing store stops the request.
        assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_update_rejects_malformed_id() {
        let req = Request::patch("/admin/posts/not-a-uuid")
            .header("authorization", format!("Bearer {}", admin_token()))
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&sample_payload()).unwrap()))
            .unwrap();
        let res = blog_router().oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }
}
