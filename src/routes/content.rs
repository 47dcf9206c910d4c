/**
 * Content Routes
 * API endpoints for marketing site sections (hero, services, skills,
 * experience, clients). Reads fall back to static data when the store has
 * nothing for a section.
 */
use axum::{
    extract::Query,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use axum_extra::extract::cookie::CookieJar;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::db::{self, models::ContentSection};
use crate::routes::verify_admin;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Query parameters for GET /api/content
#[derive(Debug, Deserialize)]
pub struct ContentQuery {
    pub section: String,
}

/// Response for GET /api/content
#[derive(Debug, Serialize, Deserialize)]
pub struct ContentResponse {
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Request body for PATCH /api/content
#[derive(Debug, Deserialize, Serialize)]
pub struct UpdateContentRequest {
    pub section: String,
    pub data: Value,
}

/// Response for PATCH /api/content
#[derive(Debug, Serialize, Deserialize)]
pub struct UpdateContentResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ============================================================================
// Validation
// ============================================================================

/// Valid section keys
const VALID_SECTIONS: &[&str] = &["hero", "services", "skills", "experience", "clients"];

fn is_valid_section(section: &str) -> bool {
    VALID_SECTIONS.contains(&section.to_lowercase().as_str())
}

// ============================================================================
// Static/Fallback Data
// ============================================================================

/// Get static/fallback data for a section
fn get_static_data(section: &str) -> Option<Value> {
    match section.to_lowercase().as_str() {
        "hero" => Some(serde_json::json!({
            "headline": "Software that ships",
            "subheadline": "Product engineering for teams that need momentum.",
            "ctaLabel": "Book an intro call",
            "ctaHref": "/contact"
        })),
        "services" => Some(serde_json::json!([
            {
                "name": "Product Development",
                "description": "Design, build and launch web products end to end."
            },
            {
                "name": "Technical Audits",
                "description": "Architecture and delivery reviews with a prioritized fix list."
            },
            {
                "name": "Team Enablement",
                "description": "Hands-on coaching for engineering teams finding their pace."
            }
        ])),
        "skills" => Some(serde_json::json!([
            {
                "name": "Frontend",
                "skills": [
                    { "name": "React", "level": 90 },
                    { "name": "TypeScript", "level": 85 },
                    { "name": "Next.js", "level": 85 }
                ]
            },
            {
                "name": "Backend",
                "skills": [
                    { "name": "Rust", "level": 80 },
                    { "name": "Node.js", "level": 80 },
                    { "name": "PostgreSQL", "level": 75 }
                ]
            }
        ])),
        "experience" => Some(serde_json::json!([
            {
                "role": "Independent Consultant",
                "period": "2021 - present",
                "summary": "Product engineering and delivery for startups and agencies."
            }
        ])),
        "clients" => Some(serde_json::json!([
            { "name": "Acme Studio" },
            { "name": "Northwind Labs" },
            { "name": "Helio Partners" }
        ])),
        _ => None,
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /api/content?section=...
/// Returns content for the specified section
pub async fn get_content(Query(query): Query<ContentQuery>) -> impl IntoResponse {
    if query.section.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ContentResponse {
                data: None,
                error: Some("Missing section parameter".to_string()),
            }),
        );
    }

    if !is_valid_section(&query.section) {
        return (
            StatusCode::BAD_REQUEST,
            Json(ContentResponse {
                data: None,
                error: Some(format!(
                    "Invalid section. Valid sections: {:?}",
                    VALID_SECTIONS
                )),
            }),
        );
    }

    let section_key = query.section.to_lowercase();

    if let Some(pool) = db::get_pool() {
        match sqlx::query_as::<_, ContentSection>(
            "SELECT key, content, updated_at FROM content_sections WHERE key = $1",
        )
        .bind(&section_key)
        .fetch_optional(pool.as_ref())
        .await
        {
            Ok(Some(section)) => {
                return (
                    StatusCode::OK,
                    Json(ContentResponse {
                        data: Some(section.content),
                        error: None,
                    }),
                );
            }
            Ok(None) => {
                tracing::debug!(
                    "Section '{}' not found in database, using static data",
                    section_key
                );
            }
            Err(e) => {
                tracing::error!("Database error fetching content section: {}", e);
                // Fall through to static data
            }
        }
    }

    match get_static_data(&section_key) {
        Some(data) => (
            StatusCode::OK,
            Json(ContentResponse {
                data: Some(data),
                error: None,
            }),
        ),
        None => (
            StatusCode::NOT_FOUND,
            Json(ContentResponse {
                data: None,
                error: Some("Section not found".to_string()),
            }),
        ),
    }
}

/// PATCH /api/content
/// Updates content for the specified section (requires auth)
pub async fn update_content(
    headers: HeaderMap,
    jar: CookieJar,
    Json(payload): Json<UpdateContentRequest>,
) -> axum::response::Response {
    if let Err(denied) = verify_admin(&headers, &jar) {
        return denied;
    }

    if !is_valid_section(&payload.section) {
        return (
            StatusCode::BAD_REQUEST,
            Json(UpdateContentResponse {
                success: false,
                message: None,
                error: Some(format!(
                    "Invalid section. Valid sections: {:?}",
                    VALID_SECTIONS
                )),
            }),
        )
            .into_response();
    }

    let section_key = payload.section.to_lowercase();

    let Some(pool) = db::get_pool() else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(UpdateContentResponse {
                success: false,
                message: None,
                error: Some("Database not available".to_string()),
            }),
        )
            .into_response();
    };

    match sqlx::query(
        r#"
        INSERT INTO content_sections (key, content, updated_at)
        VALUES ($1, $2, now())
        ON CONFLICT (key) DO UPDATE SET
            content = EXCLUDED.content,
            updated_at = now()
        "#,
    )
    .bind(&section_key)
    .bind(&payload.data)
    .execute(pool.as_ref())
    .await
    {
        Ok(_) => (
            StatusCode::OK,
            Json(UpdateContentResponse {
                success: true,
                message: Some(format!("Section '{}' updated successfully", section_key)),
                error: None,
            }),
        )
            .into_response(),
        Err(e) => {
            tracing::error!("Failed to update content section: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(UpdateContentResponse {
                    success: false,
                    message: None,
                    error: Some("Failed to update section".to_string()),
                }),
            )
                .into_response()
        }
    }
}
