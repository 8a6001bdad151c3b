use std::{collections::HashMap, sync::Arc};

use axum::{
    extract::{
        multipart::MultipartRejection,
        rejection::JsonRejection,
        DefaultBodyLimit, FromRequestParts, Multipart, Path, State,
    },
    http::{request::Parts, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;

use crate::{
    error::AppError,
    models::{EventMode, EventUpdate, NewBooking, NewEvent},
    state::AppState,
};

const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// The `{slug}` path segment, trimmed, lowercased and checked.
pub struct Slug(pub String);

impl<S: Send + Sync> FromRequestParts<S> for Slug {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(raw) = Path::<String>::from_request_parts(parts, state).await?;
        sanitize_slug(&raw).map(Slug)
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/events", get(list_events).post(create_event))
        .route("/api/events/{slug}", get(get_event).patch(update_event))
        .route("/api/events/{slug}/similar", get(similar_events))
        .route("/api/events/{slug}/bookings", get(booking_count))
        .route("/api/bookings", post(create_booking))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(state)
}

pub async fn list_events(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, AppError> {
    let events = state.store().await?.list_events().await?;
    Ok(Json(json!({ "message": "Events fetched", "events": events })))
}

pub async fn create_event(
    State(state): State<Arc<AppState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<impl IntoResponse, AppError> {
    let mut multipart = multipart?;
    let store = state.store().await?;

    let mut fields: HashMap<String, String> = HashMap::new();
    let mut image = None;
    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        if name == "image" {
            let file_name = field.file_name().unwrap_or("upload").to_string();
            image = Some((file_name, field.bytes().await?));
        } else {
            fields.insert(name, field.text().await?);
        }
    }

    let (file_name, bytes) = image
        .filter(|(_, bytes)| !bytes.is_empty())
        .ok_or_else(|| AppError::BadRequest("Image file is required".to_string()))?;
    let tags = json_list(&fields, "tags", "Invalid tags format")?;
    let agenda = json_list(&fields, "agenda", "Invalid agenda format")?;
    let mode = text(&fields, "mode")
        .parse::<EventMode>()
        .map_err(AppError::Validation)?;

    let image_url = state.media.upload_image(&file_name, bytes.to_vec()).await?;

    let input = NewEvent {
        title: text(&fields, "title"),
        description: text(&fields, "description"),
        overview: text(&fields, "overview"),
        image: image_url,
        venue: text(&fields, "venue"),
        location: text(&fields, "location"),
        date: text(&fields, "date"),
        time: text(&fields, "time"),
        mode,
        audience: text(&fields, "audience"),
        agenda,
        organizer: text(&fields, "organizer"),
        tags,
    };
    let event = store.create_event(input).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "Event created successfully", "event": event })),
    ))
}

pub async fn get_event(
    State(state): State<Arc<AppState>>,
    Slug(slug): Slug,
) -> Result<impl IntoResponse, AppError> {
    let event = state
        .store()
        .await?
        .find_event_by_slug(&slug)
        .await?
        .ok_or(AppError::NotFound(slug))?;
    Ok(Json(json!({ "success": true, "data": event })))
}

pub async fn update_event(
    State(state): State<Arc<AppState>>,
    Slug(slug): Slug,
    payload: Result<Json<EventUpdate>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(update) = payload?;
    let event = state.store().await?.update_event(&slug, update).await?;
    Ok(Json(json!({ "success": true, "data": event })))
}

pub async fn similar_events(
    State(state): State<Arc<AppState>>,
    Slug(slug): Slug,
) -> Result<impl IntoResponse, AppError> {
    let events = state.store().await?.similar_events(&slug).await?;
    Ok(Json(json!({ "events": events })))
}

pub async fn booking_count(
    State(state): State<Arc<AppState>>,
    Slug(slug): Slug,
) -> Result<impl IntoResponse, AppError> {
    let store = state.store().await?;
    let event = store
        .find_event_by_slug(&slug)
        .await?
        .ok_or(AppError::NotFound(slug))?;
    let count = store.count_bookings(&event.id).await?;
    Ok(Json(json!({ "count": count })))
}

pub async fn create_booking(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<NewBooking>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(mut input) = payload?;
    let store = state.store().await?;

    // A booking may name its event by slug alone.
    if input.event_id.trim().is_empty() {
        if let Some(slug) = input.slug.as_deref() {
            let slug = sanitize_slug(slug)?;
            if let Some(event) = store.find_event_by_slug(&slug).await? {
                input.event_id = event.id;
            }
        }
    }

    let booking = store.create_booking(input).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "booking": booking })),
    ))
}

fn sanitize_slug(raw: &str) -> Result<String, AppError> {
    let slug = raw.trim().to_lowercase();
    if slug.is_empty() {
        return Err(AppError::BadRequest(
            "Slug parameter is required and must be a non-empty string".to_string(),
        ));
    }
    let allowed = slug
        .chars()
        .all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '-');
    if !allowed {
        return Err(AppError::InvalidSlug);
    }
    Ok(slug)
}

fn text(fields: &HashMap<String, String>, key: &str) -> String {
    fields.get(key).cloned().unwrap_or_default()
}

fn json_list(
    fields: &HashMap<String, String>,
    key: &str,
    message: &str,
) -> Result<Vec<String>, AppError> {
    fields
        .get(key)
        .and_then(|raw| serde_json::from_str::<Vec<String>>(raw).ok())
        .ok_or_else(|| AppError::BadRequest(message.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::{
        body::{to_bytes, Body},
        http::{header::CONTENT_TYPE, Request},
    };
    use serde_json::Value;
    use tower::ServiceExt;

    use crate::{
        config::AppConfig,
        connection::ConnectionState,
        media::{MediaError, MediaHost},
    };

    const BOUNDARY: &str = "devevent-test-boundary";

    struct FakeMedia;

    #[async_trait]
    impl MediaHost for FakeMedia {
        async fn upload_image(&self, file_name: &str, _bytes: Vec<u8>) -> Result<String, MediaError> {
            Ok(format!("https://media.test/{file_name}"))
        }
    }

    fn test_app() -> (Router, Arc<AppState>) {
        let config = AppConfig::from_lookup(|key| {
            (key == "DATABASE_URL").then(|| "sqlite::memory:".to_string())
        })
        .expect("test config");
        let state = AppState::with_media(config, Arc::new(FakeMedia));
        (router(Arc::clone(&state)), state)
    }

    fn event_fields(title: &str) -> Vec<(&'static str, String)> {
        vec![
            ("title", title.to_string()),
            ("description", "Hands-on sessions".to_string()),
            ("overview", "A full day of Rust".to_string()),
            ("venue", "Main Hall".to_string()),
            ("location", "Boise, ID".to_string()),
            ("date", "March 5, 2024".to_string()),
            ("time", "2:30 PM".to_string()),
            ("mode", "Hybrid".to_string()),
            ("audience", "Developers".to_string()),
            ("organizer", "DevEvent".to_string()),
            ("tags", r#"["rust","web"]"#.to_string()),
            ("agenda", r#"["Keynote","Workshops"]"#.to_string()),
        ]
    }

    fn multipart_request(fields: &[(&str, String)], image: Option<&[u8]>) -> Request<Body> {
        let mut body = Vec::new();
        for (name, value) in fields {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
                )
                .as_bytes(),
            );
        }
        if let Some(bytes) = image {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"image\"; filename=\"banner.png\"\r\nContent-Type: image/png\r\n\r\n"
                )
                .as_bytes(),
            );
            body.extend_from_slice(bytes);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

        Request::builder()
            .method("POST")
            .uri("/api/events")
            .header(CONTENT_TYPE, format!("multipart/form-data; boundary={BOUNDARY}"))
            .body(Body::from(body))
            .unwrap()
    }

    fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    async fn create(app: &Router, title: &str) -> Value {
        let (status, body) = send(app, multipart_request(&event_fields(title), Some(b"png"))).await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body["event"].clone()
    }

    #[tokio::test]
    async fn creates_and_fetches_normalized_event() {
        let (app, state) = test_app();
        let event = create(&app, "Rust Meetup: Boise!").await;

        assert_eq!(event["slug"], "rust-meetup-boise");
        assert_eq!(event["date"], "2024-03-05");
        assert_eq!(event["time"], "14:30");
        assert_eq!(event["mode"], "hybrid");
        assert_eq!(event["image"], "https://media.test/banner.png");

        let (status, body) = send(&app, get("/api/events/RUST-MEETUP-BOISE")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["_id"], event["_id"]);

        assert_eq!(state.connections.state(), ConnectionState::Connected);
        let first = state.connections.acquire().await.unwrap();
        let second = state.connections.acquire().await.unwrap();
        assert!(first.same_as(&second));
    }

    #[tokio::test]
    async fn rejects_malformed_slugs_and_unknown_events() {
        let (app, _) = test_app();

        let (status, body) = send(&app, get("/api/events/bad_slug")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Invalid slug format");

        let (status, body) = send(&app, get("/api/events/missing-event")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["message"], "No event found with slug: missing-event");
    }

    #[tokio::test]
    async fn create_requires_image_and_well_formed_lists() {
        let (app, _) = test_app();

        let (status, body) = send(&app, multipart_request(&event_fields("No Image"), None)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Image file is required");

        let mut fields = event_fields("Bad Tags");
        fields.retain(|(name, _)| *name != "tags");
        fields.push(("tags", "rust, web".to_string()));
        let (status, body) = send(&app, multipart_request(&fields, Some(b"png"))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Invalid tags format");
    }

    #[tokio::test]
    async fn create_rejects_unparsable_date() {
        let (app, _) = test_app();
        let mut fields = event_fields("Someday");
        fields.retain(|(name, _)| *name != "date");
        fields.push(("date", "whenever works".to_string()));

        let (status, body) = send(&app, multipart_request(&fields, Some(b"png"))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Validation error");

        let (_, listed) = send(&app, get("/api/events")).await;
        assert_eq!(listed["events"], Value::Array(Vec::new()));
    }

    #[tokio::test]
    async fn duplicate_titles_conflict() {
        let (app, _) = test_app();
        create(&app, "Rust Meetup").await;

        let (status, _) = send(&app, multipart_request(&event_fields("rust meetup"), Some(b"png"))).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn patch_rederives_slug() {
        let (app, _) = test_app();
        create(&app, "Rust Meetup").await;

        let (status, body) = send(
            &app,
            json_request("PATCH", "/api/events/rust-meetup", json!({ "title": "Rust Meetup II" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["slug"], "rust-meetup-ii");
        assert_eq!(body["data"]["time"], "14:30");
    }

    fn raw_request(method: &str, uri: &str, content_type: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(CONTENT_TYPE, content_type)
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn assert_bad_request(status: StatusCode, body: &Value, prefix: &str) {
        assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
        assert_eq!(body["error"], "Bad request");
        let message = body["message"].as_str().unwrap_or_default();
        assert!(message.starts_with(prefix), "{message}");
    }

    #[tokio::test]
    async fn malformed_update_bodies_get_json_errors() {
        let (app, _) = test_app();
        create(&app, "Rust Meetup").await;
        let uri = "/api/events/rust-meetup";

        let (status, body) = send(&app, raw_request("PATCH", uri, "application/json", "{not json")).await;
        assert_bad_request(status, &body, "Invalid JSON data format");

        let (status, body) = send(
            &app,
            raw_request("PATCH", uri, "application/json", r#"{"mode":"in person"}"#),
        )
        .await;
        assert_bad_request(status, &body, "Invalid JSON data format");

        let (status, body) = send(&app, raw_request("PATCH", uri, "text/plain", "title=x")).await;
        assert_bad_request(status, &body, "Invalid JSON data format");

        let (status, body) = send(&app, raw_request("POST", "/api/bookings", "application/json", "[]")).await;
        assert_bad_request(status, &body, "Invalid JSON data format");
    }

    #[tokio::test]
    async fn create_without_form_data_gets_json_error() {
        let (app, _) = test_app();
        let (status, body) = send(
            &app,
            json_request("POST", "/api/events", json!({ "title": "Rust Meetup" })),
        )
        .await;
        assert_bad_request(status, &body, "Invalid form data");
    }

    #[tokio::test]
    async fn patch_accepts_mode_in_any_case() {
        let (app, _) = test_app();
        create(&app, "Rust Meetup").await;

        let (status, body) = send(
            &app,
            json_request("PATCH", "/api/events/rust-meetup", json!({ "mode": "Online" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["mode"], "online");
    }

    #[tokio::test]
    async fn lists_and_finds_similar_events() {
        let (app, _) = test_app();
        create(&app, "First").await;
        create(&app, "Second").await;

        let (status, body) = send(&app, get("/api/events")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Events fetched");
        assert_eq!(body["events"][0]["slug"], "second");
        assert_eq!(body["events"][1]["slug"], "first");

        let (_, body) = send(&app, get("/api/events/first/similar")).await;
        assert_eq!(body["events"].as_array().map(Vec::len), Some(1));
        assert_eq!(body["events"][0]["slug"], "second");
    }

    #[tokio::test]
    async fn books_an_event() {
        let (app, _) = test_app();
        let event = create(&app, "Rust Meetup").await;

        let (status, body) = send(
            &app,
            json_request(
                "POST",
                "/api/bookings",
                json!({ "eventId": event["_id"], "slug": "rust-meetup", "email": "Dev@Example.com" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["booking"]["email"], "dev@example.com");

        let (_, body) = send(&app, get("/api/events/rust-meetup/bookings")).await;
        assert_eq!(body["count"], 1);

        let (status, body) = send(
            &app,
            json_request(
                "POST",
                "/api/bookings",
                json!({ "eventId": "nope", "email": "dev@example.com" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Referenced event does not exist");
    }

    #[tokio::test]
    async fn booking_can_name_event_by_slug() {
        let (app, _) = test_app();
        let event = create(&app, "Rust Meetup").await;

        let (status, body) = send(
            &app,
            json_request(
                "POST",
                "/api/bookings",
                json!({ "eventId": "", "slug": "Rust-Meetup", "email": "dev@example.com" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["booking"]["eventId"], event["_id"]);

        let (status, body) = send(
            &app,
            json_request(
                "POST",
                "/api/bookings",
                json!({ "eventId": "", "slug": "unknown", "email": "dev@example.com" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Event ID is required");
    }
}
