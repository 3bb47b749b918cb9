use crate::api::auth::{CurrentUser, RequireUser};
use crate::api::envelope::Envelope;
use crate::api::tiles::TILE_CONTENT_TYPE;
use crate::api::AppState;
use crate::error::{AppError, Result};
use crate::models::{
    ConversationThread, Inbox, IntentFlags, PropertyRecord, PropertyView, ProximityAnchor,
};
use crate::spatial::BoundingBox;
use crate::status::Status;
use crate::store::{ClaimOutcome, IntentUpdate};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

/// Rows scanned for one area-vibe aggregate
pub const AREA_VIBE_SCAN_LIMIT: usize = 10_000;
/// Largest id batch accepted by the intent overlay
pub const MAX_OVERLAY_IDS: usize = 500;
/// Count of rows dropped by low-zoom downsampling
pub const THINNED_HEADER: &str = "x-results-thinned";

const MAX_ZOOM: f64 = 30.0;
const SHORT_CACHE: &str = "public, max-age=30";

type JsonBody<T> = std::result::Result<Json<T>, JsonRejection>;

fn ok<T: Serialize>(data: T) -> Json<Envelope<T>> {
    Json(Envelope::success(data))
}

fn parse_body<T>(body: JsonBody<T>) -> Result<T> {
    body.map(|Json(value)| value)
        .map_err(|rejection| AppError::validation("INVALID_BODY", rejection.body_text()))
}

/// Zoom from the `z` query parameter.
///
/// Fractional zooms are floored. An absent `z` plans as zoom 0, the most
/// conservative tier.
pub fn parse_zoom(raw: Option<&str>) -> Result<u8> {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(0);
    };
    match raw.parse::<f64>() {
        Ok(z) if z.is_finite() && (0.0..=MAX_ZOOM).contains(&z) => Ok(z.floor() as u8),
        _ => Err(AppError::validation(
            "INVALID_ZOOM",
            format!("z must be a number between 0 and 30, got '{raw}'"),
        )),
    }
}

pub async fn health() -> Json<Value> {
    Json(json!({ "ok": true }))
}

#[derive(Debug, Deserialize)]
pub struct PropertiesQuery {
    pub bbox: Option<String>,
    pub z: Option<String>,
    pub id: Option<String>,
}

/// `GET /properties?bbox=..&z=..` or `GET /properties?id=..`
pub async fn properties(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(query): Query<PropertiesQuery>,
) -> Result<Response> {
    if let Some(id) = query.id.as_deref().map(str::trim).filter(|id| !id.is_empty()) {
        let property = state.planner.fetch_one(id, user.id()).await?;
        return Ok(ok(property).into_response());
    }

    let bbox = BoundingBox::parse(query.bbox.as_deref().unwrap_or_default())?;
    let zoom = parse_zoom(query.z.as_deref())?;
    let result = state.planner.fetch_viewport(&bbox, zoom, user.id()).await?;

    let mut response = ok(result.properties).into_response();
    response
        .headers_mut()
        .insert(THINNED_HEADER, HeaderValue::from(result.thinned));
    Ok(response)
}

#[derive(Debug, Deserialize)]
pub struct BboxQuery {
    pub bbox: Option<String>,
}

/// Intent-flag totals for one viewport
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AreaVibe {
    pub total: usize,
    pub claimed: usize,
    pub open_to_talking: usize,
    pub settled: usize,
    pub for_sale: usize,
    pub for_rent: usize,
    /// The scan hit its row cap, so counts are a lower bound
    pub capped: bool,
}

impl AreaVibe {
    pub fn tally(rows: &[PropertyRecord], cap: usize) -> Self {
        let set = |flag: Option<bool>| usize::from(flag == Some(true));
        rows.iter().fold(
            AreaVibe {
                capped: rows.len() >= cap,
                ..AreaVibe::default()
            },
            |mut vibe, p| {
                vibe.total += 1;
                vibe.claimed += set(p.is_claimed);
                vibe.open_to_talking += set(p.intent.soft_listing);
                vibe.settled += set(p.intent.settled);
                vibe.for_sale += set(p.intent.is_for_sale);
                vibe.for_rent += set(p.intent.is_for_rent);
                vibe
            },
        )
    }
}

/// `GET /area-vibe?bbox=..`
pub async fn area_vibe(
    State(state): State<AppState>,
    Query(query): Query<BboxQuery>,
) -> Result<Response> {
    let bbox = BoundingBox::parse(query.bbox.as_deref().unwrap_or_default())?;
    let rows = state
        .store
        .properties_in_bbox(&bbox, AREA_VIBE_SCAN_LIMIT)
        .await
        .map_err(AppError::backend)?;

    let vibe = AreaVibe::tally(&rows, AREA_VIBE_SCAN_LIMIT);
    if vibe.capped {
        debug!("Area vibe for {} hit the {} row cap", bbox, AREA_VIBE_SCAN_LIMIT);
    }
    Ok(([(header::CACHE_CONTROL, SHORT_CACHE)], ok(vibe)).into_response())
}

#[derive(Debug, Deserialize)]
pub struct OverlayRequest {
    #[serde(default)]
    pub ids: Vec<String>,
}

/// Intent snapshot for one property
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverlayEntry {
    pub id: String,
    pub is_claimed: Option<bool>,
    #[serde(flatten)]
    pub intent: IntentFlags,
    pub status: Option<Status>,
}

/// Trim, drop blanks and keep the first occurrence of each id
pub fn dedupe_ids(ids: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    ids.into_iter()
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty() && seen.insert(id.clone()))
        .collect()
}

/// `POST /intent-overlay` with `{ids: [...]}`
pub async fn intent_overlay(
    State(state): State<AppState>,
    body: JsonBody<OverlayRequest>,
) -> Result<Response> {
    let ids = dedupe_ids(parse_body(body)?.ids);
    if ids.is_empty() {
        return Err(AppError::validation("MISSING_PARAM", "ids must not be empty"));
    }
    if ids.len() > MAX_OVERLAY_IDS {
        return Err(AppError::validation(
            "TOO_MANY_IDS",
            format!("at most {} ids per request, got {}", MAX_OVERLAY_IDS, ids.len()),
        ));
    }

    let mut by_id: HashMap<String, PropertyRecord> = state
        .store
        .properties_by_ids(&ids)
        .await
        .map_err(AppError::backend)?
        .into_iter()
        .map(|p| (p.id.clone(), p))
        .collect();

    let entries: Vec<OverlayEntry> = ids
        .iter()
        .filter_map(|id| by_id.remove(id))
        .map(|p| OverlayEntry {
            status: p.status().for_display(),
            id: p.id,
            is_claimed: p.is_claimed,
            intent: p.intent,
        })
        .collect();

    Ok(([(header::CACHE_CONTROL, SHORT_CACHE)], ok(entries)).into_response())
}

/// Body naming a single property
#[derive(Debug, Deserialize)]
pub struct PropertyRef {
    #[serde(default, alias = "propertyId")]
    pub property_id: Option<String>,
}

impl PropertyRef {
    fn required(self) -> Result<String> {
        self.property_id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .ok_or_else(|| AppError::validation("MISSING_PARAM", "property_id is required"))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimResponse {
    pub property_id: String,
    /// The caller already held the claim; nothing was written
    pub already_claimed: bool,
    pub property: PropertyView,
}

/// `POST /claim` with `{property_id}`
pub async fn claim(
    State(state): State<AppState>,
    RequireUser(user_id): RequireUser,
    body: JsonBody<PropertyRef>,
) -> Result<Json<Envelope<ClaimResponse>>> {
    let property_id = parse_body(body)?.required()?;

    let outcome = state
        .store
        .claim_property(&property_id, &user_id)
        .await
        .map_err(AppError::backend)?;

    let (record, already_claimed) = match outcome {
        ClaimOutcome::Claimed(record) => {
            info!("User {} claimed property {}", user_id, property_id);
            (record, false)
        }
        ClaimOutcome::AlreadyMine(record) => (record, true),
        ClaimOutcome::ClaimedByOther => {
            return Err(AppError::conflict(
                "ALREADY_CLAIMED",
                format!("property {property_id} is already claimed by another user"),
            ))
        }
        ClaimOutcome::NotFound => return Err(AppError::not_found("property", property_id)),
    };

    Ok(ok(ClaimResponse {
        property_id,
        already_claimed,
        property: PropertyView::from_record(record, Some(&user_id)),
    }))
}

/// `PATCH /properties/:id/intent`; only the current claimer may write
pub async fn update_intent(
    State(state): State<AppState>,
    RequireUser(user_id): RequireUser,
    Path(id): Path<String>,
    body: JsonBody<IntentUpdate>,
) -> Result<Json<Envelope<PropertyView>>> {
    let update = parse_body(body)?;
    if update.is_empty() {
        return Err(AppError::validation(
            "EMPTY_UPDATE",
            "at least one intent flag is required",
        ));
    }

    let property = state
        .store
        .property_by_id(&id)
        .await
        .map_err(AppError::backend)?
        .ok_or_else(|| AppError::not_found("property", &id))?;
    if !property.is_claimed_by(&user_id) {
        warn!("User {} tried to update intent on {} without holding the claim", user_id, id);
        return Err(AppError::Forbidden(format!(
            "only the claimer may update property {id}"
        )));
    }

    let updated = state
        .store
        .update_intent(&id, &update)
        .await
        .map_err(AppError::backend)?
        .ok_or_else(|| AppError::not_found("property", &id))?;

    info!("Property {} is now {}", id, updated.status());
    Ok(ok(PropertyView::from_record(updated, Some(&user_id))))
}

/// `GET /properties/:id/proximity`
pub async fn proximity(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Envelope<Vec<ProximityAnchor>>>> {
    let anchors = state.proximity.nearest_for_property(&id).await?;
    Ok(ok(anchors))
}

/// `GET /conversations`
pub async fn inbox(
    State(state): State<AppState>,
    RequireUser(user_id): RequireUser,
) -> Result<Json<Envelope<Inbox>>> {
    Ok(ok(state.conversations.inbox(&user_id).await?))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartedConversation {
    pub thread: ConversationThread,
    pub created: bool,
}

/// `POST /conversations` with `{property_id}`; 201 when a thread is created
pub async fn start_conversation(
    State(state): State<AppState>,
    RequireUser(user_id): RequireUser,
    body: JsonBody<PropertyRef>,
) -> Result<Response> {
    let property_id = parse_body(body)?.required()?;
    let (thread, created) = state.conversations.start(&property_id, &user_id).await?;

    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, ok(StartedConversation { thread, created })).into_response())
}

/// `z`, `x` and `y` of a tile path, tolerating a `.pbf` or `.mvt` suffix
pub fn parse_tile_coords(z: &str, x: &str, y: &str) -> Option<(u32, u32, u32)> {
    let y = y
        .strip_suffix(".pbf")
        .or_else(|| y.strip_suffix(".mvt"))
        .unwrap_or(y);
    Some((z.parse().ok()?, x.parse().ok()?, y.parse().ok()?))
}

/// `GET /tiles/:z/:x/:y`; always 200, empty body on failure
pub async fn tile(
    State(state): State<AppState>,
    Path((z, x, y)): Path<(String, String, String)>,
) -> Response {
    let body = match parse_tile_coords(&z, &x, &y) {
        Some((z, x, y)) => state.tiles.tile(z, x, y).await,
        None => {
            debug!("Ignoring malformed tile path {}/{}/{}", z, x, y);
            Vec::new()
        }
    };
    ([(header::CONTENT_TYPE, TILE_CONTENT_TYPE)], body).into_response()
}
