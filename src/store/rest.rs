use crate::models::{Anchor, ConversationThread, IntentFlags, PropertyRecord};
use crate::spatial::{is_plausible_uk, BoundingBox, Located};
use crate::store::traits::PropertyStore;
use crate::store::types::{ClaimOutcome, IntentUpdate};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info, warn};

const PROPERTIES: &str = "properties";
const CLAIMS: &str = "claims";
const ANCHORS: &str = "anchor_points";
const CONVERSATIONS: &str = "conversations";

/// Backend speaking the hosted database's REST dialect (PostgREST filters)
pub struct RestStore {
    client: Client,
    base_url: String,
}

impl RestStore {
    /// Create a REST backend rooted at `base_url`
    pub fn new(base_url: &str, api_key: Option<&str>, timeout: Duration) -> Result<Self> {
        let mut headers = HeaderMap::new();
        if let Some(key) = api_key {
            headers.insert(
                "apikey",
                HeaderValue::from_str(key).context("Invalid backend API key")?,
            );
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {key}")).context("Invalid backend API key")?,
            );
        }

        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("nest-map/", env!("CARGO_PKG_VERSION")))
            .default_headers(headers)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    async fn send<T: DeserializeOwned>(&self, table: &str, request: RequestBuilder) -> Result<T> {
        let response = request
            .send()
            .await
            .with_context(|| format!("Failed to reach backend table {table}"))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("Backend returned status {} for {}: {}", status, table, body);
            anyhow::bail!("Backend query on {} failed with {}: {}", table, status, body);
        }

        response
            .json::<T>()
            .await
            .with_context(|| format!("Failed to decode rows from {table}"))
    }

    async fn select<T: DeserializeOwned>(
        &self,
        table: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<T>> {
        debug!("Selecting from {} with {:?}", table, query);
        let request = self
            .client
            .get(self.table_url(table))
            .query(&[("select", "*")])
            .query(query);
        self.send(table, request).await
    }

    async fn patch_properties(
        &self,
        query: &[(&str, String)],
        body: serde_json::Value,
    ) -> Result<Vec<PropertyRecord>> {
        let request = self
            .client
            .patch(self.table_url(PROPERTIES))
            .query(query)
            .header("Prefer", "return=representation")
            .json(&body);
        let rows: Vec<PropertyRow> = self.send(PROPERTIES, request).await?;
        Ok(rows.into_iter().map(PropertyRecord::from).collect())
    }

    async fn insert<B: Serialize + ?Sized>(&self, table: &str, body: &B) -> Result<()> {
        let request = self
            .client
            .post(self.table_url(table))
            .header("Prefer", "return=minimal")
            .json(body);
        self.execute(table, request).await
    }

    /// Insert that leaves an existing row with the same `on_conflict` key alone
    async fn upsert<B: Serialize + ?Sized>(
        &self,
        table: &str,
        on_conflict: &str,
        body: &B,
    ) -> Result<()> {
        let request = self
            .client
            .post(self.table_url(table))
            .query(&[("on_conflict", on_conflict)])
            .header("Prefer", "resolution=ignore-duplicates,return=minimal")
            .json(body);
        self.execute(table, request).await
    }

    async fn execute(&self, table: &str, request: RequestBuilder) -> Result<()> {
        let response = request
            .send()
            .await
            .with_context(|| format!("Failed to insert into {table}"))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Insert into {} failed with {}: {}", table, status, body);
        }
        Ok(())
    }

    /// Ledger row for a claim held by `user_id`; safe to repeat.
    ///
    /// Runs on every successful claim outcome so a ledger write that failed
    /// after the property row was updated is repaired by the next attempt.
    async fn record_claim(&self, id: &str, user_id: &str) -> Result<()> {
        self.upsert(
            CLAIMS,
            "property_id,user_id",
            &json!({ "property_id": id, "user_id": user_id, "status": "claimed" }),
        )
        .await
    }
}

fn bbox_filters(bbox: &BoundingBox) -> Vec<(&'static str, String)> {
    vec![
        ("lat", format!("gte.{}", bbox.min_lat)),
        ("lat", format!("lte.{}", bbox.max_lat)),
        ("lon", format!("gte.{}", bbox.min_lon)),
        ("lon", format!("lte.{}", bbox.max_lon)),
    ]
}

/// Double-quoted PostgREST filter value; commas and parentheses stay literal
fn quoted(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

/// PostgREST `in.(...)` list with each id quoted
fn in_list(ids: &[String]) -> String {
    let values: Vec<String> = ids.iter().map(|id| quoted(id)).collect();
    format!("in.({})", values.join(","))
}

/// `or=` filter matching threads where `user_id` is either participant
fn participant_filter(user_id: &str) -> String {
    let user = quoted(user_id);
    format!("(owner_user_id.eq.{user},viewer_user_id.eq.{user})")
}

#[async_trait]
impl PropertyStore for RestStore {
    async fn properties_in_bbox(
        &self,
        bbox: &BoundingBox,
        limit: usize,
    ) -> Result<Vec<PropertyRecord>> {
        let mut query = bbox_filters(bbox);
        query.push(("order", "id.asc".to_string()));
        query.push(("limit", limit.to_string()));

        let rows: Vec<PropertyRow> = self.select(PROPERTIES, &query).await?;
        debug!("Backend returned {} properties for {}", rows.len(), bbox);
        Ok(rows.into_iter().map(PropertyRecord::from).collect())
    }

    async fn property_by_id(&self, id: &str) -> Result<Option<PropertyRecord>> {
        let query = [("id", format!("eq.{id}")), ("limit", "1".to_string())];
        let rows: Vec<PropertyRow> = self.select(PROPERTIES, &query).await?;
        Ok(rows.into_iter().next().map(PropertyRecord::from))
    }

    async fn properties_by_ids(&self, ids: &[String]) -> Result<Vec<PropertyRecord>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let query = [("id", in_list(ids))];
        let rows: Vec<PropertyRow> = self.select(PROPERTIES, &query).await?;
        Ok(rows.into_iter().map(PropertyRecord::from).collect())
    }

    async fn claim_property(&self, id: &str, user_id: &str) -> Result<ClaimOutcome> {
        let Some(current) = self.property_by_id(id).await? else {
            return Ok(ClaimOutcome::NotFound);
        };
        if current.is_claimed_by(user_id) {
            self.record_claim(id, user_id).await?;
            return Ok(ClaimOutcome::AlreadyMine(current));
        }
        if current.is_claimed == Some(true) {
            return Ok(ClaimOutcome::ClaimedByOther);
        }

        // Conditional write: only rows still unclaimed are touched.
        let query = [
            ("id", format!("eq.{id}")),
            ("or", "(is_claimed.is.null,is_claimed.is.false)".to_string()),
        ];
        let updated = self
            .patch_properties(
                &query,
                json!({ "is_claimed": true, "claimed_by_user_id": user_id }),
            )
            .await?;

        let Some(claimed) = updated.into_iter().next() else {
            // Lost a race; report whoever holds it now.
            return Ok(match self.property_by_id(id).await? {
                Some(p) if p.is_claimed_by(user_id) => {
                    self.record_claim(id, user_id).await?;
                    ClaimOutcome::AlreadyMine(p)
                }
                Some(_) => ClaimOutcome::ClaimedByOther,
                None => ClaimOutcome::NotFound,
            });
        };

        self.record_claim(id, user_id).await?;
        info!("Property {} claimed by {}", id, user_id);

        Ok(ClaimOutcome::Claimed(claimed))
    }

    async fn update_intent(
        &self,
        id: &str,
        update: &IntentUpdate,
    ) -> Result<Option<PropertyRecord>> {
        let body = serde_json::to_value(IntentColumns::from(update))?;
        let updated = self
            .patch_properties(&[("id", format!("eq.{id}"))], body)
            .await?;
        Ok(updated.into_iter().next())
    }

    async fn anchors_in_bbox(&self, bbox: &BoundingBox) -> Result<Vec<Anchor>> {
        let rows: Vec<AnchorRow> = self.select(ANCHORS, &bbox_filters(bbox)).await?;
        let total = rows.len();

        let anchors: Vec<Anchor> = rows
            .into_iter()
            .filter_map(AnchorRow::into_anchor)
            .filter(|a| is_plausible_uk(a.coordinate()))
            .collect();
        if anchors.len() < total {
            warn!(
                "Dropped {} anchors with missing or implausible coordinates",
                total - anchors.len()
            );
        }
        Ok(anchors)
    }

    async fn threads_for_user(&self, user_id: &str) -> Result<Vec<ConversationThread>> {
        let query = [
            ("or", participant_filter(user_id)),
            ("order", "updated_at.desc".to_string()),
        ];
        let rows: Vec<ThreadRow> = self.select(CONVERSATIONS, &query).await?;
        Ok(rows.into_iter().map(ConversationThread::from).collect())
    }

    async fn insert_thread(&self, thread: &ConversationThread) -> Result<()> {
        self.insert(CONVERSATIONS, &ThreadRow::from(thread.clone()))
            .await
    }

    fn backend_name(&self) -> &'static str {
        "rest"
    }
}

// Backend rows. Column names drifted over time; every historical spelling is
// accepted here so nothing past this boundary has to care.

fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Int(i64),
    }
    Ok(match Id::deserialize(deserializer)? {
        Id::Text(s) => s,
        Id::Int(n) => n.to_string(),
    })
}

#[derive(Debug, Deserialize)]
struct PropertyRow {
    #[serde(deserialize_with = "string_or_number")]
    id: String,
    #[serde(alias = "latitude")]
    lat: f64,
    #[serde(alias = "longitude", alias = "lng")]
    lon: f64,
    #[serde(default)]
    postcode: Option<String>,
    #[serde(default)]
    street: Option<String>,
    #[serde(default, alias = "housenumber")]
    house_number: Option<String>,
    #[serde(default, alias = "label")]
    display_label: Option<String>,
    #[serde(default)]
    is_claimed: Option<bool>,
    #[serde(default, alias = "claimed_by")]
    claimed_by_user_id: Option<String>,
    #[serde(default, alias = "is_soft_listing", alias = "open_to_talking")]
    soft_listing: Option<bool>,
    #[serde(default, alias = "is_settled")]
    settled: Option<bool>,
    #[serde(default, alias = "for_sale")]
    is_for_sale: Option<bool>,
    #[serde(default, alias = "for_rent")]
    is_for_rent: Option<bool>,
}

impl From<PropertyRow> for PropertyRecord {
    fn from(row: PropertyRow) -> Self {
        let claimed_by_user_id = match row.is_claimed {
            Some(true) => row.claimed_by_user_id,
            _ => None,
        };
        PropertyRecord {
            id: row.id,
            lat: row.lat,
            lon: row.lon,
            postcode: row.postcode,
            street: row.street,
            house_number: row.house_number,
            display_label: row.display_label,
            is_claimed: row.is_claimed,
            claimed_by_user_id,
            intent: IntentFlags {
                soft_listing: row.soft_listing,
                settled: row.settled,
                is_for_sale: row.is_for_sale,
                is_for_rent: row.is_for_rent,
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct IntentColumns {
    #[serde(skip_serializing_if = "Option::is_none")]
    soft_listing: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    settled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    is_for_sale: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    is_for_rent: Option<bool>,
}

impl From<&IntentUpdate> for IntentColumns {
    fn from(update: &IntentUpdate) -> Self {
        Self {
            soft_listing: update.soft_listing,
            settled: update.settled,
            is_for_sale: update.is_for_sale,
            is_for_rent: update.is_for_rent,
        }
    }
}

#[derive(Debug, Deserialize)]
struct AnchorRow {
    #[serde(deserialize_with = "string_or_number")]
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default, alias = "type")]
    anchor_type: Option<String>,
    #[serde(default)]
    lat: Option<f64>,
    #[serde(default)]
    lon: Option<f64>,
    #[serde(default)]
    latitude: Option<f64>,
    #[serde(default)]
    longitude: Option<f64>,
    #[serde(default)]
    lat_corrected: Option<f64>,
    #[serde(default)]
    lon_corrected: Option<f64>,
}

impl AnchorRow {
    /// Corrected entrance point first, then the raw geocode.
    fn into_anchor(self) -> Option<Anchor> {
        let (lat, lon) = match (self.lat_corrected, self.lon_corrected) {
            (Some(lat), Some(lon)) => (lat, lon),
            _ => (self.lat.or(self.latitude)?, self.lon.or(self.longitude)?),
        };
        Some(Anchor {
            id: self.id,
            name: self.name.unwrap_or_default(),
            anchor_type: self.anchor_type.unwrap_or_default(),
            lat,
            lon,
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ThreadRow {
    #[serde(deserialize_with = "string_or_number")]
    id: String,
    #[serde(deserialize_with = "string_or_number")]
    property_id: String,
    #[serde(alias = "owner_id")]
    owner_user_id: String,
    #[serde(alias = "viewer_id")]
    viewer_user_id: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    #[serde(default)]
    last_message_at: Option<DateTime<Utc>>,
    #[serde(default)]
    last_message_preview: Option<String>,
}

impl From<ThreadRow> for ConversationThread {
    fn from(row: ThreadRow) -> Self {
        ConversationThread {
            id: row.id,
            property_id: row.property_id,
            owner_user_id: row.owner_user_id,
            viewer_user_id: row.viewer_user_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
            last_message_at: row.last_message_at,
            last_message_preview: row.last_message_preview,
        }
    }
}

impl From<ConversationThread> for ThreadRow {
    fn from(thread: ConversationThread) -> Self {
        ThreadRow {
            id: thread.id,
            property_id: thread.property_id,
            owner_user_id: thread.owner_user_id,
            viewer_user_id: thread.viewer_user_id,
            created_at: thread.created_at,
            updated_at: thread.updated_at,
            last_message_at: thread.last_message_at,
            last_message_preview: thread.last_message_preview,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::Status;

    #[test]
    fn property_row_accepts_historical_column_names() {
        let row: PropertyRow = serde_json::from_value(json!({
            "id": 42,
            "latitude": 54.97,
            "longitude": -1.61,
            "is_claimed": true,
            "claimed_by": "owner-1",
            "open_to_talking": true,
            "for_sale": null
        }))
        .unwrap();
        let record = PropertyRecord::from(row);

        assert_eq!(record.id, "42");
        assert_eq!(record.intent.soft_listing, Some(true));
        assert_eq!(record.intent.is_for_sale, None);
        assert_eq!(record.claimed_by_user_id.as_deref(), Some("owner-1"));
        assert_eq!(record.status(), Status::OpenToTalking);
    }

    #[test]
    fn claimer_is_dropped_when_row_is_not_claimed() {
        let row: PropertyRow = serde_json::from_value(json!({
            "id": "p1",
            "lat": 54.97,
            "lon": -1.61,
            "is_claimed": false,
            "claimed_by_user_id": "stale"
        }))
        .unwrap();
        assert_eq!(PropertyRecord::from(row).claimed_by_user_id, None);
    }

    #[test]
    fn in_list_quotes_ids() {
        let ids = vec!["a".to_string(), "b,c".to_string()];
        assert_eq!(in_list(&ids), "in.(\"a\",\"b,c\")");
    }

    #[test]
    fn participant_filter_quotes_reserved_characters() {
        assert_eq!(
            participant_filter("auth0|a,b(c)"),
            "(owner_user_id.eq.\"auth0|a,b(c)\",viewer_user_id.eq.\"auth0|a,b(c)\")"
        );
        assert_eq!(quoted(r#"say "hi"\"#), r#""say \"hi\"\\""#);
    }

    #[test]
    fn intent_columns_skip_absent_fields() {
        let update = IntentUpdate {
            settled: Some(true),
            ..IntentUpdate::default()
        };
        let body = serde_json::to_value(IntentColumns::from(&update)).unwrap();
        assert_eq!(body, json!({ "settled": true }));
    }

    #[test]
    fn anchor_row_uses_corrected_coordinates() {
        let row: AnchorRow = serde_json::from_value(json!({
            "id": "s1",
            "name": "Central School",
            "type": "primary_school",
            "latitude": 54.0,
            "longitude": -1.0,
            "lat_corrected": 54.98,
            "lon_corrected": -1.62
        }))
        .unwrap();
        let anchor = row.into_anchor().unwrap();
        assert_eq!(anchor.anchor_type, "primary_school");
        assert_eq!(anchor.lat, 54.98);
        assert_eq!(anchor.lon, -1.62);
    }

    #[test]
    fn anchor_row_without_coordinates_is_skipped() {
        let row: AnchorRow = serde_json::from_value(json!({ "id": 7, "name": "Nowhere" })).unwrap();
        assert!(row.into_anchor().is_none());
    }

    mod claims {
        use super::*;
        use axum::extract::{RawQuery, State};
        use axum::http::{HeaderMap as AxumHeaders, StatusCode};
        use axum::routing::{get, post};
        use axum::{Json, Router};
        use std::sync::{Arc, Mutex};

        #[derive(Default)]
        struct Backend {
            claimed_by: Mutex<Option<String>>,
            failing_ledger_writes: Mutex<u32>,
            ledger: Mutex<Vec<(Option<String>, String, serde_json::Value)>>,
        }

        impl Backend {
            fn row(&self) -> serde_json::Value {
                let owner = self.claimed_by.lock().unwrap().clone();
                json!([{
                    "id": "p1",
                    "lat": 54.97,
                    "lon": -1.61,
                    "is_claimed": owner.is_some(),
                    "claimed_by_user_id": owner
                }])
            }
        }

        async fn select(State(backend): State<Arc<Backend>>) -> Json<serde_json::Value> {
            Json(backend.row())
        }

        async fn patch(
            State(backend): State<Arc<Backend>>,
            Json(body): Json<serde_json::Value>,
        ) -> Json<serde_json::Value> {
            let user = body["claimed_by_user_id"].as_str().map(str::to_string);
            *backend.claimed_by.lock().unwrap() = user;
            Json(backend.row())
        }

        async fn ledger(
            State(backend): State<Arc<Backend>>,
            RawQuery(query): RawQuery,
            headers: AxumHeaders,
            Json(body): Json<serde_json::Value>,
        ) -> StatusCode {
            let mut failing = backend.failing_ledger_writes.lock().unwrap();
            if *failing > 0 {
                *failing -= 1;
                return StatusCode::SERVICE_UNAVAILABLE;
            }
            let prefer = headers
                .get("prefer")
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string();
            backend.ledger.lock().unwrap().push((query, prefer, body));
            StatusCode::CREATED
        }

        async fn serve(backend: Arc<Backend>) -> RestStore {
            let app = Router::new()
                .route("/rest/v1/properties", get(select).patch(patch))
                .route("/rest/v1/claims", post(ledger))
                .with_state(backend);
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            tokio::spawn(async move {
                axum::serve(listener, app).await.unwrap();
            });
            RestStore::new(&format!("http://{addr}"), None, Duration::from_secs(5)).unwrap()
        }

        #[tokio::test]
        async fn fresh_claim_writes_an_idempotent_ledger_row() {
            let backend = Arc::new(Backend::default());
            let store = serve(backend.clone()).await;

            let outcome = store.claim_property("p1", "u1").await.unwrap();
            assert!(matches!(outcome, ClaimOutcome::Claimed(ref p) if p.is_claimed_by("u1")));

            let ledger = backend.ledger.lock().unwrap();
            assert_eq!(ledger.len(), 1);
            let (query, prefer, body) = &ledger[0];
            assert_eq!(query.as_deref(), Some("on_conflict=property_id%2Cuser_id"));
            assert!(prefer.contains("resolution=ignore-duplicates"));
            assert_eq!(body["user_id"], json!("u1"));
        }

        #[tokio::test]
        async fn retry_repairs_a_ledger_write_that_failed_after_the_claim() {
            let backend = Arc::new(Backend::default());
            *backend.failing_ledger_writes.lock().unwrap() = 1;
            let store = serve(backend.clone()).await;

            assert!(store.claim_property("p1", "u1").await.is_err());
            assert_eq!(backend.claimed_by.lock().unwrap().as_deref(), Some("u1"));
            assert!(backend.ledger.lock().unwrap().is_empty());

            let outcome = store.claim_property("p1", "u1").await.unwrap();
            assert!(matches!(outcome, ClaimOutcome::AlreadyMine(_)));

            let ledger = backend.ledger.lock().unwrap();
            assert_eq!(ledger.len(), 1);
            assert_eq!(ledger[0].2["property_id"], json!("p1"));
        }

        #[tokio::test]
        async fn claim_held_by_someone_else_writes_nothing() {
            let backend = Arc::new(Backend::default());
            *backend.claimed_by.lock().unwrap() = Some("u2".to_string());
            let store = serve(backend.clone()).await;

            let outcome = store.claim_property("p1", "u1").await.unwrap();
            assert!(matches!(outcome, ClaimOutcome::ClaimedByOther));
            assert!(backend.ledger.lock().unwrap().is_empty());
        }
    }
}
