use crate::error::{AppError, Result};
use crate::models::{Anchor, AnchorCategory, ProximityAnchor};
use crate::spatial::{haversine_m, BoundingBox, Coordinate, Located};
use crate::store::PropertyStore;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Average walking speed in metres per minute
pub const WALK_METERS_PER_MINUTE: f64 = 80.0;

/// Fifteen-minute walk; anchors this far or further are dropped
pub const MAX_WALK_DISTANCE_M: f64 = 1200.0;

/// Map a raw anchor type string to its category; unknown types are amenities.
pub fn category_for_type(raw: &str) -> AnchorCategory {
    match raw.trim().to_ascii_lowercase().as_str() {
        "school" | "primary_school" | "secondary_school" | "college" | "nursery"
        | "university" => AnchorCategory::School,
        "transport" | "bus_stop" | "station" | "train_station" | "metro" | "tram_stop" => {
            AnchorCategory::Transport
        }
        "spirit" | "church" | "mosque" | "synagogue" | "temple" | "gurdwara"
        | "place_of_worship" => AnchorCategory::Spirit,
        _ => AnchorCategory::Amenity,
    }
}

pub fn walk_minutes(distance_m: f64) -> u32 {
    (distance_m / WALK_METERS_PER_MINUTE).round() as u32
}

/// Distance and walk time from `target` to every anchor.
pub fn measure(anchors: &[Anchor], target: Coordinate) -> Vec<ProximityAnchor> {
    anchors
        .iter()
        .map(|anchor| {
            let distance = haversine_m(target, anchor.coordinate());
            ProximityAnchor {
                id: anchor.id.clone(),
                name: anchor.name.clone(),
                category: category_for_type(&anchor.anchor_type),
                distance_meters: distance,
                walk_minutes: walk_minutes(distance),
            }
        })
        .collect()
}

/// Keep anchors strictly within walking range, then the nearest per category.
///
/// Output is ordered by category. Ties keep the first anchor seen.
pub fn reduce_nearest(measured: Vec<ProximityAnchor>) -> Vec<ProximityAnchor> {
    let mut nearest: BTreeMap<AnchorCategory, ProximityAnchor> = BTreeMap::new();

    for candidate in measured
        .into_iter()
        .filter(|a| a.distance_meters < MAX_WALK_DISTANCE_M)
    {
        match nearest.get(&candidate.category) {
            Some(best) if best.distance_meters <= candidate.distance_meters => {}
            _ => {
                nearest.insert(candidate.category, candidate);
            }
        }
    }

    nearest.into_values().collect()
}

/// At most one anchor per category, each the closest within walking range.
pub fn nearest_per_category(anchors: &[Anchor], target: Coordinate) -> Vec<ProximityAnchor> {
    reduce_nearest(measure(anchors, target))
}

/// Runs the proximity engine for a focused property.
///
/// Candidate anchors are fetched for a box around the property and cached per
/// property for `ttl`. Expired entries are purged whenever a fresh one is stored.
pub struct ProximityService {
    store: Arc<dyn PropertyStore>,
    cache: DashMap<String, (Instant, Arc<Vec<Anchor>>)>,
    ttl: Duration,
}

impl ProximityService {
    pub fn new(store: Arc<dyn PropertyStore>, ttl: Duration) -> Self {
        Self {
            store,
            cache: DashMap::new(),
            ttl,
        }
    }

    pub async fn nearest_for_property(&self, property_id: &str) -> Result<Vec<ProximityAnchor>> {
        let property = self
            .store
            .property_by_id(property_id)
            .await
            .map_err(AppError::backend)?
            .ok_or_else(|| AppError::not_found("property", property_id))?;

        let target = property.coordinate();
        let anchors = self.candidates(property_id, target).await?;
        let result = nearest_per_category(&anchors, target);

        debug!(
            "Proximity for {}: {} candidates, {} categories",
            property_id,
            anchors.len(),
            result.len()
        );
        Ok(result)
    }

    async fn candidates(&self, property_id: &str, target: Coordinate) -> Result<Arc<Vec<Anchor>>> {
        if let Some(entry) = self.cache.get(property_id) {
            let (fetched_at, anchors) = entry.value();
            if fetched_at.elapsed() < self.ttl {
                return Ok(Arc::clone(anchors));
            }
        }

        let bbox = BoundingBox::around(target, MAX_WALK_DISTANCE_M);
        let anchors = Arc::new(
            self.store
                .anchors_in_bbox(&bbox)
                .await
                .map_err(AppError::backend)?,
        );
        let ttl = self.ttl;
        self.cache.retain(|_, (fetched_at, _)| fetched_at.elapsed() < ttl);
        self.cache
            .insert(property_id.to_string(), (Instant::now(), Arc::clone(&anchors)));
        Ok(anchors)
    }
}
