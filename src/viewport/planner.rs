use crate::error::{AppError, Result};
use crate::models::{PropertyRecord, PropertyView};
use crate::spatial::{grid_cell, BoundingBox, Located, GRID_DECIMALS};
use crate::store::PropertyStore;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// Highest zoom treated as "zoomed out": smallest cap, grid downsampling on.
pub const LOW_ZOOM_MAX: u8 = 11;
/// Highest zoom of the middle tier
pub const MID_ZOOM_MAX: u8 = 13;

pub const LOW_ZOOM_LIMIT: usize = 800;
pub const MID_ZOOM_LIMIT: usize = 2000;
pub const HIGH_ZOOM_LIMIT: usize = 8000;

/// How many rows to ask for and whether to thin them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryPlan {
    pub limit: usize,
    pub downsample: bool,
}

/// Adaptive result cap by zoom level.
pub fn plan_query(zoom: u8) -> QueryPlan {
    let limit = if zoom <= LOW_ZOOM_MAX {
        LOW_ZOOM_LIMIT
    } else if zoom <= MID_ZOOM_MAX {
        MID_ZOOM_LIMIT
    } else {
        HIGH_ZOOM_LIMIT
    };

    QueryPlan {
        limit,
        downsample: zoom <= LOW_ZOOM_MAX,
    }
}

/// Keep the first item per ~110 m grid cell, in input order.
///
/// Only applies at `zoom <= 11`; above that the input comes back untouched.
/// Order-dependent: a different backend ordering may keep different items.
pub fn downsample<T: Located>(items: Vec<T>, zoom: u8) -> Vec<T> {
    if zoom > LOW_ZOOM_MAX {
        return items;
    }

    let mut occupied = HashSet::with_capacity(items.len());
    items
        .into_iter()
        .filter(|item| occupied.insert(grid_cell(item.coordinate(), GRID_DECIMALS)))
        .collect()
}

/// Result of a viewport query
#[derive(Debug, Clone, PartialEq)]
pub struct ViewportResult {
    pub properties: Vec<PropertyView>,
    /// Rows dropped by grid downsampling
    pub thinned: usize,
}

/// Server side of the viewport pipeline: plans, queries the backend and
/// shapes rows for the caller.
#[derive(Clone)]
pub struct ViewportPlanner {
    store: Arc<dyn PropertyStore>,
}

impl ViewportPlanner {
    pub fn new(store: Arc<dyn PropertyStore>) -> Self {
        Self { store }
    }

    pub async fn fetch_viewport(
        &self,
        bbox: &BoundingBox,
        zoom: u8,
        current_user: Option<&str>,
    ) -> Result<ViewportResult> {
        let plan = plan_query(zoom);
        let rows = self
            .store
            .properties_in_bbox(bbox, plan.limit)
            .await
            .map_err(AppError::backend)?;

        // The backend is trusted to filter, but never return rows outside the box.
        let rows: Vec<PropertyRecord> = rows
            .into_iter()
            .filter(|p| bbox.contains(p.coordinate()))
            .collect();

        let fetched = rows.len();
        let rows = if plan.downsample {
            downsample(rows, zoom)
        } else {
            rows
        };
        let thinned = fetched - rows.len();

        debug!(
            "Viewport {} z{}: limit {}, {} rows, {} thinned",
            bbox, zoom, plan.limit, fetched, thinned
        );

        Ok(ViewportResult {
            properties: rows
                .into_iter()
                .map(|p| PropertyView::from_record(p, current_user))
                .collect(),
            thinned,
        })
    }

    /// Exactly one property by id, bypassing bbox and zoom.
    pub async fn fetch_one(&self, id: &str, current_user: Option<&str>) -> Result<PropertyView> {
        let record = self
            .store
            .property_by_id(id)
            .await
            .map_err(AppError::backend)?
            .ok_or_else(|| AppError::not_found("property", id))?;
        Ok(PropertyView::from_record(record, current_user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::IntentFlags;
    use crate::store::{InMemoryStore, SeedData};

    fn property(id: &str, lat: f64, lon: f64) -> PropertyRecord {
        PropertyRecord {
            id: id.to_string(),
            lat,
            lon,
            postcode: None,
            street: None,
            house_number: None,
            display_label: None,
            is_claimed: Some(false),
            claimed_by_user_id: None,
            intent: IntentFlags::default(),
        }
    }

    fn dense_cluster() -> Vec<PropertyRecord> {
        vec![
            property("a", 54.97801, -1.61801),
            property("b", 54.97812, -1.61790),
            property("c", 54.97950, -1.61800),
            property("d", 54.97803, -1.61799),
            property("e", 54.98100, -1.62000),
        ]
    }

    fn ids(items: &[PropertyRecord]) -> Vec<&str> {
        items.iter().map(|p| p.id.as_str()).collect()
    }

    #[test]
    fn limit_tiers_by_zoom() {
        assert_eq!(plan_query(0), QueryPlan { limit: 800, downsample: true });
        assert_eq!(plan_query(11), QueryPlan { limit: 800, downsample: true });
        assert_eq!(plan_query(12), QueryPlan { limit: 2000, downsample: false });
        assert_eq!(plan_query(13).limit, 2000);
        assert_eq!(plan_query(14), QueryPlan { limit: 8000, downsample: false });
        assert_eq!(plan_query(22).limit, 8000);
    }

    #[test]
    fn limit_is_monotonic_in_zoom() {
        let limits: Vec<usize> = (0..=24).map(|z| plan_query(z).limit).collect();
        assert!(limits.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn downsample_keeps_first_per_cell() {
        let thinned = downsample(dense_cluster(), 11);
        assert_eq!(ids(&thinned), vec!["a", "c", "e"]);
    }

    #[test]
    fn downsample_is_idempotent() {
        let once = downsample(dense_cluster(), 10);
        let twice = downsample(once.clone(), 10);
        assert_eq!(once, twice);
    }

    #[test]
    fn downsample_is_noop_above_threshold() {
        let input = dense_cluster();
        let output = downsample(input.clone(), 12);
        assert_eq!(output, input);
    }

    #[tokio::test]
    async fn fetch_viewport_thins_at_low_zoom_and_marks_ownership() {
        let mut rows = dense_cluster();
        rows[2].is_claimed = Some(true);
        rows[2].claimed_by_user_id = Some("me".to_string());
        let store = Arc::new(InMemoryStore::from_seed(SeedData {
            properties: rows,
            ..SeedData::default()
        }));
        let planner = ViewportPlanner::new(store);
        let bbox = BoundingBox::parse("-1.7,54.9,-1.5,55.0").unwrap();

        let low = planner.fetch_viewport(&bbox, 9, Some("me")).await.unwrap();
        assert_eq!(low.properties.len(), 3);
        assert_eq!(low.thinned, 2);
        let mine: Vec<_> = low.properties.iter().filter(|p| p.is_mine).collect();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].id, "c");

        let high = planner.fetch_viewport(&bbox, 15, None).await.unwrap();
        assert_eq!(high.properties.len(), 5);
        assert_eq!(high.thinned, 0);
        assert!(high.properties.iter().all(|p| !p.is_mine));
    }

    #[tokio::test]
    async fn fetch_one_reports_missing_ids() {
        let planner = ViewportPlanner::new(Arc::new(InMemoryStore::new()));
        let err = planner.fetch_one("missing", None).await.unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }
}
