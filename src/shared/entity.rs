//! Entity namespaces
//!
//! Each farm entity collection is cached under one namespace. Queued paths are
//! mapped back to a namespace so the sync engine knows which snapshot a
//! confirmed operation refreshes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Entity collections the farm application caches for offline reads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Tasks,
    Events,
    Livestock,
    Pens,
    Users,
    WeightRecords,
    BreedingEvents,
    Notifications,
    Investors,
}

impl EntityKind {
    /// Every known entity kind
    pub const ALL: [EntityKind; 9] = [
        EntityKind::Tasks,
        EntityKind::Events,
        EntityKind::Livestock,
        EntityKind::Pens,
        EntityKind::Users,
        EntityKind::WeightRecords,
        EntityKind::BreedingEvents,
        EntityKind::Notifications,
        EntityKind::Investors,
    ];

    /// Cache namespace for this entity kind
    pub fn namespace(&self) -> &'static str {
        match self {
            EntityKind::Tasks => "tasks",
            EntityKind::Events => "events",
            EntityKind::Livestock => "livestock",
            EntityKind::Pens => "pens",
            EntityKind::Users => "users",
            EntityKind::WeightRecords => "weight_records",
            EntityKind::BreedingEvents => "breeding_events",
            EntityKind::Notifications => "notifications",
            EntityKind::Investors => "investors",
        }
    }

    /// Parse a namespace or path segment (`weight-records` and `weight_records` both match)
    pub fn from_segment(segment: &str) -> Option<Self> {
        let normalized = segment.trim().to_ascii_lowercase().replace('-', "_");
        match normalized.as_str() {
            "weights" => return Some(EntityKind::WeightRecords),
            "breeding" => return Some(EntityKind::BreedingEvents),
            _ => {}
        }
        EntityKind::ALL
            .into_iter()
            .find(|kind| kind.namespace() == normalized)
    }

    /// Resolve the entity a resource path belongs to
    ///
    /// `/pens/5`, `/api/pens/5` and `pens` all resolve to [`EntityKind::Pens`].
    pub fn from_path(path: &str) -> Option<Self> {
        let path = path.split('?').next().unwrap_or(path);
        let mut segments = path.split('/').filter(|s| !s.is_empty());
        let first = segments.next()?;
        if first.eq_ignore_ascii_case("api") {
            segments.next().and_then(Self::from_segment)
        } else {
            Self::from_segment(first)
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.namespace())
    }
}

/// Last non-empty segment of a path, i.e. the record id in `/pens/5`
pub fn trailing_id(path: &str) -> Option<&str> {
    let path = path.split('?').next().unwrap_or(path);
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    match segments.as_slice() {
        [] | [_] => None,
        [.., last] if EntityKind::from_segment(last).is_some() => None,
        [.., last] => Some(*last),
    }
}
