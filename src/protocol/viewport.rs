//! Viewport diffing
//!
//! Each session remembers the last viewport it reported. A new viewport is
//! reconciled against it over the realm's region grid:
//!
//! - regions that came into view get a snapshot, a topic subscription and a
//!   snapshot of every resident entity except the player's own, in that order
//! - regions that went out of view are unsubscribed; the client drops them
//!   locally, nothing is sent
//!
//! Repeating a viewport is a no-op. Viewports that are inverted, larger than
//! the session limit or entirely outside the realm are rejected untouched.

use std::collections::BTreeSet;

use tracing::debug;

use crate::bus::Topic;
use crate::error::{RealmkeepError, Result};
use crate::game::geometry::Rectangle;
use crate::game::realm::RegionCoord;
use crate::protocol::connection::SessionContext;
use crate::protocol::messages::{AvatarSnapshot, EntitySnapshot, RegionSnapshot, ViewportUpdate};

/// Session-local viewport memory
#[derive(Debug, Clone, Default)]
pub struct ViewportState {
    /// Last accepted viewport, as a region-grid rectangle
    pub last: Option<Rectangle>,
}

/// Regions entering and leaving view
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewportDiff {
    pub entered: Vec<RegionCoord>,
    pub left: Vec<RegionCoord>,
}

impl ViewportDiff {
    pub fn between(old: &BTreeSet<RegionCoord>, new: &BTreeSet<RegionCoord>) -> Self {
        Self {
            entered: new.difference(old).copied().collect(),
            left: old.difference(new).copied().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entered.is_empty() && self.left.is_empty()
    }
}

/// Apply a viewport update for one session
pub async fn handle_viewport(ctx: &mut SessionContext, update: ViewportUpdate) -> Result<ViewportDiff> {
    if update.is_inverted() {
        return Err(RealmkeepError::rejected(format!(
            "inverted viewport ({},{})-({},{})",
            update.left, update.top, update.right, update.bottom
        )));
    }
    let count = update.region_count();
    if count > ctx.settings.max_viewport_regions as i64 {
        return Err(RealmkeepError::rejected(format!(
            "viewport of {} regions exceeds the limit of {}",
            count, ctx.settings.max_viewport_regions
        )));
    }

    let grid = update.grid();
    let regions = ctx.store.realms().regions(ctx.realm_id).await?;
    if !grid.intersects(&regions.extent()) {
        return Err(RealmkeepError::rejected(format!(
            "viewport ({},{})-({},{}) lies outside the realm",
            update.left, update.top, update.right, update.bottom
        )));
    }
    let old: BTreeSet<RegionCoord> = match ctx.viewport.last {
        Some(last) => regions.load_within(&last).await?.into_keys().collect(),
        None => BTreeSet::new(),
    };
    let new: BTreeSet<RegionCoord> = regions.load_within(&grid).await?.into_keys().collect();
    let diff = ViewportDiff::between(&old, &new);

    let player_id = ctx.player_id();
    for coord in &diff.entered {
        let loaded = regions.find(*coord).await?;
        let snapshot = RegionSnapshot::from(&*loaded.region.read());
        ctx.send(None, snapshot).await?;
        ctx.subscribe(Topic::region(ctx.realm_id, *coord));

        for entity in loaded.entities.iter().filter(|e| e.id() != player_id) {
            let snapshot = EntitySnapshot::of(&entity.read())?;
            ctx.send(Some(entity.id()), snapshot).await?;
        }
    }
    for coord in &diff.left {
        ctx.unsubscribe(Topic::region(ctx.realm_id, *coord));
    }
    ctx.viewport.last = Some(grid);

    if ctx.settings.resend_avatar {
        let avatar = AvatarSnapshot(EntitySnapshot::of(&ctx.player.read())?);
        ctx.send(Some(player_id), avatar).await?;
    }

    debug!(
        session_id = ctx.session_id(),
        entered = diff.entered.len(),
        left = diff.left.len(),
        "Viewport updated"
    );
    Ok(diff)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn coords(list: &[(i32, i32)]) -> BTreeSet<RegionCoord> {
        list.iter().map(|&(x, y)| RegionCoord::new(x, y)).collect()
    }

    #[test]
    fn test_diff_between() {
        let old = coords(&[(0, 0), (1, 0)]);
        let new = coords(&[(1, 0), (2, 0)]);
        let diff = ViewportDiff::between(&old, &new);
        assert_eq!(diff.entered, vec![RegionCoord::new(2, 0)]);
        assert_eq!(diff.left, vec![RegionCoord::new(0, 0)]);
    }

    #[test]
    fn test_same_set_is_empty() {
        let set = coords(&[(0, 0), (3, 4)]);
        assert!(ViewportDiff::between(&set, &set).is_empty());
    }
}
