use crate::models::{Subscription, Video};

/// How a fetched video relates to a subscription's recorded baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    /// No baseline recorded yet; persist one silently instead of pushing.
    Uninitialized,
    NewVideo,
    NoChange,
}

/// Classifies the latest fetched video against the stored baseline.
///
/// A push requires BOTH a different bvid AND a strictly newer publish
/// timestamp. A delete-and-reupload of older content, or a metadata edit
/// surfacing an old video first, changes only one of the two and stays
/// silent.
pub fn classify(latest: &Video, subscription: &Subscription) -> Change {
    let (Some(last_bvid), Some(last_created_ts)) = (
        subscription.last_bvid.as_deref(),
        subscription.last_created_ts,
    ) else {
        return Change::Uninitialized;
    };

    if latest.bvid != last_bvid && latest.created_ts > last_created_ts {
        Change::NewVideo
    } else {
        Change::NoChange
    }
}
