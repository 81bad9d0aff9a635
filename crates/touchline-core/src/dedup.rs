use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::channel::{ChannelClassifier, ChannelGroup};
use crate::origin::Origin;

/// An origin of a session together with its channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedOrigin {
    pub session_id: String,
    pub channel_group: ChannelGroup,
    pub origin: Origin,
}

impl ClassifiedOrigin {
    pub fn classify(session_id: &str, origin: Origin, classifier: &ChannelClassifier) -> Self {
        let channel_group = classifier.classify(&origin.source, &origin.medium, &origin.campaign);
        Self {
            session_id: session_id.to_string(),
            channel_group,
            origin,
        }
    }
}

/// Keep one origin per (session, channel group).
///
/// The representative is the earliest origin of the group (first in input
/// order among equal timestamps). Its `is_explicit` flag becomes the OR over
/// the whole group. Output is ordered by session, timestamp, channel; running
/// the function on its own output returns it unchanged.
pub fn dedup_session_channels(classified: Vec<ClassifiedOrigin>) -> Vec<ClassifiedOrigin> {
    let mut groups: BTreeMap<(String, ChannelGroup), ClassifiedOrigin> = BTreeMap::new();

    for item in classified {
        let key = (item.session_id.clone(), item.channel_group);
        match groups.get_mut(&key) {
            Some(kept) => {
                let any_explicit = kept.origin.is_explicit || item.origin.is_explicit;
                if item.origin.timestamp < kept.origin.timestamp {
                    *kept = item;
                }
                kept.origin.is_explicit = any_explicit;
            }
            None => {
                groups.insert(key, item);
            }
        }
    }

    let mut out: Vec<ClassifiedOrigin> = groups.into_values().collect();
    out.sort_by(|a, b| {
        a.session_id
            .cmp(&b.session_id)
            .then(a.origin.timestamp.cmp(&b.origin.timestamp))
            .then(a.channel_group.cmp(&b.channel_group))
    });
    out
}
