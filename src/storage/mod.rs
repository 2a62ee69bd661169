// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Storage backends.
//!
//! Every backend implements [`Store`](traits::Store) and ships a matching
//! [`StoreKind`](traits::StoreKind) that recognises its URL scheme:
//!
//! | Kind     | Schemes                                   | Backend            |
//! |----------|-------------------------------------------|--------------------|
//! | `sql`    | `sqlite`, `mysql`, `mariadb`, `postgres`  | [`sql::SqlStore`]  |
//! | `s3`     | `s3`                                      | [`s3::S3Store`]    |
//! | `file`   | `file`                                    | [`local::LocalStore`] |
//! | `memory` | `memory`                                  | [`memory::InMemoryStore`] |

pub mod traits;
pub mod sql;
pub mod s3;
pub mod local;
pub mod memory;

use chrono::{DateTime, Utc};

use crate::incident::{sort_by_created, Incident};
use traits::StorageError;

/// Object/file name holding the subscriber list.
pub(crate) const SUBSCRIBERS_KEY: &str = "subscribers.json";

/// Object name holding persistent incidents (object storage only).
pub(crate) const PERSISTENTS_KEY: &str = "persistents.json";

/// Reject GUIDs that cannot safely be used as a file name or object key.
pub(crate) fn validate_guid(guid: &str) -> Result<(), StorageError> {
    let bad = guid.is_empty()
        || guid.contains('/')
        || guid.contains('\\')
        || guid.contains("..")
        || guid == SUBSCRIBERS_KEY
        || guid == PERSISTENTS_KEY;
    if bad {
        return Err(StorageError::InvalidInput(format!("invalid incident guid '{}'", guid)));
    }
    Ok(())
}

/// Keep non-persistent incidents created within `[from, to]`, oldest first,
/// with messages sorted newest first.
pub(crate) fn select_by_date(
    incidents: impl IntoIterator<Item = Incident>,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Vec<Incident> {
    let mut selected: Vec<Incident> = incidents
        .into_iter()
        .filter(|i| !i.persistent && i.created_at >= from && i.created_at <= to)
        .map(|mut i| {
            i.sort_messages();
            i
        })
        .collect();
    sort_by_created(&mut selected);
    selected
}

/// Keep persistent incidents, oldest first, with messages sorted newest first.
pub(crate) fn select_persistents(incidents: impl IntoIterator<Item = Incident>) -> Vec<Incident> {
    let mut selected: Vec<Incident> = incidents
        .into_iter()
        .filter(|i| i.persistent)
        .map(|mut i| {
            i.sort_messages();
            i
        })
        .collect();
    sort_by_created(&mut selected);
    selected
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::incident::{ComponentState, IncidentState};
    use chrono::Duration;

    fn incident_at(days_ago: i64, persistent: bool) -> Incident {
        let mut incident = Incident::new(IncidentState::Unresolved, ComponentState::Operational);
        incident.created_at = Utc::now() - Duration::days(days_ago);
        incident.persistent = persistent;
        incident
    }

    #[test]
    fn test_validate_guid() {
        assert!(validate_guid("5f0c1d2e-aaaa-bbbb-cccc-000000000000").is_ok());
        assert!(validate_guid("").is_err());
        assert!(validate_guid("../etc/passwd").is_err());
        assert!(validate_guid("a/b").is_err());
        assert!(validate_guid(SUBSCRIBERS_KEY).is_err());
        assert!(matches!(validate_guid("ops/2024"), Err(StorageError::InvalidInput(_))));
    }

    #[test]
    fn test_select_by_date_is_inclusive_and_skips_persistent() {
        let edge = incident_at(3, false);
        let inside = incident_at(2, false);
        let pinned = incident_at(2, true);
        let outside = incident_at(10, false);

        let from = edge.created_at;
        let to = Utc::now();
        let got = select_by_date(vec![inside.clone(), pinned, outside, edge.clone()], from, to);

        let guids: Vec<_> = got.iter().map(|i| i.guid.as_str()).collect();
        assert_eq!(guids, vec![edge.guid.as_str(), inside.guid.as_str()]);
    }

    #[test]
    fn test_select_persistents() {
        let pinned = incident_at(1, true);
        let got = select_persistents(vec![incident_at(1, false), pinned.clone()]);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].guid, pinned.guid);
    }
}
