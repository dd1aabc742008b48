//! Team membership reconciliation helpers.
//!
//! Usernames are what callers configure; the Atlas team endpoints take user
//! ids. [`resolve_user_ids`] does the translation, and [`MembershipDelta`]
//! describes how a desired username set differs from the current one.

use std::collections::{BTreeSet, HashMap};

use tracing::{debug, warn};

use crate::client::{AtlasApi, AtlasUser};
use crate::error::ProviderError;

/// How a desired set of usernames differs from the current membership.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MembershipDelta {
    /// Desired but not currently members.
    pub to_add: BTreeSet<String>,
    /// Currently members but no longer desired.
    pub to_remove: BTreeSet<String>,
    /// Members in both sets.
    pub retained: BTreeSet<String>,
}

impl MembershipDelta {
    /// Compare `desired` against `current`.
    pub fn between<D, C>(desired: D, current: C) -> Self
    where
        D: IntoIterator,
        D::Item: AsRef<str>,
        C: IntoIterator,
        C::Item: AsRef<str>,
    {
        let desired: BTreeSet<String> = desired.into_iter().map(|u| u.as_ref().to_string()).collect();
        let current: BTreeSet<String> = current.into_iter().map(|u| u.as_ref().to_string()).collect();

        Self {
            to_add: desired.difference(&current).cloned().collect(),
            to_remove: current.difference(&desired).cloned().collect(),
            retained: desired.intersection(&current).cloned().collect(),
        }
    }

    /// Whether the two sets were equal.
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }
}

/// Index users by username.
pub fn index_by_username(users: &[AtlasUser]) -> HashMap<String, AtlasUser> {
    users
        .iter()
        .map(|u| (u.username.clone(), u.clone()))
        .collect()
}

/// Resolve each username to its Atlas user id, in input order.
///
/// A lookup rejected with 401 falls back to `cached`, the index of the team's
/// current members: Atlas can refuse to look up a user by name who is already
/// on the team. Any other failure, or a 401 for a user not in `cached`, stops
/// resolution with an error naming the user.
pub async fn resolve_user_ids(
    api: &dyn AtlasApi,
    usernames: &[String],
    cached: &HashMap<String, AtlasUser>,
) -> Result<Vec<String>, ProviderError> {
    let mut ids = Vec::with_capacity(usernames.len());

    for username in usernames {
        match api.get_user_by_name(username).await {
            Ok(user) => {
                debug!(username = %username, user_id = %user.id, "Resolved user");
                ids.push(user.id);
            },
            Err(err) if err.is_unauthorized() => match cached.get(username) {
                Some(user) => {
                    warn!(
                        username = %username,
                        user_id = %user.id,
                        "User lookup unauthorized; using current team membership"
                    );
                    ids.push(user.id.clone());
                },
                None => {
                    return Err(ProviderError::api(
                        format!("error getting user ({})", username),
                        err,
                    ))
                },
            },
            Err(err) => {
                return Err(ProviderError::api(
                    format!("error getting user ({})", username),
                    err,
                ))
            },
        }
    }

    Ok(ids)
}
