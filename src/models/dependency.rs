use std::collections::{HashSet, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::DependencyType;

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct ActionDependency {
    pub id: i64,
    pub action_id: i64,
    pub depends_on_action_id: i64,
    #[sqlx(try_from = "String")]
    pub dependency_type: DependencyType,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct NewDependency {
    pub depends_on_action_id: i64,
    #[serde(default)]
    pub dependency_type: DependencyType,
}

/// True when adding `action_id -> depends_on` to `edges` would close a cycle,
/// i.e. when `action_id` is already reachable from `depends_on`.
pub fn closes_cycle(edges: &[ActionDependency], action_id: i64, depends_on: i64) -> bool {
    if action_id == depends_on {
        return true;
    }

    let mut seen = HashSet::from([depends_on]);
    let mut frontier = VecDeque::from([depends_on]);
    while let Some(current) = frontier.pop_front() {
        for edge in edges.iter().filter(|e| e.action_id == current) {
            let next = edge.depends_on_action_id;
            if next == action_id {
                return true;
            }
            if seen.insert(next) {
                frontier.push_back(next);
            }
        }
    }
    false
}
