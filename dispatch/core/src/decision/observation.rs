//! Observation and Decision Types
//!
//! What an agent currently perceives, and the action chosen for it.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Action substituted whenever no usable decision is available
pub const DEFAULT_ACTION: &str = "explore";

/// Reason attached to substituted decisions
pub const DEFAULT_REASON: &str = "Looking around...";

/// Problems found when validating an observation
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ObservationError {
    /// `agent_id` was empty
    #[error("observation has an empty agent_id")]
    MissingAgentId,

    /// A coordinate or distance was NaN or infinite
    #[error("observation for {agent_id} has a non-finite {field}")]
    NonFinite {
        /// Offending agent
        agent_id: String,
        /// Field name
        field: &'static str,
    },

    /// Two observations in one batch share an `agent_id`
    #[error("duplicate agent_id in batch: {0}")]
    DuplicateAgent(String),
}

/// Another agent within view
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VisiblePeer {
    /// Display name
    pub name: String,
    /// Distance in world units
    pub distance: f64,
    /// Whether the peer is on the observer's team
    #[serde(default)]
    pub teammate: bool,
}

/// A point of interest within view
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PointOfInterest {
    /// Stable identifier
    pub id: String,
    /// Distance in world units
    pub distance: f64,
    /// Resolved points no longer influence decisions
    #[serde(default)]
    pub resolved: bool,
    /// Needs two agents cooperating
    #[serde(default)]
    pub teamwork: bool,
}

/// One agent's current situation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Stable agent identifier
    pub agent_id: String,
    /// Display name
    pub name: String,
    /// Team label
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team: Option<String>,
    /// World position `(x, y)`
    pub position: (f64, f64),
    /// Energy percentage
    #[serde(default)]
    pub energy: u32,
    /// Free-form state label
    #[serde(default)]
    pub state: String,
    /// Agents within view
    #[serde(default)]
    pub peers: Vec<VisiblePeer>,
    /// Points of interest within view
    #[serde(default)]
    pub points: Vec<PointOfInterest>,
}

impl Observation {
    /// Minimal observation at `position`
    pub fn new(agent_id: impl Into<String>, name: impl Into<String>, position: (f64, f64)) -> Self {
        Self {
            agent_id: agent_id.into(),
            name: name.into(),
            team: None,
            position,
            energy: 100,
            state: "idle".to_string(),
            peers: Vec::new(),
            points: Vec::new(),
        }
    }

    /// Set the team
    #[must_use]
    pub fn with_team(mut self, team: impl Into<String>) -> Self {
        self.team = Some(team.into());
        self
    }

    /// Add a visible peer
    #[must_use]
    pub fn with_peer(mut self, name: impl Into<String>, distance: f64, teammate: bool) -> Self {
        self.peers.push(VisiblePeer {
            name: name.into(),
            distance,
            teammate,
        });
        self
    }

    /// Add a point of interest
    #[must_use]
    pub fn with_point(mut self, id: impl Into<String>, distance: f64, resolved: bool) -> Self {
        self.points.push(PointOfInterest {
            id: id.into(),
            distance,
            resolved,
            teamwork: false,
        });
        self
    }

    /// Points of interest that are still open
    pub fn unresolved_points(&self) -> impl Iterator<Item = &PointOfInterest> {
        self.points.iter().filter(|p| !p.resolved)
    }

    /// Check the fields the dispatch layer relies on
    pub fn validate(&self) -> Result<(), ObservationError> {
        if self.agent_id.trim().is_empty() {
            return Err(ObservationError::MissingAgentId);
        }
        let non_finite = |field| ObservationError::NonFinite {
            agent_id: self.agent_id.clone(),
            field,
        };
        if !self.position.0.is_finite() || !self.position.1.is_finite() {
            return Err(non_finite("position"));
        }
        if self.points.iter().any(|p| !p.distance.is_finite()) {
            return Err(non_finite("point distance"));
        }
        if self.peers.iter().any(|p| !p.distance.is_finite()) {
            return Err(non_finite("peer distance"));
        }
        Ok(())
    }
}

/// Validate every observation and reject duplicate agent ids
pub fn validate_batch(observations: &[Observation]) -> Result<(), ObservationError> {
    let mut seen = std::collections::HashSet::new();
    for observation in observations {
        observation.validate()?;
        if !seen.insert(observation.agent_id.as_str()) {
            return Err(ObservationError::DuplicateAgent(observation.agent_id.clone()));
        }
    }
    Ok(())
}

/// The action chosen for one agent
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    /// Agent the decision is for
    pub agent_id: String,
    /// Agent name as echoed by the model
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_name: Option<String>,
    /// Action from the configured vocabulary
    pub action: String,
    /// Coordinates, an id, a name, or nothing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<serde_json::Value>,
    /// Short rationale
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Spoken line for social actions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Decision {
    /// The substitute decision used when nothing better is available
    pub fn fallback(observation: &Observation) -> Self {
        Self {
            agent_id: observation.agent_id.clone(),
            agent_name: Some(observation.name.clone()),
            action: DEFAULT_ACTION.to_string(),
            target: None,
            reason: Some(DEFAULT_REASON.to_string()),
            message: None,
        }
    }

    /// Whether this is the substitute decision
    #[must_use]
    pub fn is_fallback(&self) -> bool {
        self.action == DEFAULT_ACTION && self.reason.as_deref() == Some(DEFAULT_REASON)
    }
}

/// Decisions for a batch, in input order
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchResult {
    /// One decision per observation
    pub decisions: Vec<Decision>,
    /// `from_cache[i]` is true when `decisions[i]` was served from cache
    pub from_cache: Vec<bool>,
    /// Team strategy line, when the model offered one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<String>,
}

impl BatchResult {
    /// Number of decisions
    pub fn len(&self) -> usize {
        self.decisions.len()
    }

    /// Whether the batch was empty
    pub fn is_empty(&self) -> bool {
        self.decisions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observation_from_json_with_defaults() {
        let observation: Observation = serde_json::from_str(
            r#"{ "agent_id": "npc-1", "name": "Ada", "position": [120.0, 40.5] }"#,
        )
        .unwrap();
        assert_eq!(observation.position, (120.0, 40.5));
        assert_eq!(observation.energy, 0);
        assert!(observation.points.is_empty());
        assert!(observation.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_bad_input() {
        assert_eq!(
            Observation::new("  ", "x", (0.0, 0.0)).validate(),
            Err(ObservationError::MissingAgentId)
        );
        assert!(matches!(
            Observation::new("a", "x", (f64::NAN, 0.0)).validate(),
            Err(ObservationError::NonFinite { field: "position", .. })
        ));
        assert!(matches!(
            Observation::new("a", "x", (0.0, 0.0))
                .with_point("g1", f64::INFINITY, false)
                .validate(),
            Err(ObservationError::NonFinite { field: "point distance", .. })
        ));
    }

    #[test]
    fn test_batch_rejects_duplicates() {
        let batch = vec![
            Observation::new("a", "x", (0.0, 0.0)),
            Observation::new("a", "y", (1.0, 1.0)),
        ];
        assert_eq!(
            validate_batch(&batch),
            Err(ObservationError::DuplicateAgent("a".to_string()))
        );
    }

    #[test]
    fn test_unresolved_points_filter() {
        let observation = Observation::new("a", "x", (0.0, 0.0))
            .with_point("open", 10.0, false)
            .with_point("done", 5.0, true);
        let ids: Vec<&str> = observation.unresolved_points().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["open"]);
    }

    #[test]
    fn test_fallback_decision() {
        let decision = Decision::fallback(&Observation::new("npc-9", "Zed", (0.0, 0.0)));
        assert_eq!(decision.agent_id, "npc-9");
        assert_eq!(decision.action, "explore");
        assert_eq!(decision.reason.as_deref(), Some("Looking around..."));
        assert!(decision.is_fallback());
    }
}
