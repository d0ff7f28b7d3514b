//! Combined prompt construction and response parsing
//!
//! One prompt describes every agent in a batch, the permitted actions and a
//! JSON reply template. The reply is parsed back into one decision per agent.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::observation::{Decision, Observation};

/// One permitted action and how the model should express it
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionSpec {
    /// Action name as it appears in replies
    pub name: String,
    /// Example reply fragment and short description
    pub usage: String,
}

impl ActionSpec {
    /// Build a spec
    pub fn new(name: impl Into<String>, usage: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            usage: usage.into(),
        }
    }
}

/// The set of actions a decision may name
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionVocabulary {
    actions: Vec<ActionSpec>,
}

impl ActionVocabulary {
    /// Vocabulary from explicit specs
    pub fn new(actions: Vec<ActionSpec>) -> Self {
        Self { actions }
    }

    /// Vocabulary from bare names, with generic usage lines
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            names
                .into_iter()
                .map(|name| {
                    let name = name.into();
                    let usage = format!(r#"{{"action":"{name}","target":...,"reason":"..."}}"#);
                    ActionSpec::new(name, usage)
                })
                .collect(),
        )
    }

    /// Whether `action` is permitted
    pub fn contains(&self, action: &str) -> bool {
        self.actions.iter().any(|a| a.name == action)
    }

    /// Action names in declaration order
    pub fn names(&self) -> Vec<&str> {
        self.actions.iter().map(|a| a.name.as_str()).collect()
    }

    /// Action specs in declaration order
    pub fn actions(&self) -> &[ActionSpec] {
        &self.actions
    }
}

impl Default for ActionVocabulary {
    fn default() -> Self {
        Self::new(vec![
            ActionSpec::new(
                "move",
                r#"{"action":"move","target":[x,y],"reason":"..."} - Move to coordinates"#,
            ),
            ActionSpec::new(
                "challenge",
                r#"{"action":"challenge","target":"point_id","reason":"..."} - Attempt a nearby point of interest"#,
            ),
            ActionSpec::new(
                "talk",
                r#"{"action":"talk","target":"agent_name","message":"..."} - Talk to a nearby agent"#,
            ),
            ActionSpec::new(
                "taunt",
                r#"{"action":"taunt","target":"agent_name","message":"..."} - Taunt a rival"#,
            ),
            ActionSpec::new(
                "wait",
                r#"{"action":"wait","target":null,"reason":"..."} - Stay and wait"#,
            ),
            ActionSpec::new(
                "explore",
                r#"{"action":"explore","target":null,"reason":"..."} - Wander and look around"#,
            ),
        ])
    }
}

// ============================================================================
// Prompt Builder
// ============================================================================

/// Builds the combined multi-agent prompt
#[derive(Clone, Debug, Default)]
pub struct PromptBuilder {
    vocabulary: ActionVocabulary,
}

impl PromptBuilder {
    /// Builder using `vocabulary`
    pub fn new(vocabulary: ActionVocabulary) -> Self {
        Self { vocabulary }
    }

    /// The permitted actions
    pub fn vocabulary(&self) -> &ActionVocabulary {
        &self.vocabulary
    }

    /// Prompt covering every observation, in order
    pub fn build(&self, observations: &[&Observation]) -> String {
        let mut lines: Vec<String> = vec![
            format!(
                "You control {} agents in a shared simulation. Choose the best next action for ALL of them.",
                observations.len()
            ),
            String::new(),
            "## YOUR AGENTS".to_string(),
            String::new(),
        ];

        for (i, obs) in observations.iter().enumerate() {
            lines.push(format!("### Agent {}: {}", i + 1, obs.name));
            lines.push(format!(
                "- Team: {} | Pos: ({:.0}, {:.0}) | Energy: {}% | State: {}",
                obs.team.as_deref().unwrap_or("none"),
                obs.position.0,
                obs.position.1,
                obs.energy,
                obs.state
            ));

            let points: Vec<String> = obs
                .unresolved_points()
                .map(|p| {
                    let teamwork = if p.teamwork { " [2P]" } else { "" };
                    format!("{}:{:.0}u{}", p.id, p.distance, teamwork)
                })
                .collect();
            if !points.is_empty() {
                lines.push(format!("- Points: {}", points.join(", ")));
            }

            let peers: Vec<String> = obs
                .peers
                .iter()
                .map(|p| {
                    let marker = if p.teammate { "ally" } else { "rival" };
                    format!("[{marker}]{}:{:.0}u", p.name, p.distance)
                })
                .collect();
            if !peers.is_empty() {
                lines.push(format!("- Nearby: {}", peers.join(", ")));
            }
            lines.push(String::new());
        }

        lines.push("## AVAILABLE ACTIONS".to_string());
        for action in self.vocabulary.actions() {
            lines.push(format!("- {}: {}", action.name, action.usage));
        }
        lines.push(String::new());

        lines.push("## RESPOND WITH JSON ONLY".to_string());
        lines.push("```json".to_string());
        lines.push("{".to_string());
        lines.push("  \"decisions\": [".to_string());
        for (i, obs) in observations.iter().enumerate() {
            let comma = if i + 1 == observations.len() { "" } else { "," };
            lines.push(format!(
                r#"    {{"agent_id":{},"agent":{},"action":"...","target":...,"reason":"..."}}{comma}"#,
                json_string(&obs.agent_id),
                json_string(&obs.name),
            ));
        }
        lines.push("  ],".to_string());
        lines.push("  \"strategy\": \"Brief team strategy (optional)\"".to_string());
        lines.push("}".to_string());
        lines.push("```".to_string());

        lines.join("\n")
    }
}

fn json_string(value: &str) -> String {
    Value::String(value.to_string()).to_string()
}

// ============================================================================
// Response Parsing
// ============================================================================

/// Keys a model may use for the agent id, preferred first
const ID_KEYS: [&str; 2] = ["agent_id", "npc_id"];
/// Keys a model may use for the agent name, preferred first
const NAME_KEYS: [&str; 3] = ["agent", "npc", "name"];

/// One reply entry, read field by field so a malformed entry never spoils
/// its neighbours
#[derive(Debug, Default)]
struct RawDecision {
    agent_id: Option<String>,
    agent: Option<String>,
    action: Option<String>,
    target: Option<Value>,
    reason: Option<String>,
    message: Option<String>,
}

impl RawDecision {
    fn from_value(entry: &Value) -> Option<Self> {
        let object = entry.as_object()?;
        let text = |key: &str| object.get(key).and_then(Value::as_str).map(str::to_string);
        let first_text = |keys: &[&str]| keys.iter().find_map(|&key| text(key));

        Some(Self {
            agent_id: first_text(&ID_KEYS),
            agent: first_text(&NAME_KEYS),
            action: text("action"),
            target: object.get("target").filter(|t| !t.is_null()).cloned(),
            reason: text("reason"),
            message: text("message"),
        })
    }
}

/// A parsed reply
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ParsedReply {
    /// Per observation: the model's decision, or `None` when missing or invalid
    pub decisions: Vec<Option<Decision>>,
    /// Team strategy line
    pub strategy: Option<String>,
}

/// Extract one decision per observation from a model reply.
///
/// The JSON object is taken from the first `{` to the last `}`, so prose or
/// code fences around it are ignored. Each entry of `decisions` is read on its
/// own; entries that are not objects, or whose fields have the wrong type,
/// are skipped without affecting the rest. Decisions are matched to
/// observations by agent id first, then by name. Decisions naming an action
/// outside `vocabulary` are discarded.
pub fn parse_reply(
    reply: &str,
    observations: &[&Observation],
    vocabulary: &ActionVocabulary,
) -> ParsedReply {
    let unmatched = || ParsedReply {
        decisions: vec![None; observations.len()],
        strategy: None,
    };

    let (Some(start), Some(end)) = (reply.find('{'), reply.rfind('}')) else {
        tracing::warn!("no JSON object in batch reply");
        return unmatched();
    };
    if end < start {
        tracing::warn!("no JSON object in batch reply");
        return unmatched();
    }

    let root: Value = match serde_json::from_str(&reply[start..=end]) {
        Ok(root) => root,
        Err(e) => {
            tracing::warn!(error = %e, "failed to parse batch reply");
            return unmatched();
        }
    };

    let entries = root
        .get("decisions")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    let raw: Vec<RawDecision> = entries.iter().filter_map(RawDecision::from_value).collect();
    if raw.len() < entries.len() {
        tracing::warn!(
            skipped = entries.len() - raw.len(),
            "ignoring malformed decision entries"
        );
    }

    let decisions = observations
        .iter()
        .map(|obs| {
            let matched = raw
                .iter()
                .find(|d| d.agent_id.as_deref() == Some(obs.agent_id.as_str()))
                .or_else(|| raw.iter().find(|d| d.agent.as_deref() == Some(obs.name.as_str())))?;

            let action = matched.action.as_deref()?;
            if !vocabulary.contains(action) {
                tracing::warn!(agent = %obs.agent_id, action, "action outside vocabulary");
                return None;
            }

            Some(Decision {
                agent_id: obs.agent_id.clone(),
                agent_name: Some(obs.name.clone()),
                action: action.to_string(),
                target: matched.target.clone(),
                reason: matched.reason.clone(),
                message: matched.message.clone(),
            })
        })
        .collect();

    let strategy = root
        .get("strategy")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    ParsedReply {
        decisions,
        strategy,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn agents() -> Vec<Observation> {
        vec![
            Observation::new("npc-1", "Ada", (120.4, 40.6))
                .with_team("red")
                .with_point("g1", 130.0, false)
                .with_point("g2", 20.0, true)
                .with_peer("Bob", 12.0, true),
            Observation::new("npc-2", "Bob", (0.0, 0.0)).with_peer("Eve", 30.0, false),
        ]
    }

    #[test]
    fn test_prompt_lists_every_agent() {
        let agents = agents();
        let refs: Vec<&Observation> = agents.iter().collect();
        let prompt = PromptBuilder::default().build(&refs);

        assert!(prompt.starts_with("You control 2 agents"));
        assert!(prompt.contains("### Agent 1: Ada"));
        assert!(prompt.contains("- Team: red | Pos: (120, 41) | Energy: 100% | State: idle"));
        assert!(prompt.contains("- Points: g1:130u\n"));
        assert!(!prompt.contains("g2:"));
        assert!(prompt.contains("[ally]Bob:12u"));
        assert!(prompt.contains("[rival]Eve:30u"));
        assert!(prompt.contains("- explore: "));
        assert!(prompt.contains(r#"{"agent_id":"npc-1","agent":"Ada","action":"...","target":...,"reason":"..."},"#));
        assert!(prompt.contains(r#"{"agent_id":"npc-2","agent":"Bob","action":"...","target":...,"reason":"..."}"#));
    }

    #[test]
    fn test_custom_vocabulary_in_prompt() {
        let agents = agents();
        let refs: Vec<&Observation> = agents.iter().collect();
        let prompt = PromptBuilder::new(ActionVocabulary::from_names(["dig", "rest"])).build(&refs);
        assert!(prompt.contains(r#"- dig: {"action":"dig","target":...,"reason":"..."}"#));
        assert!(!prompt.contains("- move:"));
    }

    #[test]
    fn test_full_prompt_layout() {
        let solo = Observation::new("npc-9", "Zed", (3.0, 4.0));
        let prompt = PromptBuilder::new(ActionVocabulary::from_names(["rest"])).build(&[&solo]);

        let expected = [
            "You control 1 agents in a shared simulation. Choose the best next action for ALL of them.",
            "",
            "## YOUR AGENTS",
            "",
            "### Agent 1: Zed",
            "- Team: none | Pos: (3, 4) | Energy: 100% | State: idle",
            "",
            "## AVAILABLE ACTIONS",
            r#"- rest: {"action":"rest","target":...,"reason":"..."}"#,
            "",
            "## RESPOND WITH JSON ONLY",
            "```json",
            "{",
            r#"  "decisions": ["#,
            r#"    {"agent_id":"npc-9","agent":"Zed","action":"...","target":...,"reason":"..."}"#,
            "  ],",
            r#"  "strategy": "Brief team strategy (optional)""#,
            "}",
            "```",
        ]
        .join("\n");
        assert_eq!(prompt, expected);
    }

    #[test]
    fn test_parse_matches_by_id_then_name() {
        let agents = agents();
        let refs: Vec<&Observation> = agents.iter().collect();
        let reply = r#"Sure! Here you go:
```json
{
  "decisions": [
    {"agent":"Bob","action":"taunt","target":"Eve","message":"Too slow!"},
    {"agent_id":"npc-1","agent":"Ada","action":"move","target":[150,60],"reason":"closer to g1"}
  ],
  "strategy": "Ada pushes g1"
}
```"#;

        let parsed = parse_reply(reply, &refs, &ActionVocabulary::default());
        assert_eq!(parsed.strategy.as_deref(), Some("Ada pushes g1"));

        let ada = parsed.decisions[0].as_ref().unwrap();
        assert_eq!(ada.agent_id, "npc-1");
        assert_eq!(ada.action, "move");
        assert_eq!(ada.target, Some(json!([150, 60])));

        let bob = parsed.decisions[1].as_ref().unwrap();
        assert_eq!(bob.agent_id, "npc-2");
        assert_eq!(bob.message.as_deref(), Some("Too slow!"));
    }

    #[test]
    fn test_parse_rejects_unknown_action_and_missing_agent() {
        let agents = agents();
        let refs: Vec<&Observation> = agents.iter().collect();
        let reply = r#"{"decisions":[{"agent_id":"npc-1","action":"fly"}]}"#;

        let parsed = parse_reply(reply, &refs, &ActionVocabulary::default());
        assert_eq!(parsed.decisions, vec![None, None]);
    }

    #[test]
    fn test_parse_garbage() {
        let agents = agents();
        let refs: Vec<&Observation> = agents.iter().collect();
        for reply in ["no json here", "} backwards {", "{ not: valid }"] {
            let parsed = parse_reply(reply, &refs, &ActionVocabulary::default());
            assert_eq!(parsed.decisions.len(), 2);
            assert!(parsed.decisions.iter().all(Option::is_none));
        }
    }

    #[test]
    fn test_malformed_entry_does_not_spoil_batch() {
        let agents = agents();
        let refs: Vec<&Observation> = agents.iter().collect();
        let reply = r#"{"decisions":[{"agent_id":"npc-1","action":"wait"},{"agent_id":7,"action":"move"}]}"#;

        let parsed = parse_reply(reply, &refs, &ActionVocabulary::default());
        assert_eq!(parsed.decisions[0].as_ref().unwrap().action, "wait");
        assert_eq!(parsed.decisions[1], None);
    }

    #[test]
    fn test_wrongly_typed_fields_are_tolerated() {
        let agents = agents();
        let refs: Vec<&Observation> = agents.iter().collect();
        let reply = r#"{"decisions":[
            "not an object",
            {"agent_id":"npc-1","action":"wait","reason":42},
            {"agent":"Bob","npc":"Robert","action":"talk","message":"hi"}
        ],"strategy":17}"#;

        let parsed = parse_reply(reply, &refs, &ActionVocabulary::default());
        let ada = parsed.decisions[0].as_ref().unwrap();
        assert_eq!(ada.action, "wait");
        assert_eq!(ada.reason, None);
        let bob = parsed.decisions[1].as_ref().unwrap();
        assert_eq!(bob.action, "talk");
        assert_eq!(bob.message.as_deref(), Some("hi"));
        assert_eq!(parsed.strategy, None);
    }

    #[test]
    fn test_legacy_npc_keys_accepted() {
        let agents = agents();
        let refs: Vec<&Observation> = agents.iter().collect();
        let reply = r#"{"decisions":[{"npc_id":"npc-2","npc":"Bob","action":"wait","target":null}]}"#;
        let parsed = parse_reply(reply, &refs, &ActionVocabulary::default());
        let bob = parsed.decisions[1].as_ref().unwrap();
        assert_eq!(bob.action, "wait");
        assert_eq!(bob.target, None);
    }
}
