use serde::{Deserialize, Serialize};

use crate::domain::{Post, PostId};

/// What a subscriber saw for one entity at one instant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntitySnapshot {
    pub post: Post,
    pub pending: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderSnapshot {
    pub order: Vec<PostId>,
    pub pending: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ReportEntry {
    Entity(EntitySnapshot),
    Order(OrderSnapshot),
    Note(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScenarioReport {
    pub scenario: String,
    pub entries: Vec<ReportEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_posts: Option<Vec<Post>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_order: Option<Vec<PostId>>,
}

impl ScenarioReport {
    pub fn new(scenario: impl Into<String>) -> Self {
        Self {
            scenario: scenario.into(),
            ..Self::default()
        }
    }

    pub fn push(&mut self, entry: ReportEntry) {
        self.entries.push(entry);
    }

    pub fn note(&mut self, note: impl Into<String>) {
        self.entries.push(ReportEntry::Note(note.into()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::UserId;

    #[test]
    fn report_entries_use_tagged_representation() {
        let mut report = ScenarioReport::new("toggle");
        report.push(ReportEntry::Order(OrderSnapshot {
            order: vec![PostId(2), PostId(1)],
            pending: true,
        }));
        report.note("first confirmation failed");

        let json = serde_json::to_value(&report).expect("serialize");
        assert_eq!(json["scenario"], "toggle");
        assert_eq!(json["entries"][0]["type"], "order");
        assert_eq!(json["entries"][0]["payload"]["order"][0], 2);
        assert_eq!(json["entries"][1]["type"], "note");
        assert!(json.get("final_posts").is_none());
    }

    #[test]
    fn entity_snapshot_omits_absent_error() {
        let snapshot = EntitySnapshot {
            post: Post::new(PostId(1), UserId(7), "hello"),
            pending: false,
            error: None,
        };
        let json = serde_json::to_string(&snapshot).expect("serialize");
        assert!(!json.contains("error"));

        let back: EntitySnapshot = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back.post.title, "hello");
    }
}
