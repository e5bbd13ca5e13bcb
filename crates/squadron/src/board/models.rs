//! Board data models.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;

/// Pipeline lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lane {
    Todo,
    Plan,
    Build,
    Review,
    Done,
}

impl Lane {
    /// The next lane forward, if any.
    pub fn next(self) -> Option<Lane> {
        match self {
            Lane::Todo => Some(Lane::Plan),
            Lane::Plan => Some(Lane::Build),
            Lane::Build => Some(Lane::Review),
            Lane::Review => Some(Lane::Done),
            Lane::Done => None,
        }
    }

    /// Lanes that carry an agent assignment (everything but done).
    pub const ASSIGNABLE: &'static [Lane] = &[Lane::Todo, Lane::Plan, Lane::Build, Lane::Review];
}

impl std::fmt::Display for Lane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Lane::Todo => "todo",
            Lane::Plan => "plan",
            Lane::Build => "build",
            Lane::Review => "review",
            Lane::Done => "done",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for Lane {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "todo" => Ok(Lane::Todo),
            "plan" => Ok(Lane::Plan),
            "build" => Ok(Lane::Build),
            "review" => Ok(Lane::Review),
            "done" => Ok(Lane::Done),
            _ => Err(format!("unknown lane: {}", s)),
        }
    }
}

impl TryFrom<String> for Lane {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Human review verdict on a card in review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HumanReviewStatus {
    Pending,
    Approved,
    ChangesRequested,
}

impl std::fmt::Display for HumanReviewStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            HumanReviewStatus::Pending => "pending",
            HumanReviewStatus::Approved => "approved",
            HumanReviewStatus::ChangesRequested => "changes_requested",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for HumanReviewStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(HumanReviewStatus::Pending),
            "approved" => Ok(HumanReviewStatus::Approved),
            "changes_requested" => Ok(HumanReviewStatus::ChangesRequested),
            _ => Err(format!("unknown human review status: {}", s)),
        }
    }
}

/// AI reviewer recommendation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewRecommendation {
    Approve,
    RequestChanges,
    CommentOnly,
}

/// One issue in a plan artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedIssue {
    pub title: String,
    #[serde(default)]
    pub body_md: String,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

/// Plan-stage artifact: the issue plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssuePlan {
    pub issues: Vec<PlannedIssue>,
    #[serde(default)]
    pub repo: Option<String>,
    #[serde(default)]
    pub prd_path: Option<String>,
    #[serde(default)]
    pub questions: Vec<String>,
}

/// Build-stage artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildResult {
    pub pr_url: String,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub issues_closed: Vec<String>,
}

/// Review-stage artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiReview {
    pub recommendation: ReviewRecommendation,
    #[serde(default)]
    pub risk: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub findings: Vec<Value>,
}

/// A card.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Card {
    pub id: String,
    pub project_id: String,
    pub squad_id: String,
    #[sqlx(try_from = "String")]
    pub lane: Lane,
    pub position: i64,
    pub title: Option<String>,
    pub body: String,
    pub prd_path: Option<String>,
    #[sqlx(json(nullable))]
    pub issue_plan: Option<Value>,
    #[sqlx(json(nullable))]
    pub issue_refs: Option<Value>,
    pub pr_url: Option<String>,
    pub plan_agent_id: Option<String>,
    pub build_agent_id: Option<String>,
    pub review_agent_id: Option<String>,
    pub plan_session_id: Option<String>,
    pub build_session_id: Option<String>,
    pub review_session_id: Option<String>,
    pub build_worktree_name: Option<String>,
    pub build_worktree_path: Option<String>,
    pub build_branch: Option<String>,
    pub base_branch: Option<String>,
    #[sqlx(json(nullable))]
    pub ai_review: Option<Value>,
    pub ai_review_session_id: Option<String>,
    pub human_review_status: Option<String>,
    pub human_review_feedback: Option<String>,
    pub human_reviewed_at: Option<String>,
    /// Optimistic concurrency version.
    pub version: i64,
    pub created_at: String,
    pub updated_at: String,
}

impl Card {
    /// Parsed issue plan, when one has been extracted.
    pub fn parsed_issue_plan(&self) -> Option<IssuePlan> {
        self.issue_plan
            .as_ref()
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Parsed AI review, when one has been extracted.
    pub fn parsed_ai_review(&self) -> Option<AiReview> {
        self.ai_review
            .as_ref()
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// The session pointer for a stage lane.
    pub fn session_for_lane(&self, lane: Lane) -> Option<&str> {
        match lane {
            Lane::Plan => self.plan_session_id.as_deref(),
            Lane::Build => self.build_session_id.as_deref(),
            Lane::Review => self.review_session_id.as_deref(),
            _ => None,
        }
    }
}

/// Request to create a card.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateCardRequest {
    pub squad_id: String,
    #[serde(default)]
    pub title: Option<String>,
    pub body: String,
}

/// A lane's agent assignment within a squad.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct LaneAssignment {
    pub project_id: String,
    pub squad_id: String,
    #[sqlx(try_from = "String")]
    pub lane: Lane,
    pub agent_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lane_ordering_and_next() {
        assert!(Lane::Todo < Lane::Plan);
        assert_eq!(Lane::Todo.next(), Some(Lane::Plan));
        assert_eq!(Lane::Review.next(), Some(Lane::Done));
        assert_eq!(Lane::Done.next(), None);
    }

    #[test]
    fn test_recommendation_wire_form() {
        let review: AiReview = serde_json::from_str(
            r#"{"recommendation": "request_changes", "risk": "high", "findings": []}"#,
        )
        .unwrap();
        assert_eq!(review.recommendation, ReviewRecommendation::RequestChanges);
    }
}
