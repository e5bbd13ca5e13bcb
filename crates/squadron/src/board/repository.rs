//! Card and lane assignment repositories.

use anyhow::{Context, Result};
use serde_json::Value;
use sqlx::SqlitePool;
use uuid::Uuid;

use super::models::{Card, HumanReviewStatus, Lane, LaneAssignment};

/// All card columns for SELECT queries.
const CARD_COLUMNS: &str = r#"
    id, project_id, squad_id, lane, position, title, body, prd_path,
    issue_plan, issue_refs, pr_url,
    plan_agent_id, build_agent_id, review_agent_id,
    plan_session_id, build_session_id, review_session_id,
    build_worktree_name, build_worktree_path, build_branch, base_branch,
    ai_review, ai_review_session_id,
    human_review_status, human_review_feedback, human_reviewed_at,
    version, created_at, updated_at
"#;

/// Repository for card persistence.
#[derive(Debug, Clone)]
pub struct CardRepository {
    pool: SqlitePool,
}

impl CardRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a card at the bottom of the todo lane.
    pub async fn create(
        &self,
        project_id: &str,
        squad_id: &str,
        title: Option<&str>,
        body: &str,
    ) -> Result<Card> {
        let id = Uuid::new_v4().to_string();
        sqlx::query(
            r#"
            INSERT INTO cards (id, project_id, squad_id, lane, position, title, body)
            VALUES (
                ?, ?, ?, 'todo',
                (SELECT COALESCE(MAX(position) + 1, 0) FROM cards WHERE project_id = ? AND lane = 'todo'),
                ?, ?
            )
            "#,
        )
        .bind(&id)
        .bind(project_id)
        .bind(squad_id)
        .bind(project_id)
        .bind(title)
        .bind(body)
        .execute(&self.pool)
        .await
        .context("creating card")?;

        self.get(&id).await?.context("card missing after insert")
    }

    /// Get a card by ID.
    pub async fn get(&self, id: &str) -> Result<Option<Card>> {
        let query = format!("SELECT {} FROM cards WHERE id = ?", CARD_COLUMNS);
        let card = sqlx::query_as::<_, Card>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("fetching card")?;

        Ok(card)
    }

    /// List a project's cards in board order.
    pub async fn list_for_project(&self, project_id: &str) -> Result<Vec<Card>> {
        let query = format!(
            r#"
            SELECT {} FROM cards WHERE project_id = ?
            ORDER BY CASE lane
                WHEN 'todo' THEN 0 WHEN 'plan' THEN 1 WHEN 'build' THEN 2
                WHEN 'review' THEN 3 ELSE 4
            END, position ASC
            "#,
            CARD_COLUMNS
        );
        let cards = sqlx::query_as::<_, Card>(&query)
            .bind(project_id)
            .fetch_all(&self.pool)
            .await
            .context("listing cards for project")?;

        Ok(cards)
    }

    /// Find the non-done card claiming a worktree path, if any.
    pub async fn find_worktree_claim(&self, worktree_path: &str) -> Result<Option<Card>> {
        let query = format!(
            "SELECT {} FROM cards WHERE build_worktree_path = ? AND lane != 'done' LIMIT 1",
            CARD_COLUMNS
        );
        let card = sqlx::query_as::<_, Card>(&query)
            .bind(worktree_path)
            .fetch_optional(&self.pool)
            .await
            .context("finding worktree claim")?;

        Ok(card)
    }

    /// Move a card to a lane, guarded by the optimistic version. Returns
    /// false when the version lost a concurrent update.
    pub async fn move_to_lane(&self, id: &str, lane: Lane, expected_version: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE cards SET
                lane = ?,
                position = (SELECT COALESCE(MAX(c2.position) + 1, 0) FROM cards c2 WHERE c2.project_id = cards.project_id AND c2.lane = ?),
                version = version + 1,
                updated_at = datetime('now')
            WHERE id = ? AND version = ?
            "#,
        )
        .bind(lane.to_string())
        .bind(lane.to_string())
        .bind(id)
        .bind(expected_version)
        .execute(&self.pool)
        .await
        .context("moving card to lane")?;

        Ok(result.rows_affected() == 1)
    }

    /// Record the plan stage allocation.
    pub async fn set_plan_stage(&self, id: &str, agent_id: &str, session_id: &str) -> Result<()> {
        sqlx::query(
            "UPDATE cards SET plan_agent_id = ?, plan_session_id = ?, version = version + 1, updated_at = datetime('now') WHERE id = ?",
        )
        .bind(agent_id)
        .bind(session_id)
        .bind(id)
        .execute(&self.pool)
        .await
        .context("setting plan stage")?;

        Ok(())
    }

    /// Record the build stage allocation and worktree claim.
    #[allow(clippy::too_many_arguments)]
    pub async fn set_build_stage(
        &self,
        id: &str,
        agent_id: &str,
        session_id: &str,
        worktree_name: &str,
        worktree_path: &str,
        branch: &str,
        base_branch: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE cards SET
                build_agent_id = ?, build_session_id = ?,
                build_worktree_name = ?, build_worktree_path = ?,
                build_branch = ?, base_branch = ?,
                version = version + 1, updated_at = datetime('now')
            WHERE id = ?
            "#,
        )
        .bind(agent_id)
        .bind(session_id)
        .bind(worktree_name)
        .bind(worktree_path)
        .bind(branch)
        .bind(base_branch)
        .bind(id)
        .execute(&self.pool)
        .await
        .context("setting build stage")?;

        Ok(())
    }

    /// Record the review stage allocation.
    pub async fn set_review_stage(&self, id: &str, agent_id: &str, session_id: &str) -> Result<()> {
        sqlx::query(
            "UPDATE cards SET review_agent_id = ?, review_session_id = ?, ai_review_session_id = ?, version = version + 1, updated_at = datetime('now') WHERE id = ?",
        )
        .bind(agent_id)
        .bind(session_id)
        .bind(session_id)
        .bind(id)
        .execute(&self.pool)
        .await
        .context("setting review stage")?;

        Ok(())
    }

    /// Store the extracted issue plan and the reserved PRD path.
    pub async fn set_issue_plan(&self, id: &str, plan: &Value, prd_path: &str) -> Result<()> {
        sqlx::query(
            "UPDATE cards SET issue_plan = ?, prd_path = ?, version = version + 1, updated_at = datetime('now') WHERE id = ?",
        )
        .bind(plan.to_string())
        .bind(prd_path)
        .bind(id)
        .execute(&self.pool)
        .await
        .context("setting issue plan")?;

        Ok(())
    }

    /// Override the PRD path.
    pub async fn set_prd_path(&self, id: &str, prd_path: &str) -> Result<()> {
        sqlx::query(
            "UPDATE cards SET prd_path = ?, version = version + 1, updated_at = datetime('now') WHERE id = ?",
        )
        .bind(prd_path)
        .bind(id)
        .execute(&self.pool)
        .await
        .context("setting prd path")?;

        Ok(())
    }

    /// Store the build result.
    pub async fn set_build_result(&self, id: &str, pr_url: &str, issue_refs: &Value) -> Result<()> {
        sqlx::query(
            "UPDATE cards SET pr_url = ?, issue_refs = ?, version = version + 1, updated_at = datetime('now') WHERE id = ?",
        )
        .bind(pr_url)
        .bind(issue_refs.to_string())
        .bind(id)
        .execute(&self.pool)
        .await
        .context("setting build result")?;

        Ok(())
    }

    /// Store the AI review and open the human review gate.
    pub async fn set_ai_review(&self, id: &str, review: &Value) -> Result<()> {
        sqlx::query(
            "UPDATE cards SET ai_review = ?, human_review_status = 'pending', version = version + 1, updated_at = datetime('now') WHERE id = ?",
        )
        .bind(review.to_string())
        .bind(id)
        .execute(&self.pool)
        .await
        .context("setting ai review")?;

        Ok(())
    }

    /// Record the human verdict.
    pub async fn set_human_review(
        &self,
        id: &str,
        status: HumanReviewStatus,
        feedback: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE cards SET
                human_review_status = ?, human_review_feedback = ?,
                human_reviewed_at = datetime('now'),
                version = version + 1, updated_at = datetime('now')
            WHERE id = ?
            "#,
        )
        .bind(status.to_string())
        .bind(feedback)
        .bind(id)
        .execute(&self.pool)
        .await
        .context("setting human review")?;

        Ok(())
    }

    /// Reset a stage's session pointer on a reverse transition. The
    /// transcript survives for audit; only the pointer is cleared.
    pub async fn clear_stage_session(&self, id: &str, lane: Lane) -> Result<()> {
        let column = match lane {
            Lane::Plan => "plan_session_id",
            Lane::Build => "build_session_id",
            Lane::Review => "review_session_id",
            _ => return Ok(()),
        };
        let query = format!(
            "UPDATE cards SET {} = NULL, version = version + 1, updated_at = datetime('now') WHERE id = ?",
            column
        );
        sqlx::query(&query)
            .bind(id)
            .execute(&self.pool)
            .await
            .context("clearing stage session")?;

        Ok(())
    }

    /// Delete a card.
    pub async fn delete(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM cards WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .context("deleting card")?;

        Ok(())
    }
}

/// Repository for lane assignments.
#[derive(Debug, Clone)]
pub struct LaneAssignmentRepository {
    pool: SqlitePool,
}

impl LaneAssignmentRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// The agent assigned to a lane, if any.
    pub async fn get(
        &self,
        project_id: &str,
        squad_id: &str,
        lane: Lane,
    ) -> Result<Option<LaneAssignment>> {
        let assignment = sqlx::query_as::<_, LaneAssignment>(
            "SELECT project_id, squad_id, lane, agent_id FROM lane_assignments WHERE project_id = ? AND squad_id = ? AND lane = ?",
        )
        .bind(project_id)
        .bind(squad_id)
        .bind(lane.to_string())
        .fetch_optional(&self.pool)
        .await
        .context("fetching lane assignment")?;

        Ok(assignment)
    }

    /// All assignments for a squad.
    pub async fn list_for_squad(
        &self,
        project_id: &str,
        squad_id: &str,
    ) -> Result<Vec<LaneAssignment>> {
        let assignments = sqlx::query_as::<_, LaneAssignment>(
            "SELECT project_id, squad_id, lane, agent_id FROM lane_assignments WHERE project_id = ? AND squad_id = ? ORDER BY lane ASC",
        )
        .bind(project_id)
        .bind(squad_id)
        .fetch_all(&self.pool)
        .await
        .context("listing lane assignments")?;

        Ok(assignments)
    }

    /// Upsert a lane's agent.
    pub async fn set(
        &self,
        project_id: &str,
        squad_id: &str,
        lane: Lane,
        agent_id: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO lane_assignments (project_id, squad_id, lane, agent_id)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (project_id, squad_id, lane) DO UPDATE SET agent_id = excluded.agent_id
            "#,
        )
        .bind(project_id)
        .bind(squad_id)
        .bind(lane.to_string())
        .bind(agent_id)
        .execute(&self.pool)
        .await
        .context("setting lane assignment")?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::project::ProjectRepository;
    use crate::squad::SquadRepository;
    use serde_json::json;

    async fn seed(db: &Database) -> (String, String) {
        let projects = ProjectRepository::new(db.pool().clone());
        let squads = SquadRepository::new(db.pool().clone());
        let project = projects.create("p", "/tmp/p", json!({})).await.unwrap();
        let squad = squads.create(&project.id, "alpha", None).await.unwrap();
        (project.id, squad.id)
    }

    #[tokio::test]
    async fn test_card_positions_per_lane() {
        let db = Database::in_memory().await.unwrap();
        let (project_id, squad_id) = seed(&db).await;
        let repo = CardRepository::new(db.pool().clone());

        let a = repo
            .create(&project_id, &squad_id, Some("A"), "body a")
            .await
            .unwrap();
        let b = repo
            .create(&project_id, &squad_id, Some("B"), "body b")
            .await
            .unwrap();
        assert_eq!(a.position, 0);
        assert_eq!(b.position, 1);
        assert_eq!(a.lane, Lane::Todo);
    }

    #[tokio::test]
    async fn test_move_to_lane_version_guard() {
        let db = Database::in_memory().await.unwrap();
        let (project_id, squad_id) = seed(&db).await;
        let repo = CardRepository::new(db.pool().clone());

        let card = repo
            .create(&project_id, &squad_id, None, "body")
            .await
            .unwrap();

        assert!(repo.move_to_lane(&card.id, Lane::Plan, card.version).await.unwrap());
        // Stale version loses.
        assert!(!repo.move_to_lane(&card.id, Lane::Build, card.version).await.unwrap());

        let moved = repo.get(&card.id).await.unwrap().unwrap();
        assert_eq!(moved.lane, Lane::Plan);
    }

    #[tokio::test]
    async fn test_worktree_claim_lookup() {
        let db = Database::in_memory().await.unwrap();
        let (project_id, squad_id) = seed(&db).await;
        let repo = CardRepository::new(db.pool().clone());

        let card = repo
            .create(&project_id, &squad_id, None, "body")
            .await
            .unwrap();
        repo.set_build_stage(
            &card.id,
            "agent",
            "session",
            "alpha/card",
            "/tmp/p/.squads/worktrees/alpha/card",
            "squads/card",
            "main",
        )
        .await
        .unwrap();

        let claim = repo
            .find_worktree_claim("/tmp/p/.squads/worktrees/alpha/card")
            .await
            .unwrap();
        assert_eq!(claim.unwrap().id, card.id);
    }

    #[tokio::test]
    async fn test_lane_assignment_upsert() {
        let db = Database::in_memory().await.unwrap();
        let (project_id, squad_id) = seed(&db).await;
        let repo = LaneAssignmentRepository::new(db.pool().clone());

        repo.set(&project_id, &squad_id, Lane::Plan, Some("agent-1"))
            .await
            .unwrap();
        repo.set(&project_id, &squad_id, Lane::Plan, Some("agent-2"))
            .await
            .unwrap();

        let assignment = repo
            .get(&project_id, &squad_id, Lane::Plan)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(assignment.agent_id.as_deref(), Some("agent-2"));
        assert_eq!(repo.list_for_squad(&project_id, &squad_id).await.unwrap().len(), 1);
    }
}
