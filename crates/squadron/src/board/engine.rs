//! Board engine: drives cards through the pipeline.
//!
//! Forward transitions spawn a stage session on the orchestrator, send the
//! stage prompt, and only then move the card, so a dispatch failure leaves
//! the board untouched. A watcher task polls the stage session until it
//! terminates and extracts the stage artifact from its transcript.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use serde_json::json;

use squadron_protocol::SessionMode;

use crate::agent::{Agent, AgentRepository};
use crate::bus::EventBus;
use crate::error::{Error, Result};
use crate::events::{kind, EventRecord, EventRepository};
use crate::project::{Project, ProjectRepository};
use crate::session::{SessionOrchestrator, SessionRepository, StartSessionRequest, TranscriptRepository};
use crate::squad::SquadRepository;
use crate::wordlist;

use super::extract::{extract_ai_review, extract_build_result, extract_issue_plan};
use super::models::{Card, CreateCardRequest, HumanReviewStatus, Lane, ReviewRecommendation};
use super::prompts;
use super::repository::{CardRepository, LaneAssignmentRepository};
use super::worktree::provision_worktree;

/// Engine timers.
#[derive(Debug, Clone)]
pub struct BoardEngineConfig {
    /// Interval at which stage watchers poll their session.
    pub poll_interval: Duration,
}

impl Default for BoardEngineConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
        }
    }
}

/// The board engine.
pub struct BoardEngine {
    config: BoardEngineConfig,
    cards: CardRepository,
    lanes: LaneAssignmentRepository,
    agents: AgentRepository,
    squads: SquadRepository,
    sessions: SessionRepository,
    transcripts: TranscriptRepository,
    projects: ProjectRepository,
    events: EventRepository,
    orchestrator: Arc<SessionOrchestrator>,
    bus: EventBus,
}

impl BoardEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: BoardEngineConfig,
        cards: CardRepository,
        lanes: LaneAssignmentRepository,
        agents: AgentRepository,
        squads: SquadRepository,
        sessions: SessionRepository,
        transcripts: TranscriptRepository,
        projects: ProjectRepository,
        events: EventRepository,
        orchestrator: Arc<SessionOrchestrator>,
        bus: EventBus,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            cards,
            lanes,
            agents,
            squads,
            sessions,
            transcripts,
            projects,
            events,
            orchestrator,
            bus,
        })
    }

    // ========================================================================
    // Card operations
    // ========================================================================

    pub async fn create_card(
        &self,
        project_id: &str,
        request: CreateCardRequest,
    ) -> Result<Card> {
        let squad = self
            .squads
            .get(&request.squad_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("squad {}", request.squad_id)))?;
        if squad.project_id != project_id {
            return Err(Error::validation("squad belongs to a different project"));
        }
        if request.body.trim().is_empty() {
            return Err(Error::validation("card body must not be empty"));
        }

        let card = self
            .cards
            .create(project_id, &request.squad_id, request.title.as_deref(), &request.body)
            .await?;

        self.emit(
            project_id,
            kind::TICKET_CREATED,
            json!({"card_id": card.id, "lane": card.lane}),
        )
        .await;
        Ok(card)
    }

    pub async fn list(&self, project_id: &str) -> Result<Vec<Card>> {
        Ok(self.cards.list_for_project(project_id).await?)
    }

    pub async fn get(&self, card_id: &str) -> Result<Card> {
        self.cards
            .get(card_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("card {}", card_id)))
    }

    /// Advance (or retreat) a card between lanes.
    pub async fn advance(self: &Arc<Self>, card_id: &str, from: Lane, to: Lane) -> Result<Card> {
        let card = self.get(card_id).await?;
        if card.lane != from {
            return Err(Error::Conflict(format!(
                "card {} is in lane {}, not {}",
                card_id, card.lane, from
            )));
        }

        if to < from {
            // Reverse transition: reset the abandoned stage's session
            // pointer, keep its transcript for audit.
            self.cards.clear_stage_session(card_id, from).await?;
            let card = self.get(card_id).await?;
            if !self.cards.move_to_lane(card_id, to, card.version).await? {
                return Err(Error::Conflict(format!("card {} changed concurrently", card_id)));
            }
            let card = self.get(card_id).await?;
            self.emit(
                &card.project_id,
                kind::TICKET_UPDATED,
                json!({"card_id": card_id, "lane": to}),
            )
            .await;
            return Ok(card);
        }

        if from.next() != Some(to) {
            return Err(Error::validation(format!(
                "cannot advance from {} to {}",
                from, to
            )));
        }

        match to {
            Lane::Plan => self.promote_to_plan(&card).await?,
            Lane::Build => self.promote_to_build(&card).await?,
            Lane::Review => self.promote_to_review(&card).await?,
            Lane::Done => self.promote_to_done(&card).await?,
            Lane::Todo => unreachable!("todo has no forward predecessor"),
        }

        let card = self.get(card_id).await?;
        self.emit(
            &card.project_id,
            kind::TICKET_UPDATED,
            json!({"card_id": card_id, "lane": card.lane}),
        )
        .await;
        Ok(card)
    }

    /// Record the human verdict on a card in review.
    pub async fn set_human_review(
        &self,
        card_id: &str,
        status: HumanReviewStatus,
        feedback: Option<String>,
    ) -> Result<Card> {
        let card = self.get(card_id).await?;

        if status == HumanReviewStatus::Approved {
            let ai_ok = card
                .parsed_ai_review()
                .map(|review| {
                    matches!(
                        review.recommendation,
                        ReviewRecommendation::Approve | ReviewRecommendation::CommentOnly
                    )
                })
                .unwrap_or(false);
            let override_ok = feedback
                .as_deref()
                .map(|f| !f.trim().is_empty())
                .unwrap_or(false);
            if !ai_ok && !override_ok {
                return Err(Error::validation(
                    "approving against the AI recommendation requires non-empty feedback",
                ));
            }
        }

        self.cards
            .set_human_review(card_id, status, feedback.as_deref())
            .await?;
        let card = self.get(card_id).await?;
        self.emit(
            &card.project_id,
            kind::TICKET_UPDATED,
            json!({"card_id": card_id, "human_review_status": status}),
        )
        .await;
        Ok(card)
    }

    /// Override the card's PRD location.
    pub async fn set_prd_path(&self, card_id: &str, prd_path: &str) -> Result<Card> {
        if prd_path.trim().is_empty() {
            return Err(Error::validation("prd_path must not be empty"));
        }
        self.get(card_id).await?;
        self.cards.set_prd_path(card_id, prd_path).await?;
        self.get(card_id).await
    }

    /// Retry artifact extraction for a stage whose session has completed.
    /// This is the operator affordance behind `extraction_failed`.
    pub async fn extract_now(&self, card_id: &str, lane: Lane) -> Result<Card> {
        let card = self.get(card_id).await?;
        self.apply_extraction(&card, lane).await?;
        self.get(card_id).await
    }

    // ========================================================================
    // Forward transitions
    // ========================================================================

    async fn promote_to_plan(self: &Arc<Self>, card: &Card) -> Result<()> {
        let project = self.get_project(&card.project_id).await?;

        // Reserve the PRD location before the card enters the plan lane;
        // cards in plan or later always point at an existing file.
        let prd_rel = format!(".squads/prds/{}.md", card.id);
        let prd_abs = Path::new(&project.path).join(&prd_rel);
        write_prd_placeholder(&prd_abs, card)?;
        self.cards.set_prd_path(&card.id, &prd_rel).await?;

        let agent = self.allocate_agent(&card.project_id, &card.squad_id, Lane::Plan).await?;
        let session = self
            .orchestrator
            .start(StartSessionRequest {
                agent_id: agent.id.clone(),
                ticket_key: Some(card.id.clone()),
                title: card.title.clone(),
                worktree_path: None,
                branch: None,
                base_branch: None,
                model: None,
                mode: Some(SessionMode::Plan),
                metadata: Some(json!({"card_id": card.id, "stage": "plan"})),
            })
            .await?;
        self.cards.set_plan_stage(&card.id, &agent.id, &session.id).await?;

        let prompt = prompts::plan_prompt(
            &project.name,
            &project.path,
            card.title.as_deref().unwrap_or("Untitled card"),
            &card.body,
            &prd_rel,
        );
        self.dispatch_stage(card, &session.id, &prompt, SessionMode::Plan, Lane::Plan)
            .await
    }

    async fn promote_to_build(self: &Arc<Self>, card: &Card) -> Result<()> {
        let plan = card
            .parsed_issue_plan()
            .filter(|plan| !plan.issues.is_empty())
            .ok_or_else(|| {
                Error::LanePrecondition(format!(
                    "card {} has no confirmed issue plan",
                    card.id
                ))
            })?;

        let project = self.get_project(&card.project_id).await?;
        let squad = self
            .squads
            .get(&card.squad_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("squad {}", card.squad_id)))?;

        let squad_slug = wordlist::slugify(&squad.name);
        let card_slug = card
            .title
            .as_deref()
            .map(wordlist::slugify)
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| card.id.chars().take(8).collect());
        let base_branch = card
            .base_branch
            .clone()
            .or_else(|| {
                project.config["default_branch"]
                    .as_str()
                    .map(str::to_owned)
            })
            .unwrap_or_else(|| "main".to_string());

        // Refuse to start a second build against a claimed path.
        let path = Path::new(&project.path)
            .join(".squads")
            .join("worktrees")
            .join(&squad_slug)
            .join(&card_slug);
        if let Some(claim) = self
            .cards
            .find_worktree_claim(&path.display().to_string())
            .await?
        {
            if claim.id != card.id {
                return Err(Error::WorktreeClaimed(path.display().to_string()));
            }
        }

        let worktree =
            provision_worktree(Path::new(&project.path), &squad_slug, &card_slug, &base_branch)
                .await?;

        let agent = self.allocate_agent(&card.project_id, &card.squad_id, Lane::Build).await?;
        let session = self
            .orchestrator
            .start(StartSessionRequest {
                agent_id: agent.id.clone(),
                ticket_key: Some(card.id.clone()),
                title: card.title.clone(),
                worktree_path: Some(worktree.path.display().to_string()),
                branch: Some(worktree.branch.clone()),
                base_branch: Some(base_branch.clone()),
                model: None,
                mode: Some(SessionMode::Build),
                metadata: Some(json!({"card_id": card.id, "stage": "build"})),
            })
            .await?;
        self.cards
            .set_build_stage(
                &card.id,
                &agent.id,
                &session.id,
                &worktree.name,
                &worktree.path.display().to_string(),
                &worktree.branch,
                &base_branch,
            )
            .await?;

        let prompt = prompts::build_prompt(
            &worktree.path.display().to_string(),
            &worktree.branch,
            &base_branch,
            card.prd_path.as_deref().unwrap_or(""),
            &serde_json::to_string_pretty(&plan).unwrap_or_default(),
        );
        self.dispatch_stage(card, &session.id, &prompt, SessionMode::Build, Lane::Build)
            .await
    }

    async fn promote_to_review(self: &Arc<Self>, card: &Card) -> Result<()> {
        let pr_url = card.pr_url.clone().ok_or_else(|| {
            Error::LanePrecondition(format!("card {} has no pull request yet", card.id))
        })?;

        let agent = self.allocate_agent(&card.project_id, &card.squad_id, Lane::Review).await?;
        let session = self
            .orchestrator
            .start(StartSessionRequest {
                agent_id: agent.id.clone(),
                ticket_key: Some(card.id.clone()),
                title: card.title.clone(),
                worktree_path: None,
                branch: None,
                base_branch: None,
                model: None,
                mode: Some(SessionMode::Plan),
                metadata: Some(json!({"card_id": card.id, "stage": "review"})),
            })
            .await?;
        self.cards.set_review_stage(&card.id, &agent.id, &session.id).await?;

        let prompt = prompts::review_prompt(
            &pr_url,
            card.prd_path.as_deref().unwrap_or(""),
            card.title.as_deref().unwrap_or("Untitled card"),
        );
        self.dispatch_stage(card, &session.id, &prompt, SessionMode::Plan, Lane::Review)
            .await
    }

    async fn promote_to_done(&self, card: &Card) -> Result<()> {
        let approved = card.human_review_status.as_deref() == Some("approved");
        if !approved {
            return Err(Error::LanePrecondition(format!(
                "card {} has not been approved by a human reviewer",
                card.id
            )));
        }
        let card = self.get(&card.id).await?;
        if !self.cards.move_to_lane(&card.id, Lane::Done, card.version).await? {
            return Err(Error::Conflict(format!("card {} changed concurrently", card.id)));
        }
        Ok(())
    }

    /// Send the stage prompt; on success move the card and start the
    /// completion watcher. A dispatch failure stops the stage session and
    /// leaves the card in its current lane.
    async fn dispatch_stage(
        self: &Arc<Self>,
        card: &Card,
        session_id: &str,
        prompt: &str,
        mode: SessionMode,
        lane: Lane,
    ) -> Result<()> {
        if let Err(e) = self
            .orchestrator
            .send_prompt(session_id, prompt, Some(mode), None, false)
            .await
        {
            let _ = self.orchestrator.stop(session_id, Some("stage dispatch failed")).await;
            return Err(e);
        }

        let fresh = self.get(&card.id).await?;
        if !self.cards.move_to_lane(&card.id, lane, fresh.version).await? {
            return Err(Error::Conflict(format!("card {} changed concurrently", card.id)));
        }

        self.spawn_stage_watcher(card.id.clone(), session_id.to_string(), lane);
        Ok(())
    }

    // ========================================================================
    // Stage completion
    // ========================================================================

    /// Poll the stage session until it terminates, then extract.
    fn spawn_stage_watcher(self: &Arc<Self>, card_id: String, session_id: String, lane: Lane) {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let mut pr_follow_up_sent = false;
            loop {
                tokio::time::sleep(engine.config.poll_interval).await;
                let session = match engine.sessions.get(&session_id).await {
                    Ok(Some(session)) => session,
                    Ok(None) => return,
                    Err(e) => {
                        warn!("Stage watcher for card {}: {:#}", card_id, e);
                        continue;
                    }
                };

                if session.status.is_active() {
                    continue;
                }

                if session.status != crate::session::SessionStatus::Completed {
                    info!(
                        "Stage session {} for card {} ended as {}",
                        session_id, card_id, session.status
                    );
                    return;
                }

                let card = match engine.cards.get(&card_id).await {
                    Ok(Some(card)) => card,
                    _ => return,
                };
                match engine.apply_extraction(&card, lane).await {
                    Ok(()) => {
                        info!("Stage {} artifact stored for card {}", lane, card_id);
                        return;
                    }
                    Err(Error::ExtractionFailed(_)) if lane == Lane::Build && !pr_follow_up_sent => {
                        // The build finished without declaring a PR; nudge
                        // the agent once to open it, then keep watching.
                        pr_follow_up_sent = true;
                        if engine.send_create_pr_follow_up(&card, &session_id).await.is_ok() {
                            continue;
                        }
                        engine.report_extraction_failure(&card, lane).await;
                        return;
                    }
                    Err(e) => {
                        // The card stays in its lane; the operator can
                        // retry extraction or re-run the stage.
                        warn!("Extraction for card {} ({}): {}", card_id, lane, e);
                        engine.report_extraction_failure(&card, lane).await;
                        return;
                    }
                }
            }
        });
    }

    async fn send_create_pr_follow_up(&self, card: &Card, session_id: &str) -> Result<()> {
        let prompt = prompts::create_pr_prompt(
            card.build_branch.as_deref().unwrap_or(""),
            card.base_branch.as_deref().unwrap_or("main"),
            card.title.as_deref().unwrap_or("Untitled card"),
            card.prd_path.as_deref().unwrap_or(""),
        );
        info!("Sending create-PR follow-up for card {}", card.id);
        self.orchestrator
            .send_prompt(session_id, &prompt, Some(SessionMode::Build), None, false)
            .await?;
        Ok(())
    }

    async fn report_extraction_failure(&self, card: &Card, lane: Lane) {
        self.emit(
            &card.project_id,
            kind::TICKET_UPDATED,
            json!({"card_id": card.id, "extraction_failed": lane}),
        )
        .await;
    }

    /// Extract and store the artifact for a stage from its transcript.
    async fn apply_extraction(&self, card: &Card, lane: Lane) -> Result<()> {
        let session_id = card.session_for_lane(lane).ok_or_else(|| {
            Error::PreconditionFailed(format!("card {} has no {} session", card.id, lane))
        })?;
        let entries = self.transcripts.list(session_id).await?;

        match lane {
            Lane::Plan => {
                let plan = extract_issue_plan(&entries).ok_or_else(|| {
                    Error::ExtractionFailed(format!(
                        "no qualifying issue plan block in session {}",
                        session_id
                    ))
                })?;
                let prd_path = card
                    .prd_path
                    .clone()
                    .or(plan.prd_path.clone())
                    .unwrap_or_else(|| format!(".squads/prds/{}.md", card.id));
                self.cards
                    .set_issue_plan(&card.id, &serde_json::to_value(&plan)?, &prd_path)
                    .await?;
            }
            Lane::Build => {
                let result = extract_build_result(&entries).ok_or_else(|| {
                    Error::ExtractionFailed(format!(
                        "no qualifying build result block in session {}",
                        session_id
                    ))
                })?;
                self.cards
                    .set_build_result(&card.id, &result.pr_url, &json!(result.issues_closed))
                    .await?;
            }
            Lane::Review => {
                let review = extract_ai_review(&entries).ok_or_else(|| {
                    Error::ExtractionFailed(format!(
                        "no qualifying review block in session {}",
                        session_id
                    ))
                })?;
                self.cards
                    .set_ai_review(&card.id, &serde_json::to_value(&review)?)
                    .await?;
            }
            _ => {
                return Err(Error::validation(format!("lane {} has no artifact", lane)));
            }
        }

        self.emit(
            &card.project_id,
            kind::TICKET_UPDATED,
            json!({"card_id": card.id, "artifact": lane}),
        )
        .await;
        Ok(())
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    /// The lane's assigned agent when it is free, else any idle agent in
    /// the squad.
    async fn allocate_agent(
        &self,
        project_id: &str,
        squad_id: &str,
        lane: Lane,
    ) -> Result<Agent> {
        if let Some(assignment) = self.lanes.get(project_id, squad_id, lane).await? {
            if let Some(agent_id) = assignment.agent_id {
                if let Some(agent) = self.agents.get(&agent_id).await? {
                    if self.sessions.find_active_for_agent(&agent.id).await?.is_none() {
                        return Ok(agent);
                    }
                }
            }
        }

        for agent in self.agents.list_idle_for_squad(squad_id).await? {
            if self.sessions.find_active_for_agent(&agent.id).await?.is_none() {
                return Ok(agent);
            }
        }

        Err(Error::LanePrecondition(format!(
            "no idle agent available for the {} lane of squad {}",
            lane, squad_id
        )))
    }

    async fn get_project(&self, project_id: &str) -> Result<Project> {
        self.projects
            .get(project_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("project {}", project_id)))
    }

    async fn emit(&self, project_id: &str, kind: &str, payload: serde_json::Value) {
        let record = EventRecord::new(kind, project_id, payload);
        if let Err(e) = self.events.insert(&record).await {
            warn!("Failed to persist board event: {:#}", e);
        }
        self.bus.publish(record);
    }
}

/// Seed the PRD file so it exists before the planning agent writes the
/// real document.
fn write_prd_placeholder(path: &PathBuf, card: &Card) -> Result<()> {
    if path.exists() {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| Error::Internal(anyhow::anyhow!("creating prd dir: {}", e)))?;
    }
    let title = card.title.as_deref().unwrap_or("Untitled card");
    let contents = format!("# {}\n\n> PRD pending. Card body:\n\n{}\n", title, card.body);
    std::fs::write(path, contents)
        .map_err(|e| Error::Internal(anyhow::anyhow!("writing prd placeholder: {}", e)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentLevel;
    use crate::db::Database;
    use crate::mcp::McpServerRepository;
    use crate::session::{OrchestratorConfig, SessionOrchestrator};
    use crate::settings::OpencodeSettings;
    use crate::squad::SquadSupervisor;
    use squadron_protocol::Role;

    struct Fixture {
        db: Database,
        engine: Arc<BoardEngine>,
        project_id: String,
        squad_id: String,
    }

    async fn setup() -> Fixture {
        let db = Database::in_memory().await.unwrap();
        let project_dir = tempfile::tempdir().unwrap().keep();

        let projects = ProjectRepository::new(db.pool().clone());
        let squads = SquadRepository::new(db.pool().clone());
        let agents = AgentRepository::new(db.pool().clone());

        let project = projects
            .create("acme", &project_dir.display().to_string(), json!({}))
            .await
            .unwrap();
        let squad = squads.create(&project.id, "alpha", None).await.unwrap();
        agents
            .create(
                &squad.id,
                "Brisk Otter",
                "brisk-otter",
                "engineer",
                AgentLevel::Senior,
                None,
                None,
                None,
            )
            .await
            .unwrap();

        let bus = EventBus::new();
        let supervisor = SquadSupervisor::new(
            OpencodeSettings {
                binary: "/nonexistent/opencode".to_string(),
                base_port: 44900,
                provisioning_timeout_secs: 1,
                health_interval_secs: 1,
                stop_grace_secs: 1,
            },
            tempfile::tempdir().unwrap().keep(),
            squads.clone(),
            projects.clone(),
            McpServerRepository::new(db.pool().clone()),
            bus.clone(),
        );
        let orchestrator = SessionOrchestrator::new(
            OrchestratorConfig::default(),
            SessionRepository::new(db.pool().clone()),
            TranscriptRepository::new(db.pool().clone()),
            EventRepository::new(db.pool().clone()),
            agents.clone(),
            squads.clone(),
            supervisor,
            bus.clone(),
        );

        let engine = BoardEngine::new(
            BoardEngineConfig::default(),
            CardRepository::new(db.pool().clone()),
            LaneAssignmentRepository::new(db.pool().clone()),
            agents,
            squads,
            SessionRepository::new(db.pool().clone()),
            TranscriptRepository::new(db.pool().clone()),
            projects,
            EventRepository::new(db.pool().clone()),
            orchestrator,
            bus,
        );

        Fixture {
            db,
            engine,
            project_id: project.id,
            squad_id: squad.id,
        }
    }

    #[tokio::test]
    async fn test_failed_plan_dispatch_keeps_card_in_todo() {
        let fx = setup().await;
        let card = fx
            .engine
            .create_card(
                &fx.project_id,
                CreateCardRequest {
                    squad_id: fx.squad_id.clone(),
                    title: Some("Add rate limiting to /login".to_string()),
                    body: "Protect the login endpoint.".to_string(),
                },
            )
            .await
            .unwrap();

        // The opencode binary does not exist, so the stage prompt cannot
        // be dispatched and the card must not advance.
        let err = fx
            .engine
            .advance(&card.id, Lane::Todo, Lane::Plan)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "backend_unavailable");

        let card = fx.engine.get(&card.id).await.unwrap();
        assert_eq!(card.lane, Lane::Todo);
        // The PRD reservation happened before dispatch and is kept.
        assert!(card.prd_path.is_some());
    }

    #[tokio::test]
    async fn test_build_requires_issue_plan() {
        let fx = setup().await;
        let card = fx
            .engine
            .create_card(
                &fx.project_id,
                CreateCardRequest {
                    squad_id: fx.squad_id.clone(),
                    title: None,
                    body: "body".to_string(),
                },
            )
            .await
            .unwrap();

        // Force the card into plan lane without the engine.
        let cards = CardRepository::new(fx.db.pool().clone());
        let fresh = cards.get(&card.id).await.unwrap().unwrap();
        cards.move_to_lane(&card.id, Lane::Plan, fresh.version).await.unwrap();

        let err = fx
            .engine
            .advance(&card.id, Lane::Plan, Lane::Build)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "conflict");
        assert_eq!(err.code(), Some("lane_precondition_unmet"));
    }

    #[tokio::test]
    async fn test_review_to_done_gated_on_human_approval() {
        let fx = setup().await;
        let card = fx
            .engine
            .create_card(
                &fx.project_id,
                CreateCardRequest {
                    squad_id: fx.squad_id.clone(),
                    title: None,
                    body: "body".to_string(),
                },
            )
            .await
            .unwrap();

        let cards = CardRepository::new(fx.db.pool().clone());
        let fresh = cards.get(&card.id).await.unwrap().unwrap();
        cards.move_to_lane(&card.id, Lane::Review, fresh.version).await.unwrap();

        let err = fx
            .engine
            .advance(&card.id, Lane::Review, Lane::Done)
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some("lane_precondition_unmet"));

        // Approval against a missing AI review requires feedback.
        let err = fx
            .engine
            .set_human_review(&card.id, HumanReviewStatus::Approved, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "validation");

        fx.engine
            .set_human_review(
                &card.id,
                HumanReviewStatus::Approved,
                Some("Looked at it myself, ship it.".to_string()),
            )
            .await
            .unwrap();

        let done = fx
            .engine
            .advance(&card.id, Lane::Review, Lane::Done)
            .await
            .unwrap();
        assert_eq!(done.lane, Lane::Done);
    }

    #[tokio::test]
    async fn test_reverse_transition_clears_pointer_keeps_transcript_fields() {
        let fx = setup().await;
        let card = fx
            .engine
            .create_card(
                &fx.project_id,
                CreateCardRequest {
                    squad_id: fx.squad_id.clone(),
                    title: None,
                    body: "body".to_string(),
                },
            )
            .await
            .unwrap();

        let cards = CardRepository::new(fx.db.pool().clone());
        cards
            .set_review_stage(&card.id, "agent-1", "session-1")
            .await
            .unwrap();
        let fresh = cards.get(&card.id).await.unwrap().unwrap();
        cards.move_to_lane(&card.id, Lane::Review, fresh.version).await.unwrap();

        let back = fx
            .engine
            .advance(&card.id, Lane::Review, Lane::Build)
            .await
            .unwrap();
        assert_eq!(back.lane, Lane::Build);
        assert!(back.review_session_id.is_none());
        // The review agent attribution survives for audit.
        assert_eq!(back.review_agent_id.as_deref(), Some("agent-1"));
    }

    #[tokio::test]
    async fn test_extract_now_applies_plan_artifact() {
        let fx = setup().await;
        let card = fx
            .engine
            .create_card(
                &fx.project_id,
                CreateCardRequest {
                    squad_id: fx.squad_id.clone(),
                    title: Some("c1".to_string()),
                    body: "Add rate limiting to /login".to_string(),
                },
            )
            .await
            .unwrap();

        // Wire a fake plan session with a qualifying fenced block.
        let sessions = SessionRepository::new(fx.db.pool().clone());
        let agents = AgentRepository::new(fx.db.pool().clone());
        let agent = &agents.list_for_squad(&fx.squad_id).await.unwrap()[0];
        let session = sessions
            .create(
                &fx.project_id,
                &agent.id,
                None,
                SessionMode::Plan,
                Some(card.id.as_str()),
                None,
                None,
                None,
                json!({}),
            )
            .await
            .unwrap();

        let transcripts = TranscriptRepository::new(fx.db.pool().clone());
        transcripts
            .append(
                &session.id,
                Role::Assistant,
                Some("m1"),
                &json!({"role": "assistant", "parts": [{"type": "text", "text":
                    "```json\n{\"issues\":[{\"title\":\"RL middleware\"}],\"repo\":\"acme/app\",\"questions\":[]}\n```"
                }]}),
            )
            .await
            .unwrap();

        let cards = CardRepository::new(fx.db.pool().clone());
        cards.set_plan_stage(&card.id, &agent.id, &session.id).await.unwrap();

        let card = fx.engine.extract_now(&card.id, Lane::Plan).await.unwrap();
        let plan = card.parsed_issue_plan().unwrap();
        assert_eq!(plan.issues.len(), 1);
        assert!(card.prd_path.is_some());

        // Extraction with no qualifying block reports extraction_failed.
        let err = fx
            .engine
            .extract_now(&card.id, Lane::Build)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "precondition_failed");
    }
}
