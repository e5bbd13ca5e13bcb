//! Stage prompt templates.
//!
//! Templates are data, not code: markdown files with `{placeholder}`
//! substitution, embedded at compile time. Unknown placeholders are left
//! verbatim so a template edit cannot silently drop content.

const PLAN_PROMPT: &str = include_str!("../../templates/plan_prompt.md");
const BUILD_PROMPT: &str = include_str!("../../templates/build_prompt.md");
const CREATE_PR_PROMPT: &str = include_str!("../../templates/create_pr_prompt.md");
const REVIEW_PROMPT: &str = include_str!("../../templates/review_prompt.md");

fn render(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (key, value) in values {
        out = out.replace(&format!("{{{}}}", key), value);
    }
    out
}

/// Prompt for the plan stage.
pub fn plan_prompt(
    project_name: &str,
    repo_path: &str,
    card_title: &str,
    card_body: &str,
    prd_path: &str,
) -> String {
    render(
        PLAN_PROMPT,
        &[
            ("project_name", project_name),
            ("repo_path", repo_path),
            ("card_title", card_title),
            ("card_body", card_body),
            ("prd_path", prd_path),
        ],
    )
}

/// Prompt for the build stage.
pub fn build_prompt(
    worktree_path: &str,
    branch: &str,
    base_branch: &str,
    prd_path: &str,
    issue_plan: &str,
) -> String {
    render(
        BUILD_PROMPT,
        &[
            ("worktree_path", worktree_path),
            ("branch", branch),
            ("base_branch", base_branch),
            ("prd_path", prd_path),
            ("issue_plan", issue_plan),
        ],
    )
}

/// Follow-up prompt when a build completed without opening a PR.
pub fn create_pr_prompt(
    branch: &str,
    base_branch: &str,
    card_title: &str,
    prd_path: &str,
) -> String {
    render(
        CREATE_PR_PROMPT,
        &[
            ("branch", branch),
            ("base_branch", base_branch),
            ("card_title", card_title),
            ("prd_path", prd_path),
        ],
    )
}

/// Prompt for the review stage.
pub fn review_prompt(pr_url: &str, prd_path: &str, card_title: &str) -> String {
    render(
        REVIEW_PROMPT,
        &[
            ("pr_url", pr_url),
            ("prd_path", prd_path),
            ("card_title", card_title),
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_prompt_substitutes_everything() {
        let prompt = plan_prompt(
            "acme",
            "/work/acme",
            "Add rate limiting to /login",
            "Protect the login endpoint.",
            ".squads/prds/c1.md",
        );
        assert!(prompt.contains("Add rate limiting to /login"));
        assert!(prompt.contains(".squads/prds/c1.md"));
        assert!(!prompt.contains("{card_title}"));
        assert!(!prompt.contains("{repo_path}"));
    }

    #[test]
    fn test_templates_demand_their_discriminators() {
        assert!(plan_prompt("p", "r", "t", "b", "prd").contains("\"issues\""));
        assert!(build_prompt("w", "b", "main", "prd", "{}").contains("\"pr_url\""));
        assert!(review_prompt("u", "prd", "t").contains("\"recommendation\""));
        assert!(create_pr_prompt("b", "main", "t", "prd").contains("\"pr_url\""));
    }
}
