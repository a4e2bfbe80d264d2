//! `gh`-CLI-backed implementation of [`RemoteTracker`].
//!
//! All remote traffic goes through the GitHub CLI so authentication is
//! delegated entirely to `gh auth`. Command execution sits behind the
//! [`Runner`] trait so tests can script outputs without a network.
//!
//! Batched issue fetches issue one aliased GraphQL query; the response is
//! decoded per-alias into a fixed shape rather than traversed dynamically.

use super::{
    BatchEditResult, BatchUpdate, RemoteCategory, RemoteLabel, RemoteMilestone, RemoteProject,
    RemoteTracker,
};
use crate::error::{Result, SyncError};
use crate::model::{Issue, IssueNumber, IssueRef, State};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::process::Command;
use tracing::debug;

/// Executes an external command and returns its stdout.
pub trait Runner {
    /// Run `program` with `args`.
    ///
    /// # Errors
    ///
    /// Returns `Remote` when the command exits non-zero or cannot run.
    fn run(&self, program: &str, args: &[String]) -> Result<String>;
}

/// Real subprocess runner.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecRunner;

impl Runner for ExecRunner {
    fn run(&self, program: &str, args: &[String]) -> Result<String> {
        debug!(program, ?args, "running external command");
        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|e| SyncError::remote(format!("running {program}"), e.to_string()))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SyncError::remote(
                format!("running {program} {}", args.first().map_or("", String::as_str)),
                stderr.trim().to_string(),
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// GitHub client driving the `gh` CLI.
pub struct GhClient<R: Runner = ExecRunner> {
    runner: R,
    repo: String,
}

impl GhClient<ExecRunner> {
    /// Client for `owner/repo` using the real `gh` binary.
    #[must_use]
    pub fn new(repo: impl Into<String>) -> Self {
        Self::with_runner(ExecRunner, repo)
    }
}

impl<R: Runner> GhClient<R> {
    /// Client with a custom runner (scripted in tests).
    #[must_use]
    pub fn with_runner(runner: R, repo: impl Into<String>) -> Self {
        Self {
            runner,
            repo: repo.into(),
        }
    }

    fn gh(&self, args: Vec<String>) -> Result<String> {
        self.runner.run("gh", &args)
    }

    fn split_repo(&self) -> Result<(&str, &str)> {
        self.repo
            .split_once('/')
            .filter(|(owner, repo)| !owner.is_empty() && !repo.is_empty())
            .ok_or_else(|| {
                SyncError::Config(format!("invalid repository slug '{}'", self.repo))
            })
    }

    fn graphql(&self, query: &str, vars: &[(&str, &str)]) -> Result<String> {
        let mut args = vec![
            "api".to_string(),
            "graphql".to_string(),
            "-f".to_string(),
            format!("query={query}"),
        ];
        for (key, value) in vars {
            args.push("-F".to_string());
            args.push(format!("{key}={value}"));
        }
        self.gh(args)
    }

    fn issue_node_id(&self, number: &str) -> Result<String> {
        let (owner, repo) = self.split_repo()?;
        let query = "query($owner: String!, $repo: String!, $number: Int!) {\n  repository(owner: $owner, name: $repo) { issue(number: $number) { id } }\n}";
        let out = self.graphql(query, &[("owner", owner), ("repo", repo), ("number", number)])?;
        #[derive(Deserialize)]
        struct Resp {
            data: Data,
        }
        #[derive(Deserialize)]
        struct Data {
            repository: Repo,
        }
        #[derive(Deserialize)]
        struct Repo {
            issue: Option<IdNode>,
        }
        #[derive(Deserialize)]
        struct IdNode {
            id: String,
        }
        let resp: Resp = serde_json::from_str(&out)?;
        resp.data
            .repository
            .issue
            .map(|node| node.id)
            .ok_or_else(|| {
                SyncError::remote(
                    format!("resolving node id for #{number}"),
                    "issue not found",
                )
            })
    }

    fn issue_database_id(&self, number: &str) -> Result<u64> {
        let out = self.gh(vec![
            "api".to_string(),
            format!("repos/{}/issues/{number}", self.repo),
            "--jq".to_string(),
            ".id".to_string(),
        ])?;
        out.trim().parse::<u64>().map_err(|_| {
            SyncError::remote(
                format!("resolving database id for #{number}"),
                format!("unexpected output: {}", out.trim()),
            )
        })
    }
}

// === Batched GraphQL fetch shapes ===

#[derive(Deserialize)]
struct BatchResp {
    data: Option<BatchData>,
}

#[derive(Deserialize)]
struct BatchData {
    repository: Option<BTreeMap<String, Option<GqlIssue>>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GqlIssue {
    number: u64,
    title: String,
    body: Option<String>,
    state: String,
    state_reason: Option<String>,
    #[serde(default)]
    labels: Nodes<NameNode>,
    #[serde(default)]
    assignees: Nodes<LoginNode>,
    milestone: Option<TitleNode>,
    parent: Option<NumberNode>,
    #[serde(default)]
    blocked_by: Nodes<NumberNode>,
    issue_type: Option<NameNode>,
}

#[derive(Deserialize)]
struct Nodes<T> {
    #[serde(default = "Vec::new")]
    nodes: Vec<T>,
}

impl<T> Default for Nodes<T> {
    fn default() -> Self {
        Self { nodes: Vec::new() }
    }
}

#[derive(Deserialize)]
struct NameNode {
    name: String,
}

#[derive(Deserialize)]
struct LoginNode {
    login: String,
}

#[derive(Deserialize)]
struct TitleNode {
    title: String,
}

#[derive(Deserialize)]
struct NumberNode {
    number: u64,
}

impl GqlIssue {
    fn into_issue(self) -> Issue {
        Issue {
            number: IssueNumber::new(self.number.to_string()),
            title: self.title,
            labels: self.labels.nodes.into_iter().map(|n| n.name).collect(),
            assignees: self.assignees.nodes.into_iter().map(|n| n.login).collect(),
            milestone: self.milestone.map(|m| m.title),
            category: self.issue_type.map(|t| t.name),
            state: if self.state.eq_ignore_ascii_case("closed") {
                State::Closed
            } else {
                State::Open
            },
            state_reason: self.state_reason.map(|r| r.to_lowercase()),
            parent: self
                .parent
                .map(|p| IssueRef::new(p.number.to_string())),
            blocked_by: self
                .blocked_by
                .nodes
                .into_iter()
                .map(|n| IssueRef::new(n.number.to_string()))
                .collect(),
            body: self.body.unwrap_or_default(),
            ..Default::default()
        }
        .normalized()
    }
}

const ISSUE_FIELDS: &str = "number title body state stateReason labels(first: 100) { nodes { name } } assignees(first: 100) { nodes { login } } milestone { title } parent { number } blockedBy(first: 50) { nodes { number } } issueType { name }";

impl<R: Runner> RemoteTracker for GhClient<R> {
    fn fetch_issues(&self, numbers: &[String]) -> Result<BTreeMap<String, Issue>> {
        // Only decimal numbers can be interpolated into the query; anything
        // else would corrupt the whole batch, so it is skipped and reads as
        // absent to the caller.
        let valid: Vec<u64> = numbers
            .iter()
            .filter_map(|number| match number.parse::<u64>() {
                Ok(n) => Some(n),
                Err(_) => {
                    debug!(number = %number, "skipping non-numeric issue number in batch fetch");
                    None
                }
            })
            .collect();
        if valid.is_empty() {
            return Ok(BTreeMap::new());
        }
        let (owner, repo) = self.split_repo()?;

        let mut query = String::from(
            "query($owner: String!, $repo: String!) {\n  repository(owner: $owner, name: $repo) {\n",
        );
        for number in &valid {
            // Alias per requested number so one round trip covers the batch.
            let _ = writeln!(
                query,
                "    i{number}: issue(number: {number}) {{ {ISSUE_FIELDS} }}"
            );
        }
        query.push_str("  }\n}");

        let out = self.graphql(&query, &[("owner", owner), ("repo", repo)])?;
        let resp: BatchResp = serde_json::from_str(&out)?;

        let mut issues = BTreeMap::new();
        let Some(repository) = resp.data.and_then(|d| d.repository) else {
            return Ok(issues);
        };
        for (alias, node) in repository {
            let Some(gql) = node else { continue };
            let issue = gql.into_issue();
            debug_assert_eq!(format!("i{}", issue.number), alias);
            issues.insert(issue.number.as_str().to_string(), issue);
        }
        Ok(issues)
    }

    fn create_issue(&self, issue: &Issue) -> Result<String> {
        let mut args = vec![
            "issue".to_string(),
            "create".to_string(),
            "--repo".to_string(),
            self.repo.clone(),
            "--title".to_string(),
            issue.title.clone(),
            "--body".to_string(),
            issue.body.clone(),
        ];
        for label in &issue.labels {
            args.push("--label".to_string());
            args.push(label.clone());
        }
        for assignee in &issue.assignees {
            args.push("--assignee".to_string());
            args.push(assignee.clone());
        }
        if let Some(milestone) = &issue.milestone {
            args.push("--milestone".to_string());
            args.push(milestone.clone());
        }
        let out = self.gh(args)?;
        parse_issue_number(&out)
    }

    fn edit_issues(&self, updates: &[BatchUpdate]) -> Result<BatchEditResult> {
        let mut result = BatchEditResult::default();
        for update in updates {
            let mut args = vec![
                "issue".to_string(),
                "edit".to_string(),
                update.number.clone(),
                "--repo".to_string(),
                self.repo.clone(),
            ];
            if let Some(title) = &update.title {
                args.push("--title".to_string());
                args.push(title.clone());
            }
            if let Some(body) = &update.body {
                args.push("--body".to_string());
                args.push(body.clone());
            }
            match &update.milestone {
                Some(Some(milestone)) => {
                    args.push("--milestone".to_string());
                    args.push(milestone.clone());
                }
                Some(None) => args.push("--remove-milestone".to_string()),
                None => {}
            }
            for label in &update.add_labels {
                args.push("--add-label".to_string());
                args.push(label.clone());
            }
            for label in &update.remove_labels {
                args.push("--remove-label".to_string());
                args.push(label.clone());
            }
            for assignee in &update.add_assignees {
                args.push("--add-assignee".to_string());
                args.push(assignee.clone());
            }
            for assignee in &update.remove_assignees {
                args.push("--remove-assignee".to_string());
                args.push(assignee.clone());
            }
            if let Err(e) = self.gh(args) {
                result.errors.insert(update.number.clone(), e.to_string());
            }
        }
        Ok(result)
    }

    fn close_issue(&self, number: &str, reason: Option<&str>) -> Result<()> {
        let mut args = vec![
            "issue".to_string(),
            "close".to_string(),
            number.to_string(),
            "--repo".to_string(),
            self.repo.clone(),
        ];
        if let Some(reason) = reason {
            args.push("--reason".to_string());
            args.push(reason.to_string());
        }
        self.gh(args)?;
        Ok(())
    }

    fn reopen_issue(&self, number: &str) -> Result<()> {
        self.gh(vec![
            "issue".to_string(),
            "reopen".to_string(),
            number.to_string(),
            "--repo".to_string(),
            self.repo.clone(),
        ])?;
        Ok(())
    }

    fn sync_relationships(&self, number: &str, issue: &Issue) -> Result<()> {
        if issue.parent.is_none() && issue.blocked_by.is_empty() {
            return Ok(());
        }

        if let Some(parent) = &issue.parent {
            let child_id = self.issue_node_id(number)?;
            let parent_id = self.issue_node_id(parent.as_str())?;
            let mutation = "mutation($parent: ID!, $child: ID!) {\n  addSubIssue(input: { issueId: $parent, subIssueId: $child, replaceParent: true }) { issue { id } }\n}";
            self.graphql(mutation, &[("parent", &parent_id), ("child", &child_id)])?;
        }

        for blocker in &issue.blocked_by {
            let blocker_id = self.issue_database_id(blocker.as_str())?;
            self.gh(vec![
                "api".to_string(),
                format!("repos/{}/issues/{number}/dependencies/blocked_by", self.repo),
                "-X".to_string(),
                "POST".to_string(),
                "-F".to_string(),
                format!("issue_id={blocker_id}"),
            ])?;
        }
        Ok(())
    }

    fn set_category(&self, number: &str, category_id: Option<&str>) -> Result<()> {
        let node_id = self.issue_node_id(number)?;
        match category_id {
            Some(category_id) => {
                let mutation = "mutation($issue: ID!, $type: ID!) {\n  updateIssue(input: { id: $issue, issueTypeId: $type }) { issue { id } }\n}";
                self.graphql(mutation, &[("issue", &node_id), ("type", category_id)])?;
            }
            None => {
                let mutation = "mutation($issue: ID!) {\n  updateIssue(input: { id: $issue, issueTypeId: null }) { issue { id } }\n}";
                self.graphql(mutation, &[("issue", &node_id)])?;
            }
        }
        Ok(())
    }

    fn sync_projects(
        &self,
        number: &str,
        projects: &[String],
        known_ids: &BTreeMap<String, String>,
    ) -> Result<()> {
        if projects.is_empty() {
            return Ok(());
        }
        let content_id = self.issue_node_id(number)?;
        for title in projects {
            let Some(project_id) = known_ids.get(&title.to_lowercase()) else {
                return Err(SyncError::remote(
                    format!("adding #{number} to project '{title}'"),
                    "unknown project",
                ));
            };
            let mutation = "mutation($project: ID!, $content: ID!) {\n  addProjectV2ItemById(input: { projectId: $project, contentId: $content }) { item { id } }\n}";
            self.graphql(mutation, &[("project", project_id), ("content", &content_id)])?;
        }
        Ok(())
    }

    fn create_comment(&self, number: &str, body: &str) -> Result<()> {
        self.gh(vec![
            "issue".to_string(),
            "comment".to_string(),
            number.to_string(),
            "--repo".to_string(),
            self.repo.clone(),
            "--body".to_string(),
            body.to_string(),
        ])?;
        Ok(())
    }

    fn list_labels(&self) -> Result<Vec<RemoteLabel>> {
        let out = self.gh(vec![
            "label".to_string(),
            "list".to_string(),
            "--repo".to_string(),
            self.repo.clone(),
            "--limit".to_string(),
            "500".to_string(),
            "--json".to_string(),
            "name,color".to_string(),
        ])?;
        #[derive(Deserialize)]
        struct Entry {
            name: String,
            color: String,
        }
        let entries: Vec<Entry> = serde_json::from_str(&out)?;
        Ok(entries
            .into_iter()
            .map(|e| RemoteLabel {
                name: e.name,
                color: e.color,
            })
            .collect())
    }

    fn create_label(&self, name: &str, color: &str) -> Result<()> {
        self.gh(vec![
            "label".to_string(),
            "create".to_string(),
            name.to_string(),
            "--repo".to_string(),
            self.repo.clone(),
            "--color".to_string(),
            color.to_string(),
        ])?;
        Ok(())
    }

    fn list_milestones(&self) -> Result<Vec<RemoteMilestone>> {
        let out = self.gh(vec![
            "api".to_string(),
            format!("repos/{}/milestones?state=all", self.repo),
            "--paginate".to_string(),
        ])?;
        #[derive(Deserialize)]
        struct Entry {
            title: String,
            state: String,
        }
        let entries: Vec<Entry> = serde_json::from_str(&out)?;
        Ok(entries
            .into_iter()
            .map(|e| RemoteMilestone {
                title: e.title,
                state: e.state,
            })
            .collect())
    }

    fn create_milestone(&self, title: &str) -> Result<()> {
        self.gh(vec![
            "api".to_string(),
            format!("repos/{}/milestones", self.repo),
            "-X".to_string(),
            "POST".to_string(),
            "-f".to_string(),
            format!("title={title}"),
        ])?;
        Ok(())
    }

    fn list_categories(&self) -> Result<Vec<RemoteCategory>> {
        let (owner, repo) = self.split_repo()?;
        let query = "query($owner: String!, $repo: String!) {\n  repository(owner: $owner, name: $repo) {\n    issueTypes(first: 50) { nodes { id name } }\n  }\n}";
        // Issue types are an org-level feature; personal repos report an
        // error here, which reads as "no categories".
        let Ok(out) = self.graphql(query, &[("owner", owner), ("repo", repo)]) else {
            return Ok(Vec::new());
        };
        #[derive(Deserialize)]
        struct Resp {
            data: Option<Data>,
        }
        #[derive(Deserialize)]
        struct Data {
            repository: Option<Repo>,
        }
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Repo {
            issue_types: Option<Nodes<IdName>>,
        }
        #[derive(Deserialize)]
        struct IdName {
            id: String,
            name: String,
        }
        let Ok(resp) = serde_json::from_str::<Resp>(&out) else {
            return Ok(Vec::new());
        };
        Ok(resp
            .data
            .and_then(|d| d.repository)
            .and_then(|r| r.issue_types)
            .map(|nodes| {
                nodes
                    .nodes
                    .into_iter()
                    .map(|n| RemoteCategory {
                        id: n.id,
                        name: n.name,
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    fn list_projects(&self) -> Result<Vec<RemoteProject>> {
        let (owner, _) = self.split_repo()?;
        let out = self.gh(vec![
            "project".to_string(),
            "list".to_string(),
            "--owner".to_string(),
            owner.to_string(),
            "--format".to_string(),
            "json".to_string(),
        ])?;
        #[derive(Deserialize)]
        struct Resp {
            #[serde(default)]
            projects: Vec<Entry>,
        }
        #[derive(Deserialize)]
        struct Entry {
            id: String,
            title: String,
        }
        let resp: Resp = serde_json::from_str(&out)?;
        Ok(resp
            .projects
            .into_iter()
            .map(|e| RemoteProject {
                id: e.id,
                title: e.title,
            })
            .collect())
    }
}

/// Extract the issue number from `gh issue create` output (the issue URL).
fn parse_issue_number(output: &str) -> Result<String> {
    let url = output
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| line.contains("/issues/"))
        .ok_or_else(|| {
            SyncError::remote("creating issue", format!("no issue URL in output: {output}"))
        })?;
    let number = url.rsplit('/').next().unwrap_or_default();
    if number.is_empty() || !number.chars().all(|c| c.is_ascii_digit()) {
        return Err(SyncError::remote(
            "creating issue",
            format!("unexpected issue URL: {url}"),
        ));
    }
    Ok(number.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    /// Runner that records invocations and pops canned responses.
    struct ScriptedRunner {
        calls: RefCell<Vec<Vec<String>>>,
        responses: RefCell<Vec<Result<String>>>,
    }

    impl ScriptedRunner {
        fn new(responses: Vec<Result<String>>) -> Self {
            Self {
                calls: RefCell::new(Vec::new()),
                responses: RefCell::new(responses),
            }
        }
    }

    impl Runner for &ScriptedRunner {
        fn run(&self, _program: &str, args: &[String]) -> Result<String> {
            self.calls.borrow_mut().push(args.to_vec());
            self.responses.borrow_mut().remove(0)
        }
    }

    #[test]
    fn test_parse_issue_number() {
        let out = "Creating issue in octo/widgets\nhttps://github.com/octo/widgets/issues/123\n";
        assert_eq!(parse_issue_number(out).unwrap(), "123");
        assert!(parse_issue_number("no url here").is_err());
    }

    #[test]
    fn test_create_issue_args_and_number() {
        let runner = ScriptedRunner::new(vec![Ok(
            "https://github.com/octo/widgets/issues/77\n".to_string()
        )]);
        let client = GhClient::with_runner(&runner, "octo/widgets");
        let issue = Issue {
            number: IssueNumber::from("T1a2b3c4d"),
            title: "New thing".to_string(),
            labels: vec!["bug".to_string()],
            body: "Details.\n".to_string(),
            ..Default::default()
        };
        let number = client.create_issue(&issue).unwrap();
        assert_eq!(number, "77");

        let calls = runner.calls.borrow();
        let args = &calls[0];
        assert_eq!(args[0], "issue");
        assert_eq!(args[1], "create");
        assert!(args.contains(&"--label".to_string()));
        assert!(args.contains(&"bug".to_string()));
    }

    #[test]
    fn test_fetch_issues_decodes_aliased_response() {
        let payload = serde_json::json!({
            "data": { "repository": {
                "i42": {
                    "number": 42,
                    "title": "Remote title",
                    "body": "Remote body",
                    "state": "OPEN",
                    "stateReason": null,
                    "labels": { "nodes": [ { "name": "bug" } ] },
                    "assignees": { "nodes": [ { "login": "octo" } ] },
                    "milestone": { "title": "v1" },
                    "parent": { "number": 7 },
                    "blockedBy": { "nodes": [ { "number": 9 } ] },
                    "issueType": null
                },
                "i43": null
            }}
        });
        let runner = ScriptedRunner::new(vec![Ok(payload.to_string())]);
        let client = GhClient::with_runner(&runner, "octo/widgets");
        let issues = client
            .fetch_issues(&["42".to_string(), "43".to_string()])
            .unwrap();
        assert_eq!(issues.len(), 1);
        let issue = &issues["42"];
        assert_eq!(issue.title, "Remote title");
        assert_eq!(issue.labels, vec!["bug"]);
        assert_eq!(issue.milestone.as_deref(), Some("v1"));
        assert_eq!(issue.parent.as_ref().unwrap().as_str(), "7");
        assert_eq!(issue.blocked_by, vec![IssueRef::from("9")]);
        assert_eq!(issue.state, State::Open);
    }

    #[test]
    fn test_fetch_issues_skips_non_numeric_numbers() {
        let payload = serde_json::json!({
            "data": { "repository": {
                "i42": {
                    "number": 42,
                    "title": "Only valid one",
                    "body": null,
                    "state": "OPEN",
                    "stateReason": null,
                    "milestone": null,
                    "parent": null,
                    "issueType": null
                }
            }}
        });
        let runner = ScriptedRunner::new(vec![Ok(payload.to_string())]);
        let client = GhClient::with_runner(&runner, "octo/widgets");
        let issues = client
            .fetch_issues(&["42".to_string(), "12abc".to_string()])
            .unwrap();
        assert_eq!(issues.len(), 1);
        assert!(issues.contains_key("42"));

        // The malformed number never reaches the query text.
        let calls = runner.calls.borrow();
        let query = calls[0]
            .iter()
            .find(|arg| arg.starts_with("query="))
            .unwrap();
        assert!(query.contains("i42:"));
        assert!(!query.contains("12abc"));
    }

    #[test]
    fn test_fetch_issues_all_invalid_is_empty_without_a_call() {
        let runner = ScriptedRunner::new(vec![]);
        let client = GhClient::with_runner(&runner, "octo/widgets");
        let issues = client.fetch_issues(&["Tdeadbeef".to_string()]).unwrap();
        assert!(issues.is_empty());
        assert!(runner.calls.borrow().is_empty());
    }

    #[test]
    fn test_edit_issues_isolates_failures() {
        let runner = ScriptedRunner::new(vec![
            Err(SyncError::remote("running gh issue", "boom")),
            Ok(String::new()),
        ]);
        let client = GhClient::with_runner(&runner, "octo/widgets");
        let updates = vec![
            BatchUpdate {
                number: "1".to_string(),
                title: Some("X".to_string()),
                ..Default::default()
            },
            BatchUpdate {
                number: "2".to_string(),
                add_labels: vec!["bug".to_string()],
                ..Default::default()
            },
        ];
        let result = client.edit_issues(&updates).unwrap();
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors.contains_key("1"));
    }

    #[test]
    fn test_close_with_reason() {
        let runner = ScriptedRunner::new(vec![Ok(String::new())]);
        let client = GhClient::with_runner(&runner, "octo/widgets");
        client.close_issue("5", Some("not planned")).unwrap();
        let calls = runner.calls.borrow();
        assert!(calls[0].contains(&"--reason".to_string()));
        assert!(calls[0].contains(&"not planned".to_string()));
    }

    #[test]
    fn test_invalid_repo_slug() {
        let runner = ScriptedRunner::new(vec![]);
        let client = GhClient::with_runner(&runner, "not-a-slug");
        assert!(client.fetch_issues(&["1".to_string()]).is_err());
    }
}
