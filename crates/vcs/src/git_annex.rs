//! `VcsQuery` over the `git` / `git annex` command line

use crate::parse::{self, InfoRecord};
use crate::{Result, VcsError, VcsQuery};
use annexstat_core::{
    AnnexCommand, CommitHash, ContentKey, PathFacts, Presence, RepoPath, Replicas, Sufficiency,
    TreeId, WatchedTree,
};
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::time::Instant;
use tracing::{debug, trace};

/// Branch holding the annex location logs
const METADATA_BRANCH: &str = "refs/heads/git-annex";

/// Runs `git` subprocesses inside each tree's root
#[derive(Debug, Clone)]
pub struct GitAnnexCli {
    git_bin: PathBuf,
}

impl Default for GitAnnexCli {
    fn default() -> Self {
        Self::new("git")
    }
}

impl GitAnnexCli {
    pub fn new(git_bin: impl Into<PathBuf>) -> Self {
        Self {
            git_bin: git_bin.into(),
        }
    }

    /// Run git with `args` in `dir`, returning raw output regardless of status
    fn output(&self, dir: &Path, args: &[&str]) -> Result<Output> {
        let start = Instant::now();
        let output = Command::new(&self.git_bin)
            .current_dir(dir)
            .args(["-c", "core.quotepath=off"])
            .args(args)
            .output()
            .map_err(|source| VcsError::Launch {
                program: self.git_bin.display().to_string(),
                source,
            })?;

        trace!(
            dir = %dir.display(),
            ?args,
            code = ?output.status.code(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "git finished"
        );
        Ok(output)
    }

    /// Run git and require a zero exit status
    fn run(&self, dir: &Path, args: &[&str]) -> Result<String> {
        let output = self.output(dir, args)?;
        if !output.status.success() {
            return Err(VcsError::Exit {
                command: format!("git {}", args.join(" ")),
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Resolve a ref, `None` when it does not exist
    fn resolve(&self, dir: &Path, reference: &str) -> Result<Option<CommitHash>> {
        let spec = format!("{}^{{commit}}", reference);
        let output = self.output(dir, &["rev-parse", "--verify", "--quiet", spec.as_str()])?;
        match output.status.code() {
            Some(0) => parse::parse_commit_hash(&String::from_utf8_lossy(&output.stdout))
                .map(Some)
                .ok_or_else(|| VcsError::Malformed(format!("rev-parse {}", reference))),
            Some(1) => Ok(None),
            code => Err(VcsError::Exit {
                command: format!("git rev-parse {}", reference),
                code,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }),
        }
    }

    fn replicas(&self, root: &Path, path: &str) -> Result<Option<Replicas>> {
        let whereis = self.run(root, &["annex", "--json", "--fast", "whereis", "--", path])?;
        let Some(count) = parse::parse_whereis(&whereis)? else {
            return Ok(None);
        };

        let lacking = self.run(
            root,
            &["annex", "--json", "--fast", "--lackingcopies=1", "find", "--", path],
        )?;
        let sufficiency = Sufficiency::from_lacking(parse::parse_lacking(&lacking));

        Ok(Some(Replicas::new(count, sufficiency)))
    }
}

impl VcsQuery for GitAnnexCli {
    fn tree_id(&self, root: &Path) -> Result<TreeId> {
        let output = self.output(root, &["config", "annex.uuid"])?;
        parse::parse_tree_id(&String::from_utf8_lossy(&output.stdout))
            .ok_or_else(|| VcsError::MissingTreeId(root.to_path_buf()))
    }

    fn is_directory(&self, tree: &WatchedTree, path: &RepoPath) -> Result<bool> {
        // Annexed files are symlinks; never follow them
        match std::fs::symlink_metadata(tree.absolute(path)) {
            Ok(meta) => Ok(meta.is_dir()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn status_of(&self, tree: &WatchedTree, path: &RepoPath) -> Result<PathFacts> {
        let is_dir = self.is_directory(tree, path)?;
        let target = path.as_str();

        // Unannexed paths make `info` exit non-zero with a JSON error record
        let output = self.output(
            &tree.root,
            &["annex", "--json", "--json-error-messages", "--fast", "info", "--", target],
        )?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        if stdout.trim().is_empty() && !output.status.success() {
            return Err(VcsError::Exit {
                command: format!("git annex info {}", target),
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let facts = match parse::parse_info(&stdout)? {
            InfoRecord::Untracked => PathFacts::untracked(is_dir),
            InfoRecord::File { present, key } => {
                let replicas = self.replicas(&tree.root, target)?;
                PathFacts {
                    is_dir: false,
                    tracked: true,
                    presence: Some(if present {
                        Presence::Present
                    } else {
                        Presence::Absent
                    }),
                    replicas,
                    content_key: Some(key),
                }
            }
            InfoRecord::Dir { presence } => PathFacts {
                is_dir: true,
                tracked: true,
                presence: Some(presence),
                replicas: None,
                content_key: None,
            },
        };

        debug!(
            tree = %tree.id,
            %path,
            presence = ?facts.presence,
            replicas = ?facts.replicas,
            "queried status"
        );
        Ok(facts)
    }

    fn immediate_children(&self, tree: &WatchedTree, dir: &RepoPath) -> Result<Vec<RepoPath>> {
        let mut args = vec!["ls-files", "-z", "--cached", "--others", "--exclude-standard"];
        if !dir.is_root() {
            args.push("--");
            args.push(dir.as_str());
        }
        let listing = self.run(&tree.root, &args)?;

        let children = parse::children_from_ls_files(dir, &listing)
            .into_iter()
            .map(|name| dir.join(&name))
            // Index entries deleted from disk are not children any more
            .filter(|child| std::fs::symlink_metadata(tree.absolute(child)).is_ok())
            .collect();
        Ok(children)
    }

    fn changed_files_since(
        &self,
        tree: &WatchedTree,
        since: Option<&CommitHash>,
    ) -> Result<Vec<RepoPath>> {
        let range = match since {
            Some(commit) => format!("{}..HEAD", commit),
            None => "HEAD".to_string(),
        };
        let log = self.run(
            &tree.root,
            &["log", "--pretty=format:", "--name-only", range.as_str(), "--"],
        )?;
        Ok(parse::parse_changed_files(&log))
    }

    fn changed_content_keys_since(
        &self,
        tree: &WatchedTree,
        since: &CommitHash,
    ) -> Result<Vec<ContentKey>> {
        let range = format!("{}..{}", since, METADATA_BRANCH);
        let log = self.run(
            &tree.root,
            &["log", "--pretty=format:", "--name-only", range.as_str(), "--"],
        )?;
        Ok(parse::parse_location_log_keys(&log))
    }

    fn latest_primary_commit(&self, tree: &WatchedTree) -> Result<Option<CommitHash>> {
        self.resolve(&tree.root, "HEAD")
    }

    fn latest_metadata_commit(&self, tree: &WatchedTree) -> Result<CommitHash> {
        self.resolve(&tree.root, METADATA_BRANCH)?
            .ok_or_else(|| VcsError::Malformed(format!("{} has no {}", tree, METADATA_BRANCH)))
    }

    fn run_command(
        &self,
        tree: &WatchedTree,
        path: &RepoPath,
        command: AnnexCommand,
    ) -> Result<()> {
        self.run(&tree.root, &["annex", command.as_str(), "--", path.as_str()])?;
        Ok(())
    }
}
