//! Resolution of dependency sources to local project directories.
//!
//! A [`DependencySource`] is either a local path (resolved against the
//! declaring project) or a git repository (cloned once below the global
//! checkout directory, with a worktree per resolved commit). Resolution
//! yields the directory plus a content fingerprint used by the state cache
//! to decide whether a rebuild is needed.
//!
//! The identity of a source ([`identity_key`]) is computed without touching
//! the disk or network so that the graph builder can recognise a shared
//! dependency before fetching it a second time.

pub mod checksum;

use anyhow::{Context, Result, bail};
use sha2::{Digest, Sha256};
use std::future::Future;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::config::DependencySource;
use crate::git::{GitRepo, is_commit_sha, normalize_url};
use crate::utils::{FileLock, ensure_dir, normalize_path_for_storage, resolve_relative};

/// A source materialized on the local filesystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSource {
    /// Project directory containing `kubedeps.yaml`.
    pub path: PathBuf,
    /// `sha256:<hex>` over the directory contents.
    pub fingerprint: String,
}

/// Turns a declared source into a local project directory.
pub trait SourceResolver {
    /// Fetch or locate `source`, resolving relative paths against `base_dir`.
    fn resolve(
        &self,
        source: &DependencySource,
        base_dir: &Path,
    ) -> impl Future<Output = Result<ResolvedSource>> + Send;
}

/// Canonical identity of a source, independent of where it is checked out.
///
/// - local: `path:<absolute normalized path>`
/// - git: `git:<normalized url>@<revision or HEAD>#<subPath>`
pub fn identity_key(source: &DependencySource, base_dir: &Path) -> Result<String> {
    match source {
        DependencySource::Path {
            path,
        } => {
            let absolute = resolve_relative(base_dir, path)?;
            Ok(format!("path:{}", absolute.display()))
        }
        DependencySource::Git {
            url,
            revision,
            sub_path,
        } => Ok(format!(
            "git:{}@{}#{}",
            normalize_url(url),
            revision.as_deref().unwrap_or("HEAD"),
            sub_path.as_deref().map(normalize_path_for_storage).unwrap_or_default()
        )),
    }
}

/// Directory name of the checkout of `url` inside the checkout root.
#[must_use]
pub fn checkout_name(url: &str) -> String {
    let normalized = normalize_url(url);
    let digest = hex::encode(Sha256::digest(normalized.as_bytes()));
    let stem = normalized
        .rsplit(['/', ':'])
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or("repo")
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect::<String>();
    format!("{stem}-{}", &digest[..16])
}

/// Directory of the checkout area holding one worktree per resolved commit.
const WORKTREES_DIR: &str = "worktrees";

/// Directory name of the worktree for `commit` of `url`.
///
/// Keyed by commit so that two revisions of one repository never share a
/// working tree, and a worktree's contents never change once created.
#[must_use]
pub fn worktree_name(url: &str, commit: &str) -> String {
    format!("{}-{}", checkout_name(url), &commit[..commit.len().min(16)])
}

/// Resolves local paths in place and git sources into a shared checkout area.
///
/// Layout below the checkout directory:
///
/// ```text
/// <repo>-<url hash>/                       clone without a working tree
/// worktrees/<repo>-<url hash>-<commit>/    detached worktree per commit
/// ```
#[derive(Debug, Clone)]
pub struct ProjectSourceResolver {
    checkout_dir: PathBuf,
}

impl ProjectSourceResolver {
    pub fn new(checkout_dir: impl Into<PathBuf>) -> Self {
        Self {
            checkout_dir: checkout_dir.into(),
        }
    }

    #[must_use]
    pub fn checkout_dir(&self) -> &Path {
        &self.checkout_dir
    }

    async fn resolve_path(&self, path: &Path, base_dir: &Path) -> Result<ResolvedSource> {
        let directory = resolve_relative(base_dir, path)?;
        if !directory.is_dir() {
            bail!("directory {} does not exist", directory.display());
        }
        let fingerprint = fingerprint(&directory).await?;
        Ok(ResolvedSource {
            path: directory,
            fingerprint,
        })
    }

    async fn resolve_git(
        &self,
        url: &str,
        revision: Option<&str>,
        sub_path: Option<&Path>,
    ) -> Result<ResolvedSource> {
        ensure_dir(&self.checkout_dir)?;
        let name = checkout_name(url);
        let clone_dir = self.checkout_dir.join(&name);

        // Concurrent kubedeps processes share the checkout area.
        let _lock = FileLock::acquire(&self.checkout_dir, &name).await?;

        let repo = GitRepo::new(&clone_dir);
        if repo.is_git_repo() {
            let present = match revision {
                Some(rev) if is_commit_sha(rev) => repo.has_commit(rev).await,
                _ => false,
            };
            if present {
                debug!("Commit {} of {} already fetched", revision.unwrap_or_default(), url);
            } else {
                debug!("Fetching {} into {}", url, clone_dir.display());
                repo.fetch().await?;
            }
        } else {
            info!("Cloning {}", url);
            GitRepo::clone(url, &clone_dir).await?;
        }

        let reference = match revision {
            Some(rev) => rev.to_string(),
            None => repo.remote_head().await?,
        };
        let commit = repo.resolve_commit(&reference).await?;

        let target = self.checkout_dir.join(WORKTREES_DIR).join(worktree_name(url, &commit));
        let worktree = GitRepo::new(&target);
        let reusable = worktree.is_git_repo()
            && worktree.current_commit().await.is_ok_and(|head| head.eq_ignore_ascii_case(&commit));
        if reusable {
            debug!("Reusing worktree {} for {}", target.display(), url);
        } else {
            repo.create_worktree(&target, &commit).await?;
            debug!("Checked out {} at {} into {}", url, &commit[..commit.len().min(12)], target.display());
        }

        let directory = match sub_path {
            Some(sub) => resolve_relative(&target, sub)?,
            None => target.clone(),
        };
        if !directory.starts_with(&target) {
            bail!("subPath {} escapes the repository", directory.display());
        }
        if !directory.is_dir() {
            bail!("subPath {} does not exist in {url}", directory.display());
        }

        let fingerprint = fingerprint(&directory).await?;
        Ok(ResolvedSource {
            path: directory,
            fingerprint,
        })
    }
}

impl SourceResolver for ProjectSourceResolver {
    async fn resolve(&self, source: &DependencySource, base_dir: &Path) -> Result<ResolvedSource> {
        match source {
            DependencySource::Path {
                path,
            } => self.resolve_path(path, base_dir).await,
            DependencySource::Git {
                url,
                revision,
                sub_path,
            } => self
                .resolve_git(url, revision.as_deref(), sub_path.as_deref())
                .await
                .with_context(|| format!("git source {url}")),
        }
    }
}

/// Hash a directory on the blocking pool.
async fn fingerprint(directory: &Path) -> Result<String> {
    let directory = directory.to_path_buf();
    tokio::task::spawn_blocking(move || checksum::directory_checksum(&directory))
        .await
        .context("Fingerprint task panicked")?
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_path_identity_is_normalized() {
        let a = identity_key(
            &DependencySource::Path {
                path: PathBuf::from("../db"),
            },
            Path::new("/work/api"),
        )
        .unwrap();
        let b = identity_key(
            &DependencySource::Path {
                path: PathBuf::from("./../db/"),
            },
            Path::new("/work/web"),
        )
        .unwrap();
        assert_eq!(a, "path:/work/db");
        assert_eq!(a, b);
    }

    #[test]
    fn test_git_identity() {
        let source = |rev: Option<&str>, url: &str| DependencySource::Git {
            url: url.to_string(),
            revision: rev.map(str::to_string),
            sub_path: Some(PathBuf::from("deploy")),
        };
        let base = Path::new("/anywhere");
        assert_eq!(
            identity_key(&source(None, "https://example.com/db.git"), base).unwrap(),
            "git:https://example.com/db@HEAD#deploy"
        );
        assert_eq!(
            identity_key(&source(Some("v1"), "https://example.com/db.git"), base).unwrap(),
            identity_key(&source(Some("v1"), "https://example.com/db"), Path::new("/elsewhere")).unwrap()
        );
        assert_ne!(
            identity_key(&source(Some("v1"), "https://example.com/db"), base).unwrap(),
            identity_key(&source(Some("v2"), "https://example.com/db"), base).unwrap()
        );
    }

    #[test]
    fn test_checkout_name() {
        let name = checkout_name("git@example.com:team/database.git");
        assert!(name.starts_with("database-"));
        assert_eq!(name, checkout_name("git@example.com:team/database"));
    }

    #[test]
    fn test_worktree_name_is_keyed_by_commit() {
        let url = "https://example.com/db.git";
        let v1 = worktree_name(url, "1111111111111111111111111111111111111111");
        let v2 = worktree_name(url, "2222222222222222222222222222222222222222");
        assert_eq!(v1, format!("{}-1111111111111111", checkout_name(url)));
        assert_ne!(v1, v2);
    }

    #[tokio::test]
    async fn test_resolve_local_path() {
        let temp = TempDir::new().unwrap();
        let db = temp.path().join("db");
        fs::create_dir(&db).unwrap();
        fs::write(db.join("kubedeps.yaml"), "name: db\n").unwrap();

        let resolver = ProjectSourceResolver::new(temp.path().join("checkouts"));
        let resolved = resolver
            .resolve(
                &DependencySource::Path {
                    path: PathBuf::from("../db"),
                },
                &temp.path().join("app"),
            )
            .await
            .unwrap();
        assert_eq!(resolved.path, db);
        assert!(resolved.fingerprint.starts_with("sha256:"));
    }

    #[tokio::test]
    async fn test_missing_local_path() {
        let temp = TempDir::new().unwrap();
        let resolver = ProjectSourceResolver::new(temp.path().join("checkouts"));
        let err = resolver
            .resolve(
                &DependencySource::Path {
                    path: PathBuf::from("missing"),
                },
                temp.path(),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    mod git {
        use super::*;
        use crate::config::ProjectConfigLoader;
        use crate::config::loader::parse_config;
        use crate::graph::{BuildOptions, GraphBuilder};
        use crate::test_utils::TestGit;

        /// A repository tagged `v1` and `v2`, where `marker.txt` tells them apart.
        fn tagged_repo(root: &Path) -> (TestGit, String, String) {
            let repo = TestGit::init(root.join("origin/lib")).unwrap();
            repo.write("kubedeps.yaml", "name: lib\n").unwrap();
            repo.write("marker.txt", "v1").unwrap();
            repo.write("deploy/kubedeps.yaml", "name: lib-deploy\n").unwrap();
            let v1 = repo.commit_all("first").unwrap();
            repo.tag("v1").unwrap();
            repo.write("marker.txt", "v2").unwrap();
            let v2 = repo.commit_all("second").unwrap();
            repo.tag("v2").unwrap();
            (repo, v1, v2)
        }

        fn git_source(repo: &TestGit, revision: Option<&str>, sub_path: Option<&str>) -> DependencySource {
            DependencySource::Git {
                url: repo.url(),
                revision: revision.map(str::to_string),
                sub_path: sub_path.map(PathBuf::from),
            }
        }

        fn marker(resolved: &ResolvedSource) -> String {
            fs::read_to_string(resolved.path.join("marker.txt")).unwrap()
        }

        #[tokio::test]
        async fn test_revisions_get_separate_worktrees() {
            let temp = TempDir::new().unwrap();
            let (repo, _, _) = tagged_repo(temp.path());
            let resolver = ProjectSourceResolver::new(temp.path().join("checkouts"));

            let old = resolver.resolve(&git_source(&repo, Some("v1"), None), temp.path()).await.unwrap();
            let new = resolver.resolve(&git_source(&repo, Some("v2"), None), temp.path()).await.unwrap();

            assert_ne!(old.path, new.path);
            assert_eq!(marker(&old), "v1");
            assert_eq!(marker(&new), "v2");
            assert_ne!(old.fingerprint, new.fingerprint);
            assert!(old.path.starts_with(temp.path().join("checkouts").join(WORKTREES_DIR)));

            let again = resolver.resolve(&git_source(&repo, Some("v1"), None), temp.path()).await.unwrap();
            assert_eq!(again, old);
        }

        #[tokio::test]
        async fn test_default_branch_follows_new_commits() {
            let temp = TempDir::new().unwrap();
            let (repo, _, _) = tagged_repo(temp.path());
            let resolver = ProjectSourceResolver::new(temp.path().join("checkouts"));

            let first = resolver.resolve(&git_source(&repo, None, None), temp.path()).await.unwrap();
            assert_eq!(marker(&first), "v2");

            repo.write("marker.txt", "v3").unwrap();
            repo.commit_all("third").unwrap();

            let second = resolver.resolve(&git_source(&repo, None, None), temp.path()).await.unwrap();
            assert_eq!(marker(&second), "v3");
            assert_eq!(marker(&first), "v2");
        }

        #[tokio::test]
        async fn test_known_commit_skips_fetch() {
            let temp = TempDir::new().unwrap();
            let (repo, v1, _) = tagged_repo(temp.path());
            let resolver = ProjectSourceResolver::new(temp.path().join("checkouts"));

            let first = resolver.resolve(&git_source(&repo, Some(&v1), None), temp.path()).await.unwrap();
            assert_eq!(marker(&first), "v1");

            // Without the origin a fetch would fail.
            fs::remove_dir_all(repo.path()).unwrap();
            let second = resolver.resolve(&git_source(&repo, Some(&v1), None), temp.path()).await.unwrap();
            assert_eq!(second.path, first.path);
        }

        #[tokio::test]
        async fn test_unknown_revision() {
            let temp = TempDir::new().unwrap();
            let (repo, _, _) = tagged_repo(temp.path());
            let resolver = ProjectSourceResolver::new(temp.path().join("checkouts"));

            let err = resolver.resolve(&git_source(&repo, Some("v9"), None), temp.path()).await.unwrap_err();
            match err.root_cause().downcast_ref::<crate::core::KubedepsError>() {
                Some(crate::core::KubedepsError::GitCommandError {
                    stderr,
                    ..
                }) => assert!(stderr.contains("revision 'v9' not found")),
                other => panic!("unexpected error: {other:?}"),
            }
        }

        #[tokio::test]
        async fn test_sub_path() {
            let temp = TempDir::new().unwrap();
            let (repo, _, _) = tagged_repo(temp.path());
            let resolver = ProjectSourceResolver::new(temp.path().join("checkouts"));

            let deploy =
                resolver.resolve(&git_source(&repo, Some("v1"), Some("deploy")), temp.path()).await.unwrap();
            assert!(deploy.path.ends_with("deploy"));
            assert!(deploy.path.join("kubedeps.yaml").is_file());

            let err = resolver
                .resolve(&git_source(&repo, Some("v1"), Some("missing")), temp.path())
                .await
                .unwrap_err();
            assert!(format!("{err:#}").contains("does not exist"));

            let err = resolver
                .resolve(&git_source(&repo, Some("v1"), Some("../..")), temp.path())
                .await
                .unwrap_err();
            assert!(format!("{err:#}").contains("escapes the repository"));
        }

        #[tokio::test]
        async fn test_graph_nodes_keep_their_own_revision() {
            let temp = TempDir::new().unwrap();
            let (repo, _, _) = tagged_repo(temp.path());
            let app_dir = temp.path().join("app");
            fs::create_dir_all(&app_dir).unwrap();

            let root = parse_config(
                &format!(
                    "name: app\ndependencies:\n  - name: lib-old\n    source: {{ git: {url}, revision: v1 }}\n  - name: lib-new\n    source: {{ git: {url}, revision: v2 }}\n",
                    url = repo.url()
                ),
                "kubedeps.yaml",
            )
            .unwrap();

            let loader = ProjectConfigLoader::new();
            let resolver = ProjectSourceResolver::new(temp.path().join("checkouts"));
            let graph = GraphBuilder::new(&loader, &resolver)
                .build(&app_dir, root, BuildOptions::default())
                .await
                .unwrap();

            let marker_of = |name: &str| {
                let id = graph.find_by_name(name).pop().unwrap();
                let node = graph.node(&id).unwrap();
                fs::read_to_string(node.resolved_path.join("marker.txt")).unwrap()
            };
            assert_eq!(marker_of("lib-old"), "v1");
            assert_eq!(marker_of("lib-new"), "v2");
        }
    }
}
