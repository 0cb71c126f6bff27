//! End-to-end orchestration tests: graph building, planning and running
//! against in-memory projects and a recording executor.

use std::collections::HashSet;
use std::time::Duration;

use kubedeps::core::{KubedepsError, NodeOperationError};
use kubedeps::graph::{BuildOptions, DependencyGraph, NodeId};
use kubedeps::planner::{Direction, plan};
use kubedeps::runner::{DependencyRunner, OutputHub, RunOptions, RunResult};
use kubedeps::state::StateCache;
use kubedeps::test_utils::{RecordingExecutor, SharedBuffer, VirtualProjects, init_test_logging, project};
use tokio_util::sync::CancellationToken;

/// app → {api, web}; api → db; web → db
fn diamond() -> VirtualProjects {
    VirtualProjects::new()
        .with("/w/app", project("app").depends_on("api", "../api").depends_on("web", "../web"))
        .with("/w/api", project("api").depends_on("db", "../db"))
        .with("/w/web", project("web").depends_on("db", "../db"))
        .with("/w/db", project("db"))
}

/// app → {api, web}; api → db; web → cache
fn two_branches() -> VirtualProjects {
    VirtualProjects::new()
        .with("/w/app", project("app").depends_on("api", "../api").depends_on("web", "../web"))
        .with("/w/api", project("api").depends_on("db", "../db"))
        .with("/w/web", project("web").depends_on("cache", "../cache"))
        .with("/w/db", project("db"))
        .with("/w/cache", project("cache"))
}

struct Run {
    graph: DependencyGraph,
    result: RunResult,
    output: String,
}

impl Run {
    fn names(&self, ids: &[NodeId]) -> HashSet<String> {
        ids.iter().map(|id| self.graph.name_of(id)).collect()
    }

    fn succeeded(&self) -> HashSet<String> {
        self.names(&self.result.succeeded)
    }

    fn build_skipped(&self) -> HashSet<String> {
        self.names(&self.result.build_skipped)
    }

    fn failed(&self) -> HashSet<String> {
        self.result.failed.keys().map(|id| self.graph.name_of(id)).collect()
    }

    /// Skipped node name → name of the failed node that blocked it.
    fn skipped(&self) -> Vec<(String, String)> {
        let mut skipped: Vec<_> = self
            .result
            .skipped
            .iter()
            .map(|(id, blocker)| (self.graph.name_of(id), self.graph.name_of(blocker)))
            .collect();
        skipped.sort();
        skipped
    }
}

async fn run_with(
    projects: &VirtualProjects,
    executor: &RecordingExecutor,
    cache: &StateCache,
    direction: Direction,
    targets: &[&str],
    options: RunOptions,
    token: CancellationToken,
) -> Run {
    init_test_logging(None);
    let graph = projects.build("/w/app", BuildOptions::default()).await.unwrap();
    let buffer = SharedBuffer::default();
    let output = OutputHub::new(buffer.clone());
    let targets: Vec<String> = targets.iter().map(ToString::to_string).collect();

    let result = {
        let plan = plan(&graph, direction, &targets).unwrap();
        DependencyRunner::new(executor, cache, &output).with_cancellation(token).run(&plan, &options).await
    };

    Run {
        graph,
        result,
        output: buffer.contents(),
    }
}

async fn run(projects: &VirtualProjects, executor: &RecordingExecutor, direction: Direction, targets: &[&str]) -> Run {
    run_with(
        projects,
        executor,
        &StateCache::new(),
        direction,
        targets,
        RunOptions::default(),
        CancellationToken::new(),
    )
    .await
}

fn before(executor: &RecordingExecutor, first: &str, then: &str) -> bool {
    let end = executor.position(&format!("end:{first}")).unwrap();
    let start = executor.position(&format!("start:{then}")).unwrap();
    end < start
}

#[tokio::test]
async fn test_shared_dependency_deployed_once_before_dependents() {
    let executor = RecordingExecutor::new();
    let run = run(&diamond(), &executor, Direction::Deploy, &[]).await;

    assert!(run.result.is_success());
    assert_eq!(executor.call_count("db"), 1);
    assert_eq!(executor.calls().len(), 4);
    assert!(before(&executor, "db", "api"));
    assert!(before(&executor, "db", "web"));
    assert!(before(&executor, "api", "app"));
    assert!(before(&executor, "web", "app"));
}

#[tokio::test]
async fn test_purge_runs_in_reverse_order() {
    let executor = RecordingExecutor::new();
    let run = run(&diamond(), &executor, Direction::Purge, &[]).await;

    assert!(run.result.is_success());
    assert_eq!(executor.started().first().map(String::as_str), Some("app"));
    assert_eq!(executor.started().last().map(String::as_str), Some("db"));
    assert!(before(&executor, "api", "db"));
    assert!(before(&executor, "web", "db"));
}

#[tokio::test]
async fn test_cycle_is_reported_with_path() {
    let projects = VirtualProjects::new()
        .with("/w/app", project("app").depends_on("a", "../a"))
        .with("/w/a", project("a").depends_on("b", "../b"))
        .with("/w/b", project("b").depends_on("c", "../c"))
        .with("/w/c", project("c").depends_on("a", "../a"));

    let err = projects.build("/w/app", BuildOptions::default()).await.unwrap_err();
    assert_eq!(err.to_string(), "Circular dependency detected: app → a → b → c → a");
}

#[tokio::test]
async fn test_tolerated_cycle_runs_each_member_once() {
    let projects = VirtualProjects::new()
        .with("/w/app", project("app").depends_on("a", "../a"))
        .with("/w/a", project("a").depends_on("b", "../b"))
        .with("/w/b", project("b").depends_on("a", "../a"));
    let graph = projects
        .build(
            "/w/app",
            BuildOptions {
                allow_cycles: true,
            },
        )
        .await
        .unwrap();

    let executor = RecordingExecutor::new();
    let cache = StateCache::new();
    let output = OutputHub::new(SharedBuffer::default());
    let plan = plan(&graph, Direction::Deploy, &[]).unwrap();
    let result = DependencyRunner::new(&executor, &cache, &output).run(&plan, &RunOptions::default()).await;

    assert!(result.is_success());
    assert_eq!(executor.started(), ["b", "a", "app"]);
}

#[tokio::test]
async fn test_scoped_deploy_runs_target_and_its_dependencies() {
    let executor = RecordingExecutor::new();
    let run = run(&diamond(), &executor, Direction::Deploy, &["api"]).await;

    assert!(run.result.is_success());
    assert_eq!(run.succeeded(), HashSet::from(["api".to_string(), "db".to_string()]));
    assert_eq!(run.names(&run.result.passed_through), HashSet::from(["app".to_string()]));
    assert_eq!(executor.call_count("web"), 0);
    assert_eq!(executor.call_count("app"), 0);
}

#[tokio::test]
async fn test_scoped_purge_keeps_shared_dependency() {
    let executor = RecordingExecutor::new();
    let run = run(&diamond(), &executor, Direction::Purge, &["api"]).await;

    assert_eq!(run.succeeded(), HashSet::from(["api".to_string()]));
    assert_eq!(executor.call_count("db"), 0);
}

#[tokio::test]
async fn test_unknown_target_suggests_closest_name() {
    let graph = diamond().build("/w/app", BuildOptions::default()).await.unwrap();
    let err = plan(&graph, Direction::Deploy, &["webb".to_string()]).unwrap_err();

    assert!(matches!(
        err,
        KubedepsError::UnknownDependency { ref name, ref suggestion }
            if name == "webb" && suggestion.as_deref() == Some("web")
    ));
}

#[tokio::test]
async fn test_failure_skips_dependents_but_not_siblings() {
    let executor = RecordingExecutor::new().failing("db");
    let run = run(&two_branches(), &executor, Direction::Deploy, &[]).await;

    assert!(!run.result.is_success());
    assert_eq!(run.failed(), HashSet::from(["db".to_string()]));
    assert_eq!(run.succeeded(), HashSet::from(["cache".to_string(), "web".to_string()]));
    assert_eq!(
        run.skipped(),
        [("api".to_string(), "db".to_string()), ("app".to_string(), "db".to_string())]
    );
    assert_eq!(executor.call_count("api"), 0);

    let summary = run.result.summary(&run.graph);
    assert!(summary.contains("db: deploy failed: db exploded"), "{summary}");
    assert!(summary.contains("api: dependency 'db' failed"), "{summary}");
}

#[tokio::test]
async fn test_failed_node_is_recorded_in_state() {
    let executor = RecordingExecutor::new().failing("cache");
    let cache = StateCache::new();
    let run = run_with(
        &two_branches(),
        &executor,
        &cache,
        Direction::Deploy,
        &[],
        RunOptions::default(),
        CancellationToken::new(),
    )
    .await;

    let cache_id = run.graph.find_by_name("cache")[0].clone();
    let entry = cache.get(&cache_id).unwrap();
    assert_eq!(entry.last_run_status, kubedeps::state::RunStatus::Failed);
    assert!(!entry.is_deployed_at(&run.graph.node(&cache_id).unwrap().fingerprint));
}

async fn deploy_with_cache(projects: &VirtualProjects, cache: &StateCache, executor: &RecordingExecutor) -> Run {
    run_with(projects, executor, cache, Direction::Deploy, &[], RunOptions::default(), CancellationToken::new()).await
}

#[tokio::test]
async fn test_unchanged_projects_skip_image_builds() {
    let projects = diamond();
    let cache = StateCache::new();

    let first = RecordingExecutor::new();
    let run = deploy_with_cache(&projects, &cache, &first).await;
    assert!(run.build_skipped().is_empty());
    assert!(first.calls().iter().all(|c| !c.skip_build));

    let second = RecordingExecutor::new();
    let run = deploy_with_cache(&projects, &cache, &second).await;
    assert_eq!(run.build_skipped().len(), 4);
    assert!(second.calls().iter().all(|c| c.skip_build));

    projects.set_fingerprint("/w/db", "sha256:changed");
    let third = RecordingExecutor::new();
    let run = deploy_with_cache(&projects, &cache, &third).await;
    assert!(!run.build_skipped().contains("db"));
    assert!(run.build_skipped().contains("api"));
}

#[tokio::test]
async fn test_force_build_ignores_state() {
    let projects = diamond();
    let cache = StateCache::new();
    deploy_with_cache(&projects, &cache, &RecordingExecutor::new()).await;

    let executor = RecordingExecutor::new();
    let options = RunOptions {
        force_build: true,
        ..RunOptions::default()
    };
    let run = run_with(&projects, &executor, &cache, Direction::Deploy, &[], options, CancellationToken::new()).await;
    assert!(run.build_skipped().is_empty());
}

#[tokio::test]
async fn test_buffered_output_is_one_block_per_node() {
    let executor = RecordingExecutor::new();
    let run = run(&diamond(), &executor, Direction::Deploy, &[]).await;

    for name in ["db", "api", "web", "app"] {
        let block = format!(
            "==> {name} (deploy)\n    {name} deploy step 0\n    {name} deploy step 1\n    {name} deploy step 2\n"
        );
        assert!(run.output.contains(&block), "missing block for {name}:\n{}", run.output);
    }
}

#[tokio::test]
async fn test_verbose_output_is_prefixed() {
    let executor = RecordingExecutor::new();
    let options = RunOptions {
        verbose: true,
        ..RunOptions::default()
    };
    let run = run_with(
        &diamond(),
        &executor,
        &StateCache::new(),
        Direction::Deploy,
        &[],
        options,
        CancellationToken::new(),
    )
    .await;

    assert!(run.output.contains("[db] db deploy step 0\n"));
    assert!(!run.output.contains("==>"));
}

#[tokio::test]
async fn test_concurrency_limit_is_respected() {
    let mut root = project("app");
    let mut projects = VirtualProjects::new();
    let mut executor = RecordingExecutor::new();
    for i in 0..6 {
        let name = format!("leaf{i}");
        root = root.depends_on(&name, &format!("../{name}"));
        projects = projects.with(&format!("/w/{name}"), project(&name));
        executor = executor.with_delay(&name, Duration::from_millis(20));
    }
    let projects = projects.with("/w/app", root);

    let options = RunOptions {
        concurrency: Some(2),
        ..RunOptions::default()
    };
    let limited =
        run_with(&projects, &executor, &StateCache::new(), Direction::Deploy, &[], options, CancellationToken::new())
            .await;
    assert!(limited.result.is_success());
    assert_eq!(executor.max_concurrency(), 2);

    let unbounded = RecordingExecutor::new();
    let unbounded = (0..6).fold(unbounded, |e, i| e.with_delay(&format!("leaf{i}"), Duration::from_millis(20)));
    run(&projects, &unbounded, Direction::Deploy, &[]).await;
    assert_eq!(unbounded.max_concurrency(), 6);
}

#[tokio::test]
async fn test_cancelled_before_start_runs_nothing() {
    let executor = RecordingExecutor::new();
    let token = CancellationToken::new();
    token.cancel();

    let run = run_with(&diamond(), &executor, &StateCache::new(), Direction::Deploy, &[], RunOptions::default(), token)
        .await;

    assert!(executor.calls().is_empty());
    assert_eq!(run.result.cancelled.len(), 4);
    assert!(!run.result.is_success());
}

#[tokio::test]
async fn test_cancellation_lets_running_nodes_finish() {
    let projects = VirtualProjects::new()
        .with("/w/app", project("app").depends_on("api", "../api"))
        .with("/w/api", project("api").depends_on("db", "../db"))
        .with("/w/db", project("db"));
    let executor = RecordingExecutor::new().with_delay("db", Duration::from_millis(100));
    let token = CancellationToken::new();

    let canceller = token.clone();
    let cache = StateCache::new();
    let (run, ()) = tokio::join!(
        run_with(&projects, &executor, &cache, Direction::Deploy, &[], RunOptions::default(), token),
        async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        }
    );

    assert_eq!(run.succeeded(), HashSet::from(["db".to_string()]));
    assert_eq!(run.names(&run.result.cancelled), HashSet::from(["api".to_string(), "app".to_string()]));
    assert_eq!(executor.started(), ["db"]);
}

#[tokio::test]
async fn test_node_timeout_fails_node_and_skips_dependents() {
    let executor = RecordingExecutor::new().with_delay("db", Duration::from_secs(5));
    let options = RunOptions {
        node_timeout: Some(Duration::from_millis(30)),
        ..RunOptions::default()
    };
    let run = run_with(&diamond(), &executor, &StateCache::new(), Direction::Deploy, &[], options, CancellationToken::new())
        .await;

    let (_, error) = run.result.failed.iter().next().unwrap();
    assert!(error.is_timeout());
    assert!(matches!(error, NodeOperationError::Timeout { after, .. } if *after == Duration::from_millis(30)));
    assert_eq!(run.skipped().len(), 3);
}

#[tokio::test]
async fn test_run_timeout_bounds_the_whole_run() {
    let projects = VirtualProjects::new()
        .with("/w/app", project("app").depends_on("api", "../api"))
        .with("/w/api", project("api").depends_on("db", "../db"))
        .with("/w/db", project("db"));
    let executor = RecordingExecutor::new()
        .with_delay("db", Duration::from_millis(30))
        .with_delay("api", Duration::from_secs(5));
    let options = RunOptions {
        run_timeout: Some(Duration::from_millis(100)),
        ..RunOptions::default()
    };

    let run = run_with(&projects, &executor, &StateCache::new(), Direction::Deploy, &[], options, CancellationToken::new())
        .await;

    assert_eq!(run.succeeded(), HashSet::from(["db".to_string()]));
    assert_eq!(run.failed(), HashSet::from(["api".to_string()]));
    assert_eq!(run.skipped(), [("app".to_string(), "api".to_string())]);
}

/// Every dependency finishes before any of its dependents starts, for a
/// layered graph with plenty of shared nodes.
#[tokio::test]
async fn test_every_edge_is_respected() {
    const NODES: usize = 12;
    let name = |i: usize| format!("n{i}");
    let deps = |i: usize| (0..i).filter(move |j| (i * 7 + j * 3) % 4 == 0);

    let mut projects = VirtualProjects::new();
    for i in 0..NODES {
        let mut p = project(&name(i));
        for j in deps(i) {
            p = p.depends_on(&name(j), &format!("../{}", name(j)));
        }
        projects = projects.with(&format!("/w/{}", name(i)), p);
    }
    let mut root = project("app");
    for i in 0..NODES {
        root = root.depends_on(&name(i), &format!("../{}", name(i)));
    }
    let projects = projects.with("/w/app", root);

    for direction in [Direction::Deploy, Direction::Purge] {
        let executor = RecordingExecutor::new();
        let run = run(&projects, &executor, direction, &[]).await;
        assert!(run.result.is_success());
        assert_eq!(executor.calls().len(), NODES + 1);

        for i in 0..NODES {
            for j in deps(i) {
                let (first, then) = match direction {
                    Direction::Deploy => (name(j), name(i)),
                    Direction::Purge => (name(i), name(j)),
                };
                assert!(before(&executor, &first, &then), "{direction}: {first} must finish before {then}");
            }
        }
    }
}
