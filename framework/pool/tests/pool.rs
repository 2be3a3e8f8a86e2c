#![cfg(unix)]

use std::os::unix::fs::PermissionsExt as _;
use std::path::Path;
use std::sync::Arc;

use fleet_tunnel_pool::prelude::*;

const PORT_START: u16 = 39100;

fn write_script(dir: &Path, name: &str, body: &str) {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
}

/// A runtime made of shell scripts. `start` reports a port conflict on `$FAIL_START_PORT`, after
/// `$CONFLICT_DELAY` seconds, and `register` refuses `$FAIL_REGISTER_PORT`.
fn fake_runtime(root: &Path) -> FleetConfig {
    let source = root.join("runtime");
    std::fs::create_dir_all(&source).unwrap();
    write_script(
        &source,
        "register",
        r#"if [ "$6" = "$FAIL_REGISTER_PORT" ]; then echo "registration refused" >&2; exit 1; fi
echo "registered with $2 on port $6""#,
    );
    write_script(
        &source,
        "start",
        r#"if [ "$2" = "$FAIL_START_PORT" ]; then sleep "${CONFLICT_DELAY:-0}"; echo "listen tcp :$2: bind: Address already in use"; exit 1; fi
exec sleep 300"#,
    );
    write_script(&source, "unregister", r#"read reply; echo "removed with reply $reply""#);
    write_script(&source, "run", r#"echo "running $1""#);

    let mut config = FleetConfig::default();
    config.ports = PortRange::new(PORT_START, PORT_START + 9);
    config.pool.max_runners = Some(4);
    config.paths.runner_root = root.join("runners");
    config.paths.template_dir = root.join("runners/.template");
    config.runtime.template_source = Some(source);
    config.runtime.unregister_settle_ms = 0;
    config.runtime.unregister_timeout_ms = 5_000;
    config.readiness.grace_ms = 300;
    config.readiness.poll_ms = 50;
    config
}

fn all_free() -> PortAllocator<fn(u16) -> bool> {
    let probe: fn(u16) -> bool = |_| true;
    PortAllocator::with_probe(PortRange::new(PORT_START, PORT_START + 9), probe)
}

fn process_state(pid: i32) -> char {
    let stat = std::fs::read_to_string(format!("/proc/{pid}/stat")).unwrap_or_default();
    stat.rsplit(')')
        .next()
        .and_then(|rest| rest.trim_start().chars().next())
        .unwrap_or('?')
}

#[tokio::test]
async fn ensure_twice_provisions_nothing_new() {
    let dir = tempfile::tempdir().unwrap();
    let config = Arc::new(fake_runtime(dir.path()));
    let mut pool = RunnerPool::new(config.clone());

    let report = pool.ensure_with_ports(2, "secret", all_free()).await.unwrap();
    assert_eq!(report.created, vec![1, 2]);
    let first_pid = pool.get(1).unwrap().pid();
    assert!(first_pid.is_some());

    let report = pool.ensure_with_ports(2, "secret", all_free()).await.unwrap();
    assert_eq!(report.created, Vec::<usize>::new());
    assert_eq!(report.kept, 2);

    let report = pool.ensure_with_ports(3, "secret", all_free()).await.unwrap();
    assert_eq!(report.created, vec![3]);
    assert_eq!(pool.get(1).unwrap().pid(), first_pid);
    assert_eq!(pool.get(3).unwrap().port(), PORT_START + 2);

    let register_log =
        std::fs::read_to_string(pool.get(1).unwrap().workspace().join(REGISTER_LOG_FILE)).unwrap();
    assert!(register_log.contains("registered with"));
    assert!(!register_log.contains("secret"));

    assert_eq!(pool.teardown_all().await, 3);
    for index in 1..=3 {
        assert!(!config.paths.runner_root.join(workspace_name(index)).exists());
    }
}

#[tokio::test]
async fn port_conflict_retries_on_next_port() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = fake_runtime(dir.path());
    config
        .runtime
        .env
        .insert("FAIL_START_PORT".to_string(), PORT_START.to_string());
    let mut pool = RunnerPool::new(Arc::new(config));

    let report = pool.ensure_with_ports(1, "token", all_free()).await.unwrap();
    assert_eq!(report.created, vec![1]);

    let runner = pool.get(1).unwrap();
    assert_eq!(runner.port(), PORT_START + 1);
    assert_eq!(runner.state(), RunnerState::Running);

    pool.teardown_all().await;
}

#[tokio::test]
async fn conflict_is_detected_while_another_process_holds_the_port() {
    let holder = std::net::TcpListener::bind(("127.0.0.1", PORT_START)).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let mut config = fake_runtime(dir.path());
    config.readiness.grace_ms = 800;
    config
        .runtime
        .env
        .insert("FAIL_START_PORT".to_string(), PORT_START.to_string());
    config
        .runtime
        .env
        .insert("CONFLICT_DELAY".to_string(), "0.2".to_string());
    let mut pool = RunnerPool::new(Arc::new(config));

    let report = pool.ensure_with_ports(1, "token", all_free()).await.unwrap();
    assert_eq!(report.created, vec![1]);

    let runner = pool.get(1).unwrap();
    assert_ne!(runner.port(), PORT_START);
    assert_eq!(runner.state(), RunnerState::Running);
    let log = std::fs::read_to_string(runner.log_path()).unwrap();
    assert!(!log.contains("already in use"), "{log}");

    pool.teardown_all().await;
    drop(holder);
}

#[tokio::test]
async fn failed_scale_up_keeps_earlier_runners_and_tears_down_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = fake_runtime(dir.path());
    config
        .runtime
        .env
        .insert("FAIL_REGISTER_PORT".to_string(), (PORT_START + 1).to_string());
    let config = Arc::new(config);

    let mut pool = RunnerPool::new(config.clone());
    let err = pool
        .ensure_with_ports(3, "token", all_free())
        .await
        .unwrap_err();
    assert!(
        matches!(err, FleetError::Registration { index: 2, .. }),
        "{err}"
    );
    assert_eq!(pool.len(), 1);
    assert_eq!(pool.get(1).unwrap().state(), RunnerState::Running);
    drop(pool);

    // A later invocation finds both the live runner and the failed one.
    let mut reopened = RunnerPool::open(config.clone()).unwrap();
    assert_eq!(reopened.highest_index(), 2);
    assert_eq!(reopened.get(2).unwrap().state(), RunnerState::Failed);

    assert_eq!(reopened.teardown_all().await, 2);
    assert!(!config.paths.runner_root.join(workspace_name(1)).exists());
    assert!(!config.paths.runner_root.join(workspace_name(2)).exists());
}

#[tokio::test]
async fn teardown_of_empty_pool_is_safe() {
    let dir = tempfile::tempdir().unwrap();
    let mut pool = RunnerPool::new(Arc::new(fake_runtime(dir.path())));
    assert_eq!(pool.teardown_all().await, 0);
    assert_eq!(pool.teardown_all().await, 0);
}

#[tokio::test]
async fn resume_continues_exactly_the_suspended_runners() {
    let dir = tempfile::tempdir().unwrap();
    let mut pool = RunnerPool::new(Arc::new(fake_runtime(dir.path())));
    pool.ensure_with_ports(2, "token", all_free()).await.unwrap();
    let pids = pool.runners().filter_map(Runner::pid).collect::<Vec<_>>();

    assert_eq!(pool.suspend_all(), 2);
    assert!(pool.is_suspended());
    assert!(pool
        .runners()
        .all(|runner| runner.state() == RunnerState::Suspended));
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    if Path::new("/proc").exists() {
        for pid in &pids {
            assert_eq!(process_state(*pid), 'T');
        }
    }

    let resumed = pool.resume_all();
    assert_eq!(resumed, pids);
    assert!(pool
        .runners()
        .all(|runner| runner.state() == RunnerState::Running));

    pool.teardown_all().await;
}
