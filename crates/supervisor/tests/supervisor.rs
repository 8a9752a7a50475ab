#![cfg(unix)]

use std::time::{Duration, Instant};

use billnotify_supervisor::{
    OutputLine, Stream, Supervisor, SupervisorConfig, SupervisorError, WorkerProcess, WorkerSpec,
};

fn fast() -> SupervisorConfig {
    SupervisorConfig {
        restart_backoff: Duration::from_millis(200),
        shutdown_grace: Duration::from_millis(300),
    }
}

fn shell(name: &str, script: &str) -> WorkerSpec {
    WorkerSpec::new(name, "sh").args(["-c", script])
}

/// Poll `check` against the worker snapshot until it holds or 5s pass.
async fn wait_for<F>(sup: &Supervisor, name: &str, check: F) -> WorkerProcess
where
    F: Fn(&WorkerProcess) -> bool,
{
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let w = sup.worker(name).expect("worker is registered");
        if check(&w) {
            return w;
        }
        assert!(Instant::now() < deadline, "condition not reached; last snapshot {w:?}");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

fn kill(pid: u32, signal: i32) {
    let rc = unsafe { libc::kill(pid as libc::pid_t, signal) };
    assert_eq!(rc, 0, "kill({pid}, {signal}) failed");
}

#[tokio::test]
async fn crashed_worker_is_restarted_exactly_once() {
    let (sup, _output) = Supervisor::new(fast());
    sup.start_worker(shell("notifier", "sleep 30")).unwrap();

    let first = wait_for(&sup, "notifier", |w| w.pid.is_some()).await;
    let first_pid = first.pid.unwrap();
    kill(first_pid, libc::SIGKILL);

    let restarted = wait_for(&sup, "notifier", |w| w.restart_count == 1 && w.pid.is_some()).await;
    assert_ne!(restarted.pid, Some(first_pid));
    assert_eq!(restarted.last_exit_code, None, "killed by a signal, no exit code");

    // One crash means one restart, not a loop.
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(sup.worker("notifier").unwrap().restart_count, 1);

    sup.shutdown().await;
    assert!(!sup.worker("notifier").unwrap().is_running());
}

#[tokio::test]
async fn nonzero_exit_is_recorded_and_restarted() {
    let (sup, _output) = Supervisor::new(fast());
    sup.start_worker(shell("flaky", "exit 3")).unwrap();

    let w = wait_for(&sup, "flaky", |w| w.restart_count >= 1).await;
    assert_eq!(w.last_exit_code, Some(3));
    sup.shutdown().await;
}

#[tokio::test]
async fn shutdown_stops_workers_and_prevents_restarts() {
    let (sup, _output) = Supervisor::new(fast());
    sup.start_worker(shell("a", "sleep 30")).unwrap();
    sup.start_worker(shell("b", "sleep 30")).unwrap();
    wait_for(&sup, "a", |w| w.pid.is_some()).await;
    wait_for(&sup, "b", |w| w.pid.is_some()).await;

    let started = Instant::now();
    sup.shutdown().await;
    assert!(started.elapsed() < Duration::from_secs(3));

    // Longer than the backoff: a restart would have shown up by now.
    tokio::time::sleep(Duration::from_millis(400)).await;
    for w in sup.workers() {
        assert!(!w.is_running(), "{} still running", w.name);
        assert_eq!(w.restart_count, 0);
    }

    let err = sup.start_worker(shell("c", "sleep 30")).unwrap_err();
    assert!(matches!(err, SupervisorError::ShuttingDown));
}

#[tokio::test]
async fn shutdown_during_restart_backoff_launches_nothing() {
    let config = SupervisorConfig {
        restart_backoff: Duration::from_millis(300),
        ..fast()
    };
    let (sup, _output) = Supervisor::new(config);
    sup.start_worker(shell("looping", "exit 1")).unwrap();

    // Exited and waiting out the backoff.
    wait_for(&sup, "looping", |w| w.last_exit_code == Some(1) && w.pid.is_none()).await;
    sup.shutdown().await;

    tokio::time::sleep(Duration::from_millis(500)).await;
    let w = sup.worker("looping").unwrap();
    assert_eq!(w.restart_count, 0);
    assert!(!w.is_running());
}

#[tokio::test]
async fn worker_ignoring_sigterm_is_killed_after_grace() {
    let (sup, _output) = Supervisor::new(fast());
    // An ignored disposition survives exec, so sleep itself ignores SIGTERM.
    sup.start_worker(shell("stubborn", "trap '' TERM; exec sleep 30")).unwrap();
    wait_for(&sup, "stubborn", |w| w.pid.is_some()).await;
    // Give sh time to install the trap and exec.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let started = Instant::now();
    sup.shutdown().await;
    let took = started.elapsed();
    assert!(took >= Duration::from_millis(300), "returned before the grace period: {took:?}");
    assert!(took < Duration::from_secs(5));
    assert!(!sup.worker("stubborn").unwrap().is_running());
}

#[tokio::test]
async fn output_is_tagged_with_the_worker_name() {
    let (sup, mut output) = Supervisor::new(fast());
    sup.start_worker(shell("w1", "echo hello; echo oops >&2; sleep 30")).unwrap();

    let mut lines: Vec<OutputLine> = Vec::new();
    while lines.len() < 2 {
        let line = tokio::time::timeout(Duration::from_secs(5), output.recv())
            .await
            .expect("worker output")
            .expect("stream open");
        lines.push(line);
    }
    lines.sort_by_key(|l| l.line.clone());

    assert_eq!(lines[0].to_string(), "[w1] hello");
    assert_eq!(lines[0].stream, Stream::Stdout);
    assert_eq!(lines[1].to_string(), "[w1] oops");
    assert_eq!(lines[1].stream, Stream::Stderr);

    sup.shutdown().await;
}

#[tokio::test]
async fn bad_command_is_reported_immediately() {
    let (sup, _output) = Supervisor::new(fast());
    let err = sup
        .start_worker(WorkerSpec::new("ghost", "/nonexistent/billnotify-worker"))
        .unwrap_err();
    assert!(matches!(err, SupervisorError::Spawn { ref name, .. } if name == "ghost"));
    assert!(sup.workers().is_empty());
}

#[tokio::test]
async fn worker_names_are_unique() {
    let (sup, _output) = Supervisor::new(fast());
    sup.start_worker(shell("dup", "sleep 30")).unwrap();
    let err = sup.start_worker(shell("dup", "sleep 30")).unwrap_err();
    assert!(matches!(err, SupervisorError::DuplicateWorker(name) if name == "dup"));
    assert_eq!(sup.workers().len(), 1);
    sup.shutdown().await;
}

#[tokio::test]
async fn environment_is_passed_to_workers() {
    let (sup, mut output) = Supervisor::new(fast());
    sup.start_worker(shell("env", "echo mode=$BILLNOTIFY_MODE; sleep 30").env("BILLNOTIFY_MODE", "test"))
        .unwrap();

    let line = tokio::time::timeout(Duration::from_secs(5), output.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(line.line, "mode=test");
    sup.shutdown().await;
}
