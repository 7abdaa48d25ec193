use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use vitals::system::collector::{Collector, SysinfoProvider};
use vitals::system::kill::{KillResult, KillSignal};
use vitals::system::provider::ProcessController;

fn spawn_long_lived_child() -> Child {
    #[cfg(windows)]
    let mut cmd = {
        let mut c = Command::new("powershell");
        c.args([
            "-NoProfile",
            "-NonInteractive",
            "-Command",
            "Start-Sleep -Seconds 30",
        ]);
        c
    };

    #[cfg(not(windows))]
    let mut cmd = {
        let mut c = Command::new("sh");
        c.args(["-c", "sleep 30"]);
        c
    };

    cmd.stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("failed to spawn child process")
}

fn wait_for_pid(collector: &mut Collector, pid: u32, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if collector.refresh().processes.iter().any(|p| p.pid == pid) {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(50));
    }
}

fn wait_for_exit(child: &mut Child) {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        match child.try_wait() {
            Ok(Some(_)) => return,
            Ok(None) if Instant::now() < deadline => thread::sleep(Duration::from_millis(50)),
            Ok(None) => {
                let _ = child.kill();
                panic!("child process did not exit before timeout");
            }
            Err(err) => {
                let _ = child.kill();
                panic!("failed waiting for child exit: {err}");
            }
        }
    }
}

#[test]
fn kill_nonexistent_pid_returns_not_found() {
    let collector = Collector::new(false);
    let result = collector.kill(u32::MAX, KillSignal::Terminate);
    assert_eq!(result, KillResult::NotFound(u32::MAX));
}

#[test]
fn provider_reports_missing_pid_verbatim() {
    let provider = SysinfoProvider::new(false);
    let outcome = provider.kill_process(u32::MAX, KillSignal::Kill);
    assert!(!outcome.success);
    assert_eq!(outcome.message, format!("Process {} not found", u32::MAX));
}

#[test]
fn kill_spawned_child_terminates() {
    let mut child = spawn_long_lived_child();
    let pid = child.id();

    let mut collector = Collector::new(false);
    if !wait_for_pid(&mut collector, pid, Duration::from_secs(3)) {
        let _ = child.kill();
        panic!("child process PID {pid} was not observed before kill attempt");
    }

    let signal = if cfg!(windows) {
        KillSignal::Kill
    } else {
        KillSignal::Terminate
    };
    let mut result = collector.kill(pid, signal);
    if !matches!(result, KillResult::Success(..)) {
        thread::sleep(Duration::from_millis(100));
        collector.refresh();
        result = collector.kill(pid, KillSignal::Kill);
    }

    match result {
        KillResult::Success(killed, _) => {
            assert_eq!(killed, pid);
            wait_for_exit(&mut child);
        }
        KillResult::Failed(_, err) => {
            let _ = child.kill();
            panic!("kill reported failure: {err}");
        }
        KillResult::NotFound(_) => {
            let _ = child.kill();
            panic!("child process not found in collector snapshot");
        }
    }
}

#[test]
fn refresh_produces_a_consistent_snapshot() {
    let mut collector = Collector::new(false);
    let snapshot = collector.refresh();
    assert!(snapshot.captured_at_ms > 0);
    assert!(snapshot.memory.total >= snapshot.memory.used);
    assert!(snapshot.processes.iter().any(|p| p.pid == std::process::id()));
    assert!(snapshot.processes.windows(2).all(|w| w[0].pid <= w[1].pid));
}
