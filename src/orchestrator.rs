use colored::{Color, Colorize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

pub const MONITOR_INTERVAL: Duration = Duration::from_secs(10);
pub const SETTLE_DELAY: Duration = Duration::from_secs(2);
pub const START_STAGGER: Duration = Duration::from_secs(2);
pub const KILL_TIMEOUT: Duration = Duration::from_secs(5);

/// One managed child process: program, args and a console color for its
/// output prefix.
#[derive(Debug, Clone)]
pub struct ServiceSpec {
    pub name: &'static str,
    pub program: PathBuf,
    pub args: Vec<String>,
    pub color: Color,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Starting,
    Running,
}

#[derive(Debug)]
struct RunningService {
    pid: u32,
    state: ServiceState,
}

/// Every spawn performed, in order. Restarts reuse the spec verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnRecord {
    pub name: &'static str,
    pub program: PathBuf,
    pub args: Vec<String>,
}

/// Supervises a fixed list of child processes: linear start sequence,
/// settle-delay promotion to Running, crash removal, and an unconditional
/// respawn tick. Restart has no backoff and no attempt cap — deliberately
/// unlike the bounded reconnect policy used for upstream streams.
pub struct Orchestrator {
    specs: Vec<ServiceSpec>,
    registry: Arc<RwLock<HashMap<&'static str, RunningService>>>,
    history: Arc<RwLock<Vec<SpawnRecord>>>,
    shutting_down: Arc<AtomicBool>,
    monitor_interval: Duration,
    settle_delay: Duration,
    start_stagger: Duration,
    kill_timeout: Duration,
}

impl Orchestrator {
    pub fn new(specs: Vec<ServiceSpec>) -> Self {
        Self {
            specs,
            registry: Arc::new(RwLock::new(HashMap::new())),
            history: Arc::new(RwLock::new(Vec::new())),
            shutting_down: Arc::new(AtomicBool::new(false)),
            monitor_interval: MONITOR_INTERVAL,
            settle_delay: SETTLE_DELAY,
            start_stagger: START_STAGGER,
            kill_timeout: KILL_TIMEOUT,
        }
    }

    /// Override the fixed timings (short intervals for tests).
    pub fn with_intervals(
        mut self,
        monitor: Duration,
        settle: Duration,
        stagger: Duration,
        kill_timeout: Duration,
    ) -> Self {
        self.monitor_interval = monitor;
        self.settle_delay = settle;
        self.start_stagger = stagger;
        self.kill_timeout = kill_timeout;
        self
    }

    /// Hand-written linear start sequence with a fixed inter-start delay.
    pub async fn start_all(&self) {
        for spec in self.specs.clone() {
            self.spawn_service(spec).await;
            tokio::time::sleep(self.start_stagger).await;
        }
    }

    async fn spawn_service(&self, spec: ServiceSpec) {
        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                error!("[Orchestrator] Failed to spawn {}: {}", spec.name, e);
                return;
            }
        };
        let pid = child.id().unwrap_or(0);
        info!("[Orchestrator] Started {} (pid {})", spec.name, pid);

        self.history.write().await.push(SpawnRecord {
            name: spec.name,
            program: spec.program.clone(),
            args: spec.args.clone(),
        });

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(pump_lines(stdout, spec.name, spec.color, false));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(pump_lines(stderr, spec.name, spec.color, true));
        }

        self.registry.write().await.insert(
            spec.name,
            RunningService {
                pid,
                state: ServiceState::Starting,
            },
        );

        // Settle timer: still alive after the delay counts as running.
        {
            let registry = Arc::clone(&self.registry);
            let settle = self.settle_delay;
            let name = spec.name;
            tokio::spawn(async move {
                tokio::time::sleep(settle).await;
                let mut registry = registry.write().await;
                if let Some(service) = registry.get_mut(name) {
                    if service.pid == pid {
                        service.state = ServiceState::Running;
                        info!("[Orchestrator] {} is running", name);
                    }
                }
            });
        }

        // Waiter owns the child; on exit the entry leaves the registry and
        // the monitor tick picks it up.
        let registry = Arc::clone(&self.registry);
        let shutting_down = Arc::clone(&self.shutting_down);
        let name = spec.name;
        tokio::spawn(async move {
            let status = child.wait().await;
            {
                let mut registry = registry.write().await;
                if registry.get(name).map(|s| s.pid) == Some(pid) {
                    registry.remove(name);
                }
            }
            if shutting_down.load(Ordering::SeqCst) {
                info!("[Orchestrator] {} exited during shutdown", name);
            } else {
                match status {
                    Ok(status) => warn!(
                        "[Orchestrator] {} exited with {} - monitor will restart it",
                        name, status
                    ),
                    Err(e) => warn!("[Orchestrator] Failed waiting on {}: {}", name, e),
                }
            }
        });
    }

    /// Monitor loop: every tick, any spec missing from the registry is
    /// respawned unconditionally with its original command and args.
    pub async fn run_monitor(&self) {
        let mut tick = tokio::time::interval(self.monitor_interval);
        tick.tick().await;
        loop {
            tick.tick().await;
            if self.shutting_down.load(Ordering::SeqCst) {
                return;
            }
            for spec in self.specs.clone() {
                let missing = !self.registry.read().await.contains_key(spec.name);
                if missing {
                    info!("[Orchestrator] {} is down - restarting", spec.name);
                    self.spawn_service(spec).await;
                }
            }
        }
    }

    /// Graceful stop: SIGTERM to every tracked child, wait up to the kill
    /// timeout for the registry to drain, escalate stragglers to SIGKILL.
    pub async fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);

        let tracked: Vec<(&'static str, u32)> = self
            .registry
            .read()
            .await
            .iter()
            .map(|(name, service)| (*name, service.pid))
            .collect();

        for (name, pid) in &tracked {
            info!("[Orchestrator] Stopping {} (pid {})", name, pid);
            send_signal(*pid, "-TERM").await;
        }

        let deadline = tokio::time::Instant::now() + self.kill_timeout;
        while !self.registry.read().await.is_empty() {
            if tokio::time::Instant::now() >= deadline {
                let stragglers: Vec<(&'static str, u32)> = self
                    .registry
                    .read()
                    .await
                    .iter()
                    .map(|(name, service)| (*name, service.pid))
                    .collect();
                for (name, pid) in stragglers {
                    warn!("[Orchestrator] {} did not stop in time - killing", name);
                    send_signal(pid, "-KILL").await;
                }
                // Short grace for the waiters to observe the kill.
                for _ in 0..20 {
                    if self.registry.read().await.is_empty() {
                        break;
                    }
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        info!("[Orchestrator] All services stopped");
    }

    pub async fn state(&self, name: &str) -> Option<ServiceState> {
        self.registry.read().await.get(name).map(|s| s.state)
    }

    pub async fn tracked_count(&self) -> usize {
        self.registry.read().await.len()
    }

    pub async fn spawn_history(&self, name: &str) -> Vec<SpawnRecord> {
        self.history
            .read()
            .await
            .iter()
            .filter(|record| record.name == name)
            .cloned()
            .collect()
    }
}

/// Deliver a signal through /bin/kill; a failure usually just means the
/// process is already gone.
async fn send_signal(pid: u32, signal: &str) {
    match Command::new("kill").arg(signal).arg(pid.to_string()).status().await {
        Ok(status) if !status.success() => {
            info!("[Orchestrator] kill {} {} exited with {}", signal, pid, status)
        }
        Err(e) => warn!("[Orchestrator] Failed to signal pid {}: {}", pid, e),
        _ => {}
    }
}

/// Stream one child pipe to the parent console with a colorized prefix.
async fn pump_lines<R: AsyncRead + Unpin>(reader: R, name: &'static str, color: Color, is_err: bool) {
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let prefix = format!("[{}]", name).color(color);
        if is_err {
            eprintln!("{} {}", prefix, line);
        } else {
            println!("{} {}", prefix, line);
        }
    }
}

/// Block until SIGINT, SIGTERM or SIGQUIT.
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let mut quit = signal(SignalKind::quit())?;
    tokio::select! {
        _ = interrupt.recv() => info!("[Orchestrator] SIGINT received"),
        _ = terminate.recv() => info!("[Orchestrator] SIGTERM received"),
        _ = quit.recv() => info!("[Orchestrator] SIGQUIT received"),
    }
    Ok(())
}
