use crate::{BackendHealth, ServerStatus, VmControl};
use mcpanel_core::VmState;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::watch;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollerConfig {
    pub vm_interval: Duration,
    pub server_interval: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            vm_interval: Duration::from_secs(15),
            server_interval: Duration::from_secs(10),
        }
    }
}

/// Latest background view of the VM and the game server.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusSnapshot {
    pub vm: Option<VmState>,
    pub server: Option<ServerStatus>,
    pub vm_checked_at: Option<SystemTime>,
    pub server_checked_at: Option<SystemTime>,
    pub vm_polls: u32,
    pub server_polls: u32,
}

impl StatusSnapshot {
    #[must_use]
    pub fn vm_running(&self) -> bool {
        self.vm.as_ref().is_some_and(VmState::is_running)
    }
}

/// Spawn the read-only status poller.
///
/// The poller never starts the VM. Backend status is only polled while the
/// last VM snapshot says `running`. Cancel the returned token to stop it.
pub fn spawn_status_poller<V: VmControl, B: BackendHealth>(
    vm: Arc<V>,
    backend: Arc<B>,
    config: PollerConfig,
) -> (watch::Receiver<StatusSnapshot>, CancellationToken) {
    let (tx, rx) = watch::channel(StatusSnapshot::default());
    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();

    tokio::spawn(async move {
        run_status_poller(vm, backend, config, tx, cancel_clone).await;
    });

    (rx, cancel)
}

async fn run_status_poller<V: VmControl, B: BackendHealth>(
    vm: Arc<V>,
    backend: Arc<B>,
    config: PollerConfig,
    tx: watch::Sender<StatusSnapshot>,
    cancel: CancellationToken,
) {
    let mut vm_ticker = interval(config.vm_interval);
    vm_ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut server_ticker = interval(config.server_interval);
    server_ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!(
        vm_interval_secs = config.vm_interval.as_secs(),
        server_interval_secs = config.server_interval.as_secs(),
        "Status poller started"
    );

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                info!("Status poller stopped");
                break;
            }
            _ = vm_ticker.tick() => {
                let state = vm.vm_status().await.unwrap_or_else(|e| {
                    debug!("VM status poll failed: {}", e);
                    VmState::unknown()
                });
                tx.send_modify(|s| {
                    if !state.is_running() {
                        s.server = None;
                    }
                    s.vm = Some(state);
                    s.vm_checked_at = Some(SystemTime::now());
                    s.vm_polls += 1;
                });
            }
            _ = server_ticker.tick() => {
                if !tx.borrow().vm_running() {
                    continue;
                }
                let status = match backend.server_status().await {
                    Ok(status) => Some(status),
                    Err(e) => {
                        debug!("Server status poll failed: {}", e);
                        None
                    }
                };
                tx.send_modify(|s| {
                    s.server = status;
                    s.server_checked_at = Some(SystemTime::now());
                    s.server_polls += 1;
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::tests::{FakeBackend, FakeVm};
    use mcpanel_core::PowerState;
    use std::sync::atomic::Ordering;

    #[tokio::test(start_paused = true)]
    async fn test_deallocated_vm_skips_server_polls() {
        let vm = Arc::new(FakeVm::new(Vec::new(), PowerState::Deallocated));
        let backend = Arc::new(FakeBackend::new(Some(0), vm.seen_running.clone()));

        let (rx, cancel) =
            spawn_status_poller(vm.clone(), backend.clone(), PollerConfig::default());
        tokio::time::sleep(Duration::from_secs(61)).await;
        cancel.cancel();

        let snapshot = rx.borrow().clone();
        assert!(snapshot.vm_polls >= 4);
        assert_eq!(snapshot.vm.unwrap().power_state, PowerState::Deallocated);
        assert_eq!(snapshot.server_polls, 0);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
        assert_eq!(vm.start_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_running_vm_polls_server() {
        let vm = Arc::new(FakeVm::new(Vec::new(), PowerState::Running));
        let backend = Arc::new(FakeBackend::new(Some(0), vm.seen_running.clone()));

        let (mut rx, cancel) =
            spawn_status_poller(vm.clone(), backend.clone(), PollerConfig::default());
        rx.wait_for(|s| s.server_polls >= 2).await.unwrap();
        cancel.cancel();

        let snapshot = rx.borrow().clone();
        assert!(snapshot.vm_running());
        assert!(snapshot.server.as_ref().is_some_and(|s| s.online));
        assert!(snapshot.server_checked_at.is_some());
        assert_eq!(vm.start_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_cleared_when_vm_stops() {
        let vm = Arc::new(FakeVm::new(
            vec![Some(PowerState::Running), Some(PowerState::Running)],
            PowerState::Deallocated,
        ));
        let backend = Arc::new(FakeBackend::new(Some(0), vm.seen_running.clone()));

        let (mut rx, cancel) =
            spawn_status_poller(vm.clone(), backend.clone(), PollerConfig::default());
        rx.wait_for(|s| s.server.is_some()).await.unwrap();

        rx.wait_for(|s| s.vm_polls >= 3).await.unwrap();
        let snapshot = rx.borrow().clone();
        assert_eq!(snapshot.vm.unwrap().power_state, PowerState::Deallocated);
        assert!(snapshot.server.is_none());

        let server_calls = backend.calls.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(40)).await;
        assert!(rx.borrow().server.is_none());
        assert_eq!(backend.calls.load(Ordering::SeqCst), server_calls);
        cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_vm_poll_reports_unknown() {
        let vm = Arc::new(FakeVm::new(vec![None], PowerState::Running));
        let backend = Arc::new(FakeBackend::new(Some(0), vm.seen_running.clone()));

        let (mut rx, cancel) = spawn_status_poller(vm, backend, PollerConfig::default());
        rx.wait_for(|s| s.vm_polls >= 1).await.unwrap();
        assert_eq!(rx.borrow().vm, Some(VmState::unknown()));
        cancel.cancel();
    }
}
