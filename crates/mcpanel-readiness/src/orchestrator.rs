use crate::{
    ApiError, BackendClient, PanelClient, ReadinessError, Schedule, ServerStatus, StartAck,
};
use mcpanel_core::{ReadinessPhase, ReadinessSession, VmState};
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub const MSG_REQUESTING_START: &str = "Sending start command...";
pub const MSG_AWAITING_VM: &str = "VM is booting up... This takes 1-2 minutes.";
pub const MSG_AWAITING_BACKEND: &str = "VM is running! Waiting for backend to come online...";
pub const MSG_READY: &str = "Server is ready.";
pub const MSG_VM_TIMEOUT: &str = "VM startup timed out. Please try again.";
pub const MSG_BACKEND_TIMEOUT: &str =
    "VM is running but backend is still starting. Try refreshing in a moment.";

/// Start and observe the VM.
pub trait VmControl: Send + Sync + 'static {
    fn start_vm(&self) -> impl Future<Output = Result<StartAck, ApiError>> + Send;
    fn vm_status(&self) -> impl Future<Output = Result<VmState, ApiError>> + Send;
}

/// Backend status calls.
pub trait BackendHealth: Send + Sync + 'static {
    fn server_status(&self) -> impl Future<Output = Result<ServerStatus, ApiError>> + Send;

    /// Whether the backend answers at all. Defaults to a successful status call.
    fn reachable(&self) -> impl Future<Output = Result<(), ApiError>> + Send {
        async { self.server_status().await.map(|_| ()) }
    }
}

impl VmControl for PanelClient {
    async fn start_vm(&self) -> Result<StartAck, ApiError> {
        PanelClient::start_vm(self).await
    }

    async fn vm_status(&self) -> Result<VmState, ApiError> {
        PanelClient::vm_status(self).await
    }
}

impl BackendHealth for BackendClient {
    async fn server_status(&self) -> Result<ServerStatus, ApiError> {
        BackendClient::server_status(self).await
    }

    async fn reachable(&self) -> Result<(), ApiError> {
        BackendClient::health(self).await
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadinessConfig {
    pub poll_interval: Duration,
    pub vm_poll_attempts: u32,
    pub backend_poll_attempts: u32,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            vm_poll_attempts: 60,
            backend_poll_attempts: 30,
        }
    }
}

/// Drives one start attempt at a time from a cold VM to a reachable backend.
///
/// Phases run strictly in order: start request, VM power polling, backend
/// health polling. Single-poll failures only consume budget; the session
/// surfaces one terminal message.
pub struct ReadinessService<V, B> {
    vm: Arc<V>,
    backend: Arc<B>,
    config: ReadinessConfig,
    session: watch::Sender<ReadinessSession>,
    schedule: Mutex<Option<Schedule>>,
}

impl<V: VmControl, B: BackendHealth> ReadinessService<V, B> {
    pub fn new(vm: Arc<V>, backend: Arc<B>, config: ReadinessConfig) -> Self {
        Self {
            vm,
            backend,
            config,
            session: watch::Sender::new(ReadinessSession::idle()),
            schedule: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn session(&self) -> ReadinessSession {
        self.session.borrow().clone()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ReadinessSession> {
        self.session.subscribe()
    }

    /// Run a start attempt to completion and return its terminal session.
    ///
    /// # Errors
    /// Returns `ReadinessError::AlreadyActive` if another attempt is in
    /// flight; that attempt is left untouched.
    pub async fn run(&self) -> Result<ReadinessSession, ReadinessError> {
        let schedule = self.try_begin()?;
        Ok(self.drive(schedule).await)
    }

    /// Like [`ReadinessService::run`], but in a background task. The slot is
    /// claimed before this returns.
    ///
    /// # Errors
    /// Returns `ReadinessError::AlreadyActive` if another attempt is in flight.
    pub fn spawn(self: &Arc<Self>) -> Result<JoinHandle<ReadinessSession>, ReadinessError> {
        let schedule = self.try_begin()?;
        let this = Arc::clone(self);
        Ok(tokio::spawn(async move { this.drive(schedule).await }))
    }

    /// Abort the in-flight attempt at its next wait.
    pub fn cancel(&self) {
        let guard = self.schedule.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(schedule) = guard.as_ref() {
            schedule.cancel();
        }
    }

    /// Reset a terminal session to idle once its outcome has been shown.
    /// Returns `false` if the session is still in flight.
    pub fn acknowledge(&self) -> bool {
        self.session.send_if_modified(|s| {
            if s.phase.is_terminal() {
                *s = ReadinessSession::idle();
                true
            } else {
                false
            }
        });
        !self.session.borrow().is_in_flight()
    }

    fn try_begin(&self) -> Result<Schedule, ReadinessError> {
        let claimed = self.session.send_if_modified(|s| {
            if s.is_in_flight() {
                return false;
            }
            *s = ReadinessSession::begin(MSG_REQUESTING_START);
            true
        });
        if !claimed {
            warn!("Start requested while an attempt is already in progress");
            return Err(ReadinessError::AlreadyActive);
        }

        let schedule = Schedule::new();
        *self.schedule.lock().unwrap_or_else(PoisonError::into_inner) = Some(schedule.clone());
        Ok(schedule)
    }

    fn advance(&self, phase: ReadinessPhase, message: &str) {
        self.session.send_modify(|s| {
            if !s.advance(phase, message) {
                warn!("Ignoring backwards transition {} -> {}", s.phase, phase);
            }
        });
    }

    fn finish(&self, phase: ReadinessPhase, message: &str) -> ReadinessSession {
        // Release the schedule before the terminal phase frees the slot, so a
        // new attempt's schedule is never the one taken here.
        self.schedule
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let mut session = ReadinessSession::idle();
        self.session.send_modify(|s| {
            if !s.advance(phase, message) {
                warn!("Ignoring backwards transition {} -> {}", s.phase, phase);
            }
            session = s.clone();
        });
        info!("Readiness session finished: {} ({})", session.phase, session.message);
        session
    }

    fn cancelled(&self) -> ReadinessSession {
        info!("Readiness session cancelled");
        self.finish(ReadinessPhase::Failed, "Failed to start VM: cancelled")
    }

    async fn drive(&self, schedule: Schedule) -> ReadinessSession {
        info!("Sending VM start command");
        match self.vm.start_vm().await {
            Ok(ack) => debug!("VM start acknowledged: {:?}", ack),
            Err(e) => {
                warn!("VM start failed: {}", e);
                return self.finish(ReadinessPhase::Failed, &format!("Failed to start VM: {e}"));
            }
        }

        self.advance(ReadinessPhase::AwaitingVmRunning, MSG_AWAITING_VM);
        if !self.await_vm_running(&schedule).await {
            return if schedule.is_cancelled() {
                self.cancelled()
            } else {
                self.finish(ReadinessPhase::TimedOut, MSG_VM_TIMEOUT)
            };
        }

        self.advance(ReadinessPhase::AwaitingBackendReady, MSG_AWAITING_BACKEND);
        if !self.await_backend_ready(&schedule).await {
            return if schedule.is_cancelled() {
                self.cancelled()
            } else {
                self.finish(ReadinessPhase::TimedOut, MSG_BACKEND_TIMEOUT)
            };
        }

        self.finish(ReadinessPhase::Ready, MSG_READY)
    }

    async fn await_vm_running(&self, schedule: &Schedule) -> bool {
        for attempt in 1..=self.config.vm_poll_attempts {
            if !schedule.wait(self.config.poll_interval).await {
                return false;
            }
            let polled = self.vm.vm_status().await;
            let state = match &polled {
                Ok(state) => state.clone(),
                Err(e) => {
                    debug!("VM status poll {} failed: {}", attempt, e);
                    VmState::unknown()
                }
            };
            let running = polled.is_ok() && state.is_running();
            debug!("VM status poll {}: {}", attempt, state.power_state);
            self.session.send_modify(|s| {
                s.vm_polls += 1;
                s.vm = Some(state);
            });
            if running {
                info!("VM running after {} polls", attempt);
                return true;
            }
        }
        warn!(
            "VM did not reach running within {} polls",
            self.config.vm_poll_attempts
        );
        false
    }

    async fn await_backend_ready(&self, schedule: &Schedule) -> bool {
        for attempt in 1..=self.config.backend_poll_attempts {
            if !schedule.wait(self.config.poll_interval).await {
                return false;
            }
            let result = self.backend.reachable().await;
            self.session.send_modify(|s| s.backend_polls += 1);
            match result {
                Ok(_) => {
                    info!("Backend reachable after {} polls", attempt);
                    return true;
                }
                Err(e) => debug!("Backend poll {} not ready: {}", attempt, e),
            }
        }
        warn!(
            "Backend did not respond within {} polls",
            self.config.backend_poll_attempts
        );
        false
    }
}
