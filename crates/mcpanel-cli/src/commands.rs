use anyhow::{Context, Result, bail};
use indicatif::{ProgressBar, ProgressStyle};
use mcpanel_azure::VmPowerController;
use mcpanel_core::{AzureConfig, PanelConfig, ReadinessPhase, ReadinessSession};
use mcpanel_readiness::{
    AuthBootstrap, AuthState, BackendClient, CredentialStore, LoginOutcome, PanelClient,
    PollerConfig, ReadinessConfig, ReadinessError, ReadinessService, ServerStatus, StatusSnapshot,
    spawn_status_poller,
};
use std::io::{self, BufRead, Write};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

struct Services {
    credentials: Arc<CredentialStore>,
    panel: Arc<PanelClient>,
    backend: Arc<BackendClient>,
}

fn services(config: PanelConfig) -> Result<Services> {
    let credentials = Arc::new(open_credentials()?);
    let panel = Arc::new(PanelClient::new(config.clone()).context("Failed to build panel client")?);
    let backend = Arc::new(
        BackendClient::new(config, credentials.clone()).context("Failed to build backend client")?,
    );
    Ok(Services {
        credentials,
        panel,
        backend,
    })
}

fn open_credentials() -> Result<CredentialStore> {
    let path = CredentialStore::default_path()?;
    CredentialStore::load(&path)
        .with_context(|| format!("Failed to open credential store at {}", path.display()))
}

pub async fn serve(bind: SocketAddr) -> Result<()> {
    let config = AzureConfig::from_env().context("Azure configuration incomplete")?;
    let controller = VmPowerController::new(config).context("Failed to build VM controller")?;
    mcpanel_functions::serve(bind, Arc::new(controller))
        .await
        .context("VM functions server failed")?;
    Ok(())
}

pub async fn start(config: PanelConfig) -> Result<()> {
    let services = services(config)?;
    let readiness = Arc::new(ReadinessService::new(
        services.panel.clone(),
        services.backend.clone(),
        ReadinessConfig::default(),
    ));

    let mut rx = readiness.subscribe();
    let handle = match readiness.spawn() {
        Ok(handle) => handle,
        Err(ReadinessError::AlreadyActive) => bail!("A start attempt is already in progress"),
        Err(e) => return Err(e.into()),
    };

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::with_template("{spinner} [{elapsed}] {msg}")?);
    spinner.enable_steady_tick(Duration::from_millis(120));

    while rx.changed().await.is_ok() {
        let session = rx.borrow_and_update().clone();
        spinner.set_message(describe_session(&session));
        if session.phase.is_terminal() {
            break;
        }
    }

    let session = handle.await.context("Readiness task panicked")?;
    spinner.finish_and_clear();

    if session.phase != ReadinessPhase::Ready {
        bail!("{}", session.message);
    }
    println!("{}", session.message);

    let auth = AuthBootstrap::new(services.backend, services.credentials);
    print_auth_state(&auth.retry().await?);
    Ok(())
}

pub async fn status(config: PanelConfig) -> Result<()> {
    let services = services(config)?;

    let vm = match services.panel.vm_status().await {
        Ok(vm) => vm,
        Err(e) => bail!("Failed to get VM status: {e}"),
    };
    println!("VM:     {} ({})", vm.display(), vm.power_state);

    if vm.is_running() {
        match services.backend.server_status().await {
            Ok(server) => print_server_status(&server),
            Err(e) if e.is_transport() => println!("Server: backend unreachable"),
            Err(e) => println!("Server: {e}"),
        }
    } else if vm.is_offline() {
        println!("The VM is shut down. Run `mcpanel start` to power it on.");
    } else if vm.is_starting() {
        println!("The VM is starting up.");
    }

    Ok(())
}

pub async fn watch(config: PanelConfig) -> Result<()> {
    let services = services(config)?;
    let (mut rx, cancel) =
        spawn_status_poller(services.panel, services.backend, PollerConfig::default());

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                cancel.cancel();
                break;
            }
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = rx.borrow_and_update().clone();
                print_snapshot(&snapshot);
            }
        }
    }

    Ok(())
}

pub async fn login(config: PanelConfig, username: &str, totp: Option<&str>) -> Result<()> {
    let services = services(config)?;
    let password = read_password()?;
    let auth = AuthBootstrap::new(services.backend, services.credentials);

    let outcome = match auth.login(username, &password, totp).await {
        Ok(outcome) => outcome,
        Err(ReadinessError::Api(e)) if e.is_transport() => {
            bail!("Backend unreachable ({e}). Is the VM running? Try `mcpanel start`.")
        }
        Err(e) => return Err(e).context("Login failed"),
    };

    match outcome {
        LoginOutcome::TwoFactorRequired => {
            println!("Two-factor code required. Re-run with --totp <code>.");
        }
        LoginOutcome::Authenticated(user) => println!("Logged in as {}", user.username),
    }
    Ok(())
}

pub fn logout() -> Result<()> {
    open_credentials()?.clear()?;
    println!("Logged out");
    Ok(())
}

pub async fn whoami(config: PanelConfig) -> Result<()> {
    let services = services(config)?;
    let auth = AuthBootstrap::new(services.backend, services.credentials);
    print_auth_state(&auth.verify().await?);
    Ok(())
}

fn read_password() -> Result<String> {
    if let Ok(password) = std::env::var("MCPANEL_PASSWORD") {
        return Ok(password);
    }
    eprint!("Password: ");
    io::stderr().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    let password = line.trim_end_matches(['\r', '\n']).to_string();
    if password.is_empty() {
        bail!("No password given (set MCPANEL_PASSWORD or type it on stdin)");
    }
    Ok(password)
}

fn describe_session(session: &ReadinessSession) -> String {
    let (step, total) = session.phase.step();
    match &session.vm {
        Some(vm) => format!(
            "[{step}/{total}] {} (VM: {}, polls: {})",
            session.message,
            vm.display(),
            session.vm_polls
        ),
        None => format!("[{step}/{total}] {}", session.message),
    }
}

fn print_auth_state(state: &AuthState) {
    match &state.user {
        Some(user) => println!("Authenticated as {}", user.username),
        None if state.backend_unreachable => {
            println!("Backend unreachable; stored token kept. Run `mcpanel start` if the VM is off.");
        }
        None => println!("Not logged in. Run `mcpanel login -u <username>`."),
    }
}

fn print_server_status(server: &ServerStatus) {
    println!("Server: {}", if server.online { "online" } else { "offline" });
    if let Some(uptime) = server.uptime {
        println!("Uptime: {}", format_uptime(uptime));
    }
    if let Some(players) = &server.players {
        let max = players.max.unwrap_or(20);
        if players.online.is_empty() {
            println!("Players: {}/{max}", players.count);
        } else {
            println!("Players: {}/{max} ({})", players.count, players.online.join(", "));
        }
    }
    if let Some(tps) = server.tps.as_ref().and_then(|t| t.tps1m) {
        println!("TPS:    {tps:.1}");
    }
}

fn print_snapshot(snapshot: &StatusSnapshot) {
    let vm = snapshot
        .vm
        .as_ref()
        .map_or_else(|| "checking".to_string(), |vm| vm.display().to_string());
    let server = match (&snapshot.server, snapshot.vm_running()) {
        (Some(s), _) if s.online => {
            let players = s.players.as_ref().map_or(0, |p| p.count);
            format!("online, {players} players")
        }
        (Some(_), _) => "offline".to_string(),
        (None, true) => "unreachable".to_string(),
        (None, false) => "-".to_string(),
    };
    println!("VM: {vm:<20} Server: {server}");
}

fn format_uptime(seconds: f64) -> String {
    let total = Duration::try_from_secs_f64(seconds).map_or(0, |d| d.as_secs());
    let (hours, minutes) = (total / 3600, (total % 3600) / 60);
    if hours > 0 {
        format!("{hours}h {minutes}m")
    } else {
        format!("{minutes}m")
    }
}
