//! Control surface
//!
//! Consumes [`ControlRequest`]s from a [`ControlChannel`], checks the issuer
//! against the admin allowlist, parses the text into a [`Command`] and runs
//! it. Every write is one [`SharedState::mutate`] critical section, so a
//! command is either fully applied and persisted or not applied at all.
//!
//! Requests are processed one at a time in arrival order. The only part that
//! runs on its own task is a restore's wait for the upload, so a pending
//! restore never blocks other commands.

use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, watch};

use super::command::{self, Command, CommandTag, Mutation, Query, Transfer};
use super::error::{ControlResult, ValidationError};
use crate::channels::ControlChannel;
use crate::error::{ClassifiedError, Error};
use crate::metrics;
use crate::models::{ControlRequest, Origin, PeerId};
use crate::scheduler::{RateGate, DEFAULT_DAILY_CAP};
use crate::storage::{migrate, DistributionState, SharedState, StateStore};

/// Reply sent to private messages from non-admins
pub const AUTO_REPLY: &str =
    "This is an automated account. Your message has been passed on to the administrator.";

/// Most log lines returned by a single `!log`
const MAX_LOG_LINES: usize = 200;

/// Default wait for a restore upload
pub const DEFAULT_IMPORT_TIMEOUT: Duration = Duration::from_secs(120);

/// Where a request stands once its in-order part has run
enum Step {
    Done(Option<String>),
    /// The restore prompt went out and the upload is still outstanding
    AwaitingUpload(oneshot::Receiver<Vec<u8>>),
}

/// Administrative command processor
pub struct ControlSurface {
    state: SharedState,
    bootstrap_admin: PeerId,
    import_timeout: Duration,
    gate: RateGate,
    started: Instant,
}

impl ControlSurface {
    pub fn new(state: SharedState, bootstrap_admin: PeerId) -> Self {
        Self {
            state,
            bootstrap_admin,
            import_timeout: DEFAULT_IMPORT_TIMEOUT,
            gate: RateGate::new(DEFAULT_DAILY_CAP),
            started: Instant::now(),
        }
    }

    pub fn with_import_timeout(mut self, timeout: Duration) -> Self {
        self.import_timeout = timeout;
        self
    }

    pub fn with_default_daily_cap(mut self, cap: u32) -> Self {
        self.gate = RateGate::new(cap);
        self
    }

    /// Consume requests until the channel closes or `shutdown` fires
    pub async fn serve(
        self: Arc<Self>,
        channel: Arc<dyn ControlChannel>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        tracing::info!(bootstrap_admin = self.bootstrap_admin, "Control surface started");

        loop {
            tokio::select! {
                request = channel.next_request() => {
                    let Some(request) = request else {
                        tracing::info!("Control channel closed");
                        break;
                    };
                    if let Step::AwaitingUpload(upload) = self.process(&request, channel.as_ref()).await {
                        let surface = Arc::clone(&self);
                        let channel = Arc::clone(&channel);
                        tokio::spawn(async move {
                            surface.finish_import(&request, channel.as_ref(), upload).await;
                        });
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Control surface stopped");
    }

    /// Tell the bootstrap admin the service is up
    pub async fn announce_start(&self, channel: &dyn ControlChannel) {
        let text = format!("relaycast {} started", env!("CARGO_PKG_VERSION"));
        if let Err(e) = channel.notify(self.bootstrap_admin, &text).await {
            tracing::warn!(error = %e, "Failed to send startup notice");
        }
    }

    /// Handle one request end to end, including a restore's upload wait.
    ///
    /// Returns the final reply text, or `None` when the request was ignored.
    pub async fn handle(&self, request: &ControlRequest, channel: &dyn ControlChannel) -> Option<String> {
        match self.process(request, channel).await {
            Step::Done(reply) => reply,
            Step::AwaitingUpload(upload) => Some(self.finish_import(request, channel, upload).await),
        }
    }

    async fn process(&self, request: &ControlRequest, channel: &dyn ControlChannel) -> Step {
        let authorized = self.state.read(|s| s.is_admin(request.issuer)).await;
        if !authorized {
            return Step::Done(self.reject(request, channel).await);
        }

        let command = match command::parse(&request.text) {
            Ok(Some(command)) => command,
            Ok(None) => {
                channel.dismiss(request).await;
                return Step::Done(None);
            }
            Err(e) => {
                metrics::record_command("invalid", "rejected");
                let text = e.to_string();
                send_reply(channel, request, &text).await;
                return Step::Done(Some(text));
            }
        };

        let tag = command.tag();
        tracing::info!(issuer = request.issuer, command = %tag, "Handling command");

        let result = match command {
            Command::Write(mutation) => {
                self.state
                    .mutate(|s| apply(s, &mutation, request.origin))
                    .await
            }
            Command::Read(query) => Ok(self.query(&query).await),
            Command::Transfer(Transfer::Export) => self.export(request, channel).await,
            Command::Transfer(Transfer::Import) => match self.begin_import(request, channel).await {
                Ok(upload) => return Step::AwaitingUpload(upload),
                Err(e) => Err(e),
            },
        };

        Step::Done(Some(self.conclude(tag, result, request, channel).await))
    }

    /// Record the outcome of a command and send its final reply
    async fn conclude(
        &self,
        tag: CommandTag,
        result: ControlResult<String>,
        request: &ControlRequest,
        channel: &dyn ControlChannel,
    ) -> String {
        let (outcome, text) = match result {
            Ok(text) => ("ok", text),
            Err(e) if e.is_validation() => {
                tracing::debug!(command = %tag, error = %e, "Command rejected");
                ("rejected", e.reply_text())
            }
            Err(e) => {
                let text = e.reply_text();
                let error = Error::from(e);
                tracing::error!(
                    command = %tag,
                    error = %error,
                    category = error.category().as_str(),
                    "Command failed"
                );
                ("failed", text)
            }
        };

        metrics::record_command(tag.as_str(), outcome);
        send_reply(channel, request, &text).await;
        text
    }

    async fn reject(&self, request: &ControlRequest, channel: &dyn ControlChannel) -> Option<String> {
        if !request.origin.is_private() {
            tracing::debug!(issuer = request.issuer, "Ignoring group message from non-admin");
            channel.dismiss(request).await;
            return None;
        }

        tracing::info!(issuer = request.issuer, "Private message from non-admin");
        send_reply(channel, request, AUTO_REPLY).await;

        let notice = format!("Message from {}: {}", request.issuer, request.text);
        if let Err(e) = channel.notify(self.bootstrap_admin, &notice).await {
            tracing::warn!(error = %e, "Failed to notify bootstrap admin");
        }
        Some(AUTO_REPLY.to_string())
    }

    async fn query(&self, query: &Query) -> String {
        match query {
            Query::ListDestinations => self.state.read(render_destinations).await,
            Query::ShowStatus => {
                let uptime = format_uptime(self.started.elapsed());
                self.state
                    .read(|s| render_status(s, &self.gate, &uptime))
                    .await
            }
            Query::QueryLog { days } => self.state.read(|s| render_log(s, *days)).await,
            Query::ShowUptime => format!("Uptime: {}", format_uptime(self.started.elapsed())),
            Query::Help => command::help_text(),
        }
    }

    async fn export(&self, request: &ControlRequest, channel: &dyn ControlChannel) -> ControlResult<String> {
        let snapshot = self.state.snapshot().await;
        let contents = StateStore::encode(&snapshot)?;
        let name = format!("relaycast-state-{}.json", Utc::now().format("%Y%m%d-%H%M%S"));

        channel.send_document(request.issuer, &name, contents).await?;
        tracing::info!(issuer = request.issuer, name, "Snapshot exported");
        Ok(format!("Snapshot sent as {name}"))
    }

    async fn begin_import(
        &self,
        request: &ControlRequest,
        channel: &dyn ControlChannel,
    ) -> ControlResult<oneshot::Receiver<Vec<u8>>> {
        // Registered before the prompt so an immediate upload is accepted
        let upload = channel.expect_attachment(request.issuer);
        let secs = self.import_timeout.as_secs();
        channel
            .reply(
                request,
                &format!("Send the state document within {secs} seconds to restore it."),
            )
            .await?;
        Ok(upload)
    }

    async fn finish_import(
        &self,
        request: &ControlRequest,
        channel: &dyn ControlChannel,
        upload: oneshot::Receiver<Vec<u8>>,
    ) -> String {
        let result = self.restore_upload(request, upload).await;
        self.conclude(CommandTag::Restore, result, request, channel).await
    }

    async fn restore_upload(
        &self,
        request: &ControlRequest,
        upload: oneshot::Receiver<Vec<u8>>,
    ) -> ControlResult<String> {
        let secs = self.import_timeout.as_secs();
        let contents = match tokio::time::timeout(self.import_timeout, upload).await {
            Ok(Ok(contents)) => contents,
            Ok(Err(_)) => return Err(ValidationError::ImportSuperseded.into()),
            Err(_) => return Err(ValidationError::ImportTimedOut { secs }.into()),
        };

        let normalized = migrate::decode(&contents, self.bootstrap_admin).map_err(|e| {
            ValidationError::InvalidSnapshot {
                reason: e.to_string(),
            }
        })?;
        let state = normalized.state;
        let summary = format!(
            "Snapshot restored: {} destinations, {} admins, {} log entries",
            state.destinations.len(),
            state.admins.len(),
            state.activity_log.len()
        );

        self.state.replace(state).await?;
        tracing::info!(issuer = request.issuer, "Snapshot imported");
        Ok(summary)
    }
}

async fn send_reply(channel: &dyn ControlChannel, request: &ControlRequest, text: &str) {
    if let Err(e) = channel.reply(request, text).await {
        tracing::warn!(issuer = request.issuer, error = %e, "Failed to send reply");
    }
}

// ============================================================================
// Mutations
// ============================================================================

/// Apply a mutation to a draft state and describe the change
pub fn apply(state: &mut DistributionState, mutation: &Mutation, origin: Origin) -> ControlResult<String> {
    let text = match *mutation {
        Mutation::AddDestination { id, cadence } => {
            if state.is_registered(id) {
                return Err(ValidationError::AlreadyRegistered { id }.into());
            }
            state.destinations.insert(id, cadence);
            match cadence {
                Some(minutes) => format!("Added destination {id} (every {minutes} min)"),
                None => format!("Added destination {id} (global cadence)"),
            }
        }
        Mutation::RemoveDestination { id } => {
            if state.destinations.remove(&id).is_none() {
                return Err(ValidationError::NotRegistered { id }.into());
            }
            state.daily_caps.remove(&id);
            format!("Removed destination {id}")
        }
        Mutation::SelfRegister => {
            let Origin::Group(id) = origin else {
                return Err(ValidationError::NotInGroup.into());
            };
            if state.is_registered(id) {
                return Err(ValidationError::AlreadyRegistered { id }.into());
            }
            state.destinations.insert(id, None);
            format!("This group ({id}) is now a destination")
        }
        Mutation::SetGlobalCadence { minutes } => {
            state.global_cadence_minutes = minutes;
            format!("Global cadence set to {minutes} min")
        }
        Mutation::SetDestinationCadence { id, minutes } => {
            let Some(cadence) = state.destinations.get_mut(&id) else {
                return Err(ValidationError::NotRegistered { id }.into());
            };
            *cadence = Some(minutes);
            format!("Cadence for {id} set to {minutes} min")
        }
        Mutation::SetDailyCap { id, cap } => {
            if !state.is_registered(id) {
                return Err(ValidationError::NotRegistered { id }.into());
            }
            state.daily_caps.insert(id, cap);
            format!("Daily cap for {id} set to {cap}")
        }
        Mutation::SetSelectionMode(mode) => {
            state.selection_mode = mode;
            format!("Selection mode set to {mode}")
        }
        Mutation::SetBroadcastAll(enabled) => {
            state.broadcast_all = enabled;
            format!("Broadcast to all groups: {}", on_off(enabled))
        }
        Mutation::AddAdmin { id } => {
            if !state.admins.insert(id) {
                return Err(ValidationError::AlreadyAdmin { id }.into());
            }
            format!("Added admin {id}")
        }
    };
    Ok(text)
}

// ============================================================================
// Rendering
// ============================================================================

fn on_off(enabled: bool) -> &'static str {
    if enabled {
        "on"
    } else {
        "off"
    }
}

fn cadence_label(state: &DistributionState, id: PeerId) -> String {
    match state.destinations.get(&id).copied().flatten() {
        Some(minutes) => format!("every {minutes} min"),
        None => format!("every {} min (global)", state.global_cadence_minutes),
    }
}

fn render_destinations(state: &DistributionState) -> String {
    if state.destinations.is_empty() {
        return "No destinations registered.".to_string();
    }

    let mut lines = vec![format!("Destinations ({}):", state.destinations.len())];
    for id in state.destinations.keys() {
        lines.push(format!("- {id}: {}", cadence_label(state, *id)));
    }
    lines.join("\n")
}

fn render_status(state: &DistributionState, gate: &RateGate, uptime: &str) -> String {
    let now = Utc::now();
    let since = now - ChronoDuration::hours(24);

    let mut lines = vec![
        "Status".to_string(),
        format!("Mode: {}", state.selection_mode),
        format!("Global cadence: {} min", state.global_cadence_minutes),
        format!("Broadcast to all groups: {}", on_off(state.broadcast_all)),
        format!("Destinations: {}", state.destinations.len()),
        format!("Deliveries (24h): {}", state.sends_last_day(now)),
        format!("Admins: {}", state.admins.len()),
        format!("Uptime: {uptime}"),
    ];

    for id in state.destinations.keys() {
        let cap = state.daily_cap(*id, gate.default_daily_cap());
        lines.push(format!(
            "{id}: {}, {}/{cap} today, {}",
            cadence_label(state, *id),
            state.sends_since(*id, since),
            gate.check(state, *id, now)
        ));
    }
    lines.join("\n")
}

fn render_log(state: &DistributionState, days: u32) -> String {
    let since = Utc::now() - ChronoDuration::days(i64::from(days));
    let entries: Vec<_> = state.log_since(since).collect();
    if entries.is_empty() {
        return "No logs found.".to_string();
    }

    let mut lines = Vec::with_capacity(entries.len().min(MAX_LOG_LINES) + 1);
    if entries.len() > MAX_LOG_LINES {
        lines.push(format!(
            "Showing the latest {MAX_LOG_LINES} of {} entries",
            entries.len()
        ));
    }
    let skip = entries.len().saturating_sub(MAX_LOG_LINES);
    for entry in entries.into_iter().skip(skip) {
        lines.push(format!(
            "{} | {} | {}",
            entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
            entry.destination,
            entry.item_id
        ));
    }
    lines.join("\n")
}

fn format_uptime(elapsed: Duration) -> String {
    let total = elapsed.as_secs();
    let (days, hours, minutes, seconds) = (
        total / 86_400,
        (total % 86_400) / 3600,
        (total % 3600) / 60,
        total % 60,
    );
    if days > 0 {
        format!("{days}d {hours}h {minutes}m {seconds}s")
    } else if hours > 0 {
        format!("{hours}h {minutes}m {seconds}s")
    } else {
        format!("{minutes}m {seconds}s")
    }
}
