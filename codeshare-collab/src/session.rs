//! Session & Presence Manager.
//!
//! A [`CollabSession`] owns one replicated document, one transport link and
//! the tasks that drive them. There is no process-wide session: callers
//! create sessions explicitly and end them with [`CollabSession::end`] or
//! [`CollabSession::leave`]. Dropping a session aborts its tasks and releases
//! the link.
//!
//! ```text
//!              ┌──────────── pump task ─────────────┐
//!  link.recv ─►│ SyncStep1/2, Delta ─► SharedDoc    │
//!              │ Awareness ─► PresenceRoom          │
//!  outbox    ─►│ local updates ─► Delta ─► link     │
//!  commands  ─►│ presence updates, close            │
//!              └────────────────────────────────────┘
//!              ┌──────────── observer task ─────────┐
//!  DocChange ─►│ Remote Files   ─► TreeSync rebuild │
//!              │ Remote Content ─► refresh content  │
//!              │ Remote Meta    ─► host name, end   │
//!              └────────────────────────────────────┘
//! ```
//!
//! State machine:
//!
//! ```text
//! Disconnected ─► Connecting ─► Active(role) ─► Ending ─► Disconnected
//!                      │
//!                      └─(guest, no host name in time)─► NotFound
//! ```

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use codeshare_core::{ItemId, SessionRole};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::binding::{self, TextBinding};
use crate::doc::{ChangeScope, DocChange, DocError, Origin, SessionStatus, SharedDoc};
use crate::presence::{AwarenessMessage, PresencePatch, PresenceRecord, PresenceRoom};
use crate::protocol::{MessageType, PeerInfo, ProtocolError, SyncMessage};
use crate::storage::{LocalStore, StoreError};
use crate::transport::{Transport, TransportLink};
use crate::tree_sync::{SharedProject, SyncError, TreeSync};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Transport error: {0}")]
    Transport(#[from] ProtocolError),

    #[error("Local store error: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Doc(#[from] DocError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error("Session not found: {0}")]
    NotFound(String),

    #[error("Only the host can {0}")]
    HostOnly(&'static str),

    #[error("Session closed")]
    Closed,
}

/// Timeouts of the session lifecycle.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How long a guest waits for the host name before giving up.
    pub join_validity_timeout: Duration,
    /// How long `probe_session` waits for a host presence.
    pub probe_timeout: Duration,
    /// Pause between writing `status=ended` and disconnecting.
    pub end_grace: Duration,
    /// How long a guest waits for sync before binding content anyway.
    pub content_bind_fallback: Duration,
    /// How long a host waits for peer state before seeding.
    pub initial_sync_wait: Duration,
    /// Bound on flushing pending updates when leaving.
    pub leave_flush_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            join_validity_timeout: Duration::from_millis(5000),
            probe_timeout: Duration::from_millis(3000),
            end_grace: Duration::from_millis(300),
            content_bind_fallback: Duration::from_millis(2000),
            initial_sync_wait: Duration::from_millis(750),
            leave_flush_timeout: Duration::from_millis(250),
        }
    }
}

/// Persisted so a restart can rejoin or rehost.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDescriptor {
    pub session_id: String,
    pub user_name: String,
    pub user_id: String,
    pub role: SessionRole,
}

impl SessionDescriptor {
    /// A missing `user_id` gets a fresh random one.
    pub fn new(
        session_id: impl Into<String>,
        user_name: impl Into<String>,
        user_id: Option<&str>,
        role: SessionRole,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            user_name: user_name.into(),
            user_id: user_id
                .map(str::to_string)
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            role,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Active(SessionRole),
    Ending,
    NotFound,
}

/// What a session is built from, besides its identity.
#[derive(Clone)]
pub struct SessionContext {
    pub project: SharedProject,
    pub store: Option<Arc<LocalStore>>,
    pub config: SessionConfig,
}

impl SessionContext {
    pub fn new(project: SharedProject) -> Self {
        Self {
            project,
            store: None,
            config: SessionConfig::default(),
        }
    }

    pub fn with_store(mut self, store: Arc<LocalStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }
}

enum Command {
    Awareness(AwarenessMessage),
    Close(Option<oneshot::Sender<()>>),
}

struct Shared {
    descriptor: Mutex<SessionDescriptor>,
    config: SessionConfig,
    doc: Arc<SharedDoc>,
    tree: TreeSync,
    presence: Mutex<PresenceRoom>,
    store: Option<Arc<LocalStore>>,
    state: watch::Sender<SessionState>,
    synced: watch::Sender<bool>,
    collaborators: watch::Sender<Vec<PresenceRecord>>,
    commands: mpsc::UnboundedSender<Command>,
}

impl Shared {
    fn descriptor(&self) -> SessionDescriptor {
        self.descriptor
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn presence(&self) -> MutexGuard<'_, PresenceRoom> {
        self.presence.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn role(&self) -> SessionRole {
        self.tree.role()
    }

    fn room(&self) -> String {
        self.descriptor().session_id
    }

    /// Move to `to` if the current state matches `from`.
    fn transition(&self, from: impl Fn(&SessionState) -> bool, to: SessionState) -> bool {
        let changed = self.state.send_if_modified(|state| {
            if from(state) && *state != to {
                *state = to;
                true
            } else {
                false
            }
        });
        if changed {
            log::info!("Session {} is now {to:?}", self.room());
        }
        changed
    }

    fn publish_collaborators(&self) {
        let list = self.presence().collaborators();
        self.collaborators.send_replace(list);
    }

    fn request_close(&self, ack: Option<oneshot::Sender<()>>) {
        let _ = self.commands.send(Command::Close(ack));
    }

    fn clear_descriptor(&self) {
        if let Some(store) = &self.store {
            if let Err(e) = store.clear_session() {
                log::warn!("Failed to clear session descriptor: {e}");
            }
        }
    }

    fn save_snapshot(&self) {
        if !self.role().is_host() {
            return;
        }
        if let Some(store) = &self.store {
            if let Err(e) = store.save_snapshot(&self.room(), &self.doc.full_state()) {
                log::warn!("Failed to save document snapshot: {e}");
            }
        }
    }

    /// React to shared metadata: host name arrival, session end, project
    /// descriptor.
    fn on_meta(&self) {
        if self.role().is_host() {
            return;
        }
        if self.doc.host_name().is_some() {
            self.transition(
                |s| *s == SessionState::Connecting,
                SessionState::Active(SessionRole::Guest),
            );
        }
        self.tree.mirror_project();

        if self.doc.status() == Some(SessionStatus::Ended)
            && self.transition(
                |s| matches!(s, SessionState::Connecting | SessionState::Active(_)),
                SessionState::Disconnected,
            )
        {
            log::info!("Host ended session {}; leaving", self.room());
            self.request_close(None);
            self.clear_descriptor();
        }
    }

    fn on_change(&self, change: DocChange) {
        if change.origin == Origin::Local {
            return;
        }
        match change.scope {
            ChangeScope::Files => {
                self.tree.rebuild();
            }
            ChangeScope::Content(id) => self.tree.refresh_content(&id),
            ChangeScope::Meta => self.on_meta(),
        }
    }
}

pub struct CollabSession {
    shared: Arc<Shared>,
    tasks: Vec<JoinHandle<()>>,
}

impl CollabSession {
    /// Host a session. Resolves once the session is active.
    pub async fn start<T: Transport>(
        transport: &T,
        ctx: SessionContext,
        session_id: &str,
        user_name: &str,
        user_id: Option<&str>,
    ) -> Result<Self, SessionError> {
        let descriptor = SessionDescriptor::new(session_id, user_name, user_id, SessionRole::Host);
        Self::open(transport, ctx, descriptor).await
    }

    /// Join as a guest. Resolves once connected; the session stays
    /// `Connecting` until the host name arrives, or becomes `NotFound` after
    /// `join_validity_timeout`. See [`CollabSession::wait_active`].
    pub async fn join<T: Transport>(
        transport: &T,
        ctx: SessionContext,
        session_id: &str,
        user_name: &str,
        user_id: Option<&str>,
    ) -> Result<Self, SessionError> {
        let descriptor = SessionDescriptor::new(session_id, user_name, user_id, SessionRole::Guest);
        Self::open(transport, ctx, descriptor).await
    }

    /// Re-enter a session from a persisted descriptor with its recorded role.
    pub async fn resume<T: Transport>(
        transport: &T,
        ctx: SessionContext,
        descriptor: SessionDescriptor,
    ) -> Result<Self, SessionError> {
        log::info!(
            "Resuming session {} as {:?}",
            descriptor.session_id,
            descriptor.role
        );
        Self::open(transport, ctx, descriptor).await
    }

    /// Resume the session recorded in the context's store, if any.
    pub async fn restore<T: Transport>(
        transport: &T,
        ctx: SessionContext,
    ) -> Result<Option<Self>, SessionError> {
        let Some(store) = ctx.store.clone() else {
            return Ok(None);
        };
        match store.load_session()? {
            Some(descriptor) => Self::resume(transport, ctx, descriptor).await.map(Some),
            None => Ok(None),
        }
    }

    async fn open<T: Transport>(
        transport: &T,
        ctx: SessionContext,
        descriptor: SessionDescriptor,
    ) -> Result<Self, SessionError> {
        let role = descriptor.role;
        let room = descriptor.session_id.clone();
        if let Some(store) = &ctx.store {
            store.save_session(&descriptor)?;
        }

        let (doc, outbox) = SharedDoc::with_outbox();
        let doc = Arc::new(doc);
        if role.is_host() {
            if let Some(store) = &ctx.store {
                if let Some(snapshot) = store.load_snapshot(&room)? {
                    doc.apply_remote(&snapshot)?;
                    log::info!("Restored local snapshot of {room}");
                }
            }
        }

        let peer = PeerInfo::new(descriptor.user_id.clone(), descriptor.user_name.clone());
        let link = transport.connect(&room, peer).await?;
        let local = PresenceRecord::new(
            descriptor.user_id.clone(),
            descriptor.user_name.clone(),
            role.is_host(),
        );
        let presence = PresenceRoom::new(link.connection_id(), local);

        let (commands, command_rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(SessionState::Connecting);
        let (synced, _) = watch::channel(false);
        let (collaborators, _) = watch::channel(presence.collaborators());

        let shared = Arc::new(Shared {
            descriptor: Mutex::new(descriptor),
            config: ctx.config,
            tree: TreeSync::new(Arc::clone(&doc), ctx.project, role),
            doc,
            presence: Mutex::new(presence),
            store: ctx.store,
            state,
            synced,
            collaborators,
            commands,
        });
        log::info!("Session {room} connecting as {role:?}");

        let changes = shared.doc.subscribe();
        let mut tasks = vec![
            tokio::spawn(observe(Arc::clone(&shared), changes)),
            tokio::spawn(pump(Arc::clone(&shared), link, outbox, command_rx)),
        ];

        if role.is_host() {
            let mut synced = shared.synced.subscribe();
            let was_synced = tokio::time::timeout(shared.config.initial_sync_wait, async {
                synced.wait_for(|s| *s).await.is_ok()
            })
            .await
            .unwrap_or(false);
            if !was_synced {
                log::debug!("No peer state for {room}; seeding from local project");
            }
            seed_if_empty(&shared)?;
            shared.doc.set_host_name(&shared.descriptor().user_name)?;
            shared.doc.set_status(SessionStatus::Active)?;
            shared.transition(|_| true, SessionState::Active(SessionRole::Host));
        } else {
            tasks.push(tokio::spawn(watchdog(Arc::clone(&shared))));
            shared.on_meta();
        }

        Ok(Self { shared, tasks })
    }

    pub fn descriptor(&self) -> SessionDescriptor {
        self.shared.descriptor()
    }

    pub fn role(&self) -> SessionRole {
        self.shared.role()
    }

    pub fn state(&self) -> SessionState {
        *self.shared.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.shared.state.subscribe()
    }

    /// Wait until the session is active, or fail with `NotFound` when the
    /// guest watchdog expires.
    pub async fn wait_active(&self) -> Result<SessionRole, SessionError> {
        let mut state = self.shared.state.subscribe();
        let settled = state
            .wait_for(|s| !matches!(s, SessionState::Connecting))
            .await
            .map(|s| *s)
            .map_err(|_| SessionError::Closed)?;
        match settled {
            SessionState::Active(role) => Ok(role),
            SessionState::NotFound => Err(SessionError::NotFound(self.shared.room())),
            _ => Err(SessionError::Closed),
        }
    }

    /// Set once the first state diff from a peer has been applied.
    pub fn synced(&self) -> watch::Receiver<bool> {
        self.shared.synced.subscribe()
    }

    pub fn doc(&self) -> &Arc<SharedDoc> {
        &self.shared.doc
    }

    pub fn tree(&self) -> &TreeSync {
        &self.shared.tree
    }

    /// Everyone present, one entry per user id, local user first.
    pub fn collaborators(&self) -> Vec<PresenceRecord> {
        self.shared.collaborators.borrow().clone()
    }

    pub fn subscribe_collaborators(&self) -> watch::Receiver<Vec<PresenceRecord>> {
        self.shared.collaborators.subscribe()
    }

    /// Merge into local presence and broadcast it. A host rename is also
    /// written to the shared host name.
    pub fn update_user(&self, patch: PresencePatch) -> Result<(), SessionError> {
        let (renamed, update) = {
            let mut presence = self.shared.presence();
            let renamed = presence.update_local(patch);
            (renamed, presence.update_message())
        };
        self.shared.publish_collaborators();

        if renamed {
            let name = self.shared.presence().local().name.clone();
            {
                let mut descriptor = self
                    .shared
                    .descriptor
                    .lock()
                    .unwrap_or_else(|e| e.into_inner());
                descriptor.user_name = name.clone();
                if let Some(store) = &self.shared.store {
                    store.save_session(&descriptor)?;
                }
            }
            if self.role().is_host() {
                self.shared.doc.set_host_name(&name)?;
            }
        }

        self.shared
            .commands
            .send(Command::Awareness(update))
            .map_err(|_| SessionError::Closed)
    }

    /// Attach an editor buffer to a file's shared text.
    pub async fn bind_content(
        &self,
        file: ItemId,
        local_buffer: &str,
    ) -> Result<TextBinding, SessionError> {
        let binding = binding::bind_content(
            &self.shared.tree,
            file,
            local_buffer,
            self.synced(),
            self.shared.config.content_bind_fallback,
        )
        .await?;
        Ok(binding)
    }

    /// End the session for everyone. Host only.
    pub async fn end(self) -> Result<(), SessionError> {
        if !self.role().is_host() {
            return Err(SessionError::HostOnly("end the session"));
        }
        self.shared.transition(|_| true, SessionState::Ending);
        self.shared.doc.set_status(SessionStatus::Ended)?;
        tokio::time::sleep(self.shared.config.end_grace).await;

        self.close().await;
        Ok(())
    }

    /// Leave immediately.
    pub async fn leave(self) {
        self.close().await;
    }

    async fn close(self) {
        let (ack, done) = oneshot::channel();
        self.shared.request_close(Some(ack));
        if tokio::time::timeout(self.shared.config.leave_flush_timeout, done)
            .await
            .is_err()
        {
            log::warn!("Session {} did not flush before closing", self.shared.room());
        }
        self.shared.clear_descriptor();
        self.shared
            .transition(|s| *s != SessionState::NotFound, SessionState::Disconnected);
    }
}

impl Drop for CollabSession {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Check whether a session has a live host, without joining it.
///
/// The probe's connection is released on every path.
pub async fn probe_session<T: Transport>(
    transport: &T,
    session_id: &str,
    config: &SessionConfig,
) -> bool {
    let probe = PeerInfo::new(format!("probe-{}", Uuid::new_v4()), "probe");
    let found = tokio::time::timeout(config.probe_timeout, async {
        let mut link = match transport.connect(session_id, probe).await {
            Ok(link) => link,
            Err(e) => {
                log::warn!("Probe of {session_id} could not connect: {e}");
                return false;
            }
        };
        let query = match AwarenessMessage::Query.encode() {
            Ok(payload) => SyncMessage::awareness(link.connection_id(), session_id, 1, payload),
            Err(e) => {
                log::warn!("Probe of {session_id} failed: {e}");
                return false;
            }
        };
        if link.send(&query).is_err() {
            return false;
        }
        while let Some(msg) = link.recv().await {
            if msg.msg_type != MessageType::Awareness {
                continue;
            }
            if let Ok(AwarenessMessage::Update(record)) = AwarenessMessage::decode(&msg.payload) {
                if record.is_host {
                    return true;
                }
            }
        }
        false
    })
    .await;

    match found {
        Ok(found) => found,
        Err(_) => {
            log::warn!(
                "Probe of {session_id} timed out after {}ms",
                config.probe_timeout.as_millis()
            );
            false
        }
    }
}

fn seed_if_empty(shared: &Shared) -> Result<(), SessionError> {
    if !shared.doc.is_empty() {
        log::info!(
            "Session {} already has shared state; not seeding",
            shared.room()
        );
        shared.tree.rebuild();
        return Ok(());
    }
    let items = shared.tree.items();
    let project = shared.tree.descriptor();
    shared.doc.seed(&items, project.as_ref())?;
    log::info!(
        "Seeded session {} with {} item(s) from the local project",
        shared.room(),
        items.len()
    );
    Ok(())
}

async fn watchdog(shared: Arc<Shared>) {
    let timeout = shared.config.join_validity_timeout;
    let mut state = shared.state.subscribe();
    let settled = tokio::time::timeout(timeout, async {
        state
            .wait_for(|s| !matches!(s, SessionState::Connecting))
            .await
            .is_ok()
    })
    .await
    .is_ok();

    if !settled
        && shared.transition(|s| *s == SessionState::Connecting, SessionState::NotFound)
    {
        log::warn!(
            "No host for session {} after {}ms",
            shared.room(),
            timeout.as_millis()
        );
        shared.request_close(None);
        shared.clear_descriptor();
    }
}

async fn observe(shared: Arc<Shared>, mut changes: tokio::sync::broadcast::Receiver<DocChange>) {
    loop {
        match changes.recv().await {
            Ok(change) => shared.on_change(change),
            Err(RecvError::Lagged(n)) => {
                log::warn!("Change observer lagged by {n}; rebuilding");
                shared.tree.rebuild();
                shared.on_meta();
            }
            Err(RecvError::Closed) => break,
        }
    }
}

fn send(link: &TransportLink, msg: &SyncMessage) {
    if let Err(e) = link.send(msg) {
        log::warn!("Failed to send {:?}: {e}", msg.msg_type);
    }
}

fn send_awareness(link: &mut TransportLink, msg: &AwarenessMessage) {
    match msg.encode() {
        Ok(payload) => {
            let clock = link.tick();
            let frame = SyncMessage::awareness(link.connection_id(), link.room(), clock, payload);
            send(link, &frame);
        }
        Err(e) => log::warn!("Failed to encode presence: {e}"),
    }
}

async fn pump(
    shared: Arc<Shared>,
    mut link: TransportLink,
    mut outbox: mpsc::UnboundedReceiver<Vec<u8>>,
    mut commands: mpsc::UnboundedReceiver<Command>,
) {
    let own = link.connection_id();
    let update = shared.presence().update_message();
    send_awareness(&mut link, &update);
    send_awareness(&mut link, &AwarenessMessage::Query);
    send(
        &link,
        &SyncMessage::sync_step1(own, link.room(), shared.doc.state_vector()),
    );

    let ack = loop {
        tokio::select! {
            incoming = link.recv() => match incoming {
                Some(msg) => handle_incoming(&shared, &mut link, msg),
                None => {
                    log::warn!("Lost connection to session {}", link.room());
                    shared.transition(
                        |s| matches!(s, SessionState::Connecting | SessionState::Active(_)),
                        SessionState::Disconnected,
                    );
                    break None;
                }
            },
            Some(update) = outbox.recv() => {
                let clock = link.tick();
                send(&link, &SyncMessage::delta(own, link.room(), clock, update));
            }
            command = commands.recv() => match command {
                Some(Command::Awareness(msg)) => send_awareness(&mut link, &msg),
                Some(Command::Close(ack)) => break ack,
                None => break None,
            },
        }
    };

    // Flush what is already queued, then say goodbye.
    while let Ok(update) = outbox.try_recv() {
        let clock = link.tick();
        send(&link, &SyncMessage::delta(own, link.room(), clock, update));
    }
    let leave = AwarenessMessage::Leave {
        user_id: shared.presence().local().user_id.clone(),
    };
    send_awareness(&mut link, &leave);
    shared.save_snapshot();
    shared.presence().clear();
    shared.publish_collaborators();
    drop(link);

    if let Some(ack) = ack {
        let _ = ack.send(());
    }
}

fn handle_incoming(shared: &Shared, link: &mut TransportLink, msg: SyncMessage) {
    let own = link.connection_id();
    match msg.msg_type {
        MessageType::SyncStep1 => match shared.doc.diff(&msg.payload) {
            Ok(diff) => send(link, &SyncMessage::sync_step2(own, link.room(), diff)),
            Err(e) => log::warn!("Bad state vector from {}: {e}", msg.peer_id),
        },
        MessageType::SyncStep2 | MessageType::Delta => {
            if let Err(e) = shared.doc.apply_remote(&msg.payload) {
                log::warn!("Dropping update from {}: {e}", msg.peer_id);
                return;
            }
            if msg.msg_type == MessageType::SyncStep2 {
                shared.synced.send_replace(true);
            }
        }
        MessageType::Awareness => match AwarenessMessage::decode(&msg.payload) {
            Ok(AwarenessMessage::Query) => {
                let update = shared.presence().update_message();
                send_awareness(link, &update);
            }
            Ok(awareness) => {
                let changed = shared.presence().handle_message(msg.peer_id, &awareness);
                if changed {
                    shared.publish_collaborators();
                }
            }
            Err(e) => log::warn!("Undecodable presence from {}: {e}", msg.peer_id),
        },
        MessageType::PeerJoined => {
            if let Ok(info) = msg.peer_info() {
                log::debug!("{} joined {}", info.name, link.room());
            }
            send(
                link,
                &SyncMessage::sync_step1(own, link.room(), shared.doc.state_vector()),
            );
        }
        MessageType::PeerLeft => {
            if shared.presence().remove_connection(&msg.peer_id) {
                shared.publish_collaborators();
            }
        }
        MessageType::Ping => send(link, &SyncMessage::pong(own)),
        MessageType::Pong => {}
    }
}
