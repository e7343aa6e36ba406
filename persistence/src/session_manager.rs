//! The session controller: loads sessions from share links and local saves,
//! keeps the share link current, and tells observers what changed.

use crate::DEFAULT_OBJECT_ID;
use crate::compression::Codec;
use crate::compression::CompressionLevel;
use crate::demo;
use crate::envelope::WireEnvelope;
use crate::envelope::decode_token;
use crate::envelope::encode_token;
use crate::error::PersistenceError;
use crate::error::Result;
use crate::fragment::DEFAULT_DEBOUNCE;
use crate::fragment::DEMO_FRAGMENT;
use crate::fragment::DebouncedSaver;
use crate::fragment::FragmentLocation;
use crate::fragment::fragment_of;
use crate::fragment::without_fragment;
use crate::session_store::LocalStore;
use crate::session_store::default_store_path;
use crate::snapshot::ObjectId;
use crate::types::Diagnostic;
use crate::types::SavedSessionRecord;
use crate::types::SessionState;
use crate::vm::VmHost;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::sync::RwLock;
use tokio::sync::broadcast;
use tracing::error;
use tracing::info;
use tracing::warn;

/// Configuration for SessionController
#[derive(Debug, Clone)]
pub struct SessionControllerConfig {
    /// Local save directory (defaults to `<data dir>/ic10emu/sessions`)
    pub store_path: PathBuf,
    /// Page address share links are built on
    pub base_url: String,
    /// Quiet window before the share link is rewritten (defaults to 1 second)
    pub save_debounce: Duration,
    /// Codec for new share tokens (defaults to Gzip)
    pub fragment_codec: Codec,
    pub fragment_compression: CompressionLevel,
    /// Compression level for store files (defaults to Balanced)
    pub store_compression: CompressionLevel,
    /// Open the local save store (defaults to true)
    pub enable_local_store: bool,
    /// Events buffered per subscriber before the slowest one lags
    pub event_capacity: usize,
}

impl Default for SessionControllerConfig {
    fn default() -> Self {
        Self {
            store_path: default_store_path(),
            base_url: "https://ic10emu.dev/".to_owned(),
            save_debounce: DEFAULT_DEBOUNCE,
            fragment_codec: Codec::Gzip,
            fragment_compression: CompressionLevel::Balanced,
            store_compression: CompressionLevel::Balanced,
            enable_local_store: true,
            event_capacity: 64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Nothing loaded yet
    Idle,
    Loading,
    Ready,
    /// Ready, with the share link being rewritten
    Saving,
}

/// Change notifications for the editor and the rest of the UI
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    SessionLoaded,
    ActiveObjectChanged(ObjectId),
    ActiveLineChanged(ObjectId),
    ProgramErrorsChanged(Vec<ObjectId>),
    LocalSavesChanged,
    LoadFailed(String),
    SaveFailed(String),
}

struct Inner {
    phase: SessionPhase,
    state: Option<SessionState>,
}

/// State reachable from the debounced save task
struct Shared {
    config: SessionControllerConfig,
    vm: Arc<dyn VmHost>,
    location: Arc<dyn FragmentLocation>,
    inner: RwLock<Inner>,
    events: broadcast::Sender<SessionEvent>,
}

impl Shared {
    fn emit(&self, event: SessionEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    /// Share token for the VM as it is now; `None` before anything loaded.
    async fn current_token(&self) -> Result<Option<String>> {
        let active_ic = match &self.inner.read().await.state {
            Some(state) => state.active_object_id,
            None => return Ok(None),
        };
        let vm = self.vm.take_snapshot().await?;
        let envelope = WireEnvelope::Current { vm, active_ic };
        let codec = self.config.fragment_codec;
        let level = self.config.fragment_compression;
        let token =
            tokio::task::spawn_blocking(move || encode_token(&envelope, codec, level)).await??;
        Ok(Some(token))
    }

    async fn publish_fragment(&self) {
        match self.current_token().await {
            Ok(Some(token)) => self.location.replace_fragment(&token),
            Ok(None) => {}
            Err(e) => {
                error!("Share link update failed: {}", e);
                self.emit(SessionEvent::SaveFailed(e.to_string()));
            }
        }
    }
}

/// Owns the loaded session and everything that persists it
pub struct SessionController {
    shared: Arc<Shared>,
    store: std::result::Result<LocalStore, String>,
    saver: DebouncedSaver,
    load_lock: Mutex<()>,
}

impl SessionController {
    /// Create a new controller. Must be called inside a tokio runtime.
    ///
    /// A local store that fails to open only disables local saves.
    pub async fn new(
        config: SessionControllerConfig,
        vm: Arc<dyn VmHost>,
        location: Arc<dyn FragmentLocation>,
    ) -> Self {
        let store = if config.enable_local_store {
            match LocalStore::open(config.store_path.clone(), config.store_compression).await {
                Ok(store) => Ok(store),
                Err(e) => {
                    error!("Local saves unavailable: {}", e);
                    Err(e.to_string())
                }
            }
        } else {
            Err("local saves are disabled".to_owned())
        };

        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let save_debounce = config.save_debounce;
        let shared = Arc::new(Shared {
            config,
            vm,
            location,
            inner: RwLock::new(Inner {
                phase: SessionPhase::Idle,
                state: None,
            }),
            events,
        });

        let saver = DebouncedSaver::spawn(save_debounce, {
            let weak = Arc::downgrade(&shared);
            move || {
                let weak = weak.clone();
                async move {
                    if let Some(shared) = weak.upgrade() {
                        shared.publish_fragment().await;
                    }
                }
            }
        });

        Self {
            shared,
            store,
            saver,
            load_lock: Mutex::new(()),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.events.subscribe()
    }

    pub async fn phase(&self) -> SessionPhase {
        let phase = self.shared.inner.read().await.phase;
        if phase == SessionPhase::Ready && self.saver.is_saving() {
            SessionPhase::Saving
        } else {
            phase
        }
    }

    /// A copy of the loaded session state
    pub async fn state(&self) -> Option<SessionState> {
        self.shared.inner.read().await.state.clone()
    }

    pub fn has_local_store(&self) -> bool {
        self.store.is_ok()
    }

    /// Load whatever the location's fragment holds. Returns `false` when the
    /// fragment is empty and nothing was loaded.
    pub async fn load_from_fragment(&self) -> Result<bool> {
        let fragment = self.shared.location.read_fragment();
        self.load_fragment_text(&fragment).await
    }

    /// Load the session a share link points at
    pub async fn load_from_url(&self, url: &str) -> Result<bool> {
        self.load_fragment_text(fragment_of(url)).await
    }

    /// Reload the session whenever the location navigates to a new fragment.
    ///
    /// Runs until the location stops reporting navigation, and returns at once
    /// for locations that never report it. A failed reload keeps the current
    /// session and only emits `LoadFailed`.
    pub async fn follow_navigation(&self) {
        let Some(mut navigations) = self.shared.location.watch_navigation() else {
            return;
        };
        while navigations.changed().await.is_ok() {
            let fragment = navigations.borrow_and_update().clone();
            if let Err(e) = self.load_fragment_text(&fragment).await {
                warn!("Ignoring navigation to an unloadable fragment: {}", e);
            }
        }
    }

    async fn load_fragment_text(&self, fragment: &str) -> Result<bool> {
        let fragment = fragment.trim();
        if fragment.is_empty() {
            return Ok(false);
        }
        if fragment == DEMO_FRAGMENT {
            info!("Loading demo session");
            self.run_load(self.apply_envelope(WireEnvelope::RawSource(
                demo::DEMO_PROGRAM.to_owned(),
            )))
            .await?;
            return Ok(true);
        }
        self.load_token(fragment).await?;
        Ok(true)
    }

    /// Decode a share token and load it
    pub async fn load_token(&self, token: &str) -> Result<()> {
        let token = token.to_owned();
        self.run_load(async move {
            let envelope = tokio::task::spawn_blocking(move || decode_token(&token)).await??;
            self.apply_envelope(envelope).await
        })
        .await
    }

    /// Load an already decoded envelope and rewrite the share link to match
    pub async fn load_envelope(&self, envelope: WireEnvelope) -> Result<()> {
        self.run_load(self.apply_envelope(envelope)).await?;
        self.saver.schedule();
        Ok(())
    }

    /// Runs one load. On failure the previous session and phase stay as they
    /// were and observers get a single `LoadFailed`.
    async fn run_load<F>(&self, load: F) -> Result<()>
    where
        F: Future<Output = Result<SessionState>>,
    {
        let _guard = self.load_lock.lock().await;
        let previous = {
            let mut inner = self.shared.inner.write().await;
            std::mem::replace(&mut inner.phase, SessionPhase::Loading)
        };

        match load.await {
            Ok(state) => {
                let active = state.active_object_id;
                {
                    let mut inner = self.shared.inner.write().await;
                    inner.phase = SessionPhase::Ready;
                    inner.state = Some(state);
                }
                info!("Loaded session with active circuit {}", active);
                self.shared.emit(SessionEvent::SessionLoaded);
                self.shared.emit(SessionEvent::ActiveObjectChanged(active));
                Ok(())
            }
            Err(e) => {
                self.shared.inner.write().await.phase = previous;
                warn!("Session load failed: {}", e);
                self.shared.emit(SessionEvent::LoadFailed(e.to_string()));
                Err(e)
            }
        }
    }

    async fn apply_envelope(&self, envelope: WireEnvelope) -> Result<SessionState> {
        let vm = &self.shared.vm;
        match envelope {
            WireEnvelope::Current { vm: snapshot, active_ic } => {
                vm.restore_snapshot(snapshot).await?;
                Ok(SessionState::new(active_ic, vm.program_sources().await?))
            }
            seeded => {
                let programs = seeded.programs();
                let active = if programs.contains_key(&DEFAULT_OBJECT_ID) {
                    DEFAULT_OBJECT_ID
                } else {
                    programs.keys().next().copied().unwrap_or(DEFAULT_OBJECT_ID)
                };
                vm.restore_snapshot(demo::seed_snapshot(&programs)).await?;
                Ok(SessionState::new(active, vm.program_sources().await?))
            }
        }
    }

    /// Replace a program's text, in the VM and in the session
    pub async fn set_program_source(&self, id: ObjectId, code: &str) -> Result<()> {
        if self.shared.inner.read().await.state.is_none() {
            return Err(PersistenceError::NoSession);
        }
        self.shared.vm.update_code(id, code).await?;
        self.notify_program_changed(id, code).await
    }

    /// Record program text the VM changed on its own
    pub async fn notify_program_changed(&self, id: ObjectId, code: &str) -> Result<()> {
        {
            let mut inner = self.shared.inner.write().await;
            let state = inner.state.as_mut().ok_or(PersistenceError::NoSession)?;
            state.program_sources.insert(id, code.to_owned());
        }
        self.saver.schedule();
        Ok(())
    }

    pub async fn set_active_line(&self, id: ObjectId, line: u32) -> Result<()> {
        let changed = {
            let mut inner = self.shared.inner.write().await;
            let state = inner.state.as_mut().ok_or(PersistenceError::NoSession)?;
            state.active_line_by_id.insert(id, line) != Some(line)
        };
        if changed {
            self.shared.emit(SessionEvent::ActiveLineChanged(id));
            self.saver.schedule();
        }
        Ok(())
    }

    /// Focus another circuit
    pub async fn set_active_object(&self, id: ObjectId) -> Result<()> {
        let changed = {
            let mut inner = self.shared.inner.write().await;
            let state = inner.state.as_mut().ok_or(PersistenceError::NoSession)?;
            std::mem::replace(&mut state.active_object_id, id) != id
        };
        if changed {
            self.shared.emit(SessionEvent::ActiveObjectChanged(id));
            self.saver.schedule();
        }
        Ok(())
    }

    /// The VM focused another circuit
    pub async fn notify_active_object_changed(&self, id: ObjectId) -> Result<()> {
        self.set_active_object(id).await
    }

    /// Replace the compile errors of one program. Errors are not persisted.
    pub async fn set_program_errors(&self, id: ObjectId, errors: Vec<Diagnostic>) -> Result<()> {
        {
            let mut inner = self.shared.inner.write().await;
            let state = inner.state.as_mut().ok_or(PersistenceError::NoSession)?;
            if errors.is_empty() {
                state.compile_errors.remove(&id);
            } else {
                state.compile_errors.insert(id, errors);
            }
        }
        self.shared.emit(SessionEvent::ProgramErrorsChanged(vec![id]));
        Ok(())
    }

    /// Share token for the current session, `None` before anything loaded
    pub async fn current_token(&self) -> Result<Option<String>> {
        self.shared.current_token().await
    }

    /// A link that reopens the current session
    pub async fn share_link(&self) -> Result<String> {
        let token = self
            .current_token()
            .await?
            .ok_or(PersistenceError::NoSession)?;
        Ok(format!(
            "{}#{}",
            without_fragment(&self.shared.config.base_url),
            token
        ))
    }

    fn store(&self) -> Result<&LocalStore> {
        self.store
            .as_ref()
            .map_err(|reason| PersistenceError::StoreUnavailable(reason.clone()))
    }

    /// Save the current session under `name`, replacing any save by that name
    pub async fn save(&self, name: &str) -> Result<()> {
        let result = async {
            let store = self.store()?;
            let active_ic = self
                .state()
                .await
                .ok_or(PersistenceError::NoSession)?
                .active_object_id;
            let vm = self.shared.vm.take_snapshot().await?;
            store.put(SavedSessionRecord::new(name, vm, active_ic)).await
        }
        .await;

        match result {
            Ok(()) => {
                info!("Saved session: {}", name);
                self.shared.emit(SessionEvent::LocalSavesChanged);
                Ok(())
            }
            Err(e) => {
                error!("Failed to save session {}: {}", name, e);
                self.shared.emit(SessionEvent::SaveFailed(e.to_string()));
                Err(e)
            }
        }
    }

    /// Load a local save by name
    pub async fn load_from_local(&self, name: &str) -> Result<()> {
        self.run_load(async {
            let record = self
                .store()?
                .get(name)
                .await
                .ok_or_else(|| PersistenceError::SaveNotFound(name.to_owned()))?;
            let active_ic = record.session.active_ic;
            let vm = record.session.vm.into_current()?;
            self.apply_envelope(WireEnvelope::Current { vm, active_ic })
                .await
        })
        .await?;
        self.saver.schedule();
        Ok(())
    }

    /// Remove a local save; `false` when there was none by that name
    pub async fn delete_local(&self, name: &str) -> Result<bool> {
        match async { self.store()?.delete(name).await }.await {
            Ok(removed) => {
                if removed {
                    info!("Deleted save: {}", name);
                    self.shared.emit(SessionEvent::LocalSavesChanged);
                }
                Ok(removed)
            }
            Err(e) => {
                error!("Failed to delete save {}: {}", name, e);
                self.shared.emit(SessionEvent::SaveFailed(e.to_string()));
                Err(e)
            }
        }
    }

    /// Every local save, most recent first
    pub async fn list_local_saves(&self) -> Result<Vec<SavedSessionRecord>> {
        Ok(self.store()?.list_all().await)
    }

    pub async fn search_local_saves(&self, query: &str) -> Result<Vec<SavedSessionRecord>> {
        Ok(self.store()?.search(query).await)
    }

    /// Run any scheduled share link update now and wait for it
    pub async fn flush(&self) {
        self.saver.flush().await;
    }

    /// Flush, then stop the save task
    pub async fn shutdown(&self) -> Result<()> {
        info!("Shutting down SessionController");
        self.saver.flush().await;
        self.saver.shutdown();
        info!("SessionController shutdown complete");
        Ok(())
    }
}
