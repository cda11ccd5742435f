//! Model lifecycle manager
//!
//! Owns the lifecycle state and the loaded runtime. A load walks
//! Downloading -> Loading -> Ready, publishing progress on the bus at every
//! step. Only one load or download sequence runs at a time; a second request
//! fails fast with [`Error::AlreadyLoading`] instead of queuing.

use crate::error::{Error, Result};
use crate::inference::engine::{ContextParams, EngineError, InferenceEngine, ModelParams};
use crate::inference::session::ChatSession;
use crate::lifecycle::progress::{ListenerError, ProgressBus, Subscription};
use crate::lifecycle::runtime::{ModelRuntime, RuntimeSlot};
use crate::lifecycle::state::{LifecyclePhase, LifecycleSnapshot, LifecycleState};
use crate::storage::catalog::ModelCatalog;
use crate::storage::downloader::{ArtifactFetcher, Downloader};
use crate::storage::integrity::IntegrityChecker;
use crate::storage::settings::Settings;
use crate::types::{ModelDescriptor, ModelListing, ProgressEvent};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Download share of the load progress range
const DOWNLOAD_BAND: (u8, u8) = (0, 50);
const LOAD_STARTED: u8 = 50;
const CONTEXT_STARTED: u8 = 75;

/// Held for the duration of a load, download or unload sequence
struct SequenceGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> SequenceGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| Error::AlreadyLoading)?;
        Ok(Self { flag })
    }
}

impl Drop for SequenceGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// A load running in the background, with its progress feed
pub struct LoadTask {
    pub events: mpsc::UnboundedReceiver<ProgressEvent>,
    pub handle: JoinHandle<Result<()>>,
}

pub struct LifecycleManager {
    settings: Settings,
    catalog: ModelCatalog,
    integrity: IntegrityChecker,
    fetcher: Arc<dyn ArtifactFetcher>,
    engine: Arc<dyn InferenceEngine>,
    bus: ProgressBus,
    state: RwLock<LifecycleState>,
    in_flight: AtomicBool,
    downloading: Mutex<Option<String>>,
    runtime: RuntimeSlot,
}

impl LifecycleManager {
    /// Manager over the built-in catalog and the HTTP downloader
    pub fn new(mut settings: Settings, engine: Arc<dyn InferenceEngine>) -> Result<Self> {
        settings.validate();
        let fetcher = Arc::new(Downloader::from_settings(&settings)?);
        Ok(Self::with_components(settings, ModelCatalog::builtin(), fetcher, engine))
    }

    pub fn with_components(
        settings: Settings,
        catalog: ModelCatalog,
        fetcher: Arc<dyn ArtifactFetcher>,
        engine: Arc<dyn InferenceEngine>,
    ) -> Self {
        let integrity = IntegrityChecker::new(&settings.models_directory, settings.integrity);
        Self {
            settings,
            catalog,
            integrity,
            fetcher,
            engine,
            bus: ProgressBus::new(),
            state: RwLock::new(LifecycleState::default()),
            in_flight: AtomicBool::new(false),
            downloading: Mutex::new(None),
            runtime: RuntimeSlot::default(),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn catalog(&self) -> &ModelCatalog {
        &self.catalog
    }

    pub fn bus(&self) -> &ProgressBus {
        &self.bus
    }

    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&ProgressEvent) -> std::result::Result<(), ListenerError> + Send + Sync + 'static,
    {
        self.bus.subscribe(listener)
    }

    pub(crate) fn runtime(&self) -> RuntimeSlot {
        self.runtime.clone()
    }

    /// Prepare the models directory and the engine backend
    pub async fn initialize(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.settings.models_directory).await?;

        if !self.engine.is_initialized() {
            let engine = self.engine.clone();
            tokio::task::spawn_blocking(move || engine.init())
                .await
                .map_err(|e| EngineError::BackendInit(e.to_string()))??;
            tracing::info!("Inference engine '{}' initialized", self.engine.name());
        }

        self.update_state(|s| {
            if s.phase == LifecyclePhase::Uninitialized {
                s.enter(LifecyclePhase::Idle, 0);
            }
        });
        Ok(())
    }

    /// Make `model_id` the ready model, downloading it first if needed
    pub async fn request_load(&self, model_id: &str) -> Result<()> {
        // Loading the ready model is a no-op even while a download runs
        if self.read_state().is_ready_with(model_id) {
            tracing::debug!("Model {} already loaded", model_id);
            return Ok(());
        }

        let _guard = SequenceGuard::acquire(&self.in_flight)?;
        if self.read_state().is_ready_with(model_id) {
            return Ok(());
        }

        let descriptor = self.descriptor(model_id)?;
        match self.load_sequence(&descriptor).await {
            Ok(()) => Ok(()),
            Err(e) => {
                tracing::warn!("Loading {} failed: {}", model_id, e);
                self.update_state(|s| s.failed(e.to_string()));
                self.bus.publish(&ProgressEvent::error(model_id, e.to_string()));
                Err(e)
            }
        }
    }

    /// Start a load on the runtime and return its progress feed
    pub fn spawn_load(self: &Arc<Self>, model_id: impl Into<String>) -> LoadTask {
        // Pruned from the bus once `events` is dropped
        let (_subscription, events) = self.bus.subscribe_channel();
        let manager = self.clone();
        let model_id = model_id.into();
        let handle = tokio::spawn(async move { manager.request_load(&model_id).await });
        LoadTask { events, handle }
    }

    /// Fetch an artifact without loading it
    pub async fn request_download(&self, model_id: &str) -> Result<()> {
        let _guard = SequenceGuard::acquire(&self.in_flight)?;
        let descriptor = self.descriptor(model_id)?;
        tokio::fs::create_dir_all(&self.settings.models_directory).await?;

        // A ready model stays usable while another artifact downloads
        let keep_phase = self.read_state().phase == LifecyclePhase::Ready;
        if !keep_phase {
            self.update_state(|s| s.enter(LifecyclePhase::Downloading, 0));
        }

        match self.fetch_artifact(&descriptor, (0, 100)).await {
            Ok(path) => {
                tracing::info!("Model {} available at {:?}", model_id, path);
                if !keep_phase {
                    self.update_state(|s| s.enter(LifecyclePhase::Idle, 0));
                }
                Ok(())
            }
            Err(e) => {
                tracing::warn!("Downloading {} failed: {}", model_id, e);
                let message = e.to_string();
                self.update_state(|s| {
                    if keep_phase {
                        s.last_error = Some(message.clone());
                    } else {
                        s.failed(message.clone());
                    }
                });
                self.bus.publish(&ProgressEvent::error(model_id, message));
                Err(e)
            }
        }
    }

    /// Release the loaded model. Waits for a running inference call.
    pub async fn request_unload(&self) -> Result<()> {
        let _guard = SequenceGuard::acquire(&self.in_flight)?;
        self.unload_runtime().await;
        Ok(())
    }

    /// Point-in-time view of the lifecycle
    pub fn status(&self) -> LifecycleSnapshot {
        let state = self.read_state();
        LifecycleSnapshot {
            initialized: self.engine.is_initialized(),
            model_loaded: state.phase == LifecyclePhase::Ready,
            current_model_id: state.current_model_id,
            is_loading: self.in_flight.load(Ordering::Acquire),
            progress_percent: state.progress_percent,
            storage_directory: self.settings.models_directory.clone(),
            phase: state.phase,
            last_error: state.last_error,
        }
    }

    /// Catalog models with their on-disk state, in catalog order
    pub fn list_models(&self) -> Vec<ModelListing> {
        let current = self.read_state().current_model_id;
        let downloading = self.downloading_id();

        self.catalog
            .models()
            .iter()
            .map(|descriptor| ModelListing {
                file_state: self.integrity.file_state(descriptor),
                is_current: current.as_deref() == Some(descriptor.id.as_str()),
                is_downloading: downloading.as_deref() == Some(descriptor.id.as_str()),
                descriptor: descriptor.clone(),
            })
            .collect()
    }

    /// Remove a downloaded artifact that is neither loaded nor downloading
    pub async fn delete_model(&self, model_id: &str) -> Result<()> {
        let descriptor = self.descriptor(model_id)?;
        if self.read_state().current_model_id.as_deref() == Some(model_id)
            || self.downloading_id().as_deref() == Some(model_id)
        {
            return Err(Error::ModelInUse(model_id.to_string()));
        }

        let path = self.integrity.artifact_path(&descriptor);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                tracing::info!("Deleted model file {:?}", path);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn load_sequence(&self, descriptor: &ModelDescriptor) -> Result<()> {
        let model_id = descriptor.id.as_str();

        self.unload_runtime().await;
        self.initialize().await?;

        self.update_state(|s| s.enter(LifecyclePhase::Downloading, DOWNLOAD_BAND.0));
        let path = self.fetch_artifact(descriptor, DOWNLOAD_BAND).await?;

        self.update_state(|s| s.enter(LifecyclePhase::Loading, LOAD_STARTED));
        self.bus.publish(&ProgressEvent::loading(model_id, LOAD_STARTED));
        tracing::info!("Loading model {} from {:?}", model_id, path);

        let engine = self.engine.clone();
        let model_params = ModelParams {
            gpu_layers: self.settings.gpu_layers,
        };
        let model = tokio::task::spawn_blocking(move || engine.load_model(&path, &model_params))
            .await
            .map_err(|e| EngineError::LoadFailed(e.to_string()))??;

        self.update_state(|s| s.progress_percent = CONTEXT_STARTED);
        self.bus.publish(&ProgressEvent::loading(model_id, CONTEXT_STARTED));

        let handle = model.clone();
        let context_params = ContextParams {
            context_size: self.settings.context_size,
            embeddings: false,
        };
        let context = tokio::task::spawn_blocking(move || handle.create_context(&context_params))
            .await
            .map_err(|e| EngineError::ContextFailed(e.to_string()))??;

        let session = ChatSession::new(
            self.settings.system_prompt.clone(),
            self.settings.max_history_messages,
        );
        *self.runtime.lock().await = Some(ModelRuntime::new(model_id, model, context, session));

        self.update_state(|s| s.ready(model_id));
        self.bus.publish(&ProgressEvent::loaded(model_id));
        tracing::info!("Model {} ready", model_id);
        Ok(())
    }

    /// Run the fetcher, mapping its 0-100 progress into `band`
    async fn fetch_artifact(&self, descriptor: &ModelDescriptor, band: (u8, u8)) -> Result<std::path::PathBuf> {
        let model_id = descriptor.id.as_str();
        let (start, end) = band;
        let last = AtomicU8::new(start);
        self.bus.publish(&ProgressEvent::download(model_id, start));

        let on_progress = |percent: u8| {
            let span = u16::from(end - start);
            let mapped = start + (u16::from(percent.min(100)) * span / 100) as u8;
            if last.swap(mapped, Ordering::Relaxed) == mapped {
                return;
            }
            self.update_state(|s| {
                if s.phase == LifecyclePhase::Downloading {
                    s.progress_percent = mapped;
                }
            });
            self.bus.publish(&ProgressEvent::download(model_id, mapped));
        };

        self.set_downloading(Some(model_id));
        let result = self.fetcher.fetch(descriptor, &on_progress).await;
        self.set_downloading(None);
        result
    }

    /// Tear down the runtime if one is loaded. Waits for the runtime lock,
    /// so a running inference call finishes first.
    async fn unload_runtime(&self) {
        let mut slot = self.runtime.lock().await;
        let Some(mut runtime) = slot.take() else {
            return;
        };
        let model_id = runtime.model_id().to_string();
        runtime.release();
        drop(slot);

        self.update_state(|s| {
            if s.phase == LifecyclePhase::Ready {
                s.enter(LifecyclePhase::Idle, 0);
            }
        });
        self.bus.publish(&ProgressEvent::unloaded(&model_id));
        tracing::info!("Model {} unloaded", model_id);
    }

    fn descriptor(&self, model_id: &str) -> Result<ModelDescriptor> {
        self.catalog
            .get(model_id)
            .cloned()
            .ok_or_else(|| Error::UnknownModel(model_id.to_string()))
    }

    fn read_state(&self) -> LifecycleState {
        match self.state.read() {
            Ok(state) => state.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn update_state(&self, f: impl FnOnce(&mut LifecycleState)) {
        match self.state.write() {
            Ok(mut state) => f(&mut state),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }

    fn downloading_id(&self) -> Option<String> {
        match self.downloading.lock() {
            Ok(id) => id.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn set_downloading(&self, model_id: Option<&str>) {
        match self.downloading.lock() {
            Ok(mut id) => *id = model_id.map(str::to_string),
            Err(poisoned) => *poisoned.into_inner() = model_id.map(str::to_string),
        }
    }
}
