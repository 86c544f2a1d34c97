//--------------------------------------------------------------------------------------------------
// STRUCTS & TRAITS
//--------------------------------------------------------------------------------------------------
// | Name                    | Description                                       | Key Methods       |
// |-------------------------|---------------------------------------------------|-------------------|
// | EventHandler            | Trait for event handling                         | handle_event      |
// | EventLogger             | Bounded in-memory history of events              | get_history       |
// | PersistenceEventHandler | Appends events to rotating JSONL files           | write_event       |
// | SettlementForwarder     | Forwards P2P settlements to the ledger service   | handle_event      |
//--------------------------------------------------------------------------------------------------

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::Utc;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info};

use super::event_types::{ALL_EVENT_TYPES, EngineEvent, EventError, EventResult};
use crate::domain::models::types::ExecutionKind;
use crate::domain::services::external::LedgerService;

/// Event handler trait for processing events
#[async_trait::async_trait]
pub trait EventHandler: Send + Sync {
    /// Returns the types of events this handler processes
    fn event_types(&self) -> Vec<&'static str>;

    /// Processes an event
    async fn handle_event(&self, event: EngineEvent) -> EventResult<()>;
}

/// A simple in-memory event logger for debugging
pub struct EventLogger {
    /// Maximum number of events to keep in history
    max_history: usize,
    history: RwLock<VecDeque<EngineEvent>>,
}

impl EventLogger {
    pub fn new(max_history: usize) -> Self {
        Self {
            max_history,
            history: RwLock::new(VecDeque::with_capacity(max_history)),
        }
    }

    /// Returns the event history, oldest first
    pub async fn get_history(&self) -> Vec<EngineEvent> {
        self.history.read().await.iter().cloned().collect()
    }
}

#[async_trait::async_trait]
impl EventHandler for EventLogger {
    fn event_types(&self) -> Vec<&'static str> {
        ALL_EVENT_TYPES.to_vec()
    }

    async fn handle_event(&self, event: EngineEvent) -> EventResult<()> {
        info!("event {}", event.event_type());
        let mut history = self.history.write().await;

        if history.len() >= self.max_history {
            history.pop_front();
        }
        history.push_back(event);

        Ok(())
    }
}

/// Writes events as JSON lines, rotating to a new file every `max_events_per_file` events.
pub struct PersistenceEventHandler {
    output_dir: PathBuf,
    current_file: Mutex<Option<tokio::fs::File>>,
    max_events_per_file: usize,
    /// Events written to the current file
    event_count: AtomicUsize,
    /// Files opened so far, keeps names unique within one millisecond
    file_seq: AtomicUsize,
}

impl PersistenceEventHandler {
    pub fn new<P: AsRef<Path>>(output_dir: P, max_events_per_file: usize) -> std::io::Result<Self> {
        let path = output_dir.as_ref().to_path_buf();

        if !path.exists() {
            std::fs::create_dir_all(&path)?;
        }

        Ok(Self {
            output_dir: path,
            current_file: Mutex::new(None),
            max_events_per_file: max_events_per_file.max(1),
            event_count: AtomicUsize::new(0),
            file_seq: AtomicUsize::new(0),
        })
    }

    async fn open_new_file(&self) -> std::io::Result<tokio::fs::File> {
        let timestamp = Utc::now().format("%Y%m%d_%H%M%S_%3f");
        let seq = self.file_seq.fetch_add(1, Ordering::SeqCst);
        let path = self.output_dir.join(format!("events_{}_{:04}.jsonl", timestamp, seq));

        debug!("Opening new event file: {:?}", path);

        let file = tokio::fs::File::create(path).await?;
        self.event_count.store(0, Ordering::SeqCst);

        Ok(file)
    }

    async fn write_event(&self, event: &EngineEvent) -> std::io::Result<()> {
        let mut file_guard = self.current_file.lock().await;

        if file_guard.is_none() || self.event_count.load(Ordering::SeqCst) >= self.max_events_per_file {
            *file_guard = Some(self.open_new_file().await?);
        }
        let Some(file) = file_guard.as_mut() else {
            return Err(std::io::Error::other("no open event file"));
        };

        let json = serde_json::to_string(event)?;
        file.write_all(json.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.flush().await?;

        self.event_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait::async_trait]
impl EventHandler for PersistenceEventHandler {
    fn event_types(&self) -> Vec<&'static str> {
        ALL_EVENT_TYPES.to_vec()
    }

    async fn handle_event(&self, event: EngineEvent) -> EventResult<()> {
        self.write_event(&event).await.map_err(|e| {
            error!("Failed to persist event: {}", e);
            EventError::ProcessingError(format!("Failed to persist event: {}", e))
        })
    }
}

/// Hands P2P settlement executions to the external ledger/wallet service.
pub struct SettlementForwarder {
    ledger: Arc<dyn LedgerService>,
}

impl SettlementForwarder {
    pub fn new(ledger: Arc<dyn LedgerService>) -> Self {
        Self { ledger }
    }
}

#[async_trait::async_trait]
impl EventHandler for SettlementForwarder {
    fn event_types(&self) -> Vec<&'static str> {
        vec!["TradeExecuted"]
    }

    async fn handle_event(&self, event: EngineEvent) -> EventResult<()> {
        let EngineEvent::TradeExecuted { execution, .. } = event else {
            return Ok(());
        };
        if execution.kind != ExecutionKind::P2pSettlement {
            return Ok(());
        }

        self.ledger
            .record_settlement(&execution)
            .await
            .map_err(|e| EventError::ProcessingError(e.to_string()))
    }
}
