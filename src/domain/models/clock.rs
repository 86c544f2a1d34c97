//--------------------------------------------------------------------------------------------------
// STRUCTS & TRAITS
//--------------------------------------------------------------------------------------------------
// | Name            | Description                                         | Key Methods       |
// |-----------------|-----------------------------------------------------|-------------------|
// | Clock           | Source of the current instant                       | now               |
// | SystemClock     | Wall clock                                          | now               |
// | ManualClock     | Settable clock for deterministic tests              | set, advance      |
// | IdGenerator     | Source of entity identifiers                        | next_id           |
// | RandomIds       | UUID v4 generator                                   | next_id           |
// | SequentialIds   | Counter-backed generator for deterministic tests    | next_id           |
// | EngineContext   | Clock + id generator threaded through the services  | now, next_id      |
//--------------------------------------------------------------------------------------------------

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(start) }
    }

    pub fn set(&self, instant: DateTime<Utc>) {
        *self.now.lock() = instant;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

pub trait IdGenerator: Send + Sync {
    fn next_id(&self) -> Uuid;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RandomIds;

impl IdGenerator for RandomIds {
    fn next_id(&self) -> Uuid {
        Uuid::new_v4()
    }
}

/// Yields `00000000-0000-0000-0000-000000000001`, `...02`, and so on.
#[derive(Debug)]
pub struct SequentialIds {
    next: AtomicU64,
}

impl SequentialIds {
    pub fn new() -> Self {
        Self { next: AtomicU64::new(1) }
    }
}

impl Default for SequentialIds {
    fn default() -> Self {
        Self::new()
    }
}

impl IdGenerator for SequentialIds {
    fn next_id(&self) -> Uuid {
        Uuid::from_u128(self.next.fetch_add(1, Ordering::SeqCst) as u128)
    }
}

/// Time and identity sources shared by every engine component.
#[derive(Clone)]
pub struct EngineContext {
    pub clock: Arc<dyn Clock>,
    pub ids: Arc<dyn IdGenerator>,
}

impl EngineContext {
    pub fn new(clock: Arc<dyn Clock>, ids: Arc<dyn IdGenerator>) -> Self {
        Self { clock, ids }
    }

    /// Wall clock and random v4 ids.
    pub fn system() -> Self {
        Self::new(Arc::new(SystemClock), Arc::new(RandomIds))
    }

    /// Manual clock starting at `start` and sequential ids. The clock handle is returned so
    /// callers can move time forward.
    pub fn deterministic(start: DateTime<Utc>) -> (Self, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(start));
        let ctx = Self::new(clock.clone(), Arc::new(SequentialIds::new()));
        (ctx, clock)
    }

    #[inline]
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    #[inline]
    pub fn next_id(&self) -> Uuid {
        self.ids.next_id()
    }
}

impl std::fmt::Debug for EngineContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineContext").field("now", &self.clock.now()).finish()
    }
}
