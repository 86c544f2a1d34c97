pub mod grid;
pub mod pair_engine;
pub mod pairing;
pub mod trailing;

/// Re-export key types for convenience
pub use self::grid::{GridLevel, GridPlan, GridSide, GridSpec, ProtectiveOrder};
pub use self::pair_engine::{MatchResult, PairEngine};
pub use self::pairing::pair_counterparty;
pub use self::trailing::TrailingUpdate;
