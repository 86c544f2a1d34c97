pub mod dispute;
pub mod errors;
pub mod escrow;
pub mod events;
pub mod external;
pub mod lifecycle;
pub mod matching_engine;
pub mod orderbook;
pub mod p2p_service;
pub mod risk;
pub mod scheduler;
pub mod store;
pub mod trading_service;
