// Trade execution: pricing, fees, positions, limit orders and emergency stop
pub mod executor;
pub mod fees;
pub mod kill_switch;
pub mod price_feed;
pub mod scheduler;

pub use executor::{BulkCloseReport, CloseFailure, TradeExecutor, DEFAULT_HISTORY_LIMIT};
pub use fees::FeeSchedule;
pub use kill_switch::{KillSwitch, KillSwitchReport, KillSwitchRequest};
pub use price_feed::{PriceOracle, PriceQuote, RandomWalkOracle, StaticPriceOracle};
pub use scheduler::{OrderScheduler, SchedulerHandle, TickReport};
