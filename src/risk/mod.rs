// Risk analytics, Kelly sizing and promotion thresholds
pub mod kelly;
pub mod metrics;
pub mod promotion;

pub use kelly::{calculate_kelly, KellyInput, KellySizing, RiskLevel};
pub use metrics::{MasterMetrics, PerformanceScope, RiskAnalytics, StrategyMetrics, StrategySummary};
pub use promotion::PromotionCriteria;
