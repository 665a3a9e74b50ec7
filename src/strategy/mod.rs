// Strategy lifecycle: sandbox states and promotion to live
pub mod registry;

pub use registry::{
    run_auto_promotion, DecisionOutcome, PromotionCheck, PromotionDecision, StrategyRecord,
    StrategyRegistry, StrategyState,
};
