pub mod coingecko;

pub use coingecko::CoinGeckoOracle;
