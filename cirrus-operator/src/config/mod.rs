mod types;

pub use types::CirrusConfig;
