pub mod optimizer;
pub mod provider;
