pub mod deal;
pub mod floa;
pub mod metrics;
pub mod prebook;
pub mod reconcile;
pub mod repository;
pub mod supplier;
pub mod systempay;
