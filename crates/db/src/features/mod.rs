pub mod models;
pub mod pg_repository;
pub mod repositories;

pub use models::{Feature, SinkTable, TableLayout};
pub use pg_repository::PgFeatureSink;
pub use repositories::FeatureSink;
