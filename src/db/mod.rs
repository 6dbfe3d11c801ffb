// Postgres storage for positions and candles
pub mod postgres;

pub use postgres::PostgresStore;
