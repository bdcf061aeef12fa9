//! # Alerts DB
//!
//! PostgreSQL implementation of the `EventSource` boundary.
//!
//! ```text
//! queries/EventHotWork.sql (:named params)
//!   └── rewrite_named_params → $1..$n
//!         └── PostgresEventSource::fetch_candidates(filter)
//!               ├── [optional] SshTunnel  ssh -N -L 127.0.0.1:<port>:<db>:5432
//!               └── PgPool (lazy)
//! ```

pub mod postgres;
pub mod query;
pub mod tunnel;

pub use postgres::PostgresEventSource;
pub use query::{PreparedQuery, load_sql_query, rewrite_named_params};
pub use tunnel::SshTunnel;
