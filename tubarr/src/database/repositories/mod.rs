//! Repository layer for database access.
//!
//! The orchestrator only ever talks to these traits; the sqlx
//! implementations own SQL and transaction framing. Each call is
//! independently atomic.

pub mod channel;
pub mod ignore;
pub mod video;

pub use channel::{ChannelRepository, SqlxChannelRepository};
pub use ignore::{IgnoreRepository, SqlxIgnoreRepository};
pub use video::{SqlxVideoRepository, VideoRepository};
