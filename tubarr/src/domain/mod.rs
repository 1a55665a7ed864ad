//! Core domain types for channels, videos, and their policy records.

pub mod channel;
pub mod filter;
pub mod metarr;
pub mod settings;
pub mod video;

pub use channel::{
    Channel, ChannelAuth, ChannelRef, ChannelUrl, NewChannel, NewChannelUrl, NotifyTarget,
};
pub use filter::{FilterMode, FilterOp, FilterRule, MoveOp};
pub use metarr::{MetarrArgs, ReplacePair};
pub use settings::{ChannelSettings, CrawlFrequency};
pub use video::{DownloadStatus, Video, VideoState};
