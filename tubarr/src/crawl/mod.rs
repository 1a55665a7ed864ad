//! Channel crawling: discovery, dedup, and dispatch into the pipeline.

pub mod engine;
pub mod registry;

pub use engine::{ChannelCrawlReport, CrawlEngine, CrawlMode};
pub use registry::{CrawlGuard, CrawlStateRegistry};
