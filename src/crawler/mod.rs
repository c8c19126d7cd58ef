pub mod controller;
pub mod scheduler;
pub mod task;
pub mod tree;

// Re-export common types
pub use controller::BoundedCrawler;
pub use scheduler::{CrawlScheduler, DepthQuotas};
pub use task::{CrawlNode, CrawlQueueEntry, CrawlReport};
pub use tree::{build_crawl_tree, CrawlTreeNode};
