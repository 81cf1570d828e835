pub mod handlers;

// Re-export commonly used handler functions for convenience
pub use handlers::{apply_crawl_overrides, load_seeds_from_file, parse_seed_line};

// Re-export crawl functionality from tendril-core
pub use tendril_core::crawl::{
    CrawlOptions, CrawlProgressCallback, build_clients, execute_crawl, generate_crawl_report,
};
