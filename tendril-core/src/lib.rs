pub mod balance;
pub mod config;
pub mod crawl;
pub mod error;
pub mod expand;
pub mod model;
pub mod snapshot;
pub mod store;

pub use balance::{balance, round_robin, split_into_chunks};
pub use config::{ClientConfig, ConfigError, TendrilConfig};
pub use error::{CrawlError, Result};
pub use expand::{ExpandOptions, GraphExpander, LevelCallback, resolve_names};
pub use model::{CrawlSnapshot, EdgeConvention, EdgeFilter, FriendshipPair};
pub use snapshot::SnapshotError;
pub use store::{GraphLoader, GraphStore, LoadSummary, StoreError};

pub fn print_banner() {
    let version = env!("CARGO_PKG_VERSION");
    println!(
        r#"
  _                 _      _ _
 | |_ ___ _ __   __| |_ __(_) |
 | __/ _ \ '_ \ / _` | '__| | |
 | ||  __/ | | | (_| | |  | | |
  \__\___|_| |_|\__,_|_|  |_|_|   v{}
"#,
        version
    );
}
