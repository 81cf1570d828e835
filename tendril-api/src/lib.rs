pub mod client;
pub mod error;
pub mod model;
pub mod policy;

pub use client::{API_LIST_THRESHOLD, ApiClient, BackoffCallback, ClientOptions, MAX_BACKOFF};
pub use error::{ApiError, PolicyError};
pub use model::{Account, AdjacencyMap, Identity};
pub use policy::{Action, ErrorEntry, ErrorPolicy, TransportPolicy};
