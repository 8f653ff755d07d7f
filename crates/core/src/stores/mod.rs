pub mod local;
pub mod opensearch;

pub use local::LocalStore;
pub use opensearch::OpenSearchStore;
