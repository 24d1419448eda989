pub mod in_memory;
pub mod sheets_client;

// Re-export for convenience
pub use in_memory::InMemorySheetApi;
pub use sheets_client::{ServiceAccountAuth, SheetsApiClient};
