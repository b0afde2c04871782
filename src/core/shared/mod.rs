pub mod error;
pub mod schema;
pub mod state;
pub mod utils;

pub use error::{ApiError, ApiJson};
pub use state::AppState;
pub use utils::DbPool;
