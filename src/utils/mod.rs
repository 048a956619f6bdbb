pub mod collection_ext;
pub mod error;
pub mod identifier;
pub mod scheduled_executor;
pub mod slug;
pub mod string_ext;

pub use collection_ext::{group_by, unique_ordered};
pub use error::{AppError, AppResult};
pub use scheduled_executor::{ScheduledExecutor, ScheduledTask};
pub use string_ext::StringExt;
