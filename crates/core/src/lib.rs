pub mod clock;
pub mod error;
pub mod field_value;
pub mod ids;
pub mod session;
pub mod task;
pub mod version;
pub mod wire;

pub use error::CoreError;
pub use field_value::FieldValue;
pub use ids::*;
pub use version::Version;
