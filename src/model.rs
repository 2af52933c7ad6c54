pub mod array;
pub mod sparse;
pub mod symbolic;
pub mod record;
pub mod category;
pub mod layout;

pub use array::DenseArray;
pub use category::Category;
pub use layout::check_consumer_layout;
pub use record::{load_record, DenseRecord, FieldKind};
