pub mod error;
pub mod precision;
pub mod search;

pub use error::DateError;
pub use precision::{expand, Bound, Interval, PartialDateTime, Precision};
pub use search::{classify, validate_date_search, Comparator, Relation, SearchValue, Target};
