pub mod history;
pub mod lookup;
pub mod types;
pub mod wrangle;

pub use history::ScreenHistory;
pub use lookup::{LookupOptions, PrismLookup};
pub use types::{ColumnMap, Ic50Record, PrismKey, ScreenId};
