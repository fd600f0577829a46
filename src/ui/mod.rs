pub mod icons;
pub mod output;
pub mod table;
pub mod theme;

pub use icons::Icons;
pub use output::{dim, error, header, info, rows_json, success, warn};
pub use table::rows_table;
pub use theme::{theme, Theme};
