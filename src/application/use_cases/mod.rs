mod circular_dependencies;
mod impact_analysis;
mod index_project;
mod search_code;

pub use circular_dependencies::*;
pub use impact_analysis::*;
pub use index_project::*;
pub use search_code::*;
