pub mod accounts;
pub mod constants;
pub mod errors;
pub mod pda;
pub mod program_errors;
pub mod program_ids;
pub mod types;

pub use constants::*;
pub use program_ids::*;
pub use types::*;
