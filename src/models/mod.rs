pub mod account;
pub mod enums;
pub mod history;
pub mod medical_record;

pub use account::*;
pub use enums::*;
pub use history::*;
pub use medical_record::*;
