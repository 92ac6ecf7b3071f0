//! Parameter-specific SQL handlers.
//!
//! Each handler generates the condition on `search_index` columns that one
//! search value imposes on a single index entry.

mod date;
mod near;
mod number;
mod quantity;
mod reference;
mod string;
mod token;
mod uri;

pub use date::DateHandler;
pub use near::NearHandler;
pub use number::NumberHandler;
pub use quantity::QuantityHandler;
pub use reference::ReferenceHandler;
pub use string::StringHandler;
pub use token::TokenHandler;
pub use uri::UriHandler;
