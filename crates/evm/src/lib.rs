pub mod bytes;
pub mod quantity;

pub use bytes::{HexError, normalize_hex};
pub use quantity::{Quantity, QuantityError};
