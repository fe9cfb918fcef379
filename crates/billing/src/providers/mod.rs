//! Provider-specific webhook verification and decoding

pub mod stripe;
pub mod treli;

pub use stripe::StripeEventDecoder;
pub use treli::TreliEventDecoder;
