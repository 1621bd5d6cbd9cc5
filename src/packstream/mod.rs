//! PackStream: the self-describing binary serialization Bolt uses for every message
//! payload (§4.1).

pub mod decoder;
pub mod encoder;
pub mod value;

pub use decoder::Decoder;
pub use encoder::{encode_value, StructWriter};
pub use value::{Structure, Value};
