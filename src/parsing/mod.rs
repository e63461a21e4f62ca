pub mod envelope;

pub use envelope::decode_envelope;
