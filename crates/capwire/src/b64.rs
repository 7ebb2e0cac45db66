//! Base64 as used on the wire: standard alphabet, `=` padding on output,
//! and either padded or stripped input accepted on decode.

use base64::Engine;
use base64::alphabet;
use base64::engine::DecodePaddingMode;
use base64::engine::GeneralPurpose;
use base64::engine::GeneralPurposeConfig;

use crate::error::Error;
use crate::error::Result;

const WIRE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_encode_padding(true)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

pub fn encode(bytes: &[u8]) -> String {
    WIRE.encode(bytes)
}

pub fn decode(text: &str) -> Result<Vec<u8>> {
    WIRE.decode(text).map_err(|e| Error::Decode(format!("bad base64: {}", e)))
}
