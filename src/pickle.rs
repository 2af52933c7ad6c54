use crate::errors::PickleError;

mod opcodes;
mod machine;
mod value;
#[cfg(test)]
pub(crate) mod fixtures;

pub use machine::{StringEncoding, Unpickler};
pub use value::{Object, Value};

pub fn from_slice(bytes: &[u8], encoding: StringEncoding) -> Result<Value, PickleError> {
    Unpickler::new(bytes, encoding).load()
}

/// Decodes with `latin1` first and falls back to the `ASCII` default.
/// When both fail, the error of the second attempt is returned.
pub fn load_with_fallback(bytes: &[u8]) -> Result<Value, PickleError> {
    match from_slice(bytes, StringEncoding::Latin1) {
        Ok(value) => Ok(value),
        Err(e) => {
            log::warn!(
                "Failed to decode pickle as {} ({}), retrying with {}",
                StringEncoding::Latin1, e, StringEncoding::Ascii
            );
            from_slice(bytes, StringEncoding::Ascii)
        }
    }
}
