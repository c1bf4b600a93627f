use std::io;

/// Reads a message from a byte buffer, possibly borrowing from it.
pub trait Deserialize<'a>: Sized {
    /// Deserializes an instance of `Self` from `buf`.
    ///
    /// # Arguments
    /// * `buf` - The received bytes, without the length prefix.
    ///
    /// # Returns
    /// The decoded value or an `io::Error` of kind `InvalidData`.
    fn deserialize(buf: &'a mut [u8]) -> io::Result<Self>;
}
