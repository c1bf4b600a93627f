/// Writes a message into a byte buffer.
pub trait Serialize<'a> {
    /// Serializes `self` into `buf`.
    ///
    /// # Arguments
    /// * `buf` - The buffer to append the serialized header and inline data to.
    ///
    /// # Returns
    /// A trailing slice of bytes to be written after `buf` without copying, if any.
    fn serialize(&'a self, buf: &mut Vec<u8>) -> Option<&'a [u8]>;
}
