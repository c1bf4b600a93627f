use std::io;

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::{Align4, Deserialize, LEN_TYPE_SIZE, LenType};

/// The largest frame a receiver accepts, in bytes.
pub const MAX_FRAME_LEN: usize = 1 << 30;

/// The receiving end of a framed connection.
///
/// Every frame is a big-endian length prefix followed by that many bytes.
pub struct OnoReceiver<R: AsyncRead + Unpin> {
    rx: R,
}

impl<R: AsyncRead + Unpin> OnoReceiver<R> {
    /// Creates a new `OnoReceiver` instance.
    ///
    /// # Arguments
    /// * `rx` - The underlying reader.
    pub(super) fn new(rx: R) -> Self {
        Self { rx }
    }

    /// Waits for the next frame and decodes it.
    ///
    /// # Arguments
    /// * `buf` - The buffer the frame is read into, the returned `T` borrows from it.
    ///
    /// # Returns
    /// The decoded message, or an `UnexpectedEof` error if the peer closed the connection.
    pub async fn recv_into<'buf, T, B>(&mut self, buf: &'buf mut Vec<B>) -> io::Result<T>
    where
        T: Deserialize<'buf>,
        B: Align4,
    {
        self.recv_or_close(buf)
            .await?
            .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "peer closed the connection"))
    }

    /// Like `recv_into`, but a peer closing the connection between two frames
    /// is `None` instead of an error.
    pub async fn recv_or_close<'buf, T, B>(&mut self, buf: &'buf mut Vec<B>) -> io::Result<Option<T>>
    where
        T: Deserialize<'buf>,
        B: Align4,
    {
        let mut size_buf = [0; LEN_TYPE_SIZE];
        match self.rx.read_exact(&mut size_buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e),
        }

        let len = LenType::from_be_bytes(size_buf) as usize;
        if len > MAX_FRAME_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("frame of {len} bytes exceeds the {MAX_FRAME_LEN} byte limit"),
            ));
        }

        buf.resize(len.div_ceil(size_of::<B>()), B::zeroed());
        let frame = &mut bytemuck::cast_slice_mut(buf)[..len];
        self.rx.read_exact(frame).await?;

        T::deserialize(frame).map(Some)
    }
}
