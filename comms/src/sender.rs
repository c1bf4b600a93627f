//! The sending end of the framing protocol.

use std::io;

use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::{LEN_TYPE_SIZE, LenType, Serialize};

/// The sending end of a framed connection.
pub struct OnoSender<W>
where
    W: AsyncWrite + Unpin,
{
    tx: W,
    buf: Vec<u8>,
}

impl<W: AsyncWrite + Unpin> OnoSender<W> {
    /// Creates a new `OnoSender` instance.
    ///
    /// # Arguments
    /// * `tx` - The underlying writer.
    pub(super) fn new(tx: W) -> Self {
        Self {
            tx,
            buf: Vec::new(),
        }
    }

    /// Sends `msg` as a single frame and flushes the writer.
    pub async fn send<'a, T: Serialize<'a>>(&mut self, msg: &'a T) -> io::Result<()> {
        self.write_frame(msg).await?;
        self.tx.flush().await
    }

    /// Sends every message of `msgs` in order, flushing once at the end.
    pub async fn send_all<'a, T, I>(&mut self, msgs: I) -> io::Result<()>
    where
        T: Serialize<'a> + 'a,
        I: IntoIterator<Item = &'a T>,
    {
        for msg in msgs {
            self.write_frame(msg).await?;
        }

        self.tx.flush().await
    }

    /// Writes the length prefix, the serialized header and the zero copy
    /// trailer of `msg`.
    async fn write_frame<'a, T: Serialize<'a>>(&mut self, msg: &'a T) -> io::Result<()> {
        let Self { buf, tx } = self;

        buf.clear();
        buf.resize(LEN_TYPE_SIZE, 0);

        let trailer = msg.serialize(buf);
        let len = buf.len() - LEN_TYPE_SIZE + trailer.map_or(0, <[u8]>::len);
        buf[..LEN_TYPE_SIZE].copy_from_slice(&(len as LenType).to_be_bytes());
        tx.write_all(buf).await?;

        if let Some(trailer) = trailer {
            tx.write_all(trailer).await?;
        }

        Ok(())
    }
}
