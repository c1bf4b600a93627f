//! Framed messaging between the processes of a training run, and the
//! collective transports built on it.

mod align;
mod deserialize;
pub mod msg;
mod receiver;
mod sender;
mod serialize;
pub mod transport;

use tokio::io::{AsyncRead, AsyncWrite};

pub use align::{Align1, Align4};
pub use deserialize::Deserialize;
pub use receiver::{MAX_FRAME_LEN, OnoReceiver};
pub use sender::OnoSender;
pub use serialize::Serialize;

type LenType = u64;
const LEN_TYPE_SIZE: usize = size_of::<LenType>();

/// Wraps the two halves of a connection into a framed receiver and sender.
///
/// # Arguments
/// * `rx` - The readable half.
/// * `tx` - The writable half.
///
/// # Returns
/// The receiving and the sending end, in that order.
pub fn channel<R, W>(rx: R, tx: W) -> (OnoReceiver<R>, OnoSender<W>)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    (OnoReceiver::new(rx), OnoSender::new(tx))
}
