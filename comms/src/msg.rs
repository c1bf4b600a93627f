use std::{borrow::Cow, io};

use crate::{Deserialize, Serialize};

type Header = u32;
const HEADER_SIZE: usize = size_of::<Header>();

/// The payload data for the `Data` variant of the `Msg` enum.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Payload<'a> {
    /// A flat block of model parameters.
    Params(&'a [f32]),
    /// A flat block of parameter gradients.
    Grad(&'a [f32]),
    /// The input samples of one training batch.
    Samples(&'a [f32]),
    /// The labels matching the last `Samples` payload.
    Labels(&'a [f32]),
}

impl<'a> Payload<'a> {
    /// Returns the numbers carried by this payload, regardless of its kind.
    pub fn nums(&self) -> &'a [f32] {
        match *self {
            Payload::Params(nums)
            | Payload::Grad(nums)
            | Payload::Samples(nums)
            | Payload::Labels(nums) => nums,
        }
    }

    fn kind(&self) -> u8 {
        match self {
            Payload::Params(_) => 2,
            Payload::Grad(_) => 3,
            Payload::Samples(_) => 4,
            Payload::Labels(_) => 5,
        }
    }
}

/// The command for the `Control` variant of the `Msg` enum.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    /// First message a peer sends after connecting, announcing its rank.
    Hello { rank: usize },
    /// Rendezvous token used by the barrier primitive.
    Barrier,
    /// Asks a data server for the next training batch.
    RequestBatch,
    /// Graceful end of the conversation.
    Disconnect,
}

/// The application layer message for the entire system.
#[derive(Debug, PartialEq)]
pub enum Msg<'a> {
    Control(Command),
    Data(Payload<'a>),
    Err(Cow<'a, str>),
}

impl Msg<'_> {
    /// Returns a short name for the kind of this message, for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Msg::Control(_) => "control",
            Msg::Err(_) => "err",
            Msg::Data(Payload::Params(_)) => "data/params",
            Msg::Data(Payload::Grad(_)) => "data/gradient",
            Msg::Data(Payload::Samples(_)) => "data/samples",
            Msg::Data(Payload::Labels(_)) => "data/labels",
        }
    }

    fn buf_is_too_small<T>(size: usize) -> io::Result<T> {
        Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("The given buffer is too small {size}, must at least be {HEADER_SIZE} bytes"),
        ))
    }

    fn invalid_kind_byte<T>(byte: u8) -> io::Result<T> {
        Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Received an invalid kind byte {byte}"),
        ))
    }
}

impl<'a> Serialize<'a> for Msg<'a> {
    fn serialize(&'a self, buf: &mut Vec<u8>) -> Option<&'a [u8]> {
        match self {
            Msg::Err(e) => {
                let header = (0 as Header).to_be_bytes();
                buf.extend_from_slice(&header);
                Some(e.as_bytes())
            }
            Msg::Control(cmd) => {
                let header = (1 as Header).to_be_bytes();
                buf.extend_from_slice(&header);

                // SAFETY: Serialize impl for `Command` is derived and not implemented
                //         by hand. Nor has a non string-key map inside.
                serde_json::to_writer(buf, &cmd).unwrap();
                None
            }
            Msg::Data(payload) => {
                let header = (payload.kind() as Header).to_be_bytes();
                buf.extend_from_slice(&header);
                Some(bytemuck::cast_slice(payload.nums()))
            }
        }
    }
}

impl<'a> Deserialize<'a> for Msg<'a> {
    fn deserialize(buf: &'a mut [u8]) -> io::Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Self::buf_is_too_small(buf.len());
        }

        let (kind_buf, rest) = buf.split_at(HEADER_SIZE);

        // SAFETY: We splitted the buffer to be of size `HEADER_SIZE` just above.
        let kind = Header::from_be_bytes(kind_buf.try_into().unwrap()) as u8;

        match kind {
            0 => {
                let string = std::str::from_utf8(rest)
                    .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;

                Ok(Self::Err(Cow::Borrowed(string)))
            }
            1 => {
                let cmd = serde_json::from_slice(rest)?;
                Ok(Self::Control(cmd))
            }
            2..6 => {
                let nums = bytemuck::try_cast_slice(rest).map_err(|e| {
                    io::Error::new(io::ErrorKind::InvalidData, format!("{e:?}"))
                })?;

                let payload = match kind {
                    2 => Payload::Params(nums),
                    3 => Payload::Grad(nums),
                    4 => Payload::Samples(nums),
                    _ => Payload::Labels(nums),
                };

                Ok(Self::Data(payload))
            }
            byte => Self::invalid_kind_byte(byte),
        }
    }
}
