//! Connection state machine states.

use std::fmt;

/// Phase of the client protocol engine.
///
/// Exactly one value is live per client; it is the single source of truth for
/// which phase the engine is in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ClientState {
    /// No session, waiting for a rendezvous
    #[default]
    None,
    /// Rendezvous accepted, (re)connecting to the session address
    StartConnection,
    /// Asking the hooks for the request metadata
    BindRequestMetaData,
    /// Sending the request metadata
    SendRequestMetaData,
    /// Waiting for the response metadata
    ReceiveResponseMetaData,
    /// Handing the response metadata to the hooks
    BindResponseMetaData,
    /// Preparing the streaming phase
    InitSendAndReceiveData,
    /// Hooks fill the outgoing buffer
    BindSendData,
    /// Sending the outgoing buffer
    SendData,
    /// Waiting for the incoming buffer
    ReceiveData,
    /// Hooks read the incoming buffer
    BindReceiveData,
}

impl ClientState {
    /// Get descriptive name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::None => "None",
            Self::StartConnection => "StartConnection",
            Self::BindRequestMetaData => "BindRequestMetaData",
            Self::SendRequestMetaData => "SendRequestMetaData",
            Self::ReceiveResponseMetaData => "ReceiveResponseMetaData",
            Self::BindResponseMetaData => "BindResponseMetaData",
            Self::InitSendAndReceiveData => "InitSendAndReceiveData",
            Self::BindSendData => "BindSendData",
            Self::SendData => "SendData",
            Self::ReceiveData => "ReceiveData",
            Self::BindReceiveData => "BindReceiveData",
        }
    }

    /// States that wait on a reply the server still owes.
    pub fn is_receiving(&self) -> bool {
        matches!(self, Self::ReceiveResponseMetaData | Self::ReceiveData)
    }

    /// States from which an orderly close transmits the termination payload.
    ///
    /// Covers `BindRequestMetaData` through `BindReceiveData` except the two
    /// receiving states, where sending would break the request/reply turn.
    pub fn sends_termination(&self) -> bool {
        matches!(
            self,
            Self::BindRequestMetaData
                | Self::SendRequestMetaData
                | Self::BindResponseMetaData
                | Self::InitSendAndReceiveData
                | Self::BindSendData
                | Self::SendData
                | Self::BindReceiveData
        )
    }

    /// States where `communicate` may advance the engine.
    pub fn is_streaming_ready(&self) -> bool {
        matches!(self, Self::BindSendData | Self::InitSendAndReceiveData)
    }
}

impl fmt::Display for ClientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
