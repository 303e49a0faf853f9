//! # Connection lifecycle

/// Lifecycle state of a broker connection.
///
/// The happy path is `Idle → HeaderSent → Negotiating → Open → Closing →
/// Closed`. A server-initiated close jumps straight to [`Closed`], and any
/// transport failure lands in the parallel terminal state [`Failed`],
/// reachable from everywhere.
///
/// [`Closed`]: ConnectionState::Closed
/// [`Failed`]: ConnectionState::Failed
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// Nothing has been sent yet.
    Idle,
    /// Protocol header written; `connection.start` not yet received.
    HeaderSent,
    /// Start/Tune/Open negotiation in progress.
    Negotiating,
    /// Handshake complete; application traffic allowed.
    Open,
    /// Client `connection.close` sent; `close-ok` outstanding.
    Closing,
    /// Close negotiation finished; the transport is torn down.
    Closed,
    /// Transport or handshake failure; the transport is torn down.
    Failed,
}

impl ConnectionState {
    /// `true` between Open-Ok and the start of a close or failure.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }

    /// `true` once no further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Failed)
    }

    /// `true` while the opening handshake has not completed.
    pub fn is_negotiating(&self) -> bool {
        matches!(self, Self::Idle | Self::HeaderSent | Self::Negotiating)
    }
}

///////////////////////////////////////////////////////////////////////////////
//                                  Tests                                    //
///////////////////////////////////////////////////////////////////////////////
