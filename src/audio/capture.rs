// Capture pipeline: turns microphone blocks into outbound PCM frames
//
// Blocks are never buffered. A block that arrives while the transport is
// down, the session is muted, or the session no longer wants audio is
// dropped on the spot, so stale speech is never sent later.

use tracing::{debug, info};

use super::pcm;

/// Log a level summary every N frames (~1 second at 4096 samples / 16kHz)
const LEVEL_LOG_INTERVAL: u64 = 25;

/// Log discards every N blocks
const DISCARD_LOG_INTERVAL: u64 = 100;

/// Conditions consulted for every block, read fresh by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureGate {
    pub transport_open: bool,
    pub muted: bool,
    pub session_live: bool,
}

/// What happened to one capture block
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockOutcome {
    /// Encoded frame ready to transmit as one binary message
    Send(Vec<u8>),
    DiscardedTransportClosed,
    DiscardedMuted,
    DiscardedInactive,
}

/// Decide what happens to one capture block. Holds no frame history.
pub fn process_block(block: &[f32], gate: CaptureGate) -> BlockOutcome {
    if !gate.session_live {
        BlockOutcome::DiscardedInactive
    } else if !gate.transport_open {
        BlockOutcome::DiscardedTransportClosed
    } else if gate.muted {
        BlockOutcome::DiscardedMuted
    } else {
        BlockOutcome::Send(pcm::to_le_bytes(&pcm::encode_block(block)))
    }
}

/// Periodic level log, keyed off the session's count of frames sent
pub fn log_sent(frames_sent: u64, block: &[f32]) {
    if frames_sent % LEVEL_LOG_INTERVAL == 1 {
        info!(
            "Audio frame #{}, level: {:.1}%",
            frames_sent,
            pcm::peak_level(block) * 100.0
        );
    }
}

/// Periodic discard log, keyed off the session's count of discarded blocks
pub fn log_discarded(blocks_discarded: u64, outcome: &BlockOutcome) {
    if blocks_discarded % DISCARD_LOG_INTERVAL == 1 {
        debug!("Discarding capture block #{}: {:?}", blocks_discarded, outcome);
    }
}
