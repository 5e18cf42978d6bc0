//! Link symmetry estimation.
//!
//! A link is only trusted once we know our own messages reach the neighbor
//! (echo count) as well as theirs reach us (received count).

use super::originator::{NeighborKey, OriginatorTable};
use crate::messages::TQ_MAX_VALUE;
use crate::ports::Address;
use std::time::Duration;

/// Outcome of a bidirectionality check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verdict {
    /// Received quality scaled by our own view of the link.
    pub tq: u8,
    pub bidirectional: bool,
}

#[derive(Debug, Clone)]
pub struct BidirectionalityEstimator {
    minimum_send: u8,
    minimum_receive: u8,
    limit: u8,
    window: u8,
}

impl BidirectionalityEstimator {
    pub fn new(minimum_send: u8, minimum_receive: u8, limit: u8, window: u8) -> Self {
        Self {
            minimum_send,
            minimum_receive,
            limit,
            window,
        }
    }

    /// Evaluate the link to `link_originator` on `interface` for a message
    /// originated by `originator` carrying `packet_tq`.
    pub fn evaluate(
        &self,
        table: &mut OriginatorTable,
        originator: Address,
        link_originator: Address,
        packet_tq: u8,
        interface: usize,
        now: Duration,
    ) -> Verdict {
        let windows = table.windows();
        let link = table.get_or_create(link_originator, now);
        let echo = link.echo_sum(interface);
        let neighbor =
            link.neighbor_or_insert(NeighborKey::new(link_originator, interface), windows, now);
        if originator == link_originator {
            neighbor.last_valid = now;
        }
        let real = neighbor.real_packet_count;

        let total = echo.min(real);
        let tq_own = if total < self.minimum_send || real < self.minimum_receive {
            0
        } else {
            (u32::from(TQ_MAX_VALUE) * u32::from(total) / u32::from(real)) as u8
        };
        let asym_penalty = asymmetry_penalty(self.window, real);

        link.tq_own = tq_own;
        link.tq_asym_penalty = asym_penalty;
        table.get_or_create(originator, now).last_valid = now;

        let max = u64::from(TQ_MAX_VALUE);
        let tq = (u64::from(packet_tq) * u64::from(tq_own) * u64::from(asym_penalty) / (max * max)) as u8;

        tracing::trace!(
            %originator,
            %link_originator,
            interface,
            echo = total,
            received = real,
            tq_own,
            asym_penalty,
            tq,
            "bidirectional check"
        );

        Verdict {
            tq,
            bidirectional: tq >= self.limit,
        }
    }
}

/// `255 - 255 * (W - received)^3 / W^3`: close to 255 for healthy links,
/// steep drop for lossy ones.
fn asymmetry_penalty(window: u8, received: u8) -> u8 {
    let window = u64::from(window.max(1));
    let missing = window.saturating_sub(u64::from(received));
    let max = u64::from(TQ_MAX_VALUE);
    (max - max * missing.pow(3) / window.pow(3)) as u8
}
