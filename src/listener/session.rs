//! Per-connection session loop.
//!
//! Owns the socket for the life of a connection: decodes inbound frames into
//! the processor, writes queued outbound PDUs, and detaches the processor
//! from its group when the connection ends for any reason.

use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::{debug, warn};

use crate::pdu::SmppCodec;
use crate::processor::{self, PduProcessor, SessionReceivers};

/// Drive one connection until it closes.
///
/// Exits when the peer disconnects, a protocol error occurs, or the
/// processor signals close (unbind, or coordinated shutdown). Queued
/// outbound PDUs are flushed before the socket drops so a final response
/// still reaches the peer.
pub async fn run(
    stream: TcpStream,
    processor: Arc<dyn PduProcessor>,
    mut receivers: SessionReceivers,
) {
    let mut framed = Framed::new(stream, SmppCodec::new());

    loop {
        tokio::select! {
            biased;

            changed = receivers.close.changed() => {
                if changed.is_err() || *receivers.close.borrow_and_update() {
                    debug!("close signalled");
                    break;
                }
            }

            item = receivers.outbound.recv() => {
                let Some((header, pdu)) = item else {
                    break;
                };
                if let Err(e) = framed.send((header, pdu)).await {
                    debug!(error = %e, "outbound write failed");
                    break;
                }
            }

            frame = framed.next() => {
                match frame {
                    Some(Ok(frame)) => {
                        if frame.is_response() {
                            processor.handle_response(frame).await;
                        } else {
                            processor.handle_request(frame).await;
                        }
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "protocol error, closing session");
                        break;
                    }
                    None => {
                        debug!("peer disconnected");
                        break;
                    }
                }
            }
        }
    }

    // Flush whatever responses were queued before the loop ended, an
    // unbind_resp in particular.
    while let Ok((header, pdu)) = receivers.outbound.try_recv() {
        if framed.send((header, pdu)).await.is_err() {
            break;
        }
    }

    processor::terminate(&processor).await;
    debug!(system_id = ?processor.core().system_id(), "session ended");
}
