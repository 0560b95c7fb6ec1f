//! Background task owning the transport.
//!
//! One driver task runs per [`Link`](crate::Link). It is the single
//! execution context for inbound frame handling, liveness probing and
//! deadline expiry, so an arriving acknowledgment can never race an
//! expiring timeout or a disconnect. Commands arrive pre-encoded over an
//! unbounded channel and are written to the transport in order.

use crate::{
    frame::{FRAME_LEN, Opcode, RequestFrame, ResponseDecoder},
    link::Shared,
    monitor::Liveness,
    Connect,
};
use log::{debug, trace, warn};
use std::sync::Arc;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    sync::mpsc::UnboundedReceiver,
    time,
};

/// Why a session over an open transport ended.
enum SessionEnd {
    /// The link handle was dropped.
    Closed,
    /// The transport failed or the device stopped responding.
    TransportLost,
}

/// Connection loop: open a transport, run a session over it, classify the
/// link offline and retry after a delay.
pub(crate) async fn run<C: Connect>(
    mut connector: C,
    shared: Arc<Shared>,
    mut frame_rx: UnboundedReceiver<[u8; FRAME_LEN]>,
) {
    loop {
        shared.set_connecting();

        match connector.connect().await {
            Ok(transport) => {
                debug!("Transport open");

                if let SessionEnd::Closed = session(transport, &shared, &mut frame_rx).await {
                    shared.go_offline();
                    return;
                }
            }
            Err(err) => warn!("Failed to open transport: {err}"),
        }

        shared.go_offline();
        time::sleep(shared.config.reconnect_delay).await;
    }
}

/// Runs one session over an open transport.
///
/// Returns when the transport fails, the device goes silent, or the link
/// handle is dropped.
async fn session<T>(
    transport: T,
    shared: &Arc<Shared>,
    frame_rx: &mut UnboundedReceiver<[u8; FRAME_LEN]>,
) -> SessionEnd
where
    T: AsyncRead + AsyncWrite + Send,
{
    // Commands accepted against a previous session must never fire late
    while frame_rx.try_recv().is_ok() {}

    let (mut reader, mut writer) = tokio::io::split(transport);
    let mut decoder = ResponseDecoder::new();
    let mut probe = time::interval(shared.config.probe_interval);
    let mut liveness = Liveness::new(shared.config.liveness_timeout);
    let mut reported_anomalies = 0;
    let mut buf = [0x00; 64];

    loop {
        let deadline = shared.pending_deadline();

        tokio::select! {
            res = reader.read(&mut buf) => match res {
                Ok(0) => {
                    debug!("Transport closed by peer");
                    return SessionEnd::TransportLost;
                }
                Ok(n) => {
                    trace!("Read from transport: {:02x?}", &buf[..n]);
                    liveness.record();
                    shared.mark_alive();

                    for frame in decoder.feed(&buf[..n]) {
                        shared.handle_frame(frame);
                    }

                    shared.add_anomalies(decoder.anomalies() - reported_anomalies);
                    reported_anomalies = decoder.anomalies();
                }
                Err(err) => {
                    warn!("Transport read failed: {err}");
                    return SessionEnd::TransportLost;
                }
            },
            msg = frame_rx.recv() => match msg {
                Some(bytes) => {
                    trace!("Write to transport: {bytes:02x?}");

                    if let Err(err) = writer.write_all(&bytes).await {
                        warn!("Transport write failed: {err}");
                        return SessionEnd::TransportLost;
                    }
                }
                None => return SessionEnd::Closed,
            },
            _ = probe.tick() => {
                if liveness.expired() {
                    warn!("Device stopped responding");
                    return SessionEnd::TransportLost;
                }

                let probe_frame = RequestFrame {
                    seq: shared.allocate_seq(),
                    opcode: Opcode::Probe,
                    param: 0,
                };

                if let Err(err) = writer.write_all(&probe_frame.encode()).await {
                    warn!("Transport write failed: {err}");
                    return SessionEnd::TransportLost;
                }
            },
            () = time::sleep_until(deadline.unwrap_or_else(time::Instant::now)),
                if deadline.is_some() =>
            {
                shared.expire_pending();
            },
        }
    }
}
