// tools/sim_sender/main.rs
//
// Simulated telemetry sender: exercises the gateway's ingest path with
// generated live CAN packets or a replayed CSV log. Uses the same signal
// catalog and the codec's encode path, so what it sends is exactly what the
// gateway expects to decode.

use clap::Parser;
use futures::SinkExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use telemd::catalog::{Catalog, MessageDef};
use telemd::codec::{encode_raw, raw_from_physical};
use telemd::settings::{IngestMode, Settings};
use telemd::tlog;

#[derive(Parser)]
#[command(name = "sim_sender", about = "Stream simulated telemetry to a telemd gateway")]
struct Args {
    /// Gateway configuration file (for catalog path, mode and ingest port)
    #[arg(long, default_value = "telemd.toml")]
    config: PathBuf,

    /// Gateway host to connect to
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// CSV file to replay in csv mode
    #[arg(long, default_value = "testdata/data.csv")]
    csv: PathBuf,

    /// Delay between packets in milliseconds (0 = flat out)
    #[arg(long, default_value_t = 0)]
    interval_ms: u64,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let settings = match Settings::load(&args.config) {
        Ok(s) => s,
        Err(e) => {
            tlog!("[sim] {}", e);
            std::process::exit(1);
        }
    };

    let url = format!(
        "ws://{}:{}/telemetry",
        args.host, settings.server.ingest_port
    );
    tlog!("[sim] connecting to {} in {:?} mode", url, settings.mode);

    let (ws, _) = match connect_async(url.as_str()).await {
        Ok(pair) => pair,
        Err(e) => {
            tlog!("[sim] dial {}: {}", url, e);
            std::process::exit(1);
        }
    };

    match settings.mode {
        IngestMode::Csv => send_csv(ws, &args.csv).await,
        IngestMode::Live => {
            let catalog = match Catalog::load(Path::new(&settings.catalog_path)) {
                Ok(c) => c,
                Err(e) => {
                    tlog!("[sim] {}", e);
                    std::process::exit(1);
                }
            };
            send_live(ws, &catalog, args.interval_ms).await;
        }
    }
}

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Stream a CSV log line by line, skipping the 8-line header block.
async fn send_csv(mut ws: WsStream, path: &Path) {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            tlog!("[sim] read {}: {}", path.display(), e);
            return;
        }
    };

    let mut sent = 0usize;
    for (i, line) in content.lines().enumerate() {
        if i < 8 {
            continue;
        }
        if ws.send(Message::Text(line.into())).await.is_err() {
            tlog!("[sim] send failed after {} rows", sent);
            return;
        }
        sent += 1;
    }
    let _ = ws.close(None).await;
    tlog!("[sim] sent {} CSV rows, connection closed", sent);
}

/// Round-robin over the catalog, generating sequential physical values and
/// packing them with the codec.
async fn send_live(mut ws: WsStream, catalog: &Catalog, interval_ms: u64) {
    let messages = catalog.messages();
    if messages.is_empty() {
        tlog!("[sim] catalog has no messages");
        return;
    }

    let mut seq: u64 = 0;
    let mut i = 0usize;
    loop {
        let packet = generate_packet(&messages[i], &mut seq);
        if ws.send(Message::Text(packet.into())).await.is_err() {
            tlog!("[sim] send failed, exiting");
            return;
        }
        i = (i + 1) % messages.len();
        if interval_ms > 0 {
            tokio::time::sleep(Duration::from_millis(interval_ms)).await;
        }
    }
}

/// Build one live packet: 4-byte big-endian frame id plus the packed
/// payload, rendered as space-separated uppercase hex octets.
fn generate_packet(msg: &MessageDef, seq: &mut u64) -> String {
    let mut data = vec![0u8; msg.length];
    for signal in &msg.signals {
        // Cells cycle through [0, 4) volts; everything else sweeps [-10, 10)
        let mut phys = if signal.name.to_lowercase().starts_with("cell") {
            (*seq % 4000) as f64 / 1000.0
        } else {
            ((*seq % 2000) as i64 - 1000) as f64 / 100.0
        };
        *seq += 1;

        if signal.is_float {
            phys = (phys * 1000.0).round() / 1000.0;
        }
        encode_raw(&mut data, signal, raw_from_physical(signal, phys));
    }

    let mut parts = Vec::with_capacity(4 + data.len());
    for b in msg.frame_id.to_be_bytes() {
        parts.push(format!("{:02X}", b));
    }
    for b in &data {
        parts.push(format!("{:02X}", b));
    }
    parts.join(" ")
}
