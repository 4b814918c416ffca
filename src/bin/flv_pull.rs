//! Pull a remote RTMP stream to a local FLV file
//!
//! Run with: flv_pull -i <rtmp_url> -o <out.flv>
//!
//! Example: flv_pull -i rtmp://127.0.0.1/live/test -o recording.flv
//!
//! Writes the 13-byte FLV file header, then one tag per received
//! audio/video/metadata message, until the stream ends or Ctrl+C.

use rtmp_relay::client::{PullSession, PullSessionTimeouts};
use rtmp_relay::media::flv::{FlvFileWriter, Tag};

fn parse_flag() -> Option<(String, String)> {
    let args: Vec<String> = std::env::args().collect();
    let mut url = None;
    let mut out = None;
    let mut i = 1;
    while i + 1 < args.len() {
        match args[i].as_str() {
            "-i" => url = Some(args[i + 1].clone()),
            "-o" => out = Some(args[i + 1].clone()),
            _ => return None,
        }
        i += 2;
    }
    Some((url?, out?))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("rtmp_relay=info".parse()?)
                .add_directive("flv_pull=info".parse()?),
        )
        .init();

    let Some((url, out_file)) = parse_flag() else {
        eprintln!("Usage: flv_pull -i <rtmp_url> -o <out.flv>");
        eprintln!("Example: flv_pull -i rtmp://127.0.0.1/live/test -o recording.flv");
        std::process::exit(1);
    };

    let mut writer = FlvFileWriter::open(&out_file)?;
    writer.write_flv_header()?;

    let mut session = PullSession::new(PullSessionTimeouts {
        connect_timeout_ms: 3000,
        pull_timeout_ms: 5000,
        read_av_timeout_ms: 10000,
    });

    let mut tag_count: u64 = 0;
    let result = session
        .pull(&url, move |msg| {
            tag_count += 1;
            if tag_count % 100 == 1 {
                tracing::info!(
                    tags = tag_count,
                    timestamp_abs = msg.header.timestamp_abs,
                    "recording"
                );
            }
            let tag = Tag::pack(
                msg.header.msg_type_id,
                msg.header.timestamp_abs,
                &msg.payload,
            );
            if let Err(e) = writer.write_tag(&tag) {
                tracing::error!(error = %e, "write tag failed");
                std::process::exit(1);
            }
        })
        .await;

    session.dispose();
    if let Err(e) = result {
        tracing::error!(error = %e, "pull session done");
        std::process::exit(1);
    }
    Ok(())
}
