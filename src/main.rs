//! gnss-bridge - NMEA data bridge daemon

use std::env;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use gnss_bridge::config::Config;
use gnss_bridge::error::Result;
use gnss_bridge::session::{Session, SessionEvent, SessionState};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    log::info!("gnss-bridge v{} starting...", env!("CARGO_PKG_VERSION"));

    let config_path = env::args()
        .nth(1)
        .unwrap_or_else(|| "/etc/gnss-bridge.toml".to_string());

    log::info!("Using config: {}", config_path);
    let config = Config::load(&config_path)?;
    log::info!(
        "Input: {}, {} output(s) configured",
        config.session.input.label(),
        config.session.outputs.len()
    );

    let mut session = Session::new();
    let events = session.subscribe();

    // Log accepted traffic at debug so a normal run stays quiet.
    std::thread::Builder::new()
        .name("event-log".to_string())
        .spawn(move || {
            for event in events {
                match event {
                    SessionEvent::SentenceReceived(sentence) => {
                        log::debug!("accepted {}", sentence.full_type());
                    }
                    SessionEvent::StateChanged { .. } => {
                        // Already logged by the session itself.
                    }
                }
            }
        })?;

    let running = Arc::new(AtomicBool::new(true));
    let r = Arc::clone(&running);
    ctrlc::set_handler(move || {
        log::info!("Received shutdown signal");
        r.store(false, Ordering::Relaxed);
    })
    .map_err(|e| {
        gnss_bridge::Error::Other(format!("Error setting Ctrl-C handler: {}", e))
    })?;

    session.start(config.session)?;
    log::info!("gnss-bridge running. Press Ctrl-C to stop.");

    let mut last_stats = Instant::now();
    while running.load(Ordering::Relaxed) {
        std::thread::sleep(Duration::from_millis(100));

        if session.state() == SessionState::Error {
            log::error!("Session failed, shutting down");
            break;
        }

        if last_stats.elapsed().as_secs() >= 10 {
            let snap = session.statistics();
            log::info!(
                "rx {} sentences ({} B) @ {:.1} Hz | tx {} ({} B) | {} checksum / {} parse / {} write errors",
                snap.sentences_received,
                snap.bytes_received,
                snap.data_rate_hz,
                snap.sentences_sent,
                snap.bytes_sent,
                snap.checksum_errors,
                snap.parse_errors,
                snap.write_errors
            );
            last_stats = Instant::now();
        }
    }

    log::info!("Shutting down...");
    session.stop();
    log::info!("gnss-bridge stopped");
    Ok(())
}
