use std::io::{Read, Write};
use std::net::TcpListener;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use image::{Rgb, RgbImage};
use tempfile::TempDir;

use flowgrid::config::{self, AppConfig, DiscoveryConfig};
use flowgrid::control::{ControlError, ControlRequest};
use flowgrid::discovery::{Discovery, DiscoveryTier, Finding};
use flowgrid::mjpeg::{decode_jpeg, encode_jpeg, multipart_part, MULTIPART_CONTENT_TYPE};
use flowgrid::monitor::Monitor;
use flowgrid::registry::SlotState;

/// Loopback MJPEG endpoint. The first connections may be discovery probes
/// that close without sending a request; the stream goes to the first client
/// that actually asks for it.
fn mjpeg_source(color: [u8; 3], frames: usize, interval: Duration) -> (u16, thread::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let mut image = RgbImage::new(32, 24);
    for px in image.pixels_mut() {
        *px = Rgb(color);
    }
    let part = multipart_part(&encode_jpeg(&image).unwrap());

    let handle = thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(mut stream) = stream else { continue };
            stream
                .set_read_timeout(Some(Duration::from_millis(500)))
                .unwrap();
            let mut buf = [0u8; 1024];
            match stream.read(&mut buf) {
                Ok(n) if n > 0 => {}
                _ => continue,
            }
            let header = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: {}\r\n\r\n",
                MULTIPART_CONTENT_TYPE
            );
            if stream.write_all(header.as_bytes()).is_err() {
                continue;
            }
            for _ in 0..frames {
                if stream.write_all(&part).is_err() {
                    break;
                }
                let _ = stream.flush();
                thread::sleep(interval);
            }
            thread::sleep(Duration::from_millis(250));
            return;
        }
    });
    (port, handle)
}

fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

fn test_cfg(data_dir: &Path, ports: Vec<u16>) -> AppConfig {
    let mut cfg = config::default_config();
    cfg.sources.ports = ports;
    cfg.merge.cell_width = 64;
    cfg.merge.cell_height = 48;
    cfg.detector.pass_interval_millis = 50;
    cfg.storage.data_dir = data_dir.to_str().unwrap().to_string();
    // TEST-NET-3 keeps the sweep tier away from anything real.
    cfg.discovery.subnet = Some("203.0.113".into());
    cfg.discovery.probe_timeout_millis = 50;
    cfg
}

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(20));
    }
    false
}

fn roughly(px: Rgb<u8>, want: [u8; 3]) -> bool {
    px.0.iter()
        .zip(want.iter())
        .all(|(a, b)| (*a as i16 - *b as i16).abs() < 40)
}

#[tokio::test]
async fn test_live_sources_fill_cells_and_absent_slots_stay_placeholder() {
    let dir = TempDir::new().unwrap();
    let (port_a, src_a) = mjpeg_source([220, 30, 30], 400, Duration::from_millis(15));
    let (port_b, src_b) = mjpeg_source([30, 30, 220], 400, Duration::from_millis(15));
    let cfg = test_cfg(dir.path(), vec![port_a, port_b, free_port(), free_port()]);

    let monitor = Monitor::new(cfg).unwrap();
    let findings = monitor.discover_and_connect().await;

    assert_eq!(findings.len(), 2);
    assert!(findings.iter().all(|f| f.tier == DiscoveryTier::Fast));
    assert!(findings.iter().any(|f| f.port == port_a));
    assert!(findings.iter().any(|f| f.port == port_b));

    // Both live feeds must land in their own cells of the 2x2 canvas.
    assert!(wait_until(Duration::from_secs(5), || {
        let canvas = monitor.merge().current();
        roughly(*canvas.get_pixel(8, 8), [220, 30, 30])
            && roughly(*canvas.get_pixel(64 + 8, 8), [30, 30, 220])
    }));

    let canvas = monitor.merge().current();
    assert_eq!(canvas.dimensions(), (128, 96));
    assert_eq!(*canvas.get_pixel(8, 48 + 2), Rgb([0, 0, 0]));
    assert_eq!(*canvas.get_pixel(64 + 8, 48 + 2), Rgb([0, 0, 0]));

    let status = monitor.status();
    assert_eq!(status[0].state, SlotState::Streaming);
    assert_eq!(status[1].state, SlotState::Streaming);
    assert!(status[0].connected);
    assert_eq!(status[0].port, Some(port_a));
    assert_eq!(status[1].port, Some(port_b));
    assert_eq!(status[2].state, SlotState::Stopped);
    assert!(status[2].address.is_none());
    assert_eq!(status[3].state, SlotState::Stopped);

    // Slots without a source must fail control requests before any I/O.
    let request = ControlRequest {
        auto_exposure: Some(false),
        exposure: Some(250.0),
        software_ev: None,
    };
    match monitor.control().apply(2, &request).await {
        Err(ControlError::TargetUnknown { slot }) => assert_eq!(slot, 2),
        other => panic!("expected TargetUnknown, got {:?}", other),
    }

    monitor.shutdown();
    let status = monitor.status();
    assert!(status.iter().all(|s| s.state == SlotState::Stopped));

    src_a.join().unwrap();
    src_b.join().unwrap();
}

#[tokio::test]
async fn test_source_disconnect_clears_slot_and_control_target() {
    let dir = TempDir::new().unwrap();
    let (port_a, src_a) = mjpeg_source([30, 200, 30], 8, Duration::from_millis(15));
    let cfg = test_cfg(dir.path(), vec![port_a, free_port()]);

    let monitor = Monitor::new(cfg).unwrap();
    let mut status_rx = monitor.hubs().status.subscribe();
    let mut parts_rx = monitor.hubs().slots[0].subscribe();
    let findings = monitor.discover_and_connect().await;
    assert_eq!(findings.len(), 1);
    assert_eq!(findings[0].port, port_a);

    // The fixture ends its stream after a few frames; the slot must fall
    // back to an empty cell with no control target left behind.
    assert!(wait_until(Duration::from_secs(5), || {
        monitor.status()[0].state == SlotState::Stopped
    }));

    let status = monitor.status();
    assert!(status[0].address.is_none());
    assert!(status[0].port.is_none());
    assert!(!status[0].connected);

    // The slot topic never goes quiet: once the source is gone, the cell
    // placeholder takes over. Raw fixture frames are 32x24, so a 64x48
    // frame with bright label pixels can only be the placeholder.
    let mut placeholder_seen = false;
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline && !placeholder_seen {
        match parts_rx.try_recv() {
            Ok(frame) => {
                if let Ok(cell) = decode_jpeg(&frame) {
                    placeholder_seen = cell.dimensions() == (64, 48)
                        && cell.pixels().any(|p| p.0.iter().all(|&c| c > 120));
                }
            }
            Err(_) => thread::sleep(Duration::from_millis(20)),
        }
    }
    assert!(placeholder_seen, "slot topic went quiet after the source left");

    assert!(wait_until(Duration::from_secs(2), || {
        *monitor.merge().current().get_pixel(8, 2) == Rgb([0, 0, 0])
    }));

    match monitor.control().apply(0, &ControlRequest::default()).await {
        Err(ControlError::TargetUnknown { slot }) => assert_eq!(slot, 0),
        other => panic!("expected TargetUnknown, got {:?}", other),
    }

    let mut states = Vec::new();
    while let Ok(event) = status_rx.try_recv() {
        if event.slot == 0 {
            states.push(event.state);
        }
    }
    assert_eq!(states.first(), Some(&SlotState::Connecting));
    assert!(states.contains(&SlotState::Streaming));
    assert_eq!(states.last(), Some(&SlotState::Stopped));

    monitor.shutdown();
    src_a.join().unwrap();
}

#[tokio::test]
async fn test_concurrent_sweeps_share_sources_safely() {
    // Two live endpoints, three sweeps racing against the same listeners.
    let keep_a = TcpListener::bind("127.0.0.1:0").unwrap();
    let keep_b = TcpListener::bind("127.0.0.1:0").unwrap();
    let ports = vec![
        keep_a.local_addr().unwrap().port(),
        keep_b.local_addr().unwrap().port(),
    ];

    let discovery = Discovery::new(
        ports.clone(),
        DiscoveryConfig {
            known_hosts: vec![],
            subnet: Some("203.0.113".into()),
            probe_timeout_millis: 200,
            metadata_timeout_millis: 500,
        },
    );

    fn sink(_: &Finding) {}
    let sweeps = vec![discovery.run(sink), discovery.run(sink), discovery.run(sink)];
    let results = futures::future::join_all(sweeps).await;

    for findings in results {
        assert_eq!(findings.len(), 2);
        for f in &findings {
            assert_eq!(f.tier, DiscoveryTier::Fast);
            assert_eq!(f.address, "127.0.0.1");
            assert!(ports.contains(&f.port));
        }
    }
}
