//! Drives a three-axis bus end to end against a simulated controller rack
//! speaking the serial protocol over an in-memory duplex. Run with
//! `cargo run --example bus_tour`.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::Result;
use stagelink::transport::SerialTransport;
use stagelink::{Bus, BusConfig, ControllerState};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tokio::time::Instant;
use tracing::info;

struct DemoAxis {
    code: &'static str,
    position: f64,
    min: f64,
    max: f64,
    home_type: char,
    busy_until: Option<Instant>,
}

impl DemoAxis {
    fn new() -> Self {
        Self {
            code: "0A",
            position: 0.0,
            min: -5.0,
            max: 25.0,
            home_type: '1',
            busy_until: None,
        }
    }

    fn settle(&mut self) {
        if let Some(deadline) = self.busy_until {
            if Instant::now() >= deadline {
                self.busy_until = None;
                self.code = "32";
            }
        }
    }
}

/// Minimal controller rack: echoes query replies, runs homing and moves on
/// a 300 ms clock, and ignores commands that make no sense in the current
/// state, as the hardware does.
async fn device_rack(io: DuplexStream, addresses: &[u8]) {
    let mut axes: HashMap<u8, DemoAxis> = addresses
        .iter()
        .map(|address| (*address, DemoAxis::new()))
        .collect();
    let (reader, mut writer) = tokio::io::split(io);
    let mut lines = BufReader::new(reader).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        let frame = line.trim_end_matches('\r');
        let digits = frame.chars().take_while(|c| c.is_ascii_digit()).count();
        if digits == 0 {
            if frame == "ST" {
                for axis in axes.values_mut() {
                    axis.busy_until = None;
                    if matches!(axis.code, "1E" | "28") {
                        axis.code = "32";
                    }
                }
            }
            continue;
        }
        let address: u8 = match frame[..digits].parse() {
            Ok(address) => address,
            Err(_) => continue,
        };
        let Some(axis) = axes.get_mut(&address) else {
            continue;
        };
        axis.settle();
        let body = &frame[digits..];

        if let Some(mnemonic) = body.strip_suffix('?') {
            let payload = match mnemonic {
                "TS" => format!("0000{}", axis.code),
                "TP" => axis.position.to_string(),
                "SL" => axis.min.to_string(),
                "SR" => axis.max.to_string(),
                "VA" => "1.5".to_string(),
                "OT" => "2".to_string(),
                "HT" => axis.home_type.to_string(),
                "MM" => if axis.code == "3C" { "0" } else { "1" }.to_string(),
                "TB" => "0 No error".to_string(),
                _ => continue,
            };
            let reply = format!("{}{}{}\r\n", address, mnemonic, payload);
            if writer.write_all(reply.as_bytes()).await.is_err() {
                break;
            }
        } else if body.len() >= 2 {
            let (mnemonic, arg) = body.split_at(2);
            match mnemonic {
                "RS" => axis.code = "0A",
                "PW" if arg == "1" && axis.code == "0A" => axis.code = "14",
                "PW" if arg == "0" && axis.code == "14" => axis.code = "0A",
                "MM" if arg == "0" && axis.code == "32" => axis.code = "3C",
                "MM" if arg == "1" && axis.code == "3C" => axis.code = "32",
                "OR" if axis.code == "0A" => {
                    axis.code = "1E";
                    axis.busy_until = Some(Instant::now() + Duration::from_millis(300));
                }
                "PA" if axis.code == "32" => {
                    if let Ok(target) = arg.parse::<f64>() {
                        axis.position = target.clamp(axis.min, axis.max);
                        axis.code = "28";
                        axis.busy_until = Some(Instant::now() + Duration::from_millis(300));
                    }
                }
                "ST" => {
                    axis.busy_until = None;
                    if matches!(axis.code, "1E" | "28") {
                        axis.code = "32";
                    }
                }
                "HT" => axis.home_type = arg.chars().next().unwrap_or('1'),
                _ => {}
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    info!("Starting the bus tour against a simulated three-axis rack");

    let (host_io, device_io) = tokio::io::duplex(1024);
    tokio::spawn(async move { device_rack(device_io, &[1, 2, 3]).await });

    let config = BusConfig::default();
    let bus = Bus::new(config.clone());
    let x = bus.new_axis(1).await?;
    let y = bus.new_axis(2).await?;
    let z = bus.new_axis(3).await?;

    bus.open_with(Box::new(SerialTransport::over(
        Box::new(host_io),
        config.port.clone(),
    )))
    .await;

    bus.connect_all("virtual-port", false, true).await?;
    info!("All connected: {}", bus.is_all_connected().await);

    for axis in bus.axes().await {
        info!(
            "Axis {}: state {:?}, travel [{}, {}], velocity {}",
            axis.address(),
            axis.state().await,
            axis.min_position().await?,
            axis.max_position().await?,
            axis.velocity().await?
        );
    }

    // Two waited moves in parallel; the channel keeps their exchanges whole.
    tokio::try_join!(x.go_to(5.0, true, true), y.go_to(2.5, true, true))?;
    info!(
        "x at {}, y at {}",
        x.position().await?,
        y.position().await?
    );

    // Out-of-range move is refused before anything hits the wire.
    if let Err(err) = z.go_to(100.0, true, true).await {
        info!("Rejected as expected: {}", err);
    }

    z.go_to(10.0, false, true).await?;
    bus.abort().await?;
    info!("z stopped at {}", z.position().await?);

    bus.set_all_state(ControllerState::Disable, true).await?;
    for axis in bus.axes().await {
        info!(
            "Axis {}: state {:?}, enabled {}",
            axis.address(),
            axis.state().await,
            axis.is_enabled().await?
        );
    }

    bus.disconnect().await?;
    info!("Bus tour complete");
    Ok(())
}
