use netsim::simulator::SystemWallClock;
use netsim::{RealtimeDriver, SharedSimulation, Shell, SimulationConfig, SpeedMode, TopologyDescription};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Two hosts on one switch, routed through a router to a third host.
const DEMO_TOPOLOGY: &str = r#"{
    "devices": [
        {"name": "PC1", "type": "host",
         "interfaces": [{"name": "eth0", "address": "192.168.1.10/24"}],
         "default_gateway": "192.168.1.1"},
        {"name": "PC2", "type": "host",
         "interfaces": [{"name": "eth0", "address": "192.168.1.11/24"}],
         "default_gateway": "192.168.1.1"},
        {"name": "PC3", "type": "host",
         "interfaces": [{"name": "eth0", "address": "10.0.0.10/24"}],
         "default_gateway": "10.0.0.1"},
        {"name": "S1", "type": "switch", "ports": 4},
        {"name": "R1", "type": "router",
         "config": [
            "interface g0/0",
            "ip address 192.168.1.1 255.255.255.0",
            "interface g0/1",
            "ip address 10.0.0.1 255.255.255.0"
         ]}
    ],
    "links": [
        {"a": {"device": "PC1", "interface": "eth0"}, "b": {"device": "S1", "interface": "Fa0/1"}, "length_m": 10.0},
        {"a": {"device": "PC2", "interface": "eth0"}, "b": {"device": "S1", "interface": "Fa0/2"}, "length_m": 10.0},
        {"a": {"device": "R1", "interface": "g0/0"}, "b": {"device": "S1", "interface": "Fa0/3"}, "length_m": 10.0},
        {"a": {"device": "R1", "interface": "g0/1"}, "b": {"device": "PC3", "interface": "eth0"}, "length_m": 50.0}
    ]
}"#;

const HELP: &str = "\
:attach <device>   open a shell on another device
:devices           list devices
:speed <mode>      faster | realtime | slower | paused
:clock             print the virtual clock
:export            print the topology as JSON
:quit              leave";

fn load_config() -> Result<SimulationConfig, Box<dyn std::error::Error>> {
    let config = match std::env::var("NETSIM_CONFIG") {
        Ok(path) => SimulationConfig::load(path)?,
        Err(_) => SimulationConfig::default(),
    };
    Ok(config.with_env_overrides()?)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("netsim=info"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr);
    // NETSIM_LOG_FORMAT=json for machine-readable logs.
    if std::env::var("NETSIM_LOG_FORMAT").is_ok_and(|f| f == "json") {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    let config = load_config()?;
    let clock_tick = std::time::Duration::from_millis(config.scheduler.clock_tick_ms.max(1));
    let topology = match std::env::args().nth(1) {
        Some(path) => TopologyDescription::load(&path)?,
        None => TopologyDescription::from_json(DEMO_TOPOLOGY)?,
    };
    let sim = topology.build_with_wall_clock(config, Arc::new(SystemWallClock::new()))?;
    let first = sim.nodes().next().map(|n| n.id()).ok_or("topology has no devices")?;
    let mut shell = Shell::new(&sim, first)?;

    let sim: SharedSimulation = Arc::new(Mutex::new(sim));
    let driver = RealtimeDriver::spawn(sim.clone(), clock_tick);
    info!("simulation running; type :help for console commands");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    loop {
        let prompt = shell.prompt(&sim.lock());
        stdout.write_all(prompt.as_bytes()).await?;
        stdout.flush().await?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        let mut output = Vec::new();
        if let Some(console) = line.strip_prefix(':') {
            let mut words = console.split_whitespace();
            match (words.next(), words.next()) {
                (Some("quit"), _) | (Some("q"), _) => break,
                (Some("help"), _) => output.push(HELP.to_string()),
                (Some("devices"), _) => {
                    let sim = sim.lock();
                    output.extend(sim.nodes().map(|n| format!("{:<12} {:?}", n.name(), n.device_type())));
                }
                (Some("attach"), Some(name)) => {
                    let sim = sim.lock();
                    match sim.node_by_name(name) {
                        Some(node) => shell = Shell::new(&sim, node)?,
                        None => output.push(format!("% unknown device '{}'", name)),
                    }
                }
                (Some("speed"), Some(mode)) => match mode.parse::<SpeedMode>() {
                    Ok(mode) => sim.lock().set_speed(mode),
                    Err(e) => output.push(format!("% {}", e)),
                },
                (Some("clock"), _) => output.push(sim.lock().now().clock_string()),
                (Some("export"), _) => match TopologyDescription::capture(&sim.lock()).and_then(|t| t.to_json()) {
                    Ok(json) => output.push(json),
                    Err(e) => output.push(format!("% {}", e)),
                },
                _ => output.push("% unknown console command, try :help".to_string()),
            }
        } else if line.ends_with('?') {
            let partial = line.trim_end_matches('?');
            output.extend(
                shell
                    .help(partial)
                    .into_iter()
                    .map(|(word, text)| format!("  {:<24} {}", word, text)),
            );
        } else {
            match shell.exec(&mut sim.lock(), line) {
                Ok(lines) => output = lines,
                Err(e) => output.push(e.to_string()),
            }
        }
        for text in output {
            stdout.write_all(text.as_bytes()).await?;
            stdout.write_all(b"\n").await?;
        }
        // A ping finishes as the driver moves time; the lock is only held per check.
        while shell.is_busy() {
            tokio::time::sleep(clock_tick).await;
            let finished = shell.poll_background(&mut sim.lock());
            for text in finished {
                stdout.write_all(text.as_bytes()).await?;
                stdout.write_all(b"\n").await?;
            }
        }
    }

    driver.stop().await;
    Ok(())
}
