use clap::{Parser, Subcommand};
use std::path::PathBuf;
use swsim::backend::SimBackend;
use swsim::config;
use swsim::dataplane::SwitchCore;
use swsim::telemetry::{init_logging, LogConfig};
use tracing::info;

#[derive(Parser)]
#[command(name = "swsim")]
#[command(about = "A software network switch simulator implemented in Rust")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Run the switch simulator
    Run {
        /// Path to config.lock file
        #[arg(short, long, default_value = "config.lock")]
        config: PathBuf,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Generate config.lock from config.toml
    Generate {
        /// Path to config.toml
        #[arg(short, long, default_value = "config.toml")]
        config: PathBuf,

        /// Output path for config.lock
        #[arg(short, long, default_value = "config.lock")]
        output: PathBuf,
    },
    /// Validate config.toml without generating lock file
    Validate {
        /// Path to config.toml
        #[arg(short, long, default_value = "config.toml")]
        config: PathBuf,
    },
}

fn main() {
    init_logging(None);

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Config { action }) => match action {
            ConfigAction::Generate {
                config: config_path,
                output,
            } => {
                if let Err(e) = cmd_config_generate(&config_path, &output) {
                    eprintln!("[ERROR] {}", e);
                    std::process::exit(1);
                }
            }
            ConfigAction::Validate {
                config: config_path,
            } => {
                if let Err(e) = cmd_config_validate(&config_path) {
                    eprintln!("[ERROR] {}", e);
                    std::process::exit(1);
                }
            }
        },
        Some(Commands::Run { config: lock_path }) => {
            if let Err(e) = cmd_run(&lock_path) {
                eprintln!("[ERROR] {}", e);
                std::process::exit(1);
            }
        }
        None => {
            info!("swsim starting...");
            if let Err(e) = cmd_run(&PathBuf::from("config.lock")) {
                eprintln!("[ERROR] {}", e);
                std::process::exit(1);
            }
        }
    }
}

fn cmd_run(lock_path: &PathBuf) -> Result<(), String> {
    use tokio::runtime::Runtime;

    info!("Loading {}...", lock_path.display());
    let lock = config::load_lock(lock_path)
        .map_err(|e| format!("Failed to load lock file: {}", e))?;

    if let Some(ref level) = lock.logging.level {
        // Logging was already initialized from the environment; the config
        // setting only matters when RUST_LOG is unset.
        init_logging(Some(&LogConfig {
            level: level.clone(),
        }));
    }

    let backend = SimBackend::new(lock.switch.port_count);
    let mut core = SwitchCore::new(backend, &lock)
        .map_err(|e| format!("Failed to initialize switch core: {}", e))?;

    // Bring every simulated link up
    for port in 0..lock.switch.port_count as u16 {
        core.backend_mut().set_link(port, true);
    }

    // Apply interface and VLAN configuration from the lock file
    for (name, iface) in &lock.interfaces {
        let Some(port) = config::parse_port_name(name) else {
            continue;
        };
        if let Some(ref address) = iface.address {
            if let Some((ip, prefix_len)) = config::parse_cidr(address) {
                core.add_interface(port, ip, prefix_len)
                    .map_err(|e| format!("interface {}: {}", name, e))?;
                info!("  {} configured: {}/{}", name, ip, prefix_len);
            }
        }
        if let Some(mtu) = iface.mtu {
            let _ = core.ip().lock().unwrap().set_port_mtu(port, mtu);
        }
    }

    {
        let vlans = core.vlans();
        let mut vlans = vlans.lock().unwrap();
        for vlan in &lock.vlans {
            if vlans.create(vlan.id, &vlan.name).is_ok() {
                for &port in &vlan.tagged_ports {
                    let _ = vlans.add_port(vlan.id, port, swsim::dataplane::VlanMemberType::Tagged);
                }
                for &port in &vlan.untagged_ports {
                    let _ =
                        vlans.add_port(vlan.id, port, swsim::dataplane::VlanMemberType::Untagged);
                }
                info!("  VLAN {} ({}) created", vlan.id, vlan.name);
            }
        }
    }

    for route in &lock.routing.static_routes {
        let Some((destination, prefix_len)) = config::parse_cidr(&route.destination) else {
            continue;
        };
        let gateway = if route.gateway == "direct" {
            None
        } else {
            route.gateway.parse().ok()
        };
        let port = route
            .interface
            .as_deref()
            .and_then(config::parse_port_name)
            .unwrap_or(0);
        core.add_static_route(destination, prefix_len, gateway, port)
            .map_err(|e| format!("route {}: {}", route.destination, e))?;
    }

    let rt = Runtime::new().map_err(|e| format!("Failed to create runtime: {}", e))?;
    rt.block_on(async move {
        info!("Switch started, processing frames...");

        let mut tick_timer = tokio::time::interval(std::time::Duration::from_secs(1));

        loop {
            tokio::select! {
                _ = tick_timer.tick() => {
                    core.backend_mut().advance_seconds(1);
                    core.poll_rx();
                    core.tick();
                }
                result = tokio::signal::ctrl_c() => {
                    if result.is_ok() {
                        info!("shutting down");
                        break;
                    }
                }
            }
        }
        Ok(())
    })
}

fn cmd_config_generate(config_path: &PathBuf, output_path: &PathBuf) -> Result<(), String> {
    println!("[INFO] Loading {}...", config_path.display());

    let content = std::fs::read_to_string(config_path)
        .map_err(|e| format!("Failed to read config file: {}", e))?;

    let cfg = config::load(config_path).map_err(|e| format!("Failed to parse config: {}", e))?;

    let validation = config::validate(&cfg);
    validation.print_diagnostics();

    if validation.has_errors() {
        return Err("Validation failed with errors".to_string());
    }

    let lock = config::generate_lock(&cfg, &content);

    let lock_toml =
        toml::to_string_pretty(&lock).map_err(|e| format!("Failed to serialize lock: {}", e))?;

    let output = format!(
        "# Generated by swsim - DO NOT EDIT\n# Source: {} (sha256: {})\n\n{}",
        config_path.display(),
        &lock.source_hash[..16],
        lock_toml
    );

    std::fs::write(output_path, output).map_err(|e| format!("Failed to write lock file: {}", e))?;

    println!("[INFO] Generated {}", output_path.display());
    Ok(())
}

fn cmd_config_validate(config_path: &PathBuf) -> Result<(), String> {
    println!("[INFO] Validating {}...", config_path.display());

    let cfg = config::load(config_path).map_err(|e| format!("Failed to parse config: {}", e))?;

    let validation = config::validate(&cfg);
    validation.print_diagnostics();

    if validation.has_errors() {
        Err("Validation failed".to_string())
    } else {
        println!("[INFO] Configuration is valid");
        Ok(())
    }
}
