//! stilch-fbdev - framebuffer compositor backend
//!
//! Runs on a Linux framebuffer device from a VT. With `--query` it only prints
//! the device's mode as JSON, which is useful when a driver is rejected.

static OPTIONS: &[&str] = &[
    "--device PATH : Framebuffer device (default: /dev/fb0, or $STILCH_FBDEV_DEVICE).",
    "--tty N : VT to switch to at startup, 0 keeps the current one.",
    "--seat NAME : Input seat (default: seat0).",
    "--transform normal|90|180|270 : Output rotation.",
    "--query : Print the device mode as JSON and exit.",
];

#[cfg(feature = "profile-with-tracy-mem")]
#[global_allocator]
static GLOBAL: profiling::tracy_client::ProfiledAllocator<std::alloc::System> =
    profiling::tracy_client::ProfiledAllocator::new(std::alloc::System, 10);

fn query(config: &stilch_fbdev::FbdevConfig) -> Result<(), Box<dyn std::error::Error>> {
    let (_device, info) =
        stilch_fbdev::device::open_and_query(&stilch_fbdev::device::NodeOpener, &config.device)?;
    let json = serde_json::to_string_pretty(&info)?;
    #[allow(clippy::disallowed_macros)]
    {
        println!("{json}");
    }
    Ok(())
}

fn main() {
    if let Ok(env_filter) = tracing_subscriber::EnvFilter::try_from_default_env() {
        tracing_subscriber::fmt()
            .compact()
            .with_env_filter(env_filter)
            .init();
    } else {
        tracing_subscriber::fmt().compact().init();
    }

    #[cfg(feature = "profile-with-tracy")]
    profiling::tracy_client::Client::start();

    profiling::register_thread!("Main Thread");

    #[cfg(feature = "profile-with-puffin")]
    let _server =
        puffin_http::Server::new(&format!("0.0.0.0:{}", puffin_http::DEFAULT_PORT))
            .expect("Failed to start puffin profiling server");
    #[cfg(feature = "profile-with-puffin")]
    profiling::puffin::set_scopes_on(true);

    let args: Vec<String> = ::std::env::args().skip(1).collect();
    if args.iter().any(|arg| arg == "--help" || arg == "-h") {
        #[allow(clippy::disallowed_macros)]
        {
            println!("USAGE: stilch-fbdev [OPTIONS]");
            println!();
            println!("Options:");
            for option in OPTIONS {
                println!("\t{option}");
            }
        }
        return;
    }

    let config = match stilch_fbdev::FbdevConfig::from_args(args) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("{e}");
            std::process::exit(1);
        }
    };

    if config.query {
        if let Err(e) = query(&config) {
            tracing::error!("Failed to query frame buffer: {e}");
            std::process::exit(1);
        }
        return;
    }

    #[cfg(feature = "session")]
    {
        tracing::info!(device = %config.device.display(), "Starting stilch on a framebuffer");
        if let Err(e) = stilch_fbdev::fbdev::run_fbdev(config) {
            tracing::error!("Fatal error: {e}");
            std::process::exit(1);
        }
    }

    #[cfg(not(feature = "session"))]
    {
        tracing::error!("Built without session support, only --query is available");
        std::process::exit(1);
    }
}
