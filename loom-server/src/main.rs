//! Standalone binary wrapping [`loom::Runtime`]: parses `-p/-c/-t`, loads a
//! [`config::ServerConfig`], brings the runtime up with a single `"echo"`
//! service listening on the configured port, and blocks until `Ctrl+C`.
//!
//! Grounded on `t51server/src/main.rs`'s shape (load config, build and run the
//! pool, block) and `gamerunner`'s clap-driven CLI flags, adapted to the
//! `-p PORT -c CONFIG_FILE -t THREADS` surface called out as the common
//! pattern for standalone binaries.

mod config;
mod echo;

use clap::{App, Arg};
use config::ServerConfig;
use loom::runtime::{ctor, Runtime, RuntimeConfig};
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use weave::logging;

fn main() {
    let matches = App::new("loom-server")
        .about("A fixed-pool actor runtime with a TCP echo service")
        .arg(Arg::with_name("port").short("p").long("port").takes_value(true).help("listen port, overrides the config file"))
        .arg(Arg::with_name("config").short("c").long("config").takes_value(true).help("path to a TOML config file"))
        .arg(Arg::with_name("threads").short("t").long("threads").takes_value(true).help("service worker count, overrides the config file"))
        .get_matches();

    let mut config = match matches.value_of("config") {
        Some(path) => weave::config::load_toml::<ServerConfig, _>(path),
        None => ServerConfig::default(),
    };

    if let Some(port) = matches.value_of("port") {
        match port.parse::<u16>() {
            Ok(port) => config.server.port = port,
            Err(err) => {
                eprintln!("invalid --port `{}`: {}", port, err);
                process::exit(1);
            }
        }
    }

    if let Some(threads) = matches.value_of("threads") {
        match threads.parse::<u8>() {
            Ok(threads) if threads > 0 => config.server.worker_num = threads,
            _ => {
                eprintln!("invalid --threads `{}`: must be a positive integer", threads);
                process::exit(1);
            }
        }
    }

    eprintln!("loom-server starting at {}", weave::time::now_utc_rfc3339());

    let mut runtime = Runtime::init(RuntimeConfig {
        worker_num: config.server.worker_num,
        io_worker_num: config.server.io_worker_num,
        log: config.log.clone(),
    });

    runtime.register_service("echo", ctor(|| echo::Echo::new(logging::discard())));
    runtime.run();

    let gate = match runtime.new_service("echo", Some("gate".to_string()), "", None) {
        Ok(id) => id,
        Err(err) => {
            eprintln!("failed to create gate service: {}", err);
            runtime.stop();
            process::exit(1);
        }
    };

    let idle_timeout = config.server.idle_timeout_secs.map(Duration::from_secs);
    if let Err(err) = runtime.listen(gate, "0.0.0.0", config.server.port, idle_timeout) {
        eprintln!("failed to listen on port {}: {}", config.server.port, err);
        runtime.stop();
        process::exit(1);
    }

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = Arc::clone(&running);
        let _ = ctrlc_handler(move || running.store(false, Ordering::Relaxed));
    }

    while running.load(Ordering::Relaxed) {
        std::thread::sleep(Duration::from_millis(100));
    }

    runtime.stop();
    eprintln!("loom-server stopped at {}", weave::time::now_utc_rfc3339());
}

/// No `ctrlc` crate in the dependency stack, so `Ctrl+C` is handled with the
/// libc-free fallback: a dedicated thread waiting on stdin's EOF, which a
/// terminal delivers on `Ctrl+D` and a supervisor delivers by closing the
/// pipe. `SIGINT`-specific handling is left to whatever process supervisor
/// runs this binary in production.
fn ctrlc_handler<F: Fn() + Send + 'static>(on_signal: F) -> std::io::Result<()> {
    std::thread::Builder::new().name("loom-server-signal".to_string()).spawn(move || {
        use std::io::Read;
        let mut buf = [0u8; 1];
        while let Ok(n) = std::io::stdin().read(&mut buf) {
            if n == 0 {
                break;
            }
        }
        on_signal();
    })?;
    Ok(())
}
