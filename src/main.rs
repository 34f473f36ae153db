use anyhow::Context;
use clap::Parser;
use log::{info, warn};
use midap::backend::Backend;
use midap::bridge::{ProcessSpawner, Spawner};
use midap::config::Config;
use midap::dap::tracer::FileTracer;
use midap::dap::transport::{self, FrameReader, FrameWriter};
use midap::dap::DebugSession;
use std::net::{SocketAddr, TcpListener};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to listen on
    #[clap(long, default_value = "127.0.0.1:4711")]
    listen: String,

    /// Serve a single client over stdin/stdout instead of TCP.
    #[clap(long)]
    stdio: bool,

    /// Exit after the first debug session ends (single-client mode).
    #[clap(long)]
    oneshot: bool,

    /// Log file for adapter diagnostics.
    #[clap(long)]
    log_file: Option<PathBuf>,

    /// Trace DAP and MI traffic into the log file, requires --log-file.
    #[clap(long)]
    trace_dap: bool,

    /// Configuration file, `~/.config/midap/config.toml` by default.
    #[clap(short, long, env = "MIDAP_CONFIG")]
    config: Option<PathBuf>,

    /// MI dialect: `gdb` or `lldb-mi`.
    #[clap(long)]
    backend: Option<Backend>,

    /// Backend executable.
    #[clap(long)]
    backend_path: Option<PathBuf>,
}

fn serve(
    config: &Config,
    spawner: &Arc<dyn Spawner>,
    tracer: Option<&FileTracer>,
    (reader, writer): (FrameReader, FrameWriter),
) {
    let res = DebugSession::new(config.clone(), spawner.clone(), reader, writer).run();
    if let Err(err) = res {
        warn!(target: "dap", "session ended with error: {err:#}");
        if let Some(t) = tracer {
            t.line(&format!("session error: {err:#}"));
        }
    } else if let Some(t) = tracer {
        t.line("session finished OK");
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_default_env()
        .target(env_logger::Target::Stderr)
        .init();

    let args = Args::parse();
    let mut config = Config::load(args.config.as_deref())?;
    if let Some(kind) = args.backend {
        config.backend.kind = kind;
    }
    if let Some(path) = args.backend_path.clone() {
        config.backend.path = Some(path);
    }

    let tracer = match &args.log_file {
        Some(path) => Some(FileTracer::new(path, args.trace_dap)?),
        None => None,
    };
    if args.trace_dap && tracer.is_none() {
        warn!(target: "dap", "--trace-dap requires --log-file; tracing disabled");
    }

    let spawner: Arc<dyn Spawner> = Arc::new(ProcessSpawner::new(
        config.backend.clone(),
        config.timeouts.clone(),
        tracer.clone(),
    ));

    if args.stdio {
        info!(target: "dap", "serving over stdio with {} backend", config.backend.kind);
        serve(&config, &spawner, tracer.as_ref(), transport::stdio(tracer.clone()));
        return Ok(());
    }

    let addr: SocketAddr = args.listen.parse().context("invalid listen address")?;
    let listener = TcpListener::bind(addr).with_context(|| format!("bind {addr}"))?;
    info!(target: "dap", "midap listening on {addr}");

    // one client is one debug session, clients are served sequentially
    loop {
        let (stream, peer) = match listener.accept() {
            Ok(v) => v,
            Err(err) => {
                warn!(target: "dap", "accept failed: {err:#}");
                continue;
            }
        };
        info!(target: "dap", "DAP client connected: {peer}");
        if let Some(t) = &tracer {
            t.line(&format!("client connected: {peer}"));
        }

        match transport::tcp(stream, tracer.clone()) {
            Ok(io) => serve(&config, &spawner, tracer.as_ref(), io),
            Err(err) => {
                warn!(target: "dap", "failed to init DAP I/O: {err:#}");
                continue;
            }
        }

        if args.oneshot {
            break;
        }
    }
    Ok(())
}
