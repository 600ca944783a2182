use console_proxy::parse::{parse_args, Config, Invocation};
use console_proxy::{logger, processor, signals};
use console_proxy::{Console, LineProcessor, ProxyError, Supervisor, Terminal, TokioSpawner};
use std::sync::Arc;
use tracing::{error, info};


#[tokio::main]
async fn main() {
    let code = match run().await {
        Ok(()) => 0,
        Err(e) => e.exit_code(),
    };
    std::process::exit(code);
}

async fn run() -> Result<(), ProxyError> {
    let config = Config::load().inspect_err(|e| eprintln!("{}", e))?;
    let processor = processor::from_name(config.processor_name()).ok_or_else(|| {
        let e = ProxyError::PluginLoad { name: config.processor_name().to_string() };
        eprintln!("{}", e);
        e
    })?;

    let command = match parse_args(std::env::args_os().skip(1)) {
        Invocation::Help => {
            print_usage(processor.as_ref());
            return Err(ProxyError::InvalidUsage);
        }
        Invocation::Run(command) => command,
    };

    // keep the guard alive until exit so buffered log lines are flushed
    let _guard = match logger::logs_tracing(&config.log.dir, config.log_level()) {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("logging disabled: {:#}", e);
            None
        }
    };
    info!(processor = config.processor_name(), program = %command.display_name(), "console-proxy starting");

    let console: Arc<dyn Console> = Arc::new(Terminal::stdout());
    let banner = processor.banner().to_string();
    let usage = processor.usage().to_string();
    let supervisor = Supervisor::new(
        config.settings(),
        processor::shared(processor),
        console,
        Arc::new(TokioSpawner),
    );

    let (signal_handle, signal_task) = signals::listen(supervisor.shutdown())?;
    let result = supervisor.run(&command).await;
    signal_handle.close();
    let _ = signal_task.await;

    match result {
        Ok(outcome) => {
            info!(?outcome, "console-proxy finished");
            Ok(())
        }
        Err(e) if e.shows_usage() => {
            println!();
            print_usage_text(&banner, &usage);
            Err(e)
        }
        Err(e) => {
            error!(error = %e, "console-proxy failed");
            eprintln!("{}", e);
            Err(e)
        }
    }
}



/*
    @@@
    @print_usage();
    . Prints the name and version, the active processor's banner, then the usage line with the processor's argument shape.
*/
fn print_usage(processor: &dyn LineProcessor) {
    print_usage_text(processor.banner(), processor.usage());
}

fn print_usage_text(banner: &str, usage: &str) {
    let exe = std::env::args_os()
        .next()
        .and_then(|arg0| {
            std::path::Path::new(&arg0)
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
        })
        .unwrap_or_else(|| env!("CARGO_PKG_NAME").to_string());

    println!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
    println!("{}", banner);
    println!();
    println!("USAGE:");
    println!("{} {}", exe, usage);
}
