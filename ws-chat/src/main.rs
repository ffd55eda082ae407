use std::process::ExitCode;

use clap::Parser;
use tracing::debug;

use ws_chat::{
    cli::ClientArgs,
    console::Console,
    input::spawn_stdin_reader,
    session::{ChatSession, SessionConfig},
};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

fn print_banner(args: &ClientArgs) {
    println!("Starting chat client for {}", args.username);
    println!("Commands:");
    println!("  - Type a message and press Enter to broadcast");
    println!("  - Type @username message to send a DM");
    println!("  - Type /quit to exit");
    println!();
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let args = ClientArgs::parse();
    print_banner(&args);

    let lines = match spawn_stdin_reader() {
        Ok(lines) => lines,
        Err(err) => {
            eprintln!("Error: failed to read terminal input: {err}");
            return ExitCode::FAILURE;
        }
    };

    let session = ChatSession::new(args.username, SessionConfig::from_env(), Console::stdout());
    match session.run(lines).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            debug!(?err, "session ended with error");
            eprintln!("{err}");
            ExitCode::FAILURE
        }
    }
}
