use clap::Parser;
use huiying_core::{
    AutoReplyService, CommandDispatcher, HuiyingConfig, InboundMessage, JsonFileRepository,
    OneBotConfig, SettingsSource,
};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Identity used for messages typed into the interactive console.
const CONSOLE_IDENTITY: &str = "console";

#[derive(Parser, Debug)]
#[command(name = "huiying", author, version, about, long_about = None)]
struct Args {
    /// Path to the config file
    #[arg(short, long, env = "HUIYING_CONFIG", default_value = "huiying.toml")]
    config: PathBuf,

    /// Directory holding the rules file (overrides the config)
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// OneBot WebSocket URL (overrides the config)
    #[arg(long)]
    onebot_url: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();
    init_tracing(args.log_json);

    let mut config = HuiyingConfig::load_or_default(&args.config);
    if let Some(dir) = args.data_dir {
        config.storage.data_dir = Some(dir);
    }
    if let Some(url) = args.onebot_url {
        let access_token = config.onebot.take().and_then(|c| c.access_token);
        config.onebot = Some(OneBotConfig {
            ws_url: url,
            access_token,
        });
    }

    let repository = JsonFileRepository::from_config(&config.storage);
    info!("Rules file: {}", repository.path().display());
    let service = Arc::new(
        AutoReplyService::new(Arc::new(repository), SettingsSource::File(args.config.clone())).await,
    );
    let dispatcher = CommandDispatcher::new(service.clone());

    match config.onebot {
        Some(onebot) => run_onebot(&onebot, &dispatcher).await?,
        None => run_console(&dispatcher).await?,
    }

    service.terminate();
    Ok(())
}

#[cfg(feature = "onebot")]
async fn run_onebot(onebot: &OneBotConfig, dispatcher: &CommandDispatcher) -> anyhow::Result<()> {
    use huiying_onebot::OneBotClient;

    let (client, inbound) = OneBotClient::new(&onebot.ws_url, onebot.access_token.clone())?;
    tokio::select! {
        _ = huiying_onebot::serve(&client, inbound, dispatcher) => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl-C, shutting down");
        }
    }
    Ok(())
}

#[cfg(not(feature = "onebot"))]
async fn run_onebot(onebot: &OneBotConfig, dispatcher: &CommandDispatcher) -> anyhow::Result<()> {
    warn!(
        "OneBot support not compiled in; ignoring {} and starting the console",
        onebot.ws_url
    );
    run_console(dispatcher).await
}

async fn run_console(dispatcher: &CommandDispatcher) -> anyhow::Result<()> {
    let mut editor = DefaultEditor::new()?;
    println!("回应 已启动。输入消息测试自动回复，输入 /kr help 查看指令，quit 退出。");

    loop {
        let line = match editor.readline("> ") {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => {
                warn!("Console read error: {}", e);
                break;
            }
        };

        let trimmed = line.trim();
        if trimmed == "quit" || trimmed == "exit" {
            break;
        }
        if trimmed.is_empty() {
            continue;
        }
        let _ = editor.add_history_entry(trimmed);

        let message = InboundMessage::new(trimmed, CONSOLE_IDENTITY, CONSOLE_IDENTITY);
        match dispatcher.respond(&message).await {
            Some(reply) => println!("\n{}\n", reply),
            None => println!("\n（无回复）\n"),
        }
    }

    Ok(())
}
