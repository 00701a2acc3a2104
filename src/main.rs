//! Rescope - 研究助理
//!
//! 入口：带主题参数时执行一轮并退出；否则进入交互循环（quit / exit 退出，/clear 清空会话）。

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use rescope::config::load_config_or_default;
use rescope::core::{create_llm_from_config, open_store, Orchestrator, TurnResponse};
use rescope::memory::ConversationContext;
use rescope::observability;
use tokio::io::{AsyncBufReadExt, BufReader};

/// Rescope - research assistant that plans, runs and summarises research agents
#[derive(Parser, Debug)]
#[command(name = "rescope")]
#[command(version)]
struct Args {
    /// 研究主题 / 请求；省略时进入交互模式
    topic: Vec<String>,

    /// 项目名称（覆盖配置中的 app.project_name）
    #[arg(short, long)]
    project: Option<String>,

    /// 配置文件路径
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn print_response(response: &TurnResponse) {
    println!("\n{}\n", response.text);
    if !response.suggestions.is_empty() {
        println!("Suggestions:");
        for s in &response.suggestions {
            println!("  - {s}");
        }
        println!();
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let cfg = load_config_or_default(args.config);
    let project = args.project.unwrap_or_else(|| cfg.app.project_name.clone());

    let store = open_store(&cfg).context("Failed to open conversation store")?;
    let llm = create_llm_from_config(&cfg);
    let orchestrator = Orchestrator::from_config(&cfg, llm, store.clone(), &project);

    let mut context = ConversationContext::new(project.clone());
    if let Some(store) = store {
        context = context
            .with_store(store)
            .context("Failed to load conversation history")?;
    }

    if !args.topic.is_empty() {
        let message = args.topic.join(" ");
        let response = orchestrator.process_message(&mut context, &message).await;
        print_response(&response);
        return Ok(());
    }

    println!("Rescope research assistant (project: {project}). Type 'quit' to exit, '/clear' to reset.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush().ok();
        let Some(line) = lines.next_line().await.context("Failed to read input")? else {
            break;
        };
        let input = line.trim();
        match input {
            "" => continue,
            "quit" | "exit" => break,
            "/clear" => {
                context.clear().context("Failed to clear conversation")?;
                println!("Conversation cleared.");
            }
            message => {
                let response = orchestrator.process_message(&mut context, message).await;
                print_response(&response);
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    observability::init();
    match run(Args::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "fatal");
            eprintln!("Error: {e:#}");
            ExitCode::from(1)
        }
    }
}
