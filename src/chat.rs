// Terminal chat: the same session and renderer the web page uses, driven
// from stdin.

use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use futures::StreamExt;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use crate::config::Settings;
use crate::export::save_outcome;
use crate::render::{RenderEvent, Typewriter};
use crate::session::SessionContext;

/// One line of REPL input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatCommand {
    Message(String),
    LoadCsv(PathBuf),
    LoadSvg(PathBuf),
    Clear,
    SaveDiagram(PathBuf),
    Quit,
    /// A slash command that is unknown or missing its argument.
    Invalid(String),
}

impl ChatCommand {
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        let Some(command) = line.strip_prefix('/') else {
            return ChatCommand::Message(line.to_string());
        };

        let (name, arg) = match command.split_once(char::is_whitespace) {
            Some((name, arg)) => (name, arg.trim()),
            None => (command, ""),
        };
        let path = || (!arg.is_empty()).then(|| PathBuf::from(arg));

        match name {
            "quit" | "exit" => ChatCommand::Quit,
            "clear" => ChatCommand::Clear,
            "csv" => path().map_or_else(|| ChatCommand::Invalid("/csv <path>".into()), ChatCommand::LoadCsv),
            "svg" => path().map_or_else(|| ChatCommand::Invalid("/svg <path>".into()), ChatCommand::LoadSvg),
            "save" => path().map_or_else(
                || ChatCommand::Invalid("/save <path>".into()),
                ChatCommand::SaveDiagram,
            ),
            other => ChatCommand::Invalid(format!("unknown command /{}", other)),
        }
    }
}

const HELP: &str = "コマンド: /csv <path>, /svg <path>, /clear, /save <path.svg|path.pptx>, /quit";

pub async fn run_chat(settings: Settings) -> Result<()> {
    info!("Starting terminal chat");
    let mut session = SessionContext::new(&settings);
    let typewriter = Typewriter::new(settings.chunk_chars, settings.render_delay);

    println!("LP企画チャット。「LP企画: テーマ」で企画分析とSVG図を生成します。");
    println!("{}", HELP);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await.context("Failed to read stdin")? else {
            break;
        };

        match ChatCommand::parse(&line) {
            ChatCommand::Quit => break,
            ChatCommand::Invalid(usage) => println!("{}\n{}", usage, HELP),
            ChatCommand::Clear => {
                session.clear();
                println!("チャット履歴をクリアしました。");
            }
            ChatCommand::LoadCsv(path) => {
                let bytes = match tokio::fs::read(&path).await {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "Failed to read CSV");
                        println!("CSVを読み込めません: {}: {}", path.display(), e);
                        continue;
                    }
                };
                match session.upload_csv(&bytes) {
                    Ok(csv) => println!(
                        "CSVを読み込みました: {}行 × {}列",
                        csv.total_rows,
                        csv.num_columns()
                    ),
                    Err(e) => println!("CSVを利用できません: {}", e),
                }
            }
            ChatCommand::LoadSvg(path) => {
                let bytes = match tokio::fs::read(&path).await {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "Failed to read SVG");
                        println!("SVGを読み込めません: {}: {}", path.display(), e);
                        continue;
                    }
                };
                match session.upload_svg(&bytes) {
                    Ok(_) => println!("SVGを参考レイアウトとして読み込みました。"),
                    Err(e) => println!("SVGを利用できません: {}", e),
                }
            }
            ChatCommand::SaveDiagram(path) => match session.last_outcome() {
                Some(outcome) => match save_outcome(outcome, &path).await {
                    Ok(()) => println!("保存しました: {}", path.display()),
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "Failed to save planning outcome");
                        println!("保存できません: {}: {}", path.display(), e);
                    }
                },
                None => println!("保存できるSVG図はまだありません。"),
            },
            ChatCommand::Message(text) => {
                let reply = session.respond(&text, &settings).await;
                let Some(reply_text) = reply.text() else {
                    continue;
                };
                let mut events = Box::pin(typewriter.render(&reply_text, reply.diagram()));
                while let Some(event) = events.next().await {
                    match event {
                        RenderEvent::Text(chunk) => {
                            print!("{}", chunk);
                            std::io::stdout().flush()?;
                        }
                        RenderEvent::Diagram(svg) => {
                            println!("\n\n[SVG図を生成しました ({} bytes)。/save <path> でSVG、.pptx ならPowerPointとして保存できます]", svg.len());
                        }
                        RenderEvent::Done => println!(),
                    }
                }
            }
        }
    }

    info!("Terminal chat finished");
    Ok(())
}
