//! `/kr` management commands and the whitelist gate in front of them.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::service::AutoReplyService;
use crate::store::{AddOutcome, KeywordStore};
use crate::InboundMessage;

/// Text starting with this is a command and never reaches the matcher.
pub const COMMAND_PREFIX: char = '/';
pub const COMMAND_GROUP: &str = "kr";

const HELP_TEXT: &str = "\
• /kr list - 查看所有关键词规则
• /kr add <关键词> <回复内容> - 添加新的关键词回复
• /kr del <关键词> - 删除关键词回复
• /kr reload - 重新加载配置";

const ADD_USAGE: &str = "用法：/kr add <关键词> <回复内容>";
const DEL_USAGE: &str = "用法：/kr del <关键词>";
const DENIED: &str = "抱歉，你没有权限使用该指令，请联系管理员添加到白名单。";
const NOT_PERSISTED: &str = "（注意：规则保存失败，修改仅在本次运行中生效）";

// ============================================================================
// Parsing
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    List,
    Add { keyword: String, reply: String },
    Del { keyword: String },
    Reload,
    /// Known subcommand with missing arguments; carries the usage line.
    Usage(&'static str),
}

impl Command {
    /// Parse a `/kr <sub> [args]` line. Returns `None` for anything that is
    /// not a `kr` command (including other `/` commands).
    pub fn parse(text: &str) -> Option<Self> {
        let body = text.trim().strip_prefix(COMMAND_PREFIX)?;
        let (group, rest) = split_token(body);
        if group != COMMAND_GROUP {
            return None;
        }

        let (sub, args) = split_token(rest);
        let command = match sub {
            "list" => Command::List,
            "reload" => Command::Reload,
            "add" => {
                let (keyword, reply) = split_token(args);
                let reply = reply.trim();
                if keyword.is_empty() || reply.is_empty() {
                    Command::Usage(ADD_USAGE)
                } else {
                    Command::Add {
                        keyword: keyword.to_string(),
                        reply: reply.to_string(),
                    }
                }
            }
            "del" => {
                let (keyword, _) = split_token(args);
                if keyword.is_empty() {
                    Command::Usage(DEL_USAGE)
                } else {
                    Command::Del {
                        keyword: keyword.to_string(),
                    }
                }
            }
            _ => Command::Help,
        };
        Some(command)
    }
}

/// Split off the first whitespace-delimited token.
fn split_token(s: &str) -> (&str, &str) {
    let s = s.trim_start();
    match s.find(char::is_whitespace) {
        Some(i) => (&s[..i], s[i..].trim_start()),
        None => (s, ""),
    }
}

// ============================================================================
// Access control
// ============================================================================

/// Whitelist check. An empty whitelist lets everyone through.
pub struct AccessGate<'a> {
    whitelist: &'a BTreeSet<String>,
}

impl<'a> AccessGate<'a> {
    pub fn new(whitelist: &'a BTreeSet<String>) -> Self {
        Self { whitelist }
    }

    pub fn allows(&self, message: &InboundMessage) -> bool {
        self.whitelist.is_empty()
            || identifiers(message)
                .iter()
                .any(|id| self.whitelist.contains(*id))
    }
}

fn identifiers(message: &InboundMessage) -> Vec<&str> {
    [message.sender_id.trim(), message.origin.trim()]
        .into_iter()
        .filter(|s| !s.is_empty())
        .collect()
}

// ============================================================================
// Dispatch
// ============================================================================

pub struct CommandDispatcher {
    service: Arc<AutoReplyService>,
}

impl CommandDispatcher {
    pub fn new(service: Arc<AutoReplyService>) -> Self {
        Self { service }
    }

    /// Zero or one reply for any inbound message: `kr` commands are
    /// dispatched, other `/` text is ignored, everything else is matched.
    pub async fn respond(&self, message: &InboundMessage) -> Option<String> {
        if message.is_command() {
            self.dispatch(message).await
        } else {
            self.service.handle_message(&message.text).map(|hit| hit.reply)
        }
    }

    /// Handle `message` if it is a `kr` command, returning the reply text.
    pub async fn dispatch(&self, message: &InboundMessage) -> Option<String> {
        let command = Command::parse(&message.text)?;

        let settings = self.service.settings();
        if !AccessGate::new(&settings.whitelist).allows(message) {
            let ids = identifiers(message);
            tracing::info!(
                "阻止非白名单用户使用指令，标识符: {}",
                if ids.is_empty() { "<unknown>".to_string() } else { ids.join(", ") }
            );
            return Some(DENIED.to_string());
        }

        Some(self.execute(command).await)
    }

    /// Run an already-authorized command.
    pub async fn execute(&self, command: Command) -> String {
        match command {
            Command::Help => HELP_TEXT.to_string(),
            Command::Usage(usage) => usage.to_string(),
            Command::List => format_list(&self.service.snapshot().store),
            Command::Add { keyword, reply } => {
                let m = self.service.add_keyword(&keyword, &reply).await;
                let text = match m.outcome {
                    AddOutcome::Created => format!("已添加新关键词 '{}'，回复：{}", keyword, reply),
                    AddOutcome::Appended => format!("已为关键词 '{}' 添加新回复：{}", keyword, reply),
                    AddOutcome::Duplicate => format!("关键词 '{}' 已存在相同的回复内容。", keyword),
                };
                with_persist_note(text, m.persisted)
            }
            Command::Del { keyword } => {
                let m = self.service.delete_keyword(&keyword).await;
                if m.outcome {
                    with_persist_note(format!("已删除关键词 '{}' 的回复规则。", keyword), m.persisted)
                } else {
                    format!("未找到关键词 '{}'。", keyword)
                }
            }
            Command::Reload => {
                let count = self.service.reload().await;
                format!("配置已重新加载！当前共有 {} 个关键词规则。", count)
            }
        }
    }
}

fn with_persist_note(text: String, persisted: bool) -> String {
    if persisted {
        text
    } else {
        format!("{}\n{}", text, NOT_PERSISTED)
    }
}

pub fn format_list(store: &KeywordStore) -> String {
    if store.is_empty() {
        return "当前没有配置任何关键词回复规则。".to_string();
    }
    let entries: Vec<String> = store
        .list()
        .map(|(i, keyword, replies)| format!("{}. 关键词：{}\n   回复：{}", i, keyword, replies.join(" | ")))
        .collect();
    format!("当前关键词回复规则：\n\n{}", entries.join("\n\n"))
}

// ============================================================================
// Tests
// ============================================================================
