//! `!transmit` administrative commands.
//!
//! Handles command parsing and execution against the live routing table.

use serenity::model::channel::Message;
use serenity::prelude::*;
use tracing::{debug, info, warn};

use crate::bridge::node::{ENDPOINT_CHANNEL_FINDGAME, ENDPOINT_CHANNEL_GLOBAL};
use crate::bridge::{Administration, Direction};

use super::format::MAX_MESSAGE_LEN;

/// Prefix shared by every administrative command.
pub const COMMAND_PREFIX: &str = "!transmit";

/// Parsed administrative command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminCommand {
    Ping,
    Help,
    SetNode {
        channel: String,
        endpoint: String,
        direction: String,
    },
    DeleteNode {
        channel: String,
    },
    ListNodes,
    /// Unrecognised or malformed; carries the usage hint to reply with.
    Invalid(String),
}

/// Whether a message is addressed to the command handler.
pub fn is_admin_command(content: &str) -> bool {
    let content = content.trim_start();
    match content.get(..COMMAND_PREFIX.len()) {
        Some(prefix) if prefix.eq_ignore_ascii_case(COMMAND_PREFIX) => content[COMMAND_PREFIX.len()..]
            .chars()
            .next()
            .map_or(true, char::is_whitespace),
        _ => false,
    }
}

/// Parse a `!transmit` command. Returns `None` for any other message.
pub fn parse_command(content: &str) -> Option<AdminCommand> {
    if !is_admin_command(content) {
        return None;
    }

    let args: Vec<&str> = content.trim_start()[COMMAND_PREFIX.len()..]
        .split_whitespace()
        .collect();
    let sub = args.first().map(|s| s.to_lowercase()).unwrap_or_default();

    let command = match (sub.as_str(), &args[args.len().min(1)..]) {
        ("ping", _) => AdminCommand::Ping,
        ("help", _) | ("", _) => AdminCommand::Help,
        ("setnode", [channel, endpoint, direction]) => AdminCommand::SetNode {
            channel: channel.to_string(),
            endpoint: endpoint.to_string(),
            direction: direction.to_string(),
        },
        ("setnode", _) => AdminCommand::Invalid(
            "Usage: !transmit setnode <channel> <endpoint channel> <direction>".to_string(),
        ),
        ("deletenode", [channel]) => AdminCommand::DeleteNode {
            channel: channel.to_string(),
        },
        ("deletenode", _) => {
            AdminCommand::Invalid("Usage: !transmit deletenode <channel>".to_string())
        }
        ("listnodes", _) => AdminCommand::ListNodes,
        (other, _) => AdminCommand::Invalid(format!(
            "Unknown command '{}'. Try !transmit help",
            other
        )),
    };
    Some(command)
}

/// Resolve a channel argument (name, `#name`, `<#id>` mention or id)
/// against the guild's text channels.
pub fn resolve_channel(channels: &[(u64, String)], arg: &str) -> Option<(u64, String)> {
    let arg = arg.trim();
    let id_text = arg
        .strip_prefix("<#")
        .and_then(|s| s.strip_suffix('>'))
        .unwrap_or(arg);

    if let Ok(id) = id_text.parse::<u64>() {
        return channels.iter().find(|(cid, _)| *cid == id).cloned();
    }

    let name = arg.trim_start_matches('#');
    channels
        .iter()
        .find(|(_, channel_name)| channel_name.eq_ignore_ascii_case(name))
        .cloned()
}

fn help_text() -> String {
    format!(
        "**!transmit commands**\n\
         `!transmit ping` - check the bot is alive\n\
         `!transmit setnode <channel> <endpoint> <direction>` - bridge a channel\n\
         `!transmit deletenode <channel>` - remove a bridge\n\
         `!transmit listnodes` - list bridged channels\n\
         Endpoints: `{}`, `{}`. Direction: `read` (0) or `readwrite` (1).",
        ENDPOINT_CHANNEL_GLOBAL, ENDPOINT_CHANNEL_FINDGAME
    )
}

/// Group reply lines into messages under the platform limit.
fn pack_lines(lines: &[String]) -> Vec<String> {
    let mut messages = Vec::new();
    let mut current = String::new();
    for line in lines {
        if !current.is_empty() && current.len() + line.len() + 1 > MAX_MESSAGE_LEN {
            messages.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push('\n');
        }
        current.push_str(line);
    }
    if !current.is_empty() {
        messages.push(current);
    }
    messages
}

/// Command handler for the `!transmit` surface.
pub struct AdminCommands {
    admin: Administration,
    /// Empty allows everyone.
    admins: Vec<u64>,
}

impl AdminCommands {
    pub fn new(admin: Administration, admins: Vec<u64>) -> Self {
        Self { admin, admins }
    }

    pub fn is_authorized(&self, user_id: u64) -> bool {
        self.admins.is_empty() || self.admins.contains(&user_id)
    }

    /// Run a command and produce reply lines.
    pub fn execute(
        &self,
        command: AdminCommand,
        server_id: u64,
        channels: &[(u64, String)],
    ) -> Vec<String> {
        let reply = match command {
            AdminCommand::Ping => "ping received".to_string(),
            AdminCommand::Help => help_text(),
            AdminCommand::Invalid(hint) => hint,
            AdminCommand::ListNodes => return self.admin.describe_nodes(),
            AdminCommand::SetNode {
                channel,
                endpoint,
                direction,
            } => {
                let Some(direction) = Direction::parse(&direction) else {
                    return vec![format!(
                        "Unknown direction '{}'. Use read (0) or readwrite (1)",
                        direction
                    )];
                };
                let Some((channel_id, channel_name)) = resolve_channel(channels, &channel) else {
                    return vec![format!("Channel '{}' not found in this server", channel)];
                };
                match self
                    .admin
                    .set_node(server_id, channel_id, &endpoint, &channel_name, direction)
                {
                    Ok(ack) => ack,
                    Err(reason) => reason,
                }
            }
            AdminCommand::DeleteNode { channel } => {
                // Numeric ids work even for channels that no longer exist.
                let channel_id = resolve_channel(channels, &channel)
                    .map(|(id, _)| id)
                    .or_else(|| channel.trim_start_matches("<#").trim_end_matches('>').parse().ok());
                match channel_id {
                    Some(channel_id) => match self.admin.delete_node(channel_id) {
                        Ok(ack) => ack,
                        Err(reason) => reason,
                    },
                    None => format!("Channel '{}' not found in this server", channel),
                }
            }
        };
        vec![reply]
    }

    /// Handle a `!transmit` message and post the reply.
    pub async fn handle(&self, ctx: &Context, msg: &Message) {
        let Some(command) = parse_command(&msg.content) else {
            return;
        };
        let Some(guild_id) = msg.guild_id else {
            return;
        };

        let reply = if self.is_authorized(msg.author.id.get()) {
            debug!(?command, user = %msg.author.name, "Processing admin command");
            let channels = guild_channels(ctx, guild_id);
            self.execute(command, guild_id.get(), &channels)
        } else {
            info!(user = %msg.author.name, "Rejected admin command from non-admin");
            vec!["You are not allowed to manage transmit nodes".to_string()]
        };

        for message in pack_lines(&reply) {
            if let Err(e) = msg.channel_id.say(&ctx.http, message).await {
                warn!("Failed to reply to admin command: {}", e);
                return;
            }
        }
    }
}

/// Snapshot of the guild's channels from the cache.
fn guild_channels(ctx: &Context, guild_id: serenity::model::id::GuildId) -> Vec<(u64, String)> {
    ctx.cache
        .guild(guild_id)
        .map(|guild| {
            guild
                .channels
                .values()
                .map(|channel| (channel.id.get(), channel.name.clone()))
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::bridge::{RoutingTable, SqliteNodeStore};

    fn commands(admins: Vec<u64>) -> AdminCommands {
        let store = Arc::new(SqliteNodeStore::open_in_memory().unwrap());
        let table = Arc::new(RoutingTable::load(store).unwrap());
        AdminCommands::new(Administration::new(table), admins)
    }

    fn channels() -> Vec<(u64, String)> {
        vec![(10, "general".to_string()), (20, "pa-chat".to_string())]
    }

    #[test]
    fn test_is_admin_command() {
        assert!(is_admin_command("!transmit ping"));
        assert!(is_admin_command("!TRANSMIT"));
        assert!(!is_admin_command("!transmitter"));
        assert!(!is_admin_command("!who"));
        assert!(!is_admin_command("hello"));
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(parse_command("!transmit ping"), Some(AdminCommand::Ping));
        assert_eq!(parse_command("!transmit"), Some(AdminCommand::Help));
        assert_eq!(parse_command("!transmit listnodes"), Some(AdminCommand::ListNodes));
        assert_eq!(
            parse_command("!transmit setnode #general global 1"),
            Some(AdminCommand::SetNode {
                channel: "#general".to_string(),
                endpoint: "global".to_string(),
                direction: "1".to_string(),
            })
        );
        assert_eq!(
            parse_command("!transmit deletenode <#10>"),
            Some(AdminCommand::DeleteNode {
                channel: "<#10>".to_string()
            })
        );
        assert!(matches!(
            parse_command("!transmit setnode general"),
            Some(AdminCommand::Invalid(_))
        ));
        assert!(matches!(
            parse_command("!transmit dance"),
            Some(AdminCommand::Invalid(_))
        ));
        assert_eq!(parse_command("just chatting"), None);
    }

    #[test]
    fn test_resolve_channel() {
        let channels = channels();
        assert_eq!(resolve_channel(&channels, "general"), Some((10, "general".to_string())));
        assert_eq!(resolve_channel(&channels, "#PA-CHAT"), Some((20, "pa-chat".to_string())));
        assert_eq!(resolve_channel(&channels, "<#20>"), Some((20, "pa-chat".to_string())));
        assert_eq!(resolve_channel(&channels, "10"), Some((10, "general".to_string())));
        assert_eq!(resolve_channel(&channels, "99"), None);
        assert_eq!(resolve_channel(&channels, "random"), None);
    }

    #[test]
    fn test_setnode_list_delete_flow() {
        let commands = commands(Vec::new());
        let channels = channels();

        let reply = commands.execute(parse_command("!transmit setnode general global rw").unwrap(), 1, &channels);
        assert!(reply[0].starts_with("Node set"));

        let reply = commands.execute(AdminCommand::ListNodes, 1, &channels);
        assert_eq!(reply, vec!["#general (10) -> global [read-write]".to_string()]);

        let reply = commands.execute(parse_command("!transmit deletenode #general").unwrap(), 1, &channels);
        assert!(reply[0].contains("deleted"));
    }

    #[test]
    fn test_setnode_errors_are_readable() {
        let commands = commands(Vec::new());
        let channels = channels();

        let reply = commands.execute(parse_command("!transmit setnode general global sideways").unwrap(), 1, &channels);
        assert!(reply[0].contains("Unknown direction"));

        let reply = commands.execute(parse_command("!transmit setnode nowhere global 1").unwrap(), 1, &channels);
        assert!(reply[0].contains("not found"));

        commands.execute(parse_command("!transmit setnode general global 1").unwrap(), 1, &channels);
        let reply = commands.execute(parse_command("!transmit setnode general findgame 0").unwrap(), 1, &channels);
        assert!(reply[0].contains("already bridged"));
    }

    #[test]
    fn test_deletenode_accepts_stale_id() {
        let commands = commands(Vec::new());
        let reply = commands.execute(parse_command("!transmit deletenode 12345").unwrap(), 1, &[]);
        assert!(reply[0].contains("No node exists"));
    }

    #[test]
    fn test_ping_and_help() {
        let commands = commands(Vec::new());
        assert_eq!(commands.execute(AdminCommand::Ping, 1, &[]), vec!["ping received".to_string()]);
        let help = commands.execute(AdminCommand::Help, 1, &[]);
        assert!(help[0].contains("global"));
        assert!(help[0].contains("findgame"));
    }

    #[test]
    fn test_authorization() {
        assert!(commands(Vec::new()).is_authorized(5));
        let restricted = commands(vec![1, 2]);
        assert!(restricted.is_authorized(2));
        assert!(!restricted.is_authorized(5));
    }

    #[test]
    fn test_pack_lines_respects_limit() {
        let lines: Vec<String> = (0..100).map(|i| format!("{:0>50}", i)).collect();
        let messages = pack_lines(&lines);
        assert!(messages.len() > 1);
        assert!(messages.iter().all(|m| m.len() <= MAX_MESSAGE_LEN));
        assert_eq!(messages.iter().map(|m| m.lines().count()).sum::<usize>(), 100);
    }
}
