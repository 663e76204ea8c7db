//! Code-block styling for messages posted into guild channels.

/// Discord's per-message limit.
pub const MAX_MESSAGE_LEN: usize = 2000;

/// Fence language of a relayed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatStyle {
    /// Relayed channel traffic.
    Normal,
    /// Direct and administrative messages.
    Direct,
}

impl ChatStyle {
    fn fence(self) -> &'static str {
        match self {
            Self::Normal => "ini",
            Self::Direct => "css",
        }
    }
}

/// Wrap one message: "```ini\n [name] text\n```".
pub fn format_chat(user_name: &str, text: &str, style: ChatStyle) -> String {
    format!("```{}\n [{}] {}\n```", style.fence(), user_name, text)
}

/// Format a message, splitting the text so every piece fits the limit.
pub fn format_chunks(user_name: &str, text: &str, style: ChatStyle) -> Vec<String> {
    let overhead = format_chat(user_name, "", style).len();
    let max_text = MAX_MESSAGE_LEN.saturating_sub(overhead).max(1);

    split_message(text, max_text)
        .iter()
        .map(|chunk| format_chat(user_name, chunk, style))
        .collect()
}

/// Find the largest char boundary <= byte_index.
fn floor_char_boundary(s: &str, byte_index: usize) -> usize {
    if byte_index >= s.len() {
        return s.len();
    }
    let mut i = byte_index;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// Split text into pieces of at most `max_len` bytes, preferring spaces.
fn split_message(message: &str, max_len: usize) -> Vec<String> {
    if message.len() <= max_len {
        return vec![message.to_string()];
    }

    let mut chunks = Vec::new();
    let mut remaining = message;

    while !remaining.is_empty() {
        remaining = remaining.trim_start();
        if remaining.is_empty() {
            break;
        }
        if remaining.len() <= max_len {
            chunks.push(remaining.to_string());
            break;
        }

        let split_at = floor_char_boundary(remaining, max_len);
        if split_at == 0 {
            // Single character wider than the limit.
            let first_char_end = remaining
                .char_indices()
                .nth(1)
                .map(|(i, _)| i)
                .unwrap_or(remaining.len());
            chunks.push(remaining[..first_char_end].to_string());
            remaining = &remaining[first_char_end..];
            continue;
        }

        let chunk = &remaining[..split_at];
        match chunk.rfind(' ') {
            Some(space_idx) if space_idx > 0 => {
                chunks.push(remaining[..space_idx].to_string());
                remaining = &remaining[space_idx + 1..];
            }
            _ => {
                chunks.push(chunk.to_string());
                remaining = &remaining[split_at..];
            }
        }
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normal_style() {
        assert_eq!(
            format_chat("Bob", "hi", ChatStyle::Normal),
            "```ini\n [Bob] hi\n```"
        );
    }

    #[test]
    fn test_direct_style() {
        assert_eq!(
            format_chat("Bob", "hi", ChatStyle::Direct),
            "```css\n [Bob] hi\n```"
        );
    }

    #[test]
    fn test_short_message_is_one_chunk() {
        assert_eq!(
            format_chunks("Bob", "hi", ChatStyle::Normal),
            vec!["```ini\n [Bob] hi\n```".to_string()]
        );
    }

    #[test]
    fn test_long_message_split_within_limit() {
        let text = "word ".repeat(1000);
        let chunks = format_chunks("Bob", text.trim_end(), ChatStyle::Normal);

        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.len() <= MAX_MESSAGE_LEN);
            assert!(chunk.starts_with("```ini\n [Bob] word"));
            assert!(chunk.ends_with("word\n```"));
        }
    }

    #[test]
    fn test_split_respects_char_boundaries() {
        let text = "ж".repeat(3000);
        let chunks = format_chunks("Bob", &text, ChatStyle::Direct);

        assert!(chunks.iter().all(|c| c.len() <= MAX_MESSAGE_LEN));
        let total: usize = chunks
            .iter()
            .map(|c| c.chars().filter(|ch| *ch == 'ж').count())
            .sum();
        assert_eq!(total, 3000);
    }

    #[test]
    fn test_split_message_prefers_spaces() {
        assert_eq!(split_message("aaa bbb ccc", 8), vec!["aaa bbb", "ccc"]);
        assert_eq!(split_message("abcdefgh", 3), vec!["abc", "def", "gh"]);
    }
}
