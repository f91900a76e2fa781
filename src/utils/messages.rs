use crate::{CommandResult, Context};

/// Longest chunk sent in one message; leaves headroom under Discord's 2000 limit
/// for code fences and prefixes.
pub const MAX_CHUNK_LENGTH: usize = 1900;

/// Splits `text` into pieces of at most `max_chars` characters, never inside a
/// UTF-8 sequence.
pub fn chunk_text(text: &str, max_chars: usize) -> Vec<&str> {
    let mut chunks = Vec::new();
    let mut iter = text.chars();
    let mut pos = 0;
    while pos < text.len() {
        let mut len = 0;
        for ch in iter.by_ref().take(max_chars) {
            len += ch.len_utf8();
        }
        chunks.push(&text[pos..pos + len]);
        pos += len;
    }
    chunks
}

/// Wraps subprocess output in a code block, substituting a placeholder when empty.
pub fn code_block(output: &str) -> String {
    let body = output.trim_end();
    let body = if body.is_empty() { "No output" } else { body };
    // A stray fence would end the block early.
    format!("```\n{}\n```", body.replace("```", "``\u{200b}`"))
}

/// Sends a potentially long response as a series of messages.
pub async fn chunk_response<S: AsRef<str>>(ctx: Context<'_>, response: S) -> CommandResult {
    for chunk in chunk_text(response.as_ref(), MAX_CHUNK_LENGTH) {
        ctx.say(chunk).await?;
    }
    Ok(())
}

/// Sends labelled subprocess output, one code block per chunk.
pub async fn send_output(ctx: Context<'_>, label: &str, output: &str) -> CommandResult {
    let output = if output.trim().is_empty() {
        "No output"
    } else {
        output
    };
    let mut first = true;
    for chunk in chunk_text(output, MAX_CHUNK_LENGTH - label.len() - 16) {
        let block = code_block(chunk);
        if first {
            ctx.say(format!("{}\n{}", label, block)).await?;
            first = false;
        } else {
            ctx.say(block).await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_chunk_respects_limit() {
        let text = "a".repeat(4000);
        let chunks = chunk_text(&text, MAX_CHUNK_LENGTH);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 1900);
        assert_eq!(chunks[2].len(), 200);
    }

    #[test]
    fn test_chunk_keeps_multibyte_intact() {
        let text = "é".repeat(5);
        let chunks = chunk_text(&text, 2);
        assert_eq!(chunks, vec!["éé", "éé", "é"]);
    }

    #[test]
    fn test_chunk_empty() {
        assert!(chunk_text("", 10).is_empty());
    }

    #[test]
    fn test_code_block_placeholder_and_fence() {
        assert_eq!(code_block("  \n"), "```\nNo output\n```");
        assert!(!code_block("a```b").contains("a```b"));
    }
}
