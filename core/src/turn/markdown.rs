//! Safe split points for streamed markdown
//!
//! A long assistant message is finalized in pieces so the stable prefix can
//! be rendered once. Pieces never split inside a fenced code block.

const FENCE: &str = "```";

fn is_inside_code_block(content: &str, index: usize) -> bool {
  let mut fences = 0;
  let mut search = 0;
  while let Some(offset) = content[search..].find(FENCE) {
    let at = search + offset;
    if at >= index {
      break;
    }
    fences += 1;
    search = at + FENCE.len();
  }
  fences % 2 == 1
}

/// Start of the fenced block that contains `index`, if any.
fn enclosing_code_block_start(content: &str, index: usize) -> Option<usize> {
  if !is_inside_code_block(content, index) {
    return None;
  }
  let mut search = 0;
  while search < index {
    let start = search + content[search..].find(FENCE)?;
    if start >= index {
      return None;
    }
    let after_open = start + FENCE.len();
    match content[after_open..].find(FENCE) {
      None => return Some(start),
      Some(offset) => {
        let end = after_open + offset + FENCE.len();
        if index < end {
          return Some(start);
        }
        search = end;
      }
    }
  }
  None
}

/// Byte offset at which `content` can be split without breaking markdown.
///
/// Returns the start of an unterminated code block, else the position after
/// the last blank line outside code, else `content.len()`.
pub fn find_last_safe_split_point(content: &str) -> usize {
  if let Some(start) = enclosing_code_block_start(content, content.len()) {
    return start;
  }

  let mut end = content.len();
  while let Some(at) = content[..end].rfind("\n\n") {
    let split = at + 2;
    if !is_inside_code_block(content, split) {
      return split;
    }
    end = at;
  }
  content.len()
}
