//! Pull the program out of a completion
//!
//! Block selection, in order, skipping blocks with an empty body:
//! 1. the first block tagged `python`, `py` or `python3`
//! 2. otherwise the longest untagged block
//! 3. otherwise, when the reply opens with a fence, the longest block with any
//!    other tag
//! 4. otherwise the whole reply
//!
//! Inside an open block a tagged fence (```` ```bash ````) opens a nested block
//! that the next bare fence closes, so programs that embed markdown keep it. An
//! unterminated fence runs to the end of the reply.
//!
//! A chosen body may itself contain fences. Selection is repeated on it until
//! the text selects itself, so extracting an extracted program returns it
//! unchanged.

struct Block<'a> {
    tag: String,
    body: &'a str,
}

fn is_python_tag(tag: &str) -> bool {
    matches!(tag, "python" | "py" | "python3")
}

/// Lowercased tag of a fence line, `Some("")` for a bare fence
fn fence_tag(line: &str) -> Option<String> {
    line.trim()
        .strip_prefix("```")
        .map(|rest| rest.trim().to_lowercase())
}

/// Outermost fenced blocks in order of appearance
fn fenced_blocks(text: &str) -> Vec<Block<'_>> {
    let mut blocks = Vec::new();
    // (tag, body start, nesting depth inside the block)
    let mut open: Option<(String, usize, usize)> = None;
    let mut offset = 0;

    for line in text.split_inclusive('\n') {
        let start = offset;
        offset += line.len();
        let Some(tag) = fence_tag(line) else {
            continue;
        };

        open = match open {
            None => Some((tag, offset, 0)),
            Some((outer, body_start, depth)) => {
                if !tag.is_empty() {
                    Some((outer, body_start, depth + 1))
                } else if depth > 0 {
                    Some((outer, body_start, depth - 1))
                } else {
                    blocks.push(Block {
                        tag: outer,
                        body: &text[body_start..start],
                    });
                    None
                }
            }
        };
    }

    if let Some((tag, body_start, _)) = open {
        blocks.push(Block {
            tag,
            body: &text[body_start..],
        });
    }

    blocks
}

fn longest<'a, 'b>(blocks: impl Iterator<Item = &'b Block<'a>>) -> Option<&'b Block<'a>>
where
    'a: 'b,
{
    // Earliest block wins a length tie
    let mut best: Option<&'b Block<'a>> = None;
    for block in blocks {
        let longer = match best {
            Some(b) => block.body.trim().len() > b.body.trim().len(),
            None => true,
        };
        if longer {
            best = Some(block);
        }
    }
    best
}

fn opens_with_fence(text: &str) -> bool {
    text.lines()
        .find(|l| !l.trim().is_empty())
        .is_some_and(|l| fence_tag(l).is_some())
}

/// One round of selection; the result is trimmed
fn select(text: &str) -> String {
    let blocks: Vec<Block<'_>> = fenced_blocks(text)
        .into_iter()
        .filter(|b| !b.body.trim().is_empty())
        .collect();

    let chosen = blocks
        .iter()
        .find(|b| is_python_tag(&b.tag))
        .or_else(|| longest(blocks.iter().filter(|b| b.tag.is_empty())))
        .or_else(|| {
            if opens_with_fence(text) {
                longest(blocks.iter())
            } else {
                None
            }
        });

    match chosen {
        Some(block) => block.body.trim().to_string(),
        None => text.trim().to_string(),
    }
}

/// Keep only the primary code block of a completion
pub fn extract_code(raw: &str) -> String {
    let mut code = select(raw);
    // Each round that changes the text strictly shortens it
    loop {
        let again = select(&code);
        if again == code {
            return code;
        }
        code = again;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_plain_text_is_trimmed() {
        assert_eq!(extract_code("\n  print('x')\n\n"), "print('x')");
    }

    #[test]
    fn test_python_block_beats_longer_untagged_block() {
        let raw = "Install first:\n```\npip install crawlee beautifulsoup4 and many other things\n```\n\
                   Then run:\n```python\nimport asyncio\n```\n";
        assert_eq!(extract_code(raw), "import asyncio");
    }

    #[test]
    fn test_first_python_block_wins() {
        let raw = "```python\nfirst()\n```\n```py\nsecond_and_longer()\n```";
        assert_eq!(extract_code(raw), "first()");
    }

    #[test]
    fn test_longest_untagged_then_other_tags() {
        let raw = "```\na\n```\n```\nlonger()\n```";
        assert_eq!(extract_code(raw), "longer()");

        let raw = "```bash\nls\n```\n```text\nmuch longer\n```";
        assert_eq!(extract_code(raw), "much longer");
    }

    #[test]
    fn test_other_tags_after_prose_keep_whole_reply() {
        let raw = "Run this:\n```bash\nls\n```";
        assert_eq!(extract_code(raw), raw);
    }

    #[test]
    fn test_empty_python_block_is_skipped() {
        assert_eq!(extract_code("```python\n```\n```\nprint('real')\n```"), "print('real')");
    }

    #[test]
    fn test_unterminated_fence_runs_to_end() {
        let raw = "Here you go:\n```python\nimport asyncio\n\nasyncio.run(main())\n";
        assert_eq!(extract_code(raw), "import asyncio\n\nasyncio.run(main())");
    }

    #[test]
    fn test_indentation_inside_block_is_kept() {
        let raw = "```Python\ndef f():\n    return 1\n```";
        assert_eq!(extract_code(raw), "def f():\n    return 1");
    }

    #[test]
    fn test_nested_markdown_stays_in_program() {
        let raw = "```python\nREADME = \"\"\"\n```bash\npip install crawlee\n```\n\"\"\"\nprint(README)\n```";
        let code = extract_code(raw);
        assert_eq!(
            code,
            "README = \"\"\"\n```bash\npip install crawlee\n```\n\"\"\"\nprint(README)"
        );
        assert_eq!(extract_code(&code), code);
    }

    #[test]
    fn test_idempotent_on_own_output() {
        let replies = [
            "```python\nimport json\nprint(json.dumps([]))\n```",
            "Sure!\n```\nx = 1\n```\nand\n```js\nlet y\n```",
            "no fences here\n",
            "```python\nunterminated = True",
            "```python\nDOC = '''\n```\nnested\n```\n'''\n```",
        ];
        for raw in replies {
            let once = extract_code(raw);
            assert_eq!(extract_code(&once), once, "not idempotent for {:?}", raw);
        }
    }

    fn reply_line() -> impl Strategy<Value = String> {
        prop_oneof![
            Just("```".to_string()),
            Just("```python".to_string()),
            Just("```py".to_string()),
            Just("```bash".to_string()),
            Just("  ```json".to_string()),
            Just("\"\"\"".to_string()),
            Just(String::new()),
            Just("Here is the scraper:".to_string()),
            "[a-z_ =()'.]{0,16}",
        ]
    }

    proptest! {
        #[test]
        fn extraction_is_idempotent(lines in prop::collection::vec(reply_line(), 0..16)) {
            let raw = lines.join("\n");
            let once = extract_code(&raw);
            prop_assert_eq!(extract_code(&once), once);
        }

        #[test]
        fn extraction_is_idempotent_on_any_text(raw in ".{0,200}") {
            let once = extract_code(&raw);
            prop_assert_eq!(extract_code(&once), once);
        }
    }
}
