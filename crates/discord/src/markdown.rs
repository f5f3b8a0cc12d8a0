/// Remove user mentions (`<@123>`, `<@!123>`) and trim the result.
pub fn strip_mentions(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("<@") {
        out.push_str(&rest[..start]);
        let tail = &rest[start + 2..];
        let id = tail.strip_prefix('!').unwrap_or(tail);
        match id.find('>') {
            Some(end) if end > 0 && id[..end].bytes().all(|b| b.is_ascii_digit()) => {
                rest = &id[end + 1..];
            },
            _ => {
                out.push_str("<@");
                rest = tail;
            },
        }
    }
    out.push_str(rest);
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Split `text` into chunks of at most `max` characters, preferring line
/// breaks, then spaces.
pub fn chunk_message(text: &str, max: usize) -> Vec<&str> {
    let mut chunks = Vec::new();
    let mut rest = text;
    while rest.chars().count() > max {
        let hard = rest
            .char_indices()
            .nth(max)
            .map_or(rest.len(), |(i, _)| i);
        let window = &rest[..hard];
        let cut = window
            .rfind('\n')
            .or_else(|| window.rfind(' '))
            .filter(|&i| i > 0)
            .unwrap_or(hard);
        chunks.push(&rest[..cut]);
        rest = rest[cut..].trim_start_matches(['\n', ' ']);
    }
    if !rest.is_empty() || chunks.is_empty() {
        chunks.push(rest);
    }
    chunks
}
